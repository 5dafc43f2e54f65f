//! Data models for the scan pipeline.
//!
//! This module contains the raw item shapes delivered by the two upstream
//! feeds, the per-branch payload they accumulate into, and the canonical
//! merged entities (events and hotspots) derived from them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Severity level attached by upstream providers.
///
/// Values are passed through, not validated: anything outside the four known
/// levels is kept verbatim in [`Severity::Other`], which orders below `Low`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    /// Unrecognized label, kept as received
    Other(String),
    /// Minimal risk
    Low,
    /// Moderate situation
    Medium,
    /// Serious situation
    High,
    /// Very severe situation
    Critical,
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
            Severity::Other(_) => "⚪",
        }
    }

    /// Lowercase wire label.
    pub fn as_str(&self) -> &str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Other(s) => s,
        }
    }

    /// Whether an event with this severity belongs on the alert list.
    pub fn is_alert(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
            Severity::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Only the exact lowercase wire labels are recognised; anything else,
/// `"HIGH"` included, is carried through untouched.
impl From<&str> for Severity {
    fn from(s: &str) -> Self {
        match s {
            "low" => Severity::Low,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Other(s.to_string()),
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        Severity::from(s.as_str())
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        s.as_str().to_string()
    }
}

/// The two upstream sources tracked through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Search-volume trend source
    Trends,
    /// News/incident search source
    Incidents,
}

impl SourceKind {
    /// Envelope `type` tag carrying one partial result on this source's stream.
    pub fn partial_tag(self) -> &'static str {
        match self {
            SourceKind::Trends => "trend",
            SourceKind::Incidents => "result",
        }
    }

    /// Human-readable source name.
    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Trends => "Health Trends",
            SourceKind::Incidents => "Incident Search",
        }
    }

    /// Source name recorded on payloads accumulated from the stream.
    pub fn streaming_label(self) -> &'static str {
        match self {
            SourceKind::Trends => "Health Trends (Streaming)",
            SourceKind::Incidents => "Incident Search (Streaming)",
        }
    }

    /// Prefix of the event ids derived from this source.
    pub fn event_prefix(self) -> &'static str {
        match self {
            SourceKind::Trends => "trend",
            SourceKind::Incidents => "search",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Trends => write!(f, "trends"),
            SourceKind::Incidents => write!(f, "incidents"),
        }
    }
}

/// Geographic reference supplied by upstream geocoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
}

impl Location {
    /// Exact-coordinate key used to bucket hotspots.
    pub fn key(&self) -> (u64, u64) {
        // -0.0 and 0.0 must share a bucket
        let norm = |v: f64| if v == 0.0 { 0.0f64 } else { v };
        (norm(self.lat).to_bits(), norm(self.lng).to_bits())
    }

    /// "City, ST" display form.
    pub fn display_name(&self) -> String {
        match (self.city.is_empty(), self.state.is_empty()) {
            (false, false) => format!("{}, {}", self.city, self.state),
            (false, true) => self.city.clone(),
            (true, false) => self.state.clone(),
            (true, true) => format!("({}, {})", self.lat, self.lng),
        }
    }
}

/// One market reported by the trends source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    #[serde(default, deserialize_with = "lenient::location", skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient::number", skip_serializing_if = "Option::is_none")]
    pub query_volume: Option<f64>,
    /// Direction text such as "+15%".
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub trend: Option<String>,
    #[serde(default, deserialize_with = "lenient::severity", skip_serializing_if = "Option::is_none")]
    pub risk: Option<Severity>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub dma_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub dma_code: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub query_term: Option<String>,
    #[serde(default, deserialize_with = "lenient::count", skip_serializing_if = "Option::is_none")]
    pub affected: Option<u64>,
}

/// One report returned by the incident search source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentItem {
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Publishing outlet.
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, deserialize_with = "lenient::severity", skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "lenient::location", skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "lenient::count", skip_serializing_if = "Option::is_none")]
    pub affected: Option<u64>,
    #[serde(default, deserialize_with = "lenient::text", skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Structured result held by one branch.
///
/// While streaming this is the cumulative snapshot so far; once the branch is
/// terminal it is final. Fallback responses decode into this shape directly,
/// with unknown fields preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct BranchPayload<T> {
    #[serde(default)]
    pub source: String,
    #[serde(default = "Vec::new", deserialize_with = "lenient::items")]
    pub results: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<T> BranchPayload<T> {
    /// Snapshot of results accumulated from a live stream.
    pub fn streaming(
        kind: SourceKind,
        query: &str,
        results: Vec<T>,
        timestamp: Option<String>,
    ) -> Self {
        Self {
            source: kind.streaming_label().to_string(),
            results,
            query: Some(query.to_string()),
            timestamp,
            error: None,
            extra: Map::new(),
        }
    }

    /// Final payload of a failed branch: no results, error attached.
    pub fn failed(kind: SourceKind, error: impl Into<String>) -> Self {
        Self {
            source: kind.label().to_string(),
            results: Vec::new(),
            query: None,
            timestamp: None,
            error: Some(error.into()),
            extra: Map::new(),
        }
    }
}

/// Kind of a merged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Incident,
    Trend,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Incident => write!(f, "incident"),
            EventKind::Trend => write!(f, "trend"),
        }
    }
}

/// Canonical timeline entry; exactly one per raw item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Source prefix plus index, stable within one aggregation only.
    pub id: String,
    pub kind: EventKind,
    pub title: String,
    pub source_label: String,
    pub severity: Option<Severity>,
    pub date: Option<String>,
    pub description: String,
    pub location: Option<Location>,
    pub affected: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trending: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_volume: Option<f64>,
}

/// Weight of an incident whose affected count is unknown.
pub const DEFAULT_INCIDENT_INTENSITY: f64 = 100.0;

impl Event {
    /// Whether this event belongs on the alert list.
    pub fn is_alert(&self) -> bool {
        self.severity.as_ref().is_some_and(Severity::is_alert)
    }

    /// Contribution of this event to its hotspot's total intensity.
    ///
    /// Incidents weigh their affected count (100 when unknown), trends their
    /// query volume.
    pub fn hotspot_intensity(&self) -> f64 {
        match self.kind {
            EventKind::Incident if self.affected > 0 => self.affected as f64,
            EventKind::Incident => DEFAULT_INCIDENT_INTENSITY,
            EventKind::Trend => self.query_volume.unwrap_or(0.0),
        }
    }
}

/// Aggregation of every located event sharing exact coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotspot {
    pub lat: f64,
    pub lng: f64,
    pub city: String,
    pub state: String,
    /// Severity of the most recently merged contributor.
    pub severity: Option<Severity>,
    pub total_intensity: f64,
    /// Contributing kinds, in first-seen order.
    pub types: Vec<EventKind>,
    pub count: usize,
}

/// Tolerant decoders for upstream fields.
///
/// Providers are language models and loosely typed services: numbers arrive
/// as strings, labels as numbers, locations half-filled. A malformed field
/// degrades to `None` instead of discarding the whole item.
pub(crate) mod lenient {
    use super::{Location, Severity};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use tracing::warn;

    fn parse_number(raw: &str) -> Option<f64> {
        raw.trim().replace(',', "").parse::<f64>().ok()
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => parse_number(&s),
            _ => None,
        }
        .filter(|v| v.is_finite()))
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().and_then(whole)),
            Value::String(s) => parse_number(&s).and_then(whole),
            _ => None,
        })
    }

    fn whole(v: f64) -> Option<u64> {
        (v.is_finite() && v >= 0.0).then(|| v.round() as u64)
    }

    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
    }

    pub fn severity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Severity>, D::Error> {
        Ok(text(d)?
            .filter(|s| !s.trim().is_empty())
            .map(Severity::from))
    }

    pub fn location<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Location>, D::Error> {
        Ok(match Value::deserialize(d)? {
            Value::Null => None,
            other => serde_json::from_value(other).ok(),
        })
    }

    pub fn items<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let Value::Array(raw) = Value::deserialize(d)? else {
            return Ok(Vec::new());
        };
        Ok(raw
            .into_iter()
            .filter_map(|v| match serde_json::from_value(v) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Dropping undecodable result item: {}", e);
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Other("unknown".into()) < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_from_str_keeps_unknown_labels() {
        assert_eq!(Severity::from("critical"), Severity::Critical);
        assert_eq!(Severity::from("HIGH"), Severity::Other("HIGH".to_string()));
        assert!(!Severity::from("HIGH").is_alert());
        assert!(!Severity::from(" high").is_alert());
        assert_eq!(
            Severity::from("very high"),
            Severity::Other("very high".to_string())
        );
        assert!(!Severity::from("very high").is_alert());
        assert!(Severity::High.is_alert());
        assert!(!Severity::Medium.is_alert());
    }

    #[test]
    fn test_severity_serializes_as_wire_label() {
        let v = serde_json::to_value(Severity::Critical).unwrap();
        assert_eq!(v, json!("critical"));
        let other: Severity = serde_json::from_value(json!("moderate")).unwrap();
        assert_eq!(serde_json::to_value(other).unwrap(), json!("moderate"));
        let shouted: Severity = serde_json::from_value(json!("Critical")).unwrap();
        assert_eq!(serde_json::to_value(shouted).unwrap(), json!("Critical"));
    }

    #[test]
    fn test_trend_item_tolerates_loose_types() {
        let item: TrendItem = serde_json::from_value(json!({
            "dma_code": 803,
            "dma_name": "LOS ANGELES",
            "location": {"city": "Los Angeles", "state": "CA", "lat": 34.0522, "lng": -118.2437},
            "query_volume": "750",
            "trend": "+15%",
            "risk": "critical",
            "affected": "Unknown"
        }))
        .unwrap();

        assert_eq!(item.dma_code.as_deref(), Some("803"));
        assert_eq!(item.query_volume, Some(750.0));
        assert_eq!(item.risk, Some(Severity::Critical));
        assert_eq!(item.affected, None);
        assert_eq!(item.location.unwrap().city, "Los Angeles");
    }

    #[test]
    fn test_incident_item_with_broken_location() {
        let item: IncidentItem = serde_json::from_value(json!({
            "title": "ER visits spike",
            "severity": "high",
            "location": {"city": "Miami"},
            "affected": 42.6
        }))
        .unwrap();

        assert!(item.location.is_none());
        assert_eq!(item.affected, Some(43));
        assert!(item.url.is_none());
    }

    #[test]
    fn test_payload_keeps_unknown_fields_and_skips_bad_items() {
        let payload: BranchPayload<IncidentItem> = serde_json::from_value(json!({
            "source": "Incident Search (LIVE)",
            "results": [{"title": "ok"}, "not an object"],
            "model": "search-model",
            "query": "q"
        }))
        .unwrap();

        assert_eq!(payload.results.len(), 1);
        assert_eq!(payload.extra.get("model"), Some(&json!("search-model")));
        assert!(payload.error.is_none());
    }

    #[test]
    fn test_location_key_is_exact() {
        let a = Location {
            lat: 30.0,
            lng: -90.0,
            city: "New Orleans".into(),
            state: "LA".into(),
        };
        let b = Location {
            city: String::new(),
            ..a.clone()
        };
        let c = Location {
            lat: 30.000001,
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
        assert_eq!(a.display_name(), "New Orleans, LA");
    }

    #[test]
    fn test_hotspot_intensity_per_kind() {
        let mut event = Event {
            id: "search-0".into(),
            kind: EventKind::Incident,
            title: "t".into(),
            source_label: "s".into(),
            severity: None,
            date: None,
            description: String::new(),
            location: None,
            affected: 0,
            url: None,
            trending: None,
            query_volume: None,
        };
        assert_eq!(event.hotspot_intensity(), DEFAULT_INCIDENT_INTENSITY);

        event.affected = 250;
        assert_eq!(event.hotspot_intensity(), 250.0);

        event.kind = EventKind::Trend;
        event.query_volume = Some(500.0);
        assert_eq!(event.hotspot_intensity(), 500.0);
    }
}
