//! Markdown and JSON report generation.

use crate::aggregation::BranchStatus;
use crate::merge::ScanSummary;
use crate::models::{Event, Hotspot, Severity};
use crate::report::{BranchOutcome, ScanMetadata, ScanReport};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &ScanReport) -> String {
    let mut output = String::new();

    output.push_str("# Horizon Scan Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_sources_section(&report.branches));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_alerts_section(&report.view.alerts));
    output.push_str(&generate_timeline_section(&report.view.events));
    output.push_str(&generate_hotspots_section(&report.view.hotspots));
    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(metadata: &ScanMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Query:** {}\n", metadata.query));
    section.push_str(&format!(
        "- **Scan Date:** {}\n",
        metadata.scan_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Generation:** {}\n", metadata.generation));
    section.push_str(&format!(
        "- **Scan Duration:** {:.1}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_sources_section(branches: &[BranchOutcome]) -> String {
    let mut section = String::new();

    section.push_str("## Sources\n\n");
    section.push_str("| Source | Status | Results | Error |\n");
    section.push_str("|:---|:---:|:---:|:---|\n");

    for branch in branches {
        let status = match branch.status {
            BranchStatus::Completed => "✅ completed".to_string(),
            BranchStatus::Error => "❌ error".to_string(),
            other => other.to_string(),
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            branch.label,
            status,
            branch.results,
            branch.error.as_deref().unwrap_or("-")
        ));
    }
    section.push('\n');

    section
}

fn generate_summary_section(summary: &ScanSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str(&format!(
        "| {} Critical | {} High | {} Medium | {} Low | Unrated | **Events** |\n",
        Severity::Critical.emoji(),
        Severity::High.emoji(),
        Severity::Medium.emoji(),
        Severity::Low.emoji(),
    ));
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | **{}** |\n\n",
        summary.critical,
        summary.high,
        summary.medium,
        summary.low,
        summary.unrated,
        summary.events
    ));

    section.push_str(&format!("- **Alerts:** {}\n", summary.alerts));
    section.push_str(&format!("- **People Affected:** {}\n", summary.total_affected));
    section.push_str(&format!("- **Active Hotspots:** {}\n", summary.active_hotspots));
    section.push_str(&format!("- **Total Cases:** {}\n", summary.total_cases));
    section.push_str(&format!("- **States:** {}\n\n", summary.states));

    if !summary.by_source.is_empty() {
        section.push_str("### Events by Source\n\n");
        section.push_str("| Source | Events |\n");
        section.push_str("|:---|:---:|\n");

        let mut sources: Vec<_> = summary.by_source.iter().collect();
        sources.sort_by_key(|(_, count)| std::cmp::Reverse(*count));

        for (source, count) in sources {
            section.push_str(&format!("| {} | {} |\n", source, count));
        }
        section.push('\n');
    }

    section
}

fn generate_alerts_section(alerts: &[Event]) -> String {
    let mut section = String::new();

    section.push_str("## Alerts\n\n");
    if alerts.is_empty() {
        section.push_str("No high or critical signals for this query.\n\n");
        return section;
    }

    for alert in alerts {
        section.push_str(&generate_event_block(alert));
    }

    section
}

fn generate_timeline_section(events: &[Event]) -> String {
    let mut section = String::new();

    section.push_str("## Timeline\n\n");
    if events.is_empty() {
        section.push_str("No events were returned.\n\n");
        return section;
    }

    section.push_str("| Id | Kind | Severity | Title | Location | Affected |\n");
    section.push_str("|:---|:---:|:---:|:---|:---|:---:|\n");
    for event in events {
        section.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            event.id,
            event.kind,
            severity_badge(event.severity.as_ref()),
            event.title,
            event
                .location
                .as_ref()
                .map(|l| l.display_name())
                .unwrap_or_else(|| "-".to_string()),
            event.affected
        ));
    }
    section.push('\n');

    section
}

fn generate_event_block(event: &Event) -> String {
    let mut block = String::new();

    block.push_str(&format!(
        "### {} {}\n\n",
        severity_badge(event.severity.as_ref()),
        event.title
    ));
    block.push_str(&format!("*{}*", event.source_label));
    if let Some(date) = &event.date {
        block.push_str(&format!(" | {}", date));
    }
    if let Some(location) = &event.location {
        block.push_str(&format!(" | {}", location.display_name()));
    }
    block.push_str("\n\n");

    if !event.description.is_empty() {
        block.push_str(&format!("{}\n\n", event.description));
    }
    if event.affected > 0 {
        block.push_str(&format!("**Affected:** {}\n\n", event.affected));
    }
    if let Some(url) = &event.url {
        block.push_str(&format!("[Source]({})\n\n", url));
    }

    block.push_str("---\n\n");

    block
}

fn generate_hotspots_section(hotspots: &[Hotspot]) -> String {
    if hotspots.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Hotspots\n\n");
    section.push_str("| Location | Coordinates | Severity | Intensity | Signals | Types |\n");
    section.push_str("|:---|:---|:---:|:---:|:---:|:---|\n");

    for hotspot in hotspots {
        let types: Vec<String> = hotspot.types.iter().map(ToString::to_string).collect();
        let place = match (hotspot.city.is_empty(), hotspot.state.is_empty()) {
            (false, false) => format!("{}, {}", hotspot.city, hotspot.state),
            (false, true) => hotspot.city.clone(),
            _ => "-".to_string(),
        };
        section.push_str(&format!(
            "| {} | {:.4}, {:.4} | {} | {} | {} | {} |\n",
            place,
            hotspot.lat,
            hotspot.lng,
            severity_badge(hotspot.severity.as_ref()),
            hotspot.total_intensity,
            hotspot.count,
            types.join(", ")
        ));
    }
    section.push('\n');

    section
}

fn severity_badge(severity: Option<&Severity>) -> String {
    match severity {
        Some(s) => format!("{} {}", s.emoji(), s.as_str().to_uppercase()),
        None => "⚪ UNRATED".to_string(),
    }
}

fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by horizon-scan*\n");

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &ScanReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write rendered report content to a file.
pub fn save_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
