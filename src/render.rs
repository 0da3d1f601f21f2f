//! HTML and text rendering of query log entries
//!
//! The renderer is the only place that looks inside entries. A row whose
//! entry is not a query record renders as a visible error row instead of
//! failing the whole page.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

use crate::stats::{LogEntry, QueryExecutionRecord};
use crate::streamlog::StreamStats;

/// Timestamp layout used in both the page and the text stream
const TIME_FORMAT: &str = "%b %e %H:%M:%S%.6f";

pub const COLUMNS: [&str; 19] = [
    "Method",
    "Context",
    "Start",
    "End",
    "Duration",
    "Engine time",
    "Conn wait",
    "Plan type",
    "SQL",
    "Queries",
    "Sources",
    "Rows",
    "Errors",
    "Hits",
    "Misses",
    "Absent",
    "Invalidations",
    "Transaction ID",
    "Error",
];

const PAGE_HEADER: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>querylogz</title>
<style>
  table { border-collapse: collapse; font-family: monospace; font-size: small; }
  td, th { border: 1px solid #ccc; padding: 2px 6px; vertical-align: top; }
  tr.low td { background-color: #ddffdd; }
  tr.medium td { background-color: #ffffcc; }
  tr.high td { background-color: #ffdddd; }
  tr.mismatch td { background-color: #ff9999; font-weight: bold; }
</style>
</head>
<body>
"#;

const PAGE_FOOTER: &str = "</body>\n</html>\n";

/// Render failure for a single entry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("unexpected entry type '{kind}', expected a query execution record")]
    UnexpectedEntry { kind: &'static str },
}

/// Presentation bucket for a record's total duration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Fast,
    Medium,
    Slow,
}

impl Severity {
    pub fn css_class(&self) -> &'static str {
        match self {
            Self::Fast => "low",
            Self::Medium => "medium",
            Self::Slow => "high",
        }
    }
}

/// Duration cut-offs between fast, medium and slow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyThresholds {
    /// Durations strictly below this are fast
    pub fast_below: Duration,
    /// Durations strictly below this (and not fast) are medium
    pub medium_below: Duration,
}

impl LatencyThresholds {
    pub fn from_millis(fast_ms: u64, medium_ms: u64) -> Self {
        Self {
            fast_below: Duration::from_millis(fast_ms),
            medium_below: Duration::from_millis(medium_ms),
        }
    }

    pub fn classify(&self, duration: Duration) -> Severity {
        if duration < self.fast_below {
            Severity::Fast
        } else if duration < self.medium_below {
            Severity::Medium
        } else {
            Severity::Slow
        }
    }
}

impl Default for LatencyThresholds {
    fn default() -> Self {
        Self::from_millis(10, 100)
    }
}

/// A rendered page plus how many rows failed the type check
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub rows: usize,
    pub errors: usize,
}

/// Type check at the log boundary
pub fn query_record(entry: &LogEntry) -> Result<&QueryExecutionRecord, RenderError> {
    match entry {
        LogEntry::Query(record) => Ok(&**record),
        other => Err(RenderError::UnexpectedEntry { kind: other.kind() }),
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Seconds in shortest form; values below 1e-4 use an exponent such as `1e-08`
fn seconds(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs == 0.0 || secs >= 1e-4 {
        return secs.to_string();
    }

    let formatted = format!("{:e}", secs);
    match formatted.split_once("e-") {
        Some((mantissa, exponent)) => format!("{}e-{:0>2}", mantissa, exponent),
        None => formatted,
    }
}

/// Cell values of a record, in [`COLUMNS`] order
fn cells(record: &QueryExecutionRecord) -> [String; 19] {
    [
        record.operation.clone(),
        record.caller.clone().unwrap_or_default(),
        record.start_time.format(TIME_FORMAT).to_string(),
        record.end_time.format(TIME_FORMAT).to_string(),
        seconds(record.total_duration()),
        seconds(record.engine_response_time),
        seconds(record.connection_wait),
        record.plan_type.to_string(),
        record.original_sql.clone(),
        record.query_count.to_string(),
        record.query_sources.to_string(),
        record.rows_affected.to_string(),
        record.error_count.to_string(),
        record.cache_hits.to_string(),
        record.cache_misses.to_string(),
        record.cache_absent.to_string(),
        record.cache_invalidations.to_string(),
        record.transaction_id.to_string(),
        record.error.clone().unwrap_or_default(),
    ]
}

pub fn render_row(record: &QueryExecutionRecord, thresholds: &LatencyThresholds) -> String {
    let severity = thresholds.classify(record.total_duration());

    let mut row = format!("<tr class=\"{}\">\n", severity.css_class());
    for cell in cells(record) {
        let _ = writeln!(row, "  <td>{}</td>", escape_html(&cell));
    }
    row.push_str("</tr>\n");
    row
}

pub fn render_error_row(error: &RenderError) -> String {
    format!(
        "<tr class=\"mismatch\">\n  <td colspan=\"{}\">error: {}</td>\n</tr>\n",
        COLUMNS.len(),
        escape_html(&error.to_string())
    )
}

/// Render one entry, or the reason it cannot be rendered
pub fn render_entry(entry: &LogEntry, thresholds: &LatencyThresholds) -> Result<String, RenderError> {
    query_record(entry).map(|record| render_row(record, thresholds))
}

/// Render a full page for `entries`, in order
pub fn render_page(
    entries: &[LogEntry],
    thresholds: &LatencyThresholds,
    stats: Option<&StreamStats>,
) -> RenderedPage {
    let mut html = String::from(PAGE_HEADER);
    let mut errors = 0;

    html.push_str("<table>\n<tr>\n");
    for column in COLUMNS {
        let _ = writeln!(html, "  <th>{}</th>", column);
    }
    html.push_str("</tr>\n");

    for entry in entries {
        match render_entry(entry, thresholds) {
            Ok(row) => html.push_str(&row),
            Err(e) => {
                errors += 1;
                html.push_str(&render_error_row(&e));
            }
        }
    }
    html.push_str("</table>\n");

    if let Some(stats) = stats {
        let _ = writeln!(
            html,
            "<p>log: {} | capacity: {} | subscribers: {} | published: {} | dropped: {}</p>",
            escape_html(&stats.name),
            stats.capacity,
            stats.subscribers,
            stats.published,
            stats.dropped,
        );
    }
    html.push_str(PAGE_FOOTER);

    RenderedPage {
        html,
        rows: entries.len() - errors,
        errors,
    }
}

/// Tab-separated single-line form of an entry, used by the live tail
pub fn text_line(entry: &LogEntry) -> String {
    match entry {
        LogEntry::Query(record) => {
            let mut line = cells(record)
                .iter()
                .map(|cell| cell.replace(['\t', '\n'], " "))
                .collect::<Vec<_>>()
                .join("\t");
            line.push('\n');
            line
        }
        LogEntry::Message(message) => format!("{}\n", message.replace('\n', " ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{PlanType, QuerySources};
    use chrono::{TimeZone, Utc};

    fn sample_record(elapsed: Duration) -> QueryExecutionRecord {
        let start = Utc.timestamp_opt(123_456_789, 0).unwrap();
        let mut record = QueryExecutionRecord::started_at("Execute", start);
        record.plan_type = PlanType::PassSelect;
        record.original_sql = "select name from test_table limit 1000".to_string();
        record.rows_affected = 1000;
        record.query_count = 1;
        record.engine_response_time = Duration::from_millis(1);
        record.connection_wait = Duration::from_nanos(10);
        record.cache_hits = 17;
        record.cache_absent = 5;
        record.cache_misses = 2;
        record.cache_invalidations = 3;
        record.transaction_id = 131;
        record.end_time = start + chrono::Duration::from_std(elapsed).unwrap();
        record
    }

    #[test]
    fn test_classify_thresholds() {
        let thresholds = LatencyThresholds::default();
        assert_eq!(thresholds.classify(Duration::from_millis(1)), Severity::Fast);
        assert_eq!(thresholds.classify(Duration::from_millis(20)), Severity::Medium);
        assert_eq!(thresholds.classify(Duration::from_millis(500)), Severity::Slow);
        assert_eq!(thresholds.classify(Duration::from_millis(10)), Severity::Medium);
        assert_eq!(thresholds.classify(Duration::from_millis(100)), Severity::Slow);
    }

    #[test]
    fn test_render_row_fields() {
        let record = sample_record(Duration::from_millis(1));
        let row = render_row(&record, &LatencyThresholds::default());

        assert!(row.starts_with("<tr class=\"low\">"));
        for cell in [
            "<td>Execute</td>",
            "<td></td>",
            "<td>Nov 29 21:33:09.000000</td>",
            "<td>Nov 29 21:33:09.001000</td>",
            "<td>0.001</td>",
            "<td>1e-08</td>",
            "<td>PASS_SELECT</td>",
            "<td>select name from test_table limit 1000</td>",
            "<td>none</td>",
            "<td>1000</td>",
            "<td>17</td>",
            "<td>131</td>",
        ] {
            assert!(row.contains(cell), "row is missing {}: {}", cell, row);
        }
    }

    #[test]
    fn test_seconds_format() {
        assert_eq!(seconds(Duration::ZERO), "0");
        assert_eq!(seconds(Duration::from_millis(20)), "0.02");
        assert_eq!(seconds(Duration::from_micros(100)), "0.0001");
        assert_eq!(seconds(Duration::from_nanos(10)), "1e-08");
        assert_eq!(seconds(Duration::from_nanos(15)), "1.5e-08");
        assert_eq!(seconds(Duration::from_micros(50)), "5e-05");
        assert_eq!(seconds(Duration::from_secs(2)), "2");
    }

    #[test]
    fn test_render_row_escapes_sql() {
        let mut record = sample_record(Duration::from_millis(1));
        record.original_sql = "select * from t where a < 1 and b = '<script>'".to_string();
        record.query_sources = QuerySources::MYSQL;
        let row = render_row(&record, &LatencyThresholds::default());

        assert!(row.contains("a &lt; 1"));
        assert!(row.contains("&#39;&lt;script&gt;&#39;"));
        assert!(row.contains("<td>mysql</td>"));
    }

    #[test]
    fn test_render_entry_rejects_message() {
        let entry = LogEntry::from("test msg");
        let result = render_entry(&entry, &LatencyThresholds::default());
        assert_eq!(result, Err(RenderError::UnexpectedEntry { kind: "message" }));
    }

    #[test]
    fn test_render_page_mixes_rows_and_errors() {
        let entries = vec![
            LogEntry::from(sample_record(Duration::from_millis(1))),
            LogEntry::from("test msg"),
            LogEntry::from(sample_record(Duration::from_millis(500))),
        ];
        let page = render_page(&entries, &LatencyThresholds::default(), None);

        assert_eq!(page.rows, 2);
        assert_eq!(page.errors, 1);
        assert!(page.html.contains("error: unexpected entry type 'message'"));

        let low = page.html.find("<tr class=\"low\">").unwrap();
        let error = page.html.find("<tr class=\"mismatch\">").unwrap();
        let high = page.html.find("<tr class=\"high\">").unwrap();
        assert!(low < error && error < high);
    }

    #[test]
    fn test_text_line() {
        let line = text_line(&LogEntry::from(sample_record(Duration::from_millis(20))));
        let fields: Vec<&str> = line.trim_end().split('\t').collect();
        assert_eq!(fields.len(), COLUMNS.len());
        assert_eq!(fields[0], "Execute");
        assert_eq!(fields[4], "0.02");

        assert_eq!(text_line(&LogEntry::from("a\nb")), "a b\n");
    }
}
