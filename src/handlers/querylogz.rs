//! Query log debug handlers
//!
//! - `GET /<name>?timeout=<seconds>&limit=<count>`: HTML table of recent entries
//! - `GET /<name>/stream`: live tail, one tab-separated line per entry
//! - `GET /<name>/stats`: JSON counters of the log

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::QueryLogConfig;
use crate::error::AppError;
use crate::metrics;
use crate::render::{self, LatencyThresholds};
use crate::stats::LogEntry;
use crate::streamlog::{read_window, EventLog, StreamStats, Subscription, WindowRequest};

/// Page behaviour derived from configuration
#[derive(Debug, Clone)]
pub struct PageSettings {
    pub default_limit: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub thresholds: LatencyThresholds,
}

impl From<&QueryLogConfig> for PageSettings {
    fn from(cfg: &QueryLogConfig) -> Self {
        Self {
            default_limit: cfg.default_limit,
            default_timeout: cfg.default_timeout(),
            max_timeout: cfg.max_timeout(),
            thresholds: cfg.thresholds(),
        }
    }
}

impl Default for PageSettings {
    fn default() -> Self {
        Self::from(&QueryLogConfig::default())
    }
}

/// Shared state for the query log handlers
#[derive(Clone)]
pub struct QueryLogState {
    pub log: EventLog<LogEntry>,
    pub settings: Arc<PageSettings>,
    /// Long-lived tail drained by snapshot (`timeout=0`) views
    tail: Arc<Mutex<Subscription<LogEntry>>>,
}

impl QueryLogState {
    /// Subscribes the page tail immediately; entries published from here on
    /// are shown by the next snapshot view.
    pub fn new(log: EventLog<LogEntry>, settings: PageSettings) -> Self {
        let tail = log.subscribe();
        Self {
            log,
            settings: Arc::new(settings),
            tail: Arc::new(Mutex::new(tail)),
        }
    }
}

/// Raw query parameters; parsed by hand so bad input renders an error page
#[derive(Debug, Default, Deserialize)]
pub struct WindowParams {
    pub timeout: Option<String>,
    pub limit: Option<String>,
}

impl WindowParams {
    pub fn into_request(self, settings: &PageSettings) -> Result<WindowRequest, AppError> {
        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => i64::try_from(settings.default_limit).unwrap_or(i64::MAX),
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("limit must be an integer, got '{}'", raw)))?,
        };

        let timeout_secs = match self.timeout.as_deref().map(str::trim) {
            None | Some("") => settings.default_timeout.as_secs_f64(),
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                AppError::BadRequest(format!("timeout must be a number of seconds, got '{}'", raw))
            })?,
        };

        Ok(WindowRequest::new(limit, timeout_secs)?.clamp_timeout(settings.max_timeout))
    }
}

/// GET /<name> - Render a window of recent entries
///
/// `timeout=0` renders what reached the page tail since the previous snapshot.
/// A positive timeout subscribes for the request and renders entries
/// published during the window.
///
/// Example: GET /querylogz?timeout=0&limit=10
pub async fn querylogz(
    State(state): State<QueryLogState>,
    Query(params): Query<WindowParams>,
) -> Result<Html<String>, AppError> {
    let request = params.into_request(&state.settings)?;

    let entries = if request.is_snapshot() {
        // Snapshots drain without awaiting, so the lock is never held across a wait
        let mut tail = state.tail.lock().await;
        read_window(&mut *tail, request).await
    } else {
        // A cancelled view only loses entries from its own subscription
        let mut subscription = state.log.subscribe();
        read_window(&mut subscription, request).await
    };

    let stats = state.log.stats();
    let page = render::render_page(&entries, &state.settings.thresholds, Some(&stats));

    if page.errors > 0 {
        metrics::record_render_errors(state.log.name(), page.errors);
        warn!(
            log = %state.log.name(),
            errors = page.errors,
            "Query log page contained entries of an unexpected type"
        );
    }
    debug!(
        log = %state.log.name(),
        rows = page.rows,
        limit = request.limit(),
        timeout_ms = request.timeout().as_millis() as u64,
        "Rendered query log page"
    );

    Ok(Html(page.html))
}

/// GET /<name>/stream - Live tail of the log as plain text
///
/// The response ends when the log is closed; a client disconnect drops the
/// subscription.
pub async fn stream(State(state): State<QueryLogState>) -> Response {
    let subscription = state.log.subscribe();
    debug!(
        log = %state.log.name(),
        subscription = %subscription.id(),
        "Streaming query log"
    );

    let lines = futures::stream::unfold(subscription, |mut subscription| async move {
        let entry = subscription.recv().await?;
        Some((Ok::<_, Infallible>(render::text_line(&entry)), subscription))
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(lines),
    )
        .into_response()
}

/// GET /<name>/stats - Log counters
pub async fn stats(State(state): State<QueryLogState>) -> Json<StreamStats> {
    Json(state.log.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::QueryExecutionRecord;

    fn params(timeout: Option<&str>, limit: Option<&str>) -> WindowParams {
        WindowParams {
            timeout: timeout.map(str::to_string),
            limit: limit.map(str::to_string),
        }
    }

    #[test]
    fn test_missing_params_use_defaults() {
        let settings = PageSettings::default();
        let request = params(None, None).into_request(&settings).unwrap();
        assert_eq!(request.limit(), 300);
        assert_eq!(request.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_params_parse_and_clamp() {
        let settings = PageSettings::default();
        let request = params(Some("0.5"), Some("10")).into_request(&settings).unwrap();
        assert_eq!(request.limit(), 10);
        assert_eq!(request.timeout(), Duration::from_millis(500));

        let request = params(Some("3600"), Some("1")).into_request(&settings).unwrap();
        assert_eq!(request.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_params_are_bad_requests() {
        let settings = PageSettings::default();
        for (timeout, limit) in [
            (Some("soon"), Some("10")),
            (Some("0"), Some("ten")),
            (Some("-1"), Some("10")),
            (Some("0"), Some("-5")),
        ] {
            let result = params(timeout, limit).into_request(&settings);
            assert!(
                matches!(result, Err(AppError::BadRequest(_))),
                "timeout={:?} limit={:?} should be rejected",
                timeout,
                limit
            );
        }
    }

    #[tokio::test]
    async fn test_page_shows_entries_published_after_state_creation() {
        let log = EventLog::new("querylogz", 100).unwrap();
        let state = QueryLogState::new(log.clone(), PageSettings::default());

        let mut record = QueryExecutionRecord::start("Execute");
        record.original_sql = "select 1".to_string();
        log.publish(LogEntry::from(record));

        let Html(page) = querylogz(
            State(state.clone()),
            Query(params(Some("0"), Some("10"))),
        )
        .await
        .unwrap();
        assert!(page.contains("<td>select 1</td>"));

        // Drained by the first view
        let Html(page) = querylogz(State(state), Query(params(Some("0"), Some("10"))))
            .await
            .unwrap();
        assert!(!page.contains("<td>select 1</td>"));
    }

    #[tokio::test]
    async fn test_waiting_view_leaves_page_tail_untouched() {
        let log = EventLog::new("querylogz", 100).unwrap();
        let state = QueryLogState::new(log.clone(), PageSettings::default());

        let view = tokio::spawn(querylogz(
            State(state.clone()),
            Query(params(Some("5"), Some("1"))),
        ));
        while log.subscriber_count() < 2 {
            tokio::task::yield_now().await;
        }
        log.publish(LogEntry::from(QueryExecutionRecord::start("Execute")));

        let Html(page) = view.await.unwrap().unwrap();
        assert!(page.contains("<td>Execute</td>"));
        // The request's subscription is gone; the tail still holds the entry
        assert_eq!(log.subscriber_count(), 1);

        let Html(page) = querylogz(State(state), Query(params(Some("0"), Some("10"))))
            .await
            .unwrap();
        assert!(page.contains("<td>Execute</td>"));
    }

    #[tokio::test]
    async fn test_stats_handler() {
        let log = EventLog::new("querylogz", 100).unwrap();
        let state = QueryLogState::new(log.clone(), PageSettings::default());
        log.publish(LogEntry::from("hello"));

        let Json(snapshot) = stats(State(state)).await;
        assert_eq!(snapshot.name, "querylogz");
        assert_eq!(snapshot.subscribers, 1);
        assert_eq!(snapshot.published, 1);
    }
}
