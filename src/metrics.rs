use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Once;

static DESCRIBE: Once = Once::new();

/// Install the Prometheus recorder and return a handle for the scrape endpoint
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    // Descriptions registered before the recorder existed were discarded
    init_metric_descriptions();
    gauge!("querylogz_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);

    Ok(handle)
}

fn init_metric_descriptions() {
    describe_counter!(
        "streamlog_published_total",
        "Total number of entries published to a stream log"
    );
    describe_counter!(
        "streamlog_delivered_total",
        "Total number of entries enqueued on subscriber queues"
    );
    describe_counter!(
        "streamlog_dropped_total",
        "Total number of queued entries evicted because a subscriber fell behind"
    );
    describe_gauge!(
        "streamlog_subscribers",
        "Number of active subscriptions on a stream log"
    );
    describe_counter!(
        "querylogz_render_errors_total",
        "Total number of log entries the debug page could not render"
    );
    describe_gauge!("querylogz_info", "Version information");
}

/// Describe the stream log metrics once per process
pub fn describe_stream_metrics() {
    DESCRIBE.call_once(init_metric_descriptions);
}

/// Record one publish and its fan-out outcome
pub fn record_publish(log: &str, delivered: u64, dropped: u64) {
    counter!("streamlog_published_total", "log" => log.to_string()).increment(1);
    if delivered > 0 {
        counter!("streamlog_delivered_total", "log" => log.to_string()).increment(delivered);
    }
    if dropped > 0 {
        counter!("streamlog_dropped_total", "log" => log.to_string()).increment(dropped);
    }
}

pub fn record_subscribers(log: &str, count: usize) {
    gauge!("streamlog_subscribers", "log" => log.to_string()).set(count as f64);
}

pub fn record_render_errors(log: &str, count: usize) {
    counter!("querylogz_render_errors_total", "log" => log.to_string()).increment(count as u64);
}
