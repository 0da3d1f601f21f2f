//! Synthetic query traffic
//!
//! Stands in for the request-handling layer when the server runs on its own:
//! every tick it builds one [`QueryExecutionRecord`] with plausible timings
//! and publishes it on the query log.

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::signals::ShutdownSignal;
use crate::stats::{LogEntry, PlanType, QueryExecutionRecord, QuerySources};
use crate::streamlog::EventLog;

const OPERATIONS: [&str; 3] = ["Execute", "StreamExecute", "ExecuteBatch"];

const STATEMENTS: [(PlanType, &str); 5] = [
    (PlanType::PassSelect, "select name from test_table limit 1000"),
    (PlanType::PkEqual, "select * from users where id = :id"),
    (PlanType::DmlPk, "update users set last_seen = now() where id = :id"),
    (PlanType::InsertPk, "insert into events (id, kind) values (:id, :kind)"),
    (PlanType::Ddl, "alter table events add column payload blob"),
];

/// Build one randomized record
pub fn synthetic_record<R: Rng + ?Sized>(rng: &mut R) -> QueryExecutionRecord {
    let operation = OPERATIONS.choose(rng).copied().unwrap_or("Execute");
    let (plan_type, sql) = STATEMENTS.choose(rng).copied().unwrap_or(STATEMENTS[0]);

    let mut record = QueryExecutionRecord::started_at(operation, Utc::now());
    record.plan_type = plan_type;
    record.original_sql = sql.to_string();
    record.connection_wait = Duration::from_micros(rng.gen_range(0..500));

    // Mostly fast, sometimes medium, occasionally slow
    let total_ms = match rng.gen_range(0..100) {
        0..=69 => rng.gen_range(1..10),
        70..=94 => rng.gen_range(10..100),
        _ => rng.gen_range(100..1_000),
    };
    let queries = rng.gen_range(1..=3u64);
    for _ in 0..queries {
        record.record_query(Duration::from_millis(total_ms / queries));
    }

    if rng.gen_bool(0.2) {
        record.query_sources |= QuerySources::ROWCACHE;
        record.cache_hits = rng.gen_range(0..20);
        record.cache_misses = rng.gen_range(0..5);
        record.cache_absent = rng.gen_range(0..5);
        record.cache_invalidations = rng.gen_range(0..3);
    }
    if rng.gen_bool(0.1) {
        record.query_sources |= QuerySources::CONSOLIDATOR;
    }
    if rng.gen_bool(0.3) {
        record.transaction_id = rng.gen_range(1..10_000);
    }
    if rng.gen_bool(0.05) {
        record.record_error("deadline exceeded");
    } else {
        record.rows_affected = rng.gen_range(0..2_000);
    }

    record.end_time = record.start_time
        + chrono::Duration::milliseconds(i64::try_from(total_ms).unwrap_or(i64::MAX));
    record
}

/// Publish synthetic records every `interval` until shutdown
pub fn spawn_demo_producer(
    log: EventLog<LogEntry>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(log = %log.name(), interval_ms = interval.as_millis() as u64, "Demo producer started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut published = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let record = synthetic_record(&mut rand::thread_rng());
                    log.publish(LogEntry::from(record));
                    published += 1;
                    if published % 100 == 0 {
                        debug!(log = %log.name(), published, "Demo producer progress");
                    }
                }
                _ = shutdown.recv() => break,
            }
        }

        info!(log = %log.name(), published, "Demo producer stopped");
    })
}
