//! Structured execution-trace records published on the query log

pub mod record;

pub use record::{LogEntry, PlanType, QueryExecutionRecord, QuerySources};
