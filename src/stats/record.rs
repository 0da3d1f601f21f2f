use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use std::time::Duration;

use crate::streamlog::EventLog;

/// Category of the plan chosen for a statement
///
/// Opaque to the log; carried only so the debug page can display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    PassSelect,
    PassDml,
    PkEqual,
    PkIn,
    SelectSubquery,
    DmlPk,
    DmlSubquery,
    InsertPk,
    InsertSubquery,
    Set,
    Ddl,
    SelectStream,
    #[default]
    Other,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassSelect => "PASS_SELECT",
            Self::PassDml => "PASS_DML",
            Self::PkEqual => "PK_EQUAL",
            Self::PkIn => "PK_IN",
            Self::SelectSubquery => "SELECT_SUBQUERY",
            Self::DmlPk => "DML_PK",
            Self::DmlSubquery => "DML_SUBQUERY",
            Self::InsertPk => "INSERT_PK",
            Self::InsertSubquery => "INSERT_SUBQUERY",
            Self::Set => "SET",
            Self::Ddl => "DDL",
            Self::SelectStream => "SELECT_STREAM",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the rows of a query came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QuerySources(u8);

impl QuerySources {
    pub const NONE: Self = Self(0);
    pub const MYSQL: Self = Self(1);
    pub const ROWCACHE: Self = Self(1 << 1);
    pub const CONSOLIDATOR: Self = Self(1 << 2);

    const NAMED: [(Self, &'static str); 3] = [
        (Self::MYSQL, "mysql"),
        (Self::ROWCACHE, "rowcache"),
        (Self::CONSOLIDATOR, "consolidator"),
    ];

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for QuerySources {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for QuerySources {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for QuerySources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (source, name) in Self::NAMED {
            if self.contains(source) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Execution trace of one unit of query work
///
/// Producers create one with [`QueryExecutionRecord::start`], fill in the
/// counters while the work runs, and hand it to the log with
/// [`QueryExecutionRecord::send`] when it completes.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecutionRecord {
    pub operation: String,
    /// Caller identity, if the request carried one
    pub caller: Option<String>,
    pub plan_type: PlanType,
    pub original_sql: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Time spent waiting on the execution engine
    pub engine_response_time: Duration,
    pub connection_wait: Duration,
    pub query_count: u64,
    pub query_sources: QuerySources,
    pub rows_affected: u64,
    pub error_count: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_absent: u64,
    pub cache_invalidations: u64,
    /// 0 when the work ran outside a transaction
    pub transaction_id: i64,
    pub error: Option<String>,
}

impl QueryExecutionRecord {
    /// Begin a record for `operation`, stamped with the current time
    pub fn start(operation: impl Into<String>) -> Self {
        Self::started_at(operation, Utc::now())
    }

    pub fn started_at(operation: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            operation: operation.into(),
            caller: None,
            plan_type: PlanType::default(),
            original_sql: String::new(),
            start_time,
            end_time: start_time,
            engine_response_time: Duration::ZERO,
            connection_wait: Duration::ZERO,
            query_count: 0,
            query_sources: QuerySources::NONE,
            rows_affected: 0,
            error_count: 0,
            cache_hits: 0,
            cache_misses: 0,
            cache_absent: 0,
            cache_invalidations: 0,
            transaction_id: 0,
            error: None,
        }
    }

    /// Account for one statement sent to the execution engine
    pub fn record_query(&mut self, response_time: Duration) {
        self.query_count += 1;
        self.engine_response_time += response_time;
        self.query_sources |= QuerySources::MYSQL;
    }

    pub fn record_error(&mut self, error: impl fmt::Display) {
        self.error_count += 1;
        self.error = Some(error.to_string());
    }

    /// Stamp the end time; never earlier than the start time
    pub fn finish(&mut self) {
        self.end_time = Utc::now().max(self.start_time);
    }

    /// Wall-clock time from start to end
    pub fn total_duration(&self) -> Duration {
        (self.end_time - self.start_time).to_std().unwrap_or_default()
    }

    /// Finish the record and publish it
    pub fn send(mut self, log: &EventLog<LogEntry>) {
        self.finish();
        log.publish(LogEntry::from(self));
    }
}

/// One entry on the query log
///
/// The log itself never looks inside entries; consumers match on the variant
/// to find out whether they received a query record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Query(Arc<QueryExecutionRecord>),
    Message(String),
}

impl LogEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Query(_) => "query",
            Self::Message(_) => "message",
        }
    }
}

impl From<QueryExecutionRecord> for LogEntry {
    fn from(record: QueryExecutionRecord) -> Self {
        Self::Query(Arc::new(record))
    }
}

impl From<String> for LogEntry {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for LogEntry {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}
