//! Windowed reads: drain a subscription under a count and a time bound

use std::time::Duration;
use tokio::time::Instant;

use super::log::Subscription;
use crate::error::StreamLogError;

/// Validated bounds for a windowed read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    limit: usize,
    timeout: Duration,
}

impl WindowRequest {
    /// Build a request from raw, possibly negative, caller input
    ///
    /// `timeout_secs` may be fractional. A negative limit or a negative or
    /// non-finite timeout fails with [`StreamLogError::InvalidArgument`].
    pub fn new(limit: i64, timeout_secs: f64) -> Result<Self, StreamLogError> {
        let limit = usize::try_from(limit).map_err(|_| {
            StreamLogError::InvalidArgument(format!("limit must be >= 0, got {}", limit))
        })?;

        if !timeout_secs.is_finite() || timeout_secs < 0.0 {
            return Err(StreamLogError::InvalidArgument(format!(
                "timeout must be a non-negative number of seconds, got {}",
                timeout_secs
            )));
        }
        let timeout = Duration::try_from_secs_f64(timeout_secs).map_err(|e| {
            StreamLogError::InvalidArgument(format!("timeout {} is out of range: {}", timeout_secs, e))
        })?;

        Ok(Self { limit, timeout })
    }

    pub fn from_parts(limit: usize, timeout: Duration) -> Self {
        Self { limit, timeout }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cap the wait at `max`
    pub fn clamp_timeout(self, max: Duration) -> Self {
        Self {
            timeout: self.timeout.min(max),
            ..self
        }
    }

    /// A zero timeout asks for whatever is already queued
    pub fn is_snapshot(&self) -> bool {
        self.timeout.is_zero()
    }
}

/// Collect entries from `subscription` in arrival order
///
/// Returns when `limit` entries have arrived, when `timeout` has elapsed
/// since the call began, or when the subscription is closed, whichever comes
/// first. Fewer than `limit` entries is a normal result.
pub async fn read_window<T: Clone + Send + 'static>(
    subscription: &mut Subscription<T>,
    request: WindowRequest,
) -> Vec<T> {
    let mut entries = Vec::with_capacity(request.limit.min(subscription.len().max(16)));

    if request.limit == 0 {
        return entries;
    }

    if request.is_snapshot() {
        while entries.len() < request.limit {
            match subscription.try_recv() {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
        return entries;
    }

    // A timeout too large to represent as an instant waits without a deadline
    let deadline = Instant::now().checked_add(request.timeout);
    while entries.len() < request.limit {
        let next = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, subscription.recv())
                .await
                .unwrap_or(None),
            None => subscription.recv().await,
        };
        match next {
            Some(entry) => entries.push(entry),
            // Closed or deadline reached
            None => break,
        }
    }

    entries
}
