//! Error types for the ingestion worker.
//!
//! Every fallible component returns [`WorkerError`]. Callers decide what to
//! do with a failure based on its [`ErrorTier`]:
//!
//! - **Fatal**: missing required configuration. Abort at startup.
//! - **Retryable**: calendar fetch, feed transport, flush batches, push
//!   delivery. Logged and retried on a fixed schedule, never crash the
//!   process.
//! - **BestEffort**: post-session normalization and notification
//!   computation. Caught at the call site and swallowed - raw per-topic
//!   blobs remain the source of truth.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for worker operations.
pub type Result<T, E = WorkerError> = std::result::Result<T, E>;

/// Retry tier for a failure, per the worker's error-handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTier {
    /// Abort immediately (startup configuration).
    Fatal,
    /// Log and retry on a fixed schedule.
    Retryable,
    /// Log and continue; losing this work is acceptable.
    BestEffort,
}

/// Main error type for worker operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkerError {
    #[error("missing required configuration: {name}")]
    MissingConfig { name: &'static str },

    #[error("schedule fetch failed: {reason}")]
    ScheduleFetch {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("feed connection failed: {reason}")]
    Feed {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("storage operation failed: {operation}")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("push delivery failed: {reason}")]
    Push {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl WorkerError {
    /// Classify this error into the worker's retry policy.
    pub fn tier(&self) -> ErrorTier {
        match self {
            WorkerError::MissingConfig { .. } => ErrorTier::Fatal,
            WorkerError::ScheduleFetch { .. } => ErrorTier::Retryable,
            WorkerError::Feed { .. } => ErrorTier::Retryable,
            WorkerError::Storage { .. } => ErrorTier::Retryable,
            WorkerError::Push { .. } => ErrorTier::Retryable,
            WorkerError::Timeout { .. } => ErrorTier::Retryable,
            WorkerError::Parse { .. } => ErrorTier::BestEffort,
        }
    }

    /// Whether this error is worth retrying at all.
    pub fn is_retryable(&self) -> bool {
        self.tier() == ErrorTier::Retryable
    }

    /// Helper constructor for configuration errors.
    pub fn missing_config(name: &'static str) -> Self {
        WorkerError::MissingConfig { name }
    }

    /// Helper constructor for schedule fetch failures.
    pub fn schedule_fetch(reason: impl Into<String>) -> Self {
        WorkerError::ScheduleFetch { reason: reason.into(), source: None }
    }

    /// Helper constructor for feed failures without a source.
    pub fn feed(reason: impl Into<String>) -> Self {
        WorkerError::Feed { reason: reason.into(), source: None }
    }

    /// Helper constructor for feed failures with a source.
    pub fn feed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        WorkerError::Feed { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for storage failures.
    pub fn storage(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        WorkerError::Storage { operation: operation.into(), source: Box::new(source) }
    }

    /// Helper constructor for push delivery failures.
    pub fn push(reason: impl Into<String>) -> Self {
        WorkerError::Push { reason: reason.into(), source: None }
    }

    /// Helper constructor for parse failures.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        WorkerError::Parse { context: context.into(), details: details.into() }
    }
}

impl From<reqwest::Error> for WorkerError {
    fn from(err: reqwest::Error) -> Self {
        WorkerError::ScheduleFetch { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<libsql::Error> for WorkerError {
    fn from(err: libsql::Error) -> Self {
        WorkerError::Storage { operation: "libsql".to_string(), source: Box::new(err) }
    }
}

impl From<serde_json::Error> for WorkerError {
    fn from(err: serde_json::Error) -> Self {
        WorkerError::Parse { context: "json".to_string(), details: err.to_string() }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WorkerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        WorkerError::Feed { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_classification_matches_policy() {
        assert_eq!(WorkerError::missing_config("DATABASE_URL").tier(), ErrorTier::Fatal);
        assert_eq!(WorkerError::schedule_fetch("HTTP 503").tier(), ErrorTier::Retryable);
        assert_eq!(WorkerError::feed("socket closed").tier(), ErrorTier::Retryable);
        assert_eq!(WorkerError::parse("gap", "not a number").tier(), ErrorTier::BestEffort);
    }

    #[test]
    fn retryable_excludes_fatal_and_best_effort() {
        assert!(!WorkerError::missing_config("DATABASE_URL").is_retryable());
        assert!(WorkerError::feed("blip").is_retryable());
        assert!(!WorkerError::parse("lap", "bad").is_retryable());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<WorkerError>();

        let error = WorkerError::feed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn messages_carry_context() {
        let err = WorkerError::schedule_fetch("calendar API returned 404");
        assert!(err.to_string().contains("404"));

        let err = WorkerError::missing_config("DATABASE_AUTH_TOKEN");
        assert!(err.to_string().contains("DATABASE_AUTH_TOKEN"));
    }
}
