//! Live motorsport timing ingestion worker.
//!
//! Apexfeed connects to the official live timing hub during race weekends,
//! accumulates the delta stream into a coherent per-session snapshot,
//! translates it into normalized records, and flushes those to a remote
//! relational store on a fixed cadence. After a session ends the final
//! snapshot is flattened into query-optimized archive tables. Between
//! weekends the worker sleeps against the season calendar, and throughout
//! it pushes web notifications for session reminders and on-track events.
//!
//! # Architecture
//!
//! - [`feed`] - hub protocol client: negotiate, subscribe, delta stream
//! - [`state`] - per-session accumulator merging deltas into a snapshot
//! - [`translate`] - pure snapshot-to-record translators
//! - [`storage`] - live blob flushes and post-session archive persistence
//! - [`schedule`] - season calendar, wake windows, live session discovery
//! - [`notify`] - notification triggers and web-push delivery
//! - [`worker`] - the duty cycle tying the above together

pub mod config;
pub mod error;
pub mod feed;
pub mod notify;
pub mod parse;
pub mod schedule;
pub mod state;
pub mod storage;
pub mod translate;
pub mod worker;

pub use config::Config;
pub use error::{ErrorTier, Result, WorkerError};
pub use state::AccumulatedState;
pub use worker::Worker;
