//! Real-time feed client: hub protocol, typed payloads, connection task.

pub mod client;
pub mod messages;
pub mod protocol;
pub mod topic;

pub use client::{FeedClient, FeedEvent, DEFAULT_HUB_URL, RECONNECT_DELAY};
pub use topic::{Topic, ALL_TOPICS};
