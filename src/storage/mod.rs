//! Durable store: per-topic live blobs, normalized archive tables, and
//! push subscription queries.

pub mod archive;
pub mod store;
pub mod writer;

pub use archive::persist_final_snapshot;
pub use store::{LiveStore, PushSubscription, SessionMarkers, SubscriptionFilter};
pub use writer::LiveWriter;
