//! Push notification triggers and delivery.

pub mod sender;
pub mod triggers;

pub use sender::{DeliveryOutcome, NotificationPayload, PushDelivery, PushSender};
pub use triggers::{check_race_control, post_race_notification, NotificationTriggers};
