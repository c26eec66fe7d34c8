//! Web-push delivery to stored subscribers.

use crate::config::VapidConfig;
use crate::error::Result;
use crate::storage::{LiveStore, PushSubscription, SubscriptionFilter};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushError,
    WebPushMessageBuilder,
};

const MIN_TAG_GAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The push service reported the subscription gone (410/404); the
    /// subscriber must be deleted.
    Gone,
    Failed(String),
}

/// Seam between the sender's fan-out logic and the actual push provider.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(&self, subscription: &PushSubscription, payload: &str) -> DeliveryOutcome;
}

pub struct WebPushDelivery {
    vapid: VapidConfig,
}

impl WebPushDelivery {
    pub fn new(vapid: VapidConfig) -> Self {
        Self { vapid }
    }

    fn build_message(
        &self,
        subscription: &PushSubscription,
        payload: &str,
    ) -> Result<web_push::WebPushMessage, WebPushError> {
        let info = SubscriptionInfo::new(
            subscription.endpoint.clone(),
            subscription.p256dh.clone(),
            subscription.auth.clone(),
        );

        let mut signature = VapidSignatureBuilder::from_base64(
            &self.vapid.private_key,
            web_push::URL_SAFE_NO_PAD,
            &info,
        )?;
        signature.add_claim("sub", self.vapid.subject.as_str());

        let mut builder = WebPushMessageBuilder::new(&info)?;
        builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());
        builder.set_vapid_signature(signature.build()?);
        builder.build()
    }
}

#[async_trait]
impl PushDelivery for WebPushDelivery {
    async fn deliver(&self, subscription: &PushSubscription, payload: &str) -> DeliveryOutcome {
        let message = match self.build_message(subscription, payload) {
            Ok(message) => message,
            Err(err) => return DeliveryOutcome::Failed(err.to_string()),
        };

        let client = match WebPushClient::new() {
            Ok(client) => client,
            Err(err) => return DeliveryOutcome::Failed(err.to_string()),
        };

        match client.send(message).await {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(WebPushError::EndpointNotValid | WebPushError::EndpointNotFound) => {
                DeliveryOutcome::Gone
            }
            Err(err) => DeliveryOutcome::Failed(err.to_string()),
        }
    }
}

/// Strip a trailing `-<digits>` suffix so per-event tags share one
/// rate-limit bucket.
fn tag_prefix(tag: &str) -> &str {
    match tag.rsplit_once('-') {
        Some((head, tail))
            if !head.is_empty() && !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) =>
        {
            head
        }
        _ => tag,
    }
}

/// Fans a payload out to every matching subscriber, rate-limited by tag
/// prefix and pruning subscriptions the push service reports gone.
pub struct PushSender {
    delivery: Option<Box<dyn PushDelivery>>,
    last_sent_by_prefix: HashMap<String, Instant>,
}

impl PushSender {
    /// Without VAPID configuration the sender is a silent no-op rather
    /// than a startup failure.
    pub fn new(vapid: Option<VapidConfig>) -> Self {
        let delivery: Option<Box<dyn PushDelivery>> = match vapid {
            Some(vapid) => {
                info!("push notifications configured");
                Some(Box::new(WebPushDelivery::new(vapid)))
            }
            None => {
                info!("VAPID keys not set, push notifications disabled");
                None
            }
        };
        Self { delivery, last_sent_by_prefix: HashMap::new() }
    }

    pub fn is_configured(&self) -> bool {
        self.delivery.is_some()
    }

    /// True if a payload with this tag may be sent now, recording the send
    /// time when it may. Untagged payloads always pass.
    fn pass_rate_limit(&mut self, tag: Option<&str>) -> bool {
        let Some(tag) = tag else { return true };
        let prefix = tag_prefix(tag);
        let now = Instant::now();
        if let Some(last) = self.last_sent_by_prefix.get(prefix) {
            if now.duration_since(*last) < MIN_TAG_GAP {
                return false;
            }
        }
        self.last_sent_by_prefix.insert(prefix.to_string(), now);
        true
    }

    pub async fn send_to_all(
        &mut self,
        store: &LiveStore,
        payload: &NotificationPayload,
        filter: SubscriptionFilter,
    ) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }

        if !self.pass_rate_limit(payload.tag.as_deref()) {
            return Ok(());
        }

        let subscribers = store.subscriptions(filter).await?;
        if subscribers.is_empty() {
            return Ok(());
        }

        info!(title = %payload.title, count = subscribers.len(), "sending push notification");
        let json = serde_json::to_string(payload)?;

        let Some(delivery) = self.delivery.as_deref() else {
            return Ok(());
        };
        let (stale_ids, failed) = deliver_batch(delivery, &subscribers, &json).await;

        store.delete_subscriptions(&stale_ids).await?;
        if failed > 0 {
            warn!(failed, "some push notifications failed to send");
        }
        Ok(())
    }
}

/// Concurrent fan-out to every subscriber. A single failure never stops the
/// rest of the batch. Returns the ids the push service reported gone and the
/// count of transient failures.
async fn deliver_batch(
    delivery: &dyn PushDelivery,
    subscribers: &[PushSubscription],
    json: &str,
) -> (Vec<i64>, usize) {
    let outcomes =
        futures::future::join_all(subscribers.iter().map(|sub| delivery.deliver(sub, json))).await;

    let mut stale_ids = Vec::new();
    let mut failed = 0usize;
    for (sub, outcome) in subscribers.iter().zip(outcomes) {
        match outcome {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::Gone => stale_ids.push(sub.id),
            DeliveryOutcome::Failed(reason) => {
                failed += 1;
                warn!(endpoint = %sub.endpoint, %reason, "push delivery failed");
            }
        }
    }
    (stale_ids, failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedDelivery {
        outcomes: HashMap<String, DeliveryOutcome>,
        attempted: Mutex<Vec<String>>,
    }

    impl ScriptedDelivery {
        fn new(outcomes: &[(&str, DeliveryOutcome)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(endpoint, outcome)| (endpoint.to_string(), outcome.clone()))
                    .collect(),
                attempted: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PushDelivery for ScriptedDelivery {
        async fn deliver(&self, subscription: &PushSubscription, _payload: &str) -> DeliveryOutcome {
            self.attempted.lock().unwrap().push(subscription.endpoint.clone());
            self.outcomes
                .get(&subscription.endpoint)
                .cloned()
                .unwrap_or(DeliveryOutcome::Delivered)
        }
    }

    fn subscriber(id: i64, endpoint: &str) -> PushSubscription {
        PushSubscription {
            id,
            endpoint: endpoint.to_string(),
            p256dh: "p256dh".to_string(),
            auth: "auth".to_string(),
        }
    }

    #[tokio::test]
    async fn gone_subscribers_flagged_without_aborting_batch() {
        let delivery = ScriptedDelivery::new(&[
            ("https://push.example/a", DeliveryOutcome::Gone),
            ("https://push.example/b", DeliveryOutcome::Failed("503".to_string())),
            ("https://push.example/c", DeliveryOutcome::Delivered),
        ]);
        let subscribers = vec![
            subscriber(1, "https://push.example/a"),
            subscriber(2, "https://push.example/b"),
            subscriber(3, "https://push.example/c"),
        ];

        let (stale_ids, failed) = deliver_batch(&delivery, &subscribers, "{}").await;

        assert_eq!(stale_ids, vec![1]);
        assert_eq!(failed, 1);
        // Every subscriber was attempted despite the earlier failures.
        assert_eq!(delivery.attempted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn clean_batch_flags_nothing() {
        let delivery = ScriptedDelivery::new(&[]);
        let subscribers =
            vec![subscriber(7, "https://push.example/x"), subscriber(8, "https://push.example/y")];

        let (stale_ids, failed) = deliver_batch(&delivery, &subscribers, "{}").await;

        assert!(stale_ids.is_empty());
        assert_eq!(failed, 0);
    }

    #[test]
    fn tag_prefix_strips_trailing_digits() {
        assert_eq!(tag_prefix("preview-3"), "preview");
        assert_eq!(tag_prefix("reminder-5-race-12"), "reminder-5-race");
    }

    #[test]
    fn tag_prefix_keeps_non_numeric_suffixes() {
        assert_eq!(tag_prefix("rc-redflag-2026-03-08T14:03:11"), "rc-redflag-2026-03-08T14:03:11");
        assert_eq!(tag_prefix("results"), "results");
        assert_eq!(tag_prefix("-12"), "-12");
    }

    #[test]
    fn rate_limit_suppresses_same_prefix_within_window() {
        let mut sender = PushSender::new(None);
        assert!(sender.pass_rate_limit(Some("rc-sc-100")));
        assert!(!sender.pass_rate_limit(Some("rc-sc-200")));
        // Different prefixes get their own bucket.
        assert!(sender.pass_rate_limit(Some("rc-vsc-200")));
    }

    #[test]
    fn untagged_payloads_always_pass() {
        let mut sender = PushSender::new(None);
        assert!(sender.pass_rate_limit(None));
        assert!(sender.pass_rate_limit(None));
    }
}
