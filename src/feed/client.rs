//! Persistent connection to the live timing hub.
//!
//! The client owns a background task that negotiates, upgrades to a
//! websocket, subscribes to the full topic set, and pumps `(topic,
//! payload)` events into a channel. The subscribe reply is the initial full
//! snapshot and is fanned out through the same channel as incremental
//! updates, one event per topic key.
//!
//! On disconnect or error the task reconnects after a constant 5 s delay,
//! indefinitely. The delay is deliberately flat: the feed endpoint is only
//! expected to be unreachable during brief network blips. An explicit
//! [`FeedClient::disconnect`] cancels the task first, so a late disconnect
//! event cannot trigger a reconnect.

use crate::error::{Result, WorkerError};
use crate::feed::protocol::{self, Envelope, HubCall, NegotiateResponse};
use crate::feed::topic::Topic;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Default hub endpoint.
pub const DEFAULT_HUB_URL: &str = "https://livetiming.formula1.com/signalr";

/// Fixed delay between reconnect attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

const USER_AGENT: &str = "BestHTTP";
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// An event emitted by the feed connection task.
#[derive(Debug)]
pub enum FeedEvent {
    /// A topic update, either from the initial snapshot or a delta.
    Message { topic: Topic, payload: Value },
    /// The websocket is up and subscribed.
    Connected,
    /// The connection dropped; a reconnect is scheduled unless the client
    /// was stopped.
    Disconnected { reason: String },
}

/// Handle to the background feed connection task.
pub struct FeedClient {
    cancel: CancellationToken,
}

impl FeedClient {
    /// Start the connection task against `hub_url` and return the event
    /// receiver.
    pub fn start(hub_url: &str) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let url = hub_url.to_string();
        tokio::spawn(async move {
            connection_task(url, tx, task_cancel).await;
        });

        (FeedClient { cancel }, rx)
    }

    /// Stop the connection task. Sets the no-reconnect flag before the
    /// socket drops, so the resulting disconnect does not schedule a
    /// reconnect.
    pub fn disconnect(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Outer task: connect, stream until failure, then reconnect on a fixed
/// cadence until cancelled.
async fn connection_task(
    hub_url: String,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        match run_connection(&hub_url, &events, &cancel).await {
            Ok(()) => {
                // Clean close from our side; nothing to report.
                debug!("feed connection closed");
            }
            Err(e) => {
                warn!("feed connection lost: {e}");
                let _ = events
                    .send(FeedEvent::Disconnected { reason: e.to_string() })
                    .await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        info!("reconnecting to feed in {}s", RECONNECT_DELAY.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    info!("feed connection task ended");
}

/// One full connection lifecycle: negotiate, upgrade, subscribe, stream.
async fn run_connection(
    hub_url: &str,
    events: &mpsc::Sender<FeedEvent>,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("connecting to timing hub");

    let connection_data =
        serde_json::to_string(&serde_json::json!([{ "name": protocol::HUB_NAME }]))?;

    // Negotiate over HTTPS first; the hub hands out a connection token and
    // session cookies the websocket upgrade must carry.
    let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;

    let mut negotiate_url = Url::parse(hub_url)
        .map_err(|e| WorkerError::feed(format!("bad hub url: {e}")))?;
    negotiate_url
        .path_segments_mut()
        .map_err(|_| WorkerError::feed("hub url cannot be a base"))?
        .push("negotiate");
    negotiate_url
        .query_pairs_mut()
        .append_pair("connectionData", &connection_data)
        .append_pair("clientProtocol", protocol::CLIENT_PROTOCOL);

    let response = http.get(negotiate_url).send().await?;
    if !response.status().is_success() {
        return Err(WorkerError::feed(format!(
            "negotiate returned {}",
            response.status()
        )));
    }

    let cookies: Vec<String> = response
        .headers()
        .get_all(reqwest::header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::to_string)
        .collect();

    let negotiate: NegotiateResponse = response.json().await?;
    debug!("negotiated connection {:?}", negotiate.connection_id);

    // Websocket upgrade with the negotiated token.
    let mut connect_url = Url::parse(hub_url)
        .map_err(|e| WorkerError::feed(format!("bad hub url: {e}")))?;
    let ws_scheme = if connect_url.scheme() == "http" { "ws" } else { "wss" };
    connect_url
        .set_scheme(ws_scheme)
        .map_err(|_| WorkerError::feed("hub url scheme not switchable to websocket"))?;
    connect_url
        .path_segments_mut()
        .map_err(|_| WorkerError::feed("hub url cannot be a base"))?
        .push("connect");
    connect_url
        .query_pairs_mut()
        .append_pair("transport", "webSockets")
        .append_pair("clientProtocol", protocol::CLIENT_PROTOCOL)
        .append_pair("connectionToken", &negotiate.connection_token)
        .append_pair("connectionData", &connection_data);

    let mut request = connect_url
        .as_str()
        .into_client_request()
        .map_err(|e| WorkerError::feed_with_source("websocket request", Box::new(e)))?;
    request
        .headers_mut()
        .insert("User-Agent", USER_AGENT.parse().expect("static header value"));
    if !cookies.is_empty() {
        if let Ok(value) = cookies.join("; ").parse() {
            request.headers_mut().insert("Cookie", value);
        }
    }

    let (ws, _) = connect_async(request).await?;
    let (mut sink, mut stream) = ws.split();

    // Subscribe to the full topic list; the reply is the initial snapshot.
    let subscribe = serde_json::to_string(&HubCall::subscribe(1))?;
    sink.send(Message::Text(subscribe.into())).await?;

    info!("feed connected, subscribed to {} topics", Topic::subscription_list().len());
    let _ = events.send(FeedEvent::Connected).await;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(());
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => {
                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        // Partial input is expected from this feed; an
                        // unreadable frame is dropped, not fatal.
                        debug!("undecodable feed frame: {e}");
                        continue;
                    }
                };

                if let Some(error) = envelope.error {
                    warn!("hub reported error: {error}");
                    continue;
                }

                if let Some(result) = &envelope.result {
                    let topics = protocol::snapshot_topics(result);
                    info!("received initial snapshot ({} topics)", topics.len());
                    for (topic, payload) in topics {
                        if events.send(FeedEvent::Message { topic, payload }).await.is_err() {
                            return Ok(());
                        }
                    }
                }

                for hub_message in &envelope.messages {
                    if let Some((topic, payload)) = hub_message.feed_update() {
                        if events.send(FeedEvent::Message { topic, payload }).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Some(Ok(Message::Ping(data))) => {
                sink.send(Message::Pong(data)).await?;
            }
            Some(Ok(Message::Close(frame))) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .unwrap_or_else(|| "closed by server".to_string());
                return Err(WorkerError::feed(reason));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err(WorkerError::feed("stream ended")),
        }
    }
}
