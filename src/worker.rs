//! The worker duty cycle: sleep until a race weekend, find the live
//! session, stream it into the store, finalize it, repeat.

use crate::config::Config;
use crate::error::Result;
use crate::feed::{FeedClient, FeedEvent, DEFAULT_HUB_URL};
use crate::notify::{
    check_race_control, post_race_notification, NotificationTriggers, PushSender,
};
use crate::schedule::{
    self, discover_live_session, find_next_wakeup, log_upcoming, weekend_end, LiveSessionHandle,
    ScheduledSession,
};
use crate::state::AccumulatedState;
use crate::storage::{persist_final_snapshot, LiveStore, LiveWriter, SubscriptionFilter};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DISCOVERY_POLL: Duration = Duration::from_secs(60);
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_END_GRACE: Duration = Duration::from_secs(30);
const SCHEDULE_RETRY: Duration = Duration::from_secs(600);

pub struct Worker {
    http: reqwest::Client,
    store: LiveStore,
    state: AccumulatedState,
    writer: LiveWriter,
    sender: PushSender,
    triggers: NotificationTriggers,
    season: i32,
    shutdown: CancellationToken,
}

impl Worker {
    pub async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let store = LiveStore::connect(&config.storage).await?;
        let sender = PushSender::new(config.vapid.clone());
        Ok(Self {
            http: reqwest::Client::new(),
            store,
            state: AccumulatedState::new(),
            writer: LiveWriter::new(),
            sender,
            triggers: NotificationTriggers::new(),
            season: config.season,
            shutdown,
        })
    }

    /// Runs until the season calendar is exhausted or shutdown is
    /// requested. Either way is a clean exit.
    pub async fn run(&mut self) -> Result<()> {
        info!(season = self.season, "live timing worker starting");

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            // The calendar is a hard prerequisite; retry on a fixed delay.
            let schedule = loop {
                match schedule::fetch_schedule(&self.http, self.season).await {
                    Ok(schedule) => break schedule,
                    Err(err) => {
                        warn!(error = %err, "schedule fetch failed, retrying");
                        if self.pause(SCHEDULE_RETRY).await {
                            return Ok(());
                        }
                    }
                }
            };
            info!(sessions = schedule.len(), "season calendar loaded");
            log_upcoming(&schedule, Utc::now(), 5);

            self.check_schedule_notifications(&schedule).await;

            let Some(wakeup) = find_next_wakeup(&schedule, Utc::now()) else {
                info!("season calendar exhausted, exiting cleanly");
                return Ok(());
            };

            if wakeup.sleep > Duration::ZERO {
                info!(
                    event = %wakeup.session.event_name,
                    session = %wakeup.session.session_label,
                    start = %wakeup.session.start_time,
                    sleep_secs = wakeup.sleep.as_secs(),
                    "sleeping until next session window"
                );
                if self.pause(wakeup.sleep).await {
                    return Ok(());
                }
            } else {
                info!(
                    event = %wakeup.session.event_name,
                    session = %wakeup.session.session_label,
                    "session window already active"
                );
            }

            let window_end = weekend_end(&schedule, wakeup.session.round)
                .unwrap_or_else(|| wakeup.session.estimated_end());

            if let Some(handle) = self.await_live_session(&schedule, window_end).await {
                self.stream_session(&schedule, handle, window_end).await;
            } else {
                info!("session window passed without a live session");
            }
            // Back to the top: refetch the calendar for the next round.
        }
    }

    /// Sleep that wakes early on shutdown. Returns true if shutdown fired.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(duration) => false,
        }
    }

    /// Poll discovery until a live session appears or the weekend window
    /// closes.
    async fn await_live_session(
        &mut self,
        schedule: &[ScheduledSession],
        window_end: DateTime<Utc>,
    ) -> Option<LiveSessionHandle> {
        while !self.shutdown.is_cancelled() && Utc::now() < window_end {
            match discover_live_session(&self.http).await {
                Some(handle) if !handle.is_complete => {
                    return Some(handle);
                }
                Some(handle) => {
                    info!(
                        session_key = handle.session_key,
                        name = %handle.name,
                        "discovered session is already complete"
                    );
                }
                None => {
                    info!("no live session yet");
                }
            }

            self.check_schedule_notifications(schedule).await;

            if self.pause(DISCOVERY_POLL).await {
                return None;
            }
        }
        None
    }

    /// Stream one live session: feed events into the accumulator, flush on
    /// a fixed tick, watch discovery for the end, then finalize.
    async fn stream_session(
        &mut self,
        schedule: &[ScheduledSession],
        handle: LiveSessionHandle,
        window_end: DateTime<Utc>,
    ) {
        let session_key = handle.session_key;
        info!(
            session_key,
            name = %handle.name,
            session_type = %handle.session_type,
            "live session found, streaming"
        );

        self.state.reset();
        self.writer.reset_for_new_session();
        let mut race_control_seen = 0usize;

        let (client, mut events) = FeedClient::start(DEFAULT_HUB_URL);
        let shutdown = self.shutdown.clone();

        let mut flush_tick = tokio::time::interval(FLUSH_INTERVAL);
        flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut poll_tick = tokio::time::interval(DISCOVERY_POLL);
        poll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it.
        flush_tick.tick().await;
        poll_tick.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                event = events.recv() => match event {
                    Some(FeedEvent::Message { topic, payload }) => {
                        self.state.handle_topic(topic, payload);
                    }
                    Some(FeedEvent::Connected) => {
                        info!(session_key, "feed connected");
                    }
                    Some(FeedEvent::Disconnected { reason }) => {
                        warn!(session_key, %reason, "feed disconnected, client will reconnect");
                    }
                    None => {
                        warn!(session_key, "feed event channel closed");
                        break;
                    }
                },

                _ = flush_tick.tick() => {
                    if let Err(err) = self
                        .writer
                        .flush(&self.store, &mut self.state, session_key, Utc::now())
                        .await
                    {
                        warn!(session_key, error = %err, "flush failed, will retry next tick");
                    }
                }

                _ = poll_tick.tick() => {
                    self.check_live_notifications(&mut race_control_seen).await;
                    self.check_schedule_notifications(schedule).await;

                    match discover_live_session(&self.http).await {
                        Some(current)
                            if current.session_key == session_key && !current.is_complete => {}
                        Some(current) if current.session_key != session_key => {
                            info!(session_key, "a different session is now live, ending");
                            break;
                        }
                        Some(_) => {
                            info!(session_key, "session marked complete");
                            break;
                        }
                        None => {
                            info!(session_key, "session no longer discoverable, ending");
                            break;
                        }
                    }

                    if Utc::now() >= window_end {
                        info!(session_key, "weekend window closed, ending");
                        break;
                    }
                }
            }
        }

        // Late messages keep arriving briefly after the chequered flag.
        info!(session_key, "session ended, waiting out grace period");
        self.pause(SESSION_END_GRACE).await;

        // Drain anything the feed delivered during the grace period.
        while let Ok(event) = events.try_recv() {
            if let FeedEvent::Message { topic, payload } = event {
                self.state.handle_topic(topic, payload);
            }
        }

        if let Err(err) = self
            .writer
            .flush(&self.store, &mut self.state, session_key, Utc::now())
            .await
        {
            warn!(session_key, error = %err, "final flush failed");
        }
        client.disconnect();

        self.check_live_notifications(&mut race_control_seen).await;

        if matches!(handle.session_type.as_str(), "Race" | "Sprint") {
            if let Some(payload) =
                post_race_notification(&self.state, session_key, &handle.name, Utc::now())
            {
                let filter = SubscriptionFilter { reminders: true, live_events: true };
                if let Err(err) = self.sender.send_to_all(&self.store, &payload, filter).await {
                    warn!(error = %err, "post-race notification failed");
                }
            }
        }

        // Best-effort: the raw blobs stay the source of truth if this fails.
        if let Err(err) = persist_final_snapshot(&self.store, session_key, Utc::now()).await {
            warn!(session_key, error = %err, "post-session persistence failed");
        }

        info!(session_key, "session processing complete");
    }

    /// Reminder and preview checks against the schedule. Failures are
    /// logged and swallowed; notifications are enrichment, not state.
    async fn check_schedule_notifications(&mut self, schedule: &[ScheduledSession]) {
        if !self.sender.is_configured() {
            return;
        }
        let now = Utc::now();

        let reminder_minutes = match self.store.min_reminder_minutes().await {
            Ok(minutes) => minutes,
            Err(err) => {
                warn!(error = %err, "reminder lookup failed");
                return;
            }
        };

        for payload in self.triggers.check_session_reminders(schedule, now, reminder_minutes) {
            let filter = SubscriptionFilter { reminders: true, live_events: false };
            if let Err(err) = self.sender.send_to_all(&self.store, &payload, filter).await {
                warn!(error = %err, "reminder notification failed");
            }
        }

        if let Some(payload) = self.triggers.check_race_week_preview(schedule, now) {
            let filter = SubscriptionFilter { reminders: true, live_events: false };
            if let Err(err) = self.sender.send_to_all(&self.store, &payload, filter).await {
                warn!(error = %err, "preview notification failed");
            }
        }
    }

    /// Classify race control messages appended since the last check.
    async fn check_live_notifications(&mut self, race_control_seen: &mut usize) {
        if !self.sender.is_configured() {
            *race_control_seen = self.state.race_control.len();
            return;
        }

        let payloads = check_race_control(*race_control_seen, &self.state.race_control);
        *race_control_seen = self.state.race_control.len();

        for payload in payloads {
            let filter = SubscriptionFilter { reminders: false, live_events: true };
            if let Err(err) = self.sender.send_to_all(&self.store, &payload, filter).await {
                warn!(error = %err, "race control notification failed");
            }
        }
    }
}
