//! Classification of schedule and live-state transitions into
//! notification payloads.

use crate::feed::messages::RaceControlEntry;
use crate::notify::sender::NotificationPayload;
use crate::schedule::ScheduledSession;
use crate::state::AccumulatedState;
use crate::translate;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};

/// Practice sessions are skipped; reminders for them are too frequent for
/// their value.
const REMINDER_SESSION_TYPES: [&str; 4] = ["Qualifying", "Sprint Qualifying", "Sprint", "Race"];

const PREVIEW_BEFORE_HOURS: i64 = 48;

/// Tracks which reminders and previews have already fired so each fires
/// exactly once per season run.
#[derive(Debug, Default)]
pub struct NotificationTriggers {
    sent_reminders: HashSet<String>,
    sent_previews: HashSet<u32>,
}

impl NotificationTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reminders for sessions whose start falls inside the next
    /// `reminder_minutes`. Each (round, label) pair fires at most once.
    pub fn check_session_reminders(
        &mut self,
        schedule: &[ScheduledSession],
        now: DateTime<Utc>,
        reminder_minutes: i64,
    ) -> Vec<NotificationPayload> {
        let window = ChronoDuration::minutes(reminder_minutes);
        let mut payloads = Vec::new();

        for session in schedule {
            if !REMINDER_SESSION_TYPES.contains(&session.session_label.as_str()) {
                continue;
            }

            let key = format!("{}_{}", session.round, session.session_label);
            if self.sent_reminders.contains(&key) {
                continue;
            }

            let until_start = session.start_time - now;
            if until_start > ChronoDuration::zero() && until_start <= window {
                self.sent_reminders.insert(key);
                payloads.push(NotificationPayload {
                    title: format!(
                        "{} starts in {} min",
                        session.session_label, reminder_minutes
                    ),
                    body: format!(
                        "{} - {} at {} UTC",
                        session.event_name,
                        session.session_label,
                        session.start_time.format("%H:%M")
                    ),
                    tag: Some(format!("reminder-{}-{}", session.round, session.session_label)),
                    url: Some("/schedule".to_string()),
                });
            }
        }

        payloads
    }

    /// At most one preview per round, fired when "now" enters the 48-hour
    /// window ahead of the round's first session.
    pub fn check_race_week_preview(
        &mut self,
        schedule: &[ScheduledSession],
        now: DateTime<Utc>,
    ) -> Option<NotificationPayload> {
        let mut first_by_round: HashMap<u32, &ScheduledSession> = HashMap::new();
        for session in schedule {
            first_by_round
                .entry(session.round)
                .and_modify(|first| {
                    if session.start_time < first.start_time {
                        *first = session;
                    }
                })
                .or_insert(session);
        }

        let mut rounds: Vec<_> = first_by_round.into_values().collect();
        rounds.sort_by_key(|s| s.start_time);

        for first in rounds {
            if self.sent_previews.contains(&first.round) {
                continue;
            }

            let until_start = first.start_time - now;
            if until_start > ChronoDuration::zero()
                && until_start <= ChronoDuration::hours(PREVIEW_BEFORE_HOURS)
            {
                self.sent_previews.insert(first.round);
                return Some(NotificationPayload {
                    title: format!("{} this weekend!", first.event_name),
                    body: format!(
                        "{} starts {} at {} UTC",
                        first.session_label,
                        first.start_time.format("%A"),
                        first.start_time.format("%H:%M")
                    ),
                    tag: Some(format!("preview-{}", first.round)),
                    url: Some("/schedule".to_string()),
                });
            }
        }

        None
    }
}

/// Classify race control messages appended since the last check. The
/// previous length is enough because the accumulator only ever appends.
pub fn check_race_control(
    previous_count: usize,
    messages: &[RaceControlEntry],
) -> Vec<NotificationPayload> {
    if messages.len() <= previous_count {
        return Vec::new();
    }
    messages[previous_count..].iter().filter_map(classify_race_control).collect()
}

fn classify_race_control(entry: &RaceControlEntry) -> Option<NotificationPayload> {
    let message = entry.message.as_deref().unwrap_or("");
    let flag = entry.flag.as_deref().unwrap_or("");
    let utc = entry.utc.as_deref().unwrap_or("");
    let lap_info = entry.lap.map(|lap| format!(" on lap {lap}")).unwrap_or_default();

    if flag == "RED" {
        return Some(NotificationPayload {
            title: "RED FLAG - Session Stopped".to_string(),
            body: format!("Red flag shown{lap_info}"),
            tag: Some(format!("rc-redflag-{utc}")),
            url: Some("/live".to_string()),
        });
    }

    // "VIRTUAL SAFETY CAR" contains "SAFETY CAR", so VSC is matched first.
    if message.contains("VIRTUAL SAFETY CAR DEPLOYED")
        || message.contains("VIRTUAL SAFETY CAR HAS BEEN DEPLOYED")
    {
        return Some(NotificationPayload {
            title: "Virtual Safety Car".to_string(),
            body: format!("VSC deployed{lap_info}"),
            tag: Some(format!("rc-vsc-{utc}")),
            url: Some("/live".to_string()),
        });
    }

    if message.contains("SAFETY CAR DEPLOYED") || message.contains("SAFETY CAR HAS BEEN DEPLOYED") {
        return Some(NotificationPayload {
            title: "Safety Car Deployed".to_string(),
            body: format!("Safety car deployed{lap_info}"),
            tag: Some(format!("rc-sc-{utc}")),
            url: Some("/live".to_string()),
        });
    }

    if message.contains("GREEN LIGHT") {
        return Some(NotificationPayload {
            title: "Session Started".to_string(),
            body: "Green light - session is live!".to_string(),
            tag: Some(format!("rc-green-{utc}")),
            url: Some("/live".to_string()),
        });
    }

    if flag == "CHEQUERED" {
        return Some(NotificationPayload {
            title: "Chequered Flag".to_string(),
            body: format!("Session has ended{lap_info}"),
            tag: Some(format!("rc-chequered-{utc}")),
            url: Some("/live".to_string()),
        });
    }

    None
}

/// Winner announcement from the final state. `None` when position or
/// driver data never arrived; a winner is never guessed.
pub fn post_race_notification(
    state: &AccumulatedState,
    session_key: i64,
    event_name: &str,
    now: DateTime<Utc>,
) -> Option<NotificationPayload> {
    let positions = translate::timing::positions(state, session_key, now);
    let drivers = translate::drivers::drivers(state, session_key);
    if positions.is_empty() || drivers.is_empty() {
        return None;
    }

    let p1 = positions.iter().find(|p| p.position == 1)?;
    let winner_name = drivers
        .iter()
        .find(|d| d.driver_number == p1.driver_number)
        .map(|d| {
            if !d.full_name.is_empty() {
                d.full_name.clone()
            } else if !d.name_acronym.is_empty() {
                d.name_acronym.clone()
            } else {
                format!("#{}", p1.driver_number)
            }
        })
        .unwrap_or_else(|| format!("#{}", p1.driver_number));

    Some(NotificationPayload {
        title: format!("{winner_name} wins the {event_name}!"),
        body: "Full results and analysis available now".to_string(),
        tag: Some(format!("results-{session_key}")),
        url: Some("/race".to_string()),
    })
}
