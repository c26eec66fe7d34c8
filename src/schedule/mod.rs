//! Season calendar and sleep/wake windows.
//!
//! The calendar comes from the Jolpica (Ergast-compatible) REST API,
//! supplemented with the pre-season test which that API does not carry.
//! Sessions are flattened into one sorted list and the worker wakes an
//! hour before the next one whose estimated end has not passed.

pub mod discovery;

use crate::error::{Result, WorkerError};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

pub use discovery::{discover_live_session, LiveSessionHandle};

const JOLPICA_BASE: &str = "https://api.jolpi.ca/ergast/f1";
const WAKE_BEFORE: Duration = Duration::from_secs(60 * 60);
/// Data (radio captures, archive status) keeps trickling in after the last
/// session, so the weekend window extends past the estimated end.
const POST_SESSION_BUFFER: Duration = Duration::from_secs(4 * 60 * 60);

const THREE_HOURS: Duration = Duration::from_secs(3 * 60 * 60);
const NINE_HOURS: Duration = Duration::from_secs(9 * 60 * 60);

/// A single session on the season calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSession {
    /// Championship round, 0 for pre-season testing.
    pub round: u32,
    pub event_name: String,
    pub session_label: String,
    pub start_time: DateTime<Utc>,
    pub estimated_duration: Duration,
}

impl ScheduledSession {
    pub fn estimated_end(&self) -> DateTime<Utc> {
        self.start_time + self.estimated_duration
    }
}

// ---------------------------------------------------------------------------
// Jolpica response shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct JolpicaResponse {
    #[serde(rename = "MRData")]
    mr_data: MrData,
}

#[derive(Debug, Deserialize)]
struct MrData {
    #[serde(rename = "RaceTable")]
    race_table: RaceTable,
}

#[derive(Debug, Deserialize)]
struct RaceTable {
    #[serde(rename = "Races", default)]
    races: Vec<JolpicaRace>,
}

#[derive(Debug, Deserialize)]
struct JolpicaRace {
    round: String,
    #[serde(rename = "raceName")]
    race_name: String,
    date: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(rename = "FirstPractice")]
    first_practice: Option<SessionTime>,
    #[serde(rename = "SecondPractice")]
    second_practice: Option<SessionTime>,
    #[serde(rename = "ThirdPractice")]
    third_practice: Option<SessionTime>,
    #[serde(rename = "Qualifying")]
    qualifying: Option<SessionTime>,
    #[serde(rename = "Sprint")]
    sprint: Option<SessionTime>,
    #[serde(rename = "SprintQualifying")]
    sprint_qualifying: Option<SessionTime>,
}

#[derive(Debug, Deserialize)]
struct SessionTime {
    date: String,
    #[serde(default)]
    time: Option<String>,
}

impl SessionTime {
    fn start(&self) -> Option<DateTime<Utc>> {
        let time = self.time.as_deref().unwrap_or("00:00:00Z");
        format!("{}T{}", self.date, time).parse().ok()
    }
}

// ---------------------------------------------------------------------------
// Calendar assembly
// ---------------------------------------------------------------------------

fn pre_season_testing(year: i32) -> Vec<ScheduledSession> {
    // Night testing in Bahrain, three days starting Feb 10, 23:00 UTC.
    (0..3)
        .filter_map(|day| {
            let date = NaiveDate::from_ymd_opt(year, 2, 10 + day)?.and_hms_opt(23, 0, 0)?;
            Some(ScheduledSession {
                round: 0,
                event_name: "Bahrain Pre-Season Test".to_string(),
                session_label: format!("Day {}", day + 1),
                start_time: Utc.from_utc_datetime(&date),
                estimated_duration: NINE_HOURS,
            })
        })
        .collect()
}

/// Fetch the season calendar and return every session, sorted by start
/// time, including the pre-season test supplement.
pub async fn fetch_schedule(client: &reqwest::Client, year: i32) -> Result<Vec<ScheduledSession>> {
    let url = format!("{JOLPICA_BASE}/{year}.json");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| WorkerError::schedule_fetch(format!("calendar request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(WorkerError::schedule_fetch(format!(
            "calendar API returned {}",
            response.status()
        )));
    }

    let data: JolpicaResponse = response
        .json()
        .await
        .map_err(|e| WorkerError::schedule_fetch(format!("calendar decode failed: {e}")))?;

    let mut sessions = pre_season_testing(year);

    for race in data.mr_data.race_table.races {
        let Ok(round) = race.round.parse::<u32>() else { continue };

        let mut add = |label: &str, time: Option<&SessionTime>, duration: Duration| {
            if let Some(start) = time.and_then(SessionTime::start) {
                sessions.push(ScheduledSession {
                    round,
                    event_name: race.race_name.clone(),
                    session_label: label.to_string(),
                    start_time: start,
                    estimated_duration: duration,
                });
            }
        };

        add("FP1", race.first_practice.as_ref(), THREE_HOURS);
        add("FP2", race.second_practice.as_ref(), THREE_HOURS);
        add("Sprint Qualifying", race.sprint_qualifying.as_ref(), THREE_HOURS);
        add("FP3", race.third_practice.as_ref(), THREE_HOURS);
        add("Sprint", race.sprint.as_ref(), THREE_HOURS);
        add("Qualifying", race.qualifying.as_ref(), THREE_HOURS);
        let race_time = SessionTime { date: race.date.clone(), time: race.time.clone() };
        add("Race", Some(&race_time), THREE_HOURS);
    }

    sessions.sort_by_key(|s| s.start_time);
    Ok(sessions)
}

// ---------------------------------------------------------------------------
// Wake windows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Wakeup {
    pub session: ScheduledSession,
    pub sleep: Duration,
}

/// The earliest session whose estimated end has not passed, and how long
/// to sleep to wake an hour before it starts. `None` means the season is
/// exhausted.
pub fn find_next_wakeup(sessions: &[ScheduledSession], now: DateTime<Utc>) -> Option<Wakeup> {
    sessions
        .iter()
        .find(|s| now < s.estimated_end())
        .map(|session| {
            let wake_at = session.start_time - WAKE_BEFORE;
            let sleep = (wake_at - now).to_std().unwrap_or(Duration::ZERO);
            Wakeup { session: session.clone(), sleep }
        })
}

/// When the awake window for a round closes: the last session's estimated
/// end plus the post-session buffer.
pub fn weekend_end(sessions: &[ScheduledSession], round: u32) -> Option<DateTime<Utc>> {
    sessions
        .iter()
        .filter(|s| s.round == round)
        .map(|s| s.estimated_end())
        .max()
        .map(|end| end + POST_SESSION_BUFFER)
}

/// Log the next few upcoming sessions for visibility.
pub fn log_upcoming(sessions: &[ScheduledSession], now: DateTime<Utc>, count: usize) {
    let upcoming: Vec<_> = sessions.iter().filter(|s| s.start_time > now).take(count).collect();
    if upcoming.is_empty() {
        info!("no upcoming sessions in schedule");
        return;
    }
    for session in upcoming {
        let until = session.start_time - now;
        let eta = if until.num_days() > 1 {
            format!("{}d", until.num_days())
        } else {
            format!("{}h", until.num_hours())
        };
        info!(
            event = %session.event_name,
            session = %session.session_label,
            start = %session.start_time,
            eta = %eta,
            "upcoming session"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(round: u32, label: &str, start: &str) -> ScheduledSession {
        ScheduledSession {
            round,
            event_name: "Test Grand Prix".to_string(),
            session_label: label.to_string(),
            start_time: start.parse().unwrap(),
            estimated_duration: THREE_HOURS,
        }
    }

    #[test]
    fn wakeup_two_hours_out_sleeps_one_hour() {
        let sessions = vec![session(1, "FP1", "2026-03-06T11:30:00Z")];
        let now = "2026-03-06T09:30:00Z".parse().unwrap();
        let wakeup = find_next_wakeup(&sessions, now).unwrap();
        assert_eq!(wakeup.sleep, Duration::from_secs(3600));
    }

    #[test]
    fn wakeup_inside_window_sleeps_zero() {
        let sessions = vec![session(1, "FP1", "2026-03-06T11:30:00Z")];
        let now = "2026-03-06T11:00:00Z".parse().unwrap();
        let wakeup = find_next_wakeup(&sessions, now).unwrap();
        assert_eq!(wakeup.sleep, Duration::ZERO);
    }

    #[test]
    fn elapsed_session_is_skipped() {
        let sessions = vec![
            session(1, "FP1", "2026-03-06T11:30:00Z"),
            session(1, "FP2", "2026-03-06T15:00:00Z"),
        ];
        // One second past FP1's estimated end.
        let now = "2026-03-06T14:30:01Z".parse().unwrap();
        let wakeup = find_next_wakeup(&sessions, now).unwrap();
        assert_eq!(wakeup.session.session_label, "FP2");
    }

    #[test]
    fn exhausted_season_returns_none() {
        let sessions = vec![session(24, "Race", "2026-12-06T13:00:00Z")];
        let now = "2026-12-07T00:00:00Z".parse().unwrap();
        assert!(find_next_wakeup(&sessions, now).is_none());
    }

    #[test]
    fn weekend_end_extends_past_last_session() {
        let sessions = vec![
            session(1, "Qualifying", "2026-03-07T15:00:00Z"),
            session(1, "Race", "2026-03-08T15:00:00Z"),
            session(2, "FP1", "2026-03-20T11:30:00Z"),
        ];
        let end = weekend_end(&sessions, 1).unwrap();
        let expected: DateTime<Utc> = "2026-03-08T22:00:00Z".parse().unwrap();
        assert_eq!(end, expected);
    }

    #[test]
    fn pre_season_supplement_is_three_days() {
        let testing = pre_season_testing(2026);
        assert_eq!(testing.len(), 3);
        assert!(testing.iter().all(|s| s.round == 0));
        assert_eq!(testing[0].start_time, "2026-02-10T23:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn jolpica_payload_parses() {
        let raw = serde_json::json!({
            "MRData": {"RaceTable": {"Races": [{
                "season": "2026",
                "round": "1",
                "raceName": "Australian Grand Prix",
                "date": "2026-03-08",
                "time": "05:00:00Z",
                "FirstPractice": {"date": "2026-03-06", "time": "01:30:00Z"},
                "Qualifying": {"date": "2026-03-07", "time": "05:00:00Z"}
            }]}}
        });
        let parsed: JolpicaResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.mr_data.race_table.races.len(), 1);
        assert_eq!(parsed.mr_data.race_table.races[0].round, "1");
    }
}
