//! Accumulation of feed deltas into one coherent session snapshot.
//!
//! [`AccumulatedState`] is the single hot state for the active session.
//! Merge topics (timing, roster, stints, session info, lap count, track
//! status) fold each delta into the typed snapshot; append topics (race
//! control, team radio) collect entries in arrival order and deduplicate
//! replays by composite key, so a reconnect-induced snapshot re-delivery
//! adds nothing. Weather is append-only of whole samples: each update is a
//! periodic full reading, not a delta.
//!
//! The accumulator has no failure modes. Malformed or absent payloads are
//! no-ops; any successful mutation sets the dirty flag the storage writer
//! keys off.

use crate::feed::messages::{
    ApplyDelta, DriverList, LapCount, RaceControlEntry, RaceControlMessages, RadioCapture,
    SessionInfo, TeamRadio, TimingAppData, TimingData, TrackStatus, WeatherData,
};
use crate::feed::topic::Topic;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// The merged point-in-time picture of one live session.
#[derive(Debug, Default)]
pub struct AccumulatedState {
    pub timing: TimingData,
    pub drivers: DriverList,
    pub race_control: Vec<RaceControlEntry>,
    pub weather: Vec<WeatherData>,
    pub team_radio: Vec<RadioCapture>,
    pub timing_app: TimingAppData,
    pub session_info: SessionInfo,
    pub lap_count: LapCount,
    pub track_status: TrackStatus,

    dirty: bool,
    seen_race_control: HashSet<String>,
    seen_radio: HashSet<String>,
}

impl AccumulatedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all state and dedup sets. Called once per session lifecycle;
    /// state is never shared across sessions.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether any mutation happened since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Cleared only after a successful flush.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Fold one topic payload into the snapshot.
    pub fn handle_topic(&mut self, topic: Topic, payload: Value) {
        if payload.is_null() {
            return;
        }

        match topic {
            Topic::TimingData => self.merge_into(payload, |s: &mut Self, d| s.timing.apply(d)),
            Topic::DriverList => self.merge_into(payload, |s: &mut Self, d| s.drivers.apply(d)),
            Topic::TimingAppData => {
                self.merge_into(payload, |s: &mut Self, d| s.timing_app.apply(d))
            }
            Topic::SessionInfo => {
                self.merge_into(payload, |s: &mut Self, d| s.session_info.apply(d))
            }
            Topic::LapCount => self.merge_into(payload, |s: &mut Self, d| s.lap_count.apply(d)),
            Topic::TrackStatus => {
                self.merge_into(payload, |s: &mut Self, d| s.track_status.apply(d))
            }
            Topic::RaceControlMessages => self.append_race_control(payload),
            Topic::WeatherData => self.append_weather(payload),
            Topic::TeamRadio => self.append_team_radio(payload),
            // Liveness only.
            Topic::Heartbeat => {}
        }
    }

    fn merge_into<T, F>(&mut self, payload: Value, fold: F)
    where
        T: serde::de::DeserializeOwned + ApplyDelta,
        F: FnOnce(&mut Self, T),
    {
        match serde_json::from_value::<T>(payload) {
            Ok(delta) => {
                fold(self, delta);
                self.dirty = true;
            }
            Err(e) => debug!("dropping unreadable merge payload: {e}"),
        }
    }

    fn append_race_control(&mut self, payload: Value) {
        let Ok(message) = serde_json::from_value::<RaceControlMessages>(payload) else {
            return;
        };

        for (index, entry) in message.messages.entries_ordered() {
            let key = format!(
                "{index}_{}_{}",
                entry.utc.as_deref().unwrap_or(""),
                entry.message.as_deref().unwrap_or("")
            );
            if self.seen_race_control.insert(key) {
                self.race_control.push(entry.clone());
                self.dirty = true;
            }
        }
    }

    fn append_team_radio(&mut self, payload: Value) {
        let Ok(message) = serde_json::from_value::<TeamRadio>(payload) else {
            return;
        };

        for (index, capture) in message.captures.entries_ordered() {
            let key = format!(
                "{index}_{}_{}",
                capture.utc.as_deref().unwrap_or(""),
                capture.racing_number.as_deref().unwrap_or("")
            );
            if self.seen_radio.insert(key) {
                self.team_radio.push(capture.clone());
                self.dirty = true;
            }
        }
    }

    fn append_weather(&mut self, payload: Value) {
        match serde_json::from_value::<WeatherData>(payload) {
            Ok(sample) => {
                self.weather.push(sample);
                self.dirty = true;
            }
            Err(e) => debug!("dropping unreadable weather payload: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn starts_clean_and_empty() {
        let state = AccumulatedState::new();
        assert!(!state.is_dirty());
        assert!(state.race_control.is_empty());
        assert!(state.timing.lines.is_empty());
    }

    #[test]
    fn disjoint_merge_updates_union() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::TimingData, json!({"Lines": {"44": {"Position": "1"}}}));
        state.handle_topic(Topic::TimingData, json!({"Lines": {"81": {"Position": "2"}}}));

        assert_eq!(state.timing.lines.len(), 2);
        assert!(state.is_dirty());
    }

    #[test]
    fn repeated_append_entry_stored_once() {
        let mut state = AccumulatedState::new();
        let payload = json!({"Messages": {"1": {"Utc": "2026-03-08T14:00:00Z", "Message": "GREEN LIGHT"}}});
        state.handle_topic(Topic::RaceControlMessages, payload.clone());
        state.handle_topic(Topic::RaceControlMessages, payload);

        assert_eq!(state.race_control.len(), 1);
    }

    #[test]
    fn replayed_append_does_not_set_dirty() {
        let mut state = AccumulatedState::new();
        let payload = json!({"Messages": {"1": {"Utc": "t", "Message": "YELLOW"}}});
        state.handle_topic(Topic::RaceControlMessages, payload.clone());
        state.clear_dirty();

        state.handle_topic(Topic::RaceControlMessages, payload);
        assert!(!state.is_dirty());
    }

    #[test]
    fn race_control_preserves_arrival_order() {
        let mut state = AccumulatedState::new();
        state.handle_topic(
            Topic::RaceControlMessages,
            json!({"Messages": [
                {"Utc": "a", "Message": "GREEN LIGHT"},
                {"Utc": "b", "Message": "YELLOW"}
            ]}),
        );
        state.handle_topic(
            Topic::RaceControlMessages,
            json!({"Messages": {"2": {"Utc": "c", "Message": "CLEAR"}}}),
        );

        let messages: Vec<&str> = state
            .race_control
            .iter()
            .map(|m| m.message.as_deref().unwrap())
            .collect();
        assert_eq!(messages, vec!["GREEN LIGHT", "YELLOW", "CLEAR"]);
    }

    #[test]
    fn weather_appends_whole_snapshots() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::WeatherData, json!({"AirTemp": "24.5"}));
        state.handle_topic(Topic::WeatherData, json!({"AirTemp": "24.7"}));

        assert_eq!(state.weather.len(), 2);
        assert_eq!(state.weather[1].air_temp.as_deref(), Some("24.7"));
    }

    #[test]
    fn malformed_payload_is_noop() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::TimingData, json!("not an object"));
        state.handle_topic(Topic::WeatherData, json!(42));
        state.handle_topic(Topic::LapCount, Value::Null);

        assert!(!state.is_dirty());
    }

    #[test]
    fn heartbeat_carries_no_state() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::Heartbeat, json!({"Utc": "2026-03-08T14:00:00Z"}));
        assert!(!state.is_dirty());
    }

    #[test]
    fn reset_drops_state_and_dedup_sets() {
        let mut state = AccumulatedState::new();
        let payload = json!({"Messages": {"1": {"Utc": "t", "Message": "YELLOW"}}});
        state.handle_topic(Topic::RaceControlMessages, payload.clone());
        state.reset();

        assert!(state.race_control.is_empty());
        assert!(!state.is_dirty());

        // After reset the same entry may be collected again.
        state.handle_topic(Topic::RaceControlMessages, payload);
        assert_eq!(state.race_control.len(), 1);
    }

    #[test]
    fn lap_count_and_track_status_shallow_merge() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::LapCount, json!({"CurrentLap": 3, "TotalLaps": 57}));
        state.handle_topic(Topic::LapCount, json!({"CurrentLap": 4}));
        state.handle_topic(Topic::TrackStatus, json!({"Status": "2", "Message": "Yellow"}));

        assert_eq!(state.lap_count.current_lap, Some(4));
        assert_eq!(state.lap_count.total_laps, Some(57));
        assert_eq!(state.track_status.status.as_deref(), Some("2"));
    }
}
