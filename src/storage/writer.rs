//! Periodic flush of accumulated state into per-topic blobs.

use crate::error::Result;
use crate::state::AccumulatedState;
use crate::storage::store::LiveStore;
use crate::translate::{self, records::Lap, records::PitStop};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

/// Translates and upserts the live snapshot, carrying the cross-flush
/// state the lap and pit translators need.
#[derive(Default)]
pub struct LiveWriter {
    lap_history: BTreeMap<(u32, u32), Lap>,
    pit_stops: Vec<PitStop>,
    in_pit: BTreeMap<u32, bool>,
}

impl LiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop carried translator state. Called once per session lifecycle
    /// start, alongside the accumulator's own reset.
    pub fn reset_for_new_session(&mut self) {
        self.lap_history.clear();
        self.pit_stops.clear();
        self.in_pit.clear();
    }

    /// Translate every topic and upsert the results as one atomic batch.
    ///
    /// No-op unless the accumulator is dirty. The dirty flag is cleared
    /// only after the batch lands, so a failed flush retries with the full
    /// (possibly further-updated) state on the next tick.
    pub async fn flush(
        &mut self,
        store: &LiveStore,
        state: &mut AccumulatedState,
        session_key: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !state.is_dirty() {
            return Ok(());
        }

        let positions = translate::timing::positions(state, session_key, now);
        let intervals = translate::timing::intervals(state, session_key, now);
        let laps = translate::timing::laps(state, session_key, now, &mut self.lap_history);
        translate::timing::detect_pit_stops(
            state,
            session_key,
            now,
            &mut self.pit_stops,
            &mut self.in_pit,
        );
        let drivers = translate::drivers::drivers(state, session_key);
        let weather = translate::weather::weather_samples(&state.weather, session_key, now);
        let race_control =
            translate::race_control::race_control_messages(&state.race_control, session_key, now);
        let team_radio =
            translate::team_radio::team_radio_captures(&state.team_radio, session_key, now);
        let stints = translate::stints::stints(state, session_key);
        let meta = translate::session::meta_blob(state, now);

        let topics: [(&str, String); 10] = [
            ("positions", serde_json::to_string(&positions)?),
            ("intervals", serde_json::to_string(&intervals)?),
            ("laps", serde_json::to_string(&laps)?),
            ("pit_stops", serde_json::to_string(&self.pit_stops)?),
            ("drivers", serde_json::to_string(&drivers)?),
            ("weather", serde_json::to_string(&weather)?),
            ("race_control", serde_json::to_string(&race_control)?),
            ("team_radio", serde_json::to_string(&team_radio)?),
            ("stints", serde_json::to_string(&stints)?),
            ("meta", serde_json::to_string(&meta)?),
        ];

        let updated_at = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        store.upsert_topics(session_key, &topics, &updated_at).await?;

        state.clear_dirty();
        info!(
            session_key,
            positions = positions.len(),
            laps = laps.len(),
            drivers = drivers.len(),
            "flushed live snapshot"
        );
        Ok(())
    }
}
