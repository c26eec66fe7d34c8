//! Driver roster translation, joined against grid positions from the
//! timing app lines.

use super::records::Driver;
use crate::state::AccumulatedState;

/// One record per roster entry that carries enough identity to be useful.
/// Entries with neither a racing number nor an acronym are placeholder
/// rows the feed sometimes emits mid-session and are skipped.
pub fn drivers(state: &AccumulatedState, session_key: i64) -> Vec<Driver> {
    state
        .drivers
        .0
        .entries_ordered()
        .into_iter()
        .filter_map(|(key, entry)| {
            let number_text = entry.racing_number.as_deref().unwrap_or(key);
            if entry.racing_number.is_none() && entry.tla.is_none() {
                return None;
            }
            let driver_number: u32 = number_text.parse().ok()?;

            let grid_position = state
                .timing_app
                .lines
                .get(key)
                .and_then(|line| line.grid_pos.as_deref())
                .and_then(|g| g.parse().ok());

            Some(Driver {
                session_key,
                driver_number,
                broadcast_name: entry.broadcast_name.clone().unwrap_or_default(),
                full_name: entry.full_name.clone().unwrap_or_default(),
                name_acronym: entry.tla.clone().unwrap_or_default(),
                team_name: entry.team_name.clone().unwrap_or_default(),
                team_colour: entry.team_colour.clone().unwrap_or_default(),
                first_name: entry.first_name.clone().unwrap_or_default(),
                last_name: entry.last_name.clone().unwrap_or_default(),
                headshot_url: entry.headshot_url.clone(),
                country_code: entry.country_code.clone().unwrap_or_default(),
                grid_position,
            })
        })
        .collect()
}
