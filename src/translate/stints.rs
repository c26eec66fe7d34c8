//! Tyre stint translation from the timing app lines.

use super::records::Stint;
use crate::state::AccumulatedState;

/// Stints in feed order per driver, numbered from 1. A stint without a
/// recorded end (the one currently being driven) carries `lap_end` 0.
pub fn stints(state: &AccumulatedState, session_key: i64) -> Vec<Stint> {
    let mut out = Vec::new();

    for (key, line) in state.timing_app.lines.entries_ordered() {
        let number_text = line.racing_number.as_deref().unwrap_or(key);
        let Ok(driver_number) = number_text.parse::<u32>() else { continue };

        let mut lap_cursor = 1u32;
        for (idx, (_, stint)) in line.stints.entries_ordered().into_iter().enumerate() {
            let lap_start = lap_cursor;
            let lap_end = match stint.total_laps {
                Some(total) if total > 0 => {
                    let end = lap_start + total.saturating_sub(1);
                    lap_cursor = end + 1;
                    end
                }
                _ => 0,
            };

            out.push(Stint {
                session_key,
                driver_number,
                stint_number: idx as u32 + 1,
                compound: stint
                    .compound
                    .as_deref()
                    .map(str::to_uppercase)
                    .unwrap_or_else(|| "UNKNOWN".to_string()),
                tyre_age_at_start: stint.start_laps.unwrap_or(0),
                lap_start,
                lap_end,
            });
        }
    }

    out
}
