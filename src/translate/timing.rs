//! Translators over the per-driver timing lines: positions, intervals,
//! laps, and pit detection.
//!
//! Positions and intervals are stateless re-derivations from the latest
//! merged snapshot. Laps and pit stops are cumulative: the caller threads a
//! lap-history map and an in-pit edge map across flushes so repeated
//! upserts re-derive the full set idempotently.

use super::records::{Interval, Lap, PitStop, Position};
use crate::parse::{parse_gap, parse_lap_time};
use crate::state::AccumulatedState;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Lap history key: (driver number, lap number).
pub type LapKey = (u32, u32);

fn driver_number(key: &str) -> Option<u32> {
    key.parse().ok()
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// One position entry per driver with a known position, leader first.
pub fn positions(state: &AccumulatedState, session_key: i64, now: DateTime<Utc>) -> Vec<Position> {
    let date = timestamp(now);
    let mut positions: Vec<Position> = state
        .timing
        .lines
        .entries_ordered()
        .into_iter()
        .filter_map(|(key, line)| {
            let position = line.position.as_deref()?.parse().ok()?;
            Some(Position {
                session_key,
                driver_number: driver_number(key)?,
                position,
                date: date.clone(),
            })
        })
        .collect();
    positions.sort_by_key(|p| p.position);
    positions
}

/// Gap to leader and interval to the car ahead, per driver. Lapped cars
/// carry no numeric gap.
pub fn intervals(state: &AccumulatedState, session_key: i64, now: DateTime<Utc>) -> Vec<Interval> {
    let date = timestamp(now);
    state
        .timing
        .lines
        .entries_ordered()
        .into_iter()
        .filter_map(|(key, line)| {
            Some(Interval {
                session_key,
                driver_number: driver_number(key)?,
                gap_to_leader: line.gap_to_leader.as_deref().and_then(parse_gap),
                interval: line
                    .interval_to_position_ahead
                    .as_ref()
                    .and_then(|i| i.value.as_deref())
                    .and_then(parse_gap),
                date: date.clone(),
            })
        })
        .collect()
}

/// Re-derive the full lap set from the snapshot plus carried-forward
/// history.
///
/// Each driver's lap counter names the lap currently being filled in; later
/// timing updates complete its sectors and final time in place. The
/// returned set is the whole history, so a repeated flush with unchanged
/// input yields an identical set.
pub fn laps(
    state: &AccumulatedState,
    session_key: i64,
    now: DateTime<Utc>,
    lap_history: &mut BTreeMap<LapKey, Lap>,
) -> Vec<Lap> {
    let date = timestamp(now);

    for (key, line) in state.timing.lines.entries_ordered() {
        let Some(driver) = driver_number(key) else { continue };
        let Some(lap_number) = line.number_of_laps.filter(|n| *n >= 1) else { continue };

        let lap = lap_history.entry((driver, lap_number)).or_insert_with(|| Lap {
            session_key,
            driver_number: driver,
            lap_number,
            lap_duration: None,
            duration_sector_1: None,
            duration_sector_2: None,
            duration_sector_3: None,
            is_pit_out_lap: line.pit_out == Some(true),
            st_speed: None,
            date_start: date.clone(),
        });

        if let Some(value) = line.last_lap_time.as_ref().and_then(|t| t.value.as_deref()) {
            if !value.is_empty() {
                lap.lap_duration = parse_lap_time(value);
            }
        }

        for (sector_key, slot) in [
            ("0", &mut lap.duration_sector_1),
            ("1", &mut lap.duration_sector_2),
            ("2", &mut lap.duration_sector_3),
        ] {
            if let Some(value) = line.sectors.get(sector_key).and_then(|s| s.value.as_deref()) {
                if !value.is_empty() {
                    *slot = parse_lap_time(value);
                }
            }
        }

        if let Some(speed) = line
            .speeds
            .as_ref()
            .and_then(|s| s.speed_trap.as_ref())
            .and_then(|st| st.value.as_deref())
        {
            if let Ok(speed) = speed.parse::<f64>() {
                lap.st_speed = Some(speed);
            }
        }

        if line.pit_out == Some(true) {
            lap.is_pit_out_lap = true;
        }
    }

    lap_history.values().cloned().collect()
}

/// Detect pit stops as rising edges of each driver's in-pit flag.
///
/// Exactly one record is emitted per `false → true` transition, guarded
/// against duplicate emission for the same driver and lap. The stop list
/// and edge map are carried across flushes by the caller.
pub fn detect_pit_stops(
    state: &AccumulatedState,
    session_key: i64,
    now: DateTime<Utc>,
    pit_stops: &mut Vec<PitStop>,
    in_pit: &mut BTreeMap<u32, bool>,
) {
    let date = timestamp(now);

    for (key, line) in state.timing.lines.entries_ordered() {
        let Some(driver) = driver_number(key) else { continue };

        let was_in_pit = in_pit.get(&driver).copied().unwrap_or(false);
        let is_in_pit = line.in_pit == Some(true);

        if is_in_pit && !was_in_pit {
            let lap_number = line.number_of_laps.unwrap_or(0);
            let already_recorded = pit_stops
                .iter()
                .any(|p| p.driver_number == driver && p.lap_number == lap_number);
            if !already_recorded {
                pit_stops.push(PitStop {
                    session_key,
                    driver_number: driver,
                    pit_duration: None,
                    lap_number,
                    date: date.clone(),
                });
            }
        }

        if line.in_pit.is_some() {
            in_pit.insert(driver, is_in_pit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::topic::Topic;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        "2026-03-08T14:00:00Z".parse().unwrap()
    }

    fn state_with(topic: Topic, payload: serde_json::Value) -> AccumulatedState {
        let mut state = AccumulatedState::new();
        state.handle_topic(topic, payload);
        state
    }

    #[test]
    fn positions_sorted_by_position() {
        let state = state_with(
            Topic::TimingData,
            json!({"Lines": {
                "44": {"Position": "2"},
                "81": {"Position": "1"},
                "4": {}
            }}),
        );
        let out = positions(&state, 9999, now());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].driver_number, 81);
        assert_eq!(out[1].driver_number, 44);
    }

    #[test]
    fn intervals_parse_gaps_and_lapped_cars() {
        let state = state_with(
            Topic::TimingData,
            json!({"Lines": {
                "44": {"GapToLeader": "+12.345", "IntervalToPositionAhead": {"Value": "+0.567"}},
                "77": {"GapToLeader": "1 LAP"}
            }}),
        );
        let out = intervals(&state, 9999, now());
        let lead = out.iter().find(|i| i.driver_number == 44).unwrap();
        assert_eq!(lead.gap_to_leader, Some(12.345));
        assert_eq!(lead.interval, Some(0.567));

        let lapped = out.iter().find(|i| i.driver_number == 77).unwrap();
        assert_eq!(lapped.gap_to_leader, None);
    }

    #[test]
    fn lap_translation_is_idempotent() {
        let state = state_with(
            Topic::TimingData,
            json!({"Lines": {"44": {
                "NumberOfLaps": 3,
                "LastLapTime": {"Value": "1:22.167"},
                "Sectors": {"0": {"Value": "28.903"}}
            }}}),
        );

        let mut history = BTreeMap::new();
        let first = laps(&state, 9999, now(), &mut history);
        let second = laps(&state, 9999, now(), &mut history);

        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].lap_duration, Some(82.167));
        assert_eq!(first[0].duration_sector_1, Some(28.903));
    }

    #[test]
    fn later_updates_fill_sectors_in_place() {
        let mut history = BTreeMap::new();

        let state = state_with(
            Topic::TimingData,
            json!({"Lines": {"44": {"NumberOfLaps": 5, "Sectors": {"0": {"Value": "28.1"}}}}}),
        );
        laps(&state, 9999, now(), &mut history);

        let mut state = state;
        state.handle_topic(
            Topic::TimingData,
            json!({"Lines": {"44": {"Sectors": {"1": {"Value": "31.9"}}}}}),
        );
        let out = laps(&state, 9999, now(), &mut history);

        assert_eq!(out[0].duration_sector_1, Some(28.1));
        assert_eq!(out[0].duration_sector_2, Some(31.9));
    }

    #[test]
    fn laps_carry_history_when_snapshot_is_empty() {
        let mut history = BTreeMap::new();
        let state = state_with(
            Topic::TimingData,
            json!({"Lines": {"44": {"NumberOfLaps": 1, "LastLapTime": {"Value": "1:30.000"}}}}),
        );
        laps(&state, 9999, now(), &mut history);

        let empty = AccumulatedState::new();
        let out = laps(&empty, 9999, now(), &mut history);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn pit_edge_emits_exactly_once() {
        // InPit sequence false, false, true, true, false for one driver.
        let mut pit_stops = Vec::new();
        let mut in_pit = BTreeMap::new();

        for flag in [false, false, true, true, false] {
            let state = state_with(
                Topic::TimingData,
                json!({"Lines": {"44": {"InPit": flag, "NumberOfLaps": 17}}}),
            );
            detect_pit_stops(&state, 9999, now(), &mut pit_stops, &mut in_pit);
        }

        assert_eq!(pit_stops.len(), 1);
        assert_eq!(pit_stops[0].driver_number, 44);
        assert_eq!(pit_stops[0].lap_number, 17);
    }

    #[test]
    fn second_stop_on_later_lap_is_recorded() {
        let mut pit_stops = Vec::new();
        let mut in_pit = BTreeMap::new();

        for (flag, lap) in [(true, 17), (false, 18), (true, 34)] {
            let state = state_with(
                Topic::TimingData,
                json!({"Lines": {"44": {"InPit": flag, "NumberOfLaps": lap}}}),
            );
            detect_pit_stops(&state, 9999, now(), &mut pit_stops, &mut in_pit);
        }

        assert_eq!(pit_stops.len(), 2);
        assert_eq!(pit_stops[1].lap_number, 34);
    }

    #[test]
    fn empty_state_yields_empty_collections() {
        let state = AccumulatedState::new();
        assert!(positions(&state, 1, now()).is_empty());
        assert!(intervals(&state, 1, now()).is_empty());
        assert!(laps(&state, 1, now(), &mut BTreeMap::new()).is_empty());
    }
}
