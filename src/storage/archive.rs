//! Post-session persistence: flatten the final live blobs into the
//! normalized archive tables.
//!
//! Runs once after a session is confirmed ended. The per-topic blobs stay
//! the source of truth; everything here is a derived, query-optimized
//! view, inserted with insert-if-absent semantics so an accidental second
//! run is harmless.

use crate::error::Result;
use crate::parse::format_lap_time;
use crate::storage::store::LiveStore;
use crate::translate::records::{
    Driver, Lap, MetaBlob, PitStop, Position, RaceControlMessage, Stint, WeatherSample,
};
use chrono::{DateTime, Utc};
use libsql::Value;
use std::collections::{HashMap, HashSet};
use tracing::info;

const SESSION_DRIVERS_SQL: &str = "\
    INSERT OR IGNORE INTO session_drivers (\
    session_key, driver_number, abbreviation, first_name, last_name, full_name, \
    team_name, team_color, headshot_url, country_code, \
    grid_position, final_position, \
    best_lap_time, best_lap_time_seconds, best_lap_number, \
    best_sector_1, best_sector_1_seconds, best_sector_2, best_sector_2_seconds, \
    best_sector_3, best_sector_3_seconds, speed_trap_best, pit_count\
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const LAPS_SQL: &str = "\
    INSERT OR IGNORE INTO laps (\
    session_key, driver_number, lap_number, \
    lap_time, lap_time_seconds, sector_1, sector_1_seconds, \
    sector_2, sector_2_seconds, sector_3, sector_3_seconds, \
    speed_trap, compound, tyre_age, is_pit, is_out_lap, is_in_lap\
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const LAP_POSITIONS_SQL: &str = "\
    INSERT OR IGNORE INTO lap_positions (session_key, driver_number, lap_number, position) \
    VALUES (?, ?, ?, ?)";

const STINTS_SQL: &str = "\
    INSERT OR IGNORE INTO stints (\
    session_key, driver_number, stint_number, compound, total_laps, start_lap, end_lap\
    ) VALUES (?, ?, ?, ?, ?, ?, ?)";

const PIT_STOPS_SQL: &str = "\
    INSERT OR IGNORE INTO pit_stops (session_key, driver_number, lap_number, stop_number) \
    VALUES (?, ?, ?, ?)";

const RACE_CONTROL_SQL: &str = "\
    INSERT INTO race_control_messages (\
    session_key, utc, lap_number, category, flag, scope, driver_number, message\
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)";

const WEATHER_SQL: &str = "\
    INSERT INTO weather_series (\
    session_key, utc, air_temp, track_temp, humidity, pressure, \
    rainfall, wind_direction, wind_speed\
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)";

fn opt_f64(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn opt_u32(value: Option<u32>) -> Value {
    value.map(|v| Value::from(i64::from(v))).unwrap_or(Value::Null)
}

fn opt_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn lap_time_text(seconds: Option<f64>) -> Value {
    opt_text(seconds.and_then(format_lap_time))
}

fn parse_blob<T: serde::de::DeserializeOwned + Default>(
    topics: &HashMap<String, String>,
    topic: &str,
) -> T {
    topics
        .get(topic)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default()
}

/// Per-driver bests accumulated over the lap set.
#[derive(Debug, Clone)]
struct DriverBests {
    best_time: Option<f64>,
    best_lap_number: Option<u32>,
    best_s1: Option<f64>,
    best_s2: Option<f64>,
    best_s3: Option<f64>,
    best_trap_speed: Option<f64>,
}

fn driver_bests(laps: &[Lap]) -> HashMap<u32, DriverBests> {
    let mut bests: HashMap<u32, DriverBests> = HashMap::new();

    fn min_into(slot: &mut Option<f64>, candidate: Option<f64>) {
        if let Some(c) = candidate {
            if slot.map_or(true, |s| c < s) {
                *slot = Some(c);
            }
        }
    }

    for lap in laps {
        let entry = bests.entry(lap.driver_number).or_insert(DriverBests {
            best_time: None,
            best_lap_number: None,
            best_s1: None,
            best_s2: None,
            best_s3: None,
            best_trap_speed: None,
        });

        if let Some(time) = lap.lap_duration {
            if entry.best_time.map_or(true, |t| time < t) {
                entry.best_time = Some(time);
                entry.best_lap_number = Some(lap.lap_number);
            }
        }
        min_into(&mut entry.best_s1, lap.duration_sector_1);
        min_into(&mut entry.best_s2, lap.duration_sector_2);
        min_into(&mut entry.best_s3, lap.duration_sector_3);
        if let Some(speed) = lap.st_speed {
            if entry.best_trap_speed.map_or(true, |s| speed > s) {
                entry.best_trap_speed = Some(speed);
            }
        }
    }

    bests
}

/// Stop numbers in per-driver lap order, reassigned from scratch each run
/// so a late-filled earlier lap renumbers the later stops consistently.
fn numbered_pit_stops(pit_stops: &[PitStop]) -> Vec<(PitStop, u32)> {
    let mut sorted: Vec<PitStop> = pit_stops.to_vec();
    sorted.sort_by_key(|p| (p.driver_number, p.lap_number));

    let mut counts: HashMap<u32, u32> = HashMap::new();
    sorted
        .into_iter()
        .map(|pit| {
            let count = counts.entry(pit.driver_number).or_insert(0);
            *count += 1;
            let number = *count;
            (pit, number)
        })
        .collect()
}

fn find_stint<'a>(stints: &'a [Stint], driver: u32, lap: u32) -> Option<&'a Stint> {
    stints.iter().find(|s| {
        s.driver_number == driver && lap >= s.lap_start && (s.lap_end == 0 || lap <= s.lap_end)
    })
}

/// Read back the final blobs for a session and insert the normalized rows.
///
/// A deliberate no-op when the session row is missing or already carries
/// full archive data.
pub async fn persist_final_snapshot(
    store: &LiveStore,
    session_key: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    let Some(markers) = store.session_markers(session_key).await? else {
        info!(session_key, "session row not found, skipping final persist");
        return Ok(());
    };
    if markers.has_archive_data() {
        info!(session_key, "session already has archive data, skipping final persist");
        return Ok(());
    }

    let topics = store.read_topics(session_key).await?;
    if topics.is_empty() {
        info!(session_key, "no live blobs for session, nothing to persist");
        return Ok(());
    }

    let drivers: Vec<Driver> = parse_blob(&topics, "drivers");
    let positions: Vec<Position> = parse_blob(&topics, "positions");
    let laps: Vec<Lap> = parse_blob(&topics, "laps");
    let pit_stops: Vec<PitStop> = parse_blob(&topics, "pit_stops");
    let stints: Vec<Stint> = parse_blob(&topics, "stints");
    let race_control: Vec<RaceControlMessage> = parse_blob(&topics, "race_control");
    let weather: Vec<WeatherSample> = parse_blob(&topics, "weather");
    let meta: MetaBlob = parse_blob(&topics, "meta");

    let position_by_driver: HashMap<u32, u32> =
        positions.iter().map(|p| (p.driver_number, p.position)).collect();

    let pit_lap_set: HashSet<(u32, u32)> =
        pit_stops.iter().map(|p| (p.driver_number, p.lap_number)).collect();
    let mut pit_counts: HashMap<u32, u32> = HashMap::new();
    for pit in &pit_stops {
        *pit_counts.entry(pit.driver_number).or_insert(0) += 1;
    }

    let bests = driver_bests(&laps);

    if !drivers.is_empty() {
        let rows: Vec<Vec<Value>> = drivers
            .iter()
            .map(|d| {
                let stats = bests.get(&d.driver_number);
                let best_time = stats.and_then(|s| s.best_time);
                let best_s1 = stats.and_then(|s| s.best_s1);
                let best_s2 = stats.and_then(|s| s.best_s2);
                let best_s3 = stats.and_then(|s| s.best_s3);
                vec![
                    Value::from(session_key),
                    Value::from(i64::from(d.driver_number)),
                    Value::from(d.name_acronym.clone()),
                    Value::from(d.first_name.clone()),
                    Value::from(d.last_name.clone()),
                    Value::from(d.full_name.clone()),
                    Value::from(d.team_name.clone()),
                    Value::from(d.team_colour.clone()),
                    opt_text(d.headshot_url.clone()),
                    Value::from(d.country_code.clone()),
                    opt_u32(d.grid_position),
                    opt_u32(position_by_driver.get(&d.driver_number).copied()),
                    lap_time_text(best_time),
                    opt_f64(best_time),
                    opt_u32(stats.and_then(|s| s.best_lap_number)),
                    lap_time_text(best_s1),
                    opt_f64(best_s1),
                    lap_time_text(best_s2),
                    opt_f64(best_s2),
                    lap_time_text(best_s3),
                    opt_f64(best_s3),
                    opt_f64(stats.and_then(|s| s.best_trap_speed)),
                    Value::from(i64::from(pit_counts.get(&d.driver_number).copied().unwrap_or(0))),
                ]
            })
            .collect();
        let inserted = store.batch_insert(SESSION_DRIVERS_SQL, rows).await?;
        info!(session_key, inserted, "archived session drivers");
    }

    if !laps.is_empty() {
        let rows: Vec<Vec<Value>> = laps
            .iter()
            .map(|lap| {
                let stint = find_stint(&stints, lap.driver_number, lap.lap_number);
                let compound = stint.map(|s| s.compound.clone());
                let tyre_age =
                    stint.map(|s| s.tyre_age_at_start + (lap.lap_number - s.lap_start));
                let is_pit = pit_lap_set.contains(&(lap.driver_number, lap.lap_number));
                vec![
                    Value::from(session_key),
                    Value::from(i64::from(lap.driver_number)),
                    Value::from(i64::from(lap.lap_number)),
                    lap_time_text(lap.lap_duration),
                    opt_f64(lap.lap_duration),
                    lap_time_text(lap.duration_sector_1),
                    opt_f64(lap.duration_sector_1),
                    lap_time_text(lap.duration_sector_2),
                    opt_f64(lap.duration_sector_2),
                    lap_time_text(lap.duration_sector_3),
                    opt_f64(lap.duration_sector_3),
                    opt_f64(lap.st_speed),
                    opt_text(compound),
                    opt_u32(tyre_age),
                    Value::from(i64::from(is_pit)),
                    Value::from(i64::from(lap.is_pit_out_lap)),
                    Value::from(i64::from(is_pit)),
                ]
            })
            .collect();
        let inserted = store.batch_insert(LAPS_SQL, rows).await?;
        info!(session_key, inserted, "archived laps");
    }

    if !positions.is_empty() && !laps.is_empty() {
        let mut max_lap: HashMap<u32, u32> = HashMap::new();
        for lap in &laps {
            let entry = max_lap.entry(lap.driver_number).or_insert(0);
            if lap.lap_number > *entry {
                *entry = lap.lap_number;
            }
        }
        let rows: Vec<Vec<Value>> = positions
            .iter()
            .filter_map(|pos| {
                let lap = max_lap.get(&pos.driver_number).copied().filter(|l| *l > 0)?;
                Some(vec![
                    Value::from(session_key),
                    Value::from(i64::from(pos.driver_number)),
                    Value::from(i64::from(lap)),
                    Value::from(i64::from(pos.position)),
                ])
            })
            .collect();
        if !rows.is_empty() {
            let inserted = store.batch_insert(LAP_POSITIONS_SQL, rows).await?;
            info!(session_key, inserted, "archived lap positions");
        }
    }

    if !stints.is_empty() {
        let rows: Vec<Vec<Value>> = stints
            .iter()
            .map(|s| {
                let total = (s.lap_end > 0).then(|| s.lap_end - s.lap_start + 1);
                vec![
                    Value::from(session_key),
                    Value::from(i64::from(s.driver_number)),
                    Value::from(i64::from(s.stint_number)),
                    Value::from(s.compound.clone()),
                    opt_u32(total),
                    Value::from(i64::from(s.lap_start)),
                    opt_u32((s.lap_end > 0).then_some(s.lap_end)),
                ]
            })
            .collect();
        let inserted = store.batch_insert(STINTS_SQL, rows).await?;
        info!(session_key, inserted, "archived stints");
    }

    if !pit_stops.is_empty() {
        let rows: Vec<Vec<Value>> = numbered_pit_stops(&pit_stops)
            .into_iter()
            .map(|(pit, stop_number)| {
                vec![
                    Value::from(session_key),
                    Value::from(i64::from(pit.driver_number)),
                    Value::from(i64::from(pit.lap_number)),
                    Value::from(i64::from(stop_number)),
                ]
            })
            .collect();
        let inserted = store.batch_insert(PIT_STOPS_SQL, rows).await?;
        info!(session_key, inserted, "archived pit stops");
    }

    if !race_control.is_empty() {
        let rows: Vec<Vec<Value>> = race_control
            .iter()
            .map(|rc| {
                vec![
                    Value::from(session_key),
                    Value::from(rc.date.clone()),
                    opt_u32(rc.lap_number),
                    Value::from(rc.category.clone()),
                    opt_text(rc.flag.clone()),
                    opt_text(rc.scope.clone()),
                    opt_u32(rc.driver_number),
                    Value::from(rc.message.clone()),
                ]
            })
            .collect();
        let inserted = store.batch_insert(RACE_CONTROL_SQL, rows).await?;
        info!(session_key, inserted, "archived race control messages");
    }

    if !weather.is_empty() {
        let rows: Vec<Vec<Value>> = weather
            .iter()
            .map(|w| {
                vec![
                    Value::from(session_key),
                    Value::from(w.date.clone()),
                    Value::from(w.air_temperature),
                    Value::from(w.track_temperature),
                    Value::from(w.humidity),
                    Value::from(w.pressure),
                    Value::from(w.rainfall),
                    Value::from(w.wind_direction),
                    Value::from(w.wind_speed),
                ]
            })
            .collect();
        let inserted = store.batch_insert(WEATHER_SQL, rows).await?;
        info!(session_key, inserted, "archived weather series");
    }

    let stamp = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    let total_laps = (meta.lap_count.total_laps > 1).then_some(meta.lap_count.total_laps);
    store.mark_live_ingested(session_key, &stamp, total_laps).await?;

    info!(session_key, "final snapshot persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pit(driver: u32, lap: u32) -> PitStop {
        PitStop {
            session_key: 1,
            driver_number: driver,
            pit_duration: None,
            lap_number: lap,
            date: String::new(),
        }
    }

    fn stint(driver: u32, number: u32, start: u32, end: u32) -> Stint {
        Stint {
            session_key: 1,
            driver_number: driver,
            stint_number: number,
            compound: "MEDIUM".into(),
            tyre_age_at_start: 0,
            lap_start: start,
            lap_end: end,
        }
    }

    #[test]
    fn stop_numbers_follow_lap_order_per_driver() {
        // Arrival order has 44's second stop first; numbering sorts by lap.
        let stops = vec![pit(44, 30), pit(44, 12), pit(1, 20)];
        let numbered = numbered_pit_stops(&stops);

        let find = |driver, lap| {
            numbered
                .iter()
                .find(|(p, _)| p.driver_number == driver && p.lap_number == lap)
                .map(|(_, n)| *n)
                .unwrap()
        };
        assert_eq!(find(44, 12), 1);
        assert_eq!(find(44, 30), 2);
        assert_eq!(find(1, 20), 1);
    }

    #[test]
    fn stint_lookup_honors_open_end() {
        let stints = vec![stint(44, 1, 1, 20), stint(44, 2, 21, 0)];
        assert_eq!(find_stint(&stints, 44, 5).unwrap().stint_number, 1);
        assert_eq!(find_stint(&stints, 44, 20).unwrap().stint_number, 1);
        assert_eq!(find_stint(&stints, 44, 40).unwrap().stint_number, 2);
        assert!(find_stint(&stints, 1, 5).is_none());
    }

    #[test]
    fn bests_track_minimums_and_trap_maximum() {
        let lap = |n, dur, s1, st| Lap {
            session_key: 1,
            driver_number: 44,
            lap_number: n,
            lap_duration: dur,
            duration_sector_1: s1,
            duration_sector_2: None,
            duration_sector_3: None,
            is_pit_out_lap: false,
            st_speed: st,
            date_start: String::new(),
        };
        let laps = vec![
            lap(1, Some(92.0), Some(30.0), Some(310.0)),
            lap(2, Some(90.5), Some(29.1), Some(325.0)),
            lap(3, None, Some(29.8), None),
        ];
        let bests = driver_bests(&laps);
        let b = bests.get(&44).unwrap();
        assert_eq!(b.best_time, Some(90.5));
        assert_eq!(b.best_lap_number, Some(2));
        assert_eq!(b.best_s1, Some(29.1));
        assert_eq!(b.best_trap_speed, Some(325.0));
    }

    #[test]
    fn missing_blob_parses_to_default() {
        let topics = HashMap::new();
        let laps: Vec<Lap> = parse_blob(&topics, "laps");
        assert!(laps.is_empty());
        let meta: MetaBlob = parse_blob(&topics, "meta");
        assert!(meta.session.is_none());
    }
}
