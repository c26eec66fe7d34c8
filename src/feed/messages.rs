//! Typed raw payloads for every feed topic.
//!
//! The hub delivers partial deltas: any field may be absent, and
//! collection-valued fields may carry only the entries that changed. Every
//! struct here is therefore all-optional with `#[serde(default)]`, in the
//! feed's PascalCase naming.
//!
//! Merge-topic payloads implement [`ApplyDelta`]: a typed recursive merge
//! with explicit per-field rules - nested objects recurse, scalars and
//! arrays are replaced wholesale, map-valued fields merge per key.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Typed recursive delta merge.
pub trait ApplyDelta {
    /// Merge `delta` into `self`. Present fields win; absent fields leave
    /// the accumulated value untouched.
    fn apply(&mut self, delta: Self);
}

/// Replace-on-present rule for scalar fields.
fn replace<T>(slot: &mut Option<T>, delta: Option<T>) {
    if delta.is_some() {
        *slot = delta;
    }
}

/// Recurse-on-present rule for nested object fields.
fn recurse<T: ApplyDelta>(slot: &mut Option<T>, delta: Option<T>) {
    match (slot.as_mut(), delta) {
        (Some(current), Some(delta)) => current.apply(delta),
        (None, Some(delta)) => *slot = Some(delta),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// IndexMap - collections keyed by stringified index or racing number
// ---------------------------------------------------------------------------

/// A collection the feed delivers either as an index-keyed object (deltas)
/// or a plain array (initial snapshots).
///
/// Deserialization is lenient per entry: values that do not match `T`
/// (roster metadata keys and the like) are skipped rather than failing the
/// whole payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndexMap<T>(pub BTreeMap<String, T>);

impl<T> Default for IndexMap<T> {
    fn default() -> Self {
        IndexMap(BTreeMap::new())
    }
}

impl<T> IndexMap<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.get(key)
    }

    /// Entries in feed order: numeric keys ascending, then the rest
    /// lexically. BTreeMap alone would put `"10"` before `"2"`.
    pub fn entries_ordered(&self) -> Vec<(&str, &T)> {
        let mut entries: Vec<(&str, &T)> = self.0.iter().map(|(k, v)| (k.as_str(), v)).collect();
        entries.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        });
        entries
    }

    /// Merge another map into this one, recursing into entries present on
    /// both sides.
    pub fn merge(&mut self, delta: IndexMap<T>)
    where
        T: ApplyDelta,
    {
        for (key, value) in delta.0 {
            match self.0.entry(key) {
                std::collections::btree_map::Entry::Occupied(mut e) => e.get_mut().apply(value),
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert(value);
                }
            }
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for IndexMap<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let mut map = BTreeMap::new();
        match raw {
            serde_json::Value::Object(obj) => {
                for (key, value) in obj {
                    if let Ok(parsed) = serde_json::from_value(value) {
                        map.insert(key, parsed);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for (idx, value) in items.into_iter().enumerate() {
                    if let Ok(parsed) = serde_json::from_value(value) {
                        map.insert(idx.to_string(), parsed);
                    }
                }
            }
            _ => {}
        }
        Ok(IndexMap(map))
    }
}

// ---------------------------------------------------------------------------
// TimingData
// ---------------------------------------------------------------------------

/// Per-driver timing lines keyed by racing number.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimingData {
    pub lines: IndexMap<TimingLine>,
}

impl ApplyDelta for TimingData {
    fn apply(&mut self, delta: Self) {
        self.lines.merge(delta.lines);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimingLine {
    pub racing_number: Option<String>,
    pub position: Option<String>,
    pub gap_to_leader: Option<String>,
    pub interval_to_position_ahead: Option<IntervalAhead>,
    pub number_of_laps: Option<u32>,
    pub last_lap_time: Option<TimedValue>,
    pub best_lap_time: Option<TimedValue>,
    pub sectors: IndexMap<SectorTime>,
    pub speeds: Option<SpeedTraps>,
    pub in_pit: Option<bool>,
    pub pit_out: Option<bool>,
    pub retired: Option<bool>,
    pub stopped: Option<bool>,
    pub knocked_out: Option<bool>,
}

impl ApplyDelta for TimingLine {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.racing_number, delta.racing_number);
        replace(&mut self.position, delta.position);
        replace(&mut self.gap_to_leader, delta.gap_to_leader);
        recurse(&mut self.interval_to_position_ahead, delta.interval_to_position_ahead);
        replace(&mut self.number_of_laps, delta.number_of_laps);
        recurse(&mut self.last_lap_time, delta.last_lap_time);
        recurse(&mut self.best_lap_time, delta.best_lap_time);
        self.sectors.merge(delta.sectors);
        recurse(&mut self.speeds, delta.speeds);
        replace(&mut self.in_pit, delta.in_pit);
        replace(&mut self.pit_out, delta.pit_out);
        replace(&mut self.retired, delta.retired);
        replace(&mut self.stopped, delta.stopped);
        replace(&mut self.knocked_out, delta.knocked_out);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct IntervalAhead {
    pub value: Option<String>,
    pub catching: Option<bool>,
}

impl ApplyDelta for IntervalAhead {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.value, delta.value);
        replace(&mut self.catching, delta.catching);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimedValue {
    pub value: Option<String>,
    pub personal_fastest: Option<bool>,
    pub overall_fastest: Option<bool>,
}

impl ApplyDelta for TimedValue {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.value, delta.value);
        replace(&mut self.personal_fastest, delta.personal_fastest);
        replace(&mut self.overall_fastest, delta.overall_fastest);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SectorTime {
    pub value: Option<String>,
    pub previous_value: Option<String>,
    pub stopped: Option<bool>,
    pub personal_fastest: Option<bool>,
    pub overall_fastest: Option<bool>,
}

impl ApplyDelta for SectorTime {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.value, delta.value);
        replace(&mut self.previous_value, delta.previous_value);
        replace(&mut self.stopped, delta.stopped);
        replace(&mut self.personal_fastest, delta.personal_fastest);
        replace(&mut self.overall_fastest, delta.overall_fastest);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTraps {
    #[serde(rename = "ST")]
    pub speed_trap: Option<TimedValue>,
    #[serde(rename = "I1")]
    pub intermediate_1: Option<TimedValue>,
    #[serde(rename = "I2")]
    pub intermediate_2: Option<TimedValue>,
    #[serde(rename = "FL")]
    pub finish_line: Option<TimedValue>,
}

impl ApplyDelta for SpeedTraps {
    fn apply(&mut self, delta: Self) {
        recurse(&mut self.speed_trap, delta.speed_trap);
        recurse(&mut self.intermediate_1, delta.intermediate_1);
        recurse(&mut self.intermediate_2, delta.intermediate_2);
        recurse(&mut self.finish_line, delta.finish_line);
    }
}

// ---------------------------------------------------------------------------
// DriverList
// ---------------------------------------------------------------------------

/// Driver roster keyed by racing number. The feed mixes metadata keys into
/// this map; lenient entry parsing drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverList(pub IndexMap<DriverEntry>);

impl ApplyDelta for DriverList {
    fn apply(&mut self, delta: Self) {
        self.0.merge(delta.0);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DriverEntry {
    pub racing_number: Option<String>,
    pub broadcast_name: Option<String>,
    pub full_name: Option<String>,
    pub tla: Option<String>,
    pub team_name: Option<String>,
    pub team_colour: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub headshot_url: Option<String>,
    pub country_code: Option<String>,
    pub line: Option<i64>,
}

impl ApplyDelta for DriverEntry {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.racing_number, delta.racing_number);
        replace(&mut self.broadcast_name, delta.broadcast_name);
        replace(&mut self.full_name, delta.full_name);
        replace(&mut self.tla, delta.tla);
        replace(&mut self.team_name, delta.team_name);
        replace(&mut self.team_colour, delta.team_colour);
        replace(&mut self.first_name, delta.first_name);
        replace(&mut self.last_name, delta.last_name);
        replace(&mut self.headshot_url, delta.headshot_url);
        replace(&mut self.country_code, delta.country_code);
        replace(&mut self.line, delta.line);
    }
}

// ---------------------------------------------------------------------------
// RaceControlMessages / TeamRadio - append-only collections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RaceControlMessages {
    pub messages: IndexMap<RaceControlEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RaceControlEntry {
    pub utc: Option<String>,
    pub category: Option<String>,
    pub flag: Option<String>,
    pub message: Option<String>,
    pub scope: Option<String>,
    pub racing_number: Option<String>,
    pub lap: Option<u32>,
    pub sector: Option<u32>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TeamRadio {
    pub captures: IndexMap<RadioCapture>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RadioCapture {
    pub racing_number: Option<String>,
    pub utc: Option<String>,
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// WeatherData - periodic full samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WeatherData {
    pub air_temp: Option<String>,
    pub track_temp: Option<String>,
    pub humidity: Option<String>,
    pub pressure: Option<String>,
    pub rainfall: Option<String>,
    pub wind_direction: Option<String>,
    pub wind_speed: Option<String>,
}

// ---------------------------------------------------------------------------
// TimingAppData - stints and grid positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimingAppData {
    pub lines: IndexMap<TimingAppLine>,
}

impl ApplyDelta for TimingAppData {
    fn apply(&mut self, delta: Self) {
        self.lines.merge(delta.lines);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimingAppLine {
    pub racing_number: Option<String>,
    pub grid_pos: Option<String>,
    pub line: Option<i64>,
    pub stints: IndexMap<StintEntry>,
}

impl ApplyDelta for TimingAppLine {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.racing_number, delta.racing_number);
        replace(&mut self.grid_pos, delta.grid_pos);
        replace(&mut self.line, delta.line);
        self.stints.merge(delta.stints);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StintEntry {
    pub compound: Option<String>,
    pub new: Option<String>,
    pub tyres_not_changed: Option<String>,
    pub total_laps: Option<u32>,
    pub start_laps: Option<u32>,
    pub lap_flags: Option<u32>,
}

impl ApplyDelta for StintEntry {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.compound, delta.compound);
        replace(&mut self.new, delta.new);
        replace(&mut self.tyres_not_changed, delta.tyres_not_changed);
        replace(&mut self.total_laps, delta.total_laps);
        replace(&mut self.start_laps, delta.start_laps);
        replace(&mut self.lap_flags, delta.lap_flags);
    }
}

// ---------------------------------------------------------------------------
// SessionInfo / LapCount / TrackStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionInfo {
    pub meeting: Option<Meeting>,
    pub archive_status: Option<ArchiveStatus>,
    pub key: Option<i64>,
    #[serde(rename = "Type")]
    pub session_type: Option<String>,
    pub name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub gmt_offset: Option<String>,
    pub path: Option<String>,
}

impl ApplyDelta for SessionInfo {
    fn apply(&mut self, delta: Self) {
        recurse(&mut self.meeting, delta.meeting);
        recurse(&mut self.archive_status, delta.archive_status);
        replace(&mut self.key, delta.key);
        replace(&mut self.session_type, delta.session_type);
        replace(&mut self.name, delta.name);
        replace(&mut self.start_date, delta.start_date);
        replace(&mut self.end_date, delta.end_date);
        replace(&mut self.gmt_offset, delta.gmt_offset);
        replace(&mut self.path, delta.path);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Meeting {
    pub key: Option<i64>,
    pub name: Option<String>,
    pub official_name: Option<String>,
    pub location: Option<String>,
    pub country: Option<Country>,
    pub circuit: Option<Circuit>,
}

impl ApplyDelta for Meeting {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.key, delta.key);
        replace(&mut self.name, delta.name);
        replace(&mut self.official_name, delta.official_name);
        replace(&mut self.location, delta.location);
        recurse(&mut self.country, delta.country);
        recurse(&mut self.circuit, delta.circuit);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Country {
    pub key: Option<i64>,
    pub code: Option<String>,
    pub name: Option<String>,
}

impl ApplyDelta for Country {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.key, delta.key);
        replace(&mut self.code, delta.code);
        replace(&mut self.name, delta.name);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Circuit {
    pub key: Option<i64>,
    pub short_name: Option<String>,
}

impl ApplyDelta for Circuit {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.key, delta.key);
        replace(&mut self.short_name, delta.short_name);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ArchiveStatus {
    pub status: Option<String>,
}

impl ApplyDelta for ArchiveStatus {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.status, delta.status);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LapCount {
    pub current_lap: Option<u32>,
    pub total_laps: Option<u32>,
}

impl ApplyDelta for LapCount {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.current_lap, delta.current_lap);
        replace(&mut self.total_laps, delta.total_laps);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TrackStatus {
    pub status: Option<String>,
    pub message: Option<String>,
}

impl ApplyDelta for TrackStatus {
    fn apply(&mut self, delta: Self) {
        replace(&mut self.status, delta.status);
        replace(&mut self.message, delta.message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timing_line_delta_keeps_unmentioned_fields() {
        let mut line: TimingLine =
            serde_json::from_value(json!({"Position": "3", "NumberOfLaps": 12})).unwrap();
        let delta: TimingLine = serde_json::from_value(json!({"GapToLeader": "+4.2"})).unwrap();
        line.apply(delta);

        assert_eq!(line.position.as_deref(), Some("3"));
        assert_eq!(line.number_of_laps, Some(12));
        assert_eq!(line.gap_to_leader.as_deref(), Some("+4.2"));
    }

    #[test]
    fn sector_map_merges_per_key() {
        let mut line: TimingLine =
            serde_json::from_value(json!({"Sectors": {"0": {"Value": "28.1"}}})).unwrap();
        let delta: TimingLine =
            serde_json::from_value(json!({"Sectors": {"1": {"Value": "31.9"}}})).unwrap();
        line.apply(delta);

        assert_eq!(line.sectors.get("0").unwrap().value.as_deref(), Some("28.1"));
        assert_eq!(line.sectors.get("1").unwrap().value.as_deref(), Some("31.9"));
    }

    #[test]
    fn nested_timed_value_recurses() {
        let mut line: TimingLine = serde_json::from_value(
            json!({"LastLapTime": {"Value": "1:22.167", "PersonalFastest": true}}),
        )
        .unwrap();
        let delta: TimingLine =
            serde_json::from_value(json!({"LastLapTime": {"OverallFastest": true}})).unwrap();
        line.apply(delta);

        let llt = line.last_lap_time.unwrap();
        assert_eq!(llt.value.as_deref(), Some("1:22.167"));
        assert_eq!(llt.personal_fastest, Some(true));
        assert_eq!(llt.overall_fastest, Some(true));
    }

    #[test]
    fn index_map_accepts_array_and_object_shapes() {
        let from_array: IndexMap<RaceControlEntry> =
            serde_json::from_value(json!([{"Message": "GREEN LIGHT"}, {"Message": "YELLOW"}]))
                .unwrap();
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_array.get("0").unwrap().message.as_deref(), Some("GREEN LIGHT"));

        let from_object: IndexMap<RaceControlEntry> =
            serde_json::from_value(json!({"4": {"Message": "DRS ENABLED"}})).unwrap();
        assert_eq!(from_object.get("4").unwrap().message.as_deref(), Some("DRS ENABLED"));
    }

    #[test]
    fn index_map_orders_numeric_keys_numerically() {
        let map: IndexMap<RaceControlEntry> = serde_json::from_value(json!({
            "2": {"Message": "B"},
            "10": {"Message": "C"},
            "1": {"Message": "A"}
        }))
        .unwrap();
        let order: Vec<&str> = map.entries_ordered().into_iter().map(|(k, _)| k).collect();
        assert_eq!(order, vec!["1", "2", "10"]);
    }

    #[test]
    fn driver_list_skips_metadata_keys() {
        let list: DriverList = serde_json::from_value(json!({
            "1": {"RacingNumber": "1", "Tla": "VER"},
            "_kf": true
        }))
        .unwrap();
        assert_eq!(list.0.len(), 1);
        assert_eq!(list.0.get("1").unwrap().tla.as_deref(), Some("VER"));
    }

    #[test]
    fn disjoint_line_deltas_union() {
        let mut timing: TimingData =
            serde_json::from_value(json!({"Lines": {"44": {"Position": "1"}}})).unwrap();
        let delta: TimingData =
            serde_json::from_value(json!({"Lines": {"81": {"Position": "2"}}})).unwrap();
        timing.apply(delta);

        assert_eq!(timing.lines.len(), 2);
        assert_eq!(timing.lines.get("44").unwrap().position.as_deref(), Some("1"));
        assert_eq!(timing.lines.get("81").unwrap().position.as_deref(), Some("2"));
    }

    #[test]
    fn session_info_merges_meeting_recursively() {
        let mut info: SessionInfo = serde_json::from_value(json!({
            "Key": 9999,
            "Meeting": {"Name": "Bahrain Grand Prix", "Country": {"Code": "BRN"}}
        }))
        .unwrap();
        let delta: SessionInfo = serde_json::from_value(json!({
            "Meeting": {"Circuit": {"ShortName": "Sakhir"}}
        }))
        .unwrap();
        info.apply(delta);

        let meeting = info.meeting.unwrap();
        assert_eq!(meeting.name.as_deref(), Some("Bahrain Grand Prix"));
        assert_eq!(meeting.country.unwrap().code.as_deref(), Some("BRN"));
        assert_eq!(meeting.circuit.unwrap().short_name.as_deref(), Some("Sakhir"));
    }
}
