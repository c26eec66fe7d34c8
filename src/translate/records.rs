//! Normalized records produced from accumulated state.
//!
//! These are the shapes persisted to the per-topic blob store and later
//! flattened into the archive tables. Field naming follows the store's
//! snake_case schema.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub session_key: i64,
    pub driver_number: u32,
    pub position: u32,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub session_key: i64,
    pub driver_number: u32,
    pub gap_to_leader: Option<f64>,
    pub interval: Option<f64>,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    pub session_key: i64,
    pub driver_number: u32,
    pub lap_number: u32,
    pub lap_duration: Option<f64>,
    pub duration_sector_1: Option<f64>,
    pub duration_sector_2: Option<f64>,
    pub duration_sector_3: Option<f64>,
    pub is_pit_out_lap: bool,
    pub st_speed: Option<f64>,
    pub date_start: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitStop {
    pub session_key: i64,
    pub driver_number: u32,
    /// Not delivered by the live feed; populated from archive sources only.
    pub pit_duration: Option<f64>,
    pub lap_number: u32,
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    pub session_key: i64,
    pub driver_number: u32,
    pub broadcast_name: String,
    pub full_name: String,
    pub name_acronym: String,
    pub team_name: String,
    pub team_colour: String,
    pub first_name: String,
    pub last_name: String,
    pub headshot_url: Option<String>,
    pub country_code: String,
    pub grid_position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub session_key: i64,
    pub date: String,
    pub air_temperature: f64,
    pub track_temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub rainfall: i64,
    pub wind_direction: f64,
    pub wind_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceControlMessage {
    pub session_key: i64,
    pub date: String,
    pub category: String,
    pub flag: Option<String>,
    pub message: String,
    pub scope: Option<String>,
    pub driver_number: Option<u32>,
    pub lap_number: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRadioCapture {
    pub session_key: i64,
    pub driver_number: u32,
    pub date: String,
    pub recording_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stint {
    pub session_key: i64,
    pub driver_number: u32,
    pub stint_number: u32,
    pub compound: String,
    pub tyre_age_at_start: u32,
    pub lap_start: u32,
    /// Zero when the stint is still open.
    pub lap_end: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_key: i64,
    pub session_name: String,
    pub session_type: String,
    pub date_start: String,
    pub date_end: String,
    pub gmt_offset: String,
    pub country_key: i64,
    pub country_code: String,
    pub country_name: String,
    pub circuit_key: i64,
    pub circuit_short_name: String,
    pub location: String,
    pub year: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LapCountSummary {
    pub current_lap: u32,
    pub total_laps: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackStatusSummary {
    pub status: String,
    pub message: String,
}

/// The `meta` blob: session identity plus the two live counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaBlob {
    pub session: Option<SessionMeta>,
    pub lap_count: LapCountSummary,
    pub track_status: TrackStatusSummary,
}
