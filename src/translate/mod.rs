//! Translation from accumulated feed state into normalized records.
//!
//! Translators are pure over their inputs so a flush can re-run them
//! freely. Where history matters (laps, pit stops) the caller owns the
//! carried state and threads it through.

pub mod drivers;
pub mod race_control;
pub mod records;
pub mod session;
pub mod stints;
pub mod team_radio;
pub mod timing;
pub mod weather;

pub use records::{
    Driver, Interval, Lap, LapCountSummary, MetaBlob, PitStop, Position, RaceControlMessage,
    SessionMeta, Stint, TeamRadioCapture, TrackStatusSummary, WeatherSample,
};
