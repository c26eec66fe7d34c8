//! Team radio capture translation. Relative capture paths are resolved
//! against the static asset host.

use super::records::TeamRadioCapture;
use crate::feed::messages::RadioCapture;
use chrono::{DateTime, Utc};

const STATIC_BASE: &str = "https://livetiming.formula1.com/static/";

fn recording_url(path: &str) -> String {
    if path.starts_with("http") {
        path.to_string()
    } else {
        format!("{STATIC_BASE}{path}")
    }
}

pub fn team_radio_captures(
    captures: &[RadioCapture],
    session_key: i64,
    now: DateTime<Utc>,
) -> Vec<TeamRadioCapture> {
    let fallback = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    captures
        .iter()
        .filter_map(|capture| {
            Some(TeamRadioCapture {
                session_key,
                driver_number: capture.racing_number.as_deref()?.parse().ok()?,
                date: capture.utc.clone().unwrap_or_else(|| fallback.clone()),
                recording_url: recording_url(capture.path.as_deref()?),
            })
        })
        .collect()
}
