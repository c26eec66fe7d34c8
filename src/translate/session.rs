//! Session metadata, lap count, and track status summaries for the
//! combined meta blob.

use super::records::{LapCountSummary, MetaBlob, SessionMeta, TrackStatusSummary};
use crate::state::AccumulatedState;
use chrono::{DateTime, Datelike, Utc};

/// Session metadata from the merged `SessionInfo` snapshot. A snapshot
/// without a session key is too incomplete to persist.
pub fn session_meta(state: &AccumulatedState, now: DateTime<Utc>) -> Option<SessionMeta> {
    let info = &state.session_info;
    let session_key = info.key?;

    let meeting = info.meeting.as_ref();
    let country = meeting.and_then(|m| m.country.as_ref());
    let circuit = meeting.and_then(|m| m.circuit.as_ref());

    let year = info
        .start_date
        .as_deref()
        .and_then(|d| d.get(..4))
        .and_then(|y| y.parse().ok())
        .unwrap_or_else(|| now.year());

    Some(SessionMeta {
        session_key,
        session_name: info.name.clone().unwrap_or_default(),
        session_type: info.session_type.clone().unwrap_or_default(),
        date_start: info.start_date.clone().unwrap_or_default(),
        date_end: info.end_date.clone().unwrap_or_default(),
        gmt_offset: info.gmt_offset.clone().unwrap_or_default(),
        country_key: country.and_then(|c| c.key).unwrap_or(0),
        country_code: country.and_then(|c| c.code.clone()).unwrap_or_default(),
        country_name: country.and_then(|c| c.name.clone()).unwrap_or_default(),
        circuit_key: circuit.and_then(|c| c.key).unwrap_or(0),
        circuit_short_name: circuit.and_then(|c| c.short_name.clone()).unwrap_or_default(),
        location: meeting.and_then(|m| m.location.clone()).unwrap_or_default(),
        year,
    })
}

pub fn meta_blob(state: &AccumulatedState, now: DateTime<Utc>) -> MetaBlob {
    MetaBlob {
        session: session_meta(state, now),
        lap_count: LapCountSummary {
            current_lap: state.lap_count.current_lap.unwrap_or(1),
            total_laps: state.lap_count.total_laps.unwrap_or(1),
        },
        track_status: TrackStatusSummary {
            status: state.track_status.status.clone().unwrap_or_else(|| "AllClear".to_string()),
            message: state.track_status.message.clone().unwrap_or_default(),
        },
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

    #[test]
    fn meta_requires_session_key() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::SessionInfo, json!({"Name": "Race"}));
        assert!(session_meta(&state, now()).is_none());
    }

    #[test]
    fn full_session_info_maps_through() {
        let mut state = AccumulatedState::new();
        state.handle_topic(
            Topic::SessionInfo,
            json!({
                "Key": 9999,
                "Name": "Race",
                "Type": "Race",
                "StartDate": "2026-03-08T15:00:00",
                "EndDate": "2026-03-08T17:00:00",
                "GmtOffset": "03:00:00",
                "Meeting": {
                    "Location": "Sakhir",
                    "Country": {"Key": 36, "Code": "BRN", "Name": "Bahrain"},
                    "Circuit": {"Key": 63, "ShortName": "Sakhir"}
                }
            }),
        );

        let meta = session_meta(&state, now()).unwrap();
        assert_eq!(meta.session_key, 9999);
        assert_eq!(meta.year, 2026);
        assert_eq!(meta.country_code, "BRN");
        assert_eq!(meta.circuit_short_name, "Sakhir");
        assert_eq!(meta.location, "Sakhir");
    }

    #[test]
    fn year_falls_back_to_clock() {
        let mut state = AccumulatedState::new();
        state.handle_topic(Topic::SessionInfo, json!({"Key": 9999}));
        assert_eq!(session_meta(&state, now()).unwrap().year, 2026);
    }

    #[test]
    fn blob_defaults_without_status_topics() {
        let blob = meta_blob(&AccumulatedState::new(), now());
        assert!(blob.session.is_none());
        assert_eq!(blob.lap_count.current_lap, 1);
        assert_eq!(blob.track_status.status, "AllClear");
    }
}
