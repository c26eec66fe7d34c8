//! Race control message translation.

use super::records::RaceControlMessage;
use crate::feed::messages::RaceControlEntry;
use chrono::{DateTime, Utc};

pub fn race_control_messages(
    entries: &[RaceControlEntry],
    session_key: i64,
    now: DateTime<Utc>,
) -> Vec<RaceControlMessage> {
    let fallback = now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
    entries
        .iter()
        .map(|entry| RaceControlMessage {
            session_key,
            date: entry.utc.clone().unwrap_or_else(|| fallback.clone()),
            category: entry.category.clone().unwrap_or_else(|| "Other".to_string()),
            flag: entry.flag.clone(),
            message: entry.message.clone().unwrap_or_default(),
            scope: entry.scope.clone(),
            driver_number: entry.racing_number.as_deref().and_then(|n| n.parse().ok()),
            lap_number: entry.lap,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-03-08T14:00:00Z".parse().unwrap()
    }

    #[test]
    fn entry_fields_map_through() {
        let entry = RaceControlEntry {
            utc: Some("2026-03-08T14:03:11".into()),
            category: Some("Flag".into()),
            flag: Some("YELLOW".into()),
            message: Some("YELLOW IN TRACK SECTOR 7".into()),
            scope: Some("Sector".into()),
            racing_number: Some("44".into()),
            lap: Some(12),
            ..Default::default()
        };
        let out = race_control_messages(&[entry], 9999, now());
        assert_eq!(out[0].date, "2026-03-08T14:03:11");
        assert_eq!(out[0].category, "Flag");
        assert_eq!(out[0].driver_number, Some(44));
        assert_eq!(out[0].lap_number, Some(12));
    }

    #[test]
    fn missing_fields_get_defaults() {
        let out = race_control_messages(&[RaceControlEntry::default()], 9999, now());
        assert_eq!(out[0].category, "Other");
        assert_eq!(out[0].date, "2026-03-08T14:00:00.000Z");
        assert_eq!(out[0].driver_number, None);
    }
}
