//! Live session discovery via the static session-info endpoint.

use serde::Deserialize;
use tracing::{debug, warn};

const SESSION_INFO_URL: &str = "https://livetiming.formula1.com/static/SessionInfo.json";

/// The session the timing service currently reports, live or just ended.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSessionHandle {
    pub session_key: i64,
    pub name: String,
    pub session_type: String,
    pub is_complete: bool,
}

#[derive(Debug, Deserialize)]
struct SessionInfoResponse {
    #[serde(rename = "Key")]
    key: Option<i64>,
    #[serde(rename = "Type")]
    session_type: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "ArchiveStatus")]
    archive_status: Option<ArchiveStatus>,
}

#[derive(Debug, Deserialize)]
struct ArchiveStatus {
    #[serde(rename = "Status")]
    status: Option<String>,
}

/// Poll the static endpoint for the current session. Any failure - network,
/// non-2xx, undecodable body, missing key - reads as "nothing live" so the
/// caller's poll loop just tries again next tick.
pub async fn discover_live_session(client: &reqwest::Client) -> Option<LiveSessionHandle> {
    let response = match client
        .get(SESSION_INFO_URL)
        .header(reqwest::header::USER_AGENT, "BestHTTP")
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "session discovery request failed");
            return None;
        }
    };

    if !response.status().is_success() {
        debug!(status = %response.status(), "session info endpoint returned non-success");
        return None;
    }

    let info: SessionInfoResponse = match response.json().await {
        Ok(info) => info,
        Err(err) => {
            warn!(error = %err, "session info decode failed");
            return None;
        }
    };

    let session_key = info.key?;
    let is_complete = info
        .archive_status
        .as_ref()
        .and_then(|a| a.status.as_deref())
        .is_some_and(|s| s == "Complete");

    Some(LiveSessionHandle {
        session_key,
        name: info.name.unwrap_or_default(),
        session_type: info.session_type.unwrap_or_default(),
        is_complete,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_status_maps_to_flag() {
        let raw = serde_json::json!({
            "Key": 9999,
            "Type": "Race",
            "Name": "Race",
            "ArchiveStatus": {"Status": "Complete"}
        });
        let info: SessionInfoResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(info.key, Some(9999));
        assert_eq!(info.archive_status.unwrap().status.as_deref(), Some("Complete"));
    }

    #[test]
    fn missing_key_deserializes_to_none() {
        let info: SessionInfoResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(info.key.is_none());
    }
}
