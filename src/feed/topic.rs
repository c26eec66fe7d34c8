//! The closed set of feed topics the worker subscribes to.

/// A named category of real-time message delivered by the timing hub.
///
/// Dispatch on topics is exhaustive: a message naming anything outside this
/// set is dropped at the client boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Per-driver timing lines: position, gaps, laps, sectors, pit flags.
    TimingData,
    /// Driver roster keyed by racing number.
    DriverList,
    /// Race control message log (append-only).
    RaceControlMessages,
    /// Periodic full weather samples (append-only).
    WeatherData,
    /// Team radio captures (append-only).
    TeamRadio,
    /// Stints and grid positions per driver.
    TimingAppData,
    /// Session metadata: meeting, circuit, dates.
    SessionInfo,
    /// Current/total lap counters.
    LapCount,
    /// Coarse track status flag.
    TrackStatus,
    /// Liveness only; carries no state.
    Heartbeat,
}

/// Every topic in subscription order.
pub const ALL_TOPICS: [Topic; 10] = [
    Topic::TimingData,
    Topic::DriverList,
    Topic::RaceControlMessages,
    Topic::WeatherData,
    Topic::TeamRadio,
    Topic::TimingAppData,
    Topic::SessionInfo,
    Topic::LapCount,
    Topic::TrackStatus,
    Topic::Heartbeat,
];

impl Topic {
    /// The hub-side topic name.
    pub fn name(self) -> &'static str {
        match self {
            Topic::TimingData => "TimingData",
            Topic::DriverList => "DriverList",
            Topic::RaceControlMessages => "RaceControlMessages",
            Topic::WeatherData => "WeatherData",
            Topic::TeamRadio => "TeamRadio",
            Topic::TimingAppData => "TimingAppData",
            Topic::SessionInfo => "SessionInfo",
            Topic::LapCount => "LapCount",
            Topic::TrackStatus => "TrackStatus",
            Topic::Heartbeat => "Heartbeat",
        }
    }

    /// Look up a topic by its hub-side name.
    ///
    /// Snapshot keys sometimes arrive with a `.z` compression suffix; the
    /// base name is what identifies the topic.
    pub fn from_name(name: &str) -> Option<Self> {
        let base = name.strip_suffix(".z").unwrap_or(name);
        ALL_TOPICS.iter().copied().find(|t| t.name() == base)
    }

    /// Topic names as sent in the subscribe call.
    pub fn subscription_list() -> Vec<String> {
        ALL_TOPICS.iter().map(|t| t.name().to_string()).collect()
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for topic in ALL_TOPICS {
            assert_eq!(Topic::from_name(topic.name()), Some(topic));
        }
    }

    #[test]
    fn unknown_names_are_none() {
        assert_eq!(Topic::from_name("CarData"), None);
        assert_eq!(Topic::from_name(""), None);
    }

    #[test]
    fn compressed_suffix_is_stripped() {
        assert_eq!(Topic::from_name("TimingData.z"), Some(Topic::TimingData));
    }

    #[test]
    fn subscription_list_covers_all_topics() {
        let list = Topic::subscription_list();
        assert_eq!(list.len(), ALL_TOPICS.len());
        assert!(list.contains(&"Heartbeat".to_string()));
    }
}
