use serde::{Deserialize, Serialize};

/// A stopwatch lifecycle action. The relative order of these actions in the
/// event log is the sole input to timer reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StopwatchAction {
    Start,
    Break,
    Resume,
    Finish,
}

/// A browser activity action, recorded alongside stopwatch actions but
/// ignored by timer reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    TabOpen,
    TabClose,
    WebsiteVisit { tab_id: String, url: String },
}

/// One entry of a session's append-only event log.
///
/// Events are immutable once appended; only the coordinator is permitted to
/// append them, never a client directly. Timestamps are epoch milliseconds
/// assigned at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Stopwatch {
        #[serde(flatten)]
        action: StopwatchAction,
        timestamp_ms: i64,
    },
    Browser {
        #[serde(flatten)]
        action: BrowserAction,
        timestamp_ms: i64,
    },
}

impl SessionEvent {
    /// The logical creation time of the event, in epoch milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        match self {
            SessionEvent::Stopwatch { timestamp_ms, .. } => *timestamp_ms,
            SessionEvent::Browser { timestamp_ms, .. } => *timestamp_ms,
        }
    }

    /// Whether this is the `stopwatch:start` event that bootstraps a session
    /// from an initialized state into `active`.
    pub fn is_stopwatch_start(&self) -> bool {
        matches!(
            self,
            SessionEvent::Stopwatch {
                action: StopwatchAction::Start,
                ..
            }
        )
    }

    pub fn stopwatch(action: StopwatchAction, timestamp_ms: i64) -> Self {
        SessionEvent::Stopwatch {
            action,
            timestamp_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonic_rs::JsonValueTrait;

    #[test]
    fn stopwatch_event_wire_shape() {
        let event = SessionEvent::stopwatch(StopwatchAction::Start, 1000);
        let json = sonic_rs::to_string(&event).unwrap();
        let value: sonic_rs::Value = sonic_rs::from_str(&json).unwrap();

        assert_eq!(value["type"].as_str(), Some("stopwatch"));
        assert_eq!(value["action"].as_str(), Some("start"));
        assert_eq!(value["timestamp_ms"].as_i64(), Some(1000));

        let back: SessionEvent = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn website_visit_carries_payload() {
        let event = SessionEvent::Browser {
            action: BrowserAction::WebsiteVisit {
                tab_id: "tab-7".into(),
                url: "https://example.com".into(),
            },
            timestamp_ms: 42,
        };
        let json = sonic_rs::to_string(&event).unwrap();
        let back: SessionEvent = sonic_rs::from_str(&json).unwrap();
        assert_eq!(back, event);

        let value: sonic_rs::Value = sonic_rs::from_str(&json).unwrap();
        assert_eq!(value["action"].as_str(), Some("website_visit"));
        assert_eq!(value["tab_id"].as_str(), Some("tab-7"));
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = r#"{"type":"keyboard","action":"press","timestamp_ms":1}"#;
        assert!(sonic_rs::from_str::<SessionEvent>(raw).is_err());
    }
}
