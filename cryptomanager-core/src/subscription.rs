//! Subscription status and outcome types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConnectionError;

/// Topic name reported for user data subscriptions
pub const USER_UPDATES_TOPIC: &str = "UserUpdates";

/// Identifier of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl UserId {
    /// Key used to identify this user towards the exchange client library
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// Connection state of an upstream exchange stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    /// Connection lost, the exchange client is reconnecting
    Interrupted,
    /// Connection re-established after an interruption
    Restored,
    /// Connection lost and will not be restored
    Failed,
}

/// Status change of an exchange stream, forwarded to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub exchange: Option<String>,
    pub status: StreamStatus,
}

impl SubscriptionEvent {
    pub fn new(exchange: impl Into<String>, status: StreamStatus) -> Self {
        Self {
            exchange: Some(exchange.into()),
            status,
        }
    }

    /// Translate an exchange connectivity flag into a status event
    pub fn connectivity(exchange: impl Into<String>, connected: bool) -> Self {
        let status = if connected {
            StreamStatus::Restored
        } else {
            StreamStatus::Interrupted
        };
        Self::new(exchange, status)
    }
}

/// Per-exchange outcome of a subscribe call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResult {
    pub topic: String,
    pub exchange: String,
    pub error: Option<ConnectionError>,
}

impl SubscribeResult {
    pub fn connected(exchange: impl Into<String>) -> Self {
        Self {
            topic: USER_UPDATES_TOPIC.to_string(),
            exchange: exchange.into(),
            error: None,
        }
    }

    pub fn failed(exchange: impl Into<String>, error: ConnectionError) -> Self {
        Self {
            topic: USER_UPDATES_TOPIC.to_string(),
            exchange: exchange.into(),
            error: Some(error),
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_translation() {
        assert_eq!(
            SubscriptionEvent::connectivity("Binance", true).status,
            StreamStatus::Restored
        );
        assert_eq!(
            SubscriptionEvent::connectivity("Binance", false).status,
            StreamStatus::Interrupted
        );
    }

    #[test]
    fn test_subscribe_result_success() {
        assert!(SubscribeResult::connected("Kraken").success());
        let failed = SubscribeResult::failed("Kraken", ConnectionError::network("timeout"));
        assert!(!failed.success());
        assert_eq!(failed.topic, USER_UPDATES_TOPIC);
    }

    #[test]
    fn test_status_event_wire_format() {
        let event = SubscriptionEvent::new("Binance", StreamStatus::Interrupted);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "exchange": "Binance", "status": "interrupted" })
        );
    }
}
