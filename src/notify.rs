//! Status notification contract towards the player/session layer
//!
//! The queue core never serializes packets; it only decides which status
//! applies to a player and hands the fields to a [`NotificationSink`]. The
//! embedding layer turns these into whatever wire format it speaks.

use crate::types::{InstanceId, JoinFailReason, PlayerGuid, QueueKey};
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// One status update for a single player
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    /// Player left the queue (or was evicted)
    None { key: QueueKey },
    /// Player is waiting; carries the average wait and the group/solo flag
    Queued {
        key: QueueKey,
        #[serde(with = "duration_ms")]
        avg_wait: Duration,
        as_group: bool,
    },
    /// Player is invited and must confirm within the timeout
    NeedConfirmation {
        key: QueueKey,
        instance_id: InstanceId,
        #[serde(with = "duration_ms")]
        timeout: Duration,
    },
    /// Player is inside a running instance
    Active {
        key: QueueKey,
        instance_id: InstanceId,
        #[serde(with = "duration_ms")]
        elapsed: Duration,
    },
    /// The join request failed
    Failed {
        key: QueueKey,
        reason: JoinFailReason,
        offender: Option<PlayerGuid>,
    },
}

mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        value.num_milliseconds().serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        Ok(Duration::milliseconds(i64::deserialize(de)?))
    }
}

/// Trait for delivering status updates to players
///
/// Implementations must be cheap and non-blocking: the engine calls this
/// from inside its matching pass.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, guid: PlayerGuid, status: QueueStatus);
}

/// Notification sink that records updates for testing
#[derive(Debug, Default)]
pub struct MockNotificationSink {
    notifications: std::sync::Mutex<Vec<(PlayerGuid, QueueStatus)>>,
}

impl MockNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded notifications (for testing)
    pub fn notifications(&self) -> Vec<(PlayerGuid, QueueStatus)> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    /// All notifications delivered to one player (for testing)
    pub fn for_player(&self, guid: PlayerGuid) -> Vec<QueueStatus> {
        self.notifications()
            .into_iter()
            .filter(|(g, _)| *g == guid)
            .map(|(_, s)| s)
            .collect()
    }

    /// Clear recorded notifications (for testing)
    pub fn clear(&self) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.clear();
        }
    }
}

impl NotificationSink for MockNotificationSink {
    fn notify(&self, guid: PlayerGuid, status: QueueStatus) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push((guid, status));
        }
    }
}

/// Sink that drops every update, for embeddings that poll state instead
#[derive(Debug, Default)]
pub struct NullNotificationSink;

impl NotificationSink for NullNotificationSink {
    fn notify(&self, _guid: PlayerGuid, _status: QueueStatus) {}
}
