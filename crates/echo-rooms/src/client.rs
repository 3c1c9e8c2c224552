//! Seam to the protocol client that owns authoritative room state.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::notifications::RoomNotifState;

/// Opaque room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Account-data events the client surfaces. Only push-rules updates carry
/// notification state; everything else is noise to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountData {
    PushRules,
    Other,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("client is not connected")]
    Unavailable,
    #[error("operation not permitted: {0}")]
    Denied(String),
}

/// Notification-settings surface of the protocol client.
///
/// `room_notif_state` is the synchronous authoritative read used for
/// read-through; `set_room_notif_state` performs the real mutation and its
/// resolution drives the owning transaction.
#[async_trait]
pub trait NotificationSettings: Send + Sync {
    fn room_notif_state(&self, room: &RoomId) -> Option<RoomNotifState>;

    async fn set_room_notif_state(
        &self,
        room: &RoomId,
        state: RoomNotifState,
    ) -> Result<(), ClientError>;

    fn subscribe_account_data(&self) -> broadcast::Receiver<AccountData>;
}
