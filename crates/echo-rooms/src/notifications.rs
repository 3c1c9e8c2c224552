//! Room notification vocabulary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How loudly a room notifies, from most to least noisy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomNotifState {
    AllMessagesLoud,
    AllMessages,
    MentionsOnly,
    Mute,
}

impl fmt::Display for RoomNotifState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoomNotifState::AllMessagesLoud => "all_messages_loud",
            RoomNotifState::AllMessages => "all_messages",
            RoomNotifState::MentionsOnly => "mentions_only",
            RoomNotifState::Mute => "mute",
        };
        f.write_str(name)
    }
}

/// Keys a room chamber caches optimistic overrides under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedRoomKey {
    NotificationVolume,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notif_state_wire_names_are_stable() {
        let pairs = [
            (RoomNotifState::AllMessagesLoud, "\"all_messages_loud\""),
            (RoomNotifState::AllMessages, "\"all_messages\""),
            (RoomNotifState::MentionsOnly, "\"mentions_only\""),
            (RoomNotifState::Mute, "\"mute\""),
        ];
        for (state, wire) in pairs {
            assert_eq!(serde_json::to_string(&state).expect("serialize"), wire);
            let back: RoomNotifState = serde_json::from_str(wire).expect("deserialize");
            assert_eq!(back, state);
        }
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(RoomNotifState::MentionsOnly.to_string(), "mentions_only");
        assert_eq!(
            serde_json::to_string(&CachedRoomKey::NotificationVolume).expect("serialize"),
            "\"notification_volume\""
        );
    }
}
