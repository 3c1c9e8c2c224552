//! In-memory collaborators for exercising echo flows without a real client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::client::{AccountData, ClientError, NotificationSettings, RoomId};
use crate::notifications::RoomNotifState;
use crate::toasts::{Toast, ToastId, ToastSink};

const ACCOUNT_DATA_CAPACITY: usize = 16;

/// Notification-settings client backed by a plain map.
///
/// A successful `set_room_notif_state` updates the confirmed map but does not
/// emit account data on its own; callers decide when the confirmation
/// round-trips by calling [`push_rules_changed`](Self::push_rules_changed).
pub struct MockClient {
    states: RwLock<HashMap<RoomId, RoomNotifState>>,
    fail_next: AtomicBool,
    account_data: broadcast::Sender<AccountData>,
    set_calls: Mutex<Vec<(RoomId, RoomNotifState)>>,
}

impl MockClient {
    pub fn new() -> Self {
        let (account_data, _) = broadcast::channel(ACCOUNT_DATA_CAPACITY);
        Self {
            states: RwLock::new(HashMap::new()),
            fail_next: AtomicBool::new(false),
            account_data,
            set_calls: Mutex::new(Vec::new()),
        }
    }

    /// Seed or overwrite the confirmed state for a room.
    pub fn set_state(&self, room: &RoomId, state: RoomNotifState) {
        self.states.write().insert(room.clone(), state);
    }

    pub fn clear_state(&self, room: &RoomId) {
        self.states.write().remove(room);
    }

    /// Make the next `set_room_notif_state` call fail. One-shot.
    pub fn fail_next_set(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Emit a push-rules account-data event to every subscriber.
    pub fn push_rules_changed(&self) {
        let _ = self.account_data.send(AccountData::PushRules);
    }

    pub fn send_account_data(&self, data: AccountData) {
        let _ = self.account_data.send(data);
    }

    /// Every `set_room_notif_state` call seen so far, failed ones included.
    pub fn set_calls(&self) -> Vec<(RoomId, RoomNotifState)> {
        self.set_calls.lock().clone()
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSettings for MockClient {
    fn room_notif_state(&self, room: &RoomId) -> Option<RoomNotifState> {
        self.states.read().get(room).copied()
    }

    async fn set_room_notif_state(
        &self,
        room: &RoomId,
        state: RoomNotifState,
    ) -> Result<(), ClientError> {
        self.set_calls.lock().push((room.clone(), state));
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(ClientError::Http {
                status: 500,
                message: "injected failure".to_string(),
            });
        }
        self.states.write().insert(room.clone(), state);
        Ok(())
    }

    fn subscribe_account_data(&self) -> broadcast::Receiver<AccountData> {
        self.account_data.subscribe()
    }
}

/// Toast sink that records calls instead of rendering anything.
#[derive(Default)]
pub struct RecordingToastSink {
    added: Mutex<Vec<(ToastId, Toast)>>,
    removed: Mutex<Vec<ToastId>>,
}

impl RecordingToastSink {
    pub fn added(&self) -> Vec<(ToastId, Toast)> {
        self.added.lock().clone()
    }

    pub fn removed(&self) -> Vec<ToastId> {
        self.removed.lock().clone()
    }

    /// Toasts currently on screen.
    pub fn shown(&self) -> usize {
        self.added.lock().len() - self.removed.lock().len()
    }
}

impl ToastSink for RecordingToastSink {
    fn add_toast(&self, toast: Toast) -> ToastId {
        let id = ToastId::new();
        self.added.lock().push((id, toast));
        id
    }

    fn remove_toast(&self, id: ToastId) {
        self.removed.lock().push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_updates_confirmed_state_and_records_call() {
        let client = MockClient::new();
        let room = RoomId::from("!beach:example.org");

        client
            .set_room_notif_state(&room, RoomNotifState::Mute)
            .await
            .expect("set should succeed");

        assert_eq!(client.room_notif_state(&room), Some(RoomNotifState::Mute));
        assert_eq!(client.set_calls(), vec![(room, RoomNotifState::Mute)]);
    }

    #[tokio::test]
    async fn fail_next_set_rejects_exactly_once() {
        let client = MockClient::new();
        let room = RoomId::from("!beach:example.org");
        client.set_state(&room, RoomNotifState::Mute);
        client.fail_next_set();

        let err = client
            .set_room_notif_state(&room, RoomNotifState::AllMessages)
            .await
            .expect_err("first set should fail");
        assert!(matches!(err, ClientError::Http { status: 500, .. }));
        assert_eq!(client.room_notif_state(&room), Some(RoomNotifState::Mute));

        client
            .set_room_notif_state(&room, RoomNotifState::AllMessages)
            .await
            .expect("second set should succeed");
        assert_eq!(
            client.room_notif_state(&room),
            Some(RoomNotifState::AllMessages)
        );
    }

    #[tokio::test]
    async fn account_data_reaches_all_subscribers() {
        let client = MockClient::new();
        let mut first = client.subscribe_account_data();
        let mut second = client.subscribe_account_data();

        client.push_rules_changed();
        client.send_account_data(AccountData::Other);

        assert_eq!(first.recv().await.expect("event"), AccountData::PushRules);
        assert_eq!(first.recv().await.expect("event"), AccountData::Other);
        assert_eq!(second.recv().await.expect("event"), AccountData::PushRules);
    }

    #[test]
    fn recording_sink_tracks_shown_toasts() {
        let sink = RecordingToastSink::default();
        let id = sink.add_toast(Toast::non_urgent("something failed"));
        assert_eq!(sink.shown(), 1);

        sink.remove_toast(id);
        assert_eq!(sink.shown(), 0);
        assert_eq!(sink.added()[0].1.message, "something failed");
        assert_eq!(sink.removed(), vec![id]);
    }
}
