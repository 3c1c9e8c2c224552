//! Client attach/detach lifecycle across the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::client::RoomId;
use crate::mock::{MockClient, RecordingToastSink};
use crate::notifications::RoomNotifState;
use crate::store::EchoStore;

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn logout_detaches_chambers_and_login_restores_them() {
    let store = EchoStore::new(Arc::new(RecordingToastSink::default()));
    let old_client = Arc::new(MockClient::new());
    let room = RoomId::from("!lounge:example.org");
    old_client.set_state(&room, RoomNotifState::Mute);
    store.set_client(Some(old_client.clone()));

    let chamber = store.chamber_for_room(&room);
    assert_eq!(chamber.notification_volume(), Some(RoomNotifState::Mute));

    store.set_client(None);
    assert_eq!(chamber.notification_volume(), None);

    // Changes attempted while logged out are dropped, not queued.
    chamber.set_notification_volume(RoomNotifState::AllMessages);
    assert!(chamber.context().transactions().is_empty());
    assert_eq!(chamber.notification_volume(), None);

    // Events from the old client no longer reach the chamber.
    old_client.set_state(&room, RoomNotifState::AllMessagesLoud);
    old_client.push_rules_changed();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(chamber.notification_volume(), None);

    // A new login reattaches the same chamber instance.
    let new_client = Arc::new(MockClient::new());
    new_client.set_state(&room, RoomNotifState::AllMessagesLoud);
    store.set_client(Some(new_client.clone()));
    let reattached = store.chamber_for_room(&room);
    assert!(Arc::ptr_eq(&chamber, &reattached));
    assert_eq!(
        chamber.notification_volume(),
        Some(RoomNotifState::AllMessagesLoud)
    );

    // And the new client's account data stream is live.
    new_client.set_state(&room, RoomNotifState::MentionsOnly);
    new_client.push_rules_changed();
    wait_until("new client's events to land", || {
        chamber.notification_volume() == Some(RoomNotifState::MentionsOnly)
    })
    .await;
}
