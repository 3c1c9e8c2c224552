//! Optimistic notification settings for a single room.

use std::collections::HashMap;
use std::sync::Arc;

use echo_core::chamber::EchoChamber;
use echo_core::context::{ContextTransactionState, EchoContext};
use echo_core::effect::{effect, noop_effect, EffectError};
use echo_core::signal::Subscription;
use echo_core::transaction::EchoTransaction;
use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{AccountData, NotificationSettings, RoomId};
use crate::notifications::{CachedRoomKey, RoomNotifState};

pub(crate) const AUDIT_CHANGE_NOTIFICATIONS: &str = "Change notification settings";

/// Binds an [`EchoContext`] to the room whose changes it tracks.
pub struct RoomEchoContext {
    room: RoomId,
    inner: Arc<EchoContext>,
}

impl RoomEchoContext {
    fn new(room: RoomId) -> Self {
        Self {
            room,
            inner: EchoContext::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room
    }

    pub fn state(&self) -> ContextTransactionState {
        self.inner.state()
    }

    pub fn first_failed_at(&self) -> Option<OffsetDateTime> {
        self.inner.first_failed_at()
    }

    pub fn subscribe(&self) -> Subscription<ContextTransactionState> {
        self.inner.subscribe()
    }

    pub fn transactions(&self) -> Vec<Arc<EchoTransaction>> {
        self.inner.transactions()
    }

    pub(crate) fn inner(&self) -> &Arc<EchoContext> {
        &self.inner
    }
}

/// Room-scoped echo chamber for notification volume.
///
/// Keeps a mirror of server-confirmed state fed by the client's account-data
/// stream. Volume writes go through the optimistic cache; any confirmation
/// round-trip retires the local override, whether or not it matches what was
/// requested.
pub struct RoomEchoChamber {
    context: RoomEchoContext,
    chamber: EchoChamber<CachedRoomKey, RoomNotifState>,
    properties: Arc<RwLock<HashMap<CachedRoomKey, RoomNotifState>>>,
    client: RwLock<Option<Arc<dyn NotificationSettings>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl RoomEchoChamber {
    pub fn new(room: RoomId) -> Arc<Self> {
        let context = RoomEchoContext::new(room);
        let properties = Arc::new(RwLock::new(HashMap::new()));
        let confirmed = properties.clone();
        let chamber = EchoChamber::new(context.inner().clone(), move |key: &CachedRoomKey| {
            confirmed.read().get(key).copied()
        });
        Arc::new(Self {
            context,
            chamber,
            properties,
            client: RwLock::new(None),
            watcher: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &RoomEchoContext {
        &self.context
    }

    /// Subscribe to keys whose visible value may have changed.
    pub fn subscribe(&self) -> broadcast::Receiver<CachedRoomKey> {
        self.chamber.subscribe()
    }

    /// Swap the protocol client. Clears the confirmed mirror, stops watching
    /// the old client's account data, and with a new client present starts a
    /// fresh watcher and recomputes confirmed state immediately.
    ///
    /// Must be called from within a tokio runtime when a client is attached.
    pub fn set_client(self: &Arc<Self>, client: Option<Arc<dyn NotificationSettings>>) {
        self.properties.write().clear();
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        *self.client.write() = client.clone();

        let Some(client) = client else {
            debug!(target = "echo.rooms", room = %self.context.room_id(), "client detached");
            return;
        };

        let mut account_data = client.subscribe_account_data();
        let weak = Arc::downgrade(self);
        let room = self.context.room_id().clone();
        let watcher = tokio::spawn(async move {
            loop {
                match account_data.recv().await {
                    Ok(AccountData::PushRules) => {
                        let Some(chamber) = weak.upgrade() else { break };
                        chamber.handle_push_rules_update();
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(
                            target = "echo.rooms",
                            room = %room,
                            skipped,
                            "account data watcher lagged"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.watcher.lock() = Some(watcher);

        self.update_notification_volume();
    }

    /// Visible notification volume: the in-flight override if one exists,
    /// else the confirmed mirror.
    pub fn notification_volume(&self) -> Option<RoomNotifState> {
        self.chamber.get_value(&CachedRoomKey::NotificationVolume)
    }

    /// Optimistically change the room's notification volume.
    ///
    /// The new volume is visible to readers immediately; the client call runs
    /// in the background. Reversion is implicit: the next confirmed
    /// account-data event overwrites whatever the optimistic write left
    /// behind, so the revert step has nothing to do.
    pub fn set_notification_volume(&self, volume: RoomNotifState) {
        let Some(client) = self.client.read().clone() else {
            warn!(
                target = "echo.rooms",
                room = %self.context.room_id(),
                "no client attached; dropping notification volume change"
            );
            return;
        };

        debug!(
            target = "echo.rooms",
            room = %self.context.room_id(),
            volume = %volume,
            "applying notification volume optimistically"
        );
        let room = self.context.room_id().clone();
        let run = effect(move || {
            let client = client.clone();
            let room = room.clone();
            async move {
                client
                    .set_room_notif_state(&room, volume)
                    .await
                    .map_err(|err| EffectError::new(err.to_string()))
            }
        });
        self.chamber.set_value(
            AUDIT_CHANGE_NOTIFICATIONS,
            CachedRoomKey::NotificationVolume,
            volume,
            run,
            noop_effect(),
        );
    }

    /// Account data changed upstream; recompute when the freshly queried
    /// state differs from the mirror, or when an optimistic override is
    /// waiting on exactly this kind of confirmation.
    fn handle_push_rules_update(&self) {
        let confirmed = self.confirmed_state();
        let mirrored = self
            .properties
            .read()
            .get(&CachedRoomKey::NotificationVolume)
            .copied();
        if confirmed != mirrored || self.chamber.has_override(&CachedRoomKey::NotificationVolume) {
            self.update_notification_volume();
        }
    }

    /// Refresh the confirmed mirror from the client and retire any local
    /// override for the volume key. Runs unconditionally so a confirmation
    /// that disagrees with the requested value still wins.
    fn update_notification_volume(&self) {
        let confirmed = self.confirmed_state();
        debug!(
            target = "echo.rooms",
            room = %self.context.room_id(),
            volume = ?confirmed,
            "confirmed notification state refreshed"
        );
        {
            let mut properties = self.properties.write();
            match confirmed {
                Some(state) => {
                    properties.insert(CachedRoomKey::NotificationVolume, state);
                }
                None => {
                    properties.remove(&CachedRoomKey::NotificationVolume);
                }
            }
        }
        self.chamber.mark_echo_received(&CachedRoomKey::NotificationVolume);
        self.chamber.announce(CachedRoomKey::NotificationVolume);
    }

    fn confirmed_state(&self) -> Option<RoomNotifState> {
        let client = self.client.read().clone();
        client.and_then(|client| client.room_notif_state(self.context.room_id()))
    }
}

impl Drop for RoomEchoChamber {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.abort();
        }
        self.context.inner().destroy();
    }
}
