//! Registry of room chambers and the cross-room failure notice.

use std::collections::HashMap;
use std::sync::Arc;

use echo_core::context::ContextTransactionState;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::{NotificationSettings, RoomId};
use crate::room_chamber::RoomEchoChamber;
use crate::toasts::{Toast, ToastId, ToastSink};

/// Message shown while any tracked change remains unsaved.
pub const ECHO_FAILURE_MESSAGE: &str = "Some of your changes could not be saved.";

/// Owns one [`RoomEchoChamber`] per room and watches their combined health.
///
/// Chambers are created lazily and persist for the life of the store; a
/// client logout only detaches the client from each chamber so a later login
/// can reattach without rebuilding them. Whenever any chamber's aggregate
/// state changes, the store re-checks the whole set and keeps exactly one
/// failure toast up while anything is broken.
pub struct EchoStore {
    chambers: RwLock<HashMap<RoomId, Arc<RoomEchoChamber>>>,
    client: RwLock<Option<Arc<dyn NotificationSettings>>>,
    toasts: Arc<dyn ToastSink>,
    active_toast: Mutex<Option<ToastId>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl EchoStore {
    pub fn new(toasts: Arc<dyn ToastSink>) -> Arc<Self> {
        Arc::new(Self {
            chambers: RwLock::new(HashMap::new()),
            client: RwLock::new(None),
            toasts,
            active_toast: Mutex::new(None),
            pumps: Mutex::new(Vec::new()),
        })
    }

    /// The chamber for `room`, created on first access. A new chamber
    /// inherits the active client and is wired into the store's health
    /// checks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn chamber_for_room(self: &Arc<Self>, room: &RoomId) -> Arc<RoomEchoChamber> {
        if let Some(existing) = self.chambers.read().get(room) {
            return existing.clone();
        }

        let mut chambers = self.chambers.write();
        if let Some(existing) = chambers.get(room) {
            return existing.clone();
        }

        debug!(target = "echo.store", room = %room, "creating echo chamber");
        let chamber = RoomEchoChamber::new(room.clone());
        chamber.set_client(self.client.read().clone());

        let mut health = chamber.context().subscribe();
        let weak = Arc::downgrade(self);
        let pump = tokio::spawn(async move {
            while health.changed().await.is_ok() {
                let Some(store) = weak.upgrade() else { break };
                store.check_contexts();
            }
        });
        self.pumps.lock().push(pump);

        chambers.insert(room.clone(), chamber.clone());
        chamber
    }

    /// Propagate a client attach or detach to every existing chamber.
    pub fn set_client(&self, client: Option<Arc<dyn NotificationSettings>>) {
        match &client {
            Some(_) => debug!(target = "echo.store", "client attached; propagating to chambers"),
            None => debug!(target = "echo.store", "client detached; chambers persist"),
        }
        *self.client.write() = client.clone();
        let chambers: Vec<Arc<RoomEchoChamber>> =
            self.chambers.read().values().cloned().collect();
        for chamber in &chambers {
            chamber.set_client(client.clone());
        }
    }

    /// Re-derive whether anything tracked is failing and reconcile the toast.
    /// Edge-triggered: the toast is added once when failures appear and
    /// removed once when they are gone, however often this runs.
    pub fn check_contexts(&self) {
        let failing = self
            .chambers
            .read()
            .values()
            .any(|chamber| chamber.context().state() == ContextTransactionState::PendingErrors);

        let mut active = self.active_toast.lock();
        if failing && active.is_none() {
            debug!(target = "echo.store", "tracked changes are failing; showing toast");
            *active = Some(self.toasts.add_toast(Toast::non_urgent(ECHO_FAILURE_MESSAGE)));
        } else if !failing {
            if let Some(id) = active.take() {
                debug!(target = "echo.store", "failures resolved; clearing toast");
                self.toasts.remove_toast(id);
            }
        }
    }
}

impl Drop for EchoStore {
    fn drop(&mut self) {
        for pump in self.pumps.lock().drain(..) {
            pump.abort();
        }
    }
}
