//! Typed status signalling for transactions and contexts.
//!
//! A [`Signal`] fans a small `Copy` status enum out to any number of
//! [`Subscription`]s over a tokio broadcast channel. Subscriptions can
//! filter for a subset of statuses, and closing the signal wakes every
//! subscriber with [`SignalClosed`] so teardown never leaks waiters.

use std::fmt;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Buffer depth per subscriber; a slow subscriber drops oldest statuses first.
pub const SIGNAL_CAPACITY: usize = 16;

/// Returned once a signal has been closed; no further statuses will arrive.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("signal closed")]
pub struct SignalClosed;

/// Marker bounds for status enums carried by a [`Signal`].
pub trait Status: Copy + Eq + fmt::Debug + Send + 'static {}

impl<T> Status for T where T: Copy + Eq + fmt::Debug + Send + 'static {}

/// Broadcast source for a single status enum.
///
/// Dropping a [`Subscription`] detaches only that subscriber; the signal
/// and its remaining subscribers are unaffected.
pub struct Signal<T> {
    sender: RwLock<Option<broadcast::Sender<T>>>,
}

impl<T: Status> Signal<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Subscribe to every status this signal emits.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: self.receiver(),
            filter: None,
        }
    }

    /// Subscribe to exactly one status, skipping all others.
    pub fn subscribe_to(&self, status: T) -> Subscription<T> {
        self.subscribe_any_of(&[status])
    }

    /// Subscribe to a set of statuses, skipping all others.
    pub fn subscribe_any_of(&self, statuses: &[T]) -> Subscription<T> {
        Subscription {
            receiver: self.receiver(),
            filter: Some(statuses.to_vec()),
        }
    }

    /// Broadcast `status` to current subscribers. No-op once closed or when
    /// nobody is listening.
    pub fn notify(&self, status: T) {
        if let Some(sender) = self.sender.read().as_ref() {
            let _ = sender.send(status);
        }
    }

    /// Permanently close the signal, waking all subscribers with
    /// [`SignalClosed`]. Idempotent.
    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    fn receiver(&self) -> broadcast::Receiver<T> {
        match self.sender.read().as_ref() {
            Some(sender) => sender.subscribe(),
            // Already closed: hand out a receiver whose sender is gone so the
            // subscription reports SignalClosed on first use.
            None => broadcast::channel(1).1,
        }
    }
}

impl<T: Status> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of a [`Signal`], optionally filtered to a status set.
pub struct Subscription<T> {
    receiver: broadcast::Receiver<T>,
    filter: Option<Vec<T>>,
}

impl<T: Status> Subscription<T> {
    /// Wait for the next status matching this subscription's filter.
    ///
    /// A slow subscriber that misses broadcasts resumes with the statuses
    /// still buffered rather than erroring out.
    pub async fn changed(&mut self) -> Result<T, SignalClosed> {
        loop {
            let status = match self.receiver.recv().await {
                Ok(status) => status,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target = "echo.signal", skipped, "subscription lagged behind signal");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SignalClosed),
            };
            if self.wants(status) {
                return Ok(status);
            }
        }
    }

    /// Drain any already-delivered status without waiting. Returns `Ok(None)`
    /// when nothing matching the filter is buffered.
    pub fn try_changed(&mut self) -> Result<Option<T>, SignalClosed> {
        loop {
            let status = match self.receiver.try_recv() {
                Ok(status) => status,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Closed) => return Err(SignalClosed),
            };
            if self.wants(status) {
                return Ok(Some(status));
            }
        }
    }

    fn wants(&self, status: T) -> bool {
        match &self.filter {
            Some(statuses) => statuses.contains(&status),
            None => true,
        }
    }
}
