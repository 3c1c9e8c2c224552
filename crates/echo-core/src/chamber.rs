//! Optimistic key/value cache backed by transactions.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::context::{EchoContext, TxnHandle};
use crate::effect::Effect;
use crate::transaction::{EchoTransaction, TransactionStatus};

/// Buffer depth for property-update broadcasts.
pub const PROPERTY_CHANNEL_CAPACITY: usize = 64;

/// Authoritative read-through used when a key has no local override.
pub trait Lookup<K, V>: Send + Sync {
    /// Current confirmed value for `key`, if the backing system has one.
    fn current(&self, key: &K) -> Option<V>;
}

impl<K, V, F> Lookup<K, V> for F
where
    F: Fn(&K) -> Option<V> + Send + Sync,
{
    fn current(&self, key: &K) -> Option<V> {
        self(key)
    }
}

struct CacheEntry<V> {
    handle: TxnHandle,
    value: V,
}

/// Caches optimistic overrides per key and drives the transaction that makes
/// each override real.
///
/// Writes are visible synchronously: [`set_value`](Self::set_value) installs
/// the override and announces the key before the effect has started. At most
/// one transaction is live per key; a newer write retires the older one.
/// Overrides are cleared only through [`mark_echo_received`](Self::mark_echo_received)
/// once authoritative confirmation arrives.
pub struct EchoChamber<K, V> {
    context: Arc<EchoContext>,
    lookup: Box<dyn Lookup<K, V>>,
    cache: RwLock<HashMap<K, CacheEntry<V>>>,
    updates: broadcast::Sender<K>,
}

impl<K, V> EchoChamber<K, V>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(context: Arc<EchoContext>, lookup: impl Lookup<K, V> + 'static) -> Self {
        let (updates, _) = broadcast::channel(PROPERTY_CHANNEL_CAPACITY);
        Self {
            context,
            lookup: Box::new(lookup),
            cache: RwLock::new(HashMap::new()),
            updates,
        }
    }

    pub fn context(&self) -> &Arc<EchoContext> {
        &self.context
    }

    /// Subscribe to keys whose visible value may have changed.
    pub fn subscribe(&self) -> broadcast::Receiver<K> {
        self.updates.subscribe()
    }

    /// The local override for `key` if one is in flight, else the
    /// authoritative value.
    pub fn get_value(&self, key: &K) -> Option<V> {
        if let Some(entry) = self.cache.read().get(key) {
            return Some(entry.value.clone());
        }
        self.lookup.current(key)
    }

    /// Whether an optimistic override is still in flight for `key`.
    pub fn has_override(&self, key: &K) -> bool {
        self.cache.read().contains_key(key)
    }

    /// Optimistically write `value` for `key` and start `run_fn` to make it
    /// real. Any change already in flight for `key` is retired first. On an
    /// Error resolution `revert_fn` runs as the compensating action; the
    /// override stays cached either way until confirmation clears it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn set_value(
        &self,
        audit_name: impl Into<String>,
        key: K,
        value: V,
        run_fn: Effect,
        revert_fn: Effect,
    ) -> Arc<EchoTransaction> {
        let superseded = self.cache.read().get(&key).map(|entry| entry.handle);
        if let Some(handle) = superseded {
            if let Some(prior) = self.context.disown(handle) {
                debug!(
                    target = "echo.chamber",
                    key = ?key,
                    audit = %prior.audit_name(),
                    "superseding in-flight change"
                );
                prior.cancel();
            }
        }

        let (handle, txn) = self.context.begin_transaction(audit_name, run_fn);
        self.cache
            .write()
            .insert(key.clone(), CacheEntry { handle, value });
        self.announce(key);

        let driver = txn.clone();
        tokio::spawn(async move {
            match driver.run().await {
                Ok(TransactionStatus::Error) => {
                    if let Err(err) = revert_fn().await {
                        error!(
                            target = "echo.chamber",
                            audit = %driver.audit_name(),
                            error = %err,
                            "revert failed after echo error"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    debug!(
                        target = "echo.chamber",
                        audit = %driver.audit_name(),
                        error = %err,
                        "transaction was retired before it could run"
                    );
                }
            }
        });
        txn
    }

    /// Authoritative confirmation arrived for `key`: drop the local override,
    /// retire its transaction, and announce the key. The announcement fires
    /// even without an override so readers re-query confirmed state.
    pub fn mark_echo_received(&self, key: &K) {
        let removed = self.cache.write().remove(key);
        if let Some(entry) = removed {
            if let Some(txn) = self.context.disown(entry.handle) {
                txn.cancel();
            }
        }
        self.announce(key.clone());
    }

    /// Announce `key` without touching the cache. For specializations whose
    /// confirmed state changed outside the optimistic path.
    pub fn announce(&self, key: K) {
        let _ = self.updates.send(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextTransactionState;
    use crate::effect::{effect, noop_effect, EffectError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::{sleep, timeout};

    fn chamber_over(
        confirmed: Arc<RwLock<HashMap<String, u64>>>,
    ) -> EchoChamber<String, u64> {
        let lookup = move |key: &String| confirmed.read().get(key).copied();
        EchoChamber::new(EchoContext::new(), lookup)
    }

    fn gated(gate: Arc<Notify>, result: Result<(), &'static str>) -> Effect {
        effect(move || {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                result.map_err(EffectError::from)
            }
        })
    }

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
    async fn override_is_visible_before_effect_resolves() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed.clone());
        let gate = Arc::new(Notify::new());

        chamber.set_value(
            "change volume",
            "volume".to_string(),
            7,
            gated(gate, Ok(())),
            noop_effect(),
        );

        assert_eq!(chamber.get_value(&"volume".to_string()), Some(7));
        assert_eq!(confirmed.read().get("volume"), Some(&1));
    }

    #[tokio::test]
    async fn reads_fall_through_to_authoritative_state() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 3)])));
        let chamber = chamber_over(confirmed);

        assert_eq!(chamber.get_value(&"volume".to_string()), Some(3));
        assert_eq!(chamber.get_value(&"missing".to_string()), None);
    }

    #[tokio::test]
    async fn set_and_confirmation_both_announce_the_key() {
        let chamber = chamber_over(Arc::new(RwLock::new(HashMap::new())));
        let mut updates = chamber.subscribe();

        chamber.set_value(
            "change volume",
            "volume".to_string(),
            2,
            noop_effect(),
            noop_effect(),
        );
        chamber.mark_echo_received(&"volume".to_string());

        assert_eq!(updates.recv().await.expect("optimistic update"), "volume");
        assert_eq!(updates.recv().await.expect("confirmation update"), "volume");
    }

    #[tokio::test]
    async fn failed_effect_runs_revert_and_keeps_override() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed);
        let reverts = Arc::new(AtomicUsize::new(0));
        let revert_calls = reverts.clone();
        let revert = effect(move || {
            let revert_calls = revert_calls.clone();
            async move {
                revert_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let txn = chamber.set_value(
            "change volume",
            "volume".to_string(),
            9,
            effect(|| async { Err(EffectError::from("rejected")) }),
            revert,
        );

        wait_until("revert to run", || reverts.load(Ordering::SeqCst) == 1).await;
        assert_eq!(txn.status(), TransactionStatus::Error);
        assert!(txn.did_previously_fail());
        assert_eq!(chamber.get_value(&"volume".to_string()), Some(9));
        assert_eq!(
            chamber.context().state(),
            ContextTransactionState::PendingErrors
        );

        chamber.mark_echo_received(&"volume".to_string());
        assert_eq!(chamber.get_value(&"volume".to_string()), Some(1));
        assert_eq!(
            chamber.context().state(),
            ContextTransactionState::AllSuccessful
        );
    }

    #[tokio::test]
    async fn newer_write_retires_older_one_for_same_key() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed);
        let gate = Arc::new(Notify::new());
        let reverts = Arc::new(AtomicUsize::new(0));
        let revert_calls = reverts.clone();
        let first_revert = effect(move || {
            let revert_calls = revert_calls.clone();
            async move {
                revert_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let first = chamber.set_value(
            "change volume",
            "volume".to_string(),
            5,
            gated(gate.clone(), Err("late rejection")),
            first_revert,
        );
        let second = chamber.set_value(
            "change volume",
            "volume".to_string(),
            6,
            noop_effect(),
            noop_effect(),
        );

        assert_eq!(first.status(), TransactionStatus::Success);
        wait_until("second write to resolve", || {
            second.status() == TransactionStatus::Success
        })
        .await;

        gate.notify_one();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(chamber.get_value(&"volume".to_string()), Some(6));
        assert_eq!(reverts.load(Ordering::SeqCst), 0);
        assert!(!first.did_previously_fail());
        assert_eq!(
            chamber.context().state(),
            ContextTransactionState::AllSuccessful
        );
    }

    #[tokio::test]
    async fn started_effect_resolving_late_after_supersede_is_ignored() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed);
        let started = Arc::new(Notify::new());
        let gate = Arc::new(Notify::new());
        let reverts = Arc::new(AtomicUsize::new(0));

        let launch = started.clone();
        let release = gate.clone();
        let first_run = effect(move || {
            let launch = launch.clone();
            let release = release.clone();
            async move {
                launch.notify_one();
                release.notified().await;
                Err(EffectError::from("late rejection"))
            }
        });
        let revert_calls = reverts.clone();
        let first_revert = effect(move || {
            let revert_calls = revert_calls.clone();
            async move {
                revert_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let first = chamber.set_value(
            "change volume",
            "volume".to_string(),
            5,
            first_run,
            first_revert,
        );
        timeout(Duration::from_secs(1), started.notified())
            .await
            .expect("first effect should start");

        let second = chamber.set_value(
            "change volume",
            "volume".to_string(),
            6,
            noop_effect(),
            noop_effect(),
        );
        assert_eq!(first.status(), TransactionStatus::Success);

        gate.notify_one();
        wait_until("second write to resolve", || {
            second.status() == TransactionStatus::Success
        })
        .await;
        sleep(Duration::from_millis(50)).await;

        assert_eq!(chamber.get_value(&"volume".to_string()), Some(6));
        assert_eq!(reverts.load(Ordering::SeqCst), 0);
        assert!(!first.did_previously_fail());
        assert_eq!(first.status(), TransactionStatus::Success);
        assert_eq!(
            chamber.context().state(),
            ContextTransactionState::AllSuccessful
        );
    }

    #[tokio::test]
    async fn confirmation_clears_override_and_retires_transaction() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed);
        let gate = Arc::new(Notify::new());

        let txn = chamber.set_value(
            "change volume",
            "volume".to_string(),
            4,
            gated(gate, Ok(())),
            noop_effect(),
        );

        chamber.mark_echo_received(&"volume".to_string());

        assert_eq!(chamber.get_value(&"volume".to_string()), Some(1));
        assert_eq!(txn.status(), TransactionStatus::Success);
        assert!(chamber.context().transactions().is_empty());
    }

    #[tokio::test]
    async fn announce_rebroadcasts_without_cache_changes() {
        let confirmed = Arc::new(RwLock::new(HashMap::from([("volume".to_string(), 1)])));
        let chamber = chamber_over(confirmed);
        let mut updates = chamber.subscribe();

        chamber.announce("volume".to_string());

        assert_eq!(updates.recv().await.expect("announcement"), "volume");
        assert_eq!(chamber.get_value(&"volume".to_string()), Some(1));
    }
}
