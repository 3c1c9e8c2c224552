//! Ownership and health aggregation for a scope's transactions.

use std::sync::Arc;

use parking_lot::RwLock;
use slotmap::{new_key_type, SlotMap};
use time::OffsetDateTime;
use tracing::debug;

use crate::effect::Effect;
use crate::signal::{Signal, Subscription};
use crate::transaction::{EchoTransaction, TransactionStatus};

new_key_type! {
    /// Handle to a transaction owned by an [`EchoContext`].
    pub struct TxnHandle;
}

/// Aggregate health of every transaction a context owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextTransactionState {
    /// At least one transaction is still pending and none have failed.
    NotStarted,
    /// At least one transaction is in Error or has previously failed.
    PendingErrors,
    /// Every owned transaction has succeeded, or none exist.
    AllSuccessful,
}

/// Owns the transactions for one logical scope and publishes their combined
/// state whenever any of them changes.
///
/// Transactions live in a slab; callers hold a [`TxnHandle`] and release an
/// entry with a single [`disown`](Self::disown) call once its outcome has
/// been folded into the caller's own bookkeeping.
pub struct EchoContext {
    transactions: RwLock<SlotMap<TxnHandle, Arc<EchoTransaction>>>,
    signal: Signal<ContextTransactionState>,
}

impl EchoContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transactions: RwLock::new(SlotMap::with_key()),
            signal: Signal::new(),
        })
    }

    /// Recompute aggregate state from current transaction statuses.
    ///
    /// Precedence: any Error or sticky past failure wins, then any Pending,
    /// otherwise everything succeeded. An empty context reports
    /// [`ContextTransactionState::AllSuccessful`].
    pub fn state(&self) -> ContextTransactionState {
        let transactions = self.transactions.read();
        let mut any_pending = false;
        for txn in transactions.values() {
            if txn.status() == TransactionStatus::Error || txn.did_previously_fail() {
                return ContextTransactionState::PendingErrors;
            }
            if txn.status() == TransactionStatus::Pending {
                any_pending = true;
            }
        }
        if any_pending {
            ContextTransactionState::NotStarted
        } else {
            ContextTransactionState::AllSuccessful
        }
    }

    /// Earliest start time among transactions currently failed or sticky
    /// failed, if any. Answers "since when has this scope been broken".
    pub fn first_failed_at(&self) -> Option<OffsetDateTime> {
        self.transactions
            .read()
            .values()
            .filter(|txn| {
                txn.status() == TransactionStatus::Error || txn.did_previously_fail()
            })
            .map(|txn| txn.started_at())
            .min()
    }

    /// Create a transaction owned by this context. The transaction is not run;
    /// the caller drives it. Every status change it undergoes republishes this
    /// context's aggregate state.
    pub fn begin_transaction(
        self: &Arc<Self>,
        audit_name: impl Into<String>,
        run_fn: Effect,
    ) -> (TxnHandle, Arc<EchoTransaction>) {
        let txn = Arc::new(EchoTransaction::new(audit_name, run_fn, Arc::downgrade(self)));
        let handle = self.transactions.write().insert(txn.clone());
        (handle, txn)
    }

    pub fn transaction(&self, handle: TxnHandle) -> Option<Arc<EchoTransaction>> {
        self.transactions.read().get(handle).cloned()
    }

    /// Snapshot of every owned transaction.
    pub fn transactions(&self) -> Vec<Arc<EchoTransaction>> {
        self.transactions.read().values().cloned().collect()
    }

    /// Release one transaction: remove it from the slab, detach it from this
    /// context, close its signal, and republish aggregate state. Returns the
    /// released transaction, or `None` for a stale handle.
    pub fn disown(&self, handle: TxnHandle) -> Option<Arc<EchoTransaction>> {
        let removed = self.transactions.write().remove(handle);
        if let Some(txn) = &removed {
            debug!(target = "echo.context", audit = %txn.audit_name(), "transaction disowned");
            txn.orphan();
            self.transaction_updated();
        }
        removed
    }

    /// Subscribe to aggregate state changes.
    pub fn subscribe(&self) -> Subscription<ContextTransactionState> {
        self.signal.subscribe()
    }

    pub(crate) fn transaction_updated(&self) {
        let state = self.state();
        self.signal.notify(state);
    }

    /// Tear the context down: orphan every transaction in slab order, clear
    /// the slab, then release the context's own subscribers. Safe to call
    /// more than once.
    pub fn destroy(&self) {
        let drained: Vec<Arc<EchoTransaction>> = {
            let mut transactions = self.transactions.write();
            transactions.drain().map(|(_, txn)| txn).collect()
        };
        for txn in drained {
            txn.orphan();
        }
        self.signal.close();
    }
}
