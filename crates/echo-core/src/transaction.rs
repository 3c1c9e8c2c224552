//! A single optimistic write attempt and its status lifecycle.

use std::sync::Weak;

use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::context::EchoContext;
use crate::effect::Effect;
use crate::error::EchoError;
use crate::signal::{Signal, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy)]
struct TxnState {
    status: TransactionStatus,
    did_fail: bool,
    attempt: u64,
}

/// One tracked write effect.
///
/// A transaction represents exactly one attempt cycle: it can be re-run after
/// an error, but once it reaches [`TransactionStatus::Success`] it is final
/// and further runs are refused. [`cancel`](Self::cancel) forces Success
/// without invoking the effect, which is how a superseded attempt is retired;
/// an effect still in flight at that point resolves into nothing.
pub struct EchoTransaction {
    audit_name: String,
    effect: Effect,
    started_at: OffsetDateTime,
    state: Mutex<TxnState>,
    signal: Signal<TransactionStatus>,
    owner: RwLock<Weak<EchoContext>>,
}

impl EchoTransaction {
    pub(crate) fn new(
        audit_name: impl Into<String>,
        effect: Effect,
        owner: Weak<EchoContext>,
    ) -> Self {
        Self {
            audit_name: audit_name.into(),
            effect,
            started_at: OffsetDateTime::now_utc(),
            state: Mutex::new(TxnState {
                status: TransactionStatus::Pending,
                did_fail: false,
                attempt: 0,
            }),
            signal: Signal::new(),
            owner: RwLock::new(owner),
        }
    }

    /// Human-readable label describing what this transaction changes.
    pub fn audit_name(&self) -> &str {
        &self.audit_name
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Whether this transaction has ever entered Error. Sticky until a later
    /// Success clears it.
    pub fn did_previously_fail(&self) -> bool {
        self.state.lock().did_fail
    }

    /// Subscribe to every status change.
    pub fn subscribe(&self) -> Subscription<TransactionStatus> {
        self.signal.subscribe()
    }

    /// Subscribe to one specific status.
    pub fn subscribe_to(&self, status: TransactionStatus) -> Subscription<TransactionStatus> {
        self.signal.subscribe_to(status)
    }

    /// Execute the effect and resolve the attempt it belongs to.
    ///
    /// Refuses to run once the transaction is already Success. A resolution
    /// that arrives after the attempt was superseded by [`cancel`](Self::cancel)
    /// or a newer `run` is discarded without touching status.
    pub async fn run(&self) -> Result<TransactionStatus, EchoError> {
        let attempt = {
            let mut state = self.state.lock();
            if state.status == TransactionStatus::Success {
                return Err(EchoError::TransactionComplete);
            }
            state.attempt += 1;
            apply_status(&mut state, TransactionStatus::Pending);
            state.attempt
        };
        self.after_transition(TransactionStatus::Pending);

        let outcome = (self.effect)().await;

        let resolved = {
            let mut state = self.state.lock();
            if state.attempt != attempt || state.status != TransactionStatus::Pending {
                None
            } else {
                let status = match &outcome {
                    Ok(()) => TransactionStatus::Success,
                    Err(_) => TransactionStatus::Error,
                };
                apply_status(&mut state, status);
                Some(status)
            }
        };

        match resolved {
            Some(status) => {
                if let Err(err) = &outcome {
                    warn!(
                        target = "echo.transaction",
                        audit = %self.audit_name,
                        error = %err,
                        "echo transaction failed"
                    );
                }
                self.after_transition(status);
                Ok(status)
            }
            None => {
                debug!(
                    target = "echo.transaction",
                    audit = %self.audit_name,
                    "stale attempt resolved after being superseded; ignoring"
                );
                Ok(self.status())
            }
        }
    }

    /// Retire the transaction: force Success without invoking the effect.
    /// Whatever the effect eventually resolves to no longer matters.
    pub fn cancel(&self) {
        debug!(target = "echo.transaction", audit = %self.audit_name, "transaction cancelled");
        {
            let mut state = self.state.lock();
            apply_status(&mut state, TransactionStatus::Success);
        }
        self.after_transition(TransactionStatus::Success);
    }

    /// Detach from the owning context and stop notifying subscribers.
    pub(crate) fn orphan(&self) {
        *self.owner.write() = Weak::new();
        self.signal.close();
    }

    fn after_transition(&self, status: TransactionStatus) {
        self.signal.notify(status);
        if status == TransactionStatus::Success {
            // A successful transaction is final; release its subscribers.
            self.signal.close();
        }
        let owner = self.owner.read().upgrade();
        if let Some(context) = owner {
            context.transaction_updated();
        }
    }
}

fn apply_status(state: &mut TxnState, status: TransactionStatus) {
    state.status = status;
    match status {
        TransactionStatus::Success => state.did_fail = false,
        TransactionStatus::Error => state.did_fail = true,
        TransactionStatus::Pending => {}
    }
}
