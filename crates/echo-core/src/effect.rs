//! Re-runnable asynchronous effects attached to transactions.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

/// Failure reported by an effect. Carries a human-readable message suitable
/// for logs; callers decide whether the effect is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EffectError {
    message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for EffectError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for EffectError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub type EffectResult = Result<(), EffectError>;

/// A cloneable asynchronous action. Each invocation produces a fresh future,
/// so the same effect can be re-run after a failure.
pub type Effect = Arc<dyn Fn() -> BoxFuture<'static, EffectResult> + Send + Sync>;

/// Wrap an async closure as an [`Effect`].
pub fn effect<F, Fut>(f: F) -> Effect
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = EffectResult> + Send + 'static,
{
    Arc::new(move || f().boxed())
}

/// An effect that immediately succeeds. Useful where a revert step has
/// nothing to undo.
pub fn noop_effect() -> Effect {
    effect(|| async { Ok(()) })
}
