//! Seam to whatever UI layer renders global notices.

use std::fmt;

use uuid::Uuid;

/// Reference to a shown toast, used to clear it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToastId(Uuid);

impl ToastId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ToastId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ToastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub message: String,
    pub urgent: bool,
}

impl Toast {
    pub fn non_urgent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            urgent: false,
        }
    }
}

/// Where the store surfaces its "changes failed to save" notice.
///
/// Implementations should return promptly and must not call back into the
/// store from inside these methods.
pub trait ToastSink: Send + Sync {
    fn add_toast(&self, toast: Toast) -> ToastId;
    fn remove_toast(&self, id: ToastId);
}
