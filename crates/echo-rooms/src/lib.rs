//! Echo Rooms: optimistic per-room settings built on Echo Core.
//!
//! Responsibilities:
//! - mirroring confirmed notification state per room
//! - applying notification volume changes before the server acknowledges them
//! - retiring local overrides once account data round-trips
//! - surfacing cross-room save failures through a single toast

pub mod client;
pub mod mock;
pub mod notifications;
pub mod room_chamber;
pub mod store;
pub mod toasts;

#[cfg(test)]
mod tests;
