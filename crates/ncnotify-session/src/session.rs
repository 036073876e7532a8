//! Session and filter seams.
//!
//! The engine does not own session transports or XML filter evaluation;
//! both arrive through the traits here. [`DispatchSlot`] carries the
//! per-session "notification dispatcher active" flag with the claim
//! protocol both dispatchers share.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::notification::Notification;
use crate::request::FilterSpec;

/// Lifecycle state of a NETCONF session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Capabilities not yet exchanged.
    Startup,
    /// The session is up and exchanging messages.
    Working,
    /// The session is shutting down.
    Closing,
    /// The session is gone.
    Closed,
}

/// The per-session notification-dispatcher flag.
///
/// At most one dispatcher (sender or receiver) runs on a session at a
/// time; the flag is claimed atomically before a dispatch loop starts and
/// released when it ends.
#[derive(Debug, Default)]
pub struct DispatchSlot {
    active: AtomicBool,
}

impl DispatchSlot {
    /// Creates an unclaimed slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
        }
    }

    /// Claims the slot, returning a guard that releases it on drop, or
    /// `None` when a dispatcher is already active.
    #[must_use]
    pub fn claim(&self) -> Option<SlotClaim<'_>> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(SlotClaim { slot: self })
    }

    /// Returns true while a dispatcher holds the slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// RAII claim on a [`DispatchSlot`].
#[derive(Debug)]
pub struct SlotClaim<'a> {
    slot: &'a DispatchSlot,
}

impl Drop for SlotClaim<'_> {
    fn drop(&mut self) {
        self.slot.active.store(false, Ordering::Release);
    }
}

/// Errors from the session transport.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session left the working state.
    #[error("session is not in the working state")]
    NotWorking,

    /// The underlying transport failed.
    #[error("session transport failed: {0}")]
    Transport(String),
}

/// The session transport seam used by both dispatchers.
pub trait NotifySession: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Whether the peer advertised the notifications capability.
    fn supports_notifications(&self) -> bool;

    /// The session's dispatcher flag.
    fn slot(&self) -> &DispatchSlot;

    /// Ships one framed notification to the peer.
    ///
    /// # Errors
    ///
    /// [`SessionError`] when the transport fails or the session is gone.
    fn send_notification(&self, notification: &Notification) -> Result<(), SessionError>;

    /// Waits up to `timeout` for the next notification from the peer.
    ///
    /// `Ok(None)` means nothing arrived within the timeout.
    ///
    /// # Errors
    ///
    /// [`SessionError`] when the transport fails or the session is gone.
    fn recv_notification(
        &self,
        timeout: Duration,
    ) -> Result<Option<Notification>, SessionError>;
}

/// Opaque XML filter evaluation, applied per event child element.
pub trait FilterEvaluator: Send + Sync {
    /// Evaluates `spec` against one element, returning the (possibly
    /// reduced) element to deliver, or `None` to drop it.
    fn filter(&self, spec: &FilterSpec, element_xml: &str) -> Option<String>;
}

/// A pass-through evaluator that keeps every element.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl FilterEvaluator for AcceptAll {
    fn filter(&self, _spec: &FilterSpec, element_xml: &str) -> Option<String> {
        Some(element_xml.to_string())
    }
}
