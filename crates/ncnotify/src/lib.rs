//! # `ncnotify`
//!
//! NETCONF notification streams (RFC 5277 / RFC 6470): persistent
//! per-stream event logs shared between server processes, a host-local
//! publish/subscribe bus, replay-then-live subscriptions, and the
//! session-facing dispatch loops.
//!
//! This crate is the unified facade over [`ncnotify_core`] (the engine)
//! and [`ncnotify_session`] (request validation and dispatch).
//!
//! ## Example
//!
//! ```rust,no_run
//! use ncnotify::{EngineConfig, EventPayload, NotificationEngine, SessionInfo};
//!
//! # fn main() -> Result<(), ncnotify::EngineError> {
//! let engine = NotificationEngine::open(EngineConfig::default())?;
//!
//! engine.publish(None, &EventPayload::SessionStart(SessionInfo {
//!     username: "alice".into(),
//!     session_id: "42".into(),
//!     source_host: "10.0.0.1".into(),
//! }))?;
//!
//! let mut sub = engine.subscribe("NETCONF", Some(0), None)?;
//! while let Some(event) = sub.poll() {
//!     println!("{}", event.xml());
//!     if event.is_replay_complete() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub use ncnotify_core::{
    ChangedBy, Datastore, EngineConfig, EngineError, EventKind, EventPayload,
    NotificationEngine, SessionInfo, StreamEvent, StreamInfo, Subscription,
    TerminationReason, BASE_STREAM,
};

pub use ncnotify_session::{
    dispatch_receive, dispatch_send, AcceptAll, DispatchError, DispatchSlot, FilterEvaluator,
    FilterSpec, Notification, NotificationError, NotifySession, RpcError, RpcErrorTag,
    SessionError, SessionState, SubscriptionError, SubscriptionRequest, DEFAULT_STREAM,
};
