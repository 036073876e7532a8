//! # `ncnotify` Core
//!
//! The notification stream engine behind a NETCONF server's RFC 5277 /
//! RFC 6470 *Notifications* capability. Multiple server processes on one
//! host publish structured events into named streams; subscribers replay
//! matching history from a per-stream append-only log and then follow live
//! events over a host-local bus.
//!
//! The crate provides:
//! - **Streams**: persistent, append-only event logs with a fixed binary
//!   header, shared across processes through advisory file locks
//! - **Rules**: a memory-mapped allowlist of event names per stream
//! - **Publisher**: canonical RFC 6470 event bodies, fan-out to every
//!   matching stream and bus subscriber
//! - **Subscriptions**: replay → `replayComplete` → live iteration with
//!   optional time windows
//!
//! ## Example
//!
//! ```rust,no_run
//! use ncnotify_core::{EngineConfig, EventPayload, NotificationEngine};
//!
//! # fn main() -> Result<(), ncnotify_core::Error> {
//! let engine = NotificationEngine::open(EngineConfig::default())?;
//! engine.publish(None, &EventPayload::Generic {
//!     content: "<link-up><if>eth0</if></link-up>".to_string(),
//! })?;
//!
//! let mut sub = engine.subscribe("NETCONF", Some(0), None)?;
//! while let Some(event) = sub.poll() {
//!     println!("{}", event.xml());
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod codec;
pub mod config;
pub mod dir;
pub mod engine;
pub mod event;
pub mod lock;
pub mod registry;
pub mod rules;
pub mod subscription;
pub mod xml;

pub use config::EngineConfig;
pub use engine::{EngineError, NotificationEngine};
pub use event::{
    ChangedBy, Datastore, EventKind, EventPayload, SessionInfo, TerminationReason,
};
pub use registry::{StreamInfo, BASE_STREAM};
pub use subscription::{StreamEvent, Subscription};

/// The crate's top-level error type.
pub use engine::EngineError as Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
