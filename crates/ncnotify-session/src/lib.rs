//! # `ncnotify` Session Layer
//!
//! Session-facing half of the notification stream engine: parsing and
//! validating `<create-subscription>` requests, the NETCONF error
//! taxonomy, decoded [`Notification`] messages, and the two per-session
//! dispatch loops ([`dispatch_send`] and [`dispatch_receive`]).
//!
//! Session transports and XML filter evaluation stay outside this crate;
//! they plug in through the [`NotifySession`] and [`FilterEvaluator`]
//! traits.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod notification;
pub mod receive;
pub mod request;
pub mod send;
pub mod session;

pub use notification::{Notification, NotificationError};
pub use receive::{dispatch_receive, NotificationCallback};
pub use request::{
    FilterSpec, RpcError, RpcErrorTag, SubscriptionError, SubscriptionRequest, DEFAULT_STREAM,
};
pub use send::{dispatch_send, DispatchError};
pub use session::{
    AcceptAll, DispatchSlot, FilterEvaluator, NotifySession, SessionError, SessionState,
    SlotClaim,
};
