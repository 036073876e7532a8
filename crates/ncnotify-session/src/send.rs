//! The sending dispatcher.
//!
//! Drives a subscription on behalf of one session: validates the
//! `<create-subscription>` request, replays and follows the stream,
//! applies the session's filter, and frames every surviving record for
//! the session writer. The loop runs until the iterator terminates, the
//! stop time passes, or the session leaves the working state; a
//! `<notificationComplete/>` notification always closes the exchange.

use ncnotify_core::event;
use ncnotify_core::xml;
use ncnotify_core::{EngineError, NotificationEngine};

use crate::notification::Notification;
use crate::request::{FilterSpec, SubscriptionError, SubscriptionRequest};
use crate::session::{FilterEvaluator, NotifySession, SessionError, SessionState};

/// Why a dispatch loop could not run or was cut short.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The session is not in the working state.
    #[error("session is not in the working state")]
    SessionNotWorking,

    /// The session does not advertise the notifications capability.
    #[error("session does not support the notifications capability")]
    NoNotificationCapability,

    /// Another dispatcher is already active on the session.
    #[error("a notification dispatcher is already active on the session")]
    AlreadyActive,

    /// The subscription request was rejected.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// The engine rejected the subscription.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The session transport failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Runs a send dispatch loop for `subscribe_rpc` on `session`.
///
/// Returns the number of notifications handed to the session writer,
/// not counting the final `<notificationComplete/>`.
///
/// # Errors
///
/// [`DispatchError`] when the session cannot host a dispatcher, the
/// request fails validation, or the engine refuses the subscription.
/// Transport failures after the loop started are logged and end the loop
/// without an error, matching the advisory nature of delivery.
pub fn dispatch_send(
    engine: &NotificationEngine,
    session: &dyn NotifySession,
    subscribe_rpc: &str,
    filters: &dyn FilterEvaluator,
) -> Result<u64, DispatchError> {
    if session.state() != SessionState::Working {
        return Err(DispatchError::SessionNotWorking);
    }
    if !session.supports_notifications() {
        return Err(DispatchError::NoNotificationCapability);
    }

    let request = SubscriptionRequest::validated(subscribe_rpc, engine)?;

    let Some(_claim) = session.slot().claim() else {
        return Err(DispatchError::AlreadyActive);
    };

    let mut subscription = engine.subscribe(&request.stream, request.start, request.stop)?;
    let mut sent: u64 = 0;

    while session.state() == SessionState::Working && engine.is_open() {
        let Some(stream_event) = subscription.poll() else {
            if subscription.is_done() {
                break;
            }
            if request.stop.is_some_and(|stop| event::now() >= stop) {
                break;
            }
            continue;
        };

        let framed = match &request.filter {
            // Sentinels bypass filtering.
            Some(spec) if !stream_event.is_replay_complete() => {
                match apply_filter(filters, spec, stream_event.xml()) {
                    Some(filtered) => filtered,
                    None => continue,
                }
            }
            _ => stream_event.into_xml(),
        };

        if let Err(e) = session.send_notification(&Notification::from_xml(framed)) {
            tracing::warn!("sending notification failed, ending dispatch: {e}");
            break;
        }
        sent += 1;
    }

    let complete = Notification::from_xml(event::notification_complete(event::now()));
    if let Err(e) = session.send_notification(&complete) {
        tracing::warn!("sending notificationComplete failed: {e}");
    }

    Ok(sent)
}

/// Applies the filter to each event child, rebuilding the envelope from
/// the survivors. Returns `None` when every child was filtered out.
fn apply_filter(
    filters: &dyn FilterEvaluator,
    spec: &FilterSpec,
    record: &str,
) -> Option<String> {
    let parts = match xml::notification_parts(record) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!("invalid format of stored event, skipping: {e}");
            return None;
        }
    };

    let survivors: Vec<String> = parts
        .children
        .iter()
        .filter_map(|child| filters.filter(spec, child))
        .collect();
    if survivors.is_empty() {
        return None;
    }

    let event_time = parts.event_time.unwrap_or_default();
    Some(format!(
        "<notification xmlns=\"{}\"><eventTime>{}</eventTime>{}</notification>",
        event::NS_NOTIFICATIONS,
        xml::escape_text(&event_time),
        survivors.join(""),
    ))
}
