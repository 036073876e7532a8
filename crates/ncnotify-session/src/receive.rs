//! The receiving dispatcher.
//!
//! Consumes notifications arriving on a session, decodes them, and hands
//! `(event_time, content)` to a caller-supplied callback. Without a
//! callback the notification is printed to standard output. The loop ends
//! when a `<notificationComplete/>` notification is observed, the
//! transport fails, or the session leaves the working state.

use std::time::Duration;

use ncnotify_core::event::{self, EventKind};

use crate::send::DispatchError;
use crate::session::{NotifySession, SessionState};

/// Poll interval while no notification is pending.
const RECV_POLL: Duration = Duration::from_micros(100);

/// Callback receiving `(event_time, content)` per notification.
pub type NotificationCallback<'a> = &'a mut dyn FnMut(i64, &str);

/// Runs a receive dispatch loop on `session`.
///
/// Returns the number of notifications processed, including the final
/// `<notificationComplete/>`.
///
/// # Errors
///
/// [`DispatchError::SessionNotWorking`],
/// [`DispatchError::NoNotificationCapability`], or
/// [`DispatchError::AlreadyActive`] when the session cannot host the
/// loop. Transport failures after the loop started end it without an
/// error.
pub fn dispatch_receive(
    session: &dyn NotifySession,
    mut callback: Option<NotificationCallback<'_>>,
) -> Result<u64, DispatchError> {
    if session.state() != SessionState::Working {
        return Err(DispatchError::SessionNotWorking);
    }
    if !session.supports_notifications() {
        return Err(DispatchError::NoNotificationCapability);
    }
    let Some(_claim) = session.slot().claim() else {
        return Err(DispatchError::AlreadyActive);
    };

    let mut count: u64 = 0;
    while session.state() == SessionState::Working {
        let notification = match session.recv_notification(RECV_POLL) {
            Ok(Some(notification)) => notification,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!("receiving notification failed, ending dispatch: {e}");
                break;
            }
        };

        let complete = matches!(notification.kind(), Ok(EventKind::NotificationComplete));

        match (notification.event_time(), notification.content()) {
            (Some(time), Ok(content)) => {
                match callback.as_mut() {
                    Some(callback) => callback(time, &content),
                    None => println!("eventTime: {}\n{content}", event::format_datetime(time)),
                }
                count += 1;
            }
            _ => {
                tracing::warn!("invalid notification received, ignoring");
            }
        }

        if complete {
            break;
        }
    }

    Ok(count)
}
