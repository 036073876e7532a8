//! Event payloads, the notification envelope, and event-kind classification.
//!
//! The publisher accepts one of the tagged [`EventPayload`] variants and
//! renders the canonical RFC 6470 body for it; every body is then wrapped in
//! the RFC 5277 `<notification>` envelope with an ISO-8601 `eventTime`.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

use crate::xml::{self, escape_text};

/// Namespace of the notification envelope.
pub const NS_NOTIFICATIONS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

/// Namespace of the stream status document.
pub const NS_STREAMS: &str = "urn:ietf:params:xml:ns:netmod:notification";

/// The RFC 6470 base event names pre-allowed on the `NETCONF` stream.
pub const BASE_EVENTS: [&str; 5] = [
    "netconf-config-change",
    "netconf-capability-change",
    "netconf-session-start",
    "netconf-session-end",
    "netconf-confirmed-commit",
];

/// Session metadata carried by session and config-change events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Authenticated user name.
    pub username: String,
    /// NETCONF session identifier.
    pub session_id: String,
    /// Address the session connected from.
    pub source_host: String,
}

impl SessionInfo {
    fn render(&self) -> String {
        format!(
            "<username>{}</username><session-id>{}</session-id><source-host>{}</source-host>",
            escape_text(&self.username),
            escape_text(&self.session_id),
            escape_text(&self.source_host),
        )
    }
}

/// Datastore named in a config-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datastore {
    /// The startup configuration datastore.
    Startup,
    /// The running configuration datastore.
    Running,
}

impl Datastore {
    fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Running => "running",
        }
    }
}

/// Originator of a config or capability change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedBy {
    /// The server itself changed the data.
    Server,
    /// A user session changed the data.
    User(SessionInfo),
}

impl ChangedBy {
    fn render(&self) -> String {
        match self {
            Self::Server => "<server/>".to_string(),
            Self::User(session) => session.render(),
        }
    }
}

/// Why a session ended, per RFC 6470 `termination-reason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The session closed normally.
    Closed,
    /// The session was killed by another session.
    Killed,
    /// The transport dropped.
    Dropped,
    /// The session timed out.
    Timeout,
    /// The hello exchange failed.
    BadHello,
    /// Any other cause.
    Other,
}

impl TerminationReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Killed => "killed",
            Self::Dropped => "dropped",
            Self::Timeout => "timeout",
            Self::BadHello => "bad-hello",
            Self::Other => "other",
        }
    }
}

/// One publishable event, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A caller-supplied XML body.
    Generic {
        /// The body; must be a single well-formed element.
        content: String,
    },
    /// RFC 6470 `netconf-config-change`.
    ConfigChange {
        /// The datastore that changed.
        datastore: Datastore,
        /// Who changed it.
        changed_by: ChangedBy,
    },
    /// RFC 6470 `netconf-capability-change`.
    CapabilityChange {
        /// Capability list before the change.
        old: Vec<String>,
        /// Capability list after the change.
        new: Vec<String>,
        /// Who changed it.
        changed_by: ChangedBy,
    },
    /// RFC 6470 `netconf-session-start`.
    SessionStart(SessionInfo),
    /// RFC 6470 `netconf-session-end`.
    SessionEnd {
        /// The session that ended.
        session: SessionInfo,
        /// Why it ended.
        reason: TerminationReason,
        /// When `reason` is `Killed`, the killing session's id.
        killed_by: Option<String>,
    },
}

/// Errors from rendering an event payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// Generic content must be exactly one well-formed element.
    #[error("generic event content is not a single well-formed element")]
    MalformedContent,
}

impl EventPayload {
    /// Renders the canonical event body.
    ///
    /// # Errors
    ///
    /// [`EventError::MalformedContent`] when a generic payload is not a
    /// single well-formed element.
    pub fn body(&self) -> Result<String, EventError> {
        match self {
            Self::Generic { content } => {
                if !xml::is_single_element(content) {
                    return Err(EventError::MalformedContent);
                }
                Ok(content.clone())
            }
            Self::ConfigChange {
                datastore,
                changed_by,
            } => Ok(format!(
                "<netconf-config-change><datastore>{}</datastore>{}</netconf-config-change>",
                datastore.as_str(),
                changed_by.render(),
            )),
            Self::CapabilityChange {
                old,
                new,
                changed_by,
            } => Ok(format!(
                "<netconf-capability-change>{}{}</netconf-capability-change>",
                changed_by.render(),
                capability_diff(old, new),
            )),
            Self::SessionStart(session) => Ok(format!(
                "<netconf-session-start>{}</netconf-session-start>",
                session.render(),
            )),
            Self::SessionEnd {
                session,
                reason,
                killed_by,
            } => {
                let killed = match (reason, killed_by) {
                    (TerminationReason::Killed, Some(sid)) => {
                        format!("<killed-by>{}</killed-by>", escape_text(sid))
                    }
                    _ => String::new(),
                };
                Ok(format!(
                    "<netconf-session-end>{}{}<termination-reason>{}</termination-reason></netconf-session-end>",
                    session.render(),
                    killed,
                    reason.as_str(),
                ))
            }
        }
    }

    /// Returns the event name this payload publishes under.
    ///
    /// # Errors
    ///
    /// Same conditions as [`EventPayload::body`].
    pub fn event_name(&self) -> Result<String, EventError> {
        match self {
            Self::Generic { content } => {
                xml::root_local_name(content).map_err(|_| EventError::MalformedContent)
            }
            Self::ConfigChange { .. } => Ok("netconf-config-change".to_string()),
            Self::CapabilityChange { .. } => Ok("netconf-capability-change".to_string()),
            Self::SessionStart(_) => Ok("netconf-session-start".to_string()),
            Self::SessionEnd { .. } => Ok("netconf-session-end".to_string()),
        }
    }
}

/// Diffs two capability lists into added/modified/deleted elements.
///
/// The capability URI up to an optional `?` is its identity. A capability
/// present on both sides under the same identity but with a different full
/// string was modified; otherwise it was added or deleted.
fn capability_diff(old: &[String], new: &[String]) -> String {
    fn identity(capability: &str) -> &str {
        capability.split('?').next().unwrap_or(capability)
    }

    let mut out = String::new();
    for n in new {
        match old.iter().find(|o| identity(o) == identity(n)) {
            Some(o) if o != n => {
                out.push_str(&format!(
                    "<modified-capability>{}</modified-capability>",
                    escape_text(n)
                ));
            }
            Some(_) => {}
            None => {
                out.push_str(&format!(
                    "<added-capability>{}</added-capability>",
                    escape_text(n)
                ));
            }
        }
    }
    for o in old {
        if !new.iter().any(|n| identity(n) == identity(o)) {
            out.push_str(&format!(
                "<deleted-capability>{}</deleted-capability>",
                escape_text(o)
            ));
        }
    }
    out
}

/// Wraps an event body in the on-disk / on-wire record envelope.
#[must_use]
pub fn envelope(event_time: i64, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <notification xmlns=\"{NS_NOTIFICATIONS}\"><eventTime>{}</eventTime>{body}</notification>",
        format_datetime(event_time),
    )
}

/// Builds the synthesized `<replayComplete/>` notification.
#[must_use]
pub fn replay_complete(event_time: i64) -> String {
    format!(
        "<notification xmlns=\"{NS_NOTIFICATIONS}\">\
         <eventTime>{}</eventTime><replayComplete/></notification>",
        format_datetime(event_time),
    )
}

/// Builds the synthesized `<notificationComplete/>` notification.
#[must_use]
pub fn notification_complete(event_time: i64) -> String {
    format!(
        "<notification xmlns=\"{NS_NOTIFICATIONS}\">\
         <eventTime>{}</eventTime><notificationComplete/></notification>",
        format_datetime(event_time),
    )
}

/// Formats epoch seconds as an ISO-8601 / RFC 3339 timestamp in UTC.
#[must_use]
pub fn format_datetime(secs: i64) -> String {
    Utc.timestamp_opt(secs, 0)
        .single()
        .map_or_else(
            || "1970-01-01T00:00:00Z".to_string(),
            |t| t.to_rfc3339_opts(SecondsFormat::Secs, true),
        )
}

/// Parses an ISO-8601 / RFC 3339 timestamp into epoch seconds.
#[must_use]
pub fn parse_datetime(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.timestamp())
}

/// Current time, epoch seconds.
#[must_use]
pub fn now() -> i64 {
    Utc::now().timestamp()
}

/// Kind of a decoded notification, keyed by the local name of its first
/// non-`eventTime` child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Any event outside the enumerated base set.
    Generic,
    /// `netconf-config-change`.
    ConfigChange,
    /// `netconf-capability-change`.
    CapabilityChange,
    /// `netconf-session-start`.
    SessionStart,
    /// `netconf-session-end`.
    SessionEnd,
    /// `netconf-confirmed-commit`.
    ConfirmedCommit,
    /// The engine's end-of-replay sentinel.
    ReplayComplete,
    /// The engine's end-of-subscription sentinel.
    NotificationComplete,
}

/// Classifies an event name into its [`EventKind`].
#[must_use]
pub fn classify(event_name: &str) -> EventKind {
    match event_name {
        "netconf-config-change" => EventKind::ConfigChange,
        "netconf-capability-change" => EventKind::CapabilityChange,
        "netconf-session-start" => EventKind::SessionStart,
        "netconf-session-end" => EventKind::SessionEnd,
        "netconf-confirmed-commit" => EventKind::ConfirmedCommit,
        "replayComplete" => EventKind::ReplayComplete,
        "notificationComplete" => EventKind::NotificationComplete,
        _ => EventKind::Generic,
    }
}
