//! Decoded notification messages.

use ncnotify_core::event::{self, EventKind};
use ncnotify_core::xml::{self, XmlError};

/// Errors from building or decoding a notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    /// The message is not a `<notification>` envelope.
    #[error("message is not a notification envelope")]
    NotAnEnvelope,

    /// The envelope carries no event description.
    #[error("notification carries no event description")]
    MissingEventDescription,

    /// The envelope carries no parseable `eventTime`.
    #[error("notification carries no valid eventTime")]
    MissingEventTime,

    /// The message is not well-formed XML.
    #[error("malformed notification: {0}")]
    Malformed(String),

    /// The supplied content is not a single well-formed element.
    #[error("notification content is not a single well-formed element")]
    MalformedContent,
}

impl From<XmlError> for NotificationError {
    fn from(e: XmlError) -> Self {
        match e {
            XmlError::NotAnEnvelope => Self::NotAnEnvelope,
            XmlError::MissingElement(_) => Self::MissingEventDescription,
            XmlError::Malformed(msg) => Self::Malformed(msg),
        }
    }
}

/// A notification message framed in the RFC 5277 envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    xml: String,
}

impl Notification {
    /// Builds a notification from an event time and body content.
    ///
    /// # Errors
    ///
    /// [`NotificationError::MalformedContent`] when `content` is not a
    /// single well-formed element.
    pub fn build(event_time: i64, content: &str) -> Result<Self, NotificationError> {
        if !xml::is_single_element(content) {
            return Err(NotificationError::MalformedContent);
        }
        Ok(Self {
            xml: event::envelope(event_time, content),
        })
    }

    /// Wraps an already-framed notification record.
    #[must_use]
    pub fn from_xml(xml: impl Into<String>) -> Self {
        Self { xml: xml.into() }
    }

    /// The full envelope XML.
    #[must_use]
    pub fn as_xml(&self) -> &str {
        &self.xml
    }

    /// Consumes the notification, returning its envelope XML.
    #[must_use]
    pub fn into_xml(self) -> String {
        self.xml
    }

    /// The `eventTime` value as epoch seconds.
    #[must_use]
    pub fn event_time(&self) -> Option<i64> {
        let parts = xml::notification_parts(&self.xml).ok()?;
        event::parse_datetime(&parts.event_time?)
    }

    /// The event content: every envelope child except `eventTime`,
    /// concatenated in document order.
    ///
    /// # Errors
    ///
    /// [`NotificationError`] when the envelope cannot be decomposed or
    /// carries no event description.
    pub fn content(&self) -> Result<String, NotificationError> {
        let parts = xml::notification_parts(&self.xml)?;
        if parts.children.is_empty() {
            return Err(NotificationError::MissingEventDescription);
        }
        Ok(parts.children.join(""))
    }

    /// Classifies the notification by its first non-`eventTime` child.
    ///
    /// # Errors
    ///
    /// [`NotificationError`] when the envelope cannot be decomposed or
    /// carries no event description.
    pub fn kind(&self) -> Result<EventKind, NotificationError> {
        let parts = xml::notification_parts(&self.xml)?;
        let first = parts
            .children
            .first()
            .ok_or(NotificationError::MissingEventDescription)?;
        let name = xml::root_local_name(first)
            .map_err(|_| NotificationError::MissingEventDescription)?;
        Ok(event::classify(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_decode() {
        let ntf = Notification::build(1_700_000_000, "<my-event><x/></my-event>").unwrap();
        assert_eq!(ntf.event_time(), Some(1_700_000_000));
        assert_eq!(ntf.content().unwrap(), "<my-event><x/></my-event>");
        assert_eq!(ntf.kind().unwrap(), EventKind::Generic);
    }

    #[test]
    fn test_build_rejects_malformed_content() {
        assert!(matches!(
            Notification::build(0, "<oops"),
            Err(NotificationError::MalformedContent)
        ));
    }

    #[test]
    fn test_kind_classification() {
        let cases = [
            ("<replayComplete/>", EventKind::ReplayComplete),
            ("<notificationComplete/>", EventKind::NotificationComplete),
            ("<netconf-session-start/>", EventKind::SessionStart),
            ("<netconf-session-end/>", EventKind::SessionEnd),
            ("<netconf-config-change/>", EventKind::ConfigChange),
            ("<netconf-capability-change/>", EventKind::CapabilityChange),
            ("<netconf-confirmed-commit/>", EventKind::ConfirmedCommit),
            ("<anything-else/>", EventKind::Generic),
        ];
        for (content, kind) in cases {
            let ntf = Notification::build(0, content).unwrap();
            assert_eq!(ntf.kind().unwrap(), kind, "content {content}");
        }
    }

    #[test]
    fn test_kind_skips_event_time() {
        // eventTime is never the event description, whatever its position.
        let ntf = Notification::from_xml(
            "<notification><netconf-session-start/><eventTime>x</eventTime></notification>",
        );
        assert_eq!(ntf.kind().unwrap(), EventKind::SessionStart);
    }

    #[test]
    fn test_not_an_envelope() {
        let ntf = Notification::from_xml("<rpc-reply/>");
        assert!(matches!(ntf.kind(), Err(NotificationError::NotAnEnvelope)));
        assert!(ntf.event_time().is_none());
    }

    #[test]
    fn test_missing_event_description() {
        let ntf = Notification::from_xml("<notification><eventTime>t</eventTime></notification>");
        assert!(matches!(
            ntf.kind(),
            Err(NotificationError::MissingEventDescription)
        ));
    }
}
