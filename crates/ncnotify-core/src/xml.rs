//! Small XML helpers shared by the publisher, iterator, and session layer.
//!
//! Notification payloads travel as strings; these helpers pull the few
//! structural facts the engine needs (root names, envelope children) out of
//! them without building a DOM. Child extraction slices the original text,
//! so namespace declarations and formatting survive untouched.

use std::borrow::Cow;

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Errors from the XML helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlError {
    /// The input is not well-formed XML.
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// A required element is absent.
    #[error("missing {0} element")]
    MissingElement(&'static str),

    /// The input is not a `<notification>` envelope.
    #[error("not a notification envelope")]
    NotAnEnvelope,
}

/// Escapes text for inclusion in element content.
#[must_use]
pub fn escape_text(raw: &str) -> Cow<'_, str> {
    escape(raw)
}

/// Returns the local name of the first element in `xml`.
///
/// This is the *event name* of a notification body: the rule-table key and
/// the kind-classification input.
///
/// # Errors
///
/// [`XmlError::Malformed`] for unparseable input, [`XmlError::MissingElement`]
/// when no element occurs.
pub fn root_local_name(xml: &str) -> Result<String, XmlError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e) | Event::Empty(e)) => {
                return String::from_utf8(e.local_name().as_ref().to_vec())
                    .map_err(|_| XmlError::Malformed("element name is not UTF-8".to_string()));
            }
            Ok(Event::Eof) => return Err(XmlError::MissingElement("root")),
            Ok(_) => {}
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
        }
    }
}

/// Returns true when `xml` parses as exactly one well-formed element
/// (with optional prolog), the shape required of caller-supplied bodies.
#[must_use]
pub fn is_single_element(xml: &str) -> bool {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            Ok(Event::Empty(_)) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Ok(Event::Text(t)) => {
                if depth == 0 && !t.as_ref().iter().all(u8::is_ascii_whitespace) {
                    return false;
                }
            }
            Ok(Event::Eof) => return depth == 0 && roots == 1,
            Ok(_) => {}
            Err(_) => return false,
        }
    }
}

/// A `<notification>` envelope decomposed into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationParts {
    /// Text content of the `eventTime` child, when present.
    pub event_time: Option<String>,
    /// Raw XML of every other top-level child, in document order.
    pub children: Vec<String>,
}

/// Splits a notification envelope into its `eventTime` text and the raw XML
/// of every other top-level child.
///
/// # Errors
///
/// [`XmlError::NotAnEnvelope`] when the root element is not `notification`,
/// [`XmlError::Malformed`] for broken input.
pub fn notification_parts(xml: &str) -> Result<NotificationParts, XmlError> {
    let mut reader = Reader::from_str(xml);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"notification" {
                    break;
                }
                return Err(XmlError::NotAnEnvelope);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"notification" {
                    return Ok(NotificationParts::default());
                }
                return Err(XmlError::NotAnEnvelope);
            }
            Ok(Event::Eof) => return Err(XmlError::NotAnEnvelope),
            Ok(_) => {}
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
        }
    }

    let mut parts = NotificationParts::default();
    loop {
        let pos = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let is_event_time = e.local_name().as_ref() == b"eventTime";
                let span = reader
                    .read_to_end(e.name())
                    .map_err(|e| XmlError::Malformed(e.to_string()))?;
                if is_event_time {
                    let raw = xml[span.start..span.end].trim();
                    let text = unescape(raw)
                        .map_err(|e| XmlError::Malformed(e.to_string()))?
                        .into_owned();
                    parts.event_time = Some(text);
                } else {
                    let end = reader.buffer_position();
                    parts.children.push(xml[pos..end].trim().to_string());
                }
            }
            Ok(Event::Empty(e)) => {
                let end = reader.buffer_position();
                if e.local_name().as_ref() == b"eventTime" {
                    parts.event_time = Some(String::new());
                } else {
                    parts.children.push(xml[pos..end].trim().to_string());
                }
            }
            Ok(Event::End(_)) => break,
            Ok(Event::Eof) => {
                return Err(XmlError::Malformed("unterminated notification envelope".to_string()))
            }
            Ok(_) => {}
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
        }
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_local_name() {
        assert_eq!(root_local_name("<a><b/></a>").unwrap(), "a");
        assert_eq!(
            root_local_name("<nc:netconf-session-start xmlns:nc=\"urn:x\"/>").unwrap(),
            "netconf-session-start"
        );
        assert!(matches!(
            root_local_name("   "),
            Err(XmlError::MissingElement("root"))
        ));
    }

    #[test]
    fn test_is_single_element() {
        assert!(is_single_element("<a/>"));
        assert!(is_single_element("<a><b>text</b></a>"));
        assert!(is_single_element("<?xml version=\"1.0\"?><a/>"));
        assert!(!is_single_element("<a/><b/>"));
        assert!(!is_single_element("<a>"));
        assert!(!is_single_element("plain text"));
        assert!(!is_single_element(""));
    }

    #[test]
    fn test_notification_parts() {
        let xml = "<notification xmlns=\"urn:ietf:params:xml:ns:netconf:notification:1.0\">\
                   <eventTime>2023-11-14T22:13:20Z</eventTime>\
                   <netconf-session-start><username>alice</username></netconf-session-start>\
                   </notification>";
        let parts = notification_parts(xml).unwrap();
        assert_eq!(parts.event_time.as_deref(), Some("2023-11-14T22:13:20Z"));
        assert_eq!(
            parts.children,
            vec!["<netconf-session-start><username>alice</username></netconf-session-start>"]
        );
    }

    #[test]
    fn test_notification_parts_empty_child() {
        let xml = "<notification><eventTime>t</eventTime><replayComplete/></notification>";
        let parts = notification_parts(xml).unwrap();
        assert_eq!(parts.children, vec!["<replayComplete/>"]);
    }

    #[test]
    fn test_notification_parts_multiple_children() {
        let xml = "<notification><eventTime>t</eventTime><a>1</a><b/><c>3</c></notification>";
        let parts = notification_parts(xml).unwrap();
        assert_eq!(parts.children, vec!["<a>1</a>", "<b/>", "<c>3</c>"]);
    }

    #[test]
    fn test_not_an_envelope() {
        assert!(matches!(
            notification_parts("<rpc/>"),
            Err(XmlError::NotAnEnvelope)
        ));
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a<b&c"), "a&lt;b&amp;c");
    }
}
