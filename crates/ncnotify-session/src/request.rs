//! `<create-subscription>` request parsing and validation.
//!
//! The RPC layer hands the raw request XML over; this module extracts the
//! stream name, time window, and optional filter, and checks them against
//! the engine. Validation failures map onto the NETCONF error taxonomy
//! (`invalid-value`, `bad-element`, `missing-element`, `operation-failed`)
//! through [`RpcError`].

use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use ncnotify_core::event;
use ncnotify_core::NotificationEngine;

/// The stream subscribed to when the request names none.
pub const DEFAULT_STREAM: &str = "NETCONF";

/// An extracted subscription filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSpec {
    /// A subtree filter; carries the raw filter content.
    Subtree(String),
    /// An XPath filter; carries the `select` expression.
    XPath(String),
}

/// Why a `<create-subscription>` request was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The request is not a create-subscription RPC.
    #[error("not a create-subscription request")]
    InvalidRpc,

    /// A filter is present but malformed.
    #[error("subscription filter is malformed")]
    InvalidFilter,

    /// The requested stream does not exist.
    #[error("requested stream '{0}' does not exist")]
    UnknownStream(String),

    /// `stopTime` is present without `startTime`.
    #[error("stopTime requires startTime")]
    MissingStartTime,

    /// `stopTime` precedes `startTime`.
    #[error("stopTime precedes startTime")]
    StopBeforeStart,

    /// `startTime` lies in the future.
    #[error("startTime lies in the future")]
    StartInFuture,

    /// An element carries an unparseable value.
    #[error("element '{0}' carries an invalid value")]
    BadValue(&'static str),
}

/// NETCONF error tag surfaced to the RPC layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorTag {
    /// `invalid-value`.
    InvalidValue,
    /// `bad-element`.
    BadElement,
    /// `missing-element`.
    MissingElement,
    /// `operation-failed`.
    OperationFailed,
}

impl RpcErrorTag {
    /// The wire representation of the tag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidValue => "invalid-value",
            Self::BadElement => "bad-element",
            Self::MissingElement => "missing-element",
            Self::OperationFailed => "operation-failed",
        }
    }
}

/// A protocol-layer error reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// The NETCONF error tag.
    pub tag: RpcErrorTag,
    /// The element the error refers to, when applicable.
    pub element: Option<&'static str>,
    /// A human-readable message, when applicable.
    pub message: Option<String>,
}

impl SubscriptionError {
    /// Maps the rejection onto the NETCONF error taxonomy.
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::InvalidRpc => RpcError {
                tag: RpcErrorTag::OperationFailed,
                element: None,
                message: None,
            },
            Self::InvalidFilter => RpcError {
                tag: RpcErrorTag::BadElement,
                element: Some("filter"),
                message: None,
            },
            Self::UnknownStream(stream) => RpcError {
                tag: RpcErrorTag::InvalidValue,
                element: None,
                message: Some(format!("Requested stream '{stream}' does not exist.")),
            },
            Self::MissingStartTime => RpcError {
                tag: RpcErrorTag::MissingElement,
                element: Some("startTime"),
                message: None,
            },
            Self::StopBeforeStart => RpcError {
                tag: RpcErrorTag::BadElement,
                element: Some("stopTime"),
                message: None,
            },
            Self::StartInFuture | Self::BadValue("startTime") => RpcError {
                tag: RpcErrorTag::BadElement,
                element: Some("startTime"),
                message: None,
            },
            Self::BadValue(element) => RpcError {
                tag: RpcErrorTag::BadElement,
                element: Some(element),
                message: None,
            },
        }
    }
}

/// A parsed `<create-subscription>` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    /// The requested stream; [`DEFAULT_STREAM`] when the request names none.
    pub stream: String,
    /// Replay start time, epoch seconds.
    pub start: Option<i64>,
    /// Delivery stop time, epoch seconds.
    pub stop: Option<i64>,
    /// The optional filter.
    pub filter: Option<FilterSpec>,
}

impl SubscriptionRequest {
    /// Parses a request without consulting the engine.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::InvalidRpc`] when no create-subscription
    /// element is present, [`SubscriptionError::InvalidFilter`] for a
    /// malformed filter, [`SubscriptionError::BadValue`] for unparseable
    /// time values.
    pub fn parse(rpc: &str) -> Result<Self, SubscriptionError> {
        let mut reader = Reader::from_str(rpc);

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) if e.local_name().as_ref() == b"create-subscription" => break,
                Ok(Event::Empty(e)) if e.local_name().as_ref() == b"create-subscription" => {
                    return Ok(Self::defaults());
                }
                Ok(Event::Eof) => return Err(SubscriptionError::InvalidRpc),
                Ok(_) => {}
                Err(_) => return Err(SubscriptionError::InvalidRpc),
            }
        }

        let mut stream: Option<String> = None;
        let mut start_raw: Option<String> = None;
        let mut stop_raw: Option<String> = None;
        let mut filter: Option<FilterSpec> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let local = e.local_name().as_ref().to_vec();
                    if local == b"filter" {
                        let spec_attrs = filter_attributes(&e)?;
                        let span = reader
                            .read_to_end(e.name())
                            .map_err(|_| SubscriptionError::InvalidRpc)?;
                        let inner = rpc[span.start..span.end].trim().to_string();
                        filter = Some(build_filter(spec_attrs, inner)?);
                        continue;
                    }

                    let span = reader
                        .read_to_end(e.name())
                        .map_err(|_| SubscriptionError::InvalidRpc)?;
                    let text = unescape(rpc[span.start..span.end].trim())
                        .map_err(|_| SubscriptionError::InvalidRpc)?
                        .into_owned();
                    match local.as_slice() {
                        b"stream" => stream = Some(text),
                        b"startTime" => start_raw = Some(text),
                        b"stopTime" => stop_raw = Some(text),
                        _ => {}
                    }
                }
                Ok(Event::Empty(e)) => {
                    let local = e.local_name().as_ref().to_vec();
                    match local.as_slice() {
                        b"filter" => {
                            filter = Some(build_filter(filter_attributes(&e)?, String::new())?);
                        }
                        b"stream" => stream = Some(String::new()),
                        b"startTime" => start_raw = Some(String::new()),
                        b"stopTime" => stop_raw = Some(String::new()),
                        _ => {}
                    }
                }
                Ok(Event::End(_)) => break,
                Ok(Event::Eof) | Err(_) => return Err(SubscriptionError::InvalidRpc),
                Ok(_) => {}
            }
        }

        let start = parse_time(start_raw.as_deref(), "startTime")?;
        let stop = parse_time(stop_raw.as_deref(), "stopTime")?;

        Ok(Self {
            stream: stream.unwrap_or_else(|| DEFAULT_STREAM.to_string()),
            start,
            stop,
            filter,
        })
    }

    /// Checks a parsed request against the engine and the time-window
    /// rules.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::UnknownStream`],
    /// [`SubscriptionError::MissingStartTime`],
    /// [`SubscriptionError::StopBeforeStart`], or
    /// [`SubscriptionError::StartInFuture`].
    pub fn check(&self, engine: &NotificationEngine) -> Result<(), SubscriptionError> {
        if !engine.has_stream(&self.stream) {
            return Err(SubscriptionError::UnknownStream(self.stream.clone()));
        }
        if self.stop.is_some() && self.start.is_none() {
            return Err(SubscriptionError::MissingStartTime);
        }
        if let (Some(start), Some(stop)) = (self.start, self.stop) {
            if start > stop {
                return Err(SubscriptionError::StopBeforeStart);
            }
        }
        if self.start.is_some_and(|start| start > event::now()) {
            return Err(SubscriptionError::StartInFuture);
        }
        Ok(())
    }

    /// Parses and validates a request in one step.
    ///
    /// # Errors
    ///
    /// Any [`SubscriptionError`].
    pub fn validated(
        rpc: &str,
        engine: &NotificationEngine,
    ) -> Result<Self, SubscriptionError> {
        let request = Self::parse(rpc)?;
        request.check(engine)?;
        Ok(request)
    }

    fn defaults() -> Self {
        Self {
            stream: DEFAULT_STREAM.to_string(),
            start: None,
            stop: None,
            filter: None,
        }
    }
}

struct FilterAttributes {
    ftype: Option<String>,
    select: Option<String>,
}

fn filter_attributes(element: &BytesStart<'_>) -> Result<FilterAttributes, SubscriptionError> {
    let mut attrs = FilterAttributes {
        ftype: None,
        select: None,
    };
    for attr in element.attributes() {
        let attr = attr.map_err(|_| SubscriptionError::InvalidFilter)?;
        let value = attr
            .unescape_value()
            .map_err(|_| SubscriptionError::InvalidFilter)?
            .into_owned();
        match attr.key.local_name().as_ref() {
            b"type" => attrs.ftype = Some(value),
            b"select" => attrs.select = Some(value),
            _ => {}
        }
    }
    Ok(attrs)
}

fn build_filter(
    attrs: FilterAttributes,
    inner: String,
) -> Result<FilterSpec, SubscriptionError> {
    match attrs.ftype.as_deref().unwrap_or("subtree") {
        "subtree" => Ok(FilterSpec::Subtree(inner)),
        "xpath" => attrs
            .select
            .map(FilterSpec::XPath)
            .ok_or(SubscriptionError::InvalidFilter),
        _ => Err(SubscriptionError::InvalidFilter),
    }
}

fn parse_time(
    raw: Option<&str>,
    element: &'static str,
) -> Result<Option<i64>, SubscriptionError> {
    match raw {
        None => Ok(None),
        Some(text) => event::parse_datetime(text)
            .map(Some)
            .ok_or(SubscriptionError::BadValue(element)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ncnotify_core::EngineConfig;

    const NS: &str = "urn:ietf:params:xml:ns:netconf:notification:1.0";

    fn engine() -> (tempfile::TempDir, NotificationEngine) {
        let tmp = tempfile::tempdir().unwrap();
        let engine =
            NotificationEngine::open(EngineConfig::with_streams_dir(tmp.path())).unwrap();
        (tmp, engine)
    }

    fn rpc(children: &str) -> String {
        format!("<rpc message-id=\"1\"><create-subscription xmlns=\"{NS}\">{children}</create-subscription></rpc>")
    }

    #[test]
    fn test_defaults() {
        let request = SubscriptionRequest::parse(&rpc("")).unwrap();
        assert_eq!(request.stream, "NETCONF");
        assert!(request.start.is_none());
        assert!(request.stop.is_none());
        assert!(request.filter.is_none());
    }

    #[test]
    fn test_self_closed_request() {
        let request = SubscriptionRequest::parse(
            "<rpc><create-subscription xmlns=\"urn:x\"/></rpc>",
        )
        .unwrap();
        assert_eq!(request.stream, DEFAULT_STREAM);
    }

    #[test]
    fn test_full_request() {
        let request = SubscriptionRequest::parse(&rpc(
            "<stream>ops</stream>\
             <startTime>2023-11-14T22:13:20Z</startTime>\
             <stopTime>2023-11-14T23:13:20Z</stopTime>",
        ))
        .unwrap();
        assert_eq!(request.stream, "ops");
        assert_eq!(request.start, Some(1_700_000_000));
        assert_eq!(request.stop, Some(1_700_003_600));
    }

    #[test]
    fn test_not_a_subscription() {
        assert_eq!(
            SubscriptionRequest::parse("<rpc><get-config/></rpc>"),
            Err(SubscriptionError::InvalidRpc)
        );
    }

    #[test]
    fn test_subtree_filter() {
        let request = SubscriptionRequest::parse(&rpc(
            "<filter type=\"subtree\"><event><severity/></event></filter>",
        ))
        .unwrap();
        assert_eq!(
            request.filter,
            Some(FilterSpec::Subtree("<event><severity/></event>".to_string()))
        );
    }

    #[test]
    fn test_default_filter_type_is_subtree() {
        let request = SubscriptionRequest::parse(&rpc("<filter><x/></filter>")).unwrap();
        assert!(matches!(request.filter, Some(FilterSpec::Subtree(_))));
    }

    #[test]
    fn test_xpath_filter() {
        let request = SubscriptionRequest::parse(&rpc(
            "<filter type=\"xpath\" select=\"/event[severity='critical']\"/>",
        ))
        .unwrap();
        assert_eq!(
            request.filter,
            Some(FilterSpec::XPath("/event[severity='critical']".to_string()))
        );
    }

    #[test]
    fn test_xpath_filter_without_select_is_invalid() {
        assert_eq!(
            SubscriptionRequest::parse(&rpc("<filter type=\"xpath\"/>")),
            Err(SubscriptionError::InvalidFilter)
        );
    }

    #[test]
    fn test_unknown_filter_type_is_invalid() {
        assert_eq!(
            SubscriptionRequest::parse(&rpc("<filter type=\"regex\"/>")),
            Err(SubscriptionError::InvalidFilter)
        );
    }

    #[test]
    fn test_unparseable_start_time() {
        assert_eq!(
            SubscriptionRequest::parse(&rpc("<startTime>yesterday</startTime>")),
            Err(SubscriptionError::BadValue("startTime"))
        );
    }

    #[test]
    fn test_validation_matrix() {
        let (_tmp, engine) = engine();
        let past = "1970-01-02T00:00:00Z";
        let later = "1970-01-03T00:00:00Z";
        let future = "2100-01-01T00:00:00Z";

        // stopTime without startTime
        assert_eq!(
            SubscriptionRequest::validated(&rpc(&format!("<stopTime>{past}</stopTime>")), &engine),
            Err(SubscriptionError::MissingStartTime)
        );

        // start after stop
        assert_eq!(
            SubscriptionRequest::validated(
                &rpc(&format!(
                    "<startTime>{later}</startTime><stopTime>{past}</stopTime>"
                )),
                &engine
            ),
            Err(SubscriptionError::StopBeforeStart)
        );

        // start in the future
        assert_eq!(
            SubscriptionRequest::validated(
                &rpc(&format!("<startTime>{future}</startTime>")),
                &engine
            ),
            Err(SubscriptionError::StartInFuture)
        );

        // unknown stream
        assert_eq!(
            SubscriptionRequest::validated(&rpc("<stream>noSuch</stream>"), &engine),
            Err(SubscriptionError::UnknownStream("noSuch".to_string()))
        );

        // all good
        assert!(SubscriptionRequest::validated(
            &rpc(&format!("<startTime>{past}</startTime>")),
            &engine
        )
        .is_ok());
    }

    #[test]
    fn test_rpc_error_mapping() {
        let error = SubscriptionError::UnknownStream("noSuch".to_string()).to_rpc_error();
        assert_eq!(error.tag, RpcErrorTag::InvalidValue);
        assert!(error.message.unwrap().contains("noSuch"));

        let error = SubscriptionError::MissingStartTime.to_rpc_error();
        assert_eq!(error.tag, RpcErrorTag::MissingElement);
        assert_eq!(error.element, Some("startTime"));

        let error = SubscriptionError::StopBeforeStart.to_rpc_error();
        assert_eq!(error.tag, RpcErrorTag::BadElement);
        assert_eq!(error.element, Some("stopTime"));

        let error = SubscriptionError::StartInFuture.to_rpc_error();
        assert_eq!(error.tag, RpcErrorTag::BadElement);
        assert_eq!(error.element, Some("startTime"));

        let error = SubscriptionError::InvalidFilter.to_rpc_error();
        assert_eq!(error.tag, RpcErrorTag::BadElement);
        assert_eq!(error.element, Some("filter"));

        assert_eq!(
            SubscriptionError::InvalidRpc.to_rpc_error().tag,
            RpcErrorTag::OperationFailed
        );
        assert_eq!(RpcErrorTag::OperationFailed.as_str(), "operation-failed");
    }
}
