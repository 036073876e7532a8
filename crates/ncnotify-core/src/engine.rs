//! The notification engine handle.
//!
//! [`NotificationEngine`] ties the streams directory, the registry, and the
//! bus together behind one explicitly constructed, cloneable handle. All
//! state lives behind an `Arc`, so clones share the same registry and bus;
//! [`NotificationEngine::close`] tears the registry down for every clone
//! and ends every active subscription.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::{Bus, BusError};
use crate::config::EngineConfig;
use crate::dir::{self, DirError};
use crate::event::{self, EventError, EventPayload};
use crate::registry::{RegistryError, StreamInfo, StreamRegistry};
use crate::subscription::Subscription;

/// Errors surfaced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The engine handle was closed.
    #[error("notification engine is closed")]
    Closed,

    /// Streams directory resolution failed.
    #[error(transparent)]
    Dir(#[from] DirError),

    /// Registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Bus operation failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Event payload could not be rendered.
    #[error(transparent)]
    Event(#[from] EventError),
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) registry: StreamRegistry,
    pub(crate) bus: Bus,
    open: AtomicBool,
}

impl EngineShared {
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Handle to the notification stream engine.
#[derive(Clone)]
pub struct NotificationEngine {
    shared: Arc<EngineShared>,
}

impl NotificationEngine {
    /// Opens the engine: resolves the streams directory, connects the bus,
    /// and initializes the stream registry (including the base stream).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the directory is unusable, the bus
    /// cannot be opened, or the directory scan fails.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let streams_dir = dir::resolve(&config)?;
        let bus = Bus::open(&streams_dir)?;
        let registry = StreamRegistry::new(streams_dir);
        registry.init()?;

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                registry,
                bus,
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Returns true until [`NotificationEngine::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    /// Closes the engine. Every clone of the handle observes the closure
    /// and every active subscription ends on its next poll.
    pub fn close(&self) {
        if self.shared.open.swap(false, Ordering::AcqRel) {
            self.shared.registry.close();
        }
    }

    /// Re-initializes the registry from disk. Active subscriptions end;
    /// callers iterating streams must restart.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Closed`] on a closed handle, or the scan
    /// failure.
    pub fn reinit(&self) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.shared.registry.reinit()?;
        Ok(())
    }

    /// The directory holding stream files.
    #[must_use]
    pub fn streams_dir(&self) -> &Path {
        self.shared.registry.dir()
    }

    /// Creates a new stream.
    ///
    /// # Errors
    ///
    /// [`RegistryError::StreamExists`] (wrapped) for duplicates, plus file
    /// and mapping failures.
    pub fn create_stream(
        &self,
        name: &str,
        description: &str,
        replay: bool,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.shared.registry.create(name, description, replay)?;
        Ok(())
    }

    /// Allows `event` on `stream`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStream`] (wrapped) when the stream does not
    /// exist; [`RulesError::TableFull`](crate::rules::RulesError::TableFull)
    /// when the rule table is out of space.
    pub fn allow_event(&self, stream: &str, event: &str) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.shared.registry.allow_event(stream, event)?;
        Ok(())
    }

    /// Returns true when `event` is allowed on `stream`.
    #[must_use]
    pub fn is_allowed(&self, stream: &str, event: &str) -> bool {
        self.is_open() && self.shared.registry.is_allowed(stream, event)
    }

    /// Returns true when `name` names a known stream.
    #[must_use]
    pub fn has_stream(&self, name: &str) -> bool {
        self.is_open() && self.shared.registry.has_stream(name)
    }

    /// Names of all registered streams.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        self.shared.registry.stream_names()
    }

    /// Descriptions of all registered streams.
    #[must_use]
    pub fn streams(&self) -> Vec<StreamInfo> {
        self.shared.registry.infos()
    }

    /// The serialized stream status document.
    #[must_use]
    pub fn status_xml(&self) -> String {
        self.shared.registry.status_xml()
    }

    /// Publishes one event.
    ///
    /// The payload is rendered, wrapped in the notification envelope, and
    /// appended to every replay-enabled stream whose rule table allows the
    /// event name; one bus signal goes out per rule-matching stream. Disk
    /// and bus failures are logged and swallowed — publish is advisory —
    /// so the call fails only when the payload itself cannot be rendered.
    ///
    /// # Errors
    ///
    /// [`EngineError::Closed`] on a closed handle,
    /// [`EventError::MalformedContent`] (wrapped) for broken generic
    /// payloads.
    pub fn publish(
        &self,
        event_time: Option<i64>,
        payload: &EventPayload,
    ) -> Result<(), EngineError> {
        self.ensure_open()?;

        let time = event_time.unwrap_or_else(event::now);
        let body = payload.body()?;
        let name = payload.event_name()?;
        let record = event::envelope(time, &body);
        tracing::debug!("publishing event '{name}' at {time}");

        let matching = self.shared.registry.append_to_matching(&name, time, &record);
        for stream in &matching {
            if let Err(e) = self.shared.bus.send(stream, time, &record) {
                tracing::warn!("announcing event '{name}' on stream '{stream}' failed: {e}");
            }
        }
        Ok(())
    }

    /// Opens a subscription on `stream` with an optional time window.
    ///
    /// A set `start` replays matching historical records first; `stop`
    /// bounds delivery. The window is inclusive on both ends.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStream`] (wrapped) when the stream does not
    /// exist, or a bus failure registering the subscriber.
    pub fn subscribe(
        &self,
        stream: &str,
        start: Option<i64>,
        stop: Option<i64>,
    ) -> Result<Subscription, EngineError> {
        self.ensure_open()?;

        let id = self
            .shared
            .registry
            .get_id(stream)
            .ok_or_else(|| RegistryError::UnknownStream(stream.to_string()))?;
        let data_offset = self
            .shared
            .registry
            .with_entry(id, |entry| entry.data_offset)
            .ok_or_else(|| RegistryError::UnknownStream(stream.to_string()))?;
        let bus = self.shared.bus.subscribe(stream)?;

        Ok(Subscription::new(
            Arc::clone(&self.shared),
            id,
            stream.to_string(),
            start,
            stop,
            data_offset,
            bus,
        ))
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::Closed)
        }
    }
}

impl std::fmt::Debug for NotificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEngine")
            .field("dir", &self.shared.registry.dir())
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SessionInfo;
    use crate::registry::BASE_STREAM;
    use crate::subscription::StreamEvent;
    use std::time::{Duration, Instant};

    fn engine(dir: &Path) -> NotificationEngine {
        NotificationEngine::open(EngineConfig::with_streams_dir(dir)).unwrap()
    }

    fn generic(marker: &str) -> EventPayload {
        EventPayload::Generic {
            content: format!("<test-event><marker>{marker}</marker></test-event>"),
        }
    }

    fn collect_live(sub: &mut crate::subscription::Subscription, n: usize) -> Vec<StreamEvent> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < n && Instant::now() < deadline {
            if let Some(event) = sub.poll() {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_open_creates_base_stream() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());

        assert!(engine.has_stream(BASE_STREAM));
        assert!(engine.is_allowed(BASE_STREAM, "netconf-session-start"));
        assert!(engine.status_xml().contains("<name>NETCONF</name>"));
    }

    #[test]
    fn test_publish_and_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();
        engine.allow_event("t", "test-event").unwrap();

        engine.publish(Some(100), &generic("a")).unwrap();
        engine.publish(Some(200), &generic("b")).unwrap();

        let mut sub = engine.subscribe("t", Some(0), None).unwrap();
        let first = sub.poll().unwrap();
        assert_eq!(first.time(), 100);
        assert!(first.xml().contains("<marker>a</marker>"));

        let second = sub.poll().unwrap();
        assert_eq!(second.time(), 200);

        let sentinel = sub.poll().unwrap();
        assert!(sentinel.is_replay_complete());
        assert!(sentinel.xml().contains("<replayComplete/>"));
    }

    #[test]
    fn test_publish_disallowed_event_is_invisible() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();

        engine.publish(Some(100), &generic("quiet")).unwrap();

        let mut sub = engine.subscribe("t", Some(0), None).unwrap();
        let first = sub.poll().unwrap();
        assert!(first.is_replay_complete());
    }

    #[test]
    fn test_unset_start_skips_replay_and_sentinel() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();
        engine.allow_event("t", "test-event").unwrap();
        engine.publish(Some(100), &generic("historical")).unwrap();

        let mut sub = engine.subscribe("t", None, None).unwrap();
        // No replay: the historical record is not delivered and no
        // sentinel is synthesized.
        assert!(sub.poll().is_none());

        engine.publish(Some(200), &generic("live")).unwrap();
        let events = collect_live(&mut sub, 1);
        assert_eq!(events.len(), 1);
        assert!(events[0].xml().contains("<marker>live</marker>"));
        assert!(!events[0].is_replay_complete());
    }

    #[test]
    fn test_replay_then_live_boundary() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();
        engine.allow_event("t", "test-event").unwrap();

        for i in 1..=3 {
            engine.publish(Some(i), &generic(&format!("r{i}"))).unwrap();
        }

        let mut sub = engine.subscribe("t", Some(1), None).unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(sub.poll().unwrap());
        }
        assert!(seen.iter().all(|e| !e.is_replay_complete()));
        assert!(sub.poll().unwrap().is_replay_complete());

        for i in 4..=5 {
            engine.publish(Some(i), &generic(&format!("l{i}"))).unwrap();
        }
        let live = collect_live(&mut sub, 2);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].time(), 4);
        assert_eq!(live[1].time(), 5);
    }

    #[test]
    fn test_time_window_bounds_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();
        engine.allow_event("t", "test-event").unwrap();

        for time in [10, 20, 30, 40, 50] {
            engine.publish(Some(time), &generic(&time.to_string())).unwrap();
        }

        let mut sub = engine.subscribe("t", Some(15), Some(35)).unwrap();
        assert_eq!(sub.poll().unwrap().time(), 20);
        assert_eq!(sub.poll().unwrap().time(), 30);
        // The record at 40 passes the stop time and terminates delivery.
        assert!(sub.poll().is_none());
        assert!(sub.is_done());
    }

    #[test]
    fn test_replay_disabled_stream_is_not_appended() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("volatile", "no replay", false).unwrap();
        engine.allow_event("volatile", "test-event").unwrap();

        engine.publish(Some(100), &generic("gone")).unwrap();

        let mut sub = engine.subscribe("volatile", Some(0), None).unwrap();
        // Nothing was recorded; replay ends immediately.
        assert!(sub.poll().unwrap().is_replay_complete());

        // Live signals still flow for the stream.
        engine.publish(Some(200), &generic("live")).unwrap();
        let events = collect_live(&mut sub, 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_session_start_record_content() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("netconf", "base", true).unwrap();
        engine
            .allow_event("netconf", "netconf-session-start")
            .unwrap();

        let payload = EventPayload::SessionStart(SessionInfo {
            username: "alice".to_string(),
            session_id: "42".to_string(),
            source_host: "10.0.0.1".to_string(),
        });
        engine.publish(Some(1_700_000_000), &payload).unwrap();

        let mut sub = engine.subscribe("netconf", Some(1_700_000_000), None).unwrap();
        let record = sub.poll().unwrap();
        assert!(record.xml().contains(
            "<netconf-session-start><username>alice</username>\
             <session-id>42</session-id><source-host>10.0.0.1</source-host>\
             </netconf-session-start>"
        ));
        assert!(sub.poll().unwrap().is_replay_complete());
    }

    #[test]
    fn test_unknown_stream_subscribe() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());

        let result = engine.subscribe("noSuch", None, None);
        assert!(matches!(
            result,
            Err(EngineError::Registry(RegistryError::UnknownStream(name))) if name == "noSuch"
        ));
    }

    #[test]
    fn test_close_ends_subscriptions() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());
        engine.create_stream("t", "test", true).unwrap();
        engine.allow_event("t", "test-event").unwrap();
        engine.publish(Some(1), &generic("x")).unwrap();

        let mut sub = engine.subscribe("t", Some(0), None).unwrap();
        engine.close();

        assert!(sub.poll().is_none());
        assert!(sub.is_done());
        assert!(matches!(
            engine.publish(Some(2), &generic("y")),
            Err(EngineError::Closed)
        ));
    }

    #[test]
    fn test_publish_malformed_generic_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = engine(tmp.path());

        let payload = EventPayload::Generic {
            content: "<broken".to_string(),
        };
        assert!(matches!(
            engine.publish(None, &payload),
            Err(EngineError::Event(EventError::MalformedContent))
        ));
    }

    #[test]
    fn test_two_handles_share_state() {
        let tmp = tempfile::tempdir().unwrap();
        let first = engine(tmp.path());
        let second = engine(tmp.path());

        first.create_stream("shared", "cross-handle", true).unwrap();
        assert!(second.has_stream("shared"));
    }
}
