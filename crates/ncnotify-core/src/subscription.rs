//! Per-subscriber event iterator.
//!
//! A [`Subscription`] walks one stream in two phases. The *replay* phase
//! reads historical records from the stream file through a private cursor;
//! the *live* phase pulls signals from the bus. A synthesized
//! `<replayComplete/>` notification separates them: every replay record
//! precedes it, every live record follows it.
//!
//! ```text
//!         start()
//!           │
//!           ▼
//!        ┌──────┐  start unset              ┌────────────────┐
//!        │Replay│ ────────────────────────▶ │ ReplayComplete │
//!        └──┬───┘                           └──────┬─────────┘
//!           │ file exhausted or stop passed        │ emit sentinel
//!           ▼                                      ▼
//!        ┌──────┐       stop reached           ┌──────┐
//!        │ Live │ ────────────────────────────▶│ Done │
//!        └──────┘                              └──────┘
//! ```
//!
//! Locking discipline: the registry mutex is held only while the stream
//! entry is located and records are read under the file lock; it is always
//! released before the bus is polled, which may block.

use std::sync::Arc;

use crate::bus::BusSubscriber;
use crate::codec;
use crate::engine::EngineShared;
use crate::event;
use crate::lock::FileLock;
use crate::registry::StreamId;

/// One delivered subscription event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A replayed or live event record.
    Record {
        /// Event time, epoch seconds.
        time: i64,
        /// The full notification record.
        xml: String,
    },
    /// The sentinel separating replay from live delivery.
    ReplayComplete {
        /// Emission time, epoch seconds.
        time: i64,
        /// The synthesized notification.
        xml: String,
    },
}

impl StreamEvent {
    /// Event time, epoch seconds.
    #[must_use]
    pub fn time(&self) -> i64 {
        match self {
            Self::Record { time, .. } | Self::ReplayComplete { time, .. } => *time,
        }
    }

    /// The notification XML.
    #[must_use]
    pub fn xml(&self) -> &str {
        match self {
            Self::Record { xml, .. } | Self::ReplayComplete { xml, .. } => xml,
        }
    }

    /// Consumes the event, returning its notification XML.
    #[must_use]
    pub fn into_xml(self) -> String {
        match self {
            Self::Record { xml, .. } | Self::ReplayComplete { xml, .. } => xml,
        }
    }

    /// Returns true for the replay/live boundary sentinel.
    #[must_use]
    pub fn is_replay_complete(&self) -> bool {
        matches!(self, Self::ReplayComplete { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Replay,
    ReplayComplete,
    Live,
    Done,
}

enum ReplayStep {
    Record(i64, String),
    Exhausted,
    Ended,
    Retry,
    Gone,
}

/// A cursor over one stream's replay log and live feed.
///
/// Owned by the dispatcher that created it; dropping it unregisters the
/// bus subscription.
pub struct Subscription {
    engine: Arc<EngineShared>,
    stream: StreamId,
    stream_name: String,
    start: Option<i64>,
    stop: Option<i64>,
    phase: Phase,
    cursor: u64,
    bus: BusSubscriber,
}

impl Subscription {
    pub(crate) fn new(
        engine: Arc<EngineShared>,
        stream: StreamId,
        stream_name: String,
        start: Option<i64>,
        stop: Option<i64>,
        data_offset: u64,
        bus: BusSubscriber,
    ) -> Self {
        let phase = match (start, stop) {
            (Some(start), Some(stop)) if stop < start => Phase::Done,
            // Without a start time there is no replay and no sentinel.
            (None, _) => Phase::Live,
            _ => Phase::Replay,
        };
        Self {
            engine,
            stream,
            stream_name,
            start,
            stop,
            phase,
            cursor: data_offset,
            bus,
        }
    }

    /// The name of the subscribed stream.
    #[must_use]
    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Returns true once the subscription has terminated.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Produces the next event, if one is currently available.
    ///
    /// `None` means "nothing right now" while the subscription is running
    /// (the live phase waits at most the configured poll timeout) and
    /// "finished" once [`Subscription::is_done`] reports true. Terminal
    /// conditions are a passed stop time, a closed bus, and an engine that
    /// was closed or re-initialized underneath the subscription.
    pub fn poll(&mut self) -> Option<StreamEvent> {
        if !self.engine.is_open() {
            self.phase = Phase::Done;
        }

        if self.phase == Phase::Replay {
            match self.replay_step() {
                ReplayStep::Record(time, xml) => return Some(StreamEvent::Record { time, xml }),
                ReplayStep::Exhausted => self.phase = Phase::ReplayComplete,
                ReplayStep::Ended | ReplayStep::Gone => {
                    self.phase = Phase::Done;
                    return None;
                }
                ReplayStep::Retry => return None,
            }
        }

        if self.phase == Phase::ReplayComplete {
            self.phase = Phase::Live;
            let time = event::now();
            return Some(StreamEvent::ReplayComplete {
                time,
                xml: event::replay_complete(time),
            });
        }

        if self.phase == Phase::Live {
            if self.stop.is_some_and(|stop| event::now() >= stop) {
                self.phase = Phase::Done;
                return None;
            }
            return self.live_step();
        }

        None
    }

    fn replay_step(&mut self) -> ReplayStep {
        let engine = Arc::clone(&self.engine);
        let cursor = &mut self.cursor;
        let start = self.start;
        let stop = self.stop;

        let step = engine.registry.with_entry(self.stream, |entry| {
            if !entry.header.replay {
                return ReplayStep::Exhausted;
            }
            loop {
                let _lock = match FileLock::exclusive(&entry.file) {
                    Ok(lock) => lock,
                    Err(e) => {
                        tracing::warn!(
                            "locking stream '{}' for replay failed: {e}",
                            entry.header.name
                        );
                        return ReplayStep::Retry;
                    }
                };
                let meta = match codec::read_frame_meta(&entry.file, *cursor) {
                    Ok(Some(meta)) => meta,
                    Ok(None) => return ReplayStep::Exhausted,
                    Err(e) => {
                        tracing::warn!(
                            "reading stream '{}' during replay failed: {e}",
                            entry.header.name
                        );
                        return ReplayStep::Ended;
                    }
                };

                if start.is_some_and(|start| meta.time < start) {
                    *cursor = meta.next_offset();
                    continue;
                }
                if stop.is_some_and(|stop| meta.time > stop) {
                    return ReplayStep::Ended;
                }

                match codec::read_frame_body(&entry.file, &meta) {
                    Ok(xml) => {
                        *cursor = meta.next_offset();
                        return ReplayStep::Record(meta.time, xml);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "decoding record from stream '{}' failed: {e}",
                            entry.header.name
                        );
                        return ReplayStep::Ended;
                    }
                }
            }
        });
        step.unwrap_or(ReplayStep::Gone)
    }

    fn live_step(&mut self) -> Option<StreamEvent> {
        loop {
            match self.bus.recv(self.engine.config.live_poll_timeout) {
                Ok(Some(signal)) => {
                    if self.start.is_some_and(|start| signal.event_time < start) {
                        continue;
                    }
                    if self.stop.is_some_and(|stop| signal.event_time > stop) {
                        continue;
                    }
                    return Some(StreamEvent::Record {
                        time: signal.event_time,
                        xml: signal.xml,
                    });
                }
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(
                        "bus receive for stream '{}' failed: {e}",
                        self.stream_name
                    );
                    self.phase = Phase::Done;
                    return None;
                }
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("stream", &self.stream_name)
            .field("start", &self.start)
            .field("stop", &self.stop)
            .field("phase", &self.phase)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_accessors() {
        let record = StreamEvent::Record {
            time: 5,
            xml: "<n/>".to_string(),
        };
        assert_eq!(record.time(), 5);
        assert_eq!(record.xml(), "<n/>");
        assert!(!record.is_replay_complete());

        let sentinel = StreamEvent::ReplayComplete {
            time: 9,
            xml: "<rc/>".to_string(),
        };
        assert!(sentinel.is_replay_complete());
        assert_eq!(sentinel.into_xml(), "<rc/>");
    }
}
