//! Cross-process notification bus.
//!
//! Live events fan out to subscribers in other processes on the same host.
//! The transport is brokerless: every subscriber binds a Unix datagram
//! socket under `<streams-dir>/.bus/<stream>/`, and a sender delivers one
//! datagram per socket found there. Sends are non-blocking best-effort;
//! sockets whose owner died are unlinked on the next send.
//!
//! Signal identity follows the stream bus convention
//! ([`BUS_INTERFACE`] / member [`BUS_MEMBER`]); the payload is
//! `(u64 event_time, string xml)`.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::ReentrantMutex;

/// Interface name identifying stream event signals.
pub const BUS_INTERFACE: &str = "libnetconf.notifications.stream";

/// Object path prefix under which streams are addressed.
pub const BUS_PATH_PREFIX: &str = "/libnetconf/notifications/stream";

/// Signal member name.
pub const BUS_MEMBER: &str = "Event";

/// Upper bound on one signal datagram.
pub const MAX_SIGNAL_BYTES: usize = 128 * 1024;

const SIGNAL_MAGIC: &[u8; 4] = b"NCEV";
const BUS_DIR: &str = ".bus";

/// Errors from bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The subscriber socket is gone; terminal for a live phase.
    #[error("bus connection closed")]
    Closed,

    /// The signal payload exceeds [`MAX_SIGNAL_BYTES`].
    #[error("signal payload of {0} bytes exceeds the datagram limit")]
    Oversized(usize),

    /// Underlying socket or filesystem failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One live event signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Event time, epoch seconds.
    pub event_time: i64,
    /// The full notification record.
    pub xml: String,
}

/// Host-local pub/sub transport rooted in the streams directory.
pub struct Bus {
    root: PathBuf,
    sender: ReentrantMutex<UnixDatagram>,
    next_subscriber: AtomicU64,
}

impl Bus {
    /// Opens the bus rooted at `streams_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the bus directory or send socket
    /// cannot be created.
    pub fn open(streams_dir: &Path) -> Result<Self, BusError> {
        let root = streams_dir.join(BUS_DIR);
        fs::create_dir_all(&root)?;
        let _ = fs::set_permissions(&root, fs::Permissions::from_mode(0o777));

        let sender = UnixDatagram::unbound()?;
        sender.set_nonblocking(true)?;

        Ok(Self {
            root,
            sender: ReentrantMutex::new(sender),
            next_subscriber: AtomicU64::new(0),
        })
    }

    /// Registers interest in `stream` and returns the receiving half.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Io`] when the subscriber socket cannot be bound.
    pub fn subscribe(&self, stream: &str) -> Result<BusSubscriber, BusError> {
        let dir = self.root.join(stream);
        fs::create_dir_all(&dir)?;
        let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o777));

        let seq = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("{}-{seq}.sock", std::process::id()));
        let _ = fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o777));

        Ok(BusSubscriber {
            socket,
            path,
            buf: vec![0u8; MAX_SIGNAL_BYTES],
        })
    }

    /// Sends one event signal to every subscriber of `stream`.
    ///
    /// Delivery is best-effort: a full receiver queue drops the signal for
    /// that receiver, and sockets left behind by dead subscribers are
    /// cleaned up.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Oversized`] when the record does not fit one
    /// datagram. Per-receiver delivery failures are logged, not returned.
    pub fn send(&self, stream: &str, event_time: i64, xml: &str) -> Result<(), BusError> {
        let frame = encode_signal(event_time, xml)?;

        let dir = self.root.join(stream);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            // No subscriber has ever registered for this stream.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BusError::Io(e)),
        };

        let sender = self.sender.lock();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sock") {
                continue;
            }
            match sender.send_to(&frame, &path) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    tracing::debug!("bus receiver {} is full, dropping signal", path.display());
                }
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionRefused
                        || e.kind() == io::ErrorKind::NotFound =>
                {
                    // Stale socket of a dead subscriber.
                    let _ = fs::remove_file(&path);
                }
                Err(e) => {
                    tracing::warn!("bus send to {} failed: {e}", path.display());
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus").field("root", &self.root).finish()
    }
}

/// The receiving half of one stream subscription.
#[derive(Debug)]
pub struct BusSubscriber {
    socket: UnixDatagram,
    path: PathBuf,
    buf: Vec<u8>,
}

impl BusSubscriber {
    /// Waits up to `timeout` for the next pending signal.
    ///
    /// Returns `Ok(None)` when the timeout elapses or a malformed datagram
    /// was skipped.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Closed`] when the socket failed; the live phase
    /// treats this as terminal.
    pub fn recv(&mut self, timeout: Duration) -> Result<Option<Signal>, BusError> {
        let timeout = timeout.max(Duration::from_millis(1));
        self.socket
            .set_read_timeout(Some(timeout))
            .map_err(|_| BusError::Closed)?;

        match self.socket.recv(&mut self.buf) {
            Ok(n) => {
                let signal = decode_signal(&self.buf[..n]);
                if signal.is_none() {
                    tracing::warn!("skipping malformed bus signal of {n} bytes");
                }
                Ok(signal)
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(_) => Err(BusError::Closed),
        }
    }

    /// Drops the registration, unlinking the subscriber socket.
    pub fn unsubscribe(self) {}
}

impl Drop for BusSubscriber {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn encode_signal(event_time: i64, xml: &str) -> Result<Vec<u8>, BusError> {
    let total = SIGNAL_MAGIC.len() + 8 + xml.len();
    if total > MAX_SIGNAL_BYTES {
        return Err(BusError::Oversized(total));
    }
    let mut frame = Vec::with_capacity(total);
    frame.extend_from_slice(SIGNAL_MAGIC);
    #[allow(clippy::cast_sign_loss)]
    frame.extend_from_slice(&(event_time as u64).to_le_bytes());
    frame.extend_from_slice(xml.as_bytes());
    Ok(frame)
}

fn decode_signal(frame: &[u8]) -> Option<Signal> {
    if frame.len() < SIGNAL_MAGIC.len() + 8 || frame[..4] != SIGNAL_MAGIC[..] {
        return None;
    }
    let mut time = [0u8; 8];
    time.copy_from_slice(&frame[4..12]);
    let xml = std::str::from_utf8(&frame[12..]).ok()?;
    #[allow(clippy::cast_possible_wrap)]
    Some(Signal {
        event_time: u64::from_le_bytes(time) as i64,
        xml: xml.to_string(),
    })
}
