//! Process-wide stream registry.
//!
//! The registry owns every open stream: its events file, its data-region
//! offset, and its mapped rule table. Entries live in an arena of slots with
//! per-entry generation counters; subscription iterators hold a
//! [`StreamId`] (slot + generation) rather than a reference, so a
//! re-initialized or closed registry makes stale iterators end cleanly
//! instead of observing foreign state.
//!
//! All access goes through one reentrant mutex. Reentrancy matters on the
//! structural-update paths: re-initialization is a close-then-init sequence
//! performed under the already-held lock.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use parking_lot::ReentrantMutex;

use crate::codec::{self, CodecError, StreamHeader};
use crate::event::{self, BASE_EVENTS};
use crate::lock::FileLock;
use crate::rules::{RuleTable, RulesError};
use crate::xml::escape_text;

/// Name of the always-present base stream.
pub const BASE_STREAM: &str = "NETCONF";

const BASE_STREAM_DESCRIPTION: &str = "NETCONF Base Notifications";

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A stream with the requested name already exists.
    #[error("stream '{0}' already exists")]
    StreamExists(String),

    /// No stream with the requested name is registered or on disk.
    #[error("stream '{0}' does not exist")]
    UnknownStream(String),

    /// The requested stream name cannot be used.
    #[error("stream name {0:?} is not usable")]
    InvalidName(String),

    /// Stream file encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Rule table failure.
    #[error(transparent)]
    Rules(#[from] RulesError),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Stable handle to a registered stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamId {
    slot: usize,
    generation: u64,
}

/// Public description of one registered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether the stream records events for replay.
    pub replay: bool,
    /// Creation time, epoch seconds.
    pub created: i64,
}

/// One open stream.
pub(crate) struct StreamEntry {
    pub(crate) header: StreamHeader,
    pub(crate) file: fs::File,
    pub(crate) data_offset: u64,
    pub(crate) rules: RuleTable,
    pub(crate) generation: u64,
}

#[derive(Default)]
struct RegistryInner {
    slots: Vec<Option<StreamEntry>>,
    index: HashMap<String, usize>,
    next_generation: u64,
    status: String,
}

/// The process-wide table of open streams.
pub struct StreamRegistry {
    dir: PathBuf,
    inner: ReentrantMutex<RefCell<RegistryInner>>,
}

impl StreamRegistry {
    /// Creates an empty registry rooted at `dir`.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            inner: ReentrantMutex::new(RefCell::new(RegistryInner::default())),
        }
    }

    /// Returns the streams directory this registry scans.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scans the streams directory and registers every stream file found,
    /// then guarantees the [`BASE_STREAM`] exists with the RFC 6470 base
    /// events allowed.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] when the directory cannot be read.
    /// Unreadable individual files are skipped with a warning; files
    /// without the stream magic are skipped silently.
    pub fn init(&self) -> Result<(), RegistryError> {
        let guard = self.inner.lock();
        self.locked_init(&guard)
    }

    /// Drops every registered stream. Active iterators observe the change
    /// on their next call and end.
    pub fn close(&self) {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        inner.slots.clear();
        inner.index.clear();
        inner.status.clear();
    }

    /// Re-initialization: close-then-init under the held reentrant mutex.
    ///
    /// # Errors
    ///
    /// Same conditions as [`StreamRegistry::init`].
    pub fn reinit(&self) -> Result<(), RegistryError> {
        let guard = self.inner.lock();
        self.close();
        self.locked_init(&guard)
    }

    /// Looks up a stream by name, pulling it in from disk when another
    /// process created it after this registry initialized.
    pub fn get_id(&self, name: &str) -> Option<StreamId> {
        let guard = self.inner.lock();
        self.locked_get(&guard, name)
    }

    /// Returns true when `name` names a registered or on-disk stream.
    #[must_use]
    pub fn has_stream(&self, name: &str) -> bool {
        self.get_id(name).is_some()
    }

    /// Creates a new stream, writes its file header (truncating any stale
    /// file of the same name), and opens its rule table.
    ///
    /// # Errors
    ///
    /// [`RegistryError::StreamExists`] for duplicates,
    /// [`RegistryError::InvalidName`] for unusable names, and codec/rules
    /// errors for file failures.
    pub fn create(&self, name: &str, description: &str, replay: bool) -> Result<StreamId, RegistryError> {
        let guard = self.inner.lock();
        let id = self.locked_create(&guard, name, description, replay)?;
        Self::refresh_status(&guard);
        Ok(id)
    }

    /// Adds `event` to the allowlist of `stream`.
    ///
    /// The registry mutex is held across the append, which serializes
    /// writers to the shared rule mapping within this process.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownStream`] when the stream does not exist,
    /// [`RulesError::TableFull`] (wrapped) when the table is out of space.
    pub fn allow_event(&self, stream: &str, event: &str) -> Result<(), RegistryError> {
        let guard = self.inner.lock();
        let id = self
            .locked_get(&guard, stream)
            .ok_or_else(|| RegistryError::UnknownStream(stream.to_string()))?;
        let mut inner = guard.borrow_mut();
        let entry = inner.slots[id.slot]
            .as_mut()
            .ok_or_else(|| RegistryError::UnknownStream(stream.to_string()))?;
        entry.rules.append(event)?;
        Ok(())
    }

    /// Returns true when `event` is allowed on `stream`.
    #[must_use]
    pub fn is_allowed(&self, stream: &str, event: &str) -> bool {
        let guard = self.inner.lock();
        let Some(id) = self.locked_get(&guard, stream) else {
            return false;
        };
        let inner = guard.borrow();
        inner.slots[id.slot]
            .as_ref()
            .is_some_and(|entry| entry.rules.contains(event))
    }

    /// Returns the names of all registered streams, in registration order.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .slots
            .iter()
            .flatten()
            .map(|entry| entry.header.name.clone())
            .collect()
    }

    /// Returns a description of every registered stream.
    #[must_use]
    pub fn infos(&self) -> Vec<StreamInfo> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        inner
            .slots
            .iter()
            .flatten()
            .map(|entry| StreamInfo {
                name: entry.header.name.clone(),
                description: entry.header.description.clone(),
                replay: entry.header.replay,
                created: entry.header.created,
            })
            .collect()
    }

    /// Returns the serialized stream status document.
    #[must_use]
    pub fn status_xml(&self) -> String {
        let guard = self.inner.lock();
        let status = guard.borrow().status.clone();
        status
    }

    /// Runs `f` against the entry behind `id`, or returns `None` when the
    /// id no longer resolves (closed or re-initialized registry).
    pub(crate) fn with_entry<R>(&self, id: StreamId, f: impl FnOnce(&StreamEntry) -> R) -> Option<R> {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        let entry = inner.slots.get(id.slot)?.as_ref()?;
        if entry.generation != id.generation {
            return None;
        }
        Some(f(entry))
    }

    /// Appends `record` to every replay-enabled stream whose rule table
    /// allows `event_name`, each append under the stream's file lock.
    ///
    /// Returns the names of all rule-matching streams (replay-enabled or
    /// not) for the subsequent bus broadcast. Disk failures are logged and
    /// do not fail the publish.
    pub(crate) fn append_to_matching(&self, event_name: &str, time: i64, record: &str) -> Vec<String> {
        let guard = self.inner.lock();
        let inner = guard.borrow();

        let mut matching = Vec::new();
        for entry in inner.slots.iter().flatten() {
            if !entry.rules.contains(event_name) {
                continue;
            }
            matching.push(entry.header.name.clone());
            if !entry.header.replay {
                continue;
            }
            match FileLock::exclusive(&entry.file) {
                Ok(_lock) => {
                    if let Err(e) = codec::append_frame(&entry.file, time, record) {
                        tracing::warn!(
                            "writing event '{event_name}' into stream '{}' failed: {e}",
                            entry.header.name
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "locking stream file '{}' for event '{event_name}' failed: {e}",
                        entry.header.name
                    );
                }
            }
        }
        matching
    }

    fn locked_init(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<RegistryInner>>,
    ) -> Result<(), RegistryError> {
        for entry in fs::read_dir(&self.dir)? {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            match codec::read_header(&path) {
                Ok((header, file, data_offset)) => {
                    if guard.borrow().index.contains_key(&header.name) {
                        continue;
                    }
                    match RuleTable::open(&self.dir, &header.name) {
                        Ok(rules) => {
                            Self::insert(guard, header, file, data_offset, rules);
                        }
                        Err(e) => {
                            tracing::warn!(
                                "mapping rules for stream '{}' failed: {e}",
                                header.name
                            );
                        }
                    }
                }
                Err(CodecError::NotAStream) => {
                    tracing::debug!("skipping non-stream file {}", path.display());
                }
                Err(e) => {
                    tracing::warn!("reading stream file {} failed: {e}", path.display());
                }
            }
        }

        if !guard.borrow().index.contains_key(BASE_STREAM) {
            match self.locked_create(guard, BASE_STREAM, BASE_STREAM_DESCRIPTION, true) {
                Ok(_) => {
                    for event in BASE_EVENTS {
                        if let Err(e) = self.allow_event(BASE_STREAM, event) {
                            tracing::warn!("allowing base event '{event}' failed: {e}");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("creating base stream '{BASE_STREAM}' failed: {e}");
                }
            }
        }

        Self::refresh_status(guard);
        Ok(())
    }

    fn locked_get(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<RegistryInner>>,
        name: &str,
    ) -> Option<StreamId> {
        {
            let inner = guard.borrow();
            if let Some(&slot) = inner.index.get(name) {
                let generation = inner.slots[slot].as_ref()?.generation;
                return Some(StreamId { slot, generation });
            }
        }

        // Not registered here; another process may have created it.
        let path = self.dir.join(format!("{name}.events"));
        let (header, file, data_offset) = match codec::read_header(&path) {
            Ok(parsed) => parsed,
            Err(CodecError::NotAStream) => return None,
            Err(e) => {
                tracing::debug!("stream '{name}' not loadable: {e}");
                return None;
            }
        };
        if header.name != name {
            tracing::warn!(
                "stream file {} names stream '{}', expected '{name}'",
                path.display(),
                header.name
            );
            return None;
        }
        let rules = match RuleTable::open(&self.dir, &header.name) {
            Ok(rules) => rules,
            Err(e) => {
                tracing::warn!("mapping rules for stream '{name}' failed: {e}");
                return None;
            }
        };
        Some(Self::insert(guard, header, file, data_offset, rules))
    }

    fn locked_create(
        &self,
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<RegistryInner>>,
        name: &str,
        description: &str,
        replay: bool,
    ) -> Result<StreamId, RegistryError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\0')
            || name.len() + 1 > usize::from(u16::MAX)
        {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if guard.borrow().index.contains_key(name) {
            return Err(RegistryError::StreamExists(name.to_string()));
        }

        let header = StreamHeader {
            name: name.to_string(),
            description: description.to_string(),
            replay,
            created: event::now(),
        };

        let path = self.dir.join(format!("{name}.events"));
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o777)
            .open(&path)?;
        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(0o777));

        let data_offset = codec::write_header(&file, &header)?;
        let rules = RuleTable::open(&self.dir, name)?;
        Ok(Self::insert(guard, header, file, data_offset, rules))
    }

    fn insert(
        guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<RegistryInner>>,
        header: StreamHeader,
        file: fs::File,
        data_offset: u64,
        rules: RuleTable,
    ) -> StreamId {
        let mut inner = guard.borrow_mut();
        let generation = inner.next_generation;
        inner.next_generation += 1;

        let slot = inner.slots.len();
        let name = header.name.clone();
        inner.slots.push(Some(StreamEntry {
            header,
            file,
            data_offset,
            rules,
            generation,
        }));
        inner.index.insert(name, slot);
        StreamId { slot, generation }
    }

    fn refresh_status(guard: &parking_lot::ReentrantMutexGuard<'_, RefCell<RegistryInner>>) {
        let status = {
            let inner = guard.borrow();
            let mut doc = format!("<netconf xmlns=\"{}\"><streams>", event::NS_STREAMS);
            for entry in inner.slots.iter().flatten() {
                doc.push_str(&format!(
                    "<stream><name>{}</name><description>{}</description>\
                     <replaySupport>{}</replaySupport>",
                    escape_text(&entry.header.name),
                    escape_text(&entry.header.description),
                    entry.header.replay,
                ));
                if entry.header.replay {
                    doc.push_str(&format!(
                        "<replayLogCreationTime>{}</replayLogCreationTime>",
                        event::format_datetime(entry.header.created),
                    ));
                }
                doc.push_str("</stream>");
            }
            doc.push_str("</streams></netconf>");
            doc
        };
        guard.borrow_mut().status = status;
    }
}

impl std::fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        f.debug_struct("StreamRegistry")
            .field("dir", &self.dir)
            .field("streams", &inner.index.len())
            .finish()
    }
}
