//! Stream file codec.
//!
//! A stream file starts with a fixed header and continues with
//! length-prefixed event records:
//!
//! ```text
//! char[8]  "NCSTREAM"          magic
//! u16      0xFF01              byte order + format version (little-endian)
//! u16      name_len            includes the terminating NUL
//! char[]   name                NUL-terminated
//! u16      desc_len            >= 1 (empty description is a single NUL)
//! char[]   description         NUL-terminated
//! u8       replay              0 or 1
//! u64      created             epoch seconds
//! ---- data region ----
//! { u32 record_len; u64 event_time; char[record_len] xml; } ...
//! ```
//!
//! `record_len` counts the XML bytes including a trailing NUL. All reads are
//! positional (`pread`), so concurrent cursors never disturb each other; the
//! caller provides cross-process exclusion with a [`FileLock`](crate::lock::FileLock)
//! around each record operation.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

/// Magic bytes identifying a stream file.
pub const MAGIC: &[u8; 8] = b"NCSTREAM";

/// Format version word; the high byte doubles as a byte-order probe.
pub const VERSION: u16 = 0xFF01;

/// Errors from encoding or decoding stream files.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The file does not carry the stream magic (benign during directory scans).
    #[error("not a stream file")]
    NotAStream,

    /// The file ends inside a header or record.
    #[error("stream file is truncated")]
    Truncated,

    /// A name or description field is not valid UTF-8.
    #[error("stream file field is not valid UTF-8")]
    BadEncoding,

    /// A field exceeds its length prefix.
    #[error("field of {0} bytes does not fit the stream file format")]
    FieldTooLarge(usize),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Decoded stream file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Stream name; matches the `<name>.events` basename.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Whether records are appended to this stream for replay.
    pub replay: bool,
    /// Stream creation time, epoch seconds.
    pub created: i64,
}

impl StreamHeader {
    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let name = self.name.as_bytes();
        let desc = self.description.as_bytes();
        let name_len = u16::try_from(name.len() + 1).map_err(|_| CodecError::FieldTooLarge(name.len()))?;
        let desc_len = u16::try_from(desc.len() + 1).map_err(|_| CodecError::FieldTooLarge(desc.len()))?;

        let mut buf = Vec::with_capacity(MAGIC.len() + 15 + name.len() + desc.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&name_len.to_le_bytes());
        buf.extend_from_slice(name);
        buf.push(0);
        buf.extend_from_slice(&desc_len.to_le_bytes());
        buf.extend_from_slice(desc);
        buf.push(0);
        buf.push(u8::from(self.replay));
        #[allow(clippy::cast_sign_loss)]
        buf.extend_from_slice(&(self.created as u64).to_le_bytes());
        Ok(buf)
    }
}

/// Truncates the file and writes a fresh header.
///
/// Any previously recorded events are lost. Returns the offset at which the
/// data region starts.
///
/// # Errors
///
/// Returns [`CodecError`] on I/O failure or when a header field does not fit
/// its length prefix. On a failed write the file is truncated back to zero.
pub fn write_header(file: &File, header: &StreamHeader) -> Result<u64, CodecError> {
    let buf = header.encode()?;
    file.set_len(0)?;
    if let Err(e) = file.write_all_at(&buf, 0) {
        let _ = file.set_len(0);
        return Err(CodecError::Io(e));
    }
    Ok(buf.len() as u64)
}

/// Opens a stream file read+write and decodes its header.
///
/// Returns the header, the open file, and the data region offset. A file
/// whose first bytes are not [`MAGIC`], or whose version word is not exactly
/// [`VERSION`] in little-endian order (a byte-swapped word means a foreign
/// byte order), yields [`CodecError::NotAStream`].
///
/// # Errors
///
/// [`CodecError::NotAStream`] for foreign files, [`CodecError::Truncated`] /
/// [`CodecError::BadEncoding`] for damaged headers, [`CodecError::Io`] for
/// everything else.
pub fn read_header(path: &Path) -> Result<(StreamHeader, File, u64), CodecError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .mode(0o777)
        .open(path)?;

    let mut offset = 0u64;

    let mut magic = [0u8; 8];
    if file.read_exact_at(&mut magic, offset).is_err() || &magic != MAGIC {
        return Err(CodecError::NotAStream);
    }
    offset += 8;

    let version = read_u16(&file, &mut offset).map_err(|_| CodecError::NotAStream)?;
    if version != VERSION {
        return Err(CodecError::NotAStream);
    }

    let name = read_string(&file, &mut offset)?;
    let description = read_string(&file, &mut offset)?;

    let mut byte = [0u8; 1];
    read_at(&file, &mut byte, &mut offset)?;
    let replay = byte[0] != 0;

    let mut created = [0u8; 8];
    read_at(&file, &mut created, &mut offset)?;
    #[allow(clippy::cast_possible_wrap)]
    let created = u64::from_le_bytes(created) as i64;

    let header = StreamHeader {
        name,
        description,
        replay,
        created,
    };
    Ok((header, file, offset))
}

/// Metadata of one record frame, read without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameMeta {
    /// Event time, epoch seconds.
    pub time: i64,
    /// Byte length of the XML body including the trailing NUL.
    pub body_len: u32,
    /// Offset of the XML body within the file.
    pub body_offset: u64,
}

impl FrameMeta {
    /// Offset of the frame following this one.
    #[must_use]
    pub fn next_offset(&self) -> u64 {
        self.body_offset + u64::from(self.body_len)
    }
}

/// Reads the frame metadata at `offset`, or `None` at end of data.
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when the file ends inside the frame
/// prefix, or [`CodecError::Io`] on read failure.
pub fn read_frame_meta(file: &File, offset: u64) -> Result<Option<FrameMeta>, CodecError> {
    let end = file.metadata()?.len();
    if offset >= end {
        return Ok(None);
    }
    if offset + 12 > end {
        return Err(CodecError::Truncated);
    }

    let mut len = [0u8; 4];
    file.read_exact_at(&mut len, offset)?;
    let mut time = [0u8; 8];
    file.read_exact_at(&mut time, offset + 4)?;

    #[allow(clippy::cast_possible_wrap)]
    Ok(Some(FrameMeta {
        time: u64::from_le_bytes(time) as i64,
        body_len: u32::from_le_bytes(len),
        body_offset: offset + 12,
    }))
}

/// Reads the XML body of a frame located by [`read_frame_meta`].
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] when the body runs past end of file,
/// [`CodecError::BadEncoding`] when it is not UTF-8.
pub fn read_frame_body(file: &File, meta: &FrameMeta) -> Result<String, CodecError> {
    let mut body = vec![0u8; meta.body_len as usize];
    file.read_exact_at(&mut body, meta.body_offset)
        .map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => CodecError::Truncated,
            _ => CodecError::Io(e),
        })?;
    if body.last() == Some(&0) {
        body.pop();
    }
    String::from_utf8(body).map_err(|_| CodecError::BadEncoding)
}

/// Appends one record frame at the end of the file.
///
/// The caller must hold the stream's file lock. On a partial write the file
/// is truncated back to its pre-write length so a torn frame never becomes
/// visible to readers.
///
/// # Errors
///
/// Returns [`CodecError::FieldTooLarge`] for a body that does not fit the
/// `u32` length prefix, or [`CodecError::Io`] on write failure.
pub fn append_frame(file: &File, time: i64, xml: &str) -> Result<(), CodecError> {
    let body_len =
        u32::try_from(xml.len() + 1).map_err(|_| CodecError::FieldTooLarge(xml.len()))?;
    let start = file.metadata()?.len();

    let mut buf = Vec::with_capacity(12 + xml.len() + 1);
    buf.extend_from_slice(&body_len.to_le_bytes());
    #[allow(clippy::cast_sign_loss)]
    buf.extend_from_slice(&(time as u64).to_le_bytes());
    buf.extend_from_slice(xml.as_bytes());
    buf.push(0);

    if let Err(e) = file.write_all_at(&buf, start) {
        let _ = file.set_len(start);
        return Err(CodecError::Io(e));
    }
    Ok(())
}

fn read_at(file: &File, buf: &mut [u8], offset: &mut u64) -> Result<(), CodecError> {
    file.read_exact_at(buf, *offset).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CodecError::Truncated,
        _ => CodecError::Io(e),
    })?;
    *offset += buf.len() as u64;
    Ok(())
}

fn read_u16(file: &File, offset: &mut u64) -> Result<u16, CodecError> {
    let mut buf = [0u8; 2];
    read_at(file, &mut buf, offset)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_string(file: &File, offset: &mut u64) -> Result<String, CodecError> {
    let len = read_u16(file, offset)?;
    let mut buf = vec![0u8; len as usize];
    read_at(file, &mut buf, offset)?;
    if buf.last() == Some(&0) {
        buf.pop();
    }
    String::from_utf8(buf).map_err(|_| CodecError::BadEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_header() -> StreamHeader {
        StreamHeader {
            name: "netconf".to_string(),
            description: "base notifications".to_string(),
            replay: true,
            created: 1_700_000_000,
        }
    }

    fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_header_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netconf.events");
        let header = sample_header();

        let file = open_rw(&path);
        let data_offset = write_header(&file, &header).unwrap();
        drop(file);

        let (read_back, _file, offset) = read_header(&path).unwrap();
        assert_eq!(read_back, header);
        assert_eq!(offset, data_offset);
    }

    #[test]
    fn test_empty_description_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.events");
        let header = StreamHeader {
            name: "s".to_string(),
            description: String::new(),
            replay: false,
            created: 0,
        };

        let file = open_rw(&path);
        write_header(&file, &header).unwrap();
        drop(file);

        let (read_back, _file, _) = read_header(&path).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn test_foreign_file_is_not_a_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"X-rated content that is long enough")
            .unwrap();

        assert!(matches!(read_header(&path), Err(CodecError::NotAStream)));
    }

    #[test]
    fn test_short_file_is_not_a_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short");
        std::fs::write(&path, b"NC").unwrap();

        assert!(matches!(read_header(&path), Err(CodecError::NotAStream)));
    }

    #[test]
    fn test_byte_swapped_version_is_not_a_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("swapped.events");
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_be_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(b"s\0");
        std::fs::write(&path, &buf).unwrap();

        assert!(matches!(read_header(&path), Err(CodecError::NotAStream)));
    }

    #[test]
    fn test_frame_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.events");
        let file = open_rw(&path);
        let data_offset = write_header(&file, &sample_header()).unwrap();

        append_frame(&file, 100, "<a/>").unwrap();
        append_frame(&file, 200, "<b>two</b>").unwrap();

        let meta1 = read_frame_meta(&file, data_offset).unwrap().unwrap();
        assert_eq!(meta1.time, 100);
        assert_eq!(read_frame_body(&file, &meta1).unwrap(), "<a/>");

        let meta2 = read_frame_meta(&file, meta1.next_offset()).unwrap().unwrap();
        assert_eq!(meta2.time, 200);
        assert_eq!(read_frame_body(&file, &meta2).unwrap(), "<b>two</b>");

        assert!(read_frame_meta(&file, meta2.next_offset()).unwrap().is_none());
    }

    #[test]
    fn test_record_len_includes_nul() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.events");
        let file = open_rw(&path);
        let data_offset = write_header(&file, &sample_header()).unwrap();

        append_frame(&file, 1, "<x/>").unwrap();
        let meta = read_frame_meta(&file, data_offset).unwrap().unwrap();
        assert_eq!(meta.body_len, 5); // "<x/>" plus NUL
    }

    #[test]
    fn test_truncated_frame_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.events");
        let file = open_rw(&path);
        let data_offset = write_header(&file, &sample_header()).unwrap();

        // Write a lone length word with no time field behind it.
        file.write_all_at(&8u32.to_le_bytes(), data_offset).unwrap();

        assert!(matches!(
            read_frame_meta(&file, data_offset),
            Err(CodecError::Truncated)
        ));
    }

    #[test]
    fn test_write_header_truncates_existing_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.events");
        let file = open_rw(&path);
        let data_offset = write_header(&file, &sample_header()).unwrap();
        append_frame(&file, 1, "<x/>").unwrap();

        let data_offset2 = write_header(&file, &sample_header()).unwrap();
        assert_eq!(data_offset, data_offset2);
        assert!(read_frame_meta(&file, data_offset2).unwrap().is_none());
    }
}
