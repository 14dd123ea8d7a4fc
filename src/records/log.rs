//! Single-file record store.
//!
//! Records live in one append-only log. Every put, delete and clear appends
//! a checksummed frame and syncs it before returning; an in-memory map
//! points each live key at its newest frame. Superseded frames are
//! reclaimed by compaction.

use crate::error::{Result, StoreError};
use crate::fsutil;
use crate::records::RecordStore;
use crate::types::MAX_KEY_LEN;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for the record log.
const LOG_MAGIC: &[u8; 4] = b"RLG\0";

/// Current log format version.
const LOG_VERSION: u8 = 2;

/// Header size (magic + version).
const HEADER_SIZE: u64 = 4 + 1;

const HEADER: [u8; HEADER_SIZE as usize] = [
    LOG_MAGIC[0],
    LOG_MAGIC[1],
    LOG_MAGIC[2],
    LOG_MAGIC[3],
    LOG_VERSION,
];

/// Frame header: kind + key length + payload length + header checksum.
const FRAME_HEADER: u64 = 1 + 2 + 4 + 4;

/// Fixed part of a frame: header + trailing checksum.
const FRAME_OVERHEAD: u64 = FRAME_HEADER + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameKind {
    Put = 1,
    Delete = 2,
    Clear = 3,
}

impl FrameKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameKind::Put),
            2 => Some(FrameKind::Delete),
            3 => Some(FrameKind::Clear),
            _ => None,
        }
    }
}

struct Frame {
    kind: FrameKind,
    key: String,
    payload: Vec<u8>,
}

/// Outcome of reading one frame.
enum FrameRead {
    /// Clean end of log at a frame boundary.
    End,
    /// A complete frame and its length on disk.
    Frame(Frame, u64),
    /// The log ends in the middle of a frame.
    Torn,
    /// The frame header fails its own checksum, so its lengths are untrusted.
    BadHeader { expected: u32, got: u32 },
    /// A complete frame whose checksum does not match.
    BadChecksum { len: u64, expected: u32, got: u32 },
}

/// Location of a live record's newest frame.
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u64,
    payload_len: u64,
}

/// Record store backed by a single append-only log file.
pub struct LogStore {
    /// Path to the log file.
    path: PathBuf,

    /// Handle used for appends.
    writer: File,

    /// Independent handle (own file offset) used for reads.
    reader: Mutex<File>,

    /// Live key -> newest frame.
    slots: HashMap<String, Slot>,

    /// End of the last valid frame.
    end: u64,

    /// Sum of live payload sizes.
    live_payload: u64,

    /// Sum of live frame sizes.
    live_frames: u64,

    /// Dead bytes tolerated before automatic compaction.
    compaction_threshold: u64,
}

impl LogStore {
    /// Open or create a record log.
    ///
    /// A torn final frame (crash mid-append) is truncated away; a damaged
    /// frame followed by more data is reported as corruption.
    pub fn open(path: impl AsRef<Path>, compaction_threshold: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let stale = fsutil::tmp_path(&path);
        if stale.exists() {
            warn!(path = %stale.display(), "removing unfinished compaction output");
            fs::remove_file(&stale)?;
        }

        let mut writer = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let len = writer.metadata()?.len();
        if len < HEADER_SIZE {
            Self::write_header(&mut writer, &path, len)?;
        } else {
            Self::verify_header(&mut writer)?;
        }

        let reader = File::open(&path)?;

        let mut store = Self {
            path,
            writer,
            reader: Mutex::new(reader),
            slots: HashMap::new(),
            end: HEADER_SIZE,
            live_payload: 0,
            live_frames: 0,
            compaction_threshold,
        };
        store.scan()?;

        Ok(store)
    }

    /// Bytes held by superseded frames.
    pub fn dead_bytes(&self) -> u64 {
        self.end - HEADER_SIZE - self.live_frames
    }

    /// Current size of the log file.
    pub fn file_size(&self) -> u64 {
        self.end
    }

    /// Write the header of a new log, or finish one cut short by a crash.
    fn write_header(file: &mut File, path: &Path, len: u64) -> Result<()> {
        if len > 0 {
            let mut partial = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut partial)?;
            if partial[..] != HEADER[..partial.len()] {
                return Err(StoreError::InvalidFormat("Invalid record log magic".into()));
            }
            warn!(path = %path.display(), len, "rewriting truncated record log header");
        }

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&HEADER)?;
        file.sync_all()?;
        Ok(())
    }

    /// Whether everything from `offset` to the end of the log is zero bytes.
    fn is_zero_tail(&self, offset: u64) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = [0u8; 4096];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                return Ok(true);
            }
            if buf[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
        }
    }

    fn verify_header(file: &mut File) -> Result<()> {
        file.seek(SeekFrom::Start(0))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|_| StoreError::InvalidFormat("Record log header truncated".into()))?;
        if &magic != LOG_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid record log magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)
            .map_err(|_| StoreError::InvalidFormat("Record log header truncated".into()))?;
        if version[0] != LOG_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported record log version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    /// Rebuild the slot map from the log.
    fn scan(&mut self) -> Result<()> {
        let file_len = self.writer.metadata()?.len();
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut offset = HEADER_SIZE;
        loop {
            match read_frame(&mut reader, file_len - offset)? {
                FrameRead::End => break,
                FrameRead::Frame(frame, len) => {
                    self.apply(frame, offset, len);
                    offset += len;
                }
                FrameRead::Torn => {
                    warn!(
                        path = %self.path.display(),
                        offset,
                        dropped = file_len - offset,
                        "truncating torn record log tail"
                    );
                    self.truncate(offset)?;
                    break;
                }
                FrameRead::BadHeader { expected, got } => {
                    // Space allocated but never written before a crash.
                    if self.is_zero_tail(offset)? {
                        warn!(
                            path = %self.path.display(),
                            offset,
                            "truncating zero-filled record log tail"
                        );
                        self.truncate(offset)?;
                        break;
                    }
                    return Err(StoreError::Corruption(format!(
                        "Record log frame header at offset {} is damaged (checksum {:#010x}, computed {:#010x})",
                        offset, expected, got
                    )));
                }
                FrameRead::BadChecksum { len, expected, got } => {
                    if offset + len == file_len {
                        warn!(
                            path = %self.path.display(),
                            offset,
                            "truncating record log tail with bad checksum"
                        );
                        self.truncate(offset)?;
                        break;
                    }
                    return Err(StoreError::ChecksumMismatch { expected, got });
                }
            }
        }

        self.end = offset;
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> Result<()> {
        self.writer.set_len(len)?;
        self.writer.sync_all()?;
        Ok(())
    }

    /// Apply a frame read from (or just written to) the log.
    fn apply(&mut self, frame: Frame, offset: u64, len: u64) {
        match frame.kind {
            FrameKind::Put => {
                self.forget(&frame.key);
                let payload_len = frame.payload.len() as u64;
                self.live_payload += payload_len;
                self.live_frames += len;
                self.slots.insert(
                    frame.key,
                    Slot {
                        offset,
                        len,
                        payload_len,
                    },
                );
            }
            FrameKind::Delete => {
                self.forget(&frame.key);
            }
            FrameKind::Clear => {
                self.slots.clear();
                self.live_payload = 0;
                self.live_frames = 0;
            }
        }
    }

    fn forget(&mut self, key: &str) {
        if let Some(old) = self.slots.remove(key) {
            self.live_payload -= old.payload_len;
            self.live_frames -= old.len;
        }
    }

    /// Append an encoded frame and sync it. Returns the frame's offset.
    fn append(&mut self, frame: &[u8]) -> Result<u64> {
        let offset = self.end;
        self.writer.seek(SeekFrom::Start(offset))?;

        let written = self
            .writer
            .write_all(frame)
            .and_then(|_| self.writer.sync_data());
        if let Err(e) = written {
            // Cut the partial frame so the next append starts on a boundary.
            let _ = self.writer.set_len(offset);
            return Err(e.into());
        }

        self.end = offset + frame.len() as u64;
        Ok(offset)
    }

    fn write_frame(&mut self, kind: FrameKind, key: &str, payload: &[u8]) -> Result<()> {
        let bytes = encode_frame(kind, key, payload)?;
        let len = bytes.len() as u64;
        let offset = self.append(&bytes)?;

        self.apply(
            Frame {
                kind,
                key: key.to_string(),
                payload: payload.to_vec(),
            },
            offset,
            len,
        );

        self.maybe_compact();
        Ok(())
    }

    fn maybe_compact(&mut self) {
        let dead = self.dead_bytes();
        if dead > self.compaction_threshold && dead > self.live_frames {
            if let Err(e) = self.compact() {
                // The triggering write is already durable; retry on the next one.
                warn!(path = %self.path.display(), error = %e, "record log compaction failed");
            }
        }
    }
}

impl RecordStore for LogStore {
    fn put(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        self.write_frame(FrameKind::Put, key, payload)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let slot = self
            .slots
            .get(key)
            .copied()
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;

        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(slot.offset))?;

        match read_frame(&mut *reader, slot.len)? {
            FrameRead::Frame(frame, _) => {
                if frame.kind != FrameKind::Put || frame.key != key {
                    return Err(StoreError::Corruption(format!(
                        "Record log slot for {} points at the wrong frame",
                        key
                    )));
                }
                Ok(frame.payload)
            }
            FrameRead::BadChecksum { expected, got, .. }
            | FrameRead::BadHeader { expected, got } => {
                Err(StoreError::ChecksumMismatch { expected, got })
            }
            FrameRead::End | FrameRead::Torn => Err(StoreError::Corruption(format!(
                "Record log frame for {} is truncated",
                key
            ))),
        }
    }

    fn delete(&mut self, key: &str) -> Result<bool> {
        if !self.slots.contains_key(key) {
            return Ok(false);
        }
        self.write_frame(FrameKind::Delete, key, &[])?;
        Ok(true)
    }

    fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    fn keys(&self) -> Vec<String> {
        self.slots.keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn clear(&mut self) -> Result<()> {
        if self.slots.is_empty() {
            return Ok(());
        }
        self.write_frame(FrameKind::Clear, "", &[])
    }

    fn byte_len(&self) -> u64 {
        self.live_payload
    }

    fn sync(&mut self) -> Result<()> {
        self.writer.sync_all()?;
        Ok(())
    }

    /// Rewrite the log with live frames only, then swap it in atomically.
    fn compact(&mut self) -> Result<bool> {
        if self.dead_bytes() == 0 {
            return Ok(false);
        }

        let tmp = fsutil::tmp_path(&self.path);
        let mut out = BufWriter::new(File::create(&tmp)?);
        out.write_all(&HEADER)?;

        let mut slots = HashMap::with_capacity(self.slots.len());
        let mut offset = HEADER_SIZE;
        {
            let mut reader = self.reader.lock();
            let mut buf = Vec::new();
            for (key, slot) in &self.slots {
                buf.resize(slot.len as usize, 0);
                reader.seek(SeekFrom::Start(slot.offset))?;
                reader.read_exact(&mut buf)?;
                out.write_all(&buf)?;
                slots.insert(key.clone(), Slot { offset, ..*slot });
                offset += slot.len;
            }
        }

        let file = out.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        // Handles follow the file through the rename; nothing changes if
        // opening them or the rename fails.
        let swapped = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&tmp)
            .and_then(|writer| Ok((writer, File::open(&tmp)?)))
            .and_then(|handles| fs::rename(&tmp, &self.path).map(|_| handles));
        let (writer, reader) = match swapped {
            Ok(handles) => handles,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };
        if let Some(parent) = self.path.parent() {
            fsutil::sync_dir(parent);
        }

        self.writer = writer;
        *self.reader.lock() = reader;

        let reclaimed = self.end - offset;
        self.slots = slots;
        self.end = offset;
        self.live_frames = offset - HEADER_SIZE;

        debug!(path = %self.path.display(), reclaimed, "compacted record log");
        Ok(true)
    }
}

fn encode_frame(kind: FrameKind, key: &str, payload: &[u8]) -> Result<Vec<u8>> {
    if key.len() > MAX_KEY_LEN {
        return Err(StoreError::InvalidArgument(format!(
            "Key is {} bytes, limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        StoreError::InvalidArgument(format!("Payload of {} bytes is too large", payload.len()))
    })?;

    let mut buf = Vec::with_capacity(FRAME_OVERHEAD as usize + key.len() + payload.len());
    buf.push(kind as u8);
    buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    let header_checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&header_checksum.to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(payload);

    let checksum = crc32fast::hash(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    Ok(buf)
}

/// Read one frame. `remaining` bounds how many bytes the frame may span.
///
/// Lengths are trusted only once the frame header checksum matches, so a
/// damaged length is reported as `BadHeader` rather than a torn tail.
fn read_frame(reader: &mut impl Read, remaining: u64) -> Result<FrameRead> {
    if remaining == 0 {
        return Ok(FrameRead::End);
    }
    if remaining < FRAME_HEADER {
        return Ok(FrameRead::Torn);
    }

    let mut head = [0u8; FRAME_HEADER as usize];
    if !fill(reader, &mut head)? {
        return Ok(FrameRead::Torn);
    }

    let expected = u32::from_le_bytes([head[7], head[8], head[9], head[10]]);
    let got = crc32fast::hash(&head[..7]);
    if expected != got {
        return Ok(FrameRead::BadHeader { expected, got });
    }

    let key_len = u16::from_le_bytes([head[1], head[2]]) as u64;
    let payload_len = u32::from_le_bytes([head[3], head[4], head[5], head[6]]) as u64;
    let len = FRAME_OVERHEAD + key_len + payload_len;
    if len > remaining {
        return Ok(FrameRead::Torn);
    }

    let mut key = vec![0u8; key_len as usize];
    let mut payload = vec![0u8; payload_len as usize];
    let mut checksum = [0u8; 4];
    if !fill(reader, &mut key)? || !fill(reader, &mut payload)? || !fill(reader, &mut checksum)? {
        return Ok(FrameRead::Torn);
    }

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&head);
    hasher.update(&key);
    hasher.update(&payload);

    let expected = u32::from_le_bytes(checksum);
    let got = hasher.finalize();
    if expected != got {
        return Ok(FrameRead::BadChecksum { len, expected, got });
    }

    let kind = FrameKind::from_byte(head[0])
        .ok_or_else(|| StoreError::Corruption(format!("Unknown frame kind {}", head[0])))?;
    let key = String::from_utf8(key)
        .map_err(|_| StoreError::Corruption("Record key is not valid UTF-8".into()))?;

    Ok(FrameRead::Frame(Frame { kind, key, payload }, len))
}

/// `read_exact` that reports a short read as `false` instead of an error.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
