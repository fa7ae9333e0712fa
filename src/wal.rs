use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frames longer than this are refused on write and treated as corruption on read.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Write one frame: `[u32 len][bincode payload][u32 crc32]`, little endian.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "WAL frame too large"));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Frame {
    /// A valid event and the number of bytes its frame occupies.
    Event(Event, u64),
    /// Clean end of file.
    End,
    /// Torn or corrupt tail; everything before it is valid.
    Damaged(&'static str),
}

/// Read `buf.len()` bytes. `Ok(false)` on EOF, even mid-buffer.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_next(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(Frame::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(Frame::Damaged("frame length out of range"));
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(Frame::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(Frame::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Damaged("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, 8 + len as u64)),
        Err(_) => Ok(Frame::Damaged("undecodable payload")),
    }
}

/// Valid events of the log and the byte length of that valid prefix.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    loop {
        match decode_next(&mut reader)? {
            Frame::Event(event, bytes) => {
                events.push(event);
                valid_len += bytes;
            }
            Frame::End => break,
            Frame::Damaged(why) => {
                tracing::warn!(
                    path = %path.display(),
                    kept = events.len(),
                    "discarding WAL tail: {why}"
                );
                break;
            }
        }
    }
    Ok((events, valid_len))
}

/// Append-only event log for one club.
///
/// Appends are staged in memory and written by `flush_sync` as one batch.
/// A batch is either fully synced or cut back off the file, so the log only
/// ever holds events whose callers were told they committed. A crash can
/// still leave a torn final frame; `recover` trims it before new appends.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Frames of the batch in progress.
    pending: Vec<u8>,
    pending_events: u64,
    /// File length covered by the last successful sync.
    synced_len: u64,
    /// Set when a failed batch could not be cut off; the log refuses writes.
    poisoned: Option<String>,
    appends_since_compact: u64,
}

impl Wal {
    /// Replay the log, drop any torn tail and open it for appends.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > valid_len {
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            synced_len: valid_len,
            poisoned: None,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    #[cfg(test)]
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::recover(path)?.0)
    }

    /// Append and fsync a single event.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage an event; durable only after `flush_sync`. A refused event
    /// leaves the rest of the batch intact.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if let Some(why) = &self.poisoned {
            return Err(io::Error::other(format!("WAL unusable: {why}")));
        }
        let mark = self.pending.len();
        if let Err(e) = encode_event(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_events += 1;
        Ok(())
    }

    /// Write and fsync the staged batch. On failure the file is cut back to
    /// its last synced length and the batch is discarded.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let result = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_all());
        match &result {
            Ok(()) => {
                self.synced_len += self.pending.len() as u64;
                self.appends_since_compact += self.pending_events;
            }
            Err(e) => self.rollback(e),
        }
        self.pending.clear();
        self.pending_events = 0;
        result
    }

    fn rollback(&mut self, cause: &io::Error) {
        let trimmed = self
            .file
            .set_len(self.synced_len)
            .and_then(|()| self.file.sync_all());
        if let Err(e) = trimmed {
            tracing::error!(
                path = %self.path.display(),
                "WAL batch failed ({cause}) and could not be cut off: {e}"
            );
            self.poisoned = Some(format!("{cause}; trim failed: {e}"));
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event list to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.synced_len = file.metadata()?.len();
        self.file = file;
        self.poisoned = None;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Events committed since open or the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// All valid events in the log. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}
