use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::Event;

const HEADER: usize = 4;
const TRAILER: usize = 4;

/// Serialize one event into a framed record: `[u32 len][bincode][u32 crc32]`, little-endian.
fn encode_record(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("WAL record of {} bytes exceeds limit", payload.len()),
        ));
    }
    let mut record = Vec::with_capacity(HEADER + payload.len() + TRAILER);
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    record.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(record)
}

/// Decode the record at the start of `buf`. `None` means the rest of the buffer
/// is not a valid record: short header, short body, bad checksum, or undecodable payload.
fn decode_record(buf: &[u8]) -> Option<(Event, usize)> {
    let len = u32::from_le_bytes(buf.get(..HEADER)?.try_into().ok()?) as usize;
    if len > MAX_WAL_RECORD_BYTES {
        return None;
    }
    let payload = buf.get(HEADER..HEADER + len)?;
    let crc_bytes = buf.get(HEADER + len..HEADER + len + TRAILER)?;
    if u32::from_le_bytes(crc_bytes.try_into().ok()?) != crc32fast::hash(payload) {
        return None;
    }
    let event = bincode::deserialize::<Event>(payload).ok()?;
    Some((event, HEADER + len + TRAILER))
}

/// Result of reading a log file from the start.
#[derive(Debug, Default)]
pub struct Recovered {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// Bytes after the valid prefix (a crash mid-write, or corruption).
    pub discarded: u64,
}

/// Append-only event log for one tenant.
///
/// Records are framed as `[u32 len][bincode Event][u32 crc32]`. Reading stops at the first
/// record that does not check out; everything before it is trusted, everything after is not.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Read every valid record in `path`. A missing file is an empty log.
    pub fn read(path: &Path) -> io::Result<Recovered> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Recovered::default()),
            Err(e) => return Err(e),
        };
        let mut events = Vec::new();
        let mut pos = 0;
        while let Some((event, used)) = decode_record(&bytes[pos..]) {
            events.push(event);
            pos += used;
        }
        Ok(Recovered {
            events,
            valid_len: pos as u64,
            discarded: (bytes.len() - pos) as u64,
        })
    }

    /// Replay the log at `path` and open it for appending. A damaged tail is cut off
    /// first so new records never land behind garbage.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let recovered = Self::read(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if recovered.discarded > 0 {
            tracing::warn!(
                path = %path.display(),
                kept = recovered.valid_len,
                discarded = recovered.discarded,
                "truncating damaged WAL tail"
            );
            file.set_len(recovered.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, recovered.events))
    }

    /// Buffer one record. Nothing is durable until `commit`.
    pub fn stage(&mut self, event: &Event) -> io::Result<()> {
        let record = encode_record(event)?;
        self.writer.write_all(&record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush staged records and fsync.
    pub fn commit(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.stage(event)?;
        self.commit()
    }

    /// Replace the whole log with `events`: write a sibling file, fsync it, rename it over
    /// the log, then reopen for appending.
    pub fn rewrite(&mut self, events: &[Event]) -> io::Result<()> {
        self.commit()?;
        let tmp = self.path.with_extension("wal.compact");
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for event in events {
                out.write_all(&encode_record(event)?)?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
