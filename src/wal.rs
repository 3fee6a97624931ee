use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Append-only write-ahead log, one per tenant.
///
/// Frame format: `[u32: len][bincode: Event][u32: crc32 of the payload]`.
/// A crash can only truncate the final frame; replay stops at the first
/// short or corrupt frame and keeps everything before it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn write_frame(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum FrameRead {
    Event(Event),
    /// Clean end of file, or a truncated/corrupt tail frame.
    End,
}

fn read_frame(reader: &mut impl Read) -> io::Result<FrameRead> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(FrameRead::End),
        Err(e) => return Err(e),
    }

    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    let mut crc_buf = [0u8; 4];
    if reader.read_exact(&mut payload).is_err() || reader.read_exact(&mut crc_buf).is_err() {
        // Torn tail frame from a crash mid-append.
        return Ok(FrameRead::End);
    }

    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        tracing::warn!("WAL frame failed CRC check, discarding tail");
        return Ok(FrameRead::End);
    }

    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(FrameRead::Event(event)),
        Err(e) => {
            tracing::warn!("WAL frame failed to decode ({e}), discarding tail");
            Ok(FrameRead::End)
        }
    }
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Buffer a single event without flushing or syncing. Call `flush_sync`
    /// after the batch to durably commit everything buffered — the group
    /// commit the engine's writer task relies on.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_frame(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the buffer and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Append a single event and fsync immediately. Test convenience;
    /// production writes go through `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Phase one of compaction: write the replacement event set to a temp
    /// file and fsync it. Slow I/O — runs outside the writer's batch loop.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            write_frame(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Phase two of compaction: atomically rename the temp file over the
    /// live WAL and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Both compaction phases back to back. Test convenience.
    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Replay every intact event from disk. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        loop {
            match read_frame(&mut reader)? {
                FrameRead::Event(event) => events.push(event),
                FrameRead::End => break,
            }
        }
        Ok(events)
    }
}
