use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Frames larger than this are treated as corruption rather than allocated.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Append-only log of `T` records.
///
/// Frame layout: `[u32 le: len][bincode payload][u32 le: crc32(payload)]`.
/// Replay stops at the first torn or corrupt frame. `recover` also cuts
/// the file back to the last intact frame, so records appended after a
/// crash are never stranded behind a broken one.
///
/// The appointment event log and the audit journal are both `Wal`s.
pub struct Wal<T> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(&T)>,
}

fn write_frame(writer: &mut impl Write, record: &impl Serialize) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf` completely. `Ok(false)` on a clean or torn end of file.
fn fill(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

enum Frame {
    Payload(Vec<u8>),
    End,
    Torn,
    Corrupt(&'static str),
}

fn read_frame(reader: &mut impl Read) -> io::Result<Frame> {
    let mut word = [0u8; 4];
    if !fill(reader, &mut word)? {
        return Ok(Frame::End);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_BYTES {
        return Ok(Frame::Corrupt("oversized frame"));
    }
    let mut payload = vec![0u8; len];
    if !fill(reader, &mut payload)? || !fill(reader, &mut word)? {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(Frame::Corrupt("checksum mismatch"));
    }
    Ok(Frame::Payload(payload))
}

impl<T: Serialize + DeserializeOwned> Wal<T> {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Append one record and fsync.
    pub fn append(&mut self, record: &T) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer one record. Durable only after the next `flush_sync`.
    pub fn append_buffered(&mut self, record: &T) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `records`: write a synced sibling file, then
    /// rename it over the log and reopen for appending.
    pub fn compact(&mut self, records: &[T]) -> io::Result<()> {
        let staging = self.path.with_extension("compact");
        {
            let mut writer = BufWriter::new(File::create(&staging)?);
            for record in records {
                write_frame(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Every intact record in the log at `path`. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<T>> {
        Ok(Self::scan(path)?.0)
    }

    /// Replay the log, truncate anything past the last intact frame, and
    /// open it for appending.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<T>)> {
        let (records, intact) = Self::scan(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > intact
        {
            tracing::warn!(
                path = %path.display(),
                dropped = meta.len() - intact,
                "truncating log to last intact frame"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(intact)?;
            file.sync_all()?;
        }
        Ok((Self::open(path)?, records))
    }

    /// Intact records and the byte length they occupy.
    fn scan(path: &Path) -> io::Result<(Vec<T>, u64)> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut intact = 0u64;

        loop {
            let payload = match read_frame(&mut reader)? {
                Frame::Payload(payload) => payload,
                Frame::End => break,
                Frame::Torn => {
                    tracing::warn!(path = %path.display(), kept = records.len(), "torn tail discarded");
                    break;
                }
                Frame::Corrupt(why) => {
                    tracing::warn!(path = %path.display(), kept = records.len(), "{why}, stopping replay");
                    break;
                }
            };
            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), "undecodable record, stopping replay: {e}");
                    break;
                }
            }
            intact += 8 + payload.len() as u64;
        }

        Ok((records, intact))
    }
}
