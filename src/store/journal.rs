use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_JOURNAL_ENTRY_BYTES;
use crate::model::ReservationRecord;

/// Encode a single record to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, record: &ReservationRecord) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only log of reservation snapshots.
///
/// Format per entry: `[u32: len][bincode: ReservationRecord][u32: crc32]`.
/// Each entry is a complete reservation with all of its occurrences, so one
/// entry is one atomic save. The latest entry per id wins on replay. A torn
/// or corrupt tail (crash mid-write) is discarded.
pub struct Journal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Journal {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Count entries already on disk toward the next compaction.
    pub fn with_existing_entries(mut self, entries: u64) -> Self {
        self.appends_since_compact = entries;
        self
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &ReservationRecord) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer one entry. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, record: &ReservationRecord) -> io::Result<()> {
        encode_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write `records` to `<path>.tmp`, fsync, then rename it over the
    /// journal and reopen for appends.
    pub fn compact(&mut self, records: &[ReservationRecord]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                encode_record(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Replay `path`, cut off any torn or corrupt tail, and open it for
    /// appends. Without the cut, new entries would land behind the garbage
    /// and be unreachable on the next replay.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<ReservationRecord>)> {
        let (records, valid_len) = read_valid(path)?;
        if let Ok(meta) = fs::metadata(path)
            && meta.len() > valid_len {
                tracing::warn!(
                    "journal {}: discarding {} bytes of torn tail",
                    path.display(),
                    meta.len() - valid_len
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
        let journal = Self::open(path)?.with_existing_entries(records.len() as u64);
        Ok((journal, records))
    }

    /// Read every valid entry in file order. A missing file is an empty journal.
    pub fn replay(path: &Path) -> io::Result<Vec<ReservationRecord>> {
        read_valid(path).map(|(records, _)| records)
    }
}

/// Valid entries plus the byte length of the prefix they occupy.
fn read_valid(path: &Path) -> io::Result<(Vec<ReservationRecord>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0u64;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_JOURNAL_ENTRY_BYTES {
            break;
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // torn write
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }

        match bincode::deserialize::<ReservationRecord>(&payload) {
            Ok(record) => records.push(record),
            Err(_) => break,
        }
        valid_len += 8 + len as u64;
    }

    Ok((records, valid_len))
}
