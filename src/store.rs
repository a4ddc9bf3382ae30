use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::model::Reservation;

/// Durable home of committed reservations. Full-rewrite semantics: callers
/// read everything, and replace everything. Serializing read-then-write is
/// the caller's job (see `Engine::commit`).
pub trait ReservationStore: Send + Sync {
    fn load_all(&self) -> io::Result<Vec<Reservation>>;
    fn replace_all(&self, reservations: &[Reservation]) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: Mutex<Vec<Reservation>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<Reservation>) -> Self {
        Self { rows: Mutex::new(rows) }
    }
}

impl ReservationStore for InMemoryStore {
    fn load_all(&self) -> io::Result<Vec<Reservation>> {
        Ok(self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn replace_all(&self, reservations: &[Reservation]) -> io::Result<()> {
        *self.rows.lock().unwrap_or_else(|e| e.into_inner()) = reservations.to_vec();
        Ok(())
    }
}

/// Encode a single reservation to [len][bincode][crc32] format.
fn encode_record(writer: &mut impl Write, reservation: &Reservation) -> io::Result<()> {
    let payload =
        bincode::serialize(reservation).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Snapshot file of all committed reservations.
///
/// Format per record: `[u32: len][bincode: Reservation][u32: crc32]`.
/// Every rewrite goes to a temp file which is fsynced and renamed over the
/// snapshot, so readers see either the old set or the new one. Since the file
/// is never appended to in place, a short or corrupt record is an error rather
/// than a torn tail.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("snap.tmp")
    }
}

impl ReservationStore for SnapshotStore {
    fn load_all(&self) -> io::Result<Vec<Reservation>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut rows = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            reader.read_exact(&mut payload).map_err(|e| truncated(e, rows.len()))?;

            let mut crc_buf = [0u8; 4];
            reader.read_exact(&mut crc_buf).map_err(|e| truncated(e, rows.len()))?;
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("snapshot record {} failed crc check", rows.len()),
                ));
            }

            let row = bincode::deserialize::<Reservation>(&payload)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            rows.push(row);
        }

        Ok(rows)
    }

    fn replace_all(&self, reservations: &[Reservation]) -> io::Result<()> {
        let tmp_path = self.tmp_path();
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for row in reservations {
            encode_record(&mut writer, row)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp_path, &self.path)
    }
}

fn truncated(e: io::Error, index: usize) -> io::Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("snapshot record {index} is truncated"),
        )
    } else {
        e
    }
}
