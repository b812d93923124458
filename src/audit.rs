use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::model::AuditEntry;

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit log I/O: {0}")]
    Io(#[from] io::Error),
    #[error("audit writer shut down")]
    Closed,
}

/// Destination for justification-gated operations. The engine awaits the sink
/// before applying the change, so a failed write leaves state untouched.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a group of entries belonging to one change. Either every entry
    /// lands or none does.
    async fn record_all(&self, entries: &[AuditEntry]) -> Result<(), AuditError>;

    async fn record(&self, entry: &AuditEntry) -> Result<(), AuditError> {
        self.record_all(std::slice::from_ref(entry)).await
    }
}

/// Keeps entries in memory. Useful for tests and for hosts that ship entries elsewhere.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_all(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        self.entries.lock().await.extend_from_slice(entries);
        Ok(())
    }
}

/// Encode a single entry to [len][bincode][crc32] format.
fn encode_entry(writer: &mut impl Write, entry: &AuditEntry) -> io::Result<()> {
    let payload =
        bincode::serialize(entry).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

struct AuditFile {
    writer: BufWriter<File>,
}

impl AuditFile {
    fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Encode a whole group before writing any of it, so an entry that fails
    /// to encode leaves no sibling behind.
    fn append_group(&mut self, entries: &[AuditEntry]) -> io::Result<()> {
        let mut frames = Vec::new();
        for entry in entries {
            encode_entry(&mut frames, entry)?;
        }
        self.writer.write_all(&frames)
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

type Pending = (Vec<AuditEntry>, oneshot::Sender<io::Result<()>>);

/// Owns the file and batches appends: block for the first group, drain whatever
/// else is already queued, write them all, fsync once, answer every sender.
async fn writer_loop(mut file: AuditFile, mut rx: mpsc::Receiver<Pending>) {
    while let Some(first) = rx.recv().await {
        let mut batch = vec![first];
        while let Ok(next) = rx.try_recv() {
            batch.push(next);
        }

        let entries: usize = batch.iter().map(|(group, _)| group.len()).sum();
        metrics::histogram!(crate::observability::AUDIT_FLUSH_BATCH_SIZE).record(entries as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut file, &batch);
        metrics::histogram!(crate::observability::AUDIT_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());

        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
    }
}

fn flush_batch(file: &mut AuditFile, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (group, _) in batch {
        if let Err(e) = file.append_group(group) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = file.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

/// Append-only audit log file.
///
/// Format per entry: `[u32: len][bincode: AuditEntry][u32: crc32]`.
/// A truncated or corrupt tail (crash mid-write) is discarded on replay.
pub struct AuditLog {
    tx: mpsc::Sender<Pending>,
    path: PathBuf,
}

impl AuditLog {
    /// Open (or create) the log and start its writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = AuditFile::open(path)?;
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(writer_loop(file, rx));
        Ok(Self {
            tx,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every intact entry.
    pub fn replay(path: &Path) -> io::Result<Vec<AuditEntry>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }

            match bincode::deserialize::<AuditEntry>(&payload) {
                Ok(entry) => entries.push(entry),
                Err(_) => break,
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record_all(&self, entries: &[AuditEntry]) -> Result<(), AuditError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((entries.to_vec(), tx))
            .await
            .map_err(|_| AuditError::Closed)?;
        rx.await.map_err(|_| AuditError::Closed)?.map_err(AuditError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditAction;
    use chrono::{TimeZone, Utc};
    use std::fs;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetres_test_audit");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn entry(action: AuditAction, reason: &str) -> AuditEntry {
        AuditEntry {
            id: Ulid::new(),
            subject_id: Ulid::new(),
            action,
            reason: reason.into(),
            actor_id: Ulid::new(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 3, 9, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn record_and_replay() {
        let path = tmp_path("record_and_replay.log");
        let log = AuditLog::open(&path).unwrap();
        let a = entry(AuditAction::RegionalOverride, "ambulance transfer");
        let b = entry(AuditAction::TripCancelled, "customer no-show");
        log.record(&a).await.unwrap();
        log.record(&b).await.unwrap();

        let replayed = AuditLog::replay(log.path()).unwrap();
        assert_eq!(replayed, vec![a, b]);
    }

    #[tokio::test]
    async fn concurrent_records_all_land() {
        let path = tmp_path("concurrent.log");
        let log = std::sync::Arc::new(AuditLog::open(&path).unwrap());
        let mut handles = Vec::new();
        for i in 0..50 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.record(&entry(AuditAction::ReservationDeleted, &format!("dup #{i}")))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(AuditLog::replay(&path).unwrap().len(), 50);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_written.log");
        assert!(AuditLog::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn truncated_tail_is_discarded() {
        let path = tmp_path("truncated.log");
        let keep = entry(AuditAction::ReservationEdited, "moved to tuesday");
        {
            let mut file = AuditFile::open(&path).unwrap();
            file.append_group(&[keep.clone(), entry(AuditAction::ReservationDeleted, "lost")])
                .unwrap();
            file.flush_sync().unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 3).unwrap();

        assert_eq!(AuditLog::replay(&path).unwrap(), vec![keep]);
    }

    #[test]
    fn corrupt_crc_stops_replay() {
        let path = tmp_path("corrupt.log");
        let keep = entry(AuditAction::TripCancelled, "flat tire");
        let mut bytes = Vec::new();
        encode_entry(&mut bytes, &keep).unwrap();
        let first_len = bytes.len();
        encode_entry(&mut bytes, &entry(AuditAction::TripCancelled, "bad")).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(bytes.len() > first_len);
        fs::write(&path, &bytes).unwrap();

        assert_eq!(AuditLog::replay(&path).unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn grouped_entries_land_together() {
        let path = tmp_path("grouped.log");
        let log = AuditLog::open(&path).unwrap();
        let edit = entry(AuditAction::ReservationEdited, "moved to monday");
        let grant = entry(AuditAction::RegionalOverride, "clinic transfer");
        log.record_all(&[edit.clone(), grant.clone()]).await.unwrap();
        log.record(&entry(AuditAction::TripCancelled, "flat tire")).await.unwrap();

        let replayed = AuditLog::replay(&path).unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[..2], [edit, grant]);
    }

    #[tokio::test]
    async fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let a = entry(AuditAction::ReservationEdited, "one");
        let b = entry(AuditAction::ReservationDeleted, "two");
        sink.record(&a).await.unwrap();
        sink.record(&b).await.unwrap();
        assert_eq!(sink.entries().await, vec![a, b]);
    }
}
