//! Upload sink appending JSON lines to a local spool file.

use std::path::PathBuf;

use async_trait::async_trait;
use port_types::UploadRecord;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::collaborators::UploadSink;
use crate::error::SourceResult;

/// Appends one JSON object per record; a batch is synced before returning.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl UploadSink for JsonLinesSink {
    async fn emit(&self, batch: &[UploadRecord]) -> SourceResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for record in batch {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.sync_data().await?;

        debug!(path = %self.path.display(), records = batch.len(), "Spooled uploads");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use port_types::{NodeId, UserId};

    fn record(id: i64, upload: u64) -> UploadRecord {
        UploadRecord {
            user_id: UserId::new(id),
            node_id: NodeId::generate(),
            upload,
            download: 0,
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_batches_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uploads.jsonl");
        let sink = JsonLinesSink::new(&path);

        sink.emit(&[record(1, 10), record(2, 20)]).await.unwrap();
        sink.emit(&[record(3, 30)]).await.unwrap();
        sink.emit(&[]).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<UploadRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].user_id, UserId::new(3));
        assert_eq!(records[1].upload, 20);
    }

    #[tokio::test]
    async fn test_unwritable_spool_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("missing").join("uploads.jsonl"));
        assert!(sink.emit(&[record(1, 10)]).await.is_err());
    }
}
