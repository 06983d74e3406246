//! Download session manager (C6): `DOWNLOAD_REQ` with
//! `options.action ∈ {start, chunk, finish, abort}`.
//!
//! State machine: `CREATED -> SERVING -> DONE` (via `finish`) or
//! `-> ABORTED` (via `abort` or connection drop). Re-requesting an
//! already-served index is permitted; `servedChunks` only grows and
//! `nextChunk` never decreases.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;

use crate::error::CoreError;

pub const MIN_CHUNK_SIZE: u64 = 64 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

struct DownloadSession {
    path: PathBuf,
    file_size: u64,
    chunk_size: u64,
    total_chunks: u64,
    next_chunk: u64,
    served_chunks: HashSet<u64>,
    bytes_sent: u64,
    owner: String,
    #[allow(dead_code)]
    start_time: Instant,
    last_activity: Instant,
}

pub struct StartOutcome {
    pub session_id: String,
    pub file_size: u64,
    pub total_chunks: u64,
    pub accepted_chunk_size: u64,
}

pub struct ChunkOutcome {
    pub data: Vec<u8>,
    pub chunk_index: u64,
    pub done: bool,
}

pub struct FinishOutcome {
    pub bytes_sent: u64,
    pub file_size: u64,
}

#[derive(Default)]
pub struct DownloadSessions {
    inner: Mutex<std::collections::HashMap<String, DownloadSession>>,
}

impl DownloadSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(
        &self,
        owner: &str,
        target: PathBuf,
        chunk_size: Option<u64>,
    ) -> Result<StartOutcome, CoreError> {
        let metadata = tokio::fs::metadata(&target).await?;
        if !metadata.is_file() {
            return Err(CoreError::WrongType("not a regular file".into()));
        }
        let file_size = metadata.len();
        let chunk_size = chunk_size
            .unwrap_or(DEFAULT_CHUNK_SIZE)
            .clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        let total_chunks = (file_size.div_ceil(chunk_size)).max(1);

        let id = generate_session_id(&target);
        let session = DownloadSession {
            path: target,
            file_size,
            chunk_size,
            total_chunks,
            next_chunk: 0,
            served_chunks: HashSet::new(),
            bytes_sent: 0,
            owner: owner.to_string(),
            start_time: Instant::now(),
            last_activity: Instant::now(),
        };

        self.inner.lock().await.insert(id.clone(), session);

        Ok(StartOutcome {
            session_id: id,
            file_size,
            total_chunks,
            accepted_chunk_size: chunk_size,
        })
    }

    pub async fn read_chunk(
        &self,
        session_id: &str,
        chunk_index: Option<u64>,
    ) -> Result<ChunkOutcome, CoreError> {
        let (path, chunk_size, index) = {
            let mut inner = self.inner.lock().await;
            let session = inner
                .get_mut(session_id)
                .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
            let index = chunk_index.unwrap_or(session.next_chunk);
            if index >= session.total_chunks {
                return Err(CoreError::DecodeError(format!(
                    "chunk index {index} out of range (total {})",
                    session.total_chunks
                )));
            }
            (session.path.clone(), session.chunk_size, index)
        };

        let offset = index * chunk_size;
        let mut file = File::open(&path).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; chunk_size as usize];
        let mut total_read = 0usize;
        loop {
            let n = file.read(&mut buf[total_read..]).await?;
            if n == 0 {
                break;
            }
            total_read += n;
            if total_read == buf.len() {
                break;
            }
        }
        buf.truncate(total_read);

        let done = total_read == 0;

        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.get_mut(session_id) {
            if !done && session.served_chunks.insert(index) {
                session.bytes_sent += total_read as u64;
            }
            session.next_chunk = session.next_chunk.max(index + 1);
            session.last_activity = Instant::now();
        }

        Ok(ChunkOutcome {
            data: buf,
            chunk_index: index,
            done,
        })
    }

    pub async fn finish(&self, session_id: &str) -> Result<FinishOutcome, CoreError> {
        let mut inner = self.inner.lock().await;
        let session = inner
            .remove(session_id)
            .ok_or_else(|| CoreError::SessionNotFound(session_id.to_string()))?;
        Ok(FinishOutcome {
            bytes_sent: session.bytes_sent,
            file_size: session.file_size,
        })
    }

    /// Removes the session unconditionally; succeeds even if it was never
    /// present, matching the reference's "success either way" abort.
    pub async fn abort(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    pub async fn sweep_owner(&self, owner: &str) {
        let mut inner = self.inner.lock().await;
        inner.retain(|_, session| session.owner != owner);
    }

    /// Removes sessions whose `lastActivity` is older than `max_idle`.
    pub async fn reap_idle(&self, max_idle: std::time::Duration) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.len();
        inner.retain(|_, session| session.last_activity.elapsed() <= max_idle);
        before - inner.len()
    }
}

fn generate_session_id(target: &std::path::Path) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("dl_{now}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempfile(size: usize) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("tcp-core-download-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("payload.bin");
        std::fs::write(&file, vec![0xAB; size]).unwrap();
        file
    }

    #[tokio::test]
    async fn chunk_reading_is_monotonic_and_idempotent() {
        let path = tempfile(3 * 1024 * 1024);
        let sessions = DownloadSessions::new();
        let start = sessions.start("c1", path, None).await.unwrap();
        assert_eq!(start.total_chunks, 2);

        let c0 = sessions
            .read_chunk(&start.session_id, Some(0))
            .await
            .unwrap();
        assert_eq!(c0.data.len(), 2 * 1024 * 1024);

        let c1 = sessions
            .read_chunk(&start.session_id, Some(1))
            .await
            .unwrap();
        assert_eq!(c1.data.len(), 1024 * 1024);

        // Re-fetching an already-served index is permitted and idempotent.
        let c0_again = sessions
            .read_chunk(&start.session_id, Some(0))
            .await
            .unwrap();
        assert_eq!(c0_again.data.len(), 2 * 1024 * 1024);

        let finish = sessions.finish(&start.session_id).await.unwrap();
        assert_eq!(finish.bytes_sent, 3 * 1024 * 1024);
    }

    #[tokio::test]
    async fn abort_succeeds_even_when_session_is_unknown() {
        let sessions = DownloadSessions::new();
        sessions.abort("does-not-exist").await;
    }

    #[tokio::test]
    async fn reading_past_end_of_file_reports_done() {
        let path = tempfile(1024);
        let sessions = DownloadSessions::new();
        let start = sessions.start("c1", path, Some(2 * 1024 * 1024)).await.unwrap();
        assert_eq!(start.total_chunks, 1);

        let chunk = sessions
            .read_chunk(&start.session_id, Some(0))
            .await
            .unwrap();
        assert!(!chunk.done);
        assert_eq!(chunk.data.len(), 1024);
    }
}
