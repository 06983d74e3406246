//! Upload session manager (C5): `UPLOAD_REQ` / `UPLOAD_DATA` / `UPLOAD_END`.
//!
//! State machine: `OPEN -> RECEIVING -> COMPLETE` (via `UPLOAD_END`) or
//! `-> ABANDONED` (via connection drop or an unrecoverable error).
//! `RECEIVING` may be re-entered for an already-seen chunk index; the
//! write is idempotent and does not inflate `bytesReceived`.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::error::CoreError;

pub const MAX_CHUNK_SIZE: u64 = 4 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

pub struct UploadSession {
    pub id: String,
    pub path: PathBuf,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub file_size: u64,
    pub received_chunks: HashSet<u64>,
    pub bytes_received: u64,
    file: File,
    pub owner: String,
    pub start_time: Instant,
    pub last_activity: Instant,
}

pub struct UploadOutcome {
    pub session_id: String,
    pub accepted_chunk_size: u64,
}

pub struct ChunkOutcome {
    pub received_chunks: usize,
    pub bytes_received: u64,
}

pub struct FinishOutcome {
    pub elapsed_ms: u64,
    pub bytes_received: u64,
    pub average_speed_bps: f64,
}

#[derive(Default)]
pub struct UploadSessions {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, UploadSession>,
    /// Insertion order, most-recent last — used for the sessionId
    /// fallback on `UPLOAD_DATA`/`UPLOAD_END` (Design Notes §9.2).
    recency: Vec<String>,
}

impl UploadSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(
        &self,
        owner: &str,
        target: PathBuf,
        session_id: Option<String>,
        file_size: u64,
        chunk_size: u64,
        total_chunks: u64,
    ) -> Result<UploadOutcome, CoreError> {
        let chunk_size = chunk_size.clamp(1, MAX_CHUNK_SIZE);
        let total_chunks = if total_chunks == 0 {
            (file_size.div_ceil(chunk_size)).max(1)
        } else {
            total_chunks
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target)
            .await?;
        file.set_len(file_size).await?;

        let id = session_id.unwrap_or_else(|| generate_session_id(&target));

        let session = UploadSession {
            id: id.clone(),
            path: target,
            total_chunks,
            chunk_size,
            file_size,
            received_chunks: HashSet::new(),
            bytes_received: 0,
            file,
            owner: owner.to_string(),
            start_time: Instant::now(),
            last_activity: Instant::now(),
        };

        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.sessions.remove(&id) {
            drop(existing);
            inner.recency.retain(|s| s != &id);
        }
        inner.sessions.insert(id.clone(), session);
        inner.recency.push(id.clone());

        Ok(UploadOutcome {
            session_id: id,
            accepted_chunk_size: chunk_size,
        })
    }

    pub async fn write_chunk(
        &self,
        session_id: Option<&str>,
        chunk_index: u64,
        data: &[u8],
    ) -> Result<ChunkOutcome, CoreError> {
        let mut inner = self.inner.lock().await;
        let id = resolve_session_id(&inner, session_id)?;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or_else(|| CoreError::SessionNotFound(id.clone()))?;

        let offset = chunk_index * session.chunk_size;
        session.file.seek(std::io::SeekFrom::Start(offset)).await?;
        session.file.write_all(data).await?;

        if session.received_chunks.insert(chunk_index) {
            session.bytes_received += data.len() as u64;
        }
        session.last_activity = Instant::now();

        Ok(ChunkOutcome {
            received_chunks: session.received_chunks.len(),
            bytes_received: session.bytes_received,
        })
    }

    pub async fn finish(&self, session_id: Option<&str>) -> Result<FinishOutcome, CoreError> {
        let mut inner = self.inner.lock().await;
        let id = resolve_session_id(&inner, session_id)?;
        let session = inner
            .sessions
            .get(&id)
            .ok_or_else(|| CoreError::SessionNotFound(id.clone()))?;

        let missing: Vec<u64> = (0..session.total_chunks)
            .filter(|i| !session.received_chunks.contains(i))
            .take(10)
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::IncompleteUpload(missing));
        }

        let mut session = inner.sessions.remove(&id).expect("checked above");
        inner.recency.retain(|s| s != &id);
        session.file.flush().await?;
        drop(session.file);

        let on_disk = tokio::fs::metadata(&session.path).await?.len();
        if on_disk != session.file_size {
            return Err(CoreError::SizeMismatch {
                expected: session.file_size,
                actual: on_disk,
            });
        }

        let elapsed = session.start_time.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let average_speed_bps = if elapsed.as_secs_f64() > 0.0 {
            session.bytes_received as f64 / elapsed.as_secs_f64()
        } else {
            session.bytes_received as f64
        };

        Ok(FinishOutcome {
            elapsed_ms,
            bytes_received: session.bytes_received,
            average_speed_bps,
        })
    }

    /// Removes sessions whose `lastActivity` is older than `max_idle`.
    /// Disabled by default; opt-in via the server's `idle_reap_secs`
    /// config (SPEC_FULL §5).
    pub async fn reap_idle(&self, max_idle: std::time::Duration) -> usize {
        let mut inner = self.inner.lock().await;
        let stale: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.last_activity.elapsed() > max_idle)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            inner.sessions.remove(id);
            inner.recency.retain(|s| s != id);
        }
        stale.len()
    }

    /// Best-effort cleanup for sessions owned by a dropped connection.
    pub async fn sweep_owner(&self, owner: &str) {
        let mut inner = self.inner.lock().await;
        let stale: Vec<String> = inner
            .sessions
            .iter()
            .filter(|(_, s)| s.owner == owner)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            inner.sessions.remove(&id);
            inner.recency.retain(|s| s != &id);
        }
    }
}

fn resolve_session_id(inner: &Inner, explicit: Option<&str>) -> Result<String, CoreError> {
    match explicit {
        Some(id) => Ok(id.to_string()),
        None => {
            let fallback = inner
                .recency
                .last()
                .cloned()
                .ok_or_else(|| CoreError::MissingParameter("sessionId"))?;
            tracing::warn!(
                session_id = %fallback,
                "UPLOAD_DATA/UPLOAD_END missing sessionId, falling back to most recent session"
            );
            Ok(fallback)
        }
    }
}

fn generate_session_id(target: &std::path::Path) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("ul_{now}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempdir() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("tcp-core-upload-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn resend_does_not_inflate_bytes_received() {
        let root = tempdir();
        let sessions = UploadSessions::new();
        let outcome = sessions
            .start("c1", root.join("f.bin"), Some("s1".into()), 8, 4, 2)
            .await
            .unwrap();

        sessions
            .write_chunk(Some(&outcome.session_id), 0, &[1, 2, 3, 4])
            .await
            .unwrap();
        let first = sessions
            .write_chunk(Some(&outcome.session_id), 1, &[5, 6, 7, 8])
            .await
            .unwrap();
        assert_eq!(first.bytes_received, 8);

        let resend = sessions
            .write_chunk(Some(&outcome.session_id), 1, &[5, 6, 7, 8])
            .await
            .unwrap();
        assert_eq!(resend.bytes_received, 8);
    }

    #[tokio::test]
    async fn finish_reports_missing_chunks() {
        let root = tempdir();
        let sessions = UploadSessions::new();
        let outcome = sessions
            .start("c1", root.join("f.bin"), Some("s1".into()), 8, 4, 2)
            .await
            .unwrap();
        sessions
            .write_chunk(Some(&outcome.session_id), 0, &[1, 2, 3, 4])
            .await
            .unwrap();

        let err = sessions.finish(Some(&outcome.session_id)).await.unwrap_err();
        assert!(matches!(err, CoreError::IncompleteUpload(missing) if missing == vec![1]));
    }

    #[tokio::test]
    async fn missing_session_id_falls_back_to_most_recent() {
        let root = tempdir();
        let sessions = UploadSessions::new();
        let outcome = sessions
            .start("c1", root.join("f.bin"), None, 4, 4, 1)
            .await
            .unwrap();

        let result = sessions.write_chunk(None, 0, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(result.bytes_received, 4);
        assert!(!outcome.session_id.is_empty());
    }
}
