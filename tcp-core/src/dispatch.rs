//! Request dispatcher (C7): operation code -> handler, with timing and
//! error-to-response conversion. Never panics; every handler failure
//! becomes a `success=false` response carrying the taxonomy kind from
//! [`crate::error::CoreError::kind`].

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::download::DownloadSessions;
use crate::error::CoreError;
use crate::op;
use crate::path;
use crate::request::Request;
use crate::response::{FileInfo, Response, ServerInfo};
use crate::upload::UploadSessions;
use crate::fileops;

pub const PROTOCOL_VERSION: &str = "1.0";
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;
pub const CONCURRENT_OPERATIONS: u64 = 16;

pub struct ServerState {
    pub root: PathBuf,
    pub upload_sessions: UploadSessions,
    pub download_sessions: DownloadSessions,
}

impl ServerState {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            upload_sessions: UploadSessions::new(),
            download_sessions: DownloadSessions::new(),
        }
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: "tcp-server".to_string(),
            version: PROTOCOL_VERSION.to_string(),
            protocol: "tcp".to_string(),
            supported_formats: vec!["protobuf".to_string()],
            root_dir: self.root.display().to_string(),
            max_file_size: MAX_FILE_SIZE,
            chunk_size: crate::download::DEFAULT_CHUNK_SIZE,
            concurrent_operations: CONCURRENT_OPERATIONS,
        }
    }
}

/// Dispatches one decoded request, stamping `processTimeMs` and
/// `timestamp` on the way out. `client_id` identifies the owning
/// connection (`host:port`) for session attribution.
pub async fn dispatch(state: &ServerState, client_id: &str, req: Request) -> Response {
    let started = Instant::now();
    let op_code = req.operation.unwrap_or(op::PING);

    let mut response = match handle(state, client_id, op_code, &req).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(op = op::name(op_code), kind = e.kind(), %e, "handler failed");
            let mut resp = Response::err(e.to_string());
            resp.status = Some(e.kind().to_string());
            resp
        }
    };

    if let Some(diagnostic) = &req.decode_diagnostic {
        response.status.get_or_insert_with(|| "decode-error".to_string());
        if response.message.is_none() {
            response.message = Some(format!("malformed request: {diagnostic}"));
        }
    }

    response.process_time_ms = Some(started.elapsed().as_millis() as u64);
    response.timestamp = Some(epoch_millis());
    response
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

async fn handle(
    state: &ServerState,
    client_id: &str,
    op_code: u8,
    req: &Request,
) -> Result<Response, CoreError> {
    match op_code {
        op::PING => Ok(Response::ok("pong")),
        op::PONG => Ok(Response::ok("unused")),
        op::CONNECT => Ok(handle_connect(state)),
        op::DISCONNECT => Ok(Response::ok("bye")),
        op::LIST_FILES => handle_list_files(state, req),
        op::FILE_INFO => handle_file_info(state, req),
        op::CREATE_DIR => handle_create_dir(state, req),
        op::DELETE_FILE => handle_delete_file(state, req),
        op::RENAME_FILE => handle_rename_file(state, req),
        op::UPLOAD_FILE => handle_upload_file(state, req),
        op::DOWNLOAD_FILE => handle_download_file(state, req),
        op::UPLOAD_REQ => handle_upload_req(state, client_id, req).await,
        op::UPLOAD_DATA => handle_upload_data(state, req).await,
        op::UPLOAD_END => handle_upload_end(state, req).await,
        op::DOWNLOAD_REQ => handle_download_req(state, client_id, req).await,
        op::DOWNLOAD_DATA | op::DOWNLOAD_END => Ok(Response::err(format!(
            "operation {} is reserved",
            op::name(op_code)
        ))),
        other => Ok(Response::err(format!("unknown operation code {other}"))),
    }
}

fn handle_connect(state: &ServerState) -> Response {
    Response {
        success: true,
        message: Some("connected".to_string()),
        selected_format: Some("protobuf".to_string()),
        server_info: Some(state.server_info()),
        supported_commands: supported_command_names(),
        ..Default::default()
    }
}

fn supported_command_names() -> Vec<String> {
    [
        op::PING,
        op::CONNECT,
        op::DISCONNECT,
        op::LIST_FILES,
        op::FILE_INFO,
        op::CREATE_DIR,
        op::DELETE_FILE,
        op::RENAME_FILE,
        op::UPLOAD_FILE,
        op::DOWNLOAD_FILE,
        op::UPLOAD_REQ,
        op::UPLOAD_DATA,
        op::UPLOAD_END,
        op::DOWNLOAD_REQ,
    ]
    .iter()
    .map(|code| op::name(*code).to_string())
    .collect()
}

fn required_path(req: &Request) -> Result<&str, CoreError> {
    req.path
        .as_deref()
        .ok_or(CoreError::MissingParameter("path"))
}

fn handle_list_files(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let files = fileops::list_files(&state.root, virtual_path)?;
    Ok(Response {
        success: true,
        message: Some(format!("{} entries", files.len())),
        files,
        ..Default::default()
    })
}

fn handle_file_info(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let info = fileops::file_info(&state.root, virtual_path)?;
    let size = info.size;
    Ok(Response {
        success: true,
        files: vec![info],
        file_size: Some(size),
        ..Default::default()
    })
}

fn handle_create_dir(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let name = req.name.as_deref().ok_or(CoreError::MissingParameter("name"))?;
    fileops::create_dir(&state.root, virtual_path, name)?;
    Ok(Response::ok(format!("created directory {name}")))
}

fn handle_delete_file(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let kind = fileops::delete_file(&state.root, virtual_path)?;
    Ok(Response::ok(format!("deleted {kind} {virtual_path}")))
}

fn handle_rename_file(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let new_path = req.options.get("newPath").map(String::as_str);
    fileops::rename_file(&state.root, virtual_path, req.new_name.as_deref(), new_path)?;
    Ok(Response::ok(format!("renamed {virtual_path}")))
}

fn handle_upload_file(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let filename = req
        .filename
        .as_deref()
        .or(req.name.as_deref())
        .ok_or(CoreError::MissingParameter("filename"))?;
    let data = req.data.as_deref().unwrap_or(&[]);
    let advisory = fileops::upload_file(&state.root, virtual_path, filename, data)?;

    let mut message = format!("uploaded {filename}");
    if advisory {
        message.push_str(" (warning: payload exceeds 2 MiB, prefer the chunked upload path)");
    }
    Ok(Response {
        success: true,
        message: Some(message),
        file_size: Some(data.len() as u64),
        ..Default::default()
    })
}

fn handle_download_file(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let (data, advisory) = fileops::download_file(&state.root, virtual_path)?;

    let mut message = "downloaded".to_string();
    if advisory {
        message.push_str(" (warning: payload exceeds 2 MiB, prefer the chunked download path)");
    }
    Ok(Response {
        success: true,
        message: Some(message),
        file_size: Some(data.len() as u64),
        data: Some(data),
        ..Default::default()
    })
}

async fn handle_upload_req(
    state: &ServerState,
    client_id: &str,
    req: &Request,
) -> Result<Response, CoreError> {
    let virtual_path = required_path(req)?;
    let filename = req
        .filename
        .as_deref()
        .or(req.name.as_deref())
        .ok_or(CoreError::MissingParameter("filename"))?;
    let file_size = req.file_size.ok_or(CoreError::MissingParameter("fileSize"))?;
    let chunk_size = req.chunk_size.unwrap_or(crate::upload::DEFAULT_CHUNK_SIZE);
    let total_chunks = req.total_chunks.unwrap_or(0);
    let session_id = req.options.get("sessionId").cloned();

    let target = path::resolve_new_in_dir(&state.root, virtual_path, filename)?;
    let outcome = state
        .upload_sessions
        .start(client_id, target, session_id, file_size, chunk_size, total_chunks)
        .await?;

    Ok(Response {
        success: true,
        message: Some("upload session opened".to_string()),
        session_id: Some(outcome.session_id),
        accepted_chunk_size: Some(outcome.accepted_chunk_size),
        ..Default::default()
    })
}

async fn handle_upload_data(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let session_id = req.options.get("sessionId").map(String::as_str);
    let chunk_index = req
        .chunk_index
        .ok_or(CoreError::MissingParameter("chunkIndex"))?;
    let data = decode_chunk_data(req)?;

    let outcome = state
        .upload_sessions
        .write_chunk(session_id, chunk_index, &data)
        .await?;

    Ok(Response {
        success: true,
        chunk_index: Some(chunk_index),
        total_chunks: req.total_chunks,
        file_size: Some(outcome.bytes_received),
        message: Some(format!(
            "{} chunks received so far",
            outcome.received_chunks
        )),
        ..Default::default()
    })
}

async fn handle_upload_end(state: &ServerState, req: &Request) -> Result<Response, CoreError> {
    let session_id = req.options.get("sessionId").map(String::as_str);
    let outcome = state.upload_sessions.finish(session_id).await?;
    Ok(Response {
        success: true,
        message: Some(format!(
            "upload complete at {:.1} KiB/s",
            outcome.average_speed_bps / 1024.0
        )),
        process_time_ms: Some(outcome.elapsed_ms),
        file_size: Some(outcome.bytes_received),
        ..Default::default()
    })
}

/// Raw bytes pass through unchanged; a payload that looks like a
/// base64-encoded string (clients on a text transport send chunk data
/// this way) is decoded instead.
fn decode_chunk_data(req: &Request) -> Result<Vec<u8>, CoreError> {
    let raw = req.data.as_deref().unwrap_or(&[]);
    if looks_like_base64(raw) {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(raw)
            .map_err(|e| CoreError::DecodeError(format!("invalid base64 chunk data: {e}")))
    } else {
        Ok(raw.to_vec())
    }
}

/// Non-empty, ASCII, drawn only from the base64 alphabet (with `=`
/// padding) and long enough that raw binary stumbling into this
/// alphabet by chance is vanishingly unlikely.
fn looks_like_base64(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'='))
}

async fn handle_download_req(
    state: &ServerState,
    client_id: &str,
    req: &Request,
) -> Result<Response, CoreError> {
    let action = req
        .options
        .get("action")
        .map(String::as_str)
        .unwrap_or("start");

    match action {
        "start" => {
            let virtual_path = required_path(req)?;
            let target = path::resolve(&state.root, virtual_path)?;
            let outcome = state
                .download_sessions
                .start(client_id, target, req.chunk_size)
                .await?;
            Ok(Response {
                success: true,
                message: Some("download session opened".to_string()),
                session_id: Some(outcome.session_id),
                file_size: Some(outcome.file_size),
                total_chunks: Some(outcome.total_chunks),
                accepted_chunk_size: Some(outcome.accepted_chunk_size),
                status: Some("supportsResume".to_string()),
                ..Default::default()
            })
        }
        "chunk" => {
            let session_id = req
                .options
                .get("sessionId")
                .ok_or(CoreError::MissingParameter("sessionId"))?;
            let outcome = state
                .download_sessions
                .read_chunk(session_id, req.chunk_index)
                .await?;
            Ok(Response {
                success: true,
                is_chunk: Some(true),
                chunk_index: Some(outcome.chunk_index),
                status: Some(if outcome.done { "done" } else { "serving" }.to_string()),
                file_size: Some(outcome.data.len() as u64),
                data: Some(outcome.data),
                ..Default::default()
            })
        }
        "finish" => {
            let session_id = req
                .options
                .get("sessionId")
                .ok_or(CoreError::MissingParameter("sessionId"))?;
            let outcome = state.download_sessions.finish(session_id).await?;
            Ok(Response {
                success: true,
                message: Some("download finished".to_string()),
                file_size: Some(outcome.file_size),
                process_time_ms: None,
                ..Default::default()
            })
        }
        "abort" => {
            if let Some(session_id) = req.options.get("sessionId") {
                state.download_sessions.abort(session_id).await;
            }
            Ok(Response::ok("download aborted"))
        }
        other => Err(CoreError::DecodeError(format!("unknown action {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn tempdir() -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("tcp-core-dispatch-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn state() -> ServerState {
        ServerState::new(tempdir())
    }

    #[test]
    fn base64_chunk_data_is_decoded() {
        let mut req = Request::default();
        req.data = Some(b"aGVsbG8=".to_vec());
        assert_eq!(decode_chunk_data(&req).unwrap(), b"hello");
    }

    #[test]
    fn raw_chunk_data_passes_through() {
        let mut req = Request::default();
        req.data = Some(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(decode_chunk_data(&req).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn malformed_base64_is_a_decode_error() {
        let mut req = Request::default();
        // Looks base64-shaped (alphabet-only, len >= 4) but has a bad
        // padding length, so the base64 decoder itself rejects it.
        req.data = Some(b"abc=".to_vec());
        let err = decode_chunk_data(&req).unwrap_err();
        assert_eq!(err.kind(), "decode-error");
    }

    #[tokio::test]
    async fn download_abort_succeeds_without_a_session() {
        let st = state();
        let mut req = Request::default();
        req.options.insert("action".to_string(), "abort".to_string());
        let resp = handle(&st, "client-1", op::DOWNLOAD_REQ, &req).await.unwrap();
        assert!(resp.success);
    }

    #[tokio::test]
    async fn unknown_download_action_is_a_decode_error() {
        let st = state();
        let mut req = Request::default();
        req.options.insert("action".to_string(), "bogus".to_string());
        let err = handle(&st, "client-1", op::DOWNLOAD_REQ, &req).await.unwrap_err();
        assert_eq!(err.kind(), "decode-error");
    }

    #[tokio::test]
    async fn unknown_op_code_is_a_non_success_response() {
        let st = state();
        let req = Request::default();
        let resp = handle(&st, "client-1", 200, &req).await.unwrap();
        assert!(!resp.success);
        assert!(resp.message.unwrap().contains("unknown operation"));
    }

    #[tokio::test]
    async fn reserved_download_ops_are_a_non_success_response() {
        let st = state();
        let req = Request::default();
        let resp = handle(&st, "client-1", op::DOWNLOAD_DATA, &req).await.unwrap();
        assert!(!resp.success);
    }
}
