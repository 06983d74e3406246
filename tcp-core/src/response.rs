//! Response payload, `FileInfo`, and `ServerInfo` (spec §3).

use crate::error::CoreError;
use crate::wire::{self, Reader};

const TAG_SUCCESS: u8 = 1;
const TAG_MESSAGE: u8 = 2;
const TAG_FILES: u8 = 3;
const TAG_DATA: u8 = 4;
const TAG_IS_CHUNK: u8 = 5;
const TAG_CHUNK_INDEX: u8 = 6;
const TAG_TOTAL_CHUNKS: u8 = 7;
const TAG_CHUNK_HASH: u8 = 8;
const TAG_PROCESS_TIME_MS: u8 = 9;
const TAG_FILE_SIZE: u8 = 10;
const TAG_PROGRESS_PERCENT: u8 = 11;
const TAG_STATUS: u8 = 12;
const TAG_SELECTED_FORMAT: u8 = 13;
const TAG_SUPPORTED_COMMANDS: u8 = 14;
const TAG_SERVER_INFO: u8 = 15;
const TAG_TIMESTAMP: u8 = 16;
const TAG_SESSION_ID: u8 = 17;
const TAG_ACCEPTED_CHUNK_SIZE: u8 = 18;

const FI_TAG_NAME: u8 = 1;
const FI_TAG_PATH: u8 = 2;
const FI_TAG_TYPE: u8 = 3;
const FI_TAG_SIZE: u8 = 4;
const FI_TAG_LAST_MODIFIED: u8 = 5;
const FI_TAG_PERMISSIONS: u8 = 6;
const FI_TAG_READONLY: u8 = 7;
const FI_TAG_MIME_TYPE: u8 = 8;

const SI_TAG_NAME: u8 = 1;
const SI_TAG_VERSION: u8 = 2;
const SI_TAG_PROTOCOL: u8 = 3;
const SI_TAG_SUPPORTED_FORMATS: u8 = 4;
const SI_TAG_ROOT_DIR: u8 = 5;
const SI_TAG_MAX_FILE_SIZE: u8 = 6;
const SI_TAG_CHUNK_SIZE: u8 = 7;
const SI_TAG_CONCURRENT_OPERATIONS: u8 = 8;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub path: String,
    pub file_type: FileKind,
    pub size: u64,
    pub last_modified: String,
    pub permissions: String,
    pub readonly: bool,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    File,
    Directory,
}

impl FileKind {
    fn as_str(self) -> &'static str {
        match self {
            FileKind::File => "file",
            FileKind::Directory => "directory",
        }
    }
}

impl FileInfo {
    fn encode_into(&self, out: &mut Vec<u8>) {
        wire::put_string(out, FI_TAG_NAME, &self.name);
        wire::put_string(out, FI_TAG_PATH, &self.path);
        wire::put_string(out, FI_TAG_TYPE, self.file_type.as_str());
        wire::put_varint(out, FI_TAG_SIZE, self.size);
        wire::put_string(out, FI_TAG_LAST_MODIFIED, &self.last_modified);
        wire::put_string(out, FI_TAG_PERMISSIONS, &self.permissions);
        wire::put_bool(out, FI_TAG_READONLY, self.readonly);
        if let Some(mime) = &self.mime_type {
            wire::put_string(out, FI_TAG_MIME_TYPE, mime);
        }
    }

    fn decode(body: &[u8]) -> Result<Self, CoreError> {
        let mut reader = Reader::new(body);
        let mut info = FileInfo::default();
        while reader.has_remaining() {
            let (tag, field) = reader.next()?;
            match tag {
                FI_TAG_NAME => info.name = field.as_string()?,
                FI_TAG_PATH => info.path = field.as_string()?,
                FI_TAG_TYPE => {
                    info.file_type = match field.as_string()?.as_str() {
                        "directory" => FileKind::Directory,
                        _ => FileKind::File,
                    }
                }
                FI_TAG_SIZE => info.size = field.as_u64()?,
                FI_TAG_LAST_MODIFIED => info.last_modified = field.as_string()?,
                FI_TAG_PERMISSIONS => info.permissions = field.as_string()?,
                FI_TAG_READONLY => info.readonly = field.as_bool()?,
                FI_TAG_MIME_TYPE => info.mime_type = Some(field.as_string()?),
                _ => {}
            }
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol: String,
    pub supported_formats: Vec<String>,
    pub root_dir: String,
    pub max_file_size: u64,
    pub chunk_size: u64,
    pub concurrent_operations: u64,
}

impl ServerInfo {
    fn encode_into(&self, out: &mut Vec<u8>) {
        wire::put_string(out, SI_TAG_NAME, &self.name);
        wire::put_string(out, SI_TAG_VERSION, &self.version);
        wire::put_string(out, SI_TAG_PROTOCOL, &self.protocol);
        for f in &self.supported_formats {
            wire::put_string(out, SI_TAG_SUPPORTED_FORMATS, f);
        }
        wire::put_string(out, SI_TAG_ROOT_DIR, &self.root_dir);
        wire::put_varint(out, SI_TAG_MAX_FILE_SIZE, self.max_file_size);
        wire::put_varint(out, SI_TAG_CHUNK_SIZE, self.chunk_size);
        wire::put_varint(
            out,
            SI_TAG_CONCURRENT_OPERATIONS,
            self.concurrent_operations,
        );
    }

    fn decode(body: &[u8]) -> Result<Self, CoreError> {
        let mut reader = Reader::new(body);
        let mut info = ServerInfo::default();
        while reader.has_remaining() {
            let (tag, field) = reader.next()?;
            match tag {
                SI_TAG_NAME => info.name = field.as_string()?,
                SI_TAG_VERSION => info.version = field.as_string()?,
                SI_TAG_PROTOCOL => info.protocol = field.as_string()?,
                SI_TAG_SUPPORTED_FORMATS => info.supported_formats.push(field.as_string()?),
                SI_TAG_ROOT_DIR => info.root_dir = field.as_string()?,
                SI_TAG_MAX_FILE_SIZE => info.max_file_size = field.as_u64()?,
                SI_TAG_CHUNK_SIZE => info.chunk_size = field.as_u64()?,
                SI_TAG_CONCURRENT_OPERATIONS => info.concurrent_operations = field.as_u64()?,
                _ => {}
            }
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub success: bool,
    pub message: Option<String>,
    pub files: Vec<FileInfo>,
    pub data: Option<Vec<u8>>,
    pub is_chunk: Option<bool>,
    pub chunk_index: Option<u64>,
    pub total_chunks: Option<u64>,
    pub chunk_hash: Option<String>,
    pub process_time_ms: Option<u64>,
    pub file_size: Option<u64>,
    pub progress_percent: Option<f32>,
    pub status: Option<String>,
    pub selected_format: Option<String>,
    pub supported_commands: Vec<String>,
    pub server_info: Option<ServerInfo>,
    pub timestamp: Option<u64>,
    pub session_id: Option<String>,
    pub accepted_chunk_size: Option<u64>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        wire::put_bool(&mut out, TAG_SUCCESS, self.success);
        if let Some(m) = &self.message {
            wire::put_string(&mut out, TAG_MESSAGE, m);
        }
        for file in &self.files {
            let mut body = Vec::new();
            file.encode_into(&mut body);
            wire::put_submessage(&mut out, TAG_FILES, &body);
        }
        if let Some(d) = &self.data {
            wire::put_bytes(&mut out, TAG_DATA, d);
        }
        if let Some(v) = self.is_chunk {
            wire::put_bool(&mut out, TAG_IS_CHUNK, v);
        }
        if let Some(v) = self.chunk_index {
            wire::put_varint(&mut out, TAG_CHUNK_INDEX, v);
        }
        if let Some(v) = self.total_chunks {
            wire::put_varint(&mut out, TAG_TOTAL_CHUNKS, v);
        }
        if let Some(v) = &self.chunk_hash {
            wire::put_string(&mut out, TAG_CHUNK_HASH, v);
        }
        if let Some(v) = self.process_time_ms {
            wire::put_varint(&mut out, TAG_PROCESS_TIME_MS, v);
        }
        if let Some(v) = self.file_size {
            wire::put_varint(&mut out, TAG_FILE_SIZE, v);
        }
        if let Some(v) = self.progress_percent {
            wire::put_fixed32(&mut out, TAG_PROGRESS_PERCENT, v);
        }
        if let Some(v) = &self.status {
            wire::put_string(&mut out, TAG_STATUS, v);
        }
        if let Some(v) = &self.selected_format {
            wire::put_string(&mut out, TAG_SELECTED_FORMAT, v);
        }
        for c in &self.supported_commands {
            wire::put_string(&mut out, TAG_SUPPORTED_COMMANDS, c);
        }
        if let Some(info) = &self.server_info {
            let mut body = Vec::new();
            info.encode_into(&mut body);
            wire::put_submessage(&mut out, TAG_SERVER_INFO, &body);
        }
        if let Some(v) = self.timestamp {
            wire::put_varint(&mut out, TAG_TIMESTAMP, v);
        }
        if let Some(v) = &self.session_id {
            wire::put_string(&mut out, TAG_SESSION_ID, v);
        }
        if let Some(v) = self.accepted_chunk_size {
            wire::put_varint(&mut out, TAG_ACCEPTED_CHUNK_SIZE, v);
        }
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CoreError> {
        let mut reader = Reader::new(payload);
        let mut resp = Response::default();
        while reader.has_remaining() {
            let (tag, field) = reader.next()?;
            match tag {
                TAG_SUCCESS => resp.success = field.as_bool()?,
                TAG_MESSAGE => resp.message = Some(field.as_string()?),
                TAG_FILES => resp.files.push(FileInfo::decode(field.as_bytes()?)?),
                TAG_DATA => resp.data = Some(field.as_bytes()?.to_vec()),
                TAG_IS_CHUNK => resp.is_chunk = Some(field.as_bool()?),
                TAG_CHUNK_INDEX => resp.chunk_index = Some(field.as_u64()?),
                TAG_TOTAL_CHUNKS => resp.total_chunks = Some(field.as_u64()?),
                TAG_CHUNK_HASH => resp.chunk_hash = Some(field.as_string()?),
                TAG_PROCESS_TIME_MS => resp.process_time_ms = Some(field.as_u64()?),
                TAG_FILE_SIZE => resp.file_size = Some(field.as_u64()?),
                TAG_PROGRESS_PERCENT => {
                    resp.progress_percent = Some(match field {
                        wire::Field::Fixed32(v) => v,
                        _ => return Err(CoreError::DecodeError("expected fixed32".into())),
                    })
                }
                TAG_STATUS => resp.status = Some(field.as_string()?),
                TAG_SELECTED_FORMAT => resp.selected_format = Some(field.as_string()?),
                TAG_SUPPORTED_COMMANDS => resp.supported_commands.push(field.as_string()?),
                TAG_SERVER_INFO => resp.server_info = Some(ServerInfo::decode(field.as_bytes()?)?),
                TAG_TIMESTAMP => resp.timestamp = Some(field.as_u64()?),
                TAG_SESSION_ID => resp.session_id = Some(field.as_string()?),
                TAG_ACCEPTED_CHUNK_SIZE => resp.accepted_chunk_size = Some(field.as_u64()?),
                _ => {}
            }
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_files_and_server_info() {
        let resp = Response {
            success: true,
            message: Some("ok".into()),
            files: vec![FileInfo {
                name: "readme.txt".into(),
                path: "/readme.txt".into(),
                file_type: FileKind::File,
                size: 42,
                last_modified: "2026-01-01T00:00:00Z".into(),
                permissions: "644".into(),
                readonly: false,
                mime_type: Some("text/plain".into()),
            }],
            server_info: Some(ServerInfo {
                name: "tcp-server".into(),
                version: "1.0".into(),
                protocol: "tcp".into(),
                supported_formats: vec!["protobuf".into()],
                root_dir: "/root".into(),
                max_file_size: 4 * 1024 * 1024,
                chunk_size: 1024 * 1024,
                concurrent_operations: 8,
            }),
            timestamp: Some(1_700_000_000_000),
            ..Default::default()
        };

        let encoded = resp.encode();
        let decoded = Response::decode(&encoded).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn error_response_has_success_false() {
        let resp = Response::err("not found");
        let decoded = Response::decode(&resp.encode()).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.message.as_deref(), Some("not found"));
    }
}
