//! Decoded request payload (spec §3's Request record).
//!
//! All fields are optional; unknown tags are skipped according to their
//! wire type. Decoding never fails outright — on a malformed field the
//! decoder stops, defaults `operation` to `PING`, and attaches a
//! diagnostic so the dispatcher can still answer with a valid frame
//! (spec §4.3 / Design Notes §9.4).

use std::collections::HashMap;

use crate::error::CoreError;
use crate::op;
use crate::wire::{self, Field, Reader};

const TAG_OPERATION: u8 = 1;
const TAG_PATH: u8 = 2;
const TAG_NAME: u8 = 3;
const TAG_DATA: u8 = 4;
const TAG_NEW_NAME: u8 = 5;
const TAG_OPTIONS: u8 = 6;
const TAG_IS_CHUNK: u8 = 7;
const TAG_CHUNK_INDEX: u8 = 8;
const TAG_TOTAL_CHUNKS: u8 = 9;
const TAG_CHUNK_HASH: u8 = 10;
const TAG_CLIENT_ID: u8 = 11;
const TAG_VERSION: u8 = 12;
const TAG_SUPPORTED_FORMATS: u8 = 13;
const TAG_FILENAME: u8 = 14;
const TAG_FILE_SIZE: u8 = 15;
const TAG_CHECKSUM: u8 = 16;
const TAG_CHUNK_SIZE: u8 = 17;
const TAG_PREFERRED_FORMAT: u8 = 18;

const OPTION_ENTRY_TAG_KEY: u8 = 1;
const OPTION_ENTRY_TAG_VALUE: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct Request {
    pub operation: Option<u8>,
    pub path: Option<String>,
    pub name: Option<String>,
    pub data: Option<Vec<u8>>,
    pub new_name: Option<String>,
    pub options: HashMap<String, String>,
    pub is_chunk: Option<bool>,
    pub chunk_index: Option<u64>,
    pub total_chunks: Option<u64>,
    pub chunk_hash: Option<String>,
    pub client_id: Option<String>,
    pub version: Option<String>,
    pub supported_formats: Vec<String>,
    pub filename: Option<String>,
    pub file_size: Option<u64>,
    pub checksum: Option<String>,
    pub chunk_size: Option<u64>,
    pub preferred_format: Option<String>,
    /// Set when decoding stopped early on a malformed field; carries a
    /// human-readable description for logging. `operation` is forced to
    /// `op::PING` whenever this is set.
    pub decode_diagnostic: Option<String>,
}

impl Request {
    pub fn decode(payload: &[u8]) -> Self {
        let mut req = Request::default();
        let mut reader = Reader::new(payload);

        while reader.has_remaining() {
            match reader.next() {
                Ok((tag, field)) => {
                    if let Err(e) = req.apply_field(tag, field) {
                        req.fall_back_to_ping(e);
                        break;
                    }
                }
                Err(e) => {
                    req.fall_back_to_ping(e);
                    break;
                }
            }
        }
        req
    }

    fn fall_back_to_ping(&mut self, err: CoreError) {
        tracing::warn!(error = %err, "malformed request payload, defaulting to PING");
        self.operation = Some(op::PING);
        self.decode_diagnostic = Some(err.to_string());
    }

    fn apply_field(&mut self, tag: u8, field: Field<'_>) -> Result<(), CoreError> {
        match tag {
            TAG_OPERATION => self.operation = Some(field.as_u64()? as u8),
            TAG_PATH => self.path = Some(field.as_string()?),
            TAG_NAME => self.name = Some(field.as_string()?),
            TAG_DATA => self.data = Some(field.as_bytes()?.to_vec()),
            TAG_NEW_NAME => self.new_name = Some(field.as_string()?),
            TAG_OPTIONS => {
                let (k, v) = decode_option_entry(field.as_bytes()?)?;
                self.options.insert(k, v);
            }
            TAG_IS_CHUNK => self.is_chunk = Some(field.as_bool()?),
            TAG_CHUNK_INDEX => self.chunk_index = Some(field.as_u64()?),
            TAG_TOTAL_CHUNKS => self.total_chunks = Some(field.as_u64()?),
            TAG_CHUNK_HASH => self.chunk_hash = Some(field.as_string()?),
            TAG_CLIENT_ID => self.client_id = Some(field.as_string()?),
            TAG_VERSION => self.version = Some(field.as_string()?),
            TAG_SUPPORTED_FORMATS => self.supported_formats.push(field.as_string()?),
            TAG_FILENAME => self.filename = Some(field.as_string()?),
            TAG_FILE_SIZE => self.file_size = Some(field.as_u64()?),
            TAG_CHECKSUM => self.checksum = Some(field.as_string()?),
            TAG_CHUNK_SIZE => self.chunk_size = Some(field.as_u64()?),
            TAG_PREFERRED_FORMAT => self.preferred_format = Some(field.as_string()?),
            _ => {
                // Unknown tag: the wire type already told the reader how
                // to consume the value, so there is nothing left to do.
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(op) = self.operation {
            wire::put_varint(&mut out, TAG_OPERATION, op as u64);
        }
        if let Some(p) = &self.path {
            wire::put_string(&mut out, TAG_PATH, p);
        }
        if let Some(n) = &self.name {
            wire::put_string(&mut out, TAG_NAME, n);
        }
        if let Some(d) = &self.data {
            wire::put_bytes(&mut out, TAG_DATA, d);
        }
        if let Some(n) = &self.new_name {
            wire::put_string(&mut out, TAG_NEW_NAME, n);
        }
        for (k, v) in &self.options {
            let mut entry = Vec::new();
            wire::put_string(&mut entry, OPTION_ENTRY_TAG_KEY, k);
            wire::put_string(&mut entry, OPTION_ENTRY_TAG_VALUE, v);
            wire::put_submessage(&mut out, TAG_OPTIONS, &entry);
        }
        if let Some(b) = self.is_chunk {
            wire::put_bool(&mut out, TAG_IS_CHUNK, b);
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
        if let Some(v) = &self.client_id {
            wire::put_string(&mut out, TAG_CLIENT_ID, v);
        }
        if let Some(v) = &self.version {
            wire::put_string(&mut out, TAG_VERSION, v);
        }
        for f in &self.supported_formats {
            wire::put_string(&mut out, TAG_SUPPORTED_FORMATS, f);
        }
        if let Some(v) = &self.filename {
            wire::put_string(&mut out, TAG_FILENAME, v);
        }
        if let Some(v) = self.file_size {
            wire::put_varint(&mut out, TAG_FILE_SIZE, v);
        }
        if let Some(v) = &self.checksum {
            wire::put_string(&mut out, TAG_CHECKSUM, v);
        }
        if let Some(v) = self.chunk_size {
            wire::put_varint(&mut out, TAG_CHUNK_SIZE, v);
        }
        if let Some(v) = &self.preferred_format {
            wire::put_string(&mut out, TAG_PREFERRED_FORMAT, v);
        }
        out
    }
}

fn decode_option_entry(body: &[u8]) -> Result<(String, String), CoreError> {
    let mut reader = Reader::new(body);
    let mut key = None;
    let mut value = None;
    while reader.has_remaining() {
        let (tag, field) = reader.next()?;
        match tag {
            OPTION_ENTRY_TAG_KEY => key = Some(field.as_string()?),
            OPTION_ENTRY_TAG_VALUE => value = Some(field.as_string()?),
            _ => {}
        }
    }
    Ok((
        key.ok_or_else(|| CoreError::DecodeError("option entry missing key".into()))?,
        value.unwrap_or_default(),
    ))
}
