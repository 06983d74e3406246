//! Core protocol engine for the TCP file-transfer test server: path
//! sandboxing, frame codec, wire message codec, file operations, upload
//! and download session managers, and the request dispatcher.
//!
//! The connection pump (accept loop, per-socket read/write) lives in the
//! `tcp-server` binary crate, which depends on this library.

pub mod crc8;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod fileops;
pub mod frame;
pub mod op;
pub mod path;
pub mod request;
pub mod response;
pub mod upload;
pub mod wire;

pub use dispatch::{dispatch, ServerState};
pub use error::CoreError;
pub use frame::Frame;
pub use request::Request;
pub use response::{FileInfo, FileKind, Response, ServerInfo};
