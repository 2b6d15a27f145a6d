//! Wire protocol: length-prefixed JSON frames over the local socket.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON object.
//! Requests are `{id, op, args}`; responses are `{id, ok, data}` or
//! `{id, ok: false, error: {code, message, detail}}`.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use beads_storage::StorageError;

/// Bumped when the wire format changes; the handshake compares it and a
/// mismatch triggers a daemon restart on the client side.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are rejected as corrupt.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Operations the daemon accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Health,
    Stats,
    List,
    Show,
    Search,
    Create,
    Update,
    Close,
    Delete,
    AddDependency,
    RemoveDependency,
    AddLabel,
    RemoveLabel,
    Comment,
    ReadyWork,
    Sync,
    ConfigGet,
    ConfigSet,
    ConfigList,
    ConfigUnset,
    DecisionResolve,
    Execute,
    Shutdown,
}

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id, echoed in the response.
    pub id: u64,
    pub op: Op,
    /// Operation-specific arguments.
    #[serde(default)]
    pub args: Value,
}

/// A structured error, mirroring the error taxonomy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl Response {
    /// Success with a payload.
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            ok: true,
            data,
            error: None,
        }
    }

    /// Failure with a structured error.
    pub fn err(id: u64, error: RpcError) -> Self {
        Self {
            id,
            ok: false,
            data: Value::Null,
            error: Some(error),
        }
    }
}

impl RpcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            detail: None,
        }
    }
}

impl From<&StorageError> for RpcError {
    fn from(e: &StorageError) -> Self {
        let code = match e {
            StorageError::NotFound { .. } => "not_found",
            StorageError::DuplicateId { .. } => "duplicate_id",
            StorageError::InvalidTransition { .. } => "invalid_transition",
            StorageError::DependencyCycle { .. } => "dependency_cycle",
            StorageError::Validation { .. } => "validation",
            StorageError::LockBusy(_) => "lock_busy",
            StorageError::NotInitialized { .. } => "not_initialized",
            StorageError::SchemaMismatch { .. } => "schema_mismatch",
            _ => "internal",
        };
        Self::new(code, e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Frame I/O
// ---------------------------------------------------------------------------

/// Writes one length-prefixed JSON frame.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()
}

/// Reads one length-prefixed JSON frame. `Ok(None)` on clean EOF before the
/// length prefix (the peer hung up between frames).
pub fn read_frame<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> io::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    let value = serde_json::from_slice(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
