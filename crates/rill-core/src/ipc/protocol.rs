//! IPC protocol messages for the kernel process.
//!
//! Uses length-prefixed JSON messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + JSON-encoded message. JSON is the frame
//! codec because notification payloads carry arbitrary JSON output data.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{CellId, CellStatus, CellType, Output};

/// Reject absurdly large frames (64MB).
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Request sent from the host to the kernel process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelRequest {
    /// Ping to check if the kernel is alive.
    Ping,

    /// Record a cell and apply it to the dependency graph without executing.
    RegisterCell {
        cell_id: CellId,
        code: String,
        cell_type: CellType,
    },

    /// Refresh the notebook-order tie-breaking of the kernel's graph.
    /// Does not invalidate any has-run state.
    SyncOrder { cells: Vec<CellId> },

    /// Run a cell under the stale-ancestor + descendant policy.
    Execute { cell_id: CellId },

    /// Update the query executor's connection target.
    SetDbConfig { connection_string: String },

    /// Remove bindings from the interpreter globals (a deleted cell's
    /// writes).
    EvictVariables { names: Vec<String> },

    /// Drain and exit.
    Shutdown,
}

/// Machine-readable classification of a kernel-reported cell error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelErrorKind {
    SyntaxError,
    RuntimeError,
    CycleDetected,
    CellNotRegistered,
    BackendNotConfigured,
    TemplateVariableMissing,
    UpstreamFailed,
}

/// Notification emitted by the kernel process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelNotification {
    /// Cell status change.
    Status { cell_id: CellId, status: CellStatus },

    /// Captured standard output, emitted when non-empty.
    Stdout { cell_id: CellId, data: String },

    /// One renderable output of a cell.
    Output { cell_id: CellId, output: Output },

    /// Error details for a cell.
    CellError {
        cell_id: CellId,
        kind: KernelErrorKind,
        message: String,
    },

    /// Dependency metadata after registration or execution.
    Metadata {
        cell_id: CellId,
        reads: Vec<String>,
        writes: Vec<String>,
    },

    /// Result of a `SetDbConfig` request.
    DbConfigured {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Response to `Ping`.
    Pong,

    /// Acknowledgement of a shutdown request.
    ShuttingDown,
}

/// Write a message using length-prefixed JSON encoding.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| Error::Ipc(format!("failed to encode IPC message: {e}")))?;
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("failed to write IPC message length: {e}")))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("failed to write IPC message body: {e}")))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("failed to flush IPC stream: {e}")))?;
    Ok(())
}

/// Read a message using length-prefixed JSON encoding.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Ipc(format!("failed to read IPC message length: {e}"))),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {len} bytes")));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("failed to read IPC message body: {e}")))?;

    let message = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Ipc(format!("failed to decode IPC message: {e}")))?;
    Ok(Some(message))
}

/// Async variant of [`read_frame`] for the host side of the pipe.
pub async fn read_frame_async<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    use tokio::io::AsyncReadExt;

    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Ipc(format!("failed to read IPC message length: {e}"))),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {len} bytes")));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("failed to read IPC message body: {e}")))?;

    let message = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Ipc(format!("failed to decode IPC message: {e}")))?;
    Ok(Some(message))
}

/// Async variant of [`write_frame`] for the host side of the pipe.
pub async fn write_frame_async<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    use tokio::io::AsyncWriteExt;

    let bytes = serde_json::to_vec(message)
        .map_err(|e| Error::Ipc(format!("failed to encode IPC message: {e}")))?;
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| Error::Ipc(format!("failed to write IPC message length: {e}")))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| Error::Ipc(format!("failed to write IPC message body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("failed to flush IPC stream: {e}")))?;
    Ok(())
}
