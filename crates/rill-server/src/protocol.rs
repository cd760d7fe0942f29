//! Live-channel protocol messages.
//!
//! Defines the message types exchanged between client and server over the
//! notebook WebSocket. Cell-scoped fields use camelCase on the wire.

use serde::{Deserialize, Serialize};

use rill_core::model::{Cell, CellId, CellStatus, Output, PrincipalId};

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Exchange a token for a principal; must be the first message.
    Authenticate { token: String },

    /// Execute a cell.
    RunCell {
        #[serde(rename = "cellId")]
        cell_id: CellId,
    },

    /// Re-authenticate mid-session (token rotation).
    RefreshAuth { token: String },
}

/// Partial cell view carried by `cell_updated`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CellStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Messages sent from server to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Cell status change.
    CellStatus {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        status: CellStatus,
    },

    /// Captured standard output for a cell.
    CellStdout {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        data: String,
    },

    /// One renderable output of a cell.
    CellOutput {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        output: Output,
    },

    /// Error diagnostic for a cell.
    CellError {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        error: String,
    },

    /// Cell fields changed (code edit or dependency metadata).
    CellUpdated {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        cell: CellPatch,
    },

    /// A cell was inserted at `index`.
    CellCreated {
        #[serde(rename = "cellId")]
        cell_id: CellId,
        cell: Cell,
        index: usize,
    },

    /// A cell was removed.
    CellDeleted {
        #[serde(rename = "cellId")]
        cell_id: CellId,
    },

    /// The kernel process died; the notebook must be reopened.
    KernelError { error: String },

    /// Result of a database configuration change.
    DbConnectionUpdated {
        #[serde(rename = "connectionString")]
        connection_string: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Authentication succeeded.
    Authenticated { principal: PrincipalId },

    /// Generic error message.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_deserialization() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"run_cell","cellId":"c1"}"#).unwrap();
        match msg {
            ClientMessage::RunCell { cell_id } => assert_eq!(cell_id, CellId::new("c1")),
            other => panic!("wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::CellStatus {
            cell_id: CellId::new("c7"),
            status: CellStatus::Running,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cell_status");
        assert_eq!(json["cellId"], "c7");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_db_connection_updated_shape() {
        let msg = ServerMessage::DbConnectionUpdated {
            connection_string: "postgres://db".to_string(),
            status: "success".to_string(),
            error: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "db_connection_updated");
        assert_eq!(json["connectionString"], "postgres://db");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_authenticate_first_message_shape() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"authenticate","token":"t"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Authenticate { .. }));
    }
}
