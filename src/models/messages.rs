use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::FileNode;

/// Snapshot of a room's file mapping as fanned out to clients.
/// Insertion order is preserved on the wire.
pub type TreeSnapshot = IndexMap<String, FileNode>;

/// Whether a tree item is a file or a folder, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

// ---------------------------------------------------------------------------
// Inbound (client -> server)
// ---------------------------------------------------------------------------

/// One inbound frame: a named event with its payload, plus an optional
/// acknowledgement id the client expects echoed on the reply.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub ack: Option<u64>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    CreateRoom(CreateRoomPayload),
    JoinRoom(JoinRoomPayload),
    GetFiles(RoomPayload),
    GetFileContent(FilePayload),
    SwitchFile(FilePayload),
    CodeChange(CodeChangePayload),
    CreateFile(CreateFilePayload),
    CreateFolder(CreateFolderPayload),
    DeleteItem(DeleteItemPayload),
    RenameItem(RenameItemPayload),
    MoveItem(MoveItemPayload),
    ToggleFolder(ToggleFolderPayload),
    TerminalInit(RoomPayload),
    TerminalInput(TerminalInputPayload),
    TerminalResize(TerminalResizePayload),
    ExecuteCommand(ExecuteCommandPayload),
    ClearTerminal(RoomPayload),
    KillProcess(RoomPayload),
    RunFile(FilePayload),
    SaveAndRun(SaveAndRunPayload),
    GetWorkingDirectory(RoomPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomPayload {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub username: String,
    pub room_code: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePayload {
    pub room_code: String,
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChangePayload {
    pub room_code: String,
    pub file_name: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFilePayload {
    pub room_code: String,
    pub file_name: String,
    #[serde(default)]
    pub parent_folder: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderPayload {
    pub room_code: String,
    pub folder_name: String,
    #[serde(default)]
    pub parent_folder: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteItemPayload {
    pub room_code: String,
    pub item_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameItemPayload {
    pub room_code: String,
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveItemPayload {
    pub room_code: String,
    pub source_path: String,
    pub target_path: String,
    pub item_type: ItemKind,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFolderPayload {
    pub room_code: String,
    pub folder_path: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInputPayload {
    pub room_code: String,
    pub input: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalResizePayload {
    pub room_code: String,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCommandPayload {
    pub room_code: String,
    pub command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAndRunPayload {
    pub room_code: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Outbound (server -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    FilesUpdate(TreeSnapshot),
    FileContentUpdate {
        file_name: String,
        content: String,
    },
    ActiveFileChanged {
        file_name: String,
    },
    FileCreated {
        file_name: String,
    },
    FolderCreated {
        folder_path: String,
    },
    FileSynced {
        file_name: String,
        content: String,
    },
    ItemDeleted {
        item_path: String,
        #[serde(rename = "type")]
        kind: ItemKind,
    },
    ItemRenamed {
        old_path: String,
        new_path: String,
        #[serde(rename = "type")]
        kind: ItemKind,
    },
    ItemMoved {
        source_path: String,
        target_path: String,
        item_type: ItemKind,
    },
    FolderToggled {
        folder_path: String,
        is_expanded: bool,
    },
    FileError {
        message: String,
    },
    TerminalOutput(String),
    UserJoined {
        username: String,
        user_id: String,
    },
    UserLeft {
        username: String,
        user_id: String,
    },
    RoomCreated {
        room_code: String,
    },
}

impl ServerEvent {
    /// Serialize to the one-line JSON frame sent over the socket.
    pub fn to_frame(&self) -> String {
        // Serialization of these variants cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Reply to an inbound frame that carried an `ack` id.
#[derive(Debug, Serialize)]
pub struct AckFrame {
    pub ack: u64,
    pub data: serde_json::Value,
}

impl AckFrame {
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<TreeSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesAck {
    pub files: TreeSnapshot,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContentAck {
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingDirectoryAck {
    pub working_directory: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_join_room_frame() {
        let raw = r#"{"event":"join-room","data":{"username":"bob","roomCode":"ABC123","password":"p"},"ack":7}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.ack, Some(7));
        match frame.event {
            ClientEvent::JoinRoom(p) => {
                assert_eq!(p.username, "bob");
                assert_eq!(p.room_code, "ABC123");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_payload_fields_are_ignored() {
        let raw = r#"{"event":"code-change","data":{"roomCode":"R","fileName":"main.js","code":"x","clientTs":123}}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        assert!(frame.ack.is_none());
        assert!(matches!(frame.event, ClientEvent::CodeChange(_)));
    }

    #[test]
    fn missing_required_field_is_an_error() {
        let raw = r#"{"event":"code-change","data":{"roomCode":"R","code":"x"}}"#;
        assert!(serde_json::from_str::<ClientFrame>(raw).is_err());
    }

    #[test]
    fn server_event_frame_shape() {
        let ev = ServerEvent::ItemRenamed {
            old_path: "main.js".into(),
            new_path: "app.js".into(),
            kind: ItemKind::File,
        };
        let v: serde_json::Value = serde_json::from_str(&ev.to_frame()).unwrap();
        assert_eq!(v["event"], "item-renamed");
        assert_eq!(v["data"]["oldPath"], "main.js");
        assert_eq!(v["data"]["type"], "file");
    }

    #[test]
    fn terminal_output_is_a_bare_string() {
        let ev = ServerEvent::TerminalOutput("ls\r\n".into());
        let v: serde_json::Value = serde_json::from_str(&ev.to_frame()).unwrap();
        assert_eq!(v["event"], "terminal-output");
        assert_eq!(v["data"], "ls\r\n");
    }
}
