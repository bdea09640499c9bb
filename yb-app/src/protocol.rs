//! JSON frames exchanged between the daemon and remote clients over `/ws`.

use crate::engine::TurnResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Message {
        id: String,
        room_id: String,
        text: String,
        #[serde(default)]
        stream: bool,
    },
    Stop {
        id: String,
        room_id: String,
    },
}

impl ClientFrame {
    pub fn id(&self) -> &str {
        match self {
            ClientFrame::Message { id, .. } | ClientFrame::Stop { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Token {
        id: String,
        room_id: String,
        text: String,
    },
    Response {
        id: String,
        room_id: String,
        result: TurnResult,
    },
    Stopped {
        id: String,
        room_id: String,
        ok: bool,
    },
    Cancelled {
        id: String,
        room_id: String,
    },
    Error {
        id: String,
        room_id: String,
        error: String,
    },
}

impl ServerFrame {
    pub fn id(&self) -> &str {
        match self {
            ServerFrame::Token { id, .. }
            | ServerFrame::Response { id, .. }
            | ServerFrame::Stopped { id, .. }
            | ServerFrame::Cancelled { id, .. }
            | ServerFrame::Error { id, .. } => id,
        }
    }

    /// Whether this frame ends the exchange for its request id.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerFrame::Token { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TurnStatus;
    use serde_json::json;

    #[test]
    fn client_frames_use_type_tag() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "message", "id": "1", "room_id": "console", "text": "hi"
        }))
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                id: "1".to_string(),
                room_id: "console".to_string(),
                text: "hi".to_string(),
                stream: false,
            }
        );
        let stop = serde_json::to_value(ClientFrame::Stop {
            id: "2".to_string(),
            room_id: "console".to_string(),
        })
        .unwrap();
        assert_eq!(stop, json!({ "type": "stop", "id": "2", "room_id": "console" }));
    }

    #[test]
    fn response_frame_carries_turn_result() {
        let frame = ServerFrame::Response {
            id: "7".to_string(),
            room_id: "r".to_string(),
            result: TurnResult {
                status: TurnStatus::Suspended,
                responses: vec!["Approve?".to_string()],
                active_conversation: "abcd1234".to_string(),
                model: "gpt-4o-mini".to_string(),
                tool_notices: Vec::new(),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "response");
        assert_eq!(value["result"]["status"], "suspended");
        assert!(frame.is_terminal());
        assert!(
            !ServerFrame::Token {
                id: "7".to_string(),
                room_id: "r".to_string(),
                text: "x".to_string()
            }
            .is_terminal()
        );
    }
}
