//! Messages exchanged with the panel UI over its WebSocket.
//!
//! Every message is a JSON object tagged by `type`. Field names are
//! camelCase to match the panel's scripts.

use fence_stream::Position;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use socket_forwarding::ForwardingEvent;
use std::collections::HashMap;

/// UI → host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiInbound {
    OnLoad,
    WebsocketForwardingOpen {
        url: String,
    },
    WebsocketForwardingMessage {
        url: String,
        message: Value,
    },
    WebsocketForwardingClose {
        url: String,
    },
    OpenFile {
        path: String,
    },
    /// Start (`done = false`) or finish a progress indicator. `id` correlates
    /// the two; without it the oldest operation with the same title finishes.
    WithProgress {
        title: String,
        #[serde(default)]
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

const INBOUND_TYPES: &[&str] = &[
    "onLoad",
    "websocketForwardingOpen",
    "websocketForwardingMessage",
    "websocketForwardingClose",
    "openFile",
    "withProgress",
];

/// Parse a UI frame. `Ok(None)` means a well-formed message of a type this
/// host does not handle.
pub fn parse_inbound(text: &str) -> Result<Option<UiInbound>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let known = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| INBOUND_TYPES.contains(&t));
    if !known {
        return Ok(None);
    }
    serde_json::from_value(value).map(Some)
}

/// Host → UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UiOutbound {
    #[serde(rename_all = "camelCase")]
    OnLoad {
        vsc_machine_id: String,
        api_url: String,
        session_id: String,
    },
    WebsocketForwardingOpen {
        url: String,
    },
    WebsocketForwardingMessage {
        url: String,
        data: String,
    },
    WebsocketForwardingClose {
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    HighlightedCode {
        range_in_file: RangeInFile,
        /// File path → full contents
        filesystem: HashMap<String, String>,
    },
    WorkspacePath {
        value: Option<String>,
    },
    ProgressStarted {
        id: String,
        title: String,
    },
    /// A forwarded socket could not be set up; sent once per url until it
    /// opens again.
    ForwardingError {
        url: String,
        message: String,
    },
}

impl From<ForwardingEvent> for UiOutbound {
    fn from(event: ForwardingEvent) -> Self {
        match event {
            ForwardingEvent::Open { key } => UiOutbound::WebsocketForwardingOpen { url: key },
            ForwardingEvent::Message { key, data } => {
                UiOutbound::WebsocketForwardingMessage { url: key, data }
            }
            ForwardingEvent::Close { key } => UiOutbound::WebsocketForwardingClose { url: key },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeInFile {
    pub filepath: String,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── inbound ─────────────────────────────────────────────────────────

    #[test]
    fn parses_on_load() {
        assert_eq!(
            parse_inbound(r#"{"type":"onLoad"}"#).unwrap(),
            Some(UiInbound::OnLoad)
        );
    }

    #[test]
    fn parses_forwarding_message_with_arbitrary_payload() {
        let msg = parse_inbound(
            r#"{"type":"websocketForwardingMessage","url":"ws://a/b","message":{"k":[1,2]}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            Some(UiInbound::WebsocketForwardingMessage {
                url: "ws://a/b".to_string(),
                message: json!({"k": [1, 2]}),
            })
        );
    }

    #[test]
    fn with_progress_id_and_done_are_optional() {
        let msg = parse_inbound(r#"{"type":"withProgress","title":"Indexing"}"#).unwrap();
        assert_eq!(
            msg,
            Some(UiInbound::WithProgress {
                title: "Indexing".to_string(),
                done: false,
                id: None,
            })
        );

        let msg =
            parse_inbound(r#"{"type":"withProgress","title":"Indexing","done":true,"id":"p1"}"#)
                .unwrap();
        assert_eq!(
            msg,
            Some(UiInbound::WithProgress {
                title: "Indexing".to_string(),
                done: true,
                id: Some("p1".to_string()),
            })
        );
    }

    #[test]
    fn unknown_type_is_ignored() {
        assert_eq!(parse_inbound(r#"{"type":"logEvent","x":1}"#).unwrap(), None);
        assert_eq!(parse_inbound(r#"{"no_type":true}"#).unwrap(), None);
    }

    #[test]
    fn malformed_input_is_an_error() {
        assert!(parse_inbound("{not json").is_err());
        // Known type, missing field
        assert!(parse_inbound(r#"{"type":"openFile"}"#).is_err());
    }

    // ── outbound ────────────────────────────────────────────────────────

    #[test]
    fn on_load_uses_camel_case_fields() {
        let json = serde_json::to_value(UiOutbound::OnLoad {
            vsc_machine_id: "m".to_string(),
            api_url: "http://api".to_string(),
            session_id: "s".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            json!({"type": "onLoad", "vscMachineId": "m", "apiUrl": "http://api", "sessionId": "s"})
        );
    }

    #[test]
    fn highlighted_code_shape() {
        let json = serde_json::to_value(UiOutbound::HighlightedCode {
            range_in_file: RangeInFile {
                filepath: "/w/a.rs".to_string(),
                range: Range {
                    start: Position::new(1, 0),
                    end: Position::new(2, 3),
                },
            },
            filesystem: HashMap::from([("/w/a.rs".to_string(), "fn a() {}".to_string())]),
        })
        .unwrap();
        assert_eq!(json["type"], "highlightedCode");
        assert_eq!(json["rangeInFile"]["filepath"], "/w/a.rs");
        assert_eq!(json["rangeInFile"]["range"]["end"]["character"], 3);
        assert_eq!(json["filesystem"]["/w/a.rs"], "fn a() {}");
    }

    #[test]
    fn forwarding_events_map_to_outbound() {
        let open: UiOutbound = ForwardingEvent::Open {
            key: "ws://x".to_string(),
        }
        .into();
        assert_eq!(
            serde_json::to_value(open).unwrap(),
            json!({"type": "websocketForwardingOpen", "url": "ws://x"})
        );

        let message: UiOutbound = ForwardingEvent::Message {
            key: "ws://x".to_string(),
            data: "{\"a\":1}".to_string(),
        }
        .into();
        assert_eq!(
            serde_json::to_value(message).unwrap(),
            json!({"type": "websocketForwardingMessage", "url": "ws://x", "data": "{\"a\":1}"})
        );

        let close: UiOutbound = ForwardingEvent::Close {
            key: "ws://x".to_string(),
        }
        .into();
        assert_eq!(
            serde_json::to_value(close).unwrap()["type"],
            "websocketForwardingClose"
        );
    }

    #[test]
    fn workspace_path_may_be_null() {
        let json = serde_json::to_value(UiOutbound::WorkspacePath { value: None }).unwrap();
        assert_eq!(json, json!({"type": "workspacePath", "value": null}));
    }
}
