//! Raw agent stream-json message model.
//!
//! The agent CLI emits one JSON object per stdout line. Only the kinds the
//! slim transform consumes are modeled; everything else (stream deltas,
//! compaction markers, auth pings) collapses into `Other` and is dropped.

use serde::Deserialize;
use serde_json::{Map, Value};

/// One line of the agent's stream-json output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    System(SystemMessage),
    Assistant(MessageEnvelope),
    User(MessageEnvelope),
    ToolProgress(ProgressMessage),
    Result(ResultMessage),
    #[serde(other)]
    Other,
}

/// System message; `subtype: "init"` carries the session bootstrap info.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
}

impl SystemMessage {
    /// Whether this is the session-init message.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.subtype.as_deref() == Some("init")
    }
}

/// Envelope for assistant/user messages.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEnvelope {
    pub message: MessageBody,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Message body holding content blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One content block of an assistant or user message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        is_error: Option<bool>,
        #[serde(default)]
        content: Option<Value>,
    },
    #[serde(other)]
    Other,
}

/// Progress/telemetry message, already minimal; passed through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressMessage {
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Terminal result message.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: String,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init_message() {
        let line = r#"{"type":"system","subtype":"init","session_id":"s-1","model":"opus","cwd":"/workspace","tools":["Bash","Read"]}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        match msg {
            AgentMessage::System(sys) => {
                assert!(sys.is_init());
                assert_eq!(sys.session_id.as_deref(), Some("s-1"));
                assert_eq!(sys.tools.len(), 2);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_result_message() {
        let line = r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":4200,"total_cost_usd":0.37,"result":"done","session_id":"s-1"}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        match msg {
            AgentMessage::Result(res) => {
                assert_eq!(res.subtype, "success");
                assert!(!res.is_error);
                assert_eq!(res.duration_ms, Some(4200));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_kinds_collapse_to_other() {
        let line = r#"{"type":"stream_event","event":{"delta":"x"}}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        assert!(matches!(msg, AgentMessage::Other));
    }

    #[test]
    fn unknown_content_blocks_collapse_to_other() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hm"}]}}"#;
        let msg: AgentMessage = serde_json::from_str(line).unwrap();
        match msg {
            AgentMessage::Assistant(env) => {
                assert!(matches!(env.message.content[0], ContentBlock::Other));
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
