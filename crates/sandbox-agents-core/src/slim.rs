//! Slim streaming protocol.
//!
//! Every record is deliberately minimal so a serialized line always fits
//! inside a single I/O chunk; the receiving side then only ever splits on
//! newlines and never reassembles JSON across chunk boundaries.
//!
//! Wire form: `Streaming: <json>` per record, plus a bare non-JSON sentinel
//! line signalling end of task.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::{AgentMessage, ContentBlock};

/// Prefix carried by every slim record line.
pub const STREAM_PREFIX: &str = "Streaming: ";

/// Bare sentinel line signalling task completion. Not JSON on purpose.
pub const COMPLETION_SENTINEL: &str = "SANDBOX_AGENT_TASK_COMPLETE";

/// The one tool whose full structured input is preserved verbatim:
/// downstream renders it as a live checklist.
pub const CHECKLIST_TOOL: &str = "TodoWrite";

/// Max characters of a shell command retained in the headline.
pub const COMMAND_PREVIEW_CHARS: usize = 100;

/// String content of a tool result starting with this marks an error
/// even without an explicit flag.
const RESULT_ERROR_MARKER: &str = "Error:";

/// Compact tagged-union record describing one event of the agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SlimMessage {
    /// Session bootstrap info from the agent's init message.
    SystemInit {
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tools: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Assistant prose, unmodified.
    AssistantText { text: String },
    /// Tool invocation: name plus a per-tool headline, never the full
    /// input. The one exception is the checklist tool, which keeps it all.
    AssistantToolUse {
        tool: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        headline: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    /// Tool result reduced to a single derived error boolean.
    UserToolResult { is_error: bool },
    /// Progress/telemetry, already minimal; passed through unchanged.
    ToolProgress {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    /// Terminal result of the run.
    Result {
        subtype: String,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        total_cost_usd: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    /// Agent-internal error, tagged at the source by the executor so the
    /// receiving side never has to infer failures from raw text.
    AgentError { message: String },
    /// Liveness record keeping the transport from appearing idle.
    /// Filtered out before anything reaches a caller.
    Heartbeat,
}

impl SlimMessage {
    /// Serialize to a full wire line including the prefix.
    ///
    /// # Panics
    /// Never: all variants serialize infallibly.
    #[must_use]
    pub fn to_wire_line(&self) -> String {
        let json = serde_json::to_string(self).expect("slim message serializes");
        format!("{STREAM_PREFIX}{json}")
    }

    /// Session id carried by this record, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::SystemInit { session_id, .. } | Self::Result { session_id, .. } => {
                session_id.as_deref()
            }
            _ => None,
        }
    }
}

/// Apply the slim transform to one raw agent message.
///
/// Returns zero records for dropped kinds, one per retained content block
/// otherwise.
#[must_use]
pub fn slim_transform(msg: &AgentMessage) -> Vec<SlimMessage> {
    match msg {
        AgentMessage::System(sys) if sys.is_init() => vec![SlimMessage::SystemInit {
            model: sys.model.clone(),
            cwd: sys.cwd.clone(),
            tools: sys.tools.clone(),
            session_id: sys.session_id.clone(),
        }],
        AgentMessage::Assistant(env) => env
            .message
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(SlimMessage::AssistantText {
                    text: text.clone(),
                }),
                ContentBlock::ToolUse { name, input } => Some(slim_tool_use(name, input)),
                _ => None,
            })
            .collect(),
        AgentMessage::User(env) => {
            let blocks: Vec<_> = env
                .message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolResult { is_error, content } => {
                        Some(tool_result_is_error(*is_error, content.as_ref()))
                    }
                    _ => None,
                })
                .collect();
            if blocks.is_empty() {
                vec![]
            } else {
                vec![SlimMessage::UserToolResult {
                    is_error: blocks.into_iter().any(|e| e),
                }]
            }
        }
        AgentMessage::ToolProgress(progress) => vec![SlimMessage::ToolProgress {
            fields: progress.fields.clone(),
        }],
        AgentMessage::Result(res) => vec![SlimMessage::Result {
            subtype: res.subtype.clone(),
            is_error: res.is_error,
            duration_ms: res.duration_ms,
            total_cost_usd: res.total_cost_usd,
            result: res.result.clone(),
            session_id: res.session_id.clone(),
        }],
        _ => vec![],
    }
}

fn slim_tool_use(name: &str, input: &Value) -> SlimMessage {
    if name == CHECKLIST_TOOL {
        return SlimMessage::AssistantToolUse {
            tool: name.to_owned(),
            headline: None,
            input: Some(input.clone()),
        };
    }
    SlimMessage::AssistantToolUse {
        tool: name.to_owned(),
        headline: tool_headline(name, input),
        input: None,
    }
}

/// Per-tool headline: the one field worth showing for this tool kind.
fn tool_headline(name: &str, input: &Value) -> Option<String> {
    let field = |key: &str| input.get(key).and_then(Value::as_str).map(str::to_owned);
    match name {
        "Read" | "Write" | "Edit" | "MultiEdit" | "NotebookEdit" => field("file_path"),
        "Glob" | "Grep" => field("pattern"),
        "Bash" => field("command").map(|cmd| truncate_chars(&cmd, COMMAND_PREVIEW_CHARS)),
        "WebFetch" => field("url"),
        "WebSearch" => field("query"),
        "Task" => field("description"),
        _ => None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn tool_result_is_error(flag: Option<bool>, content: Option<&Value>) -> bool {
    if flag == Some(true) {
        return true;
    }
    match content {
        Some(Value::String(s)) => s.starts_with(RESULT_ERROR_MARKER),
        Some(Value::Array(blocks)) => blocks.iter().any(|b| {
            b.get("text")
                .and_then(Value::as_str)
                .is_some_and(|t| t.starts_with(RESULT_ERROR_MARKER))
        }),
        _ => false,
    }
}

/// Final JSON summary the executor prints after the sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionSummary {
    /// Successful run that emitted `messages` slim records.
    #[must_use]
    pub const fn completed(messages: usize) -> Self {
        Self {
            success: true,
            messages: Some(messages),
            error: None,
        }
    }

    /// Failed run.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            messages: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(line: &str) -> AgentMessage {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn init_keeps_minimal_fields() {
        let msg = parse(
            r#"{"type":"system","subtype":"init","session_id":"s-9","model":"opus","cwd":"/app","tools":["Bash"],"apiKeySource":"env"}"#,
        );
        let slim = slim_transform(&msg);
        assert_eq!(
            slim,
            vec![SlimMessage::SystemInit {
                model: Some("opus".into()),
                cwd: Some("/app".into()),
                tools: vec!["Bash".into()],
                session_id: Some("s-9".into()),
            }]
        );
    }

    #[test]
    fn non_init_system_is_dropped() {
        let msg = parse(r#"{"type":"system","subtype":"compact_boundary"}"#);
        assert!(slim_transform(&msg).is_empty());
    }

    #[test]
    fn bash_headline_truncates_to_preview_length() {
        let long = "x".repeat(500);
        let msg = parse(&format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"Bash","input":{{"command":"{long}"}}}}]}}}}"#
        ));
        let slim = slim_transform(&msg);
        match &slim[0] {
            SlimMessage::AssistantToolUse {
                tool,
                headline,
                input,
            } => {
                assert_eq!(tool, "Bash");
                assert_eq!(headline.as_ref().unwrap().chars().count(), 100);
                assert!(input.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn checklist_tool_keeps_full_input() {
        let todos = json!({"todos": [{"content": "scaffold app", "status": "pending"}]});
        let msg = parse(&format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","name":"TodoWrite","input":{todos}}}]}}}}"#
        ));
        let slim = slim_transform(&msg);
        match &slim[0] {
            SlimMessage::AssistantToolUse {
                headline, input, ..
            } => {
                assert!(headline.is_none());
                assert_eq!(input.as_ref().unwrap(), &todos);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn tool_result_error_derivation() {
        let explicit = parse(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","is_error":true,"content":"boom"}]}}"#,
        );
        assert_eq!(
            slim_transform(&explicit),
            vec![SlimMessage::UserToolResult { is_error: true }]
        );

        let marker = parse(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","content":"Error: ENOENT"}]}}"#,
        );
        assert_eq!(
            slim_transform(&marker),
            vec![SlimMessage::UserToolResult { is_error: true }]
        );

        let clean = parse(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","content":[{"type":"text","text":"ok"}]}]}}"#,
        );
        assert_eq!(
            slim_transform(&clean),
            vec![SlimMessage::UserToolResult { is_error: false }]
        );
    }

    #[test]
    fn wire_roundtrip_is_stable() {
        let msg = parse(
            r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":12,"total_cost_usd":0.01,"result":"ok","session_id":"s-1"}"#,
        );
        let slim = slim_transform(&msg).remove(0);

        let line = slim.to_wire_line();
        assert!(line.starts_with(STREAM_PREFIX));
        let parsed: SlimMessage =
            serde_json::from_str(line.strip_prefix(STREAM_PREFIX).unwrap()).unwrap();
        assert_eq!(parsed, slim);
        // A second serialize/parse cycle changes nothing.
        let again: SlimMessage =
            serde_json::from_str(parsed.to_wire_line().strip_prefix(STREAM_PREFIX).unwrap())
                .unwrap();
        assert_eq!(again, slim);
    }

    #[test]
    fn heartbeat_line_shape() {
        assert_eq!(
            SlimMessage::Heartbeat.to_wire_line(),
            format!(r#"{STREAM_PREFIX}{{"type":"heartbeat"}}"#)
        );
    }

    #[test]
    fn session_id_accessor() {
        let slim = SlimMessage::SystemInit {
            model: None,
            cwd: None,
            tools: vec![],
            session_id: Some("s-2".into()),
        };
        assert_eq!(slim.session_id(), Some("s-2"));
        assert_eq!(
            SlimMessage::AssistantText { text: "hi".into() }.session_id(),
            None
        );
    }
}
