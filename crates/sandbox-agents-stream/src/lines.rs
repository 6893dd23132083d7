//! Chunk-to-line reassembly and line classification.
//!
//! Raw chunks arrive split at arbitrary byte boundaries. The buffer appends
//! each chunk, splits on newline, hands back every complete line and keeps
//! the trailing partial segment for the next chunk. Nothing else is ever
//! buffered, so delivery order matches arrival order.

use sandbox_agents_core::{
    ExecutionSummary, SlimMessage,
    slim::{COMPLETION_SENTINEL, STREAM_PREFIX},
};

/// Diagnostic prefixes that are never worth forwarding to a caller.
const NOISE_PREFIXES: &[&str] = &[
    "npm warn",
    "npm notice",
    "Debugger attached",
    "Waiting for the debugger",
    "(node:",
    "DeprecationWarning",
    "ExperimentalWarning",
];

/// Reassembly buffer for one raw stream.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    /// New empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line completed by it.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop(); // the newline
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Flush the retained partial segment, e.g. at end of stream.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

/// What one complete line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// The completion sentinel.
    Completion,
    /// A slim protocol record.
    Slim(SlimMessage),
    /// The executor's final JSON summary.
    Summary(ExecutionSummary),
    /// Anything unexpected but plausibly meaningful: forwarded as-is so
    /// nothing is silently lost.
    Raw(String),
    /// Empty or known noise.
    Drop,
}

/// Classify one reassembled line.
///
/// Order matters: sentinel first, then the slim prefix, then the defensive
/// raw fallback.
#[must_use]
pub fn classify_line(line: &str) -> LineClass {
    if line == COMPLETION_SENTINEL {
        return LineClass::Completion;
    }

    if let Some(payload) = line.strip_prefix(STREAM_PREFIX) {
        return match serde_json::from_str::<SlimMessage>(payload) {
            Ok(SlimMessage::Heartbeat) => LineClass::Drop,
            Ok(slim) => LineClass::Slim(slim),
            // A malformed payload still reaches the caller raw.
            Err(_) => LineClass::Raw(line.to_owned()),
        };
    }

    if looks_like_summary(line) {
        if let Ok(summary) = serde_json::from_str::<ExecutionSummary>(line) {
            return LineClass::Summary(summary);
        }
    }

    if line.trim().is_empty() || NOISE_PREFIXES.iter().any(|p| line.starts_with(p)) {
        return LineClass::Drop;
    }

    LineClass::Raw(line.to_owned())
}

fn looks_like_summary(line: &str) -> bool {
    line.starts_with('{') && line.contains("\"success\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_split_mid_record_reassemble_to_one_line() {
        let line = r#"Streaming: {"type":"assistant-text","text":"hello world"}"#;
        let full = format!("{line}\n");

        // Split at every possible boundary, including mid-field-name.
        for split_at in 0..full.len() {
            if !full.is_char_boundary(split_at) {
                continue;
            }
            let mut buffer = LineBuffer::new();
            let mut lines = buffer.push_chunk(&full[..split_at]);
            lines.extend(buffer.push_chunk(&full[split_at..]));
            assert_eq!(lines, vec![line.to_owned()], "split at {split_at}");
            assert_eq!(buffer.take_partial(), None);
        }
    }

    #[test]
    fn multiple_lines_in_one_chunk_with_trailing_partial() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push_chunk("one\ntwo\nthr");
        assert_eq!(lines, vec!["one".to_owned(), "two".to_owned()]);
        assert_eq!(buffer.push_chunk("ee\n"), vec!["three".to_owned()]);
    }

    #[test]
    fn crlf_is_stripped() {
        let mut buffer = LineBuffer::new();
        assert_eq!(buffer.push_chunk("a\r\nb\n"), vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn sentinel_is_exact_match_only() {
        assert_eq!(classify_line("SANDBOX_AGENT_TASK_COMPLETE"), LineClass::Completion);
        assert!(matches!(
            classify_line("SANDBOX_AGENT_TASK_COMPLETE trailing"),
            LineClass::Raw(_)
        ));
    }

    #[test]
    fn heartbeat_is_dropped_after_prefix_strip() {
        assert_eq!(
            classify_line(r#"Streaming: {"type":"heartbeat"}"#),
            LineClass::Drop
        );
    }

    #[test]
    fn slim_payloads_are_parsed() {
        match classify_line(r#"Streaming: {"type":"assistant-text","text":"hi"}"#) {
            LineClass::Slim(SlimMessage::AssistantText { text }) => assert_eq!(text, "hi"),
            other => panic!("wrong class: {other:?}"),
        }
    }

    #[test]
    fn malformed_slim_payload_falls_back_to_raw() {
        let line = r#"Streaming: {"type":"assistant-te"#;
        assert_eq!(classify_line(line), LineClass::Raw(line.to_owned()));
    }

    #[test]
    fn summary_lines_are_recognized() {
        match classify_line(r#"{"success":true,"messages":12}"#) {
            LineClass::Summary(summary) => {
                assert!(summary.success);
                assert_eq!(summary.messages, Some(12));
            }
            other => panic!("wrong class: {other:?}"),
        }
    }

    #[test]
    fn noise_and_blank_lines_are_dropped() {
        assert_eq!(classify_line(""), LineClass::Drop);
        assert_eq!(classify_line("   "), LineClass::Drop);
        assert_eq!(classify_line("npm warn deprecated x@1"), LineClass::Drop);
        assert_eq!(classify_line("Debugger attached."), LineClass::Drop);
    }

    #[test]
    fn unexpected_lines_are_forwarded_raw() {
        assert_eq!(
            classify_line("Cost: $0.0042"),
            LineClass::Raw("Cost: $0.0042".to_owned())
        );
    }
}
