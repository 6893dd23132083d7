//! Deferred agent-error collection.
//!
//! The primary channel is structured: the executor tags agent-runtime
//! errors as `agent-error` slim records at the source. The substring
//! heuristic below only backstops raw lines that bypassed the protocol,
//! and the generated application's own dev-server output is excluded from
//! it outright. Runtime noise from the app under construction must never
//! be misreported as an agent failure.
//!
//! Collected errors are bundled and surfaced once, only after completion
//! is confirmed.

/// Install-path markers identifying the agent runtime's own stack frames.
const AGENT_INSTALL_MARKERS: &[&str] = &[
    "@anthropic-ai/claude-code",
    "/.npm-global/",
    "/.claude/local/",
];

/// Patterns characteristic of the generated app's dev server; lines
/// matching any of these are never classified as agent errors.
const DEV_SERVER_PATTERNS: &[&str] = &[
    "[vite]",
    "VITE v",
    "hmr update",
    "Local:",
    "Network:",
    "webpack",
    "ELIFECYCLE",
    "EADDRINUSE",
    "nodemon",
];

/// Heuristic: does this raw line look like an agent-internal error?
#[must_use]
pub fn is_agent_error_line(line: &str) -> bool {
    if DEV_SERVER_PATTERNS.iter().any(|p| line.contains(p)) {
        return false;
    }
    if line.starts_with("API Error:") {
        return true;
    }
    line.contains("Error:") && AGENT_INSTALL_MARKERS.iter().any(|m| line.contains(m))
}

/// Per-invocation collection of deferred errors.
#[derive(Debug, Default)]
pub struct DeferredErrors {
    items: Vec<String>,
}

impl DeferredErrors {
    /// Record a structured agent-error message.
    pub fn record(&mut self, message: String) {
        self.items.push(message);
    }

    /// Apply the heuristic to a raw line; collects and returns `true` when
    /// it matched.
    pub fn observe_raw(&mut self, line: &str) -> bool {
        if is_agent_error_line(line) {
            self.items.push(line.to_owned());
            return true;
        }
        false
    }

    /// Number of collected errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain everything into one bundle, in collection order.
    pub fn take_bundle(&mut self) -> Option<String> {
        if self.items.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.items).join("\n"))
    }
}
