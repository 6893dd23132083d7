//! In-sandbox executor.
//!
//! Runs the agent's query loop inside the sandbox and speaks the slim line
//! protocol on stdout: one `Streaming: <json>` line per record, a periodic
//! heartbeat, the completion sentinel, and a final JSON summary.

pub mod attachments;
pub mod command;
pub mod runner;

pub use command::{AgentInvocation, CommandBuildError, CommandParts};
pub use runner::{ExecutorError, run_agent};
