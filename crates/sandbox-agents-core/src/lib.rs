//! Core abstractions for sandboxed agent execution.
//!
//! This crate provides the fundamental building blocks:
//! - `Sandbox` / `SandboxProvider` - Capability interface over remote execution backends
//! - `CommandExecution` - Foreground/background command handle
//! - `SlimMessage` - Compact line-delimited streaming protocol
//! - `AgentMessage` - Raw agent stream-json model the slim transform consumes

pub mod agent;
pub mod command;
pub mod slim;
pub mod traits;

pub use agent::AgentMessage;
pub use command::{CommandExecution, CommandOutput, OutputCallback, RunOptions};
pub use slim::{ExecutionSummary, SlimMessage};
pub use traits::{ProviderError, Sandbox, SandboxConfig, SandboxProvider};
