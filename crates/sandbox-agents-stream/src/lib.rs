//! Safe streaming of agent executor output.
//!
//! One [`StreamController`] per invocation: it launches the in-sandbox
//! executor in the background, reassembles its chunked line protocol,
//! forwards slim records to a [`StreamHandler`] and guarantees exactly one
//! terminal callback no matter which of the competing completion signals
//! arrives first.

pub mod controller;
pub mod errors;
pub mod hooks;
pub mod invocation;
pub mod lines;

pub use controller::{
    CompletionHook, CompletionOutcome, StreamConfig, StreamController, StreamError, StreamHandler,
};
pub use errors::DeferredErrors;
pub use hooks::SessionRecordingHook;
pub use invocation::ExecRequest;
pub use lines::{LineBuffer, LineClass, classify_line};
