//! Command execution handles.

use std::{collections::HashMap, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::oneshot;

/// Incremental output callback, invoked as chunks arrive.
///
/// Chunks are raw and may split lines or JSON records arbitrarily;
/// reassembly is the caller's concern.
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Execution mode for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Synchronous: `run` resolves only once the command has finished.
    Foreground,
    /// Asynchronous: `run` returns immediately; completion is awaited via
    /// [`CommandExecution::wait`].
    Background,
}

/// Options for running a command inside a sandbox.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Run in background mode.
    pub background: bool,
    /// Overall command timeout, if the backend supports one.
    pub timeout: Option<Duration>,
    /// Environment overrides for this command only.
    pub envs: HashMap<String, String>,
    /// Called with each stdout chunk as it becomes available.
    pub on_stdout: Option<OutputCallback>,
    /// Called with each stderr chunk as it becomes available.
    pub on_stderr: Option<OutputCallback>,
}

impl RunOptions {
    /// Options for a background run with a stdout callback.
    #[must_use]
    pub fn background(on_stdout: OutputCallback) -> Self {
        Self {
            background: true,
            on_stdout: Some(on_stdout),
            ..Self::default()
        }
    }

    /// Attach a stderr callback.
    #[must_use]
    pub fn with_stderr(mut self, on_stderr: OutputCallback) -> Self {
        self.on_stderr = Some(on_stderr);
        self
    }

    /// Attach environment overrides.
    #[must_use]
    pub fn with_envs(mut self, envs: HashMap<String, String>) -> Self {
        self.envs = envs;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("background", &self.background)
            .field("timeout", &self.timeout)
            .field("envs", &self.envs)
            .field("on_stdout", &self.on_stdout.is_some())
            .field("on_stderr", &self.on_stderr.is_some())
            .finish()
    }
}

/// Final aggregated result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code.
    pub exit_code: i32,
    /// Accumulated stdout.
    pub stdout: String,
    /// Accumulated stderr.
    pub stderr: String,
}

impl CommandOutput {
    /// Whether the command exited successfully.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Degraded failure result carrying an error message in stderr.
    ///
    /// Used by adapters that must never throw from a run path so the
    /// orchestrator sees a uniform shape across backends.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            stdout: String::new(),
            stderr: message.into(),
        }
    }
}

/// Command execution error.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("remote command failed: {0}")]
    Remote(String),
    #[error("command result channel closed before completion")]
    ChannelClosed,
}

enum Inner {
    /// Foreground: the result is already known.
    Ready(Box<Result<CommandOutput, CommandError>>),
    /// Background: the result arrives on a channel once the remote
    /// process terminates.
    Pending(oneshot::Receiver<Result<CommandOutput, CommandError>>),
}

/// Handle to one command run against a sandbox.
///
/// Foreground executions are already resolved when returned; background
/// executions resolve via [`wait`](Self::wait) while incremental output is
/// delivered through the [`RunOptions`] callbacks. `stop` is only meaningful
/// for background executions on backends that support it.
pub struct CommandExecution {
    inner: Inner,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl CommandExecution {
    /// Wrap an already-finished foreground result.
    #[must_use]
    pub fn foreground(output: CommandOutput) -> Self {
        Self {
            inner: Inner::Ready(Box::new(Ok(output))),
            stop_tx: None,
        }
    }

    /// Wrap a background execution whose result arrives on `done_rx`.
    ///
    /// `stop_tx` cancels the backend-side execution (timer teardown,
    /// remote session deletion) when present.
    #[must_use]
    pub fn background(
        done_rx: oneshot::Receiver<Result<CommandOutput, CommandError>>,
        stop_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            inner: Inner::Pending(done_rx),
            stop_tx,
        }
    }

    /// Execution mode of this handle.
    #[must_use]
    pub const fn mode(&self) -> CommandMode {
        match self.inner {
            Inner::Ready(_) => CommandMode::Foreground,
            Inner::Pending(_) => CommandMode::Background,
        }
    }

    /// Whether this execution exposes a stop capability.
    #[must_use]
    pub const fn can_stop(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Request cancellation of a background execution.
    ///
    /// Returns `true` if a stop signal was delivered. Idempotent: later
    /// calls are no-ops.
    pub fn stop(&mut self) -> bool {
        self.stop_tx.take().is_some_and(|tx| tx.send(()).is_ok())
    }

    /// Await the final aggregated result.
    ///
    /// # Errors
    /// Returns [`CommandError::ChannelClosed`] if the backend task dropped
    /// without reporting a result.
    pub async fn wait(self) -> Result<CommandOutput, CommandError> {
        match self.inner {
            Inner::Ready(result) => *result,
            Inner::Pending(rx) => rx.await.map_err(|_| CommandError::ChannelClosed)?,
        }
    }
}
