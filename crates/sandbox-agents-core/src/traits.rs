//! Sandbox capability interface.
//!
//! Backends differ in what they can do natively: one service streams
//! background command output and watches directories, another only exposes
//! synchronous sessions. The trait keeps a small mandatory core and models
//! everything else as an optional capability that callers feature-detect.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::command::{CommandExecution, RunOptions};

/// Provider/capability error.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provisioning failed: {0}")]
    Provisioning(String),
    #[error("sandbox not found: {0}")]
    NotFound(String),
    #[error("backend request failed: {0}")]
    Transport(String),
    #[error("file operation failed on {path}: {message}")]
    File { path: String, message: String },
    #[error("provider misconfigured: {0}")]
    Config(String),
}

/// Configuration for creating a sandbox.
#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    /// Backend-specific image/template identifier.
    pub template: String,
    /// Arbitrary key-value metadata attached to the sandbox.
    pub metadata: HashMap<String, String>,
    /// Inactivity timeout after which the backend reclaims the sandbox.
    pub timeout: Option<Duration>,
    /// Environment variables available to every command.
    pub envs: HashMap<String, String>,
}

impl SandboxConfig {
    /// Create a config for the given template.
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Self::default()
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the inactivity timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.insert(key.into(), value.into());
        self
    }
}

/// Kind of filesystem change observed by a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Create,
    Write,
    Remove,
    Rename,
}

/// One filesystem change event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: String,
}

/// Handle to a native directory watch.
///
/// Only backends with a native filesystem-event primitive return one;
/// everyone else polls the filesystem externally.
pub struct WatchHandle {
    events: mpsc::Receiver<WatchEvent>,
    stop_tx: Option<oneshot::Sender<()>>,
}

impl WatchHandle {
    /// Build a handle from an event channel and stop signal.
    #[must_use]
    pub fn new(events: mpsc::Receiver<WatchEvent>, stop_tx: oneshot::Sender<()>) -> Self {
        Self {
            events,
            stop_tx: Some(stop_tx),
        }
    }

    /// Next event, or `None` once the watch has ended.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One remote sandbox.
///
/// Mandatory operations must be implemented by every backend. Optional
/// capabilities (`watch_dir`, `get_preview_url`, `close`) have defaults
/// that report absence; callers must feature-detect rather than assume.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Opaque backend identifier for this sandbox.
    fn id(&self) -> &str;

    /// Write a file, creating parent directories as the backend allows.
    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ProviderError>;

    /// Read a file's full contents.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ProviderError>;

    /// Whether a path exists.
    async fn exists(&self, path: &str) -> Result<bool, ProviderError>;

    /// Create a directory (and parents).
    async fn make_dir(&self, path: &str) -> Result<(), ProviderError>;

    /// Watch a directory for changes, if the backend supports it.
    ///
    /// `None` means the capability is absent, not that the watch failed.
    async fn watch_dir(&self, path: &str) -> Option<Result<WatchHandle, ProviderError>> {
        let _ = path;
        None
    }

    /// Run a command. With `options.background` the returned execution
    /// resolves via `wait()` while output streams through the callbacks;
    /// otherwise it is already resolved.
    async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandExecution, ProviderError>;

    /// Hostname serving the given sandbox port. Always available.
    fn get_host(&self, port: u16) -> String;

    /// Backend-issued preview URL for a port, if the backend supports it.
    async fn get_preview_url(&self, port: u16) -> Option<Result<String, ProviderError>> {
        let _ = port;
        None
    }

    /// Public URL for a port: the native preview URL when available,
    /// otherwise HTTPS synthesized from [`get_host`](Self::get_host).
    async fn public_url(&self, port: u16) -> Result<String, ProviderError> {
        match self.get_preview_url(port).await {
            Some(url) => url,
            None => Ok(format!("https://{}", self.get_host(port))),
        }
    }

    /// Extend the inactivity expiry.
    async fn set_timeout(&self, timeout: Duration) -> Result<(), ProviderError>;

    /// Release the sandbox. Optional and idempotent; the default is a no-op
    /// for backends that only expire by inactivity.
    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// A remote-execution backend.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    /// Provision a new sandbox.
    async fn create(&self, config: SandboxConfig) -> Result<Arc<dyn Sandbox>, ProviderError>;

    /// Reconnect to an existing sandbox by id.
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, ProviderError>;
}
