//! E2B backend adapter.
//!
//! The service has native primitives for everything this crate needs:
//! command execution streams NDJSON events over the response body, and the
//! in-sandbox daemon exposes a directory watch stream. Background mode is a
//! thin pass-through with no local emulation.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use sandbox_agents_core::{
    CommandExecution, CommandOutput, OutputCallback, ProviderError, RunOptions, Sandbox,
    SandboxConfig, SandboxProvider,
    command::CommandError,
    traits::{WatchEvent, WatchEventKind, WatchHandle},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use crate::http::{ApiClient, urlencode};

const CONTROL_PLANE: &str = "https://api.e2b.app";
const ENVD_PORT: u16 = 49983;
const DEFAULT_DOMAIN: &str = "e2b.app";

/// E2B provider.
pub struct E2bProvider {
    api: ApiClient,
    api_key: String,
    domain: String,
}

impl E2bProvider {
    /// Build from explicit credentials.
    #[must_use]
    pub fn new(api_key: impl Into<String>, domain: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            api: ApiClient::new(CONTROL_PLANE, api_key.clone()),
            api_key,
            domain: domain.into(),
        }
    }

    /// Build from `E2B_API_KEY` (and optional `E2B_DOMAIN`).
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the key is missing.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("E2B_API_KEY")
            .map_err(|_| ProviderError::Config("E2B_API_KEY is not set".into()))?;
        let domain = std::env::var("E2B_DOMAIN").unwrap_or_else(|_| DEFAULT_DOMAIN.into());
        Ok(Self::new(api_key, domain))
    }

    fn sandbox(&self, id: String) -> Arc<E2bSandbox> {
        let host = format!("{ENVD_PORT}-{id}.{}", self.domain);
        Arc::new(E2bSandbox {
            api: self.api.clone(),
            envd: ApiClient::new(format!("https://{host}"), self.api_key.clone()),
            id,
            domain: self.domain.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SandboxInfo {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    fn name(&self) -> &'static str {
        "e2b"
    }

    async fn create(&self, config: SandboxConfig) -> Result<Arc<dyn Sandbox>, ProviderError> {
        let body = json!({
            "templateID": config.template,
            "metadata": config.metadata,
            "timeout": config.timeout.map(|t| t.as_secs()),
            "envVars": config.envs,
        });
        let info: SandboxInfo = self
            .api
            .post_json("/sandboxes", &body)
            .await
            .map_err(|e| ProviderError::Provisioning(e.to_string()))?;
        tracing::info!(sandbox_id = %info.sandbox_id, template = %config.template, "created e2b sandbox");
        Ok(self.sandbox(info.sandbox_id))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, ProviderError> {
        let info: SandboxInfo = self
            .api
            .get_json(&format!("/sandboxes/{sandbox_id}"))
            .await
            .map_err(|_| ProviderError::NotFound(sandbox_id.to_owned()))?;
        Ok(self.sandbox(info.sandbox_id))
    }
}

struct E2bSandbox {
    /// Control-plane client (lifecycle).
    api: ApiClient,
    /// Data-plane client talking to the in-sandbox daemon.
    envd: ApiClient,
    id: String,
    domain: String,
}

/// One NDJSON event of a streamed command.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum CommandEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit { code: i32 },
}

/// One NDJSON event of a directory watch stream.
#[derive(Debug, Deserialize)]
struct FsEvent {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

/// Drain a streamed command response, forwarding chunks to the callbacks
/// and aggregating the final output.
async fn pump_command(
    response: reqwest::Response,
    on_stdout: Option<OutputCallback>,
    on_stderr: Option<OutputCallback>,
) -> Result<CommandOutput, CommandError> {
    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exit_code = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| CommandError::Remote(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<CommandEvent>(line) {
                Ok(CommandEvent::Stdout { data }) => {
                    if let Some(cb) = &on_stdout {
                        cb(&data);
                    }
                    stdout.push_str(&data);
                }
                Ok(CommandEvent::Stderr { data }) => {
                    if let Some(cb) = &on_stderr {
                        cb(&data);
                    }
                    stderr.push_str(&data);
                }
                Ok(CommandEvent::Exit { code }) => exit_code = code,
                Err(e) => tracing::debug!(%line, error = %e, "unparseable command event"),
            }
        }
    }

    Ok(CommandOutput {
        exit_code,
        stdout,
        stderr,
    })
}

#[async_trait]
impl Sandbox for E2bSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ProviderError> {
        self.envd
            .post_bytes(&format!("/files?path={}", urlencode(path)), contents.to_vec())
            .await
            .map_err(|e| file_err(path, e))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        self.envd
            .get_bytes(&format!("/files?path={}", urlencode(path)))
            .await
            .map_err(|e| file_err(path, e))
    }

    async fn exists(&self, path: &str) -> Result<bool, ProviderError> {
        self.envd
            .head_exists(&format!("/files/stat?path={}", urlencode(path)))
            .await
            .map_err(|e| file_err(path, e))
    }

    async fn make_dir(&self, path: &str) -> Result<(), ProviderError> {
        self.envd
            .post_unit(&format!("/files/dir?path={}", urlencode(path)), &json!({}))
            .await
            .map_err(|e| file_err(path, e))
    }

    async fn watch_dir(&self, path: &str) -> Option<Result<WatchHandle, ProviderError>> {
        let response = match self
            .envd
            .get_stream(&format!("/watch?path={}", urlencode(path)))
            .await
        {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };

        let (events_tx, events_rx) = mpsc::channel(64);
        let (stop_tx, mut stop_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            loop {
                tokio::select! {
                    chunk = stream.next() => {
                        let Some(Ok(chunk)) = chunk else { break };
                        buffer.push_str(&String::from_utf8_lossy(&chunk));
                        while let Some(pos) = buffer.find('\n') {
                            let line: String = buffer.drain(..=pos).collect();
                            let Ok(event) = serde_json::from_str::<FsEvent>(line.trim_end()) else {
                                continue;
                            };
                            let kind = match event.kind.as_str() {
                                "create" => WatchEventKind::Create,
                                "write" => WatchEventKind::Write,
                                "remove" => WatchEventKind::Remove,
                                "rename" => WatchEventKind::Rename,
                                _ => continue,
                            };
                            if events_tx
                                .send(WatchEvent { kind, path: event.path })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
        });

        Some(Ok(WatchHandle::new(events_rx, stop_tx)))
    }

    async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandExecution, ProviderError> {
        let body = json!({
            "cmd": command,
            "envs": options.envs,
            "timeoutMs": options.timeout.map(|t| t.as_millis() as u64),
        });
        let response = self.envd.post_stream("/commands", &body).await?;

        if !options.background {
            let output = pump_command(response, options.on_stdout, options.on_stderr)
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            return Ok(CommandExecution::foreground(output));
        }

        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let on_stdout = options.on_stdout;
        let on_stderr = options.on_stderr;

        tokio::spawn(async move {
            tokio::select! {
                result = pump_command(response, on_stdout, on_stderr) => {
                    let _ = done_tx.send(result);
                }
                // Stop drops the response, cancelling the remote stream.
                // A stopped execution yields no final result.
                _ = &mut stop_rx => {}
            }
        });

        Ok(CommandExecution::background(done_rx, Some(stop_tx)))
    }

    fn get_host(&self, port: u16) -> String {
        format!("{port}-{}.{}", self.id, self.domain)
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<(), ProviderError> {
        self.api
            .post_unit(
                &format!("/sandboxes/{}/timeout", self.id),
                &json!({ "timeout": timeout.as_secs() }),
            )
            .await
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.api.delete(&format!("/sandboxes/{}", self.id)).await
    }
}

fn file_err(path: &str, e: ProviderError) -> ProviderError {
    ProviderError::File {
        path: path.to_owned(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_shape() {
        let provider = E2bProvider::new("key", "e2b.app");
        let sandbox = provider.sandbox("sb-123".into());
        assert_eq!(sandbox.get_host(3000), "3000-sb-123.e2b.app");
    }

    #[tokio::test]
    async fn public_url_synthesized_without_preview_capability() {
        let provider = E2bProvider::new("key", "e2b.app");
        let sandbox = provider.sandbox("sb-123".into());
        assert_eq!(sandbox.get_preview_url(3000).await.map(|_| ()), None);
        assert_eq!(
            sandbox.public_url(3000).await.unwrap(),
            "https://3000-sb-123.e2b.app"
        );
    }

    #[test]
    fn command_event_parsing() {
        let e: CommandEvent = serde_json::from_str(r#"{"event":"stdout","data":"hi"}"#).unwrap();
        assert!(matches!(e, CommandEvent::Stdout { data } if data == "hi"));
        let e: CommandEvent = serde_json::from_str(r#"{"event":"exit","code":2}"#).unwrap();
        assert!(matches!(e, CommandEvent::Exit { code: 2 }));
    }
}
