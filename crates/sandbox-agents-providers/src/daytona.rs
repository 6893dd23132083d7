//! Daytona backend adapter.
//!
//! The service has no native background-execution or file-watch primitive.
//! Background commands are emulated: open a remote process session, submit
//! the command asynchronously, then poll the session's accumulated log on a
//! fixed sub-second interval, forwarding only the byte delta since the last
//! poll. This trades polling latency for portability; `watch_dir` stays
//! absent and callers fall back to external filesystem polling.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use sandbox_agents_core::{
    CommandExecution, CommandOutput, OutputCallback, ProviderError, RunOptions, Sandbox,
    SandboxConfig, SandboxProvider,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::http::{ApiClient, urlencode};

const DEFAULT_API_URL: &str = "https://app.daytona.io/api";
const DEFAULT_PROXY_DOMAIN: &str = "proxy.daytona.work";

/// Fixed poll interval for session-log diffing.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Daytona provider.
pub struct DaytonaProvider {
    api: ApiClient,
    proxy_domain: String,
}

impl DaytonaProvider {
    /// Build from explicit credentials.
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api: ApiClient::new(api_url, api_key),
            proxy_domain: DEFAULT_PROXY_DOMAIN.into(),
        }
    }

    /// Build from `DAYTONA_API_KEY` (and optional `DAYTONA_API_URL`).
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] when the key is missing.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("DAYTONA_API_KEY")
            .map_err(|_| ProviderError::Config("DAYTONA_API_KEY is not set".into()))?;
        let api_url = std::env::var("DAYTONA_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        Ok(Self::new(api_url, api_key))
    }

    fn sandbox(&self, id: String) -> Arc<DaytonaSandbox> {
        Arc::new(DaytonaSandbox {
            api: self.api.clone(),
            id,
            proxy_domain: self.proxy_domain.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SandboxInfo {
    id: String,
}

#[async_trait]
impl SandboxProvider for DaytonaProvider {
    fn name(&self) -> &'static str {
        "daytona"
    }

    async fn create(&self, config: SandboxConfig) -> Result<Arc<dyn Sandbox>, ProviderError> {
        let body = json!({
            "snapshot": config.template,
            "labels": config.metadata,
            "autoStopInterval": config.timeout.map(|t| t.as_secs() / 60),
            "env": config.envs,
        });
        let info: SandboxInfo = self
            .api
            .post_json("/sandbox", &body)
            .await
            .map_err(|e| ProviderError::Provisioning(e.to_string()))?;
        tracing::info!(sandbox_id = %info.id, snapshot = %config.template, "created daytona sandbox");
        Ok(self.sandbox(info.id))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn Sandbox>, ProviderError> {
        let info: SandboxInfo = self
            .api
            .get_json(&format!("/sandbox/{sandbox_id}"))
            .await
            .map_err(|_| ProviderError::NotFound(sandbox_id.to_owned()))?;
        Ok(self.sandbox(info.id))
    }
}

struct DaytonaSandbox {
    api: ApiClient,
    id: String,
    proxy_domain: String,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(rename = "exitCode", default)]
    exit_code: i32,
    #[serde(default)]
    result: String,
    #[serde(default)]
    stderr: String,
}

#[derive(Debug, Deserialize)]
struct SessionCommandStatus {
    #[serde(rename = "exitCode", default)]
    exit_code: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct PreviewInfo {
    url: String,
}

/// Source of a remote session command's accumulated log.
///
/// The poll loop only ever talks to this seam, so tests drive it with a
/// scripted log instead of a live API.
#[async_trait]
pub(crate) trait SessionLogSource: Send + Sync {
    /// Full log accumulated so far, as raw bytes. Diffing happens on bytes
    /// so a fetch that truncates mid-character cannot shift later offsets
    /// onto a non-boundary.
    async fn fetch_log(&self) -> Result<Vec<u8>, ProviderError>;
    /// Exit code, once the command has finished.
    async fn status(&self) -> Result<Option<i32>, ProviderError>;
    /// Tear down the remote session.
    async fn delete(&self) -> Result<(), ProviderError>;
}

struct ApiSession {
    api: ApiClient,
    sandbox_id: String,
    session_id: String,
    command_id: String,
}

#[async_trait]
impl SessionLogSource for ApiSession {
    async fn fetch_log(&self) -> Result<Vec<u8>, ProviderError> {
        let path = format!(
            "/toolbox/{}/process/session/{}/command/{}/logs",
            self.sandbox_id, self.session_id, self.command_id
        );
        self.api.get_bytes(&path).await
    }

    async fn status(&self) -> Result<Option<i32>, ProviderError> {
        let path = format!(
            "/toolbox/{}/process/session/{}/command/{}",
            self.sandbox_id, self.session_id, self.command_id
        );
        let status: SessionCommandStatus = self.api.get_json(&path).await?;
        Ok(status.exit_code)
    }

    async fn delete(&self) -> Result<(), ProviderError> {
        self.api
            .delete(&format!(
                "/toolbox/{}/process/session/{}",
                self.sandbox_id, self.session_id
            ))
            .await
    }
}

/// Poll a session log on a fixed interval, forwarding only newly appended
/// bytes. Runs until the command finishes or a stop signal arrives; every
/// failed poll is swallowed and retried on the next tick.
pub(crate) async fn poll_session_log(
    source: Arc<dyn SessionLogSource>,
    interval: Duration,
    on_stdout: Option<OutputCallback>,
    mut stop_rx: oneshot::Receiver<()>,
    done_tx: oneshot::Sender<Result<CommandOutput, sandbox_agents_core::command::CommandError>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut offset = 0usize;
    let mut seen: Vec<u8> = Vec::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let log = match source.fetch_log().await {
                    Ok(log) => log,
                    Err(e) => {
                        tracing::debug!(error = %e, "session log poll failed, retrying");
                        continue;
                    }
                };
                if log.len() > offset {
                    // Only the delta is lossy-decoded; the offset stays a
                    // plain byte count and never indexes into a str.
                    let delta = String::from_utf8_lossy(&log[offset..]);
                    if let Some(cb) = &on_stdout {
                        cb(&delta);
                    }
                    offset = log.len();
                    seen = log;
                }

                match source.status().await {
                    Ok(Some(exit_code)) => {
                        let _ = done_tx.send(Ok(CommandOutput {
                            exit_code,
                            stdout: String::from_utf8_lossy(&seen).into_owned(),
                            stderr: String::new(),
                        }));
                        if let Err(e) = source.delete().await {
                            tracing::debug!(error = %e, "session cleanup failed");
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::debug!(error = %e, "session status poll failed, retrying"),
                }
            }
            _ = &mut stop_rx => {
                // Stopped executions yield no final result; the session is
                // deleted so the backend stops accumulating.
                if let Err(e) = source.delete().await {
                    tracing::debug!(error = %e, "session cleanup failed");
                }
                return;
            }
        }
    }
}

impl DaytonaSandbox {
    fn toolbox(&self, rest: &str) -> String {
        format!("/toolbox/{}{rest}", self.id)
    }

    /// Emulated background run. Any failure while setting up the session
    /// degrades to a resolved failure result so the caller's control flow
    /// stays uniform across backends.
    async fn run_background(&self, command: &str, options: RunOptions) -> CommandExecution {
        let session_id = format!("bg-{}", Uuid::new_v4());

        let setup: Result<String, ProviderError> = async {
            self.api
                .post_unit(
                    &self.toolbox("/process/session"),
                    &json!({ "sessionId": session_id }),
                )
                .await?;
            #[derive(Debug, Deserialize)]
            struct Submitted {
                #[serde(rename = "cmdId")]
                cmd_id: String,
            }
            let submitted: Submitted = self
                .api
                .post_json(
                    &format!("/toolbox/{}/process/session/{session_id}/exec", self.id),
                    &json!({ "command": command, "runAsync": true }),
                )
                .await?;
            Ok(submitted.cmd_id)
        }
        .await;

        let command_id = match setup {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "background session setup failed");
                return CommandExecution::foreground(CommandOutput::failure(e.to_string()));
            }
        };

        let source = Arc::new(ApiSession {
            api: self.api.clone(),
            sandbox_id: self.id.clone(),
            session_id,
            command_id,
        });

        let (done_tx, done_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(poll_session_log(
            source,
            POLL_INTERVAL,
            options.on_stdout,
            stop_rx,
            done_tx,
        ));

        CommandExecution::background(done_rx, Some(stop_tx))
    }
}

#[async_trait]
impl Sandbox for DaytonaSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<(), ProviderError> {
        self.api
            .post_bytes(
                &self.toolbox(&format!("/files/upload?path={}", urlencode(path))),
                contents.to_vec(),
            )
            .await
            .map_err(|e| file_err(path, &e))
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, ProviderError> {
        self.api
            .get_bytes(&self.toolbox(&format!("/files/download?path={}", urlencode(path))))
            .await
            .map_err(|e| file_err(path, &e))
    }

    async fn exists(&self, path: &str) -> Result<bool, ProviderError> {
        self.api
            .head_exists(&self.toolbox(&format!("/files/info?path={}", urlencode(path))))
            .await
            .map_err(|e| file_err(path, &e))
    }

    async fn make_dir(&self, path: &str) -> Result<(), ProviderError> {
        self.api
            .post_unit(
                &self.toolbox(&format!("/files/folder?path={}", urlencode(path))),
                &json!({}),
            )
            .await
            .map_err(|e| file_err(path, &e))
    }

    async fn run(
        &self,
        command: &str,
        options: RunOptions,
    ) -> Result<CommandExecution, ProviderError> {
        if options.background {
            return Ok(self.run_background(command, options).await);
        }

        let body = json!({
            "command": command,
            "timeout": options.timeout.map(|t| t.as_secs()),
            "env": options.envs,
        });
        let response: ExecResponse = self
            .api
            .post_json(&self.toolbox("/process/execute"), &body)
            .await?;

        if let Some(cb) = &options.on_stdout {
            if !response.result.is_empty() {
                cb(&response.result);
            }
        }
        if let Some(cb) = &options.on_stderr {
            if !response.stderr.is_empty() {
                cb(&response.stderr);
            }
        }

        Ok(CommandExecution::foreground(CommandOutput {
            exit_code: response.exit_code,
            stdout: response.result,
            stderr: response.stderr,
        }))
    }

    fn get_host(&self, port: u16) -> String {
        format!("{port}-{}.{}", self.id, self.proxy_domain)
    }

    async fn get_preview_url(&self, port: u16) -> Option<Result<String, ProviderError>> {
        Some(
            self.api
                .get_json::<PreviewInfo>(&self.toolbox(&format!("/preview_url/{port}")))
                .await
                .map(|info| info.url),
        )
    }

    async fn set_timeout(&self, timeout: Duration) -> Result<(), ProviderError> {
        self.api
            .post_unit(
                &format!("/sandbox/{}/autostop", self.id),
                &json!({ "interval": timeout.as_secs() / 60 }),
            )
            .await
    }
}

fn file_err(path: &str, e: &ProviderError) -> ProviderError {
    ProviderError::File {
        path: path.to_owned(),
        message: e.to_string(),
    }
}
