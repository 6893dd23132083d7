//! Agent command construction.

use std::path::PathBuf;

use thiserror::Error;

/// Default agent CLI, overridable via `AGENT_CLI`.
const DEFAULT_AGENT_CLI: &str = "claude";

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("agent runtime is not installed: {0}")]
    AgentNotInstalled(String),
    #[error("cannot read system prompt file {path}: {source}")]
    SystemPromptUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone)]
pub struct CommandParts {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// One agent invocation as requested by the orchestrator.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// The user's prompt, already augmented with attachment references.
    pub prompt: String,
    /// Working directory the agent operates in.
    pub working_dir: PathBuf,
    /// Model override, if any.
    pub model: Option<String>,
    /// Session token to resume a prior conversation.
    pub resume_session_id: Option<String>,
    /// File holding the system-prompt augmentation. Passing large prompts
    /// by file avoids shell-escaping them through the sandbox boundary.
    pub system_prompt_file: Option<PathBuf>,
    /// Agent CLI override; falls back to `AGENT_CLI` then `claude`.
    pub agent_cli: Option<String>,
}

impl AgentInvocation {
    /// New invocation with just a prompt and working directory.
    #[must_use]
    pub fn new(prompt: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_dir: working_dir.into(),
            model: None,
            resume_session_id: None,
            system_prompt_file: None,
            agent_cli: None,
        }
    }

    /// Build the full agent CLI command.
    ///
    /// Permission mode is always unattended: the sandbox is the blast
    /// radius, not the permission prompt.
    ///
    /// # Errors
    /// Returns error if the CLI cannot be resolved or the system prompt
    /// file cannot be read.
    pub async fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let base = self.agent_cli.clone().unwrap_or_else(|| {
            std::env::var("AGENT_CLI").unwrap_or_else(|_| DEFAULT_AGENT_CLI.into())
        });
        let mut parts = shlex::split(&base)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| CommandBuildError::InvalidBase(base.clone()))?;

        let program = resolve_executable(&parts.remove(0)).await?;

        let mut args = parts;
        args.extend([
            "-p".to_owned(),
            self.prompt.clone(),
            "--output-format".to_owned(),
            "stream-json".to_owned(),
            "--verbose".to_owned(),
            "--dangerously-skip-permissions".to_owned(),
        ]);

        if let Some(model) = &self.model {
            args.extend(["--model".to_owned(), model.clone()]);
        }
        if let Some(session_id) = &self.resume_session_id {
            args.extend(["--resume".to_owned(), session_id.clone()]);
        }
        if let Some(path) = &self.system_prompt_file {
            let system_prompt = tokio::fs::read_to_string(path).await.map_err(|source| {
                CommandBuildError::SystemPromptUnreadable {
                    path: path.clone(),
                    source,
                }
            })?;
            args.extend(["--append-system-prompt".to_owned(), system_prompt]);
        }

        Ok(CommandParts { program, args })
    }
}

/// Resolve an executable by name on the sandbox PATH.
async fn resolve_executable(name: &str) -> Result<PathBuf, CommandBuildError> {
    let path = PathBuf::from(name);
    if path.is_absolute() && path.is_file() {
        return Ok(path);
    }
    let name = name.to_owned();
    tokio::task::spawn_blocking(move || which::which(&name))
        .await
        .map_err(|e| CommandBuildError::AgentNotInstalled(e.to_string()))?
        .map_err(|e| CommandBuildError::AgentNotInstalled(e.to_string()))
}
