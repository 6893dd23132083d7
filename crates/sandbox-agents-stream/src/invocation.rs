//! Builds the in-sandbox executor command line.

use std::fmt;

/// Request to run one agent task inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    /// Task prompt.
    pub prompt: String,
    /// Session token to resume a prior conversation.
    pub resume_session_id: Option<String>,
    /// Model override passed through to the agent CLI.
    pub model: Option<String>,
    /// In-sandbox path of the system-prompt augmentation file.
    pub system_prompt_file: Option<String>,
    /// Image attachment URLs, passed as one JSON argument.
    pub image_urls: Vec<String>,
    /// Working directory override.
    pub workdir: Option<String>,
}

/// The request contained a value the shell cannot represent (a NUL byte).
#[derive(Debug, thiserror::Error)]
#[error("cannot shell-quote argument: {0}")]
pub struct QuoteError(String);

impl ExecRequest {
    /// New request for a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Render the full `sandbox-agent-exec` shell command.
    ///
    /// Every variable part is shell-quoted; the prompt and image list are
    /// user-controlled and must survive the sandbox shell untouched.
    ///
    /// # Errors
    /// Fails only if an argument contains a NUL byte.
    pub fn to_command(&self) -> Result<String, QuoteError> {
        let mut command = String::from("sandbox-agent-exec");
        push_arg(&mut command, &self.prompt)?;

        if let Some(workdir) = &self.workdir {
            push_flag(&mut command, "--workdir", workdir)?;
        }
        if let Some(model) = &self.model {
            push_flag(&mut command, "--model", model)?;
        }
        if let Some(session) = &self.resume_session_id {
            push_flag(&mut command, "--resume", session)?;
        }
        if let Some(path) = &self.system_prompt_file {
            push_flag(&mut command, "--system-prompt-file", path)?;
        }
        if !self.image_urls.is_empty() {
            // Infallible: a Vec<String> always serializes.
            let json = serde_json::to_string(&self.image_urls).unwrap_or_default();
            push_flag(&mut command, "--images", &json)?;
        }
        Ok(command)
    }
}

impl fmt::Display for ExecRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExecRequest({} chars)", self.prompt.len())
    }
}

fn push_arg(command: &mut String, value: &str) -> Result<(), QuoteError> {
    let quoted = shlex::try_quote(value).map_err(|_| QuoteError(value.to_owned()))?;
    command.push(' ');
    command.push_str(&quoted);
    Ok(())
}

fn push_flag(command: &mut String, flag: &str, value: &str) -> Result<(), QuoteError> {
    command.push(' ');
    command.push_str(flag);
    push_arg(command, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_request_quotes_the_prompt() {
        let command = ExecRequest::new("build a todo app").to_command().unwrap();
        assert_eq!(command, "sandbox-agent-exec 'build a todo app'");
    }

    #[test]
    fn hostile_prompt_survives_quoting() {
        let command = ExecRequest::new("rm -rf $(hostname); echo \"done\"")
            .to_command()
            .unwrap();
        let parts = shlex::split(&command).unwrap();
        assert_eq!(parts[0], "sandbox-agent-exec");
        assert_eq!(parts[1], "rm -rf $(hostname); echo \"done\"");
    }

    #[test]
    fn all_flags_round_trip_through_shell_splitting() {
        let mut request = ExecRequest::new("continue");
        request.resume_session_id = Some("sess-42".into());
        request.model = Some("opus".into());
        request.workdir = Some("/home/user/app".into());
        request.image_urls = vec!["https://example.com/a.png".into()];

        let parts = shlex::split(&request.to_command().unwrap()).unwrap();
        assert!(parts.contains(&"--resume".to_owned()));
        assert!(parts.contains(&"sess-42".to_owned()));
        let images_at = parts.iter().position(|p| p == "--images").unwrap();
        let urls: Vec<String> = serde_json::from_str(&parts[images_at + 1]).unwrap();
        assert_eq!(urls, vec!["https://example.com/a.png".to_owned()]);
    }

    #[test]
    fn nul_byte_is_rejected() {
        assert!(ExecRequest::new("a\0b").to_command().is_err());
    }
}
