//! Agent query loop.
//!
//! Spawns the agent CLI, transforms each stream-json message into slim
//! records on stdout, keeps the transport alive with a heartbeat, and ends
//! with the completion sentinel plus a final JSON summary.

use std::{process::Stdio, time::Duration};

use sandbox_agents_core::{
    AgentMessage, ExecutionSummary, SlimMessage,
    slim::{COMPLETION_SENTINEL, slim_transform},
};
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    task::JoinHandle,
};

use crate::command::{AgentInvocation, CommandBuildError};

/// Interval between heartbeat lines. Short enough that no transport or
/// proxy on the path ever sees an idle stream.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    CommandBuild(#[from] CommandBuildError),
    #[error("failed to spawn agent: {0}")]
    Spawn(std::io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("agent exited with code {0}")]
    AgentFailed(i32),
}

/// Heartbeat task that is guaranteed to stop when the run ends, on every
/// exit path.
struct HeartbeatGuard(JoinHandle<()>);

impl HeartbeatGuard {
    fn start() -> Self {
        Self(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            // The immediate first tick would be pure noise.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                println!("{}", SlimMessage::Heartbeat.to_wire_line());
            }
        }))
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run one agent invocation to completion.
///
/// On success the sentinel and a success summary have been written to
/// stdout. On error the caller is expected to emit the failure summary
/// (the binary does) so the summary reflects errors from outside this
/// function too.
///
/// # Errors
/// Returns error if the agent cannot be built/spawned, its stdout cannot
/// be read, or it exits non-zero.
pub async fn run_agent(invocation: AgentInvocation) -> Result<ExecutionSummary, ExecutorError> {
    let parts = invocation.build().await?;
    tracing::info!(program = %parts.program.display(), "starting agent");

    let mut child = Command::new(&parts.program)
        .args(&parts.args)
        .current_dir(&invocation.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(ExecutorError::Spawn)?;

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let _heartbeat = HeartbeatGuard::start();

    // Agent-runtime stderr is tagged at the source: the receiving side gets
    // structured agent-error records instead of having to pattern-match raw
    // text. That is the whole error side-channel.
    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            println!(
                "{}",
                SlimMessage::AgentError { message: line }.to_wire_line()
            );
        }
    });

    let mut emitted = 0usize;
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(message) = serde_json::from_str::<AgentMessage>(line) else {
            tracing::debug!(%line, "unparseable agent line, dropping");
            continue;
        };

        if let AgentMessage::Result(result) = &message {
            let cost = result.total_cost_usd.unwrap_or(0.0);
            let secs = result.duration_ms.unwrap_or(0) as f64 / 1000.0;
            println!("Cost: ${cost:.4}");
            println!("Duration: {secs:.1}s");
        }

        for slim in slim_transform(&message) {
            println!("{}", slim.to_wire_line());
            emitted += 1;
        }
    }

    let status = child.wait().await?;
    // The pipe reaches EOF when the child exits; draining to the end keeps
    // trailing agent-error records from being lost.
    let _ = stderr_task.await;

    if !status.success() {
        return Err(ExecutorError::AgentFailed(status.code().unwrap_or(-1)));
    }

    println!("{COMPLETION_SENTINEL}");
    let summary = ExecutionSummary::completed(emitted);
    println!("{}", serde_json::to_string(&summary).expect("summary serializes"));
    Ok(summary)
}
