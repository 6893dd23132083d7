//! `sandbox-agent-exec` - runs inside the sandbox and drives one agent task.

use std::path::PathBuf;

use clap::Parser;
use sandbox_agents_core::ExecutionSummary;
use sandbox_agents_executor::{
    AgentInvocation,
    attachments::{augment_prompt, resolve_attachments},
    run_agent,
};

/// Path the sandbox image writes project secrets to.
const ENV_FILE: &str = "/home/user/.env";

/// Where downloaded attachments land.
const ATTACHMENT_DIR: &str = "/home/user/attachments";

#[derive(Debug, Parser)]
#[command(name = "sandbox-agent-exec", about = "Drive one agent task inside the sandbox")]
struct Args {
    /// The task prompt.
    prompt: String,

    /// Working directory the agent operates in.
    #[arg(long, default_value = "/home/user/app")]
    workdir: PathBuf,

    /// File containing the system-prompt augmentation.
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// Session token to resume a prior conversation.
    #[arg(long)]
    resume: Option<String>,

    /// Model override.
    #[arg(long)]
    model: Option<String>,

    /// JSON-encoded list of image attachment URLs.
    #[arg(long)]
    images: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries the line protocol; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dotenvy::from_path(ENV_FILE) {
        tracing::debug!(error = %e, "no env file loaded");
    }

    let args = Args::parse();

    let image_urls: Vec<String> = args
        .images
        .as_deref()
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "unparseable --images value, ignoring");
            None
        })
        .unwrap_or_default();

    let files = resolve_attachments(&image_urls, ATTACHMENT_DIR.as_ref()).await;
    let prompt = augment_prompt(&args.prompt, &files);

    let mut invocation = AgentInvocation::new(prompt, args.workdir);
    invocation.model = args.model;
    invocation.resume_session_id = args.resume;
    invocation.system_prompt_file = args.system_prompt_file;

    match run_agent(invocation).await {
        Ok(_) => Ok(()),
        Err(e) => {
            // Failure summary on stdout so the orchestrator sees the reason
            // even when stderr is lossy.
            let summary = ExecutionSummary::failed(e.to_string());
            println!("{}", serde_json::to_string(&summary)?);
            tracing::error!(error = %e, "agent run failed");
            std::process::exit(1);
        }
    }
}
