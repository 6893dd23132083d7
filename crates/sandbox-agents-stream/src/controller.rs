//! Safe-stream controller.
//!
//! A finite-state controller per invocation: RUNNING -> CLOSING -> CLOSED.
//! Four independent events race to enter CLOSING: the completion sentinel,
//! an execution error, an orchestration failure, and the staleness
//! watchdog. All four are serialized through one event channel and the
//! terminal transition itself is guarded by a compare-and-swap, so exactly
//! one terminal callback is delivered no matter how many signals arrive.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use sandbox_agents_core::{
    ExecutionSummary, OutputCallback, RunOptions, Sandbox, SlimMessage,
    command::{CommandError, CommandOutput},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::{
    errors::DeferredErrors,
    lines::{LineBuffer, LineClass, classify_line},
};

/// Stream failure taxonomy.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("agent runtime unavailable in sandbox: {0}")]
    Preflight(String),
    #[error(transparent)]
    Provider(#[from] sandbox_agents_core::ProviderError),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("no output for {}s without a completion signal", idle.as_secs())]
    Stalled { idle: Duration },
    #[error("executor produced no output and no error; it likely failed to start")]
    SilentFailure,
    #[error("agent exited with code {exit_code} before signalling completion")]
    AgentExit { exit_code: i32 },
}

/// What a successfully completed invocation produced.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// Agent session id, captured from the first init/result record.
    pub session_id: Option<String>,
    /// Number of slim records forwarded to the caller.
    pub messages: usize,
    /// The executor's final summary, when it arrived before the sentinel
    /// was acted on.
    pub summary: Option<ExecutionSummary>,
    /// Accumulated cost in USD, from the terminal result record.
    pub total_cost_usd: Option<f64>,
    /// Run duration in milliseconds, from the terminal result record.
    pub duration_ms: Option<u64>,
}

/// Caller-side callbacks for one invocation.
///
/// Contract: zero or more `on_message`/`on_raw_line` calls, then exactly
/// one of `on_complete` or `on_error`. `on_agent_errors` fires at most
/// once, and only after completion is confirmed.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn on_message(&self, message: SlimMessage);

    /// Unexpected but non-noise line, forwarded so nothing is lost.
    async fn on_raw_line(&self, line: String) {
        tracing::debug!(%line, "unclassified executor line");
    }

    /// First observation of the agent session id.
    async fn on_session_id(&self, session_id: String) {
        let _ = session_id;
    }

    /// Bundle of deferred agent-internal errors.
    async fn on_agent_errors(&self, bundle: String) {
        let _ = bundle;
    }

    async fn on_complete(&self, outcome: CompletionOutcome);

    async fn on_error(&self, error: StreamError);
}

/// Post-completion side effect, run detached from the terminal path.
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn after_complete(&self, outcome: CompletionOutcome) -> anyhow::Result<()>;
}

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Inactivity window after which a stream without a completion signal
    /// is declared stalled.
    pub stale_after: Duration,
    /// How often the watchdog checks for staleness.
    pub watchdog_tick: Duration,
    /// Foreground probe run before launching the executor; `None` skips
    /// the pre-flight check.
    pub preflight_command: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(90),
            watchdog_tick: Duration::from_secs(5),
            preflight_command: Some("command -v claude".to_owned()),
        }
    }
}

#[derive(Clone, Copy)]
enum StreamSource {
    Stdout,
    Stderr,
}

enum Event {
    Message(SlimMessage),
    RawLine(String),
    SessionId(String),
    Completion,
    Stale(Duration),
    Finished(Result<CommandOutput, CommandError>),
}

/// Orchestrator-local state for one invocation. Never shared across
/// invocations; destroyed when the terminal transition completes.
struct StreamState {
    started: Instant,
    stdout_buffer: Mutex<LineBuffer>,
    stderr_buffer: Mutex<LineBuffer>,
    last_activity_ms: AtomicU64,
    completion_detected: AtomicBool,
    /// The terminal mutex: first CAS winner performs the terminal actions.
    closed: AtomicBool,
    saw_output: AtomicBool,
    messages: AtomicUsize,
    session_id: Mutex<Option<String>>,
    deferred: Mutex<DeferredErrors>,
    summary: Mutex<Option<ExecutionSummary>>,
    totals: Mutex<(Option<f64>, Option<u64>)>,
}

impl StreamState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            stdout_buffer: Mutex::new(LineBuffer::new()),
            stderr_buffer: Mutex::new(LineBuffer::new()),
            last_activity_ms: AtomicU64::new(0),
            completion_detected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            saw_output: AtomicBool::new(false),
            messages: AtomicUsize::new(0),
            session_id: Mutex::new(None),
            deferred: Mutex::new(DeferredErrors::default()),
            summary: Mutex::new(None),
            totals: Mutex::new((None, None)),
        })
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(self.started.elapsed().as_millis() as u64, Ordering::SeqCst);
    }

    fn idle(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_activity_ms.load(Ordering::SeqCst)))
    }

    /// Attempt the RUNNING -> CLOSING transition. Only the first caller
    /// wins; everyone after gets `false` and must do nothing.
    fn close(&self) -> bool {
        self.closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Reassemble one raw chunk into lines and turn them into events.
    ///
    /// Session-id capture, deferred-error collection and summary capture
    /// happen here synchronously so they are already recorded when the
    /// event that follows them in the same chunk is handled.
    fn ingest(&self, source: StreamSource, chunk: &str) -> Vec<Event> {
        self.saw_output.store(true, Ordering::SeqCst);
        self.touch();

        let lines = {
            let buffer = match source {
                StreamSource::Stdout => &self.stdout_buffer,
                StreamSource::Stderr => &self.stderr_buffer,
            };
            buffer.lock().unwrap().push_chunk(chunk)
        };

        let mut events = Vec::new();
        for line in lines {
            match classify_line(&line) {
                LineClass::Completion => {
                    self.completion_detected.store(true, Ordering::SeqCst);
                    events.push(Event::Completion);
                }
                LineClass::Slim(SlimMessage::AgentError { message }) => {
                    self.deferred.lock().unwrap().record(message);
                }
                LineClass::Slim(slim) => {
                    if let Some(id) = slim.session_id() {
                        let mut captured = self.session_id.lock().unwrap();
                        if captured.is_none() {
                            *captured = Some(id.to_owned());
                            events.push(Event::SessionId(id.to_owned()));
                        }
                    }
                    if let SlimMessage::Result {
                        total_cost_usd,
                        duration_ms,
                        ..
                    } = &slim
                    {
                        *self.totals.lock().unwrap() = (*total_cost_usd, *duration_ms);
                    }
                    self.messages.fetch_add(1, Ordering::SeqCst);
                    events.push(Event::Message(slim));
                }
                LineClass::Summary(summary) => {
                    *self.summary.lock().unwrap() = Some(summary);
                }
                LineClass::Raw(raw) => {
                    if !self.deferred.lock().unwrap().observe_raw(&raw) {
                        events.push(Event::RawLine(raw));
                    }
                }
                LineClass::Drop => {}
            }
        }
        events
    }

    fn outcome(&self) -> CompletionOutcome {
        let (total_cost_usd, duration_ms) = *self.totals.lock().unwrap();
        CompletionOutcome {
            session_id: self.session_id.lock().unwrap().clone(),
            messages: self.messages.load(Ordering::SeqCst),
            summary: self.summary.lock().unwrap().clone(),
            total_cost_usd,
            duration_ms,
        }
    }
}

/// Drives one background executor run and delivers its stream safely.
pub struct StreamController {
    config: StreamConfig,
    handler: Arc<dyn StreamHandler>,
    hooks: Vec<Arc<dyn CompletionHook>>,
}

impl StreamController {
    /// Controller with default config and no hooks.
    #[must_use]
    pub fn new(handler: Arc<dyn StreamHandler>) -> Self {
        Self {
            config: StreamConfig::default(),
            handler,
            hooks: Vec::new(),
        }
    }

    /// Replace the config.
    #[must_use]
    pub fn with_config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a detached post-completion hook.
    #[must_use]
    pub fn add_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Run `command` as a background execution in `sandbox` and stream it
    /// until the terminal transition. All outcomes are reported through
    /// the handler; this method itself never fails.
    pub async fn run(&self, sandbox: &dyn Sandbox, command: &str) {
        let span = tracing::info_span!("agent_stream", sandbox_id = %sandbox.id());
        let state = StreamState::new();
        if let Err(error) = self.drive(sandbox, command, &state).instrument(span).await {
            // Orchestration failure: one of the four completion paths.
            self.finalize_error(&state, error).await;
        }
    }

    async fn drive(
        &self,
        sandbox: &dyn Sandbox,
        command: &str,
        state: &Arc<StreamState>,
    ) -> Result<(), StreamError> {
        self.preflight(sandbox).await?;

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let on_stdout: OutputCallback = {
            let state = Arc::clone(state);
            let tx = events_tx.clone();
            Arc::new(move |chunk: &str| {
                for event in state.ingest(StreamSource::Stdout, chunk) {
                    let _ = tx.send(event);
                }
            })
        };
        let on_stderr: OutputCallback = {
            let state = Arc::clone(state);
            let tx = events_tx.clone();
            Arc::new(move |chunk: &str| {
                for event in state.ingest(StreamSource::Stderr, chunk) {
                    let _ = tx.send(event);
                }
            })
        };

        let execution = sandbox
            .run(command, RunOptions::background(on_stdout).with_stderr(on_stderr))
            .await?;

        {
            let tx = events_tx.clone();
            tokio::spawn(async move {
                let result = execution.wait().await;
                let _ = tx.send(Event::Finished(result));
            });
        }

        let watchdog = {
            let state = Arc::clone(state);
            let tx = events_tx.clone();
            let stale_after = self.config.stale_after;
            let tick = self.config.watchdog_tick;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if state.closed.load(Ordering::SeqCst)
                        || state.completion_detected.load(Ordering::SeqCst)
                    {
                        return;
                    }
                    let idle = state.idle();
                    if idle >= stale_after {
                        let _ = tx.send(Event::Stale(idle));
                        return;
                    }
                }
            })
        };
        drop(events_tx);

        while let Some(event) = events_rx.recv().await {
            match event {
                Event::Message(message) => self.handler.on_message(message).await,
                Event::RawLine(line) => self.handler.on_raw_line(line).await,
                Event::SessionId(id) => self.handler.on_session_id(id).await,
                Event::Completion => {
                    self.finalize_success(state).await;
                    break;
                }
                Event::Stale(idle) => {
                    // A sentinel observed between the watchdog's check and
                    // this event wins; staleness only applies while
                    // completion has not been detected.
                    if !state.completion_detected.load(Ordering::SeqCst) {
                        self.finalize_error(state, StreamError::Stalled { idle }).await;
                        break;
                    }
                }
                Event::Finished(result) => {
                    self.handle_finished(state, result).await;
                    break;
                }
            }
        }

        watchdog.abort();
        Ok(())
    }

    async fn handle_finished(
        &self,
        state: &Arc<StreamState>,
        result: Result<CommandOutput, CommandError>,
    ) {
        match result {
            Err(e) => {
                self.finalize_error(state, StreamError::Execution(e.to_string()))
                    .await;
            }
            Ok(output) => {
                if state.completion_detected.load(Ordering::SeqCst) {
                    self.finalize_success(state).await;
                } else if output.success() && !state.saw_output.load(Ordering::SeqCst) {
                    self.finalize_error(state, StreamError::SilentFailure).await;
                } else if output.success() {
                    self.finalize_error(
                        state,
                        StreamError::Execution(
                            "agent exited cleanly without signalling completion".into(),
                        ),
                    )
                    .await;
                } else {
                    self.finalize_error(
                        state,
                        StreamError::AgentExit {
                            exit_code: output.exit_code,
                        },
                    )
                    .await;
                }
            }
        }
    }

    async fn preflight(&self, sandbox: &dyn Sandbox) -> Result<(), StreamError> {
        let Some(probe) = &self.config.preflight_command else {
            return Ok(());
        };
        let execution = sandbox.run(probe, RunOptions::default()).await?;
        let output = execution
            .wait()
            .await
            .map_err(|e| StreamError::Preflight(e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(StreamError::Preflight(format!(
                "probe {probe:?} exited with code {}",
                output.exit_code
            )))
        }
    }

    async fn finalize_success(&self, state: &Arc<StreamState>) {
        if !state.close() {
            return;
        }
        // Deferred errors surface only here: completion is confirmed.
        let bundle = state.deferred.lock().unwrap().take_bundle();
        if let Some(bundle) = bundle {
            self.handler.on_agent_errors(bundle).await;
        }
        let outcome = state.outcome();
        self.handler.on_complete(outcome.clone()).await;

        for hook in &self.hooks {
            let hook = Arc::clone(hook);
            let outcome = outcome.clone();
            tokio::spawn(async move {
                if let Err(e) = hook.after_complete(outcome).await {
                    tracing::warn!(error = %e, "completion hook failed");
                }
            });
        }
    }

    async fn finalize_error(&self, state: &Arc<StreamState>, error: StreamError) {
        if !state.close() {
            return;
        }
        self.handler.on_error(error).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_agents_core::{CommandExecution, ProviderError};
    use sandbox_agents_core::slim::{COMPLETION_SENTINEL, STREAM_PREFIX};
    use tokio::sync::oneshot;

    /// What terminal/side-channel calls the handler saw, in order.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn terminal_count(&self) -> usize {
            self.entries()
                .iter()
                .filter(|e| e.starts_with("complete") || e.starts_with("error"))
                .count()
        }
    }

    #[async_trait]
    impl StreamHandler for Recorder {
        async fn on_message(&self, message: SlimMessage) {
            self.log
                .lock()
                .unwrap()
                .push(format!("message:{}", serde_json::to_string(&message).unwrap()));
        }

        async fn on_raw_line(&self, line: String) {
            self.log.lock().unwrap().push(format!("raw:{line}"));
        }

        async fn on_session_id(&self, session_id: String) {
            self.log.lock().unwrap().push(format!("session:{session_id}"));
        }

        async fn on_agent_errors(&self, bundle: String) {
            self.log.lock().unwrap().push(format!("agent-errors:{bundle}"));
        }

        async fn on_complete(&self, outcome: CompletionOutcome) {
            self.log
                .lock()
                .unwrap()
                .push(format!("complete:messages={}", outcome.messages));
        }

        async fn on_error(&self, error: StreamError) {
            self.log.lock().unwrap().push(format!("error:{error}"));
        }
    }

    type Captured = (
        OutputCallback,
        oneshot::Sender<Result<CommandOutput, CommandError>>,
    );

    /// Sandbox whose background run hands the test its stdout callback and
    /// completion channel; foreground runs (the pre-flight probe) succeed.
    #[derive(Default)]
    struct MockSandbox {
        captured: Mutex<Option<Captured>>,
    }

    impl MockSandbox {
        async fn take_captured(&self) -> Captured {
            loop {
                if let Some(captured) = self.captured.lock().unwrap().take() {
                    return captured;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }
    }

    #[async_trait]
    impl Sandbox for MockSandbox {
        fn id(&self) -> &str {
            "mock"
        }

        async fn write_file(&self, _: &str, _: &[u8]) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn read_file(&self, _: &str) -> Result<Vec<u8>, ProviderError> {
            Ok(Vec::new())
        }

        async fn exists(&self, _: &str) -> Result<bool, ProviderError> {
            Ok(true)
        }

        async fn make_dir(&self, _: &str) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn run(
            &self,
            _command: &str,
            options: RunOptions,
        ) -> Result<CommandExecution, ProviderError> {
            if !options.background {
                return Ok(CommandExecution::foreground(CommandOutput {
                    exit_code: 0,
                    stdout: "/usr/bin/claude\n".into(),
                    stderr: String::new(),
                }));
            }
            let (done_tx, done_rx) = oneshot::channel();
            *self.captured.lock().unwrap() =
                Some((options.on_stdout.expect("stdout callback"), done_tx));
            Ok(CommandExecution::background(done_rx, None))
        }

        fn get_host(&self, port: u16) -> String {
            format!("{port}-mock.test")
        }

        async fn set_timeout(&self, _: Duration) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    fn fast_config() -> StreamConfig {
        StreamConfig {
            stale_after: Duration::from_millis(200),
            watchdog_tick: Duration::from_millis(10),
            preflight_command: Some("command -v claude".to_owned()),
        }
    }

    fn wire(json: &str) -> String {
        format!("{STREAM_PREFIX}{json}\n")
    }

    #[tokio::test]
    async fn sentinel_completes_and_later_signals_are_noops() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            let command = "sandbox-agent-exec 'build'".to_owned();
            tokio::spawn(async move { controller.run(&*sandbox, &command).await })
        };

        let (on_stdout, done_tx) = sandbox.take_captured().await;
        on_stdout(&wire(r#"{"type":"assistant-text","text":"working"}"#));
        on_stdout(&format!("{COMPLETION_SENTINEL}\n"));
        // Execution error arriving after the sentinel must be a no-op.
        let _ = done_tx.send(Err(CommandError::Remote("late failure".into())));

        run.await.unwrap();
        // Give the stale watchdog a chance to fire into the void too.
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(handler.terminal_count(), 1);
        let entries = handler.entries();
        assert!(entries.last().unwrap().starts_with("complete:messages=1"));
    }

    #[tokio::test]
    async fn deferred_errors_flush_once_after_completion() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (on_stdout, _done_tx) = sandbox.take_captured().await;
        on_stdout(&wire(r#"{"type":"agent-error","message":"one"}"#));
        on_stdout(&wire(r#"{"type":"agent-error","message":"two"}"#));
        on_stdout(&wire(r#"{"type":"agent-error","message":"three"}"#));
        on_stdout(&wire(r#"{"type":"assistant-text","text":"still going"}"#));
        on_stdout(&format!("{COMPLETION_SENTINEL}\n"));
        run.await.unwrap();

        let entries = handler.entries();
        // No error callback at all, one bundled notification, then complete.
        assert_eq!(handler.terminal_count(), 1);
        let bundle_at = entries
            .iter()
            .position(|e| e == "agent-errors:one\ntwo\nthree")
            .expect("bundle delivered");
        let complete_at = entries
            .iter()
            .position(|e| e.starts_with("complete"))
            .unwrap();
        let message_at = entries
            .iter()
            .position(|e| e.starts_with("message"))
            .unwrap();
        assert!(message_at < bundle_at, "no error surfaced before completion");
        assert!(bundle_at < complete_at);
    }

    #[tokio::test]
    async fn silent_failure_is_fatal_not_empty_success() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (_on_stdout, done_tx) = sandbox.take_captured().await;
        done_tx
            .send(Ok(CommandOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            }))
            .unwrap();
        run.await.unwrap();

        let entries = handler.entries();
        assert_eq!(handler.terminal_count(), 1);
        assert!(entries[0].starts_with("error:executor produced no output"));
    }

    #[tokio::test]
    async fn nonzero_exit_without_sentinel_is_failure() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (on_stdout, done_tx) = sandbox.take_captured().await;
        on_stdout(&wire(r#"{"type":"assistant-text","text":"partial"}"#));
        done_tx
            .send(Ok(CommandOutput {
                exit_code: 3,
                stdout: String::new(),
                stderr: String::new(),
            }))
            .unwrap();
        run.await.unwrap();

        assert_eq!(handler.terminal_count(), 1);
        assert!(
            handler
                .entries()
                .iter()
                .any(|e| e.starts_with("error:agent exited with code 3"))
        );
    }

    #[tokio::test]
    async fn staleness_times_out_an_idle_stream() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        // Capture but never feed output or a result.
        let (_on_stdout, _done_tx) = sandbox.take_captured().await;
        run.await.unwrap();

        assert_eq!(handler.terminal_count(), 1);
        assert!(handler.entries()[0].starts_with("error:no output for"));
    }

    #[tokio::test]
    async fn session_id_is_captured_once() {
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller =
            StreamController::new(Arc::clone(&handler) as _).with_config(fast_config());

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (on_stdout, _done_tx) = sandbox.take_captured().await;
        on_stdout(&wire(r#"{"type":"system-init","session_id":"s-1"}"#));
        on_stdout(&wire(
            r#"{"type":"result","subtype":"success","is_error":false,"session_id":"s-1"}"#,
        ));
        on_stdout(&format!("{COMPLETION_SENTINEL}\n"));
        run.await.unwrap();

        let sessions: Vec<_> = handler
            .entries()
            .into_iter()
            .filter(|e| e.starts_with("session:"))
            .collect();
        assert_eq!(sessions, vec!["session:s-1".to_owned()]);
    }

    #[tokio::test]
    async fn result_totals_reach_the_outcome() {
        struct CaptureHook {
            seen: Arc<Mutex<Option<CompletionOutcome>>>,
        }

        #[async_trait]
        impl CompletionHook for CaptureHook {
            async fn after_complete(&self, outcome: CompletionOutcome) -> anyhow::Result<()> {
                *self.seen.lock().unwrap() = Some(outcome);
                Ok(())
            }
        }

        let seen = Arc::new(Mutex::new(None));
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller = StreamController::new(Arc::clone(&handler) as _)
            .with_config(fast_config())
            .add_hook(Arc::new(CaptureHook {
                seen: Arc::clone(&seen),
            }));

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (on_stdout, _done_tx) = sandbox.take_captured().await;
        on_stdout(&wire(
            r#"{"type":"result","subtype":"success","is_error":false,"duration_ms":9000,"total_cost_usd":0.42,"session_id":"s-3"}"#,
        ));
        on_stdout(&format!("{COMPLETION_SENTINEL}\n"));
        run.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = seen.lock().unwrap().clone().expect("hook fired");
        assert_eq!(outcome.session_id.as_deref(), Some("s-3"));
        assert_eq!(outcome.total_cost_usd, Some(0.42));
        assert_eq!(outcome.duration_ms, Some(9000));
    }

    #[tokio::test]
    async fn completion_hook_runs_detached_and_failures_stay_contained() {
        struct FailingHook {
            fired: Arc<AtomicBool>,
        }

        #[async_trait]
        impl CompletionHook for FailingHook {
            async fn after_complete(&self, _: CompletionOutcome) -> anyhow::Result<()> {
                self.fired.store(true, Ordering::SeqCst);
                anyhow::bail!("webhook down")
            }
        }

        let fired = Arc::new(AtomicBool::new(false));
        let sandbox = Arc::new(MockSandbox::default());
        let handler = Arc::new(Recorder::default());
        let controller = StreamController::new(Arc::clone(&handler) as _)
            .with_config(fast_config())
            .add_hook(Arc::new(FailingHook {
                fired: Arc::clone(&fired),
            }));

        let run = {
            let sandbox = Arc::clone(&sandbox);
            tokio::spawn(async move { controller.run(&*sandbox, "exec").await })
        };

        let (on_stdout, _done_tx) = sandbox.take_captured().await;
        on_stdout(&format!("{COMPLETION_SENTINEL}\n"));
        run.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(fired.load(Ordering::SeqCst));
        // The hook's failure never re-opened or failed the invocation.
        assert_eq!(handler.terminal_count(), 1);
        assert!(
            handler
                .entries()
                .iter()
                .any(|e| e.starts_with("complete"))
        );
    }
}
