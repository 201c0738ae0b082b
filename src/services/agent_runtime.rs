//! Agent runtime.
//!
//! Each agent is an independent state machine driven by bus events and its
//! own cursor: `idle → evaluating → building_context → executing` and back,
//! with `stopped` and `error` as the off-ramps. One tokio task per agent
//! serializes its transitions, so two provider invocations for the same
//! agent can never overlap. Child processes run in their own process group
//! and are signaled as a group on timeout, kill, and cancellation.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::models::agent::{lookup_path, AgentAction, AgentSpec, AgentState, TriggerSpec};
use crate::domain::models::cluster::AgentSnapshot;
use crate::domain::models::message::{topics, BusMessage, MessageQuery};
use crate::domain::models::provider::{
    InvocationSpec, ModelLevel, OutputFormat, ProviderEvent, RunOutcome, TokenUsage,
};
use crate::domain::ports::errors::OrchestratorError;
use crate::domain::ports::provider::{DirectApiClient, DirectApiRequest, Provider};

use super::message_bus::MessageBus;

/// Cluster-wide lifecycle signal carried on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal operation.
    Run,
    /// Graceful stop: no new triggers fire; in-flight runs may finish.
    Drain,
    /// Forceful stop: in-flight child process groups are signaled.
    Kill,
}

/// Shared wiring an agent needs from its cluster.
#[derive(Clone)]
pub struct AgentContext {
    pub cluster_id: String,
    pub bus: Arc<MessageBus>,
    pub provider: Arc<dyn Provider>,
    pub direct_api: Option<Arc<dyn DirectApiClient>>,
    /// Isolation working directory; `None` runs in the caller's cwd.
    pub work_dir: Option<PathBuf>,
    /// Level used when the agent spec does not pick one.
    pub default_level: ModelLevel,
    pub shutdown: watch::Receiver<ShutdownSignal>,
}

/// One agent's runtime state and drive loop.
pub struct AgentRuntime {
    spec: AgentSpec,
    ctx: AgentContext,
    state: StdMutex<AgentState>,
    /// Highest bus sequence this agent has considered.
    cursor: AtomicU64,
    /// Completed provider runs.
    iterations: AtomicU32,
    retries_used: AtomicU32,
    child_pid: StdMutex<Option<u32>>,
    last_error: StdMutex<Option<String>>,
    notify: Notify,
}

impl AgentRuntime {
    pub fn new(spec: AgentSpec, ctx: AgentContext) -> Arc<Self> {
        Arc::new(Self {
            spec,
            ctx,
            state: StdMutex::new(AgentState::Idle),
            cursor: AtomicU64::new(0),
            iterations: AtomicU32::new(0),
            retries_used: AtomicU32::new(0),
            child_pid: StdMutex::new(None),
            last_error: StdMutex::new(None),
            notify: Notify::new(),
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    /// Wake the agent's drive loop on every bus message.
    ///
    /// The subscription holds a weak reference; a dropped agent stops
    /// reacting without needing explicit unsubscription.
    pub fn attach(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.ctx.bus.subscribe(
            None,
            Arc::new(move |_message| {
                if let Some(agent) = weak.upgrade() {
                    agent.notify.notify_one();
                }
            }),
        );
    }

    /// Current read-model snapshot.
    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.spec.id.clone(),
            state: *self.state.lock().expect("state lock poisoned"),
            cursor: self.cursor.load(Ordering::SeqCst),
            iterations: self.iterations.load(Ordering::SeqCst),
            child_pid: *self.child_pid.lock().expect("pid lock poisoned"),
            last_error: self.last_error.lock().expect("error lock poisoned").clone(),
        }
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().expect("state lock poisoned")
    }

    fn set_state(&self, next: AgentState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        debug!(
            agent_id = %self.spec.id,
            from = state.as_str(),
            to = next.as_str(),
            "Agent state transition"
        );
        *state = next;
    }

    /// Spawn the drive loop. Returns its join handle.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.drive().await;
        })
    }

    #[instrument(skip(self), fields(agent_id = %self.spec.id, cluster_id = %self.ctx.cluster_id))]
    async fn drive(self: Arc<Self>) {
        let mut shutdown = self.ctx.shutdown.clone();

        loop {
            if *shutdown.borrow() != ShutdownSignal::Run {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                () = self.notify.notified() => {
                    self.evaluation_pass(&mut shutdown).await;
                }
            }
        }

        self.set_state(AgentState::Stopped);
        info!(agent_id = %self.spec.id, "Agent stopped");
    }

    /// Walk events above the cursor, firing at most one trigger per event.
    ///
    /// The cursor advances over every evaluated event whether or not a
    /// trigger fired, so no event is ever considered twice.
    async fn evaluation_pass(&self, shutdown: &mut watch::Receiver<ShutdownSignal>) {
        if matches!(self.state(), AgentState::Error | AgentState::Stopped) {
            return;
        }

        self.set_state(AgentState::Evaluating);

        loop {
            let cursor = self.cursor.load(Ordering::SeqCst);
            let events = self.ctx.bus.query(&MessageQuery::since(cursor));
            if events.is_empty() {
                break;
            }

            for event in events {
                if *shutdown.borrow() != ShutdownSignal::Run {
                    self.set_state(AgentState::Idle);
                    return;
                }

                self.cursor.store(event.sequence, Ordering::SeqCst);

                let fired: Option<&TriggerSpec> = self
                    .spec
                    .triggers
                    .iter()
                    .find(|t| t.matches(&event.topic, &event.payload));

                if let Some(trigger) = fired {
                    debug!(
                        agent_id = %self.spec.id,
                        sequence = event.sequence,
                        topic = %event.topic,
                        "Trigger fired"
                    );
                    let action = trigger.action.clone();
                    self.run_action(&action, &event, shutdown).await;

                    if matches!(self.state(), AgentState::Error | AgentState::Stopped) {
                        return;
                    }
                    self.set_state(AgentState::Evaluating);
                }
            }
        }

        self.set_state(AgentState::Idle);
    }

    async fn run_action(
        &self,
        action: &AgentAction,
        event: &BusMessage,
        shutdown: &mut watch::Receiver<ShutdownSignal>,
    ) {
        match action {
            AgentAction::Noop => {}
            AgentAction::PublishMessage { topic, payload } => {
                self.ctx
                    .bus
                    .publish(topic.clone(), self.spec.id.clone(), payload.clone());
            }
            AgentAction::StopCluster => {
                self.ctx.bus.publish(
                    topics::CLUSTER_STOP,
                    self.spec.id.clone(),
                    json!({ "requested_by": self.spec.id }),
                );
            }
            AgentAction::ExecuteTask => self.execute_task(event, shutdown).await,
        }
    }

    /// The `execute_task` action: context assembly, provider run, hooks.
    async fn execute_task(
        &self,
        event: &BusMessage,
        shutdown: &mut watch::Receiver<ShutdownSignal>,
    ) {
        self.set_state(AgentState::BuildingContext);
        let context = build_context(&self.spec, event, &self.ctx.cluster_id);

        self.set_state(AgentState::Executing);
        let level = self.spec.model_level.unwrap_or(self.ctx.default_level);

        let direct_api = if self.spec.wants_direct_api() {
            self.ctx.direct_api.clone()
        } else {
            None
        };
        let result = match direct_api {
            Some(client) => self.run_direct(&client, context, level).await,
            None => self.run_cli(context, level, shutdown).await,
        };

        match result {
            Ok(outcome) => {
                self.iterations.fetch_add(1, Ordering::SeqCst);
                debug!(
                    agent_id = %self.spec.id,
                    tool_calls = outcome.tool_calls,
                    output_tokens = outcome.usage.output_tokens,
                    "Provider run completed"
                );
                let hook = self.spec.hooks.on_complete.clone();
                self.run_hook(hook.as_ref(), event, &run_result_payload(&outcome, None))
                    .await;
                self.set_state(AgentState::Idle);
            }
            Err(OrchestratorError::Cancelled) => {
                // No result event, no on_error hook.
                self.set_state(AgentState::Stopped);
            }
            Err(err) => {
                self.iterations.fetch_add(1, Ordering::SeqCst);
                let message = err.to_string();
                warn!(agent_id = %self.spec.id, error = %message, "Provider run failed");
                *self.last_error.lock().expect("error lock poisoned") = Some(message.clone());

                let hook = self.spec.hooks.on_error.clone();
                self.run_hook(
                    hook.as_ref(),
                    event,
                    &run_result_payload(&RunOutcome::default(), Some(&message)),
                )
                .await;

                let retries = self.retries_used.load(Ordering::SeqCst);
                if err.is_retryable() && retries < self.spec.max_retries {
                    self.retries_used.fetch_add(1, Ordering::SeqCst);
                    info!(
                        agent_id = %self.spec.id,
                        retry = retries + 1,
                        max_retries = self.spec.max_retries,
                        "Retry policy re-admits agent to idle"
                    );
                    self.set_state(AgentState::Idle);
                } else {
                    self.set_state(AgentState::Error);
                }
            }
        }
    }

    /// Run a hook action in the same transition as the result it reacts to.
    async fn run_hook(&self, hook: Option<&AgentAction>, event: &BusMessage, result: &Value) {
        let Some(action) = hook else { return };

        match action {
            AgentAction::PublishMessage { topic, payload } => {
                let payload = augment_hook_payload(payload, &self.spec.id, &event.topic, result);
                self.ctx
                    .bus
                    .publish(topic.clone(), self.spec.id.clone(), payload);
            }
            AgentAction::StopCluster => {
                self.ctx.bus.publish(
                    topics::CLUSTER_STOP,
                    self.spec.id.clone(),
                    json!({ "requested_by": self.spec.id }),
                );
            }
            AgentAction::Noop => {}
            AgentAction::ExecuteTask => {
                // A hook that spawns another run would recurse; refuse.
                warn!(
                    agent_id = %self.spec.id,
                    "execute_task is not a valid hook action, ignoring"
                );
            }
        }
    }

    /// Direct-API fast path.
    async fn run_direct(
        &self,
        client: &Arc<dyn DirectApiClient>,
        context: String,
        level: ModelLevel,
    ) -> Result<RunOutcome, OrchestratorError> {
        let response = client
            .complete(DirectApiRequest {
                context,
                level,
                schema: self.spec.json_schema.clone(),
            })
            .await?;

        let text = match response.structured {
            Some(ref value) => value.to_string(),
            None => response.text,
        };
        Ok(RunOutcome {
            text,
            usage: response.usage,
            tool_calls: 0,
        })
    }

    /// Spawn and supervise the provider CLI subprocess.
    async fn run_cli(
        &self,
        context: String,
        level: ModelLevel,
        shutdown: &mut watch::Receiver<ShutdownSignal>,
    ) -> Result<RunOutcome, OrchestratorError> {
        let invocation = self.ctx.provider.build_invocation(&InvocationSpec {
            context,
            level,
            output_format: OutputFormat::StreamJson,
            schema: self.spec.json_schema.clone(),
            cwd: self.ctx.work_dir.clone(),
            auto_approve: true,
        })?;

        let mut cmd = Command::new(&invocation.binary);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(ref work_dir) = self.ctx.work_dir {
            cmd.current_dir(work_dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            OrchestratorError::ProviderUnavailable(format!(
                "spawning {}: {e}",
                invocation.binary
            ))
        })?;

        let pid = child.id();
        *self.child_pid.lock().expect("pid lock poisoned") = pid;

        if let Some(payload) = invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload.as_bytes()).await.map_err(|e| {
                    OrchestratorError::TransientProviderFailure(format!("writing stdin: {e}"))
                })?;
            }
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            OrchestratorError::TransientProviderFailure("missing stdout handle".to_string())
        })?;

        let mut parser = self.ctx.provider.event_parser();
        let work = async {
            let mut outcome = RunOutcome::default();
            let mut result_event: Option<ProviderEvent> = None;

            let mut reader = BufReader::new(stdout).lines();
            while let Some(line) = reader.next_line().await.map_err(|e| {
                OrchestratorError::TransientProviderFailure(format!("reading stdout: {e}"))
            })? {
                for event in parser.parse_line(&line) {
                    match event {
                        ProviderEvent::Text { text } => outcome.text.push_str(&text),
                        ProviderEvent::Thinking { .. } => {}
                        ProviderEvent::ToolCall { .. } => outcome.tool_calls += 1,
                        ProviderEvent::ToolResult { .. } => {}
                        result @ ProviderEvent::Result { .. } => result_event = Some(result),
                    }
                }
            }

            let status = child.wait().await.map_err(|e| {
                OrchestratorError::TransientProviderFailure(format!("waiting for child: {e}"))
            })?;

            match result_event {
                Some(ProviderEvent::Result {
                    success,
                    input_tokens,
                    output_tokens,
                    error,
                }) => {
                    outcome.usage = TokenUsage {
                        input_tokens: input_tokens.unwrap_or(0),
                        output_tokens: output_tokens.unwrap_or(0),
                    };
                    if !success {
                        return Err(OrchestratorError::TransientProviderFailure(
                            error.unwrap_or_else(|| "provider reported failure".to_string()),
                        ));
                    }
                }
                _ if !status.success() => {
                    return Err(OrchestratorError::TransientProviderFailure(format!(
                        "provider exited with {status}"
                    )));
                }
                _ => {}
            }

            Ok(outcome)
        };
        tokio::pin!(work);

        let timeout = async {
            if self.spec.timeout_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.spec.timeout_ms)).await;
            } else {
                std::future::pending::<()>().await;
            }
        };
        tokio::pin!(timeout);

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                () = &mut timeout => {
                    warn!(
                        agent_id = %self.spec.id,
                        timeout_ms = self.spec.timeout_ms,
                        "Provider run timed out, signaling process group"
                    );
                    signal_group(pid, Signal::SIGKILL);
                    break Err(OrchestratorError::AgentTimeout(self.spec.timeout_ms));
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() == ShutdownSignal::Kill {
                        signal_group(pid, Signal::SIGKILL);
                        break Err(OrchestratorError::Cancelled);
                    }
                    // Drain lets the in-flight run finish.
                }
            }
        };

        *self.child_pid.lock().expect("pid lock poisoned") = None;
        result
    }
}

/// Signal an entire process group.
fn signal_group(pid: Option<u32>, signal: Signal) {
    if let Some(pid) = pid {
        if let Ok(raw) = i32::try_from(pid) {
            let _ = killpg(Pid::from_raw(raw), signal);
        }
    }
}

/// Substitute the triggering event into the agent's prompt template.
///
/// Recognized placeholders: `{{payload}}`, `{{payload.<path>}}`,
/// `{{topic}}`, `{{agent}}`, `{{cluster}}`. Unknown placeholders pass
/// through untouched. An empty template falls back to the raw payload.
pub fn build_context(spec: &AgentSpec, event: &BusMessage, cluster_id: &str) -> String {
    let mut body = if spec.prompt.is_empty() {
        serde_json::to_string_pretty(&event.payload).unwrap_or_default()
    } else {
        substitute_placeholders(&spec.prompt, event, &spec.id, cluster_id)
    };

    if let Some(ref preamble) = spec.system_preamble {
        body = format!("{preamble}\n\n{body}");
    }

    if let Some(ref schema) = spec.json_schema {
        body.push_str("\n\nRespond with a single JSON object matching this schema:\n");
        body.push_str(&schema.to_string());
    }

    body
}

fn substitute_placeholders(
    template: &str,
    event: &BusMessage,
    agent_id: &str,
    cluster_id: &str,
) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            output.push_str(&rest[start..]);
            return output;
        };
        let token = after[..end].trim();

        let replacement = match token {
            "payload" => Some(
                serde_json::to_string_pretty(&event.payload).unwrap_or_default(),
            ),
            "topic" => Some(event.topic.clone()),
            "agent" => Some(agent_id.to_string()),
            "cluster" => Some(cluster_id.to_string()),
            _ => token.strip_prefix("payload.").and_then(|path| {
                lookup_path(&event.payload, path).map(|value| match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                })
            }),
        };

        match replacement {
            Some(text) => output.push_str(&text),
            // Unknown token: emit verbatim.
            None => {
                output.push_str("{{");
                output.push_str(&after[..end]);
                output.push_str("}}");
            }
        }
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    output
}

/// The run result object merged into hook payloads.
fn run_result_payload(outcome: &RunOutcome, error: Option<&str>) -> Value {
    match error {
        Some(message) => json!({ "success": false, "error": message }),
        None => json!({
            "success": true,
            "text": outcome.text,
            "tool_calls": outcome.tool_calls,
            "input_tokens": outcome.usage.input_tokens,
            "output_tokens": outcome.usage.output_tokens,
        }),
    }
}

/// Merge the reserved hook fields into a configured payload object.
fn augment_hook_payload(base: &Value, agent_id: &str, source_topic: &str, result: &Value) -> Value {
    let mut object = match base {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => return other.clone(),
    };
    object.insert("agent".to_string(), json!(agent_id));
    object.insert("source_topic".to_string(), json!(source_topic));
    object.insert("result".to_string(), result.clone());
    Value::Object(object)
}
