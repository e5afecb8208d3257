//! Orchestrator: the top-level entry that turns a request into a workflow run.
//!
//! Responsibilities: resolve the workspace (created under the allowed root,
//! refused outside it), assign a task id, classify the request (unless the
//! caller overrides the domain), build a fresh per-task gate + tool registry
//! + workflow, run or stream it, and keep cumulative per-domain counters.
//! Process-wide state (LLM client, cache, endpoint health) is injected at
//! construction and shared across tasks; workflows never are.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::aggregate::AggregationStrategy;
use crate::error::WorkflowError;
use crate::llm::LlmClient;
use crate::router::IntentRouter;
use crate::safety::{resolve_path_under, SafetyGate, SafetyPolicy};
use crate::state::{Domain, WorkflowResult, WorkflowState};
use crate::stream::{EventSender, ProtocolEvent, EVENT_CHANNEL_CAPACITY};
use crate::tools::{register_default_tools, SandboxConfig, ToolRegistry};
use crate::workflow::{Workflow, WorkflowConfig};

/// Orchestrator-wide settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Every task workspace must resolve under this root.
    pub allowed_root: PathBuf,
    /// Workspace used when the caller does not name one.
    pub default_workspace: PathBuf,
    pub max_iterations: u32,
    pub recursion_limit: u32,
    pub sub_agents_enabled: bool,
    pub complexity_threshold: f64,
    pub max_parallel: usize,
    pub aggregation: AggregationStrategy,
    /// Offline mode refuses remote-tagged tools at registration.
    pub offline: bool,
    pub safety: SafetyPolicy,
    /// Sandbox container settings; `None` disables the sandbox tool.
    pub sandbox: Option<SandboxConfig>,
    /// Bound on reject-retry re-entries.
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let root = std::env::var("STRAND_WORKSPACE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("strand"));
        Self {
            allowed_root: root.clone(),
            default_workspace: root,
            max_iterations: 10,
            recursion_limit: 100,
            sub_agents_enabled: false,
            complexity_threshold: 0.7,
            max_parallel: 5,
            aggregation: AggregationStrategy::Concatenate,
            offline: false,
            safety: SafetyPolicy::default(),
            sandbox: None,
            max_retries: 3,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub task_id: Option<String>,
    pub workspace: Option<PathBuf>,
    pub max_iterations: Option<u32>,
    pub domain_override: Option<Domain>,
    /// Caller context made visible to the workflow under `context.extra`.
    pub context: HashMap<String, Value>,
}

/// Cumulative counters per domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainStats {
    pub runs: u64,
    pub successes: u64,
    pub failures: u64,
}

/// Top-level task orchestrator.
pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    config: OrchestratorConfig,
    domain_stats: DashMap<Domain, DomainStats>,
}

impl Orchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, config: OrchestratorConfig) -> Self {
        Self {
            llm,
            config,
            domain_stats: DashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot of the per-domain counters.
    pub fn domain_stats(&self) -> HashMap<Domain, DomainStats> {
        self.domain_stats
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Stable short task identifier.
    fn new_task_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("task-{}", &id[..8])
    }

    /// Resolves the workspace: the named directory (or the default) must
    /// canonicalize under the allowed root; missing directories are created.
    fn resolve_workspace(&self, requested: Option<&PathBuf>) -> Result<PathBuf, WorkflowError> {
        let candidate = requested.unwrap_or(&self.config.default_workspace);
        std::fs::create_dir_all(&self.config.allowed_root)
            .map_err(|e| WorkflowError::Internal(format!("cannot create allowed root: {e}")))?;
        let resolved = resolve_path_under(
            &self.config.allowed_root,
            &candidate.to_string_lossy(),
        )?;
        if !resolved.exists() {
            std::fs::create_dir_all(&resolved)
                .map_err(|e| WorkflowError::Internal(format!("cannot create workspace: {e}")))?;
        }
        Ok(resolved)
    }

    /// Runs one task to completion, emitting events through `events`.
    async fn run_task(
        &self,
        request: &str,
        options: &TaskOptions,
        events: EventSender,
    ) -> Result<WorkflowResult, WorkflowError> {
        let workspace = self.resolve_workspace(options.workspace.as_ref())?;
        let task_id = options
            .task_id
            .clone()
            .unwrap_or_else(Self::new_task_id);
        tracing::info!(%task_id, workspace = %workspace.display(), "task accepted");

        let classification = match options.domain_override {
            Some(domain) => {
                tracing::info!(%domain, "domain override; skipping classification");
                None
            }
            None => {
                let router = IntentRouter::new(Arc::clone(&self.llm));
                let c = router.classify(request).await;
                events
                    .emit(ProtocolEvent::Classification {
                        domain: c.domain.as_str().to_string(),
                        confidence: c.confidence,
                        reasoning: c.reasoning.clone(),
                    })
                    .await;
                Some(c)
            }
        };
        let domain = options
            .domain_override
            .or_else(|| classification.as_ref().map(|c| c.domain))
            .unwrap_or(Domain::General);

        let mut state = WorkflowState::new(
            task_id.clone(),
            request,
            workspace.clone(),
            domain,
            options.max_iterations.unwrap_or(self.config.max_iterations),
            self.config.recursion_limit,
        );
        state.context.classification = classification;
        state.context.extra = options.context.clone();

        // Fresh gate, registry, and workflow per task: isolation when
        // workspaces differ per request.
        let gate = Arc::new(SafetyGate::new(self.config.safety.clone(), workspace));
        let mut registry = ToolRegistry::new(self.config.offline);
        register_default_tools(&mut registry, gate, self.config.sandbox.clone());

        let workflow_config = WorkflowConfig {
            domain,
            max_iterations: state.max_iterations,
            recursion_limit: self.config.recursion_limit,
            sub_agents_enabled: self.config.sub_agents_enabled,
            complexity_threshold: self.config.complexity_threshold,
            max_parallel: self.config.max_parallel,
            aggregation: self.config.aggregation,
        };
        let workflow = Workflow::new(
            Arc::clone(&self.llm),
            Arc::new(registry),
            events.clone(),
            workflow_config,
        )
        .map_err(|e| WorkflowError::Internal(format!("graph compilation failed: {e}")))?;

        let started = Instant::now();
        let result = workflow.run(state).await;
        let duration = started.elapsed().as_secs_f64();

        events
            .emit(ProtocolEvent::TaskComplete {
                task_id,
                total_duration_seconds: duration,
            })
            .await;

        let mut stats = self.domain_stats.entry(domain).or_default();
        stats.runs += 1;
        if result.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
        }
        Ok(result)
    }

    /// Non-streaming entry point.
    pub async fn execute_task(
        &self,
        request: &str,
        options: TaskOptions,
    ) -> Result<WorkflowResult, WorkflowError> {
        self.run_task(request, &options, EventSender::null()).await
    }

    /// Streaming entry point: returns the event stream plus a handle to the
    /// final result. The stream yields exactly one terminal event; dropping
    /// the stream cancels the run at its next suspension point.
    pub fn stream_task(
        self: &Arc<Self>,
        request: impl Into<String>,
        options: TaskOptions,
    ) -> (ReceiverStream<ProtocolEvent>, JoinHandle<WorkflowResult>) {
        let (events, rx) = EventSender::channel(EVENT_CHANNEL_CAPACITY);
        let orchestrator = Arc::clone(self);
        let request = request.into();
        let handle = tokio::spawn(async move {
            match orchestrator.run_task(&request, &options, events.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    // Failures before the workflow ran still need a terminal event.
                    events
                        .emit(ProtocolEvent::WorkflowError {
                            error_type: e.kind().to_string(),
                            message: e.to_string(),
                        })
                        .await;
                    WorkflowResult {
                        success: false,
                        output: None,
                        error: Some(format!("{}: {e}", e.kind())),
                        iterations: 0,
                        metadata: Value::Null,
                    }
                }
            }
        });
        (ReceiverStream::new(rx), handle)
    }

    /// Re-enters the engine when an external approval layer rejects the
    /// output. `review` returns `Some(feedback)` to request a retry; each
    /// retry appends the feedback to the request and gets a fresh state and
    /// task id. Bounded by `max_retries`.
    pub async fn execute_with_retry<F>(
        &self,
        request: &str,
        options: TaskOptions,
        mut review: F,
    ) -> Result<WorkflowResult, WorkflowError>
    where
        F: FnMut(&WorkflowResult) -> Option<String>,
    {
        let mut current_request = request.to_string();
        let mut attempt = 0;
        loop {
            let mut attempt_options = options.clone();
            attempt_options.task_id = None; // fresh task id per attempt
            let result = self.execute_task(&current_request, attempt_options).await?;
            match review(&result) {
                None => return Ok(result),
                Some(feedback) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        tracing::warn!(attempt, "retry budget exhausted; returning last result");
                        return Ok(result);
                    }
                    tracing::info!(attempt, "re-entering workflow with reviewer feedback");
                    current_request = format!("{request}\n\nReviewer feedback: {feedback}");
                }
            }
        }
    }
}
