//! Strand: agentic task orchestration with state-in, state-out workflow
//! graphs.
//!
//! Given a natural-language request, strand classifies it into a domain,
//! plans it, and drives a bounded plan → execute → reflect loop over a set of
//! gated local tools, escalating complex tasks to a semaphore-bounded
//! sub-agent pool. Progress streams out as typed protocol events.
//!
//! # Layers
//!
//! - [`graph`]: the generic state graph engine (nodes, conditional edges,
//!   transition limit).
//! - [`workflow`]: the concrete plan/check_complexity/execute/reflect/spawn
//!   machine over [`state::WorkflowState`].
//! - [`tools`] + [`safety`]: the gated tool set every execution step goes
//!   through.
//! - [`llm`]: the failover client (endpoint health, retry, cache) and the
//!   provider adapters.
//! - [`router`], [`decompose`], [`subagent`], [`aggregate`]: classification,
//!   DAG decomposition, the bounded pool, and result merging.
//! - [`orchestrator`]: the top-level entry point.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strand::llm::FailoverClient;
//! use strand::orchestrator::{Orchestrator, OrchestratorConfig, TaskOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let llm = Arc::new(FailoverClient::from_env()?);
//! let orchestrator = Orchestrator::new(llm, OrchestratorConfig::default());
//! let result = orchestrator
//!     .execute_task("Create calculator.py with add and subtract", TaskOptions::default())
//!     .await?;
//! println!("success: {}", result.success);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod decompose;
pub mod error;
pub mod graph;
mod json_extract;
pub mod llm;
pub mod orchestrator;
pub mod router;
pub mod safety;
pub mod state;
pub mod stream;
pub mod subagent;
pub mod tools;
pub mod workflow;

pub use error::WorkflowError;
pub use json_extract::extract_json;
pub use orchestrator::{Orchestrator, OrchestratorConfig, TaskOptions};
pub use state::{Classification, Complexity, Domain, TaskStatus, WorkflowResult, WorkflowState};
