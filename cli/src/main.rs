//! Strand CLI binary.
//!
//! Subcommands: `run <task>` (one-shot), `chat` (interactive loop), `status`,
//! `history [--search X] [--limit N]`, `clear --confirm`, `config`.
//! Exit codes: 0 success, 1 runtime failure, 2 invalid usage, 3 policy
//! violation.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use cli::{exit_code, print_event_human, print_event_json, print_result, HistoryStore};
use strand::llm::FailoverClient;
use strand::orchestrator::{Orchestrator, OrchestratorConfig, TaskOptions};
use strand::tools::SandboxConfig;
use strand::{Domain, WorkflowError, WorkflowResult};

#[derive(Parser, Debug)]
#[command(name = "strand")]
#[command(about = "Strand — agentic task orchestrator")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Workspace directory for tool I/O (created under the allowed root)
    #[arg(short, long, value_name = "DIR", global = true)]
    workspace: Option<PathBuf>,

    /// Output events and results as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single task to completion
    Run {
        /// The task description
        task: Vec<String>,

        /// Force a domain instead of classifying
        #[arg(long, value_name = "DOMAIN")]
        domain: Option<String>,

        /// Maximum execute iterations
        #[arg(long, value_name = "N")]
        max_iterations: Option<u32>,

        /// Enable sub-agent decomposition for complex tasks
        #[arg(long)]
        sub_agents: bool,
    },
    /// Interactive loop: read tasks from stdin until EOF
    Chat,
    /// Show configuration and history summary
    Status,
    /// List past runs
    History {
        /// Substring filter over the task text
        #[arg(long, value_name = "TEXT")]
        search: Option<String>,

        /// Maximum entries to show
        #[arg(long, value_name = "N", default_value_t = 20)]
        limit: usize,
    },
    /// Delete all history entries
    Clear {
        /// Required confirmation flag
        #[arg(long)]
        confirm: bool,
    },
    /// Print the resolved configuration
    Config,
}

fn new_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("task-{}", &id[..8])
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_orchestrator(
    workspace: Option<&PathBuf>,
    sub_agents: bool,
) -> Result<Arc<Orchestrator>, WorkflowError> {
    let mut config = OrchestratorConfig {
        sub_agents_enabled: sub_agents,
        sandbox: std::env::var("SANDBOX_IMAGE")
            .ok()
            .map(|_| SandboxConfig::from_env()),
        ..OrchestratorConfig::default()
    };
    if let Some(ws) = workspace {
        config.allowed_root = ws.clone();
        config.default_workspace = ws.clone();
    }

    // Response cache persists under <workspace>/.cache/llm/.
    let cache = Arc::new(
        strand::llm::ResponseCache::default().with_persistence(Arc::new(
            strand::llm::FsKvStore::new(config.allowed_root.join(".cache/llm")),
        )),
    );
    let llm = FailoverClient::from_env()
        .map_err(WorkflowError::from)?
        .with_cache(cache);
    // Keep endpoint health fresh for the lifetime of the process.
    let _probe = llm.start_health_probe(Duration::from_secs(30));
    Ok(Arc::new(Orchestrator::new(Arc::new(llm), config)))
}

fn exit_for(result: &Result<WorkflowResult, WorkflowError>) -> ExitCode {
    match result {
        Ok(r) if r.success => ExitCode::from(exit_code::SUCCESS as u8),
        Ok(_) => ExitCode::from(exit_code::RUNTIME_FAILURE as u8),
        Err(WorkflowError::PolicyViolation(_)) => {
            ExitCode::from(exit_code::POLICY_VIOLATION as u8)
        }
        Err(_) => ExitCode::from(exit_code::RUNTIME_FAILURE as u8),
    }
}

async fn run_one(
    orchestrator: &Arc<Orchestrator>,
    history: Option<&HistoryStore>,
    task: &str,
    mut options: TaskOptions,
    json: bool,
) -> Result<WorkflowResult, WorkflowError> {
    let domain = options.domain_override;
    // Assign the id here so the JSON envelope can carry it from the first event.
    let task_id = options.task_id.get_or_insert_with(new_task_id).clone();
    let mut envelope = stream_event::EnvelopeState::new(task_id);
    let (mut stream, handle) = orchestrator.stream_task(task, options);
    while let Some(event) = stream.next().await {
        if json {
            print_event_json(&event, &mut envelope);
        } else {
            print_event_human(&event);
        }
    }
    let result = handle
        .await
        .map_err(|e| WorkflowError::Internal(format!("task join failed: {e}")))?;
    let output = print_result(&result, json);
    if let Some(store) = history {
        let domain = domain.map(|d| d.as_str()).unwrap_or_else(|| {
            result.metadata["workflow_domain"]
                .as_str()
                .unwrap_or("general")
        });
        if let Err(e) = store.record(task, domain, result.success, &output) {
            tracing::warn!(error = %e, "failed to record history");
        }
    }
    Ok(result)
}

async fn cmd_run(
    args: &Args,
    task: &str,
    domain: Option<&str>,
    max_iterations: Option<u32>,
    sub_agents: bool,
) -> ExitCode {
    let domain_override = match domain {
        Some(d) => match d.parse::<Domain>() {
            Ok(domain) => Some(domain),
            Err(e) => {
                eprintln!("invalid --domain: {e}");
                return ExitCode::from(exit_code::INVALID_USAGE as u8);
            }
        },
        None => None,
    };
    let orchestrator = match build_orchestrator(args.workspace.as_ref(), sub_agents) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(exit_code::RUNTIME_FAILURE as u8);
        }
    };
    let history = HistoryStore::open_default().ok();
    let options = TaskOptions {
        max_iterations,
        domain_override,
        ..TaskOptions::default()
    };
    let result = run_one(&orchestrator, history.as_ref(), task, options, args.json).await;
    if let Err(ref e) = result {
        eprintln!("error: {e}");
    }
    exit_for(&result)
}

async fn cmd_chat(args: &Args) -> ExitCode {
    let orchestrator = match build_orchestrator(args.workspace.as_ref(), false) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(exit_code::RUNTIME_FAILURE as u8);
        }
    };
    let history = HistoryStore::open_default().ok();
    let stdin = std::io::stdin();
    loop {
        print!("strand> ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("stdin error: {e}");
                return ExitCode::from(exit_code::RUNTIME_FAILURE as u8);
            }
        }
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if task == "exit" || task == "quit" {
            break;
        }
        let result = run_one(
            &orchestrator,
            history.as_ref(),
            task,
            TaskOptions::default(),
            args.json,
        )
        .await;
        if let Err(e) = result {
            eprintln!("error: {e}");
        }
    }
    ExitCode::from(exit_code::SUCCESS as u8)
}

fn cmd_status() -> ExitCode {
    let endpoints = config::env_list("LLM_ENDPOINTS");
    let model = config::env_or("LLM_MODEL", "(unset)");
    println!("model: {model}");
    if endpoints.is_empty() {
        println!("endpoints: (none configured)");
    } else {
        for (i, ep) in endpoints.iter().enumerate() {
            println!("endpoint {i}: {ep}");
        }
    }
    match HistoryStore::open_default().and_then(|s| Ok((s.count()?, s))) {
        Ok((count, _)) => {
            println!("history entries: {count}");
            if let Some(path) = HistoryStore::default_path() {
                println!("history db: {}", path.display());
            }
        }
        Err(e) => println!("history unavailable: {e}"),
    }
    ExitCode::from(exit_code::SUCCESS as u8)
}

fn cmd_history(search: Option<&str>, limit: usize, json: bool) -> ExitCode {
    let store = match HistoryStore::open_default() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("history unavailable: {e}");
            return ExitCode::from(exit_code::RUNTIME_FAILURE as u8);
        }
    };
    match store.list(search, limit) {
        Ok(entries) => {
            for entry in entries {
                if json {
                    println!(
                        "{}",
                        serde_json::json!({
                            "id": entry.id,
                            "created_at": entry.created_at,
                            "task": entry.task,
                            "domain": entry.domain,
                            "success": entry.success,
                        })
                    );
                } else {
                    let mark = if entry.success { "✓" } else { "✗" };
                    println!(
                        "{mark} #{} [{}] {} — {}",
                        entry.id, entry.domain, entry.created_at, entry.task
                    );
                }
            }
            ExitCode::from(exit_code::SUCCESS as u8)
        }
        Err(e) => {
            eprintln!("history query failed: {e}");
            ExitCode::from(exit_code::RUNTIME_FAILURE as u8)
        }
    }
}

fn cmd_clear(confirm: bool) -> ExitCode {
    if !confirm {
        eprintln!("refusing to clear history without --confirm");
        return ExitCode::from(exit_code::INVALID_USAGE as u8);
    }
    match HistoryStore::open_default().and_then(|s| s.clear()) {
        Ok(n) => {
            println!("cleared {n} history entr{}", if n == 1 { "y" } else { "ies" });
            ExitCode::from(exit_code::SUCCESS as u8)
        }
        Err(e) => {
            eprintln!("clear failed: {e}");
            ExitCode::from(exit_code::RUNTIME_FAILURE as u8)
        }
    }
}

fn cmd_config() -> ExitCode {
    for key in [
        "LLM_ENDPOINTS",
        "LLM_MODEL",
        "LLM_API_KEY",
        "STRAND_WORKSPACE",
        "SANDBOX_IMAGE",
        "SANDBOX_PORT",
        "SANDBOX_MEMORY",
        "SANDBOX_CPU",
    ] {
        let value = match std::env::var(key) {
            Ok(v) if key == "LLM_API_KEY" && !v.is_empty() => "(set)".to_string(),
            Ok(v) => v,
            Err(_) => "(unset)".to_string(),
        };
        println!("{key}={value}");
    }
    ExitCode::from(exit_code::SUCCESS as u8)
}

#[tokio::main]
async fn main() -> ExitCode {
    // env > .env > ~/.config/strand/config.toml
    if let Err(e) = config::load_and_apply("strand", None) {
        eprintln!("config load failed: {e}");
    }
    init_logging();

    let args = Args::parse();
    match &args.cmd {
        Command::Run {
            task,
            domain,
            max_iterations,
            sub_agents,
        } => {
            let task = task.join(" ");
            if task.trim().is_empty() {
                eprintln!("usage: strand run <task>");
                return ExitCode::from(exit_code::INVALID_USAGE as u8);
            }
            cmd_run(&args, &task, domain.as_deref(), *max_iterations, *sub_agents).await
        }
        Command::Chat => cmd_chat(&args).await,
        Command::Status => cmd_status(),
        Command::History { search, limit } => cmd_history(search.as_deref(), *limit, args.json),
        Command::Clear { confirm } => cmd_clear(*confirm),
        Command::Config => cmd_config(),
    }
}
