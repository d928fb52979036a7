use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use browserflow::agent::{AgentController, build_model};
use browserflow::browser::CdpConnector;
use browserflow::compiler::{Compiler, UnresolvedPolicy, load_workflow};
use browserflow::config::Settings;
use browserflow::runtime::Runtime;
use browserflow::service::Orchestrator;
use browserflow::store::{InMemoryStore, RecordStore, RedisStore};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "BROWSERFLOW_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a workflow and print the program outline
    Compile {
        /// Workflow file (YAML or JSON)
        #[arg(long, short)]
        file: PathBuf,

        /// Fail on unknown node types instead of skipping them
        #[arg(long)]
        strict: bool,
    },

    /// Compile and run a workflow against a remote browser
    Run {
        #[arg(long, short)]
        file: PathBuf,

        /// DevTools endpoint (ws://… or http://host:port)
        #[arg(long, short)]
        endpoint: String,

        #[arg(long)]
        strict: bool,
    },

    /// Hand a free-text task to the agent
    Agent {
        #[arg(long, short)]
        task: String,

        #[arg(long, short)]
        endpoint: String,

        /// Capture one screenshot per step
        #[arg(long)]
        screenshots: bool,
    },

    /// Run a stored workflow (or agent task) through the orchestrator
    Task {
        #[arg(long)]
        id: String,

        #[arg(long, short)]
        endpoint: String,

        /// Redis connection URL
        #[arg(long, env = "BROWSERFLOW_REDIS_URL")]
        redis: Option<String>,

        /// The record is an agent task, not a workflow
        #[arg(long)]
        agent: bool,
    },
}

fn policy(strict: bool) -> UnresolvedPolicy {
    if strict {
        UnresolvedPolicy::Strict
    } else {
        UnresolvedPolicy::Permissive
    }
}

fn store_for(url: Option<&str>) -> Result<Arc<dyn RecordStore>> {
    Ok(match url {
        Some(url) => Arc::new(RedisStore::open(url).with_context(|| format!("Invalid Redis URL {}", url))?),
        None => Arc::new(InMemoryStore::new()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Compile { file, strict } => {
            let workflow = load_workflow(&file)?;
            let program = Compiler::new().with_policy(policy(strict)).compile(&workflow)?;

            print!("{}", program.outline());
            println!("outputs: {}", program.output_schema.join(", "));
            for warning in &program.warnings {
                println!("warning: {}", warning);
            }
            if program.is_degraded() {
                println!("degraded: {} node(s) skipped", program.unresolved.len());
            }
        }

        Commands::Run { file, endpoint, strict } => {
            let workflow = load_workflow(&file)?;
            let program = Compiler::new().with_policy(policy(strict)).compile(&workflow)?;
            let store = store_for(settings.store.redis_url.as_deref())?;

            let runtime = Runtime::new(Arc::new(CdpConnector::new()))
                .with_config(settings.runtime.clone())
                .with_store(store);
            let report = runtime.run(&endpoint, &program).await;

            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_completed() {
                std::process::exit(1);
            }
        }

        Commands::Agent {
            task,
            endpoint,
            screenshots,
        } => {
            let model = build_model(&settings.llm)?;
            info!(model = %model.model(), "Using language model");

            let mut agent_config = settings.agent.clone();
            agent_config.take_screenshots |= screenshots;
            let controller = AgentController::new(Arc::new(CdpConnector::new()), model)
                .with_config(agent_config)
                .with_action_timeout(settings.runtime.default_timeout_ms);

            let cancel = controller.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping after the current step");
                    cancel.cancel();
                }
            });

            let run = controller.run(&endpoint, &task).await;
            println!("{}", serde_json::to_string_pretty(&run.state)?);
            if !run.is_completed() {
                std::process::exit(1);
            }
        }

        Commands::Task {
            id,
            endpoint,
            redis,
            agent,
        } => {
            let url = redis.or_else(|| settings.store.redis_url.clone());
            let store = store_for(url.as_deref())?;
            let mut orchestrator = Orchestrator::new(store, Arc::new(CdpConnector::new()), settings.clone());

            let completed = if agent {
                orchestrator = orchestrator.with_model(build_model(&settings.llm)?);
                let run = orchestrator.run_task(&id, &endpoint).await?;
                println!("{}", serde_json::to_string_pretty(&run.state)?);
                run.is_completed()
            } else {
                let report = orchestrator.run_workflow(&id, &endpoint).await?;
                println!("{}", serde_json::to_string_pretty(&report)?);
                report.is_completed()
            };
            if !completed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
