use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use cosci_agents::config::check_endpoint;
use cosci_agents::{AgentSet, EngineConfig, Orchestrator, RunStatus};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate, review and rank hypotheses for a research goal
    Run(RunArgs),
    /// Check that the configured inference endpoint answers
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research goal
    #[arg(long)]
    goal: String,

    /// TOML config file (COSCI_* environment variables override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the run result as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Tournament mode: random, round_robin or proximity
    #[arg(long)]
    mode: Option<String>,

    #[arg(long)]
    iterations: Option<u32>,

    #[arg(long)]
    target_count: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Replace a role's system prompt with the contents of a file (repeatable)
    #[arg(long = "role-prompt", value_name = "ROLE=FILE")]
    role_prompts: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check { config } => {
            let config = EngineConfig::from_sources(config.as_deref())?;
            if check_endpoint(&config.agent.base_url).await {
                info!(url = %config.agent.base_url, "Endpoint reachable");
                Ok(())
            } else {
                anyhow::bail!("endpoint {} is not reachable", config.agent.base_url)
            }
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = EngineConfig::from_sources(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.tournament_mode = mode;
    }
    if let Some(iterations) = args.iterations {
        config.max_iterations = iterations;
    }
    if let Some(target_count) = args.target_count {
        config.target_count = target_count;
    }
    if args.seed.is_some() {
        config.random_seed = args.seed;
    }
    for assignment in &args.role_prompts {
        config.agent.set_role_prompt_file(assignment)?;
    }

    let agents = AgentSet::from_endpoint(&config.agent);
    let orchestrator = Orchestrator::new(config, agents).context("Invalid configuration")?;

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next phase boundary");
            token.cancel();
        }
    });

    let result = orchestrator.run(&args.goal).await?;

    match &args.output {
        Some(path) => result.write_json(path)?,
        None => println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize run result")?
        ),
    }

    if result.status == RunStatus::Aborted {
        anyhow::bail!(
            "run aborted: {}",
            result.abort_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    Ok(())
}
