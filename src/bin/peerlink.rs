//! Peerlink CLI binary.
//!
//! # Commands
//!
//! - `chat` - Ask through sequential failover (requested model, then fallbacks)
//! - `race` - Race the configured roster, first responder wins
//! - `keys` - Show credential pool health

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use peerlink::{
    dispatch::{Chunk, ChunkStream, StreamStatus},
    Candidate, Config, EngineSet, GenerationRequest, KeyPool, ProviderRaceDispatcher,
    SequentialFailoverDispatcher, VERSION,
};

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(version = VERSION)]
#[command(about = "Peerlink - resilient multi-provider LLM dispatch", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/peerlink/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask through sequential failover
    Chat {
        /// Prompt text
        prompt: String,

        /// Preferred candidates as provider/model, tried in order
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// System instruction
        #[arg(short, long)]
        instruction: Option<String>,
    },

    /// Race the configured roster
    Race {
        /// Prompt text
        prompt: String,

        /// Override the roster with provider/model entries
        #[arg(short, long = "model")]
        models: Vec<String>,

        /// System instruction
        #[arg(short, long)]
        instruction: Option<String>,
    },

    /// Show credential pool health
    Keys {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = Config::load(cli.config.clone())?;

    match cli.command {
        Commands::Chat {
            prompt,
            models,
            instruction,
        } => cmd_chat(&config, prompt, &models, instruction),

        Commands::Race {
            prompt,
            models,
            instruction,
        } => cmd_race(&config, prompt, &models, instruction),

        Commands::Keys { json } => cmd_keys(&config, json),
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_models(models: &[String]) -> anyhow::Result<Vec<Candidate>> {
    models
        .iter()
        .map(|m| m.parse::<Candidate>().map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

fn build_request(prompt: String, instruction: Option<String>) -> GenerationRequest {
    let request = GenerationRequest::new(prompt);
    match instruction {
        Some(instruction) => request.with_instruction(instruction),
        None => request,
    }
}

fn cmd_chat(
    config: &Config,
    prompt: String,
    models: &[String],
    instruction: Option<String>,
) -> anyhow::Result<()> {
    let priority = parse_models(models)?;
    let pool = Arc::new(KeyPool::from_config(config));

    let engines = Arc::new(EngineSet::from_config(config)?);
    let dispatcher = SequentialFailoverDispatcher::from_config(config, pool, engines)?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(print_stream(
        dispatcher.execute(build_request(prompt, instruction), &priority),
    ))
}

fn cmd_race(
    config: &Config,
    prompt: String,
    models: &[String],
    instruction: Option<String>,
) -> anyhow::Result<()> {
    let roster = parse_models(models)?;
    let pool = Arc::new(KeyPool::from_config(config));

    let engines = Arc::new(EngineSet::from_config(config)?);
    let dispatcher = if roster.is_empty() {
        ProviderRaceDispatcher::from_config(config, pool, engines)?
    } else {
        ProviderRaceDispatcher::new(pool, engines, roster, config.race.timeout())
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(print_stream(dispatcher.race(build_request(prompt, instruction))))
}

async fn print_stream(mut stream: ChunkStream) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let mut citations = Vec::new();

    while let Some(chunk) = stream.next().await {
        let Chunk {
            text,
            tool_call,
            grounding,
            status,
        } = chunk;

        match status {
            Some(StreamStatus::Rerouting { failed, next }) => {
                eprintln!("[{failed} failed, rerouting to {next}]");
            },
            Some(StreamStatus::Exhausted { reason }) => {
                eprintln!("[exhausted: {reason}]");
            },
            None => {},
        }
        if let Some(text) = text {
            write!(stdout, "{text}")?;
            stdout.flush()?;
        }
        if let Some(call) = tool_call {
            eprintln!("[tool call] {}({})", call.name, call.arguments);
        }
        if let Some(grounding) = grounding {
            citations.extend(grounding.citations);
        }
    }
    writeln!(stdout)?;

    if !citations.is_empty() {
        println!();
        println!("Sources:");
        for (i, citation) in citations.iter().enumerate() {
            let title = citation.title.as_deref().unwrap_or(&citation.uri);
            println!("  [{}] {} <{}>", i + 1, title, citation.uri);
        }
    }
    Ok(())
}

fn cmd_keys(config: &Config, json: bool) -> anyhow::Result<()> {
    let pool = KeyPool::from_config(config);
    let snapshot = pool.status_snapshot();

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    if snapshot.is_empty() {
        println!("No credentials configured.");
        println!("Set PEERLINK_<PROVIDER>_KEYS, <PROVIDER>_API_KEY or PEERLINK_MANAGED_URL.");
        return Ok(());
    }

    println!("{:<12} {:>7} {:>6} {:>10}", "PROVIDER", "HEALTHY", "KEYS", "AVAILABLE");
    println!("{}", "-".repeat(38));
    for (provider, status) in &snapshot {
        let keys = if status.managed {
            "managed".to_string()
        } else {
            status.total.to_string()
        };
        let available = if status.healthy {
            "now".to_string()
        } else {
            format!("{} min", status.minutes_until_available)
        };
        println!(
            "{:<12} {:>7} {:>6} {:>10}",
            provider.name(),
            if status.healthy { "yes" } else { "no" },
            keys,
            available
        );
    }
    Ok(())
}
