//! Run context compaction passes over a saved message list.
//!
//! Messages and session state are JSON files, so a pass can be replayed and
//! inspected outside the host.
//!
//! # Examples
//!
//! ```sh
//! # One pass: rewrite messages and update the saved state
//! sweep sync --messages session.json --state state.json --out compacted.json
//!
//! # Mark everything prunable, then apply
//! sweep sync --messages session.json --state state.json --mark '[tools]'
//!
//! # Where the tokens go
//! sweep context --messages compacted.json --state state.json
//!
//! # Ids the model can still prune
//! sweep prunable --messages session.json --state state.json --filter '[thinking]'
//!
//! # Config JSON schema
//! sweep schema
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use sweep_rs::config::{SweepConfig, default_config_paths, load_layers};
use sweep_rs::context::budget::compute_token_breakdown_with;
use sweep_rs::context::{PrunableFilter, enumerate_prunable, synchronize};
use sweep_rs::session::SessionState;
use sweep_rs::{Error, Message, Result};

/// Context compaction for coding-agent sessions.
#[derive(Parser)]
#[command(name = "sweep", version)]
struct Cli {
    /// Config file layers, lowest precedence first. Defaults to the user
    /// and project config files.
    #[arg(long = "config", global = true)]
    configs: Vec<PathBuf>,

    /// Project directory used to find `.sweep/sweep.json`
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one synchronization pass and write the rewritten messages
    Sync {
        #[command(flatten)]
        session: SessionArgs,

        /// Where to write the rewritten messages (stdout if omitted)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Ids or bulk patterns (`[tools]`, `[messages]`, `[thinking]`,
        /// `[segments]`, `[*]`) to mark before the final pass
        #[arg(long = "mark")]
        marks: Vec<String>,
    },
    /// Print the estimated token breakdown
    Context {
        #[command(flatten)]
        session: SessionArgs,

        /// Print JSON instead of a summary line
        #[arg(long)]
        json: bool,
    },
    /// List ids that can still be pruned
    Prunable {
        #[command(flatten)]
        session: SessionArgs,

        /// Bulk pattern selecting categories
        #[arg(long, default_value = "[*]")]
        filter: String,
    },
    /// Print the config JSON schema
    Schema,
}

#[derive(Args)]
struct SessionArgs {
    /// JSON array of messages
    #[arg(long)]
    messages: PathBuf,

    /// Session state file, read if present and written back by `sync`
    #[arg(long)]
    state: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_env("SWEEP_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Command::Schema = cli.command {
        println!("{}", serde_json::to_string_pretty(&SweepConfig::json_schema())?);
        return Ok(());
    }
    let config = load_config(&cli);

    match cli.command {
        Command::Sync {
            session,
            out,
            marks,
        } => {
            let (mut state, mut messages) = load_session(&session, &config)?;
            let mut report = synchronize(&mut state, &config, &mut messages);
            if !marks.is_empty() {
                let targets: Vec<&str> = marks.iter().map(String::as_str).collect();
                let outcome = state.mark_targets(&targets);
                info!(
                    marked = outcome.marked.len(),
                    already = outcome.already.len(),
                    "Marked targets"
                );
                for id in &outcome.unknown {
                    warn!("Unknown id {id}");
                }
                report = synchronize(&mut state, &config, &mut messages);
            }
            info!("{}", report.to_log_string());

            let rendered = serde_json::to_string_pretty(&messages)?;
            match out {
                Some(path) => std::fs::write(path, rendered)?,
                None => println!("{rendered}"),
            }
            if let Some(path) = &session.state {
                std::fs::write(path, serde_json::to_string_pretty(&state)?)?;
            }
        }
        Command::Context { session, json } => {
            let (state, messages) = load_session(&session, &config)?;
            let breakdown = compute_token_breakdown_with(&state, &messages, config.chars_per_token);
            if json {
                println!("{}", serde_json::to_string_pretty(&breakdown)?);
            } else {
                println!("{}", breakdown.to_log_string());
            }
        }
        Command::Prunable { session, filter } => {
            let Some(filter) = PrunableFilter::parse(&filter) else {
                return Err(Error::Config {
                    path: PathBuf::from("--filter"),
                    message: format!("unknown pattern {filter:?}"),
                });
            };
            let (mut state, mut messages) = load_session(&session, &config)?;
            synchronize(&mut state, &config, &mut messages);
            let items = enumerate_prunable(&state, filter);
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        Command::Schema => {}
    }
    Ok(())
}

fn load_config(cli: &Cli) -> SweepConfig {
    let paths = if cli.configs.is_empty() {
        default_config_paths(&cli.project)
    } else {
        cli.configs.clone()
    };
    let loaded = load_layers(&paths);
    for warning in &loaded.warnings {
        warn!("{warning}");
    }
    loaded.config
}

fn load_session(args: &SessionArgs, config: &SweepConfig) -> Result<(SessionState, Vec<Message>)> {
    let messages: Vec<Message> = read_json(&args.messages)?;
    let state = match &args.state {
        Some(path) if path.exists() => read_json(path)?,
        _ => SessionState::new(config.cache_capacity),
    };
    Ok((state, messages))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::Persistence(format!("failed to parse {}: {e}", path.display())))
}
