//! charm-cli - Command-line interface for charm scripts
//!
//! Evaluates scripts against a local runtime, shows how a script's
//! invocations are classified, and lists registered charms.

use anyhow::{Context, Result};
use charmkit::interpreter::value::to_text;
use charmkit::runtime::registry::CharmDescriptor;
use charmkit::{ActorId, CharmRegistryBuilder, Runtime, RuntimeConfig, Scope};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "charm-cli")]
#[command(about = "Evaluate and inspect charm scripts", long_about = None)]
struct Cli {
    /// Runtime configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reject malformed structured payloads
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a script and print its result
    Eval {
        /// Script text
        script: String,

        /// Positional arguments available as $$1, $$2, ...
        args: Vec<String>,

        /// Invoking actor id
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Guild id (omit for a direct-message scope)
        #[arg(long)]
        guild: Option<String>,

        /// Channel id
        #[arg(long, default_value = "console")]
        channel: String,
    },

    /// Show the invocations a script contains without running it
    Check {
        /// Script text
        script: String,
    },

    /// List registered charms
    Charms,
}

fn runtime(cli: &Cli) -> Result<Runtime> {
    let mut config = match &cli.config {
        Some(path) => charmkit::runtime::storage::load_config(path)?,
        None => RuntimeConfig::default(),
    };
    config.strict_structured |= cli.strict;

    let mut charms = CharmRegistryBuilder::new();
    charms.register(
        CharmDescriptor::from_fn("say", |args, _ctx| {
            println!("{}", args.text());
            Ok(Value::String(args.text().to_string()))
        })
        .with_description("Print text to stdout"),
    )?;
    Runtime::new(config, charms)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let runtime = runtime(&cli)?;

    match cli.command {
        Commands::Eval {
            script,
            args,
            actor,
            guild,
            channel,
        } => {
            let scope = match guild {
                Some(guild) => Scope::guild(guild, channel),
                None => Scope::direct(channel),
            };
            let autosave = runtime.spawn_autosave();
            let mut ctx = runtime.context(ActorId::new(actor), scope).with_args(args);
            let value = runtime
                .engine()
                .evaluate_value(&script, &mut ctx)
                .await
                .context("script failed")?;
            println!("{}", to_text(&value));

            if let Some(handle) = autosave {
                handle.abort();
            }
            runtime
                .variables()
                .flush()
                .context("Failed to save variables")?;
        }

        Commands::Check { script } => {
            let invocations = runtime.engine().inspect(&script)?;
            if invocations.is_empty() {
                println!("No invocations");
            }
            for invocation in invocations {
                let known = if runtime.engine().registry().contains(&invocation.name) {
                    ""
                } else {
                    " (unknown)"
                };
                println!(
                    "${}  tier {}{}  {}",
                    invocation.name,
                    invocation.tier.level(),
                    known,
                    invocation.args.value()
                );
            }
        }

        Commands::Charms => {
            for descriptor in runtime.engine().registry().descriptors() {
                println!(
                    "{:<10} tier {}  {}",
                    descriptor.name(),
                    descriptor.tier().level(),
                    descriptor.description()
                );
            }
        }
    }

    Ok(())
}
