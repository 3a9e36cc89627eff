//! lorastack CLI - LoRA stack inspection
//!
//! A tool for listing LoRA files, normalising slot inputs the way the loader
//! nodes do, and dumping node descriptors.

use clap::{Parser, Subcommand};
use lorastack_lora::{InputMode, LORA_CATEGORY, LoraFolders};
use lorastack_nodes::{NodeContext, StackerConfig};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// lorastack - multi-LoRA loader tooling
#[derive(Parser)]
#[command(name = "lorastack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (overrides LOG_LEVEL)
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Additional LoRA search directory
    #[arg(long = "lora-dir")]
    lora_dirs: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage LoRAs
    Lora {
        #[command(subcommand)]
        action: LoraAction,
    },

    /// Normalise LoRA slots into a stack
    Stack {
        /// Node widget values (JSON object)
        #[arg(short, long)]
        inputs: Option<PathBuf>,

        /// Slot as NAME:WEIGHT, may be repeated
        #[arg(short, long = "slot")]
        slots: Vec<String>,

        /// Number of slots to read
        #[arg(long, default_value = "10")]
        count: usize,

        /// Input mode
        #[arg(short, long, value_enum, default_value = "simple")]
        mode: Mode,

        /// Resolve every entry to a file
        #[arg(long)]
        resolve: bool,
    },

    /// Show loader node descriptors
    Nodes {
        /// Only show this class
        class: Option<String>,
    },
}

#[derive(Subcommand)]
enum LoraAction {
    /// List available LoRAs
    List,
    /// Show the tensors of a LoRA
    Inspect {
        /// LoRA name or file path
        name: String,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Mode {
    /// One weight per slot
    Simple,
    /// Separate model and CLIP strengths
    Advanced,
}

impl From<Mode> for InputMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Simple => InputMode::Simple,
            Mode::Advanced => InputMode::Advanced,
        }
    }
}

/// Contents of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    /// Extra LoRA search directories
    lora_dirs: Vec<PathBuf>,
    /// Node configuration
    #[serde(flatten)]
    stacker: StackerConfig,
}

impl CliConfig {
    fn load(path: Option<&PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&text)?)
            }
            None => Ok(Self::default()),
        }
    }
}

fn log_level(verbose: bool) -> Level {
    if verbose {
        return Level::DEBUG;
    }
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| Level::from_str(level.trim()).ok())
        .unwrap_or(Level::INFO)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(cli.verbose))
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = CliConfig::load(cli.config.as_ref())?;

    let mut folders = LoraFolders::new();
    for dir in config.lora_dirs.iter().chain(&cli.lora_dirs) {
        folders.add_search_path(LORA_CATEGORY, dir);
    }
    let ctx = NodeContext::new(Arc::new(folders.clone())).with_config(config.stacker);

    match cli.command {
        Commands::Lora { action } => match action {
            LoraAction::List => commands::lora::list(&folders),
            LoraAction::Inspect { name } => commands::lora::inspect(&ctx, &name)?,
        },

        Commands::Stack {
            inputs,
            slots,
            count,
            mode,
            resolve,
        } => {
            let request = commands::stack::StackRequest {
                inputs,
                slots,
                count,
                mode: mode.into(),
                resolve,
            };
            commands::stack::run(&ctx, &request)?;
        }

        Commands::Nodes { class } => {
            commands::nodes::run(ctx, class.as_deref())?;
        }
    }

    Ok(())
}
