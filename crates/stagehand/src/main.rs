//! stagehand - drive capture and playback sessions from the command line
//!
//! Subcommands:
//! - `stagehand play <uri>` - play a source on the simulated engine, printing snapshots
//! - `stagehand scan [codes...]` - run a capture session and feed it detections
//! - `stagehand config` - print the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stageconf::StageConfig;

mod commands;
mod telemetry;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(about = "Drive capture and playback sessions against a simulated engine")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./stagehand.toml)
    #[arg(short, long, global = true, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a network source and print snapshots as they change
    Play {
        /// Media URI
        uri: String,

        /// How long to play before disposing
        #[arg(short, long, default_value = "3")]
        seconds: u64,

        /// Mix with other audio instead of taking focus
        #[arg(long)]
        mix: bool,

        /// Loop at the end instead of completing
        #[arg(long)]
        looping: bool,

        /// Playback rate
        #[arg(long, default_value = "1.0")]
        speed: f64,

        /// Simulated media length in seconds
        #[arg(long, default_value = "10")]
        duration: u64,
    },

    /// Run a capture session and emit the given codes as detections
    Scan {
        /// Payloads to detect, in order
        #[arg(default_values_t = ["4006381333931".to_string(), "4006381333931".to_string(), "https://example.com".to_string()])]
        codes: Vec<String>,

        /// Forward repeated detections instead of suppressing them
        #[arg(long)]
        allow_duplicates: bool,
    },

    /// Print the effective configuration
    Config {
        /// Also list the files and env vars it came from
        #[arg(long)]
        sources: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = StageConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Play {
            uri,
            seconds,
            mix,
            looping,
            speed,
            duration,
        } => {
            let play = commands::PlayArgs {
                uri,
                seconds,
                mix,
                looping,
                speed,
                duration,
            };
            commands::play(&config, play).await?;
        }
        Commands::Scan {
            codes,
            allow_duplicates,
        } => {
            commands::scan(&config, codes, allow_duplicates).await?;
        }
        Commands::Config { sources: show } => {
            commands::config(&config, &sources, show);
        }
    }

    Ok(())
}
