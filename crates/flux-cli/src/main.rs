use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flux_common::FluxConfig;
use flux_common::config::{FileStore, Saver};
use flux_common::telemetry::{self, TelemetryConfig};
use miette::Result;

mod relay;
mod watch;

#[derive(Parser)]
#[command(version, about = "Flux - keep project folders in sync across participants", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (.toml or .json); the environment is used when absent
    #[arg(long, global = true, env = "FLUX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Synchronize local project folders with the user's channel
    Watch {
        /// Projects to synchronize, as NAME=PATH
        #[arg(required = true, value_parser = watch::parse_project)]
        projects: Vec<(String, PathBuf)>,
    },
    /// Run a relay that fans messages out to channel members
    Relay {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,
    },
    /// Write the current settings to a config file
    Init {
        /// Destination (.toml or .json)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette();
    dotenvy::dotenv().ok();
    telemetry::init(TelemetryConfig::from_env("flux-cli"));

    let cli = Cli::parse();

    match cli.command {
        Command::Watch { projects } => {
            let config = load_config(cli.config).await?;
            watch::run(config, projects).await
        }
        Command::Relay { bind } => relay::serve(bind).await,
        Command::Init { path } => {
            let config = load_config(cli.config).await?;
            config.save(&FileStore::new(&path)).await?;
            println!("Wrote {}", path.display());
            Ok(())
        }
    }
}

async fn load_config(path: Option<PathBuf>) -> Result<FluxConfig> {
    let config = match path {
        Some(path) => FluxConfig::load(&FileStore::new(path)).await?,
        None => FluxConfig::from_env()?,
    };
    Ok(config)
}

fn init_miette() {
    // Only fails when a hook is already installed.
    let _ = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    miette::set_panic_hook();
}
