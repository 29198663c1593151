use std::path::PathBuf;
use std::sync::Arc;

use flux_common::FluxConfig;
use flux_common::transport::{BusConfig, MessageBus, WebSocketTransport};
use flux_watcher::{Repository, SystemSync};
use miette::{IntoDiagnostic, Result};
use tracing::{info, warn};

/// Parse a `NAME=PATH` project argument.
pub fn parse_project(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got {arg:?}")),
    }
}

/// Synchronize `projects` until interrupted.
pub async fn run(config: FluxConfig, projects: Vec<(String, PathBuf)>) -> Result<()> {
    let bus = MessageBus::new(WebSocketTransport::from_config(&config), BusConfig::from(&config));
    let repository = Arc::new(Repository::new()?);
    let sync = SystemSync::new(&bus, repository, config.username.clone());

    for (name, path) in &projects {
        let project = sync.add_project(name.as_str(), path)?;
        println!("Watching {} at {}", project.id(), project.root().display());
    }

    bus.connect()?;
    info!(host = %config.host, channel = config.channel(), "connecting");

    let mut status = bus.subscribe();
    loop {
        tokio::select! {
            changed = async {
                status.changed().await.map(|()| status.borrow_and_update().clone())
            } => {
                let Ok(current) = changed else {
                    break;
                };
                if current.ready {
                    info!(channel = ?current.joined_channel, "synchronizing");
                } else if !current.is_connected() {
                    warn!(retry_in = ?bus.backoff(), "relay unavailable");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.into_diagnostic()?;
                break;
            }
        }
    }

    for (name, _) in &projects {
        sync.remove_project(name);
    }
    sync.dispose();
    bus.dispose();
    println!("Stopped");
    Ok(())
}
