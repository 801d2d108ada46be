//! Process-level runner: one relay session per configured bridge, shared shutdown.

use crate::channels::{DiscordClient, DiscordHandle, IrcClient, IrcConnectOptions, IrcHandle};
use crate::config::BotConfig;
use crate::diagnostics::LogDiagnostics;
use crate::relay::BotSession;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffer size for connector -> session event channels.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct RunningBridge {
    label: String,
    irc: Arc<IrcClient>,
    discord: Arc<DiscordClient>,
    tasks: Vec<JoinHandle<()>>,
}

fn bridge_label(index: usize, config: &BotConfig) -> String {
    format!("bridge[{}] {}@{}", index, config.nickname, config.server)
}

fn start_bridge(index: usize, config: &BotConfig) -> RunningBridge {
    let label = bridge_label(index, config);
    let (irc_tx, irc_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (discord_tx, discord_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let irc = Arc::new(IrcClient::new(IrcConnectOptions::from_config(config)));
    let discord = Arc::new(DiscordClient::new(config.discord_token.clone()));

    let mut session = BotSession::new(
        config,
        irc.clone(),
        discord.clone(),
        Arc::new(LogDiagnostics::new(label.clone())),
    );
    log::info!("{}: bridging {} channel(s)", label, session.mapping().pairs().len());
    session.mark_connecting();

    let tasks = vec![
        irc.clone().start(irc_tx),
        discord.clone().start(discord_tx),
        tokio::spawn(session.run(irc_rx, discord_rx)),
    ];
    RunningBridge {
        label,
        irc,
        discord,
        tasks,
    }
}

/// Run every bridge until SIGINT/SIGTERM, then stop the connectors and wait for the sessions
/// to drain.
pub async fn run_bridges(configs: Vec<BotConfig>) -> Result<()> {
    if configs.is_empty() {
        anyhow::bail!("no bridges configured");
    }
    let bridges: Vec<RunningBridge> = configs
        .iter()
        .enumerate()
        .map(|(i, c)| start_bridge(i, c))
        .collect();
    log::info!("started {} bridge(s)", bridges.len());

    shutdown_signal().await;
    log::info!("shutdown signal received, stopping bridges");

    for bridge in &bridges {
        IrcHandle::stop(bridge.irc.as_ref());
        DiscordHandle::stop(bridge.discord.as_ref());
    }
    for bridge in bridges {
        for task in bridge.tasks {
            if let Err(e) = task.await {
                log::error!("{}: task failed: {}", bridge.label, e);
            }
        }
        log::debug!("{}: stopped", bridge.label);
    }
    log::info!("all bridges stopped");
    Ok(())
}

/// Completes on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
