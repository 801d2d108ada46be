use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "discord-irc")]
#[command(about = "Relay messages between Discord and IRC channels", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Connect every configured bot to IRC and Discord and relay until interrupted.
    Run {
        /// Config file path (default: DISCORD_IRC_CONFIG or ~/.discord-irc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Validate the config file and print each bot's channel mapping, without connecting.
    Check {
        /// Config file path (default: DISCORD_IRC_CONFIG or ~/.discord-irc/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("discord-irc {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run(config).await {
                log::error!("run failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Check { config }) => {
            if let Err(e) = check(config) {
                log::error!("config check failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (configs, path) = bridge::config::load_config(config_path)?;
    log::info!("loaded {} bot(s) from {}", configs.len(), path.display());
    bridge::runner::run_bridges(configs).await
}

fn check(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (configs, path) = bridge::config::load_config(config_path)?;
    println!("{}: {} bot(s)", path.display(), configs.len());
    for config in &configs {
        let mapping = bridge::mapping::ChannelMapping::build(&config.channel_mapping);
        println!("{}@{}", config.nickname, config.server);
        for (discord, irc) in mapping.pairs() {
            println!("  {} <-> {}", discord, irc);
        }
    }
    Ok(())
}
