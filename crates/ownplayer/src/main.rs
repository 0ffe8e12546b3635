use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

use ownplayer::LibraryRepo;
use ownplayer::Mode;
use ownplayer::Player;
use owntcp::Config;

/// Runs a player instance and keeps its library in sync with others.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_enum, default_value_t = ModeArg::Standalone)]
    mode: ModeArg,

    /// Address to listen on (server) or connect to (client)
    #[arg(short, long, default_value = "127.0.0.1:7700")]
    addr: String,

    /// Volume to set once running
    #[arg(short, long)]
    volume: Option<f32>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Standalone,
    Server,
    Client,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    let mode = match args.mode {
        ModeArg::Standalone => Mode::Standalone,
        ModeArg::Server => Mode::Server { addr: args.addr.clone() },
        ModeArg::Client => Mode::Client { addr: args.addr.clone() },
    };

    let repo = Arc::new(LibraryRepo::new());
    let _events = repo.subscribe(|event| tracing::info!(?event, "library changed"));

    let mut player = Player::start(mode, repo.clone(), Config::from_env())
        .await
        .with_context(|| format!("could not start player on {}", args.addr))?;

    if let Some(volume) = args.volume {
        repo.set_volume(volume);
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::info!("interrupted");
        }
        event = player.disconnected() => {
            tracing::warn!(expected = event.expected, error = ?event.error, "lost the server");
        }
    }

    player.stop().await;
    Ok(())
}
