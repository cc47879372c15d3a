//! codplayerd - the codplayer daemon
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cod_archive::Database;
use cod_audio::{FileSink, Sink};
use cod_playback::{ChannelPublisher, Player, StatePublisher, Transport};

use cod_player::config::{AudioDevice, DaemonConfig};
use cod_player::wire;

#[derive(Parser)]
#[command(name = "codplayerd")]
#[command(about = "codplayer - CD player daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the player daemon
    Serve {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Initialise the disc database directory
    InitDb {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "codplayerd=info,cod_player=info,cod_playback=info,cod_audio=info,cod_archive=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(config.as_deref()).await,
        Commands::InitDb { config } => init_db(config.as_deref()),
    }
}

async fn serve(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = DaemonConfig::load(config_path)?;
    config.validate()?;

    info!("starting codplayer daemon");
    info!(database = %config.database.path.display(), "disc database");

    let db = Database::open(&config.database.path)
        .with_context(|| format!("opening database {}", config.database.path.display()))?;

    let sink = build_sink(&config)?;

    let (publisher, publications) = ChannelPublisher::new();
    let publisher: Arc<dyn StatePublisher> = Arc::new(publisher);

    let transport = Transport::new(sink, Arc::clone(&publisher));

    let (command_tx, command_rx) = crossbeam_channel::unbounded();
    let player = Player::new(
        config.player_options(),
        db,
        transport,
        publisher,
        command_rx,
    );

    let player_thread = std::thread::Builder::new()
        .name("player".into())
        .spawn(move || player.run())
        .context("spawning player thread")?;

    let state_listener = TcpListener::bind((config.wire.host.as_str(), config.wire.state_port))
        .await
        .context("binding state socket")?;
    let command_listener =
        TcpListener::bind((config.wire.host.as_str(), config.wire.command_port))
            .await
            .context("binding command socket")?;

    wire::log_endpoints(
        &state_listener.local_addr()?,
        &command_listener.local_addr()?,
    );

    tokio::spawn(async move {
        if let Err(e) = wire::serve_state(state_listener, publications).await {
            warn!(error = %e, "state socket failed");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = wire::serve_commands(command_listener, command_tx).await {
            warn!(error = %e, "command socket failed");
        }
    });

    // The daemon lives as long as the player loop
    tokio::task::spawn_blocking(move || player_thread.join())
        .await?
        .map_err(|_| anyhow::anyhow!("player thread panicked"))?;

    info!("player stopped, shutting down");
    Ok(())
}

fn build_sink(config: &DaemonConfig) -> anyhow::Result<Arc<dyn Sink>> {
    match config.audio.device {
        AudioDevice::File => {
            info!(
                dir = %config.audio.file_dir.display(),
                speed = config.audio.file_play_speed,
                "using file audio device"
            );
            Ok(Arc::new(FileSink::new(
                &config.audio.file_dir,
                config.audio.file_play_speed,
            )))
        }

        #[cfg(target_os = "linux")]
        AudioDevice::Alsa => {
            use cod_audio::{AlsaOpener, ThreadedSink};

            let opener = AlsaOpener::new(&config.audio.alsa_card);

            // Surface access problems now rather than mid-playback
            if let Err(e) = opener.probe() {
                if config.audio.start_without_device {
                    warn!(error = %e, "can't open audio device, proceeding since start_without_device is set");
                } else {
                    anyhow::bail!("can't open audio device: {e}");
                }
            }

            info!(card = %config.audio.alsa_card, "using alsa audio device");
            Ok(Arc::new(ThreadedSink::new(Box::new(opener))))
        }

        #[cfg(not(target_os = "linux"))]
        AudioDevice::Alsa => {
            anyhow::bail!("alsa output is only available on Linux; use the file device")
        }
    }
}

fn init_db(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = DaemonConfig::load(config_path)?;

    std::fs::create_dir_all(&config.database.path)?;
    Database::init(&config.database.path)
        .with_context(|| format!("initialising {}", config.database.path.display()))?;

    println!("initialised disc database in {}", config.database.path.display());
    Ok(())
}
