use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use stationeers_fleet::config::{default_config_path, ConfigStore};
use stationeers_fleet::events::{publish, EventHub, EventSink, FleetEvent};
use stationeers_fleet::FleetCoordinator;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the fleet config file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Do not start servers flagged for autostart
    #[arg(long)]
    no_autostart: bool,
    /// Install missing components before starting servers
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(default_config_path);
    let config = Arc::new(ConfigStore::open(&config_path)?);
    let hub = Arc::new(EventHub::default());
    let events: Arc<dyn EventSink> = Arc::clone(&hub) as Arc<dyn EventSink>;
    let fleet = FleetCoordinator::native(Arc::clone(&config), Arc::clone(&events))?;
    log::info!(
        "Fleet ready: {} servers under {}",
        fleet.server_count(),
        fleet.paths().root().display()
    );
    let missing = fleet.orchestrator().missing_components();
    if !missing.is_empty() {
        log::warn!("Missing components: {}", missing.join(", "));
    }

    let mut subscriber = hub.subscribe();
    tokio::spawn(async move {
        loop {
            match subscriber.recv().await {
                Ok(bytes) => log::debug!("event: {}", String::from_utf8_lossy(&bytes)),
                Err(RecvError::Lagged(skipped)) => log::debug!("{} events skipped", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (board_tx, mut board_rx) = mpsc::channel(8);
    let _stream = fleet.progress_stream(board_tx);
    let progress_events = Arc::clone(&events);
    tokio::spawn(async move {
        while let Some(board) = board_rx.recv().await {
            publish(progress_events.as_ref(), &FleetEvent::Progress(board));
        }
    });

    if args.setup || config.load().update_on_launch {
        match fleet.orchestrator().start_setup_async() {
            Ok(outcome) => log::info!("Setup: {:?}", outcome),
            Err(e) => log::error!("Setup failed to start: {}", e),
        }
    }

    if !args.no_autostart {
        fleet.autostart().await;
    }

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down, stopping all servers");
    let remaining = fleet.stop_all().await;
    if remaining > 0 {
        log::warn!("{} servers did not exit cleanly", remaining);
    }
    fleet.save();
    Ok(())
}
