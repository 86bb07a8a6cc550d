//! Native-messaging host for the Scenecraft browser extension.
//!
//! The browser launches this binary and speaks length-prefixed JSON over
//! stdin/stdout. Logs go to stderr.

mod bridge;
mod error;
mod host;
mod messaging;

use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::mpsc;

use scenecraft::config::{load_settings, resolve_config_path, Settings, SharedSettings};
use scenecraft::{logging, Orchestrator, PipelineEvents};

use error::HostError;
use host::Host;
use messaging::OutboundMessage;

fn initial_settings() -> Settings {
    let Some(path) = resolve_config_path(None) else {
        return Settings::default();
    };
    if !path.exists() {
        return Settings::default();
    }
    match load_settings(&path) {
        Ok(settings) => settings,
        Err(e) => {
            // Logging is not up yet; the extension can still push settings.
            eprintln!("Ignoring unreadable settings at {:?}: {}", path, e);
            Settings::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let settings = initial_settings();
    logging::init(settings.logging.format);
    info!("Starting scenecraft-host v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(settings).await {
        error!("Host stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run(settings: Settings) -> Result<(), HostError> {
    let orchestrator = Arc::new(Orchestrator::from_settings(
        SharedSettings::new(settings),
        PipelineEvents::default(),
    )?);

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        if let Err(e) = messaging::run_writer(&mut stdout, &mut outbound_rx).await {
            error!("Stopped writing to the browser: {}", e);
        }
    });
    let bridge = tokio::spawn(bridge::run_event_bridge(
        orchestrator.events().subscribe(),
        outbound_tx.clone(),
    ));

    let mut host = Host::new(orchestrator, outbound_tx);
    let mut stdin = tokio::io::stdin();
    let result = loop {
        match messaging::read_frame(&mut stdin).await {
            Ok(Some(frame)) => match messaging::decode(&frame) {
                Ok(message) => host.handle(message),
                Err(e) => warn!("Dropping malformed message: {}", e),
            },
            Ok(None) => {
                info!("Browser closed the pipe");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    info!("Waiting for {} in-flight runs", host.in_flight());
    host.shutdown().await;
    // The orchestrator is gone now, so the bridge sees the channel close and
    // the writer drains what is left.
    let _ = bridge.await;
    let _ = writer.await;
    result
}
