use std::{
    io,
    sync::Arc,
    time::Duration,
};

use anyhow::Error;
use common::PeerAddress;
use interprocess::local_socket::{LocalSocketListener, LocalSocketStream};
use log::{error, info, warn};
use specbox::{
    command::COMMAND_QUEUE_DEPTH,
    config::{Config, DEFAULT_CONFIG_PATH},
    lifecycle::{LifecycleController, LifecycleEvent},
    peripherals::sim::{SimAudioOutput, SimDevice},
    serial::pump_commands,
    storage::FsStorage,
};
use tokio::sync::{mpsc, Mutex};

fn handle_error(conn: io::Result<LocalSocketStream>) -> Option<LocalSocketStream> {
    match conn {
        Ok(val) => Some(val),
        Err(error) => {
            error!("Incoming connection failed: {}", error);
            None
        }
    }
}

/// One controller at a time: a connection wakes the device, its bytes are
/// commands and hanging up puts it back to sleep.
fn serve_controller(
    listener: LocalSocketListener,
    peer: PeerAddress,
    lifecycle: mpsc::Sender<LifecycleEvent>,
    commands: mpsc::Sender<u8>,
) {
    for conn in listener.incoming().filter_map(handle_error) {
        info!("Controller connected");
        if lifecycle.blocking_send(LifecycleEvent::Wake { peer }).is_err() {
            break;
        }
        match pump_commands(conn, &commands) {
            Ok(forwarded) => info!("Controller disconnected after {} bytes", forwarded),
            Err(e) => warn!("Controller link failed: {}", e),
        }
        if lifecycle.blocking_send(LifecycleEvent::Sleep).is_err() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init()?;

    // Load the config file
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load_or_default(DEFAULT_CONFIG_PATH)?,
    };

    let device = SimDevice::with_output(SimAudioOutput::realtime());
    let storage = Arc::new(FsStorage::new(config.clip_root.clone()));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

    let (controller, lifecycle) = LifecycleController::new(
        config.clone(),
        device.peripherals(),
        storage,
        Arc::new(Mutex::new(command_rx)),
    );
    let mut awake = controller.awake();
    tokio::spawn(controller.run());

    // Make sure a stale socket from an earlier run is gone
    if std::path::Path::new(&config.socket_path).exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = LocalSocketListener::bind(config.socket_path.as_str())?;
    info!("Waiting for the controller on {}", config.socket_path);

    let link_events = lifecycle.clone();
    let peer = config.controller;
    std::thread::spawn(move || serve_controller(listener, peer, link_events, command_tx));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if *awake.borrow() {
        lifecycle.send(LifecycleEvent::Sleep).await?;
        let asleep = awake.wait_for(|awake| !*awake);
        if tokio::time::timeout(Duration::from_secs(30), asleep).await.is_err() {
            warn!("Gave up waiting for the device to sleep");
        }
    }
    std::fs::remove_file(&config.socket_path).ok();

    Ok(())
}
