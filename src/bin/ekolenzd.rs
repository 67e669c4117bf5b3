//! ekolenzd - live detection loop daemon
//!
//! This daemon:
//! 1. Loads configuration (EKOLENZ_CONFIG + env overrides)
//! 2. Opens the camera and loads the inference engine
//! 3. Runs the detection loop as a focused screen until Ctrl-C
//! 4. Logs loop health every few seconds

use anyhow::{anyhow, Result};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use ekolenz_detect::{FanoutSink, LatestBatch, LogSink, LoopConfig, ScreenSession};

const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = LoopConfig::load()?;
    log::info!(
        "ekolenzd starting: camera={} engine={:?} min_interval={}ms",
        config.camera_url,
        config.engine.kind,
        config.loop_settings.min_interval.as_millis()
    );

    let latest = LatestBatch::new();
    let sink = FanoutSink::new()
        .with(Arc::new(latest.clone()))
        .with(Arc::new(LogSink));
    let controller = config.build_loop(Arc::new(sink))?;

    let mut session = ScreenSession::new(controller);
    session.on_focus()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("ekolenzd running. waiting for shutdown signal (Ctrl-C)...");
    loop {
        match rx.recv_timeout(HEALTH_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(stats) = session.stats() {
                    let on_display = latest
                        .latest()
                        .map(|batch| batch.len())
                        .unwrap_or_default();
                    log::info!(
                        "health: completed={} throttled={} failed={} on_display={}",
                        stats.cycles_completed,
                        stats.cycles_throttled,
                        stats.cycles_failed,
                        on_display
                    );
                }
                if !session.handle().map(|h| h.is_running()).unwrap_or(false) {
                    log::error!("detection loop exited unexpectedly");
                    break;
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping detection loop...");
    session.teardown()?;
    Ok(())
}
