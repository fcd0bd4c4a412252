use color_eyre::Result;
use mqtt_ws_viewer::config::ViewerConfig;
use mqtt_ws_viewer::mqtt::ViewerHandle;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let (config, report) = ViewerConfig::load()?;
    setup_logging(&config.logging.level);
    report.log();

    info!(url = %config.link.url, "Starting MQTT WebSocket viewer");
    let handle = ViewerHandle::spawn(config.link)?;
    let mut feed = handle.subscribe();
    let mut status = handle.status_watch();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                info!(status = %state, "Connection status changed");
            }
            received = feed.recv() => match received {
                Ok(record) => info!("{}", record.render()),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Display fell behind, some messages not shown")
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stats = handle.stats().await;
    info!(
        received = stats.messages_received,
        sent = stats.messages_sent,
        dropped = stats.frames_dropped,
        "Session finished"
    );
    handle.shutdown().await?;
    Ok(())
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
