//! Standalone device runtime.
//!
//! Runs the router against the configured stores and logs every outbound
//! packet instead of publishing it; a transport worker is expected to take
//! the external queue's place in a real deployment.

use clap::Parser;
use devsync::config::{Session, load_config};
use devsync::protocol::{Event, Outbound};
use devsync::router::Router;
use devsync::utils::logging::{self, ReportLayer, parse_level};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

const JOIN_DEADLINE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "devsync")]
struct Args {
    /// System config file (YAML); `DEVSYNC__*` variables override it
    #[arg(long, default_value = "conf/system.yml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let settings = load_config(&args.config)?;
    let (session, queues) = Session::bootstrap(&settings)?;

    let report = settings
        .logging
        .external
        .as_deref()
        .map(|level| ReportLayer::new(parse_level(level), session.internal.clone()));
    logging::init_with_report(settings.logging.effective_level(), report);
    info!(uid = %session.uid, publish = %session.publish, "session ready");

    let mut router = Router::new(session.clone(), queues.internal).start()?;
    session.internal.send(Event::device("reload", None))?;

    let mut external = queues.external;
    let mut device_state = queues.device_state;
    let mut ticker = tokio::time::interval(session.poll_interval);
    let mut exiting = false;

    loop {
        tokio::select! {
            item = external.recv() => match item {
                Some(Outbound::Publish(packet)) => match packet.encode() {
                    Ok((topic, body)) => info!(%topic, %body, "outbound packet"),
                    Err(e) => warn!(error = %e, "cannot encode packet"),
                },
                Some(Outbound::Shutdown(_)) | None => break,
            },
            Some(state) = device_state.recv() => {
                debug!(keys = state.len(), "device state updated");
            }
            _ = tokio::signal::ctrl_c(), if !exiting => {
                info!("Shutdown signal received. Exiting gracefully.");
                exiting = true;
                if session.internal.send(Event::exit()).is_err() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if router.is_finished() {
                    warn!("router stopped on its own");
                    break;
                }
            }
        }
    }

    let joined = tokio::task::spawn_blocking(move || router.join(JOIN_DEADLINE)).await?;
    if let Err(e) = joined {
        warn!(error = %e, "router thread leaked");
    }

    Ok(())
}
