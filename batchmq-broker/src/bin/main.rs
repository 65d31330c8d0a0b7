use std::time::Duration;

use batchmq_broker::{config::parse_config, http::server::run_server, in_memory::MessageBroker};
use batchmq_models::errors::{RuntimeError, SendableError};
use batchmq_utilities::startup;
use log::{info, warn};
use tokio::sync::watch;

const DEAD_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    startup::startup("BatchMQ Broker")?;
    let config = parse_config();

    let broker = MessageBroker::new();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let sweeper = {
        let broker = broker.clone();
        let dead_timeout = config.dead_after_no_heartbeat_timeout;
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEAD_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let returned = broker.return_dead(dead_timeout);
                        if !returned.is_empty() {
                            warn!("returned dead messages to the queue: {:?}", returned);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Stopping broker...");
        }
        let _ = shutdown_tx.send(true);
    });

    let shutdown = async move {
        let _ = shutdown_rx.changed().await;
    };
    run_server(config.addr, broker, config.server, shutdown)
        .await
        .map_err(|err| RuntimeError::boxed("broker.server", err.to_string()))?;

    let _ = sweeper.await;
    info!("Broker stopped");
    Ok(())
}
