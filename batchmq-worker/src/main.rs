mod config;

use std::sync::Arc;

use batchmq_broker::{
    MqAsyncConsumer,
    http::{
        client::BrokerClient,
        consumer::{HttpAsyncConsumer, HttpConsumerSettings},
    },
};
use batchmq_models::errors::{RuntimeError, SendableError};
use batchmq_utilities::startup;
use batchmq_worker::{LoggingProcessor, WorkerSettings, run_worker};
use config::{Config, Transport, parse_config};
use log::info;

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    startup::startup("BatchMQ Worker")?;

    let config = parse_config()?;
    let consumer = build_consumer(&config)?;

    let settings = WorkerSettings {
        max_processors: config.max_processors,
        heartbeat_interval: config.heartbeat_interval,
    };
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Stopping worker...");
        }
    };

    run_worker(consumer, Arc::new(LoggingProcessor), settings, shutdown)
        .await
        .map_err(|err| RuntimeError::boxed("worker.shutdown", err.to_string()))
}

fn build_consumer(config: &Config) -> Result<Arc<dyn MqAsyncConsumer>, SendableError> {
    match &config.transport {
        Transport::Http { broker_endpoint } => {
            info!("Worker {} consuming from {}", config.client_name, broker_endpoint);
            let client = BrokerClient::from_endpoint(broker_endpoint).map_err(|err| {
                RuntimeError::boxed("worker.broker.invalid_endpoint", err.to_string())
            })?;
            Ok(Arc::new(HttpAsyncConsumer::new(
                client,
                HttpConsumerSettings {
                    max_processors: config.max_processors,
                    claim_comment: config.client_name.clone(),
                },
            )))
        }
        Transport::Amqp10 { .. } => amqp10_consumer(config),
    }
}

#[cfg(feature = "amqp10")]
fn amqp10_consumer(config: &Config) -> Result<Arc<dyn MqAsyncConsumer>, SendableError> {
    use batchmq_broker::adapters::amqp10::{Amqp10AsyncConsumer, Amqp10Settings, Fe2o3Connector};

    let Transport::Amqp10 {
        url,
        address,
        ack_method,
        min_credit_window,
    } = &config.transport
    else {
        return Err(RuntimeError::boxed(
            "worker.config.transport",
            "amqp10 consumer requested without amqp settings",
        ));
    };

    info!(
        "Worker {} consuming from {} address {}, retries by {}",
        config.client_name, url, address, ack_method
    );
    let settings = Amqp10Settings {
        min_credit_window: *min_credit_window,
        client_name: config.client_name.clone(),
        ..Amqp10Settings::new(address.clone(), *ack_method, config.max_processors)
    };
    let connector = Fe2o3Connector::new(url.clone(), config.client_name.clone());
    Ok(Arc::new(Amqp10AsyncConsumer::new(connector, settings)))
}

#[cfg(not(feature = "amqp10"))]
fn amqp10_consumer(_config: &Config) -> Result<Arc<dyn MqAsyncConsumer>, SendableError> {
    Err(RuntimeError::boxed(
        "worker.config.amqp10_disabled",
        "--amqp-url needs a worker built with the amqp10 feature",
    ))
}
