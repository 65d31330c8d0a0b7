mod config;
mod run_file;

use std::path::Path;

use batchmq_broker::{MqProducer, http::client::HttpProducer, send_all};
use batchmq_models::errors::{RuntimeError, SendableError};
use batchmq_utilities::startup;
use clap::Parser;
use config::Config;
use log::{error, info};
use run_file::RunFile;

#[tokio::main]
async fn main() -> Result<(), SendableError> {
    let config = Config::parse();
    startup::startup("BatchMQ Importer")?;

    let run = load_run(Path::new(&config.run_file)).await?;
    let msgs = run
        .to_messages()
        .map_err(|err| RuntimeError::boxed("importer.run_file.invalid", err.to_string()))?;
    info!(
        "Run {}/{}: {} node(s), {} batch message(s)",
        run.data_keyspace,
        run.run_id,
        run.nodes.len(),
        msgs.len()
    );

    let mut producer = HttpProducer::new(config.broker_endpoint.clone());
    producer
        .open()
        .await
        .map_err(|err| RuntimeError::boxed("importer.broker.open", err.to_string()))?;
    let sent = send_all(&mut producer, &msgs).await;
    if let Err(err) = producer.close().await {
        error!("Failed to close producer: {}", err);
    }
    sent.map_err(|err| RuntimeError::boxed("importer.broker.send", err.to_string()))?;

    info!("Enqueued {} message(s) to {}", msgs.len(), config.broker_endpoint);
    Ok(())
}

async fn load_run(path: &Path) -> Result<RunFile, SendableError> {
    let data = tokio::fs::read_to_string(path).await.map_err(|err| {
        RuntimeError::boxed(
            "importer.run_file.read",
            format!("cannot read {}: {}", path.display(), err),
        )
    })?;
    RunFile::from_json(&data)
        .map_err(|err| RuntimeError::boxed("importer.run_file.parse", err.to_string()))
}
