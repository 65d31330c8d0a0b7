use std::{future::Future, sync::Arc, time::Duration};

use batchmq_broker::{AcknowledgerToken, BrokerError, MqAsyncConsumer};
use batchmq_models::Message;
use log::{debug, error, info, warn};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinSet,
    time,
};

use crate::processor::{BatchOutcome, BatchProcessor};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub max_processors: usize,
    /// Only used when the consumer supports heartbeats.
    pub heartbeat_interval: Duration,
}

/// Runs the consumer and a bounded pool of processing tasks until `shutdown`
/// resolves, then stops in the order that keeps both channels safe:
/// listener, delivery drain, processing tasks, token senders, acknowledger.
pub async fn run_worker<F>(
    consumer: Arc<dyn MqAsyncConsumer>,
    processor: Arc<dyn BatchProcessor>,
    settings: WorkerSettings,
    shutdown: F,
) -> Result<(), BrokerError>
where
    F: Future<Output = ()> + Send,
{
    let max_processors = settings.max_processors.max(1);
    let heartbeat = consumer
        .supports_heartbeat()
        .then_some(settings.heartbeat_interval);

    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(max_processors);
    let (ack_tx, ack_rx) = mpsc::channel::<AcknowledgerToken>(max_processors);
    consumer.start(msg_tx, ack_rx)?;
    info!(
        "worker started with {} processor(s), heartbeat {:?}",
        max_processors, heartbeat
    );

    let permits = Arc::new(Semaphore::new(max_processors));
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker shutting down");
                break;
            }
            delivered = msg_rx.recv() => match delivered {
                Some(msg) => {
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let processor = Arc::clone(&processor);
                    let acks = ack_tx.clone();
                    tasks.spawn(async move {
                        process_message(msg, processor, acks, heartbeat).await;
                        drop(permit);
                    });
                }
                None => {
                    warn!("delivery channel closed by the consumer");
                    break;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(err) = joined {
                    error!("processing task failed: {}", err);
                }
            }
        }
    }

    match consumer.stop_listener().await {
        Ok(()) => {
            while let Some(msg) = msg_rx.recv().await {
                retry_undelivered(&ack_tx, msg).await;
            }
        }
        Err(err) => {
            error!("cannot stop listener gracefully: {}", err);
            while let Ok(msg) = msg_rx.try_recv() {
                retry_undelivered(&ack_tx, msg).await;
            }
        }
    }
    drop(msg_rx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            error!("processing task failed: {}", err);
        }
    }
    drop(ack_tx);

    consumer.stop_acknowledger().await.map_err(|err| {
        error!("cannot stop acknowledger gracefully: {}", err);
        err
    })?;
    info!("worker stopped");
    Ok(())
}

async fn retry_undelivered(acks: &mpsc::Sender<AcknowledgerToken>, msg: Message) {
    debug!("message {} not started before shutdown, retrying it", msg.id);
    if acks.send(AcknowledgerToken::retry(msg.id)).await.is_err() {
        error!("cannot retry message {}, acknowledger channel closed", msg.id);
    }
}

/// Processes one message and posts exactly one `Ack` or `Retry` for it,
/// preceded by heartbeats while the processor runs.
async fn process_message(
    msg: Message,
    processor: Arc<dyn BatchProcessor>,
    acks: mpsc::Sender<AcknowledgerToken>,
    heartbeat: Option<Duration>,
) {
    let id = msg.id;
    let batch_id = msg.full_batch_id();
    // a panicking processor must still resolve its message
    let mut work = tokio::spawn(async move { processor.process(&msg).await });

    let joined = match heartbeat {
        Some(every) => {
            let mut ticker = time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    joined = &mut work => break joined,
                    _ = ticker.tick() => {
                        if acks.send(AcknowledgerToken::heartbeat(id)).await.is_err() {
                            warn!("cannot heartbeat message {}, acknowledger channel closed", id);
                        }
                    }
                }
            }
        }
        None => work.await,
    };

    let token = match joined {
        Ok(Ok(BatchOutcome::Success)) => AcknowledgerToken::ack(id),
        Ok(Ok(BatchOutcome::Retry)) => {
            info!("batch {} asked for a retry", batch_id);
            AcknowledgerToken::retry(id)
        }
        Ok(Err(err)) => {
            error!("batch {} failed, will retry: {}", batch_id, err);
            AcknowledgerToken::retry(id)
        }
        Err(err) => {
            error!("batch {} panicked, will retry: {}", batch_id, err);
            AcknowledgerToken::retry(id)
        }
    };
    if acks.send(token).await.is_err() {
        error!("cannot resolve message {}, acknowledger channel closed", id);
    }
}
