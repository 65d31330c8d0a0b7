use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use async_trait::async_trait;
use batchmq_models::Message;
use log::{debug, error, info, warn};
use tokio::{sync::mpsc, time};

use crate::{
    http::client::BrokerClient,
    processors::ActiveProcessors,
    shutdown::{stop_requested, TaskHalf},
    AcknowledgerCmd, AcknowledgerToken, BrokerError, MqAsyncConsumer,
};

const LISTENER_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);
const LISTENER_NOTHING_TO_CLAIM: Duration = Duration::from_millis(500);
const LISTENER_CONNECTION_ERROR: Duration = Duration::from_millis(2000);
const LISTENER_ALL_BUSY: Duration = Duration::from_millis(100);
const ACKNOWLEDGER_ACK_TIMEOUT: Duration = Duration::from_millis(2000);
const ACKNOWLEDGER_IDLE: Duration = Duration::from_millis(1000);
const STOP_MARGIN: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct HttpConsumerSettings {
    pub max_processors: usize,
    /// Stored by the broker with every message this consumer claims.
    pub claim_comment: String,
}

/// Async consumer over the broker network adapter. Claimed messages are kept
/// alive with heartbeats; the broker reclaims them if the worker dies.
pub struct HttpAsyncConsumer {
    client: BrokerClient,
    settings: Arc<HttpConsumerSettings>,
    active: ActiveProcessors,
    listener: TaskHalf,
    acknowledger: TaskHalf,
}

impl HttpAsyncConsumer {
    pub fn new(client: BrokerClient, settings: HttpConsumerSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            active: ActiveProcessors::default(),
            listener: TaskHalf::new(
                "http listener",
                LISTENER_RECEIVE_TIMEOUT + LISTENER_CONNECTION_ERROR + STOP_MARGIN,
            ),
            acknowledger: TaskHalf::new(
                "http acknowledger",
                ACKNOWLEDGER_IDLE + ACKNOWLEDGER_ACK_TIMEOUT + STOP_MARGIN,
            ),
        }
    }

    pub fn active_processors(&self) -> usize {
        self.active.get()
    }
}

#[async_trait]
impl MqAsyncConsumer for HttpAsyncConsumer {
    fn start(
        &self,
        deliveries: mpsc::Sender<Message>,
        tokens: mpsc::Receiver<AcknowledgerToken>,
    ) -> Result<(), BrokerError> {
        if self.listener.is_running() || self.acknowledger.is_running() {
            return Err(BrokerError::Internal("http consumer already started".into()));
        }

        self.listener.attach(tokio::spawn(run_listener(
            self.client.clone(),
            Arc::clone(&self.settings),
            self.active.clone(),
            self.listener.arm(),
            deliveries,
        )));
        self.acknowledger.attach(tokio::spawn(run_acknowledger(
            self.client.clone(),
            self.active.clone(),
            self.acknowledger.arm(),
            tokens,
        )));
        Ok(())
    }

    async fn stop_listener(&self) -> Result<(), BrokerError> {
        self.listener.stop().await
    }

    async fn stop_acknowledger(&self) -> Result<(), BrokerError> {
        self.acknowledger.stop().await
    }

    fn supports_heartbeat(&self) -> bool {
        true
    }
}

async fn run_listener(
    client: BrokerClient,
    settings: Arc<HttpConsumerSettings>,
    active: ActiveProcessors,
    stop: Arc<AtomicBool>,
    deliveries: mpsc::Sender<Message>,
) {
    info!("http listener started");
    while !stop_requested(&stop) {
        if active.get() >= settings.max_processors {
            time::sleep(LISTENER_ALL_BUSY).await;
            continue;
        }

        match client.claim(&settings.claim_comment, LISTENER_RECEIVE_TIMEOUT).await {
            Ok(Some(msg)) => {
                let id = msg.id;
                debug!("claimed message {} ({})", id, msg.full_batch_id());
                active.increment();
                if deliveries.send(msg).await.is_err() {
                    warn!("delivery channel closed, message {} left for the dead sweep", id);
                    active.decrement();
                    break;
                }
            }
            Ok(None) => time::sleep(LISTENER_NOTHING_TO_CLAIM).await,
            Err(err) => {
                error!("cannot claim: {}", err);
                time::sleep(LISTENER_CONNECTION_ERROR).await;
            }
        }
    }
    info!("http listener exits");
}

async fn run_acknowledger(
    client: BrokerClient,
    active: ActiveProcessors,
    stop: Arc<AtomicBool>,
    mut tokens: mpsc::Receiver<AcknowledgerToken>,
) {
    info!("http acknowledger started");
    loop {
        if stop_requested(&stop) {
            while let Ok(token) = tokens.try_recv() {
                resolve(&client, &active, token).await;
            }
            break;
        }
        match time::timeout(ACKNOWLEDGER_IDLE, tokens.recv()).await {
            Err(_) => {}
            Ok(None) => {
                info!("acknowledger channel closed");
                break;
            }
            Ok(Some(token)) => resolve(&client, &active, token).await,
        }
    }
    info!("http acknowledger exits");
}

async fn resolve(client: &BrokerClient, active: &ActiveProcessors, token: AcknowledgerToken) {
    let id = token.msg_id;
    let result = match token.cmd {
        AcknowledgerCmd::Ack => {
            active.decrement();
            client.ack(id, ACKNOWLEDGER_ACK_TIMEOUT).await
        }
        AcknowledgerCmd::Retry => {
            active.decrement();
            client.return_to_queue(id, None, ACKNOWLEDGER_ACK_TIMEOUT).await
        }
        AcknowledgerCmd::Heartbeat => client.heartbeat(id, ACKNOWLEDGER_ACK_TIMEOUT).await,
    };
    match result {
        Ok(()) => debug!("message {} resolved with {:?}", id, token.cmd),
        Err(err) => error!("cannot {:?} message {}: {}", token.cmd, id, err),
    }
}
