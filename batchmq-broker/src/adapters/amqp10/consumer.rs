use std::collections::HashMap;
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use async_trait::async_trait;
use batchmq_models::Message;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use tokio::{sync::mpsc, time};

use super::link::{AckMethod, AmqpConnector, AmqpLink, Received, ACKNOWLEDGER_CREDIT};
use crate::{
    processors::ActiveProcessors,
    shutdown::{stop_requested, TaskHalf},
    AcknowledgerCmd, AcknowledgerToken, BrokerError, MqAsyncConsumer,
};

const LISTENER_OPEN_TIMEOUT_MS: u64 = 2000;
const LISTENER_RECEIVE_TIMEOUT_MS: u64 = 2000;
const LISTENER_ACK_TIMEOUT_MS: u64 = 2000;
const LISTENER_CLOSE_TIMEOUT_MS: u64 = 2000;
const LISTENER_RECONNECT_TIMEOUT_MS: u64 = 2000;
const LISTENER_DRAIN_TIMEOUT_MS: u64 = 5000;

const ACKNOWLEDGER_OPEN_TIMEOUT_MS: u64 = 2000;
const ACKNOWLEDGER_ACK_TIMEOUT_MS: u64 = 2000;
const ACKNOWLEDGER_CLOSE_TIMEOUT_MS: u64 = 2000;
const ACKNOWLEDGER_RECONNECT_TIMEOUT_MS: u64 = 2000;

const FULL_LISTENER_POLL_MS: u64 = 50;
const ACKNOWLEDGER_IDLE_MS: u64 = 1000;
const STOP_MARGIN_MS: u64 = 1000;

/// Network deadlines of both consumer halves.
#[derive(Debug, Clone)]
pub struct Amqp10Timeouts {
    pub listener_open: Duration,
    pub listener_receive: Duration,
    pub listener_ack: Duration,
    pub listener_close: Duration,
    pub listener_reconnect: Duration,
    pub listener_drain: Duration,
    pub acknowledger_open: Duration,
    pub acknowledger_ack: Duration,
    pub acknowledger_close: Duration,
    pub acknowledger_reconnect: Duration,
    /// Poll interval of the backpressure gate.
    pub full_listener_poll: Duration,
    /// How long the idle acknowledger waits before re-checking its stop flag.
    pub acknowledger_idle: Duration,
    pub stop_margin: Duration,
}

impl Default for Amqp10Timeouts {
    fn default() -> Self {
        Self {
            listener_open: Duration::from_millis(LISTENER_OPEN_TIMEOUT_MS),
            listener_receive: Duration::from_millis(LISTENER_RECEIVE_TIMEOUT_MS),
            listener_ack: Duration::from_millis(LISTENER_ACK_TIMEOUT_MS),
            listener_close: Duration::from_millis(LISTENER_CLOSE_TIMEOUT_MS),
            listener_reconnect: Duration::from_millis(LISTENER_RECONNECT_TIMEOUT_MS),
            listener_drain: Duration::from_millis(LISTENER_DRAIN_TIMEOUT_MS),
            acknowledger_open: Duration::from_millis(ACKNOWLEDGER_OPEN_TIMEOUT_MS),
            acknowledger_ack: Duration::from_millis(ACKNOWLEDGER_ACK_TIMEOUT_MS),
            acknowledger_close: Duration::from_millis(ACKNOWLEDGER_CLOSE_TIMEOUT_MS),
            acknowledger_reconnect: Duration::from_millis(ACKNOWLEDGER_RECONNECT_TIMEOUT_MS),
            full_listener_poll: Duration::from_millis(FULL_LISTENER_POLL_MS),
            acknowledger_idle: Duration::from_millis(ACKNOWLEDGER_IDLE_MS),
            stop_margin: Duration::from_millis(STOP_MARGIN_MS),
        }
    }
}

impl Amqp10Timeouts {
    pub fn listener_total(&self) -> Duration {
        self.listener_open
            + self.listener_receive
            + self.listener_ack
            + self.listener_close
            + self.listener_reconnect
            + self.listener_drain
            + self.stop_margin
    }

    pub fn acknowledger_total(&self) -> Duration {
        self.acknowledger_open
            + self.acknowledger_ack
            + self.acknowledger_close
            + self.acknowledger_reconnect
            + self.stop_margin
    }
}

#[derive(Debug, Clone)]
pub struct Amqp10Settings {
    pub address: String,
    pub ack_method: AckMethod,
    pub max_processors: usize,
    /// Lower bound of the listener's link credit.
    pub min_credit_window: u32,
    /// Reported in the description of rejected deliveries.
    pub client_name: String,
    pub timeouts: Amqp10Timeouts,
}

impl Amqp10Settings {
    pub fn new(address: impl Into<String>, ack_method: AckMethod, max_processors: usize) -> Self {
        Self {
            address: address.into(),
            ack_method,
            max_processors,
            min_credit_window: 0,
            client_name: "batchmq-worker".into(),
            timeouts: Amqp10Timeouts::default(),
        }
    }

    /// Never below `max_processors`, otherwise some processors idle.
    pub fn listener_credit(&self) -> i32 {
        let credit = (self.min_credit_window as usize).max(self.max_processors).max(1);
        i32::try_from(credit).unwrap_or(i32::MAX)
    }
}

type InHandling<D> = Arc<RwLock<HashMap<u64, D>>>;
type DeliveryOf<C> = <<C as AmqpConnector>::Link as AmqpLink>::Delivery;

/// AMQP 1.0 consumer split into a listener link that only receives and an
/// acknowledger link that only settles. The halves share nothing but the
/// in-handling map, keyed by message id.
///
/// Shutdown, in order: `stop_listener`, drain the delivery channel, wait for
/// every processing task, drop the token senders, `stop_acknowledger`.
pub struct Amqp10AsyncConsumer<C: AmqpConnector> {
    connector: Arc<C>,
    settings: Arc<Amqp10Settings>,
    in_handling: InHandling<DeliveryOf<C>>,
    active: ActiveProcessors,
    listener: TaskHalf,
    acknowledger: TaskHalf,
}

impl<C: AmqpConnector> Amqp10AsyncConsumer<C> {
    pub fn new(connector: C, settings: Amqp10Settings) -> Self {
        let listener = TaskHalf::new("amqp10 listener", settings.timeouts.listener_total());
        let acknowledger =
            TaskHalf::new("amqp10 acknowledger", settings.timeouts.acknowledger_total());
        Self {
            connector: Arc::new(connector),
            settings: Arc::new(settings),
            in_handling: Arc::new(RwLock::new(HashMap::new())),
            active: ActiveProcessors::default(),
            listener,
            acknowledger,
        }
    }

    /// Deliveries received and not yet settled.
    pub fn messages_in_handling(&self) -> usize {
        self.in_handling.read().len()
    }

    pub fn active_processors(&self) -> usize {
        self.active.get()
    }
}

#[async_trait]
impl<C: AmqpConnector> MqAsyncConsumer for Amqp10AsyncConsumer<C> {
    fn start(
        &self,
        deliveries: mpsc::Sender<Message>,
        tokens: mpsc::Receiver<AcknowledgerToken>,
    ) -> Result<(), BrokerError> {
        if self.listener.is_running() || self.acknowledger.is_running() {
            return Err(BrokerError::Internal("amqp10 consumer already started".into()));
        }

        let listener = ListenerWorker {
            connector: Arc::clone(&self.connector),
            settings: Arc::clone(&self.settings),
            in_handling: Arc::clone(&self.in_handling),
            active: self.active.clone(),
            stop: self.listener.arm(),
            link: None,
        };
        self.listener.attach(tokio::spawn(listener.run(deliveries)));

        let acknowledger = AcknowledgerWorker {
            connector: Arc::clone(&self.connector),
            settings: Arc::clone(&self.settings),
            in_handling: Arc::clone(&self.in_handling),
            active: self.active.clone(),
            stop: self.acknowledger.arm(),
            link: None,
        };
        self.acknowledger.attach(tokio::spawn(acknowledger.run(tokens)));
        Ok(())
    }

    async fn stop_listener(&self) -> Result<(), BrokerError> {
        self.listener.stop().await
    }

    async fn stop_acknowledger(&self) -> Result<(), BrokerError> {
        self.acknowledger.stop().await
    }

    fn supports_heartbeat(&self) -> bool {
        false
    }
}

struct ListenerWorker<C: AmqpConnector> {
    connector: Arc<C>,
    settings: Arc<Amqp10Settings>,
    in_handling: InHandling<DeliveryOf<C>>,
    active: ActiveProcessors,
    stop: Arc<AtomicBool>,
    link: Option<C::Link>,
}

impl<C: AmqpConnector> ListenerWorker<C> {
    async fn run(mut self, deliveries: mpsc::Sender<Message>) {
        let timeouts = self.settings.timeouts.clone();
        let credit = self.settings.listener_credit();
        info!("amqp10 listener started on {}", self.settings.address);

        while !stop_requested(&self.stop) {
            // A message waiting for a free processor is not being worked on,
            // so do not take one until a processor is available.
            if self.active.get() >= self.settings.max_processors {
                time::sleep(timeouts.full_listener_poll).await;
                continue;
            }

            if self.link.is_none() {
                let opened = time::timeout(
                    timeouts.listener_open,
                    self.connector.open_receiver(&self.settings.address, credit),
                )
                .await;
                match opened {
                    Ok(Ok(link)) => {
                        info!(
                            "amqp10 listener connected to {}, credit {}",
                            self.settings.address, credit
                        );
                        self.link = Some(link);
                    }
                    Ok(Err(err)) => {
                        error!(
                            "cannot reconnect to {}, credit {}: {}",
                            self.settings.address, credit, err
                        );
                        time::sleep(timeouts.listener_reconnect).await;
                        continue;
                    }
                    Err(_) => {
                        error!(
                            "cannot reconnect to {}, open timed out",
                            self.settings.address
                        );
                        time::sleep(timeouts.listener_reconnect).await;
                        continue;
                    }
                }
            }

            let Some(link) = self.link.as_mut() else {
                continue;
            };
            let received = time::timeout(timeouts.listener_receive, link.receive()).await;
            match received {
                Err(_) => {}
                Ok(Ok(received)) => {
                    if !self.dispatch(received, &deliveries).await {
                        break;
                    }
                }
                Ok(Err(err)) if err.is_connectivity() => {
                    error!("cannot receive, connectivity error: {}", err);
                    self.close_link("failed receive").await;
                    time::sleep(timeouts.full_listener_poll).await;
                }
                Ok(Err(err)) => {
                    error!("cannot receive, unknown error: {}", err);
                    time::sleep(timeouts.full_listener_poll).await;
                }
            }
        }

        self.close_link("exit").await;
        info!("amqp10 listener exits");
    }

    /// Returns false when the delivery channel is gone.
    async fn dispatch(
        &mut self,
        received: Received<DeliveryOf<C>>,
        deliveries: &mpsc::Sender<Message>,
    ) -> bool {
        let msg = match Message::from_slice(&received.body) {
            Ok(msg) => msg,
            Err(err) => {
                // retrying a payload that cannot be decoded never succeeds
                error!("cannot decode message, will accept it to drop it: {}", err);
                self.accept_poison(&received.delivery).await;
                return true;
            }
        };

        let id = msg.id;
        let in_handling = {
            let mut map = self.in_handling.write();
            if map.insert(id, received.delivery).is_some() {
                warn!("message {} was already in handling, replacing its delivery", id);
            }
            map.len()
        };
        if in_handling > self.settings.max_processors {
            warn!(
                "{} messages in handling, more than max processors {}; check the processor pool size",
                in_handling, self.settings.max_processors
            );
        }

        debug!("delivering message {} ({})", id, msg.full_batch_id());
        self.active.increment();
        if deliveries.send(msg).await.is_err() {
            warn!("delivery channel closed, message {} stays unsettled", id);
            self.in_handling.write().remove(&id);
            self.active.decrement();
            return false;
        }
        true
    }

    async fn accept_poison(&mut self, delivery: &DeliveryOf<C>) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let accepted = time::timeout(self.settings.timeouts.listener_ack, link.accept(delivery)).await;
        match accepted {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_connectivity() => {
                error!("cannot accept undecodable message, will abandon it: {}", err);
                self.close_link("failed accept").await;
            }
            Ok(Err(err)) => error!("cannot accept undecodable message, will abandon it: {}", err),
            Err(_) => error!("cannot accept undecodable message, accept timed out"),
        }
    }

    async fn close_link(&mut self, reason: &str) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        match time::timeout(self.settings.timeouts.listener_close, link.close()).await {
            Ok(Ok(())) => debug!("amqp10 listener link closed on {}", reason),
            Ok(Err(err)) => error!("cannot properly close listener on {}: {}", reason, err),
            Err(_) => error!("cannot properly close listener on {}: timed out", reason),
        }
    }
}

struct AcknowledgerWorker<C: AmqpConnector> {
    connector: Arc<C>,
    settings: Arc<Amqp10Settings>,
    in_handling: InHandling<DeliveryOf<C>>,
    active: ActiveProcessors,
    stop: Arc<AtomicBool>,
    link: Option<C::Link>,
}

impl<C: AmqpConnector> AcknowledgerWorker<C> {
    async fn run(mut self, mut tokens: mpsc::Receiver<AcknowledgerToken>) {
        info!("amqp10 acknowledger started on {}", self.settings.address);
        loop {
            if stop_requested(&self.stop) {
                while let Ok(token) = tokens.try_recv() {
                    self.resolve(token).await;
                }
                break;
            }
            match time::timeout(self.settings.timeouts.acknowledger_idle, tokens.recv()).await {
                Err(_) => {}
                Ok(None) => {
                    info!("acknowledger channel closed");
                    break;
                }
                Ok(Some(token)) => self.resolve(token).await,
            }
        }

        self.close_link("exit").await;
        info!("amqp10 acknowledger exits");
    }

    async fn resolve(&mut self, token: AcknowledgerToken) {
        let id = token.msg_id;
        if token.cmd == AcknowledgerCmd::Heartbeat {
            error!(
                "unexpected heartbeat for message {}, not supported by AMQP message brokers",
                id
            );
            return;
        }

        let delivery = self.in_handling.write().remove(&id);
        let Some(delivery) = delivery else {
            warn!("acknowledger cannot find message {}, already resolved", id);
            return;
        };
        self.active.decrement();

        if !self.ensure_open().await {
            error!(
                "cannot {:?} message {}, acknowledger link is down; the broker will redeliver it",
                token.cmd, id
            );
            return;
        }
        let Some(link) = self.link.as_mut() else {
            return;
        };

        let ack_timeout = self.settings.timeouts.acknowledger_ack;
        let outcome = match (token.cmd, self.settings.ack_method) {
            (AcknowledgerCmd::Retry, AckMethod::Release) => {
                time::timeout(ack_timeout, link.release(&delivery)).await
            }
            (AcknowledgerCmd::Retry, AckMethod::Reject) => {
                let description = format!("{} asked to retry", self.settings.client_name);
                time::timeout(ack_timeout, link.reject(&delivery, &description)).await
            }
            _ => time::timeout(ack_timeout, link.accept(&delivery)).await,
        };

        match outcome {
            Ok(Ok(())) => debug!("message {} resolved with {:?}", id, token.cmd),
            Ok(Err(err)) if err.is_connectivity() => {
                error!("cannot {:?} message {}: {}", token.cmd, id, err);
                self.close_link("failed settlement").await;
            }
            Ok(Err(err)) => error!(
                "cannot {:?} message {}, unknown error, will not reconnect: {}",
                token.cmd, id, err
            ),
            Err(_) => error!("cannot {:?} message {}, timed out", token.cmd, id),
        }
    }

    /// Opens the acknowledger link, retrying at the reconnect interval until
    /// it succeeds or a stop is requested.
    async fn ensure_open(&mut self) -> bool {
        let timeouts = self.settings.timeouts.clone();
        while self.link.is_none() {
            let opened = time::timeout(
                timeouts.acknowledger_open,
                self.connector
                    .open_receiver(&self.settings.address, ACKNOWLEDGER_CREDIT),
            )
            .await;
            match opened {
                Ok(Ok(link)) => {
                    info!("amqp10 acknowledger connected to {}", self.settings.address);
                    self.link = Some(link);
                    return true;
                }
                Ok(Err(err)) => error!("cannot reconnect to {}: {}", self.settings.address, err),
                Err(_) => error!(
                    "cannot reconnect to {}, open timed out",
                    self.settings.address
                ),
            }
            if stop_requested(&self.stop) {
                return false;
            }
            time::sleep(timeouts.acknowledger_reconnect).await;
        }
        true
    }

    async fn close_link(&mut self, reason: &str) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        match time::timeout(self.settings.timeouts.acknowledger_close, link.close()).await {
            Ok(Ok(())) => debug!("amqp10 acknowledger link closed on {}", reason),
            Ok(Err(err)) => error!("cannot properly close acknowledger on {}: {}", reason, err),
            Err(_) => error!("cannot properly close acknowledger on {}: timed out", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::amqp10::MemoryEndpoint;
    use batchmq_models::DataBatchPayload;

    const ADDRESS: &str = "batches";

    fn fast_timeouts() -> Amqp10Timeouts {
        Amqp10Timeouts {
            listener_open: Duration::from_millis(100),
            listener_receive: Duration::from_millis(50),
            listener_ack: Duration::from_millis(100),
            listener_close: Duration::from_millis(100),
            listener_reconnect: Duration::from_millis(30),
            listener_drain: Duration::from_millis(100),
            acknowledger_open: Duration::from_millis(100),
            acknowledger_ack: Duration::from_millis(100),
            acknowledger_close: Duration::from_millis(100),
            acknowledger_reconnect: Duration::from_millis(30),
            full_listener_poll: Duration::from_millis(10),
            acknowledger_idle: Duration::from_millis(30),
            stop_margin: Duration::from_millis(200),
        }
    }

    fn settings(ack_method: AckMethod, max_processors: usize) -> Amqp10Settings {
        let mut settings = Amqp10Settings::new(ADDRESS, ack_method, max_processors);
        settings.client_name = "daemon-7".into();
        settings.timeouts = fast_timeouts();
        settings
    }

    fn body(id: u64, node: &str) -> Vec<u8> {
        let mut msg = Message::data_batch(
            "ks1",
            1,
            node,
            0,
            DataBatchPayload {
                script_url: "s".into(),
                script_params_url: "p".into(),
                first_token: 0,
                last_token: 9,
                batches_total: 1,
            },
        );
        msg.id = id;
        msg.to_json().unwrap().into_bytes()
    }

    async fn eventually(what: &str, cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn recv(rx: &mut mpsc::Receiver<Message>) -> Message {
        time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("delivery channel closed")
    }

    async fn shutdown<C: AmqpConnector>(
        consumer: &Amqp10AsyncConsumer<C>,
        rx: mpsc::Receiver<Message>,
        tx: mpsc::Sender<AcknowledgerToken>,
    ) {
        consumer.stop_listener().await.unwrap();
        drop(rx);
        drop(tx);
        consumer.stop_acknowledger().await.unwrap();
    }

    #[tokio::test]
    async fn delivers_and_accepts() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(11, "a"));
        endpoint.publish(ADDRESS, body(12, "b"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 4));
        let (msg_tx, mut msg_rx) = mpsc::channel(4);
        let (ack_tx, ack_rx) = mpsc::channel(4);
        consumer.start(msg_tx, ack_rx).unwrap();

        let first = recv(&mut msg_rx).await;
        let second = recv(&mut msg_rx).await;
        assert_eq!((first.id, second.id), (11, 12));
        assert_eq!(consumer.messages_in_handling(), 2);
        assert_eq!(consumer.active_processors(), 2);

        ack_tx.send(AcknowledgerToken::ack(11)).await.unwrap();
        ack_tx.send(AcknowledgerToken::ack(12)).await.unwrap();
        eventually("both accepted", || endpoint.accepted().len() == 2).await;
        assert_eq!(consumer.messages_in_handling(), 0);
        assert_eq!(consumer.active_processors(), 0);

        shutdown(&consumer, msg_rx, ack_tx).await;
        assert!(!consumer.supports_heartbeat());
    }

    #[tokio::test]
    async fn undecodable_message_is_accepted_and_not_forwarded() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, b"{not json".to_vec());

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        eventually("poison accepted", || endpoint.accepted().len() == 1).await;
        assert!(msg_rx.try_recv().is_err());
        assert_eq!(consumer.messages_in_handling(), 0);
        assert_eq!(consumer.active_processors(), 0);
        assert_eq!(endpoint.unsettled(), 0);

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn retry_rejects_with_client_description() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(5, "a"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Reject, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        assert_eq!(recv(&mut msg_rx).await.id, 5);
        ack_tx.send(AcknowledgerToken::retry(5)).await.unwrap();

        eventually("rejected", || endpoint.rejected().len() == 1).await;
        assert_eq!(endpoint.rejected()[0].1, "daemon-7 asked to retry");
        assert_eq!(endpoint.released(), 0);

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn retry_releases_for_redelivery() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(5, "a"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        assert_eq!(recv(&mut msg_rx).await.id, 5);
        ack_tx.send(AcknowledgerToken::retry(5)).await.unwrap();

        // released deliveries come back on the listener
        assert_eq!(recv(&mut msg_rx).await.id, 5);
        assert_eq!(endpoint.released(), 1);
        ack_tx.send(AcknowledgerToken::ack(5)).await.unwrap();
        eventually("accepted", || endpoint.accepted().len() == 1).await;

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn listener_waits_for_a_free_processor() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(1, "a"));
        endpoint.publish(ADDRESS, body(2, "a"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 1));
        let (msg_tx, mut msg_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        consumer.start(msg_tx, ack_rx).unwrap();

        assert_eq!(recv(&mut msg_rx).await.id, 1);
        time::sleep(Duration::from_millis(150)).await;
        assert!(msg_rx.try_recv().is_err());
        assert_eq!(endpoint.queued(ADDRESS), 1);

        ack_tx.send(AcknowledgerToken::ack(1)).await.unwrap();
        assert_eq!(recv(&mut msg_rx).await.id, 2);

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn listener_reconnects_after_connectivity_errors() {
        let endpoint = MemoryEndpoint::new();
        endpoint.set_available(false);

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(endpoint.receivers_opened(), 0);

        endpoint.set_available(true);
        eventually("listener connected", || endpoint.receivers_opened() == 1).await;

        endpoint.fail_next_receives(1);
        endpoint.publish(ADDRESS, body(3, "a"));
        assert_eq!(recv(&mut msg_rx).await.id, 3);
        assert!(endpoint.receivers_opened() >= 2);

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn heartbeat_and_duplicate_tokens_settle_nothing() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(8, "a"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        assert_eq!(recv(&mut msg_rx).await.id, 8);
        ack_tx.send(AcknowledgerToken::heartbeat(8)).await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(consumer.messages_in_handling(), 1);
        assert_eq!(endpoint.unsettled(), 1);

        ack_tx.send(AcknowledgerToken::ack(8)).await.unwrap();
        ack_tx.send(AcknowledgerToken::ack(8)).await.unwrap();
        eventually("accepted", || endpoint.accepted().len() == 1).await;
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(endpoint.accepted().len(), 1);
        assert_eq!(consumer.active_processors(), 0);

        shutdown(&consumer, msg_rx, ack_tx).await;
    }

    #[tokio::test]
    async fn tokens_queued_before_stop_are_still_resolved() {
        let endpoint = MemoryEndpoint::new();
        endpoint.publish(ADDRESS, body(1, "a"));
        endpoint.publish(ADDRESS, body(2, "b"));

        let consumer = Amqp10AsyncConsumer::new(endpoint.clone(), settings(AckMethod::Release, 2));
        let (msg_tx, mut msg_rx) = mpsc::channel(2);
        let (ack_tx, ack_rx) = mpsc::channel(2);
        consumer.start(msg_tx, ack_rx).unwrap();

        recv(&mut msg_rx).await;
        recv(&mut msg_rx).await;
        consumer.stop_listener().await.unwrap();
        assert!(msg_rx.recv().await.is_none());

        ack_tx.send(AcknowledgerToken::ack(1)).await.unwrap();
        ack_tx.send(AcknowledgerToken::ack(2)).await.unwrap();
        consumer.stop_acknowledger().await.unwrap();
        assert_eq!(endpoint.accepted().len(), 2);
        drop(ack_tx);
    }

    #[test]
    fn listener_credit_never_below_processors() {
        let mut settings = Amqp10Settings::new(ADDRESS, AckMethod::Release, 8);
        assert_eq!(settings.listener_credit(), 8);
        settings.min_credit_window = 32;
        assert_eq!(settings.listener_credit(), 32);
    }

    #[test]
    fn total_stop_timeouts_sum_every_step() {
        let timeouts = Amqp10Timeouts::default();
        assert_eq!(timeouts.listener_total(), Duration::from_millis(16_000));
        assert_eq!(timeouts.acknowledger_total(), Duration::from_millis(9_000));
    }
}
