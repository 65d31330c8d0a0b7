use std::time::Duration;

use async_trait::async_trait;
use batchmq_models::Message;
use log::{error, info};
use tokio::time;
use uuid::Uuid;

use super::link::{AmqpConnector, AmqpSenderLink};
use crate::{in_memory::now_millis, BrokerError, MqProducer};

const PRODUCER_OPEN_TIMEOUT: Duration = Duration::from_millis(2000);
const PRODUCER_SEND_TIMEOUT: Duration = Duration::from_millis(2000);
const PRODUCER_CLOSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Sends messages one transfer at a time. There is no broker to assign ids,
/// so messages without one get a random non-zero id and a timestamp.
pub struct Amqp10Producer<C: AmqpConnector> {
    connector: C,
    address: String,
    sender: Option<C::Sender>,
}

impl<C: AmqpConnector> Amqp10Producer<C> {
    pub fn new(connector: C, address: impl Into<String>) -> Self {
        Self {
            connector,
            address: address.into(),
            sender: None,
        }
    }
}

fn random_message_id() -> u64 {
    loop {
        let bytes = Uuid::new_v4().into_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let id = u64::from_be_bytes(head);
        if id != 0 {
            return id;
        }
    }
}

#[async_trait]
impl<C: AmqpConnector> MqProducer for Amqp10Producer<C> {
    async fn open(&mut self) -> Result<(), BrokerError> {
        if self.sender.is_some() {
            return Ok(());
        }
        let sender = time::timeout(PRODUCER_OPEN_TIMEOUT, self.connector.open_sender(&self.address))
            .await
            .map_err(|_| BrokerError::Connectivity(format!("cannot open sender to {}, timed out", self.address)))??;
        info!("amqp10 producer connected to {}", self.address);
        self.sender = Some(sender);
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> Result<(), BrokerError> {
        let Some(sender) = self.sender.as_mut() else {
            return Err(BrokerError::Connectivity("cannot send, producer is not open".into()));
        };

        let mut msg = msg.clone();
        if msg.id == 0 {
            msg.id = random_message_id();
        }
        if msg.ts == 0 {
            msg.ts = now_millis();
        }
        let body = serde_json::to_vec(&msg)
            .map_err(|err| BrokerError::Internal(format!("cannot serialize message: {err}")))?;

        time::timeout(PRODUCER_SEND_TIMEOUT, sender.send(body))
            .await
            .map_err(|_| BrokerError::Connectivity("cannot send, timed out".into()))??;
        Ok(())
    }

    async fn send_bulk(&mut self, _msgs: &[Message]) -> Result<(), BrokerError> {
        Err(BrokerError::NotSupported("send_bulk"))
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        let Some(mut sender) = self.sender.take() else {
            return Ok(());
        };
        match time::timeout(PRODUCER_CLOSE_TIMEOUT, sender.close()).await {
            Ok(result) => result.map_err(BrokerError::from),
            Err(_) => {
                error!("cannot properly close amqp10 producer, timed out");
                Err(BrokerError::Connectivity("cannot close sender, timed out".into()))
            }
        }
    }

    fn supports_send_bulk(&self) -> bool {
        false
    }
}
