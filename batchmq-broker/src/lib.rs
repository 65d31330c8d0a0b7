pub mod adapters;
pub mod config;
mod errors;
pub mod http;
pub mod in_memory;
mod processors;
mod shutdown;
mod types;

pub use errors::BrokerError;
pub use types::{AcknowledgerCmd, AcknowledgerToken, HeapType, MessageFilter, QueueRead};

use async_trait::async_trait;
use batchmq_models::Message;
use tokio::sync::mpsc;

/// Capability interface of a message producer.
#[async_trait]
pub trait MqProducer: Send {
    async fn open(&mut self) -> Result<(), BrokerError>;

    async fn send(&mut self, msg: &Message) -> Result<(), BrokerError>;

    /// Only valid when [`MqProducer::supports_send_bulk`] is true.
    async fn send_bulk(&mut self, msgs: &[Message]) -> Result<(), BrokerError>;

    async fn close(&mut self) -> Result<(), BrokerError>;

    fn supports_send_bulk(&self) -> bool;
}

/// Capability interface of an asynchronous consumer.
///
/// The consumer owns the delivery sender and the token receiver once
/// started. Deliveries end (`recv()` yields `None`) when the listener half
/// has stopped; the acknowledger half keeps resolving tokens until
/// [`MqAsyncConsumer::stop_acknowledger`] or until every token sender is
/// dropped.
#[async_trait]
pub trait MqAsyncConsumer: Send + Sync {
    /// Spawns the listener and acknowledger tasks and returns immediately.
    fn start(
        &self,
        deliveries: mpsc::Sender<Message>,
        tokens: mpsc::Receiver<AcknowledgerToken>,
    ) -> Result<(), BrokerError>;

    async fn stop_listener(&self) -> Result<(), BrokerError>;

    async fn stop_acknowledger(&self) -> Result<(), BrokerError>;

    fn supports_heartbeat(&self) -> bool;
}

/// Sends `msgs` in one call when the producer can, one by one otherwise.
pub async fn send_all<P>(producer: &mut P, msgs: &[Message]) -> Result<(), BrokerError>
where
    P: MqProducer + ?Sized,
{
    if msgs.is_empty() {
        return Ok(());
    }
    if producer.supports_send_bulk() {
        return producer.send_bulk(msgs).await;
    }
    for msg in msgs {
        producer.send(msg).await?;
    }
    Ok(())
}
