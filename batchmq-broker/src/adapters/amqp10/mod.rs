//! AMQP 1.0 adapter: split consumer, producer and the link seam they are
//! written against. The `amqp10` feature adds links over a real peer.

mod consumer;
#[cfg(feature = "amqp10")]
mod fe2o3;
mod link;
#[cfg(any(test, feature = "test-util"))]
mod memory;
mod producer;

pub use consumer::{Amqp10AsyncConsumer, Amqp10Settings, Amqp10Timeouts};
#[cfg(feature = "amqp10")]
pub use fe2o3::{Fe2o3Connector, Fe2o3Delivery, Fe2o3Receiver, Fe2o3Sender};
pub use link::{
    AckMethod, AmqpConnector, AmqpLink, AmqpSenderLink, LinkError, Received, ACKNOWLEDGER_CREDIT,
};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryDelivery, MemoryEndpoint, MemoryReceiver, MemorySender};
pub use producer::Amqp10Producer;
