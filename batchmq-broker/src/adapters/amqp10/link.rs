use std::{fmt, str::FromStr};

use async_trait::async_trait;
use thiserror::Error;

use crate::BrokerError;

/// Credit requested by the acknowledger link: it never prefetches, it only
/// settles deliveries looked up by id.
pub const ACKNOWLEDGER_CREDIT: i32 = -1;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Connection, session or link failure. The owner closes the link and
    /// reconnects.
    #[error("connectivity error: {0}")]
    Connectivity(String),
    /// Anything else; logged without forcing a reconnect.
    #[error("{0}")]
    Other(String),
}

impl LinkError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LinkError::Connectivity(_))
    }
}

impl From<LinkError> for BrokerError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Connectivity(message) => BrokerError::Connectivity(message),
            LinkError::Other(message) => BrokerError::Internal(message),
        }
    }
}

/// A transfer taken off a receiving link, not yet settled.
#[derive(Debug)]
pub struct Received<D> {
    pub delivery: D,
    pub body: Vec<u8>,
}

/// A receiving link over its own connection and session.
#[async_trait]
pub trait AmqpLink: Send {
    /// Protocol handle needed to settle a delivery later.
    type Delivery: Send + Sync + 'static;

    /// Waits for the next transfer. Callers bound the wait with a timeout.
    async fn receive(&mut self) -> Result<Received<Self::Delivery>, LinkError>;

    async fn accept(&mut self, delivery: &Self::Delivery) -> Result<(), LinkError>;

    async fn release(&mut self, delivery: &Self::Delivery) -> Result<(), LinkError>;

    async fn reject(&mut self, delivery: &Self::Delivery, description: &str)
        -> Result<(), LinkError>;

    /// Closes link, session and connection, in that order.
    async fn close(&mut self) -> Result<(), LinkError>;
}

/// A sending link over its own connection and session.
#[async_trait]
pub trait AmqpSenderLink: Send {
    async fn send(&mut self, body: Vec<u8>) -> Result<(), LinkError>;

    async fn close(&mut self) -> Result<(), LinkError>;
}

/// Opens links against one AMQP 1.0 endpoint.
#[async_trait]
pub trait AmqpConnector: Send + Sync + 'static {
    type Link: AmqpLink + 'static;
    type Sender: AmqpSenderLink + 'static;

    async fn open_receiver(&self, address: &str, credit: i32) -> Result<Self::Link, LinkError>;

    async fn open_sender(&self, address: &str) -> Result<Self::Sender, LinkError>;
}

/// Settlement used for `Retry` tokens. Brokers differ in which outcome
/// triggers their redelivery-delay or dead-letter handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMethod {
    Release,
    Reject,
}

impl FromStr for AckMethod {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "release" => Ok(AckMethod::Release),
            "reject" => Ok(AckMethod::Reject),
            other => Err(BrokerError::InvalidArgument(format!(
                "unknown ack method '{other}'"
            ))),
        }
    }
}

impl fmt::Display for AckMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckMethod::Release => f.write_str("release"),
            AckMethod::Reject => f.write_str("reject"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_method_parses_known_values_only() {
        assert_eq!("release".parse::<AckMethod>().unwrap(), AckMethod::Release);
        assert_eq!("reject".parse::<AckMethod>().unwrap(), AckMethod::Reject);

        let err = "Reject".parse::<AckMethod>().unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: unknown ack method 'Reject'");
    }

    #[test]
    fn connectivity_maps_to_broker_connectivity() {
        let err: BrokerError = LinkError::Connectivity("link detached".into()).into();
        assert!(matches!(err, BrokerError::Connectivity(_)));
        assert!(!LinkError::Other("x".into()).is_connectivity());
    }
}
