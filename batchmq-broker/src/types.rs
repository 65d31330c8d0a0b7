use std::{fmt, str::FromStr};

use batchmq_models::Message;
use serde::{Deserialize, Serialize};

use crate::BrokerError;

/// Selects one of the broker's two containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeapType {
    /// Pending queue.
    Q,
    /// In-flight (claimed) messages.
    Wip,
}

impl FromStr for HeapType {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "q" => Ok(HeapType::Q),
            "wip" => Ok(HeapType::Wip),
            other => Err(BrokerError::InvalidArgument(format!(
                "invalid heap type {other}"
            ))),
        }
    }
}

impl fmt::Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapType::Q => f.write_str("q"),
            HeapType::Wip => f.write_str("wip"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRead {
    Head,
    Tail,
    Filter,
}

impl FromStr for QueueRead {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "head" => Ok(QueueRead::Head),
            "tail" => Ok(QueueRead::Tail),
            "filter" => Ok(QueueRead::Filter),
            other => Err(BrokerError::InvalidArgument(format!(
                "invalid head/tail {other}"
            ))),
        }
    }
}

/// Equality filter over the routing attributes. Empty strings and a zero
/// run id match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default, rename = "ks")]
    pub data_keyspace: String,
    #[serde(default)]
    pub run_id: i16,
    #[serde(default)]
    pub target_node: String,
}

impl MessageFilter {
    pub fn new(data_keyspace: impl Into<String>, run_id: i16, target_node: impl Into<String>) -> Self {
        Self {
            data_keyspace: data_keyspace.into(),
            run_id,
            target_node: target_node.into(),
        }
    }

    pub fn matches(&self, msg: &Message) -> bool {
        (self.data_keyspace.is_empty() || self.data_keyspace == msg.data_keyspace)
            && (self.run_id == 0 || self.run_id == msg.run_id)
            && (self.target_node.is_empty() || self.target_node == msg.target_node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcknowledgerCmd {
    Ack,
    Retry,
    Heartbeat,
}

/// Posted by a processing task to resolve a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcknowledgerToken {
    pub msg_id: u64,
    pub cmd: AcknowledgerCmd,
}

impl AcknowledgerToken {
    pub fn ack(msg_id: u64) -> Self {
        Self {
            msg_id,
            cmd: AcknowledgerCmd::Ack,
        }
    }

    pub fn retry(msg_id: u64) -> Self {
        Self {
            msg_id,
            cmd: AcknowledgerCmd::Retry,
        }
    }

    pub fn heartbeat(msg_id: u64) -> Self {
        Self {
            msg_id,
            cmd: AcknowledgerCmd::Heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchmq_models::DataBatchPayload;

    fn message(ks: &str, run_id: i16, node: &str) -> Message {
        Message::data_batch(
            ks,
            run_id,
            node,
            0,
            DataBatchPayload {
                script_url: String::new(),
                script_params_url: String::new(),
                first_token: 0,
                last_token: 0,
                batches_total: 1,
            },
        )
    }

    #[test]
    fn wip_parses_to_wip() {
        assert_eq!("wip".parse::<HeapType>().unwrap(), HeapType::Wip);
        assert_eq!("q".parse::<HeapType>().unwrap(), HeapType::Q);
        assert!("queue".parse::<HeapType>().is_err());
    }

    #[test]
    fn empty_filter_is_a_wildcard() {
        let filter = MessageFilter::default();
        assert!(filter.matches(&message("ks1", 1, "a")));
        assert!(filter.matches(&message("ks2", 7, "b")));
    }

    #[test]
    fn filter_fields_combine() {
        let filter = MessageFilter::new("ks1", 2, "");
        assert!(filter.matches(&message("ks1", 2, "any")));
        assert!(!filter.matches(&message("ks1", 1, "any")));
        assert!(!filter.matches(&message("ks2", 2, "any")));
    }
}
