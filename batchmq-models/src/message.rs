use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Unit of work moved through the queue.
///
/// Timestamps are epoch milliseconds. `id`, `ts`, `deliver_after` and
/// `heartbeat` are owned by the broker once the message is enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub deliver_after: i64,
    #[serde(default)]
    pub heartbeat: i64,
    #[serde(default)]
    pub claim_comment: String,
    pub data_keyspace: String,
    pub run_id: i16,
    pub target_node: String,
    pub batch_idx: i16,
    #[serde(flatten)]
    pub payload: MessagePayload,
}

/// Payload variants, discriminated on the wire by `payload_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload_type", rename_all = "snake_case")]
pub enum MessagePayload {
    DataBatch(DataBatchPayload),
}

/// Describes one batch of a node's token range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBatchPayload {
    pub script_url: String,
    pub script_params_url: String,
    pub first_token: i64,
    pub last_token: i64,
    pub batches_total: i16,
}

impl Message {
    pub fn data_batch(
        data_keyspace: impl Into<String>,
        run_id: i16,
        target_node: impl Into<String>,
        batch_idx: i16,
        payload: DataBatchPayload,
    ) -> Self {
        Self {
            id: 0,
            ts: 0,
            deliver_after: 0,
            heartbeat: 0,
            claim_comment: String::new(),
            data_keyspace: data_keyspace.into(),
            run_id,
            target_node: target_node.into(),
            batch_idx,
            payload: MessagePayload::DataBatch(payload),
        }
    }

    pub fn full_node_id(&self) -> String {
        format!("{}/{}/{}", self.data_keyspace, self.run_id, self.target_node)
    }

    pub fn full_batch_id(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.data_keyspace, self.run_id, self.target_node, self.batch_idx
        )
    }

    /// True when both messages belong to the same (keyspace, run, node) group.
    pub fn same_node(&self, other: &Message) -> bool {
        self.data_keyspace == other.data_keyspace
            && self.run_id == other.run_id
            && self.target_node == other.target_node
    }

    /// Delivery order: earliest `deliver_after` first, enqueue order among ties.
    pub fn delivery_order(&self, other: &Message) -> Ordering {
        self.deliver_after
            .cmp(&other.deliver_after)
            .then_with(|| self.id.cmp(&other.id))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(node: &str, idx: i16) -> Message {
        Message::data_batch(
            "ks1",
            3,
            node,
            idx,
            DataBatchPayload {
                script_url: "file:///scripts/script.json".into(),
                script_params_url: "file:///scripts/params.json".into(),
                first_token: -100,
                last_token: 100,
                batches_total: 10,
            },
        )
    }

    #[test]
    fn payload_fields_are_flattened_next_to_the_envelope() {
        let msg = batch("read_orders", 4);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["payload_type"], "data_batch");
        assert_eq!(value["target_node"], "read_orders");
        assert_eq!(value["first_token"], -100);
        assert_eq!(value["batches_total"], 10);
        assert_eq!(value["claim_comment"], "");
    }

    #[test]
    fn missing_payload_tag_is_rejected() {
        let raw = r#"{"data_keyspace":"ks1","run_id":1,"target_node":"n","batch_idx":0,
            "script_url":"s","script_params_url":"p","first_token":0,"last_token":1,"batches_total":1}"#;
        assert!(Message::from_json(raw).is_err());
    }

    #[test]
    fn broker_fields_default_when_absent() {
        let raw = r#"{"data_keyspace":"ks1","run_id":1,"target_node":"n","batch_idx":2,
            "payload_type":"data_batch","script_url":"s","script_params_url":"p",
            "first_token":0,"last_token":1,"batches_total":3}"#;
        let msg = Message::from_json(raw).unwrap();
        assert_eq!(msg.id, 0);
        assert_eq!(msg.deliver_after, 0);
        assert_eq!(msg.full_batch_id(), "ks1/1/n/2");
    }

    #[test]
    fn delivery_order_breaks_ties_by_id() {
        let mut a = batch("n", 0);
        let mut b = batch("n", 1);
        a.id = 15;
        b.id = 14;
        a.deliver_after = 1_000;
        b.deliver_after = 1_000;
        assert_eq!(b.delivery_order(&a), Ordering::Less);

        b.deliver_after = 1_001;
        assert_eq!(a.delivery_order(&b), Ordering::Less);
    }

    #[test]
    fn same_node_ignores_batch_index() {
        assert!(batch("n", 0).same_node(&batch("n", 9)));
        assert!(!batch("n", 0).same_node(&batch("m", 0)));
    }
}
