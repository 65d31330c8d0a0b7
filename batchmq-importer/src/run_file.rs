use batchmq_models::{DataBatchPayload, Message};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Deserialize)]
pub struct RunFile {
    pub data_keyspace: String,
    pub run_id: i16,
    pub script_url: String,
    pub script_params_url: String,
    pub nodes: Vec<NodeDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct NodeDefinition {
    pub name: String,
    pub first_token: i64,
    pub last_token: i64,
    pub batches_total: i16,
}

#[derive(Debug, Error)]
pub enum RunFileError {
    #[error("node {node}: batches_total must be positive, got {batches_total}")]
    NoBatches { node: String, batches_total: i16 },
    #[error("node {node}: token range {first}..={last} is empty")]
    EmptyRange { node: String, first: i64, last: i64 },
    #[error("node {node}: {tokens} token(s) cannot fill {batches_total} batches")]
    TooManyBatches {
        node: String,
        tokens: i128,
        batches_total: i16,
    },
}

impl RunFile {
    pub fn from_json(data: &str) -> serde_json::Result<Self> {
        serde_json::from_str(data)
    }

    /// One message per batch of every node, nodes in file order.
    pub fn to_messages(&self) -> Result<Vec<Message>, RunFileError> {
        let mut msgs = Vec::new();
        for node in &self.nodes {
            for (batch_idx, (first_token, last_token)) in split_range(node)?.into_iter().enumerate() {
                msgs.push(Message::data_batch(
                    self.data_keyspace.clone(),
                    self.run_id,
                    node.name.clone(),
                    batch_idx as i16,
                    DataBatchPayload {
                        script_url: self.script_url.clone(),
                        script_params_url: self.script_params_url.clone(),
                        first_token,
                        last_token,
                        batches_total: node.batches_total,
                    },
                ));
            }
        }
        Ok(msgs)
    }
}

/// Contiguous inclusive sub-ranges; the last one absorbs the remainder.
fn split_range(node: &NodeDefinition) -> Result<Vec<(i64, i64)>, RunFileError> {
    if node.batches_total <= 0 {
        return Err(RunFileError::NoBatches {
            node: node.name.clone(),
            batches_total: node.batches_total,
        });
    }
    if node.last_token < node.first_token {
        return Err(RunFileError::EmptyRange {
            node: node.name.clone(),
            first: node.first_token,
            last: node.last_token,
        });
    }

    // i128: a full i64 token ring does not fit in i64
    let first = i128::from(node.first_token);
    let tokens = i128::from(node.last_token) - first + 1;
    let batches = i128::from(node.batches_total);
    if tokens < batches {
        return Err(RunFileError::TooManyBatches {
            node: node.name.clone(),
            tokens,
            batches_total: node.batches_total,
        });
    }

    let size = tokens / batches;
    let ranges = (0..batches)
        .map(|idx| {
            let start = first + idx * size;
            let end = if idx == batches - 1 {
                i128::from(node.last_token)
            } else {
                start + size - 1
            };
            // both bounds lie within [first_token, last_token]
            (start as i64, end as i64)
        })
        .collect();
    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchmq_models::MessagePayload;

    fn node(first_token: i64, last_token: i64, batches_total: i16) -> NodeDefinition {
        NodeDefinition {
            name: "read_orders".into(),
            first_token,
            last_token,
            batches_total,
        }
    }

    #[test]
    fn last_batch_absorbs_the_remainder() {
        assert_eq!(
            split_range(&node(0, 9, 3)).unwrap(),
            vec![(0, 2), (3, 5), (6, 9)]
        );
        assert_eq!(split_range(&node(-5, -5, 1)).unwrap(), vec![(-5, -5)]);
    }

    #[test]
    fn full_token_ring_splits_without_overflow() {
        let ranges = split_range(&node(i64::MIN, i64::MAX, 4)).unwrap();
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].0, i64::MIN);
        assert_eq!(ranges[3].1, i64::MAX);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn invalid_nodes_are_rejected() {
        assert!(matches!(split_range(&node(0, 9, 0)), Err(RunFileError::NoBatches { .. })));
        assert!(matches!(split_range(&node(9, 0, 2)), Err(RunFileError::EmptyRange { .. })));
        assert!(matches!(
            split_range(&node(0, 1, 3)),
            Err(RunFileError::TooManyBatches { tokens: 2, .. })
        ));
    }

    #[test]
    fn run_file_expands_into_messages() {
        let run = RunFile::from_json(
            r#"{
                "data_keyspace": "portfolio",
                "run_id": 2,
                "script_url": "file:///cfg/script.json",
                "script_params_url": "file:///cfg/params.json",
                "nodes": [
                    {"name": "read_txns", "first_token": 0, "last_token": 99, "batches_total": 2},
                    {"name": "read_accounts", "first_token": 0, "last_token": 9, "batches_total": 1}
                ]
            }"#,
        )
        .unwrap();

        let msgs = run.to_messages().unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].full_batch_id(), "portfolio/2/read_txns/1");
        assert_eq!(msgs[2].target_node, "read_accounts");
        let MessagePayload::DataBatch(batch) = &msgs[1].payload;
        assert_eq!((batch.first_token, batch.last_token, batch.batches_total), (50, 99, 2));
    }
}
