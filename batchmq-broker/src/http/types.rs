use serde::{Deserialize, Serialize};

use crate::MessageFilter;

/// Envelope of every network adapter response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub error: String,
}

impl<T> ApiResponse<T> {
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            error: String::new(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            data: None,
            error: error.into(),
        }
    }
}

/// Query string of the heap inspection routes.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HeapQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl HeapQuery {
    pub fn for_filter(filter: &MessageFilter) -> Self {
        Self {
            ks: non_empty(&filter.data_keyspace),
            run_id: (filter.run_id != 0).then_some(filter.run_id),
            target_node: non_empty(&filter.target_node),
            from: None,
            count: None,
        }
    }

    pub fn filter(&self) -> MessageFilter {
        MessageFilter::new(
            self.ks.clone().unwrap_or_default(),
            self.run_id.unwrap_or_default(),
            self.target_node.clone().unwrap_or_default(),
        )
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ReturnQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_has_null_data() {
        let json = serde_json::to_string(&ApiResponse::<u64>::error("boom")).unwrap();
        assert_eq!(json, r#"{"data":null,"error":"boom"}"#);
    }

    #[test]
    fn filter_round_trips_through_query() {
        let filter = MessageFilter::new("ks1", 0, "node2");
        let query = HeapQuery::for_filter(&filter);
        assert_eq!(query.run_id, None);
        assert_eq!(query.filter(), filter);
    }
}
