use std::time::Duration;

use async_trait::async_trait;
use batchmq_models::Message;
use log::debug;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;

use crate::{
    http::types::{ApiResponse, HeapQuery, ReturnQuery},
    BrokerError, HeapType, MessageFilter, MqProducer, QueueRead,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
const PRODUCER_SEND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Typed client of the broker network adapter.
#[derive(Clone)]
pub struct BrokerClient {
    client: Client,
    base_url: Url,
}

impl BrokerClient {
    pub fn new(base_url: Url, client: Client) -> Self {
        Self { client, base_url }
    }

    pub fn from_endpoint(endpoint: &str) -> Result<Self, BrokerError> {
        let mut base_url = Url::parse(endpoint)
            .map_err(|err| BrokerError::InvalidArgument(format!("invalid endpoint {endpoint}: {err}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .build()
            .map_err(|err| BrokerError::Internal(err.to_string()))?;
        Ok(Self::new(base_url, client))
    }

    fn endpoint(&self, path: &str) -> Result<Url, BrokerError> {
        self.base_url
            .join(path)
            .map_err(|err| BrokerError::Internal(err.to_string()))
    }

    pub async fn enqueue_bulk(&self, msgs: &[Message], timeout: Duration) -> Result<Vec<u64>, BrokerError> {
        let request = self.client.post(self.endpoint("q/bulk")?).json(msgs);
        let ids: Option<Vec<u64>> = execute(request, timeout).await?;
        Ok(ids.unwrap_or_default())
    }

    /// `None` when nothing is claimable right now.
    pub async fn claim(&self, claim_comment: &str, timeout: Duration) -> Result<Option<Message>, BrokerError> {
        let request = self
            .client
            .post(self.endpoint("q/claim")?)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(claim_comment.to_string());
        execute(request, timeout).await
    }

    pub async fn ack(&self, id: u64, timeout: Duration) -> Result<(), BrokerError> {
        let request = self.client.delete(self.endpoint(&format!("wip/ack/{id}"))?);
        execute::<()>(request, timeout).await.map(|_| ())
    }

    pub async fn heartbeat(&self, id: u64, timeout: Duration) -> Result<(), BrokerError> {
        let request = self.client.post(self.endpoint(&format!("wip/heartbeat/{id}"))?);
        execute::<()>(request, timeout).await.map(|_| ())
    }

    /// Without `delay_millis` the broker's configured return delay applies.
    pub async fn return_to_queue(&self, id: u64, delay_millis: Option<i64>, timeout: Duration) -> Result<(), BrokerError> {
        let request = self
            .client
            .post(self.endpoint(&format!("wip/return/{id}"))?)
            .query(&ReturnQuery { delay: delay_millis });
        execute::<()>(request, timeout).await.map(|_| ())
    }

    pub async fn count(&self, heap: HeapType, filter: &MessageFilter) -> Result<usize, BrokerError> {
        let request = self
            .client
            .get(self.endpoint(&format!("heap/{heap}/count"))?)
            .query(&HeapQuery::for_filter(filter));
        Ok(execute(request, DEFAULT_REQUEST_TIMEOUT).await?.unwrap_or_default())
    }

    pub async fn filter(&self, heap: HeapType, filter: &MessageFilter) -> Result<Vec<Message>, BrokerError> {
        let request = self
            .client
            .get(self.endpoint(&format!("heap/{heap}/filter"))?)
            .query(&HeapQuery::for_filter(filter));
        Ok(execute(request, DEFAULT_REQUEST_TIMEOUT).await?.unwrap_or_default())
    }

    pub async fn head_tail(
        &self,
        heap: HeapType,
        read: QueueRead,
        from: usize,
        count: usize,
    ) -> Result<Vec<Message>, BrokerError> {
        let op = match read {
            QueueRead::Head => "head",
            QueueRead::Tail => "tail",
            QueueRead::Filter => "filter",
        };
        let request = self
            .client
            .get(self.endpoint(&format!("heap/{heap}/{op}"))?)
            .query(&HeapQuery {
                from: Some(from),
                count: Some(count),
                ..HeapQuery::default()
            });
        Ok(execute(request, DEFAULT_REQUEST_TIMEOUT).await?.unwrap_or_default())
    }

    pub async fn delete(&self, heap: HeapType, filter: &MessageFilter) -> Result<usize, BrokerError> {
        let request = self
            .client
            .delete(self.endpoint(&format!("heap/{heap}"))?)
            .query(&HeapQuery::for_filter(filter));
        Ok(execute(request, DEFAULT_REQUEST_TIMEOUT).await?.unwrap_or_default())
    }

    pub async fn list_keyspaces(&self) -> Result<Vec<String>, BrokerError> {
        let request = self.client.get(self.endpoint("ks")?);
        Ok(execute(request, DEFAULT_REQUEST_TIMEOUT).await?.unwrap_or_default())
    }
}

async fn execute<T>(request: RequestBuilder, timeout: Duration) -> Result<Option<T>, BrokerError>
where
    T: DeserializeOwned,
{
    let response = request.timeout(timeout).send().await?;
    let status = response.status();
    let text = response.text().await?;

    match serde_json::from_str::<ApiResponse<T>>(&text) {
        Ok(body) if status.is_success() && body.error.is_empty() => Ok(body.data),
        Ok(body) => Err(BrokerError::Remote {
            status: status.as_u16(),
            message: body.error,
        }),
        Err(err) if status.is_success() => Err(BrokerError::Decode(err.to_string())),
        Err(_) => Err(BrokerError::Remote {
            status: status.as_u16(),
            message: text,
        }),
    }
}

/// Producer posting batches to the network adapter's bulk endpoint.
pub struct HttpProducer {
    endpoint: String,
    client: Option<BrokerClient>,
}

impl HttpProducer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: None,
        }
    }

    fn client(&self) -> Result<&BrokerClient, BrokerError> {
        self.client
            .as_ref()
            .ok_or_else(|| BrokerError::Connectivity("cannot send, producer is not open".into()))
    }
}

#[async_trait]
impl MqProducer for HttpProducer {
    async fn open(&mut self) -> Result<(), BrokerError> {
        if self.client.is_none() {
            self.client = Some(BrokerClient::from_endpoint(&self.endpoint)?);
        }
        Ok(())
    }

    async fn send(&mut self, msg: &Message) -> Result<(), BrokerError> {
        self.send_bulk(std::slice::from_ref(msg)).await
    }

    async fn send_bulk(&mut self, msgs: &[Message]) -> Result<(), BrokerError> {
        let ids = self.client()?.enqueue_bulk(msgs, PRODUCER_SEND_TIMEOUT).await?;
        debug!("broker accepted {} message(s)", ids.len());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.client = None;
        Ok(())
    }

    fn supports_send_bulk(&self) -> bool {
        true
    }
}
