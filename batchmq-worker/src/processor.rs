use async_trait::async_trait;
use batchmq_models::{errors::SendableError, Message, MessagePayload};
use log::info;

/// How a processed batch is resolved with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Success,
    /// Not processed now; deliver again later.
    Retry,
}

/// Work performed for every delivered message. An `Err` is resolved as a
/// retry.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    async fn process(&self, msg: &Message) -> Result<BatchOutcome, SendableError>;
}

/// Logs the batch and reports success.
#[derive(Debug, Default)]
pub struct LoggingProcessor;

#[async_trait]
impl BatchProcessor for LoggingProcessor {
    async fn process(&self, msg: &Message) -> Result<BatchOutcome, SendableError> {
        match &msg.payload {
            MessagePayload::DataBatch(batch) => info!(
                "processing {} ({}/{}), tokens {}..={}, script {}",
                msg.full_batch_id(),
                msg.batch_idx + 1,
                batch.batches_total,
                batch.first_token,
                batch.last_token,
                batch.script_url
            ),
        }
        Ok(BatchOutcome::Success)
    }
}
