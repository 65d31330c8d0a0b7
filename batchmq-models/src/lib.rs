pub mod errors;
pub mod message;

pub use message::{DataBatchPayload, Message, MessagePayload};
