pub mod client;
pub mod consumer;
pub mod server;
pub mod types;
