use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::http::server::{ServerSettings, MAX_RETURN_DELAY_MILLIS};

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub server: ServerSettings,
    /// Claimed messages without a heartbeat for this long go back to the queue.
    pub dead_after_no_heartbeat_timeout: i64,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "In-memory batch message broker", long_about = None)]
struct CliArgs {
    #[arg(long, env = "BATCHMQ_BIND", default_value = "127.0.0.1")]
    bind: IpAddr,

    #[arg(long, env = "BATCHMQ_PORT", default_value_t = 7654)]
    port: u16,

    #[arg(long, env = "BATCHMQ_MAX_MESSAGES", default_value_t = 1_000_000)]
    max_messages: usize,

    /// Milliseconds.
    #[arg(long, env = "BATCHMQ_RETURNED_DELIVERY_DELAY", default_value_t = 5_000)]
    returned_delivery_delay: i64,

    /// Milliseconds.
    #[arg(long, env = "BATCHMQ_DEAD_AFTER_NO_HEARTBEAT_TIMEOUT", default_value_t = 10_000)]
    dead_after_no_heartbeat_timeout: i64,
}

impl From<CliArgs> for Config {
    fn from(args: CliArgs) -> Self {
        Config {
            addr: SocketAddr::new(args.bind, args.port),
            server: ServerSettings {
                max_messages: args.max_messages,
                returned_delivery_delay: args
                    .returned_delivery_delay
                    .clamp(0, MAX_RETURN_DELAY_MILLIS),
            },
            dead_after_no_heartbeat_timeout: args.dead_after_no_heartbeat_timeout.max(0),
        }
    }
}

pub fn parse_config() -> Config {
    CliArgs::parse().into()
}
