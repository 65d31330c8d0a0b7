use std::path::Path;

use batchmq_models::errors::SendableError;
use log::info;

use crate::logger::{self, print_env};

pub const DEFAULT_LOG_FILE: &str = "output.log";

/// Common startup for every batchmq binary: logging, panic capture, banner.
pub fn startup(name: &str) -> Result<(), SendableError> {
    logger::setup_logger(Path::new(DEFAULT_LOG_FILE))?;
    log_panics::init();

    info!("--- {} ---", name);
    print_env()?;

    Ok(())
}
