use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use log::{error, info};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::BrokerError;

/// One background half of a consumer: a stop flag the task polls and the
/// handle used to wait for it.
pub(crate) struct TaskHalf {
    name: &'static str,
    stop_timeout: Duration,
    stop: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskHalf {
    pub(crate) fn new(name: &'static str, stop_timeout: Duration) -> Self {
        Self {
            name,
            stop_timeout,
            stop: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Clears the stop flag and hands a copy to the task about to be spawned.
    pub(crate) fn arm(&self) -> Arc<AtomicBool> {
        self.stop.store(false, Ordering::SeqCst);
        Arc::clone(&self.stop)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub(crate) fn attach(&self, handle: JoinHandle<()>) {
        *self.handle.lock() = Some(handle);
    }

    /// Raises the stop flag and waits for the task, bounded by the half's
    /// stop timeout. Stopping a half that never started is a no-op.
    pub(crate) async fn stop(&self) -> Result<(), BrokerError> {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(self.stop_timeout, handle).await {
            Ok(Ok(())) => {
                info!("{} stopped", self.name);
                Ok(())
            }
            Ok(Err(err)) => {
                error!("{} task failed: {}", self.name, err);
                Err(BrokerError::Internal(format!("{} task failed: {err}", self.name)))
            }
            Err(_) => {
                error!(
                    "{} did not stop within {}ms",
                    self.name,
                    self.stop_timeout.as_millis()
                );
                Err(BrokerError::ShutdownTimeout(self.name))
            }
        }
    }
}

pub(crate) fn stop_requested(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}
