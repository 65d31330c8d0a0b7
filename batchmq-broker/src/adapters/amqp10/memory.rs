use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::link::{AmqpConnector, AmqpLink, AmqpSenderLink, LinkError, Received};

/// Loopback AMQP 1.0 endpoint kept in process memory.
///
/// Deliveries are numbered per endpoint, so any link opened on it can settle
/// a delivery received by another one. Available to other crates' tests
/// through the `test-util` feature.
#[derive(Clone, Default)]
pub struct MemoryEndpoint {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<EndpointState>,
    arrived: Notify,
}

#[derive(Default)]
struct EndpointState {
    unavailable: bool,
    failing_receives: usize,
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    next_delivery: u64,
    unsettled: HashMap<u64, (String, Vec<u8>)>,
    accepted: Vec<Vec<u8>>,
    released: usize,
    rejected: Vec<(Vec<u8>, String)>,
    receivers_opened: usize,
}

/// Delivery handle issued by a [`MemoryEndpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryDelivery(u64);

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, address: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .state
            .lock()
            .queues
            .entry(address.to_string())
            .or_default()
            .push_back(body.into());
        self.inner.arrived.notify_one();
    }

    /// While unavailable, opens and link operations fail with a
    /// connectivity error.
    pub fn set_available(&self, available: bool) {
        self.inner.state.lock().unavailable = !available;
        self.inner.arrived.notify_one();
    }

    /// The next `count` receives fail with a connectivity error.
    pub fn fail_next_receives(&self, count: usize) {
        self.inner.state.lock().failing_receives = count;
        self.inner.arrived.notify_one();
    }

    pub fn queued(&self, address: &str) -> usize {
        self.inner
            .state
            .lock()
            .queues
            .get(address)
            .map_or(0, VecDeque::len)
    }

    pub fn unsettled(&self) -> usize {
        self.inner.state.lock().unsettled.len()
    }

    pub fn accepted(&self) -> Vec<Vec<u8>> {
        self.inner.state.lock().accepted.clone()
    }

    pub fn released(&self) -> usize {
        self.inner.state.lock().released
    }

    pub fn rejected(&self) -> Vec<(Vec<u8>, String)> {
        self.inner.state.lock().rejected.clone()
    }

    pub fn receivers_opened(&self) -> usize {
        self.inner.state.lock().receivers_opened
    }

    fn check_available(&self) -> Result<(), LinkError> {
        if self.inner.state.lock().unavailable {
            return Err(LinkError::Connectivity("endpoint unavailable".into()));
        }
        Ok(())
    }

    fn settle(&self, delivery: &MemoryDelivery) -> Result<(String, Vec<u8>), LinkError> {
        let mut state = self.inner.state.lock();
        if state.unavailable {
            return Err(LinkError::Connectivity("endpoint unavailable".into()));
        }
        state
            .unsettled
            .remove(&delivery.0)
            .ok_or_else(|| LinkError::Other(format!("unknown delivery {}", delivery.0)))
    }
}

pub struct MemoryReceiver {
    endpoint: MemoryEndpoint,
    address: String,
    credit: i32,
    closed: bool,
}

pub struct MemorySender {
    endpoint: MemoryEndpoint,
    address: String,
    closed: bool,
}

#[async_trait]
impl AmqpLink for MemoryReceiver {
    type Delivery = MemoryDelivery;

    async fn receive(&mut self) -> Result<Received<MemoryDelivery>, LinkError> {
        if self.closed {
            return Err(LinkError::Connectivity("link closed".into()));
        }
        if self.credit <= 0 {
            // no credit: nothing is ever transferred to this link
            std::future::pending::<()>().await;
        }

        loop {
            {
                let mut state = self.endpoint.inner.state.lock();
                if state.unavailable {
                    return Err(LinkError::Connectivity("connection lost".into()));
                }
                if state.failing_receives > 0 {
                    state.failing_receives -= 1;
                    return Err(LinkError::Connectivity("link detached".into()));
                }
                let next = state
                    .queues
                    .get_mut(&self.address)
                    .and_then(VecDeque::pop_front);
                if let Some(body) = next {
                    state.next_delivery += 1;
                    let id = state.next_delivery;
                    state
                        .unsettled
                        .insert(id, (self.address.clone(), body.clone()));
                    return Ok(Received {
                        delivery: MemoryDelivery(id),
                        body,
                    });
                }
            }
            self.endpoint.inner.arrived.notified().await;
        }
    }

    async fn accept(&mut self, delivery: &MemoryDelivery) -> Result<(), LinkError> {
        let (_, body) = self.endpoint.settle(delivery)?;
        self.endpoint.inner.state.lock().accepted.push(body);
        Ok(())
    }

    async fn release(&mut self, delivery: &MemoryDelivery) -> Result<(), LinkError> {
        let (address, body) = self.endpoint.settle(delivery)?;
        {
            let mut state = self.endpoint.inner.state.lock();
            state.released += 1;
            state.queues.entry(address).or_default().push_back(body);
        }
        self.endpoint.inner.arrived.notify_one();
        Ok(())
    }

    async fn reject(&mut self, delivery: &MemoryDelivery, description: &str) -> Result<(), LinkError> {
        let (_, body) = self.endpoint.settle(delivery)?;
        self.endpoint
            .inner
            .state
            .lock()
            .rejected
            .push((body, description.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl AmqpSenderLink for MemorySender {
    async fn send(&mut self, body: Vec<u8>) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Connectivity("link closed".into()));
        }
        self.endpoint.check_available()?;
        self.endpoint.publish(&self.address, body);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.closed = true;
        Ok(())
    }
}

#[async_trait]
impl AmqpConnector for MemoryEndpoint {
    type Link = MemoryReceiver;
    type Sender = MemorySender;

    async fn open_receiver(&self, address: &str, credit: i32) -> Result<MemoryReceiver, LinkError> {
        self.check_available()?;
        self.inner.state.lock().receivers_opened += 1;
        Ok(MemoryReceiver {
            endpoint: self.clone(),
            address: address.to_string(),
            credit,
            closed: false,
        })
    }

    async fn open_sender(&self, address: &str) -> Result<MemorySender, LinkError> {
        self.check_available()?;
        Ok(MemorySender {
            endpoint: self.clone(),
            address: address.to_string(),
            closed: false,
        })
    }
}
