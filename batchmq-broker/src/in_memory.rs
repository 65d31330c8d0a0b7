use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use batchmq_models::Message;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{BrokerError, HeapType, MessageFilter, QueueRead};

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Default)]
struct PendingQueue {
    messages: VecDeque<Message>,
    counter: u64,
}

impl PendingQueue {
    fn sort(&mut self) {
        self.messages
            .make_contiguous()
            .sort_by(|a, b| a.delivery_order(b));
    }
}

/// In-memory broker with claim/ack/heartbeat/return semantics.
///
/// Pending and in-flight messages live in two containers, each behind its
/// own lock. Operations that move a message between containers take the
/// locks one after the other, never both at once.
#[derive(Clone, Default)]
pub struct MessageBroker {
    queue: Arc<RwLock<PendingQueue>>,
    wip: Arc<RwLock<HashMap<u64, Message>>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns ids and timestamps and appends the whole bulk, or nothing if
    /// it would push the queue past `max_messages`.
    pub fn enqueue_bulk(
        &self,
        msgs: Vec<Message>,
        max_messages: usize,
    ) -> Result<Vec<u64>, BrokerError> {
        let ts = now_millis();
        let mut queue = self.queue.write();

        let queued = queue.messages.len();
        if queued + msgs.len() > max_messages {
            return Err(BrokerError::CapacityExceeded {
                max_messages,
                queued,
                adding: msgs.len(),
            });
        }

        let mut ids = Vec::with_capacity(msgs.len());
        for mut msg in msgs {
            queue.counter += 1;
            msg.id = queue.counter;
            msg.ts = ts;
            msg.deliver_after = ts;
            msg.heartbeat = ts;
            ids.push(msg.id);
            queue.messages.push_back(msg);
        }

        // Returned messages may already sit in the queue with a later deliver_after.
        queue.sort();
        Ok(ids)
    }

    /// Takes the head of the queue if it is deliverable now. Never blocks.
    pub fn claim(&self, claim_comment: &str) -> Result<Option<Message>, BrokerError> {
        let now = now_millis();
        let mut msg = {
            let mut queue = self.queue.write();
            match queue.messages.front() {
                Some(head) if head.deliver_after <= now => {}
                _ => return Ok(None),
            }
            match queue.messages.pop_front() {
                Some(msg) => msg,
                None => return Ok(None),
            }
        };

        msg.claim_comment = claim_comment.to_string();
        self.wip.write().insert(msg.id, msg.clone());
        Ok(Some(msg))
    }

    pub fn ack(&self, id: u64) -> Result<(), BrokerError> {
        self.wip
            .write()
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::not_found("ack", id))
    }

    pub fn heartbeat(&self, id: u64) -> Result<(), BrokerError> {
        let mut wip = self.wip.write();
        let msg = wip
            .get_mut(&id)
            .ok_or_else(|| BrokerError::not_found("heartbeat", id))?;
        msg.heartbeat = now_millis();
        Ok(())
    }

    /// Moves a claimed message back to the queue, postponed by `delay_millis`.
    /// Every pending message of the same node is realigned to the same
    /// delivery time so the node's batches come back together.
    pub fn return_to_queue(&self, id: u64, delay_millis: i64) -> Result<(), BrokerError> {
        // computed before the message leaves wip, nothing below may fail
        let deliver_after = now_millis().saturating_add(delay_millis.max(0));
        let mut msg = self
            .wip
            .write()
            .remove(&id)
            .ok_or_else(|| BrokerError::not_found("return", id))?;

        msg.claim_comment.clear();
        msg.deliver_after = deliver_after;

        let mut queue = self.queue.write();
        for pending in queue.messages.iter_mut() {
            if pending.same_node(&msg) {
                pending.deliver_after = deliver_after;
            }
        }
        queue.messages.push_back(msg);
        queue.sort();
        Ok(())
    }

    /// Returns every claimed message without a heartbeat for `dead_timeout_millis`
    /// to the queue. Their heartbeat is reset to the enqueue timestamp.
    pub fn return_dead(&self, dead_timeout_millis: i64) -> Vec<u64> {
        let latest_allowed = now_millis().saturating_sub(dead_timeout_millis);

        let dead: Vec<Message> = {
            let mut wip = self.wip.write();
            let ids: Vec<u64> = wip
                .values()
                .filter(|msg| msg.heartbeat < latest_allowed)
                .map(|msg| msg.id)
                .collect();
            ids.iter().filter_map(|id| wip.remove(id)).collect()
        };

        if dead.is_empty() {
            return Vec::new();
        }

        let ids = dead.iter().map(|msg| msg.id).collect();
        let mut queue = self.queue.write();
        queue.messages.extend(dead.into_iter().map(|mut msg| {
            msg.heartbeat = msg.ts;
            msg
        }));
        queue.sort();
        ids
    }

    /// Distinct keyspaces of pending messages, sorted.
    pub fn list_keyspaces(&self) -> Vec<String> {
        let queue = self.queue.read();
        queue
            .messages
            .iter()
            .map(|msg| msg.data_keyspace.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn count(&self, heap: HeapType, filter: &MessageFilter) -> usize {
        match heap {
            HeapType::Q => self
                .queue
                .read()
                .messages
                .iter()
                .filter(|msg| filter.matches(msg))
                .count(),
            HeapType::Wip => self
                .wip
                .read()
                .values()
                .filter(|msg| filter.matches(msg))
                .count(),
        }
    }

    pub fn filter(&self, heap: HeapType, filter: &MessageFilter) -> Vec<Message> {
        match heap {
            HeapType::Q => self
                .queue
                .read()
                .messages
                .iter()
                .filter(|msg| filter.matches(msg))
                .cloned()
                .collect(),
            HeapType::Wip => {
                let mut msgs: Vec<Message> = self
                    .wip
                    .read()
                    .values()
                    .filter(|msg| filter.matches(msg))
                    .cloned()
                    .collect();
                msgs.sort_by(|a, b| a.delivery_order(b));
                msgs
            }
        }
    }

    pub fn delete(&self, heap: HeapType, filter: &MessageFilter) -> usize {
        match heap {
            HeapType::Q => {
                let mut queue = self.queue.write();
                let before = queue.messages.len();
                queue.messages.retain(|msg| !filter.matches(msg));
                before - queue.messages.len()
            }
            HeapType::Wip => {
                let mut wip = self.wip.write();
                let before = wip.len();
                wip.retain(|_, msg| !filter.matches(msg));
                before - wip.len()
            }
        }
    }

    /// Window of up to `count` messages, walking from the head (or the tail)
    /// after skipping `from`. Wip is read in delivery order.
    pub fn head_tail(
        &self,
        heap: HeapType,
        read: QueueRead,
        from: usize,
        count: usize,
    ) -> Vec<Message> {
        match heap {
            HeapType::Q => {
                let queue = self.queue.read();
                window(queue.messages.iter(), queue.messages.len(), read, from, count)
            }
            HeapType::Wip => {
                let mut all: Vec<Message> = self.wip.read().values().cloned().collect();
                all.sort_by(|a, b| a.delivery_order(b));
                let len = all.len();
                window(all.iter(), len, read, from, count)
            }
        }
    }
}

fn window<'a, I>(msgs: I, len: usize, read: QueueRead, from: usize, count: usize) -> Vec<Message>
where
    I: DoubleEndedIterator<Item = &'a Message>,
{
    if from >= len {
        return Vec::new();
    }
    match read {
        QueueRead::Tail => msgs.rev().skip(from).take(count).cloned().collect(),
        _ => msgs.skip(from).take(count).cloned().collect(),
    }
}
