//! # AsynchQueueAgent - Queue-Draining Agent
//!
//! An [`AsynchAgent`] specialized to drain a [`RuntimeQueue`]. In batching
//! mode the agent takes the front item, then greedily pulls further items
//! while they share the first item's destination and the batch is under the
//! configured maximum, handing the whole group to the processor at once.
//! Relative order within a destination group is preserved; a full group is
//! drained before the next item is inspected.

use std::sync::Arc;

use tracing::debug;

use config::MessagingConfiguration;

use crate::agent::{AgentState, AsynchAgent, FaultBehavior};
use crate::error::{QueueError, Result};
use crate::outgoing::OutgoingMessage;
use crate::queue::RuntimeQueue;

/// Consumes what the agent drains.
pub trait QueueProcessor<T>: Send + Sync {
    fn process(&self, item: T);
    fn process_batch(&self, items: Vec<T>);
}

/// Dedicated-thread consumer of one runtime queue.
pub struct AsynchQueueAgent<T: OutgoingMessage + Send + 'static> {
    agent: Arc<AsynchAgent>,
    queue: Arc<RuntimeQueue<T>>,
}

impl<T: OutgoingMessage + Send + 'static> AsynchQueueAgent<T> {
    pub fn new(
        name: impl Into<String>,
        config: &MessagingConfiguration,
        fault_behavior: FaultBehavior,
        processor: Arc<dyn QueueProcessor<T>>,
    ) -> Arc<Self> {
        let queue = Arc::new(RuntimeQueue::new());
        let use_batching = config.use_message_batching;
        let max_batch = config.max_message_batching_size.max(1);
        let work_queue = queue.clone();
        let agent = AsynchAgent::new(name, fault_behavior, move |token| {
            // Keep draining after cancellation until queued work is gone, so
            // stop() never discards accepted requests.
            while !token.is_cancelled() || work_queue.count() > 0 {
                let done = if use_batching {
                    Self::run_batching_cycle(&work_queue, processor.as_ref(), max_batch)
                } else {
                    Self::run_single_cycle(&work_queue, processor.as_ref())
                };
                if done {
                    break;
                }
            }
        });
        Arc::new(Self { agent, queue })
    }

    /// Drain one item. Returns true when the queue is completed and empty.
    fn run_single_cycle(queue: &RuntimeQueue<T>, processor: &dyn QueueProcessor<T>) -> bool {
        match queue.take() {
            Ok(item) => {
                processor.process(item);
                false
            }
            Err(QueueError::Drained) | Err(QueueError::AddingCompleted) => true,
        }
    }

    /// Drain one destination group. Returns true when the queue is
    /// completed and empty.
    fn run_batching_cycle(
        queue: &RuntimeQueue<T>,
        processor: &dyn QueueProcessor<T>,
        max_batch: usize,
    ) -> bool {
        let first = match queue.take() {
            Ok(item) => item,
            Err(_) => return true,
        };
        let mut batch = vec![first];
        while queue.count() > 0 && batch.len() < max_batch {
            let same = {
                let head = &batch[0];
                queue.first_with(|next| next.is_same_destination(head))
            };
            match same {
                Ok(true) => match queue.try_take() {
                    Some(item) => batch.push(item),
                    None => break,
                },
                Ok(false) | Err(_) => break,
            }
        }
        debug!(batch_size = batch.len(), "draining destination group");
        processor.process_batch(batch);
        false
    }

    /// Enqueue work for the agent thread.
    pub fn queue_request(&self, item: T) -> std::result::Result<(), QueueError> {
        self.queue.add(item)
    }

    pub fn start(&self) -> Result<()> {
        self.agent.start()
    }

    /// Complete the queue so the agent drains and observes cancellation,
    /// then stop the agent.
    pub fn stop(&self) {
        self.queue.complete_adding();
        self.agent.stop();
    }

    pub fn state(&self) -> AgentState {
        self.agent.state()
    }

    pub fn name(&self) -> &str {
        self.agent.name()
    }

    pub fn pending(&self) -> usize {
        self.queue.count()
    }
}
