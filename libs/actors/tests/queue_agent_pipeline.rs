//! # Messaging Agent Integration Tests
//!
//! Drives real [`codec::Message`] traffic through an [`AsynchQueueAgent`]
//! to verify the send-side pipeline end to end: destination batching over
//! actual silo addresses, FIFO order within a destination, and clean
//! shutdown draining.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use codec::{Direction, Message, MessageCategory};
use config::MessagingConfiguration;
use messaging_actors::{AgentState, AsynchQueueAgent, FaultBehavior, QueueProcessor};
use types::SiloAddress;

struct BatchRecorder {
    batches: Mutex<Vec<Vec<Arc<Message>>>>,
}

impl BatchRecorder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
        })
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl QueueProcessor<Arc<Message>> for BatchRecorder {
    fn process(&self, item: Arc<Message>) {
        self.batches.lock().push(vec![item]);
    }

    fn process_batch(&self, items: Vec<Arc<Message>>) {
        self.batches.lock().push(items);
    }
}

fn request_to(port: u16, method: u32) -> Arc<Message> {
    let msg = Message::new(MessageCategory::Application, Direction::Request);
    msg.set_target_silo(SiloAddress::new(
        format!("10.0.0.1:{port}").parse().unwrap(),
        1,
    ));
    msg.set_method_id(method);
    Arc::new(msg)
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn test_batching_groups_messages_by_target_silo() {
    let mut config = MessagingConfiguration::default();
    config.use_message_batching = true;

    let recorder = BatchRecorder::new();
    let agent = AsynchQueueAgent::new(
        "outbound-sender",
        &config,
        FaultBehavior::IgnoreFault,
        recorder.clone() as Arc<dyn QueueProcessor<Arc<Message>>>,
    );

    // Three to silo A, then two to silo B, queued before the agent runs so
    // each destination run is visible as one batch.
    for method in 0..3 {
        agent.queue_request(request_to(11111, method)).unwrap();
    }
    for method in 10..12 {
        agent.queue_request(request_to(22222, method)).unwrap();
    }

    agent.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || recorder.batch_count() >= 2));
    agent.stop();

    let batches = recorder.batches.lock();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 3);
    assert_eq!(batches[1].len(), 2);
    // FIFO within each destination group.
    let methods: Vec<u32> = batches[0].iter().filter_map(|m| m.method_id()).collect();
    assert_eq!(methods, vec![0, 1, 2]);
}

#[test]
fn test_single_mode_preserves_global_order() {
    let config = MessagingConfiguration::default();
    assert!(!config.use_message_batching);

    let recorder = BatchRecorder::new();
    let agent = AsynchQueueAgent::new(
        "outbound-sender",
        &config,
        FaultBehavior::IgnoreFault,
        recorder.clone() as Arc<dyn QueueProcessor<Arc<Message>>>,
    );
    agent.start().unwrap();

    for method in 0..5 {
        agent
            .queue_request(request_to(11111 + (method % 2) as u16, method))
            .unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || recorder.batch_count() == 5));
    agent.stop();

    let batches = recorder.batches.lock();
    let methods: Vec<u32> = batches
        .iter()
        .flat_map(|b| b.iter().filter_map(|m| m.method_id()))
        .collect();
    assert_eq!(methods, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_stop_drains_queued_work() {
    let config = MessagingConfiguration::default();
    let recorder = BatchRecorder::new();
    let agent = AsynchQueueAgent::new(
        "outbound-sender",
        &config,
        FaultBehavior::IgnoreFault,
        recorder.clone() as Arc<dyn QueueProcessor<Arc<Message>>>,
    );

    for method in 0..10 {
        agent.queue_request(request_to(11111, method)).unwrap();
    }
    agent.start().unwrap();
    agent.stop();

    // stop() completes the queue and joins the agent thread, so everything
    // queued beforehand has been handed to the processor.
    assert_eq!(recorder.batch_count(), 10);
    assert_eq!(agent.state(), AgentState::Stopped);
    assert!(agent.queue_request(request_to(11111, 99)).is_err());
}