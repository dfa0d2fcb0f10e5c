//! End-to-end pull synchronization between two live nodes.

use std::sync::Arc;
use std::time::Duration;

use parley_core::Message;
use parley_engine::{Engine, EngineError, Manager, Node};
use parley_store::HistoryIter;
use parley_sync::{MemoryTransport, PollListener, PollRequestor};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

struct ApplyEverything;

impl Manager for ApplyEverything {
    fn process(&self, _msg: &Message, _from_remote: bool) -> anyhow::Result<()> {
        Ok(())
    }
    fn should_process(&self, _msg: &Message, _history: &mut HistoryIter<'_>) -> bool {
        true
    }
}

async fn wait_until(
    engine: &Arc<Engine>,
    what: &str,
    predicate: impl Fn(parley_engine::Status) -> bool,
) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if predicate(engine.status().unwrap()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}, status {:?}",
            engine.status().unwrap()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A full conversation: the source node queues one message, the sink node
/// pulls it, applies it, acknowledges it, and the two converge.
#[tokio::test]
async fn test_one_message_flows_source_to_sink() {
    init_tracing();
    let mut source = Node::open_memory(Arc::new(ApplyEverything)).unwrap();
    let mut sink = Node::open_memory(Arc::new(ApplyEverything)).unwrap();

    let (listen_end, request_end) = MemoryTransport::pair();
    source.add_component(Box::new(PollListener::new(
        listen_end.with_timeout(Duration::from_millis(50)),
    )));
    sink.add_component(Box::new(
        PollRequestor::new(request_end.with_timeout(Duration::from_millis(50)))
            .with_poll_interval(Duration::from_millis(20)),
    ));

    let source_engine = source.engine();
    let sink_engine = sink.engine();

    let mut msg = Message::new(b"replicate me".to_vec());
    source_engine.handle_new_message(&mut msg).unwrap();
    assert_eq!(source_engine.status().unwrap().queue_size, 1);

    source.start().await.unwrap();
    sink.start().await.unwrap();

    // The sink applies the message...
    wait_until(&sink_engine, "sink to apply the message", |s| {
        s.state == msg.id.as_u64() && s.history_size == 1
    })
    .await;

    // ...and the acknowledgment empties the source's queue.
    wait_until(&source_engine, "source queue to drain", |s| {
        s.queue_size == 0
    })
    .await;

    // Once the sink sees the empty reply with a matching state, its
    // history clears: the peers have converged.
    wait_until(&sink_engine, "peers to converge", |s| s.history_size == 0).await;

    // The source never saw a remote message, so its own state is its own.
    assert_eq!(source_engine.status().unwrap().state, msg.id.as_u64());

    sink.stop().await;
    source.stop().await;
}

/// Several queued messages arrive in FIFO order and converge.
#[tokio::test]
async fn test_queued_messages_drain_in_order() {
    init_tracing();
    let mut source = Node::open_memory(Arc::new(ApplyEverything)).unwrap();

    struct RecordingManager(std::sync::Mutex<Vec<Vec<u8>>>);
    impl Manager for RecordingManager {
        fn process(&self, msg: &Message, from_remote: bool) -> anyhow::Result<()> {
            if from_remote {
                self.0.lock().unwrap().push(msg.payload.to_vec());
            }
            Ok(())
        }
        fn should_process(&self, _msg: &Message, _history: &mut HistoryIter<'_>) -> bool {
            true
        }
    }

    let applied = Arc::new(RecordingManager(std::sync::Mutex::new(Vec::new())));
    let mut sink = Node::open_memory(Arc::clone(&applied) as Arc<dyn Manager>).unwrap();

    let (listen_end, request_end) = MemoryTransport::pair();
    source.add_component(Box::new(PollListener::new(
        listen_end.with_timeout(Duration::from_millis(50)),
    )));
    sink.add_component(Box::new(
        PollRequestor::new(request_end.with_timeout(Duration::from_millis(50)))
            .with_poll_interval(Duration::from_millis(20)),
    ));

    let source_engine = source.engine();
    let sink_engine = sink.engine();

    let payloads: Vec<Vec<u8>> = (0..5).map(|n| format!("update {n}").into_bytes()).collect();
    let mut expected_state = 0u64;
    for payload in &payloads {
        let mut msg = Message::new(payload.clone());
        source_engine.handle_new_message(&mut msg).unwrap();
        expected_state = expected_state.wrapping_add(msg.id.as_u64());
    }

    source.start().await.unwrap();
    sink.start().await.unwrap();

    wait_until(&source_engine, "source queue to drain", |s| {
        s.queue_size == 0
    })
    .await;
    wait_until(&sink_engine, "sink to catch up", |s| {
        s.state == expected_state && s.history_size == 0
    })
    .await;

    assert_eq!(*applied.0.lock().unwrap(), payloads);

    sink.stop().await;
    source.stop().await;
}

/// A listener told "ok" with nothing queued shuts its node down, and the
/// requestor's node learns the peers are diverged.
#[tokio::test]
async fn test_spurious_acknowledgment_takes_both_nodes_down() {
    init_tracing();
    let mut source = Node::open_memory(Arc::new(ApplyEverything)).unwrap();

    let (listen_end, request_end) = MemoryTransport::pair();
    source.add_component(Box::new(PollListener::new(
        listen_end.with_timeout(Duration::from_millis(50)),
    )));
    source.start().await.unwrap();

    let mut request_end = request_end.with_timeout(Duration::from_secs(1));

    // Acknowledge a message that was never pulled.
    use parley_sync::{Reply, Request, Transport};
    request_end.send(&Request::Ok.encode()).await.unwrap();
    let reply = Reply::parse(&request_end.recv().await.unwrap()).unwrap();
    assert_eq!(reply, Reply::Error(parley_sync::ErrorReason::Dequeue));

    // The listener's node shuts down with the internal error.
    let err = source.listen().await.unwrap_err();
    assert!(matches!(err, EngineError::Component(_)));
}
