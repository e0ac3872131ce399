use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mbx_fs::{FileHandle, FileSystem, FsError, OpenFlags};
use mbx_wire::{Codec, Reply, Request};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::{BoxRegistry, BoxState, PublisherGuard};
use crate::transport::SessionEndpoint;

/// One decoded registration request paired with the transport endpoint the
/// session answers on.
pub struct Session {
    pub request: Request,
    pub endpoint: Box<dyn SessionEndpoint>,
}

/// Bounded producer-consumer dispatcher: a fixed pool of worker tasks
/// draining one session queue.
///
/// The queue is the only admission control; [`submit`](Dispatcher::submit)
/// blocks while it is full. Workers translate every error into a reply or
/// a log line and never tear down.
pub struct Dispatcher {
    queue: mpsc::Sender<Session>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Start `config.worker_count` workers. Must be called within a tokio
    /// runtime.
    pub fn spawn(registry: Arc<BoxRegistry>, config: &BrokerConfig) -> Self {
        let (queue, sessions) = mpsc::channel(config.queue_depth);
        let sessions = Arc::new(Mutex::new(sessions));

        let workers = (0..config.worker_count)
            .map(|worker_id| {
                let sessions = Arc::clone(&sessions);
                let registry = Arc::clone(&registry);
                let chunk_len = config.chunk_len;
                tokio::spawn(worker_loop(worker_id, sessions, registry, chunk_len))
            })
            .collect();

        info!(
            workers = config.worker_count,
            queue_depth = config.queue_depth,
            "dispatcher started"
        );
        Self { queue, workers }
    }

    /// Enqueue a session, blocking while the queue is full (backpressure).
    pub async fn submit(&self, session: Session) -> BrokerResult<()> {
        self.queue
            .send(session)
            .await
            .map_err(|_| BrokerError::QueueClosed)
    }

    /// Close the queue, let the workers drain it, and wait for them to
    /// exit. Sessions already queued are still served.
    pub async fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("dispatcher stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    sessions: Arc<Mutex<mpsc::Receiver<Session>>>,
    registry: Arc<BoxRegistry>,
    chunk_len: usize,
) {
    loop {
        // Hold the receiver only while dequeuing, so other idle workers
        // can take the next session during dispatch.
        let session = sessions.lock().await.recv().await;
        let Some(session) = session else { break };

        let opcode = session.request.opcode_name();
        debug!(worker_id, opcode, "session dequeued");
        if let Err(e) = handle_session(&registry, session, chunk_len).await {
            warn!(worker_id, opcode, error = %e, "session ended with error");
        }
    }
    debug!(worker_id, "worker exiting");
}

async fn handle_session(
    registry: &BoxRegistry,
    session: Session,
    chunk_len: usize,
) -> BrokerResult<()> {
    let Session { request, mut endpoint } = session;
    match request {
        Request::RegisterPublisher { box_name, .. } => {
            run_publisher(registry, endpoint.as_mut(), &box_name, chunk_len).await
        }
        Request::RegisterSubscriber { box_name, .. } => {
            run_subscriber(registry, endpoint.as_mut(), &box_name, chunk_len).await
        }
        Request::CreateBox { box_name, .. } => {
            let reply = match registry.create(&box_name) {
                Ok(()) => Reply::created_ok(),
                Err(e) => Reply::created_failed(e.to_string()),
            };
            send_reply(endpoint.as_mut(), &reply).await
        }
        Request::RemoveBox { box_name, .. } => {
            let reply = match registry.remove(&box_name) {
                Ok(()) => Reply::removed_ok(),
                Err(e) => Reply::removed_failed(e.to_string()),
            };
            send_reply(endpoint.as_mut(), &reply).await
        }
        Request::ListBoxes { .. } => {
            send_reply(endpoint.as_mut(), &Reply::box_list(registry.list())).await
        }
    }
}

async fn send_reply(endpoint: &mut dyn SessionEndpoint, reply: &Reply) -> BrokerResult<()> {
    let frame = Codec::encode_reply(reply)?;
    endpoint.send(&frame).await.map_err(BrokerError::Transport)
}

/// Publish loop: stream transport chunks into the box's backing file
/// until the transport ends, waking subscribers after every write.
///
/// The publisher slot and the file handle are released on every exit
/// path.
async fn run_publisher(
    registry: &BoxRegistry,
    endpoint: &mut dyn SessionEndpoint,
    box_name: &str,
    chunk_len: usize,
) -> BrokerResult<()> {
    let publisher = registry.attach_publisher(box_name)?;
    debug!(box_name, "publisher attached");

    let fs = registry.fs();
    let handle = fs.open(publisher.state().file_path(), OpenFlags::APPEND)?;
    let result = publish_loop(fs, endpoint, &publisher, handle, chunk_len).await;
    let closed = fs.close(handle).map_err(BrokerError::from);
    result.and(closed)
}

async fn publish_loop(
    fs: &FileSystem,
    endpoint: &mut dyn SessionEndpoint,
    publisher: &PublisherGuard,
    handle: FileHandle,
    chunk_len: usize,
) -> BrokerResult<()> {
    let state = publisher.state();
    let mut chunk = vec![0u8; chunk_len];
    loop {
        let n = endpoint
            .recv(&mut chunk)
            .await
            .map_err(BrokerError::Transport)?;
        if n == 0 {
            debug!(box_name = state.name(), "publisher stream ended");
            return Ok(());
        }

        let written = fs.write(handle, &chunk[..n])?;
        if written > 0 {
            state.record_write(written as u64);
        }
        if written < n {
            // The single backing block is full; whatever fit was
            // delivered.
            warn!(box_name = state.name(), "backing file full, ending publish session");
            return Ok(());
        }
    }
}

/// Subscribe loop: alternate between draining new bytes from the backing
/// file to the transport and waiting on the box's wake signal.
///
/// No file handle is held while waiting, so a box whose subscribers are
/// all blocked can be removed; the removal signal wakes them and they
/// exit. The subscriber count is decremented on every exit path.
async fn run_subscriber(
    registry: &BoxRegistry,
    endpoint: &mut dyn SessionEndpoint,
    box_name: &str,
    chunk_len: usize,
) -> BrokerResult<()> {
    let subscriber = registry.attach_subscriber(box_name)?;
    let state = Arc::clone(subscriber.state());
    let mut signal = state.watch();
    debug!(box_name, "subscriber attached");

    let fs = registry.fs();
    let mut delivered = 0usize;
    let mut chunk = vec![0u8; chunk_len];
    loop {
        // Mark the signal seen before draining: a write landing during
        // the drain shows up as a change afterward, so it cannot be lost.
        if signal.borrow_and_update().removed {
            debug!(box_name, "box removed, ending subscribe session");
            return Ok(());
        }

        if !drain(fs, &state, endpoint, &mut delivered, &mut chunk).await? {
            debug!(box_name, "backing file gone, ending subscribe session");
            return Ok(());
        }

        if signal.changed().await.is_err() {
            return Ok(());
        }
    }
}

/// One drain phase: open the backing file, skip the bytes this session
/// already delivered, stream the rest, and close the handle again.
/// Returns `false` if the backing file no longer exists.
async fn drain(
    fs: &FileSystem,
    state: &BoxState,
    endpoint: &mut dyn SessionEndpoint,
    delivered: &mut usize,
    chunk: &mut [u8],
) -> BrokerResult<bool> {
    let handle = match fs.open(state.file_path(), OpenFlags::empty()) {
        Ok(handle) => handle,
        Err(FsError::NotFound(_)) => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let streamed = stream_new_bytes(fs, endpoint, handle, delivered, chunk).await;
    let closed = fs.close(handle).map_err(BrokerError::from);
    streamed.and(closed)?;
    Ok(true)
}

async fn stream_new_bytes(
    fs: &FileSystem,
    endpoint: &mut dyn SessionEndpoint,
    handle: FileHandle,
    delivered: &mut usize,
    chunk: &mut [u8],
) -> BrokerResult<()> {
    // This session's cursor restarts at 0 on every drain; skip what was
    // already delivered.
    let mut to_skip = *delivered;
    while to_skip > 0 {
        let len = to_skip.min(chunk.len());
        let n = fs.read(handle, &mut chunk[..len])?;
        if n == 0 {
            return Ok(());
        }
        to_skip -= n;
    }

    loop {
        let n = fs.read(handle, chunk)?;
        if n == 0 {
            return Ok(());
        }
        endpoint
            .send(&chunk[..n])
            .await
            .map_err(BrokerError::Transport)?;
        *delivered += n;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::broker::Broker;
    use crate::transport::ChannelEndpoint;

    fn test_config() -> BrokerConfig {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        BrokerConfig {
            max_boxes: 8,
            worker_count: 4,
            queue_depth: 8,
            chunk_len: 256,
            ..Default::default()
        }
    }

    fn create_request(box_name: &str) -> Request {
        Request::CreateBox {
            endpoint: "/tmp/mgr".into(),
            box_name: box_name.into(),
        }
    }

    async fn submit(broker: &Broker, request: Request) -> ChannelEndpoint {
        let (peer, side) = ChannelEndpoint::pair(8);
        broker
            .submit(request, Box::new(side))
            .await
            .expect("queue open");
        peer
    }

    async fn recv_reply(peer: &mut ChannelEndpoint) -> Reply {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = timeout(Duration::from_secs(2), peer.recv(&mut buf))
                .await
                .expect("timed out waiting for reply")
                .unwrap();
            assert!(n > 0, "stream ended before a full reply");
            data.extend_from_slice(&buf[..n]);
            if let Ok((reply, _)) = Codec::decode_reply(&data) {
                return reply;
            }
        }
    }

    async fn recv_exact(peer: &mut ChannelEndpoint, len: usize) -> Vec<u8> {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        while data.len() < len {
            let n = timeout(Duration::from_secs(2), peer.recv(&mut buf))
                .await
                .expect("timed out waiting for payload")
                .unwrap();
            assert!(n > 0, "stream ended early");
            data.extend_from_slice(&buf[..n]);
        }
        data
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn create_box_replies_ok() {
        let broker = Broker::start(test_config()).unwrap();

        let mut peer = submit(&broker, create_request("mailbox")).await;
        assert_eq!(recv_reply(&mut peer).await, Reply::created_ok());
        assert!(broker.registry().find("mailbox").is_some());
    }

    #[tokio::test]
    async fn duplicate_create_replies_failure() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut peer = submit(&broker, create_request("mailbox")).await;
        match recv_reply(&mut peer).await {
            Reply::Created { return_code, message } => {
                assert_eq!(return_code, -1);
                assert!(message.contains("already exists"), "message: {message}");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn remove_box_replies() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut peer = submit(
            &broker,
            Request::RemoveBox {
                endpoint: "/tmp/mgr".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        assert_eq!(recv_reply(&mut peer).await, Reply::removed_ok());

        let mut peer = submit(
            &broker,
            Request::RemoveBox {
                endpoint: "/tmp/mgr".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        match recv_reply(&mut peer).await {
            Reply::Removed { return_code, .. } => assert_eq!(return_code, -1),
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_reflects_creations_and_removals() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("a").unwrap();
        broker.registry().create("b").unwrap();
        broker.registry().remove("a").unwrap();

        let mut peer = submit(
            &broker,
            Request::ListBoxes {
                endpoint: "/tmp/mgr".into(),
            },
        )
        .await;
        match recv_reply(&mut peer).await {
            Reply::BoxList { boxes } => {
                assert_eq!(boxes.len(), 1);
                assert_eq!(boxes[0].name, "b");
                assert!(boxes[0].last);
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscriber_reads_earlier_publication() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut publisher = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        publisher.send(b"hello").await.unwrap();

        // The write lands in the backing file before the subscriber shows
        // up; it must still be delivered.
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].byte_count == 5).await;

        let mut subscriber = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        assert_eq!(recv_exact(&mut subscriber, 5).await, b"hello");
    }

    #[tokio::test]
    async fn blocked_subscriber_wakes_on_publication() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut subscriber = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].subscriber_count == 1).await;

        let mut publisher = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        publisher.send(b"wake up").await.unwrap();

        assert_eq!(recv_exact(&mut subscriber, 7).await, b"wake up");
    }

    #[tokio::test]
    async fn second_publisher_rejected() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let _first = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].publisher_count == 1).await;

        let mut second = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub1".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        // The rejected session drops its endpoint without reading a byte.
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), second.recv(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(n, 0);
        assert_eq!(broker.registry().list()[0].publisher_count, 1);
    }

    #[tokio::test]
    async fn publisher_slot_reusable_after_stream_ends() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let first = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].publisher_count == 1).await;

        drop(first); // end of stream
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].publisher_count == 0).await;

        let mut replacement = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub1".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        replacement.send(b"x").await.unwrap();
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].byte_count == 1).await;
    }

    #[tokio::test]
    async fn removal_ends_blocked_subscriber() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut subscriber = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].subscriber_count == 1).await;

        // A blocked subscriber holds no file handle, so removal goes
        // through once the session reaches its wait phase.
        timeout(Duration::from_secs(2), async {
            loop {
                match broker.registry().remove("mailbox") {
                    Ok(()) => break,
                    Err(BrokerError::BackingStore(FsError::FileBusy(_))) => {
                        sleep(Duration::from_millis(5)).await;
                    }
                    Err(e) => panic!("unexpected removal error: {e}"),
                }
            }
        })
        .await
        .expect("removal did not go through");

        // The woken session exits and drops its endpoint.
        let mut buf = [0u8; 8];
        let n = timeout(Duration::from_secs(2), subscriber.recv(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(n, 0);

        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list().is_empty()).await;
    }

    #[tokio::test]
    async fn two_subscribers_both_receive() {
        let broker = Broker::start(test_config()).unwrap();
        broker.registry().create("mailbox").unwrap();

        let mut sub_a = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let mut sub_b = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub1".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].subscriber_count == 2).await;

        let mut publisher = submit(
            &broker,
            Request::RegisterPublisher {
                endpoint: "/tmp/pub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        publisher.send(b"fanout").await.unwrap();

        assert_eq!(recv_exact(&mut sub_a, 6).await, b"fanout");
        assert_eq!(recv_exact(&mut sub_b, 6).await, b"fanout");
    }

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let broker = Broker::start(BrokerConfig {
            worker_count: 1,
            queue_depth: 1,
            ..test_config()
        })
        .unwrap();
        broker.registry().create("mailbox").unwrap();

        // Occupy the only worker with a blocking subscriber session.
        let _subscriber = submit(
            &broker,
            Request::RegisterSubscriber {
                endpoint: "/tmp/sub0".into(),
                box_name: "mailbox".into(),
            },
        )
        .await;
        let registry = Arc::clone(broker.registry());
        wait_until(move || registry.list()[0].subscriber_count == 1).await;

        // One session fits in the queue; the next submit must block.
        let _queued = submit(&broker, create_request("a")).await;
        let (_, side) = ChannelEndpoint::pair(1);
        let blocked = broker.submit(create_request("b"), Box::new(side));
        assert!(
            timeout(Duration::from_millis(100), blocked).await.is_err(),
            "submit should block while the queue is full"
        );
    }

    #[tokio::test]
    async fn shutdown_drains_queued_sessions() {
        let broker = Broker::start(BrokerConfig {
            worker_count: 1,
            ..test_config()
        })
        .unwrap();

        let mut peer = submit(&broker, create_request("mailbox")).await;
        broker.shutdown().await;

        assert_eq!(recv_reply(&mut peer).await, Reply::created_ok());
    }
}
