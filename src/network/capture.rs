//! Shared capture with per-probe fan-out
//!
//! One capture source per target feeds a [`CaptureHub`]. Every in-flight probe
//! subscribes with a predicate and receives the frames it matches on a private
//! queue. Dropping the [`Subscription`] deregisters the probe.

use crate::ScanError;
use pnet::datalink::{self, Channel, DataLinkReceiver, NetworkInterface};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long a blocking read may wait before the reader re-checks its stop flag
pub const CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub type FramePredicate = Box<dyn Fn(&[u8]) -> bool + Send + Sync>;

struct Subscriber {
    predicate: FramePredicate,
    queue: mpsc::UnboundedSender<Vec<u8>>,
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<u64, Subscriber>,
    failure: Option<String>,
}

/// Fan-out of captured frames to the probes waiting for them
#[derive(Default)]
pub struct CaptureHub {
    state: Mutex<HubState>,
    next_id: AtomicU64,
}

impl CaptureHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // A panicking predicate must not take every other probe down with it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a predicate. Matching frames are queued until the subscription drops.
    ///
    /// On a failed hub the queue is closed from the start.
    pub fn subscribe<F>(self: &Arc<Self>, predicate: F) -> Subscription
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.lock();
        if state.failure.is_none() {
            state.subscribers.insert(
                id,
                Subscriber {
                    predicate: Box::new(predicate),
                    queue: tx,
                },
            );
        }
        drop(state);

        Subscription {
            id,
            queue: rx,
            hub: Arc::clone(self),
        }
    }

    /// Hand a frame to every subscriber whose predicate matches.
    /// Returns the number of queues it was delivered to.
    pub fn dispatch(&self, frame: &[u8]) -> usize {
        let state = self.lock();
        state
            .subscribers
            .values()
            .filter(|sub| (sub.predicate)(frame))
            .filter(|sub| sub.queue.send(frame.to_vec()).is_ok())
            .count()
    }

    /// Mark the source feeding this hub as dead and close every queue
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.lock();
        state.failure.get_or_insert_with(|| reason.into());
        state.subscribers.clear();
    }

    /// Why the source stopped, if it did
    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().subscribers.remove(&id);
    }
}

/// What a probe's wait ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reception {
    Frame(Vec<u8>),
    /// The deadline passed without a matching frame
    TimedOut,
    /// The capture feeding the hub died; nothing more will arrive
    CaptureFailed(String),
}

/// A probe's private response queue
pub struct Subscription {
    id: u64,
    queue: mpsc::UnboundedReceiver<Vec<u8>>,
    hub: Arc<CaptureHub>,
}

impl Subscription {
    /// Next matching frame, or why none is coming before `deadline`
    pub async fn recv_until(&mut self, deadline: tokio::time::Instant) -> Reception {
        match tokio::time::timeout_at(deadline, self.queue.recv()).await {
            Ok(Some(frame)) => Reception::Frame(frame),
            Ok(None) => Reception::CaptureFailed(
                self.hub
                    .failure()
                    .unwrap_or_else(|| "capture closed".to_string()),
            ),
            Err(_) => match self.hub.failure() {
                Some(reason) => Reception::CaptureFailed(reason),
                None => Reception::TimedOut,
            },
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

/// Blocking source of raw frames or packets
pub trait FrameReader: Send + 'static {
    /// `Ok(None)` when the read timed out without data
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// A running capture: a reader thread feeding a hub
pub struct CaptureHandle {
    hub: Arc<CaptureHub>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    /// Spawn a reader thread. Only frames passing `filter` reach the hub.
    ///
    /// A read error ends the thread and fails the hub.
    pub fn spawn<R, F>(mut reader: R, filter: F) -> Self
    where
        R: FrameReader,
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        let hub = CaptureHub::new();
        let stop = Arc::new(AtomicBool::new(false));

        let worker_hub = Arc::clone(&hub);
        let worker_stop = Arc::clone(&stop);
        let worker = std::thread::spawn(move || {
            while !worker_stop.load(Ordering::Relaxed) {
                match reader.next_frame() {
                    Ok(Some(frame)) => {
                        if filter(&frame) {
                            worker_hub.dispatch(&frame);
                        }
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        log::warn!("Capture reader stopped: {}", e);
                        worker_hub.fail(e.to_string());
                        break;
                    }
                }
            }
        });

        Self {
            hub,
            stop,
            worker: Some(worker),
        }
    }

    /// Wrap a hub that is fed by someone else
    pub fn detached(hub: Arc<CaptureHub>) -> Self {
        Self {
            hub,
            stop: Arc::new(AtomicBool::new(true)),
            worker: None,
        }
    }

    pub fn hub(&self) -> &Arc<CaptureHub> {
        &self.hub
    }
}

impl Drop for CaptureHandle {
    /// Stops the reader and waits for it, at most one poll interval, so the
    /// channel or socket it owns is closed when the handle is gone
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Capture reader panicked");
            }
        }
    }
}

/// Opens the capture a scan engine listens on for one target
pub trait CaptureSource: Send + Sync {
    fn open(&self, target: std::net::IpAddr) -> crate::Result<CaptureHandle>;
}

/// Link-layer reader backed by a pnet datalink channel
pub struct DatalinkReader {
    rx: Box<dyn DataLinkReceiver>,
}

impl DatalinkReader {
    /// Open a promiscuous channel on `interface`
    pub fn open(interface: &NetworkInterface) -> crate::Result<Self> {
        let config = datalink::Config {
            promiscuous: true,
            read_timeout: Some(CAPTURE_POLL_INTERVAL),
            ..Default::default()
        };

        match datalink::channel(interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => Ok(Self { rx }),
            Ok(_) => Err(ScanError::CaptureUnavailable(format!(
                "{}: unsupported channel type",
                interface.name
            ))),
            Err(e) => Err(ScanError::CaptureUnavailable(format!("{}: {}", interface.name, e))),
        }
    }
}

impl FrameReader for DatalinkReader {
    fn next_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
