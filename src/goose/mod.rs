pub mod publisher;
pub mod subscriber;

pub use publisher::{SequencedPublisher, StreamConfig};
pub use subscriber::{RxEvent, RxKind, SupervisedSubscriber, SupervisionRecord};

use arrayvec::ArrayString;
use heapless::Vec;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::broadcast;

pub const MAX_DATASET_FLAGS: usize = 8;
pub const MAX_REF_LEN: usize = 64;

/// Receive/transmit supervision window shared by every device on the bus.
pub const SUPERVISION_TIMEOUT_MS: u64 = 5000;

pub type DatasetPayload = Vec<bool, MAX_DATASET_FLAGS>;
pub type ObjectRef = ArrayString<MAX_REF_LEN>;

/// One GOOSE publication as it travels the process bus.
///
/// Encoding to the wire format is a transport concern; in-process the frame
/// itself is the message.
#[derive(Debug, Clone, PartialEq)]
pub struct GooseFrame {
    pub app_id: u16,
    pub gocb_ref: ObjectRef,
    pub dataset_ref: ObjectRef,
    pub st_num: u32,
    pub sq_num: u32,
    pub ttl_ms: u32,
    pub timestamp_ms: u64,
    pub payload: DatasetPayload,
}

/// Copies a control-block or dataset reference into a bounded buffer.
pub fn bounded_ref(s: &str) -> ObjectRef {
    let mut out = ObjectRef::new();
    for ch in s.chars() {
        if out.try_push(ch).is_err() {
            break;
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no subscribers on the bus")]
    NoSubscribers,
    #[error("transport link down")]
    LinkDown,
}

/// Outbound publish seam. The simulator backs this with [`GooseBus`];
/// tests back it with [`FrameRecorder`] or [`DeadTransport`].
pub trait GooseTransport: Send + std::fmt::Debug {
    fn transmit(&self, frame: GooseFrame) -> Result<(), TransportError>;
}

/// In-process multicast segment: every subscriber sees every frame, and
/// senders never block. Receivers filter by app id / control block ref.
#[derive(Debug)]
pub struct GooseBus {
    tx: broadcast::Sender<GooseFrame>,
}

impl GooseBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn transport(&self) -> BusTransport {
        BusTransport {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GooseFrame> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone)]
pub struct BusTransport {
    tx: broadcast::Sender<GooseFrame>,
}

impl GooseTransport for BusTransport {
    fn transmit(&self, frame: GooseFrame) -> Result<(), TransportError> {
        self.tx
            .send(frame)
            .map(|_| ())
            .map_err(|_| TransportError::NoSubscribers)
    }
}

/// Captures transmitted frames together with their wall-clock transmit
/// instants, for asserting burst shape and spacing.
#[derive(Debug, Clone, Default)]
pub struct FrameRecorder {
    frames: Arc<Mutex<std::vec::Vec<(Instant, GooseFrame)>>>,
}

impl FrameRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> std::vec::Vec<GooseFrame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn instants(&self) -> std::vec::Vec<Instant> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl GooseTransport for FrameRecorder {
    fn transmit(&self, frame: GooseFrame) -> Result<(), TransportError> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), frame));
        Ok(())
    }
}

/// A transport whose link never comes up. Publish calls against it must
/// degrade to logged no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeadTransport;

impl GooseTransport for DeadTransport {
    fn transmit(&self, _frame: GooseFrame) -> Result<(), TransportError> {
        Err(TransportError::LinkDown)
    }
}
