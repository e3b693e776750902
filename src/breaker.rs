use crate::control::{DeviceKind, LinkSupervision, StatusSnapshot};
use crate::coordinator::RELAY_DATASET_FLAGS;
use crate::goose::{
    GooseFrame, GooseTransport, SequencedPublisher, StreamConfig, SupervisedSubscriber,
};
use crate::protection::TripReason;
use crate::relay::{RELAY_GOCB_REF, RELAY_GOOSE_APP_ID};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::info;

pub const BREAKER_CYCLE_MS: u64 = 100;
pub const BREAKER_HEARTBEAT_MS: u64 = 1000;
pub const BREAKER_GOOSE_APP_ID: u16 = 4097;
pub const BREAKER_GOCB_REF: &str = "CB_LINE_01_001/LLN0$GO$gcbStatus";
pub const BREAKER_DATASET_REF: &str = "CB_LINE_01_001/LLN0$BrkStatus";
pub const BREAKER_TTL_MS: u32 = 5000;

/// Breaker→relay dataset layout: the breaker position alone.
pub const BREAKER_DATASET_FLAGS: usize = 1;

pub type BreakerDataset = [bool; BREAKER_DATASET_FLAGS];

/// The breaker's switching state. Shared between the receive path and the
/// command arbiter; the owning lock is the only write path.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BreakerState {
    pub open: bool,
    /// A trip command is standing: set when the relay's trip flag opens the
    /// breaker, cleared when the flag drops or the breaker is re-closed.
    pub trip_received: bool,
}

pub type SharedBreakerState = Arc<Mutex<BreakerState>>;

pub fn shared_breaker_state() -> SharedBreakerState {
    Arc::new(Mutex::new(BreakerState::default()))
}

/// The circuit breaker device: supervises the relay's event stream, opens on
/// a standing trip flag, and reports its position back on its own stream.
pub struct BreakerAgent {
    state: SharedBreakerState,
    relay_rx: SupervisedSubscriber,
    publisher: SequencedPublisher,
    heartbeat_interval_ms: u64,
    last_heartbeat_ms: u64,
    last_dataset: Option<BreakerDataset>,
    /// Last accepted relay dataset, kept for the status projection.
    last_relay_flags: [bool; RELAY_DATASET_FLAGS],
    started: Instant,
    cycle_count: u64,
}

impl BreakerAgent {
    pub fn new(transport: Box<dyn GooseTransport>) -> Self {
        Self {
            state: shared_breaker_state(),
            relay_rx: SupervisedSubscriber::new(
                RELAY_GOOSE_APP_ID,
                RELAY_GOCB_REF,
                RELAY_DATASET_FLAGS,
            ),
            publisher: SequencedPublisher::new(
                StreamConfig {
                    app_id: BREAKER_GOOSE_APP_ID,
                    gocb_ref: BREAKER_GOCB_REF,
                    dataset_ref: BREAKER_DATASET_REF,
                    ttl_ms: BREAKER_TTL_MS,
                },
                transport,
            ),
            heartbeat_interval_ms: BREAKER_HEARTBEAT_MS,
            last_heartbeat_ms: 0,
            last_dataset: None,
            last_relay_flags: [false; RELAY_DATASET_FLAGS],
            started: Instant::now(),
            cycle_count: 0,
        }
    }

    pub fn shared_state(&self) -> SharedBreakerState {
        self.state.clone()
    }

    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Receive path: a standing trip flag from the relay opens a closed
    /// breaker; the position change goes straight back out as a burst. The
    /// trip flag dropping clears the standing request without a publish.
    pub async fn handle_frame(&mut self, frame: &GooseFrame, now_ms: u64) {
        if !self.relay_rx.matches(frame) {
            return;
        }
        let event = match self.relay_rx.on_frame(frame, now_ms) {
            Some(event) => event,
            None => return,
        };

        for (slot, flag) in self
            .last_relay_flags
            .iter_mut()
            .zip(event.payload.iter())
        {
            *slot = *flag;
        }
        let trip = self.last_relay_flags[0];

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if trip && !state.open {
                state.open = true;
                state.trip_received = true;
                info!("trip command received - opening breaker");
            } else if !trip && state.trip_received {
                state.trip_received = false;
                info!("trip command cleared");
            }
        }

        self.publish_now(now_ms).await;
    }

    /// One control cycle: publish on any position change and keep the
    /// heartbeat going.
    pub async fn step(&mut self, now_ms: u64) {
        self.publish_now(now_ms).await;
        if now_ms.saturating_sub(self.last_heartbeat_ms) >= self.heartbeat_interval_ms {
            self.last_heartbeat_ms = now_ms;
            let dataset = self.dataset();
            self.publisher.publish_heartbeat(&dataset, now_ms);
        }
        self.cycle_count += 1;
    }

    /// Publishes a burst when the position moved since the last publication.
    pub async fn publish_now(&mut self, now_ms: u64) {
        let dataset = self.dataset();
        if self.last_dataset != Some(dataset) {
            info!(open = dataset[0], "breaker position change - publishing burst");
            self.last_dataset = Some(dataset);
            self.publisher.publish_on_change(&dataset, now_ms).await;
        }
    }

    fn dataset(&self) -> BreakerDataset {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        [state.open]
    }

    pub fn snapshot(&self, now_ms: u64) -> StatusSnapshot {
        let state = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state
        };
        let record = self.relay_rx.record();

        StatusSnapshot {
            device: DeviceKind::CircuitBreaker,
            trip_active: state.trip_received,
            breaker_open: state.open,
            pickup_any: self.last_relay_flags[2],
            overcurrent_pickup: self.last_relay_flags[3],
            // The breaker sees the trip flag, not its cause.
            trip_reason: TripReason::Normal,
            measurements: None,
            link: LinkSupervision {
                rx_count: record.message_count,
                last_rx_age_ms: self.relay_rx.last_rx_age_ms(now_ms),
                rx_ok: self.relay_rx.is_alive(now_ms),
                tx_count: self.publisher.tx_count(),
                last_tx_age_ms: self.publisher.last_tx_age_ms(now_ms),
                tx_ok: self.publisher.tx_ok(now_ms),
            },
        }
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn relay_rx(&self) -> &SupervisedSubscriber {
        &self.relay_rx
    }

    pub fn publisher(&self) -> &SequencedPublisher {
        &self.publisher
    }
}
