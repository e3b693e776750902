use crate::breaker::{BREAKER_DATASET_FLAGS, BREAKER_GOCB_REF, BREAKER_GOOSE_APP_ID};
use crate::control::{DeviceKind, LinkSupervision, StatusSnapshot};
use crate::coordinator::TripCoordinator;
use crate::goose::{
    GooseFrame, GooseTransport, SequencedPublisher, StreamConfig, SupervisedSubscriber,
};
use crate::measurement::MeasurementSource;
use crate::protection::{
    shared_protection_state, Measurements, ProtectionEngine, SharedProtectionState,
};
use std::sync::PoisonError;
use std::time::Instant;
use tracing::{info, warn};

pub const RELAY_CYCLE_MS: u64 = 500;
pub const RELAY_HEARTBEAT_MS: u64 = 3000;
pub const RELAY_GOOSE_APP_ID: u16 = 4096;
pub const RELAY_GOCB_REF: &str = "PROT_REL_001/LLN0$GO$gcbEvents";
pub const RELAY_DATASET_REF: &str = "PROT_REL_001/LLN0$Events";
pub const RELAY_TTL_MS: u32 = 3000;

/// The protection relay device: evaluates measurements on a 500 ms cycle,
/// publishes its 4-flag picture to the breaker, and supervises the breaker's
/// position feedback.
pub struct RelayAgent {
    state: SharedProtectionState,
    engine: ProtectionEngine,
    coordinator: TripCoordinator,
    feedback: SupervisedSubscriber,
    source: Box<dyn MeasurementSource>,
    measurements: Measurements,
    started: Instant,
    cycle_count: u64,
}

impl RelayAgent {
    pub fn new(transport: Box<dyn GooseTransport>, source: Box<dyn MeasurementSource>) -> Self {
        let publisher = SequencedPublisher::new(
            StreamConfig {
                app_id: RELAY_GOOSE_APP_ID,
                gocb_ref: RELAY_GOCB_REF,
                dataset_ref: RELAY_DATASET_REF,
                ttl_ms: RELAY_TTL_MS,
            },
            transport,
        );

        Self {
            state: shared_protection_state(),
            engine: ProtectionEngine::new(),
            coordinator: TripCoordinator::new(publisher, RELAY_HEARTBEAT_MS),
            feedback: SupervisedSubscriber::new(
                BREAKER_GOOSE_APP_ID,
                BREAKER_GOCB_REF,
                BREAKER_DATASET_FLAGS,
            ),
            source,
            measurements: Measurements::default(),
            started: Instant::now(),
            cycle_count: 0,
        }
    }

    /// Handle to the mutex-guarded protection state, shared with the
    /// command arbiter.
    pub fn shared_state(&self) -> SharedProtectionState {
        self.state.clone()
    }

    pub fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Receive path: frames from the bus that belong to the breaker's status
    /// stream update supervision and the position mirror. Mirror changes are
    /// published immediately so observers see the new position.
    pub async fn handle_frame(&mut self, frame: &GooseFrame, now_ms: u64) {
        if !self.feedback.matches(frame) {
            return;
        }
        if let Some(event) = self.feedback.on_frame(frame, now_ms) {
            let open = event.payload.first().copied().unwrap_or(false);
            if open != self.coordinator.breaker_open() {
                info!(open, "breaker position received");
            }
            self.coordinator.note_breaker_position(open);
            self.publish_now(now_ms).await;
        }
    }

    /// One control cycle: poll measurements, run the protection elements and
    /// the feedback auto-reset under the state lock, then publish outside it.
    pub async fn step(&mut self, now_ms: u64) {
        match self.source.fetch() {
            Ok(m) => self.measurements = m,
            Err(e) => {
                warn!(error = %e, "measurement fetch failed - retaining last known values");
            }
        }

        let dataset = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.engine.evaluate(&mut state, &self.measurements, now_ms);
            self.coordinator.auto_reset(&mut state);
            self.coordinator.dataset(&state)
        };

        self.coordinator.publish_step(dataset, now_ms).await;
        self.cycle_count += 1;
    }

    /// Publish decision outside the regular cycle, used after an arbiter
    /// nudge or a feedback change.
    pub async fn publish_now(&mut self, now_ms: u64) {
        let dataset = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            self.coordinator.dataset(&state)
        };
        self.coordinator.publish_step(dataset, now_ms).await;
    }

    pub fn snapshot(&self, now_ms: u64) -> StatusSnapshot {
        let (trip_active, pickup_any, overcurrent_pickup, trip_reason) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            (
                state.trip_active,
                state.pickup_any(),
                state.overcurrent_pickup,
                state.trip_reason,
            )
        };
        let record = self.feedback.record();
        let publisher = self.coordinator.publisher();

        StatusSnapshot {
            device: DeviceKind::ProtectionRelay,
            trip_active,
            breaker_open: self.coordinator.breaker_open(),
            pickup_any,
            overcurrent_pickup,
            trip_reason,
            measurements: Some(self.measurements),
            link: LinkSupervision {
                rx_count: record.message_count,
                last_rx_age_ms: self.feedback.last_rx_age_ms(now_ms),
                rx_ok: self.feedback.is_alive(now_ms),
                tx_count: publisher.tx_count(),
                last_tx_age_ms: publisher.last_tx_age_ms(now_ms),
                tx_ok: publisher.tx_ok(now_ms),
            },
        }
    }

    pub fn measurements(&self) -> Measurements {
        self.measurements
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn feedback(&self) -> &SupervisedSubscriber {
        &self.feedback
    }

    pub fn coordinator(&self) -> &TripCoordinator {
        &self.coordinator
    }
}
