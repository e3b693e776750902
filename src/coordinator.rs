use crate::goose::SequencedPublisher;
use crate::protection::ProtectionState;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Relay→breaker dataset layout: trip, breaker position mirror, any pickup,
/// overcurrent pickup.
pub const RELAY_DATASET_FLAGS: usize = 4;

pub type RelayDataset = [bool; RELAY_DATASET_FLAGS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinatorState {
    Normal,
    PickupArmed,
    TripLatched,
}

/// Relay-side coordination: decides when the local protection picture goes
/// out as a burst, when as a heartbeat, and when peer feedback releases the
/// trip latch.
#[derive(Debug)]
pub struct TripCoordinator {
    publisher: SequencedPublisher,
    heartbeat_interval_ms: u64,
    last_heartbeat_ms: u64,
    last_dataset: Option<RelayDataset>,
    breaker_open_mirror: bool,
}

impl TripCoordinator {
    pub fn new(publisher: SequencedPublisher, heartbeat_interval_ms: u64) -> Self {
        Self {
            publisher,
            heartbeat_interval_ms,
            last_heartbeat_ms: 0,
            last_dataset: None,
            breaker_open_mirror: false,
        }
    }

    /// Records the breaker position reported by the peer. The mirror is a
    /// projection of received data, never mutated locally.
    pub fn note_breaker_position(&mut self, open: bool) {
        self.breaker_open_mirror = open;
    }

    pub fn breaker_open(&self) -> bool {
        self.breaker_open_mirror
    }

    /// Feedback-driven release: the breaker reporting open while the trip is
    /// latched means the trip has been acted on.
    pub fn auto_reset(&self, state: &mut ProtectionState) -> bool {
        if state.trip_active && self.breaker_open_mirror {
            state.clear_trip();
            info!("trip reset - breaker opened (feedback)");
            true
        } else {
            false
        }
    }

    pub fn dataset(&self, state: &ProtectionState) -> RelayDataset {
        [
            state.trip_active,
            self.breaker_open_mirror,
            state.pickup_any(),
            state.overcurrent_pickup,
        ]
    }

    /// One publish decision: a burst when any dataset flag moved, and an
    /// unconditional heartbeat whenever the heartbeat timer has run out.
    pub async fn publish_step(&mut self, dataset: RelayDataset, now_ms: u64) {
        if self.last_dataset != Some(dataset) {
            info!(
                trip = dataset[0],
                breaker = dataset[1],
                pickup = dataset[2],
                oc_pickup = dataset[3],
                "dataset change - publishing burst"
            );
            self.last_dataset = Some(dataset);
            self.publisher.publish_on_change(&dataset, now_ms).await;
        }

        if now_ms.saturating_sub(self.last_heartbeat_ms) >= self.heartbeat_interval_ms {
            self.last_heartbeat_ms = now_ms;
            self.publisher.publish_heartbeat(&dataset, now_ms);
        }
    }

    pub fn state(&self, state: &ProtectionState) -> CoordinatorState {
        if state.trip_active {
            CoordinatorState::TripLatched
        } else if state.pickup_any() {
            CoordinatorState::PickupArmed
        } else {
            CoordinatorState::Normal
        }
    }

    pub fn publisher(&self) -> &SequencedPublisher {
        &self.publisher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protection::TripReason;

    #[test]
    fn derived_state_follows_the_latch() {
        let publisher = SequencedPublisher::new(
            crate::goose::StreamConfig {
                app_id: 1,
                gocb_ref: "test/LLN0$GO$gcb",
                dataset_ref: "test/LLN0$ds",
                ttl_ms: 3000,
            },
            Box::new(crate::goose::FrameRecorder::new()),
        );
        let coordinator = TripCoordinator::new(publisher, 3000);

        let mut state = ProtectionState::default();
        assert_eq!(coordinator.state(&state), CoordinatorState::Normal);

        state.overcurrent_pickup = true;
        assert_eq!(coordinator.state(&state), CoordinatorState::PickupArmed);

        state.latch_trip(TripReason::TimedOvercurrent);
        assert_eq!(coordinator.state(&state), CoordinatorState::TripLatched);
    }
}
