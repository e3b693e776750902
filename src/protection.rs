use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

// ANSI device numbers: 50/51 phase overcurrent, 50G/51G ground fault,
// 81U underfrequency.
pub const OC_INSTANTANEOUS_THRESHOLD_A: f32 = 2500.0;
pub const OC_PICKUP_THRESHOLD_A: f32 = 1000.0;
pub const OC_DWELL_MS: u64 = 1000;
pub const GF_INSTANTANEOUS_THRESHOLD_A: f32 = 800.0;
pub const GF_PICKUP_THRESHOLD_A: f32 = 300.0;
pub const GF_DWELL_MS: u64 = 500;
pub const UNDERFREQUENCY_TRIP_HZ: f32 = 48.5;
pub const FREQUENCY_BAND_LOW_HZ: f32 = 49.5;
pub const FREQUENCY_BAND_HIGH_HZ: f32 = 50.5;

/// One sample of the measured quantities the relay protects on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Measurements {
    pub voltage: f32,
    pub current: f32,
    pub frequency: f32,
    pub fault_current: f32,
}

impl Default for Measurements {
    fn default() -> Self {
        Self {
            voltage: 132.0,
            current: 450.0,
            frequency: 50.0,
            fault_current: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripReason {
    Normal,
    InstantaneousOvercurrent,
    TimedOvercurrent,
    InstantaneousGroundFault,
    TimedGroundFault,
    Underfrequency,
    ManualOperator,
    ManualSupervisory,
}

impl TripReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripReason::Normal => "Normal",
            TripReason::InstantaneousOvercurrent => "50 Instantaneous O/C",
            TripReason::TimedOvercurrent => "51 Time O/C",
            TripReason::InstantaneousGroundFault => "50G Instantaneous GF",
            TripReason::TimedGroundFault => "51G Time GF",
            TripReason::Underfrequency => "81U Underfrequency",
            TripReason::ManualOperator => "Manual Trip (operator)",
            TripReason::ManualSupervisory => "Manual Trip (supervisory)",
        }
    }
}

/// The relay's latched protection picture. Shared between the control loop,
/// the receive path and the command arbiter; the owning lock is the only
/// write path.
///
/// Pickup timers are tracked per cause so a ground-fault pickup arming late
/// cannot restart an overcurrent dwell already under way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectionState {
    pub overcurrent_pickup: bool,
    pub ground_fault_pickup: bool,
    pub oc_pickup_since_ms: Option<u64>,
    pub gf_pickup_since_ms: Option<u64>,
    pub trip_active: bool,
    pub trip_reason: TripReason,
}

impl Default for ProtectionState {
    fn default() -> Self {
        Self {
            overcurrent_pickup: false,
            ground_fault_pickup: false,
            oc_pickup_since_ms: None,
            gf_pickup_since_ms: None,
            trip_active: false,
            trip_reason: TripReason::Normal,
        }
    }
}

impl ProtectionState {
    pub fn pickup_any(&self) -> bool {
        self.overcurrent_pickup || self.ground_fault_pickup
    }

    /// Latches the trip with its cause. Invariant: an active trip always
    /// carries a reason other than `Normal`.
    pub fn latch_trip(&mut self, reason: TripReason) {
        self.trip_active = true;
        self.trip_reason = reason;
    }

    /// Clears the trip latch only, leaving pickup timers to the reset rule.
    pub fn clear_trip(&mut self) {
        self.trip_active = false;
        self.trip_reason = TripReason::Normal;
    }

    /// Explicit reset: drops the latch and both pickup timers unconditionally.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

pub type SharedProtectionState = Arc<Mutex<ProtectionState>>;

pub fn shared_protection_state() -> SharedProtectionState {
    Arc::new(Mutex::new(ProtectionState::default()))
}

/// Threshold/time-curve evaluation, run once per control cycle.
///
/// Element order is load-bearing: overcurrent before ground fault before
/// frequency, and an active trip is never relabelled by a later element.
#[derive(Debug)]
pub struct ProtectionEngine {
    oc_instantaneous_a: f32,
    oc_pickup_a: f32,
    oc_dwell_ms: u64,
    gf_instantaneous_a: f32,
    gf_pickup_a: f32,
    gf_dwell_ms: u64,
    underfrequency_hz: f32,
    band_low_hz: f32,
    band_high_hz: f32,
}

impl ProtectionEngine {
    pub fn new() -> Self {
        Self {
            oc_instantaneous_a: OC_INSTANTANEOUS_THRESHOLD_A,
            oc_pickup_a: OC_PICKUP_THRESHOLD_A,
            oc_dwell_ms: OC_DWELL_MS,
            gf_instantaneous_a: GF_INSTANTANEOUS_THRESHOLD_A,
            gf_pickup_a: GF_PICKUP_THRESHOLD_A,
            gf_dwell_ms: GF_DWELL_MS,
            underfrequency_hz: UNDERFREQUENCY_TRIP_HZ,
            band_low_hz: FREQUENCY_BAND_LOW_HZ,
            band_high_hz: FREQUENCY_BAND_HIGH_HZ,
        }
    }

    /// Evaluates one measurement sample against the element table, mutating
    /// `state` in place. Returns the cause when a new trip latched this
    /// cycle.
    pub fn evaluate(
        &self,
        state: &mut ProtectionState,
        meas: &Measurements,
        now_ms: u64,
    ) -> Option<TripReason> {
        // Reset rule: quiet measurements release the pickup timers, but an
        // active trip keeps its latch and reason until reset or feedback.
        if !state.trip_active
            && meas.current < self.oc_pickup_a
            && meas.fault_current < self.gf_pickup_a
            && meas.frequency > self.band_low_hz
            && meas.frequency < self.band_high_hz
        {
            if state.pickup_any() {
                info!("protection reset - normal conditions");
            }
            state.overcurrent_pickup = false;
            state.ground_fault_pickup = false;
            state.oc_pickup_since_ms = None;
            state.gf_pickup_since_ms = None;
            state.trip_reason = TripReason::Normal;
        }

        let mut tripped = None;

        // 50 / 51
        if meas.current >= self.oc_instantaneous_a {
            if !state.trip_active {
                state.latch_trip(TripReason::InstantaneousOvercurrent);
                tripped = Some(TripReason::InstantaneousOvercurrent);
            }
        } else if meas.current >= self.oc_pickup_a {
            if !state.overcurrent_pickup {
                state.overcurrent_pickup = true;
                state.oc_pickup_since_ms = Some(now_ms);
                info!(current = meas.current, "51 O/C pickup - timer started");
            } else if let Some(since) = state.oc_pickup_since_ms {
                if now_ms.saturating_sub(since) > self.oc_dwell_ms && !state.trip_active {
                    state.latch_trip(TripReason::TimedOvercurrent);
                    tripped = Some(TripReason::TimedOvercurrent);
                }
            }
        }

        // 50G / 51G
        if meas.fault_current >= self.gf_instantaneous_a {
            if !state.trip_active {
                state.latch_trip(TripReason::InstantaneousGroundFault);
                tripped = Some(TripReason::InstantaneousGroundFault);
            }
        } else if meas.fault_current >= self.gf_pickup_a {
            if !state.ground_fault_pickup {
                state.ground_fault_pickup = true;
                state.gf_pickup_since_ms = Some(now_ms);
                info!(
                    fault_current = meas.fault_current,
                    "51G GF pickup - timer started"
                );
            } else if let Some(since) = state.gf_pickup_since_ms {
                if now_ms.saturating_sub(since) > self.gf_dwell_ms && !state.trip_active {
                    state.latch_trip(TripReason::TimedGroundFault);
                    tripped = Some(TripReason::TimedGroundFault);
                }
            }
        }

        // 81U
        if meas.frequency < self.underfrequency_hz && !state.trip_active {
            state.latch_trip(TripReason::Underfrequency);
            tripped = Some(TripReason::Underfrequency);
        }

        if let Some(reason) = tripped {
            info!(reason = reason.as_str(), "protection trip");
        }

        tripped
    }
}

impl Default for ProtectionEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Measurements {
        Measurements::default()
    }

    fn with_current(current: f32) -> Measurements {
        Measurements {
            current,
            ..Measurements::default()
        }
    }

    fn with_fault_current(fault_current: f32) -> Measurements {
        Measurements {
            fault_current,
            ..Measurements::default()
        }
    }

    #[test]
    fn quiet_measurements_stay_normal() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();

        assert!(engine.evaluate(&mut state, &quiet(), 0).is_none());
        assert!(!state.trip_active);
        assert!(!state.pickup_any());
        assert_eq!(state.trip_reason, TripReason::Normal);
    }

    #[test]
    fn timed_overcurrent_waits_out_the_dwell() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();
        let fault = with_current(1500.0);

        assert!(engine.evaluate(&mut state, &fault, 0).is_none());
        assert!(state.overcurrent_pickup);
        assert_eq!(state.oc_pickup_since_ms, Some(0));

        // Inside the dwell: armed but not tripped.
        assert!(engine.evaluate(&mut state, &fault, 999).is_none());
        assert!(!state.trip_active);

        // Past the dwell: timed trip.
        assert_eq!(
            engine.evaluate(&mut state, &fault, 1001),
            Some(TripReason::TimedOvercurrent)
        );
        assert!(state.trip_active);
        assert_eq!(state.trip_reason, TripReason::TimedOvercurrent);
    }

    #[test]
    fn instantaneous_overcurrent_skips_pickup() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();

        assert_eq!(
            engine.evaluate(&mut state, &with_current(3000.0), 0),
            Some(TripReason::InstantaneousOvercurrent)
        );
        assert!(state.trip_active);
        assert!(!state.overcurrent_pickup);
        assert!(state.oc_pickup_since_ms.is_none());
    }

    #[test]
    fn timed_ground_fault_uses_its_own_dwell() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();
        let fault = with_fault_current(500.0);

        assert!(engine.evaluate(&mut state, &fault, 0).is_none());
        assert!(state.ground_fault_pickup);
        assert!(engine.evaluate(&mut state, &fault, 400).is_none());
        assert_eq!(
            engine.evaluate(&mut state, &fault, 501),
            Some(TripReason::TimedGroundFault)
        );
    }

    #[test]
    fn instantaneous_ground_fault_and_underfrequency_trip_immediately() {
        let engine = ProtectionEngine::new();

        let mut state = ProtectionState::default();
        assert_eq!(
            engine.evaluate(&mut state, &with_fault_current(900.0), 0),
            Some(TripReason::InstantaneousGroundFault)
        );

        let mut state = ProtectionState::default();
        let low_freq = Measurements {
            frequency: 48.0,
            ..Measurements::default()
        };
        assert_eq!(
            engine.evaluate(&mut state, &low_freq, 0),
            Some(TripReason::Underfrequency)
        );
    }

    #[test]
    fn pickup_timers_run_per_cause() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();

        // Overcurrent arms first.
        assert!(engine
            .evaluate(&mut state, &with_current(1500.0), 0)
            .is_none());

        // Ground fault arms 300 ms later; both conditions now present.
        let both = Measurements {
            current: 1500.0,
            fault_current: 500.0,
            ..Measurements::default()
        };
        assert!(engine.evaluate(&mut state, &both, 300).is_none());
        assert_eq!(state.oc_pickup_since_ms, Some(0));
        assert_eq!(state.gf_pickup_since_ms, Some(300));

        // The overcurrent dwell still counts from its own start.
        assert_eq!(
            engine.evaluate(&mut state, &both, 1001),
            Some(TripReason::TimedOvercurrent)
        );
    }

    #[test]
    fn active_trip_reason_is_never_overwritten() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();

        assert_eq!(
            engine.evaluate(&mut state, &with_current(3000.0), 0),
            Some(TripReason::InstantaneousOvercurrent)
        );

        // A later ground fault cannot relabel the latched trip.
        let gf = with_fault_current(900.0);
        assert!(engine.evaluate(&mut state, &gf, 100).is_none());
        assert_eq!(state.trip_reason, TripReason::InstantaneousOvercurrent);
    }

    #[test]
    fn reset_rule_releases_pickups_but_not_the_latch() {
        let engine = ProtectionEngine::new();
        let mut state = ProtectionState::default();

        assert!(engine
            .evaluate(&mut state, &with_current(1500.0), 0)
            .is_none());
        assert!(state.overcurrent_pickup);

        // Quiet again before the dwell expires: pickup released.
        assert!(engine.evaluate(&mut state, &quiet(), 500).is_none());
        assert!(!state.pickup_any());
        assert!(state.oc_pickup_since_ms.is_none());

        // A latched manual trip survives quiet measurements with its reason.
        state.latch_trip(TripReason::ManualOperator);
        assert!(engine.evaluate(&mut state, &quiet(), 1000).is_none());
        assert!(state.trip_active);
        assert_eq!(state.trip_reason, TripReason::ManualOperator);
    }
}
