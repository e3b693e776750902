use crate::breaker::SharedBreakerState;
use crate::protection::{SharedProtectionState, TripReason};
use serde::{Deserialize, Serialize};
use std::sync::PoisonError;
use tokio::sync::mpsc;
use tracing::info;

/// Where a command entered the system. Automatic decisions come from the
/// protection engine inside the control loop; the two external origins are
/// the supervisory control channel and the local operator channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOrigin {
    Automatic,
    Supervisory,
    Operator,
}

impl CommandOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOrigin::Automatic => "automatic",
            CommandOrigin::Supervisory => "supervisory",
            CommandOrigin::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    Trip,
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerCommand {
    Open,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejected {
    /// Select/operate semantics: a command must represent a transition.
    #[error("already in the requested state")]
    NoTransition,
    /// Automatic trips are latched by the engine under the state lock, not
    /// routed through the arbiter.
    #[error("origin not accepted on this channel")]
    UnsupportedOrigin,
}

/// Serializes relay commands from concurrent origins into single-writer
/// mutations: take the lock, apply exactly one command, release, then nudge
/// the device loop so publication happens outside the critical section.
#[derive(Debug, Clone)]
pub struct RelayArbiter {
    state: SharedProtectionState,
    nudge: mpsc::UnboundedSender<()>,
}

impl RelayArbiter {
    pub fn new(state: SharedProtectionState, nudge: mpsc::UnboundedSender<()>) -> Self {
        Self { state, nudge }
    }

    pub fn apply(
        &self,
        origin: CommandOrigin,
        command: RelayCommand,
    ) -> Result<(), CommandRejected> {
        let reason = manual_reason(origin)?;

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match command {
                RelayCommand::Trip => {
                    if state.trip_active {
                        return Err(CommandRejected::NoTransition);
                    }
                    state.latch_trip(reason);
                }
                RelayCommand::Reset => {
                    if !state.trip_active && !state.pickup_any() {
                        return Err(CommandRejected::NoTransition);
                    }
                    state.reset();
                }
            }
        }

        info!(origin = origin.as_str(), command = ?command, "relay command applied");
        let _ = self.nudge.send(());
        Ok(())
    }
}

/// Breaker-side counterpart of [`RelayArbiter`], with open/close transition
/// semantics over the shared breaker state.
#[derive(Debug, Clone)]
pub struct BreakerArbiter {
    state: SharedBreakerState,
    nudge: mpsc::UnboundedSender<()>,
}

impl BreakerArbiter {
    pub fn new(state: SharedBreakerState, nudge: mpsc::UnboundedSender<()>) -> Self {
        Self { state, nudge }
    }

    pub fn apply(
        &self,
        origin: CommandOrigin,
        command: BreakerCommand,
    ) -> Result<(), CommandRejected> {
        if origin == CommandOrigin::Automatic {
            return Err(CommandRejected::UnsupportedOrigin);
        }

        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match command {
                BreakerCommand::Open => {
                    if state.open {
                        return Err(CommandRejected::NoTransition);
                    }
                    state.open = true;
                    // An operator-commanded open is a standing trip request;
                    // a supervisory open is a plain switching operation.
                    state.trip_received = origin == CommandOrigin::Operator;
                }
                BreakerCommand::Close => {
                    if !state.open {
                        return Err(CommandRejected::NoTransition);
                    }
                    state.open = false;
                    state.trip_received = false;
                }
            }
        }

        info!(origin = origin.as_str(), command = ?command, "breaker command applied");
        let _ = self.nudge.send(());
        Ok(())
    }
}

fn manual_reason(origin: CommandOrigin) -> Result<TripReason, CommandRejected> {
    match origin {
        CommandOrigin::Supervisory => Ok(TripReason::ManualSupervisory),
        CommandOrigin::Operator => Ok(TripReason::ManualOperator),
        CommandOrigin::Automatic => Err(CommandRejected::UnsupportedOrigin),
    }
}
