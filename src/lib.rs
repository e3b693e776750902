//! # Process-Bus Substation Cell Simulator
//!
//! A substation automation cell in miniature: a protection relay and a
//! circuit breaker coordinating over a GOOSE-style publish/subscribe bus,
//! with supervisory and operator command channels on top.
//!
//! ## Features
//!
//! - **Sequenced publishing**: stNum/sqNum discipline with change bursts and
//!   periodic heartbeats
//! - **Receive supervision**: per-peer liveness inside a 5000 ms window
//! - **Protection elements**: 50/51 overcurrent, 50G/51G ground fault and
//!   81U underfrequency with per-cause pickup timers
//! - **Trip coordination**: feedback-driven latch release between the two
//!   devices
//! - **Command arbitration**: supervisory and operator channels serialized
//!   against the automatic protection decisions
//!
//! ## Quick Start
//!
//! ```rust
//! use procbus::goose::FrameRecorder;
//! use procbus::measurement::SharedMeasurementSource;
//! use procbus::relay::RelayAgent;
//!
//! let recorder = FrameRecorder::new();
//! let source = SharedMeasurementSource::default();
//! let relay = RelayAgent::new(Box::new(recorder), Box::new(source));
//! assert!(!relay.snapshot(0).trip_active);
//! ```
//!
//! ## Architecture
//!
//! - [`goose`] - frames, the in-process bus, sequenced publisher and
//!   supervised subscriber
//! - [`protection`] - measurements, latched state and the element table
//! - [`coordinator`] - relay-side publish/auto-reset coordination
//! - [`arbiter`] - command origin serialization
//! - [`control`] - control-channel wire protocol and status snapshots
//! - [`measurement`] - measurement ingestion seam
//! - [`relay`] / [`breaker`] - the two device agents

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod arbiter;
pub mod breaker;
pub mod control;
pub mod coordinator;
pub mod goose;
pub mod measurement;
pub mod protection;
pub mod relay;

// Re-export main public types for convenience
pub use arbiter::{BreakerArbiter, CommandOrigin, RelayArbiter};
pub use breaker::BreakerAgent;
pub use control::{ControlRequest, ControlResponse, StatusSnapshot};
pub use goose::{GooseBus, GooseFrame, SequencedPublisher, SupervisedSubscriber};
pub use protection::{Measurements, ProtectionEngine, ProtectionState, TripReason};
pub use relay::RelayAgent;
