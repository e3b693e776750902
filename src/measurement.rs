use crate::protection::Measurements;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MeasurementError {
    #[error("measurement source unavailable: {0}")]
    Unavailable(String),
}

/// Pull seam for the measured quantities. The relay polls this once per
/// control cycle and retains its last-known sample when a fetch fails.
pub trait MeasurementSource: Send {
    fn fetch(&mut self) -> Result<Measurements, MeasurementError>;
}

/// Shared mutable measurement cell: the simulator and the operator channel's
/// inject command write it, the relay control loop reads it.
#[derive(Debug, Clone)]
pub struct SharedMeasurementSource {
    inner: Arc<Mutex<Measurements>>,
}

impl SharedMeasurementSource {
    pub fn new(initial: Measurements) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn set(&self, measurements: Measurements) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = measurements;
    }

    pub fn get(&self) -> Measurements {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedMeasurementSource {
    fn default() -> Self {
        Self::new(Measurements::default())
    }
}

impl MeasurementSource for SharedMeasurementSource {
    fn fetch(&mut self) -> Result<Measurements, MeasurementError> {
        Ok(self.get())
    }
}
