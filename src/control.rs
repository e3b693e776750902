use crate::protection::{Measurements, TripReason};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};

pub const MAX_REQUEST_SIZE: usize = 512;
pub const MAX_RESPONSE_SIZE: usize = 1024;

pub type RequestBuffer = ArrayString<MAX_REQUEST_SIZE>;
pub type ResponseBuffer = ArrayString<MAX_RESPONSE_SIZE>;

/// One request on a control channel (supervisory or operator), as a JSON
/// line over TCP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlRequest {
    pub id: u32,
    pub timestamp: u64,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestKind {
    Ping,
    Status,
    /// Select/operate on the device's single control point: relay
    /// true = trip / false = reset, breaker true = open / false = close.
    Operate { value: bool },
    ManualTrip,
    ManualReset,
    ManualOpen,
    ManualClose,
    /// Simulation input for the relay's measurement feed.
    InjectMeasurements {
        voltage: f32,
        current: f32,
        frequency: f32,
        fault_current: f32,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: u32,
    pub timestamp: u64,
    pub status: ResponseStatus,
    pub message: Option<String>,
    pub snapshot: Option<StatusSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Accepted,
    Rejected,
    InvalidRequest,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    ProtectionRelay,
    CircuitBreaker,
}

/// Link health as seen by one device: inbound supervision of its peer and
/// outbound self-supervision, both against the 5000 ms window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkSupervision {
    pub rx_count: u64,
    pub last_rx_age_ms: Option<u64>,
    pub rx_ok: bool,
    pub tx_count: u32,
    pub last_tx_age_ms: Option<u64>,
    pub tx_ok: bool,
}

/// Read-only status projection served to observers. Never a write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub device: DeviceKind,
    pub trip_active: bool,
    pub breaker_open: bool,
    pub pickup_any: bool,
    pub overcurrent_pickup: bool,
    pub trip_reason: TripReason,
    pub measurements: Option<Measurements>,
    pub link: LinkSupervision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid JSON request")]
    InvalidJson,
    #[error("message exceeds buffer size")]
    MessageTooLarge,
    #[error("response serialization failed")]
    SerializationError,
    #[error("request not supported on this channel")]
    InvalidRequest,
}

/// Parses requests and serializes responses through preallocated buffers,
/// counting traffic for diagnostics.
#[derive(Debug)]
pub struct ControlHandler {
    request_buffer: RequestBuffer,
    response_buffer: ResponseBuffer,
    request_count: u32,
}

impl ControlHandler {
    pub fn new() -> Self {
        Self {
            request_buffer: ArrayString::new(),
            response_buffer: ArrayString::new(),
            request_count: 0,
        }
    }

    pub fn parse_request(&mut self, json_str: &str) -> Result<ControlRequest, ControlError> {
        if json_str.len() > MAX_REQUEST_SIZE {
            return Err(ControlError::MessageTooLarge);
        }
        self.request_buffer.clear();
        self.request_buffer.push_str(json_str);

        match serde_json::from_str::<ControlRequest>(json_str) {
            Ok(request) => {
                self.request_count = self.request_count.saturating_add(1);
                Ok(request)
            }
            Err(_) => Err(ControlError::InvalidJson),
        }
    }

    pub fn serialize_response(
        &mut self,
        response: &ControlResponse,
    ) -> Result<&str, ControlError> {
        self.response_buffer.clear();

        let json_str =
            serde_json::to_string(response).map_err(|_| ControlError::SerializationError)?;
        if json_str.len() > MAX_RESPONSE_SIZE {
            return Err(ControlError::MessageTooLarge);
        }
        self.response_buffer.push_str(&json_str);

        Ok(&self.response_buffer)
    }

    pub fn create_response(
        &self,
        id: u32,
        now_ms: u64,
        status: ResponseStatus,
        message: Option<&str>,
    ) -> ControlResponse {
        ControlResponse {
            id,
            timestamp: now_ms,
            status,
            message: message.map(str::to_string),
            snapshot: None,
        }
    }

    pub fn accepted(&self, id: u32, now_ms: u64) -> ControlResponse {
        self.create_response(id, now_ms, ResponseStatus::Accepted, None)
    }

    pub fn rejected(&self, id: u32, now_ms: u64, reason: &str) -> ControlResponse {
        self.create_response(id, now_ms, ResponseStatus::Rejected, Some(reason))
    }

    pub fn status_reply(
        &self,
        id: u32,
        now_ms: u64,
        snapshot: StatusSnapshot,
    ) -> ControlResponse {
        ControlResponse {
            id,
            timestamp: now_ms,
            status: ResponseStatus::Accepted,
            message: None,
            snapshot: Some(snapshot),
        }
    }

    pub fn request_count(&self) -> u32 {
        self.request_count
    }
}

impl Default for ControlHandler {
    fn default() -> Self {
        Self::new()
    }
}
