use super::{DatasetPayload, GooseFrame, SUPERVISION_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-peer receive bookkeeping. Created at subscriber setup and updated on
/// every accepted frame; never reset for the life of the process.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SupervisionRecord {
    pub last_st_num: u32,
    pub last_sq_num: u32,
    pub last_rx_ms: Option<u64>,
    pub message_count: u64,
    pub rejected_count: u64,
    pub anomaly_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxKind {
    /// stNum advanced: the peer's dataset content changed.
    StateChange,
    /// Same stNum, new sqNum: retransmission of known state.
    Retransmission,
}

/// An accepted inbound publication, handed to the consumer whichever kind it
/// is; heartbeats still refresh liveness even when nothing changed.
#[derive(Debug, Clone)]
pub struct RxEvent {
    pub kind: RxKind,
    pub payload: DatasetPayload,
}

/// Consumes inbound publications from one monitored peer and answers the
/// liveness question for it.
#[derive(Debug)]
pub struct SupervisedSubscriber {
    app_id: u16,
    gocb_ref: &'static str,
    min_flags: usize,
    record: SupervisionRecord,
}

impl SupervisedSubscriber {
    pub fn new(app_id: u16, gocb_ref: &'static str, min_flags: usize) -> Self {
        Self {
            app_id,
            gocb_ref,
            min_flags,
            record: SupervisionRecord::default(),
        }
    }

    /// Whether a frame on the shared segment belongs to the monitored peer.
    pub fn matches(&self, frame: &GooseFrame) -> bool {
        frame.app_id == self.app_id && frame.gocb_ref.as_str() == self.gocb_ref
    }

    /// Applies one inbound frame. Undersized payloads and stale status
    /// numbers are dropped without touching the record's content fields or
    /// the liveness timestamp; hearing noise is not hearing the peer.
    pub fn on_frame(&mut self, frame: &GooseFrame, now_ms: u64) -> Option<RxEvent> {
        if frame.payload.len() < self.min_flags {
            self.record.rejected_count += 1;
            warn!(
                gocb_ref = self.gocb_ref,
                got = frame.payload.len(),
                need = self.min_flags,
                "undersized dataset rejected"
            );
            return None;
        }

        let first = self.record.message_count == 0;
        if !first && is_stale(frame.st_num, self.record.last_st_num) {
            self.record.rejected_count += 1;
            warn!(
                gocb_ref = self.gocb_ref,
                st_num = frame.st_num,
                last = self.record.last_st_num,
                "stale status number rejected"
            );
            return None;
        }

        let kind = if first || frame.st_num != self.record.last_st_num {
            RxKind::StateChange
        } else {
            // sqNum restarting at zero without a stNum change violates the
            // sequencing rules; count it but keep the retransmission.
            if frame.sq_num == 0 && self.record.last_sq_num != 0 {
                self.record.anomaly_count += 1;
                warn!(
                    gocb_ref = self.gocb_ref,
                    st_num = frame.st_num,
                    "sqNum reset without stNum change"
                );
            }
            RxKind::Retransmission
        };

        self.record.last_st_num = frame.st_num;
        self.record.last_sq_num = frame.sq_num;
        self.record.last_rx_ms = Some(now_ms);
        self.record.message_count += 1;

        Some(RxEvent {
            kind,
            payload: frame.payload.clone(),
        })
    }

    /// Liveness inside the default supervision window. Pure read.
    pub fn is_alive(&self, now_ms: u64) -> bool {
        self.is_alive_within(now_ms, SUPERVISION_TIMEOUT_MS)
    }

    pub fn is_alive_within(&self, now_ms: u64, timeout_ms: u64) -> bool {
        match self.record.last_rx_ms {
            Some(at) => now_ms.saturating_sub(at) < timeout_ms,
            None => false,
        }
    }

    pub fn last_rx_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.record.last_rx_ms.map(|at| now_ms.saturating_sub(at))
    }

    pub fn record(&self) -> &SupervisionRecord {
        &self.record
    }
}

/// A status number counts as stale when it sits behind the last accepted one
/// by less than half the counter space; anything further back is taken as a
/// wrap of the u32 counter.
fn is_stale(incoming: u32, last: u32) -> bool {
    incoming < last && last - incoming < u32::MAX / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_detection_tolerates_wraparound() {
        assert!(is_stale(5, 10));
        assert!(!is_stale(10, 10));
        assert!(!is_stale(11, 10));
        // Far behind the last value means the counter wrapped.
        assert!(!is_stale(1, u32::MAX - 3));
    }
}
