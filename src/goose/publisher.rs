use super::{
    bounded_ref, DatasetPayload, GooseFrame, GooseTransport, SUPERVISION_TIMEOUT_MS,
};
use std::time::Duration;
use tracing::warn;

/// Number of back-to-back transmissions after a state change.
pub const BURST_LENGTH: usize = 4;
/// Spacing between burst transmissions.
pub const BURST_GAP_MS: u64 = 4;

/// Static identity of one outbound publication stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    pub app_id: u16,
    pub gocb_ref: &'static str,
    pub dataset_ref: &'static str,
    pub ttl_ms: u32,
}

/// Owns one outbound publication stream and its stNum/sqNum discipline.
///
/// stNum increments only when the dataset content changes; sqNum restarts at
/// zero on every stNum increment and counts retransmissions of the same
/// state. A change is announced with a burst of [`BURST_LENGTH`] identical
/// frames to bound detection latency on a lossy segment; heartbeats are
/// single frames.
#[derive(Debug)]
pub struct SequencedPublisher {
    config: StreamConfig,
    transport: Box<dyn GooseTransport>,
    st_num: u32,
    sq_num: u32,
    last_payload: DatasetPayload,
    tx_count: u32,
    last_tx_ms: Option<u64>,
}

impl SequencedPublisher {
    pub fn new(config: StreamConfig, transport: Box<dyn GooseTransport>) -> Self {
        Self {
            config,
            transport,
            st_num: 1,
            sq_num: 0,
            last_payload: DatasetPayload::new(),
            tx_count: 0,
            last_tx_ms: None,
        }
    }

    /// Announces a dataset content change: increments stNum, resets sqNum to
    /// zero, then transmits the burst. All burst frames carry the identical
    /// (stNum, sqNum = 0) pair; only a stNum change starts a new burst.
    pub async fn publish_on_change(&mut self, payload: &[bool], now_ms: u64) {
        self.st_num = self.st_num.wrapping_add(1);
        self.sq_num = 0;
        self.remember_payload(payload);

        for sent in 0..BURST_LENGTH {
            self.transmit_current(now_ms);
            if sent + 1 < BURST_LENGTH {
                tokio::time::sleep(Duration::from_millis(BURST_GAP_MS)).await;
            }
        }
    }

    /// Retransmits the current state exactly once: sqNum advances by one,
    /// stNum is untouched.
    pub fn publish_heartbeat(&mut self, payload: &[bool], now_ms: u64) {
        self.sq_num = self.sq_num.wrapping_add(1);
        self.remember_payload(payload);
        self.transmit_current(now_ms);
    }

    fn remember_payload(&mut self, payload: &[bool]) {
        self.last_payload.clear();
        for &flag in payload.iter().take(self.last_payload.capacity()) {
            let _ = self.last_payload.push(flag);
        }
    }

    fn transmit_current(&mut self, now_ms: u64) {
        let frame = GooseFrame {
            app_id: self.config.app_id,
            gocb_ref: bounded_ref(self.config.gocb_ref),
            dataset_ref: bounded_ref(self.config.dataset_ref),
            st_num: self.st_num,
            sq_num: self.sq_num,
            ttl_ms: self.config.ttl_ms,
            timestamp_ms: now_ms,
            payload: self.last_payload.clone(),
        };

        match self.transport.transmit(frame) {
            Ok(()) => {
                self.tx_count = self.tx_count.saturating_add(1);
                self.last_tx_ms = Some(now_ms);
            }
            Err(e) => {
                // Lost frames self-heal through the next heartbeat or burst.
                warn!(
                    gocb_ref = self.config.gocb_ref,
                    error = %e,
                    "publish dropped"
                );
            }
        }
    }

    pub fn st_num(&self) -> u32 {
        self.st_num
    }

    pub fn sq_num(&self) -> u32 {
        self.sq_num
    }

    pub fn last_payload(&self) -> &[bool] {
        &self.last_payload
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    pub fn last_tx_ms(&self) -> Option<u64> {
        self.last_tx_ms
    }

    pub fn last_tx_age_ms(&self, now_ms: u64) -> Option<u64> {
        self.last_tx_ms.map(|at| now_ms.saturating_sub(at))
    }

    /// Outbound self-supervision: true while a transmission landed inside
    /// the supervision window.
    pub fn tx_ok(&self, now_ms: u64) -> bool {
        match self.last_tx_ms {
            Some(at) => now_ms.saturating_sub(at) < SUPERVISION_TIMEOUT_MS,
            None => false,
        }
    }
}
