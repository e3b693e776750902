use procbus::breaker::BreakerAgent;
use procbus::coordinator::TripCoordinator;
use procbus::goose::publisher::BURST_LENGTH;
use procbus::goose::{bounded_ref, DatasetPayload, FrameRecorder, GooseFrame, SequencedPublisher, StreamConfig};
use procbus::protection::{ProtectionState, TripReason};
use procbus::relay::{RELAY_GOCB_REF, RELAY_GOOSE_APP_ID};

fn relay_coordinator() -> (TripCoordinator, FrameRecorder) {
    let recorder = FrameRecorder::new();
    let publisher = SequencedPublisher::new(
        StreamConfig {
            app_id: 4096,
            gocb_ref: "TEST_REL/LLN0$GO$gcbEvents",
            dataset_ref: "TEST_REL/LLN0$Events",
            ttl_ms: 3000,
        },
        Box::new(recorder.clone()),
    );
    (TripCoordinator::new(publisher, 3000), recorder)
}

fn relay_frame(st_num: u32, sq_num: u32, flags: [bool; 4]) -> GooseFrame {
    let mut payload = DatasetPayload::new();
    for flag in flags {
        let _ = payload.push(flag);
    }
    GooseFrame {
        app_id: RELAY_GOOSE_APP_ID,
        gocb_ref: bounded_ref(RELAY_GOCB_REF),
        dataset_ref: bounded_ref("PROT_REL_001/LLN0$Events"),
        st_num,
        sq_num,
        ttl_ms: 3000,
        timestamp_ms: 0,
        payload,
    }
}

#[tokio::test]
async fn unchanged_dataset_publishes_no_burst() {
    let (mut coordinator, recorder) = relay_coordinator();
    let state = ProtectionState::default();

    // The first publication announces the initial picture.
    let dataset = coordinator.dataset(&state);
    coordinator.publish_step(dataset, 0).await;
    assert_eq!(recorder.len(), BURST_LENGTH);

    // Same picture again: nothing new on the wire before the heartbeat.
    coordinator.publish_step(dataset, 500).await;
    assert_eq!(recorder.len(), BURST_LENGTH);
}

#[tokio::test]
async fn changed_dataset_publishes_burst() {
    let (mut coordinator, recorder) = relay_coordinator();
    let mut state = ProtectionState::default();

    let dataset = coordinator.dataset(&state);
    coordinator.publish_step(dataset, 0).await;
    let before = recorder.len();

    state.latch_trip(TripReason::InstantaneousOvercurrent);
    let dataset = coordinator.dataset(&state);
    coordinator.publish_step(dataset, 500).await;

    let frames = recorder.frames();
    assert_eq!(frames.len(), before + BURST_LENGTH);
    // Trip flag leads the dataset.
    assert!(frames[before].payload[0]);
}

#[tokio::test]
async fn heartbeat_fires_on_the_timer_regardless_of_change() {
    let (mut coordinator, recorder) = relay_coordinator();
    let state = ProtectionState::default();
    let dataset = coordinator.dataset(&state);

    coordinator.publish_step(dataset, 0).await;
    coordinator.publish_step(dataset, 1000).await;
    assert_eq!(recorder.len(), BURST_LENGTH);

    // Timer expired: one heartbeat with the same stNum, sqNum = 1.
    coordinator.publish_step(dataset, 3000).await;
    let frames = recorder.frames();
    assert_eq!(frames.len(), BURST_LENGTH + 1);
    let heartbeat = &frames[BURST_LENGTH];
    assert_eq!(heartbeat.st_num, frames[0].st_num);
    assert_eq!(heartbeat.sq_num, 1);
}

#[test]
fn breaker_feedback_releases_the_latch() {
    let (mut coordinator, _recorder) = relay_coordinator();
    let mut state = ProtectionState::default();
    state.latch_trip(TripReason::TimedOvercurrent);

    // No feedback yet: the latch holds.
    assert!(!coordinator.auto_reset(&mut state));
    assert!(state.trip_active);

    coordinator.note_breaker_position(true);
    assert!(coordinator.auto_reset(&mut state));
    assert!(!state.trip_active);
    assert_eq!(state.trip_reason, TripReason::Normal);

    // Idempotent once cleared.
    assert!(!coordinator.auto_reset(&mut state));
}

#[tokio::test]
async fn breaker_opens_on_standing_trip_flag() {
    let recorder = FrameRecorder::new();
    let mut breaker = BreakerAgent::new(Box::new(recorder.clone()));

    // Announce the initial closed position.
    breaker.step(0).await;
    let baseline = recorder.len();

    breaker
        .handle_frame(&relay_frame(2, 0, [true, false, true, true]), 100)
        .await;

    {
        let state = breaker.shared_state();
        let state = state.lock().unwrap();
        assert!(state.open);
        assert!(state.trip_received);
    }

    // The position change went out as a burst of the 1-flag dataset.
    let frames = recorder.frames();
    assert_eq!(frames.len(), baseline + BURST_LENGTH);
    assert_eq!(frames[baseline].payload.as_slice(), &[true]);
}

#[tokio::test]
async fn trip_flag_dropping_clears_standing_request_without_publish() {
    let recorder = FrameRecorder::new();
    let mut breaker = BreakerAgent::new(Box::new(recorder.clone()));

    breaker.step(0).await;
    breaker
        .handle_frame(&relay_frame(2, 0, [true, false, true, true]), 100)
        .await;
    let after_open = recorder.len();

    // Relay clears its trip flag; the breaker stays open and stays quiet.
    breaker
        .handle_frame(&relay_frame(3, 0, [false, true, false, false]), 200)
        .await;

    let state = breaker.shared_state();
    let state = state.lock().unwrap();
    assert!(state.open);
    assert!(!state.trip_received);
    assert_eq!(recorder.len(), after_open);
}

#[tokio::test]
async fn breaker_heartbeats_its_position() {
    let recorder = FrameRecorder::new();
    let mut breaker = BreakerAgent::new(Box::new(recorder.clone()));

    breaker.step(0).await;
    let baseline = recorder.len();

    breaker.step(1000).await;
    let frames = recorder.frames();
    assert_eq!(frames.len(), baseline + 1);
    assert_eq!(frames[baseline].sq_num, 1);
    assert_eq!(frames[baseline].payload.as_slice(), &[false]);
}
