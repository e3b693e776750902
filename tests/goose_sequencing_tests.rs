use procbus::goose::publisher::{BURST_GAP_MS, BURST_LENGTH};
use procbus::goose::{DeadTransport, FrameRecorder, SequencedPublisher, StreamConfig};

fn test_config() -> StreamConfig {
    StreamConfig {
        app_id: 4096,
        gocb_ref: "TEST_DEV/LLN0$GO$gcbEvents",
        dataset_ref: "TEST_DEV/LLN0$Events",
        ttl_ms: 3000,
    }
}

fn recorded_publisher() -> (SequencedPublisher, FrameRecorder) {
    let recorder = FrameRecorder::new();
    let publisher = SequencedPublisher::new(test_config(), Box::new(recorder.clone()));
    (publisher, recorder)
}

#[tokio::test]
async fn burst_sends_four_identical_frames() {
    let (mut publisher, recorder) = recorded_publisher();

    publisher
        .publish_on_change(&[true, false, false, false], 0)
        .await;

    let frames = recorder.frames();
    assert_eq!(frames.len(), BURST_LENGTH);

    let st_num = frames[0].st_num;
    for frame in &frames {
        assert_eq!(frame.st_num, st_num);
        assert_eq!(frame.sq_num, 0);
        assert_eq!(frame.payload.as_slice(), &[true, false, false, false]);
    }

    // Transmissions are spaced by the burst gap.
    let instants = recorder.instants();
    let elapsed = instants[instants.len() - 1].duration_since(instants[0]);
    let expected = BURST_GAP_MS * (BURST_LENGTH as u64 - 1);
    assert!(
        elapsed.as_millis() as u64 >= expected,
        "burst spanned {}ms, expected at least {}ms",
        elapsed.as_millis(),
        expected
    );
}

#[tokio::test]
async fn heartbeat_after_burst_advances_sequence_only() {
    let (mut publisher, recorder) = recorded_publisher();

    publisher.publish_on_change(&[true], 0).await;
    let st_num = publisher.st_num();

    publisher.publish_heartbeat(&[true], 1000);
    publisher.publish_heartbeat(&[true], 2000);

    let frames = recorder.frames();
    assert_eq!(frames.len(), BURST_LENGTH + 2);
    assert_eq!(frames[BURST_LENGTH].st_num, st_num);
    assert_eq!(frames[BURST_LENGTH].sq_num, 1);
    assert_eq!(frames[BURST_LENGTH + 1].st_num, st_num);
    assert_eq!(frames[BURST_LENGTH + 1].sq_num, 2);
}

#[tokio::test]
async fn status_number_is_monotonic_and_resets_sequence() {
    let (mut publisher, recorder) = recorded_publisher();

    publisher.publish_on_change(&[false], 0).await;
    publisher.publish_heartbeat(&[false], 1000);
    publisher.publish_on_change(&[true], 2000).await;
    publisher.publish_heartbeat(&[true], 3000);
    publisher.publish_on_change(&[false], 4000).await;

    let frames = recorder.frames();
    let mut last_st = 0;
    let mut last_sq = 0;
    for frame in &frames {
        assert!(frame.st_num >= last_st, "status number went backwards");
        if frame.st_num != last_st {
            // A status change always restarts the sequence at zero.
            assert_eq!(frame.sq_num, 0);
        } else {
            assert!(frame.sq_num >= last_sq);
        }
        last_st = frame.st_num;
        last_sq = frame.sq_num;
    }
}

#[tokio::test]
async fn unavailable_transport_degrades_to_noop() {
    let mut publisher = SequencedPublisher::new(test_config(), Box::new(DeadTransport));
    let st_before = publisher.st_num();

    publisher.publish_on_change(&[true], 0).await;
    publisher.publish_heartbeat(&[true], 1000);

    // The state change is still tracked, but nothing counts as transmitted.
    assert_eq!(publisher.st_num(), st_before.wrapping_add(1));
    assert_eq!(publisher.tx_count(), 0);
    assert_eq!(publisher.last_tx_ms(), None);
    assert!(!publisher.tx_ok(1000));
}

#[test]
fn transmit_self_supervision_windows() {
    let (mut publisher, _recorder) = recorded_publisher();

    assert!(!publisher.tx_ok(0));

    publisher.publish_heartbeat(&[false], 1000);
    assert_eq!(publisher.tx_count(), 1);
    assert!(publisher.tx_ok(1000 + 4999));
    assert!(!publisher.tx_ok(1000 + 5001));
    assert_eq!(publisher.last_tx_age_ms(3000), Some(2000));
}
