use procbus::goose::{bounded_ref, DatasetPayload, GooseFrame, RxKind, SupervisedSubscriber};

const PEER_APP_ID: u16 = 4097;
const PEER_GOCB_REF: &str = "CB_TEST_001/LLN0$GO$gcbStatus";

fn frame(st_num: u32, sq_num: u32, flags: &[bool]) -> GooseFrame {
    let mut payload = DatasetPayload::new();
    for &flag in flags {
        let _ = payload.push(flag);
    }
    GooseFrame {
        app_id: PEER_APP_ID,
        gocb_ref: bounded_ref(PEER_GOCB_REF),
        dataset_ref: bounded_ref("CB_TEST_001/LLN0$BrkStatus"),
        st_num,
        sq_num,
        ttl_ms: 5000,
        timestamp_ms: 0,
        payload,
    }
}

fn subscriber(min_flags: usize) -> SupervisedSubscriber {
    SupervisedSubscriber::new(PEER_APP_ID, PEER_GOCB_REF, min_flags)
}

#[test]
fn never_received_is_never_alive() {
    let sub = subscriber(1);
    assert!(!sub.is_alive(0));
    assert!(!sub.is_alive(u64::MAX));
    assert_eq!(sub.last_rx_age_ms(1000), None);
}

#[test]
fn liveness_window_is_strict() {
    let mut sub = subscriber(1);
    assert!(sub.on_frame(&frame(1, 0, &[true]), 1000).is_some());

    assert!(sub.is_alive(1000 + 4999));
    assert!(!sub.is_alive(1000 + 5001));
}

#[test]
fn frames_are_classified_change_then_retransmission() {
    let mut sub = subscriber(1);

    let first = sub.on_frame(&frame(2, 0, &[true]), 0).unwrap();
    assert_eq!(first.kind, RxKind::StateChange);

    let heartbeat = sub.on_frame(&frame(2, 1, &[true]), 1000).unwrap();
    assert_eq!(heartbeat.kind, RxKind::Retransmission);
    assert_eq!(heartbeat.payload.as_slice(), &[true]);

    let change = sub.on_frame(&frame(3, 0, &[false]), 2000).unwrap();
    assert_eq!(change.kind, RxKind::StateChange);

    assert_eq!(sub.record().message_count, 3);
    assert_eq!(sub.record().last_st_num, 3);
}

#[test]
fn undersized_payload_is_fully_ignored() {
    let mut sub = subscriber(4);

    assert!(sub.on_frame(&frame(1, 0, &[true]), 1000).is_none());

    // Content fields untouched, liveness not refreshed, rejection counted.
    assert_eq!(sub.record().message_count, 0);
    assert_eq!(sub.record().last_rx_ms, None);
    assert_eq!(sub.record().rejected_count, 1);
    assert!(!sub.is_alive(1000));
}

#[test]
fn stale_status_number_is_rejected() {
    let mut sub = subscriber(1);

    assert!(sub.on_frame(&frame(5, 0, &[true]), 0).is_some());
    assert!(sub.on_frame(&frame(3, 0, &[false]), 1000).is_none());

    assert_eq!(sub.record().last_st_num, 5);
    assert_eq!(sub.record().rejected_count, 1);
    // The stale frame also does not refresh liveness.
    assert_eq!(sub.record().last_rx_ms, Some(0));
}

#[test]
fn sequence_reset_without_status_change_counts_as_anomaly() {
    let mut sub = subscriber(1);

    assert!(sub.on_frame(&frame(4, 0, &[true]), 0).is_some());
    assert!(sub.on_frame(&frame(4, 3, &[true]), 1000).is_some());

    // Protocol violation: sqNum back to zero while stNum holds still.
    let event = sub.on_frame(&frame(4, 0, &[true]), 2000).unwrap();
    assert_eq!(event.kind, RxKind::Retransmission);
    assert_eq!(sub.record().anomaly_count, 1);
    assert_eq!(sub.record().message_count, 3);
}

#[test]
fn foreign_frames_do_not_match() {
    let sub = subscriber(1);

    let mut foreign = frame(1, 0, &[true]);
    foreign.app_id = 999;
    assert!(!sub.matches(&foreign));

    let mut wrong_ref = frame(1, 0, &[true]);
    wrong_ref.gocb_ref = bounded_ref("OTHER_DEV/LLN0$GO$gcbEvents");
    assert!(!sub.matches(&wrong_ref));

    assert!(sub.matches(&frame(1, 0, &[true])));
}
