/// Stream messages: best-effort frames that fan out through the authority
/// and vanish on a lossy path instead of stalling the pipeline.
use std::time::Duration;

use weft_session::{LocalHub, Session};
use weft_shared::WorldState;
use weft_test::helpers::{
    join_extra_guest, pump_for, pump_until, start_pair, test_config, CONVERGE_TIMEOUT,
};

#[test]
fn guest_stream_reaches_host_and_other_guests() {
    let mut pair = start_pair();
    let second = join_extra_guest(&mut pair, "second");

    pair.guest.send_stream(3, vec![0xAB, 0xCD], false);

    let host_got = pump_until(&[&pair.host, &pair.guest, &second], CONVERGE_TIMEOUT, || {
        pair.host
            .drain_streams()
            .iter()
            .any(|stream| stream.group == 3 && stream.payload == vec![0xAB, 0xCD])
    });
    assert!(host_got, "host never received the stream");

    // the authority fans guest streams out to the other peers
    let second_got = pump_until(&[&pair.host, &pair.guest, &second], CONVERGE_TIMEOUT, || {
        second
            .drain_streams()
            .iter()
            .any(|stream| stream.group == 3 && stream.payload == vec![0xAB, 0xCD])
    });
    assert!(second_got, "second guest never received the forwarded stream");
}

#[test]
fn streams_carry_the_sender_user() {
    let pair = start_pair();
    pair.guest.send_stream(1, vec![1], false);

    let mut received = Vec::new();
    pump_until(&[&pair.host, &pair.guest], CONVERGE_TIMEOUT, || {
        received.extend(pair.host.drain_streams());
        !received.is_empty()
    });
    assert_eq!(received[0].user, pair.guest.local_user().unwrap());
}

#[test]
fn lossy_path_drops_streams_but_not_batches() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();

    let link = hub.connect();
    link.set_drop_unreliable(true);
    let guest = Session::join(test_config("guest"), Box::new(link)).unwrap();

    // batches ride the reliable path, so the join still completes
    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
    }));

    guest.send_stream(9, vec![7], false);
    pump_for(&[&host, &guest], Duration::from_millis(300));
    assert!(
        host.drain_streams().is_empty(),
        "stream survived a lossy path"
    );
}
