/// End-to-end join handshake: an empty hosted world, one guest joining on
/// user byte 1, and the full batch that reconstructs the authority's user.
use weft_shared::{ElementEvent, RefId, WorldState};
use weft_test::helpers::{pump_until, start_pair, CONVERGE_TIMEOUT};

#[test]
fn fresh_join_reaches_running_and_accepts_deltas() {
    let pair = start_pair();

    assert_eq!(pair.guest.state(), WorldState::Running);
    let accepts = pair.guest.world_update(|model| model.accept_deltas).unwrap();
    assert!(accepts, "guest must accept deltas after the start-delta marker");
    assert_eq!(pair.guest.initialization_progress(), 1.0);
    assert_eq!(pair.guest.initialization_status(), "running");
}

#[test]
fn guest_user_occupies_the_start_of_its_granted_block() {
    let pair = start_pair();

    // the first guest gets user byte 1; its user element is the first
    // identifier of the granted range
    assert_eq!(
        pair.guest.local_user(),
        Some(RefId::from_raw(0x0100_0000_0000_0001))
    );
}

#[test]
fn authority_user_is_replicated_to_the_guest() {
    let pair = start_pair();

    // the authority's own user sits at the first global position
    let host_user = RefId::from_raw(0x0000_0000_0000_0001);
    let replicated = pump_until(&[&pair.host, &pair.guest], CONVERGE_TIMEOUT, || {
        pair.guest
            .world_update(|model| model.registry.contains(host_user))
            .unwrap_or(false)
    });
    assert!(replicated, "guest never saw the authority's user element");

    let name = pair
        .guest
        .world_update(|model| weft_session::User::name_of(model, host_user))
        .unwrap();
    assert_eq!(name.as_deref(), Some("host"));
}

#[test]
fn host_observes_the_guest_joining() {
    let pair = start_pair();
    let guest_user = RefId::from_raw(0x0100_0000_0000_0001);

    let seen = pump_until(&[&pair.host, &pair.guest], CONVERGE_TIMEOUT, || {
        pair.host
            .world_update(|model| model.registry.contains(guest_user))
            .unwrap_or(false)
    });
    assert!(seen, "host never registered the guest's user");

    let events = pair.host.drain_events();
    assert!(
        events
            .iter()
            .any(|event| *event == ElementEvent::UserJoined { user: guest_user }),
        "missing UserJoined on the host; events: {events:?}"
    );
}
