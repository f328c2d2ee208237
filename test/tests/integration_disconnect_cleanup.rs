/// Disconnect cleanup: when a guest leaves, the authority removes its user
/// through the user replicator and every peer sweeps the departed user's
/// identifier namespace.
use weft_shared::{ElementEvent, RefId};
use weft_test::helpers::{join_extra_guest, pump_until, start_pair, CONVERGE_TIMEOUT};

#[test]
fn departed_guest_is_swept_from_every_peer() {
    let mut pair = start_pair();
    let mut second = join_extra_guest(&mut pair, "second");

    // the second guest landed on user byte 2
    let second_user = second.local_user().unwrap();
    assert_eq!(second_user, RefId::new(2, 1));

    // both existing peers see the newcomer
    let visible = pump_until(&[&pair.host, &pair.guest, &second], CONVERGE_TIMEOUT, || {
        pair.guest
            .world_update(|model| model.registry.contains(second_user))
            .unwrap_or(false)
    });
    assert!(visible, "first guest never saw the second user");
    pair.guest.drain_events();

    // graceful leave: the disposing session sends its disconnect
    second.dispose();

    let swept_on_host = pump_until(&[&pair.host, &pair.guest], CONVERGE_TIMEOUT, || {
        pair.host
            .world_update(|model| {
                !model.registry.contains(second_user)
                    && model.registry.ids_with_user_byte(2).is_empty()
            })
            .unwrap_or(false)
    });
    assert!(swept_on_host, "host kept the departed user's elements");

    let swept_on_guest = pump_until(&[&pair.host, &pair.guest], CONVERGE_TIMEOUT, || {
        pair.guest
            .world_update(|model| {
                !model.registry.contains(second_user)
                    && model.registry.ids_with_user_byte(2).is_empty()
            })
            .unwrap_or(false)
    });
    assert!(swept_on_guest, "guest kept the departed user's elements");

    let events = pair.guest.drain_events();
    assert!(
        events
            .iter()
            .any(|event| *event == ElementEvent::UserLeft { user: second_user }),
        "missing UserLeft on the remaining guest; events: {events:?}"
    );
}
