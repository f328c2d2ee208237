/// State-version monotonicity: a late joiner adopts the authority's current
/// state version from the grant, keeps tracking it from message headers,
/// and its subsequent writes are accepted as current.
use std::time::Duration;

use weft_session::{LocalHub, Session};
use weft_shared::{ValueField, WorldState};
use weft_test::helpers::{pump_for, pump_until, test_config, CONVERGE_TIMEOUT};

#[test]
fn late_joiner_adopts_the_authority_state_version() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();
    let field = host
        .world_update(|model| ValueField::register_new(model, 0u32).unwrap())
        .unwrap();

    // let the authority tick for a while so its version grows
    pump_for(&[&host], Duration::from_millis(500));
    let version_at_join = host.world_update(|model| model.state_version).unwrap();
    assert!(version_at_join > 0, "authority version never advanced");

    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
    }));

    let guest_version = guest.world_update(|model| model.state_version).unwrap();
    assert!(
        guest_version >= version_at_join,
        "guest version {guest_version} behind the grant's {version_at_join}"
    );

    // a write stamped with that observed version is accepted as current
    guest
        .world_update(|model| model.value_set(field, 123u32))
        .unwrap()
        .unwrap();
    let accepted = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        host.world_update(|model| model.value_get::<u32>(field).unwrap_or(0))
            .unwrap_or(0)
            == 123
    });
    assert!(accepted, "late joiner's write was not accepted");

    // versions only move forward on both peers
    let later_host = host.world_update(|model| model.state_version).unwrap();
    let later_guest = guest.world_update(|model| model.state_version).unwrap();
    assert!(later_host >= version_at_join);
    assert!(later_guest >= guest_version);
}
