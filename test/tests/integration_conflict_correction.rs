/// Authority-rejected writes: the losing peer's field transitions
/// dirty -> invalidated -> corrected, with `Invalidated` firing exactly
/// once per rejection, and the rejected record never reaching other peers.
use std::thread;
use std::time::{Duration, Instant};

use weft_serde::ColorRgba;
use weft_session::{LocalHub, Session};
use weft_shared::{ElementEvent, RefId, SyncElement, ValueField, WorldState};
use weft_test::helpers::{pump_until, test_config, CONVERGE_TIMEOUT};

const RED: ColorRgba = ColorRgba::new(1.0, 0.0, 0.0, 1.0);
const GREEN: ColorRgba = ColorRgba::new(0.0, 1.0, 0.0, 1.0);

/// Hosts a world holding one host-only color field, then joins one guest.
fn world_with_protected_field() -> (Session, Session, RefId) {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();

    let field = host
        .world_update(|model| {
            let id = ValueField::register_new(model, RED).unwrap();
            model
                .registry
                .get_mut(id)
                .unwrap()
                .core_mut()
                .conflict
                .is_host_only = true;
            id
        })
        .unwrap();

    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    let running = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
            && guest
                .world_update(|model| model.registry.contains(field))
                .unwrap_or(false)
    });
    assert!(running, "guest never initialized");
    (host, guest, field)
}

#[test]
fn rejected_write_is_reverted_with_one_invalidation() {
    let (host, guest, field) = world_with_protected_field();
    guest.drain_events();

    // the guest writes optimistically; the authority must reject it
    let changed = guest
        .world_update(|model| model.value_set(field, GREEN))
        .unwrap()
        .unwrap();
    assert!(changed);

    // pump until the correction lands and the guest shows red again
    let mut events = Vec::new();
    let deadline = Instant::now() + CONVERGE_TIMEOUT;
    let mut reverted = false;
    while Instant::now() < deadline {
        let _ = host.world_update(|_| ());
        let _ = guest.world_update(|_| ());
        events.extend(guest.drain_events());
        let value = guest
            .world_update(|model| model.value_get::<ColorRgba>(field))
            .unwrap()
            .unwrap();
        if value == RED {
            reverted = true;
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    assert!(reverted, "guest field was never corrected; events: {events:?}");

    let invalidations = events
        .iter()
        .filter(|event| **event == ElementEvent::Invalidated { id: field })
        .count();
    assert_eq!(invalidations, 1, "Invalidated must fire exactly once");

    // the element settles back to valid once the correction tick confirms
    let valid = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest
            .world_update(|model| {
                model
                    .registry
                    .get(field)
                    .map(|element| element.core().conflict.is_valid)
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    assert!(valid, "guest element never returned to valid");

    // the authority was never perturbed
    let host_value = host
        .world_update(|model| model.value_get::<ColorRgba>(field))
        .unwrap()
        .unwrap();
    assert_eq!(host_value, RED);
}

#[test]
fn accepted_write_reaches_the_authority() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();
    let field = host
        .world_update(|model| ValueField::register_new(model, 0u32).unwrap())
        .unwrap();

    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    let ready = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
            && guest
                .world_update(|model| model.registry.contains(field))
                .unwrap_or(false)
    });
    assert!(ready);

    guest
        .world_update(|model| model.value_set(field, 99u32))
        .unwrap()
        .unwrap();

    let applied = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        host.world_update(|model| model.value_get::<u32>(field).unwrap_or(0))
            .unwrap_or(0)
            == 99
    });
    assert!(applied, "accepted guest write never reached the authority");
}
