/// Replicated-map creation: a component added on the authority materializes
/// on the guest at the exact same RefId, constructed from its registered
/// type id.
use weft_serde::{ColorRgba, WireValue};
use weft_session::{LocalHub, Session};
use weft_shared::{
    ElementEvent, RefId, ReplicatedMap, TypeRegistry, TypedReplicatorKind, ValueField,
    WorldModel, WorldState,
};
use weft_test::helpers::{pump_until, test_config, CONVERGE_TIMEOUT};

const TYPE_COLOR: u32 = 7;

fn component_map_id() -> RefId {
    RefId::fixture(1)
}

/// Both peers build the same component replicator fixture before syncing.
fn install_component_map(model: &mut WorldModel) {
    let mut types = TypeRegistry::new();
    types.register(TYPE_COLOR, ValueField::<ColorRgba>::factory);
    let kind = TypedReplicatorKind::new(types);
    let map = ReplicatedMap::with_id(component_map_id(), Box::new(kind));
    model.register_fixture(Box::new(map)).unwrap();
}

#[test]
fn component_materializes_on_the_guest_at_the_same_id() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();
    host.world_update(install_component_map).unwrap();

    // authority creates the component and publishes it through the map
    let component = host
        .world_update(|model| {
            let component = model.create_child(ValueField::<ColorRgba>::factory).unwrap();
            model
                .value_set(component, ColorRgba::new(0.2, 0.4, 0.6, 1.0))
                .unwrap();
            model
                .with_element(component_map_id(), |element, model| {
                    let map = element.downcast_mut::<ReplicatedMap>().unwrap();
                    map.kind_as_mut::<TypedReplicatorKind>()
                        .unwrap()
                        .note_type(component, TYPE_COLOR);
                    map.add(model, component, true)
                })
                .unwrap()
                .unwrap();
            component
        })
        .unwrap();

    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    guest.world_update(install_component_map).unwrap();

    let materialized = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
            && guest
                .world_update(|model| model.registry.contains(component))
                .unwrap_or(false)
    });
    assert!(materialized, "component never materialized on the guest");

    // the element arrived as a newly-created entry of the map
    let events = guest.drain_events();
    assert!(
        events.iter().any(|event| matches!(
            event,
            ElementEvent::ElementAdded { map, key, is_new: true, .. }
                if *map == component_map_id() && *key == component
        )),
        "missing ElementAdded; events: {events:?}"
    );

    // and its replicated value follows
    let value_synced = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest
            .world_update(|model| {
                model
                    .value_get::<ColorRgba>(component)
                    .map(|value| value.wire_eq(&ColorRgba::new(0.2, 0.4, 0.6, 1.0)))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    assert!(value_synced, "component value never replicated");
}

#[test]
fn live_mutations_after_creation_keep_flowing() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();
    host.world_update(install_component_map).unwrap();
    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    guest.world_update(install_component_map).unwrap();
    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
    }));

    // created while the guest is already connected: rides a delta
    let component = host
        .world_update(|model| {
            let component = model.create_child(ValueField::<ColorRgba>::factory).unwrap();
            model
                .with_element(component_map_id(), |element, model| {
                    let map = element.downcast_mut::<ReplicatedMap>().unwrap();
                    map.kind_as_mut::<TypedReplicatorKind>()
                        .unwrap()
                        .note_type(component, TYPE_COLOR);
                    map.add(model, component, true)
                })
                .unwrap()
                .unwrap();
            component
        })
        .unwrap();

    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest
            .world_update(|model| model.registry.contains(component))
            .unwrap_or(false)
    }));

    host.world_update(|model| {
        model
            .value_set(component, ColorRgba::new(0.9, 0.9, 0.9, 1.0))
            .unwrap()
    })
    .unwrap();

    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest
            .world_update(|model| {
                model
                    .value_get::<ColorRgba>(component)
                    .map(|value| value.wire_eq(&ColorRgba::new(0.9, 0.9, 0.9, 1.0)))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }));
}
