/// Pending records: full-batch records whose targets do not exist yet are
/// parked and replayed once the target appears, instead of being dropped.
use std::time::Duration;

use weft_serde::{ColorRgba, WireValue};
use weft_session::{LocalHub, Session};
use weft_shared::{
    RefId, ReplicatedMap, TypeRegistry, TypedReplicatorKind, ValueField, WorldModel, WorldState,
};
use weft_test::helpers::{pump_for, pump_until, test_config, CONVERGE_TIMEOUT};

const TYPE_COLOR: u32 = 7;

fn component_map_id() -> RefId {
    RefId::fixture(1)
}

fn install_component_map(model: &mut WorldModel) {
    let mut types = TypeRegistry::new();
    types.register(TYPE_COLOR, ValueField::<ColorRgba>::factory);
    let map = ReplicatedMap::with_id(
        component_map_id(),
        Box::new(TypedReplicatorKind::new(types)),
    );
    model.register_fixture(Box::new(map)).unwrap();
}

#[test]
fn records_for_missing_targets_are_parked_then_replayed() {
    let mut hub = LocalHub::new();
    let listener = hub.listener();
    let host = Session::host(test_config("host"), Box::new(listener)).unwrap();
    host.world_update(install_component_map).unwrap();

    let color = ColorRgba::new(0.1, 0.3, 0.5, 1.0);
    let component = host
        .world_update(|model| {
            let component = model.create_child(ValueField::<ColorRgba>::factory).unwrap();
            model.value_set(component, color).unwrap();
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

    // the guest deliberately lacks the component replicator: every record
    // aimed at it (and at the component it would create) must park
    let guest = Session::join(test_config("guest"), Box::new(hub.connect())).unwrap();
    assert!(pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest.state() == WorldState::Running
    }));

    pump_for(&[&host, &guest], Duration::from_millis(200));
    let missing = guest
        .world_update(|model| model.registry.contains(component))
        .unwrap();
    assert!(!missing, "component cannot exist before its replicator does");

    // the fixture appears late; parked records must now replay
    guest.world_update(install_component_map).unwrap();

    let replayed = pump_until(&[&host, &guest], CONVERGE_TIMEOUT, || {
        guest
            .world_update(|model| {
                model.registry.contains(component)
                    && model
                        .value_get::<ColorRgba>(component)
                        .map(|value| value.wire_eq(&color))
                        .unwrap_or(false)
            })
            .unwrap_or(false)
    });
    assert!(replayed, "parked records were never replayed");
}
