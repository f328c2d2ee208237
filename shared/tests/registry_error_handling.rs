/// Integration tests for registry error handling: duplicate registration,
/// namespace exhaustion, unbalanced allocation blocks and checkout misuse.
use weft_shared::{
    HostRole, ReferenceController, RefId, RegistryError, SyncElement, ValueField, WorldModel,
    POSITION_MAX,
};

fn boxed_field(id: RefId) -> Box<dyn SyncElement> {
    Box::new(ValueField::<u32>::with_id(id, 0))
}

#[test]
fn duplicate_registration_reports_the_id() {
    let mut registry = ReferenceController::new(0);
    let id = registry.allocate().unwrap();
    registry.register(id, boxed_field(id)).unwrap();

    let error = registry.register(id, boxed_field(id)).unwrap_err();
    assert_eq!(error, RegistryError::DuplicateId { id });
    assert_eq!(format!("{error}"), format!("RefId {id} is already registered"));
}

#[test]
fn namespace_exhaustion_is_typed_not_a_panic() {
    let mut registry = ReferenceController::new(5);
    registry.set_allocation_range(RefId::new(5, POSITION_MAX));
    assert_eq!(
        registry.allocate().unwrap_err(),
        RegistryError::NamespaceExhausted { user_byte: 5 }
    );
}

#[test]
fn unregistering_an_absent_id_is_tolerated() {
    let mut registry = ReferenceController::new(0);
    assert!(registry.unregister(RefId::new(0, 99)).is_none());
}

#[test]
fn unbalanced_block_end_is_an_error() {
    let mut registry = ReferenceController::new(0);
    assert_eq!(
        registry.allocation_block_end().unwrap_err(),
        RegistryError::UnbalancedAllocationBlock
    );
    // a local end against a non-local block is also refused
    registry.allocation_block_begin(RefId::new(1, 1));
    assert_eq!(
        registry.local_allocation_block_end().unwrap_err(),
        RegistryError::UnbalancedAllocationBlock
    );
}

#[test]
fn double_checkout_is_refused() {
    let mut registry = ReferenceController::new(0);
    let id = registry.allocate().unwrap();
    registry.register(id, boxed_field(id)).unwrap();

    let element = registry.take_slot(id).unwrap();
    assert_eq!(
        registry.take_slot(id).unwrap_err(),
        RegistryError::SlotCheckedOut { id }
    );
    registry.restore_slot(id, element);
}

#[test]
fn an_id_is_never_both_live_and_trashed() {
    let mut model = WorldModel::new(HostRole::Authority);
    let id = model.create_child(ValueField::<u32>::factory).unwrap();

    model.move_to_trash(id, 1).unwrap();
    assert!(!model.registry.contains(id));
    assert!(model.trash.contains(id));

    assert!(model.try_retrieve_from_trash(1, id));
    assert!(model.registry.contains(id));
    assert!(!model.trash.contains(id));
}
