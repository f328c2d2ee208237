use std::any::Any;

use log::info;

use weft_shared::{
    ByteReader, ByteWriter, ElementCore, ElementError, ElementEvent, RefId, ReplicatedMap,
    ReplicatorKind, SyncElement, ValueField, WorldModel, USER_BYTE_GLOBAL, USER_BYTE_LOCAL,
};

/// The user replicator lives at the first reserved fixture identifier;
/// every peer constructs it at world start, so user records always find
/// their target.
pub fn user_replicator_id() -> RefId {
    RefId::fixture(0)
}

/// Registers the root machinery every peer builds before the pipeline
/// starts. Fixture construction must be identical on authority and guests.
pub fn install_world_fixtures(model: &mut WorldModel) -> Result<(), ElementError> {
    let replicator = ReplicatedMap::with_id(user_replicator_id(), Box::new(UserReplicatorKind));
    model.register_fixture(Box::new(replicator))?;
    Ok(())
}

/// A participant in the world.
///
/// The element itself is a thin shell: its replicated state lives in member
/// value fields allocated directly after it, so a user and its members
/// occupy a contiguous identifier run that both sides reproduce from the
/// same constructor.
pub struct User {
    core: ElementCore,
    pub user_name: RefId,
    pub machine_id: RefId,
    pub head_device: RefId,
}

impl User {
    /// Identifiers one user subtree consumes: the user plus three members.
    pub const ID_SPAN: u64 = 4;

    /// Allocates and registers a user subtree in the current allocation
    /// context. Member initial values ride the creation payload, so this
    /// generates no field deltas.
    pub fn create(
        model: &mut WorldModel,
        user_name: &str,
        machine_id: &str,
        head_device: u32,
    ) -> Result<RefId, ElementError> {
        let id = model.registry.allocate()?;
        let user_name = ValueField::register_new(model, user_name.to_string())?;
        let machine_id = ValueField::register_new(model, machine_id.to_string())?;
        let head_device = ValueField::register_new(model, head_device)?;
        let user = Self {
            core: ElementCore::new(id),
            user_name,
            machine_id,
            head_device,
        };
        model.registry.register(id, Box::new(user))?;
        model.end_init_phase(id);
        Ok(id)
    }

    pub fn name_of(model: &WorldModel, user: RefId) -> Option<String> {
        let element = model.registry.get(user)?;
        let user = element.downcast_ref::<User>()?;
        model.value_get::<String>(user.user_name).ok()
    }
}

impl SyncElement for User {
    fn core(&self) -> &ElementCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ElementCore {
        &mut self.core
    }

    fn kind_name(&self) -> &'static str {
        "User"
    }

    fn encode_full(
        &mut self,
        _model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        let base = self.core.ref_id;
        writer.write_var_u64(self.user_name.offset_from(base));
        writer.write_var_u64(self.machine_id.offset_from(base));
        writer.write_var_u64(self.head_device.offset_from(base));
        Ok(())
    }

    fn decode_full(
        &mut self,
        _model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        let base = self.core.ref_id;
        self.user_name = RefId::add_offset(base, reader.read_var_u64()?);
        self.machine_id = RefId::add_offset(base, reader.read_var_u64()?);
        self.head_device = RefId::add_offset(base, reader.read_var_u64()?);
        Ok(())
    }

    fn encode_delta(
        &mut self,
        model: &mut WorldModel,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        self.encode_full(model, writer)
    }

    fn decode_delta(
        &mut self,
        model: &mut WorldModel,
        reader: &mut ByteReader,
    ) -> Result<(), ElementError> {
        self.decode_full(model, reader)
    }

    fn clear_dirty(&mut self) {
        self.core.is_dirty = false;
    }

    fn dispose(&mut self, model: &mut WorldModel) {
        for member in [self.user_name, self.machine_id, self.head_device] {
            let _ = model.dispose_element(member);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// The replicator kind that materializes users on remote peers. Entry
/// payloads carry the member values, so a created user arrives fully
/// initialized even before its field records replay.
pub struct UserReplicatorKind;

impl ReplicatorKind for UserReplicatorKind {
    fn kind_name(&self) -> &'static str {
        "User"
    }

    fn encode_element(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        writer: &mut ByteWriter,
    ) -> Result<(), ElementError> {
        let (name_id, machine_id, head_id) = {
            let element = model
                .registry
                .get(key)
                .ok_or(ElementError::WrongKind {
                    id: key,
                    expected: "User",
                })?;
            let user = element.downcast_ref::<User>().ok_or(ElementError::WrongKind {
                id: key,
                expected: "User",
            })?;
            (user.user_name, user.machine_id, user.head_device)
        };
        writer.write_string(&model.value_get::<String>(name_id)?);
        writer.write_string(&model.value_get::<String>(machine_id)?);
        writer.write_u32(model.value_get::<u32>(head_id)?);
        Ok(())
    }

    fn create_element_with_key(
        &mut self,
        model: &mut WorldModel,
        key: RefId,
        reader: &mut ByteReader,
    ) -> Result<Option<RefId>, ElementError> {
        let user_name = reader.read_string()?;
        let machine_id = reader.read_string()?;
        let head_device = reader.read_u32()?;
        let user = User::create(model, &user_name, &machine_id, head_device)?;
        debug_assert_eq!(user, key);
        info!("user {user} ({user_name}) materialized");
        model.push_event(ElementEvent::UserJoined { user });
        Ok(Some(user))
    }

    /// A departed user takes their entire identifier namespace with them.
    fn element_removed(&mut self, model: &mut WorldModel, key: RefId) {
        let user_byte = key.user_byte();
        if user_byte != USER_BYTE_GLOBAL && user_byte != USER_BYTE_LOCAL {
            for id in model.registry.ids_with_user_byte(user_byte) {
                let _ = model.dispose_element(id);
            }
        } else {
            let _ = model.dispose_element(key);
        }
        model.push_event(ElementEvent::UserLeft { user: key });
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
