use crate::{
    element::error::ElementError,
    message::MessageHeader,
    ref_id::RefId,
    types::{StateVersion, Tick},
};

/// Outcome of validating one incoming record against an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Conflict,
    Ignore,
}

/// Conflict-tracking metadata carried by every element that participates in
/// authority-checked writes.
#[derive(Debug, Clone)]
pub struct ConflictState {
    /// Authority state version at the time of the last accepted change.
    pub last_host_version: StateVersion,
    /// Sync tick at which this peer last encoded the element.
    pub last_version: Tick,
    /// Highest tick the authority has confirmed for this element.
    pub last_confirmed_tick: Tick,
    /// The user whose change was last accepted.
    pub last_modifying_user: Option<RefId>,
    /// False after an authority rejection, until the correction lands.
    pub is_valid: bool,
    /// Host-only elements reject every guest write.
    pub is_host_only: bool,
    pub is_confirmed: bool,
    /// A driven element is held by a link and rejects external mutation.
    pub driven: bool,
}

impl Default for ConflictState {
    fn default() -> Self {
        Self {
            last_host_version: 0,
            last_version: 0,
            last_confirmed_tick: 0,
            last_modifying_user: None,
            is_valid: true,
            is_host_only: false,
            is_confirmed: true,
            driven: false,
        }
    }
}

impl ConflictState {
    /// Authority-side validation of a guest's delta record.
    pub fn validate_remote(&self, header: &MessageHeader) -> Validity {
        if !self.is_valid {
            return Validity::Conflict;
        }
        if self.driven {
            return Validity::Ignore;
        }
        if self.is_host_only {
            return Validity::Conflict;
        }
        let same_writer = self.last_modifying_user.is_some()
            && self.last_modifying_user == header.sender_user;
        if !same_writer && header.state_version < self.last_host_version {
            // stale relative to another writer's accepted change
            return Validity::Conflict;
        }
        if same_writer && header.sync_tick <= self.last_version {
            // the sender's own records arrived out of order
            return Validity::Conflict;
        }
        Validity::Valid
    }

    /// Records an accepted change on the authority.
    pub fn accept(&mut self, header: &MessageHeader, host_version: StateVersion) {
        self.last_host_version = host_version;
        self.last_version = header.sync_tick;
        self.last_modifying_user = header.sender_user;
    }

    /// Guest-side confirmation. `last_confirmed_tick` is monotone; stale
    /// confirmations fail.
    pub fn confirm(&mut self, tick: Tick) -> Result<(), ElementError> {
        if tick <= self.last_confirmed_tick {
            return Err(ElementError::StaleConfirm {
                tick,
                last_confirmed: self.last_confirmed_tick,
            });
        }
        self.last_confirmed_tick = tick;
        self.is_confirmed = true;
        // guest-side validity: everything we sent has been acknowledged
        self.is_valid = self.last_version <= self.last_confirmed_tick;
        Ok(())
    }
}

/// State common to every sync element.
#[derive(Debug, Clone)]
pub struct ElementCore {
    pub ref_id: RefId,
    pub is_local: bool,
    pub is_disposed: bool,
    pub is_dirty: bool,
    pub in_init_phase: bool,
    pub version: u64,
    pub conflict: ConflictState,
}

impl ElementCore {
    pub fn new(ref_id: RefId) -> Self {
        Self {
            ref_id,
            is_local: ref_id.is_local(),
            is_disposed: false,
            is_dirty: false,
            in_init_phase: true,
            version: 0,
            conflict: ConflictState::default(),
        }
    }

    /// True when mutations on this element should produce sync records.
    pub fn generates_sync(&self) -> bool {
        !self.is_local && !self.is_disposed && !self.in_init_phase
    }

    pub fn end_init_phase(&mut self) {
        self.in_init_phase = false;
    }
}

#[cfg(test)]
mod tests {
    use super::{ConflictState, Validity};
    use crate::{message::MessageHeader, ref_id::RefId};

    fn header(user: RefId, state_version: u64, sync_tick: u64) -> MessageHeader {
        MessageHeader {
            state_version,
            sync_tick,
            wall_time: 0.0,
            sender_user: Some(user),
        }
    }

    #[test]
    fn fresh_state_accepts() {
        let state = ConflictState::default();
        let h = header(RefId::new(1, 1), 0, 1);
        assert_eq!(state.validate_remote(&h), Validity::Valid);
    }

    #[test]
    fn invalid_element_conflicts() {
        let state = ConflictState {
            is_valid: false,
            ..Default::default()
        };
        let h = header(RefId::new(1, 1), 10, 10);
        assert_eq!(state.validate_remote(&h), Validity::Conflict);
    }

    #[test]
    fn driven_element_ignores() {
        let state = ConflictState {
            driven: true,
            ..Default::default()
        };
        let h = header(RefId::new(1, 1), 10, 10);
        assert_eq!(state.validate_remote(&h), Validity::Ignore);
    }

    #[test]
    fn host_only_conflicts() {
        let state = ConflictState {
            is_host_only: true,
            ..Default::default()
        };
        let h = header(RefId::new(1, 1), 10, 10);
        assert_eq!(state.validate_remote(&h), Validity::Conflict);
    }

    #[test]
    fn stale_other_writer_conflicts() {
        let mut state = ConflictState::default();
        let first = header(RefId::new(1, 1), 7, 3);
        state.accept(&first, 8);

        // another writer still on state version 7 loses
        let second = header(RefId::new(2, 1), 7, 5);
        assert_eq!(state.validate_remote(&second), Validity::Conflict);

        // a writer that has seen version 8 wins
        let third = header(RefId::new(2, 1), 8, 5);
        assert_eq!(state.validate_remote(&third), Validity::Valid);
    }

    #[test]
    fn same_writer_reorder_conflicts() {
        let mut state = ConflictState::default();
        let user = RefId::new(1, 1);
        state.accept(&header(user, 7, 5), 8);

        assert_eq!(state.validate_remote(&header(user, 7, 5)), Validity::Conflict);
        assert_eq!(state.validate_remote(&header(user, 7, 4)), Validity::Conflict);
        assert_eq!(state.validate_remote(&header(user, 7, 6)), Validity::Valid);
    }

    #[test]
    fn confirm_is_monotone() {
        let mut state = ConflictState::default();
        state.confirm(3).unwrap();
        assert!(state.confirm(3).is_err());
        assert!(state.confirm(2).is_err());
        state.confirm(4).unwrap();
        assert_eq!(state.last_confirmed_tick, 4);
    }

    #[test]
    fn confirm_restores_guest_validity() {
        let mut state = ConflictState {
            last_version: 6,
            is_valid: false,
            ..Default::default()
        };
        state.confirm(6).unwrap();
        assert!(state.is_valid);
    }
}
