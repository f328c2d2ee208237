use crate::ref_id::RefId;

/// Notifications published by the data model while elements change, drained
/// by the application after each world update or sync tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementEvent {
    /// A value field took a new value (locally or from the network).
    Changed { id: RefId },

    /// Elements were appended or inserted into a list.
    ElementsAdded {
        list: RefId,
        index: usize,
        count: usize,
    },

    /// Fired before elements leave a list.
    ElementsRemoving {
        list: RefId,
        index: usize,
        count: usize,
    },

    /// Fired after elements left a list.
    ElementsRemoved {
        list: RefId,
        index: usize,
        count: usize,
    },

    /// A keyed dictionary gained an entry.
    EntryAdded { map: RefId, element: RefId },

    /// A keyed dictionary lost an entry.
    EntryRemoved { map: RefId, element: RefId },

    /// A replicated map gained an element. `is_new` is false when the
    /// decoder reused an element that was already live in the registry.
    ElementAdded {
        map: RefId,
        key: RefId,
        element: RefId,
        is_new: bool,
    },

    /// A replicated map lost an element.
    ElementRemoved { map: RefId, key: RefId },

    /// An authority rejection reached this element; a correction follows.
    Invalidated { id: RefId },

    /// A user element appeared in the user replicator.
    UserJoined { user: RefId },

    /// A user element left the user replicator.
    UserLeft { user: RefId },
}
