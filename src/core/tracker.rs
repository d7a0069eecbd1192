use hashbrown::{HashMap, HashSet};

use crate::{
    op::Operation,
    types::{LocalId, RequestId, UNLOGGED_LOCAL_ID},
};

/// Result of [`DispatchTracker::try_begin_dispatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStart {
    /// Tracked under a fresh request id, carried in `request_id`.
    Accepted(Operation),
    /// A dispatch for the same local id has not completed yet.
    AlreadyInFlight,
}

/// In-flight bookkeeping. The single point that serializes dispatch.
#[derive(Debug, Default)]
pub struct DispatchTracker {
    in_flight: HashMap<RequestId, Operation>,
    by_local: HashSet<LocalId>,
}

impl DispatchTracker {
    /// Tracker with nothing in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert keyed by local id. Unlogged operations are never
    /// de-duplicated.
    pub fn try_begin_dispatch(&mut self, mut op: Operation) -> DispatchStart {
        if op.local_id != UNLOGGED_LOCAL_ID && !self.by_local.insert(op.local_id) {
            return DispatchStart::AlreadyInFlight;
        }
        let request_id = uuid::Uuid::new_v4();
        op.request_id = Some(request_id);
        self.in_flight.insert(request_id, op.clone());
        DispatchStart::Accepted(op)
    }

    /// Stops tracking `request_id`. Returns `None` for unknown or stale ids.
    pub fn complete(&mut self, request_id: &RequestId) -> Option<Operation> {
        let op = self.in_flight.remove(request_id)?;
        if op.local_id != UNLOGGED_LOCAL_ID {
            self.by_local.remove(&op.local_id);
        }
        Some(op)
    }

    /// True while a dispatch of `local_id` is outstanding.
    pub fn is_in_flight(&self, local_id: LocalId) -> bool {
        self.by_local.contains(&local_id)
    }

    /// Outstanding dispatches, unlogged ones included.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}
