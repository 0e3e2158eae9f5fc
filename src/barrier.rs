// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Resource barriers and the keyed set that accumulates them.

A [`ResourceBarrier`] records one pending before→after change for one
resource: either a memory-state transition or a queue-family ownership
transfer. A [`ResourceBarrierSet`] collects barriers keyed by
([`BarrierKind`], resource identity), so a batch holds at most one entry per
kind per resource; re-requesting a transition overwrites the entry rather
than queueing a duplicate.

Sets accumulate while a command list or program bindings object is being
encoded, and are consumed in one of two ways:

- flushed to the backend via the command list (`set_resource_barriers`), or
- applied to the live resources via [`ResourceBarrierSet::apply_transitions`],
  which re-checks every recorded before-state against reality and fails
  loudly on mismatch. A mismatch means a stale or racing barrier set, which
  is a programming error and not recoverable.
*/

use crate::resource::{QueueFamily, Resource, ResourceId, ResourceState, StateError};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Which flavor of transition a barrier describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BarrierKind {
    StateTransition,
    OwnerTransition,
}

impl Display for BarrierKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BarrierKind::StateTransition => f.write_str("state"),
            BarrierKind::OwnerTransition => f.write_str("owner"),
        }
    }
}

/// Identity of a barrier within a set: at most one entry per (kind, resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierId {
    pub kind: BarrierKind,
    pub resource: ResourceId,
}

/// The before→after payload of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierChange {
    State {
        before: ResourceState,
        after: ResourceState,
    },
    Owner {
        before: QueueFamily,
        after: QueueFamily,
    },
}

/// One pending transition for one resource.
#[derive(Debug, Clone)]
pub struct ResourceBarrier {
    resource: Resource,
    change: BarrierChange,
}

impl ResourceBarrier {
    pub fn state_transition(
        resource: Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> Self {
        ResourceBarrier {
            resource,
            change: BarrierChange::State { before, after },
        }
    }

    pub fn owner_transition(resource: Resource, before: QueueFamily, after: QueueFamily) -> Self {
        ResourceBarrier {
            resource,
            change: BarrierChange::Owner { before, after },
        }
    }

    pub fn id(&self) -> BarrierId {
        let kind = match self.change {
            BarrierChange::State { .. } => BarrierKind::StateTransition,
            BarrierChange::Owner { .. } => BarrierKind::OwnerTransition,
        };
        BarrierId {
            kind,
            resource: self.resource.id(),
        }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn change(&self) -> BarrierChange {
        self.change
    }
}

impl Display for ResourceBarrier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.change {
            BarrierChange::State { before, after } => {
                write!(f, "{} transition {} -> {}", self.resource, before, after)
            }
            BarrierChange::Owner { before, after } => {
                write!(
                    f,
                    "{} owner transfer {} -> {}",
                    self.resource, before, after
                )
            }
        }
    }
}

/// Result of [`ResourceBarrierSet::add`].
///
/// Callers distinguish "first insertion" from "identical entry already
/// present" from "payload replaced" to decide whether dependent work needs
/// re-pushing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    Added,
    Existing,
    Updated,
}

/// Errors raised when applying a barrier set to the live resources.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    #[error(transparent)]
    State(#[from] StateError),
}

/// An ordered, keyed collection of pending barriers.
///
/// Iteration and [`Display`] follow barrier identity order, so diagnostics
/// are deterministic run to run.
#[derive(Debug, Clone, Default)]
pub struct ResourceBarrierSet {
    entries: BTreeMap<BarrierId, ResourceBarrier>,
}

impl ResourceBarrierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Inserts a barrier, keyed by its identity.
    ///
    /// Idempotent for identical payloads; a different payload for the same
    /// identity overwrites and reports [`AddResult::Updated`].
    pub fn add(&mut self, barrier: ResourceBarrier) -> AddResult {
        let id = barrier.id();
        match self.entries.get(&id) {
            None => {
                self.entries.insert(id, barrier);
                AddResult::Added
            }
            Some(existing) if existing.change() == barrier.change() => AddResult::Existing,
            Some(_) => {
                self.entries.insert(id, barrier);
                AddResult::Updated
            }
        }
    }

    /// Removes the entry with the given identity, if present.
    pub fn remove(&mut self, id: BarrierId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Removes a pending state transition for `resource`.
    ///
    /// Used when a resource is unbound from a program argument before the set
    /// is applied, so we don't transition something no longer used this frame.
    pub fn remove_state_transition(&mut self, resource: &Resource) -> bool {
        self.remove(BarrierId {
            kind: BarrierKind::StateTransition,
            resource: resource.id(),
        })
    }

    /// Removes a pending owner transition for `resource`.
    pub fn remove_owner_transition(&mut self, resource: &Resource) -> bool {
        self.remove(BarrierId {
            kind: BarrierKind::OwnerTransition,
            resource: resource.id(),
        })
    }

    /// Whether the set holds exactly this state transition for `resource`.
    pub fn has_state_transition(
        &self,
        resource: &Resource,
        before: ResourceState,
        after: ResourceState,
    ) -> bool {
        let id = BarrierId {
            kind: BarrierKind::StateTransition,
            resource: resource.id(),
        };
        matches!(
            self.entries.get(&id).map(ResourceBarrier::change),
            Some(BarrierChange::State { before: b, after: a }) if b == before && a == after
        )
    }

    /// Whether the set holds exactly this owner transition for `resource`.
    pub fn has_owner_transition(
        &self,
        resource: &Resource,
        before: QueueFamily,
        after: QueueFamily,
    ) -> bool {
        let id = BarrierId {
            kind: BarrierKind::OwnerTransition,
            resource: resource.id(),
        };
        matches!(
            self.entries.get(&id).map(ResourceBarrier::change),
            Some(BarrierChange::Owner { before: b, after: a }) if b == before && a == after
        )
    }

    /// Iterates entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &ResourceBarrier> {
        self.entries.values()
    }

    /// Applies every recorded transition against its resource's live state.
    ///
    /// Each entry's before-state must exactly match reality at apply time;
    /// the first mismatch aborts with an error. The application is
    /// idempotence-checked, not auto-synced: nothing here re-derives a
    /// before-state from the live resource.
    pub fn apply_transitions(&self) -> Result<(), BarrierError> {
        for barrier in self.entries.values() {
            match barrier.change() {
                BarrierChange::State { before, after } => {
                    barrier.resource().apply_transition(before, after)?;
                }
                BarrierChange::Owner { before, after } => {
                    barrier.resource().apply_owner_transition(before, after)?;
                }
            }
        }
        Ok(())
    }
}

impl Display for ResourceBarrierSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for barrier in self.entries.values() {
            writeln!(f, "{}", barrier)?;
        }
        Ok(())
    }
}
