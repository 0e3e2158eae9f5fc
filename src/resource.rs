// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Resources and their GPU-visible state machine.

A [`Resource`] is a cheaply-cloneable handle to a GPU object (buffer, texture
or sampler). Besides identity and settings, the handle owns the one piece of
mutable state this crate cares about: the resource's current GPU memory state
(render target, copy destination, shader resource, and so on).

State never changes behind the renderer's back. Every change goes through an
explicit transition request, and a transition that actually changes state can
record a barrier into a [`ResourceBarrierSet`](crate::barrier::ResourceBarrierSet)
so the command list that depends on the new state can order GPU work around it.

# State rules

- A resource starts in [`ResourceState::Common`]. The first transition out of
  `Common` needs no barrier: no GPU work has depended on the contents yet.
- Once a resource has left `Common` it can never return. Requesting that is
  an error, not a silent skip.
- Requesting the state the resource is already in is a no-op and reports that
  no change occurred.

Queue-family ownership follows the same shape: `set_owner_queue_family` is
idempotent, the first assignment emits no barrier, and a real change records
an owner-transition barrier for explicit multi-queue submission models.
*/

use crate::barrier::{ResourceBarrier, ResourceBarrierSet};
use crate::imp;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Identifies a queue family for ownership transfers between queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueFamily(pub u32);

impl Display for QueueFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "family {}", self.0)
    }
}

/// Unique identity of a resource, stable for the life of the process.
///
/// Barrier sets key their entries on this, so it is `Ord` to give barrier
/// diagnostics a deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn next_resource_id() -> ResourceId {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    ResourceId(COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// What kind of GPU object a [`Resource`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Sampler,
}

/// Which heap the resource lives in.
///
/// `Upload` resources are CPU-writable staging memory; the GPU only ever reads
/// them, so they are pinned to a read state and refuse state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageMode {
    DeviceLocal,
    Upload,
    Readback,
}

bitflags::bitflags! {
    /// Declared usage of a resource, set at creation.
    ///
    /// Bindings use this to classify the target state a bound resource must
    /// reach; a texture created with `DEPTH_STENCIL` reads as depth, not as a
    /// generic shader resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceUsage: u32 {
        const SHADER_READ   = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
    }
}

/// GPU memory state of a resource.
///
/// Mirrors the union of the native APIs' transition states. `Common` is the
/// creation state and is only ever a *before* state; see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceState {
    Common,
    VertexBuffer,
    IndexBuffer,
    ConstantBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    ShaderResourceNonPixel,
    ShaderResourcePixel,
    StreamOut,
    IndirectArgument,
    CopyDest,
    CopySource,
    ResolveDest,
    ResolveSource,
    GenericRead,
    Present,
    Predication,
    Undefined,
}

impl Display for ResourceState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceState::Common => "Common",
            ResourceState::VertexBuffer => "VertexBuffer",
            ResourceState::IndexBuffer => "IndexBuffer",
            ResourceState::ConstantBuffer => "ConstantBuffer",
            ResourceState::RenderTarget => "RenderTarget",
            ResourceState::UnorderedAccess => "UnorderedAccess",
            ResourceState::DepthWrite => "DepthWrite",
            ResourceState::DepthRead => "DepthRead",
            ResourceState::ShaderResourceNonPixel => "ShaderResourceNonPixel",
            ResourceState::ShaderResourcePixel => "ShaderResourcePixel",
            ResourceState::StreamOut => "StreamOut",
            ResourceState::IndirectArgument => "IndirectArgument",
            ResourceState::CopyDest => "CopyDest",
            ResourceState::CopySource => "CopySource",
            ResourceState::ResolveDest => "ResolveDest",
            ResourceState::ResolveSource => "ResolveSource",
            ResourceState::GenericRead => "GenericRead",
            ResourceState::Present => "Present",
            ResourceState::Predication => "Predication",
            ResourceState::Undefined => "Undefined",
        };
        f.write_str(name)
    }
}

/// Errors raised by state-transition requests.
///
/// All of these indicate a defect in the caller's transition ordering; none
/// are retryable.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("resource '{name}': cannot transition back to Common from {current}")]
    CommonReentry { name: String, current: ResourceState },
    #[error("resource '{name}': Upload-heap storage is pinned read-only and cannot transition")]
    PinnedStorage { name: String },
    #[error(
        "resource '{name}': recorded before-state {expected} does not match live state {actual}"
    )]
    Mismatch {
        name: String,
        expected: ResourceState,
        actual: ResourceState,
    },
    #[error(
        "resource '{name}': recorded before-owner {expected} does not match live owner {actual:?}"
    )]
    OwnerMismatch {
        name: String,
        expected: QueueFamily,
        actual: Option<QueueFamily>,
    },
}

#[derive(Debug)]
struct ResourceShared {
    id: ResourceId,
    kind: ResourceKind,
    storage: StorageMode,
    usage: ResourceUsage,
    name: String,
    state: Mutex<ResourceState>,
    owner: Mutex<Option<QueueFamily>>,
    native: imp::NativeResource,
}

impl Drop for ResourceShared {
    fn drop(&mut self) {
        //last handle gone; hand the backend allocation back.
        self.native.release();
    }
}

/// Shared handle to a GPU resource.
///
/// Clones refer to the same underlying object; equality and hashing follow
/// the resource identity, not the handle.
#[derive(Debug, Clone)]
pub struct Resource {
    shared: Arc<ResourceShared>,
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}
impl Eq for Resource {}

impl std::hash::Hash for Resource {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} '{}'", self.shared.id, self.shared.name)
    }
}

impl Resource {
    fn new(kind: ResourceKind, storage: StorageMode, usage: ResourceUsage, name: &str) -> Self {
        Resource {
            shared: Arc::new(ResourceShared {
                id: next_resource_id(),
                kind,
                storage,
                usage,
                name: name.to_string(),
                state: Mutex::new(ResourceState::Common),
                owner: Mutex::new(None),
                native: imp::NativeResource::new(name),
            }),
        }
    }

    /// Creates a buffer resource in the `Common` state.
    pub fn buffer(storage: StorageMode, name: &str) -> Self {
        Self::new(ResourceKind::Buffer, storage, ResourceUsage::SHADER_READ, name)
    }

    /// Creates a texture resource in the `Common` state.
    pub fn texture(storage: StorageMode, usage: ResourceUsage, name: &str) -> Self {
        Self::new(ResourceKind::Texture, storage, usage, name)
    }

    /// Creates a sampler. Samplers have no memory state and never transition.
    pub fn sampler(name: &str) -> Self {
        Self::new(
            ResourceKind::Sampler,
            StorageMode::DeviceLocal,
            ResourceUsage::empty(),
            name,
        )
    }

    pub fn id(&self) -> ResourceId {
        self.shared.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.shared.kind
    }

    pub fn storage(&self) -> StorageMode {
        self.shared.storage
    }

    pub fn usage(&self) -> ResourceUsage {
        self.shared.usage
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current GPU state.
    pub fn state(&self) -> ResourceState {
        *self.shared.state.lock().unwrap()
    }

    /// Current owning queue family, if one was ever assigned.
    pub fn owner_queue_family(&self) -> Option<QueueFamily> {
        *self.shared.owner.lock().unwrap()
    }

    /// Updates the in-memory state without recording any barrier.
    ///
    /// Returns whether a change occurred. The caller is responsible for
    /// whatever GPU-side ordering the change requires; render passes use this
    /// for attachment states they force themselves. Even on this forced path
    /// a resource that has left `Common` can never return to it.
    pub fn set_state(&self, new_state: ResourceState) -> Result<bool, StateError> {
        let mut state = self.shared.state.lock().unwrap();
        if *state == new_state {
            return Ok(false);
        }
        if new_state == ResourceState::Common {
            return Err(StateError::CommonReentry {
                name: self.shared.name.clone(),
                current: *state,
            });
        }
        logwise::trace_sync!(
            "resource {name}: {before} -> {after} (no barrier)",
            name = self.shared.name.clone(),
            before = state.to_string(),
            after = new_state.to_string()
        );
        *state = new_state;
        Ok(true)
    }

    /// Updates the state, recording a state-transition barrier when one is
    /// needed.
    ///
    /// Returns whether a change occurred. A transition out of `Common` is
    /// exempt from barriers: nothing on the GPU has depended on the contents
    /// yet. Requesting `Common` as a target, or any transition on a pinned
    /// Upload-heap resource, is an error.
    pub fn set_state_with_barriers(
        &self,
        new_state: ResourceState,
        barriers: &mut ResourceBarrierSet,
    ) -> Result<bool, StateError> {
        let mut state = self.shared.state.lock().unwrap();
        if *state == new_state {
            return Ok(false);
        }
        if new_state == ResourceState::Common {
            return Err(StateError::CommonReentry {
                name: self.shared.name.clone(),
                current: *state,
            });
        }
        if self.shared.storage == StorageMode::Upload {
            return Err(StateError::PinnedStorage {
                name: self.shared.name.clone(),
            });
        }
        if *state != ResourceState::Common {
            barriers.add(ResourceBarrier::state_transition(
                self.clone(),
                *state,
                new_state,
            ));
        }
        logwise::trace_sync!(
            "resource {name}: {before} -> {after}",
            name = self.shared.name.clone(),
            before = state.to_string(),
            after = new_state.to_string()
        );
        *state = new_state;
        Ok(true)
    }

    /// Transfers queue-family ownership, optionally recording an
    /// owner-transition barrier.
    ///
    /// The first assignment (no previous owner) emits no barrier, paralleling
    /// the first use of a `Common` resource. Returns whether a change
    /// occurred.
    pub fn set_owner_queue_family(
        &self,
        new_family: QueueFamily,
        barriers: Option<&mut ResourceBarrierSet>,
    ) -> bool {
        let mut owner = self.shared.owner.lock().unwrap();
        if *owner == Some(new_family) {
            return false;
        }
        if let (Some(before), Some(set)) = (*owner, barriers) {
            set.add(ResourceBarrier::owner_transition(
                self.clone(),
                before,
                new_family,
            ));
        }
        *owner = Some(new_family);
        true
    }

    /// Applies a recorded state transition against the live state.
    ///
    /// This is the correctness gate for stale or racing barrier sets: if the
    /// live state is not exactly `before`, the application fails rather than
    /// silently skipping.
    pub(crate) fn apply_transition(
        &self,
        before: ResourceState,
        after: ResourceState,
    ) -> Result<(), StateError> {
        let mut state = self.shared.state.lock().unwrap();
        if *state != before {
            return Err(StateError::Mismatch {
                name: self.shared.name.clone(),
                expected: before,
                actual: *state,
            });
        }
        *state = after;
        Ok(())
    }

    /// Owner-transition analog of [`Resource::apply_transition`].
    pub(crate) fn apply_owner_transition(
        &self,
        before: QueueFamily,
        after: QueueFamily,
    ) -> Result<(), StateError> {
        let mut owner = self.shared.owner.lock().unwrap();
        if *owner != Some(before) {
            return Err(StateError::OwnerMismatch {
                name: self.shared.name.clone(),
                expected: before,
                actual: *owner,
            });
        }
        *owner = Some(after);
        Ok(())
    }
}
