// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Binds concrete resource views to program arguments, and aggregates the GPU
state each bound resource must reach before the program executes.

[`Program`] models what shader reflection hands us: a list of declared
arguments, each with an access category (constant or mutable). A
[`ProgramBindings`] object pairs every declared argument with one or more
resource views, validating at construction that nothing was left unbound —
the failure names *every* missing argument so shader/binding mismatches get
fixed in one pass.

The interesting work is transition aggregation. Each bound resource is
classified to a target state from its kind, storage and access:

- samplers have no memory state and are exempt;
- Upload-heap buffers are pinned read-only and are exempt;
- constant bindings of buffers go to [`ResourceState::ConstantBuffer`];
- depth-stencil textures go to [`ResourceState::DepthRead`];
- everything else defaults to [`ResourceState::ShaderResourcePixel`].

Pairs are partitioned per access category so a draw that only touched
mutable bindings can apply just that bucket. [`ProgramBindings::apply_resource_states`]
folds the selected buckets into one shared barrier set (owner transition
first when a queue is engaging the resources, then state transition) and
reports whether anything changed, which is what decides whether the command
list needs a barrier flush at all.
*/

use crate::barrier::ResourceBarrierSet;
use crate::resource::{
    QueueFamily, Resource, ResourceKind, ResourceState, ResourceUsage, StateError, StorageMode,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// How a program argument reads its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentAccess {
    /// Bound once, read-only for the life of the bindings.
    Constant,
    /// May be rebound between draws via [`ProgramBindings::set_resource_views`].
    Mutable,
}

impl ArgumentAccess {
    pub fn mask(self) -> AccessMask {
        match self {
            ArgumentAccess::Constant => AccessMask::CONSTANT,
            ArgumentAccess::Mutable => AccessMask::MUTABLE,
        }
    }
}

bitflags::bitflags! {
    /// Selects which access categories an operation touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const CONSTANT = 1 << 0;
        const MUTABLE  = 1 << 1;
    }
}

/// A declared program argument, as reported by shader reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentDecl {
    name: String,
    access: ArgumentAccess,
}

impl ArgumentDecl {
    pub fn constant(name: &str) -> Self {
        ArgumentDecl {
            name: name.to_string(),
            access: ArgumentAccess::Constant,
        }
    }

    pub fn mutable(name: &str) -> Self {
        ArgumentDecl {
            name: name.to_string(),
            access: ArgumentAccess::Mutable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn access(&self) -> ArgumentAccess {
        self.access
    }
}

/// A program's binding interface: its name and declared arguments.
///
/// Shader compilation and argument reflection live outside this crate; this
/// type is the shape their output arrives in.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    arguments: Vec<ArgumentDecl>,
}

impl Program {
    pub fn new(name: &str, arguments: Vec<ArgumentDecl>) -> Self {
        Program {
            name: name.to_string(),
            arguments,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[ArgumentDecl] {
        &self.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&ArgumentDecl> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// A view over a resource, bindable to a program argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceView {
    resource: Resource,
}

impl ResourceView {
    pub fn new(resource: Resource) -> Self {
        ResourceView { resource }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }
}

/// Errors raised by bindings construction, rebinding and barrier application.
#[derive(Debug, thiserror::Error)]
pub enum BindingsError {
    #[error("program '{program}': arguments not bound to any resource view: {}", arguments.join(", "))]
    UnboundArguments {
        program: String,
        arguments: Vec<String>,
    },
    #[error("program '{program}': resource views supplied for undeclared arguments: {}", arguments.join(", "))]
    UnknownArguments {
        program: String,
        arguments: Vec<String>,
    },
    #[error("program '{program}': argument '{argument}' is constant and cannot be rebound")]
    ImmutableArgument { program: String, argument: String },
    #[error("program '{program}': replacement views for argument '{argument}' are empty")]
    EmptyResourceViews { program: String, argument: String },
    #[error(transparent)]
    State(#[from] StateError),
}

fn target_state(resource: &Resource, access: ArgumentAccess) -> Option<ResourceState> {
    match resource.kind() {
        //samplers never need state transitions
        ResourceKind::Sampler => None,
        //upload-heap memory is pinned read-only
        _ if resource.storage() == StorageMode::Upload => None,
        ResourceKind::Buffer if access == ArgumentAccess::Constant => {
            Some(ResourceState::ConstantBuffer)
        }
        ResourceKind::Texture if resource.usage().contains(ResourceUsage::DEPTH_STENCIL) => {
            Some(ResourceState::DepthRead)
        }
        _ => Some(ResourceState::ShaderResourcePixel),
    }
}

#[derive(Debug)]
struct ArgumentBinding {
    access: ArgumentAccess,
    views: Vec<ResourceView>,
}

#[derive(Debug)]
struct BindingsInner {
    bindings: HashMap<String, ArgumentBinding>,
    //per-access-category (resource, target state) buckets, kept in sync with
    //`bindings` so apply never re-scans the view lists
    constant_transitions: Vec<(Resource, ResourceState)>,
    mutable_transitions: Vec<(Resource, ResourceState)>,
    barriers: ResourceBarrierSet,
}

impl BindingsInner {
    fn rebuild_bucket(&mut self, access: ArgumentAccess) {
        let bucket: Vec<(Resource, ResourceState)> = self
            .bindings
            .values()
            .filter(|binding| binding.access == access)
            .flat_map(|binding| binding.views.iter())
            .filter_map(|view| {
                target_state(view.resource(), access).map(|state| (view.resource().clone(), state))
            })
            .collect();
        match access {
            ArgumentAccess::Constant => self.constant_transitions = bucket,
            ArgumentAccess::Mutable => self.mutable_transitions = bucket,
        }
    }
}

#[derive(Debug)]
struct BindingsShared {
    program: Program,
    inner: Mutex<BindingsInner>,
}

/// Shared handle to a program × resource-set binding.
///
/// Cloning is cheap; a command list retains a clone for the life of an encode
/// so the bound resources outlive GPU execution even if the caller drops its
/// own handle mid-frame.
#[derive(Debug, Clone)]
pub struct ProgramBindings {
    shared: Arc<BindingsShared>,
}

impl ProgramBindings {
    /// Builds bindings for `program` from a resource-view mapping.
    ///
    /// Fails when any declared argument has no (or an empty) view list, or
    /// when views are supplied for arguments the program never declared. Both
    /// failures list every offending argument, not just the first.
    pub fn new(
        program: &Program,
        mut views_by_argument: HashMap<String, Vec<ResourceView>>,
    ) -> Result<Self, BindingsError> {
        let mut missing = Vec::new();
        let mut bindings = HashMap::new();
        for decl in program.arguments() {
            match views_by_argument.remove(decl.name()) {
                Some(views) if !views.is_empty() => {
                    bindings.insert(
                        decl.name().to_string(),
                        ArgumentBinding {
                            access: decl.access(),
                            views,
                        },
                    );
                }
                _ => missing.push(decl.name().to_string()),
            }
        }
        if !missing.is_empty() {
            missing.sort();
            return Err(BindingsError::UnboundArguments {
                program: program.name().to_string(),
                arguments: missing,
            });
        }
        if !views_by_argument.is_empty() {
            let mut unknown: Vec<String> = views_by_argument.into_keys().collect();
            unknown.sort();
            return Err(BindingsError::UnknownArguments {
                program: program.name().to_string(),
                arguments: unknown,
            });
        }
        let mut inner = BindingsInner {
            bindings,
            constant_transitions: Vec::new(),
            mutable_transitions: Vec::new(),
            barriers: ResourceBarrierSet::new(),
        };
        inner.rebuild_bucket(ArgumentAccess::Constant);
        inner.rebuild_bucket(ArgumentAccess::Mutable);
        Ok(ProgramBindings {
            shared: Arc::new(BindingsShared {
                program: program.clone(),
                inner: Mutex::new(inner),
            }),
        })
    }

    pub fn program(&self) -> &Program {
        &self.shared.program
    }

    /// Replaces the views bound to a mutable argument.
    ///
    /// Resources present in the old views but absent from the new ones are
    /// scrubbed from the pending transition aggregation *and* from the
    /// accumulated barrier set: a barrier for a resource no longer used this
    /// frame is stale. Newly-referenced resources enter the aggregation and
    /// get their barriers on the next [`apply_resource_states`](Self::apply_resource_states).
    pub fn set_resource_views(
        &self,
        argument: &str,
        new_views: Vec<ResourceView>,
    ) -> Result<(), BindingsError> {
        let program = self.shared.program.name().to_string();
        if new_views.is_empty() {
            return Err(BindingsError::EmptyResourceViews {
                program,
                argument: argument.to_string(),
            });
        }
        let mut inner = self.shared.inner.lock().unwrap();
        let binding = inner.bindings.get_mut(argument).ok_or_else(|| {
            BindingsError::UnknownArguments {
                program: program.clone(),
                arguments: vec![argument.to_string()],
            }
        })?;
        if binding.access != ArgumentAccess::Mutable {
            return Err(BindingsError::ImmutableArgument {
                program,
                argument: argument.to_string(),
            });
        }
        let old_views = std::mem::replace(&mut binding.views, new_views);
        //scrub barriers for resources the replacement dropped
        let inner = &mut *inner;
        for old in &old_views {
            let still_used = inner
                .bindings
                .values()
                .any(|b| b.views.iter().any(|v| v.resource() == old.resource()));
            if !still_used {
                inner.barriers.remove_state_transition(old.resource());
                inner.barriers.remove_owner_transition(old.resource());
            }
        }
        inner.rebuild_bucket(ArgumentAccess::Mutable);
        Ok(())
    }

    /// Requests the aggregated transitions for the selected access
    /// categories, accumulating barriers into the bindings' shared set.
    ///
    /// When `owner_queue` is supplied (a queue engaging these resources for
    /// the first time), an ownership transfer is requested before each state
    /// transition. Returns whether anything changed; a `false` result means
    /// the caller can skip the barrier flush entirely.
    pub fn apply_resource_states(
        &self,
        mask: AccessMask,
        owner_queue: Option<QueueFamily>,
    ) -> Result<bool, BindingsError> {
        let mut guard = self.shared.inner.lock().unwrap();
        let inner = &mut *guard;
        let mut changed = false;
        let apply_bucket = |bucket: &[(Resource, ResourceState)],
                                barriers: &mut ResourceBarrierSet|
         -> Result<bool, BindingsError> {
            let mut any = false;
            for (resource, target) in bucket {
                if let Some(family) = owner_queue {
                    any |= resource.set_owner_queue_family(family, Some(&mut *barriers));
                }
                any |= resource.set_state_with_barriers(*target, barriers)?;
            }
            Ok(any)
        };
        if mask.contains(AccessMask::CONSTANT) {
            changed |= apply_bucket(&inner.constant_transitions, &mut inner.barriers)?;
        }
        if mask.contains(AccessMask::MUTABLE) {
            changed |= apply_bucket(&inner.mutable_transitions, &mut inner.barriers)?;
        }
        Ok(changed)
    }

    /// Snapshot of the accumulated barrier set.
    pub fn barriers(&self) -> ResourceBarrierSet {
        self.shared.inner.lock().unwrap().barriers.clone()
    }

    /// Every resource currently referenced by any argument, for retention.
    pub fn bound_resources(&self) -> Vec<Resource> {
        let inner = self.shared.inner.lock().unwrap();
        let mut resources: Vec<Resource> = inner
            .bindings
            .values()
            .flat_map(|binding| binding.views.iter())
            .map(|view| view.resource().clone())
            .collect();
        resources.sort_by_key(Resource::id);
        resources.dedup();
        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StorageMode;

    fn two_argument_program() -> Program {
        Program::new(
            "lighting",
            vec![
                ArgumentDecl::constant("g_uniforms"),
                ArgumentDecl::mutable("g_instances"),
            ],
        )
    }

    fn view(resource: &Resource) -> ResourceView {
        ResourceView::new(resource.clone())
    }

    #[test]
    fn construction_requires_every_argument_bound() {
        let program = Program::new(
            "unbound",
            vec![
                ArgumentDecl::constant("g_a"),
                ArgumentDecl::mutable("g_b"),
                ArgumentDecl::mutable("g_c"),
            ],
        );
        let buffer = Resource::buffer(StorageMode::DeviceLocal, "only_one");
        let mut views = HashMap::new();
        views.insert("g_b".to_string(), vec![view(&buffer)]);
        //also cover the empty-view-list case
        views.insert("g_c".to_string(), Vec::new());
        let err = ProgramBindings::new(&program, views).unwrap_err();
        match err {
            BindingsError::UnboundArguments { arguments, .. } => {
                //every missing argument, not just the first
                assert_eq!(arguments, vec!["g_a".to_string(), "g_c".to_string()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn classification_by_kind_storage_and_access() {
        let uniforms = Resource::buffer(StorageMode::DeviceLocal, "uniforms");
        let instances = Resource::buffer(StorageMode::DeviceLocal, "instances");
        let program = two_argument_program();
        let mut views = HashMap::new();
        views.insert("g_uniforms".to_string(), vec![view(&uniforms)]);
        views.insert("g_instances".to_string(), vec![view(&instances)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();

        let changed = bindings
            .apply_resource_states(AccessMask::all(), None)
            .unwrap();
        assert!(changed);
        //constant buffer access -> ConstantBuffer, mutable default -> shader read
        assert_eq!(uniforms.state(), ResourceState::ConstantBuffer);
        assert_eq!(instances.state(), ResourceState::ShaderResourcePixel);
        //both came out of Common: first use, no barriers
        assert!(bindings.barriers().is_empty());

        //a second application with unchanged states reports no change
        let changed = bindings
            .apply_resource_states(AccessMask::all(), None)
            .unwrap();
        assert!(!changed);
    }

    #[test]
    fn samplers_and_upload_buffers_are_exempt() {
        let sampler = Resource::sampler("smp");
        let staging = Resource::buffer(StorageMode::Upload, "staging");
        let program = Program::new(
            "exempt",
            vec![
                ArgumentDecl::constant("g_sampler"),
                ArgumentDecl::constant("g_staging"),
            ],
        );
        let mut views = HashMap::new();
        views.insert("g_sampler".to_string(), vec![view(&sampler)]);
        views.insert("g_staging".to_string(), vec![view(&staging)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();
        let changed = bindings
            .apply_resource_states(AccessMask::all(), None)
            .unwrap();
        assert!(!changed);
        assert_eq!(sampler.state(), ResourceState::Common);
        assert_eq!(staging.state(), ResourceState::Common);
    }

    #[test]
    fn depth_stencil_texture_reads_as_depth() {
        let shadow_map = Resource::texture(
            StorageMode::DeviceLocal,
            ResourceUsage::SHADER_READ | ResourceUsage::DEPTH_STENCIL,
            "shadow_map",
        );
        let program = Program::new("shadows", vec![ArgumentDecl::constant("g_shadow")]);
        let mut views = HashMap::new();
        views.insert("g_shadow".to_string(), vec![view(&shadow_map)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();
        bindings
            .apply_resource_states(AccessMask::all(), None)
            .unwrap();
        assert_eq!(shadow_map.state(), ResourceState::DepthRead);
    }

    #[test]
    fn rebinding_scrubs_stale_barriers_and_adds_new_ones() {
        let uniforms = Resource::buffer(StorageMode::DeviceLocal, "uniforms");
        let old_a = Resource::buffer(StorageMode::DeviceLocal, "old_a");
        let old_b = Resource::buffer(StorageMode::DeviceLocal, "old_b");
        let new_a = Resource::buffer(StorageMode::DeviceLocal, "new_a");
        let new_b = Resource::buffer(StorageMode::DeviceLocal, "new_b");
        //put everything past Common so applications record real barriers
        for r in [&uniforms, &old_a, &old_b, &new_a, &new_b] {
            r.set_state(ResourceState::CopyDest).unwrap();
        }

        let program = two_argument_program();
        let mut views = HashMap::new();
        views.insert("g_uniforms".to_string(), vec![view(&uniforms)]);
        views.insert("g_instances".to_string(), vec![view(&old_a), view(&old_b)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();

        bindings
            .apply_resource_states(AccessMask::all(), None)
            .unwrap();
        let barriers = bindings.barriers();
        assert!(barriers.has_state_transition(
            &old_a,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
        assert!(barriers.has_state_transition(
            &old_b,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));

        //replace with a disjoint set
        bindings
            .set_resource_views("g_instances", vec![view(&new_a), view(&new_b)])
            .unwrap();
        bindings
            .apply_resource_states(AccessMask::MUTABLE, None)
            .unwrap();
        let barriers = bindings.barriers();
        assert!(!barriers.has_state_transition(
            &old_a,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
        assert!(!barriers.has_state_transition(
            &old_b,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
        assert!(barriers.has_state_transition(
            &new_a,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
        assert!(barriers.has_state_transition(
            &new_b,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
    }

    #[test]
    fn rebinding_a_constant_argument_is_an_error() {
        let uniforms = Resource::buffer(StorageMode::DeviceLocal, "uniforms");
        let instances = Resource::buffer(StorageMode::DeviceLocal, "instances");
        let program = two_argument_program();
        let mut views = HashMap::new();
        views.insert("g_uniforms".to_string(), vec![view(&uniforms)]);
        views.insert("g_instances".to_string(), vec![view(&instances)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();
        let err = bindings
            .set_resource_views("g_uniforms", vec![view(&instances)])
            .unwrap_err();
        assert!(matches!(err, BindingsError::ImmutableArgument { .. }));
    }

    #[test]
    fn owner_queue_engagement_records_owner_transitions() {
        let instances = Resource::buffer(StorageMode::DeviceLocal, "instances");
        instances.set_state(ResourceState::CopyDest).unwrap();
        instances.set_owner_queue_family(QueueFamily(0), None);
        let program = Program::new("compute", vec![ArgumentDecl::mutable("g_instances")]);
        let mut views = HashMap::new();
        views.insert("g_instances".to_string(), vec![view(&instances)]);
        let bindings = ProgramBindings::new(&program, views).unwrap();
        bindings
            .apply_resource_states(AccessMask::MUTABLE, Some(QueueFamily(2)))
            .unwrap();
        let barriers = bindings.barriers();
        assert!(barriers.has_owner_transition(&instances, QueueFamily(0), QueueFamily(2)));
        assert!(barriers.has_state_transition(
            &instances,
            ResourceState::CopyDest,
            ResourceState::ShaderResourcePixel
        ));
    }
}
