use crate::command_list::CommandList;
use tinyvec::ArrayVec;
use ze_gfx::backend::{
    BarrierSplit, ResourceBarrier, ResourceRef, ResourceState, ResourceTransitionBarrier,
};

pub const MAX_BATCHED_BARRIERS: usize = 16;

/// Anything that can be the subject of a resource barrier
pub trait BarrierResource {
    fn resource_ref(&self) -> ResourceRef<'_>;
}

impl BarrierResource for ze_gfx::backend::Texture {
    fn resource_ref(&self) -> ResourceRef<'_> {
        ResourceRef::Texture(self)
    }
}

impl BarrierResource for ze_gfx::backend::Buffer {
    fn resource_ref(&self) -> ResourceRef<'_> {
        ResourceRef::Buffer(self)
    }
}

/// Collects barriers and records them in as few native calls as possible.
/// Whatever is left is recorded on drop.
pub struct BarrierBatcher<'l, 'r> {
    cmd_list: &'l mut CommandList,
    barriers: ArrayVec<[ResourceBarrier<'r>; MAX_BATCHED_BARRIERS]>,
}

impl<'l, 'r> BarrierBatcher<'l, 'r> {
    pub fn new(cmd_list: &'l mut CommandList) -> Self {
        Self {
            cmd_list,
            barriers: ArrayVec::default(),
        }
    }

    fn push(&mut self, barrier: ResourceBarrier<'r>) -> &mut Self {
        if self.barriers.len() == MAX_BATCHED_BARRIERS {
            self.submit();
        }
        self.barriers.push(barrier);
        self
    }

    fn push_transition(
        &mut self,
        resource: &'r dyn BarrierResource,
        source_state: ResourceState,
        dest_state: ResourceState,
        split: BarrierSplit,
    ) -> &mut Self {
        if source_state == dest_state {
            return self;
        }

        self.push(ResourceBarrier::Transition(ResourceTransitionBarrier {
            resource: resource.resource_ref(),
            source_state,
            dest_state,
            split,
        }))
    }

    pub fn transition(
        &mut self,
        resource: &'r dyn BarrierResource,
        source_state: ResourceState,
        dest_state: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, source_state, dest_state, BarrierSplit::None)
    }

    /// First half of a split transition, must be matched by [`Self::transition_end`]
    pub fn transition_begin(
        &mut self,
        resource: &'r dyn BarrierResource,
        source_state: ResourceState,
        dest_state: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, source_state, dest_state, BarrierSplit::Begin)
    }

    pub fn transition_end(
        &mut self,
        resource: &'r dyn BarrierResource,
        source_state: ResourceState,
        dest_state: ResourceState,
    ) -> &mut Self {
        self.push_transition(resource, source_state, dest_state, BarrierSplit::End)
    }

    pub fn uav(&mut self, resource: &'r dyn BarrierResource) -> &mut Self {
        self.push(ResourceBarrier::UnorderedAccess(Some(resource.resource_ref())))
    }

    /// Orders every UAV access recorded before against every one recorded after
    pub fn uav_global(&mut self) -> &mut Self {
        self.push(ResourceBarrier::UnorderedAccess(None))
    }

    pub fn aliasing(
        &mut self,
        before: Option<&'r dyn BarrierResource>,
        after: Option<&'r dyn BarrierResource>,
    ) -> &mut Self {
        self.push(ResourceBarrier::Aliasing {
            before: before.map(|resource| resource.resource_ref()),
            after: after.map(|resource| resource.resource_ref()),
        })
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn submit(&mut self) {
        if !self.barriers.is_empty() {
            self.cmd_list.resource_barriers(&self.barriers);
            self.barriers.clear();
        }
    }
}

impl Drop for BarrierBatcher<'_, '_> {
    fn drop(&mut self) {
        self.submit();
    }
}
