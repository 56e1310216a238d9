//! Software device that never touches a GPU.
//!
//! Submitted work either completes immediately or, in manual mode, when the owner asks for it.
//! Every executed command list is replayed against the tracked resource states so barrier
//! mistakes end up in [`NullDevice::validation_errors`] instead of silently passing.

use crate::backend::*;
use crate::utils::align_up;
use crate::{PixelFormat, ShaderStageFlagBits};
use fnv::FnvHashMap;
use parking_lot::{Condvar, Mutex};
use raw_window_handle::RawWindowHandle;
use std::cell::UnsafeCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use ze_core::maths::RectI32;

const DESCRIPTOR_INCREMENT_SIZE: u32 = 32;

#[derive(Copy, Clone, Debug)]
pub struct NullDeviceOptions {
    /// Queue work only completes through [`NullDevice::complete_queue_work`]
    pub manual_gpu: bool,
    pub raytracing: bool,
    pub mesh_shaders: bool,
}

impl Default for NullDeviceOptions {
    fn default() -> Self {
        Self {
            manual_gpu: false,
            raytracing: true,
            mesh_shaders: true,
        }
    }
}

#[derive(Default)]
pub struct NullBackend {
    options: NullDeviceOptions,
}

impl NullBackend {
    pub fn new(options: NullDeviceOptions) -> Self {
        Self { options }
    }
}

impl Backend for NullBackend {
    fn create_device(&self) -> Result<Arc<dyn Device>, BackendError> {
        Ok(Arc::new(NullDevice::with_options(self.options)))
    }

    fn name(&self) -> &str {
        "Null"
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum NullBarrier {
    Transition {
        resource: u64,
        before: ResourceState,
        after: ResourceState,
        split: BarrierSplit,
    },
    UnorderedAccess(Option<u64>),
    Aliasing {
        before: Option<u64>,
        after: Option<u64>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub enum NullCommand {
    Barrier(Vec<NullBarrier>),
    SetDescriptorHeaps(usize),
    SetPipelineState(u64),
    SetRootSignature(PipelineBindPoint, u64),
    SetRootParameter(PipelineBindPoint, u32),
    SetRenderTargets {
        render_targets: Vec<Option<u64>>,
        depth_stencil: Option<Option<u64>>,
    },
    ClearRenderTarget(Option<u64>),
    ClearDepthStencil(Option<u64>),
    SetViewports(Vec<Viewport>),
    SetScissors(Vec<RectI32>),
    SetPrimitiveTopology(PrimitiveTopology),
    SetVertexBuffers(usize),
    SetIndexBuffer,
    SetStencilRef(u32),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
    },
    Dispatch(u32, u32, u32),
    DispatchMesh(u32, u32, u32),
    DispatchRays {
        width: u32,
        height: u32,
    },
    BuildAccelerationStructure {
        num_instances: u32,
        refit: bool,
    },
    CopyBufferRegion {
        dst: u64,
        src: u64,
        size: u64,
    },
    CopyResource {
        dst: u64,
        src: u64,
    },
    BeginEvent(String),
    EndEvent,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NullQueueOp {
    Execute(Vec<NullCommand>),
    Signal { fence: u64, value: u64 },
    Wait { fence: u64, value: u64 },
}

/// State shared between the device and the objects it created, so drops can be accounted
#[derive(Default)]
struct NullTracker {
    states: Mutex<FnvHashMap<u64, ResourceState>>,
    destroyed_resources: AtomicUsize,
    live_pipelines: AtomicUsize,
    live_root_signatures: AtomicUsize,
    created_command_lists: AtomicUsize,
    created_command_allocators: AtomicUsize,
}

struct MappedMemory(UnsafeCell<Box<[u8]>>);

// The pointer is handed out to callers which synchronize writes themselves, like real upload heaps
unsafe impl Send for MappedMemory {}
unsafe impl Sync for MappedMemory {}

struct NullResource {
    id: u64,
    name: String,
    mapped: Option<MappedMemory>,
    tracker: Arc<NullTracker>,
}

impl Drop for NullResource {
    fn drop(&mut self) {
        self.tracker.states.lock().remove(&self.id);
        self.tracker
            .destroyed_resources
            .fetch_add(1, Ordering::SeqCst);
    }
}

struct NullFenceState {
    id: u64,
    completed: Mutex<u64>,
    condvar: Condvar,
}

impl NullFenceState {
    fn complete(&self, value: u64) {
        let mut completed = self.completed.lock();
        *completed = (*completed).max(value);
        self.condvar.notify_all();
    }
}

struct NullFence(Arc<NullFenceState>);

enum PendingOp {
    Signal(Arc<NullFenceState>, u64),
    Wait(Arc<NullFenceState>, u64),
}

struct NullQueue {
    ty: QueueType,
    log: Mutex<Vec<NullQueueOp>>,
    pending: Mutex<VecDeque<PendingOp>>,
}

impl NullQueue {
    /// Run queued signals in order, stopping at the first unsatisfied wait. Returns whether anything ran
    fn process(&self) -> bool {
        let mut pending = self.pending.lock();
        let mut progressed = false;
        while let Some(op) = pending.front() {
            match op {
                PendingOp::Signal(fence, value) => fence.complete(*value),
                PendingOp::Wait(fence, value) => {
                    if *fence.completed.lock() < *value {
                        break;
                    }
                }
            }
            pending.pop_front();
            progressed = true;
        }
        progressed
    }
}

struct NullCommandAllocator;

struct NullCommandList {
    commands: Vec<NullCommand>,
    closed: bool,
    bound_heaps: Vec<u64>,
    tables: FnvHashMap<(PipelineBindPoint, u32), u64>,
}

impl NullCommandList {
    fn new() -> Self {
        Self {
            commands: vec![],
            closed: true,
            bound_heaps: vec![],
            tables: FnvHashMap::default(),
        }
    }
}

/// Null heaps hand out GPU handles in `[id << 32, (id + 1) << 32)`
fn heap_id_of(handle: GpuDescriptorHandle) -> u64 {
    handle.ptr >> 32
}

struct NullDescriptorHeap;

struct NullRootSignature {
    id: u64,
    tracker: Arc<NullTracker>,
}

impl Drop for NullRootSignature {
    fn drop(&mut self) {
        self.tracker
            .live_root_signatures
            .fetch_sub(1, Ordering::SeqCst);
    }
}

struct NullPipeline {
    id: u64,
    exports: Vec<String>,
    tracker: Arc<NullTracker>,
}

impl Drop for NullPipeline {
    fn drop(&mut self) {
        self.tracker.live_pipelines.fetch_sub(1, Ordering::SeqCst);
    }
}

struct NullSwapChain {
    backbuffers: Vec<Arc<Texture>>,
    current: AtomicU32,
}

pub struct NullDevice {
    options: NullDeviceOptions,
    next_id: AtomicU64,
    next_gpu_address: AtomicU64,
    tracker: Arc<NullTracker>,
    split_barriers: Mutex<FnvHashMap<u64, ResourceState>>,
    descriptors: Mutex<FnvHashMap<usize, u64>>,
    queues: Mutex<Vec<Weak<NullQueue>>>,
    validation_errors: Mutex<Vec<String>>,
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::with_options(NullDeviceOptions::default())
    }
}

impl NullDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: NullDeviceOptions) -> Self {
        Self {
            options,
            next_id: AtomicU64::new(1),
            next_gpu_address: AtomicU64::new(1 << 40),
            tracker: Arc::new(NullTracker::default()),
            split_barriers: Mutex::default(),
            descriptors: Mutex::default(),
            queues: Mutex::default(),
            validation_errors: Mutex::default(),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn validation_error(&self, error: String) {
        self.validation_errors.lock().push(error);
    }

    fn resource_of(resource: ResourceRef) -> Option<&NullResource> {
        resource.backend_data().downcast_ref::<NullResource>()
    }

    fn resource_id_of(resource: ResourceRef) -> u64 {
        Self::resource_of(resource).map_or(0, |resource| resource.id)
    }

    fn descriptor_resource(&self, handle: CpuDescriptorHandle) -> Option<u64> {
        self.descriptors.lock().get(&handle.ptr).copied()
    }

    /// Tables set before a descriptor heap change point into a heap the GPU no longer sees
    fn check_descriptor_tables(&self, cmd_list: &CommandList, bind_point: PipelineBindPoint) {
        let Some(list) = cmd_list.backend_data.downcast_ref::<NullCommandList>() else {
            return;
        };
        for ((table_bind_point, parameter), heap) in &list.tables {
            if *table_bind_point == bind_point && !list.bound_heaps.contains(heap) {
                self.validation_error(format!(
                    "{:?} descriptor table at parameter {} is outside the bound heaps",
                    bind_point, parameter
                ));
            }
        }
    }

    fn record(&self, cmd_list: &mut CommandList, command: NullCommand) {
        match cmd_list.backend_data.downcast_mut::<NullCommandList>() {
            Some(list) if !list.closed => list.commands.push(command),
            Some(_) => self.validation_error(format!(
                "{:?} recorded into a closed command list",
                command
            )),
            None => self.validation_error("foreign command list".to_string()),
        }
    }

    fn expect_state(
        &self,
        states: &FnvHashMap<u64, ResourceState>,
        resource: Option<u64>,
        accepted: &[ResourceState],
        what: &str,
    ) {
        let Some(resource) = resource else {
            self.validation_error(format!("{} through a descriptor that views nothing", what));
            return;
        };

        match states.get(&resource) {
            Some(state) if accepted.contains(state) => {}
            Some(state) => self.validation_error(format!(
                "{} on resource {} in state {:?}, expected one of {:?}",
                what, resource, state, accepted
            )),
            None => self.validation_error(format!("{} on dead resource {}", what, resource)),
        }
    }

    /// Replay a command list against the tracked states, in queue order
    fn replay(&self, commands: &[NullCommand]) {
        let mut states = self.tracker.states.lock();
        let mut split_barriers = self.split_barriers.lock();
        for command in commands {
            match command {
                NullCommand::Barrier(barriers) => {
                    for barrier in barriers {
                        let NullBarrier::Transition {
                            resource,
                            before,
                            after,
                            split,
                        } = barrier else {
                            continue;
                        };

                        if before == after {
                            self.validation_error(format!(
                                "redundant transition of resource {} to {:?}",
                                resource, after
                            ));
                        }

                        match split {
                            BarrierSplit::None | BarrierSplit::Begin => {
                                match states.get(resource) {
                                    Some(state) if state == before => {}
                                    Some(state) => self.validation_error(format!(
                                        "transition of resource {} from {:?} but it is in {:?}",
                                        resource, before, state
                                    )),
                                    None => self.validation_error(format!(
                                        "transition of dead resource {}",
                                        resource
                                    )),
                                }

                                if *split == BarrierSplit::Begin {
                                    split_barriers.insert(*resource, *after);
                                } else {
                                    states.insert(*resource, *after);
                                }
                            }
                            BarrierSplit::End => {
                                if split_barriers.remove(resource) != Some(*after) {
                                    self.validation_error(format!(
                                        "split transition end of resource {} without matching begin",
                                        resource
                                    ));
                                }
                                states.insert(*resource, *after);
                            }
                        }
                    }
                }
                NullCommand::SetRenderTargets {
                    render_targets,
                    depth_stencil,
                } => {
                    for render_target in render_targets {
                        self.expect_state(
                            &states,
                            *render_target,
                            &[ResourceState::RenderTargetWrite],
                            "render target binding",
                        );
                    }

                    if let Some(depth_stencil) = depth_stencil {
                        self.expect_state(
                            &states,
                            *depth_stencil,
                            &[ResourceState::DepthWrite, ResourceState::DepthRead],
                            "depth stencil binding",
                        );
                    }
                }
                NullCommand::ClearRenderTarget(resource) => self.expect_state(
                    &states,
                    *resource,
                    &[ResourceState::RenderTargetWrite],
                    "render target clear",
                ),
                NullCommand::ClearDepthStencil(resource) => self.expect_state(
                    &states,
                    *resource,
                    &[ResourceState::DepthWrite],
                    "depth stencil clear",
                ),
                NullCommand::CopyBufferRegion { dst, src, .. }
                | NullCommand::CopyResource { dst, src } => {
                    self.expect_state(
                        &states,
                        Some(*dst),
                        &[ResourceState::CopyWrite, ResourceState::Common],
                        "copy destination",
                    );
                    self.expect_state(
                        &states,
                        Some(*src),
                        &[
                            ResourceState::CopyRead,
                            ResourceState::GenericRead,
                            ResourceState::Common,
                        ],
                        "copy source",
                    );
                }
                _ => {}
            }
        }
    }

    fn null_queue(queue: &CommandQueue) -> &Arc<NullQueue> {
        queue
            .backend_data
            .downcast_ref::<Arc<NullQueue>>()
            .expect("command queue was not created by a NullDevice")
    }

    fn null_fence(fence: &Fence) -> &Arc<NullFenceState> {
        &fence
            .backend_data
            .downcast_ref::<NullFence>()
            .expect("fence was not created by a NullDevice")
            .0
    }

    fn live_queues(&self) -> Vec<Arc<NullQueue>> {
        let mut queues = self.queues.lock();
        queues.retain(|queue| queue.strong_count() > 0);
        queues.iter().filter_map(Weak::upgrade).collect()
    }

    /// Complete everything submitted so far on queues of type `ty`, up to the first unsatisfied GPU wait
    pub fn complete_queue_work(&self, ty: QueueType) {
        for queue in self.live_queues() {
            if queue.ty == ty {
                queue.process();
            }
        }
    }

    /// Complete all queues until no further progress can be made
    pub fn complete_all_work(&self) {
        let queues = self.live_queues();
        while queues.iter().fold(false, |progressed, queue| queue.process() || progressed) {}
    }

    pub fn validation_errors(&self) -> Vec<String> {
        self.validation_errors.lock().clone()
    }

    pub fn take_validation_errors(&self) -> Vec<String> {
        std::mem::take(&mut *self.validation_errors.lock())
    }

    pub fn queue_log(&self, queue: &CommandQueue) -> Vec<NullQueueOp> {
        Self::null_queue(queue).log.lock().clone()
    }

    pub fn clear_queue_log(&self, queue: &CommandQueue) {
        Self::null_queue(queue).log.lock().clear();
    }

    pub fn fence_id(&self, fence: &Fence) -> u64 {
        Self::null_fence(fence).id
    }

    pub fn commands(&self, cmd_list: &CommandList) -> Vec<NullCommand> {
        cmd_list
            .backend_data
            .downcast_ref::<NullCommandList>()
            .map(|list| list.commands.clone())
            .unwrap_or_default()
    }

    pub fn resource_id(&self, resource: ResourceRef) -> u64 {
        Self::resource_id_of(resource)
    }

    pub fn resource_name(&self, resource: ResourceRef) -> Option<String> {
        Self::resource_of(resource).map(|resource| resource.name.clone())
    }

    pub fn pipeline_id(&self, pipeline: &PipelineState) -> u64 {
        pipeline
            .backend_data
            .downcast_ref::<NullPipeline>()
            .map_or(0, |pipeline| pipeline.id)
    }

    pub fn resource_state(&self, id: u64) -> Option<ResourceState> {
        self.tracker.states.lock().get(&id).copied()
    }

    pub fn is_resource_alive(&self, id: u64) -> bool {
        self.tracker.states.lock().contains_key(&id)
    }

    pub fn live_resource_count(&self) -> usize {
        self.tracker.states.lock().len()
    }

    pub fn destroyed_resource_count(&self) -> usize {
        self.tracker.destroyed_resources.load(Ordering::SeqCst)
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.tracker.live_pipelines.load(Ordering::SeqCst)
    }

    pub fn live_root_signature_count(&self) -> usize {
        self.tracker.live_root_signatures.load(Ordering::SeqCst)
    }

    pub fn created_command_list_count(&self) -> usize {
        self.tracker.created_command_lists.load(Ordering::SeqCst)
    }

    pub fn created_command_allocator_count(&self) -> usize {
        self.tracker
            .created_command_allocators
            .load(Ordering::SeqCst)
    }

    fn create_resource(&self, name: &str, mapped_size: Option<u64>) -> (u64, NullResource) {
        let id = self.next_id();
        let resource = NullResource {
            id,
            name: name.to_string(),
            mapped: mapped_size.map(|size| {
                MappedMemory(UnsafeCell::new(vec![0u8; size as usize].into_boxed_slice()))
            }),
            tracker: self.tracker.clone(),
        };
        (id, resource)
    }

    fn write_descriptor(&self, handle: CpuDescriptorHandle, resource: ResourceRef) {
        self.descriptors
            .lock()
            .insert(handle.ptr, Self::resource_id_of(resource));
    }
}

impl Device for NullDevice {
    fn name(&self) -> &str {
        "Null Device"
    }

    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            raytracing: self.options.raytracing,
            mesh_shaders: self.options.mesh_shaders,
        }
    }

    fn format_support(&self, format: PixelFormat) -> FormatSupportFlags {
        match format {
            PixelFormat::Unknown => FormatSupportFlags::empty(),
            PixelFormat::D16Unorm | PixelFormat::D24UnormS8Uint | PixelFormat::D32Float => {
                FormatSupportFlagBits::DepthStencil | FormatSupportFlagBits::ShaderResource
            }
            PixelFormat::R32G32B32Float => FormatSupportFlagBits::ShaderResource.into(),
            PixelFormat::B8G8R8A8UnormSrgb | PixelFormat::R8G8B8A8UnormSrgb => {
                FormatSupportFlagBits::ShaderResource | FormatSupportFlagBits::RenderTarget
            }
            _ => {
                FormatSupportFlagBits::ShaderResource
                    | FormatSupportFlagBits::RenderTarget
                    | FormatSupportFlagBits::UnorderedAccess
            }
        }
    }

    fn descriptor_handle_increment_size(&self, _: DescriptorHeapType) -> u32 {
        DESCRIPTOR_INCREMENT_SIZE
    }

    fn create_command_queue(&self, ty: QueueType, _: &str) -> Result<CommandQueue, DeviceError> {
        let queue = Arc::new(NullQueue {
            ty,
            log: Mutex::default(),
            pending: Mutex::default(),
        });
        self.queues.lock().push(Arc::downgrade(&queue));
        Ok(CommandQueue::new(ty, Box::new(queue)))
    }

    fn create_fence(&self, initial_value: u64) -> Result<Fence, DeviceError> {
        Ok(Fence::new(Box::new(NullFence(Arc::new(NullFenceState {
            id: self.next_id(),
            completed: Mutex::new(initial_value),
            condvar: Condvar::new(),
        })))))
    }

    fn fence_completed_value(&self, fence: &Fence) -> u64 {
        *Self::null_fence(fence).completed.lock()
    }

    fn wait_for_fence(
        &self,
        fence: &Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError> {
        let fence = Self::null_fence(fence);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut completed = fence.completed.lock();
        while *completed < value {
            match deadline {
                None => fence.condvar.wait(&mut completed),
                Some(deadline) => {
                    if fence.condvar.wait_until(&mut completed, deadline).timed_out()
                        && *completed < value
                    {
                        return Err(DeviceError::DeviceLost);
                    }
                }
            }
        }
        Ok(())
    }

    fn queue_signal(
        &self,
        queue: &CommandQueue,
        fence: &Fence,
        value: u64,
    ) -> Result<(), DeviceError> {
        let queue = Self::null_queue(queue);
        let fence = Self::null_fence(fence);
        queue.log.lock().push(NullQueueOp::Signal {
            fence: fence.id,
            value,
        });
        queue
            .pending
            .lock()
            .push_back(PendingOp::Signal(fence.clone(), value));
        if !self.options.manual_gpu {
            self.complete_all_work();
        }
        Ok(())
    }

    fn queue_wait(
        &self,
        queue: &CommandQueue,
        fence: &Fence,
        value: u64,
    ) -> Result<(), DeviceError> {
        let queue = Self::null_queue(queue);
        let fence = Self::null_fence(fence);
        queue.log.lock().push(NullQueueOp::Wait {
            fence: fence.id,
            value,
        });
        queue
            .pending
            .lock()
            .push_back(PendingOp::Wait(fence.clone(), value));
        if !self.options.manual_gpu {
            self.complete_all_work();
        }
        Ok(())
    }

    fn queue_execute(&self, queue: &CommandQueue, command_lists: &[&CommandList]) {
        let null_queue = Self::null_queue(queue);
        for cmd_list in command_lists {
            if cmd_list.ty != queue.ty {
                self.validation_error(format!(
                    "{:?} command list executed on a {:?} queue",
                    cmd_list.ty, queue.ty
                ));
            }

            let Some(list) = cmd_list.backend_data.downcast_ref::<NullCommandList>() else {
                self.validation_error("foreign command list".to_string());
                continue;
            };

            if !list.closed {
                self.validation_error("executing a command list still recording".to_string());
            }

            self.replay(&list.commands);
            null_queue
                .log
                .lock()
                .push(NullQueueOp::Execute(list.commands.clone()));
        }
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError> {
        self.tracker
            .created_command_allocators
            .fetch_add(1, Ordering::SeqCst);
        Ok(CommandAllocator::new(ty, Box::new(NullCommandAllocator)))
    }

    fn reset_command_allocator(&self, _: &CommandAllocator) -> Result<(), DeviceError> {
        Ok(())
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
    ) -> Result<CommandList, DeviceError> {
        if allocator.ty != ty {
            return Err(DeviceError::InvalidParameters);
        }

        self.tracker
            .created_command_lists
            .fetch_add(1, Ordering::SeqCst);
        Ok(CommandList::new(
            ty,
            Box::new(NullCommandList::new()),
        ))
    }

    fn reset_command_list(
        &self,
        cmd_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError> {
        if allocator.ty != cmd_list.ty {
            return Err(DeviceError::InvalidParameters);
        }

        let list = cmd_list
            .backend_data
            .downcast_mut::<NullCommandList>()
            .ok_or(DeviceError::InvalidParameters)?;
        if !list.closed {
            return Err(DeviceError::InvalidParameters);
        }
        list.commands.clear();
        list.bound_heaps.clear();
        list.tables.clear();
        list.closed = false;
        Ok(())
    }

    fn close_command_list(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError> {
        let list = cmd_list
            .backend_data
            .downcast_mut::<NullCommandList>()
            .ok_or(DeviceError::InvalidParameters)?;
        if list.closed {
            return Err(DeviceError::InvalidParameters);
        }
        list.closed = true;
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        _: &str,
    ) -> Result<DescriptorHeap, DeviceError> {
        if desc.capacity == 0
            || (desc.shader_visible
                && matches!(desc.ty, DescriptorHeapType::Rtv | DescriptorHeapType::Dsv))
        {
            return Err(DeviceError::InvalidParameters);
        }

        let id = self.next_id();
        Ok(DescriptorHeap {
            desc: *desc,
            cpu_start: CpuDescriptorHandle {
                ptr: (id as usize) << 32,
            },
            gpu_start: desc
                .shader_visible
                .then(|| GpuDescriptorHandle { ptr: id << 32 }),
            backend_data: Box::new(NullDescriptorHeap),
        })
    }

    fn create_shader_resource_view(
        &self,
        desc: &ShaderResourceViewDesc,
        handle: CpuDescriptorHandle,
    ) {
        self.write_descriptor(handle, desc.resource);
    }

    fn create_unordered_access_view(
        &self,
        desc: &UnorderedAccessViewDesc,
        handle: CpuDescriptorHandle,
    ) {
        self.write_descriptor(handle, desc.resource);
    }

    fn create_render_target_view(&self, desc: &RenderTargetViewDesc, handle: CpuDescriptorHandle) {
        self.write_descriptor(handle, ResourceRef::Texture(desc.resource));
    }

    fn create_depth_stencil_view(&self, desc: &DepthStencilViewDesc, handle: CpuDescriptorHandle) {
        self.write_descriptor(handle, ResourceRef::Texture(desc.resource));
    }

    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        _: DescriptorHeapType,
    ) {
        let mut descriptors = self.descriptors.lock();
        for i in 0..count {
            let src = src.offset(i, DESCRIPTOR_INCREMENT_SIZE);
            let dst = dst.offset(i, DESCRIPTOR_INCREMENT_SIZE);
            match descriptors.get(&src.ptr).copied() {
                Some(resource) => descriptors.insert(dst.ptr, resource),
                None => descriptors.remove(&dst.ptr),
            };
        }
    }

    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> Result<Buffer, DeviceError> {
        if desc.size_bytes == 0 {
            return Err(DeviceError::InvalidParameters);
        }

        let mapped_size =
            (desc.memory_location == MemoryLocation::CpuToGpu).then_some(desc.size_bytes);
        let (id, resource) = self.create_resource(name, mapped_size);
        let gpu_address = self
            .next_gpu_address
            .fetch_add(align_up(desc.size_bytes, 1 << 16), Ordering::Relaxed);
        self.tracker
            .states
            .lock()
            .insert(id, desc.default_resource_state);
        Ok(Buffer::new(*desc, gpu_address, Box::new(resource)))
    }

    fn create_texture(&self, desc: &TextureDesc, name: &str) -> Result<Texture, DeviceError> {
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 || desc.mip_levels == 0 {
            return Err(DeviceError::InvalidParameters);
        }

        let support = self.format_support(desc.format);
        let required = [
            (TextureUsageFlagBits::RenderTarget, FormatSupportFlagBits::RenderTarget),
            (TextureUsageFlagBits::DepthStencil, FormatSupportFlagBits::DepthStencil),
            (TextureUsageFlagBits::UnorderedAccess, FormatSupportFlagBits::UnorderedAccess),
            (TextureUsageFlagBits::ShaderResource, FormatSupportFlagBits::ShaderResource),
        ];
        for (usage, capability) in required {
            if desc.usage_flags.contains(usage) && !support.contains(capability) {
                return Err(DeviceError::InvalidParameters);
            }
        }

        let (id, resource) = self.create_resource(name, None);
        self.tracker
            .states
            .lock()
            .insert(id, desc.default_resource_state);
        Ok(Texture::new(*desc, Box::new(resource)))
    }

    fn buffer_mapped_ptr(&self, buffer: &Buffer) -> Option<*mut u8> {
        let resource = buffer.backend_data.downcast_ref::<NullResource>()?;
        resource
            .mapped
            .as_ref()
            .map(|memory| unsafe { (*memory.0.get()).as_mut_ptr() })
    }

    fn create_root_signature(&self, blob: &[u8], _: &str) -> Result<RootSignature, DeviceError> {
        if blob.is_empty() {
            return Err(DeviceError::InvalidParameters);
        }

        self.tracker
            .live_root_signatures
            .fetch_add(1, Ordering::SeqCst);
        Ok(RootSignature::new(Box::new(NullRootSignature {
            id: self.next_id(),
            tracker: self.tracker.clone(),
        })))
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        _: &str,
    ) -> Result<PipelineState, DeviceError> {
        if desc.shaders.is_empty() || desc.shaders.iter().any(|stage| stage.bytecode.is_empty()) {
            return Err(DeviceError::InvalidParameters);
        }

        let uses_mesh_shaders = desc.shaders.iter().any(|stage| {
            matches!(
                stage.stage,
                ShaderStageFlagBits::Mesh | ShaderStageFlagBits::Amplification
            )
        });
        if uses_mesh_shaders && !self.options.mesh_shaders {
            return Err(DeviceError::Unsupported);
        }

        if desc.states.render_target_formats.len() > MAX_RENDER_PASS_RENDER_TARGET_COUNT {
            return Err(DeviceError::InvalidParameters);
        }

        self.tracker.live_pipelines.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineState::new(
            PipelineKind::Graphics,
            Box::new(NullPipeline {
                id: self.next_id(),
                exports: vec![],
                tracker: self.tracker.clone(),
            }),
        ))
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
        _: &str,
    ) -> Result<PipelineState, DeviceError> {
        if desc.bytecode.is_empty() {
            return Err(DeviceError::InvalidParameters);
        }

        self.tracker.live_pipelines.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineState::new(
            PipelineKind::Compute,
            Box::new(NullPipeline {
                id: self.next_id(),
                exports: vec![],
                tracker: self.tracker.clone(),
            }),
        ))
    }

    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc,
        _: &str,
    ) -> Result<PipelineState, DeviceError> {
        if !self.options.raytracing {
            return Err(DeviceError::Unsupported);
        }

        if desc.library.is_empty() || desc.raygen.is_empty() {
            return Err(DeviceError::InvalidParameters);
        }

        let mut exports = vec![desc.raygen.to_string()];
        exports.extend(desc.miss.iter().map(|miss| miss.to_string()));
        exports.extend(desc.hit_groups.iter().map(|group| group.name.to_string()));

        self.tracker.live_pipelines.fetch_add(1, Ordering::SeqCst);
        Ok(PipelineState::new(
            PipelineKind::Raytracing,
            Box::new(NullPipeline {
                id: self.next_id(),
                exports,
                tracker: self.tracker.clone(),
            }),
        ))
    }

    fn raytracing_shader_identifier(
        &self,
        pipeline: &PipelineState,
        export: &str,
    ) -> Option<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]> {
        let pipeline = pipeline.backend_data.downcast_ref::<NullPipeline>()?;
        if !pipeline.exports.iter().any(|name| name == export) {
            return None;
        }

        let mut hasher = DefaultHasher::new();
        pipeline.id.hash(&mut hasher);
        export.hash(&mut hasher);
        let hash = hasher.finish().to_le_bytes();

        let mut identifier = [0; RAYTRACING_SHADER_IDENTIFIER_SIZE];
        for (i, byte) in identifier.iter_mut().enumerate() {
            *byte = hash[i % hash.len()];
        }
        Some(identifier)
    }

    fn tlas_prebuild_info(
        &self,
        num_instances: u32,
        allow_update: bool,
    ) -> AccelerationStructurePrebuildInfo {
        let num_instances = num_instances.max(1) as u64;
        AccelerationStructurePrebuildInfo {
            result_data_max_size_in_bytes: align_up(128 * num_instances + 256, 256),
            scratch_data_size_in_bytes: align_up(64 * num_instances + 256, 256),
            update_scratch_data_size_in_bytes: if allow_update {
                align_up(32 * num_instances + 256, 256)
            } else {
                0
            },
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        _: Option<RawWindowHandle>,
        _: &CommandQueue,
        old_swapchain: Option<SwapChain>,
    ) -> Result<SwapChain, DeviceError> {
        drop(old_swapchain);

        if desc.buffer_count < 2 {
            return Err(DeviceError::InvalidParameters);
        }

        let mut backbuffers = Vec::with_capacity(desc.buffer_count as usize);
        for i in 0..desc.buffer_count {
            let mut texture_desc = TextureDesc::new_2d(
                desc.width,
                desc.height,
                desc.format,
                TextureUsageFlagBits::RenderTarget.into(),
            );
            texture_desc.default_resource_state = ResourceState::Present;
            backbuffers.push(Arc::new(
                self.create_texture(&texture_desc, &format!("Back Buffer {}", i))?,
            ));
        }

        Ok(SwapChain::new(
            *desc,
            Box::new(NullSwapChain {
                backbuffers,
                current: AtomicU32::new(0),
            }),
        ))
    }

    fn swapchain_backbuffer_count(&self, swapchain: &SwapChain) -> usize {
        swapchain
            .backend_data
            .downcast_ref::<NullSwapChain>()
            .map_or(0, |swapchain| swapchain.backbuffers.len())
    }

    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32 {
        swapchain
            .backend_data
            .downcast_ref::<NullSwapChain>()
            .map_or(0, |swapchain| swapchain.current.load(Ordering::SeqCst))
    }

    fn swapchain_backbuffer(
        &self,
        swapchain: &SwapChain,
        index: u32,
    ) -> Result<Arc<Texture>, DeviceError> {
        swapchain
            .backend_data
            .downcast_ref::<NullSwapChain>()
            .and_then(|swapchain| swapchain.backbuffers.get(index as usize))
            .cloned()
            .ok_or(DeviceError::InvalidParameters)
    }

    fn present(&self, swapchain: &SwapChain) -> Result<(), DeviceError> {
        let swapchain = swapchain
            .backend_data
            .downcast_ref::<NullSwapChain>()
            .ok_or(DeviceError::InvalidParameters)?;

        let current = swapchain.current.load(Ordering::SeqCst);
        let backbuffer = &swapchain.backbuffers[current as usize];
        let id = Self::resource_id_of(ResourceRef::Texture(backbuffer));
        let state = self.resource_state(id);
        if state != Some(ResourceState::Present) {
            self.validation_error(format!(
                "presenting back buffer {} in state {:?}",
                current, state
            ));
        }

        swapchain.current.store(
            (current + 1) % swapchain.backbuffers.len() as u32,
            Ordering::SeqCst,
        );
        Ok(())
    }

    fn cmd_resource_barrier(&self, cmd_list: &mut CommandList, barriers: &[ResourceBarrier]) {
        let barriers = barriers
            .iter()
            .map(|barrier| match barrier {
                ResourceBarrier::Transition(transition) => NullBarrier::Transition {
                    resource: Self::resource_id_of(transition.resource),
                    before: transition.source_state,
                    after: transition.dest_state,
                    split: transition.split,
                },
                ResourceBarrier::UnorderedAccess(resource) => {
                    NullBarrier::UnorderedAccess(resource.map(Self::resource_id_of))
                }
                ResourceBarrier::Aliasing { before, after } => NullBarrier::Aliasing {
                    before: before.map(Self::resource_id_of),
                    after: after.map(Self::resource_id_of),
                },
            })
            .collect();
        self.record(cmd_list, NullCommand::Barrier(barriers));
    }

    fn cmd_set_descriptor_heaps(&self, cmd_list: &mut CommandList, heaps: &[&DescriptorHeap]) {
        if heaps.iter().any(|heap| !heap.desc.shader_visible) {
            self.validation_error("binding a non shader-visible descriptor heap".to_string());
        }
        if let Some(list) = cmd_list.backend_data.downcast_mut::<NullCommandList>() {
            list.bound_heaps = heaps
                .iter()
                .filter_map(|heap| heap.gpu_start.map(heap_id_of))
                .collect();
        }
        self.record(cmd_list, NullCommand::SetDescriptorHeaps(heaps.len()));
    }

    fn cmd_set_pipeline_state(&self, cmd_list: &mut CommandList, pipeline: &PipelineState) {
        let id = self.pipeline_id(pipeline);
        self.record(cmd_list, NullCommand::SetPipelineState(id));
    }

    fn cmd_set_root_signature(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        let id = root_signature
            .backend_data
            .downcast_ref::<NullRootSignature>()
            .map_or(0, |root_signature| root_signature.id);
        self.record(cmd_list, NullCommand::SetRootSignature(bind_point, id));
    }

    fn cmd_set_root_constants(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        _: &[u32],
    ) {
        self.record(cmd_list, NullCommand::SetRootParameter(bind_point, parameter));
    }

    fn cmd_set_root_constant_buffer(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        _: u64,
    ) {
        self.record(cmd_list, NullCommand::SetRootParameter(bind_point, parameter));
    }

    fn cmd_set_root_shader_resource(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        _: u64,
    ) {
        self.record(cmd_list, NullCommand::SetRootParameter(bind_point, parameter));
    }

    fn cmd_set_root_unordered_access(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        _: u64,
    ) {
        self.record(cmd_list, NullCommand::SetRootParameter(bind_point, parameter));
    }

    fn cmd_set_root_descriptor_table(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        table: GpuDescriptorHandle,
    ) {
        if let Some(list) = cmd_list.backend_data.downcast_mut::<NullCommandList>() {
            list.tables.insert((bind_point, parameter), heap_id_of(table));
        }
        self.record(cmd_list, NullCommand::SetRootParameter(bind_point, parameter));
    }

    fn cmd_set_render_targets(
        &self,
        cmd_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        let command = NullCommand::SetRenderTargets {
            render_targets: render_targets
                .iter()
                .map(|handle| self.descriptor_resource(*handle))
                .collect(),
            depth_stencil: depth_stencil.map(|handle| self.descriptor_resource(handle)),
        };
        self.record(cmd_list, command);
    }

    fn cmd_clear_render_target(
        &self,
        cmd_list: &mut CommandList,
        render_target: CpuDescriptorHandle,
        _: [f32; 4],
    ) {
        let resource = self.descriptor_resource(render_target);
        self.record(cmd_list, NullCommand::ClearRenderTarget(resource));
    }

    fn cmd_clear_depth_stencil(
        &self,
        cmd_list: &mut CommandList,
        depth_stencil: CpuDescriptorHandle,
        _: f32,
        _: Option<u8>,
    ) {
        let resource = self.descriptor_resource(depth_stencil);
        self.record(cmd_list, NullCommand::ClearDepthStencil(resource));
    }

    fn cmd_set_viewports(&self, cmd_list: &mut CommandList, viewports: &[Viewport]) {
        self.record(cmd_list, NullCommand::SetViewports(viewports.to_vec()));
    }

    fn cmd_set_scissors(&self, cmd_list: &mut CommandList, scissors: &[RectI32]) {
        self.record(cmd_list, NullCommand::SetScissors(scissors.to_vec()));
    }

    fn cmd_set_primitive_topology(&self, cmd_list: &mut CommandList, topology: PrimitiveTopology) {
        self.record(cmd_list, NullCommand::SetPrimitiveTopology(topology));
    }

    fn cmd_set_vertex_buffers(
        &self,
        cmd_list: &mut CommandList,
        _: u32,
        views: &[VertexBufferView],
    ) {
        self.record(cmd_list, NullCommand::SetVertexBuffers(views.len()));
    }

    fn cmd_set_index_buffer(&self, cmd_list: &mut CommandList, _: &IndexBufferView) {
        self.record(cmd_list, NullCommand::SetIndexBuffer);
    }

    fn cmd_set_stencil_ref(&self, cmd_list: &mut CommandList, value: u32) {
        self.record(cmd_list, NullCommand::SetStencilRef(value));
    }

    fn cmd_draw(
        &self,
        cmd_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        _: u32,
        _: u32,
    ) {
        self.check_descriptor_tables(cmd_list, PipelineBindPoint::Graphics);
        self.record(
            cmd_list,
            NullCommand::Draw {
                vertex_count: vertex_count_per_instance,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd_list: &mut CommandList,
        index_count_per_instance: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        _: u32,
    ) {
        self.check_descriptor_tables(cmd_list, PipelineBindPoint::Graphics);
        self.record(
            cmd_list,
            NullCommand::DrawIndexed {
                index_count: index_count_per_instance,
                instance_count,
                first_index,
                base_vertex,
            },
        );
    }

    fn cmd_dispatch(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32) {
        self.check_descriptor_tables(cmd_list, PipelineBindPoint::Compute);
        self.record(cmd_list, NullCommand::Dispatch(x, y, z));
    }

    fn cmd_dispatch_mesh(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32) {
        if !self.options.mesh_shaders {
            self.validation_error("mesh dispatch on a device without mesh shaders".to_string());
        }
        self.check_descriptor_tables(cmd_list, PipelineBindPoint::Graphics);
        self.record(cmd_list, NullCommand::DispatchMesh(x, y, z));
    }

    fn cmd_dispatch_rays(&self, cmd_list: &mut CommandList, desc: &DispatchRaysDesc) {
        self.check_descriptor_tables(cmd_list, PipelineBindPoint::Compute);
        self.record(
            cmd_list,
            NullCommand::DispatchRays {
                width: desc.width,
                height: desc.height,
            },
        );
    }

    fn cmd_build_acceleration_structure(
        &self,
        cmd_list: &mut CommandList,
        desc: &AccelerationStructureBuildDesc,
    ) {
        self.record(
            cmd_list,
            NullCommand::BuildAccelerationStructure {
                num_instances: desc.num_instances,
                refit: desc.source_address.is_some(),
            },
        );
    }

    fn cmd_copy_buffer_region(
        &self,
        cmd_list: &mut CommandList,
        dst: &Buffer,
        dst_offset: u64,
        src: &Buffer,
        src_offset: u64,
        size: u64,
    ) {
        if dst_offset + size > dst.desc.size_bytes || src_offset + size > src.desc.size_bytes {
            self.validation_error("buffer copy out of bounds".to_string());
        }

        self.record(
            cmd_list,
            NullCommand::CopyBufferRegion {
                dst: Self::resource_id_of(ResourceRef::Buffer(dst)),
                src: Self::resource_id_of(ResourceRef::Buffer(src)),
                size,
            },
        );
    }

    fn cmd_copy_resource(&self, cmd_list: &mut CommandList, dst: ResourceRef, src: ResourceRef) {
        self.record(
            cmd_list,
            NullCommand::CopyResource {
                dst: Self::resource_id_of(dst),
                src: Self::resource_id_of(src),
            },
        );
    }

    fn cmd_debug_begin_event(&self, cmd_list: &mut CommandList, name: &str) {
        self.record(cmd_list, NullCommand::BeginEvent(name.to_string()));
    }

    fn cmd_debug_end_event(&self, cmd_list: &mut CommandList) {
        self.record(cmd_list, NullCommand::EndEvent);
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::*;
    use crate::null::{NullCommand, NullDevice, NullDeviceOptions, NullQueueOp};
    use crate::PixelFormat;
    use std::sync::Arc;
    use std::time::Duration;

    fn render_target(device: &NullDevice) -> Texture {
        let mut desc = TextureDesc::new_2d(
            64,
            64,
            PixelFormat::R16G16B16A16Float,
            TextureUsageFlagBits::RenderTarget | TextureUsageFlagBits::ShaderResource,
        );
        desc.default_resource_state = ResourceState::ShaderRead;
        device.create_texture(&desc, "Target").unwrap()
    }

    fn recording_list(device: &NullDevice) -> (CommandAllocator, CommandList) {
        let allocator = device.create_command_allocator(QueueType::Graphics).unwrap();
        let mut list = device
            .create_command_list(QueueType::Graphics, &allocator)
            .unwrap();
        device.reset_command_list(&mut list, &allocator).unwrap();
        (allocator, list)
    }

    #[test]
    fn binding_a_shader_read_target_is_reported() {
        let device = NullDevice::new();
        let queue = device
            .create_command_queue(QueueType::Graphics, "Render")
            .unwrap();
        let heap = device
            .create_descriptor_heap(
                &DescriptorHeapDesc {
                    ty: DescriptorHeapType::Rtv,
                    capacity: 4,
                    shader_visible: false,
                },
                "RTV",
            )
            .unwrap();
        let texture = render_target(&device);
        device.create_render_target_view(
            &RenderTargetViewDesc {
                resource: &texture,
                format: texture.desc.format,
                mip_level: 0,
            },
            heap.cpu_start,
        );

        let (_allocator, mut list) = recording_list(&device);
        device.cmd_set_render_targets(&mut list, &[heap.cpu_start], None);
        device.close_command_list(&mut list).unwrap();
        device.queue_execute(&queue, &[&list]);
        assert_eq!(device.take_validation_errors().len(), 1);

        let (_allocator, mut list) = recording_list(&device);
        device.cmd_resource_barrier(
            &mut list,
            &[ResourceBarrier::Transition(ResourceTransitionBarrier {
                resource: ResourceRef::Texture(&texture),
                source_state: ResourceState::ShaderRead,
                dest_state: ResourceState::RenderTargetWrite,
                split: BarrierSplit::None,
            })],
        );
        device.cmd_set_render_targets(&mut list, &[heap.cpu_start], None);
        device.close_command_list(&mut list).unwrap();
        device.queue_execute(&queue, &[&list]);
        assert!(device.validation_errors().is_empty());
        assert_eq!(
            device.resource_state(device.resource_id(ResourceRef::Texture(&texture))),
            Some(ResourceState::RenderTargetWrite)
        );
    }

    #[test]
    fn split_barrier_applies_on_end() {
        let device = NullDevice::new();
        let queue = device
            .create_command_queue(QueueType::Graphics, "Render")
            .unwrap();
        let texture = render_target(&device);
        let id = device.resource_id(ResourceRef::Texture(&texture));

        let (_allocator, mut list) = recording_list(&device);
        for split in [BarrierSplit::Begin, BarrierSplit::End] {
            device.cmd_resource_barrier(
                &mut list,
                &[ResourceBarrier::Transition(ResourceTransitionBarrier {
                    resource: ResourceRef::Texture(&texture),
                    source_state: ResourceState::ShaderRead,
                    dest_state: ResourceState::RenderTargetWrite,
                    split,
                })],
            );
        }
        device.close_command_list(&mut list).unwrap();
        device.queue_execute(&queue, &[&list]);
        assert!(device.validation_errors().is_empty());
        assert_eq!(
            device.resource_state(id),
            Some(ResourceState::RenderTargetWrite)
        );
    }

    #[test]
    fn manual_gpu_holds_signals_until_completed() {
        let device = Arc::new(NullDevice::with_options(NullDeviceOptions {
            manual_gpu: true,
            ..Default::default()
        }));
        let render = device
            .create_command_queue(QueueType::Graphics, "Render")
            .unwrap();
        let compute = device
            .create_command_queue(QueueType::Compute, "Compute")
            .unwrap();
        let render_fence = device.create_fence(0).unwrap();
        let compute_fence = device.create_fence(0).unwrap();

        device.queue_wait(&render, &compute_fence, 1).unwrap();
        device.queue_signal(&render, &render_fence, 1).unwrap();
        device.complete_queue_work(QueueType::Graphics);
        assert_eq!(device.fence_completed_value(&render_fence), 0);
        assert_eq!(
            device.wait_for_fence(&render_fence, 1, Some(Duration::from_millis(10))),
            Err(DeviceError::DeviceLost)
        );

        device.queue_signal(&compute, &compute_fence, 1).unwrap();
        device.complete_all_work();
        assert_eq!(device.fence_completed_value(&render_fence), 1);
        assert_eq!(device.wait_for_fence(&render_fence, 1, None), Ok(()));

        let log = device.queue_log(&render);
        assert_eq!(
            log[0],
            NullQueueOp::Wait {
                fence: device.fence_id(&compute_fence),
                value: 1
            }
        );
    }

    #[test]
    fn dropping_objects_updates_counters() {
        let device = NullDevice::new();
        let buffer = device
            .create_buffer(
                &BufferDesc {
                    size_bytes: 1024,
                    usage: BufferUsageFlags::default(),
                    memory_location: MemoryLocation::CpuToGpu,
                    default_resource_state: ResourceState::GenericRead,
                },
                "Upload",
            )
            .unwrap();
        let id = device.resource_id(ResourceRef::Buffer(&buffer));
        assert!(device.buffer_mapped_ptr(&buffer).is_some());
        assert!(device.is_resource_alive(id));
        drop(buffer);
        assert!(!device.is_resource_alive(id));
        assert_eq!(device.destroyed_resource_count(), 1);

        let root_signature = device.create_root_signature(&[1, 2, 3], "Root").unwrap();
        let pipeline = device
            .create_compute_pipeline(
                &ComputePipelineDesc {
                    root_signature: &root_signature,
                    bytecode: &[1],
                },
                "Compute",
            )
            .unwrap();
        assert_eq!(device.live_pipeline_count(), 1);
        drop(pipeline);
        assert_eq!(device.live_pipeline_count(), 0);
        assert_eq!(
            device.create_root_signature(&[], "Empty").err(),
            Some(DeviceError::InvalidParameters)
        );
    }

    #[test]
    fn recording_is_captured_in_order() {
        let device = NullDevice::new();
        let (_allocator, mut list) = recording_list(&device);
        device.cmd_debug_begin_event(&mut list, "Depth Pre-Pass");
        device.cmd_draw(&mut list, 3, 1, 0, 0);
        device.cmd_debug_end_event(&mut list);
        assert_eq!(
            device.commands(&list),
            vec![
                NullCommand::BeginEvent("Depth Pre-Pass".to_string()),
                NullCommand::Draw {
                    vertex_count: 3,
                    instance_count: 1
                },
                NullCommand::EndEvent,
            ]
        );
    }

    #[test]
    fn table_from_an_unbound_heap_is_reported() {
        let device = NullDevice::new();
        let heap = |name| {
            device
                .create_descriptor_heap(
                    &DescriptorHeapDesc {
                        ty: DescriptorHeapType::CbvSrvUav,
                        capacity: 8,
                        shader_visible: true,
                    },
                    name,
                )
                .unwrap()
        };
        let (first, second) = (heap("First"), heap("Second"));

        let (_allocator, mut list) = recording_list(&device);
        device.cmd_set_descriptor_heaps(&mut list, &[&first]);
        device.cmd_set_root_descriptor_table(
            &mut list,
            PipelineBindPoint::Graphics,
            0,
            first.gpu_start.unwrap(),
        );
        device.cmd_draw(&mut list, 3, 1, 0, 0);
        assert!(device.validation_errors().is_empty());

        device.cmd_set_descriptor_heaps(&mut list, &[&second]);
        device.cmd_draw(&mut list, 3, 1, 0, 0);
        assert_eq!(device.take_validation_errors().len(), 1);

        device.cmd_set_root_descriptor_table(
            &mut list,
            PipelineBindPoint::Graphics,
            0,
            second.gpu_start.unwrap(),
        );
        device.cmd_draw(&mut list, 3, 1, 0, 0);
        assert!(device.validation_errors().is_empty());
    }
}
