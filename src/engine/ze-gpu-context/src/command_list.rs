use crate::barrier::{BarrierBatcher, BarrierResource};
use crate::upload::{DynamicAllocation, UploadBuffer};
use bytemuck::Pod;
use std::sync::Arc;
use ze_core::maths::RectI32;
use ze_gfx::backend::*;

/// A command list in recording state, obtained from a [`crate::CommandQueue`] and handed back
/// to it through `execute`
pub struct CommandList {
    device: Arc<dyn Device>,
    native: ze_gfx::backend::CommandList,
    allocator: CommandAllocator,
    frame_id: u64,
    upload: UploadBuffer,
}

impl CommandList {
    pub(crate) fn new(
        device: Arc<dyn Device>,
        native: ze_gfx::backend::CommandList,
        allocator: CommandAllocator,
        frame_id: u64,
        upload: UploadBuffer,
    ) -> Self {
        Self {
            device,
            native,
            allocator,
            frame_id,
            upload,
        }
    }

    pub(crate) fn into_parts(self) -> (ze_gfx::backend::CommandList, CommandAllocator) {
        (self.native, self.allocator)
    }

    pub fn native(&self) -> &ze_gfx::backend::CommandList {
        &self.native
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn queue_type(&self) -> QueueType {
        self.native.ty
    }

    /// Frame this list was obtained in
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    // Barriers
    pub fn resource_barriers(&mut self, barriers: &[ResourceBarrier]) {
        if !barriers.is_empty() {
            self.device.cmd_resource_barrier(&mut self.native, barriers);
        }
    }

    pub fn barriers<'r>(&mut self) -> BarrierBatcher<'_, 'r> {
        BarrierBatcher::new(self)
    }

    pub fn transition_barrier(
        &mut self,
        resource: &dyn BarrierResource,
        source_state: ResourceState,
        dest_state: ResourceState,
    ) {
        if source_state == dest_state {
            return;
        }

        self.resource_barriers(&[ResourceBarrier::Transition(ResourceTransitionBarrier {
            resource: resource.resource_ref(),
            source_state,
            dest_state,
            split: BarrierSplit::None,
        })]);
    }

    pub fn uav_barrier(&mut self, resource: &dyn BarrierResource) {
        self.resource_barriers(&[ResourceBarrier::UnorderedAccess(Some(
            resource.resource_ref(),
        ))]);
    }

    // Bindings
    pub fn set_descriptor_heaps(&mut self, heaps: &[&DescriptorHeap]) {
        self.device.cmd_set_descriptor_heaps(&mut self.native, heaps);
    }

    pub fn set_pipeline_state(&mut self, pipeline: &PipelineState) {
        self.device.cmd_set_pipeline_state(&mut self.native, pipeline);
    }

    pub fn set_root_signature(
        &mut self,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        self.device
            .cmd_set_root_signature(&mut self.native, bind_point, root_signature);
    }

    /// Upload `data` as 32 bit root constants
    pub fn set_root_constants<T: Pod>(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        data: &T,
    ) {
        let bytes = bytemuck::bytes_of(data);
        assert_eq!(bytes.len() % 4, 0, "Root constants must be made of 32 bit values");
        let values = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect::<Vec<_>>();
        self.device
            .cmd_set_root_constants(&mut self.native, bind_point, parameter, &values);
    }

    pub fn set_root_constant_buffer(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        self.device
            .cmd_set_root_constant_buffer(&mut self.native, bind_point, parameter, address);
    }

    /// Copy `data` into this list's upload memory and bind it as a root constant buffer
    pub fn set_dynamic_constant_buffer<T: Pod>(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        data: &T,
    ) -> Result<(), DeviceError> {
        let address = self.upload.upload_constants(data)?;
        self.set_root_constant_buffer(bind_point, parameter, address);
        Ok(())
    }

    pub fn set_root_shader_resource(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        self.device
            .cmd_set_root_shader_resource(&mut self.native, bind_point, parameter, address);
    }

    pub fn set_root_unordered_access(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        self.device
            .cmd_set_root_unordered_access(&mut self.native, bind_point, parameter, address);
    }

    pub fn set_root_descriptor_table(
        &mut self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        handle: GpuDescriptorHandle,
    ) {
        self.device
            .cmd_set_root_descriptor_table(&mut self.native, bind_point, parameter, handle);
    }

    // Render targets
    pub fn set_render_targets(
        &mut self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        assert!(render_targets.len() <= MAX_RENDER_PASS_RENDER_TARGET_COUNT);
        self.device
            .cmd_set_render_targets(&mut self.native, render_targets, depth_stencil);
    }

    pub fn clear_render_target(&mut self, render_target: CpuDescriptorHandle, color: [f32; 4]) {
        self.device
            .cmd_clear_render_target(&mut self.native, render_target, color);
    }

    pub fn clear_depth(&mut self, depth_stencil: CpuDescriptorHandle, depth: f32) {
        self.device
            .cmd_clear_depth_stencil(&mut self.native, depth_stencil, depth, None);
    }

    pub fn clear_depth_stencil(
        &mut self,
        depth_stencil: CpuDescriptorHandle,
        depth: f32,
        stencil: u8,
    ) {
        self.device
            .cmd_clear_depth_stencil(&mut self.native, depth_stencil, depth, Some(stencil));
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.set_viewports(&[viewport]);
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.device.cmd_set_viewports(&mut self.native, viewports);
    }

    pub fn set_scissor(&mut self, scissor: RectI32) {
        self.device.cmd_set_scissors(&mut self.native, &[scissor]);
    }

    pub fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.device
            .cmd_set_primitive_topology(&mut self.native, topology);
    }

    pub fn set_vertex_buffer(&mut self, slot: u32, view: VertexBufferView) {
        self.set_vertex_buffers(slot, &[view]);
    }

    pub fn set_vertex_buffers(&mut self, start_slot: u32, views: &[VertexBufferView]) {
        self.device
            .cmd_set_vertex_buffers(&mut self.native, start_slot, views);
    }

    pub fn set_index_buffer(&mut self, view: IndexBufferView) {
        self.device.cmd_set_index_buffer(&mut self.native, &view);
    }

    pub fn set_stencil_ref(&mut self, value: u32) {
        self.device.cmd_set_stencil_ref(&mut self.native, value);
    }

    // Work
    pub fn draw(
        &mut self,
        vertex_count_per_instance: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.device.cmd_draw(
            &mut self.native,
            vertex_count_per_instance,
            instance_count,
            first_vertex,
            first_instance,
        );
    }

    pub fn draw_indexed(
        &mut self,
        index_count_per_instance: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        self.device.cmd_draw_indexed(
            &mut self.native,
            index_count_per_instance,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        );
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.device.cmd_dispatch(&mut self.native, x, y, z);
    }

    pub fn dispatch_mesh(&mut self, x: u32, y: u32, z: u32) {
        self.device.cmd_dispatch_mesh(&mut self.native, x, y, z);
    }

    pub fn dispatch_rays(&mut self, desc: &DispatchRaysDesc) {
        self.device.cmd_dispatch_rays(&mut self.native, desc);
    }

    pub fn build_acceleration_structure(&mut self, desc: &AccelerationStructureBuildDesc) {
        self.device
            .cmd_build_acceleration_structure(&mut self.native, desc);
    }

    // Transfer
    pub fn copy_buffer_region(
        &mut self,
        dst: &ze_gfx::backend::Buffer,
        dst_offset: u64,
        src: &ze_gfx::backend::Buffer,
        src_offset: u64,
        size: u64,
    ) {
        self.device.cmd_copy_buffer_region(
            &mut self.native,
            dst,
            dst_offset,
            src,
            src_offset,
            size,
        );
    }

    pub fn copy_resource(&mut self, dst: &dyn BarrierResource, src: &dyn BarrierResource) {
        self.device
            .cmd_copy_resource(&mut self.native, dst.resource_ref(), src.resource_ref());
    }

    // Debug
    pub fn begin_event(&mut self, name: &str) {
        self.device.cmd_debug_begin_event(&mut self.native, name);
    }

    pub fn end_event(&mut self) {
        self.device.cmd_debug_end_event(&mut self.native);
    }

    // Upload memory
    pub fn allocate_dynamic_buffer(
        &mut self,
        size: u64,
        alignment: u64,
    ) -> Result<DynamicAllocation, DeviceError> {
        self.upload.allocate(size, alignment)
    }

    pub fn upload_dynamic_constant_buffer(&mut self, data: &[u8]) -> Result<u64, DeviceError> {
        self.upload.upload_dynamic_constant_buffer(data)
    }

    pub fn upload_pod<T: Pod>(&mut self, data: &[T], alignment: u64) -> Result<u64, DeviceError> {
        self.upload.upload_slice(data, alignment)
    }
}
