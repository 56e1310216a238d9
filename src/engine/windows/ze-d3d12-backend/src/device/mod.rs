mod cmd_list;
mod pipelines;
mod queue;
mod resources;
mod swapchain;
mod views;

use crate::device::cmd_list::{tlas_inputs, D3D12CommandList};
use crate::device::queue::{D3D12CommandAllocator, D3D12Fence, D3D12Queue};
use crate::device::resources::D3D12Buffer;
use crate::device::swapchain::D3D12SwapChain;
use crate::utils::*;
use parking_lot::Mutex;
use raw_window_handle::RawWindowHandle;
use std::ffi::c_void;
use std::mem::size_of;
use std::sync::Arc;
use std::time::Duration;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;
use ze_core::maths::RectI32;
use ze_core::ze_verbose;
use ze_gfx::backend::*;
use ze_gfx::PixelFormat;

pub struct D3D12Device {
    name: String,
    caps: DeviceCaps,
    dxgi_factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
    device: SendableIUnknown<ID3D12Device2>,

    /// Set when the device supports DXR
    raytracing_device: Option<SendableIUnknown<ID3D12Device5>>,
    increment_sizes: [u32; 4],
}

fn query_caps(device: &ID3D12Device2) -> DeviceCaps {
    let mut options5 = D3D12_FEATURE_DATA_D3D12_OPTIONS5::default();
    let raytracing = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS5,
            &mut options5 as *mut _ as *mut c_void,
            size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS5>() as u32,
        )
    }
    .is_ok()
        && options5.RaytracingTier.0 >= D3D12_RAYTRACING_TIER_1_0.0;

    let mut options7 = D3D12_FEATURE_DATA_D3D12_OPTIONS7::default();
    let mesh_shaders = unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS7,
            &mut options7 as *mut _ as *mut c_void,
            size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS7>() as u32,
        )
    }
    .is_ok()
        && options7.MeshShaderTier.0 >= D3D12_MESH_SHADER_TIER_1.0;

    DeviceCaps {
        raytracing,
        mesh_shaders,
    }
}

fn cmd_list_of(cmd_list: &CommandList) -> &D3D12CommandList {
    native::<D3D12CommandList>(cmd_list.backend_data.as_ref())
}

impl D3D12Device {
    pub(crate) fn new(
        dxgi_factory: Arc<Mutex<SendableIUnknown<IDXGIFactory4>>>,
        device: ID3D12Device,
        name: String,
    ) -> Result<Self, DeviceError> {
        let device: ID3D12Device2 = device
            .cast()
            .map_err(convert_d3d_error_to_ze_device_error)?;

        let mut caps = query_caps(&device);
        let raytracing_device = if caps.raytracing {
            device.cast::<ID3D12Device5>().ok().map(SendableIUnknown::from)
        } else {
            None
        };
        caps.raytracing = raytracing_device.is_some();
        ze_verbose!(
            "{}: raytracing {}, mesh shaders {}",
            name,
            caps.raytracing,
            caps.mesh_shaders
        );

        let increment_sizes = [
            DescriptorHeapType::CbvSrvUav,
            DescriptorHeapType::Sampler,
            DescriptorHeapType::Rtv,
            DescriptorHeapType::Dsv,
        ]
        .map(|ty| unsafe { device.GetDescriptorHandleIncrementSize(get_descriptor_heap_type(ty)) });

        Ok(Self {
            name,
            caps,
            dxgi_factory,
            device: device.into(),
            raytracing_device,
            increment_sizes,
        })
    }

    fn raytracing_device(&self) -> Result<&ID3D12Device5, DeviceError> {
        self.raytracing_device
            .as_deref()
            .ok_or(DeviceError::Unsupported)
    }
}

impl Device for D3D12Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn caps(&self) -> DeviceCaps {
        self.caps
    }

    fn format_support(&self, format: PixelFormat) -> FormatSupportFlags {
        let mut support = D3D12_FEATURE_DATA_FORMAT_SUPPORT {
            Format: get_dxgi_format_from_ze_format(format),
            ..Default::default()
        };

        let result = unsafe {
            self.device.CheckFeatureSupport(
                D3D12_FEATURE_FORMAT_SUPPORT,
                &mut support as *mut _ as *mut c_void,
                size_of::<D3D12_FEATURE_DATA_FORMAT_SUPPORT>() as u32,
            )
        };

        let mut flags = FormatSupportFlags::empty();
        if result.is_err() {
            return flags;
        }

        let support1 = support.Support1.0;
        if support1 & D3D12_FORMAT_SUPPORT1_SHADER_SAMPLE.0 != 0
            || support1 & D3D12_FORMAT_SUPPORT1_SHADER_LOAD.0 != 0
        {
            flags |= FormatSupportFlagBits::ShaderResource;
        }
        if support1 & D3D12_FORMAT_SUPPORT1_RENDER_TARGET.0 != 0 {
            flags |= FormatSupportFlagBits::RenderTarget;
        }
        if support1 & D3D12_FORMAT_SUPPORT1_DEPTH_STENCIL.0 != 0 {
            flags |= FormatSupportFlagBits::DepthStencil;
        }
        if support1 & D3D12_FORMAT_SUPPORT1_TYPED_UNORDERED_ACCESS_VIEW.0 != 0 {
            flags |= FormatSupportFlagBits::UnorderedAccess;
        }
        flags
    }

    fn descriptor_handle_increment_size(&self, ty: DescriptorHeapType) -> u32 {
        match ty {
            DescriptorHeapType::CbvSrvUav => self.increment_sizes[0],
            DescriptorHeapType::Sampler => self.increment_sizes[1],
            DescriptorHeapType::Rtv => self.increment_sizes[2],
            DescriptorHeapType::Dsv => self.increment_sizes[3],
        }
    }

    fn create_command_queue(&self, ty: QueueType, name: &str) -> Result<CommandQueue, DeviceError> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: get_command_list_type_from_queue_type(ty),
                Priority: 0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            })
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        if let Ok(object) = queue.cast::<ID3D12Object>() {
            set_resource_name(&object, name);
        }

        Ok(CommandQueue::new(
            ty,
            Box::new(D3D12Queue {
                queue: queue.into(),
            }),
        ))
    }

    fn create_fence(&self, initial_value: u64) -> Result<Fence, DeviceError> {
        let fence: ID3D12Fence = unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE) }
            .map_err(convert_d3d_error_to_ze_device_error)?;
        Ok(Fence::new(Box::new(D3D12Fence::new(fence)?)))
    }

    fn fence_completed_value(&self, fence: &Fence) -> u64 {
        native::<D3D12Fence>(fence.backend_data.as_ref())
            .completed_value()
            .unwrap_or(u64::MAX)
    }

    fn wait_for_fence(
        &self,
        fence: &Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError> {
        native::<D3D12Fence>(fence.backend_data.as_ref()).wait(value, timeout)
    }

    fn queue_signal(&self, queue: &CommandQueue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let queue = native::<D3D12Queue>(queue.backend_data.as_ref());
        let fence = native::<D3D12Fence>(fence.backend_data.as_ref());
        unsafe { queue.queue.Signal(&*fence.fence, value) }
            .map_err(convert_d3d_error_to_ze_device_error)
    }

    fn queue_wait(&self, queue: &CommandQueue, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        let queue = native::<D3D12Queue>(queue.backend_data.as_ref());
        let fence = native::<D3D12Fence>(fence.backend_data.as_ref());
        unsafe { queue.queue.Wait(&*fence.fence, value) }
            .map_err(convert_d3d_error_to_ze_device_error)
    }

    fn queue_execute(&self, queue: &CommandQueue, command_lists: &[&CommandList]) {
        let queue = native::<D3D12Queue>(queue.backend_data.as_ref());
        let command_lists: Vec<Option<ID3D12CommandList>> = command_lists
            .iter()
            .map(|cmd_list| cmd_list_of(cmd_list).cmd_list.cast::<ID3D12CommandList>().ok())
            .collect();

        unsafe {
            queue.queue.ExecuteCommandLists(&command_lists);
        }
    }

    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError> {
        let allocator: ID3D12CommandAllocator = unsafe {
            self.device
                .CreateCommandAllocator(get_command_list_type_from_queue_type(ty))
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        Ok(CommandAllocator::new(
            ty,
            Box::new(D3D12CommandAllocator {
                allocator: allocator.into(),
            }),
        ))
    }

    fn reset_command_allocator(&self, allocator: &CommandAllocator) -> Result<(), DeviceError> {
        let allocator = native::<D3D12CommandAllocator>(allocator.backend_data.as_ref());
        unsafe { allocator.allocator.Reset() }.map_err(convert_d3d_error_to_ze_device_error)
    }

    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
    ) -> Result<CommandList, DeviceError> {
        let allocator = native::<D3D12CommandAllocator>(allocator.backend_data.as_ref());
        let cmd_list: ID3D12GraphicsCommandList4 = unsafe {
            self.device.CreateCommandList(
                0,
                get_command_list_type_from_queue_type(ty),
                &*allocator.allocator,
                None,
            )
        }
        .map_err(convert_d3d_error_to_ze_device_error)?;

        let cmd_list = D3D12CommandList::new(cmd_list);
        cmd_list.close()?;
        Ok(CommandList::new(ty, Box::new(cmd_list)))
    }

    fn reset_command_list(
        &self,
        cmd_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError> {
        let allocator = native::<D3D12CommandAllocator>(allocator.backend_data.as_ref());
        native_mut::<D3D12CommandList>(cmd_list.backend_data.as_mut()).reset(allocator)
    }

    fn close_command_list(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError> {
        cmd_list_of(cmd_list).close()
    }

    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        name: &str,
    ) -> Result<DescriptorHeap, DeviceError> {
        views::create_descriptor_heap(&self.device, desc, name)
    }

    fn create_shader_resource_view(&self, desc: &ShaderResourceViewDesc, handle: CpuDescriptorHandle) {
        views::create_shader_resource_view(&self.device, desc, handle)
    }

    fn create_unordered_access_view(
        &self,
        desc: &UnorderedAccessViewDesc,
        handle: CpuDescriptorHandle,
    ) {
        views::create_unordered_access_view(&self.device, desc, handle)
    }

    fn create_render_target_view(&self, desc: &RenderTargetViewDesc, handle: CpuDescriptorHandle) {
        views::create_render_target_view(&self.device, desc, handle)
    }

    fn create_depth_stencil_view(&self, desc: &DepthStencilViewDesc, handle: CpuDescriptorHandle) {
        views::create_depth_stencil_view(&self.device, desc, handle)
    }

    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    ) {
        views::copy_descriptors(&self.device, count, dst, src, ty)
    }

    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> Result<Buffer, DeviceError> {
        if desc.usage.contains(BufferUsageFlagBits::AccelerationStructure) && !self.caps.raytracing {
            return Err(DeviceError::Unsupported);
        }
        resources::create_buffer(&self.device, desc, name)
    }

    fn create_texture(&self, desc: &TextureDesc, name: &str) -> Result<Texture, DeviceError> {
        resources::create_texture(&self.device, desc, name)
    }

    fn buffer_mapped_ptr(&self, buffer: &Buffer) -> Option<*mut u8> {
        native::<D3D12Buffer>(buffer.backend_data.as_ref()).mapped_ptr
    }

    fn create_root_signature(&self, blob: &[u8], name: &str) -> Result<RootSignature, DeviceError> {
        pipelines::create_root_signature(&self.device, blob, name)
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError> {
        pipelines::create_graphics_pipeline(&self.device, desc, name)
    }

    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError> {
        pipelines::create_compute_pipeline(&self.device, desc, name)
    }

    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError> {
        pipelines::create_raytracing_pipeline(self.raytracing_device()?, desc, name)
    }

    fn raytracing_shader_identifier(
        &self,
        pipeline: &PipelineState,
        export: &str,
    ) -> Option<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]> {
        pipelines::raytracing_shader_identifier(pipeline, export)
    }

    fn tlas_prebuild_info(&self, num_instances: u32, allow_update: bool) -> AccelerationStructurePrebuildInfo {
        let Ok(device) = self.raytracing_device() else {
            return AccelerationStructurePrebuildInfo::default();
        };

        let inputs = tlas_inputs(num_instances, allow_update, false, 0);
        let mut info = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_PREBUILD_INFO::default();
        unsafe {
            device.GetRaytracingAccelerationStructurePrebuildInfo(&inputs, &mut info);
        }

        AccelerationStructurePrebuildInfo {
            result_data_max_size_in_bytes: info.ResultDataMaxSizeInBytes,
            scratch_data_size_in_bytes: info.ScratchDataSizeInBytes,
            update_scratch_data_size_in_bytes: info.UpdateScratchDataSizeInBytes,
        }
    }

    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
        queue: &CommandQueue,
        old_swapchain: Option<SwapChain>,
    ) -> Result<SwapChain, DeviceError> {
        let factory = self.dxgi_factory.lock();
        swapchain::create_swapchain(&factory, desc, window, queue, old_swapchain)
    }

    fn swapchain_backbuffer_count(&self, swapchain: &SwapChain) -> usize {
        native::<D3D12SwapChain>(swapchain.backend_data.as_ref())
            .textures
            .len()
    }

    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32 {
        let swapchain = native::<D3D12SwapChain>(swapchain.backend_data.as_ref());
        unsafe { swapchain.swapchain.GetCurrentBackBufferIndex() }
    }

    fn swapchain_backbuffer(
        &self,
        swapchain: &SwapChain,
        index: u32,
    ) -> Result<Arc<Texture>, DeviceError> {
        native::<D3D12SwapChain>(swapchain.backend_data.as_ref())
            .textures
            .get(index as usize)
            .cloned()
            .ok_or(DeviceError::InvalidParameters)
    }

    fn present(&self, swapchain: &SwapChain) -> Result<(), DeviceError> {
        swapchain::present(swapchain)
    }

    fn cmd_resource_barrier(&self, cmd_list: &mut CommandList, barriers: &[ResourceBarrier]) {
        cmd_list_of(cmd_list).resource_barrier(barriers);
    }

    fn cmd_set_descriptor_heaps(&self, cmd_list: &mut CommandList, heaps: &[&DescriptorHeap]) {
        cmd_list_of(cmd_list).set_descriptor_heaps(heaps);
    }

    fn cmd_set_pipeline_state(&self, cmd_list: &mut CommandList, pipeline: &PipelineState) {
        cmd_list_of(cmd_list).set_pipeline_state(pipeline);
    }

    fn cmd_set_root_signature(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    ) {
        cmd_list_of(cmd_list).set_root_signature(bind_point, root_signature);
    }

    fn cmd_set_root_constants(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        data: &[u32],
    ) {
        cmd_list_of(cmd_list).set_root_constants(bind_point, parameter, data);
    }

    fn cmd_set_root_constant_buffer(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        cmd_list_of(cmd_list).set_root_constant_buffer(bind_point, parameter, address);
    }

    fn cmd_set_root_shader_resource(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        cmd_list_of(cmd_list).set_root_shader_resource(bind_point, parameter, address);
    }

    fn cmd_set_root_unordered_access(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    ) {
        cmd_list_of(cmd_list).set_root_unordered_access(bind_point, parameter, address);
    }

    fn cmd_set_root_descriptor_table(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        handle: GpuDescriptorHandle,
    ) {
        cmd_list_of(cmd_list).set_root_descriptor_table(bind_point, parameter, handle);
    }

    fn cmd_set_render_targets(
        &self,
        cmd_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        cmd_list_of(cmd_list).set_render_targets(render_targets, depth_stencil);
    }

    fn cmd_clear_render_target(
        &self,
        cmd_list: &mut CommandList,
        render_target: CpuDescriptorHandle,
        color: [f32; 4],
    ) {
        cmd_list_of(cmd_list).clear_render_target(render_target, color);
    }

    fn cmd_clear_depth_stencil(
        &self,
        cmd_list: &mut CommandList,
        depth_stencil: CpuDescriptorHandle,
        depth: f32,
        stencil: Option<u8>,
    ) {
        cmd_list_of(cmd_list).clear_depth_stencil(depth_stencil, depth, stencil);
    }

    fn cmd_set_viewports(&self, cmd_list: &mut CommandList, viewports: &[Viewport]) {
        cmd_list_of(cmd_list).set_viewports(viewports);
    }

    fn cmd_set_scissors(&self, cmd_list: &mut CommandList, scissors: &[RectI32]) {
        cmd_list_of(cmd_list).set_scissors(scissors);
    }

    fn cmd_set_primitive_topology(&self, cmd_list: &mut CommandList, topology: PrimitiveTopology) {
        cmd_list_of(cmd_list).set_primitive_topology(topology);
    }

    fn cmd_set_vertex_buffers(
        &self,
        cmd_list: &mut CommandList,
        start_slot: u32,
        views: &[VertexBufferView],
    ) {
        cmd_list_of(cmd_list).set_vertex_buffers(start_slot, views);
    }

    fn cmd_set_index_buffer(&self, cmd_list: &mut CommandList, view: &IndexBufferView) {
        cmd_list_of(cmd_list).set_index_buffer(view);
    }

    fn cmd_set_stencil_ref(&self, cmd_list: &mut CommandList, value: u32) {
        cmd_list_of(cmd_list).set_stencil_ref(value);
    }

    fn cmd_draw(
        &self,
        cmd_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        cmd_list_of(cmd_list).draw(
            vertex_count_per_instance,
            instance_count,
            first_vertex,
            first_instance,
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd_list: &mut CommandList,
        index_count_per_instance: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        cmd_list_of(cmd_list).draw_indexed(
            index_count_per_instance,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        );
    }

    fn cmd_dispatch(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32) {
        cmd_list_of(cmd_list).dispatch(x, y, z);
    }

    fn cmd_dispatch_mesh(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32) {
        cmd_list_of(cmd_list).dispatch_mesh(x, y, z);
    }

    fn cmd_dispatch_rays(&self, cmd_list: &mut CommandList, desc: &DispatchRaysDesc) {
        cmd_list_of(cmd_list).dispatch_rays(desc);
    }

    fn cmd_build_acceleration_structure(
        &self,
        cmd_list: &mut CommandList,
        desc: &AccelerationStructureBuildDesc,
    ) {
        cmd_list_of(cmd_list).build_acceleration_structure(desc);
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
        cmd_list_of(cmd_list).copy_buffer_region(dst, dst_offset, src, src_offset, size);
    }

    fn cmd_copy_resource(&self, cmd_list: &mut CommandList, dst: ResourceRef, src: ResourceRef) {
        cmd_list_of(cmd_list).copy_resource(dst, src);
    }

    fn cmd_debug_begin_event(&self, cmd_list: &mut CommandList, name: &str) {
        cmd_list_of(cmd_list).begin_event(name);
    }

    fn cmd_debug_end_event(&self, cmd_list: &mut CommandList) {
        cmd_list_of(cmd_list).end_event();
    }
}
