use crate::device::pipelines::{D3D12Pipeline, D3D12RootSignature};
use crate::device::queue::D3D12CommandAllocator;
use crate::device::resources::{resource_of, D3D12Buffer};
use crate::device::views::D3D12DescriptorHeap;
use crate::utils::*;
use std::ffi::c_void;
use std::mem::{size_of_val, ManuallyDrop};
use tinyvec::ArrayVec;
use windows::core::Interface;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_core::maths::RectI32;
use ze_gfx::backend::*;

/// Event metadata PIX reads as an UTF-16 string
const PIX_EVENT_UNICODE_VERSION: u32 = 0;

pub(crate) struct D3D12CommandList {
    pub cmd_list: SendableIUnknown<ID3D12GraphicsCommandList4>,

    /// Only available when the device supports mesh shaders
    pub mesh_cmd_list: Option<SendableIUnknown<ID3D12GraphicsCommandList6>>,
}

impl D3D12CommandList {
    pub fn new(cmd_list: ID3D12GraphicsCommandList4) -> Self {
        let mesh_cmd_list = cmd_list
            .cast::<ID3D12GraphicsCommandList6>()
            .ok()
            .map(SendableIUnknown::from);
        Self {
            cmd_list: cmd_list.into(),
            mesh_cmd_list,
        }
    }

    pub fn reset(&self, allocator: &D3D12CommandAllocator) -> Result<(), DeviceError> {
        unsafe { self.cmd_list.Reset(&*allocator.allocator, None) }
            .map_err(convert_d3d_error_to_ze_device_error)
    }

    pub fn close(&self) -> Result<(), DeviceError> {
        unsafe { self.cmd_list.Close() }.map_err(convert_d3d_error_to_ze_device_error)
    }

    pub fn resource_barrier(&self, barriers: &[ResourceBarrier]) {
        if barriers.is_empty() {
            return;
        }

        let mut resource_barriers = Vec::with_capacity(barriers.len());
        for barrier in barriers {
            resource_barriers.push(match barrier {
                ResourceBarrier::Transition(transition) => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                    Flags: match transition.split {
                        BarrierSplit::None => D3D12_RESOURCE_BARRIER_FLAG_NONE,
                        BarrierSplit::Begin => D3D12_RESOURCE_BARRIER_FLAG_BEGIN_ONLY,
                        BarrierSplit::End => D3D12_RESOURCE_BARRIER_FLAG_END_ONLY,
                    },
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                            pResource: Some(resource_of(transition.resource).clone()),
                            Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                            StateBefore: get_d3d_resource_states_from_ze_resource_state(
                                transition.source_state,
                            ),
                            StateAfter: get_d3d_resource_states_from_ze_resource_state(
                                transition.dest_state,
                            ),
                        }),
                    },
                },
                ResourceBarrier::UnorderedAccess(resource) => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_UAV,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        UAV: ManuallyDrop::new(D3D12_RESOURCE_UAV_BARRIER {
                            pResource: resource.map(|resource| resource_of(resource).clone()),
                        }),
                    },
                },
                ResourceBarrier::Aliasing { before, after } => D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_ALIASING,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Aliasing: ManuallyDrop::new(D3D12_RESOURCE_ALIASING_BARRIER {
                            pResourceBefore: before.map(|resource| resource_of(resource).clone()),
                            pResourceAfter: after.map(|resource| resource_of(resource).clone()),
                        }),
                    },
                },
            });
        }

        unsafe {
            self.cmd_list.ResourceBarrier(&resource_barriers);
        }

        // The barriers own a reference to their resources
        for barrier in resource_barriers {
            unsafe {
                match barrier.Type {
                    D3D12_RESOURCE_BARRIER_TYPE_TRANSITION => {
                        drop(ManuallyDrop::into_inner(barrier.Anonymous.Transition))
                    }
                    D3D12_RESOURCE_BARRIER_TYPE_UAV => {
                        drop(ManuallyDrop::into_inner(barrier.Anonymous.UAV))
                    }
                    _ => drop(ManuallyDrop::into_inner(barrier.Anonymous.Aliasing)),
                }
            }
        }
    }

    pub fn set_descriptor_heaps(&self, heaps: &[&DescriptorHeap]) {
        let heaps: ArrayVec<[Option<ID3D12DescriptorHeap>; 2]> = heaps
            .iter()
            .take(2)
            .map(|heap| {
                Some(
                    native::<D3D12DescriptorHeap>(heap.backend_data.as_ref())
                        .heap
                        .0
                        .clone(),
                )
            })
            .collect();

        unsafe {
            self.cmd_list.SetDescriptorHeaps(&heaps);
        }
    }

    pub fn set_pipeline_state(&self, pipeline: &PipelineState) {
        unsafe {
            match native::<D3D12Pipeline>(pipeline.backend_data.as_ref()) {
                D3D12Pipeline::PipelineState(pipeline) => {
                    self.cmd_list.SetPipelineState(&**pipeline)
                }
                D3D12Pipeline::StateObject(state_object) => {
                    self.cmd_list.SetPipelineState1(&**state_object)
                }
            }
        }
    }

    pub fn set_root_signature(&self, bind_point: PipelineBindPoint, root_signature: &RootSignature) {
        let root_signature =
            &native::<D3D12RootSignature>(root_signature.backend_data.as_ref()).root_signature;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => {
                    self.cmd_list.SetGraphicsRootSignature(&**root_signature)
                }
                PipelineBindPoint::Compute => {
                    self.cmd_list.SetComputeRootSignature(&**root_signature)
                }
            }
        }
    }

    pub fn set_root_constants(&self, bind_point: PipelineBindPoint, parameter: u32, data: &[u32]) {
        let ptr = data.as_ptr() as *const c_void;
        let count = data.len() as u32;
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => self
                    .cmd_list
                    .SetGraphicsRoot32BitConstants(parameter, count, ptr, 0),
                PipelineBindPoint::Compute => self
                    .cmd_list
                    .SetComputeRoot32BitConstants(parameter, count, ptr, 0),
            }
        }
    }

    pub fn set_root_constant_buffer(&self, bind_point: PipelineBindPoint, parameter: u32, address: u64) {
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => self
                    .cmd_list
                    .SetGraphicsRootConstantBufferView(parameter, address),
                PipelineBindPoint::Compute => self
                    .cmd_list
                    .SetComputeRootConstantBufferView(parameter, address),
            }
        }
    }

    pub fn set_root_shader_resource(&self, bind_point: PipelineBindPoint, parameter: u32, address: u64) {
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => self
                    .cmd_list
                    .SetGraphicsRootShaderResourceView(parameter, address),
                PipelineBindPoint::Compute => self
                    .cmd_list
                    .SetComputeRootShaderResourceView(parameter, address),
            }
        }
    }

    pub fn set_root_unordered_access(&self, bind_point: PipelineBindPoint, parameter: u32, address: u64) {
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => self
                    .cmd_list
                    .SetGraphicsRootUnorderedAccessView(parameter, address),
                PipelineBindPoint::Compute => self
                    .cmd_list
                    .SetComputeRootUnorderedAccessView(parameter, address),
            }
        }
    }

    pub fn set_root_descriptor_table(
        &self,
        bind_point: PipelineBindPoint,
        parameter: u32,
        handle: GpuDescriptorHandle,
    ) {
        let handle = D3D12_GPU_DESCRIPTOR_HANDLE { ptr: handle.ptr };
        unsafe {
            match bind_point {
                PipelineBindPoint::Graphics => self
                    .cmd_list
                    .SetGraphicsRootDescriptorTable(parameter, handle),
                PipelineBindPoint::Compute => self
                    .cmd_list
                    .SetComputeRootDescriptorTable(parameter, handle),
            }
        }
    }

    pub fn set_render_targets(
        &self,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    ) {
        let render_targets: ArrayVec<[D3D12_CPU_DESCRIPTOR_HANDLE; MAX_RENDER_PASS_RENDER_TARGET_COUNT]> =
            render_targets
                .iter()
                .take(MAX_RENDER_PASS_RENDER_TARGET_COUNT)
                .map(|handle| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr })
                .collect();
        let depth_stencil = depth_stencil.map(|handle| D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr });

        unsafe {
            self.cmd_list.OMSetRenderTargets(
                render_targets.len() as u32,
                if render_targets.is_empty() {
                    None
                } else {
                    Some(render_targets.as_ptr())
                },
                false,
                depth_stencil.as_ref().map(|handle| handle as *const _),
            );
        }
    }

    pub fn clear_render_target(&self, render_target: CpuDescriptorHandle, color: [f32; 4]) {
        unsafe {
            self.cmd_list.ClearRenderTargetView(
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: render_target.ptr,
                },
                color.as_ptr(),
                &[],
            );
        }
    }

    pub fn clear_depth_stencil(&self, depth_stencil: CpuDescriptorHandle, depth: f32, stencil: Option<u8>) {
        let mut flags = D3D12_CLEAR_FLAG_DEPTH;
        if stencil.is_some() {
            flags |= D3D12_CLEAR_FLAG_STENCIL;
        }

        unsafe {
            self.cmd_list.ClearDepthStencilView(
                D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: depth_stencil.ptr,
                },
                flags,
                depth,
                stencil.unwrap_or(0),
                &[],
            );
        }
    }

    pub fn set_viewports(&self, viewports: &[Viewport]) {
        let viewports: Vec<D3D12_VIEWPORT> = viewports
            .iter()
            .map(|viewport| D3D12_VIEWPORT {
                TopLeftX: viewport.position.x,
                TopLeftY: viewport.position.y,
                Width: viewport.size.x,
                Height: viewport.size.y,
                MinDepth: viewport.min_depth,
                MaxDepth: viewport.max_depth,
            })
            .collect();

        unsafe {
            self.cmd_list.RSSetViewports(&viewports);
        }
    }

    pub fn set_scissors(&self, scissors: &[RectI32]) {
        let scissors: Vec<RECT> = scissors
            .iter()
            .map(|scissor| RECT {
                left: scissor.x,
                top: scissor.y,
                right: scissor.x + scissor.width,
                bottom: scissor.y + scissor.height,
            })
            .collect();

        unsafe {
            self.cmd_list.RSSetScissorRects(&scissors);
        }
    }

    pub fn set_primitive_topology(&self, topology: PrimitiveTopology) {
        unsafe {
            self.cmd_list
                .IASetPrimitiveTopology(get_d3d_primitive_topology(topology));
        }
    }

    pub fn set_vertex_buffers(&self, start_slot: u32, views: &[VertexBufferView]) {
        let views: Vec<D3D12_VERTEX_BUFFER_VIEW> = views
            .iter()
            .map(|view| D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: view.address,
                SizeInBytes: view.size_in_bytes,
                StrideInBytes: view.stride_in_bytes,
            })
            .collect();

        unsafe {
            self.cmd_list.IASetVertexBuffers(start_slot, Some(&views));
        }
    }

    pub fn set_index_buffer(&self, view: &IndexBufferView) {
        let view = D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: view.address,
            SizeInBytes: view.size_in_bytes,
            Format: match view.format {
                IndexBufferFormat::Uint16 => DXGI_FORMAT_R16_UINT,
                IndexBufferFormat::Uint32 => DXGI_FORMAT_R32_UINT,
            },
        };

        unsafe {
            self.cmd_list.IASetIndexBuffer(Some(&view));
        }
    }

    pub fn set_stencil_ref(&self, value: u32) {
        unsafe {
            self.cmd_list.OMSetStencilRef(value);
        }
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            self.cmd_list
                .DrawInstanced(vertex_count, instance_count, first_vertex, first_instance);
        }
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.cmd_list.DrawIndexedInstanced(
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        unsafe {
            self.cmd_list.Dispatch(x, y, z);
        }
    }

    /// Ignored on lists without mesh shader support, callers check the device caps first
    pub fn dispatch_mesh(&self, x: u32, y: u32, z: u32) {
        if let Some(cmd_list) = &self.mesh_cmd_list {
            unsafe {
                cmd_list.DispatchMesh(x, y, z);
            }
        }
    }

    pub fn dispatch_rays(&self, desc: &DispatchRaysDesc) {
        let desc = D3D12_DISPATCH_RAYS_DESC {
            RayGenerationShaderRecord: D3D12_GPU_VIRTUAL_ADDRESS_RANGE {
                StartAddress: desc.raygen.address,
                SizeInBytes: desc.raygen.size_in_bytes,
            },
            MissShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: desc.miss.address,
                SizeInBytes: desc.miss.size_in_bytes,
                StrideInBytes: desc.miss.stride_in_bytes,
            },
            HitGroupTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE {
                StartAddress: desc.hit_groups.address,
                SizeInBytes: desc.hit_groups.size_in_bytes,
                StrideInBytes: desc.hit_groups.stride_in_bytes,
            },
            CallableShaderTable: D3D12_GPU_VIRTUAL_ADDRESS_RANGE_AND_STRIDE::default(),
            Width: desc.width,
            Height: desc.height,
            Depth: desc.depth,
        };

        unsafe {
            self.cmd_list.DispatchRays(&desc);
        }
    }

    pub fn build_acceleration_structure(&self, desc: &AccelerationStructureBuildDesc) {
        let desc = D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_DESC {
            DestAccelerationStructureData: desc.dest_address,
            Inputs: tlas_inputs(
                desc.num_instances,
                desc.allow_update,
                desc.source_address.is_some(),
                desc.instances_address,
            ),
            SourceAccelerationStructureData: desc.source_address.unwrap_or(0),
            ScratchAccelerationStructureData: desc.scratch_address,
        };

        unsafe {
            self.cmd_list.BuildRaytracingAccelerationStructure(&desc, None);
        }
    }

    pub fn copy_buffer_region(&self, dst: &Buffer, dst_offset: u64, src: &Buffer, src_offset: u64, size: u64) {
        let dst = native::<D3D12Buffer>(dst.backend_data.as_ref());
        let src = native::<D3D12Buffer>(src.backend_data.as_ref());
        unsafe {
            self.cmd_list
                .CopyBufferRegion(&*dst.resource, dst_offset, &*src.resource, src_offset, size);
        }
    }

    pub fn copy_resource(&self, dst: ResourceRef, src: ResourceRef) {
        unsafe {
            self.cmd_list.CopyResource(resource_of(dst), resource_of(src));
        }
    }

    pub fn begin_event(&self, name: &str) {
        let name = wide_string(name);
        unsafe {
            self.cmd_list.BeginEvent(
                PIX_EVENT_UNICODE_VERSION,
                Some(name.as_ptr() as *const c_void),
                size_of_val(name.as_slice()) as u32,
            );
        }
    }

    pub fn end_event(&self) {
        unsafe {
            self.cmd_list.EndEvent();
        }
    }
}

/// Inputs of a top level build over `num_instances` instance descs
pub(crate) fn tlas_inputs(
    num_instances: u32,
    allow_update: bool,
    perform_update: bool,
    instances_address: u64,
) -> D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
    let mut flags = D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PREFER_FAST_TRACE;
    if allow_update {
        flags |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_ALLOW_UPDATE;
    }
    if perform_update {
        flags |= D3D12_RAYTRACING_ACCELERATION_STRUCTURE_BUILD_FLAG_PERFORM_UPDATE;
    }

    D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS {
        Type: D3D12_RAYTRACING_ACCELERATION_STRUCTURE_TYPE_TOP_LEVEL,
        Flags: flags,
        NumDescs: num_instances,
        DescsLayout: D3D12_ELEMENTS_LAYOUT_ARRAY,
        Anonymous: D3D12_BUILD_RAYTRACING_ACCELERATION_STRUCTURE_INPUTS_0 {
            InstanceDescs: instances_address,
        },
    }
}
