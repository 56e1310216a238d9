use crate::device::resources::{resource_of, D3D12Texture};
use crate::utils::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_gfx::backend::*;
use ze_gfx::PixelFormat;

/// `D3D12_ENCODE_SHADER_4_COMPONENT_MAPPING(0, 1, 2, 3)`
const DEFAULT_SHADER_4_COMPONENT_MAPPING: u32 = 0x1688;

pub(crate) struct D3D12DescriptorHeap {
    pub heap: SendableIUnknown<ID3D12DescriptorHeap>,
}

fn cpu_handle(handle: CpuDescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.ptr }
}

pub(crate) fn create_descriptor_heap(
    device: &ID3D12Device2,
    desc: &DescriptorHeapDesc,
    name: &str,
) -> Result<DescriptorHeap, DeviceError> {
    let shader_visible = desc.shader_visible
        && matches!(
            desc.ty,
            DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler
        );

    let heap: ID3D12DescriptorHeap = unsafe {
        device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
            Type: get_descriptor_heap_type(desc.ty),
            NumDescriptors: desc.capacity,
            Flags: if shader_visible {
                D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
            } else {
                D3D12_DESCRIPTOR_HEAP_FLAG_NONE
            },
            NodeMask: 0,
        })
    }
    .map_err(convert_d3d_error_to_ze_device_error)?;

    if let Ok(object) = windows::core::Interface::cast::<ID3D12Object>(&heap) {
        set_resource_name(&object, name);
    }

    let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
    let gpu_start = if shader_visible {
        Some(GpuDescriptorHandle {
            ptr: unsafe { heap.GetGPUDescriptorHandleForHeapStart() }.ptr,
        })
    } else {
        None
    };

    Ok(DescriptorHeap {
        desc: *desc,
        cpu_start: CpuDescriptorHandle { ptr: cpu_start.ptr },
        gpu_start,
        backend_data: Box::new(D3D12DescriptorHeap { heap: heap.into() }),
    })
}

pub(crate) fn create_shader_resource_view(
    device: &ID3D12Device2,
    desc: &ShaderResourceViewDesc,
    handle: CpuDescriptorHandle,
) {
    let mut view = D3D12_SHADER_RESOURCE_VIEW_DESC {
        Format: get_shader_view_format(desc.format),
        ViewDimension: D3D12_SRV_DIMENSION_UNKNOWN,
        Shader4ComponentMapping: DEFAULT_SHADER_4_COMPONENT_MAPPING,
        Anonymous: Default::default(),
    };

    let mut resource = Some(resource_of(desc.resource));
    match desc.ty {
        ShaderResourceViewType::Buffer(buffer) => {
            view.ViewDimension = D3D12_SRV_DIMENSION_BUFFER;
            view.Anonymous.Buffer = D3D12_BUFFER_SRV {
                FirstElement: buffer.first_element_index as u64,
                NumElements: buffer.element_count,
                StructureByteStride: if desc.format == PixelFormat::Unknown {
                    buffer.element_size_in_bytes
                } else {
                    0
                },
                Flags: D3D12_BUFFER_SRV_FLAG_NONE,
            };
        }
        ShaderResourceViewType::Texture2D(texture) => {
            view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2D;
            view.Anonymous.Texture2D = D3D12_TEX2D_SRV {
                MostDetailedMip: texture.min_mip_level,
                MipLevels: texture.mip_levels,
                PlaneSlice: 0,
                ResourceMinLODClamp: 0.0,
            };
        }
        ShaderResourceViewType::TextureCube(texture) => {
            view.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBE;
            view.Anonymous.TextureCube = D3D12_TEXCUBE_SRV {
                MostDetailedMip: texture.min_mip_level,
                MipLevels: texture.mip_levels,
                ResourceMinLODClamp: 0.0,
            };
        }
        ShaderResourceViewType::RaytracingAccelerationStructure => {
            let ResourceRef::Buffer(buffer) = desc.resource else {
                return;
            };

            // Located by address, the resource itself must not be passed
            resource = None;
            view.Format = DXGI_FORMAT_UNKNOWN;
            view.ViewDimension = D3D12_SRV_DIMENSION_RAYTRACING_ACCELERATION_STRUCTURE;
            view.Anonymous.RaytracingAccelerationStructure =
                D3D12_RAYTRACING_ACCELERATION_STRUCTURE_SRV {
                    Location: buffer.gpu_address,
                };
        }
    }

    unsafe {
        device.CreateShaderResourceView(resource, Some(&view), cpu_handle(handle));
    }
}

pub(crate) fn create_unordered_access_view(
    device: &ID3D12Device2,
    desc: &UnorderedAccessViewDesc,
    handle: CpuDescriptorHandle,
) {
    let mut view = D3D12_UNORDERED_ACCESS_VIEW_DESC {
        Format: get_dxgi_format_from_ze_format(desc.format),
        ViewDimension: D3D12_UAV_DIMENSION_UNKNOWN,
        Anonymous: Default::default(),
    };

    match desc.ty {
        UnorderedAccessViewType::Buffer(buffer) => {
            view.ViewDimension = D3D12_UAV_DIMENSION_BUFFER;
            view.Anonymous.Buffer = D3D12_BUFFER_UAV {
                FirstElement: buffer.first_element_index as u64,
                NumElements: buffer.element_count,
                StructureByteStride: if desc.format == PixelFormat::Unknown {
                    buffer.element_size_in_bytes
                } else {
                    0
                },
                CounterOffsetInBytes: 0,
                Flags: D3D12_BUFFER_UAV_FLAG_NONE,
            };
        }
        UnorderedAccessViewType::Texture2D(texture) => {
            view.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2D;
            view.Anonymous.Texture2D = D3D12_TEX2D_UAV {
                MipSlice: texture.mip_level,
                PlaneSlice: 0,
            };
        }
    }

    unsafe {
        device.CreateUnorderedAccessView(
            resource_of(desc.resource),
            None,
            Some(&view),
            cpu_handle(handle),
        );
    }
}

pub(crate) fn create_render_target_view(
    device: &ID3D12Device2,
    desc: &RenderTargetViewDesc,
    handle: CpuDescriptorHandle,
) {
    let texture = native::<D3D12Texture>(desc.resource.backend_data.as_ref());
    let mut view = D3D12_RENDER_TARGET_VIEW_DESC {
        Format: get_dxgi_format_from_ze_format(desc.format),
        ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
        Anonymous: Default::default(),
    };
    view.Anonymous.Texture2D = D3D12_TEX2D_RTV {
        MipSlice: desc.mip_level,
        PlaneSlice: 0,
    };

    unsafe {
        device.CreateRenderTargetView(&*texture.resource, Some(&view), cpu_handle(handle));
    }
}

pub(crate) fn create_depth_stencil_view(
    device: &ID3D12Device2,
    desc: &DepthStencilViewDesc,
    handle: CpuDescriptorHandle,
) {
    let texture = native::<D3D12Texture>(desc.resource.backend_data.as_ref());
    let mut flags = D3D12_DSV_FLAG_NONE;
    if desc.read_only {
        flags |= D3D12_DSV_FLAG_READ_ONLY_DEPTH;
        if desc.format.has_stencil() {
            flags |= D3D12_DSV_FLAG_READ_ONLY_STENCIL;
        }
    }

    let mut view = D3D12_DEPTH_STENCIL_VIEW_DESC {
        Format: get_dxgi_format_from_ze_format(desc.format),
        ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
        Flags: flags,
        Anonymous: Default::default(),
    };
    view.Anonymous.Texture2D = D3D12_TEX2D_DSV { MipSlice: 0 };

    unsafe {
        device.CreateDepthStencilView(&*texture.resource, Some(&view), cpu_handle(handle));
    }
}

pub(crate) fn copy_descriptors(
    device: &ID3D12Device2,
    count: u32,
    dst: CpuDescriptorHandle,
    src: CpuDescriptorHandle,
    ty: DescriptorHeapType,
) {
    unsafe {
        device.CopyDescriptorsSimple(
            count,
            cpu_handle(dst),
            cpu_handle(src),
            get_descriptor_heap_type(ty),
        );
    }
}
