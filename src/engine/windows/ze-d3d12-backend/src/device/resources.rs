use crate::utils::*;
use windows::core::Interface;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_gfx::backend::*;

pub(crate) struct D3D12Buffer {
    pub resource: SendableIUnknown<ID3D12Resource>,

    /// Upload buffers stay mapped for their whole life
    pub mapped_ptr: Option<*mut u8>,
}

unsafe impl Send for D3D12Buffer {}
unsafe impl Sync for D3D12Buffer {}

pub(crate) struct D3D12Texture {
    pub resource: SendableIUnknown<ID3D12Resource>,
}

/// Native resource behind either kind of handle
pub(crate) fn resource_of<'a>(resource: ResourceRef<'a>) -> &'a ID3D12Resource {
    match resource {
        ResourceRef::Buffer(buffer) => &native::<D3D12Buffer>(buffer.backend_data.as_ref()).resource,
        ResourceRef::Texture(texture) => {
            &native::<D3D12Texture>(texture.backend_data.as_ref()).resource
        }
    }
}

fn heap_properties(memory_location: MemoryLocation) -> D3D12_HEAP_PROPERTIES {
    D3D12_HEAP_PROPERTIES {
        Type: get_heap_type_from_memory_location(memory_location),
        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
        CreationNodeMask: 0,
        VisibleNodeMask: 0,
    }
}

fn create_committed_resource(
    device: &ID3D12Device2,
    memory_location: MemoryLocation,
    desc: &D3D12_RESOURCE_DESC,
    initial_state: D3D12_RESOURCE_STATES,
    clear_value: Option<&D3D12_CLEAR_VALUE>,
    name: &str,
) -> Result<ID3D12Resource, DeviceError> {
    let heap_properties = heap_properties(memory_location);
    let mut resource: Option<ID3D12Resource> = None;
    unsafe {
        device
            .CreateCommittedResource(
                &heap_properties,
                D3D12_HEAP_FLAG_NONE,
                desc,
                initial_state,
                clear_value.map(|value| value as *const _),
                &mut resource,
            )
            .map_err(convert_d3d_error_to_ze_device_error)?;
    }

    let resource = resource.ok_or(DeviceError::Unknown)?;
    if let Ok(object) = resource.cast::<ID3D12Object>() {
        set_resource_name(&object, name);
    }
    Ok(resource)
}

pub(crate) fn create_buffer(
    device: &ID3D12Device2,
    info: &BufferDesc,
    name: &str,
) -> Result<Buffer, DeviceError> {
    if info.size_bytes == 0 {
        return Err(DeviceError::InvalidParameters);
    }

    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if info.usage.contains(BufferUsageFlagBits::UnorderedAccess)
        || info.usage.contains(BufferUsageFlagBits::AccelerationStructure)
    {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }

    let desc = D3D12_RESOURCE_DESC {
        Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
        Alignment: D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64,
        Width: info.size_bytes,
        Height: 1,
        DepthOrArraySize: 1,
        MipLevels: 1,
        Format: DXGI_FORMAT_UNKNOWN,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
        Flags: flags,
    };

    // Upload heaps only accept GENERIC_READ
    let initial_state = match info.memory_location {
        MemoryLocation::CpuToGpu => D3D12_RESOURCE_STATE_GENERIC_READ,
        MemoryLocation::GpuOnly => {
            get_d3d_resource_states_from_ze_resource_state(info.default_resource_state)
        }
    };

    let resource = create_committed_resource(
        device,
        info.memory_location,
        &desc,
        initial_state,
        None,
        name,
    )?;

    let mapped_ptr = if info.memory_location == MemoryLocation::CpuToGpu {
        let mut mapped_ptr = std::ptr::null_mut();
        let range = D3D12_RANGE { Begin: 0, End: 0 };
        unsafe {
            resource
                .Map(0, Some(&range), Some(&mut mapped_ptr))
                .map_err(convert_d3d_error_to_ze_device_error)?;
        }
        Some(mapped_ptr.cast::<u8>())
    } else {
        None
    };

    let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
    Ok(Buffer::new(
        *info,
        gpu_address,
        Box::new(D3D12Buffer {
            resource: resource.into(),
            mapped_ptr,
        }),
    ))
}

pub(crate) fn create_texture(
    device: &ID3D12Device2,
    info: &TextureDesc,
    name: &str,
) -> Result<Texture, DeviceError> {
    if info.width == 0 || info.height == 0 || info.depth == 0 {
        return Err(DeviceError::InvalidParameters);
    }

    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if info.usage_flags.contains(TextureUsageFlagBits::RenderTarget) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if info.usage_flags.contains(TextureUsageFlagBits::DepthStencil) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !info.usage_flags.contains(TextureUsageFlagBits::ShaderResource) {
            flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    if info.usage_flags.contains(TextureUsageFlagBits::UnorderedAccess) {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }

    // Depth textures read by shaders need a typeless storage so both views can exist
    let format = if info.format.is_depth()
        && info.usage_flags.contains(TextureUsageFlagBits::ShaderResource)
    {
        get_typeless_depth_format(info.format)
    } else {
        get_dxgi_format_from_ze_format(info.format)
    };

    let desc = D3D12_RESOURCE_DESC {
        Dimension: match info.dimension {
            TextureDimension::D3 => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
            TextureDimension::D2 | TextureDimension::Cube => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        },
        Alignment: 0,
        Width: info.width as u64,
        Height: info.height,
        DepthOrArraySize: info.depth as u16,
        MipLevels: info.mip_levels as u16,
        Format: format,
        SampleDesc: get_dxgi_sample_desc_from_ze_sample_desc(info.sample_desc),
        Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
        Flags: flags,
    };

    let clear_value = info.clear_value.map(|value| match value {
        ClearValue::Color(color) => D3D12_CLEAR_VALUE {
            Format: get_dxgi_format_from_ze_format(info.format),
            Anonymous: D3D12_CLEAR_VALUE_0 { Color: color },
        },
        ClearValue::DepthStencil((depth, stencil)) => D3D12_CLEAR_VALUE {
            Format: get_dxgi_format_from_ze_format(info.format),
            Anonymous: D3D12_CLEAR_VALUE_0 {
                DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                    Depth: depth,
                    Stencil: stencil,
                },
            },
        },
    });

    let resource = create_committed_resource(
        device,
        info.memory_location,
        &desc,
        get_d3d_resource_states_from_ze_resource_state(info.default_resource_state),
        clear_value.as_ref(),
        name,
    )?;

    Ok(Texture::new(
        *info,
        Box::new(D3D12Texture {
            resource: resource.into(),
        }),
    ))
}
