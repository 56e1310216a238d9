use std::any::Any;
use std::ops::Deref;
use windows::core::*;
use windows::Win32::Foundation::{E_INVALIDARG, E_NOTIMPL, E_OUTOFMEMORY};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use ze_gfx::backend::{
    BlendFactor, BlendOp, CompareOp, CullMode, DescriptorHeapType, DeviceError, MemoryLocation,
    PrimitiveTopology, PrimitiveTopologyType, QueueType, ResourceState, StencilOp,
};
use ze_gfx::{PixelFormat, SampleDesc};

/// Wraps a COM interface so it can live inside `Send + Sync` handles
#[derive(Clone)]
pub struct SendableIUnknown<T: Interface>(pub T);

impl<T: Interface> SendableIUnknown<T> {
    pub fn new(object: T) -> Self {
        Self(object)
    }
}

impl<T: Interface> From<T> for SendableIUnknown<T> {
    fn from(object: T) -> Self {
        Self::new(object)
    }
}

unsafe impl<T: Interface> Send for SendableIUnknown<T> {}
unsafe impl<T: Interface> Sync for SendableIUnknown<T> {}

impl<T: Interface> Deref for SendableIUnknown<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Backend data of a handle. Handles from another device are a programming error
pub fn native<T: 'static>(backend_data: &(dyn Any + Send + Sync)) -> &T {
    backend_data
        .downcast_ref::<T>()
        .expect("handle was not created by a D3D12 device")
}

pub fn native_mut<T: 'static>(backend_data: &mut (dyn Any + Send + Sync)) -> &mut T {
    backend_data
        .downcast_mut::<T>()
        .expect("handle was not created by a D3D12 device")
}

pub fn convert_d3d_error_to_ze_device_error(error: Error) -> DeviceError {
    match error.code() {
        E_OUTOFMEMORY => DeviceError::OutOfMemory,
        E_INVALIDARG | DXGI_ERROR_INVALID_CALL => DeviceError::InvalidParameters,
        E_NOTIMPL | DXGI_ERROR_UNSUPPORTED => DeviceError::Unsupported,
        DXGI_ERROR_DEVICE_REMOVED | DXGI_ERROR_DEVICE_HUNG | DXGI_ERROR_DEVICE_RESET => {
            DeviceError::DeviceLost
        }
        _ => DeviceError::Unknown,
    }
}

pub fn set_resource_name(object: &ID3D12Object, name: &str) {
    let mut wide: Vec<u16> = name.encode_utf16().collect();
    wide.push(0);

    // Names are debugging help only
    unsafe {
        let _ = object.SetName(PCWSTR(wide.as_ptr()));
    }
}

pub fn wide_string(str: &str) -> Vec<u16> {
    str.encode_utf16().chain(std::iter::once(0)).collect()
}

pub fn get_command_list_type_from_queue_type(ty: QueueType) -> D3D12_COMMAND_LIST_TYPE {
    match ty {
        QueueType::Graphics => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueType::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueType::Transfer => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

pub fn get_descriptor_heap_type(ty: DescriptorHeapType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match ty {
        DescriptorHeapType::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapType::Rtv => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapType::Dsv => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

pub fn get_heap_type_from_memory_location(memory_location: MemoryLocation) -> D3D12_HEAP_TYPE {
    match memory_location {
        MemoryLocation::CpuToGpu => D3D12_HEAP_TYPE_UPLOAD,
        MemoryLocation::GpuOnly => D3D12_HEAP_TYPE_DEFAULT,
    }
}

pub fn get_dxgi_format_from_ze_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        PixelFormat::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        PixelFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        PixelFormat::R16Uint => DXGI_FORMAT_R16_UINT,
        PixelFormat::R32Uint => DXGI_FORMAT_R32_UINT,
        PixelFormat::R32Float => DXGI_FORMAT_R32_FLOAT,
        PixelFormat::R16G16Float => DXGI_FORMAT_R16G16_FLOAT,
        PixelFormat::R32G32Uint => DXGI_FORMAT_R32G32_UINT,
        PixelFormat::R32G32Float => DXGI_FORMAT_R32G32_FLOAT,
        PixelFormat::R32G32B32Float => DXGI_FORMAT_R32G32B32_FLOAT,
        PixelFormat::R11G11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        PixelFormat::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        PixelFormat::D16Unorm => DXGI_FORMAT_D16_UNORM,
        PixelFormat::D24UnormS8Uint => DXGI_FORMAT_D24_UNORM_S8_UINT,
        PixelFormat::D32Float => DXGI_FORMAT_D32_FLOAT,
        _ => DXGI_FORMAT_UNKNOWN,
    }
}

/// Storage format of a depth texture that shaders can also read
pub fn get_typeless_depth_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::D16Unorm => DXGI_FORMAT_R16_TYPELESS,
        PixelFormat::D24UnormS8Uint => DXGI_FORMAT_R24G8_TYPELESS,
        PixelFormat::D32Float => DXGI_FORMAT_R32_TYPELESS,
        _ => get_dxgi_format_from_ze_format(format),
    }
}

/// Format shaders see when reading a depth texture
pub fn get_shader_view_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::D16Unorm => DXGI_FORMAT_R16_UNORM,
        PixelFormat::D24UnormS8Uint => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        PixelFormat::D32Float => DXGI_FORMAT_R32_FLOAT,
        _ => get_dxgi_format_from_ze_format(format),
    }
}

/// Flip model swap chains store sRGB back buffers as their linear counterpart
pub fn get_swapchain_storage_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM,
        _ => get_dxgi_format_from_ze_format(format),
    }
}

pub fn get_dxgi_sample_desc_from_ze_sample_desc(sample_desc: SampleDesc) -> DXGI_SAMPLE_DESC {
    DXGI_SAMPLE_DESC {
        Count: sample_desc.count,
        Quality: sample_desc.quality,
    }
}

pub fn get_d3d_resource_states_from_ze_resource_state(
    state: ResourceState,
) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::VertexAndConstantBufferRead => {
            D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER
        }
        ResourceState::IndexBufferRead => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::UnorderedAccessReadWrite => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::RenderTargetWrite => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::PixelShaderRead => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::NonPixelShaderRead => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::ShaderRead => D3D12_RESOURCE_STATES(
            D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE.0
                | D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE.0,
        ),
        ResourceState::IndirectArgument => D3D12_RESOURCE_STATE_INDIRECT_ARGUMENT,
        ResourceState::CopyRead => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyWrite => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::RaytracingAccelerationStructure => {
            D3D12_RESOURCE_STATE_RAYTRACING_ACCELERATION_STRUCTURE
        }
        ResourceState::Present => D3D12_RESOURCE_STATE_PRESENT,
    }
}

pub fn get_d3d_compare_func_from_ze_compare_op(op: CompareOp) -> D3D12_COMPARISON_FUNC {
    match op {
        CompareOp::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareOp::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareOp::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn get_d3d_stencil_op(op: StencilOp) -> D3D12_STENCIL_OP {
    match op {
        StencilOp::Keep => D3D12_STENCIL_OP_KEEP,
        StencilOp::Zero => D3D12_STENCIL_OP_ZERO,
        StencilOp::Replace => D3D12_STENCIL_OP_REPLACE,
    }
}

pub fn get_d3d_cull_mode(mode: CullMode) -> D3D12_CULL_MODE {
    match mode {
        CullMode::None => D3D12_CULL_MODE_NONE,
        CullMode::Front => D3D12_CULL_MODE_FRONT,
        CullMode::Back => D3D12_CULL_MODE_BACK,
    }
}

pub fn get_d3d_blend(factor: BlendFactor) -> D3D12_BLEND {
    match factor {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcColor => D3D12_BLEND_SRC_COLOR,
        BlendFactor::OneMinusSrcColor => D3D12_BLEND_INV_SRC_COLOR,
        BlendFactor::DstColor => D3D12_BLEND_DEST_COLOR,
        BlendFactor::OneMinusDstColor => D3D12_BLEND_INV_DEST_COLOR,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
    }
}

pub fn get_d3d_blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

pub fn get_d3d_primitive_topology_type(ty: PrimitiveTopologyType) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match ty {
        PrimitiveTopologyType::Point => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopologyType::Line => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopologyType::Triangle => D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

pub fn get_d3d_primitive_topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}
