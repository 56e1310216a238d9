use crate::{PixelFormat, SampleDesc, ShaderStageFlagBits};
use enumflags2::{bitflags, BitFlags};
use raw_window_handle::RawWindowHandle;
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use ze_core::maths::{RectI32, Vec2f32};

#[derive(Ord, PartialOrd, Eq, PartialEq, Debug)]
pub enum BackendError {
    Unsupported,
}

impl Display for BackendError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Unsupported => write!(f, "no compatible graphics adapter found"),
        }
    }
}

impl std::error::Error for BackendError {}

pub trait Backend: Send + Sync {
    fn create_device(&self) -> Result<Arc<dyn Device>, BackendError>;
    fn name(&self) -> &str;
}

#[derive(Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Debug)]
pub enum DeviceError {
    Unknown,
    OutOfMemory,
    InvalidParameters,
    Unsupported,
    /// The device stopped answering (removed, hung or a bounded wait expired)
    DeviceLost,
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceError::Unknown => write!(f, "unknown device error"),
            DeviceError::OutOfMemory => write!(f, "device out of memory"),
            DeviceError::InvalidParameters => write!(f, "invalid parameters"),
            DeviceError::Unsupported => write!(f, "unsupported by this device"),
            DeviceError::DeviceLost => write!(f, "device lost"),
        }
    }
}

impl std::error::Error for DeviceError {}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

impl Display for QueueType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueType::Graphics => write!(f, "Render"),
            QueueType::Compute => write!(f, "Compute"),
            QueueType::Transfer => write!(f, "Copy"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceCaps {
    pub raytracing: bool,
    pub mesh_shaders: bool,
}

#[bitflags]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum FormatSupportFlagBits {
    ShaderResource = 1 << 0,
    RenderTarget = 1 << 1,
    DepthStencil = 1 << 2,
    UnorderedAccess = 1 << 3,
}
pub type FormatSupportFlags = BitFlags<FormatSupportFlagBits>;

#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash)]
pub enum ResourceState {
    Common,
    VertexAndConstantBufferRead,
    IndexBufferRead,
    UnorderedAccessReadWrite,
    RenderTargetWrite,
    DepthRead,
    DepthWrite,
    PixelShaderRead,
    NonPixelShaderRead,
    /// Readable from every shader stage
    ShaderRead,
    IndirectArgument,
    CopyRead,
    CopyWrite,
    GenericRead,
    RaytracingAccelerationStructure,
    Present,
}

#[derive(Copy, Clone)]
pub enum ResourceRef<'a> {
    Buffer(&'a Buffer),
    Texture(&'a Texture),
}

impl<'a> ResourceRef<'a> {
    pub fn backend_data(&self) -> &'a (dyn Any + Send + Sync) {
        match self {
            ResourceRef::Buffer(buffer) => buffer.backend_data.as_ref(),
            ResourceRef::Texture(texture) => texture.backend_data.as_ref(),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum BarrierSplit {
    None,
    Begin,
    End,
}

#[derive(Copy, Clone)]
pub struct ResourceTransitionBarrier<'a> {
    pub resource: ResourceRef<'a>,
    pub source_state: ResourceState,
    pub dest_state: ResourceState,
    pub split: BarrierSplit,
}

#[derive(Copy, Clone)]
pub enum ResourceBarrier<'a> {
    Transition(ResourceTransitionBarrier<'a>),
    /// A `None` resource orders every UAV access of the queue
    UnorderedAccess(Option<ResourceRef<'a>>),
    Aliasing {
        before: Option<ResourceRef<'a>>,
        after: Option<ResourceRef<'a>>,
    },
}

impl<'a> Default for ResourceBarrier<'a> {
    fn default() -> Self {
        ResourceBarrier::UnorderedAccess(None)
    }
}

// Descriptors
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum DescriptorHeapType {
    CbvSrvUav,
    Sampler,
    Rtv,
    Dsv,
}

#[derive(Copy, Clone, Debug)]
pub struct DescriptorHeapDesc {
    pub ty: DescriptorHeapType,
    pub capacity: u32,
    pub shader_visible: bool,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct CpuDescriptorHandle {
    pub ptr: usize,
}

impl CpuDescriptorHandle {
    pub fn offset(&self, index: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (index as usize) * (increment_size as usize),
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct GpuDescriptorHandle {
    pub ptr: u64,
}

impl GpuDescriptorHandle {
    pub fn offset(&self, index: u32, increment_size: u32) -> Self {
        Self {
            ptr: self.ptr + (index as u64) * (increment_size as u64),
        }
    }
}

pub struct DescriptorHeap {
    pub desc: DescriptorHeapDesc,
    pub cpu_start: CpuDescriptorHandle,
    /// Only set for shader-visible heaps
    pub gpu_start: Option<GpuDescriptorHandle>,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

// Views
#[derive(Clone, Copy, Debug)]
pub struct BufferSRV {
    pub first_element_index: u32,
    pub element_count: u32,
    pub element_size_in_bytes: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct Texture2DSRV {
    pub min_mip_level: u32,
    pub mip_levels: u32,
}

#[derive(Clone, Copy, Debug)]
pub enum ShaderResourceViewType {
    Buffer(BufferSRV),
    Texture2D(Texture2DSRV),
    TextureCube(Texture2DSRV),
    RaytracingAccelerationStructure,
}

#[derive(Clone, Copy)]
pub struct ShaderResourceViewDesc<'a> {
    pub resource: ResourceRef<'a>,
    pub format: PixelFormat,
    pub ty: ShaderResourceViewType,
}

#[derive(Clone, Copy, Debug)]
pub struct BufferUAV {
    pub first_element_index: u32,
    pub element_count: u32,
    pub element_size_in_bytes: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct Texture2DUAV {
    pub mip_level: u32,
}

#[derive(Clone, Copy, Debug)]
pub enum UnorderedAccessViewType {
    Buffer(BufferUAV),
    Texture2D(Texture2DUAV),
}

#[derive(Clone, Copy)]
pub struct UnorderedAccessViewDesc<'a> {
    pub resource: ResourceRef<'a>,
    pub format: PixelFormat,
    pub ty: UnorderedAccessViewType,
}

#[derive(Clone, Copy)]
pub struct RenderTargetViewDesc<'a> {
    pub resource: &'a Texture,
    pub format: PixelFormat,
    pub mip_level: u32,
}

#[derive(Clone, Copy)]
pub struct DepthStencilViewDesc<'a> {
    pub resource: &'a Texture,
    pub format: PixelFormat,
    pub read_only: bool,
}

// Pipeline states
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PipelineBindPoint {
    Graphics,
    Compute,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimitiveTopologyType {
    Point,
    Line,
    Triangle,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BlendOp {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PipelineRenderTargetBlendDesc {
    pub enable_blend: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
}

impl PipelineRenderTargetBlendDesc {
    pub fn alpha_blend() -> Self {
        Self {
            enable_blend: true,
            src_color_blend_factor: BlendFactor::SrcAlpha,
            dst_color_blend_factor: BlendFactor::OneMinusSrcAlpha,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::OneMinusSrcAlpha,
            alpha_blend_op: BlendOp::Add,
        }
    }

    pub fn additive() -> Self {
        Self {
            enable_blend: true,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::One,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::One,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

impl Default for PipelineRenderTargetBlendDesc {
    fn default() -> Self {
        Self {
            enable_blend: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct PipelineDepthStencilState {
    pub enable_depth_test: bool,
    pub enable_depth_write: bool,
    pub depth_compare_op: CompareOp,
    pub enable_stencil_test: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub stencil_compare_op: CompareOp,
    pub stencil_pass_op: StencilOp,
}

impl Default for PipelineDepthStencilState {
    fn default() -> Self {
        Self {
            enable_depth_test: true,
            enable_depth_write: true,
            depth_compare_op: CompareOp::Less,
            enable_stencil_test: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            stencil_compare_op: CompareOp::Always,
            stencil_pass_op: StencilOp::Keep,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PipelineRasterizerState {
    pub cull_mode: CullMode,
    pub wireframe: bool,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
}

impl Default for PipelineRasterizerState {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            wireframe: false,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct InputElementDesc {
    pub semantic_name: &'static str,
    pub semantic_index: u32,
    pub format: PixelFormat,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
}

/// Fixed-function part of a graphics pipeline. Owned so reloadable pipelines can keep it around
#[derive(Clone, PartialEq, Debug)]
pub struct GraphicsPipelineStates {
    pub input_layout: Vec<InputElementDesc>,
    pub primitive_topology_type: PrimitiveTopologyType,
    pub render_target_formats: Vec<PixelFormat>,
    pub depth_stencil_format: PixelFormat,
    pub rasterizer: PipelineRasterizerState,
    pub depth_stencil: PipelineDepthStencilState,
    pub blend: Vec<PipelineRenderTargetBlendDesc>,
    pub sample_desc: SampleDesc,
}

impl Default for GraphicsPipelineStates {
    fn default() -> Self {
        Self {
            input_layout: vec![],
            primitive_topology_type: PrimitiveTopologyType::Triangle,
            render_target_formats: vec![],
            depth_stencil_format: PixelFormat::Unknown,
            rasterizer: PipelineRasterizerState::default(),
            depth_stencil: PipelineDepthStencilState::default(),
            blend: vec![],
            sample_desc: SampleDesc::default(),
        }
    }
}

#[derive(Clone, Copy)]
pub struct PipelineShaderStage<'a> {
    pub stage: ShaderStageFlagBits,
    pub bytecode: &'a [u8],
}

pub struct GraphicsPipelineDesc<'a> {
    pub root_signature: &'a RootSignature,
    pub shaders: &'a [PipelineShaderStage<'a>],
    pub states: &'a GraphicsPipelineStates,
}

pub struct ComputePipelineDesc<'a> {
    pub root_signature: &'a RootSignature,
    pub bytecode: &'a [u8],
}

#[derive(Clone, Copy, Debug)]
pub struct HitGroupDesc<'a> {
    pub name: &'a str,
    pub closest_hit: Option<&'a str>,
    pub any_hit: Option<&'a str>,
}

pub struct RaytracingPipelineDesc<'a> {
    pub global_root_signature: &'a RootSignature,
    pub library: &'a [u8],
    pub raygen: &'a str,
    pub miss: &'a [&'a str],
    pub hit_groups: &'a [HitGroupDesc<'a>],
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

pub struct RootSignature {
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl RootSignature {
    pub fn new(backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { backend_data }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PipelineKind {
    Graphics,
    Compute,
    Raytracing,
}

pub struct PipelineState {
    pub kind: PipelineKind,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl PipelineState {
    pub fn new(kind: PipelineKind, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { kind, backend_data }
    }
}

// Command parameters
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Viewport {
    pub position: Vec2f32,
    pub size: Vec2f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            position: Vec2f32::new(x, y),
            size: Vec2f32::new(width, height),
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum IndexBufferFormat {
    Uint16,
    Uint32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct VertexBufferView {
    pub address: u64,
    pub size_in_bytes: u32,
    pub stride_in_bytes: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct IndexBufferView {
    pub address: u64,
    pub size_in_bytes: u32,
    pub format: IndexBufferFormat,
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ClearValue {
    Color([f32; 4]),
    DepthStencil((f32, u8)),
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct ShaderTableRange {
    pub address: u64,
    pub size_in_bytes: u64,
    pub stride_in_bytes: u64,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct DispatchRaysDesc {
    pub raygen: ShaderTableRange,
    pub miss: ShaderTableRange,
    pub hit_groups: ShaderTableRange,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct AccelerationStructurePrebuildInfo {
    pub result_data_max_size_in_bytes: u64,
    pub scratch_data_size_in_bytes: u64,
    pub update_scratch_data_size_in_bytes: u64,
}

/// Top level acceleration structure build. `source_address` is set for in-place refits
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AccelerationStructureBuildDesc {
    pub dest_address: u64,
    pub scratch_address: u64,
    pub instances_address: u64,
    pub num_instances: u32,
    pub allow_update: bool,
    pub source_address: Option<u64>,
}

pub const MAX_RENDER_PASS_RENDER_TARGET_COUNT: usize = 8;
pub const RAYTRACING_SHADER_IDENTIFIER_SIZE: usize = 32;

/// Native graphics device. Recording methods (`cmd_*`) must be called on a list in recording state
pub trait Device: Send + Sync {
    fn name(&self) -> &str;
    fn caps(&self) -> DeviceCaps;
    fn format_support(&self, format: PixelFormat) -> FormatSupportFlags;
    fn descriptor_handle_increment_size(&self, ty: DescriptorHeapType) -> u32;

    // Queues and fences
    fn create_command_queue(&self, ty: QueueType, name: &str) -> Result<CommandQueue, DeviceError>;
    fn create_fence(&self, initial_value: u64) -> Result<Fence, DeviceError>;
    fn fence_completed_value(&self, fence: &Fence) -> u64;

    /// Block the calling thread until `fence` reaches `value`. `None` waits forever
    fn wait_for_fence(
        &self,
        fence: &Fence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), DeviceError>;
    fn queue_signal(
        &self,
        queue: &CommandQueue,
        fence: &Fence,
        value: u64,
    ) -> Result<(), DeviceError>;

    /// GPU side wait, the CPU never blocks
    fn queue_wait(&self, queue: &CommandQueue, fence: &Fence, value: u64)
        -> Result<(), DeviceError>;
    fn queue_execute(&self, queue: &CommandQueue, command_lists: &[&CommandList]);

    // Command recording objects
    fn create_command_allocator(&self, ty: QueueType) -> Result<CommandAllocator, DeviceError>;
    fn reset_command_allocator(&self, allocator: &CommandAllocator) -> Result<(), DeviceError>;

    /// Lists are created closed
    fn create_command_list(
        &self,
        ty: QueueType,
        allocator: &CommandAllocator,
    ) -> Result<CommandList, DeviceError>;
    fn reset_command_list(
        &self,
        cmd_list: &mut CommandList,
        allocator: &CommandAllocator,
    ) -> Result<(), DeviceError>;
    fn close_command_list(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError>;

    // Descriptors
    fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        name: &str,
    ) -> Result<DescriptorHeap, DeviceError>;
    fn create_shader_resource_view(
        &self,
        desc: &ShaderResourceViewDesc,
        handle: CpuDescriptorHandle,
    );
    fn create_unordered_access_view(
        &self,
        desc: &UnorderedAccessViewDesc,
        handle: CpuDescriptorHandle,
    );
    fn create_render_target_view(&self, desc: &RenderTargetViewDesc, handle: CpuDescriptorHandle);
    fn create_depth_stencil_view(&self, desc: &DepthStencilViewDesc, handle: CpuDescriptorHandle);
    fn copy_descriptors(
        &self,
        count: u32,
        dst: CpuDescriptorHandle,
        src: CpuDescriptorHandle,
        ty: DescriptorHeapType,
    );

    // Resources
    fn create_buffer(&self, desc: &BufferDesc, name: &str) -> Result<Buffer, DeviceError>;
    fn create_texture(&self, desc: &TextureDesc, name: &str) -> Result<Texture, DeviceError>;
    fn buffer_mapped_ptr(&self, buffer: &Buffer) -> Option<*mut u8>;

    // Pipelines
    fn create_root_signature(&self, blob: &[u8], name: &str)
        -> Result<RootSignature, DeviceError>;
    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError>;
    fn create_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError>;
    fn create_raytracing_pipeline(
        &self,
        desc: &RaytracingPipelineDesc,
        name: &str,
    ) -> Result<PipelineState, DeviceError>;
    fn raytracing_shader_identifier(
        &self,
        pipeline: &PipelineState,
        export: &str,
    ) -> Option<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]>;
    fn tlas_prebuild_info(&self, num_instances: u32, allow_update: bool)
        -> AccelerationStructurePrebuildInfo;

    // Swapchain functions
    /// `window` is `None` for off-screen swap chains (only supported by some devices)
    fn create_swapchain(
        &self,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
        queue: &CommandQueue,
        old_swapchain: Option<SwapChain>,
    ) -> Result<SwapChain, DeviceError>;
    fn swapchain_backbuffer_count(&self, swapchain: &SwapChain) -> usize;
    fn swapchain_backbuffer_index(&self, swapchain: &SwapChain) -> u32;
    fn swapchain_backbuffer(
        &self,
        swapchain: &SwapChain,
        index: u32,
    ) -> Result<Arc<Texture>, DeviceError>;
    fn present(&self, swapchain: &SwapChain) -> Result<(), DeviceError>;

    // Barriers and bindings
    fn cmd_resource_barrier(&self, cmd_list: &mut CommandList, barriers: &[ResourceBarrier]);
    fn cmd_set_descriptor_heaps(&self, cmd_list: &mut CommandList, heaps: &[&DescriptorHeap]);
    fn cmd_set_pipeline_state(&self, cmd_list: &mut CommandList, pipeline: &PipelineState);
    fn cmd_set_root_signature(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        root_signature: &RootSignature,
    );
    fn cmd_set_root_constants(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        data: &[u32],
    );
    fn cmd_set_root_constant_buffer(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    );
    fn cmd_set_root_shader_resource(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    );
    fn cmd_set_root_unordered_access(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        address: u64,
    );
    fn cmd_set_root_descriptor_table(
        &self,
        cmd_list: &mut CommandList,
        bind_point: PipelineBindPoint,
        parameter: u32,
        handle: GpuDescriptorHandle,
    );

    // Render targets
    fn cmd_set_render_targets(
        &self,
        cmd_list: &mut CommandList,
        render_targets: &[CpuDescriptorHandle],
        depth_stencil: Option<CpuDescriptorHandle>,
    );
    fn cmd_clear_render_target(
        &self,
        cmd_list: &mut CommandList,
        render_target: CpuDescriptorHandle,
        color: [f32; 4],
    );
    fn cmd_clear_depth_stencil(
        &self,
        cmd_list: &mut CommandList,
        depth_stencil: CpuDescriptorHandle,
        depth: f32,
        stencil: Option<u8>,
    );
    fn cmd_set_viewports(&self, cmd_list: &mut CommandList, viewports: &[Viewport]);
    fn cmd_set_scissors(&self, cmd_list: &mut CommandList, scissors: &[RectI32]);
    fn cmd_set_primitive_topology(&self, cmd_list: &mut CommandList, topology: PrimitiveTopology);
    fn cmd_set_vertex_buffers(
        &self,
        cmd_list: &mut CommandList,
        start_slot: u32,
        views: &[VertexBufferView],
    );
    fn cmd_set_index_buffer(&self, cmd_list: &mut CommandList, view: &IndexBufferView);
    fn cmd_set_stencil_ref(&self, cmd_list: &mut CommandList, value: u32);

    // Work
    fn cmd_draw(
        &self,
        cmd_list: &mut CommandList,
        vertex_count_per_instance: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        cmd_list: &mut CommandList,
        index_count_per_instance: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );
    fn cmd_dispatch(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32);
    fn cmd_dispatch_mesh(&self, cmd_list: &mut CommandList, x: u32, y: u32, z: u32);
    fn cmd_dispatch_rays(&self, cmd_list: &mut CommandList, desc: &DispatchRaysDesc);
    fn cmd_build_acceleration_structure(
        &self,
        cmd_list: &mut CommandList,
        desc: &AccelerationStructureBuildDesc,
    );

    // Transfer functions
    fn cmd_copy_buffer_region(
        &self,
        cmd_list: &mut CommandList,
        dst: &Buffer,
        dst_offset: u64,
        src: &Buffer,
        src_offset: u64,
        size: u64,
    );
    fn cmd_copy_resource(&self, cmd_list: &mut CommandList, dst: ResourceRef, src: ResourceRef);

    // Debug functions
    fn cmd_debug_begin_event(&self, cmd_list: &mut CommandList, name: &str);
    fn cmd_debug_end_event(&self, cmd_list: &mut CommandList);
}

// Resources
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemoryLocation {
    CpuToGpu,
    GpuOnly,
}

#[bitflags]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum BufferUsageFlagBits {
    UnorderedAccess = 1 << 0,
    IndexBuffer = 1 << 1,
    VertexBuffer = 1 << 2,
    ConstantBuffer = 1 << 3,
    ShaderResource = 1 << 4,
    AccelerationStructure = 1 << 5,
}
pub type BufferUsageFlags = BitFlags<BufferUsageFlagBits>;

/// Data describing a buffer, persistent and always accessible from the buffer
#[derive(Copy, Clone, Debug)]
pub struct BufferDesc {
    pub size_bytes: u64,
    pub usage: BufferUsageFlags,
    pub memory_location: MemoryLocation,
    pub default_resource_state: ResourceState,
}

pub struct Buffer {
    pub desc: BufferDesc,
    pub gpu_address: u64,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl Buffer {
    pub fn new(desc: BufferDesc, gpu_address: u64, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            desc,
            gpu_address,
            backend_data,
        }
    }
}

#[bitflags]
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug)]
#[repr(u32)]
pub enum TextureUsageFlagBits {
    ShaderResource = 1 << 0,
    UnorderedAccess = 1 << 1,
    RenderTarget = 1 << 2,
    DepthStencil = 1 << 3,
}
pub type TextureUsageFlags = BitFlags<TextureUsageFlagBits>;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TextureDimension {
    D2,
    D3,
    Cube,
}

#[derive(Copy, Clone, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Depth for 3D textures, array size otherwise (6 for a single cube)
    pub depth: u32,
    pub mip_levels: u32,
    pub dimension: TextureDimension,
    pub format: PixelFormat,
    pub sample_desc: SampleDesc,
    pub usage_flags: TextureUsageFlags,
    pub memory_location: MemoryLocation,
    pub default_resource_state: ResourceState,
    pub clear_value: Option<ClearValue>,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: PixelFormat, usage: TextureUsageFlags) -> Self {
        Self {
            width,
            height,
            depth: 1,
            mip_levels: 1,
            dimension: TextureDimension::D2,
            format,
            sample_desc: SampleDesc::default(),
            usage_flags: usage,
            memory_location: MemoryLocation::GpuOnly,
            default_resource_state: ResourceState::Common,
            clear_value: None,
        }
    }
}

pub struct Texture {
    pub desc: TextureDesc,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl Texture {
    pub fn new(desc: TextureDesc, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { desc, backend_data }
    }
}

pub struct CommandQueue {
    pub ty: QueueType,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl CommandQueue {
    pub fn new(ty: QueueType, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { ty, backend_data }
    }
}

pub struct Fence {
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl Fence {
    pub fn new(backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { backend_data }
    }
}

pub struct CommandAllocator {
    pub ty: QueueType,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl CommandAllocator {
    pub fn new(ty: QueueType, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { ty, backend_data }
    }
}

pub struct CommandList {
    pub ty: QueueType,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl CommandList {
    pub fn new(ty: QueueType, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { ty, backend_data }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SwapChainDesc {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
}

pub struct SwapChain {
    pub desc: SwapChainDesc,
    pub backend_data: Box<dyn Any + Send + Sync>,
}

impl SwapChain {
    pub fn new(desc: SwapChainDesc, backend_data: Box<dyn Any + Send + Sync>) -> Self {
        Self { desc, backend_data }
    }
}
