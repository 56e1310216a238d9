use crate::utils::*;
use std::ffi::{c_void, CString};
use std::mem::size_of_val;
use std::ops::{Deref, DerefMut};
use windows::core::{Interface, PCSTR, PCWSTR};
use windows::Win32::Foundation::BOOL;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use ze_gfx::backend::*;
use ze_gfx::ShaderStageFlagBits;

pub(crate) struct D3D12RootSignature {
    pub root_signature: SendableIUnknown<ID3D12RootSignature>,
}

pub(crate) enum D3D12Pipeline {
    PipelineState(SendableIUnknown<ID3D12PipelineState>),
    StateObject(SendableIUnknown<ID3D12StateObject>),
}

/// One subobject of a pipeline state stream
#[repr(C, align(8))]
struct PipelineTypedField<T> {
    subobject_type: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE,
    value: T,
}

impl<T> PipelineTypedField<T> {
    fn new(subobject_type: D3D12_PIPELINE_STATE_SUBOBJECT_TYPE, value: T) -> Self {
        Self {
            subobject_type,
            value,
        }
    }
}

impl<T> Deref for PipelineTypedField<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> DerefMut for PipelineTypedField<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

/// Fixed-function subobjects shared by vertex and mesh pipelines
#[repr(C)]
struct GraphicsStatesStream {
    blend_state: PipelineTypedField<D3D12_BLEND_DESC>,
    sample_mask: PipelineTypedField<u32>,
    rasterizer_state: PipelineTypedField<D3D12_RASTERIZER_DESC>,
    depth_stencil_state: PipelineTypedField<D3D12_DEPTH_STENCIL_DESC>,
    primitive_topology_type: PipelineTypedField<D3D12_PRIMITIVE_TOPOLOGY_TYPE>,
    rtv_formats: PipelineTypedField<D3D12_RT_FORMAT_ARRAY>,
    dsv_format: PipelineTypedField<DXGI_FORMAT>,
    sample_desc: PipelineTypedField<DXGI_SAMPLE_DESC>,
}

#[repr(C)]
struct VertexPipelineStream {
    root_signature: PipelineTypedField<ID3D12RootSignature>,
    input_layout: PipelineTypedField<D3D12_INPUT_LAYOUT_DESC>,
    vertex_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
    pixel_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
    states: GraphicsStatesStream,
}

#[repr(C)]
struct MeshPipelineStream {
    root_signature: PipelineTypedField<ID3D12RootSignature>,
    amplification_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
    mesh_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
    pixel_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
    states: GraphicsStatesStream,
}

#[repr(C)]
struct ComputePipelineStream {
    root_signature: PipelineTypedField<ID3D12RootSignature>,
    compute_shader: PipelineTypedField<D3D12_SHADER_BYTECODE>,
}

fn bytecode(bytecode: &[u8]) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: bytecode.as_ptr() as *const c_void,
        BytecodeLength: bytecode.len(),
    }
}

fn stage_bytecode(shaders: &[PipelineShaderStage], stage: ShaderStageFlagBits) -> D3D12_SHADER_BYTECODE {
    shaders
        .iter()
        .find(|shader| shader.stage == stage)
        .map_or(D3D12_SHADER_BYTECODE::default(), |shader| bytecode(shader.bytecode))
}

fn root_signature_of(root_signature: &RootSignature) -> ID3D12RootSignature {
    native::<D3D12RootSignature>(root_signature.backend_data.as_ref())
        .root_signature
        .0
        .clone()
}

fn create_pipeline_state<S>(
    device: &ID3D12Device2,
    stream: &S,
    name: &str,
) -> Result<PipelineState, DeviceError> {
    let stream_desc = D3D12_PIPELINE_STATE_STREAM_DESC {
        SizeInBytes: size_of_val(stream),
        pPipelineStateSubobjectStream: stream as *const S as *mut c_void,
    };

    let pipeline: ID3D12PipelineState = unsafe { device.CreatePipelineState(&stream_desc) }
        .map_err(convert_d3d_error_to_ze_device_error)?;
    if let Ok(object) = pipeline.cast::<ID3D12Object>() {
        set_resource_name(&object, name);
    }

    Ok(PipelineState::new(
        PipelineKind::Graphics,
        Box::new(D3D12Pipeline::PipelineState(pipeline.into())),
    ))
}

pub(crate) fn create_root_signature(
    device: &ID3D12Device2,
    blob: &[u8],
    name: &str,
) -> Result<RootSignature, DeviceError> {
    let root_signature: ID3D12RootSignature = unsafe { device.CreateRootSignature(0, blob) }
        .map_err(convert_d3d_error_to_ze_device_error)?;
    if let Ok(object) = root_signature.cast::<ID3D12Object>() {
        set_resource_name(&object, name);
    }

    Ok(RootSignature::new(Box::new(D3D12RootSignature {
        root_signature: root_signature.into(),
    })))
}

fn graphics_states_stream(states: &GraphicsPipelineStates) -> GraphicsStatesStream {
    let mut blend_desc = D3D12_BLEND_DESC {
        AlphaToCoverageEnable: BOOL::from(false),
        IndependentBlendEnable: BOOL::from(states.blend.len() > 1),
        RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: BOOL::from(false),
            LogicOpEnable: BOOL::from(false),
            SrcBlend: D3D12_BLEND_ONE,
            DestBlend: D3D12_BLEND_ZERO,
            BlendOp: D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: D3D12_BLEND_ONE,
            DestBlendAlpha: D3D12_BLEND_ZERO,
            BlendOpAlpha: D3D12_BLEND_OP_ADD,
            LogicOp: D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
        }; MAX_RENDER_PASS_RENDER_TARGET_COUNT],
    };

    for (target, blend) in blend_desc.RenderTarget.iter_mut().zip(&states.blend) {
        target.BlendEnable = BOOL::from(blend.enable_blend);
        target.SrcBlend = get_d3d_blend(blend.src_color_blend_factor);
        target.DestBlend = get_d3d_blend(blend.dst_color_blend_factor);
        target.BlendOp = get_d3d_blend_op(blend.color_blend_op);
        target.SrcBlendAlpha = get_d3d_blend(blend.src_alpha_blend_factor);
        target.DestBlendAlpha = get_d3d_blend(blend.dst_alpha_blend_factor);
        target.BlendOpAlpha = get_d3d_blend_op(blend.alpha_blend_op);
    }

    let rasterizer = &states.rasterizer;
    let depth_stencil = &states.depth_stencil;
    let stencil_op = D3D12_DEPTH_STENCILOP_DESC {
        StencilFailOp: D3D12_STENCIL_OP_KEEP,
        StencilDepthFailOp: D3D12_STENCIL_OP_KEEP,
        StencilPassOp: get_d3d_stencil_op(depth_stencil.stencil_pass_op),
        StencilFunc: get_d3d_compare_func_from_ze_compare_op(depth_stencil.stencil_compare_op),
    };

    let mut rtv_formats = D3D12_RT_FORMAT_ARRAY {
        RTFormats: [DXGI_FORMAT_UNKNOWN; MAX_RENDER_PASS_RENDER_TARGET_COUNT],
        NumRenderTargets: states.render_target_formats.len() as u32,
    };
    for (dst, format) in rtv_formats
        .RTFormats
        .iter_mut()
        .zip(&states.render_target_formats)
    {
        *dst = get_dxgi_format_from_ze_format(*format);
    }

    GraphicsStatesStream {
        blend_state: PipelineTypedField::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_BLEND, blend_desc),
        sample_mask: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_MASK,
            u32::MAX,
        ),
        rasterizer_state: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RASTERIZER,
            D3D12_RASTERIZER_DESC {
                FillMode: if rasterizer.wireframe {
                    D3D12_FILL_MODE_WIREFRAME
                } else {
                    D3D12_FILL_MODE_SOLID
                },
                CullMode: get_d3d_cull_mode(rasterizer.cull_mode),
                FrontCounterClockwise: BOOL::from(true),
                DepthBias: rasterizer.depth_bias,
                DepthBiasClamp: 0.0,
                SlopeScaledDepthBias: rasterizer.slope_scaled_depth_bias,
                DepthClipEnable: BOOL::from(rasterizer.depth_clip),
                MultisampleEnable: BOOL::from(states.sample_desc.count > 1),
                AntialiasedLineEnable: BOOL::from(false),
                ForcedSampleCount: 0,
                ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
            },
        ),
        depth_stencil_state: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL,
            D3D12_DEPTH_STENCIL_DESC {
                DepthEnable: BOOL::from(depth_stencil.enable_depth_test),
                DepthWriteMask: if depth_stencil.enable_depth_write {
                    D3D12_DEPTH_WRITE_MASK_ALL
                } else {
                    D3D12_DEPTH_WRITE_MASK_ZERO
                },
                DepthFunc: get_d3d_compare_func_from_ze_compare_op(depth_stencil.depth_compare_op),
                StencilEnable: BOOL::from(depth_stencil.enable_stencil_test),
                StencilReadMask: depth_stencil.stencil_read_mask,
                StencilWriteMask: depth_stencil.stencil_write_mask,
                FrontFace: stencil_op,
                BackFace: stencil_op,
            },
        ),
        primitive_topology_type: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PRIMITIVE_TOPOLOGY,
            get_d3d_primitive_topology_type(states.primitive_topology_type),
        ),
        rtv_formats: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_RENDER_TARGET_FORMATS,
            rtv_formats,
        ),
        dsv_format: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_DEPTH_STENCIL_FORMAT,
            get_dxgi_format_from_ze_format(states.depth_stencil_format),
        ),
        sample_desc: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_SAMPLE_DESC,
            get_dxgi_sample_desc_from_ze_sample_desc(states.sample_desc),
        ),
    }
}

pub(crate) fn create_graphics_pipeline(
    device: &ID3D12Device2,
    desc: &GraphicsPipelineDesc,
    name: &str,
) -> Result<PipelineState, DeviceError> {
    if desc.states.render_target_formats.len() > MAX_RENDER_PASS_RENDER_TARGET_COUNT {
        return Err(DeviceError::InvalidParameters);
    }

    let root_signature = root_signature_of(desc.root_signature);
    let states = graphics_states_stream(desc.states);
    let pixel_shader = stage_bytecode(desc.shaders, ShaderStageFlagBits::Pixel);

    if desc
        .shaders
        .iter()
        .any(|shader| shader.stage == ShaderStageFlagBits::Mesh)
    {
        let stream = MeshPipelineStream {
            root_signature: PipelineTypedField::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
                root_signature,
            ),
            amplification_shader: PipelineTypedField::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_AS,
                stage_bytecode(desc.shaders, ShaderStageFlagBits::Amplification),
            ),
            mesh_shader: PipelineTypedField::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_MS,
                stage_bytecode(desc.shaders, ShaderStageFlagBits::Mesh),
            ),
            pixel_shader: PipelineTypedField::new(
                D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PS,
                pixel_shader,
            ),
            states,
        };
        return create_pipeline_state(device, &stream, name);
    }

    // Semantic names must outlive the call
    let semantic_names = desc
        .states
        .input_layout
        .iter()
        .map(|element| CString::new(element.semantic_name))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| DeviceError::InvalidParameters)?;

    let input_elements: Vec<D3D12_INPUT_ELEMENT_DESC> = desc
        .states
        .input_layout
        .iter()
        .zip(&semantic_names)
        .map(|(element, semantic_name)| D3D12_INPUT_ELEMENT_DESC {
            SemanticName: PCSTR(semantic_name.as_ptr() as *const u8),
            SemanticIndex: element.semantic_index,
            Format: get_dxgi_format_from_ze_format(element.format),
            InputSlot: element.input_slot,
            AlignedByteOffset: element.aligned_byte_offset,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        })
        .collect();

    let stream = VertexPipelineStream {
        root_signature: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
            root_signature,
        ),
        input_layout: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_INPUT_LAYOUT,
            D3D12_INPUT_LAYOUT_DESC {
                pInputElementDescs: input_elements.as_ptr(),
                NumElements: input_elements.len() as u32,
            },
        ),
        vertex_shader: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_VS,
            stage_bytecode(desc.shaders, ShaderStageFlagBits::Vertex),
        ),
        pixel_shader: PipelineTypedField::new(D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_PS, pixel_shader),
        states,
    };

    if stream.vertex_shader.BytecodeLength == 0 {
        return Err(DeviceError::InvalidParameters);
    }

    create_pipeline_state(device, &stream, name)
}

pub(crate) fn create_compute_pipeline(
    device: &ID3D12Device2,
    desc: &ComputePipelineDesc,
    name: &str,
) -> Result<PipelineState, DeviceError> {
    let stream = ComputePipelineStream {
        root_signature: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_ROOT_SIGNATURE,
            root_signature_of(desc.root_signature),
        ),
        compute_shader: PipelineTypedField::new(
            D3D12_PIPELINE_STATE_SUBOBJECT_TYPE_CS,
            bytecode(desc.bytecode),
        ),
    };

    create_pipeline_state(device, &stream, name).map(|pipeline| {
        PipelineState::new(PipelineKind::Compute, pipeline.backend_data)
    })
}

fn subobject<T>(ty: D3D12_STATE_SUBOBJECT_TYPE, desc: &T) -> D3D12_STATE_SUBOBJECT {
    D3D12_STATE_SUBOBJECT {
        Type: ty,
        pDesc: desc as *const T as *const c_void,
    }
}

pub(crate) fn create_raytracing_pipeline(
    device: &ID3D12Device5,
    desc: &RaytracingPipelineDesc,
    name: &str,
) -> Result<PipelineState, DeviceError> {
    let library = D3D12_DXIL_LIBRARY_DESC {
        DXILLibrary: bytecode(desc.library),
        NumExports: 0,
        pExports: std::ptr::null_mut(),
    };

    // Wide strings must outlive the call
    let hit_group_names: Vec<(Vec<u16>, Option<Vec<u16>>, Option<Vec<u16>>)> = desc
        .hit_groups
        .iter()
        .map(|group| {
            (
                wide_string(group.name),
                group.closest_hit.map(wide_string),
                group.any_hit.map(wide_string),
            )
        })
        .collect();

    let hit_groups: Vec<D3D12_HIT_GROUP_DESC> = hit_group_names
        .iter()
        .map(|(name, closest_hit, any_hit)| D3D12_HIT_GROUP_DESC {
            HitGroupExport: PCWSTR(name.as_ptr()),
            Type: D3D12_HIT_GROUP_TYPE_TRIANGLES,
            AnyHitShaderImport: any_hit
                .as_ref()
                .map_or(PCWSTR::null(), |any_hit| PCWSTR(any_hit.as_ptr())),
            ClosestHitShaderImport: closest_hit
                .as_ref()
                .map_or(PCWSTR::null(), |closest_hit| PCWSTR(closest_hit.as_ptr())),
            IntersectionShaderImport: PCWSTR::null(),
        })
        .collect();

    let shader_config = D3D12_RAYTRACING_SHADER_CONFIG {
        MaxPayloadSizeInBytes: desc.max_payload_size,
        MaxAttributeSizeInBytes: desc.max_attribute_size,
    };

    let pipeline_config = D3D12_RAYTRACING_PIPELINE_CONFIG {
        MaxTraceRecursionDepth: desc.max_recursion_depth,
    };

    // D3D12_GLOBAL_ROOT_SIGNATURE is a single interface pointer
    let global_root_signature = root_signature_of(desc.global_root_signature);

    let mut subobjects = Vec::with_capacity(hit_groups.len() + 4);
    subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_DXIL_LIBRARY, &library));
    for hit_group in &hit_groups {
        subobjects.push(subobject(D3D12_STATE_SUBOBJECT_TYPE_HIT_GROUP, hit_group));
    }
    subobjects.push(subobject(
        D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_SHADER_CONFIG,
        &shader_config,
    ));
    subobjects.push(subobject(
        D3D12_STATE_SUBOBJECT_TYPE_GLOBAL_ROOT_SIGNATURE,
        &global_root_signature,
    ));
    subobjects.push(subobject(
        D3D12_STATE_SUBOBJECT_TYPE_RAYTRACING_PIPELINE_CONFIG,
        &pipeline_config,
    ));

    let state_object_desc = D3D12_STATE_OBJECT_DESC {
        Type: D3D12_STATE_OBJECT_TYPE_RAYTRACING_PIPELINE,
        NumSubobjects: subobjects.len() as u32,
        pSubobjects: subobjects.as_ptr(),
    };

    let state_object: ID3D12StateObject = unsafe { device.CreateStateObject(&state_object_desc) }
        .map_err(convert_d3d_error_to_ze_device_error)?;
    if let Ok(object) = state_object.cast::<ID3D12Object>() {
        set_resource_name(&object, name);
    }

    Ok(PipelineState::new(
        PipelineKind::Raytracing,
        Box::new(D3D12Pipeline::StateObject(state_object.into())),
    ))
}

pub(crate) fn raytracing_shader_identifier(
    pipeline: &PipelineState,
    export: &str,
) -> Option<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]> {
    let D3D12Pipeline::StateObject(state_object) =
        native::<D3D12Pipeline>(pipeline.backend_data.as_ref())
    else {
        return None;
    };

    let properties = state_object.cast::<ID3D12StateObjectProperties>().ok()?;
    let export = wide_string(export);
    let identifier = unsafe { properties.GetShaderIdentifier(PCWSTR(export.as_ptr())) };
    if identifier.is_null() {
        return None;
    }

    let mut data = [0u8; RAYTRACING_SHADER_IDENTIFIER_SIZE];
    unsafe {
        std::ptr::copy_nonoverlapping(
            identifier as *const u8,
            data.as_mut_ptr(),
            RAYTRACING_SHADER_IDENTIFIER_SIZE,
        );
    }
    Some(data)
}
