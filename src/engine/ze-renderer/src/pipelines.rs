use crate::shadow_atlas::SHADOW_MAP_FORMAT;
use crate::targets::{
    DEPTH_STENCIL_FORMAT, LDR_POST_PROCESS_FORMAT, SCREEN_VELOCITIES_FORMAT,
    SKY_RENDER_TARGET_FORMATS,
};
use ze_gfx::backend::{
    CompareOp, CullMode, GraphicsPipelineStates, InputElementDesc, PipelineDepthStencilState,
    PipelineRasterizerState, PipelineRenderTargetBlendDesc, StencilOp,
};
use ze_gfx::PixelFormat;
use ze_shader_system::{
    GraphicsPipelineFiles, Pipeline, PipelineError, PipelineFactory, RootSignatureSource,
};

/// Every blob the renderer loads, without extension
pub const SHADER_FILES: &[&str] = &[
    "depth_only_vs",
    "depth_only_ps",
    "animated_depth_only_vs",
    "shadow_vs",
    "shadow_point_light_vs",
    "shadow_point_light_ps",
    "world_space_tiled_frusta_cs",
    "light_culling_cs",
    "linear_depth_pyramid_cs",
    "sky_vs",
    "sky_procedural_ps",
    "sky_texture_ps",
    "ssr_raycast_cs",
    "ssr_resolve_cs",
    "ssr_temporal_cs",
    "ssr_median_blur_cs",
    "specular_ambient_cs",
    "taa_cs",
    "bloom_threshold_cs",
    "blur_cs",
    "tonemap_cs",
    "outline_vs",
    "outline_ps",
    "present_vs",
    "present_ps",
    "skinning_cs",
    "path_tracer_lib",
];

const POSITION_STREAM: u32 = 0;
const PREV_FRAME_POSITION_STREAM: u32 = 1;

fn position_layout() -> Vec<InputElementDesc> {
    vec![InputElementDesc {
        semantic_name: "POSITION",
        semantic_index: 0,
        format: PixelFormat::R32G32B32Float,
        input_slot: POSITION_STREAM,
        aligned_byte_offset: 0,
    }]
}

fn animated_position_layout() -> Vec<InputElementDesc> {
    let mut layout = position_layout();
    layout.push(InputElementDesc {
        semantic_name: "POSITION",
        semantic_index: 1,
        format: PixelFormat::R32G32B32Float,
        input_slot: PREV_FRAME_POSITION_STREAM,
        aligned_byte_offset: 0,
    });
    layout
}

fn depth_disabled() -> PipelineDepthStencilState {
    PipelineDepthStencilState {
        enable_depth_test: false,
        enable_depth_write: false,
        depth_compare_op: CompareOp::Always,
        ..Default::default()
    }
}

fn fullscreen_states(render_target_format: PixelFormat) -> GraphicsPipelineStates {
    GraphicsPipelineStates {
        render_target_formats: vec![render_target_format],
        blend: vec![PipelineRenderTargetBlendDesc::default()],
        rasterizer: PipelineRasterizerState {
            cull_mode: CullMode::None,
            ..Default::default()
        },
        depth_stencil: depth_disabled(),
        ..Default::default()
    }
}

/// Pipelines owned by the renderer itself. Materials bring their own
pub struct RendererPipelines {
    pub depth_only: Pipeline,
    pub animated_depth_only: Pipeline,
    pub shadow: Pipeline,
    pub point_light_shadow: Pipeline,
    pub world_space_tiled_frusta: Pipeline,
    pub light_culling: Pipeline,
    pub linear_depth_pyramid: Pipeline,
    pub sky_procedural: Pipeline,
    pub sky_texture: Pipeline,
    pub ssr_raycast: Pipeline,
    pub ssr_resolve: Pipeline,
    pub ssr_temporal: Pipeline,
    pub ssr_median_blur: Pipeline,
    pub specular_ambient: Pipeline,
    pub taa: Pipeline,
    pub bloom_threshold: Pipeline,
    pub blur: Pipeline,
    pub tonemap: Pipeline,
    pub outline_marker: Pipeline,
    pub outline: Pipeline,
    pub skinning: Pipeline,

    /// One per output format, declared on first use
    present: Vec<(PixelFormat, Pipeline)>,
}

impl RendererPipelines {
    /// Declare every pipeline. Nothing is built until the factory's pending pipelines are
    pub fn new(factory: &PipelineFactory) -> Self {
        let compute = |file: &str| {
            factory.create_reloadable_compute_pipeline(file, RootSignatureSource::FromShader)
        };

        let depth_only_states = GraphicsPipelineStates {
            input_layout: position_layout(),
            render_target_formats: vec![SCREEN_VELOCITIES_FORMAT],
            blend: vec![PipelineRenderTargetBlendDesc::default()],
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            ..Default::default()
        };

        let shadow_states = GraphicsPipelineStates {
            input_layout: position_layout(),
            depth_stencil_format: SHADOW_MAP_FORMAT,
            rasterizer: PipelineRasterizerState {
                depth_bias: 1000,
                slope_scaled_depth_bias: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };

        let sky_states = GraphicsPipelineStates {
            render_target_formats: SKY_RENDER_TARGET_FORMATS.to_vec(),
            blend: vec![PipelineRenderTargetBlendDesc::default(); 2],
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            rasterizer: PipelineRasterizerState {
                cull_mode: CullMode::None,
                ..Default::default()
            },
            depth_stencil: PipelineDepthStencilState {
                enable_depth_write: false,
                depth_compare_op: CompareOp::LessEqual,
                ..Default::default()
            },
            ..Default::default()
        };

        let outline_marker_states = GraphicsPipelineStates {
            input_layout: position_layout(),
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            depth_stencil: PipelineDepthStencilState {
                enable_stencil_test: true,
                stencil_compare_op: CompareOp::Always,
                stencil_pass_op: StencilOp::Replace,
                ..depth_disabled()
            },
            ..Default::default()
        };

        let outline_states = GraphicsPipelineStates {
            input_layout: position_layout(),
            render_target_formats: vec![LDR_POST_PROCESS_FORMAT],
            blend: vec![PipelineRenderTargetBlendDesc::alpha_blend()],
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            rasterizer: PipelineRasterizerState {
                cull_mode: CullMode::None,
                ..Default::default()
            },
            depth_stencil: PipelineDepthStencilState {
                enable_stencil_test: true,
                stencil_write_mask: 0,
                stencil_compare_op: CompareOp::NotEqual,
                stencil_pass_op: StencilOp::Keep,
                ..depth_disabled()
            },
            ..Default::default()
        };

        Self {
            depth_only: factory.create_reloadable_graphics_pipeline(
                depth_only_states.clone(),
                GraphicsPipelineFiles::new().vs("depth_only_vs").ps("depth_only_ps"),
                RootSignatureSource::FromShader,
            ),
            animated_depth_only: factory.create_reloadable_graphics_pipeline(
                GraphicsPipelineStates {
                    input_layout: animated_position_layout(),
                    ..depth_only_states
                },
                GraphicsPipelineFiles::new()
                    .vs("animated_depth_only_vs")
                    .ps("depth_only_ps"),
                RootSignatureSource::FromShader,
            ),
            shadow: factory.create_reloadable_graphics_pipeline(
                shadow_states.clone(),
                GraphicsPipelineFiles::new().vs("shadow_vs"),
                RootSignatureSource::FromShader,
            ),
            point_light_shadow: factory.create_reloadable_graphics_pipeline(
                GraphicsPipelineStates {
                    rasterizer: PipelineRasterizerState {
                        cull_mode: CullMode::None,
                        ..shadow_states.rasterizer
                    },
                    ..shadow_states
                },
                GraphicsPipelineFiles::new()
                    .vs("shadow_point_light_vs")
                    .ps("shadow_point_light_ps"),
                RootSignatureSource::FromShader,
            ),
            world_space_tiled_frusta: compute("world_space_tiled_frusta_cs"),
            light_culling: compute("light_culling_cs"),
            linear_depth_pyramid: compute("linear_depth_pyramid_cs"),
            sky_procedural: factory.create_reloadable_graphics_pipeline(
                sky_states.clone(),
                GraphicsPipelineFiles::new().vs("sky_vs").ps("sky_procedural_ps"),
                RootSignatureSource::FromShader,
            ),
            sky_texture: factory.create_reloadable_graphics_pipeline(
                sky_states,
                GraphicsPipelineFiles::new().vs("sky_vs").ps("sky_texture_ps"),
                RootSignatureSource::FromShader,
            ),
            ssr_raycast: compute("ssr_raycast_cs"),
            ssr_resolve: compute("ssr_resolve_cs"),
            ssr_temporal: compute("ssr_temporal_cs"),
            ssr_median_blur: compute("ssr_median_blur_cs"),
            specular_ambient: compute("specular_ambient_cs"),
            taa: compute("taa_cs"),
            bloom_threshold: compute("bloom_threshold_cs"),
            blur: compute("blur_cs"),
            tonemap: compute("tonemap_cs"),
            outline_marker: factory.create_reloadable_graphics_pipeline(
                outline_marker_states,
                GraphicsPipelineFiles::new().vs("outline_vs"),
                RootSignatureSource::FromShader,
            ),
            outline: factory.create_reloadable_graphics_pipeline(
                outline_states,
                GraphicsPipelineFiles::new().vs("outline_vs").ps("outline_ps"),
                RootSignatureSource::FromShader,
            ),
            skinning: compute("skinning_cs"),
            present: vec![],
        }
    }

    /// Pipeline drawing the final image into a target of `format`, built on first use
    pub fn present(
        &mut self,
        factory: &PipelineFactory,
        format: PixelFormat,
    ) -> Result<Pipeline, PipelineError> {
        if let Some((_, pipeline)) = self.present.iter().find(|(f, _)| *f == format) {
            return Ok(pipeline.clone());
        }

        let pipeline = factory.create_reloadable_graphics_pipeline(
            fullscreen_states(format),
            GraphicsPipelineFiles::new().vs("present_vs").ps("present_ps"),
            RootSignatureSource::FromShader,
        );
        factory.create_all_pending_reloadable_pipelines()?;
        self.present.push((format, pipeline.clone()));
        Ok(pipeline)
    }

    pub fn present_format_count(&self) -> usize {
        self.present.len()
    }
}
