//! Frame schedule of the engine.
//!
//! The application fills render passes every frame and [`Renderer::end_frame`] records them,
//! along with every screen space effect, on a single render command list.

use std::fmt::{Display, Formatter};
use ze_gfx::backend::DeviceError;
use ze_shader_system::PipelineError;

mod binding;
mod debug_event;
mod fallback;
mod light_culling;
mod material;
mod passes;
mod pipelines;
mod raytracing;
mod renderer;
mod scene;
mod settings;
mod shadow_atlas;
mod skinning;
mod target;
mod targets;

pub use debug_event::DebugEventScope;
pub use light_culling::{light_culling_tiles, LIGHT_CULLING_TILE_SIZE, MAX_NUM_INDICES_PER_TILE};
pub use material::{
    CommonMaterialInfo, MaterialInstance, MaterialPass, MaterialSetup,
    COMMON_MATERIAL_DESCRIPTOR_COUNT,
};
pub use passes::{
    AnimatedDepthOnlyDrawCall, DepthOnlyDrawCall, DrawCall, DrawGeometry, GeometryPass,
    MeshBuffers, OpaqueRenderPass, OverlayRenderPass, PointShadowRenderPass, ShadowDrawCall,
    SpotShadowRenderPass, SubmeshInfo, SunShadowRenderPass, TransformConstants,
    TransparentRenderPass,
};
pub use pipelines::SHADER_FILES;
pub use raytracing::{PathTracer, RaytracingInstanceDesc, RaytracingTlas};
pub use renderer::{FrameStats, Renderer, MAX_POINT_SHADOW_PASSES, MAX_SPOT_SHADOW_PASSES};
pub use scene::{DecalList, DirectionalLight, LightList, PbrEnvironment, RenderCamera};
pub use settings::{
    halton_sequence, AspectRatioMode, RenderSettings, RendererConfig, RendererMode,
    SsrSettings, TlasRebuildMode, TonemapSettings, HALTON_SEQUENCE_LENGTH,
};
pub use shadow_atlas::{
    ShadowAtlas, ShadowMapViewport, MAX_NUM_SUN_SHADOW_CASCADES, SHADOW_MAP_FORMAT,
};
pub use skinning::{
    SkinnedObject, SkinningDispatcher, MAX_SKINNED_VERTICES_PER_FRAME,
    MAX_SKINNING_MATRICES_PER_FRAME,
};
pub use target::{FrameOutput, OffscreenTarget, PresentTarget, SwapChainTarget};
pub use targets::{
    RenderTargets, TrackedBuffer, TrackedTexture, DEPTH_STENCIL_FORMAT, HDR_FORMAT,
    LDR_POST_PROCESS_FORMAT, OPAQUE_RENDER_TARGET_FORMATS,
};

#[derive(Debug)]
pub enum RendererError {
    Device(DeviceError),
    Pipeline(PipelineError),

    /// A frame was started before [`Renderer::initialize`]
    NotInitialized,
}

impl Display for RendererError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RendererError::Device(error) => write!(f, "device error: {}", error),
            RendererError::Pipeline(error) => write!(f, "pipeline error: {}", error),
            RendererError::NotInitialized => write!(f, "renderer is not initialized"),
        }
    }
}

impl std::error::Error for RendererError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RendererError::Device(error) => Some(error),
            RendererError::Pipeline(error) => Some(error),
            RendererError::NotInitialized => None,
        }
    }
}

impl From<DeviceError> for RendererError {
    fn from(error: DeviceError) -> Self {
        RendererError::Device(error)
    }
}

impl From<PipelineError> for RendererError {
    fn from(error: PipelineError) -> Self {
        RendererError::Pipeline(error)
    }
}

#[cfg(test)]
mod tests;
