use crate::binding::{bind_descriptor_table, copy_descriptor_table};
use crate::debug_event::DebugEventScope;
use crate::fallback::FallbackResources;
use crate::light_culling::{CullingInputs, LightCulling};
use crate::material::{CommonMaterialInfo, COMMON_MATERIAL_DESCRIPTOR_COUNT};
use crate::passes::{
    draw_submesh, record_animated_depth_only_draw_calls, record_depth_only_draw_calls,
    record_draw_calls, record_shadow_draw_calls, DrawCall, DrawGeometry, GeometryPass, OpaqueRenderPass,
    OverlayRenderPass, PointShadowRenderPass, SpotShadowRenderPass, SunShadowRenderPass,
    TransformConstants, TransparentRenderPass,
};
use crate::pipelines::RendererPipelines;
use crate::raytracing::{PathTracer, RaytracingTlas};
use crate::scene::{
    vec3, vec4, CameraConstants, DecalList, DirectionalLight, LightList, PbrEnvironment,
    RenderCamera, SunConstants,
};
use crate::settings::{
    halton_sequence, RenderSettings, RendererConfig, RendererMode, HALTON_SEQUENCE_LENGTH,
};
use crate::shadow_atlas::{ShadowAtlas, MAX_NUM_SUN_SHADOW_CASCADES};
use crate::skinning::SkinningDispatcher;
use crate::target::FrameOutput;
use crate::targets::{RenderTargets, TrackedTexture, LINEAR_DEPTH_MIP_LEVELS};
use crate::RendererError;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use tinyvec::ArrayVec;
use ze_core::maths::{Matrix4f32, RectI32, Vec2f32};
use ze_core::{ze_info, ze_warn};
use ze_gfx::backend::{
    CpuDescriptorHandle, DeviceCaps, PipelineBindPoint, PrimitiveTopology, ResourceState,
    Viewport,
};
use ze_gfx::utils::{bucketize, CONSTANT_BUFFER_ALIGNMENT};
use ze_gpu_context::{CommandList, GpuContext};
use ze_shader_system::{Pipeline, PipelineFactory};

pub const MAX_SPOT_SHADOW_PASSES: usize = 16;
pub const MAX_POINT_SHADOW_PASSES: usize = 16;

const COMPUTE_GROUP_SIZE: u32 = 8;
const LINEAR_DEPTH_GROUP_SIZE: u32 = 16;
const OUTLINE_STENCIL_REF: u32 = 1;

/// Root parameters shared by the renderer's own pipelines
mod root {
    pub const CONSTANTS: u32 = 0;
    pub const CAMERA: u32 = 1;
    pub const RESOURCES: u32 = 2;
    pub const SUN: u32 = 3;
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ScreenConstants {
    width: u32,
    height: u32,
    frame_index: u32,
    history_valid: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SkyConstants {
    sky_intensity: f32,
    padding: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct PointShadowConstants {
    light_position: [f32; 4],
    max_distance: f32,
    hemisphere: f32,
    padding: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SsrConstants {
    num_steps: u32,
    max_distance: f32,
    stride_cutoff: f32,
    min_stride: f32,
    max_stride: f32,
    width: u32,
    height: u32,
    frame_index: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SpecularAmbientConstants {
    environment_intensity: f32,
    has_reflections: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct BloomConstants {
    threshold: f32,
    horizontal: u32,
    width: u32,
    height: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct TonemapConstants {
    shoulder_strength: f32,
    linear_strength: f32,
    linear_angle: f32,
    toe_strength: f32,
    toe_numerator: f32,
    toe_denominator: f32,
    linear_white: f32,
    exposure: f32,
    bloom_strength: f32,
    width: u32,
    height: u32,
    padding: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct PresentConstants {
    sharpen_strength: f32,
    enable_sharpen: u32,
    padding: [u32; 2],
}

/// What the last [`Renderer::end_frame`] recorded
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub path_traced: bool,
    pub material_setups: usize,
    pub draw_calls: usize,
    pub shadow_passes: usize,
}

struct FrameResources {
    targets: RenderTargets,
    light_culling: LightCulling,
    shadow_map: TrackedTexture,
    fallback: FallbackResources,
    path_tracer: Option<PathTracer>,
}

#[derive(Default)]
struct SceneState {
    camera: RenderCamera,
    sun: DirectionalLight,
    point_lights: Option<LightList>,
    spot_lights: Option<LightList>,
    decals: Option<DecalList>,
    environment: Option<PbrEnvironment>,
}

#[derive(Default)]
struct SubmittedPasses {
    opaque: Option<OpaqueRenderPass>,
    transparent: Option<TransparentRenderPass>,
    overlay: Option<OverlayRenderPass>,
    sun_shadow: Option<SunShadowRenderPass>,
    spot_shadows: ArrayVec<[SpotShadowRenderPass; MAX_SPOT_SHADOW_PASSES]>,
    point_shadows: ArrayVec<[PointShadowRenderPass; MAX_POINT_SHADOW_PASSES]>,
}

/// Everything a stage needs to know about the frame being recorded
struct FrameData {
    camera_constants: u64,
    sun_constants: u64,
    view_projection: Matrix4f32,
    prev_frame_view_projection: Matrix4f32,

    /// Overlays are drawn after the temporal resolve, without jitter
    overlay_view_projection: Matrix4f32,
    width: u32,
    height: u32,
    frame_index: u32,
    history_valid: bool,
}

impl FrameData {
    fn viewport(&self) -> Viewport {
        Viewport::new(0.0, 0.0, self.width as f32, self.height as f32)
    }

    fn scissor(&self) -> RectI32 {
        RectI32::new(0, 0, self.width as i32, self.height as i32)
    }

    fn screen_constants(&self) -> ScreenConstants {
        ScreenConstants {
            width: self.width,
            height: self.height,
            frame_index: self.frame_index,
            history_valid: self.history_valid as u32,
        }
    }

    fn full_res_groups(&self) -> (u32, u32) {
        (
            bucketize(self.width.max(1), COMPUTE_GROUP_SIZE),
            bucketize(self.height.max(1), COMPUTE_GROUP_SIZE),
        )
    }

    fn half_res_groups(&self) -> (u32, u32) {
        (
            bucketize((self.width / 2).max(1), COMPUTE_GROUP_SIZE),
            bucketize((self.height / 2).max(1), COMPUTE_GROUP_SIZE),
        )
    }
}

fn set_viewport_rect(cmd_list: &mut CommandList, rect: RectI32) {
    cmd_list.set_viewport(Viewport::new(
        rect.x as f32,
        rect.y as f32,
        rect.width as f32,
        rect.height as f32,
    ));
    cmd_list.set_scissor(rect);
}

/// Records a whole frame from the passes the application submitted.
///
/// Every frame goes through `begin_frame_common`, `begin_frame`, pass submission,
/// `end_frame_common` and finally `end_frame`, which records the frame on a single render list
/// and returns the render queue fence value to wait on before reusing anything it referenced.
pub struct Renderer {
    context: Arc<GpuContext>,
    pipeline_factory: Arc<PipelineFactory>,
    config: RendererConfig,
    caps: DeviceCaps,
    pipelines: RendererPipelines,
    shadow_atlas: ShadowAtlas,
    resources: Option<FrameResources>,
    skinning: SkinningDispatcher,
    raytracer: Option<RaytracingTlas>,
    scene: SceneState,
    passes: SubmittedPasses,
    compute_fence: Option<u64>,
    camera_jitter: [Vec2f32; HALTON_SEQUENCE_LENGTH],
    prev_frame_view_projection: Option<Matrix4f32>,
    frame_index: u32,
    history_valid: bool,
    warned_missing_tlas: bool,
    stats: FrameStats,
}

impl Renderer {
    /// Declare the renderer pipelines. They are built by [`Renderer::initialize`], along with any
    /// material pipeline declared on the same factory before that
    pub fn new(
        context: Arc<GpuContext>,
        pipeline_factory: Arc<PipelineFactory>,
        config: RendererConfig,
    ) -> Result<Self, RendererError> {
        let caps = context.device().caps();
        let pipelines = RendererPipelines::new(&pipeline_factory);
        let skinning = SkinningDispatcher::new(&context)?;
        Ok(Self {
            shadow_atlas: ShadowAtlas::new(config.shadow_map_tile_size),
            context,
            pipeline_factory,
            config,
            caps,
            pipelines,
            resources: None,
            skinning,
            raytracer: None,
            scene: SceneState::default(),
            passes: SubmittedPasses::default(),
            compute_fence: None,
            camera_jitter: halton_sequence(),
            prev_frame_view_projection: None,
            frame_index: 0,
            history_valid: false,
            warned_missing_tlas: false,
            stats: FrameStats::default(),
        })
    }

    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        self.pipeline_factory
            .create_all_pending_reloadable_pipelines()?;

        let path_tracer = match self.config.mode {
            RendererMode::Pathtraced if self.caps.raytracing => {
                Some(PathTracer::new(&self.context, &self.pipeline_factory)?)
            }
            RendererMode::Pathtraced => {
                ze_warn!(
                    "{} does not support raytracing, falling back to rasterization",
                    self.context.device().name()
                );
                None
            }
            RendererMode::Rasterized => None,
        };

        let shadow_map = TrackedTexture::new(
            &self.context,
            &self.shadow_atlas.texture_desc(),
            "Shadow Atlas",
        )?;

        let fallback = FallbackResources::new(&self.context)?;
        let mut cmd_list = self.context.get_free_render_command_list()?;
        fallback.initialize(&mut cmd_list);
        self.context.execute(cmd_list)?;

        self.resources = Some(FrameResources {
            targets: RenderTargets::new(&self.context, width, height)?,
            light_culling: LightCulling::new(&self.context, width, height)?,
            shadow_map,
            fallback,
            path_tracer,
        });

        ze_info!(
            "Renderer initialized at {}x{} ({:?})",
            width,
            height,
            self.effective_mode()
        );
        Ok(())
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.config.settings
    }

    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.config.settings
    }

    pub fn pipeline_factory(&self) -> &Arc<PipelineFactory> {
        &self.pipeline_factory
    }

    pub fn shadow_atlas(&self) -> &ShadowAtlas {
        &self.shadow_atlas
    }

    pub fn skinning(&mut self) -> &mut SkinningDispatcher {
        &mut self.skinning
    }

    pub fn last_frame_stats(&self) -> FrameStats {
        self.stats
    }

    /// Mode frames are actually rendered in, given what the device supports
    pub fn effective_mode(&self) -> RendererMode {
        let has_path_tracer = self
            .resources
            .as_ref()
            .map_or(false, |resources| resources.path_tracer.is_some());
        if has_path_tracer {
            RendererMode::Pathtraced
        } else {
            RendererMode::Rasterized
        }
    }

    /// Acceleration structure traced in path traced mode. Built by [`Renderer::end_frame_common`]
    pub fn set_raytracer(&mut self, tlas: RaytracingTlas) {
        self.raytracer = Some(tlas);
    }

    pub fn raytracer_mut(&mut self) -> Option<&mut RaytracingTlas> {
        self.raytracer.as_mut()
    }

    /// Frame start shared by every view: picks up changed shaders
    pub fn begin_frame_common(&self) {
        self.pipeline_factory.check_for_changed_pipelines();
    }

    /// Submit the async compute work of the frame. The next [`Renderer::end_frame`] waits for it
    pub fn end_frame_common(&mut self) -> Result<(), RendererError> {
        let skinning_fence = self
            .skinning
            .perform_skinning(&self.context, &self.pipelines.skinning)?;

        let mode = self.effective_mode();
        let tlas_fence = match (&mut self.raytracer, mode) {
            (Some(tlas), RendererMode::Pathtraced) => tlas.build(&self.context)?,
            _ => None,
        };

        self.compute_fence = match (skinning_fence, tlas_fence) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (fence, None) | (None, fence) => fence,
        };
        Ok(())
    }

    /// Resize the targets if needed and forget last frame's passes and scene
    pub fn begin_frame(&mut self, width: u32, height: u32) -> Result<(), RendererError> {
        let resources = self.resources.as_mut().ok_or(RendererError::NotInitialized)?;
        if resources.targets.resize(width, height)? {
            resources
                .light_culling
                .allocate(&self.context, width, height)?;
            self.history_valid = false;
        }

        self.passes = SubmittedPasses::default();
        self.scene.point_lights = None;
        self.scene.spot_lights = None;
        self.scene.decals = None;
        Ok(())
    }

    pub fn set_camera(&mut self, camera: RenderCamera) {
        self.scene.camera = camera;
    }

    pub fn set_sun(&mut self, sun: DirectionalLight) {
        self.scene.sun = sun;
    }

    pub fn set_point_lights(&mut self, lights: LightList) {
        self.scene.point_lights = Some(lights);
    }

    pub fn set_spot_lights(&mut self, lights: LightList) {
        self.scene.spot_lights = Some(lights);
    }

    pub fn set_decals(&mut self, decals: DecalList) {
        self.scene.decals = Some(decals);
    }

    pub fn set_environment(&mut self, environment: Option<PbrEnvironment>) {
        self.scene.environment = environment;
    }

    pub fn submit_opaque_pass(&mut self, pass: OpaqueRenderPass) {
        assert!(
            self.passes.opaque.is_none(),
            "Opaque pass already submitted this frame"
        );
        self.passes.opaque = Some(pass);
    }

    pub fn submit_transparent_pass(&mut self, pass: TransparentRenderPass) {
        assert!(
            self.passes.transparent.is_none(),
            "Transparent pass already submitted this frame"
        );
        self.passes.transparent = Some(pass);
    }

    pub fn submit_overlay_pass(&mut self, pass: OverlayRenderPass) {
        assert!(
            self.passes.overlay.is_none(),
            "Overlay pass already submitted this frame"
        );
        self.passes.overlay = Some(pass);
    }

    pub fn submit_sun_shadow_pass(&mut self, pass: SunShadowRenderPass) {
        assert!(
            self.passes.sun_shadow.is_none(),
            "Sun shadow pass already submitted this frame"
        );
        assert!(pass.num_cascades as usize <= MAX_NUM_SUN_SHADOW_CASCADES);
        self.passes.sun_shadow = Some(pass);
    }

    pub fn submit_spot_shadow_pass(&mut self, pass: SpotShadowRenderPass) {
        assert!(
            self.passes.spot_shadows.len() < MAX_SPOT_SHADOW_PASSES,
            "At most {} spot shadow passes per frame",
            MAX_SPOT_SHADOW_PASSES
        );
        self.passes.spot_shadows.push(pass);
    }

    pub fn submit_point_shadow_pass(&mut self, pass: PointShadowRenderPass) {
        assert!(
            self.passes.point_shadows.len() < MAX_POINT_SHADOW_PASSES,
            "At most {} point shadow passes per frame",
            MAX_POINT_SHADOW_PASSES
        );
        self.passes.point_shadows.push(pass);
    }

    fn path_tracing_tlas(&mut self) -> Option<u64> {
        if self.effective_mode() != RendererMode::Pathtraced {
            return None;
        }

        let address = self.raytracer.as_ref().and_then(RaytracingTlas::address);
        if address.is_none() && !self.warned_missing_tlas {
            ze_warn!("No acceleration structure to trace, rasterizing instead");
            self.warned_missing_tlas = true;
        }
        address
    }

    fn prepare_frame(
        &self,
        cmd_list: &mut CommandList,
        targets: &RenderTargets,
        path_traced: bool,
    ) -> Result<FrameData, RendererError> {
        let settings = &self.config.settings;
        let camera = &self.scene.camera;
        let (width, height) = (targets.width(), targets.height());

        let jitter = if settings.enable_temporal_antialiasing && !path_traced {
            self.camera_jitter[self.frame_index as usize % HALTON_SEQUENCE_LENGTH]
                * settings.camera_jitter_strength
        } else {
            Vec2f32::default()
        };
        let prev_jitter = if settings.enable_temporal_antialiasing && !path_traced {
            let index = (self.frame_index as usize + HALTON_SEQUENCE_LENGTH - 1)
                % HALTON_SEQUENCE_LENGTH;
            self.camera_jitter[index] * settings.camera_jitter_strength
        } else {
            Vec2f32::default()
        };

        let projection = camera.jittered_projection(jitter, width, height);
        let view_projection = projection * camera.view;
        let unjittered_view_projection = camera.projection * camera.view;
        let prev_frame_view_projection = self
            .prev_frame_view_projection
            .unwrap_or(unjittered_view_projection);

        let camera_constants = CameraConstants {
            view_projection: view_projection.as_floats(),
            view: camera.view.as_floats(),
            projection: projection.as_floats(),
            prev_frame_view_projection: prev_frame_view_projection.as_floats(),
            position: vec3(camera.position, 1.0),
            jitter: [jitter.x, jitter.y],
            prev_frame_jitter: [prev_jitter.x, prev_jitter.y],
            screen_dims: [width as f32, height as f32],
            near_plane: camera.near_plane,
            far_plane: camera.far_plane,
        };

        let sun = &self.scene.sun;
        let mut sun_constants = SunConstants {
            view_projections: [Matrix4f32::IDENTITY.as_floats(); MAX_NUM_SUN_SHADOW_CASCADES],
            viewports: [[0.0; 4]; MAX_NUM_SUN_SHADOW_CASCADES],
            cascade_distances: vec4(sun.cascade_distances),
            bias: vec4(sun.bias),
            blend_distances: vec4(sun.blend_distances),
            direction: vec3(sun.direction, 0.0),
            radiance: vec3(sun.radiance, 0.0),
            num_shadow_cascades: 0,
            padding: [0; 3],
        };
        if let Some(pass) = &self.passes.sun_shadow {
            sun_constants.num_shadow_cascades = pass.num_cascades;
            for i in 0..pass.num_cascades as usize {
                sun_constants.view_projections[i] = pass.view_projections[i].as_floats();
                sun_constants.viewports[i] = vec4(pass.viewports[i].shader);
            }
        }

        Ok(FrameData {
            camera_constants: cmd_list.upload_pod(&[camera_constants], CONSTANT_BUFFER_ALIGNMENT)?,
            sun_constants: cmd_list.upload_pod(&[sun_constants], CONSTANT_BUFFER_ALIGNMENT)?,
            view_projection,
            prev_frame_view_projection,
            overlay_view_projection: unjittered_view_projection,
            width,
            height,
            frame_index: self.frame_index,
            history_valid: self.history_valid,
        })
    }

    fn common_material_info(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
        light_grid: CpuDescriptorHandle,
    ) -> Result<CommonMaterialInfo, RendererError> {
        let fallback = &resources.fallback;
        let null_buffer = fallback.null_buffer.srv();
        let black_cube = fallback.black_cube.texture().srv();
        let (sky, irradiance, environment) = match &self.scene.environment {
            Some(environment) => (
                environment.sky,
                environment.irradiance,
                environment.environment,
            ),
            None => (black_cube, black_cube, black_cube),
        };

        let descriptors: [CpuDescriptorHandle; COMMON_MATERIAL_DESCRIPTOR_COUNT as usize] = [
            sky,
            irradiance,
            environment,
            fallback.white.texture().srv(),
            light_grid,
            resources.light_culling.light_index_list().buffer().srv(),
            self.scene.point_lights.map_or(null_buffer, |lights| lights.srv),
            self.scene.spot_lights.map_or(null_buffer, |lights| lights.srv),
            self.scene
                .decals
                .map_or(null_buffer, |decals| decals.decals.srv),
            resources.shadow_map.texture().srv(),
            resources.targets.depth_stencil.texture().srv(),
            resources.targets.world_normals.texture().srv(),
        ];

        Ok(CommonMaterialInfo {
            camera_constants: frame.camera_constants,
            sun_constants: frame.sun_constants,
            frame_resources: copy_descriptor_table(&self.context, cmd_list, &descriptors)?,
            environment_intensity: self.config.settings.environment_intensity,
            sky_intensity: self.config.settings.sky_intensity,
        })
    }

    fn dispatch_compute(
        &self,
        cmd_list: &mut CommandList,
        pipeline: &Pipeline,
        constants: &impl Pod,
        camera_constants: u64,
        descriptors: &[CpuDescriptorHandle],
        groups: (u32, u32),
    ) -> Result<(), RendererError> {
        pipeline.bind(cmd_list);
        cmd_list.set_root_constants(PipelineBindPoint::Compute, root::CONSTANTS, constants);
        cmd_list.set_root_constant_buffer(PipelineBindPoint::Compute, root::CAMERA, camera_constants);
        bind_descriptor_table(
            &self.context,
            cmd_list,
            PipelineBindPoint::Compute,
            root::RESOURCES,
            descriptors,
        )?;
        cmd_list.dispatch(groups.0, groups.1, 1);
        Ok(())
    }

    /// Depth, stencil and screen space velocities of every opaque object
    fn record_depth_pre_pass(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) {
        let targets = &resources.targets;
        let mut cmd_list = DebugEventScope::new(cmd_list, "Depth Pre-Pass");
        {
            let mut batch = cmd_list.barriers();
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::DepthWrite);
            targets
                .screen_velocities
                .transition(&mut batch, ResourceState::RenderTargetWrite);
        }

        let dsv = targets.depth_stencil.texture().dsv();
        cmd_list.set_render_targets(&[targets.screen_velocities.texture().rtv()], Some(dsv));
        cmd_list.clear_depth_stencil(dsv, 1.0, 0);
        cmd_list.clear_render_target(targets.screen_velocities.texture().rtv(), [0.0; 4]);
        cmd_list.set_viewport(frame.viewport());
        cmd_list.set_scissor(frame.scissor());
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);

        let Some(pass) = &self.passes.opaque else {
            return;
        };

        if !pass.static_depth_only.is_empty() || !pass.dynamic_depth_only.is_empty() {
            self.pipelines.depth_only.bind(&mut cmd_list);
            cmd_list.set_root_constant_buffer(
                PipelineBindPoint::Graphics,
                root::CAMERA,
                frame.camera_constants,
            );
            for draw_calls in [&pass.static_depth_only, &pass.dynamic_depth_only] {
                record_depth_only_draw_calls(
                    &mut cmd_list,
                    draw_calls,
                    &frame.view_projection,
                    &frame.prev_frame_view_projection,
                );
            }
        }

        if !pass.animated_depth_only.is_empty() {
            self.pipelines.animated_depth_only.bind(&mut cmd_list);
            cmd_list.set_root_constant_buffer(
                PipelineBindPoint::Graphics,
                root::CAMERA,
                frame.camera_constants,
            );
            record_animated_depth_only_draw_calls(
                &mut cmd_list,
                &pass.animated_depth_only,
                &frame.view_projection,
                &frame.prev_frame_view_projection,
            );
        }
    }

    fn record_light_culling(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<(), RendererError> {
        let light_culling = &resources.light_culling;
        if light_culling.frusta_dirty() {
            let mut cmd_list = DebugEventScope::new(cmd_list, "World Space Tiled Frusta");
            light_culling.record_world_space_frusta(
                &self.context,
                &mut cmd_list,
                &self.pipelines.world_space_tiled_frusta,
                frame.camera_constants,
            )?;
        }

        let mut cmd_list = DebugEventScope::new(cmd_list, "Light Culling");
        let depth = &resources.targets.depth_stencil;
        depth.transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);

        let null_list = LightList {
            srv: resources.fallback.null_buffer.srv(),
            count: 0,
        };
        light_culling.record_culling(
            &self.context,
            &mut cmd_list,
            &self.pipelines.light_culling,
            frame.camera_constants,
            depth.texture().srv(),
            &CullingInputs {
                point_lights: self.scene.point_lights.unwrap_or(null_list),
                spot_lights: self.scene.spot_lights.unwrap_or(null_list),
                decals: self
                    .scene
                    .decals
                    .map_or(null_list, |decals| decals.decals),
            },
        )?;
        Ok(())
    }

    fn record_linear_depth_pyramid(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<(), RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Linear Depth Pyramid");
        let targets = &resources.targets;
        targets
            .linear_depth
            .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);

        let mut descriptors = vec![targets.depth_stencil.texture().srv()];
        descriptors.extend(
            (0..LINEAR_DEPTH_MIP_LEVELS).map(|mip| targets.linear_depth.texture().mip_uav(mip)),
        );
        self.dispatch_compute(
            &mut cmd_list,
            &self.pipelines.linear_depth_pyramid,
            &frame.screen_constants(),
            frame.camera_constants,
            &descriptors,
            (
                bucketize(frame.width.max(1), LINEAR_DEPTH_GROUP_SIZE),
                bucketize(frame.height.max(1), LINEAR_DEPTH_GROUP_SIZE),
            ),
        )?;

        targets
            .linear_depth
            .transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
        Ok(())
    }

    /// Sun cascades, then spot lights, then point lights, all into the atlas
    fn record_shadow_maps(&self, cmd_list: &mut CommandList, resources: &FrameResources) -> usize {
        let passes = &self.passes;
        let num_passes = passes.sun_shadow.iter().count()
            + passes.spot_shadows.len()
            + passes.point_shadows.len();
        if num_passes == 0 {
            return 0;
        }

        let mut cmd_list = DebugEventScope::new(cmd_list, "Shadow Maps");
        let shadow_map = &resources.shadow_map;
        shadow_map.transition(&mut cmd_list.barriers(), ResourceState::DepthWrite);

        let dsv = shadow_map.texture().dsv();
        cmd_list.set_render_targets(&[], Some(dsv));
        cmd_list.clear_depth(dsv, 1.0);
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);

        if let Some(pass) = &passes.sun_shadow {
            self.pipelines.shadow.bind(&mut cmd_list);
            for cascade in 0..pass.num_cascades {
                set_viewport_rect(&mut cmd_list, pass.viewports[cascade as usize].cpu);
                record_shadow_draw_calls(
                    &mut cmd_list,
                    pass.cascade_draw_calls(cascade),
                    &pass.view_projections[cascade as usize],
                );
            }
        }

        if !passes.spot_shadows.is_empty() {
            self.pipelines.shadow.bind(&mut cmd_list);
            for pass in &passes.spot_shadows {
                set_viewport_rect(&mut cmd_list, pass.viewport.cpu);
                record_shadow_draw_calls(&mut cmd_list, &pass.draw_calls, &pass.view_projection);
            }
        }

        if !passes.point_shadows.is_empty() {
            self.pipelines.point_light_shadow.bind(&mut cmd_list);
            for pass in &passes.point_shadows {
                for (hemisphere, viewport) in pass.viewports.iter().enumerate() {
                    set_viewport_rect(&mut cmd_list, viewport.cpu);
                    cmd_list.set_root_constants(
                        PipelineBindPoint::Graphics,
                        1,
                        &PointShadowConstants {
                            light_position: vec3(pass.light_position, 1.0),
                            max_distance: pass.max_distance,
                            hemisphere: if hemisphere == 0 { 1.0 } else { -1.0 },
                            padding: [0.0; 2],
                        },
                    );
                    // Projected around the light in the vertex shader
                    record_shadow_draw_calls(
                        &mut cmd_list,
                        &pass.draw_calls,
                        &Matrix4f32::IDENTITY,
                    );
                }
            }
        }

        shadow_map.transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
        num_passes
    }

    fn record_sky(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<(), RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Sky");
        let targets = &resources.targets;
        {
            let mut batch = cmd_list.barriers();
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::DepthWrite);
            targets
                .hdr_color
                .transition(&mut batch, ResourceState::RenderTargetWrite);
        }

        let hdr = targets.hdr_color.texture().rtv();
        cmd_list.set_render_targets(
            &[hdr, targets.screen_velocities.texture().rtv()],
            Some(targets.depth_stencil.texture().dsv()),
        );
        cmd_list.clear_render_target(hdr, [0.0; 4]);
        cmd_list.set_viewport(frame.viewport());
        cmd_list.set_scissor(frame.scissor());

        let (pipeline, sky) = match &self.scene.environment {
            Some(environment) => (&self.pipelines.sky_texture, environment.sky),
            None => (
                &self.pipelines.sky_procedural,
                resources.fallback.black_cube.texture().srv(),
            ),
        };
        pipeline.bind(&mut cmd_list);
        cmd_list.set_root_constants(
            PipelineBindPoint::Graphics,
            root::CONSTANTS,
            &SkyConstants {
                sky_intensity: self.config.settings.sky_intensity,
                padding: [0.0; 3],
            },
        );
        cmd_list.set_root_constant_buffer(
            PipelineBindPoint::Graphics,
            root::CAMERA,
            frame.camera_constants,
        );
        cmd_list.set_root_constant_buffer(PipelineBindPoint::Graphics, root::SUN, frame.sun_constants);
        bind_descriptor_table(
            &self.context,
            &mut cmd_list,
            PipelineBindPoint::Graphics,
            root::RESOURCES,
            &[sky],
        )?;
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);
        cmd_list.draw(3, 1, 0, 0);
        Ok(())
    }

    fn record_geometry(
        &self,
        cmd_list: &mut CommandList,
        info: &CommonMaterialInfo,
        geometry: &GeometryPass,
        view_projection: &Matrix4f32,
    ) -> Result<usize, RendererError> {
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);
        Ok(record_draw_calls(
            cmd_list,
            geometry.draw_calls(),
            info,
            view_projection,
            self.caps.mesh_shaders,
        )?)
    }

    fn record_opaque(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<usize, RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Opaque");
        let targets = &resources.targets;
        {
            let mut batch = cmd_list.barriers();
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::DepthRead);
            targets
                .screen_velocities
                .transition(&mut batch, ResourceState::ShaderRead);
            targets
                .world_normals
                .transition(&mut batch, ResourceState::RenderTargetWrite);
            targets
                .reflectance
                .transition(&mut batch, ResourceState::RenderTargetWrite);
        }

        let normals = targets.world_normals.texture().rtv();
        let reflectance = targets.reflectance.texture().rtv();
        cmd_list.set_render_targets(
            &[targets.hdr_color.texture().rtv(), normals, reflectance],
            Some(targets.depth_stencil.texture().dsv()),
        );
        cmd_list.clear_render_target(normals, [0.0; 4]);
        cmd_list.clear_render_target(reflectance, [0.0; 4]);

        let Some(pass) = &self.passes.opaque else {
            return Ok(0);
        };

        let info = self.common_material_info(
            &mut cmd_list,
            resources,
            frame,
            resources.light_culling.opaque_light_grid().texture().srv(),
        )?;
        self.record_geometry(&mut cmd_list, &info, &pass.geometry, &frame.view_projection)
    }

    /// Screen space reflections when enabled, then the specular ambient term into the post
    /// processing target
    fn record_reflections(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<(), RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Reflections");
        let targets = &resources.targets;
        let settings = &self.config.settings;
        {
            let mut batch = cmd_list.barriers();
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::ShaderRead);
            targets
                .hdr_color
                .transition(&mut batch, ResourceState::ShaderRead);
            targets
                .world_normals
                .transition(&mut batch, ResourceState::ShaderRead);
            targets
                .reflectance
                .transition(&mut batch, ResourceState::ShaderRead);
        }

        let reflections = if settings.enable_ssr {
            let ssr = &settings.ssr;
            let constants = SsrConstants {
                num_steps: ssr.num_steps,
                max_distance: ssr.max_distance,
                stride_cutoff: ssr.stride_cutoff,
                min_stride: ssr.min_stride,
                max_stride: ssr.max_stride,
                width: frame.width,
                height: frame.height,
                frame_index: frame.frame_index,
            };
            let current = frame.frame_index as usize % 2;
            let temporal = &targets.ssr_temporal[current];
            let history = &targets.ssr_temporal[1 - current];

            targets
                .ssr_raycast
                .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.ssr_raycast,
                &constants,
                frame.camera_constants,
                &[
                    targets.hdr_color.texture().srv(),
                    targets.world_normals.texture().srv(),
                    targets.reflectance.texture().srv(),
                    targets.linear_depth.texture().srv(),
                    targets.ssr_raycast.texture().uav(),
                ],
                frame.half_res_groups(),
            )?;

            {
                let mut batch = cmd_list.barriers();
                targets
                    .ssr_raycast
                    .transition(&mut batch, ResourceState::ShaderRead);
                targets
                    .ssr_resolve
                    .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            }
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.ssr_resolve,
                &constants,
                frame.camera_constants,
                &[
                    targets.ssr_raycast.texture().srv(),
                    targets.hdr_color.texture().srv(),
                    targets.world_normals.texture().srv(),
                    targets.reflectance.texture().srv(),
                    targets.ssr_resolve.texture().uav(),
                ],
                frame.half_res_groups(),
            )?;

            {
                let mut batch = cmd_list.barriers();
                targets
                    .ssr_resolve
                    .transition(&mut batch, ResourceState::ShaderRead);
                temporal.transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            }
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.ssr_temporal,
                &frame.screen_constants(),
                frame.camera_constants,
                &[
                    targets.ssr_resolve.texture().srv(),
                    history.texture().srv(),
                    targets.screen_velocities.texture().srv(),
                    temporal.texture().uav(),
                ],
                frame.half_res_groups(),
            )?;

            // The raycast texture is free again, the blurred result goes there
            {
                let mut batch = cmd_list.barriers();
                temporal.transition(&mut batch, ResourceState::ShaderRead);
                targets
                    .ssr_raycast
                    .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            }
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.ssr_median_blur,
                &frame.screen_constants(),
                frame.camera_constants,
                &[temporal.texture().srv(), targets.ssr_raycast.texture().uav()],
                frame.half_res_groups(),
            )?;
            targets
                .ssr_raycast
                .transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
            targets.ssr_raycast.texture().srv()
        } else {
            resources.fallback.black.texture().srv()
        };

        targets
            .hdr_post_process
            .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);

        let black_cube = resources.fallback.black_cube.texture().srv();
        let (irradiance, environment) = self
            .scene
            .environment
            .map_or((black_cube, black_cube), |environment| {
                (environment.irradiance, environment.environment)
            });
        self.dispatch_compute(
            &mut cmd_list,
            &self.pipelines.specular_ambient,
            &SpecularAmbientConstants {
                environment_intensity: settings.environment_intensity,
                has_reflections: settings.enable_ssr as u32,
                width: frame.width,
                height: frame.height,
            },
            frame.camera_constants,
            &[
                targets.hdr_color.texture().srv(),
                targets.world_normals.texture().srv(),
                targets.reflectance.texture().srv(),
                targets.depth_stencil.texture().srv(),
                reflections,
                irradiance,
                environment,
                resources.fallback.white.texture().srv(),
                targets.hdr_post_process.texture().uav(),
            ],
            frame.full_res_groups(),
        )?;
        Ok(())
    }

    fn record_transparent(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<usize, RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Transparent");
        let targets = &resources.targets;
        {
            let mut batch = cmd_list.barriers();
            targets
                .hdr_post_process
                .transition(&mut batch, ResourceState::RenderTargetWrite);
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::DepthRead);
        }

        let Some(pass) = &self.passes.transparent else {
            return Ok(0);
        };

        cmd_list.set_render_targets(
            &[targets.hdr_post_process.texture().rtv()],
            Some(targets.depth_stencil.texture().dsv()),
        );
        cmd_list.set_viewport(frame.viewport());
        cmd_list.set_scissor(frame.scissor());
        let info = self.common_material_info(
            &mut cmd_list,
            resources,
            frame,
            resources
                .light_culling
                .transparent_light_grid()
                .texture()
                .srv(),
        )?;
        self.record_geometry(&mut cmd_list, &info, &pass.geometry, &frame.view_projection)
    }

    /// Temporal antialiasing, bloom and tonemapping of `source` into the LDR target
    fn record_post_processing(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
        source: &TrackedTexture,
        temporal_antialiasing: bool,
    ) -> Result<(), RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Post Processing");
        let targets = &resources.targets;
        let settings = &self.config.settings;
        {
            let mut batch = cmd_list.barriers();
            source.transition(&mut batch, ResourceState::ShaderRead);
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::ShaderRead);
            targets
                .screen_velocities
                .transition(&mut batch, ResourceState::ShaderRead);
        }

        let color = if temporal_antialiasing {
            let current = &targets.taa[frame.frame_index as usize % 2];
            let history = &targets.taa[1 - frame.frame_index as usize % 2];
            current.transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.taa,
                &frame.screen_constants(),
                frame.camera_constants,
                &[
                    source.texture().srv(),
                    history.texture().srv(),
                    targets.screen_velocities.texture().srv(),
                    targets.depth_stencil.texture().srv(),
                    current.texture().uav(),
                ],
                frame.full_res_groups(),
            )?;
            current.transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
            current
        } else {
            source
        };

        let bloom = if settings.enable_bloom {
            let bloom_groups = frame.half_res_groups();
            let constants = |horizontal: bool| BloomConstants {
                threshold: settings.bloom_threshold,
                horizontal: horizontal as u32,
                width: targets.bloom.texture().width(),
                height: targets.bloom.texture().height(),
            };

            targets
                .bloom
                .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.bloom_threshold,
                &constants(false),
                frame.camera_constants,
                &[color.texture().srv(), targets.bloom.texture().uav()],
                bloom_groups,
            )?;

            {
                let mut batch = cmd_list.barriers();
                targets.bloom.transition(&mut batch, ResourceState::ShaderRead);
                targets
                    .bloom_temp
                    .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            }
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.blur,
                &constants(true),
                frame.camera_constants,
                &[targets.bloom.texture().srv(), targets.bloom_temp.texture().uav()],
                bloom_groups,
            )?;

            {
                let mut batch = cmd_list.barriers();
                targets
                    .bloom_temp
                    .transition(&mut batch, ResourceState::ShaderRead);
                targets
                    .bloom
                    .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            }
            self.dispatch_compute(
                &mut cmd_list,
                &self.pipelines.blur,
                &constants(false),
                frame.camera_constants,
                &[targets.bloom_temp.texture().srv(), targets.bloom.texture().uav()],
                bloom_groups,
            )?;
            targets
                .bloom
                .transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
            targets.bloom.texture().srv()
        } else {
            resources.fallback.black.texture().srv()
        };

        targets
            .ldr_post_process
            .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);
        let tonemap = &settings.tonemap;
        self.dispatch_compute(
            &mut cmd_list,
            &self.pipelines.tonemap,
            &TonemapConstants {
                shoulder_strength: tonemap.shoulder_strength,
                linear_strength: tonemap.linear_strength,
                linear_angle: tonemap.linear_angle,
                toe_strength: tonemap.toe_strength,
                toe_numerator: tonemap.toe_numerator,
                toe_denominator: tonemap.toe_denominator,
                linear_white: tonemap.linear_white,
                exposure: tonemap.exposure,
                bloom_strength: if settings.enable_bloom {
                    settings.bloom_strength
                } else {
                    0.0
                },
                width: frame.width,
                height: frame.height,
                padding: 0,
            },
            frame.camera_constants,
            &[
                color.texture().srv(),
                bloom,
                targets.ldr_post_process.texture().uav(),
            ],
            frame.full_res_groups(),
        )?;
        Ok(())
    }

    fn outlined_draw_calls(&self) -> impl Iterator<Item = &DrawCall> {
        let geometries = [
            self.passes.opaque.as_ref().map(|pass| &pass.geometry),
            self.passes.transparent.as_ref().map(|pass| &pass.geometry),
            self.passes.overlay.as_ref().map(|pass| &pass.geometry),
        ];
        geometries.into_iter().flatten().flat_map(|geometry| {
            geometry
                .outlined_objects()
                .iter()
                .map(move |index| &geometry.draw_calls()[*index as usize])
        })
    }

    fn draw_outlined_objects(&self, cmd_list: &mut CommandList, view_projection: &Matrix4f32) {
        for draw_call in self.outlined_draw_calls() {
            let (Some(mesh), DrawGeometry::Mesh(submesh)) = (&draw_call.mesh, draw_call.geometry)
            else {
                continue;
            };

            cmd_list.set_root_constants(
                PipelineBindPoint::Graphics,
                0,
                &TransformConstants::new(view_projection, &draw_call.transform),
            );
            mesh.bind_positions(cmd_list);
            draw_submesh(cmd_list, &submesh);
        }
    }

    /// Overlays on top of the tonemapped image, then outlines around selected objects. Outlined
    /// objects are first marked in the stencil buffer, the outline is drawn where they are not
    fn record_overlay(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        frame: &FrameData,
    ) -> Result<usize, RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Overlay");
        let targets = &resources.targets;
        {
            let mut batch = cmd_list.barriers();
            targets
                .ldr_post_process
                .transition(&mut batch, ResourceState::RenderTargetWrite);
            targets
                .depth_stencil
                .transition(&mut batch, ResourceState::DepthWrite);
        }

        let ldr = targets.ldr_post_process.texture().rtv();
        let dsv = targets.depth_stencil.texture().dsv();
        cmd_list.set_render_targets(&[ldr], Some(dsv));
        cmd_list.clear_depth_stencil(dsv, 1.0, 0);
        cmd_list.set_viewport(frame.viewport());
        cmd_list.set_scissor(frame.scissor());

        let mut setups = 0;
        if let Some(pass) = &self.passes.overlay {
            let info = self.common_material_info(
                &mut cmd_list,
                resources,
                frame,
                resources.light_culling.transparent_light_grid().texture().srv(),
            )?;
            setups = self.record_geometry(
                &mut cmd_list,
                &info,
                &pass.geometry,
                &frame.overlay_view_projection,
            )?;
        }

        if self.outlined_draw_calls().next().is_none() {
            return Ok(setups);
        }

        cmd_list.begin_event("Outline Stencil");
        cmd_list.set_render_targets(&[], Some(dsv));
        self.pipelines.outline_marker.bind(&mut cmd_list);
        cmd_list.set_stencil_ref(OUTLINE_STENCIL_REF);
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);
        self.draw_outlined_objects(&mut cmd_list, &frame.overlay_view_projection);
        cmd_list.end_event();

        cmd_list.begin_event("Outline");
        targets
            .depth_stencil
            .transition(&mut cmd_list.barriers(), ResourceState::DepthRead);
        cmd_list.set_render_targets(&[ldr], Some(dsv));
        self.pipelines.outline.bind(&mut cmd_list);
        cmd_list.set_stencil_ref(OUTLINE_STENCIL_REF);
        self.draw_outlined_objects(&mut cmd_list, &frame.overlay_view_projection);
        cmd_list.end_event();
        Ok(setups)
    }

    /// Sharpen and letterbox the LDR image into the output target, leaving it in its idle state
    fn record_present(
        &self,
        cmd_list: &mut CommandList,
        resources: &FrameResources,
        output: &FrameOutput,
        pipeline: &Pipeline,
    ) -> Result<(), RendererError> {
        let mut cmd_list = DebugEventScope::new(cmd_list, "Present");
        let targets = &resources.targets;
        let target = output.target.texture();
        {
            let mut batch = cmd_list.barriers();
            targets
                .ldr_post_process
                .transition(&mut batch, ResourceState::ShaderRead);
            target.transition(&mut batch, ResourceState::RenderTargetWrite);
        }

        let rtv = target.texture().rtv();
        cmd_list.set_render_targets(&[rtv], None);
        cmd_list.clear_render_target(rtv, [0.0, 0.0, 0.0, 1.0]);

        let settings = &self.config.settings;
        let rect = settings.aspect_ratio.render_rect(
            output.viewport.width.max(0) as u32,
            output.viewport.height.max(0) as u32,
        );
        set_viewport_rect(
            &mut cmd_list,
            RectI32::new(
                output.viewport.x + rect.x,
                output.viewport.y + rect.y,
                rect.width,
                rect.height,
            ),
        );

        pipeline.bind(&mut cmd_list);
        cmd_list.set_root_constants(
            PipelineBindPoint::Graphics,
            root::CONSTANTS,
            &PresentConstants {
                sharpen_strength: settings.sharpen_strength,
                enable_sharpen: settings.enable_sharpen as u32,
                padding: [0; 2],
            },
        );
        bind_descriptor_table(
            &self.context,
            &mut cmd_list,
            PipelineBindPoint::Graphics,
            root::RESOURCES,
            &[targets.ldr_post_process.texture().srv()],
        )?;
        cmd_list.set_primitive_topology(PrimitiveTopology::TriangleList);
        cmd_list.draw(3, 1, 0, 0);

        target.transition(&mut cmd_list.barriers(), output.target.idle_state());
        Ok(())
    }

    /// Record the frame into `output` and submit it. Returns the render queue fence value
    pub fn end_frame(&mut self, output: &FrameOutput) -> Result<u64, RendererError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        if self.resources.is_none() {
            return Err(RendererError::NotInitialized);
        }

        let present_pipeline = self
            .pipelines
            .present(&self.pipeline_factory, output.target.format())?;
        let tlas = self.path_tracing_tlas();
        let context = self.context.clone();

        if let Some(fence) = self.compute_fence.take() {
            context
                .render_queue()
                .wait_for_other_queue_value(context.compute_queue(), fence)?;
        }

        let resources = self.resources.as_ref().ok_or(RendererError::NotInitialized)?;
        let mut cmd_list = context.get_free_render_command_list()?;
        let frame = self.prepare_frame(&mut cmd_list, &resources.targets, tlas.is_some())?;
        let mut stats = FrameStats {
            path_traced: tlas.is_some(),
            ..Default::default()
        };

        let post_source = match (tlas, &resources.path_tracer) {
            (Some(tlas), Some(path_tracer)) => {
                let mut cmd_list = DebugEventScope::new(&mut cmd_list, "Path Tracing");
                path_tracer.trace(
                    &context,
                    &mut cmd_list,
                    tlas,
                    frame.camera_constants,
                    self.scene
                        .environment
                        .map_or(resources.fallback.black_cube.texture().srv(), |environment| {
                            environment.sky
                        }),
                    &resources.targets.hdr_color,
                    frame.frame_index,
                    self.config.settings.sky_intensity,
                    self.config.settings.environment_intensity,
                )?;
                &resources.targets.hdr_color
            }
            _ => {
                self.record_depth_pre_pass(&mut cmd_list, resources, &frame);
                self.record_light_culling(&mut cmd_list, resources, &frame)?;
                self.record_linear_depth_pyramid(&mut cmd_list, resources, &frame)?;
                stats.shadow_passes = self.record_shadow_maps(&mut cmd_list, resources);
                self.record_sky(&mut cmd_list, resources, &frame)?;
                stats.material_setups += self.record_opaque(&mut cmd_list, resources, &frame)?;
                self.record_reflections(&mut cmd_list, resources, &frame)?;
                stats.material_setups +=
                    self.record_transparent(&mut cmd_list, resources, &frame)?;
                &resources.targets.hdr_post_process
            }
        };

        let temporal_antialiasing =
            self.config.settings.enable_temporal_antialiasing && !stats.path_traced;
        self.record_post_processing(
            &mut cmd_list,
            resources,
            &frame,
            post_source,
            temporal_antialiasing,
        )?;
        stats.material_setups += self.record_overlay(&mut cmd_list, resources, &frame)?;
        self.record_present(&mut cmd_list, resources, output, &present_pipeline)?;

        stats.draw_calls = [
            self.passes.opaque.as_ref().map(|pass| pass.geometry.draw_calls().len()),
            self.passes.transparent.as_ref().map(|pass| pass.geometry.draw_calls().len()),
            self.passes.overlay.as_ref().map(|pass| pass.geometry.draw_calls().len()),
        ]
        .into_iter()
        .flatten()
        .sum();

        let fence = context.execute(cmd_list)?;

        self.prev_frame_view_projection = Some(frame.overlay_view_projection);
        self.history_valid = true;
        self.frame_index = self.frame_index.wrapping_add(1);
        self.passes = SubmittedPasses::default();
        self.stats = stats;
        Ok(fence)
    }
}
