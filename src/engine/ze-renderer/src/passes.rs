//! Per-frame draw lists filled by the application and consumed by the renderer
//!
//! A pass only records what to draw. Buffers are referenced through their views, so whoever owns
//! the geometry must keep it alive until the frame has been submitted; dropping a buffer defers
//! its destruction past the frames that may still use it.

use crate::material::{CommonMaterialInfo, MaterialInstance, MaterialPass, MaterialSetup};
use crate::shadow_atlas::{ShadowMapViewport, MAX_NUM_SUN_SHADOW_CASCADES};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use ze_core::maths::{Matrix4f32, Vec3f32};
use ze_gfx::backend::{DeviceError, IndexBufferView, PipelineBindPoint, VertexBufferView};
use ze_gpu_context::CommandList;

/// Part of a mesh to draw
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SubmeshInfo {
    pub first_triangle: u32,
    pub num_triangles: u32,
    pub base_vertex: u32,
    pub num_vertices: u32,
}

/// Vertex streams of a mesh. Positions are split from the other attributes so that depth-only
/// passes only fetch what they need
#[derive(Copy, Clone, Debug)]
pub struct MeshBuffers {
    pub positions: VertexBufferView,
    pub others: Option<VertexBufferView>,
    pub index_buffer: IndexBufferView,
}

impl MeshBuffers {
    pub(crate) fn bind_positions(&self, cmd_list: &mut CommandList) {
        cmd_list.set_vertex_buffer(0, self.positions);
        cmd_list.set_index_buffer(self.index_buffer);
    }

    pub(crate) fn bind_all(&self, cmd_list: &mut CommandList) {
        match self.others {
            Some(others) => cmd_list.set_vertex_buffers(0, &[self.positions, others]),
            None => cmd_list.set_vertex_buffer(0, self.positions),
        }
        cmd_list.set_index_buffer(self.index_buffer);
    }
}

pub(crate) fn draw_submesh(cmd_list: &mut CommandList, submesh: &SubmeshInfo) {
    cmd_list.draw_indexed(
        submesh.num_triangles * 3,
        1,
        submesh.first_triangle * 3,
        submesh.base_vertex as i32,
        0,
    );
}

/// Root constants every geometry pipeline takes in parameter 0
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct TransformConstants {
    pub mvp: [f32; 16],
    pub model: [f32; 16],
}

impl TransformConstants {
    pub fn new(view_projection: &Matrix4f32, model: &Matrix4f32) -> Self {
        Self {
            mvp: (*view_projection * *model).as_floats(),
            model: model.as_floats(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DrawGeometry {
    Mesh(SubmeshInfo),
    MeshShader { x: u32, y: u32, z: u32 },
}

#[derive(Clone)]
pub struct DrawCall {
    pub transform: Matrix4f32,
    pub mesh: Option<MeshBuffers>,
    pub geometry: DrawGeometry,
    pub material: Arc<dyn MaterialInstance>,
    pub setup: MaterialSetup,
    pub set_transform: bool,
}

/// Draws and outlines shared by the opaque, transparent and overlay passes
#[derive(Default)]
pub struct GeometryPass {
    pub(crate) draw_calls: Vec<DrawCall>,
    pub(crate) outlined_objects: Vec<u32>,
}

impl GeometryPass {
    fn push(&mut self, draw_call: DrawCall, outline: bool) {
        self.draw_calls.push(draw_call);
        if outline {
            let index = u32::try_from(self.draw_calls.len() - 1)
                .unwrap_or_else(|_| panic!("Too many draw calls in one pass to outline"));
            self.outlined_objects.push(index);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_mesh<M: MaterialInstance + 'static>(
        &mut self,
        pass: MaterialPass,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        outline: bool,
        set_transform: bool,
    ) {
        self.push(
            DrawCall {
                transform,
                mesh: Some(mesh),
                geometry: DrawGeometry::Mesh(submesh),
                setup: material.setup(pass),
                material: material.clone(),
                set_transform,
            },
            outline,
        );
    }

    pub fn draw_calls(&self) -> &[DrawCall] {
        &self.draw_calls
    }

    /// Indices into [`Self::draw_calls`]
    pub fn outlined_objects(&self) -> &[u32] {
        &self.outlined_objects
    }

    pub fn is_empty(&self) -> bool {
        self.draw_calls.is_empty()
    }

    pub fn reset(&mut self) {
        self.draw_calls.clear();
        self.outlined_objects.clear();
    }
}

/// Record every draw of `draw_calls`, running a material setup only when it differs from the
/// previous draw's. Mesh shader draws are skipped when the device cannot run them.
///
/// Returns how many setups were applied.
pub(crate) fn record_draw_calls(
    cmd_list: &mut CommandList,
    draw_calls: &[DrawCall],
    info: &CommonMaterialInfo,
    view_projection: &Matrix4f32,
    mesh_shaders: bool,
) -> Result<usize, DeviceError> {
    let mut last_setup = None;
    let mut setup_count = 0;

    for draw_call in draw_calls {
        if let DrawGeometry::MeshShader { .. } = draw_call.geometry {
            if !mesh_shaders {
                continue;
            }
        }

        if last_setup != Some(draw_call.setup.id()) {
            draw_call.setup.apply(cmd_list, info);
            last_setup = Some(draw_call.setup.id());
            setup_count += 1;
        }

        draw_call.material.prepare_for_rendering(cmd_list)?;
        if draw_call.set_transform {
            cmd_list.set_root_constants(
                PipelineBindPoint::Graphics,
                0,
                &TransformConstants::new(view_projection, &draw_call.transform),
            );
        }

        match draw_call.geometry {
            DrawGeometry::Mesh(submesh) => {
                if let Some(mesh) = &draw_call.mesh {
                    mesh.bind_all(cmd_list);
                }
                draw_submesh(cmd_list, &submesh);
            }
            DrawGeometry::MeshShader { x, y, z } => cmd_list.dispatch_mesh(x, y, z),
        }
    }

    Ok(setup_count)
}

#[derive(Copy, Clone, Debug)]
pub struct DepthOnlyDrawCall {
    pub transform: Matrix4f32,
    pub prev_frame_transform: Matrix4f32,
    pub mesh: MeshBuffers,
    pub submesh: SubmeshInfo,
    pub object_id: u16,
}

#[derive(Copy, Clone, Debug)]
pub struct AnimatedDepthOnlyDrawCall {
    pub transform: Matrix4f32,
    pub prev_frame_transform: Matrix4f32,
    pub mesh: MeshBuffers,
    pub prev_frame_positions: VertexBufferView,
    pub submesh: SubmeshInfo,
    pub prev_frame_submesh: SubmeshInfo,
    pub object_id: u16,
}

/// Root constants of the depth pre-pass pipelines
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct DepthOnlyConstants {
    mvp: [f32; 16],
    prev_frame_mvp: [f32; 16],
    object_id: u32,
    padding: [u32; 3],
}

impl DepthOnlyConstants {
    fn new(
        view_projection: &Matrix4f32,
        prev_frame_view_projection: &Matrix4f32,
        transform: &Matrix4f32,
        prev_frame_transform: &Matrix4f32,
        object_id: u16,
    ) -> Self {
        Self {
            mvp: (*view_projection * *transform).as_floats(),
            prev_frame_mvp: (*prev_frame_view_projection * *prev_frame_transform).as_floats(),
            object_id: object_id as u32,
            padding: [0; 3],
        }
    }
}

pub(crate) fn record_depth_only_draw_calls(
    cmd_list: &mut CommandList,
    draw_calls: &[DepthOnlyDrawCall],
    view_projection: &Matrix4f32,
    prev_frame_view_projection: &Matrix4f32,
) {
    for draw_call in draw_calls {
        cmd_list.set_root_constants(
            PipelineBindPoint::Graphics,
            0,
            &DepthOnlyConstants::new(
                view_projection,
                prev_frame_view_projection,
                &draw_call.transform,
                &draw_call.prev_frame_transform,
                draw_call.object_id,
            ),
        );
        draw_call.mesh.bind_positions(cmd_list);
        draw_submesh(cmd_list, &draw_call.submesh);
    }
}

/// The previous frame's positions are fetched from a second stream with the same indices
pub(crate) fn record_animated_depth_only_draw_calls(
    cmd_list: &mut CommandList,
    draw_calls: &[AnimatedDepthOnlyDrawCall],
    view_projection: &Matrix4f32,
    prev_frame_view_projection: &Matrix4f32,
) {
    for draw_call in draw_calls {
        cmd_list.set_root_constants(
            PipelineBindPoint::Graphics,
            0,
            &DepthOnlyConstants::new(
                view_projection,
                prev_frame_view_projection,
                &draw_call.transform,
                &draw_call.prev_frame_transform,
                draw_call.object_id,
            ),
        );

        let stride = draw_call.prev_frame_positions.stride_in_bytes as i64;
        let shift = draw_call.prev_frame_submesh.base_vertex as i64
            - draw_call.submesh.base_vertex as i64;
        let prev_frame_positions = VertexBufferView {
            address: (draw_call.prev_frame_positions.address as i64 + shift * stride) as u64,
            ..draw_call.prev_frame_positions
        };
        cmd_list.set_vertex_buffers(0, &[draw_call.mesh.positions, prev_frame_positions]);
        cmd_list.set_index_buffer(draw_call.mesh.index_buffer);
        draw_submesh(cmd_list, &draw_call.submesh);
    }
}

/// Opaque geometry. Also feeds the depth pre-pass, which writes screen space velocities and
/// needs to know how each object moved since the previous frame
#[derive(Default)]
pub struct OpaqueRenderPass {
    pub(crate) geometry: GeometryPass,
    pub(crate) static_depth_only: Vec<DepthOnlyDrawCall>,
    pub(crate) dynamic_depth_only: Vec<DepthOnlyDrawCall>,
    pub(crate) animated_depth_only: Vec<AnimatedDepthOnlyDrawCall>,
}

impl OpaqueRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render_static_object<M: MaterialInstance + 'static>(
        &mut self,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        object_id: u16,
        outline: bool,
    ) {
        self.geometry.push_mesh(
            MaterialPass::Opaque,
            mesh,
            submesh,
            material,
            transform,
            outline,
            true,
        );
        self.static_depth_only.push(DepthOnlyDrawCall {
            transform,
            prev_frame_transform: transform,
            mesh,
            submesh,
            object_id,
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render_dynamic_object<M: MaterialInstance + 'static>(
        &mut self,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        prev_frame_transform: Matrix4f32,
        object_id: u16,
        outline: bool,
    ) {
        self.geometry.push_mesh(
            MaterialPass::Opaque,
            mesh,
            submesh,
            material,
            transform,
            outline,
            true,
        );
        self.dynamic_depth_only.push(DepthOnlyDrawCall {
            transform,
            prev_frame_transform,
            mesh,
            submesh,
            object_id,
        });
    }

    /// `prev_frame` is the previous frame's skinned positions and submesh, if the object was
    /// already skinned last frame
    #[allow(clippy::too_many_arguments)]
    pub fn render_animated_object<M: MaterialInstance + 'static>(
        &mut self,
        mesh: MeshBuffers,
        prev_frame: Option<(VertexBufferView, SubmeshInfo)>,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        prev_frame_transform: Matrix4f32,
        object_id: u16,
        outline: bool,
    ) {
        self.geometry.push_mesh(
            MaterialPass::Opaque,
            mesh,
            submesh,
            material,
            transform,
            outline,
            true,
        );

        let (prev_frame_positions, prev_frame_submesh) =
            prev_frame.unwrap_or((mesh.positions, submesh));
        self.animated_depth_only.push(AnimatedDepthOnlyDrawCall {
            transform,
            prev_frame_transform,
            mesh,
            prev_frame_positions,
            submesh,
            prev_frame_submesh,
            object_id,
        });
    }

    pub fn geometry(&self) -> &GeometryPass {
        &self.geometry
    }

    pub fn depth_only_count(&self) -> usize {
        self.static_depth_only.len() + self.dynamic_depth_only.len() + self.animated_depth_only.len()
    }

    pub fn reset(&mut self) {
        self.geometry.reset();
        self.static_depth_only.clear();
        self.dynamic_depth_only.clear();
        self.animated_depth_only.clear();
    }
}

/// Blended geometry, drawn after the opaque lighting without velocities
#[derive(Default)]
pub struct TransparentRenderPass {
    pub(crate) geometry: GeometryPass,
}

impl TransparentRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_object<M: MaterialInstance + 'static>(
        &mut self,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        outline: bool,
    ) {
        self.geometry.push_mesh(
            MaterialPass::Transparent,
            mesh,
            submesh,
            material,
            transform,
            outline,
            true,
        );
    }

    pub fn geometry(&self) -> &GeometryPass {
        &self.geometry
    }

    pub fn reset(&mut self) {
        self.geometry.reset();
    }
}

/// Drawn after post-processing, on top of the tonemapped image
#[derive(Default)]
pub struct OverlayRenderPass {
    pub(crate) geometry: GeometryPass,
}

impl OverlayRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_object<M: MaterialInstance + 'static>(
        &mut self,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        material: &Arc<M>,
        transform: Matrix4f32,
        set_transform: bool,
        outline: bool,
    ) {
        self.geometry.push_mesh(
            MaterialPass::Overlay,
            mesh,
            submesh,
            material,
            transform,
            outline,
            set_transform,
        );
    }

    /// Ignored on devices without mesh shaders
    pub fn render_object_with_mesh_shader<M: MaterialInstance + 'static>(
        &mut self,
        dispatch: (u32, u32, u32),
        material: &Arc<M>,
        transform: Matrix4f32,
        set_transform: bool,
    ) {
        let (x, y, z) = dispatch;
        self.geometry.push(
            DrawCall {
                transform,
                mesh: None,
                geometry: DrawGeometry::MeshShader { x, y, z },
                setup: material.setup(MaterialPass::Overlay),
                material: material.clone(),
                set_transform,
            },
            false,
        );
    }

    pub fn geometry(&self) -> &GeometryPass {
        &self.geometry
    }

    pub fn reset(&mut self) {
        self.geometry.reset();
    }
}

#[derive(Copy, Clone, Debug)]
pub struct ShadowDrawCall {
    pub transform: Matrix4f32,
    pub mesh: MeshBuffers,
    pub submesh: SubmeshInfo,
}

pub(crate) fn record_shadow_draw_calls<'a>(
    cmd_list: &mut CommandList,
    draw_calls: impl IntoIterator<Item = &'a ShadowDrawCall>,
    view_projection: &Matrix4f32,
) {
    for draw_call in draw_calls {
        cmd_list.set_root_constants(
            PipelineBindPoint::Graphics,
            0,
            &TransformConstants::new(view_projection, &draw_call.transform),
        );
        draw_call.mesh.bind_positions(cmd_list);
        draw_submesh(cmd_list, &draw_call.submesh);
    }
}

#[derive(Default)]
pub struct SunShadowRenderPass {
    pub num_cascades: u32,
    pub viewports: [ShadowMapViewport; MAX_NUM_SUN_SHADOW_CASCADES],
    pub view_projections: [Matrix4f32; MAX_NUM_SUN_SHADOW_CASCADES],
    pub(crate) draw_calls: [Vec<ShadowDrawCall>; MAX_NUM_SUN_SHADOW_CASCADES],
}

impl SunShadowRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// A draw submitted to cascade `n` is also rendered into every cascade below `n`, since each
    /// cascade contains the ones before it
    pub fn render_object(
        &mut self,
        cascade_index: u32,
        mesh: MeshBuffers,
        submesh: SubmeshInfo,
        transform: Matrix4f32,
    ) {
        assert!((cascade_index as usize) < MAX_NUM_SUN_SHADOW_CASCADES);
        self.draw_calls[cascade_index as usize].push(ShadowDrawCall {
            transform,
            mesh,
            submesh,
        });
    }

    /// Draws to render into `cascade_index`
    pub fn cascade_draw_calls(&self, cascade_index: u32) -> impl Iterator<Item = &ShadowDrawCall> {
        self.draw_calls[cascade_index as usize..self.num_cascades as usize]
            .iter()
            .flatten()
    }

    pub fn reset(&mut self) {
        for draw_calls in &mut self.draw_calls {
            draw_calls.clear();
        }
    }
}

#[derive(Default)]
pub struct SpotShadowRenderPass {
    pub view_projection: Matrix4f32,
    pub viewport: ShadowMapViewport,
    pub(crate) draw_calls: Vec<ShadowDrawCall>,
}

impl SpotShadowRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_object(&mut self, mesh: MeshBuffers, submesh: SubmeshInfo, transform: Matrix4f32) {
        self.draw_calls.push(ShadowDrawCall {
            transform,
            mesh,
            submesh,
        });
    }

    pub fn reset(&mut self) {
        self.draw_calls.clear();
    }
}

/// Dual paraboloid shadow of a point light, one viewport per hemisphere
#[derive(Default)]
pub struct PointShadowRenderPass {
    pub viewports: [ShadowMapViewport; 2],
    pub light_position: Vec3f32,
    pub max_distance: f32,
    pub(crate) draw_calls: Vec<ShadowDrawCall>,
}

impl PointShadowRenderPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render_object(&mut self, mesh: MeshBuffers, submesh: SubmeshInfo, transform: Matrix4f32) {
        self.draw_calls.push(ShadowDrawCall {
            transform,
            mesh,
            submesh,
        });
    }

    pub fn reset(&mut self) {
        self.draw_calls.clear();
    }
}
