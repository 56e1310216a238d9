//! Small scene rendered by the viewer: a floor and a cube sliding on top of it.

use std::sync::Arc;
use ze_core::maths::{Matrix4f32, Vec3f32};
use ze_gfx::backend::{
    BufferDesc, BufferUsageFlagBits, CompareOp, DeviceError, GraphicsPipelineStates,
    IndexBufferFormat, InputElementDesc, MemoryLocation, PipelineBindPoint,
    PipelineDepthStencilState, PipelineRenderTargetBlendDesc, ResourceState,
};
use ze_gfx::PixelFormat;
use ze_gpu_context::{Buffer, CommandList, GpuContext};
use ze_renderer::{
    CommonMaterialInfo, MaterialInstance, MaterialPass, MaterialSetup, MeshBuffers,
    OpaqueRenderPass, RenderCamera, Renderer, SubmeshInfo, DEPTH_STENCIL_FORMAT,
    OPAQUE_RENDER_TARGET_FORMATS,
};
use ze_shader_system::{GraphicsPipelineFiles, Pipeline, PipelineFactory, RootSignatureSource};

/// Blobs the demo material needs besides the renderer's own
pub const DEMO_SHADER_FILES: &[&str] = &["demo_material_vs", "demo_material_ps"];

const DEMO_MATERIAL_ID: u32 = 1;
const CAMERA_PARAMETER: u32 = 1;
const COLOR_PARAMETER: u32 = 2;

#[rustfmt::skip]
const CUBE_POSITIONS: [[f32; 3]; 8] = [
    [-0.5, -0.5, -0.5], [0.5, -0.5, -0.5], [0.5, 0.5, -0.5], [-0.5, 0.5, -0.5],
    [-0.5, -0.5, 0.5], [0.5, -0.5, 0.5], [0.5, 0.5, 0.5], [-0.5, 0.5, 0.5],
];

#[rustfmt::skip]
const CUBE_INDICES: [u16; 36] = [
    0, 2, 1, 0, 3, 2,
    4, 5, 6, 4, 6, 7,
    0, 1, 5, 0, 5, 4,
    3, 6, 2, 3, 7, 6,
    0, 4, 7, 0, 7, 3,
    1, 2, 6, 1, 6, 5,
];

/// Flat colored opaque material. Takes the camera as a root constant buffer and its color as
/// root constants
pub struct DemoMaterial {
    pipeline: Pipeline,
    color: [f32; 4],
}

impl DemoMaterial {
    /// Declare the material pipeline. It is built along with the renderer's
    pub fn declare(factory: &PipelineFactory) -> Pipeline {
        let states = GraphicsPipelineStates {
            input_layout: vec![InputElementDesc {
                semantic_name: "POSITION",
                semantic_index: 0,
                format: PixelFormat::R32G32B32Float,
                input_slot: 0,
                aligned_byte_offset: 0,
            }],
            render_target_formats: OPAQUE_RENDER_TARGET_FORMATS.to_vec(),
            blend: vec![PipelineRenderTargetBlendDesc::default(); OPAQUE_RENDER_TARGET_FORMATS.len()],
            depth_stencil_format: DEPTH_STENCIL_FORMAT,
            depth_stencil: PipelineDepthStencilState {
                enable_depth_write: false,
                depth_compare_op: CompareOp::Equal,
                ..Default::default()
            },
            ..Default::default()
        };

        factory.create_reloadable_graphics_pipeline(
            states,
            GraphicsPipelineFiles::new()
                .vs(DEMO_SHADER_FILES[0])
                .ps(DEMO_SHADER_FILES[1]),
            RootSignatureSource::FromShader,
        )
    }

    pub fn new(pipeline: Pipeline, color: [f32; 4]) -> Arc<Self> {
        Arc::new(Self { pipeline, color })
    }
}

impl MaterialInstance for DemoMaterial {
    fn setup(&self, _: MaterialPass) -> MaterialSetup {
        let pipeline = self.pipeline.clone();
        MaterialSetup::new(
            DEMO_MATERIAL_ID,
            move |cmd_list: &mut CommandList, info: &CommonMaterialInfo| {
                pipeline.bind(cmd_list);
                cmd_list.set_root_constant_buffer(
                    PipelineBindPoint::Graphics,
                    CAMERA_PARAMETER,
                    info.camera_constants,
                );
            },
        )
    }

    fn prepare_for_rendering(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError> {
        cmd_list.set_root_constants(PipelineBindPoint::Graphics, COLOR_PARAMETER, &self.color);
        Ok(())
    }
}

struct CubeMesh {
    positions: Buffer,
    indices: Buffer,
}

impl CubeMesh {
    fn new(context: &GpuContext) -> Result<Self, DeviceError> {
        let upload = |size_bytes: u64, usage, element_size, name| {
            context.create_buffer(
                &BufferDesc {
                    size_bytes,
                    usage,
                    memory_location: MemoryLocation::CpuToGpu,
                    default_resource_state: ResourceState::GenericRead,
                },
                element_size,
                name,
            )
        };

        let positions = upload(
            std::mem::size_of_val(&CUBE_POSITIONS) as u64,
            BufferUsageFlagBits::VertexBuffer.into(),
            12,
            "Cube Positions",
        )?;
        positions.write_pod(0, &CUBE_POSITIONS);

        let indices = upload(
            std::mem::size_of_val(&CUBE_INDICES) as u64,
            BufferUsageFlagBits::IndexBuffer.into(),
            2,
            "Cube Indices",
        )?;
        indices.write_pod(0, &CUBE_INDICES);

        Ok(Self { positions, indices })
    }

    fn buffers(&self) -> MeshBuffers {
        MeshBuffers {
            positions: self
                .positions
                .vertex_buffer_view(0, self.positions.size_bytes() as u32),
            others: None,
            index_buffer: self.indices.index_buffer_view(IndexBufferFormat::Uint16),
        }
    }

    fn submesh() -> SubmeshInfo {
        SubmeshInfo {
            first_triangle: 0,
            num_triangles: CUBE_INDICES.len() as u32 / 3,
            base_vertex: 0,
            num_vertices: CUBE_POSITIONS.len() as u32,
        }
    }
}

/// Left handed perspective projection, depth mapped to [0, 1]
pub fn perspective(fov_y: f32, aspect_ratio: f32, near: f32, far: f32) -> Matrix4f32 {
    let y_scale = 1.0 / (fov_y * 0.5).tan();
    let x_scale = y_scale / aspect_ratio;
    let range = far / (far - near);
    Matrix4f32::from_columns([
        [x_scale, 0.0, 0.0, 0.0],
        [0.0, y_scale, 0.0, 0.0],
        [0.0, 0.0, range, 1.0],
        [0.0, 0.0, -near * range, 0.0],
    ])
}

pub struct DemoScene {
    mesh: CubeMesh,
    floor_material: Arc<DemoMaterial>,
    cube_material: Arc<DemoMaterial>,
    prev_cube_transform: Matrix4f32,
}

impl DemoScene {
    pub fn new(context: &GpuContext, pipeline: Pipeline) -> Result<Self, DeviceError> {
        Ok(Self {
            mesh: CubeMesh::new(context)?,
            floor_material: DemoMaterial::new(pipeline.clone(), [0.6, 0.6, 0.6, 1.0]),
            cube_material: DemoMaterial::new(pipeline, [0.8, 0.2, 0.1, 1.0]),
            prev_cube_transform: Matrix4f32::IDENTITY,
        })
    }

    fn cube_transform(frame_id: u64) -> Matrix4f32 {
        let offset = (frame_id as f32 * 0.02).sin() * 2.0;
        Matrix4f32::translation(Vec3f32::new(offset, 0.5, 0.0))
    }

    /// Fill this frame's passes
    pub fn populate(&mut self, renderer: &mut Renderer, frame_id: u64, width: u32, height: u32) {
        let camera = RenderCamera {
            view: Matrix4f32::translation(Vec3f32::new(0.0, -1.0, 6.0)),
            projection: perspective(
                std::f32::consts::FRAC_PI_3,
                width as f32 / height.max(1) as f32,
                0.1,
                1000.0,
            ),
            position: Vec3f32::new(0.0, 1.0, -6.0),
            near_plane: 0.1,
            far_plane: 1000.0,
        };
        renderer.set_camera(camera);

        let floor_transform = Matrix4f32::scale(Vec3f32::new(10.0, 0.1, 10.0));
        let cube_transform = Self::cube_transform(frame_id);

        let mut opaque = OpaqueRenderPass::new();
        opaque.render_static_object(
            self.mesh.buffers(),
            CubeMesh::submesh(),
            &self.floor_material,
            floor_transform,
            1,
            false,
        );
        opaque.render_dynamic_object(
            self.mesh.buffers(),
            CubeMesh::submesh(),
            &self.cube_material,
            cube_transform,
            self.prev_cube_transform,
            2,
            true,
        );
        renderer.submit_opaque_pass(opaque);

        self.prev_cube_transform = cube_transform;
    }
}

#[cfg(test)]
mod tests {
    use crate::demo::{perspective, CubeMesh, DemoScene, CUBE_INDICES, CUBE_POSITIONS};

    #[test]
    fn cube_indices_stay_in_range() {
        assert!(CUBE_INDICES
            .iter()
            .all(|index| (*index as usize) < CUBE_POSITIONS.len()));
        assert_eq!(CubeMesh::submesh().num_triangles, 12);
    }

    #[test]
    fn perspective_maps_near_and_far_planes() {
        let projection = perspective(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 10.0);
        let project_depth = |z: f32| {
            let columns = projection.columns();
            let clip_z = columns[2][2] * z + columns[3][2];
            let clip_w = columns[2][3] * z + columns[3][3];
            clip_z / clip_w
        };
        assert!(project_depth(1.0).abs() < 1e-5);
        assert!((project_depth(10.0) - 1.0).abs() < 1e-5);
        assert!((projection.columns()[1][1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cube_moves_between_frames() {
        assert_ne!(DemoScene::cube_transform(0), DemoScene::cube_transform(10));
    }
}
