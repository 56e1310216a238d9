use crate::targets::TrackedBuffer;
use bytemuck::{Pod, Zeroable};
use ze_core::maths::Matrix4f32;
use ze_gfx::backend::{
    BufferDesc, BufferUsageFlagBits, DeviceError, MemoryLocation, PipelineBindPoint,
    ResourceState, VertexBufferView,
};
use ze_gfx::utils::{bucketize, CONSTANT_BUFFER_ALIGNMENT};
use ze_gpu_context::{Buffer, GpuContext};
use ze_shader_system::Pipeline;

pub const MAX_SKINNING_MATRICES_PER_FRAME: u32 = 4096;
pub const MAX_SKINNED_VERTICES_PER_FRAME: u32 = 256 * 1024;

/// Position, normal, tangent and texture coordinates
pub const SKINNED_VERTEX_SIZE: u32 = 44;

const SKINNING_THREAD_GROUP_SIZE: u32 = 512;

mod root {
    pub const CONSTANTS: u32 = 0;
    pub const INPUT_VERTICES: u32 = 1;
    pub const MATRICES: u32 = 2;
    pub const OUTPUT_VERTICES: u32 = 3;
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct SkinningConstants {
    first_input_vertex: u32,
    num_vertices: u32,
    first_matrix: u32,
    first_output_vertex: u32,
}

struct SkinningBatch {
    input_vertices: u64,
    first_input_vertex: u32,
    num_vertices: u32,
    first_matrix: u32,
    first_output_vertex: u32,
}

/// Where the skinned vertices of an object land this frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SkinnedObject {
    pub vertices: VertexBufferView,
    pub first_vertex: u32,
    pub num_vertices: u32,
    pub first_matrix: u32,
}

/// Collects the skinned objects of a frame and skins them all in one compute list.
///
/// The output buffer alternates every frame so the previous frame's positions stay readable for
/// velocities.
pub struct SkinningDispatcher {
    output_buffers: [TrackedBuffer; 2],
    current_output: usize,
    batches: Vec<SkinningBatch>,
    matrices: Vec<Matrix4f32>,
    num_vertices: u32,
}

impl SkinningDispatcher {
    pub fn new(context: &GpuContext) -> Result<Self, DeviceError> {
        let output = |name: &str| {
            TrackedBuffer::new(
                context,
                &BufferDesc {
                    size_bytes: MAX_SKINNED_VERTICES_PER_FRAME as u64 * SKINNED_VERTEX_SIZE as u64,
                    usage: BufferUsageFlagBits::UnorderedAccess | BufferUsageFlagBits::VertexBuffer,
                    memory_location: MemoryLocation::GpuOnly,
                    default_resource_state: ResourceState::VertexAndConstantBufferRead,
                },
                SKINNED_VERTEX_SIZE,
                name,
            )
        };

        Ok(Self {
            output_buffers: [output("Skinned Vertices 0")?, output("Skinned Vertices 1")?],
            current_output: 0,
            batches: vec![],
            matrices: vec![],
            num_vertices: 0,
        })
    }

    /// Queue `num_vertices` vertices of `vertex_buffer` starting at `first_vertex` for skinning
    /// with `num_joints` matrices. The returned slice must be filled with the joint matrices
    pub fn skin_object(
        &mut self,
        vertex_buffer: &Buffer,
        first_vertex: u32,
        num_vertices: u32,
        num_joints: u32,
    ) -> (SkinnedObject, &mut [Matrix4f32]) {
        let first_matrix = self.matrices.len() as u32;
        assert!(
            first_matrix + num_joints <= MAX_SKINNING_MATRICES_PER_FRAME,
            "Too many skinning matrices this frame"
        );
        assert!(
            self.num_vertices + num_vertices <= MAX_SKINNED_VERTICES_PER_FRAME,
            "Too many skinned vertices this frame"
        );

        let first_output_vertex = self.num_vertices;
        self.num_vertices += num_vertices;
        self.batches.push(SkinningBatch {
            input_vertices: vertex_buffer.gpu_address(),
            first_input_vertex: first_vertex,
            num_vertices,
            first_matrix,
            first_output_vertex,
        });

        let vertices = self.output_buffers[self.current_output]
            .buffer()
            .vertex_buffer_view(
                first_output_vertex as u64 * SKINNED_VERTEX_SIZE as u64,
                num_vertices * SKINNED_VERTEX_SIZE,
            );

        self.matrices.resize(
            (first_matrix + num_joints) as usize,
            Matrix4f32::IDENTITY,
        );

        (
            SkinnedObject {
                vertices,
                first_vertex: first_output_vertex,
                num_vertices,
                first_matrix,
            },
            &mut self.matrices[first_matrix as usize..],
        )
    }

    pub fn pending_object_count(&self) -> usize {
        self.batches.len()
    }

    /// Skin every queued object on the async compute queue. Returns the compute fence value the
    /// render queue must wait for, or `None` when nothing was queued
    pub fn perform_skinning(
        &mut self,
        context: &GpuContext,
        pipeline: &Pipeline,
    ) -> Result<Option<u64>, DeviceError> {
        if self.batches.is_empty() {
            return Ok(None);
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let mut cmd_list = context.get_free_compute_command_list(true)?;
        cmd_list.begin_event("Skinning");

        let matrices = self
            .matrices
            .iter()
            .map(Matrix4f32::as_floats)
            .collect::<Vec<_>>();
        let matrices = cmd_list.upload_pod(&matrices, CONSTANT_BUFFER_ALIGNMENT)?;

        let output = &self.output_buffers[self.current_output];
        output.transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);

        pipeline.bind(&mut cmd_list);
        cmd_list.set_root_shader_resource(PipelineBindPoint::Compute, root::MATRICES, matrices);
        cmd_list.set_root_unordered_access(
            PipelineBindPoint::Compute,
            root::OUTPUT_VERTICES,
            output.buffer().gpu_address(),
        );
        for batch in &self.batches {
            cmd_list.set_root_constants(
                PipelineBindPoint::Compute,
                root::CONSTANTS,
                &SkinningConstants {
                    first_input_vertex: batch.first_input_vertex,
                    num_vertices: batch.num_vertices,
                    first_matrix: batch.first_matrix,
                    first_output_vertex: batch.first_output_vertex,
                },
            );
            cmd_list.set_root_shader_resource(
                PipelineBindPoint::Compute,
                root::INPUT_VERTICES,
                batch.input_vertices,
            );
            cmd_list.dispatch(
                bucketize(batch.num_vertices, SKINNING_THREAD_GROUP_SIZE),
                1,
                1,
            );
        }

        {
            let mut batch = cmd_list.barriers();
            output.uav(&mut batch);
            output.transition(&mut batch, ResourceState::VertexAndConstantBufferRead);
        }

        cmd_list.end_event();
        let fence = context.execute(cmd_list)?;

        self.batches.clear();
        self.matrices.clear();
        self.num_vertices = 0;
        self.current_output = (self.current_output + 1) % self.output_buffers.len();
        Ok(Some(fence))
    }
}
