use crate::binding::bind_descriptor_table;
use crate::settings::TlasRebuildMode;
use crate::targets::TrackedTexture;
use bytemuck::{Pod, Zeroable};
use ze_core::maths::Matrix4f32;
use ze_gfx::backend::{
    AccelerationStructureBuildDesc, BufferDesc, BufferUsageFlagBits, CpuDescriptorHandle,
    DeviceError, DispatchRaysDesc, MemoryLocation, PipelineBindPoint, ResourceState,
    ShaderTableRange, RAYTRACING_SHADER_IDENTIFIER_SIZE,
};
use ze_gfx::utils::{
    align_up, ACCELERATION_STRUCTURE_ALIGNMENT, RAYTRACING_SHADER_RECORD_ALIGNMENT,
    RAYTRACING_SHADER_TABLE_ALIGNMENT,
};
use ze_gpu_context::{Buffer, CommandList, GpuContext};
use ze_shader_system::{PipelineError, PipelineFactory, RaytracingPipeline, RaytracingPipelineBuilder};

/// Instance layout consumed by top level acceleration structure builds
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RaytracingInstanceDesc {
    /// Row-major 3x4
    pub transform: [f32; 12],
    pub instance_id_and_mask: u32,
    pub hit_group_offset_and_flags: u32,
    pub acceleration_structure: u64,
}

impl RaytracingInstanceDesc {
    pub fn new(
        blas_address: u64,
        transform: &Matrix4f32,
        instance_id: u32,
        hit_group_offset: u32,
    ) -> Self {
        let columns = transform.columns();
        let mut rows = [0.0; 12];
        for row in 0..3 {
            for column in 0..4 {
                rows[row * 4 + column] = columns[column][row];
            }
        }

        Self {
            transform: rows,
            instance_id_and_mask: (instance_id & 0xFF_FFFF) | (0xFF << 24),
            hit_group_offset_and_flags: hit_group_offset & 0xFF_FFFF,
            acceleration_structure: blas_address,
        }
    }
}

/// Top level acceleration structure rebuilt from this frame's instances.
///
/// Builds run on the async compute queue, the render queue must wait for the returned fence
/// before tracing rays.
pub struct RaytracingTlas {
    mode: TlasRebuildMode,
    instances: Vec<RaytracingInstanceDesc>,
    result: Option<Buffer>,
    scratch: Option<Buffer>,
    built_instance_count: Option<u32>,
}

impl RaytracingTlas {
    pub fn new(mode: TlasRebuildMode) -> Self {
        Self {
            mode,
            instances: vec![],
            result: None,
            scratch: None,
            built_instance_count: None,
        }
    }

    pub fn mode(&self) -> TlasRebuildMode {
        self.mode
    }

    pub fn reset(&mut self) {
        self.instances.clear();
    }

    pub fn instantiate(&mut self, blas_address: u64, transform: &Matrix4f32, hit_group_offset: u32) {
        let instance_id = self.instances.len() as u32;
        self.instances.push(RaytracingInstanceDesc::new(
            blas_address,
            transform,
            instance_id,
            hit_group_offset,
        ));
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// GPU address of the last build, to be bound as a root shader resource
    pub fn address(&self) -> Option<u64> {
        self.built_instance_count?;
        self.result.as_ref().map(Buffer::gpu_address)
    }

    fn grow(
        context: &GpuContext,
        buffer: &mut Option<Buffer>,
        size: u64,
        desc: BufferDesc,
        element_size: u32,
        name: &str,
    ) -> Result<bool, DeviceError> {
        if buffer.as_ref().map_or(false, |buffer| buffer.size_bytes() >= size) {
            return Ok(false);
        }

        // The previous buffer goes through the graveyard when dropped
        *buffer = Some(context.create_buffer(
            &BufferDesc {
                size_bytes: align_up(size, ACCELERATION_STRUCTURE_ALIGNMENT),
                ..desc
            },
            element_size,
            name,
        )?);
        Ok(true)
    }

    /// Record and submit the build. Returns the compute fence value, or `None` when there is
    /// nothing to build
    pub fn build(&mut self, context: &GpuContext) -> Result<Option<u64>, DeviceError> {
        if self.instances.is_empty() {
            return Ok(None);
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let num_instances = self.instances.len() as u32;
        let allow_update = self.mode == TlasRebuildMode::Refit;
        let prebuild_info = context
            .device()
            .tlas_prebuild_info(num_instances, allow_update);

        let result_grown = Self::grow(
            context,
            &mut self.result,
            prebuild_info.result_data_max_size_in_bytes,
            BufferDesc {
                size_bytes: 0,
                usage: BufferUsageFlagBits::AccelerationStructure
                    | BufferUsageFlagBits::ShaderResource
                    | BufferUsageFlagBits::UnorderedAccess,
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::RaytracingAccelerationStructure,
            },
            0,
            "TLAS",
        )?;
        let scratch_grown = Self::grow(
            context,
            &mut self.scratch,
            prebuild_info
                .scratch_data_size_in_bytes
                .max(prebuild_info.update_scratch_data_size_in_bytes),
            BufferDesc {
                size_bytes: 0,
                usage: BufferUsageFlagBits::UnorderedAccess.into(),
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::UnorderedAccessReadWrite,
            },
            4,
            "TLAS Scratch",
        )?;

        let (Some(result), Some(scratch)) = (&self.result, &self.scratch) else {
            return Ok(None);
        };

        let refit = allow_update
            && !result_grown
            && !scratch_grown
            && self.built_instance_count == Some(num_instances);

        let mut cmd_list = context.get_free_compute_command_list(true)?;
        cmd_list.begin_event("Build TLAS");
        let instances = cmd_list.upload_pod(&self.instances, 16)?;
        cmd_list.build_acceleration_structure(&AccelerationStructureBuildDesc {
            dest_address: result.gpu_address(),
            scratch_address: scratch.gpu_address(),
            instances_address: instances,
            num_instances,
            allow_update,
            source_address: refit.then(|| result.gpu_address()),
        });
        cmd_list.uav_barrier(result);
        cmd_list.end_event();

        let fence = context.execute(cmd_list)?;
        self.built_instance_count = Some(num_instances);
        Ok(Some(fence))
    }
}

const PATH_TRACER_LIBRARY: &str = "path_tracer_lib";

mod root {
    pub const CAMERA: u32 = 0;
    pub const SCENE: u32 = 1;
    pub const CONSTANTS: u32 = 2;
    pub const RESOURCES: u32 = 3;
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct PathTracerConstants {
    frame_index: u32,
    sky_intensity: f32,
    environment_intensity: f32,
    padding: u32,
}

/// Traces the scene into the HDR target
pub struct PathTracer {
    pipeline: RaytracingPipeline,
    shader_table: Buffer,
    raygen: ShaderTableRange,
    miss: ShaderTableRange,
    hit_groups: ShaderTableRange,
}

impl PathTracer {
    pub fn new(context: &GpuContext, factory: &PipelineFactory) -> Result<Self, PipelineError> {
        let pipeline = factory.create_raytracing_pipeline(
            &RaytracingPipelineBuilder::new(PATH_TRACER_LIBRARY, "RayGen")
                .hit_group("PrimaryHitGroup", "PrimaryMiss", Some("PrimaryClosestHit"), None)
                .hit_group("ShadowHitGroup", "ShadowMiss", None, Some("ShadowAnyHit"))
                .max_payload_size(32)
                .max_recursion_depth(2),
        )?;

        let record_size = align_up(
            RAYTRACING_SHADER_IDENTIFIER_SIZE as u64,
            RAYTRACING_SHADER_RECORD_ALIGNMENT,
        );
        let miss_offset = align_up(record_size, RAYTRACING_SHADER_TABLE_ALIGNMENT);
        let miss_size = record_size * pipeline.miss_identifiers.len() as u64;
        let hit_group_offset =
            align_up(miss_offset + miss_size, RAYTRACING_SHADER_TABLE_ALIGNMENT);
        let hit_group_size = record_size * pipeline.hit_group_identifiers.len() as u64;

        let shader_table = context
            .create_buffer(
                &BufferDesc {
                    size_bytes: hit_group_offset + hit_group_size,
                    usage: Default::default(),
                    memory_location: MemoryLocation::CpuToGpu,
                    default_resource_state: ResourceState::GenericRead,
                },
                0,
                "Path Tracer Shader Table",
            )
            .map_err(|error| PipelineError::Device {
                name: "Path Tracer Shader Table".to_string(),
                error,
            })?;

        shader_table.write_pod(0, &pipeline.raygen_identifier);
        for (i, identifier) in pipeline.miss_identifiers.iter().enumerate() {
            shader_table.write_pod(miss_offset + i as u64 * record_size, identifier);
        }
        for (i, identifier) in pipeline.hit_group_identifiers.iter().enumerate() {
            shader_table.write_pod(hit_group_offset + i as u64 * record_size, identifier);
        }

        let base = shader_table.gpu_address();
        Ok(Self {
            raygen: ShaderTableRange {
                address: base,
                size_in_bytes: record_size,
                stride_in_bytes: record_size,
            },
            miss: ShaderTableRange {
                address: base + miss_offset,
                size_in_bytes: miss_size,
                stride_in_bytes: record_size,
            },
            hit_groups: ShaderTableRange {
                address: base + hit_group_offset,
                size_in_bytes: hit_group_size,
                stride_in_bytes: record_size,
            },
            pipeline,
            shader_table,
        })
    }

    pub fn shader_table(&self) -> &Buffer {
        &self.shader_table
    }

    #[allow(clippy::too_many_arguments)]
    pub fn trace(
        &self,
        context: &GpuContext,
        cmd_list: &mut CommandList,
        tlas_address: u64,
        camera_constants: u64,
        sky: CpuDescriptorHandle,
        output: &TrackedTexture,
        frame_index: u32,
        sky_intensity: f32,
        environment_intensity: f32,
    ) -> Result<(), DeviceError> {
        output.transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);

        cmd_list.set_pipeline_state(&self.pipeline.pipeline);
        cmd_list.set_root_signature(PipelineBindPoint::Compute, &self.pipeline.root_signature);
        cmd_list.set_root_constant_buffer(PipelineBindPoint::Compute, root::CAMERA, camera_constants);
        cmd_list.set_root_shader_resource(PipelineBindPoint::Compute, root::SCENE, tlas_address);
        cmd_list.set_root_constants(
            PipelineBindPoint::Compute,
            root::CONSTANTS,
            &PathTracerConstants {
                frame_index,
                sky_intensity,
                environment_intensity,
                padding: 0,
            },
        );
        bind_descriptor_table(
            context,
            cmd_list,
            PipelineBindPoint::Compute,
            root::RESOURCES,
            &[output.texture().uav(), sky],
        )?;

        cmd_list.dispatch_rays(&DispatchRaysDesc {
            raygen: self.raygen,
            miss: self.miss,
            hit_groups: self.hit_groups,
            width: output.texture().width(),
            height: output.texture().height(),
            depth: 1,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::raytracing::RaytracingInstanceDesc;
    use ze_core::maths::{Matrix4f32, Vec3f32};

    #[test]
    fn instance_desc_matches_native_layout() {
        assert_eq!(std::mem::size_of::<RaytracingInstanceDesc>(), 64);
    }

    #[test]
    fn instance_transform_is_row_major() {
        let transform = Matrix4f32::translation(Vec3f32::new(1.0, 2.0, 3.0));
        let desc = RaytracingInstanceDesc::new(0x1000, &transform, 7, 1);
        assert_eq!(desc.transform[3], 1.0);
        assert_eq!(desc.transform[7], 2.0);
        assert_eq!(desc.transform[11], 3.0);
        assert_eq!(desc.transform[0], 1.0);
        assert_eq!(desc.instance_id_and_mask, 7 | 0xFF00_0000);
        assert_eq!(desc.hit_group_offset_and_flags, 1);
        assert_eq!(desc.acceleration_structure, 0x1000);
    }
}
