use crate::factory::PipelineFactory;
use crate::PipelineError;
use std::sync::Arc;
use tinyvec::ArrayVec;
use ze_gfx::backend::{
    DeviceError, HitGroupDesc, PipelineState, RaytracingPipelineDesc, RootSignature,
    RAYTRACING_SHADER_IDENTIFIER_SIZE,
};

pub const MAX_HIT_GROUPS: usize = 8;

/// Two floats of barycentrics
const DEFAULT_MAX_ATTRIBUTE_SIZE: u32 = 8;

#[derive(Clone, Default, Debug)]
struct HitGroup {
    name: String,
    miss: String,
    closest_hit: Option<String>,
    any_hit: Option<String>,
}

/// Describes a raytracing pipeline built from a single shader library blob.
/// Every hit group comes with the miss shader used for the same ray type
pub struct RaytracingPipelineBuilder {
    library: String,
    root_signature: Option<String>,
    raygen: String,
    hit_groups: ArrayVec<[HitGroup; MAX_HIT_GROUPS]>,
    max_payload_size: u32,
    max_attribute_size: u32,
    max_recursion_depth: u32,
}

impl RaytracingPipelineBuilder {
    pub fn new(library: &str, raygen: &str) -> Self {
        Self {
            library: library.to_string(),
            root_signature: None,
            raygen: raygen.to_string(),
            hit_groups: ArrayVec::default(),
            max_payload_size: 0,
            max_attribute_size: DEFAULT_MAX_ATTRIBUTE_SIZE,
            max_recursion_depth: 1,
        }
    }

    /// Global root signature blob. The library itself is used when not set
    pub fn root_signature(mut self, file: &str) -> Self {
        self.root_signature = Some(file.to_string());
        self
    }

    pub fn hit_group(
        mut self,
        name: &str,
        miss: &str,
        closest_hit: Option<&str>,
        any_hit: Option<&str>,
    ) -> Self {
        assert!(
            self.hit_groups.len() < MAX_HIT_GROUPS,
            "At most {} hit groups are supported",
            MAX_HIT_GROUPS
        );
        self.hit_groups.push(HitGroup {
            name: name.to_string(),
            miss: miss.to_string(),
            closest_hit: closest_hit.map(str::to_string),
            any_hit: any_hit.map(str::to_string),
        });
        self
    }

    pub fn max_payload_size(mut self, size: u32) -> Self {
        self.max_payload_size = size;
        self
    }

    pub fn max_attribute_size(mut self, size: u32) -> Self {
        self.max_attribute_size = size;
        self
    }

    pub fn max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn hit_group_count(&self) -> usize {
        self.hit_groups.len()
    }
}

pub struct RaytracingPipeline {
    pub pipeline: Arc<PipelineState>,
    pub root_signature: Arc<RootSignature>,
    pub raygen_identifier: [u8; RAYTRACING_SHADER_IDENTIFIER_SIZE],
    /// One per hit group, in declaration order
    pub miss_identifiers: Vec<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]>,
    pub hit_group_identifiers: Vec<[u8; RAYTRACING_SHADER_IDENTIFIER_SIZE]>,
}

impl PipelineFactory {
    /// Build a raytracing pipeline. Raytracing pipelines are not hot reloaded
    pub fn create_raytracing_pipeline(
        &self,
        builder: &RaytracingPipelineBuilder,
    ) -> Result<RaytracingPipeline, PipelineError> {
        let shared = self.shared();
        let device = shared.device();
        let library = shared.read_blob(&builder.library)?;
        let root_signature_file = builder
            .root_signature
            .as_deref()
            .unwrap_or(&builder.library);
        let root_signature_blob = if root_signature_file == builder.library {
            library.clone()
        } else {
            shared.read_blob(root_signature_file)?
        };

        let name = format!("Raytracing Pipeline ({})", builder.library);
        let device_error = |error: DeviceError| PipelineError::Device {
            name: name.clone(),
            error,
        };

        let root_signature = device
            .create_root_signature(&root_signature_blob, &name)
            .map_err(device_error)?;

        let mut miss: Vec<&str> = vec![];
        for group in &builder.hit_groups {
            if !miss.contains(&group.miss.as_str()) {
                miss.push(&group.miss);
            }
        }
        let hit_groups = builder
            .hit_groups
            .iter()
            .map(|group| HitGroupDesc {
                name: &group.name,
                closest_hit: group.closest_hit.as_deref(),
                any_hit: group.any_hit.as_deref(),
            })
            .collect::<Vec<_>>();

        let pipeline = device
            .create_raytracing_pipeline(
                &RaytracingPipelineDesc {
                    global_root_signature: &root_signature,
                    library: &library,
                    raygen: &builder.raygen,
                    miss: &miss,
                    hit_groups: &hit_groups,
                    max_payload_size: builder.max_payload_size,
                    max_attribute_size: builder.max_attribute_size,
                    max_recursion_depth: builder.max_recursion_depth,
                },
                &name,
            )
            .map_err(device_error)?;

        let identifier = |export: &str| {
            device
                .raytracing_shader_identifier(&pipeline, export)
                .ok_or_else(|| device_error(DeviceError::InvalidParameters))
        };

        let raygen_identifier = identifier(&builder.raygen)?;
        let miss_identifiers = builder
            .hit_groups
            .iter()
            .map(|group| identifier(&group.miss))
            .collect::<Result<Vec<_>, _>>()?;
        let hit_group_identifiers = hit_groups
            .iter()
            .map(|group| identifier(group.name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RaytracingPipeline {
            pipeline: Arc::new(pipeline),
            root_signature: Arc::new(root_signature),
            raygen_identifier,
            miss_identifiers,
            hit_group_identifiers,
        })
    }
}
