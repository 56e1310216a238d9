use crate::shadow_atlas::MAX_NUM_SUN_SHADOW_CASCADES;
use bytemuck::{Pod, Zeroable};
use ze_core::maths::{Matrix4f32, Vec2f32, Vec3f32, Vec4f32};
use ze_gfx::backend::CpuDescriptorHandle;
use ze_gpu_context::Buffer;

#[derive(Copy, Clone, Debug)]
pub struct RenderCamera {
    pub view: Matrix4f32,
    pub projection: Matrix4f32,
    pub position: Vec3f32,
    pub near_plane: f32,
    pub far_plane: f32,
}

impl Default for RenderCamera {
    fn default() -> Self {
        Self {
            view: Matrix4f32::IDENTITY,
            projection: Matrix4f32::IDENTITY,
            position: Vec3f32::default(),
            near_plane: 0.1,
            far_plane: 1000.0,
        }
    }
}

impl RenderCamera {
    /// Projection shifted by `jitter` pixels
    pub fn jittered_projection(&self, jitter: Vec2f32, width: u32, height: u32) -> Matrix4f32 {
        let mut projection = self.projection;
        projection[2][0] += jitter.x * 2.0 / width.max(1) as f32;
        projection[2][1] += jitter.y * 2.0 / height.max(1) as f32;
        projection
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DirectionalLight {
    pub direction: Vec3f32,
    pub radiance: Vec3f32,
    pub cascade_distances: Vec4f32,
    pub bias: Vec4f32,
    pub blend_distances: Vec4f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3f32::new(0.0, -1.0, 0.0),
            radiance: Vec3f32::new(1.0, 1.0, 1.0),
            cascade_distances: Vec4f32::new(10.0, 30.0, 80.0, 200.0),
            bias: Vec4f32::new(0.001, 0.0015, 0.0015, 0.0035),
            blend_distances: Vec4f32::new(5.0, 10.0, 10.0, 10.0),
        }
    }
}

/// Structured buffer of lights (or decals) the application keeps up to date
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LightList {
    pub srv: CpuDescriptorHandle,
    pub count: u32,
}

impl LightList {
    pub fn from_buffer(buffer: &Buffer, count: u32) -> Self {
        Self {
            srv: buffer.srv(),
            count,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DecalList {
    pub decals: LightList,
    pub texture_atlas: CpuDescriptorHandle,
}

/// Prefiltered image based lighting, as shader resource views
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PbrEnvironment {
    pub sky: CpuDescriptorHandle,
    pub irradiance: CpuDescriptorHandle,
    pub environment: CpuDescriptorHandle,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub(crate) struct CameraConstants {
    pub view_projection: [f32; 16],
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub prev_frame_view_projection: [f32; 16],
    pub position: [f32; 4],
    pub jitter: [f32; 2],
    pub prev_frame_jitter: [f32; 2],
    pub screen_dims: [f32; 2],
    pub near_plane: f32,
    pub far_plane: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub(crate) struct SunConstants {
    pub view_projections: [[f32; 16]; MAX_NUM_SUN_SHADOW_CASCADES],
    pub viewports: [[f32; 4]; MAX_NUM_SUN_SHADOW_CASCADES],
    pub cascade_distances: [f32; 4],
    pub bias: [f32; 4],
    pub blend_distances: [f32; 4],
    pub direction: [f32; 4],
    pub radiance: [f32; 4],
    pub num_shadow_cascades: u32,
    pub padding: [u32; 3],
}

pub(crate) fn vec4(v: Vec4f32) -> [f32; 4] {
    [v.x, v.y, v.z, v.w]
}

pub(crate) fn vec3(v: Vec3f32, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}
