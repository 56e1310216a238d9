use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use ze_gfx::backend::{DeviceError, GpuDescriptorHandle};
use ze_gpu_context::CommandList;

/// Geometry pass a material is drawn in
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaterialPass {
    Opaque,
    Transparent,
    Overlay,
}

/// Frame-wide resources every material can bind
#[derive(Copy, Clone, Debug)]
pub struct CommonMaterialInfo {
    pub camera_constants: u64,
    pub sun_constants: u64,

    /// Descriptor table, in order: sky, irradiance, environment, BRDF, light grid, light index
    /// list, point lights, spot lights, decals, shadow atlas, opaque depth, world normals
    pub frame_resources: GpuDescriptorHandle,
    pub environment_intensity: f32,
    pub sky_intensity: f32,
}

pub const COMMON_MATERIAL_DESCRIPTOR_COUNT: u32 = 12;

pub type MaterialSetupFn = dyn Fn(&mut CommandList, &CommonMaterialInfo) + Send + Sync;

/// Binds the pipeline shared by every instance of a material type.
///
/// Consecutive draws with the same `id` only run the setup once, so two setups must only share an
/// id if they bind exactly the same state.
#[derive(Clone)]
pub struct MaterialSetup {
    id: u32,
    setup: Arc<MaterialSetupFn>,
}

impl MaterialSetup {
    pub fn new<F>(id: u32, setup: F) -> Self
    where
        F: Fn(&mut CommandList, &CommonMaterialInfo) + Send + Sync + 'static,
    {
        Self {
            id,
            setup: Arc::new(setup),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn apply(&self, cmd_list: &mut CommandList, info: &CommonMaterialInfo) {
        (self.setup)(cmd_list, info);
    }
}

impl Debug for MaterialSetup {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterialSetup").field("id", &self.id).finish()
    }
}

/// A material instance. Its pipeline must take the object transform as root constants in
/// parameter 0 and test depth with `Equal` against the pre-pass
pub trait MaterialInstance: Send + Sync {
    fn setup(&self, pass: MaterialPass) -> MaterialSetup;

    /// Bind the constants and textures specific to this instance
    fn prepare_for_rendering(&self, cmd_list: &mut CommandList) -> Result<(), DeviceError>;
}
