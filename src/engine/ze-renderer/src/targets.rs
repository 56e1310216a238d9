use std::cell::Cell;
use ze_gfx::backend::{
    BufferDesc, ClearValue, DeviceError, ResourceState, TextureDesc, TextureUsageFlagBits,
    TextureUsageFlags,
};
use ze_gfx::PixelFormat;
use ze_gpu_context::{BarrierBatcher, Buffer, GpuContext, Texture};

pub const DEPTH_STENCIL_FORMAT: PixelFormat = PixelFormat::D24UnormS8Uint;
pub const HDR_FORMAT: PixelFormat = PixelFormat::R16G16B16A16Float;
pub const WORLD_NORMALS_FORMAT: PixelFormat = PixelFormat::R16G16Float;
pub const SCREEN_VELOCITIES_FORMAT: PixelFormat = PixelFormat::R16G16Float;
pub const LINEAR_DEPTH_FORMAT: PixelFormat = PixelFormat::R32Float;
/// Fresnel in xyz, roughness in w
pub const REFLECTANCE_FORMAT: PixelFormat = PixelFormat::R8G8B8A8Unorm;
pub const REFLECTION_FORMAT: PixelFormat = PixelFormat::R16G16B16A16Float;
pub const HDR_POST_PROCESS_FORMAT: PixelFormat = PixelFormat::R16G16B16A16Float;
pub const LDR_POST_PROCESS_FORMAT: PixelFormat = PixelFormat::R11G11B10Float;
pub const BLOOM_FORMAT: PixelFormat = PixelFormat::R11G11B10Float;

pub const OPAQUE_RENDER_TARGET_FORMATS: [PixelFormat; 3] =
    [HDR_FORMAT, WORLD_NORMALS_FORMAT, REFLECTANCE_FORMAT];
pub const SKY_RENDER_TARGET_FORMATS: [PixelFormat; 2] = [HDR_FORMAT, SCREEN_VELOCITIES_FORMAT];

pub const LINEAR_DEPTH_MIP_LEVELS: u32 = 6;

/// A texture along with the state the GPU will find it in once everything recorded so far has run
pub struct TrackedTexture {
    texture: Texture,
    state: Cell<ResourceState>,
}

impl TrackedTexture {
    pub fn new(context: &GpuContext, desc: &TextureDesc, name: &str) -> Result<Self, DeviceError> {
        Ok(Self {
            texture: context.create_texture(desc, name)?,
            state: Cell::new(desc.default_resource_state),
        })
    }

    /// Track a texture created elsewhere, currently in `state`
    pub fn from_texture(texture: Texture, state: ResourceState) -> Self {
        Self {
            texture,
            state: Cell::new(state),
        }
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn transition<'r>(&'r self, batch: &mut BarrierBatcher<'_, 'r>, state: ResourceState) {
        batch.transition(&self.texture, self.state.get(), state);
        self.state.set(state);
    }

    pub fn uav<'r>(&'r self, batch: &mut BarrierBatcher<'_, 'r>) {
        batch.uav(&self.texture);
    }

    /// The new texture starts over in the default state
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if self.texture.width() != width || self.texture.height() != height {
            self.texture.resize(width, height)?;
            self.state.set(self.texture.desc().default_resource_state);
        }
        Ok(())
    }
}

pub struct TrackedBuffer {
    buffer: Buffer,
    state: Cell<ResourceState>,
}

impl TrackedBuffer {
    pub fn new(
        context: &GpuContext,
        desc: &BufferDesc,
        element_size: u32,
        name: &str,
    ) -> Result<Self, DeviceError> {
        Ok(Self {
            buffer: context.create_buffer(desc, element_size, name)?,
            state: Cell::new(desc.default_resource_state),
        })
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn state(&self) -> ResourceState {
        self.state.get()
    }

    pub fn transition<'r>(&'r self, batch: &mut BarrierBatcher<'_, 'r>, state: ResourceState) {
        batch.transition(&self.buffer, self.state.get(), state);
        self.state.set(state);
    }

    pub fn uav<'r>(&'r self, batch: &mut BarrierBatcher<'_, 'r>) {
        batch.uav(&self.buffer);
    }
}

fn screen_texture(
    context: &GpuContext,
    width: u32,
    height: u32,
    format: PixelFormat,
    usage: TextureUsageFlags,
    name: &str,
) -> Result<TrackedTexture, DeviceError> {
    let mut desc = TextureDesc::new_2d(width.max(1), height.max(1), format, usage);
    desc.default_resource_state = ResourceState::ShaderRead;
    if usage.contains(TextureUsageFlagBits::RenderTarget) {
        desc.clear_value = Some(ClearValue::Color([0.0; 4]));
    }
    TrackedTexture::new(context, &desc, name)
}

fn half(size: u32) -> u32 {
    (size / 2).max(1)
}

/// Every screen sized texture the frame schedule renders into
pub struct RenderTargets {
    width: u32,
    height: u32,
    pub depth_stencil: TrackedTexture,
    pub screen_velocities: TrackedTexture,
    pub linear_depth: TrackedTexture,
    pub hdr_color: TrackedTexture,
    pub world_normals: TrackedTexture,
    pub reflectance: TrackedTexture,
    pub ssr_raycast: TrackedTexture,
    pub ssr_resolve: TrackedTexture,
    pub ssr_temporal: [TrackedTexture; 2],
    pub hdr_post_process: TrackedTexture,
    pub taa: [TrackedTexture; 2],
    pub bloom: TrackedTexture,
    pub bloom_temp: TrackedTexture,
    pub ldr_post_process: TrackedTexture,
}

impl RenderTargets {
    pub fn new(context: &GpuContext, width: u32, height: u32) -> Result<Self, DeviceError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        use TextureUsageFlagBits::*;

        let mut depth_desc = TextureDesc::new_2d(
            width.max(1),
            height.max(1),
            DEPTH_STENCIL_FORMAT,
            DepthStencil | ShaderResource,
        );
        depth_desc.default_resource_state = ResourceState::DepthWrite;
        depth_desc.clear_value = Some(ClearValue::DepthStencil((1.0, 0)));
        let depth_stencil = TrackedTexture::new(context, &depth_desc, "Depth Stencil Buffer")?;

        let mut linear_depth_desc = TextureDesc::new_2d(
            width.max(1),
            height.max(1),
            LINEAR_DEPTH_FORMAT,
            UnorderedAccess | ShaderResource,
        );
        linear_depth_desc.mip_levels = LINEAR_DEPTH_MIP_LEVELS;
        linear_depth_desc.default_resource_state = ResourceState::ShaderRead;
        let linear_depth = TrackedTexture::new(context, &linear_depth_desc, "Linear Depth Pyramid")?;

        let ssr = |name: &str| {
            screen_texture(
                context,
                half(width),
                half(height),
                REFLECTION_FORMAT,
                UnorderedAccess | ShaderResource,
                name,
            )
        };
        let taa = |name: &str| {
            screen_texture(
                context,
                width,
                height,
                HDR_POST_PROCESS_FORMAT,
                UnorderedAccess | ShaderResource,
                name,
            )
        };
        let bloom = |name: &str| {
            screen_texture(
                context,
                half(width),
                half(height),
                BLOOM_FORMAT,
                UnorderedAccess | ShaderResource,
                name,
            )
        };

        Ok(Self {
            width,
            height,
            depth_stencil,
            screen_velocities: screen_texture(
                context,
                width,
                height,
                SCREEN_VELOCITIES_FORMAT,
                RenderTarget | ShaderResource,
                "Screen Velocities",
            )?,
            linear_depth,
            hdr_color: screen_texture(
                context,
                width,
                height,
                HDR_FORMAT,
                RenderTarget | ShaderResource | UnorderedAccess,
                "HDR Color",
            )?,
            world_normals: screen_texture(
                context,
                width,
                height,
                WORLD_NORMALS_FORMAT,
                RenderTarget | ShaderResource,
                "World Normals",
            )?,
            reflectance: screen_texture(
                context,
                width,
                height,
                REFLECTANCE_FORMAT,
                RenderTarget | ShaderResource,
                "Reflectance",
            )?,
            ssr_raycast: ssr("SSR Raycast")?,
            ssr_resolve: ssr("SSR Resolve")?,
            ssr_temporal: [ssr("SSR Temporal 0")?, ssr("SSR Temporal 1")?],
            hdr_post_process: screen_texture(
                context,
                width,
                height,
                HDR_POST_PROCESS_FORMAT,
                RenderTarget | ShaderResource | UnorderedAccess,
                "HDR Post Processing",
            )?,
            taa: [taa("TAA 0")?, taa("TAA 1")?],
            bloom: bloom("Bloom")?,
            bloom_temp: bloom("Bloom Temp")?,
            ldr_post_process: screen_texture(
                context,
                width,
                height,
                LDR_POST_PROCESS_FORMAT,
                RenderTarget | ShaderResource | UnorderedAccess,
                "LDR Post Processing",
            )?,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Recreate every target at the new size. Returns whether anything changed
    pub fn resize(&mut self, width: u32, height: u32) -> Result<bool, DeviceError> {
        if width == self.width && height == self.height {
            return Ok(false);
        }

        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let (full_width, full_height) = (width.max(1), height.max(1));
        let (half_width, half_height) = (half(width), half(height));
        let [taa0, taa1] = &mut self.taa;
        for texture in [
            &mut self.depth_stencil,
            &mut self.screen_velocities,
            &mut self.linear_depth,
            &mut self.hdr_color,
            &mut self.world_normals,
            &mut self.reflectance,
            &mut self.hdr_post_process,
            taa0,
            taa1,
            &mut self.ldr_post_process,
        ] {
            texture.resize(full_width, full_height)?;
        }

        let [ssr_temporal0, ssr_temporal1] = &mut self.ssr_temporal;
        for texture in [
            &mut self.ssr_raycast,
            &mut self.ssr_resolve,
            ssr_temporal0,
            ssr_temporal1,
            &mut self.bloom,
            &mut self.bloom_temp,
        ] {
            texture.resize(half_width, half_height)?;
        }

        self.width = width;
        self.height = height;
        Ok(true)
    }
}
