use crate::targets::TrackedTexture;
use ze_gfx::backend::{
    BufferDesc, BufferUsageFlagBits, ClearValue, DeviceError, MemoryLocation, ResourceState,
    TextureDimension, TextureDesc, TextureUsageFlagBits,
};
use ze_gfx::PixelFormat;
use ze_gpu_context::{Buffer, CommandList, GpuContext};

/// Bound in place of resources the application did not provide
pub struct FallbackResources {
    pub white: TrackedTexture,
    pub black: TrackedTexture,
    pub black_cube: TrackedTexture,

    /// Empty structured buffer for missing light and decal lists
    pub null_buffer: Buffer,
}

fn fallback_texture(
    context: &GpuContext,
    dimension: TextureDimension,
    color: [f32; 4],
    name: &str,
) -> Result<TrackedTexture, DeviceError> {
    let mut desc = TextureDesc::new_2d(
        1,
        1,
        PixelFormat::R8G8B8A8Unorm,
        TextureUsageFlagBits::RenderTarget | TextureUsageFlagBits::ShaderResource,
    );
    if dimension == TextureDimension::Cube {
        desc.dimension = TextureDimension::Cube;
        desc.depth = 6;
    }
    desc.default_resource_state = ResourceState::RenderTargetWrite;
    desc.clear_value = Some(ClearValue::Color(color));
    TrackedTexture::new(context, &desc, name)
}

impl FallbackResources {
    pub fn new(context: &GpuContext) -> Result<Self, DeviceError> {
        Ok(Self {
            white: fallback_texture(context, TextureDimension::D2, [1.0; 4], "White Texture")?,
            black: fallback_texture(
                context,
                TextureDimension::D2,
                [0.0, 0.0, 0.0, 1.0],
                "Black Texture",
            )?,
            black_cube: fallback_texture(
                context,
                TextureDimension::Cube,
                [0.0, 0.0, 0.0, 1.0],
                "Black Cube Texture",
            )?,
            null_buffer: context.create_buffer(
                &BufferDesc {
                    size_bytes: 256,
                    usage: BufferUsageFlagBits::ShaderResource.into(),
                    memory_location: MemoryLocation::GpuOnly,
                    default_resource_state: ResourceState::ShaderRead,
                },
                16,
                "Null Structured Buffer",
            )?,
        })
    }

    /// Fill the textures. Must run once before any of them is read
    pub fn initialize(&self, cmd_list: &mut CommandList) {
        cmd_list.begin_event("Fallback Resources");
        for (texture, color) in [
            (&self.white, [1.0; 4]),
            (&self.black, [0.0, 0.0, 0.0, 1.0]),
            (&self.black_cube, [0.0, 0.0, 0.0, 1.0]),
        ] {
            if texture.state() == ResourceState::RenderTargetWrite {
                cmd_list.clear_render_target(texture.texture().rtv(), color);
            }
        }

        {
            let mut batch = cmd_list.barriers();
            self.white.transition(&mut batch, ResourceState::ShaderRead);
            self.black.transition(&mut batch, ResourceState::ShaderRead);
            self.black_cube.transition(&mut batch, ResourceState::ShaderRead);
        }
        cmd_list.end_event();
    }
}
