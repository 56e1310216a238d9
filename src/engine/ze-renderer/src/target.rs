use crate::targets::TrackedTexture;
use raw_window_handle::RawWindowHandle;
use std::sync::Arc;
use ze_core::maths::RectI32;
use ze_core::ze_verbose;
use ze_gfx::backend::{
    ClearValue, DeviceError, ResourceState, SwapChain, SwapChainDesc, TextureDesc,
    TextureUsageFlagBits,
};
use ze_gfx::PixelFormat;
use ze_gpu_context::GpuContext;

/// Texture the last stage of a frame renders into
pub trait PresentTarget {
    fn texture(&self) -> &TrackedTexture;

    fn format(&self) -> PixelFormat {
        self.texture().texture().format()
    }

    /// State the texture must be left in at the end of the frame
    fn idle_state(&self) -> ResourceState {
        ResourceState::Present
    }

    fn present(&self) -> Result<(), DeviceError>;
}

/// Where and into what a frame is presented
#[derive(Copy, Clone)]
pub struct FrameOutput<'a> {
    pub target: &'a dyn PresentTarget,

    /// Region of the target the frame is letterboxed into
    pub viewport: RectI32,
}

impl<'a> FrameOutput<'a> {
    /// Cover the whole target
    pub fn new(target: &'a dyn PresentTarget) -> Self {
        let texture = target.texture().texture();
        Self {
            target,
            viewport: RectI32::new(0, 0, texture.width() as i32, texture.height() as i32),
        }
    }
}

pub struct SwapChainTarget {
    context: Arc<GpuContext>,
    swapchain: Option<SwapChain>,
    back_buffers: Vec<TrackedTexture>,
    window: Option<RawWindowHandle>,
}

impl SwapChainTarget {
    pub fn new(
        context: Arc<GpuContext>,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> Result<Self, DeviceError> {
        let mut target = Self {
            context,
            swapchain: None,
            back_buffers: vec![],
            window,
        };
        target.create(desc)?;
        Ok(target)
    }

    fn create(&mut self, desc: &SwapChainDesc) -> Result<(), DeviceError> {
        self.back_buffers.clear();

        let device = self.context.device().clone();
        let swapchain = device.create_swapchain(
            desc,
            self.window,
            self.context.render_queue().native(),
            self.swapchain.take(),
        )?;

        for i in 0..device.swapchain_backbuffer_count(&swapchain) {
            let native = device.swapchain_backbuffer(&swapchain, i as u32)?;
            let texture = self
                .context
                .resource_factory()
                .wrap_texture(native, &format!("Back Buffer {}", i));
            self.back_buffers
                .push(TrackedTexture::from_texture(texture, ResourceState::Present));
        }

        self.swapchain = Some(swapchain);
        Ok(())
    }

    pub fn desc(&self) -> Option<SwapChainDesc> {
        self.swapchain.as_ref().map(|swapchain| swapchain.desc)
    }

    /// Recreate the back buffers once the GPU is done with them
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        let Some(mut desc) = self.desc() else {
            return Err(DeviceError::InvalidParameters);
        };

        if desc.width == width && desc.height == height {
            return Ok(());
        }

        ze_verbose!("Resizing swap chain to {}x{}", width, height);
        self.context.flush_application()?;
        desc.width = width;
        desc.height = height;
        self.create(&desc)
    }

    fn current_index(&self) -> usize {
        self.swapchain.as_ref().map_or(0, |swapchain| {
            self.context.device().swapchain_backbuffer_index(swapchain) as usize
        })
    }
}

impl PresentTarget for SwapChainTarget {
    fn texture(&self) -> &TrackedTexture {
        &self.back_buffers[self.current_index()]
    }

    fn present(&self) -> Result<(), DeviceError> {
        match &self.swapchain {
            Some(swapchain) => self.context.device().present(swapchain),
            None => Err(DeviceError::InvalidParameters),
        }
    }
}

/// Render target for headless runs. Left readable by shaders between frames
pub struct OffscreenTarget {
    texture: TrackedTexture,
}

impl OffscreenTarget {
    pub fn new(
        context: &GpuContext,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Self, DeviceError> {
        let mut desc = TextureDesc::new_2d(
            width,
            height,
            format,
            TextureUsageFlagBits::RenderTarget | TextureUsageFlagBits::ShaderResource,
        );
        desc.default_resource_state = ResourceState::ShaderRead;
        desc.clear_value = Some(ClearValue::Color([0.0, 0.0, 0.0, 1.0]));
        Ok(Self {
            texture: TrackedTexture::new(context, &desc, "Offscreen Target")?,
        })
    }
}

impl PresentTarget for OffscreenTarget {
    fn texture(&self) -> &TrackedTexture {
        &self.texture
    }

    fn idle_state(&self) -> ResourceState {
        ResourceState::ShaderRead
    }

    fn present(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}
