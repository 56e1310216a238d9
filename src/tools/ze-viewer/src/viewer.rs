use crate::config::{BackendKind, ViewerConfig};
use crate::demo::{DemoMaterial, DemoScene};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use ze_core::{ze_info, ze_verbose};
use ze_gfx::backend::{Backend, BackendError, Device, DeviceError};
use ze_gfx::null::{NullBackend, NullDeviceOptions};
use ze_gfx::PixelFormat;
use ze_gpu_context::GpuContext;
use ze_renderer::{FrameOutput, OffscreenTarget, PresentTarget, Renderer, RendererError};
use ze_shader_system::PipelineFactory;

#[derive(Debug)]
pub enum ViewerError {
    Backend(BackendError),
    Renderer(RendererError),
}

impl Display for ViewerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerError::Backend(error) => write!(f, "failed to create device: {}", error),
            ViewerError::Renderer(error) => write!(f, "{}", error),
        }
    }
}

impl std::error::Error for ViewerError {}

impl From<BackendError> for ViewerError {
    fn from(error: BackendError) -> Self {
        ViewerError::Backend(error)
    }
}

impl From<RendererError> for ViewerError {
    fn from(error: RendererError) -> Self {
        ViewerError::Renderer(error)
    }
}

impl From<DeviceError> for ViewerError {
    fn from(error: DeviceError) -> Self {
        ViewerError::Renderer(RendererError::Device(error))
    }
}

fn create_backend(kind: BackendKind) -> Result<Arc<dyn Backend>, BackendError> {
    match kind {
        BackendKind::Null => {
            let backend: Arc<dyn Backend> =
                Arc::new(NullBackend::new(NullDeviceOptions::default()));
            Ok(backend)
        }
        #[cfg(windows)]
        BackendKind::D3d12 => {
            let backend: Arc<dyn Backend> = ze_d3d12_backend::D3D12Backend::new()?;
            Ok(backend)
        }
        #[cfg(not(windows))]
        BackendKind::D3d12 => Err(BackendError::Unsupported),
    }
}

/// Drives the frame lifecycle against an off-screen target
pub struct Viewer {
    config: ViewerConfig,
    _backend: Arc<dyn Backend>,
    device: Arc<dyn Device>,
    context: Arc<GpuContext>,
    renderer: Renderer,
    target: OffscreenTarget,
    scene: DemoScene,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Result<Self, ViewerError> {
        let backend = create_backend(config.viewer.backend)?;
        let device = backend.create_device()?;
        ze_info!("Using {} device \"{}\"", backend.name(), device.name());

        let context = GpuContext::new(device.clone(), config.context.clone())?;
        let (renderer, target, scene) = match Self::create_frame_objects(&config, &device, &context)
        {
            Ok(objects) => objects,
            Err(error) => {
                let _ = context.quit();
                return Err(error);
            }
        };

        Ok(Self {
            config,
            _backend: backend,
            device,
            context,
            renderer,
            target,
            scene,
        })
    }

    fn create_frame_objects(
        config: &ViewerConfig,
        device: &Arc<dyn Device>,
        context: &Arc<GpuContext>,
    ) -> Result<(Renderer, OffscreenTarget, DemoScene), ViewerError> {
        let factory = Arc::new(PipelineFactory::new(
            device.clone(),
            context.graveyard().clone(),
            &config.viewer.shader_dir,
            config.hot_reload.clone(),
        ));

        let material_pipeline = DemoMaterial::declare(&factory);
        let mut renderer = Renderer::new(context.clone(), factory, config.renderer.clone())?;
        renderer.initialize(config.viewer.width, config.viewer.height)?;

        let target = OffscreenTarget::new(
            context,
            config.viewer.width,
            config.viewer.height,
            PixelFormat::R8G8B8A8Unorm,
        )?;
        let scene = DemoScene::new(context, material_pipeline)?;
        Ok((renderer, target, scene))
    }

    fn should_continue(&self, frame_id: u64) -> bool {
        let frame_count = self.config.viewer.frame_count;
        self.context.is_running() && (frame_count == 0 || frame_id < frame_count)
    }

    fn frame(&mut self, frame_id: u64) -> Result<(), ViewerError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let (width, height) = (self.config.viewer.width, self.config.viewer.height);

        self.context.wait_for_buffered_frame(frame_id)?;
        self.context.new_frame(frame_id);

        self.renderer.begin_frame_common();
        self.renderer.begin_frame(width, height)?;
        self.scene
            .populate(&mut self.renderer, frame_id, width, height);
        self.renderer.end_frame_common()?;

        let mut output = FrameOutput::new(&self.target);
        output.viewport = self
            .renderer
            .settings()
            .aspect_ratio
            .render_rect(width, height);
        let fence_value = self.renderer.end_frame(&output)?;
        self.context.set_buffered_frame_fence(fence_value);

        self.target.present()?;
        Ok(())
    }

    /// Render until the configured frame count is reached or the context stops, then quit
    pub fn run(mut self) -> Result<u64, ViewerError> {
        let mut frame_id = 0;
        let mut result = Ok(());
        while self.should_continue(frame_id) {
            #[cfg(feature = "profiling")]
            puffin::GlobalProfiler::lock().new_frame();

            result = self.frame(frame_id);
            if result.is_err() {
                break;
            }
            frame_id += 1;
        }

        ze_verbose!("Rendered {} frames on {}", frame_id, self.device.name());
        let quit = self.context.quit();
        result?;
        quit?;
        Ok(frame_id)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BackendKind, ViewerConfig};
    use crate::demo::DEMO_SHADER_FILES;
    use crate::viewer::{Viewer, ViewerError};
    use ze_gfx::backend::BackendError;
    use ze_renderer::{RendererError, SHADER_FILES};
    use ze_shader_system::{PipelineError, SHADER_BLOB_EXTENSION};

    fn null_config(dir: &std::path::Path, frame_count: u64) -> ViewerConfig {
        let mut config = ViewerConfig::default();
        config.viewer.backend = BackendKind::Null;
        config.viewer.frame_count = frame_count;
        config.viewer.width = 128;
        config.viewer.height = 72;
        config.viewer.shader_dir = dir.to_path_buf();
        config.hot_reload.enabled = false;
        config
    }

    fn write_blobs(dir: &std::path::Path) {
        for file in SHADER_FILES.iter().chain(DEMO_SHADER_FILES) {
            let path = dir.join(format!("{}.{}", file, SHADER_BLOB_EXTENSION));
            std::fs::write(path, file.as_bytes()).unwrap();
        }
    }

    #[test]
    fn renders_the_configured_frame_count() {
        let dir = tempfile::tempdir().unwrap();
        write_blobs(dir.path());

        let viewer = Viewer::new(null_config(dir.path(), 5)).unwrap();
        assert_eq!(viewer.run().unwrap(), 5);
    }

    #[test]
    fn missing_blobs_fail_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let result = Viewer::new(null_config(dir.path(), 1));
        assert!(matches!(
            result,
            Err(ViewerError::Renderer(RendererError::Pipeline(PipelineError::Io { .. })))
        ));
    }

    #[cfg(not(windows))]
    #[test]
    fn d3d12_is_unsupported_off_windows() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = null_config(dir.path(), 1);
        config.viewer.backend = BackendKind::D3d12;
        assert!(matches!(
            Viewer::new(config),
            Err(ViewerError::Backend(BackendError::Unsupported))
        ));
    }
}
