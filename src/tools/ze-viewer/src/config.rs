use serde_derive::Deserialize;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use ze_core::logger::Severity;
use ze_gpu_context::ContextConfig;
use ze_renderer::RendererConfig;
use ze_shader_system::HotReloadConfig;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Null,
    D3d12,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ViewerSection {
    pub backend: BackendKind,

    /// Number of frames to render before quitting. 0 runs until the context stops
    pub frame_count: u64,
    pub width: u32,
    pub height: u32,

    /// Relative paths are resolved from the configuration file's directory
    pub shader_dir: PathBuf,
    pub log_level: Severity,
}

impl Default for ViewerSection {
    fn default() -> Self {
        Self {
            backend: if cfg!(windows) {
                BackendKind::D3d12
            } else {
                BackendKind::Null
            },
            frame_count: 0,
            width: 1280,
            height: 720,
            shader_dir: PathBuf::from("shaders"),
            log_level: Severity::Info,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub context: ContextConfig,
    pub hot_reload: HotReloadConfig,
    pub renderer: RendererConfig,
    pub viewer: ViewerSection,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, error) => {
                write!(f, "failed to read \"{}\": {}", path.display(), error)
            }
            ConfigError::Parse(path, error) => {
                write!(f, "invalid configuration \"{}\": {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ViewerConfig {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|error| ConfigError::Io(path.to_path_buf(), error))?;
        let mut config = Self::parse(&content)
            .map_err(|error| ConfigError::Parse(path.to_path_buf(), error))?;

        if config.viewer.shader_dir.is_relative() {
            if let Some(parent) = path.parent() {
                config.viewer.shader_dir = parent.join(&config.viewer.shader_dir);
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{BackendKind, ConfigError, ViewerConfig};
    use std::path::Path;
    use std::time::Duration;
    use ze_core::logger::Severity;
    use ze_renderer::{AspectRatioMode, RendererMode};

    #[test]
    fn empty_file_uses_defaults() {
        let config = ViewerConfig::parse("").unwrap();
        assert_eq!(config, ViewerConfig::default());
        assert_eq!(config.context.buffered_frames, 2);
        assert_eq!(config.viewer.frame_count, 0);
        assert_eq!(config.viewer.log_level, Severity::Info);
    }

    #[test]
    fn sections_override_their_fields_only() {
        let config = ViewerConfig::parse(
            r#"
            [context]
            buffered_frames = 3
            fence_wait_timeout_ms = 5000

            [hot_reload]
            enabled = false

            [renderer]
            mode = "Pathtraced"

            [renderer.settings]
            aspect_ratio = "Fix16By9"
            enable_bloom = false

            [viewer]
            backend = "null"
            frame_count = 10
            width = 640
            height = 360
            log_level = "verbose"
            "#,
        )
        .unwrap();

        assert_eq!(config.context.buffered_frames, 3);
        assert_eq!(
            config.context.fence_wait_timeout(),
            Some(Duration::from_millis(5000))
        );
        assert_eq!(config.context.upload_page_size, 2 * 1024 * 1024);
        assert!(!config.hot_reload.enabled);
        assert_eq!(config.hot_reload.debounce_ms, 200);
        assert_eq!(config.renderer.mode, RendererMode::Pathtraced);
        assert_eq!(config.renderer.settings.aspect_ratio, AspectRatioMode::Fix16By9);
        assert!(!config.renderer.settings.enable_bloom);
        assert!(config.renderer.settings.enable_ssr);
        assert_eq!(config.viewer.backend, BackendKind::Null);
        assert_eq!(config.viewer.frame_count, 10);
        assert_eq!((config.viewer.width, config.viewer.height), (640, 360));
        assert_eq!(config.viewer.log_level, Severity::Verbose);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(ViewerConfig::parse("[viewer]\nbackend = \"vulkan\"").is_err());
    }

    #[test]
    fn shader_dir_is_relative_to_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("viewer.toml");
        std::fs::write(&path, "[viewer]\nshader_dir = \"blobs\"").unwrap();

        let config = ViewerConfig::load(&path).unwrap();
        assert_eq!(config.viewer.shader_dir, dir.path().join("blobs"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let result = ViewerConfig::load(Path::new("does/not/exist.toml"));
        assert!(matches!(result, Err(ConfigError::Io(..))));
    }
}
