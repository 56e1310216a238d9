use serde_derive::Deserialize;
use ze_core::maths::{RectI32, Vec2f32};

/// Filmic curve parameters, `A` through `F` of the Hable operator
#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TonemapSettings {
    pub shoulder_strength: f32,
    pub linear_strength: f32,
    pub linear_angle: f32,
    pub toe_strength: f32,
    pub toe_numerator: f32,
    pub toe_denominator: f32,
    pub linear_white: f32,
    pub exposure: f32,
}

impl Default for TonemapSettings {
    fn default() -> Self {
        Self {
            shoulder_strength: 0.22,
            linear_strength: 0.3,
            linear_angle: 0.1,
            toe_strength: 0.2,
            toe_numerator: 0.01,
            toe_denominator: 0.3,
            linear_white: 11.2,
            exposure: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SsrSettings {
    pub num_steps: u32,
    pub max_distance: f32,
    pub stride_cutoff: f32,
    pub min_stride: f32,
    pub max_stride: f32,
}

impl Default for SsrSettings {
    fn default() -> Self {
        Self {
            num_steps: 400,
            max_distance: 1000.0,
            stride_cutoff: 100.0,
            min_stride: 5.0,
            max_stride: 30.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum AspectRatioMode {
    Free,
    Fix16By9,
    Fix16By10,
}

impl Default for AspectRatioMode {
    fn default() -> Self {
        Self::Free
    }
}

impl AspectRatioMode {
    pub fn ratio(&self) -> Option<f32> {
        match self {
            AspectRatioMode::Free => None,
            AspectRatioMode::Fix16By9 => Some(16.0 / 9.0),
            AspectRatioMode::Fix16By10 => Some(16.0 / 10.0),
        }
    }

    /// Largest centered rectangle of the window matching the ratio. Bars are added on the
    /// sides that have too much room
    pub fn render_rect(&self, window_width: u32, window_height: u32) -> RectI32 {
        let full = RectI32::new(0, 0, window_width as i32, window_height as i32);
        let Some(ratio) = self.ratio() else {
            return full;
        };

        if window_width == 0 || window_height == 0 {
            return full;
        }

        let window_ratio = window_width as f32 / window_height as f32;
        if window_ratio > ratio {
            let width = (window_height as f32 * ratio).round() as i32;
            RectI32::new((full.width - width) / 2, 0, width, full.height)
        } else {
            let height = (window_width as f32 / ratio).round() as i32;
            RectI32::new(0, (full.height - height) / 2, full.width, height)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub tonemap: TonemapSettings,
    pub environment_intensity: f32,
    pub sky_intensity: f32,
    pub aspect_ratio: AspectRatioMode,
    pub enable_ssr: bool,
    pub ssr: SsrSettings,
    pub enable_temporal_antialiasing: bool,
    pub camera_jitter_strength: f32,
    pub enable_bloom: bool,
    pub bloom_threshold: f32,
    pub bloom_strength: f32,
    pub enable_sharpen: bool,
    pub sharpen_strength: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            tonemap: TonemapSettings::default(),
            environment_intensity: 1.0,
            sky_intensity: 1.0,
            aspect_ratio: AspectRatioMode::Free,
            enable_ssr: true,
            ssr: SsrSettings::default(),
            enable_temporal_antialiasing: true,
            camera_jitter_strength: 1.0,
            enable_bloom: true,
            bloom_threshold: 100.0,
            bloom_strength: 0.1,
            enable_sharpen: true,
            sharpen_strength: 0.5,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum RendererMode {
    Rasterized,
    Pathtraced,
}

impl Default for RendererMode {
    fn default() -> Self {
        Self::Rasterized
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum TlasRebuildMode {
    /// Full build every frame
    Rebuild,
    /// Update the previous build in place when the instance count allows it
    Refit,
}

impl Default for TlasRebuildMode {
    fn default() -> Self {
        Self::Rebuild
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub mode: RendererMode,
    pub tlas_rebuild_mode: TlasRebuildMode,
    /// Size of one shadow atlas cell. The atlas is three cells wide and high
    pub shadow_map_tile_size: u32,
    pub settings: RenderSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            mode: RendererMode::Rasterized,
            tlas_rebuild_mode: TlasRebuildMode::Rebuild,
            shadow_map_tile_size: 2048,
            settings: RenderSettings::default(),
        }
    }
}

pub const HALTON_SEQUENCE_LENGTH: usize = 128;

fn radical_inverse(mut index: u32, base: u32) -> f32 {
    let mut result = 0.0;
    let mut fraction = 1.0 / base as f32;
    while index > 0 {
        result += (index % base) as f32 * fraction;
        index /= base;
        fraction /= base as f32;
    }
    result
}

/// Sub-pixel offsets in [-0.5, 0.5) used to jitter the camera for temporal antialiasing
pub fn halton_sequence() -> [Vec2f32; HALTON_SEQUENCE_LENGTH] {
    let mut sequence = [Vec2f32::default(); HALTON_SEQUENCE_LENGTH];
    for (i, offset) in sequence.iter_mut().enumerate() {
        let index = i as u32 + 1;
        *offset = Vec2f32::new(
            radical_inverse(index, 2) - 0.5,
            radical_inverse(index, 3) - 0.5,
        );
    }
    sequence
}

#[cfg(test)]
mod tests {
    use crate::settings::{
        halton_sequence, AspectRatioMode, RendererConfig, RendererMode, TlasRebuildMode,
    };
    use ze_core::maths::RectI32;

    #[test]
    fn free_aspect_ratio_uses_the_whole_window() {
        assert_eq!(
            AspectRatioMode::Free.render_rect(1280, 1024),
            RectI32::new(0, 0, 1280, 1024)
        );
    }

    #[test]
    fn fixed_aspect_ratio_letterboxes() {
        // Too wide: bars on the sides
        assert_eq!(
            AspectRatioMode::Fix16By9.render_rect(2560, 1080),
            RectI32::new(320, 0, 1920, 1080)
        );

        // Too tall: bars on top and bottom
        assert_eq!(
            AspectRatioMode::Fix16By10.render_rect(1600, 1200),
            RectI32::new(0, 100, 1600, 1000)
        );
    }

    #[test]
    fn halton_offsets_stay_inside_the_pixel() {
        let sequence = halton_sequence();
        assert_eq!(sequence[0].x, 0.0);
        assert!((sequence[0].y - (1.0 / 3.0 - 0.5)).abs() < 1e-6);
        assert!((sequence[1].x + 0.25).abs() < 1e-6);
        for offset in sequence.iter() {
            assert!(offset.x >= -0.5 && offset.x < 0.5);
            assert!(offset.y >= -0.5 && offset.y < 0.5);
        }
    }

    #[test]
    fn default_config() {
        let config = RendererConfig::default();
        assert_eq!(config.mode, RendererMode::Rasterized);
        assert_eq!(config.tlas_rebuild_mode, TlasRebuildMode::Rebuild);
        assert_eq!(config.shadow_map_tile_size, 2048);
        assert!(config.settings.enable_temporal_antialiasing);
        assert_eq!(config.settings.bloom_threshold, 100.0);
    }
}
