//! Reloadable pipelines built from precompiled shader blobs.
//!
//! Pipelines are declared up front, built in one go by
//! [`PipelineFactory::create_all_pending_reloadable_pipelines`] and rebuilt whenever one of the
//! blobs they use changes on disk.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use ze_gfx::backend::DeviceError;

mod config;
mod debouncer;
mod factory;
mod raytracing;
mod watcher;

pub use config::HotReloadConfig;
pub use debouncer::Debouncer;
pub use factory::{
    GraphicsPipelineFiles, Pipeline, PipelineFactory, PipelineStatus, ReloadablePipelineState,
    ReloadableRootSignature, RootSignatureSource,
};
pub use raytracing::{RaytracingPipeline, RaytracingPipelineBuilder, MAX_HIT_GROUPS};

/// Extension of compiled shader and root signature blobs
pub const SHADER_BLOB_EXTENSION: &str = "cso";

#[derive(Debug)]
pub enum PipelineError {
    Io {
        file: PathBuf,
        error: std::io::Error,
    },
    Device {
        name: String,
        error: DeviceError,
    },
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Io { file, error } => {
                write!(f, "failed to read \"{}\": {}", file.display(), error)
            }
            PipelineError::Device { name, error } => {
                write!(f, "failed to create \"{}\": {}", name, error)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io { error, .. } => Some(error),
            PipelineError::Device { error, .. } => Some(error),
        }
    }
}

#[cfg(test)]
mod tests;
