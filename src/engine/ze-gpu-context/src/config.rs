use serde_derive::Deserialize;
use std::time::Duration;

/// Sizing of every per-context pool. All fields have defaults so an empty section is valid
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Frames that may be in flight on the GPU at the same time
    pub buffered_frames: usize,
    pub cpu_descriptor_capacity: u32,
    pub gpu_descriptor_capacity: u32,
    pub rtv_capacity: u32,
    pub dsv_capacity: u32,
    pub frame_descriptor_page_size: u32,
    /// Pages carved out of the single shader-visible frame heap, shared by all buffered frames
    pub frame_descriptor_page_count: u32,
    pub upload_page_size: u64,

    /// Bound on every CPU fence wait. Expiring is reported as a lost device. `None` waits forever
    pub fence_wait_timeout_ms: Option<u64>,
}

impl ContextConfig {
    pub fn fence_wait_timeout(&self) -> Option<Duration> {
        self.fence_wait_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            buffered_frames: 2,
            cpu_descriptor_capacity: 4096,
            gpu_descriptor_capacity: 128,
            rtv_capacity: 1024,
            dsv_capacity: 1024,
            frame_descriptor_page_size: 1024,
            frame_descriptor_page_count: 32,
            upload_page_size: 2 * 1024 * 1024,
            fence_wait_timeout_ms: None,
        }
    }
}
