use serde_derive::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    /// Watch the shader directory once the pipelines are built
    pub enabled: bool,

    /// Events for the same file closer than this are considered duplicates
    pub debounce_ms: u64,
    pub unlock_poll_interval_ms: u64,
    pub unlock_max_attempts: u32,
}

impl HotReloadConfig {
    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn unlock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.unlock_poll_interval_ms)
    }
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_ms: 200,
            unlock_poll_interval_ms: 10,
            unlock_max_attempts: 100,
        }
    }
}
