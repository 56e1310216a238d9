use crate::config::HotReloadConfig;
use crate::debouncer::Debouncer;
use crate::factory::FactoryShared;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Weak;
use std::thread::JoinHandle;
use std::time::Instant;
use ze_core::thread::spawn_named;
use ze_core::{ze_verbose, ze_warn};

/// Watches the shader directory and forwards blob changes to the factory
pub(crate) struct ShaderWatcher {
    watcher: RecommendedWatcher,
    thread: JoinHandle<()>,
}

impl ShaderWatcher {
    pub fn start(
        factory: Weak<FactoryShared>,
        shader_dir: &Path,
        config: &HotReloadConfig,
    ) -> notify::Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(sender)?;
        watcher.watch(shader_dir, RecursiveMode::Recursive)?;

        let mut debouncer = Debouncer::new(config.debounce_window());
        let thread = spawn_named("Shader Watcher Thread", move || {
            for result in receiver {
                let event: notify::Event = match result {
                    Ok(event) => event,
                    Err(error) => {
                        ze_warn!("Shader watcher error: {}", error);
                        continue;
                    }
                };

                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    continue;
                }

                let Some(factory) = factory.upgrade() else {
                    break;
                };

                for path in &event.paths {
                    if debouncer.accept(path, Instant::now()) {
                        ze_verbose!("{} changed", path.display());
                        factory.reload_file(path);
                    }
                }
            }
        })
        .map_err(notify::Error::io)?;

        Ok(Self { watcher, thread })
    }

    /// Stop watching and wait for the pending events to be processed
    pub fn stop(self) {
        drop(self.watcher);
        if self.thread.join().is_err() {
            ze_warn!("Shader watcher thread panicked");
        }
    }
}
