use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Filters the burst of modification events a single save usually produces.
///
/// Only the last path is remembered, files are not expected to change concurrently.
pub struct Debouncer {
    window: Duration,
    last: Option<(PathBuf, Instant)>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Whether an event for `path` happening at `now` should be processed
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        let duplicate = match &self.last {
            Some((last_path, last_time)) => {
                last_path == path && now.saturating_duration_since(*last_time) < self.window
            }
            None => false,
        };

        self.last = Some((path.to_path_buf(), now));
        !duplicate
    }
}

#[cfg(test)]
mod tests {
    use crate::debouncer::Debouncer;
    use std::path::Path;
    use std::time::{Duration, Instant};

    #[test]
    fn repeated_events_inside_window_are_dropped() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let start = Instant::now();
        let path = Path::new("shaders/depth_only_vs.cso");

        assert!(debouncer.accept(path, start));
        assert!(!debouncer.accept(path, start + Duration::from_millis(50)));
        assert!(!debouncer.accept(path, start + Duration::from_millis(150)));
        assert!(debouncer.accept(path, start + Duration::from_millis(400)));
    }

    #[test]
    fn other_paths_are_never_dropped() {
        let mut debouncer = Debouncer::new(Duration::from_millis(200));
        let now = Instant::now();
        assert!(debouncer.accept(Path::new("a.cso"), now));
        assert!(debouncer.accept(Path::new("b.cso"), now));
        assert!(debouncer.accept(Path::new("a.cso"), now));
    }
}
