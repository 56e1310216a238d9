use fnv::FnvHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

static THREAD_NAME_MAP: Lazy<RwLock<FnvHashMap<ThreadId, Arc<String>>>> =
    Lazy::new(RwLock::default);

pub fn set_thread_name(id: ThreadId, name: String) {
    THREAD_NAME_MAP.write().insert(id, Arc::new(name));
}

pub fn thread_name(id: ThreadId) -> Option<Arc<String>> {
    THREAD_NAME_MAP.read().get(&id).cloned()
}

/// Spawn an OS thread named `name`, registered in the logger's thread name map
pub fn spawn_named<F, T>(name: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let registered_name = name.to_string();
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let id = std::thread::current().id();
            set_thread_name(id, registered_name);
            let result = f();
            THREAD_NAME_MAP.write().remove(&id);
            result
        })
}

#[cfg(test)]
mod tests {
    use crate::thread::{spawn_named, thread_name};

    #[test]
    fn spawned_thread_is_named() {
        let handle = spawn_named("Test Worker", || {
            thread_name(std::thread::current().id()).map(|name| name.as_ref().clone())
        })
        .unwrap();
        assert_eq!(handle.join().unwrap(), Some("Test Worker".to_string()));
    }
}
