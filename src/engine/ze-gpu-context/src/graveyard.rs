use crate::descriptor::PersistentDescriptor;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use tinyvec::ArrayVec;

pub const MAX_GRAVES_PER_FRAME: usize = 128;

/// Native texture and the descriptors viewing it
pub struct TextureGrave {
    pub texture: Arc<ze_gfx::backend::Texture>,
    pub views: Vec<PersistentDescriptor>,
}

pub struct BufferGrave {
    pub buffer: Arc<ze_gfx::backend::Buffer>,
    pub views: Vec<PersistentDescriptor>,
}

pub enum Grave {
    Texture(TextureGrave),
    Buffer(BufferGrave),
    Object(Arc<dyn Any + Send + Sync>),
}

type GraveList = ArrayVec<[Option<Grave>; MAX_GRAVES_PER_FRAME]>;

/// Keeps retired native objects alive until the GPU can no longer reference them.
///
/// Objects go into the list of the buffered frame current at retirement time, that list is
/// drained the next time the same buffered frame begins.
pub struct Graveyard {
    state: Mutex<GraveyardState>,
}

struct GraveyardState {
    current: usize,
    frames: Vec<GraveList>,
}

impl Graveyard {
    pub fn new(buffered_frames: usize) -> Self {
        assert!(buffered_frames > 0);
        Self {
            state: Mutex::new(GraveyardState {
                current: buffered_frames - 1,
                frames: (0..buffered_frames).map(|_| GraveList::default()).collect(),
            }),
        }
    }

    pub fn retire(&self, grave: Grave) {
        // Current frame and its list are read under one lock so a frame switch cannot
        // drain a grave that is being filed
        let mut state = self.state.lock();
        let frame = state.current;
        let graves = &mut state.frames[frame];
        assert!(
            graves.len() < MAX_GRAVES_PER_FRAME,
            "More than {} resources retired during buffered frame {}",
            MAX_GRAVES_PER_FRAME,
            frame
        );
        graves.push(Some(grave));
    }

    pub fn retire_object<T: Any + Send + Sync>(&self, object: Arc<T>) {
        self.retire(Grave::Object(object));
    }

    /// Make `buffered_frame` current and destroy everything it retired last time
    pub fn new_frame(&self, buffered_frame: usize) {
        let graves = {
            let mut state = self.state.lock();
            state.current = buffered_frame;
            std::mem::take(&mut state.frames[buffered_frame])
        };
        // Destroyed outside the lock, dropping a grave may retire something else
        drop(graves);
    }

    /// Destroy everything, the GPU must be idle
    pub fn drain_all(&self) {
        let graves: Vec<GraveList> = {
            let mut state = self.state.lock();
            state.frames.iter_mut().map(std::mem::take).collect()
        };
        drop(graves);
    }

    pub fn len(&self, buffered_frame: usize) -> usize {
        self.state.lock().frames[buffered_frame].len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.iter().all(|frame| frame.is_empty())
    }

    pub fn current_frame(&self) -> usize {
        self.state.lock().current
    }
}

#[cfg(test)]
mod tests {
    use crate::graveyard::{Graveyard, MAX_GRAVES_PER_FRAME};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn graves_live_until_their_frame_comes_back() {
        let graveyard = Graveyard::new(2);
        let object = Arc::new(42u32);

        graveyard.new_frame(0);
        graveyard.retire_object(object.clone());
        assert_eq!(Arc::strong_count(&object), 2);

        graveyard.new_frame(1);
        assert_eq!(Arc::strong_count(&object), 2);
        assert_eq!(graveyard.len(0), 1);

        graveyard.new_frame(0);
        assert_eq!(Arc::strong_count(&object), 1);
        assert!(graveyard.is_empty());
    }

    #[test]
    fn drain_all_empties_every_frame() {
        let graveyard = Graveyard::new(3);
        for frame in 0..3 {
            graveyard.new_frame(frame);
            graveyard.retire_object(Arc::new(frame));
        }
        graveyard.drain_all();
        assert!(graveyard.is_empty());
    }

    #[test]
    #[should_panic]
    fn overflow_panics() {
        let graveyard = Graveyard::new(2);
        for i in 0..=MAX_GRAVES_PER_FRAME {
            graveyard.retire_object(Arc::new(i));
        }
    }

    struct Tracked {
        completed_frames: Arc<AtomicUsize>,
        retired_after: usize,
        destroyed_early: Arc<AtomicBool>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            if self.completed_frames.load(Ordering::SeqCst) <= self.retired_after {
                self.destroyed_early.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn graves_retired_during_a_frame_switch_survive_it() {
        let graveyard = Arc::new(Graveyard::new(2));
        let completed_frames = Arc::new(AtomicUsize::new(0));
        let destroyed_early = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let retirer = {
            let graveyard = graveyard.clone();
            let completed_frames = completed_frames.clone();
            let destroyed_early = destroyed_early.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                let mut last_retired_after = usize::MAX;
                while !done.load(Ordering::SeqCst) {
                    // One grave per completed frame keeps every list far from full
                    let retired_after = completed_frames.load(Ordering::SeqCst);
                    if retired_after == last_retired_after {
                        std::thread::yield_now();
                        continue;
                    }
                    last_retired_after = retired_after;
                    graveyard.retire_object(Arc::new(Tracked {
                        completed_frames: completed_frames.clone(),
                        retired_after,
                        destroyed_early: destroyed_early.clone(),
                    }));
                }
            })
        };

        for frame in 0..20_000 {
            graveyard.new_frame(frame % 2);
            completed_frames.fetch_add(1, Ordering::SeqCst);
        }
        done.store(true, Ordering::SeqCst);
        retirer.join().unwrap();

        completed_frames.fetch_add(1, Ordering::SeqCst);
        graveyard.drain_all();
        assert!(!destroyed_early.load(Ordering::SeqCst));
    }
}
