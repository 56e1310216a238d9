use crate::command_list::CommandList;
use crate::upload::{PagePool, UploadBuffer};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use ze_core::thread::spawn_named;
use ze_core::{ze_error, ze_verbose};
use ze_gfx::backend::{CommandAllocator, Device, DeviceError, Fence, QueueType};

struct RunningEntry {
    cmd_list: ze_gfx::backend::CommandList,
    allocator: CommandAllocator,
    fence_value: u64,
}

#[derive(Default)]
struct Running {
    entries: VecDeque<RunningEntry>,

    /// Submitted lists not yet back in the free pools, including the one being reclaimed
    count: usize,
    stop: bool,
    lost: bool,
}

struct QueueShared {
    device: Arc<dyn Device>,
    ty: QueueType,
    queue: ze_gfx::backend::CommandQueue,
    fence: Fence,
    fence_value: AtomicU64,
    fence_wait_timeout: Option<Duration>,
    submission: Mutex<()>,
    free_lists: Mutex<Vec<ze_gfx::backend::CommandList>>,
    free_allocators: Mutex<Vec<CommandAllocator>>,
    running: Mutex<Running>,
    work_available: Condvar,
    idle: Condvar,
}

impl QueueShared {
    fn signal_locked(&self) -> Result<u64, DeviceError> {
        let value = self.fence_value.fetch_add(1, Ordering::SeqCst) + 1;
        self.device.queue_signal(&self.queue, &self.fence, value)?;
        Ok(value)
    }

    fn wait_for_fence(&self, value: u64) -> Result<(), DeviceError> {
        if self.device.fence_completed_value(&self.fence) >= value {
            return Ok(());
        }

        self.device
            .wait_for_fence(&self.fence, value, self.fence_wait_timeout)
    }

    fn reclaim(&self, entry: RunningEntry) -> Result<(), DeviceError> {
        self.wait_for_fence(entry.fence_value)?;
        self.device.reset_command_allocator(&entry.allocator)?;
        self.free_allocators.lock().push(entry.allocator);
        self.free_lists.lock().push(entry.cmd_list);
        Ok(())
    }

    /// Body of the reclamation thread
    fn run(&self) {
        loop {
            let entry = {
                let mut running = self.running.lock();
                loop {
                    if running.stop || running.lost {
                        return;
                    }

                    if let Some(entry) = running.entries.pop_front() {
                        break entry;
                    }

                    self.work_available.wait(&mut running);
                }
            };

            let fence_value = entry.fence_value;
            let result = self.reclaim(entry);

            let mut running = self.running.lock();
            running.count -= 1;
            if let Err(error) = result {
                ze_error!(
                    "{} queue failed to reclaim work of fence value {}: {}",
                    self.ty,
                    fence_value,
                    error
                );
                running.lost = true;
            }

            if running.count == 0 || running.lost {
                self.idle.notify_all();
            }
        }
    }
}

/// A native queue, its monotonic fence and the pools of command lists and allocators feeding it.
///
/// Submitted lists are recycled by a per-queue reclamation thread once the GPU went past their
/// fence value.
pub struct CommandQueue {
    shared: Arc<QueueShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue {
    pub fn new(
        device: Arc<dyn Device>,
        ty: QueueType,
        fence_wait_timeout: Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let queue = device.create_command_queue(ty, &format!("{} Queue", ty))?;
        let fence = device.create_fence(0)?;
        let shared = Arc::new(QueueShared {
            device,
            ty,
            queue,
            fence,
            fence_value: AtomicU64::new(0),
            fence_wait_timeout,
            submission: Mutex::new(()),
            free_lists: Mutex::default(),
            free_allocators: Mutex::default(),
            running: Mutex::default(),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let thread = {
            let shared = shared.clone();
            spawn_named(&format!("{} Reclamation Thread", ty), move || shared.run())
                .map_err(|_| DeviceError::Unknown)?
        };

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn ty(&self) -> QueueType {
        self.shared.ty
    }

    pub fn native(&self) -> &ze_gfx::backend::CommandQueue {
        &self.shared.queue
    }

    pub fn fence(&self) -> &Fence {
        &self.shared.fence
    }

    /// Last value handed out by [`Self::signal`]
    pub fn last_signaled_value(&self) -> u64 {
        self.shared.fence_value.load(Ordering::SeqCst)
    }

    /// Ask the queue to set its fence to a fresh value once all previously submitted work is done
    pub fn signal(&self) -> Result<u64, DeviceError> {
        let _submission = self.shared.submission.lock();
        self.shared.signal_locked()
    }

    pub fn is_fence_complete(&self, value: u64) -> bool {
        self.shared.device.fence_completed_value(&self.shared.fence) >= value
    }

    pub fn wait_for_fence(&self, value: u64) -> Result<(), DeviceError> {
        self.shared.wait_for_fence(value)
    }

    /// Make this queue wait on the GPU for everything `other` has been given so far
    pub fn wait_for_other_queue(&self, other: &CommandQueue) -> Result<(), DeviceError> {
        let value = other.signal()?;
        self.wait_for_other_queue_value(other, value)
    }

    pub fn wait_for_other_queue_value(
        &self,
        other: &CommandQueue,
        value: u64,
    ) -> Result<(), DeviceError> {
        let _submission = self.shared.submission.lock();
        self.shared
            .device
            .queue_wait(&self.shared.queue, &other.shared.fence, value)
    }

    /// Block until every submitted list is reclaimed and the queue is idle
    pub fn flush(&self) -> Result<(), DeviceError> {
        {
            let mut running = self.shared.running.lock();
            while running.count > 0 && !running.stop && !running.lost {
                self.shared.idle.wait(&mut running);
            }

            if running.lost {
                return Err(DeviceError::DeviceLost);
            }
        }

        let value = self.signal()?;
        self.wait_for_fence(value)
    }

    pub fn get_free_command_allocator(&self) -> Result<CommandAllocator, DeviceError> {
        if let Some(allocator) = self.shared.free_allocators.lock().pop() {
            return Ok(allocator);
        }

        self.shared.device.create_command_allocator(self.shared.ty)
    }

    /// A command list in recording state, its upload memory coming from `pages`
    pub fn get_free_command_list(
        &self,
        frame_id: u64,
        pages: Arc<PagePool>,
    ) -> Result<CommandList, DeviceError> {
        let allocator = self.get_free_command_allocator()?;
        let free_list = self.shared.free_lists.lock().pop();
        let native = match free_list {
            Some(mut cmd_list) => {
                self.shared
                    .device
                    .reset_command_list(&mut cmd_list, &allocator)?;
                cmd_list
            }
            None => {
                let mut cmd_list = self
                    .shared
                    .device
                    .create_command_list(self.shared.ty, &allocator)?;
                self.shared
                    .device
                    .reset_command_list(&mut cmd_list, &allocator)?;
                cmd_list
            }
        };

        Ok(CommandList::new(
            self.shared.device.clone(),
            native,
            allocator,
            frame_id,
            UploadBuffer::new(pages),
        ))
    }

    /// Close, submit and signal. The returned fence value marks the completion of `cmd_list`
    pub fn execute(&self, cmd_list: CommandList) -> Result<u64, DeviceError> {
        self.execute_lists(vec![cmd_list])
    }

    pub fn execute_lists(&self, cmd_lists: Vec<CommandList>) -> Result<u64, DeviceError> {
        let mut parts = Vec::with_capacity(cmd_lists.len());
        for cmd_list in cmd_lists {
            assert_eq!(cmd_list.queue_type(), self.shared.ty);
            let (mut native, allocator) = cmd_list.into_parts();
            self.shared.device.close_command_list(&mut native)?;
            parts.push((native, allocator));
        }

        let _submission = self.shared.submission.lock();
        let natives = parts.iter().map(|(native, _)| native).collect::<Vec<_>>();
        self.shared.device.queue_execute(&self.shared.queue, &natives);
        let fence_value = self.shared.signal_locked()?;

        let mut running = self.shared.running.lock();
        for (cmd_list, allocator) in parts {
            running.entries.push_back(RunningEntry {
                cmd_list,
                allocator,
                fence_value,
            });
            running.count += 1;
        }
        self.shared.work_available.notify_one();

        Ok(fence_value)
    }

    /// Stop the reclamation thread. Lists still running are no longer recycled
    pub fn leave_thread(&self) {
        let idle = {
            let mut running = self.shared.running.lock();
            running.stop = true;
            running.count == 0
        };
        self.shared.work_available.notify_all();
        self.shared.idle.notify_all();

        let Some(thread) = self.thread.lock().take() else {
            return;
        };

        // A thread blocked on a fence the GPU never reaches is detached
        if idle {
            if thread.join().is_err() {
                ze_error!("{} reclamation thread panicked", self.shared.ty);
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.shared.running.lock().count
    }

    pub fn free_command_list_count(&self) -> usize {
        self.shared.free_lists.lock().len()
    }

    pub fn free_command_allocator_count(&self) -> usize {
        self.shared.free_allocators.lock().len()
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        self.leave_thread();
        ze_verbose!("{} queue destroyed", self.shared.ty);
    }
}
