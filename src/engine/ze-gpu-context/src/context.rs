use crate::command_list::CommandList;
use crate::command_queue::CommandQueue;
use crate::config::ContextConfig;
use crate::descriptor::{DescriptorRange, FrameDescriptorAllocator, PersistentDescriptorHeap};
use crate::graveyard::{Grave, Graveyard};
use crate::resource::{Buffer, ResourceFactory, Texture};
use crate::upload::{DynamicAllocation, PagePool, UploadBuffer};
use bytemuck::Pod;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use ze_core::maths::RectI32;
use ze_core::{ze_error, ze_info};
use ze_gfx::backend::{
    BufferDesc, DescriptorHeapType, Device, DeviceError, FormatSupportFlags, QueueType,
    TextureDesc,
};
use ze_gfx::PixelFormat;

/// Everything needed to record and submit frames on one device.
///
/// Up to `buffered_frames` frames can be in flight. Per-frame resources (upload pages, transient
/// descriptors, retired objects) are indexed by `frame_id % buffered_frames` and only recycled
/// after [`GpuContext::wait_for_buffered_frame`] returned for that index.
pub struct GpuContext {
    device: Arc<dyn Device>,
    config: ContextConfig,
    render_queue: CommandQueue,
    compute_queue: CommandQueue,
    copy_queue: CommandQueue,
    resource_factory: Arc<ResourceFactory>,
    gpu_descriptor_heap: Arc<PersistentDescriptorHeap>,
    frame_descriptor_allocator: FrameDescriptorAllocator,
    graveyard: Arc<Graveyard>,
    page_pools: Vec<Arc<PagePool>>,
    frame_upload_buffer: Mutex<UploadBuffer>,
    frame_id: AtomicU64,
    buffered_frame_id: AtomicUsize,
    frame_fences: Mutex<Vec<u64>>,
    running: AtomicBool,
    quitted: AtomicBool,
}

impl GpuContext {
    pub fn new(device: Arc<dyn Device>, config: ContextConfig) -> Result<Arc<Self>, DeviceError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        assert!(config.buffered_frames > 0);
        let buffered_frames = config.buffered_frames;
        let timeout = config.fence_wait_timeout();

        let render_queue = CommandQueue::new(device.clone(), QueueType::Graphics, timeout)?;
        let compute_queue = CommandQueue::new(device.clone(), QueueType::Compute, timeout)?;
        let copy_queue = CommandQueue::new(device.clone(), QueueType::Transfer, timeout)?;

        let cpu_heap = Arc::new(PersistentDescriptorHeap::new(
            device.as_ref(),
            DescriptorHeapType::CbvSrvUav,
            config.cpu_descriptor_capacity,
            false,
            "CPU Descriptor Heap",
        )?);
        let gpu_descriptor_heap = Arc::new(PersistentDescriptorHeap::new(
            device.as_ref(),
            DescriptorHeapType::CbvSrvUav,
            config.gpu_descriptor_capacity,
            true,
            "GPU Descriptor Heap",
        )?);
        let rtv_heap = Arc::new(PersistentDescriptorHeap::new(
            device.as_ref(),
            DescriptorHeapType::Rtv,
            config.rtv_capacity,
            false,
            "RTV Descriptor Heap",
        )?);
        let dsv_heap = Arc::new(PersistentDescriptorHeap::new(
            device.as_ref(),
            DescriptorHeapType::Dsv,
            config.dsv_capacity,
            false,
            "DSV Descriptor Heap",
        )?);

        let graveyard = Arc::new(Graveyard::new(buffered_frames));
        let resource_factory = Arc::new(ResourceFactory::new(
            device.clone(),
            cpu_heap,
            rtv_heap,
            dsv_heap,
            graveyard.clone(),
        ));

        let page_pools = (0..buffered_frames)
            .map(|_| Arc::new(PagePool::new(device.clone(), config.upload_page_size)))
            .collect::<Vec<_>>();
        let frame_upload_buffer = Mutex::new(UploadBuffer::new(
            page_pools[buffered_frames - 1].clone(),
        ));

        ze_info!(
            "GPU context created on \"{}\" with {} buffered frames",
            device.name(),
            buffered_frames
        );

        Ok(Arc::new(Self {
            frame_descriptor_allocator: FrameDescriptorAllocator::new(
                device.clone(),
                buffered_frames,
                config.frame_descriptor_page_size,
                config.frame_descriptor_page_count,
            ),
            device,
            render_queue,
            compute_queue,
            copy_queue,
            resource_factory,
            gpu_descriptor_heap,
            graveyard,
            page_pools,
            frame_upload_buffer,
            frame_id: AtomicU64::new(0),
            buffered_frame_id: AtomicUsize::new(buffered_frames - 1),
            frame_fences: Mutex::new(vec![0; buffered_frames]),
            running: AtomicBool::new(true),
            quitted: AtomicBool::new(false),
            config,
        }))
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn buffered_frames(&self) -> usize {
        self.config.buffered_frames
    }

    pub fn frame_id(&self) -> u64 {
        self.frame_id.load(Ordering::SeqCst)
    }

    pub fn buffered_frame_id(&self) -> usize {
        self.buffered_frame_id.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn render_queue(&self) -> &CommandQueue {
        &self.render_queue
    }

    pub fn compute_queue(&self) -> &CommandQueue {
        &self.compute_queue
    }

    pub fn copy_queue(&self) -> &CommandQueue {
        &self.copy_queue
    }

    pub fn resource_factory(&self) -> &Arc<ResourceFactory> {
        &self.resource_factory
    }

    pub fn graveyard(&self) -> &Arc<Graveyard> {
        &self.graveyard
    }

    pub fn gpu_descriptor_heap(&self) -> &Arc<PersistentDescriptorHeap> {
        &self.gpu_descriptor_heap
    }

    fn current_page_pool(&self) -> Arc<PagePool> {
        self.page_pools[self.buffered_frame_id()].clone()
    }

    /// Render list with a scissor covering any render target
    pub fn get_free_render_command_list(&self) -> Result<CommandList, DeviceError> {
        let mut cmd_list = self
            .render_queue
            .get_free_command_list(self.frame_id(), self.current_page_pool())?;
        cmd_list.set_scissor(RectI32::new(0, 0, i32::MAX, i32::MAX));
        Ok(cmd_list)
    }

    /// `async_compute` selects the compute queue, the render queue is used otherwise
    pub fn get_free_compute_command_list(
        &self,
        async_compute: bool,
    ) -> Result<CommandList, DeviceError> {
        let queue = if async_compute {
            &self.compute_queue
        } else {
            &self.render_queue
        };
        queue.get_free_command_list(self.frame_id(), self.current_page_pool())
    }

    pub fn get_free_copy_command_list(&self) -> Result<CommandList, DeviceError> {
        self.copy_queue
            .get_free_command_list(self.frame_id(), self.current_page_pool())
    }

    /// Submit on the queue matching the list type
    pub fn execute(&self, cmd_list: CommandList) -> Result<u64, DeviceError> {
        self.queue(cmd_list.queue_type()).execute(cmd_list)
    }

    pub fn queue(&self, ty: QueueType) -> &CommandQueue {
        match ty {
            QueueType::Graphics => &self.render_queue,
            QueueType::Compute => &self.compute_queue,
            QueueType::Transfer => &self.copy_queue,
        }
    }

    /// Block until the GPU finished the last frame that used the buffered index of `frame_id`
    pub fn wait_for_buffered_frame(&self, frame_id: u64) -> Result<(), DeviceError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let buffered_frame = (frame_id % self.buffered_frames() as u64) as usize;
        let fence_value = self.frame_fences.lock()[buffered_frame];
        self.render_queue.wait_for_fence(fence_value)
    }

    /// Render fence value marking the end of the current buffered frame's work
    pub fn set_buffered_frame_fence(&self, fence_value: u64) {
        self.frame_fences.lock()[self.buffered_frame_id()] = fence_value;
    }

    /// Start recording `frame_id`. Its buffered frame must have been waited on
    pub fn new_frame(&self, frame_id: u64) {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        let buffered_frame = (frame_id % self.buffered_frames() as u64) as usize;
        self.frame_id.store(frame_id, Ordering::SeqCst);
        self.buffered_frame_id
            .store(buffered_frame, Ordering::SeqCst);

        self.graveyard.new_frame(buffered_frame);

        let pool = self.page_pools[buffered_frame].clone();
        pool.reset();
        self.frame_upload_buffer.lock().reset(pool);
        self.frame_descriptor_allocator.new_frame(buffered_frame);
    }

    pub fn retire(&self, grave: Grave) {
        self.graveyard.retire(grave);
    }

    pub fn retire_object<T: Any + Send + Sync>(&self, object: Arc<T>) {
        self.graveyard.retire_object(object);
    }

    pub fn create_texture(&self, desc: &TextureDesc, name: &str) -> Result<Texture, DeviceError> {
        self.resource_factory.create_texture(desc, name)
    }

    pub fn create_buffer(
        &self,
        desc: &BufferDesc,
        element_size: u32,
        name: &str,
    ) -> Result<Buffer, DeviceError> {
        self.resource_factory.create_buffer(desc, element_size, name)
    }

    pub fn format_support(&self, format: PixelFormat) -> FormatSupportFlags {
        self.device.format_support(format)
    }

    pub fn allocate_dynamic_buffer(
        &self,
        size: u64,
        alignment: u64,
    ) -> Result<DynamicAllocation, DeviceError> {
        self.frame_upload_buffer.lock().allocate(size, alignment)
    }

    pub fn upload_dynamic_constant_buffer(&self, data: &[u8]) -> Result<u64, DeviceError> {
        self.frame_upload_buffer
            .lock()
            .upload_dynamic_constant_buffer(data)
    }

    pub fn upload_pod<T: Pod>(&self, data: &[T], alignment: u64) -> Result<u64, DeviceError> {
        self.frame_upload_buffer.lock().upload_slice(data, alignment)
    }

    pub fn allocate_contiguous_descriptor_range(
        &self,
        count: u32,
    ) -> Result<DescriptorRange, DeviceError> {
        self.frame_descriptor_allocator
            .allocate_contiguous_descriptor_range(count)
    }

    pub fn frame_descriptor_allocator(&self) -> &FrameDescriptorAllocator {
        &self.frame_descriptor_allocator
    }

    /// Wait for every queue to become idle
    pub fn flush_application(&self) -> Result<(), DeviceError> {
        #[cfg(feature = "profiling")]
        puffin::profile_function!();

        self.render_queue.flush()?;
        self.compute_queue.flush()?;
        self.copy_queue.flush()
    }

    /// Flush, stop the reclamation threads and destroy every retired object. Only the first
    /// call does anything
    pub fn quit(&self) -> Result<(), DeviceError> {
        if self.quitted.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.running.store(false, Ordering::SeqCst);
        let result = self.flush_application();

        self.render_queue.leave_thread();
        self.compute_queue.leave_thread();
        self.copy_queue.leave_thread();

        if result.is_ok() {
            self.graveyard.drain_all();
        }

        ze_info!("GPU context stopped");
        result
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        if let Err(error) = self.quit() {
            ze_error!("Failed to stop the GPU context: {}", error);
        }
    }
}
