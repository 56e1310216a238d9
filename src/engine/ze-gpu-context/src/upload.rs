use bytemuck::Pod;
use parking_lot::Mutex;
use std::ptr::NonNull;
use std::sync::Arc;
use ze_gfx::backend::{
    Buffer, BufferDesc, BufferUsageFlagBits, Device, DeviceError, MemoryLocation, ResourceState,
};
use ze_gfx::utils::{align_up, CONSTANT_BUFFER_ALIGNMENT};

/// A persistently mapped upload heap buffer
pub struct UploadPage {
    buffer: Buffer,
    mapped: NonNull<u8>,
}

// The mapping lives as long as the buffer, writers never overlap thanks to the linear allocator
unsafe impl Send for UploadPage {}
unsafe impl Sync for UploadPage {}

impl UploadPage {
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

#[derive(Default)]
struct Pages {
    free: Vec<Arc<UploadPage>>,
    used: Vec<Arc<UploadPage>>,
}

/// Upload pages of one buffered frame
pub struct PagePool {
    device: Arc<dyn Device>,
    page_size: u64,
    pages: Mutex<Pages>,
}

impl PagePool {
    pub fn new(device: Arc<dyn Device>, page_size: u64) -> Self {
        Self {
            device,
            page_size,
            pages: Mutex::default(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn get_free_page(&self) -> Result<Arc<UploadPage>, DeviceError> {
        let mut pages = self.pages.lock();
        let page = match pages.free.pop() {
            Some(page) => page,
            None => {
                let buffer = self.device.create_buffer(
                    &BufferDesc {
                        size_bytes: self.page_size,
                        usage: BufferUsageFlagBits::ConstantBuffer
                            | BufferUsageFlagBits::VertexBuffer,
                        memory_location: MemoryLocation::CpuToGpu,
                        default_resource_state: ResourceState::GenericRead,
                    },
                    &format!("Upload Page {}", pages.used.len()),
                )?;
                let mapped = self
                    .device
                    .buffer_mapped_ptr(&buffer)
                    .and_then(NonNull::new)
                    .ok_or(DeviceError::Unknown)?;
                Arc::new(UploadPage { buffer, mapped })
            }
        };

        pages.used.push(page.clone());
        Ok(page)
    }

    /// Make every page available again. The GPU must be done with this buffered frame
    pub fn reset(&self) {
        let mut pages = self.pages.lock();
        let Pages { free, used } = &mut *pages;
        free.append(used);
    }

    pub fn page_count(&self) -> usize {
        let pages = self.pages.lock();
        pages.free.len() + pages.used.len()
    }

    pub fn used_page_count(&self) -> usize {
        self.pages.lock().used.len()
    }
}

/// Transient CPU-written, GPU-read memory. Valid until its buffered frame is reused
#[derive(Debug)]
pub struct DynamicAllocation {
    pub cpu_ptr: *mut u8,
    pub gpu_address: u64,
    pub size: u64,
}

impl DynamicAllocation {
    pub fn write(&self, data: &[u8]) {
        assert!(data.len() as u64 <= self.size);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.cpu_ptr, data.len());
        }
    }

    pub fn write_pod<T: Pod>(&self, data: &[T]) {
        self.write(bytemuck::cast_slice(data));
    }
}

/// Linear arena over the pages of one [`PagePool`]
pub struct UploadBuffer {
    pool: Arc<PagePool>,
    current_page: Option<Arc<UploadPage>>,
    offset: u64,
}

impl UploadBuffer {
    pub fn new(pool: Arc<PagePool>) -> Self {
        Self {
            pool,
            current_page: None,
            offset: 0,
        }
    }

    /// Start over on `pool`, forgetting the current page
    pub fn reset(&mut self, pool: Arc<PagePool>) {
        self.pool = pool;
        self.current_page = None;
        self.offset = 0;
    }

    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<DynamicAllocation, DeviceError> {
        let page_size = self.pool.page_size();
        assert!(
            size <= page_size,
            "Dynamic allocation of {} bytes does not fit in a {} bytes page",
            size,
            page_size
        );

        let mut offset = align_up(self.offset, alignment.max(1));
        let page = match &self.current_page {
            Some(page) if offset + size <= page_size => page.clone(),
            _ => {
                let page = self.pool.get_free_page()?;
                self.current_page = Some(page.clone());
                offset = 0;
                page
            }
        };

        self.offset = offset + size;
        Ok(DynamicAllocation {
            cpu_ptr: unsafe { page.mapped.as_ptr().add(offset as usize) },
            gpu_address: page.buffer.gpu_address + offset,
            size,
        })
    }

    pub fn upload_dynamic_constant_buffer(&mut self, data: &[u8]) -> Result<u64, DeviceError> {
        let allocation = self.allocate(data.len() as u64, CONSTANT_BUFFER_ALIGNMENT)?;
        allocation.write(data);
        Ok(allocation.gpu_address)
    }

    pub fn upload_constants<T: Pod>(&mut self, value: &T) -> Result<u64, DeviceError> {
        self.upload_dynamic_constant_buffer(bytemuck::bytes_of(value))
    }

    pub fn upload_slice<T: Pod>(&mut self, data: &[T], alignment: u64) -> Result<u64, DeviceError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let allocation = self.allocate(bytes.len() as u64, alignment)?;
        allocation.write(bytes);
        Ok(allocation.gpu_address)
    }
}

#[cfg(test)]
mod tests {
    use crate::upload::{PagePool, UploadBuffer};
    use std::sync::Arc;
    use ze_gfx::backend::Device;
    use ze_gfx::null::NullDevice;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let pool = Arc::new(PagePool::new(device, 4096));
        let mut upload = UploadBuffer::new(pool.clone());

        let a = upload.allocate(100, 256).unwrap();
        let b = upload.allocate(100, 256).unwrap();
        assert_eq!(a.gpu_address % 256, 0);
        assert_eq!(b.gpu_address % 256, 0);
        assert!(b.gpu_address >= a.gpu_address + 100);
        assert_eq!(pool.used_page_count(), 1);
    }

    #[test]
    fn overflowing_a_page_takes_a_new_one() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let pool = Arc::new(PagePool::new(device, 1024));
        let mut upload = UploadBuffer::new(pool.clone());

        upload.allocate(800, 16).unwrap();
        upload.allocate(800, 16).unwrap();
        assert_eq!(pool.used_page_count(), 2);

        pool.reset();
        upload.reset(pool.clone());
        upload.allocate(800, 16).unwrap();
        assert_eq!(pool.page_count(), 2);
        assert_eq!(pool.used_page_count(), 1);
    }

    #[test]
    fn constants_land_in_mapped_memory() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let pool = Arc::new(PagePool::new(device, 4096));
        let mut upload = UploadBuffer::new(pool);

        let allocation = upload.allocate(16, 256).unwrap();
        allocation.write_pod(&[1.0f32, 2.0, 3.0, 4.0]);
        let written = unsafe { std::slice::from_raw_parts(allocation.cpu_ptr as *const f32, 4) };
        assert_eq!(written, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    #[should_panic]
    fn allocation_larger_than_a_page_panics() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let pool = Arc::new(PagePool::new(device, 1024));
        let _ = UploadBuffer::new(pool).allocate(2048, 16);
    }
}
