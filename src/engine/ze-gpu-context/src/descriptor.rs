use parking_lot::Mutex;
use std::sync::Arc;
use ze_gfx::backend::{
    CpuDescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorHeapType, Device,
    DeviceError, GpuDescriptorHandle,
};

#[derive(Default)]
struct FreeList {
    free: Vec<u32>,
    next: u32,
}

/// Long-lived descriptors. Slots are reused LIFO, lifetime is managed by the caller
pub struct PersistentDescriptorHeap {
    name: String,
    heap: DescriptorHeap,
    increment_size: u32,
    free_list: Mutex<FreeList>,
}

impl PersistentDescriptorHeap {
    pub fn new(
        device: &dyn Device,
        ty: DescriptorHeapType,
        capacity: u32,
        shader_visible: bool,
        name: &str,
    ) -> Result<Self, DeviceError> {
        let heap = device.create_descriptor_heap(
            &DescriptorHeapDesc {
                ty,
                capacity,
                shader_visible,
            },
            name,
        )?;

        Ok(Self {
            name: name.to_string(),
            heap,
            increment_size: device.descriptor_handle_increment_size(ty),
            free_list: Mutex::default(),
        })
    }

    pub fn get_free_handle(&self) -> CpuDescriptorHandle {
        let index = {
            let mut free_list = self.free_list.lock();
            match free_list.free.pop() {
                Some(index) => index,
                None => {
                    assert!(
                        free_list.next < self.heap.desc.capacity,
                        "Descriptor heap \"{}\" exhausted ({} descriptors)",
                        self.name,
                        self.heap.desc.capacity
                    );
                    free_list.next += 1;
                    free_list.next - 1
                }
            }
        };

        self.heap.cpu_start.offset(index, self.increment_size)
    }

    pub fn free_handle(&self, handle: CpuDescriptorHandle) {
        let index = ((handle.ptr - self.heap.cpu_start.ptr) / self.increment_size as usize) as u32;
        let mut free_list = self.free_list.lock();
        debug_assert!(index < free_list.next);
        debug_assert!(!free_list.free.contains(&index), "descriptor freed twice");
        free_list.free.push(index);
    }

    /// Same as `get_free_handle`, returning the slot to the heap when dropped
    pub fn allocate(self: &Arc<Self>) -> PersistentDescriptor {
        PersistentDescriptor {
            handle: self.get_free_handle(),
            heap: self.clone(),
        }
    }

    pub fn gpu_handle(&self, handle: CpuDescriptorHandle) -> GpuDescriptorHandle {
        let gpu_start = self
            .heap
            .gpu_start
            .unwrap_or_else(|| panic!("\"{}\" is not shader visible", self.name));
        GpuDescriptorHandle {
            ptr: gpu_start.ptr + (handle.ptr - self.heap.cpu_start.ptr) as u64,
        }
    }

    pub fn heap(&self) -> &DescriptorHeap {
        &self.heap
    }

    pub fn ty(&self) -> DescriptorHeapType {
        self.heap.desc.ty
    }

    pub fn allocated_count(&self) -> u32 {
        let free_list = self.free_list.lock();
        free_list.next - free_list.free.len() as u32
    }
}

pub struct PersistentDescriptor {
    heap: Arc<PersistentDescriptorHeap>,
    handle: CpuDescriptorHandle,
}

impl PersistentDescriptor {
    pub fn cpu_handle(&self) -> CpuDescriptorHandle {
        self.handle
    }

    pub fn gpu_handle(&self) -> GpuDescriptorHandle {
        self.heap.gpu_handle(self.handle)
    }
}

impl Drop for PersistentDescriptor {
    fn drop(&mut self) {
        self.heap.free_handle(self.handle);
    }
}

/// Contiguous shader-visible descriptors valid until the buffered frame that allocated them is reused
pub struct DescriptorRange {
    heap: Arc<DescriptorHeap>,
    cpu_base: CpuDescriptorHandle,
    gpu_base: GpuDescriptorHandle,
    count: u32,
    increment_size: u32,
    pushed: u32,
}

impl DescriptorRange {
    pub fn heap(&self) -> &DescriptorHeap {
        &self.heap
    }

    pub fn len(&self) -> u32 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn cpu_handle(&self, index: u32) -> CpuDescriptorHandle {
        assert!(index < self.count);
        self.cpu_base.offset(index, self.increment_size)
    }

    pub fn gpu_handle(&self, index: u32) -> GpuDescriptorHandle {
        assert!(index < self.count);
        self.gpu_base.offset(index, self.increment_size)
    }

    /// Take the next unused slot of the range
    pub fn push_handle(&mut self) -> (CpuDescriptorHandle, GpuDescriptorHandle) {
        let index = self.pushed;
        self.pushed += 1;
        (self.cpu_handle(index), self.gpu_handle(index))
    }

    /// Copy a CPU-only descriptor into the next slot of the range
    pub fn push_copy(
        &mut self,
        device: &dyn Device,
        src: CpuDescriptorHandle,
    ) -> GpuDescriptorHandle {
        let (cpu, gpu) = self.push_handle();
        device.copy_descriptors(1, cpu, src, self.heap.desc.ty);
        gpu
    }
}

struct ActivePage {
    index: u32,
    used: u32,
}

struct FramePages {
    heap: Option<Arc<DescriptorHeap>>,
    carved_pages: u32,
    used_pages: Vec<Vec<u32>>,
    free_pages: Vec<u32>,
    current_page: Option<ActivePage>,
    current_frame: usize,
}

/// Transient shader-visible descriptors, carved out of fixed size pages recycled per buffered frame.
///
/// Every page is a slice of the same shader-visible heap, so ranges from different pages can be
/// bound together without switching heaps mid-list.
pub struct FrameDescriptorAllocator {
    device: Arc<dyn Device>,
    page_size: u32,
    max_pages: u32,
    increment_size: u32,
    pages: Mutex<FramePages>,
}

impl FrameDescriptorAllocator {
    pub fn new(
        device: Arc<dyn Device>,
        buffered_frames: usize,
        page_size: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            increment_size: device.descriptor_handle_increment_size(DescriptorHeapType::CbvSrvUav),
            device,
            page_size,
            max_pages,
            pages: Mutex::new(FramePages {
                heap: None,
                carved_pages: 0,
                used_pages: vec![vec![]; buffered_frames],
                free_pages: vec![],
                current_page: None,
                current_frame: buffered_frames - 1,
            }),
        }
    }

    /// Recycle every page `buffered_frame` used. Its previous GPU work must be complete
    pub fn new_frame(&self, buffered_frame: usize) {
        let mut pages = self.pages.lock();
        let FramePages {
            used_pages,
            free_pages,
            ..
        } = &mut *pages;
        free_pages.append(&mut used_pages[buffered_frame]);
        pages.current_page = None;
        pages.current_frame = buffered_frame;
    }

    fn heap(&self, pages: &mut FramePages) -> Result<Arc<DescriptorHeap>, DeviceError> {
        if let Some(heap) = &pages.heap {
            return Ok(heap.clone());
        }

        let heap = Arc::new(self.device.create_descriptor_heap(
            &DescriptorHeapDesc {
                ty: DescriptorHeapType::CbvSrvUav,
                capacity: self.page_size * self.max_pages,
                shader_visible: true,
            },
            "Frame Descriptor Heap",
        )?);
        pages.heap = Some(heap.clone());
        Ok(heap)
    }

    pub fn allocate_contiguous_descriptor_range(
        &self,
        count: u32,
    ) -> Result<DescriptorRange, DeviceError> {
        assert!(
            count <= self.page_size,
            "Requested {} descriptors but pages only hold {}",
            count,
            self.page_size
        );

        let mut pages = self.pages.lock();
        let heap = self.heap(&mut pages)?;
        let needs_page = pages
            .current_page
            .as_ref()
            .map_or(true, |page| page.used + count > self.page_size);
        if needs_page {
            let index = match pages.free_pages.pop() {
                Some(index) => index,
                None => {
                    assert!(
                        pages.carved_pages < self.max_pages,
                        "Frame descriptor heap exhausted ({} pages of {})",
                        self.max_pages,
                        self.page_size
                    );
                    pages.carved_pages += 1;
                    pages.carved_pages - 1
                }
            };

            let current_frame = pages.current_frame;
            pages.used_pages[current_frame].push(index);
            pages.current_page = Some(ActivePage { index, used: 0 });
        }

        let offset = match pages.current_page.as_mut() {
            Some(page) => {
                page.used += count;
                page.index * self.page_size + page.used - count
            }
            None => unreachable!(),
        };

        let gpu_start = heap.gpu_start.ok_or(DeviceError::InvalidParameters)?;
        Ok(DescriptorRange {
            cpu_base: heap.cpu_start.offset(offset, self.increment_size),
            gpu_base: gpu_start.offset(offset, self.increment_size),
            heap,
            count,
            increment_size: self.increment_size,
            pushed: 0,
        })
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().carved_pages as usize
    }

    pub fn free_page_count(&self) -> usize {
        self.pages.lock().free_pages.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::descriptor::{FrameDescriptorAllocator, PersistentDescriptorHeap};
    use std::sync::Arc;
    use ze_gfx::backend::{DescriptorHeapType, Device};
    use ze_gfx::null::NullDevice;

    #[test]
    fn persistent_heap_reuses_last_freed_slot() {
        let device = NullDevice::new();
        let heap =
            PersistentDescriptorHeap::new(&device, DescriptorHeapType::CbvSrvUav, 16, false, "CPU")
                .unwrap();

        let a = heap.get_free_handle();
        let b = heap.get_free_handle();
        assert_ne!(a, b);
        heap.free_handle(a);
        assert_eq!(heap.get_free_handle(), a);
        assert_eq!(heap.allocated_count(), 2);
    }

    #[test]
    fn persistent_handles_never_alias() {
        let device = NullDevice::new();
        let heap = Arc::new(
            PersistentDescriptorHeap::new(&device, DescriptorHeapType::Rtv, 64, false, "RTV")
                .unwrap(),
        );

        let mut live = (0..32).map(|_| heap.allocate()).collect::<Vec<_>>();
        live.retain(|descriptor| descriptor.cpu_handle().ptr % 3 != 0);
        live.extend((0..20).map(|_| heap.allocate()));

        let mut handles = live.iter().map(|d| d.cpu_handle().ptr).collect::<Vec<_>>();
        handles.sort_unstable();
        handles.dedup();
        assert_eq!(handles.len(), live.len());

        drop(live);
        assert_eq!(heap.allocated_count(), 0);
    }

    #[test]
    #[should_panic]
    fn exhausted_heap_panics() {
        let device = NullDevice::new();
        let heap =
            PersistentDescriptorHeap::new(&device, DescriptorHeapType::Dsv, 2, false, "DSV")
                .unwrap();
        for _ in 0..3 {
            heap.get_free_handle();
        }
    }

    #[test]
    fn frame_ranges_do_not_overlap() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let allocator = FrameDescriptorAllocator::new(device, 2, 64, 8);
        allocator.new_frame(0);

        let mut spans = vec![];
        for count in [10, 30, 20, 40, 64, 1] {
            let range = allocator.allocate_contiguous_descriptor_range(count).unwrap();
            let start = range.gpu_handle(0).ptr;
            let end = range.gpu_handle(count - 1).ptr;
            spans.push((start, end));
        }

        for (i, a) in spans.iter().enumerate() {
            for b in spans.iter().skip(i + 1) {
                assert!(a.1 < b.0 || b.1 < a.0, "{:?} overlaps {:?}", a, b);
            }
        }
    }

    #[test]
    fn frame_pages_come_back_after_a_full_cycle() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let allocator = FrameDescriptorAllocator::new(device, 2, 32, 8);

        for frame in 0..10 {
            allocator.new_frame(frame % 2);
            for _ in 0..4 {
                allocator.allocate_contiguous_descriptor_range(20).unwrap();
            }
        }

        // Four pages per buffered frame, steady state never grows past that
        assert_eq!(allocator.page_count(), 8);
        allocator.new_frame(0);
        assert_eq!(allocator.free_page_count(), 4);
    }

    #[test]
    #[should_panic]
    fn range_larger_than_a_page_panics() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let allocator = FrameDescriptorAllocator::new(device, 2, 32, 8);
        let _ = allocator.allocate_contiguous_descriptor_range(33);
    }

    #[test]
    fn ranges_across_pages_share_one_heap() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let allocator = FrameDescriptorAllocator::new(device, 2, 16, 4);
        allocator.new_frame(0);

        let common = allocator.allocate_contiguous_descriptor_range(12).unwrap();
        let material = allocator.allocate_contiguous_descriptor_range(8).unwrap();
        assert_eq!(allocator.page_count(), 2);
        assert_eq!(common.heap().gpu_start, material.heap().gpu_start);
        assert!(material.gpu_handle(0).ptr > common.gpu_handle(11).ptr);
    }

    #[test]
    #[should_panic]
    fn running_out_of_pages_panics() {
        let device: Arc<dyn Device> = Arc::new(NullDevice::new());
        let allocator = FrameDescriptorAllocator::new(device, 2, 16, 2);
        allocator.new_frame(0);
        for _ in 0..3 {
            let _ = allocator.allocate_contiguous_descriptor_range(16);
        }
    }
}
