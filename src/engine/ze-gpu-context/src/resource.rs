use crate::barrier::BarrierResource;
use crate::descriptor::{PersistentDescriptor, PersistentDescriptorHeap};
use crate::graveyard::{BufferGrave, Grave, Graveyard, TextureGrave};
use bytemuck::Pod;
use std::sync::Arc;
use ze_gfx::backend::*;
use ze_gfx::PixelFormat;

/// Creates native resources along with the descriptors of their default views
pub struct ResourceFactory {
    device: Arc<dyn Device>,
    cpu_heap: Arc<PersistentDescriptorHeap>,
    rtv_heap: Arc<PersistentDescriptorHeap>,
    dsv_heap: Arc<PersistentDescriptorHeap>,
    graveyard: Arc<Graveyard>,
}

impl ResourceFactory {
    pub fn new(
        device: Arc<dyn Device>,
        cpu_heap: Arc<PersistentDescriptorHeap>,
        rtv_heap: Arc<PersistentDescriptorHeap>,
        dsv_heap: Arc<PersistentDescriptorHeap>,
        graveyard: Arc<Graveyard>,
    ) -> Self {
        Self {
            device,
            cpu_heap,
            rtv_heap,
            dsv_heap,
            graveyard,
        }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }

    pub fn graveyard(&self) -> &Arc<Graveyard> {
        &self.graveyard
    }

    fn assert_format_support(&self, desc: &TextureDesc, name: &str) {
        let support = self.device.format_support(desc.format);
        let required = [
            (
                TextureUsageFlagBits::ShaderResource,
                FormatSupportFlagBits::ShaderResource,
            ),
            (
                TextureUsageFlagBits::UnorderedAccess,
                FormatSupportFlagBits::UnorderedAccess,
            ),
            (
                TextureUsageFlagBits::RenderTarget,
                FormatSupportFlagBits::RenderTarget,
            ),
            (
                TextureUsageFlagBits::DepthStencil,
                FormatSupportFlagBits::DepthStencil,
            ),
        ];

        for (usage, capability) in required {
            assert!(
                !desc.usage_flags.contains(usage) || support.contains(capability),
                "Texture \"{}\" wants {:?} but format {} does not support it",
                name,
                usage,
                desc.format
            );
        }
    }

    pub fn create_texture(
        self: &Arc<Self>,
        desc: &TextureDesc,
        name: &str,
    ) -> Result<Texture, DeviceError> {
        self.assert_format_support(desc, name);
        let native = Arc::new(self.device.create_texture(desc, name)?);
        Ok(self.wrap_texture(native, name))
    }

    /// Build the default views of a texture created elsewhere (swap chain back buffers)
    pub fn wrap_texture(self: &Arc<Self>, native: Arc<ze_gfx::backend::Texture>, name: &str) -> Texture {
        let views = self.create_texture_views(&native);
        Texture {
            factory: self.clone(),
            name: name.to_string(),
            native,
            views,
        }
    }

    fn create_texture_views(&self, texture: &ze_gfx::backend::Texture) -> TextureViews {
        let desc = &texture.desc;
        let mut views = TextureViews::default();

        if desc.usage_flags.contains(TextureUsageFlagBits::ShaderResource) {
            let srv = Texture2DSRV {
                min_mip_level: 0,
                mip_levels: desc.mip_levels,
            };
            let descriptor = self.cpu_heap.allocate();
            self.device.create_shader_resource_view(
                &ShaderResourceViewDesc {
                    resource: ResourceRef::Texture(texture),
                    format: desc.format,
                    ty: match desc.dimension {
                        TextureDimension::Cube => ShaderResourceViewType::TextureCube(srv),
                        _ => ShaderResourceViewType::Texture2D(srv),
                    },
                },
                descriptor.cpu_handle(),
            );
            views.srv = Some(descriptor);
        }

        if desc.usage_flags.contains(TextureUsageFlagBits::UnorderedAccess) {
            for mip_level in 0..desc.mip_levels {
                let descriptor = self.cpu_heap.allocate();
                self.device.create_unordered_access_view(
                    &UnorderedAccessViewDesc {
                        resource: ResourceRef::Texture(texture),
                        format: desc.format,
                        ty: UnorderedAccessViewType::Texture2D(Texture2DUAV { mip_level }),
                    },
                    descriptor.cpu_handle(),
                );
                views.uavs.push(descriptor);
            }
        }

        if desc.usage_flags.contains(TextureUsageFlagBits::RenderTarget) {
            let descriptor = self.rtv_heap.allocate();
            self.device.create_render_target_view(
                &RenderTargetViewDesc {
                    resource: texture,
                    format: desc.format,
                    mip_level: 0,
                },
                descriptor.cpu_handle(),
            );
            views.rtv = Some(descriptor);
        }

        if desc.usage_flags.contains(TextureUsageFlagBits::DepthStencil) {
            let descriptor = self.dsv_heap.allocate();
            self.device.create_depth_stencil_view(
                &DepthStencilViewDesc {
                    resource: texture,
                    format: desc.format,
                    read_only: false,
                },
                descriptor.cpu_handle(),
            );
            views.dsv = Some(descriptor);
        }

        views
    }

    /// `element_size` is the stride of the structured views, ignored when the buffer has none
    pub fn create_buffer(
        self: &Arc<Self>,
        desc: &BufferDesc,
        element_size: u32,
        name: &str,
    ) -> Result<Buffer, DeviceError> {
        let native = Arc::new(self.device.create_buffer(desc, name)?);
        let mut views = BufferViews::default();

        let wants_views = desc.usage.intersects(
            BufferUsageFlagBits::ShaderResource | BufferUsageFlagBits::UnorderedAccess,
        );
        assert!(
            !wants_views
                || element_size > 0
                || desc.usage.contains(BufferUsageFlagBits::AccelerationStructure),
            "Buffer \"{}\" has views but no element size",
            name
        );
        let element_count = if element_size > 0 {
            (desc.size_bytes / element_size as u64) as u32
        } else {
            0
        };

        if desc.usage.contains(BufferUsageFlagBits::ShaderResource) {
            let descriptor = self.cpu_heap.allocate();
            let ty = if desc.usage.contains(BufferUsageFlagBits::AccelerationStructure) {
                ShaderResourceViewType::RaytracingAccelerationStructure
            } else {
                ShaderResourceViewType::Buffer(BufferSRV {
                    first_element_index: 0,
                    element_count,
                    element_size_in_bytes: element_size,
                })
            };
            self.device.create_shader_resource_view(
                &ShaderResourceViewDesc {
                    resource: ResourceRef::Buffer(&native),
                    format: PixelFormat::Unknown,
                    ty,
                },
                descriptor.cpu_handle(),
            );
            views.srv = Some(descriptor);
        }

        if desc.usage.contains(BufferUsageFlagBits::UnorderedAccess)
            && !desc.usage.contains(BufferUsageFlagBits::AccelerationStructure)
        {
            let descriptor = self.cpu_heap.allocate();
            self.device.create_unordered_access_view(
                &UnorderedAccessViewDesc {
                    resource: ResourceRef::Buffer(&native),
                    format: PixelFormat::Unknown,
                    ty: UnorderedAccessViewType::Buffer(BufferUAV {
                        first_element_index: 0,
                        element_count,
                        element_size_in_bytes: element_size,
                    }),
                },
                descriptor.cpu_handle(),
            );
            views.uav = Some(descriptor);
        }

        Ok(Buffer {
            factory: self.clone(),
            name: name.to_string(),
            native,
            element_size,
            views,
        })
    }
}

#[derive(Default)]
struct TextureViews {
    srv: Option<PersistentDescriptor>,
    /// One per mip level
    uavs: Vec<PersistentDescriptor>,
    rtv: Option<PersistentDescriptor>,
    dsv: Option<PersistentDescriptor>,
}

impl TextureViews {
    fn into_vec(self) -> Vec<PersistentDescriptor> {
        let mut views = self.uavs;
        views.extend(self.srv);
        views.extend(self.rtv);
        views.extend(self.dsv);
        views
    }
}

/// A GPU texture with its default views. Destruction is deferred through the graveyard
pub struct Texture {
    factory: Arc<ResourceFactory>,
    name: String,
    native: Arc<ze_gfx::backend::Texture>,
    views: TextureViews,
}

impl Texture {
    pub fn native(&self) -> &Arc<ze_gfx::backend::Texture> {
        &self.native
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.native.desc
    }

    pub fn width(&self) -> u32 {
        self.native.desc.width
    }

    pub fn height(&self) -> u32 {
        self.native.desc.height
    }

    pub fn format(&self) -> PixelFormat {
        self.native.desc.format
    }

    pub fn srv(&self) -> CpuDescriptorHandle {
        self.views
            .srv
            .as_ref()
            .unwrap_or_else(|| panic!("Texture \"{}\" has no SRV", self.name))
            .cpu_handle()
    }

    pub fn uav(&self) -> CpuDescriptorHandle {
        self.mip_uav(0)
    }

    pub fn mip_uav(&self, mip_level: u32) -> CpuDescriptorHandle {
        self.views
            .uavs
            .get(mip_level as usize)
            .unwrap_or_else(|| panic!("Texture \"{}\" has no UAV for mip {}", self.name, mip_level))
            .cpu_handle()
    }

    pub fn rtv(&self) -> CpuDescriptorHandle {
        self.views
            .rtv
            .as_ref()
            .unwrap_or_else(|| panic!("Texture \"{}\" has no RTV", self.name))
            .cpu_handle()
    }

    pub fn dsv(&self) -> CpuDescriptorHandle {
        self.views
            .dsv
            .as_ref()
            .unwrap_or_else(|| panic!("Texture \"{}\" has no DSV", self.name))
            .cpu_handle()
    }

    /// Recreate the texture at a new size. The old resource and its views are retired
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if width == self.width() && height == self.height() {
            return Ok(());
        }

        let mut desc = self.native.desc;
        desc.width = width;
        desc.height = height;
        let native = Arc::new(self.factory.device.create_texture(&desc, &self.name)?);
        let views = self.factory.create_texture_views(&native);

        let old_native = std::mem::replace(&mut self.native, native);
        let old_views = std::mem::replace(&mut self.views, views);
        self.factory.graveyard.retire(Grave::Texture(TextureGrave {
            texture: old_native,
            views: old_views.into_vec(),
        }));
        Ok(())
    }
}

impl BarrierResource for Texture {
    fn resource_ref(&self) -> ResourceRef<'_> {
        ResourceRef::Texture(&self.native)
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.factory.graveyard.retire(Grave::Texture(TextureGrave {
            texture: self.native.clone(),
            views: std::mem::take(&mut self.views).into_vec(),
        }));
    }
}

#[derive(Default)]
struct BufferViews {
    srv: Option<PersistentDescriptor>,
    uav: Option<PersistentDescriptor>,
}

pub struct Buffer {
    factory: Arc<ResourceFactory>,
    name: String,
    native: Arc<ze_gfx::backend::Buffer>,
    element_size: u32,
    views: BufferViews,
}

impl Buffer {
    pub fn native(&self) -> &Arc<ze_gfx::backend::Buffer> {
        &self.native
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> &BufferDesc {
        &self.native.desc
    }

    pub fn size_bytes(&self) -> u64 {
        self.native.desc.size_bytes
    }

    pub fn gpu_address(&self) -> u64 {
        self.native.gpu_address
    }

    pub fn srv(&self) -> CpuDescriptorHandle {
        self.views
            .srv
            .as_ref()
            .unwrap_or_else(|| panic!("Buffer \"{}\" has no SRV", self.name))
            .cpu_handle()
    }

    pub fn uav(&self) -> CpuDescriptorHandle {
        self.views
            .uav
            .as_ref()
            .unwrap_or_else(|| panic!("Buffer \"{}\" has no UAV", self.name))
            .cpu_handle()
    }

    /// Write into a CPU visible buffer
    pub fn write_pod<T: Pod>(&self, offset: u64, data: &[T]) {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(offset + bytes.len() as u64 <= self.size_bytes());
        let ptr = self
            .factory
            .device
            .buffer_mapped_ptr(&self.native)
            .unwrap_or_else(|| panic!("Buffer \"{}\" is not CPU visible", self.name));
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset as usize), bytes.len());
        }
    }

    pub fn vertex_buffer_view(&self, offset: u64, size_in_bytes: u32) -> VertexBufferView {
        assert!(self.element_size > 0);
        VertexBufferView {
            address: self.gpu_address() + offset,
            size_in_bytes,
            stride_in_bytes: self.element_size,
        }
    }

    pub fn index_buffer_view(&self, format: IndexBufferFormat) -> IndexBufferView {
        let size_in_bytes = u32::try_from(self.size_bytes()).unwrap_or_else(|_| {
            panic!(
                "Index buffer \"{}\" is too large to be bound whole ({} bytes)",
                self.name,
                self.size_bytes()
            )
        });
        IndexBufferView {
            address: self.gpu_address(),
            size_in_bytes,
            format,
        }
    }
}

impl BarrierResource for Buffer {
    fn resource_ref(&self) -> ResourceRef<'_> {
        ResourceRef::Buffer(&self.native)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let views = std::mem::take(&mut self.views);
        self.factory.graveyard.retire(Grave::Buffer(BufferGrave {
            buffer: self.native.clone(),
            views: views.srv.into_iter().chain(views.uav).collect(),
        }));
    }
}
