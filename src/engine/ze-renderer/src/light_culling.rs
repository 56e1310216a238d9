use crate::binding::bind_descriptor_table;
use crate::scene::LightList;
use crate::targets::{TrackedBuffer, TrackedTexture};
use bytemuck::{Pod, Zeroable};
use std::cell::Cell;
use ze_gfx::backend::{
    BufferDesc, BufferUsageFlagBits, CpuDescriptorHandle, DeviceError, MemoryLocation,
    PipelineBindPoint, ResourceState, TextureDesc, TextureUsageFlagBits,
};
use ze_gfx::utils::bucketize;
use ze_gfx::PixelFormat;
use ze_gpu_context::{Buffer, CommandList, GpuContext};
use ze_shader_system::Pipeline;

pub const LIGHT_CULLING_TILE_SIZE: u32 = 16;
pub const MAX_NUM_INDICES_PER_TILE: u32 = 256;
pub const LIGHT_GRID_FORMAT: PixelFormat = PixelFormat::R32G32Uint;

/// Four planes per tile
const TILE_FRUSTUM_SIZE: u32 = 4 * 4 * 4;

/// Opaque and transparent index lists share one atomic counter each
const NUM_COUNTERS: u32 = 2;

const FRUSTA_THREAD_GROUP_SIZE: u32 = 16;

mod root {
    pub const CAMERA: u32 = 0;
    pub const CONSTANTS: u32 = 1;
    pub const RESOURCES: u32 = 2;
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct FrustaConstants {
    screen_width: u32,
    screen_height: u32,
    tiles_x: u32,
    tiles_y: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct CullingConstants {
    num_point_lights: u32,
    num_spot_lights: u32,
    num_decals: u32,
    tiles_x: u32,
}

/// Lights and decals a frame culls against the depth buffer
pub struct CullingInputs {
    pub point_lights: LightList,
    pub spot_lights: LightList,
    pub decals: LightList,
}

/// Number of tiles covering a `width` x `height` screen
pub fn light_culling_tiles(width: u32, height: u32) -> (u32, u32) {
    (
        bucketize(width.max(1), LIGHT_CULLING_TILE_SIZE),
        bucketize(height.max(1), LIGHT_CULLING_TILE_SIZE),
    )
}

/// Tiled light and decal culling.
///
/// The world space frusta of the tiles only depend on the projection and the screen size, they
/// are rebuilt after [`LightCulling::allocate`] only.
pub struct LightCulling {
    width: u32,
    height: u32,
    tiles_x: u32,
    tiles_y: u32,
    tiled_frusta: TrackedBuffer,
    opaque_light_grid: TrackedTexture,
    transparent_light_grid: TrackedTexture,
    light_index_list: TrackedBuffer,
    light_index_counter: TrackedBuffer,
    zero_counter: Buffer,
    frusta_dirty: Cell<bool>,
}

impl LightCulling {
    pub fn new(context: &GpuContext, width: u32, height: u32) -> Result<Self, DeviceError> {
        let zero_counter = context.create_buffer(
            &BufferDesc {
                size_bytes: (NUM_COUNTERS * 4) as u64,
                usage: Default::default(),
                memory_location: MemoryLocation::CpuToGpu,
                default_resource_state: ResourceState::GenericRead,
            },
            4,
            "Light Index Counter Reset",
        )?;
        zero_counter.write_pod(0, &[0u32; NUM_COUNTERS as usize]);

        let light_index_counter = TrackedBuffer::new(
            context,
            &BufferDesc {
                size_bytes: (NUM_COUNTERS * 4) as u64,
                usage: BufferUsageFlagBits::UnorderedAccess.into(),
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::UnorderedAccessReadWrite,
            },
            4,
            "Light Index Counter",
        )?;

        let (tiles_x, tiles_y) = light_culling_tiles(width, height);
        let (tiled_frusta, opaque_light_grid, transparent_light_grid, light_index_list) =
            Self::create_tile_resources(context, tiles_x, tiles_y)?;

        Ok(Self {
            width,
            height,
            tiles_x,
            tiles_y,
            tiled_frusta,
            opaque_light_grid,
            transparent_light_grid,
            light_index_list,
            light_index_counter,
            zero_counter,
            frusta_dirty: Cell::new(true),
        })
    }

    fn create_tile_resources(
        context: &GpuContext,
        tiles_x: u32,
        tiles_y: u32,
    ) -> Result<(TrackedBuffer, TrackedTexture, TrackedTexture, TrackedBuffer), DeviceError> {
        let num_tiles = (tiles_x * tiles_y) as u64;
        let tiled_frusta = TrackedBuffer::new(
            context,
            &BufferDesc {
                size_bytes: num_tiles * TILE_FRUSTUM_SIZE as u64,
                usage: BufferUsageFlagBits::UnorderedAccess | BufferUsageFlagBits::ShaderResource,
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::ShaderRead,
            },
            TILE_FRUSTUM_SIZE,
            "Tiled Frusta",
        )?;

        let grid = |name: &str| {
            let mut desc = TextureDesc::new_2d(
                tiles_x,
                tiles_y,
                LIGHT_GRID_FORMAT,
                TextureUsageFlagBits::UnorderedAccess | TextureUsageFlagBits::ShaderResource,
            );
            desc.default_resource_state = ResourceState::ShaderRead;
            TrackedTexture::new(context, &desc, name)
        };

        let light_index_list = TrackedBuffer::new(
            context,
            &BufferDesc {
                size_bytes: num_tiles * (MAX_NUM_INDICES_PER_TILE * NUM_COUNTERS * 4) as u64,
                usage: BufferUsageFlagBits::UnorderedAccess | BufferUsageFlagBits::ShaderResource,
                memory_location: MemoryLocation::GpuOnly,
                default_resource_state: ResourceState::ShaderRead,
            },
            4,
            "Light Index List",
        )?;

        Ok((
            tiled_frusta,
            grid("Opaque Light Grid")?,
            grid("Transparent Light Grid")?,
            light_index_list,
        ))
    }

    /// Size the tile resources for a new screen size. The frusta are rebuilt on the next frame
    pub fn allocate(
        &mut self,
        context: &GpuContext,
        width: u32,
        height: u32,
    ) -> Result<(), DeviceError> {
        let (tiles_x, tiles_y) = light_culling_tiles(width, height);
        if (tiles_x, tiles_y) != (self.tiles_x, self.tiles_y) {
            let (tiled_frusta, opaque_light_grid, transparent_light_grid, light_index_list) =
                Self::create_tile_resources(context, tiles_x, tiles_y)?;
            self.tiled_frusta = tiled_frusta;
            self.opaque_light_grid = opaque_light_grid;
            self.transparent_light_grid = transparent_light_grid;
            self.light_index_list = light_index_list;
            self.tiles_x = tiles_x;
            self.tiles_y = tiles_y;
        }

        self.width = width;
        self.height = height;
        self.frusta_dirty.set(true);
        Ok(())
    }

    pub fn tiles(&self) -> (u32, u32) {
        (self.tiles_x, self.tiles_y)
    }

    pub fn frusta_dirty(&self) -> bool {
        self.frusta_dirty.get()
    }

    pub fn opaque_light_grid(&self) -> &TrackedTexture {
        &self.opaque_light_grid
    }

    pub fn transparent_light_grid(&self) -> &TrackedTexture {
        &self.transparent_light_grid
    }

    pub fn light_index_list(&self) -> &TrackedBuffer {
        &self.light_index_list
    }

    /// Rebuild the world space frusta of every tile if the screen changed. Returns whether
    /// anything was recorded
    pub fn record_world_space_frusta(
        &self,
        context: &GpuContext,
        cmd_list: &mut CommandList,
        pipeline: &Pipeline,
        camera_constants: u64,
    ) -> Result<bool, DeviceError> {
        if !self.frusta_dirty.get() {
            return Ok(false);
        }

        self.tiled_frusta
            .transition(&mut cmd_list.barriers(), ResourceState::UnorderedAccessReadWrite);

        pipeline.bind(cmd_list);
        cmd_list.set_root_constant_buffer(PipelineBindPoint::Compute, root::CAMERA, camera_constants);
        cmd_list.set_root_constants(
            PipelineBindPoint::Compute,
            root::CONSTANTS,
            &FrustaConstants {
                screen_width: self.width,
                screen_height: self.height,
                tiles_x: self.tiles_x,
                tiles_y: self.tiles_y,
            },
        );
        bind_descriptor_table(
            context,
            cmd_list,
            PipelineBindPoint::Compute,
            root::RESOURCES,
            &[self.tiled_frusta.buffer().uav()],
        )?;
        cmd_list.dispatch(
            bucketize(self.tiles_x, FRUSTA_THREAD_GROUP_SIZE),
            bucketize(self.tiles_y, FRUSTA_THREAD_GROUP_SIZE),
            1,
        );

        self.tiled_frusta
            .transition(&mut cmd_list.barriers(), ResourceState::ShaderRead);
        self.frusta_dirty.set(false);
        Ok(true)
    }

    /// Reset the index counters, then cull lights and decals against `depth`, one thread group
    /// per tile
    pub fn record_culling(
        &self,
        context: &GpuContext,
        cmd_list: &mut CommandList,
        pipeline: &Pipeline,
        camera_constants: u64,
        depth: CpuDescriptorHandle,
        inputs: &CullingInputs,
    ) -> Result<(), DeviceError> {
        self.light_index_counter
            .transition(&mut cmd_list.barriers(), ResourceState::CopyWrite);
        cmd_list.copy_buffer_region(
            self.light_index_counter.buffer().native(),
            0,
            self.zero_counter.native(),
            0,
            (NUM_COUNTERS * 4) as u64,
        );

        {
            let mut batch = cmd_list.barriers();
            self.light_index_counter
                .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            self.opaque_light_grid
                .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            self.transparent_light_grid
                .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
            self.light_index_list
                .transition(&mut batch, ResourceState::UnorderedAccessReadWrite);
        }

        pipeline.bind(cmd_list);
        cmd_list.set_root_constant_buffer(PipelineBindPoint::Compute, root::CAMERA, camera_constants);
        cmd_list.set_root_constants(
            PipelineBindPoint::Compute,
            root::CONSTANTS,
            &CullingConstants {
                num_point_lights: inputs.point_lights.count,
                num_spot_lights: inputs.spot_lights.count,
                num_decals: inputs.decals.count,
                tiles_x: self.tiles_x,
            },
        );
        bind_descriptor_table(
            context,
            cmd_list,
            PipelineBindPoint::Compute,
            root::RESOURCES,
            &[
                depth,
                self.tiled_frusta.buffer().srv(),
                inputs.point_lights.srv,
                inputs.spot_lights.srv,
                inputs.decals.srv,
                self.opaque_light_grid.texture().uav(),
                self.transparent_light_grid.texture().uav(),
                self.light_index_list.buffer().uav(),
                self.light_index_counter.buffer().uav(),
            ],
        )?;
        cmd_list.dispatch(self.tiles_x, self.tiles_y, 1);

        let mut batch = cmd_list.barriers();
        self.opaque_light_grid
            .transition(&mut batch, ResourceState::ShaderRead);
        self.transparent_light_grid
            .transition(&mut batch, ResourceState::ShaderRead);
        self.light_index_list
            .transition(&mut batch, ResourceState::ShaderRead);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::light_culling::light_culling_tiles;

    #[test]
    fn partial_tiles_are_counted() {
        assert_eq!(light_culling_tiles(1920, 1080), (120, 68));
        assert_eq!(light_culling_tiles(16, 16), (1, 1));
        assert_eq!(light_culling_tiles(17, 1), (2, 1));
        assert_eq!(light_culling_tiles(0, 0), (1, 1));
    }
}
