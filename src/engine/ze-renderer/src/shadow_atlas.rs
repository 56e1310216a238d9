use ze_core::maths::{RectI32, Vec4f32};
use ze_gfx::backend::{ClearValue, ResourceState, TextureDesc, TextureUsageFlagBits};
use ze_gfx::PixelFormat;

pub const MAX_NUM_SUN_SHADOW_CASCADES: usize = 4;
pub const SHADOW_MAP_FORMAT: PixelFormat = PixelFormat::D16Unorm;

/// Cells smaller than this are not worth rendering
pub const MIN_SHADOW_MAP_CELL_SIZE: u32 = 64;

const SUN_ROW: u32 = 0;
const SPOT_ROW: u32 = 1;
const POINT_ROW: u32 = 2;

/// A rectangle of the shadow atlas, in pixels for the rasterizer and normalized for shaders
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ShadowMapViewport {
    pub cpu: RectI32,
    pub shader: Vec4f32,
}

impl ShadowMapViewport {
    fn new(cpu: RectI32, atlas_size: u32) -> Self {
        let size = atlas_size as f32;
        Self {
            cpu,
            shader: Vec4f32::new(
                cpu.x as f32 / size,
                cpu.y as f32 / size,
                cpu.width as f32 / size,
                cpu.height as f32 / size,
            ),
        }
    }
}

/// Splits a single depth texture between every shadow casting light of a frame.
///
/// The atlas is three tiles wide and three tiles high. Sun cascades use the top row, spot lights
/// the middle row and point lights the bottom row, two half-tile cells per light. A row with more
/// requests than it can hold at full size shrinks its cells.
#[derive(Copy, Clone, Debug)]
pub struct ShadowAtlas {
    tile_size: u32,
}

impl ShadowAtlas {
    pub fn new(tile_size: u32) -> Self {
        assert!(tile_size >= MIN_SHADOW_MAP_CELL_SIZE * 2);
        Self { tile_size }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn size(&self) -> u32 {
        self.tile_size * 3
    }

    pub fn texture_desc(&self) -> TextureDesc {
        let mut desc = TextureDesc::new_2d(
            self.size(),
            self.size(),
            SHADOW_MAP_FORMAT,
            TextureUsageFlagBits::DepthStencil | TextureUsageFlagBits::ShaderResource,
        );
        desc.default_resource_state = ResourceState::ShaderRead;
        desc.clear_value = Some(ClearValue::DepthStencil((1.0, 0)));
        desc
    }

    /// Cell size for `count` cells of at most `base_size` in one row of the atlas
    fn cell_size(&self, count: u32, base_size: u32) -> u32 {
        let width = self.size();
        let height = self.tile_size;
        let cell_size = (1..=count)
            .map(|rows| {
                let per_row = (count + rows - 1) / rows;
                (height / rows).min(width / per_row).min(base_size)
            })
            .max()
            .unwrap_or(base_size);

        assert!(
            cell_size >= MIN_SHADOW_MAP_CELL_SIZE,
            "Shadow atlas row cannot hold {} cells",
            count
        );
        cell_size
    }

    fn allocate_row(&self, row: u32, count: u32, base_size: u32) -> Vec<ShadowMapViewport> {
        if count == 0 {
            return vec![];
        }

        let cell_size = self.cell_size(count, base_size);
        let columns = self.size() / cell_size;
        let row_y = row * self.tile_size;
        (0..count)
            .map(|i| {
                let x = (i % columns) * cell_size;
                let y = row_y + (i / columns) * cell_size;
                ShadowMapViewport::new(
                    RectI32::new(x as i32, y as i32, cell_size as i32, cell_size as i32),
                    self.size(),
                )
            })
            .collect()
    }

    pub fn allocate_sun_cascades(&self, num_cascades: u32) -> Vec<ShadowMapViewport> {
        assert!(num_cascades as usize <= MAX_NUM_SUN_SHADOW_CASCADES);
        self.allocate_row(SUN_ROW, num_cascades, self.tile_size)
    }

    pub fn allocate_spot_lights(&self, num_lights: u32) -> Vec<ShadowMapViewport> {
        self.allocate_row(SPOT_ROW, num_lights, self.tile_size)
    }

    /// One viewport per hemisphere and light
    pub fn allocate_point_lights(&self, num_lights: u32) -> Vec<[ShadowMapViewport; 2]> {
        self.allocate_row(POINT_ROW, num_lights * 2, self.tile_size / 2)
            .chunks_exact(2)
            .map(|pair| [pair[0], pair[1]])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::shadow_atlas::{ShadowAtlas, ShadowMapViewport};
    use ze_core::maths::RectI32;

    fn assert_disjoint(viewports: &[ShadowMapViewport], atlas: &ShadowAtlas) {
        let bounds = RectI32::new(0, 0, atlas.size() as i32, atlas.size() as i32);
        for (i, a) in viewports.iter().enumerate() {
            assert!(bounds.contains(&a.cpu), "{:?} is outside the atlas", a.cpu);
            for b in &viewports[i + 1..] {
                assert!(!a.cpu.intersects(&b.cpu), "{:?} overlaps {:?}", a.cpu, b.cpu);
            }
        }
    }

    #[test]
    fn every_light_gets_its_own_region() {
        let atlas = ShadowAtlas::new(2048);
        assert_eq!(atlas.size(), 6144);

        let mut viewports = atlas.allocate_sun_cascades(3);
        viewports.extend(atlas.allocate_spot_lights(2));
        let point = atlas.allocate_point_lights(1);
        assert_eq!(point.len(), 1);
        viewports.extend(point.iter().flatten());
        assert_eq!(viewports.len(), 7);
        assert_disjoint(&viewports, &atlas);

        assert_eq!(viewports[0].cpu, RectI32::new(0, 0, 2048, 2048));
        assert_eq!(viewports[3].cpu, RectI32::new(0, 2048, 2048, 2048));
        assert_eq!(point[0][0].cpu, RectI32::new(0, 4096, 1024, 1024));
        assert_eq!(viewports[1].shader.x, 2048.0 / 6144.0);
    }

    #[test]
    fn crowded_rows_shrink_their_cells() {
        let atlas = ShadowAtlas::new(2048);
        let cascades = atlas.allocate_sun_cascades(4);
        assert_eq!(cascades[0].cpu.width, 1536);

        let spots = atlas.allocate_spot_lights(16);
        assert_eq!(spots[0].cpu.width, 768);

        let points = atlas.allocate_point_lights(16);
        let mut viewports = cascades;
        viewports.extend(spots);
        viewports.extend(points.iter().flatten());
        assert_disjoint(&viewports, &atlas);
    }

    #[test]
    #[should_panic]
    fn running_out_of_space_asserts() {
        ShadowAtlas::new(128).allocate_spot_lights(64);
    }
}
