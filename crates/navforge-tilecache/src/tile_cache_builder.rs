//! Rebuilds navigation polygons from stored layers
//!
//! A layer is turned back into a single-span-per-cell compact heightfield,
//! obstacles are carved into it as unwalkable area and the regular region,
//! contour and polygon stages run on the result.

use glam::Vec3;
use navforge_common::Result;
use navforge_voxel::{
    mark_box_area, mark_cylinder_area, mark_oriented_box_area, BuildContext, CompactCell,
    CompactHeightfield, CompactSpan, TileMeshes, VoxelBuilder, VoxelConfig, LAYER_EMPTY_HEIGHT,
    NOT_CONNECTED, NULL_AREA,
};

use crate::tile_cache::ObstacleData;
use crate::tile_cache_data::{build_tile_cache_layer, TileCacheLayer};
use crate::TileCompressor;

const DIR_OFFSETS: [(i32, i32); 4] = [(-1, 0), (0, 1), (1, 0), (0, -1)];

/// Converts a decompressed layer into a compact heightfield with one span
/// per used cell and no border
pub fn layer_to_compact_heightfield(
    layer: &TileCacheLayer,
    cs: f32,
    ch: f32,
    walkable_height: i32,
    walkable_climb: i32,
) -> CompactHeightfield {
    let header = &layer.header;
    let w = header.width as i32;
    let h = header.height as i32;
    let used = |idx: usize| {
        layer.heights[idx] != LAYER_EMPTY_HEIGHT && layer.areas[idx] != NULL_AREA
    };

    let mut cells = Vec::with_capacity((w * h) as usize);
    let mut spans = Vec::new();
    let mut areas = Vec::new();
    for idx in 0..(w * h) as usize {
        if used(idx) {
            cells.push(CompactCell {
                index: spans.len() as u32,
                count: 1,
            });
            spans.push(CompactSpan {
                y: layer.heights[idx] as u16,
                reg: 0,
                con: 0,
                h: u8::MAX,
            });
            areas.push(layer.areas[idx]);
        } else {
            cells.push(CompactCell {
                index: spans.len() as u32,
                count: 0,
            });
        }
    }

    for z in 0..h {
        for x in 0..w {
            let idx = (x + z * w) as usize;
            if !used(idx) {
                continue;
            }
            let si = cells[idx].index as usize;
            for (dir, (dx, dz)) in DIR_OFFSETS.iter().enumerate() {
                let (nx, nz) = (x + dx, z + dz);
                let linked = layer.cons[idx] & (1 << dir) != 0
                    && nx >= 0
                    && nz >= 0
                    && nx < w
                    && nz < h
                    && used((nx + nz * w) as usize);
                spans[si].set_con(dir, if linked { 0 } else { NOT_CONNECTED });
            }
        }
    }

    let span_count = spans.len();
    CompactHeightfield {
        width: w,
        height: h,
        walkable_height,
        walkable_climb,
        border_size: 0,
        max_distance: 0,
        max_regions: 0,
        bmin: header.bmin,
        bmax: Vec3::new(
            header.bmax.x,
            header.bmin.y + (header.hmax.saturating_sub(header.hmin) as f32 + 1.0) * ch,
            header.bmax.z,
        ),
        cs,
        ch,
        cells,
        spans,
        dist: vec![0; span_count],
        areas,
    }
}

/// Marks the spans covered by `obstacle` as unwalkable. The footprint is
/// grown by `radius` and the vertical range reaches `drop` below its base.
pub fn carve_obstacle(
    obstacle: &ObstacleData,
    radius: f32,
    drop: f32,
    chf: &mut CompactHeightfield,
) -> usize {
    let grow = Vec3::new(radius, 0.0, radius);
    match *obstacle {
        ObstacleData::Cylinder {
            pos,
            radius: r,
            height,
        } => mark_cylinder_area(
            pos - Vec3::Y * drop,
            r + radius,
            height + drop,
            NULL_AREA,
            chf,
        ),
        ObstacleData::Box { bmin, bmax } => {
            mark_box_area(bmin - grow - Vec3::Y * drop, bmax + grow, NULL_AREA, chf)
        }
        ObstacleData::OrientedBox {
            center,
            half_extents,
            y_radians,
        } => mark_oriented_box_area(
            center - Vec3::Y * (drop * 0.5),
            half_extents + grow + Vec3::Y * (drop * 0.5),
            y_radians,
            NULL_AREA,
            chf,
        ),
    }
}

/// Builds stored layers and rebuilds tile meshes for one tile cache
#[derive(Debug, Clone)]
pub struct TileCacheBuilder {
    config: VoxelConfig,
}

impl TileCacheBuilder {
    /// Creates a builder. `config.tile_size` and `config.border_size` must
    /// describe the cache tiles; bounds are set per tile.
    pub fn new(config: VoxelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VoxelConfig {
        &self.config
    }

    /// Scratch bytes needed to decompress one layer of a cache tile
    pub fn layer_scratch_size(&self) -> usize {
        let side = self.config.tile_size.max(1) as usize;
        side * side * 3
    }

    /// Agent radius in world units, used to grow obstacles
    pub fn walkable_radius(&self) -> f32 {
        self.config.walkable_radius as f32 * self.config.cs
    }

    /// Agent step height in world units
    pub fn walkable_climb(&self) -> f32 {
        self.config.walkable_climb as f32 * self.config.ch
    }

    /// Agent height in world units
    pub fn walkable_height(&self) -> f32 {
        self.config.walkable_height as f32 * self.config.ch
    }

    /// Voxelizes the triangles around tile (`tx`, `ty`) and compresses each
    /// height layer. `tile_bmin`/`tile_bmax` bound the tile interior.
    #[allow(clippy::too_many_arguments)]
    pub fn build_layers(
        &self,
        ctx: &mut BuildContext,
        comp: &dyn TileCompressor,
        verts: &[Vec3],
        tris: &[[u32; 3]],
        tx: i32,
        ty: i32,
        tile_bmin: Vec3,
        tile_bmax: Vec3,
        max_layers: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let mut config = self.config.clone();
        config.set_tile_bounds(tile_bmin, tile_bmax);
        let layers = VoxelBuilder::new(config).build_layers(ctx, verts, tris, max_layers)?;

        layers
            .iter()
            .enumerate()
            .filter(|(_, layer)| layer.used_cells() > 0)
            .map(|(i, layer)| build_tile_cache_layer(comp, layer, tx, ty, i as i32))
            .collect()
    }

    /// Rebuilds the polygon and detail meshes of a layer with `obstacles`
    /// carved out. Returns `None` when nothing walkable is left.
    pub fn build_tile_meshes(
        &self,
        ctx: &mut BuildContext,
        layer: &TileCacheLayer,
        obstacles: &[ObstacleData],
    ) -> Result<Option<TileMeshes>> {
        let cfg = &self.config;
        let mut chf = layer_to_compact_heightfield(
            layer,
            cfg.cs,
            cfg.ch,
            cfg.walkable_height,
            cfg.walkable_climb,
        );

        let radius = self.walkable_radius();
        let drop = self.walkable_climb();
        let carved: usize = obstacles
            .iter()
            .map(|ob| carve_obstacle(ob, radius, drop, &mut chf))
            .sum();
        if carved > 0 {
            log::trace!(
                "carved {carved} spans from layer ({}, {}, {})",
                layer.header.tx,
                layer.header.ty,
                layer.header.tlayer
            );
        }

        let mut config = cfg.clone();
        config.border_size = 0;
        config.width = chf.width;
        config.height = chf.height;
        config.bmin = chf.bmin;
        config.bmax = chf.bmax;
        VoxelBuilder::new(config).build_poly_meshes(ctx, &mut chf, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_cache_data::TileCacheLayerHeader;
    use navforge_voxel::WALKABLE_AREA;

    fn flat_layer(size: u8) -> TileCacheLayer {
        let cells = size as usize * size as usize;
        let s = size as i32;
        let mut cons = vec![0u8; cells];
        for z in 0..s {
            for x in 0..s {
                let mut c = 0;
                for (dir, (dx, dz)) in DIR_OFFSETS.iter().enumerate() {
                    let (nx, nz) = (x + dx, z + dz);
                    if nx >= 0 && nz >= 0 && nx < s && nz < s {
                        c |= 1 << dir;
                    }
                }
                cons[(x + z * s) as usize] = c;
            }
        }
        TileCacheLayer {
            header: TileCacheLayerHeader {
                tx: 0,
                ty: 0,
                tlayer: 0,
                bmin: Vec3::ZERO,
                bmax: Vec3::new(size as f32 * 0.3, 0.0, size as f32 * 0.3),
                hmin: 0,
                hmax: 0,
                width: size,
                height: size,
                minx: 0,
                maxx: size - 1,
                miny: 0,
                maxy: size - 1,
                payload_size: (cells * 3) as u32,
            },
            heights: vec![0; cells],
            areas: vec![WALKABLE_AREA; cells],
            cons,
        }
    }

    fn builder() -> TileCacheBuilder {
        let mut config = VoxelConfig::new()
            .with_cell_size(0.3, 0.2)
            .with_agent(2.0, 0.5, 0.5, 45.0);
        config.min_region_area = 64;
        config.merge_region_area = 400;
        TileCacheBuilder::new(config)
    }

    #[test]
    fn test_layer_to_compact_heightfield() {
        let mut layer = flat_layer(4);
        layer.heights[5] = LAYER_EMPTY_HEIGHT;
        let chf = layer_to_compact_heightfield(&layer, 0.3, 0.2, 10, 2);
        assert_eq!(chf.spans.len(), 15);
        assert_eq!(chf.cells[5].count, 0);

        // Cell 4 (x 0, z 1) does not connect to the empty cell at x 1
        let span = chf.spans[chf.cells[4].index as usize];
        assert!(!span.is_connected(2));
        assert!(span.is_connected(1));
        assert!(!span.is_connected(0));
    }

    #[test]
    fn test_rebuild_flat_layer() {
        let b = builder();
        let meshes = b
            .build_tile_meshes(&mut BuildContext::new(), &flat_layer(32), &[])
            .unwrap()
            .unwrap();
        assert_eq!(meshes.poly_mesh.poly_count(), 1);
    }

    #[test]
    fn test_obstacle_carves_hole() {
        let b = builder();
        let layer = flat_layer(32);
        let plain = b
            .build_tile_meshes(&mut BuildContext::new(), &layer, &[])
            .unwrap()
            .unwrap();
        let obstacle = ObstacleData::Cylinder {
            pos: Vec3::new(4.8, 0.0, 4.8),
            radius: 1.0,
            height: 2.0,
        };
        let carved = b
            .build_tile_meshes(&mut BuildContext::new(), &layer, &[obstacle])
            .unwrap()
            .unwrap();
        assert!(carved.poly_mesh.poly_count() > plain.poly_mesh.poly_count());

        let mut chf = layer_to_compact_heightfield(&layer, 0.3, 0.2, 10, 2);
        let marked = carve_obstacle(&obstacle, 0.6, 0.4, &mut chf);
        assert!(marked > 0);
        assert!(chf.areas.iter().any(|&a| a == NULL_AREA));
    }

    #[test]
    fn test_obstacle_outside_layer_is_ignored() {
        let mut chf = layer_to_compact_heightfield(&flat_layer(8), 0.3, 0.2, 10, 2);
        let far = ObstacleData::Box {
            bmin: Vec3::new(50.0, 0.0, 50.0),
            bmax: Vec3::new(51.0, 2.0, 51.0),
        };
        assert_eq!(carve_obstacle(&far, 0.6, 0.4, &mut chf), 0);
    }
}
