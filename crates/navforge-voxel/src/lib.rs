//! Voxelization pipeline for navigation mesh generation
//!
//! Turns triangle soup into a walkable polygon mesh: the triangles are
//! rasterized into a heightfield, filtered, compacted, partitioned into
//! regions and traced back into polygons. The same pipeline can stop after
//! compaction and emit height layers for the tile cache.

mod area;
mod compact_heightfield;
mod config;
mod context;
mod contour;
mod detail_mesh;
mod distance_field;
mod heightfield;
mod heightfield_layers;
mod polymesh;
mod rasterization;
mod regions;
mod triangle_utils;
mod watershed;

use glam::Vec3;
use navforge_common::Result;

pub use area::{
    erode_walkable_area, mark_box_area, mark_cylinder_area, mark_oriented_box_area,
    median_filter_walkable_area,
};
pub use compact_heightfield::{
    CompactCell, CompactHeightfield, CompactSpan, AREA_BORDER, BORDER_REG, BORDER_VERTEX,
    CONTOUR_REG_MASK, NOT_CONNECTED,
};
pub use config::{PartitionType, VoxelConfig};
pub use context::{BuildContext, TimerCategory};
pub use contour::{BuildContoursFlags, Contour, ContourSet, ContourVertex};
pub use detail_mesh::{DetailSubMesh, PolyMeshDetail};
pub use distance_field::build_distance_field;
pub use heightfield::{Heightfield, Span, SPAN_MAX_HEIGHT};
pub use heightfield_layers::{build_heightfield_layers, HeightfieldLayer, LAYER_EMPTY_HEIGHT};
pub use polymesh::{MeshPoly, PolyMesh, MESH_NULL_IDX, PORTAL_FLAG};
pub use rasterization::{rasterize_triangle, rasterize_triangles};
pub use regions::{build_layer_regions, build_regions_monotone};
pub use triangle_utils::{
    calc_bounds, calc_grid_size, calc_tri_normal, clear_unwalkable_triangles, get_dir_for_offset,
    get_dir_offset_x, get_dir_offset_y, mark_walkable_triangles, NULL_AREA, WALKABLE_AREA,
};
pub use watershed::build_regions_watershed;

/// Upper bound for vertices per polygon
pub const MAX_VERTS_PER_POLY: usize = 6;

/// Polygon and detail mesh produced for one tile
#[derive(Debug, Clone)]
pub struct TileMeshes {
    pub poly_mesh: PolyMesh,
    pub detail_mesh: PolyMeshDetail,
}

/// Runs the voxelization stages for one tile
#[derive(Debug, Clone)]
pub struct VoxelBuilder {
    config: VoxelConfig,
}

impl VoxelBuilder {
    /// Creates a builder for the given configuration
    pub fn new(config: VoxelConfig) -> Self {
        Self { config }
    }

    /// Gets a reference to the configuration
    pub fn config(&self) -> &VoxelConfig {
        &self.config
    }

    /// Rasterizes walkable triangles into a filtered heightfield
    pub fn build_heightfield(
        &self,
        ctx: &mut BuildContext,
        verts: &[Vec3],
        tris: &[[u32; 3]],
    ) -> Result<Heightfield> {
        let cfg = &self.config;
        cfg.validate()?;

        let mut hf = ctx.timed(TimerCategory::Rasterization, |_| -> Result<Heightfield> {
            let mut hf = Heightfield::new(cfg.width, cfg.height, cfg.bmin, cfg.bmax, cfg.cs, cfg.ch);
            let mut areas = vec![NULL_AREA; tris.len()];
            mark_walkable_triangles(cfg.walkable_slope_angle, verts, tris, &mut areas);
            rasterize_triangles(&mut hf, verts, tris, &areas, cfg.walkable_climb)?;
            Ok(hf)
        })?;

        ctx.timed(TimerCategory::Filtering, |_| {
            hf.filter_low_hanging_walkable_obstacles(cfg.walkable_climb);
            hf.filter_ledge_spans(cfg.walkable_height, cfg.walkable_climb);
            hf.filter_walkable_low_height_spans(cfg.walkable_height);
        });
        Ok(hf)
    }

    /// Stages 1 to 4: heightfield, filters, compaction and erosion
    pub fn build_compact_heightfield(
        &self,
        ctx: &mut BuildContext,
        verts: &[Vec3],
        tris: &[[u32; 3]],
    ) -> Result<CompactHeightfield> {
        let cfg = &self.config;
        let hf = self.build_heightfield(ctx, verts, tris)?;

        let mut chf = ctx.timed(TimerCategory::CompactHeightfield, |_| {
            CompactHeightfield::build_from_heightfield(cfg.walkable_height, cfg.walkable_climb, &hf)
        })?;
        drop(hf);

        ctx.timed(TimerCategory::AreaMarking, |_| {
            erode_walkable_area(cfg.walkable_radius, &mut chf)
        })?;
        Ok(chf)
    }

    /// Stages 5 to 8 on an eroded compact heightfield. Returns `None` for a
    /// tile without walkable polygons.
    pub fn build_poly_meshes(
        &self,
        ctx: &mut BuildContext,
        chf: &mut CompactHeightfield,
        border_size: i32,
    ) -> Result<Option<TileMeshes>> {
        let cfg = &self.config;

        ctx.timed(TimerCategory::Regions, |_| match cfg.partition {
            PartitionType::Watershed => {
                build_distance_field(chf)?;
                build_regions_watershed(
                    chf,
                    border_size,
                    cfg.min_region_area,
                    cfg.merge_region_area,
                )
            }
            PartitionType::Monotone => build_regions_monotone(
                chf,
                border_size,
                cfg.min_region_area,
                cfg.merge_region_area,
            ),
            PartitionType::Layers => build_layer_regions(chf, border_size, cfg.min_region_area),
        })?;

        let cset = ctx.timed(TimerCategory::Contours, |_| {
            ContourSet::build(
                chf,
                cfg.max_simplification_error,
                cfg.max_edge_len,
                BuildContoursFlags::default(),
            )
        })?;
        if cset.contours.is_empty() {
            return Ok(None);
        }

        let poly_mesh = ctx.timed(TimerCategory::PolyMesh, |_| {
            PolyMesh::build_from_contour_set(&cset, cfg.max_verts_per_poly as usize)
        })?;
        drop(cset);
        if poly_mesh.is_empty() {
            return Ok(None);
        }

        let detail_mesh = ctx.timed(TimerCategory::DetailMesh, |_| {
            PolyMeshDetail::build(
                &poly_mesh,
                chf,
                cfg.detail_sample_dist,
                cfg.detail_sample_max_error,
            )
        })?;

        Ok(Some(TileMeshes {
            poly_mesh,
            detail_mesh,
        }))
    }

    /// Runs the full pipeline for one tile
    pub fn build_tile(
        &self,
        ctx: &mut BuildContext,
        verts: &[Vec3],
        tris: &[[u32; 3]],
    ) -> Result<Option<TileMeshes>> {
        ctx.start_timer(TimerCategory::Total);
        let result = self
            .build_compact_heightfield(ctx, verts, tris)
            .and_then(|mut chf| self.build_poly_meshes(ctx, &mut chf, self.config.border_size));
        ctx.stop_timer(TimerCategory::Total);
        result
    }

    /// Builds the height layers of one tile for the tile cache
    pub fn build_layers(
        &self,
        ctx: &mut BuildContext,
        verts: &[Vec3],
        tris: &[[u32; 3]],
        max_layers: usize,
    ) -> Result<Vec<HeightfieldLayer>> {
        let chf = self.build_compact_heightfield(ctx, verts, tris)?;
        ctx.timed(TimerCategory::Layers, |_| {
            build_heightfield_layers(
                &chf,
                self.config.border_size,
                self.config.walkable_height,
                max_layers,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(size: f32) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(size, 0.0, 0.0),
            Vec3::new(size, 0.0, size),
            Vec3::new(0.0, 0.0, size),
        ];
        (verts, vec![[0, 2, 1], [0, 3, 2]])
    }

    fn plane_config(size: f32) -> VoxelConfig {
        let mut config = VoxelConfig::new()
            .with_cell_size(0.3, 0.2)
            .with_agent(2.0, 0.5, 0.5, 45.0);
        config.min_region_area = 64;
        config.merge_region_area = 400;
        config.calculate_grid_size(Vec3::new(0.0, -1.0, 0.0), Vec3::new(size, 1.0, size));
        config
    }

    #[test]
    fn test_plane_builds_single_polygon() {
        let (verts, tris) = plane(10.0);
        let builder = VoxelBuilder::new(plane_config(10.0));
        let mut ctx = BuildContext::new();
        let meshes = builder.build_tile(&mut ctx, &verts, &tris).unwrap().unwrap();
        assert_eq!(meshes.poly_mesh.poly_count(), 1);
        assert_eq!(meshes.detail_mesh.meshes.len(), 1);
        assert!(ctx.get_timer_count(TimerCategory::Total) >= 1);
    }

    #[test]
    fn test_monotone_partition() {
        let (verts, tris) = plane(6.0);
        let config = plane_config(6.0).with_partition(PartitionType::Monotone);
        let builder = VoxelBuilder::new(config);
        let meshes = builder
            .build_tile(&mut BuildContext::new(), &verts, &tris)
            .unwrap()
            .unwrap();
        assert!(meshes.poly_mesh.poly_count() >= 1);
    }

    #[test]
    fn test_steep_geometry_gives_empty_tile() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(0.0, 5.0, 5.0),
        ];
        let builder = VoxelBuilder::new(plane_config(5.0));
        let result = builder
            .build_tile(&mut BuildContext::new(), &verts, &[[0, 1, 2]])
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_plane_layers() {
        let (verts, tris) = plane(6.0);
        let builder = VoxelBuilder::new(plane_config(6.0));
        let layers = builder
            .build_layers(&mut BuildContext::new(), &verts, &tris, 4)
            .unwrap();
        assert_eq!(layers.len(), 1);
        assert!(layers[0].used_cells() > 0);
    }
}
