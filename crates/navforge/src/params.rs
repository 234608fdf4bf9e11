//! Build parameters of a navigation mesh

use glam::Vec3;
use navforge_common::{Aabb, Error, Result};
use navforge_voxel::{PartitionType, VoxelConfig};

/// Configuration snapshot of a navigation mesh.
///
/// Lengths are in world units; `tile_size` is in cells. Region areas are
/// given as the side length in cells of the equivalent square.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    pub cell_size: f32,
    pub cell_height: f32,

    pub agent_height: f32,
    pub agent_radius: f32,
    pub agent_max_climb: f32,
    /// Maximum walkable slope in degrees
    pub agent_max_slope: f32,

    pub region_min_size: f32,
    pub region_merge_size: f32,
    pub edge_max_len: f32,
    pub edge_max_error: f32,
    pub verts_per_poly: i32,

    /// Tile width and depth in cells
    pub tile_size: i32,
    pub partition: PartitionType,

    /// Detail sample distance, in cells
    pub detail_sample_dist: f32,
    /// Detail sample error, in cell heights
    pub detail_sample_max_error: f32,

    pub max_tiles: u32,
    pub max_polys_per_tile: u32,
    pub max_layers_per_tile: usize,
    pub max_obstacles: usize,

    /// Bounds of the source geometry in navigation space. The tile grid
    /// starts at `orig_bound_min`.
    pub orig_bound_min: Vec3,
    pub orig_bound_max: Vec3,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.5,
            agent_max_climb: 0.5,
            agent_max_slope: 45.0,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_len: 12.0,
            edge_max_error: 1.3,
            verts_per_poly: 6,
            tile_size: 48,
            partition: PartitionType::Watershed,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            max_tiles: 256,
            max_polys_per_tile: 4096,
            max_layers_per_tile: 8,
            max_obstacles: 128,
            orig_bound_min: Vec3::ZERO,
            orig_bound_max: Vec3::ZERO,
        }
    }
}

impl NavMeshParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cell_size(mut self, cell_size: f32, cell_height: f32) -> Self {
        self.cell_size = cell_size;
        self.cell_height = cell_height;
        self
    }

    /// Sets the agent dimensions; `max_slope` is in degrees
    pub fn with_agent(mut self, height: f32, radius: f32, max_climb: f32, max_slope: f32) -> Self {
        self.agent_height = height;
        self.agent_radius = radius;
        self.agent_max_climb = max_climb;
        self.agent_max_slope = max_slope;
        self
    }

    pub fn with_region_sizes(mut self, min_size: f32, merge_size: f32) -> Self {
        self.region_min_size = min_size;
        self.region_merge_size = merge_size;
        self
    }

    pub fn with_edge_limits(mut self, max_len: f32, max_error: f32) -> Self {
        self.edge_max_len = max_len;
        self.edge_max_error = max_error;
        self
    }

    pub fn with_verts_per_poly(mut self, verts_per_poly: i32) -> Self {
        self.verts_per_poly = verts_per_poly;
        self
    }

    pub fn with_tile_size(mut self, tile_size: i32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn with_partition(mut self, partition: PartitionType) -> Self {
        self.partition = partition;
        self
    }

    /// Sets the partition from its name; unknown names fall back to
    /// watershed
    pub fn with_partition_name(mut self, name: &str) -> Self {
        self.partition = PartitionType::parse_or_default(name);
        self
    }

    pub fn with_detail_sampling(mut self, dist: f32, max_error: f32) -> Self {
        self.detail_sample_dist = dist;
        self.detail_sample_max_error = max_error;
        self
    }

    pub fn with_limits(
        mut self,
        max_tiles: u32,
        max_polys_per_tile: u32,
        max_layers_per_tile: usize,
        max_obstacles: usize,
    ) -> Self {
        self.max_tiles = max_tiles;
        self.max_polys_per_tile = max_polys_per_tile;
        self.max_layers_per_tile = max_layers_per_tile;
        self.max_obstacles = max_obstacles;
        self
    }

    /// Sets the geometry bounds the tile grid is laid over
    pub fn with_bounds(mut self, bounds: Aabb) -> Self {
        self.orig_bound_min = bounds.min;
        self.orig_bound_max = bounds.max;
        self
    }

    /// World extent of one tile
    pub fn tile_cell_size(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Number of tiles along x and z covering the bounds, at least one each
    pub fn grid_size(&self) -> (i32, i32) {
        let tcs = self.tile_cell_size();
        let span = self.orig_bound_max - self.orig_bound_min;
        let tw = ((span.x / tcs).ceil() as i32).max(1);
        let th = ((span.z / tcs).ceil() as i32).max(1);
        (tw, th)
    }

    /// Tile interior bounds on the xz-plane, y taken from the geometry
    /// bounds
    pub fn tile_bounds(&self, tx: i32, ty: i32) -> Aabb {
        let tcs = self.tile_cell_size();
        let min = Vec3::new(
            self.orig_bound_min.x + tx as f32 * tcs,
            self.orig_bound_min.y,
            self.orig_bound_min.z + ty as f32 * tcs,
        );
        let max = Vec3::new(min.x + tcs, self.orig_bound_max.y, min.z + tcs);
        Aabb::new(min, max)
    }

    /// Cells added around a tile so border geometry is voxelized too
    pub fn border_size(&self) -> i32 {
        (self.agent_radius / self.cell_size).ceil() as i32 + 3
    }

    /// Checks the parameters for values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(Error::InvalidConfig(
                "cell size and height must be positive".into(),
            ));
        }
        if self.agent_height <= 0.0 || self.agent_radius < 0.0 || self.agent_max_climb < 0.0 {
            return Err(Error::InvalidConfig("invalid agent dimensions".into()));
        }
        if self.tile_size <= 0 || self.tile_size > 255 {
            return Err(Error::InvalidConfig(format!(
                "tile size {} must be within 1..=255 cells",
                self.tile_size
            )));
        }
        if self.max_layers_per_tile == 0 {
            return Err(Error::InvalidConfig(
                "at least one layer per tile is required".into(),
            ));
        }
        let mut config = self.voxel_config();
        config.set_tile_bounds(Vec3::ZERO, Vec3::splat(self.tile_cell_size()));
        config.validate()
    }

    /// Voxelization settings for one tile of this mesh; bounds are set per
    /// tile by the caller
    pub fn voxel_config(&self) -> VoxelConfig {
        let mut config = VoxelConfig::new()
            .with_cell_size(self.cell_size, self.cell_height)
            .with_agent(
                self.agent_height,
                self.agent_radius,
                self.agent_max_climb,
                self.agent_max_slope,
            )
            .with_partition(self.partition);
        config.tile_size = self.tile_size;
        config.border_size = self.border_size();
        config.max_edge_len = (self.edge_max_len / self.cell_size) as i32;
        config.max_simplification_error = self.edge_max_error;
        config.min_region_area = (self.region_min_size * self.region_min_size) as i32;
        config.merge_region_area = (self.region_merge_size * self.region_merge_size) as i32;
        config.max_verts_per_poly = self.verts_per_poly;
        config.detail_sample_dist = if self.detail_sample_dist < 0.9 {
            0.0
        } else {
            self.cell_size * self.detail_sample_dist
        };
        config.detail_sample_max_error = self.cell_height * self.detail_sample_max_error;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_voxel_units() {
        let params = NavMeshParams::default();
        let config = params.voxel_config();
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_radius, 2);
        assert_eq!(config.walkable_climb, 2);
        assert_eq!(config.border_size, 5);
        assert_eq!(config.max_edge_len, 40);
        assert_eq!(config.min_region_area, 64);
        assert_eq!(config.merge_region_area, 400);
        assert!((config.detail_sample_dist - 1.8).abs() < 1e-6);
        assert!((params.tile_cell_size() - 14.4).abs() < 1e-5);
    }

    #[test]
    fn test_grid_layout() {
        let params = NavMeshParams::default().with_bounds(Aabb::new(
            Vec3::new(0.0, 0.0, -10.0),
            Vec3::new(30.0, 1.0, 0.0),
        ));
        assert_eq!(params.grid_size(), (3, 1));
        let b = params.tile_bounds(1, 0);
        assert!((b.min.x - 14.4).abs() < 1e-5);
        assert_eq!(b.min.z, -10.0);
    }

    #[test]
    fn test_partition_name_fallback() {
        let params = NavMeshParams::new().with_partition_name("spiral");
        assert_eq!(params.partition, PartitionType::Watershed);
        let params = NavMeshParams::new().with_partition_name("monotone");
        assert_eq!(params.partition, PartitionType::Monotone);
    }

    #[test]
    fn test_validate() {
        assert!(NavMeshParams::default().validate().is_ok());
        assert!(NavMeshParams::default().with_tile_size(0).validate().is_err());
        assert!(NavMeshParams::default()
            .with_cell_size(0.0, 0.2)
            .validate()
            .is_err());
    }

    #[cfg(feature = "serialization")]
    #[test]
    fn test_serde_round_trip() {
        let params = NavMeshParams::default()
            .with_tile_size(32)
            .with_partition(PartitionType::Layers)
            .with_bounds(Aabb::new(Vec3::ZERO, Vec3::new(20.0, 2.0, 20.0)));
        let json = serde_json::to_string(&params).unwrap();
        let back: NavMeshParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
