//! Configuration for the voxelization pipeline

use std::str::FromStr;

use glam::Vec3;
use navforge_common::{Error, Result};

/// Strategy used to partition the walkable surface into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum PartitionType {
    /// Distance field + watershed. Best tessellation, slowest.
    #[default]
    Watershed,
    /// Monotone sweep. Fastest, may produce long thin polygons.
    Monotone,
    /// Sweep with layer bookkeeping. Overlap free, between the two above.
    Layers,
}

impl FromStr for PartitionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "watershed" => Ok(PartitionType::Watershed),
            "monotone" => Ok(PartitionType::Monotone),
            "layers" | "layer" => Ok(PartitionType::Layers),
            other => Err(Error::InvalidConfig(format!(
                "unsupported partition type '{other}'"
            ))),
        }
    }
}

impl PartitionType {
    /// Parses a partition name, falling back to watershed for unknown names
    pub fn parse_or_default(s: &str) -> Self {
        match s.parse() {
            Ok(partition) => partition,
            Err(err) => {
                log::warn!("{err}, falling back to watershed");
                PartitionType::Watershed
            }
        }
    }
}

/// Configuration parameters for one run of the voxelization pipeline.
///
/// Distances ending in `voxels` or typed as integers are expressed in cells
/// (xz) or cell heights (y), everything else is in world units.
#[derive(Debug, Clone)]
pub struct VoxelConfig {
    /// The width of the field along the x-axis, including the border
    pub width: i32,
    /// The depth of the field along the z-axis, including the border
    pub height: i32,
    /// Width and depth of the tile interior in cells, 0 for untiled builds
    pub tile_size: i32,
    /// Number of cells added around the tile interior
    pub border_size: i32,

    /// The width/depth resolution of the field (cell size)
    pub cs: f32,
    /// The height resolution of the field (cell height)
    pub ch: f32,

    /// The minimum bounds of the field's AABB, border included
    pub bmin: Vec3,
    /// The maximum bounds of the field's AABB, border included
    pub bmax: Vec3,

    /// The maximum slope in degrees that is considered walkable
    pub walkable_slope_angle: f32,
    /// Minimum floor to ceiling height, in cell heights
    pub walkable_height: i32,
    /// Maximum ledge height that is still traversable, in cell heights
    pub walkable_climb: i32,
    /// Erosion distance, in cells
    pub walkable_radius: i32,

    /// Maximum contour edge length along the mesh border, in cells
    pub max_edge_len: i32,
    /// Maximum deviation of simplified contours from the raw contour, in cells
    pub max_simplification_error: f32,
    /// Minimum number of cells an isolated region must have to survive
    pub min_region_area: i32,
    /// Regions smaller than this are merged into neighbours when possible
    pub merge_region_area: i32,

    /// Maximum number of vertices per polygon
    pub max_verts_per_poly: i32,

    /// Detail mesh sampling distance, in world units
    pub detail_sample_dist: f32,
    /// Maximum detail mesh deviation from the heightfield, in world units
    pub detail_sample_max_error: f32,

    /// Region partitioning strategy
    pub partition: PartitionType,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            tile_size: 0,
            border_size: 0,
            cs: 0.3,
            ch: 0.2,
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            walkable_slope_angle: 45.0,
            walkable_height: 10,
            walkable_climb: 2,
            walkable_radius: 2,
            max_edge_len: 40,
            max_simplification_error: 1.3,
            min_region_area: 64,
            merge_region_area: 400,
            max_verts_per_poly: 6,
            detail_sample_dist: 1.8,
            detail_sample_max_error: 0.2,
            partition: PartitionType::Watershed,
        }
    }
}

impl VoxelConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cell size and height
    pub fn with_cell_size(mut self, cs: f32, ch: f32) -> Self {
        self.cs = cs;
        self.ch = ch;
        self
    }

    /// Sets the agent dimensions, converting them to voxel units
    pub fn with_agent(mut self, height: f32, radius: f32, max_climb: f32, max_slope: f32) -> Self {
        self.walkable_height = (height / self.ch).ceil() as i32;
        self.walkable_climb = (max_climb / self.ch).floor() as i32;
        self.walkable_radius = (radius / self.cs).ceil() as i32;
        self.walkable_slope_angle = max_slope;
        self
    }

    /// Sets the region partitioning strategy
    pub fn with_partition(mut self, partition: PartitionType) -> Self {
        self.partition = partition;
        self
    }

    /// Sets the bounds and derives the grid size from them
    pub fn with_bounds(mut self, bmin: Vec3, bmax: Vec3) -> Self {
        self.calculate_grid_size(bmin, bmax);
        self
    }

    /// Calculates and sets the grid size based on the provided AABB
    pub fn calculate_grid_size(&mut self, bmin: Vec3, bmax: Vec3) {
        self.bmin = bmin;
        self.bmax = bmax;
        self.width = ((bmax.x - bmin.x) / self.cs + 0.5) as i32;
        self.height = ((bmax.z - bmin.z) / self.cs + 0.5) as i32;
    }

    /// Configures the field to cover one tile plus its border.
    ///
    /// `tile_bmin`/`tile_bmax` are the tile interior bounds, the field bounds
    /// are grown by `border_size` cells on the xz-plane.
    pub fn set_tile_bounds(&mut self, tile_bmin: Vec3, tile_bmax: Vec3) {
        let pad = self.border_size as f32 * self.cs;
        self.bmin = Vec3::new(tile_bmin.x - pad, tile_bmin.y, tile_bmin.z - pad);
        self.bmax = Vec3::new(tile_bmax.x + pad, tile_bmax.y, tile_bmax.z + pad);
        self.width = self.tile_size + self.border_size * 2;
        self.height = self.tile_size + self.border_size * 2;
    }

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::InvalidConfig("invalid grid size".to_string()));
        }

        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::InvalidConfig(
                "invalid cell size or height".to_string(),
            ));
        }

        if !(0.0..=90.0).contains(&self.walkable_slope_angle) {
            return Err(Error::InvalidConfig(
                "invalid walkable slope angle".to_string(),
            ));
        }

        if self.walkable_height < 3 {
            return Err(Error::InvalidConfig(
                "walkable height must be at least 3 cells".to_string(),
            ));
        }

        if self.max_verts_per_poly < 3 || self.max_verts_per_poly > crate::MAX_VERTS_PER_POLY as i32
        {
            return Err(Error::InvalidConfig(format!(
                "verts per poly must be within 3..={}",
                crate::MAX_VERTS_PER_POLY
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_parse() {
        assert_eq!(
            "Monotone".parse::<PartitionType>().unwrap(),
            PartitionType::Monotone
        );
        assert_eq!(
            "layers".parse::<PartitionType>().unwrap(),
            PartitionType::Layers
        );
        assert!("voronoi".parse::<PartitionType>().is_err());
        assert_eq!(
            PartitionType::parse_or_default("voronoi"),
            PartitionType::Watershed
        );
    }

    #[test]
    fn test_agent_conversion() {
        let config = VoxelConfig::new()
            .with_cell_size(0.3, 0.2)
            .with_agent(2.0, 0.5, 0.5, 45.0);
        assert_eq!(config.walkable_height, 10);
        assert_eq!(config.walkable_climb, 2);
        assert_eq!(config.walkable_radius, 2);
    }

    #[test]
    fn test_tile_bounds() {
        let mut config = VoxelConfig::new();
        config.tile_size = 32;
        config.border_size = 5;
        config.set_tile_bounds(Vec3::ZERO, Vec3::new(9.6, 4.0, 9.6));
        assert_eq!(config.width, 42);
        assert!((config.bmin.x + 1.5).abs() < 1e-5);
        assert!((config.bmax.z - 11.1).abs() < 1e-5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = VoxelConfig::new().with_bounds(Vec3::ZERO, Vec3::splat(10.0));
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.cs = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.max_verts_per_poly = 2;
        assert!(bad.validate().is_err());
    }
}
