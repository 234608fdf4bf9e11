//! Tiled navigation mesh runtime
//!
//! Polygon meshes produced by `navforge-voxel` are compiled into tiles,
//! linked across tile borders and queried for nearest polygons, polygon
//! corridors, straight paths and smoothed paths.

mod nav_mesh;
mod nav_mesh_builder;
mod nav_mesh_query;
mod node_pool;
mod path_smoothing;

use bitflags::bitflags;
use navforge_common::Vec3;

pub use nav_mesh::{Link, MeshTile, NavMesh, Poly, PolyDetail, TileHeader};
pub use nav_mesh_builder::{create_tile, TileCreateParams};
pub use nav_mesh_query::{NavMeshQuery, StraightPathPoint};
pub use navforge_common::Status;
pub use path_smoothing::SmoothPathParams;

/// Maximum vertices per polygon
pub const MAX_VERTS_PER_POLY: usize = navforge_voxel::MAX_VERTS_PER_POLY;

/// Number of area ids a filter can weigh
pub const MAX_AREAS: usize = 64;

/// Set on a polygon neighbour entry when the edge leads into another tile
pub const EXT_LINK: u16 = 0x8000;

/// Link side of an edge that stays inside its tile
pub const LINK_INTERNAL: u8 = 0xff;

/// Reference to a polygon or tile, packing salt, tile index and poly index.
/// The zero reference is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u32);

impl PolyRef {
    /// The null reference
    pub const NULL: PolyRef = PolyRef(0);

    /// Wraps a raw reference value
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Raw reference value
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Returns true for the null reference
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PolyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

bitflags! {
    /// User flags attached to every polygon, matched by query filters
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
    pub struct PolyFlags: u16 {
        /// Ground that can be walked on
        const WALK = 0x01;
        /// Water surface
        const SWIM = 0x02;
        /// Door or other passage that may close
        const DOOR = 0x04;
        /// Jump link
        const JUMP = 0x08;
        /// Disabled polygon
        const DISABLED = 0x10;
        /// All flags
        const ALL = 0xffff;
    }
}

bitflags! {
    /// Per-vertex flags of a straight path
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StraightPathFlags: u8 {
        /// The vertex is the start position
        const START = 0x01;
        /// The vertex is the end position
        const END = 0x02;
    }
}

bitflags! {
    /// Options for straight path generation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StraightPathOptions: u8 {
        /// Add a vertex at every polygon edge crossing where the area changes
        const AREA_CROSSINGS = 0x01;
        /// Add a vertex at every polygon edge crossing
        const ALL_CROSSINGS = 0x02;
    }
}

/// Layout of the tile grid and reference bit budget
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// World position of the tile grid origin
    pub origin: Vec3,
    /// Tile extent along x
    pub tile_width: f32,
    /// Tile extent along z
    pub tile_height: f32,
    /// Maximum number of tiles
    pub max_tiles: u32,
    /// Maximum number of polygons per tile
    pub max_polys: u32,
}

impl Default for NavMeshParams {
    fn default() -> Self {
        Self {
            origin: Vec3::ZERO,
            tile_width: 14.4,
            tile_height: 14.4,
            max_tiles: 256,
            max_polys: 1024,
        }
    }
}

/// Decides which polygons a query may visit and what crossing them costs
#[derive(Debug, Clone)]
pub struct QueryFilter {
    area_cost: [f32; MAX_AREAS],
    include_flags: PolyFlags,
    exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            area_cost: [1.0; MAX_AREAS],
            include_flags: PolyFlags::ALL,
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Creates a filter that accepts every polygon at unit cost
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flags a polygon needs at least one of
    pub fn with_include_flags(mut self, flags: PolyFlags) -> Self {
        self.include_flags = flags;
        self
    }

    /// Sets the flags that reject a polygon
    pub fn with_exclude_flags(mut self, flags: PolyFlags) -> Self {
        self.exclude_flags = flags;
        self
    }

    /// Sets the traversal cost multiplier of an area
    pub fn with_area_cost(mut self, area: u8, cost: f32) -> Self {
        self.set_area_cost(area, cost);
        self
    }

    pub fn include_flags(&self) -> PolyFlags {
        self.include_flags
    }

    pub fn exclude_flags(&self) -> PolyFlags {
        self.exclude_flags
    }

    pub fn set_include_flags(&mut self, flags: PolyFlags) {
        self.include_flags = flags;
    }

    pub fn set_exclude_flags(&mut self, flags: PolyFlags) {
        self.exclude_flags = flags;
    }

    /// Cost multiplier of an area, 1.0 for unknown areas
    pub fn area_cost(&self, area: u8) -> f32 {
        self.area_cost.get(area as usize).copied().unwrap_or(1.0)
    }

    pub fn set_area_cost(&mut self, area: u8, cost: f32) {
        if let Some(c) = self.area_cost.get_mut(area as usize) {
            *c = cost;
        }
    }

    /// Returns true if a polygon with these flags may be visited
    pub fn pass_filter(&self, flags: PolyFlags) -> bool {
        flags.intersects(self.include_flags) && !flags.intersects(self.exclude_flags)
    }

    /// Cost of moving from `pa` to `pb` inside a polygon of `area`
    pub fn cost(&self, pa: Vec3, pb: Vec3, area: u8) -> f32 {
        pa.distance(pb) * self.area_cost(area)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_flags() {
        let filter = QueryFilter::new()
            .with_include_flags(PolyFlags::WALK | PolyFlags::SWIM)
            .with_exclude_flags(PolyFlags::DISABLED);
        assert!(filter.pass_filter(PolyFlags::WALK));
        assert!(!filter.pass_filter(PolyFlags::DOOR));
        assert!(!filter.pass_filter(PolyFlags::WALK | PolyFlags::DISABLED));
        assert!(!filter.pass_filter(PolyFlags::empty()));
    }

    #[test]
    fn test_filter_area_cost() {
        let filter = QueryFilter::new().with_area_cost(3, 2.5);
        let cost = filter.cost(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0), 3);
        assert_eq!(cost, 5.0);
        assert_eq!(filter.area_cost(200), 1.0);
    }

    #[test]
    fn test_null_ref() {
        assert!(PolyRef::NULL.is_null());
        assert!(!PolyRef::new(1).is_null());
        assert_eq!(PolyRef::new(0x10).to_string(), "0x00000010");
    }
}
