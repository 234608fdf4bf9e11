//! Incrementally maintained navigation meshes for scene graphs
//!
//! A [`NavMeshBuilder`] turns the geometry under a set of scene nodes into
//! a tiled navigation mesh. The resulting [`NavMesh`] keeps the voxelized
//! height layers of every tile in a compressed tile cache; calling
//! [`NavMesh::update`] after the scene changed rebuilds only the tiles near
//! changed triangles and re-carves obstacles that moved.
//!
//! The scene is z-up. Internally the mesh is built y-up; every public
//! position is in scene space unless a method says otherwise.
//!
//! ```no_run
//! use glam::Vec3;
//! use navforge::{NavMeshBuilder, NavMeshParams, SceneGraph};
//!
//! # fn main() -> navforge::Result<()> {
//! let mut scene = SceneGraph::new();
//! let floor = scene.add_node(scene.root(), "floor")?;
//! scene.add_polygon(
//!     floor,
//!     &[
//!         Vec3::new(0.0, 0.0, 0.0),
//!         Vec3::new(10.0, 0.0, 0.0),
//!         Vec3::new(10.0, 10.0, 0.0),
//!         Vec3::new(0.0, 10.0, 0.0),
//!     ],
//! )?;
//!
//! let mut builder = NavMeshBuilder::new(NavMeshParams::default());
//! builder.add_node(floor);
//! let mut nav = builder.build(&scene)?;
//!
//! let path = nav.find_path(Vec3::new(1.0, 1.0, 0.0), Vec3::new(8.0, 8.0, 0.0));
//! assert!(!path.is_empty());
//!
//! scene.set_pos(floor, Vec3::new(0.5, 0.0, 0.0))?;
//! let stats = nav.update(&scene)?;
//! assert!(stats.rebuilt_tiles > 0);
//! # Ok(())
//! # }
//! ```

mod builder;
mod coords;
mod debug;
mod geometry;
mod nav_mesh;
mod obstacle;
mod params;
mod poly;
mod query;
mod scene;
mod updater;

pub use builder::NavMeshBuilder;
pub use coords::{from_nav, to_nav, transform_to_nav};
pub use debug::{Color, DebugGeometry, DebugLine, DebugTriangle};
pub use geometry::{
    add_polygon, extract_collision_geometry, extract_geometry, TriVertGroup, TriangleSet,
};
pub use nav_mesh::{NavMesh, DEFAULT_SEARCH_EXTENTS};
pub use obstacle::{obstacle_outline, ObstacleShape};
pub use params::NavMeshParams;
pub use poly::{NavMeshPoly, NavMeshPolyMut};
pub use query::{NavMeshPath, MAX_STRAIGHT_PATH};
pub use scene::{CollisionPolygon, GeometrySource, NodeId, SceneGraph};
pub use updater::{UpdateStats, TILE_EPSILON};

pub use navforge_common::{Aabb, Error, Result};
pub use navforge_detour::{
    PolyFlags, PolyRef, QueryFilter, SmoothPathParams, StraightPathOptions,
};
pub use navforge_tilecache::{ObstacleData, ObstacleRef, TileCache};
pub use navforge_voxel::PartitionType;
