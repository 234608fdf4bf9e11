//! Full navigation mesh builds

use glam::{Mat4, Vec3};
use navforge_common::{Error, Result};

use crate::geometry::{add_polygon, TriangleSet};
use crate::nav_mesh::{gather_triangles, NavMesh};
use crate::params::NavMeshParams;
use crate::scene::{GeometrySource, NodeId};

/// Collects the inputs of a navigation mesh and builds every tile of it
#[derive(Debug, Clone, Default)]
pub struct NavMeshBuilder {
    params: NavMeshParams,
    tracked: Vec<NodeId>,
    tracked_collision: Vec<(NodeId, u32)>,
    untracked: TriangleSet,
    obstacle_nodes: Vec<NodeId>,
}

impl NavMeshBuilder {
    /// Creates a builder without inputs. The geometry bounds in `params` are
    /// replaced by the bounds of the input at build time.
    pub fn new(params: NavMeshParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut NavMeshParams {
        &mut self.params
    }

    /// Adds the visible geometry under `node`, tracked for later updates
    pub fn add_node(&mut self, node: NodeId) -> &mut Self {
        if !self.tracked.contains(&node) {
            self.tracked.push(node);
        }
        self
    }

    /// Adds the collision geometry under `node` matching `mask`, tracked
    /// for later updates
    pub fn add_collision_node(&mut self, node: NodeId, mask: u32) -> &mut Self {
        if !self.tracked_collision.iter().any(|(n, _)| *n == node) {
            self.tracked_collision.push((node, mask));
        }
        self
    }

    /// Adds a fixed scene-space polygon
    pub fn add_polygon(&mut self, verts: &[Vec3]) -> &mut Self {
        add_polygon(&mut self.untracked, &Mat4::IDENTITY, verts);
        self
    }

    /// Adds a scene node whose obstacle shape is carved into the mesh
    pub fn add_obstacle_node(&mut self, node: NodeId) -> &mut Self {
        if !self.obstacle_nodes.contains(&node) {
            self.obstacle_nodes.push(node);
        }
        self
    }

    /// Builds every tile covering the input geometry, then carves the
    /// obstacles
    pub fn build(&self, scene: &impl GeometrySource) -> Result<NavMesh> {
        let tris = gather_triangles(scene, &self.tracked, &self.tracked_collision, &self.untracked);
        if tris.is_empty() {
            return Err(Error::InvalidMesh(
                "no geometry to build a navigation mesh from".into(),
            ));
        }

        let params = self.params.clone().with_bounds(tris.bounds());
        let (tw, th) = params.grid_size();
        let tile_count = tw as u64 * th as u64;
        if tile_count > u64::from(params.max_tiles) {
            return Err(Error::InvalidConfig(format!(
                "{tw}x{th} tile grid exceeds the limit of {} tiles",
                params.max_tiles
            )));
        }
        log::info!(
            "building navigation mesh from {} triangles on a {tw}x{th} tile grid",
            tris.len()
        );

        let mut nav = NavMesh::empty(params)?;
        nav.set_inputs(
            self.tracked.clone(),
            self.tracked_collision.clone(),
            self.untracked.clone(),
            self.obstacle_nodes.clone(),
        );

        for ty in 0..th {
            for tx in 0..tw {
                nav.rebuild_tile_layers(tx, ty, &tris);
            }
        }

        let mut sync = nav.sync_obstacles(scene)?;
        nav.drain_obstacles_for(&mut sync)?;

        for ty in 0..th {
            for tx in 0..tw {
                nav.build_tiles_at(tx, ty);
            }
        }
        nav.set_last_triangles(tris);

        log::info!(
            "built navigation mesh: {} tiles, {} polygons, {} obstacles",
            nav.tile_count(),
            nav.poly_count(),
            sync.added
        );
        Ok(nav)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneGraph;

    #[test]
    fn test_build_without_geometry_fails() {
        let scene = SceneGraph::new();
        let mut builder = NavMeshBuilder::new(NavMeshParams::default());
        builder.add_node(scene.root());
        assert!(matches!(builder.build(&scene), Err(Error::InvalidMesh(_))));
    }

    #[test]
    fn test_untracked_polygon_build() {
        let scene = SceneGraph::new();
        let mut builder = NavMeshBuilder::new(NavMeshParams::default());
        builder.add_polygon(&[
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(10.0, 0.0, 0.0),
            Vec3::new(10.0, 10.0, 0.0),
            Vec3::new(0.0, 10.0, 0.0),
        ]);
        let nav = builder.build(&scene).unwrap();
        assert_eq!(nav.tile_count(), 1);
        assert!(nav.poly_count() >= 1);
        assert_eq!(nav.params().orig_bound_max.x, 10.0);
        assert_eq!(nav.last_triangles().len(), 2);
    }

    #[test]
    fn test_grid_over_tile_limit_fails() {
        let scene = SceneGraph::new();
        let mut builder = NavMeshBuilder::new(NavMeshParams::default().with_limits(4, 4096, 8, 128));
        builder.add_polygon(&[
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1e6, 0.0, 0.0),
            Vec3::new(1e6, 1e6, 0.0),
            Vec3::new(0.0, 1e6, 0.0),
        ]);
        assert!(matches!(builder.build(&scene), Err(Error::InvalidConfig(_))));
    }
}
