//! The navigation mesh owner
//!
//! [`NavMesh`] ties the compiled tile mesh to the tile cache it is built
//! from, and remembers which scene nodes feed it so that
//! [`NavMesh::update`] only rebuilds what changed.

use std::cell::RefCell;
use std::collections::HashMap;

use glam::Vec3;
use navforge_common::{Aabb, Error, Result};
use navforge_detour::{
    NavMesh as TileMesh, NavMeshParams as TileMeshParams, PolyFlags, PolyRef, QueryFilter,
};
use navforge_tilecache::{
    ObstacleData, ObstacleRef, ObstacleState, TileCache, TileCacheBuilder, TileCacheParams,
};
use navforge_voxel::BuildContext;

use crate::coords::from_nav;
use crate::debug::Color;
use crate::geometry::{add_polygon, extract_collision_geometry, extract_geometry, TriangleSet};
use crate::params::NavMeshParams;
use crate::scene::{GeometrySource, NodeId};

/// Half extents of the box searched around a query point, in navigation
/// space
pub const DEFAULT_SEARCH_EXTENTS: Vec3 = Vec3::new(2.0, 4.0, 2.0);

/// Upper bound on tile cache update passes per obstacle drain
const MAX_DRAIN_PASSES: usize = 256;

/// Obstacle changes applied by one synchronization
#[derive(Debug, Default)]
pub(crate) struct ObstacleSync {
    pub added: usize,
    pub removed: usize,
    pub touched: Vec<(i32, i32)>,
    added_refs: Vec<ObstacleRef>,
}

/// A tiled navigation mesh built from scene geometry.
///
/// Scene nodes are held as weak keys. A node removed from the scene simply
/// stops contributing geometry at the next update.
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    mesh: TileMesh,
    cache: TileCache,

    tracked: Vec<NodeId>,
    tracked_collision: Vec<(NodeId, u32)>,
    untracked: TriangleSet,
    obstacle_nodes: Vec<NodeId>,

    debug_colors: HashMap<PolyRef, Color>,
    outlines: RefCell<HashMap<PolyRef, Vec<Vec3>>>,

    /// Triangles the mesh was last built from
    last_tris: TriangleSet,

    filter: QueryFilter,
    search_extents: Vec3,
}

impl NavMesh {
    fn with_cache(params: NavMeshParams, cache: TileCache) -> Result<Self> {
        params.validate()?;
        let tcs = params.tile_cell_size();
        let mesh = TileMesh::new(TileMeshParams {
            origin: params.orig_bound_min,
            tile_width: tcs,
            tile_height: tcs,
            max_tiles: params.max_tiles,
            max_polys: params.max_polys_per_tile,
        })?;

        Ok(Self {
            params,
            mesh,
            cache,
            tracked: Vec::new(),
            tracked_collision: Vec::new(),
            untracked: TriangleSet::new(),
            obstacle_nodes: Vec::new(),
            debug_colors: HashMap::new(),
            outlines: RefCell::new(HashMap::new()),
            last_tris: TriangleSet::new(),
            filter: QueryFilter::default(),
            search_extents: DEFAULT_SEARCH_EXTENTS,
        })
    }

    /// Creates a mesh with no tiles over the grid described by `params`
    pub(crate) fn empty(params: NavMeshParams) -> Result<Self> {
        let cache = Self::create_tile_cache(&params)?;
        Self::with_cache(params, cache)
    }

    /// Creates an empty tile cache laid out for a mesh built with `params`
    pub fn create_tile_cache(params: &NavMeshParams) -> Result<TileCache> {
        params.validate()?;
        let tcs = params.tile_cell_size();
        TileCache::new(
            TileCacheParams {
                origin: params.orig_bound_min,
                tile_width: tcs,
                tile_height: tcs,
                max_tiles: params.max_tiles as usize,
                max_obstacles: params.max_obstacles,
            },
            TileCacheBuilder::new(params.voxel_config()),
        )
    }

    /// Rebuilds the compiled mesh from the layers and obstacles held by
    /// `cache`, as when restoring a stored mesh.
    ///
    /// The returned mesh tracks no scene nodes; register them before the
    /// next [`NavMesh::update`].
    pub fn from_tile_cache(params: NavMeshParams, cache: TileCache) -> Result<Self> {
        let cp = cache.params();
        if cp.origin != params.orig_bound_min
            || (cp.tile_width - params.tile_cell_size()).abs() > 1e-4
        {
            return Err(Error::InvalidConfig(
                "tile cache layout does not match the mesh parameters".into(),
            ));
        }

        let mut nav = Self::with_cache(params, cache)?;
        let mut coords: Vec<(i32, i32)> = nav
            .cache
            .tiles()
            .map(|(_, header, _)| (header.tx, header.ty))
            .collect();
        coords.sort_unstable();
        coords.dedup();

        for &(tx, ty) in &coords {
            nav.cache.build_nav_mesh_tiles_at(tx, ty, &mut nav.mesh)?;
        }
        nav.drain_obstacles()?;
        log::info!(
            "restored navigation mesh: {} tiles, {} polygons",
            nav.mesh.tile_count(),
            nav.mesh.poly_count()
        );
        Ok(nav)
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// The compiled tile mesh, in navigation space
    pub fn tile_mesh(&self) -> &TileMesh {
        &self.mesh
    }

    pub fn tile_cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn tile_count(&self) -> usize {
        self.mesh.tile_count()
    }

    pub fn poly_count(&self) -> usize {
        self.mesh.poly_count()
    }

    /// Filter applied by every query
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: QueryFilter) {
        self.filter = filter;
    }

    pub fn search_extents(&self) -> Vec3 {
        self.search_extents
    }

    /// Sets the half extents, in navigation space, of the box searched for
    /// the polygon nearest to a query point
    pub fn set_search_extents(&mut self, extents: Vec3) {
        self.search_extents = extents;
    }

    /// Tracks the visible geometry under `node`. Takes effect on the next
    /// update.
    pub fn track_node(&mut self, node: NodeId) {
        if !self.tracked.contains(&node) {
            self.tracked.push(node);
        }
    }

    pub fn untrack_node(&mut self, node: NodeId) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|&n| n != node);
        self.tracked.len() != before
    }

    pub fn tracked_nodes(&self) -> &[NodeId] {
        &self.tracked
    }

    /// Tracks the collision geometry under `node` whose collide mask shares
    /// a bit with `mask`
    pub fn track_collision_node(&mut self, node: NodeId, mask: u32) {
        match self.tracked_collision.iter_mut().find(|(n, _)| *n == node) {
            Some(entry) => entry.1 = mask,
            None => self.tracked_collision.push((node, mask)),
        }
    }

    pub fn untrack_collision_node(&mut self, node: NodeId) -> bool {
        let before = self.tracked_collision.len();
        self.tracked_collision.retain(|(n, _)| *n != node);
        self.tracked_collision.len() != before
    }

    pub fn tracked_collision_nodes(&self) -> &[(NodeId, u32)] {
        &self.tracked_collision
    }

    /// Adds a scene-space polygon that is part of the mesh input regardless
    /// of the scene
    pub fn add_untracked_polygon(&mut self, verts: &[Vec3]) {
        add_polygon(&mut self.untracked, &glam::Mat4::IDENTITY, verts);
    }

    /// Adds triangles already in navigation space
    pub fn add_untracked_triangles(&mut self, tris: &TriangleSet) {
        self.untracked.extend(tris);
    }

    pub fn clear_untracked(&mut self) {
        self.untracked = TriangleSet::new();
    }

    pub fn untracked_triangles(&self) -> &TriangleSet {
        &self.untracked
    }

    /// Carves the obstacle shape attached to `node` from the next update on
    pub fn add_obstacle_node(&mut self, node: NodeId) {
        if !self.obstacle_nodes.contains(&node) {
            self.obstacle_nodes.push(node);
        }
    }

    pub fn remove_obstacle_node(&mut self, node: NodeId) -> bool {
        let before = self.obstacle_nodes.len();
        self.obstacle_nodes.retain(|&n| n != node);
        self.obstacle_nodes.len() != before
    }

    pub fn obstacle_nodes(&self) -> &[NodeId] {
        &self.obstacle_nodes
    }

    /// Triangles the current tiles were built from
    pub fn last_triangles(&self) -> &TriangleSet {
        &self.last_tris
    }

    /// Obstacles currently carved into the mesh
    pub fn carved_obstacles(&self) -> impl Iterator<Item = (ObstacleRef, ObstacleData)> + '_ {
        self.cache
            .obstacles()
            .filter(|(_, o)| {
                matches!(
                    o.state,
                    ObstacleState::Processing | ObstacleState::Processed
                )
            })
            .filter_map(|(r, o)| o.data.map(|d| (r, d)))
    }

    pub(crate) fn set_inputs(
        &mut self,
        tracked: Vec<NodeId>,
        tracked_collision: Vec<(NodeId, u32)>,
        untracked: TriangleSet,
        obstacle_nodes: Vec<NodeId>,
    ) {
        self.tracked = tracked;
        self.tracked_collision = tracked_collision;
        self.untracked = untracked;
        self.obstacle_nodes = obstacle_nodes;
    }

    pub(crate) fn set_last_triangles(&mut self, tris: TriangleSet) {
        self.last_tris = tris;
    }

    /// Current input triangles: the untracked set plus everything under the
    /// tracked nodes
    pub(crate) fn collect_triangles(&self, scene: &impl GeometrySource) -> TriangleSet {
        gather_triangles(
            scene,
            &self.tracked,
            &self.tracked_collision,
            &self.untracked,
        )
    }

    /// Replaces the cached layers of tile (`tx`, `ty`) with layers built
    /// from the triangles of `tris` around it. The compiled tiles are left
    /// untouched. A tile that fails to build is logged and left without
    /// layers.
    fn replace_tile_layers(
        &mut self,
        tx: i32,
        ty: i32,
        tris: &TriangleSet,
    ) -> Result<usize> {
        for r in self.cache.tiles_at(tx, ty) {
            self.cache.remove_tile(r)?;
        }

        let tile = self.params.tile_bounds(tx, ty);
        let border = self.params.border_size() as f32 * self.params.cell_size;
        let pad = Vec3::new(border, 0.0, border);
        let subset = tris.overlapping_xz(&Aabb::new(tile.min - pad, tile.max + pad));
        if subset.is_empty() {
            log::debug!("tile ({tx}, {ty}) has no geometry");
            return Ok(0);
        }

        let span = subset.bounds();
        let bmin = Vec3::new(tile.min.x, span.min.y - self.params.cell_height, tile.min.z);
        let bmax = Vec3::new(tile.max.x, span.max.y + self.params.agent_height, tile.max.z);
        let (verts, indices) = subset.to_arrays();

        let mut ctx = BuildContext::new();
        let layers = match self.cache.builder().build_layers(
            &mut ctx,
            self.cache.compressor(),
            &verts,
            &indices,
            tx,
            ty,
            bmin,
            bmax,
            self.params.max_layers_per_tile,
        ) {
            Ok(layers) => layers,
            Err(e) => {
                log::warn!("skipping tile ({tx}, {ty}): {e}");
                return Ok(0);
            }
        };

        let mut added = 0;
        for data in layers {
            match self.cache.add_tile(data) {
                Ok(_) => added += 1,
                Err(e) => log::warn!("dropping layer of tile ({tx}, {ty}): {e}"),
            }
        }
        log::debug!(
            "tile ({tx}, {ty}): {} triangles, {added} layers",
            subset.len()
        );
        Ok(added)
    }

    /// Like [`NavMesh::replace_tile_layers`], logging a failure instead of
    /// returning it. Compiling the tile afterwards still matches the mesh
    /// to whatever layers remain.
    pub(crate) fn rebuild_tile_layers(&mut self, tx: i32, ty: i32, tris: &TriangleSet) {
        if let Err(e) = self.replace_tile_layers(tx, ty, tris) {
            log::warn!("failed to store layers of tile ({tx}, {ty}): {e}");
        }
    }

    /// Compiles the cached layers of tile (`tx`, `ty`) into the mesh
    pub(crate) fn build_tiles_at(&mut self, tx: i32, ty: i32) {
        if let Err(e) = self.cache.build_nav_mesh_tiles_at(tx, ty, &mut self.mesh) {
            log::warn!("failed to compile tile ({tx}, {ty}): {e}");
        }
        self.invalidate_poly_caches();
    }

    /// Brings the carved obstacles in line with the obstacle nodes. Carved
    /// obstacles with no equal description among the nodes are removed;
    /// descriptions not carved yet are added. Requests are only queued.
    pub(crate) fn sync_obstacles(&mut self, scene: &impl GeometrySource) -> Result<ObstacleSync> {
        let mut desired: Vec<ObstacleData> = self
            .obstacle_nodes
            .iter()
            .filter_map(|&node| {
                let shape = scene.obstacle_shape(node)?;
                let transform = scene.world_transform(node)?;
                Some(shape.describe(&transform))
            })
            .collect();

        let carved: Vec<(ObstacleRef, ObstacleData)> = self.carved_obstacles().collect();
        let mut sync = ObstacleSync::default();
        for (reference, data) in carved {
            if let Some(i) = desired.iter().position(|d| *d == data) {
                desired.remove(i);
                continue;
            }
            if let Some(ob) = self.cache.obstacle(reference) {
                sync.touched.extend_from_slice(ob.touched());
            }
            sync.touched.extend(self.cache.obstacle_tiles(&data));
            match self.cache.remove_obstacle(reference) {
                Ok(()) => sync.removed += 1,
                Err(e) => log::warn!("failed to remove obstacle {}: {e}", reference.id()),
            }
        }

        for data in desired {
            match self.cache.add_obstacle(data) {
                Ok(reference) => {
                    sync.added_refs.push(reference);
                    sync.added += 1;
                }
                Err(e) => log::warn!("skipping obstacle {data:?}: {e}"),
            }
        }
        Ok(sync)
    }

    /// Runs the tile cache until every queued obstacle request has been
    /// applied. Returns the tiles the added obstacles touched.
    pub(crate) fn drain_obstacles_for(&mut self, sync: &mut ObstacleSync) -> Result<()> {
        self.drain_obstacles()?;
        for r in &sync.added_refs {
            if let Some(ob) = self.cache.obstacle(*r) {
                sync.touched.extend_from_slice(ob.touched());
            }
        }
        sync.touched.sort_unstable();
        sync.touched.dedup();
        Ok(())
    }

    fn drain_obstacles(&mut self) -> Result<()> {
        let mut done = self.cache.is_up_to_date();
        for _ in 0..MAX_DRAIN_PASSES {
            if done {
                break;
            }
            match self.cache.update(&mut self.mesh) {
                Ok(up_to_date) => done = up_to_date,
                Err(e) => log::warn!("obstacle update failed: {e}"),
            }
        }
        if !done {
            log::warn!("obstacle requests still pending after {MAX_DRAIN_PASSES} passes");
        }
        self.invalidate_poly_caches();
        Ok(())
    }

    fn invalidate_poly_caches(&mut self) {
        self.outlines.get_mut().clear();
        let mesh = &self.mesh;
        self.debug_colors.retain(|r, _| mesh.is_valid_poly_ref(*r));
    }

    /// Outline of a polygon in scene space, cached until the next structural
    /// change
    pub(crate) fn poly_outline(&self, reference: PolyRef) -> Vec<Vec3> {
        if let Some(verts) = self.outlines.borrow().get(&reference) {
            return verts.clone();
        }
        let Ok(verts) = self.mesh.poly_vertices(reference) else {
            return Vec::new();
        };
        let verts: Vec<Vec3> = verts.into_iter().map(from_nav).collect();
        self.outlines.borrow_mut().insert(reference, verts.clone());
        verts
    }

    pub(crate) fn debug_color(&self, reference: PolyRef) -> Color {
        if let Some(color) = self.debug_colors.get(&reference) {
            return *color;
        }
        let flags = self.mesh.poly_flags(reference).unwrap_or_default();
        if flags.contains(PolyFlags::DISABLED) {
            Color::DISABLED_POLY
        } else {
            Color::WALKABLE_POLY
        }
    }

    pub(crate) fn set_debug_color(&mut self, reference: PolyRef, color: Color) {
        self.debug_colors.insert(reference, color);
    }

    pub(crate) fn set_poly_flags(&mut self, reference: PolyRef, flags: PolyFlags) -> Result<()> {
        self.mesh.set_poly_flags(reference, flags)
    }
}

/// Collects the untracked triangles plus the geometry under every tracked
/// node, in navigation space
pub(crate) fn gather_triangles(
    scene: &impl GeometrySource,
    tracked: &[NodeId],
    tracked_collision: &[(NodeId, u32)],
    untracked: &TriangleSet,
) -> TriangleSet {
    let mut set = untracked.clone();
    let mut bounds = Aabb::EMPTY;
    for &node in tracked {
        extract_geometry(scene, node, None, &mut set, &mut bounds);
    }
    for &(node, mask) in tracked_collision {
        extract_collision_geometry(scene, node, mask, None, &mut set, &mut bounds);
    }
    set
}
