//! Compressed tile store with dynamic obstacles
//!
//! The cache owns the compressed height layers of every tile. Obstacle
//! additions and removals are queued and applied by [`TileCache::update`],
//! which rebuilds the navigation mesh tiles the obstacles touch.

use std::collections::{HashMap, VecDeque};

use glam::Vec3;
use navforge_common::{Aabb, Error, Result, Status};
use navforge_detour::{create_tile, NavMesh, TileCreateParams};
use navforge_voxel::BuildContext;

use crate::tile_cache_builder::TileCacheBuilder;
use crate::tile_cache_data::{decompress_tile_cache_layer, TileCacheLayerHeader};
use crate::{LinearAllocator, Lz4Compressor, TileAllocator, TileCompressor};

/// Obstacle requests handled per update
const MAX_REQUESTS: usize = 64;

/// Tile coordinates rebuilt per update
const MAX_UPDATE: usize = 64;

/// Tile cache configuration
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheParams {
    /// World position of the tile grid origin
    pub origin: Vec3,
    /// Tile width along x in world units
    pub tile_width: f32,
    /// Tile depth along z in world units
    pub tile_height: f32,
    pub max_tiles: usize,
    pub max_obstacles: usize,
}

/// Obstacle shape in world space
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleData {
    /// Vertical cylinder standing on `pos`
    Cylinder { pos: Vec3, radius: f32, height: f32 },
    /// Axis-aligned box
    Box { bmin: Vec3, bmax: Vec3 },
    /// Box rotated around the y axis
    OrientedBox {
        center: Vec3,
        half_extents: Vec3,
        y_radians: f32,
    },
}

impl ObstacleData {
    /// World bounds of the shape
    pub fn bounds(&self) -> Aabb {
        match *self {
            ObstacleData::Cylinder {
                pos,
                radius,
                height,
            } => Aabb::new(
                Vec3::new(pos.x - radius, pos.y, pos.z - radius),
                Vec3::new(pos.x + radius, pos.y + height, pos.z + radius),
            ),
            ObstacleData::Box { bmin, bmax } => Aabb::new(bmin, bmax),
            ObstacleData::OrientedBox {
                center,
                half_extents,
                ..
            } => {
                let r = half_extents.x.hypot(half_extents.z);
                let ext = Vec3::new(r, half_extents.y, r);
                Aabb::new(center - ext, center + ext)
            }
        }
    }
}

/// Lifecycle of an obstacle slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObstacleState {
    #[default]
    Empty,
    /// Added, tiles not yet rebuilt
    Processing,
    /// Carved into every touched tile
    Processed,
    /// Removal requested, tiles not yet rebuilt
    Removing,
}

/// Obstacle slot
#[derive(Debug, Clone, Default)]
pub struct Obstacle {
    pub data: Option<ObstacleData>,
    pub state: ObstacleState,
    salt: u16,
    /// Tile coordinates the obstacle overlaps
    touched: Vec<(i32, i32)>,
    /// Tile coordinates still waiting for a rebuild
    pending: Vec<(i32, i32)>,
}

impl Obstacle {
    /// Tile coordinates the obstacle overlaps
    pub fn touched(&self) -> &[(i32, i32)] {
        &self.touched
    }

    fn is_carving(&self) -> bool {
        matches!(
            self.state,
            ObstacleState::Processing | ObstacleState::Processed
        )
    }
}

/// Reference to an obstacle: salt in the high half, slot in the low half
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ObstacleRef(u32);

/// Reference to a compressed tile: salt in the high half, slot in the low
/// half
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct CompressedTileRef(u32);

macro_rules! salted_ref {
    ($name:ident) => {
        impl $name {
            fn encode(salt: u16, idx: usize) -> Self {
                Self(((salt as u32) << 16) | (idx as u32 & 0xffff))
            }

            fn salt(self) -> u16 {
                (self.0 >> 16) as u16
            }

            fn index(self) -> usize {
                (self.0 & 0xffff) as usize
            }

            /// Raw reference value
            pub fn id(self) -> u32 {
                self.0
            }
        }
    };
}

salted_ref!(ObstacleRef);
salted_ref!(CompressedTileRef);

#[derive(Debug, Clone)]
struct CompressedTile {
    header: TileCacheLayerHeader,
    data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
struct ObstacleRequest {
    action: RequestAction,
    reference: ObstacleRef,
}

fn next_salt(salt: u16) -> u16 {
    match salt.wrapping_add(1) {
        0 => 1,
        s => s,
    }
}

/// Store of compressed tile layers and the obstacles carved into them
pub struct TileCache {
    params: TileCacheParams,
    builder: TileCacheBuilder,
    compressor: Box<dyn TileCompressor>,
    allocator: Box<dyn TileAllocator>,

    tiles: Vec<Option<CompressedTile>>,
    tile_salts: Vec<u16>,
    free_tiles: Vec<usize>,
    lookup: HashMap<(i32, i32, i32), usize>,

    obstacles: Vec<Obstacle>,
    free_obstacles: Vec<usize>,
    requests: VecDeque<ObstacleRequest>,
    update_queue: VecDeque<(i32, i32)>,
}

impl std::fmt::Debug for TileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("params", &self.params)
            .field("tiles", &self.tile_count())
            .field("obstacles", &self.obstacle_count())
            .field("requests", &self.requests.len())
            .field("update_queue", &self.update_queue.len())
            .finish()
    }
}

impl TileCache {
    /// Creates a cache using LZ4 compression and a linear scratch allocator
    /// large enough for the builder's tiles
    pub fn new(params: TileCacheParams, builder: TileCacheBuilder) -> Result<Self> {
        let scratch = builder
            .layer_scratch_size()
            .max(LinearAllocator::default().capacity());
        Self::with_components(
            params,
            builder,
            Box::new(Lz4Compressor),
            Box::new(LinearAllocator::new(scratch)),
        )
    }

    /// Creates a cache with a custom compressor and scratch allocator
    pub fn with_components(
        params: TileCacheParams,
        builder: TileCacheBuilder,
        compressor: Box<dyn TileCompressor>,
        allocator: Box<dyn TileAllocator>,
    ) -> Result<Self> {
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::InvalidConfig("tile size must be positive".into()));
        }
        if params.max_tiles == 0 || params.max_tiles > 0xffff {
            return Err(Error::InvalidConfig(format!(
                "max_tiles {} out of range",
                params.max_tiles
            )));
        }
        if params.max_obstacles > 0xffff {
            return Err(Error::InvalidConfig(format!(
                "max_obstacles {} out of range",
                params.max_obstacles
            )));
        }

        Ok(Self {
            params,
            builder,
            compressor,
            allocator,
            tiles: Vec::new(),
            tile_salts: Vec::new(),
            free_tiles: Vec::new(),
            lookup: HashMap::new(),
            obstacles: Vec::new(),
            free_obstacles: Vec::new(),
            requests: VecDeque::new(),
            update_queue: VecDeque::new(),
        })
    }

    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    pub fn builder(&self) -> &TileCacheBuilder {
        &self.builder
    }

    pub fn compressor(&self) -> &dyn TileCompressor {
        self.compressor.as_ref()
    }

    /// Tile coordinates containing `pos`
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    pub fn tile_count(&self) -> usize {
        self.lookup.len()
    }

    /// Number of live obstacles, including those pending removal
    pub fn obstacle_count(&self) -> usize {
        self.obstacles
            .iter()
            .filter(|o| o.state != ObstacleState::Empty)
            .count()
    }

    /// Stores a compressed layer. Fails with `AlreadyExists` if a layer with
    /// the same tile coordinates and layer index is already stored.
    pub fn add_tile(&mut self, data: Vec<u8>) -> Result<CompressedTileRef> {
        let header = TileCacheLayerHeader::from_bytes(&data)?;
        let key = (header.tx, header.ty, header.tlayer);
        if self.lookup.contains_key(&key) {
            return Err(Error::Detour(Status::AlreadyExists));
        }

        let idx = match self.free_tiles.pop() {
            Some(idx) => idx,
            None if self.tiles.len() < self.params.max_tiles => {
                self.tiles.push(None);
                self.tile_salts.push(1);
                self.tiles.len() - 1
            }
            None => return Err(Error::OutOfMemory("tile cache tiles")),
        };

        self.tiles[idx] = Some(CompressedTile { header, data });
        self.lookup.insert(key, idx);
        log::trace!("stored layer ({}, {}, {})", key.0, key.1, key.2);
        Ok(CompressedTileRef::encode(self.tile_salts[idx], idx))
    }

    fn tile_index(&self, reference: CompressedTileRef) -> Option<usize> {
        let idx = reference.index();
        match (self.tiles.get(idx), self.tile_salts.get(idx)) {
            (Some(Some(_)), Some(&salt)) if salt == reference.salt() => Some(idx),
            _ => None,
        }
    }

    /// Removes a stored layer and returns its data
    pub fn remove_tile(&mut self, reference: CompressedTileRef) -> Result<Vec<u8>> {
        let idx = self
            .tile_index(reference)
            .ok_or(Error::Detour(Status::InvalidParam))?;
        let tile = self.tiles[idx]
            .take()
            .ok_or(Error::Detour(Status::InvalidParam))?;
        let h = &tile.header;
        self.lookup.remove(&(h.tx, h.ty, h.tlayer));
        self.tile_salts[idx] = next_salt(self.tile_salts[idx]);
        self.free_tiles.push(idx);
        Ok(tile.data)
    }

    /// Header of a stored layer
    pub fn tile_header(&self, reference: CompressedTileRef) -> Option<&TileCacheLayerHeader> {
        let idx = self.tile_index(reference)?;
        self.tiles[idx].as_ref().map(|t| &t.header)
    }

    /// Compressed data of a stored layer
    pub fn tile_data(&self, reference: CompressedTileRef) -> Option<&[u8]> {
        let idx = self.tile_index(reference)?;
        self.tiles[idx].as_ref().map(|t| t.data.as_slice())
    }

    pub fn tile_ref_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<CompressedTileRef> {
        let idx = *self.lookup.get(&(tx, ty, tlayer))?;
        Some(CompressedTileRef::encode(self.tile_salts[idx], idx))
    }

    /// All stored layers of tile (`tx`, `ty`), ordered by layer index
    pub fn tiles_at(&self, tx: i32, ty: i32) -> Vec<CompressedTileRef> {
        let mut layers: Vec<(i32, usize)> = self
            .lookup
            .iter()
            .filter(|((x, y, _), _)| *x == tx && *y == ty)
            .map(|((_, _, l), &idx)| (*l, idx))
            .collect();
        layers.sort_unstable();
        layers
            .into_iter()
            .map(|(_, idx)| CompressedTileRef::encode(self.tile_salts[idx], idx))
            .collect()
    }

    /// Every stored layer with its header and compressed data
    pub fn tiles(
        &self,
    ) -> impl Iterator<Item = (CompressedTileRef, &TileCacheLayerHeader, &[u8])> + '_ {
        self.tiles.iter().enumerate().filter_map(|(idx, t)| {
            t.as_ref().map(|t| {
                (
                    CompressedTileRef::encode(self.tile_salts[idx], idx),
                    &t.header,
                    t.data.as_slice(),
                )
            })
        })
    }

    /// Tile coordinates of stored layers overlapping `bounds` on the
    /// xz-plane, each listed once
    pub fn query_tiles(&self, bounds: &Aabb) -> Vec<(i32, i32)> {
        let mut out: Vec<(i32, i32)> = self
            .tiles
            .iter()
            .flatten()
            .filter(|t| Aabb::new(t.header.bmin, t.header.bmax).overlaps_xz(bounds))
            .map(|t| (t.header.tx, t.header.ty))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Queues an obstacle for carving. It takes effect on the next
    /// [`TileCache::update`] calls.
    pub fn add_obstacle(&mut self, data: ObstacleData) -> Result<ObstacleRef> {
        let idx = match self.free_obstacles.pop() {
            Some(idx) => idx,
            None if self.obstacles.len() < self.params.max_obstacles => {
                self.obstacles.push(Obstacle {
                    salt: 1,
                    ..Default::default()
                });
                self.obstacles.len() - 1
            }
            None => return Err(Error::OutOfMemory("tile cache obstacles")),
        };

        let ob = &mut self.obstacles[idx];
        ob.data = Some(data);
        ob.state = ObstacleState::Processing;
        ob.touched.clear();
        ob.pending.clear();

        let reference = ObstacleRef::encode(ob.salt, idx);
        self.requests.push_back(ObstacleRequest {
            action: RequestAction::Add,
            reference,
        });
        Ok(reference)
    }

    /// Queues a vertical cylinder obstacle standing on `pos`
    pub fn add_cylinder_obstacle(
        &mut self,
        pos: Vec3,
        radius: f32,
        height: f32,
    ) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleData::Cylinder {
            pos,
            radius,
            height,
        })
    }

    /// Queues an axis-aligned box obstacle
    pub fn add_box_obstacle(&mut self, bmin: Vec3, bmax: Vec3) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleData::Box { bmin, bmax })
    }

    /// Queues a box obstacle rotated by `y_radians` around the y axis
    pub fn add_oriented_box_obstacle(
        &mut self,
        center: Vec3,
        half_extents: Vec3,
        y_radians: f32,
    ) -> Result<ObstacleRef> {
        self.add_obstacle(ObstacleData::OrientedBox {
            center,
            half_extents,
            y_radians,
        })
    }

    fn obstacle_index(&self, reference: ObstacleRef) -> Option<usize> {
        let idx = reference.index();
        let ob = self.obstacles.get(idx)?;
        (ob.salt == reference.salt() && ob.state != ObstacleState::Empty).then_some(idx)
    }

    /// Queues removal of an obstacle
    pub fn remove_obstacle(&mut self, reference: ObstacleRef) -> Result<()> {
        if self.obstacle_index(reference).is_none() {
            return Err(Error::Detour(Status::InvalidParam));
        }
        self.requests.push_back(ObstacleRequest {
            action: RequestAction::Remove,
            reference,
        });
        Ok(())
    }

    pub fn obstacle(&self, reference: ObstacleRef) -> Option<&Obstacle> {
        self.obstacle_index(reference).map(|idx| &self.obstacles[idx])
    }

    /// Every live obstacle
    pub fn obstacles(&self) -> impl Iterator<Item = (ObstacleRef, &Obstacle)> + '_ {
        self.obstacles
            .iter()
            .enumerate()
            .filter(|(_, o)| o.state != ObstacleState::Empty)
            .map(|(idx, o)| (ObstacleRef::encode(o.salt, idx), o))
    }

    /// True when no obstacle request or tile rebuild is outstanding
    pub fn is_up_to_date(&self) -> bool {
        self.requests.is_empty() && self.update_queue.is_empty()
    }

    /// Stored tile coordinates an obstacle can carve, with its footprint
    /// grown by the agent radius
    pub fn obstacle_tiles(&self, data: &ObstacleData) -> Vec<(i32, i32)> {
        let r = self.builder.walkable_radius();
        let mut bounds = data.bounds();
        bounds.min -= Vec3::new(r, 0.0, r);
        bounds.max += Vec3::new(r, 0.0, r);
        self.query_tiles(&bounds)
    }

    fn queue_tiles(&mut self, tiles: &[(i32, i32)]) {
        for t in tiles {
            if !self.update_queue.contains(t) {
                self.update_queue.push_back(*t);
            }
        }
    }

    /// Applies queued obstacle requests and rebuilds the affected tiles of
    /// `nav_mesh`. Work per call is bounded; returns true once everything
    /// queued has been processed.
    pub fn update(&mut self, nav_mesh: &mut NavMesh) -> Result<bool> {
        let count = self.requests.len().min(MAX_REQUESTS);
        for _ in 0..count {
            let Some(req) = self.requests.pop_front() else {
                break;
            };
            let Some(idx) = self.obstacle_index(req.reference) else {
                continue;
            };

            match req.action {
                RequestAction::Add => {
                    let Some(data) = self.obstacles[idx].data else {
                        continue;
                    };
                    let touched = self.obstacle_tiles(&data);
                    let ob = &mut self.obstacles[idx];
                    ob.state = ObstacleState::Processing;
                    ob.touched = touched.clone();
                    ob.pending = touched.clone();
                    self.queue_tiles(&touched);
                }
                RequestAction::Remove => {
                    // Layers stored after the add may have been carved too
                    let mut touched = self.obstacles[idx].touched.clone();
                    if let Some(data) = self.obstacles[idx].data {
                        touched.extend(self.obstacle_tiles(&data));
                    }
                    touched.sort_unstable();
                    touched.dedup();

                    let ob = &mut self.obstacles[idx];
                    ob.state = ObstacleState::Removing;
                    ob.touched = touched.clone();
                    ob.pending = touched.clone();
                    self.queue_tiles(&touched);
                }
            }
        }

        let count = self.update_queue.len().min(MAX_UPDATE);
        for _ in 0..count {
            let Some((tx, ty)) = self.update_queue.pop_front() else {
                break;
            };
            self.build_nav_mesh_tiles_at(tx, ty, nav_mesh)?;
            for ob in &mut self.obstacles {
                ob.pending.retain(|&t| t != (tx, ty));
            }
        }

        for (idx, ob) in self.obstacles.iter_mut().enumerate() {
            if !ob.pending.is_empty() {
                continue;
            }
            match ob.state {
                ObstacleState::Processing
                    if !self
                        .requests
                        .iter()
                        .any(|r| r.reference.index() == idx && r.action == RequestAction::Add) =>
                {
                    ob.state = ObstacleState::Processed;
                }
                ObstacleState::Removing => {
                    ob.state = ObstacleState::Empty;
                    ob.data = None;
                    ob.touched.clear();
                    ob.salt = next_salt(ob.salt);
                    self.free_obstacles.push(idx);
                }
                _ => {}
            }
        }

        Ok(self.is_up_to_date())
    }

    /// Rebuilds one stored layer into `nav_mesh`, carving every active
    /// obstacle that overlaps it. The previous tile at the same coordinates
    /// and layer is replaced.
    pub fn build_nav_mesh_tile(
        &mut self,
        reference: CompressedTileRef,
        nav_mesh: &mut NavMesh,
    ) -> Result<()> {
        let idx = self
            .tile_index(reference)
            .ok_or(Error::Detour(Status::InvalidParam))?;
        let Some(tile) = self.tiles[idx].as_ref() else {
            return Err(Error::Detour(Status::InvalidParam));
        };
        let header = tile.header;

        self.allocator.reset();
        let layer =
            decompress_tile_cache_layer(self.compressor.as_ref(), self.allocator.as_mut(), &tile.data)?;

        let radius = self.builder.walkable_radius();
        let climb = self.builder.walkable_climb();
        let height = self.builder.walkable_height();
        let mut tile_bounds = Aabb::new(header.bmin, header.bmax);
        tile_bounds.min -= Vec3::new(radius, climb, radius);
        tile_bounds.max += Vec3::new(radius, height, radius);

        let obstacles: Vec<ObstacleData> = self
            .obstacles
            .iter()
            .filter(|o| o.is_carving())
            .filter_map(|o| o.data)
            .filter(|d| d.bounds().overlaps(&tile_bounds))
            .collect();

        let mut ctx = BuildContext::new();
        ctx.set_timing_enabled(false);
        let meshes = self.builder.build_tile_meshes(&mut ctx, &layer, &obstacles)?;

        if let Some(tile_ref) = nav_mesh.tile_ref_at(header.tx, header.ty, header.tlayer) {
            nav_mesh.remove_tile(tile_ref)?;
        }
        let Some(meshes) = meshes else {
            log::debug!(
                "tile ({}, {}, {}) has no walkable polygons",
                header.tx,
                header.ty,
                header.tlayer
            );
            return Ok(());
        };

        let mesh_tile = create_tile(
            &meshes.poly_mesh,
            &meshes.detail_mesh,
            &TileCreateParams {
                tile_x: header.tx,
                tile_y: header.ty,
                layer: header.tlayer,
                walkable_height: height,
                walkable_radius: radius,
                walkable_climb: climb,
            },
        )?;
        nav_mesh.add_tile(mesh_tile)?;
        Ok(())
    }

    /// Rebuilds every stored layer of tile (`tx`, `ty`). Navigation mesh
    /// tiles at that location without a stored layer are removed.
    pub fn build_nav_mesh_tiles_at(
        &mut self,
        tx: i32,
        ty: i32,
        nav_mesh: &mut NavMesh,
    ) -> Result<()> {
        let refs = self.tiles_at(tx, ty);
        let stale: Vec<i32> = nav_mesh
            .tiles_at(tx, ty)
            .iter()
            .map(|t| t.header.layer)
            .filter(|&l| self.tile_ref_at(tx, ty, l).is_none())
            .collect();
        for layer in stale {
            nav_mesh.remove_tile_at(tx, ty, layer);
        }

        for r in refs {
            self.build_nav_mesh_tile(r, nav_mesh)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navforge_detour::NavMeshParams;
    use navforge_voxel::VoxelConfig;

    const TILE: f32 = 9.6;

    fn plane(size: f32) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let verts = vec![
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(size + 1.0, 0.0, -1.0),
            Vec3::new(size + 1.0, 0.0, size + 1.0),
            Vec3::new(-1.0, 0.0, size + 1.0),
        ];
        (verts, vec![[0, 2, 1], [0, 3, 2]])
    }

    fn builder() -> TileCacheBuilder {
        let mut config = VoxelConfig::new()
            .with_cell_size(0.3, 0.2)
            .with_agent(2.0, 0.5, 0.5, 45.0);
        config.min_region_area = 64;
        config.merge_region_area = 400;
        config.tile_size = (TILE / config.cs).round() as i32;
        config.border_size = config.walkable_radius + 3;
        TileCacheBuilder::new(config)
    }

    fn empty_cache() -> (TileCache, NavMesh) {
        let cache = TileCache::new(
            TileCacheParams {
                origin: Vec3::ZERO,
                tile_width: TILE,
                tile_height: TILE,
                max_tiles: 64,
                max_obstacles: 16,
            },
            builder(),
        )
        .unwrap();
        let nav = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: TILE,
            tile_height: TILE,
            max_tiles: 64,
            max_polys: 256,
        })
        .unwrap();
        (cache, nav)
    }

    /// Stores the layers of tile (`tx`, `ty`) cut from a plane covering
    /// `tiles` x `tiles` tiles and compiles them
    fn store_tile(cache: &mut TileCache, nav: &mut NavMesh, tx: i32, ty: i32, tiles: i32) {
        let (verts, tris) = plane(TILE * tiles as f32);
        let mut ctx = BuildContext::new();
        let bmin = Vec3::new(tx as f32 * TILE, -1.0, ty as f32 * TILE);
        let bmax = bmin + Vec3::new(TILE, 2.0, TILE);
        let layers = cache
            .builder()
            .build_layers(&mut ctx, &Lz4Compressor, &verts, &tris, tx, ty, bmin, bmax, 4)
            .unwrap();
        for data in layers {
            cache.add_tile(data).unwrap();
        }
        cache.build_nav_mesh_tiles_at(tx, ty, nav).unwrap();
    }

    fn setup(tiles: i32) -> (TileCache, NavMesh) {
        let (mut cache, mut nav) = empty_cache();
        for ty in 0..tiles {
            for tx in 0..tiles {
                store_tile(&mut cache, &mut nav, tx, ty, tiles);
            }
        }
        (cache, nav)
    }

    fn polys_at(nav: &NavMesh, tx: i32, ty: i32) -> usize {
        nav.tiles_at(tx, ty).iter().map(|t| t.polys.len()).sum()
    }

    fn run_until_done(cache: &mut TileCache, nav: &mut NavMesh) {
        for _ in 0..16 {
            if cache.update(nav).unwrap() {
                return;
            }
        }
        panic!("tile cache did not settle");
    }

    #[test]
    fn test_build_from_layers() {
        let (cache, nav) = setup(2);
        assert_eq!(cache.tile_count(), 4);
        assert_eq!(nav.tile_count(), 4);
        assert!(nav.poly_count() >= 4);
    }

    #[test]
    fn test_duplicate_layer_rejected() {
        let (mut cache, _) = setup(1);
        let r = cache.tile_ref_at(0, 0, 0).unwrap();
        let data = cache.tile_data(r).unwrap().to_vec();
        assert!(matches!(
            cache.add_tile(data),
            Err(Error::Detour(Status::AlreadyExists))
        ));
    }

    #[test]
    fn test_remove_tile_invalidates_ref() {
        let (mut cache, _) = setup(1);
        let r = cache.tile_ref_at(0, 0, 0).unwrap();
        let data = cache.remove_tile(r).unwrap();
        assert!(cache.tile_header(r).is_none());
        assert!(cache.remove_tile(r).is_err());

        let again = cache.add_tile(data).unwrap();
        assert_ne!(again, r);
        assert!(cache.tile_header(again).is_some());
    }

    #[test]
    fn test_obstacle_lifecycle() {
        let (mut cache, mut nav) = setup(1);
        let before = nav.poly_count();

        let ob = cache
            .add_cylinder_obstacle(Vec3::new(4.8, 0.0, 4.8), 1.0, 2.0)
            .unwrap();
        assert_eq!(cache.obstacle(ob).unwrap().state, ObstacleState::Processing);
        assert!(!cache.is_up_to_date());

        run_until_done(&mut cache, &mut nav);
        assert_eq!(cache.obstacle(ob).unwrap().state, ObstacleState::Processed);
        assert_eq!(cache.obstacle(ob).unwrap().touched(), &[(0, 0)]);
        assert!(nav.poly_count() > before);

        cache.remove_obstacle(ob).unwrap();
        run_until_done(&mut cache, &mut nav);
        assert!(cache.obstacle(ob).is_none());
        assert_eq!(cache.obstacle_count(), 0);
        assert_eq!(nav.poly_count(), before);
    }

    #[test]
    fn test_obstacle_across_tile_border_touches_both() {
        let (mut cache, mut nav) = setup(2);
        let ob = cache
            .add_box_obstacle(Vec3::new(9.0, 0.0, 4.0), Vec3::new(10.2, 2.0, 5.0))
            .unwrap();
        run_until_done(&mut cache, &mut nav);
        assert_eq!(cache.obstacle(ob).unwrap().touched(), &[(0, 0), (1, 0)]);
    }

    #[test]
    fn test_removal_restores_layers_stored_after_add() {
        let (mut cache, mut nav) = empty_cache();
        store_tile(&mut cache, &mut nav, 0, 0, 2);

        let ob = cache
            .add_cylinder_obstacle(Vec3::new(14.4, 0.0, 4.8), 1.0, 2.0)
            .unwrap();
        run_until_done(&mut cache, &mut nav);
        assert!(cache.obstacle(ob).unwrap().touched().is_empty());

        let (_, clean) = setup(2);
        let expected = polys_at(&clean, 1, 0);
        store_tile(&mut cache, &mut nav, 1, 0, 2);
        assert!(polys_at(&nav, 1, 0) > expected);

        cache.remove_obstacle(ob).unwrap();
        run_until_done(&mut cache, &mut nav);
        assert!(cache.obstacle(ob).is_none());
        assert_eq!(polys_at(&nav, 1, 0), expected);
    }

    #[test]
    fn test_obstacle_capacity() {
        let (mut cache, _) = setup(1);
        for i in 0..16 {
            cache
                .add_cylinder_obstacle(Vec3::new(i as f32 * 0.5, 0.0, 1.0), 0.2, 1.0)
                .unwrap();
        }
        assert!(matches!(
            cache.add_cylinder_obstacle(Vec3::ZERO, 0.2, 1.0),
            Err(Error::OutOfMemory(_))
        ));
    }

    #[test]
    fn test_scratch_fits_largest_tile() {
        let mut config = builder().config().clone();
        config.tile_size = 255;
        let mut cache = TileCache::new(
            TileCacheParams {
                origin: Vec3::ZERO,
                tile_width: 255.0 * config.cs,
                tile_height: 255.0 * config.cs,
                max_tiles: 4,
                max_obstacles: 4,
            },
            TileCacheBuilder::new(config),
        )
        .unwrap();
        assert!(cache.allocator.alloc(255 * 255 * 3).is_some());
    }

    #[test]
    fn test_obstacle_bounds() {
        let b = ObstacleData::Cylinder {
            pos: Vec3::new(1.0, 2.0, 3.0),
            radius: 0.5,
            height: 2.0,
        }
        .bounds();
        assert_eq!(b.min, Vec3::new(0.5, 2.0, 2.5));
        assert_eq!(b.max, Vec3::new(1.5, 4.0, 3.5));
    }
}
