//! Navigation mesh implementation
//!
//! The navigation mesh is a grid of tiles. Each tile holds convex polygons
//! linked to their neighbours, both inside the tile and across tile borders.

use std::collections::HashMap;

use glam::Vec2;
use navforge_common::{
    closest_height_point_triangle, dist_pt_seg_sqr_2d, ilog2, next_pow2, point_in_polygon_2d,
    Aabb, Error, Result, Status, Vec3,
};

use crate::{
    NavMeshParams, PolyFlags, PolyRef, QueryFilter, EXT_LINK, LINK_INTERNAL,
};

/// Link between two polygons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Link {
    /// Reference to the connected polygon
    pub reference: PolyRef,
    /// Edge of the owning polygon the link crosses
    pub edge: u8,
    /// Tile side for external links, `LINK_INTERNAL` otherwise
    pub side: u8,
    /// Start of the shared edge section, 0..=255 along the edge
    pub bmin: u8,
    /// End of the shared edge section, 0..=255 along the edge
    pub bmax: u8,
}

/// Polygon in a tile
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Poly {
    /// Indices into the tile vertex array
    pub verts: Vec<u16>,
    /// Per edge: 0 for a wall, `index + 1` for an internal neighbour,
    /// `EXT_LINK | side` for a tile border edge
    pub neis: Vec<u16>,
    /// Links to neighbouring polygons
    pub links: Vec<Link>,
    /// User flags
    pub flags: PolyFlags,
    /// Area id
    pub area: u8,
}

impl Poly {
    /// Number of vertices
    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }
}

/// Detail triangles of a polygon
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyDetail {
    pub vert_base: u32,
    pub vert_count: u32,
    pub tri_base: u32,
    pub tri_count: u32,
}

/// Tile location and build parameters
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile position on the grid
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    /// Bounds of the tile geometry
    pub bmin: Vec3,
    pub bmax: Vec3,
    /// Agent parameters the tile was built for
    pub walkable_height: f32,
    pub walkable_radius: f32,
    pub walkable_climb: f32,
}

/// A compiled tile
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct MeshTile {
    /// Salt of the slot the tile lives in, set when the tile is added
    pub salt: u32,
    pub header: TileHeader,
    /// World-space polygon vertices
    pub verts: Vec<Vec3>,
    pub polys: Vec<Poly>,
    pub detail_meshes: Vec<PolyDetail>,
    /// World-space detail vertices
    pub detail_verts: Vec<Vec3>,
    pub detail_tris: Vec<[u8; 3]>,
}

impl MeshTile {
    /// World-space vertices of polygon `poly`
    pub fn poly_verts(&self, poly: &Poly) -> Vec<Vec3> {
        poly.verts.iter().map(|&v| self.verts[v as usize]).collect()
    }

    /// Bounds of polygon `poly`
    pub fn poly_bounds(&self, poly: &Poly) -> Aabb {
        Aabb::from_points(poly.verts.iter().map(|&v| &self.verts[v as usize]))
    }

    /// Height of the detail surface of polygon `ip` under `pos`
    pub fn poly_height(&self, ip: usize, pos: Vec3) -> Option<f32> {
        let poly = self.polys.get(ip)?;
        let verts = self.poly_verts(poly);
        if !point_in_polygon_2d(pos, &verts) {
            return None;
        }

        if let Some(pd) = self.detail_meshes.get(ip) {
            let base = pd.vert_base as usize;
            let tris = &self.detail_tris[pd.tri_base as usize..(pd.tri_base + pd.tri_count) as usize];
            for t in tris {
                let v = t.map(|i| self.detail_verts[base + i as usize]);
                if let Some(h) = closest_height_point_triangle(pos, v[0], v[1], v[2]) {
                    return Some(h);
                }
            }
        }

        // Numerical misses on triangle edges fall back to the closest edge
        Some(closest_on_edges(pos, &verts).y)
    }
}

fn closest_on_edges(pos: Vec3, verts: &[Vec3]) -> Vec3 {
    let n = verts.len();
    let mut best = (f32::MAX, verts[0]);
    for i in 0..n {
        let a = verts[i];
        let b = verts[(i + 1) % n];
        let (d, t) = dist_pt_seg_sqr_2d(pos, a, b);
        if d < best.0 {
            best = (d, a.lerp(b, t));
        }
    }
    best.1
}

/// Tile side on the grid: 0 = +x, 2 = +z, 4 = -x, 6 = -z
#[inline]
pub(crate) fn opposite_side(side: u8) -> u8 {
    (side + 4) & 0x7
}

fn side_offset(side: u8) -> (i32, i32) {
    match side & 0x7 {
        0 => (1, 0),
        1 => (1, 1),
        2 => (0, 1),
        3 => (-1, 1),
        4 => (-1, 0),
        5 => (-1, -1),
        6 => (0, -1),
        _ => (1, -1),
    }
}

/// Position along the tile border axis of the slab
fn slab_coord(v: Vec3, side: u8) -> f32 {
    if side == 0 || side == 4 {
        v.x
    } else {
        v.z
    }
}

/// Edge end points as (position along the border, height), sorted
fn slab_end_points(va: Vec3, vb: Vec3, side: u8) -> (Vec2, Vec2) {
    let (ua, ub) = if side == 0 || side == 4 {
        (va.z, vb.z)
    } else {
        (va.x, vb.x)
    };
    let a = Vec2::new(ua, va.y);
    let b = Vec2::new(ub, vb.y);
    if ua < ub {
        (a, b)
    } else {
        (b, a)
    }
}

fn overlap_slabs(amin: Vec2, amax: Vec2, bmin: Vec2, bmax: Vec2, px: f32, py: f32) -> bool {
    let minx = (amin.x + px).max(bmin.x + px);
    let maxx = (amax.x - px).min(bmax.x - px);
    if minx > maxx {
        return false;
    }

    let line = |lo: Vec2, hi: Vec2| {
        let d = (hi.y - lo.y) / (hi.x - lo.x);
        (d, lo.y - d * lo.x)
    };
    let (ad, ak) = line(amin, amax);
    let (bd, bk) = line(bmin, bmax);
    let dmin = (bd * minx + bk) - (ad * minx + ak);
    let dmax = (bd * maxx + bk) - (ad * maxx + ak);

    if dmin * dmax < 0.0 {
        return true;
    }
    let thr = (py * 2.0) * (py * 2.0);
    dmin * dmin <= thr || dmax * dmax <= thr
}

/// Tiled navigation mesh
#[derive(Debug, Clone)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<Option<MeshTile>>,
    salts: Vec<u32>,
    free_list: Vec<usize>,
    tile_lut: HashMap<(i32, i32), Vec<usize>>,
    tile_bits: u32,
    poly_bits: u32,
    salt_bits: u32,
}

impl NavMesh {
    /// Creates an empty navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::Detour(Status::InvalidParam));
        }
        if params.max_tiles == 0 || params.max_polys == 0 {
            return Err(Error::Detour(Status::InvalidParam));
        }

        let tile_bits = ilog2(next_pow2(params.max_tiles));
        let poly_bits = ilog2(next_pow2(params.max_polys));
        let used = tile_bits + poly_bits;
        if used >= 22 {
            log::error!("{tile_bits} tile bits and {poly_bits} poly bits leave too few salt bits");
            return Err(Error::Detour(Status::InvalidParam));
        }
        let salt_bits = (32 - used).min(31);

        Ok(Self {
            params,
            tiles: Vec::new(),
            salts: Vec::new(),
            free_list: Vec::new(),
            tile_lut: HashMap::new(),
            tile_bits,
            poly_bits,
            salt_bits,
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Packs salt, tile index and poly index into a reference
    pub fn encode_poly_ref(&self, salt: u32, tile: u32, poly: u32) -> PolyRef {
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        PolyRef::new(
            ((salt & salt_mask) << (self.poly_bits + self.tile_bits))
                | ((tile & tile_mask) << self.poly_bits)
                | (poly & poly_mask),
        )
    }

    /// Splits a reference into (salt, tile index, poly index)
    pub fn decode_poly_ref(&self, reference: PolyRef) -> (u32, u32, u32) {
        let r = reference.id();
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let tile_mask = (1u32 << self.tile_bits) - 1;
        let poly_mask = (1u32 << self.poly_bits) - 1;
        (
            (r >> (self.poly_bits + self.tile_bits)) & salt_mask,
            (r >> self.poly_bits) & tile_mask,
            r & poly_mask,
        )
    }

    /// Grid cell containing `pos`
    pub fn calc_tile_loc(&self, pos: Vec3) -> (i32, i32) {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;
        (tx, ty)
    }

    /// Number of tiles currently in the mesh
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    /// Total number of polygons
    pub fn poly_count(&self) -> usize {
        self.tiles.iter().flatten().map(|t| t.polys.len()).sum()
    }

    /// Iterates tiles with their tile reference
    pub fn tiles(&self) -> impl Iterator<Item = (PolyRef, &MeshTile)> + '_ {
        self.tiles.iter().enumerate().filter_map(move |(i, t)| {
            t.as_ref()
                .map(|tile| (self.encode_poly_ref(tile.salt, i as u32, 0), tile))
        })
    }

    /// Iterates every polygon reference in the mesh
    pub fn poly_refs(&self) -> impl Iterator<Item = PolyRef> + '_ {
        self.tiles().flat_map(move |(base, tile)| {
            (0..tile.polys.len() as u32).map(move |ip| PolyRef::new(base.id() | ip))
        })
    }

    fn tile_index_at(&self, x: i32, y: i32, layer: i32) -> Option<usize> {
        self.tile_lut.get(&(x, y))?.iter().copied().find(|&i| {
            self.tiles[i]
                .as_ref()
                .is_some_and(|t| t.header.layer == layer)
        })
    }

    pub fn tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.tile_index_at(x, y, layer)
            .and_then(|i| self.tiles[i].as_ref())
    }

    /// Reference of the tile at a grid location
    pub fn tile_ref_at(&self, x: i32, y: i32, layer: i32) -> Option<PolyRef> {
        let i = self.tile_index_at(x, y, layer)?;
        let tile = self.tiles[i].as_ref()?;
        Some(self.encode_poly_ref(tile.salt, i as u32, 0))
    }

    /// All layers at a grid location
    pub fn tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        self.tile_lut
            .get(&(x, y))
            .map(|ids| ids.iter().filter_map(|&i| self.tiles[i].as_ref()).collect())
            .unwrap_or_default()
    }

    fn tile_indices_at(&self, x: i32, y: i32) -> Vec<usize> {
        self.tile_lut.get(&(x, y)).cloned().unwrap_or_default()
    }

    /// Base reference of the polygons in tile slot `index`
    fn poly_ref_base(&self, index: usize) -> PolyRef {
        let salt = self.tiles[index].as_ref().map_or(0, |t| t.salt);
        self.encode_poly_ref(salt, index as u32, 0)
    }

    /// Resolves a reference into its tile and polygon
    pub fn tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (tile, ip) = self.resolve(reference)?;
        let t = self.tiles[tile].as_ref().ok_or(Error::Detour(Status::InvalidParam))?;
        Ok((t, &t.polys[ip]))
    }

    fn resolve(&self, reference: PolyRef) -> Result<(usize, usize)> {
        if reference.is_null() {
            return Err(Error::Detour(Status::InvalidParam));
        }
        let (salt, it, ip) = self.decode_poly_ref(reference);
        let it = it as usize;
        let ip = ip as usize;
        match self.tiles.get(it).and_then(|t| t.as_ref()) {
            Some(tile) if tile.salt == salt && ip < tile.polys.len() => Ok((it, ip)),
            _ => Err(Error::Detour(Status::InvalidParam)),
        }
    }

    /// Returns true if the reference points at a live polygon
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.resolve(reference).is_ok()
    }

    /// Adds a tile and links it to its neighbours. Returns the tile reference.
    pub fn add_tile(&mut self, mut tile: MeshTile) -> Result<PolyRef> {
        let h = tile.header;
        if self.tile_index_at(h.x, h.y, h.layer).is_some() {
            return Err(Error::Detour(Status::AlreadyExists));
        }
        if tile.polys.len() > self.params.max_polys as usize {
            return Err(Error::Detour(Status::InvalidParam));
        }

        let index = match self.free_list.pop() {
            Some(i) => i,
            None if self.tiles.len() < self.params.max_tiles as usize => {
                self.tiles.push(None);
                self.salts.push(1);
                self.tiles.len() - 1
            }
            None => return Err(Error::Detour(Status::OutOfMemory)),
        };

        tile.salt = self.salts[index];
        let base = self.encode_poly_ref(tile.salt, index as u32, 0);
        connect_int_links(&mut tile, base);
        self.tiles[index] = Some(tile);
        self.tile_lut.entry((h.x, h.y)).or_default().push(index);

        for side in [0u8, 2, 4, 6] {
            let (dx, dy) = side_offset(side);
            for nei in self.tile_indices_at(h.x + dx, h.y + dy) {
                self.connect_ext_links(index, nei, side);
                self.connect_ext_links(nei, index, opposite_side(side));
            }
        }

        log::debug!("added tile ({}, {}, {}) at slot {index}", h.x, h.y, h.layer);
        Ok(base)
    }

    /// Removes the tile with the given tile reference and returns it
    pub fn remove_tile(&mut self, tile_ref: PolyRef) -> Result<MeshTile> {
        let (salt, index, _) = self.decode_poly_ref(tile_ref);
        let index = index as usize;
        match self.tiles.get(index).and_then(|t| t.as_ref()) {
            Some(t) if t.salt == salt => {}
            _ => return Err(Error::Detour(Status::InvalidParam)),
        }
        let Some(mut tile) = self.tiles[index].take() else {
            return Err(Error::Detour(Status::InvalidParam));
        };

        let h = tile.header;
        if let Some(ids) = self.tile_lut.get_mut(&(h.x, h.y)) {
            ids.retain(|&i| i != index);
            if ids.is_empty() {
                self.tile_lut.remove(&(h.x, h.y));
            }
        }

        // Drop links into the removed tile
        for side in [0u8, 2, 4, 6] {
            let (dx, dy) = side_offset(side);
            for nei in self.tile_indices_at(h.x + dx, h.y + dy) {
                self.unconnect_links(nei, index);
            }
        }
        for poly in &mut tile.polys {
            poly.links.retain(|l| l.side == LINK_INTERNAL);
        }

        // Bump the salt so stale references stop resolving
        let salt_mask = (1u32 << self.salt_bits) - 1;
        let mut next = (self.salts[index] + 1) & salt_mask;
        if next == 0 {
            next = 1;
        }
        self.salts[index] = next;
        self.free_list.push(index);

        log::debug!("removed tile ({}, {}, {})", h.x, h.y, h.layer);
        Ok(tile)
    }

    /// Removes the tile at a grid location, if any
    pub fn remove_tile_at(&mut self, x: i32, y: i32, layer: i32) -> Option<MeshTile> {
        let tile_ref = self.tile_ref_at(x, y, layer)?;
        self.remove_tile(tile_ref).ok()
    }

    fn unconnect_links(&mut self, index: usize, target: usize) {
        let tile_bits = self.tile_bits;
        let poly_bits = self.poly_bits;
        let tile_mask = (1u32 << tile_bits) - 1;
        if let Some(tile) = self.tiles[index].as_mut() {
            for poly in &mut tile.polys {
                poly.links.retain(|l| {
                    l.side == LINK_INTERNAL
                        || ((l.reference.id() >> poly_bits) & tile_mask) as usize != target
                });
            }
        }
    }

    fn connect_ext_links(&mut self, index: usize, target: usize, side: u8) {
        let (Some(tile), Some(other)) = (self.tiles[index].as_ref(), self.tiles[target].as_ref())
        else {
            return;
        };
        let target_base = self.poly_ref_base(target);
        let mut new_links: Vec<(usize, Link)> = Vec::new();

        for (ip, poly) in tile.polys.iter().enumerate() {
            let nv = poly.verts.len();
            for j in 0..nv {
                if poly.neis[j] & EXT_LINK == 0 {
                    continue;
                }
                let dir = (poly.neis[j] & 0xff) as u8;
                if dir != side {
                    continue;
                }
                let va = tile.verts[poly.verts[j] as usize];
                let vb = tile.verts[poly.verts[(j + 1) % nv] as usize];

                for (nref, nmin, nmax) in find_connecting_polys(
                    va,
                    vb,
                    other,
                    target_base,
                    opposite_side(dir),
                ) {
                    let (mut bmin, mut bmax) = (0u8, 255u8);
                    let (ua, ub) = if dir == 0 || dir == 4 {
                        (va.z, vb.z)
                    } else {
                        (va.x, vb.x)
                    };
                    if (ub - ua).abs() > f32::EPSILON {
                        let mut tmin = (nmin - ua) / (ub - ua);
                        let mut tmax = (nmax - ua) / (ub - ua);
                        if tmin > tmax {
                            std::mem::swap(&mut tmin, &mut tmax);
                        }
                        bmin = (tmin.clamp(0.0, 1.0) * 255.0).round() as u8;
                        bmax = (tmax.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                    new_links.push((
                        ip,
                        Link {
                            reference: nref,
                            edge: j as u8,
                            side: dir,
                            bmin,
                            bmax,
                        },
                    ));
                }
            }
        }

        if let Some(tile) = self.tiles[index].as_mut() {
            for (ip, link) in new_links {
                tile.polys[ip].links.push(link);
            }
        }
    }

    /// Sets the user flags of a polygon
    pub fn set_poly_flags(&mut self, reference: PolyRef, flags: PolyFlags) -> Result<()> {
        let (it, ip) = self.resolve(reference)?;
        if let Some(tile) = self.tiles[it].as_mut() {
            tile.polys[ip].flags = flags;
        }
        Ok(())
    }

    pub fn poly_flags(&self, reference: PolyRef) -> Result<PolyFlags> {
        Ok(self.tile_and_poly_by_ref(reference)?.1.flags)
    }

    /// Sets the area id of a polygon
    pub fn set_poly_area(&mut self, reference: PolyRef, area: u8) -> Result<()> {
        let (it, ip) = self.resolve(reference)?;
        if let Some(tile) = self.tiles[it].as_mut() {
            tile.polys[ip].area = area;
        }
        Ok(())
    }

    pub fn poly_area(&self, reference: PolyRef) -> Result<u8> {
        Ok(self.tile_and_poly_by_ref(reference)?.1.area)
    }

    /// World-space vertices of a polygon
    pub fn poly_vertices(&self, reference: PolyRef) -> Result<Vec<Vec3>> {
        let (tile, poly) = self.tile_and_poly_by_ref(reference)?;
        Ok(tile.poly_verts(poly))
    }

    /// Height of the polygon surface under `pos`, if `pos` is over the polygon
    pub fn poly_height(&self, reference: PolyRef, pos: Vec3) -> Result<Option<f32>> {
        let (it, ip) = self.resolve(reference)?;
        Ok(self.tiles[it].as_ref().and_then(|t| t.poly_height(ip, pos)))
    }

    /// Closest point on a polygon to `pos`. The flag is true when `pos`
    /// lies over the polygon.
    pub fn closest_point_on_poly(&self, reference: PolyRef, pos: Vec3) -> Result<(Vec3, bool)> {
        let (it, ip) = self.resolve(reference)?;
        let tile = self.tiles[it].as_ref().ok_or(Error::Detour(Status::InvalidParam))?;
        if let Some(h) = tile.poly_height(ip, pos) {
            return Ok((Vec3::new(pos.x, h, pos.z), true));
        }
        let verts = tile.poly_verts(&tile.polys[ip]);
        let mut closest = closest_on_edges(pos, &verts);
        if let Some(h) = tile.poly_height(ip, closest) {
            closest.y = h;
        }
        Ok((closest, false))
    }

    /// Polygons whose bounds overlap the query box and pass the filter
    pub fn query_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Vec<PolyRef> {
        let qbox = Aabb::new(center - half_extents, center + half_extents);
        let (minx, miny) = self.calc_tile_loc(qbox.min);
        let (maxx, maxy) = self.calc_tile_loc(qbox.max);

        let mut out = Vec::new();
        for ty in miny..=maxy {
            for tx in minx..=maxx {
                for index in self.tile_indices_at(tx, ty) {
                    let Some(tile) = self.tiles[index].as_ref() else {
                        continue;
                    };
                    let base = self.poly_ref_base(index);
                    for (ip, poly) in tile.polys.iter().enumerate() {
                        if !filter.pass_filter(poly.flags) {
                            continue;
                        }
                        if tile.poly_bounds(poly).overlaps(&qbox) {
                            out.push(PolyRef::new(base.id() | ip as u32));
                        }
                    }
                }
            }
        }
        out
    }

    /// Nearest polygon to `center` within the query box, with the closest
    /// point on it
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        let mut best: Option<(PolyRef, Vec3, f32)> = None;
        for reference in self.query_polygons(center, half_extents, filter) {
            let Ok((closest, over_poly)) = self.closest_point_on_poly(reference, center) else {
                continue;
            };
            let d = if over_poly {
                // Directly above or below: prefer the polygon within climb height
                let climb = self
                    .tile_and_poly_by_ref(reference)
                    .map(|(t, _)| t.header.walkable_climb)
                    .unwrap_or(0.0);
                let dy = (center.y - closest.y).abs() - climb;
                if dy > 0.0 {
                    dy * dy
                } else {
                    0.0
                }
            } else {
                center.distance_squared(closest)
            };
            if best.map_or(true, |(_, _, bd)| d < bd) {
                best = Some((reference, closest, d));
            }
        }
        best.map(|(r, p, _)| (r, p))
    }
}

fn connect_int_links(tile: &mut MeshTile, base: PolyRef) {
    for poly in &mut tile.polys {
        poly.links.clear();
        for (j, &nei) in poly.neis.iter().enumerate() {
            if nei == 0 || nei & EXT_LINK != 0 {
                continue;
            }
            poly.links.push(Link {
                reference: PolyRef::new(base.id() | (nei - 1) as u32),
                edge: j as u8,
                side: LINK_INTERNAL,
                bmin: 0,
                bmax: 255,
            });
        }
    }
}

/// Polygons of `tile` with a border edge on `side` that overlaps the edge
/// `va -> vb`. Returns the reference and the overlapping range along the
/// border.
fn find_connecting_polys(
    va: Vec3,
    vb: Vec3,
    tile: &MeshTile,
    base: PolyRef,
    side: u8,
) -> Vec<(PolyRef, f32, f32)> {
    let (amin, amax) = slab_end_points(va, vb, side);
    let apos = slab_coord(va, side);
    let m = EXT_LINK | side as u16;
    let climb = tile.header.walkable_climb;

    let mut out = Vec::new();
    for (ip, poly) in tile.polys.iter().enumerate() {
        let nv = poly.verts.len();
        for j in 0..nv {
            if poly.neis[j] != m {
                continue;
            }
            let vc = tile.verts[poly.verts[j] as usize];
            let vd = tile.verts[poly.verts[(j + 1) % nv] as usize];
            if (apos - slab_coord(vc, side)).abs() > 0.01 {
                continue;
            }
            let (bmin, bmax) = slab_end_points(vc, vd, side);
            if !overlap_slabs(amin, amax, bmin, bmax, 0.01, climb) {
                continue;
            }
            out.push((
                PolyRef::new(base.id() | ip as u32),
                amin.x.max(bmin.x),
                amax.x.min(bmax.x),
            ));
            break;
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Square tile of `size` at grid (x, y) with one quad polygon whose
    /// edges on the tile border are marked as portals
    pub(crate) fn quad_tile(x: i32, y: i32, size: f32) -> MeshTile {
        let o = Vec3::new(x as f32 * size, 0.0, y as f32 * size);
        let verts = vec![
            o,
            o + Vec3::new(0.0, 0.0, size),
            o + Vec3::new(size, 0.0, size),
            o + Vec3::new(size, 0.0, 0.0),
        ];
        MeshTile {
            salt: 0,
            header: TileHeader {
                x,
                y,
                layer: 0,
                bmin: o,
                bmax: o + Vec3::new(size, 1.0, size),
                walkable_height: 2.0,
                walkable_radius: 0.5,
                walkable_climb: 0.5,
            },
            verts: verts.clone(),
            polys: vec![Poly {
                verts: vec![0, 1, 2, 3],
                neis: vec![EXT_LINK | 4, EXT_LINK | 2, EXT_LINK, EXT_LINK | 6],
                links: Vec::new(),
                flags: PolyFlags::WALK,
                area: 63,
            }],
            detail_meshes: vec![PolyDetail {
                vert_base: 0,
                vert_count: 4,
                tri_base: 0,
                tri_count: 2,
            }],
            detail_verts: verts,
            detail_tris: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    fn params() -> NavMeshParams {
        NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles: 16,
            max_polys: 64,
        }
    }

    #[test]
    fn test_ref_round_trip() {
        let nav = NavMesh::new(params()).unwrap();
        let r = nav.encode_poly_ref(3, 5, 7);
        assert_eq!(nav.decode_poly_ref(r), (3, 5, 7));
    }

    #[test]
    fn test_too_many_bits() {
        let mut p = params();
        p.max_tiles = 1 << 14;
        p.max_polys = 1 << 10;
        assert!(NavMesh::new(p).is_err());
    }

    #[test]
    fn test_neighbour_tiles_link() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        nav.add_tile(quad_tile(1, 0, 10.0)).unwrap();

        let a = nav.tile_at(0, 0, 0).unwrap();
        let b = nav.tile_at(1, 0, 0).unwrap();
        assert_eq!(a.polys[0].links.len(), 1);
        assert_eq!(a.polys[0].links[0].side, 0);
        assert_eq!(b.polys[0].links.len(), 1);
        assert_eq!(b.polys[0].links[0].side, 4);
        assert_eq!((a.polys[0].links[0].bmin, a.polys[0].links[0].bmax), (0, 255));
    }

    #[test]
    fn test_duplicate_tile_rejected() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        assert!(nav.add_tile(quad_tile(0, 0, 10.0)).is_err());
    }

    #[test]
    fn test_remove_tile_invalidates_refs_and_links() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        let right = nav.add_tile(quad_tile(1, 0, 10.0)).unwrap();
        let poly_ref = nav.poly_refs().last().unwrap();
        assert!(nav.is_valid_poly_ref(poly_ref));

        nav.remove_tile(right).unwrap();
        assert!(!nav.is_valid_poly_ref(poly_ref));
        assert!(nav.tile_at(0, 0, 0).unwrap().polys[0].links.is_empty());

        // The slot is reused with a new salt
        let again = nav.add_tile(quad_tile(1, 0, 10.0)).unwrap();
        assert_ne!(again, right);
        assert_eq!(nav.tile_count(), 2);
    }

    #[test]
    fn test_find_nearest_poly() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        let filter = QueryFilter::default();

        let (r, p) = nav
            .find_nearest_poly(Vec3::new(5.0, 1.0, 5.0), Vec3::new(2.0, 4.0, 2.0), &filter)
            .unwrap();
        assert!(nav.is_valid_poly_ref(r));
        assert!((p - Vec3::new(5.0, 0.0, 5.0)).length() < 1e-4);

        assert!(nav
            .find_nearest_poly(Vec3::new(50.0, 0.0, 50.0), Vec3::ONE, &filter)
            .is_none());
    }

    #[test]
    fn test_closest_point_outside() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        let r = nav.poly_refs().next().unwrap();
        let (p, over) = nav
            .closest_point_on_poly(r, Vec3::new(-3.0, 0.0, 5.0))
            .unwrap();
        assert!(!over);
        assert!((p - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_poly_flags() {
        let mut nav = NavMesh::new(params()).unwrap();
        nav.add_tile(quad_tile(0, 0, 10.0)).unwrap();
        let r = nav.poly_refs().next().unwrap();
        nav.set_poly_flags(r, PolyFlags::DISABLED).unwrap();
        assert_eq!(nav.poly_flags(r).unwrap(), PolyFlags::DISABLED);
        let filter = QueryFilter::default().with_exclude_flags(PolyFlags::DISABLED);
        assert!(nav
            .query_polygons(Vec3::new(5.0, 0.0, 5.0), Vec3::ONE, &filter)
            .is_empty());
    }
}
