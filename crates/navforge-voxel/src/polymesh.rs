//! Polygon mesh generation
//!
//! Contours are ear-clipped into triangles which are then greedily merged
//! into convex polygons of at most `nvp` vertices.

use std::collections::HashMap;

use glam::Vec3;
use navforge_common::{Error, Result};

use crate::contour::{
    intersect, intersect_prop, left, left_on, next, prev, ContourSet, ContourVertex,
};

/// Marks an unused vertex slot or an edge without neighbour
pub const MESH_NULL_IDX: u16 = 0xffff;

/// Set on a neighbour entry when the edge lies on the tile border.
/// The low bits hold the side: 0 = -x, 1 = +z, 2 = +x, 3 = -z.
pub const PORTAL_FLAG: u16 = 0x8000;

/// Largest vertex index a mesh can address
const MAX_MESH_VERTS: usize = 0xfffe;

const DIAGONAL_FLAG: u32 = 0x8000_0000;
const INDEX_MASK: u32 = 0x0fff_ffff;

/// A convex polygon of a [`PolyMesh`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshPoly {
    /// Vertex indices in the mesh vertex array
    pub verts: Vec<u16>,
    /// Per-edge neighbour: poly index, `PORTAL_FLAG | side` or `MESH_NULL_IDX`
    pub neis: Vec<u16>,
    /// Region the polygon came from
    pub reg: u16,
    /// Area id
    pub area: u8,
    /// User flags
    pub flags: u16,
}

impl MeshPoly {
    /// Returns the tile side of edge `j` when the edge is a portal
    pub fn portal_side(&self, j: usize) -> Option<u8> {
        let n = self.neis[j];
        (n != MESH_NULL_IDX && n & PORTAL_FLAG != 0).then_some((n & 0x3) as u8)
    }
}

/// A polygon mesh in voxel coordinates
#[derive(Debug, Clone)]
pub struct PolyMesh {
    /// Vertices as (x, y, z) voxel coordinates
    pub verts: Vec<[u16; 3]>,
    /// Polygons
    pub polys: Vec<MeshPoly>,
    /// Maximum vertices per polygon
    pub nvp: usize,
    /// Minimum bounds in world space
    pub bmin: Vec3,
    /// Maximum bounds in world space
    pub bmax: Vec3,
    /// Cell size
    pub cs: f32,
    /// Cell height
    pub ch: f32,
    /// Border size the source contours were built with
    pub border_size: i32,
    /// Simplification error the source contours were built with
    pub max_edge_error: f32,
}

impl PolyMesh {
    /// Number of polygons
    pub fn poly_count(&self) -> usize {
        self.polys.len()
    }

    /// Returns true when the mesh has no polygons
    pub fn is_empty(&self) -> bool {
        self.polys.is_empty()
    }

    /// World-space position of vertex `i`
    pub fn world_vertex(&self, i: u16) -> Vec3 {
        let v = self.verts[i as usize];
        Vec3::new(
            self.bmin.x + v[0] as f32 * self.cs,
            self.bmin.y + v[1] as f32 * self.ch,
            self.bmin.z + v[2] as f32 * self.cs,
        )
    }

    /// Builds a polygon mesh from a contour set
    pub fn build_from_contour_set(cset: &ContourSet, nvp: usize) -> Result<Self> {
        if !(3..=crate::MAX_VERTS_PER_POLY).contains(&nvp) {
            return Err(Error::InvalidConfig(format!(
                "verts per poly must be in 3..={}, got {nvp}",
                crate::MAX_VERTS_PER_POLY
            )));
        }

        let max_verts: usize = cset.contours.iter().map(|c| c.verts.len()).sum();
        if max_verts > MAX_MESH_VERTS {
            return Err(Error::NavMeshGeneration(format!(
                "too many vertices for a 16 bit mesh: {max_verts}"
            )));
        }

        let mut mesh = PolyMesh {
            verts: Vec::with_capacity(max_verts),
            polys: Vec::new(),
            nvp,
            bmin: cset.bmin,
            bmax: cset.bmax,
            cs: cset.cs,
            ch: cset.ch,
            border_size: cset.border_size,
            max_edge_error: cset.max_error,
        };
        let mut vert_lookup: HashMap<(u16, u16), Vec<u16>> = HashMap::new();

        for contour in &cset.contours {
            if contour.verts.len() < 3 {
                continue;
            }

            let tris = match triangulate(&contour.verts) {
                Some(tris) => tris,
                None => {
                    log::warn!(
                        "bad triangulation for contour of region {}, skipping",
                        contour.reg
                    );
                    continue;
                }
            };

            let indices: Vec<u16> = contour
                .verts
                .iter()
                .map(|v| add_vertex(v, &mut mesh.verts, &mut vert_lookup))
                .collect();

            let mut polys: Vec<Vec<u16>> = tris
                .iter()
                .map(|t| t.iter().map(|&k| indices[k]).collect::<Vec<u16>>())
                .filter(|p: &Vec<u16>| p[0] != p[1] && p[0] != p[2] && p[1] != p[2])
                .collect();
            if polys.is_empty() {
                continue;
            }

            if nvp > 3 {
                merge_polys(&mut polys, &mesh.verts, nvp);
            }

            for verts in polys {
                mesh.polys.push(MeshPoly {
                    neis: vec![MESH_NULL_IDX; verts.len()],
                    verts,
                    reg: contour.reg,
                    area: contour.area,
                    flags: 0,
                });
            }
        }

        if mesh.polys.len() >= PORTAL_FLAG as usize {
            return Err(Error::NavMeshGeneration(format!(
                "too many polygons for a 16 bit mesh: {}",
                mesh.polys.len()
            )));
        }

        mesh.build_adjacency();
        mesh.mark_portal_edges(cset.width, cset.height);

        log::debug!(
            "poly mesh: {} verts, {} polys",
            mesh.verts.len(),
            mesh.polys.len()
        );
        Ok(mesh)
    }

    fn build_adjacency(&mut self) {
        let mut edges: HashMap<(u16, u16), (usize, usize)> = HashMap::new();
        for (pi, poly) in self.polys.iter().enumerate() {
            let n = poly.verts.len();
            for j in 0..n {
                let v0 = poly.verts[j];
                let v1 = poly.verts[next(j, n)];
                if v0 < v1 {
                    edges.insert((v0, v1), (pi, j));
                }
            }
        }

        let mut links = Vec::new();
        for (pi, poly) in self.polys.iter().enumerate() {
            let n = poly.verts.len();
            for j in 0..n {
                let v0 = poly.verts[j];
                let v1 = poly.verts[next(j, n)];
                if v0 > v1 {
                    if let Some(&(pa, ea)) = edges.get(&(v1, v0)) {
                        if pa != pi {
                            links.push((pa, ea, pi, j));
                        }
                    }
                }
            }
        }

        for (pa, ea, pb, eb) in links {
            self.polys[pa].neis[ea] = pb as u16;
            self.polys[pb].neis[eb] = pa as u16;
        }
    }

    /// Tags edges lying on the grid boundary so neighbouring tiles can link
    fn mark_portal_edges(&mut self, w: i32, h: i32) {
        let (w, h) = (w.max(0) as u16, h.max(0) as u16);
        let verts = &self.verts;
        for poly in &mut self.polys {
            let n = poly.verts.len();
            for j in 0..n {
                if poly.neis[j] != MESH_NULL_IDX {
                    continue;
                }
                let va = verts[poly.verts[j] as usize];
                let vb = verts[poly.verts[next(j, n)] as usize];
                let side = if va[0] == 0 && vb[0] == 0 {
                    Some(0)
                } else if va[2] == h && vb[2] == h {
                    Some(1)
                } else if va[0] == w && vb[0] == w {
                    Some(2)
                } else if va[2] == 0 && vb[2] == 0 {
                    Some(3)
                } else {
                    None
                };
                if let Some(side) = side {
                    poly.neis[j] = PORTAL_FLAG | side;
                }
            }
        }
    }
}

fn add_vertex(
    v: &ContourVertex,
    verts: &mut Vec<[u16; 3]>,
    lookup: &mut HashMap<(u16, u16), Vec<u16>>,
) -> u16 {
    let x = v.x.clamp(0, u16::MAX as i32) as u16;
    let y = v.y.clamp(0, u16::MAX as i32) as u16;
    let z = v.z.clamp(0, u16::MAX as i32) as u16;

    let bucket = lookup.entry((x, z)).or_default();
    for &i in bucket.iter() {
        let existing = verts[i as usize];
        if (existing[1] as i32 - y as i32).abs() <= 2 {
            return i;
        }
    }
    let i = verts.len() as u16;
    verts.push([x, y, z]);
    bucket.push(i);
    i
}

fn xz(verts: &[ContourVertex], indices: &[u32], i: usize) -> [i32; 2] {
    verts[(indices[i] & INDEX_MASK) as usize].xz()
}

fn diagonalie(i: usize, j: usize, verts: &[ContourVertex], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let d0 = xz(verts, indices, i);
    let d1 = xz(verts, indices, j);
    for k in 0..n {
        let k1 = next(k, n);
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = xz(verts, indices, k);
        let p1 = xz(verts, indices, k1);
        if d0 == p0 || d1 == p0 || d0 == p1 || d1 == p1 {
            continue;
        }
        let hit = if loose {
            intersect_prop(d0, d1, p0, p1)
        } else {
            intersect(d0, d1, p0, p1)
        };
        if hit {
            return false;
        }
    }
    true
}

fn in_cone(i: usize, j: usize, verts: &[ContourVertex], indices: &[u32], loose: bool) -> bool {
    let n = indices.len();
    let pi = xz(verts, indices, i);
    let pj = xz(verts, indices, j);
    let pi1 = xz(verts, indices, next(i, n));
    let pin1 = xz(verts, indices, prev(i, n));

    if left_on(pin1, pi, pi1) {
        if loose {
            return left_on(pi, pj, pin1) && left_on(pj, pi, pi1);
        }
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

fn diagonal(i: usize, j: usize, verts: &[ContourVertex], indices: &[u32], loose: bool) -> bool {
    in_cone(i, j, verts, indices, loose) && diagonalie(i, j, verts, indices, loose)
}

fn shortest_ear(verts: &[ContourVertex], indices: &[u32], require_flag: bool) -> Option<usize> {
    let n = indices.len();
    let mut best: Option<(usize, i32)> = None;
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        let ok = if require_flag {
            indices[i1] & DIAGONAL_FLAG != 0
        } else {
            diagonal(i, i2, verts, indices, true)
        };
        if !ok {
            continue;
        }
        let p0 = xz(verts, indices, i);
        let p2 = xz(verts, indices, i2);
        let dx = p2[0] - p0[0];
        let dz = p2[1] - p0[1];
        let len = dx * dx + dz * dz;
        if best.map_or(true, |(_, l)| len < l) {
            best = Some((i, len));
        }
    }
    best.map(|(i, _)| i)
}

/// Ear-clips a simple polygon. Returns triangles as indices into `verts`,
/// or `None` when the outline is too degenerate to clip.
pub(crate) fn triangulate(verts: &[ContourVertex]) -> Option<Vec<[usize; 3]>> {
    let mut indices: Vec<u32> = (0..verts.len() as u32).collect();
    let mut tris = Vec::with_capacity(verts.len().saturating_sub(2));

    // Flag vertices that are the middle of an ear
    let n = indices.len();
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, &indices, false) {
            indices[i1] |= DIAGONAL_FLAG;
        }
    }

    while indices.len() > 3 {
        let n = indices.len();
        let mini = shortest_ear(verts, &indices, true)
            .or_else(|| shortest_ear(verts, &indices, false))?;

        let i = mini;
        let mut i1 = next(i, n);
        let i2 = next(i1, n);
        tris.push([
            (indices[i] & INDEX_MASK) as usize,
            (indices[i1] & INDEX_MASK) as usize,
            (indices[i2] & INDEX_MASK) as usize,
        ]);

        indices.remove(i1);
        let n = indices.len();
        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        let pi = prev(i, n);
        if diagonal(pi, i1, verts, &indices, false) {
            indices[i] |= DIAGONAL_FLAG;
        } else {
            indices[i] &= INDEX_MASK;
        }
        let ni1 = next(i1, n);
        if diagonal(i, ni1, verts, &indices, false) {
            indices[i1] |= DIAGONAL_FLAG;
        } else {
            indices[i1] &= INDEX_MASK;
        }
    }

    tris.push([
        (indices[0] & INDEX_MASK) as usize,
        (indices[1] & INDEX_MASK) as usize,
        (indices[2] & INDEX_MASK) as usize,
    ]);
    Some(tris)
}

#[inline]
fn uleft(a: [u16; 3], b: [u16; 3], c: [u16; 3]) -> bool {
    let (ax, az) = (a[0] as i32, a[2] as i32);
    let (bx, bz) = (b[0] as i32, b[2] as i32);
    let (cx, cz) = (c[0] as i32, c[2] as i32);
    (bx - ax) * (cz - az) - (cx - ax) * (bz - az) < 0
}

/// Returns the squared length of the shared edge and the edge indices when
/// `pa` and `pb` can be merged into a convex polygon of at most `nvp` verts.
fn poly_merge_value(
    pa: &[u16],
    pb: &[u16],
    verts: &[[u16; 3]],
    nvp: usize,
) -> Option<(i32, usize, usize)> {
    let na = pa.len();
    let nb = pb.len();
    if na + nb - 2 > nvp {
        return None;
    }

    let mut shared = None;
    'outer: for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[next(i, na)]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[next(j, nb)]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break 'outer;
            }
        }
    }
    let (ea, eb) = shared?;

    let v = |i: u16| verts[i as usize];
    if !uleft(v(pa[prev(ea, na)]), v(pa[ea]), v(pb[(eb + 2) % nb])) {
        return None;
    }
    if !uleft(v(pb[prev(eb, nb)]), v(pb[eb]), v(pa[(ea + 2) % na])) {
        return None;
    }

    let a = v(pa[ea]);
    let b = v(pa[next(ea, na)]);
    let dx = a[0] as i32 - b[0] as i32;
    let dz = a[2] as i32 - b[2] as i32;
    Some((dx * dx + dz * dz, ea, eb))
}

fn merge_polys(polys: &mut Vec<Vec<u16>>, verts: &[[u16; 3]], nvp: usize) {
    loop {
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..polys.len() {
            for k in (j + 1)..polys.len() {
                if let Some((value, ea, eb)) = poly_merge_value(&polys[j], &polys[k], verts, nvp) {
                    if best.map_or(true, |b| value > b.0) {
                        best = Some((value, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            break;
        };
        let a = &polys[pa];
        let b = &polys[pb];
        let na = a.len();
        let nb = b.len();
        let mut merged = Vec::with_capacity(na + nb - 2);
        for i in 0..na - 1 {
            merged.push(a[(ea + 1 + i) % na]);
        }
        for i in 0..nb - 1 {
            merged.push(b[(eb + 1 + i) % nb]);
        }
        polys[pa] = merged;
        polys.swap_remove(pb);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, Contour};

    fn square_contour(size: i32, reg: u16) -> Contour {
        let verts = vec![
            ContourVertex::new(0, 0, 0, 0),
            ContourVertex::new(0, 0, size, 0),
            ContourVertex::new(size, 0, size, 0),
            ContourVertex::new(size, 0, 0, 0),
        ];
        Contour {
            rverts: verts.clone(),
            verts,
            reg,
            area: crate::WALKABLE_AREA,
        }
    }

    fn contour_set(contours: Vec<Contour>, width: i32, height: i32) -> ContourSet {
        ContourSet {
            contours,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(width as f32, 10.0, height as f32),
            cs: 1.0,
            ch: 1.0,
            width,
            height,
            border_size: 0,
            max_error: 1.3,
        }
    }

    #[test]
    fn test_triangulate_square() {
        let c = square_contour(4, 1);
        let tris = triangulate(&c.verts).unwrap();
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_triangulate_concave() {
        // L-shape
        let verts = vec![
            ContourVertex::new(0, 0, 0, 0),
            ContourVertex::new(0, 0, 4, 0),
            ContourVertex::new(2, 0, 4, 0),
            ContourVertex::new(2, 0, 2, 0),
            ContourVertex::new(4, 0, 2, 0),
            ContourVertex::new(4, 0, 0, 0),
        ];
        let tris = triangulate(&verts).unwrap();
        assert_eq!(tris.len(), 4);
    }

    #[test]
    fn test_square_becomes_single_poly() {
        let cset = contour_set(vec![square_contour(4, 1)], 8, 8);
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.verts.len(), 4);
        assert_eq!(mesh.polys[0].verts.len(), 4);
        assert_eq!(mesh.polys[0].reg, 1);
    }

    #[test]
    fn test_triangles_only_when_nvp_is_three() {
        let cset = contour_set(vec![square_contour(4, 1)], 8, 8);
        let mesh = PolyMesh::build_from_contour_set(&cset, 3).unwrap();
        assert_eq!(mesh.poly_count(), 2);
        // The two triangles share the diagonal
        let linked = mesh.polys[0].neis.iter().filter(|&&n| n == 1).count();
        assert_eq!(linked, 1);
    }

    #[test]
    fn test_border_edges_become_portals() {
        let cset = contour_set(vec![square_contour(4, 1)], 4, 4);
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        let poly = &mesh.polys[0];
        let mut sides: Vec<u8> = (0..poly.verts.len())
            .filter_map(|j| poly.portal_side(j))
            .collect();
        sides.sort();
        assert_eq!(sides, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_rejects_bad_nvp() {
        let cset = contour_set(vec![square_contour(4, 1)], 8, 8);
        assert!(PolyMesh::build_from_contour_set(&cset, 2).is_err());
    }

    #[test]
    fn test_from_real_contours() {
        use crate::heightfield::Heightfield;
        let mut hf = Heightfield::new(8, 8, Vec3::ZERO, Vec3::new(8.0, 4.0, 8.0), 1.0, 0.5);
        for z in 0..8 {
            for x in 0..8 {
                hf.add_span(x, z, 0, 2, crate::WALKABLE_AREA, 1);
            }
        }
        let mut chf = crate::CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap();
        crate::build_regions_monotone(&mut chf, 0, 1, 1).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 12, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        assert_eq!(mesh.poly_count(), 1);
        assert_eq!(mesh.world_vertex(mesh.polys[0].verts[0]).y, 1.0);
    }
}
