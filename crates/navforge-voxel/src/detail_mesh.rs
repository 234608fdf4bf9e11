//! Detail mesh generation
//!
//! Each polygon gets a small triangle mesh that follows the voxelized
//! surface more closely than the flat polygon. Polygon edges are sampled
//! first so neighbouring polygons agree on their shared edges, then interior
//! samples are inserted where the surface deviates too far.

use glam::{Vec2, Vec3, Vec3Swizzles};
use navforge_common::{Error, Result};

use crate::compact_heightfield::CompactHeightfield;
use crate::contour::{next, prev};
use crate::polymesh::PolyMesh;
use crate::triangle_utils::NULL_AREA;

const MAX_VERTS: usize = 255;
const MAX_VERTS_PER_EDGE: usize = 32;
const MAX_SAMPLES: usize = 128;
const HEIGHT_SEARCH_RADIUS: i32 = 2;

/// Location of one polygon's triangles inside a [`PolyMeshDetail`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailSubMesh {
    /// First vertex of the sub mesh
    pub vert_base: u32,
    /// Number of vertices
    pub vert_count: u32,
    /// First triangle of the sub mesh
    pub tri_base: u32,
    /// Number of triangles
    pub tri_count: u32,
}

/// Height detail for every polygon of a [`PolyMesh`]
#[derive(Debug, Clone, Default)]
pub struct PolyMeshDetail {
    /// One entry per polygon
    pub meshes: Vec<DetailSubMesh>,
    /// World-space vertices. Each sub mesh starts with its polygon vertices.
    pub verts: Vec<Vec3>,
    /// Triangles as indices relative to the sub mesh `vert_base`
    pub tris: Vec<[u8; 3]>,
}

impl PolyMeshDetail {
    /// Vertices and triangles of polygon `poly`
    pub fn sub_mesh(&self, poly: usize) -> Option<(&[Vec3], &[[u8; 3]])> {
        let m = self.meshes.get(poly)?;
        let verts = &self.verts[m.vert_base as usize..(m.vert_base + m.vert_count) as usize];
        let tris = &self.tris[m.tri_base as usize..(m.tri_base + m.tri_count) as usize];
        Some((verts, tris))
    }

    /// Builds the detail mesh for `mesh` using heights from `chf`
    pub fn build(
        mesh: &PolyMesh,
        chf: &CompactHeightfield,
        sample_dist: f32,
        sample_max_error: f32,
    ) -> Result<Self> {
        let mut dmesh = PolyMeshDetail::default();
        let sampler = HeightSampler { chf };

        for (pi, poly) in mesh.polys.iter().enumerate() {
            let poly_verts: Vec<Vec3> = poly.verts.iter().map(|&v| mesh.world_vertex(v)).collect();

            let (verts, tris) =
                build_poly_detail(&poly_verts, &sampler, sample_dist, sample_max_error);
            if tris.is_empty() {
                return Err(Error::NavMeshGeneration(format!(
                    "could not triangulate detail mesh for poly {pi}"
                )));
            }

            dmesh.meshes.push(DetailSubMesh {
                vert_base: dmesh.verts.len() as u32,
                vert_count: verts.len() as u32,
                tri_base: dmesh.tris.len() as u32,
                tri_count: tris.len() as u32,
            });
            dmesh.verts.extend(verts);
            dmesh
                .tris
                .extend(tris.iter().map(|t| [t[0] as u8, t[1] as u8, t[2] as u8]));
        }

        log::debug!(
            "detail mesh: {} verts, {} tris",
            dmesh.verts.len(),
            dmesh.tris.len()
        );
        Ok(dmesh)
    }
}

struct HeightSampler<'a> {
    chf: &'a CompactHeightfield,
}

impl HeightSampler<'_> {
    /// Surface height closest to `ref_y` near the world position (x, z)
    fn height(&self, x: f32, z: f32, ref_y: f32) -> Option<f32> {
        let chf = self.chf;
        let ix = ((x - chf.bmin.x) / chf.cs).floor() as i32;
        let iz = ((z - chf.bmin.z) / chf.cs).floor() as i32;

        for r in 0..=HEIGHT_SEARCH_RADIUS {
            let mut best: Option<f32> = None;
            for dz in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dz.abs() != r {
                        continue;
                    }
                    let (cx, cz) = (ix + dx, iz + dz);
                    if cx < 0 || cz < 0 || cx >= chf.width || cz >= chf.height {
                        continue;
                    }
                    for i in chf.cell_spans(cx, cz) {
                        if chf.areas[i] == NULL_AREA {
                            continue;
                        }
                        let y = chf.bmin.y + chf.spans[i].y as f32 * chf.ch;
                        if best.map_or(true, |b| (y - ref_y).abs() < (b - ref_y).abs()) {
                            best = Some(y);
                        }
                    }
                }
            }
            if best.is_some() {
                return best;
            }
        }
        None
    }
}

fn build_poly_detail(
    poly: &[Vec3],
    sampler: &HeightSampler<'_>,
    sample_dist: f32,
    sample_max_error: f32,
) -> (Vec<Vec3>, Vec<[usize; 3]>) {
    let nin = poly.len();
    let mut verts: Vec<Vec3> = poly.to_vec();
    let mut hull: Vec<usize> = Vec::with_capacity(nin * 2);

    for i in 0..nin {
        hull.push(i);
        if sample_dist <= 0.0 {
            continue;
        }
        let j = next(i, nin);
        for p in sample_edge(poly[i], poly[j], sampler, sample_dist, sample_max_error) {
            if verts.len() >= MAX_VERTS {
                break;
            }
            hull.push(verts.len());
            verts.push(p);
        }
    }

    let mut tris = triangulate_hull(&verts, &hull, nin);

    if sample_dist > 0.0 && !tris.is_empty() {
        let (bmin, bmax) = poly.iter().fold(
            (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
            |(lo, hi), v| (lo.min(v.xz()), hi.max(v.xz())),
        );
        let ref_y = poly.iter().map(|v| v.y).sum::<f32>() / nin as f32;

        let mut samples = Vec::new();
        let nx = ((bmax.x - bmin.x) / sample_dist).floor() as i32;
        let nz = ((bmax.y - bmin.y) / sample_dist).floor() as i32;
        for z in 1..nz.max(1) {
            for x in 1..nx.max(1) {
                let p = Vec2::new(
                    bmin.x + x as f32 * sample_dist,
                    bmin.y + z as f32 * sample_dist,
                );
                if dist_to_poly_edges(poly, p) < sample_dist * 0.5 {
                    continue;
                }
                if let Some(y) = sampler.height(p.x, p.y, ref_y) {
                    samples.push(Vec3::new(p.x, y, p.y));
                }
            }
        }
        samples.truncate(MAX_SAMPLES);

        let mut used = vec![false; samples.len()];
        while verts.len() < MAX_VERTS {
            let mut best: Option<(usize, f32)> = None;
            for (si, s) in samples.iter().enumerate() {
                if used[si] {
                    continue;
                }
                let Some(h) = height_on_tris(&verts, &tris, s.xz()) else {
                    continue;
                };
                let d = (s.y - h).abs();
                if best.map_or(true, |(_, bd)| d > bd) {
                    best = Some((si, d));
                }
            }
            let Some((si, d)) = best else {
                break;
            };
            if d <= sample_max_error {
                break;
            }
            used[si] = true;
            verts.push(samples[si]);
            if !insert_point(&verts, &mut tris, verts.len() - 1) {
                verts.pop();
            }
        }
    }

    (verts, tris)
}

/// Samples the edge `a -> b` and returns the interior points whose height
/// deviates from the straight edge by more than `max_error`
fn sample_edge(
    a: Vec3,
    b: Vec3,
    sampler: &HeightSampler<'_>,
    sample_dist: f32,
    max_error: f32,
) -> Vec<Vec3> {
    // Sample in a fixed order so both polygons sharing the edge agree
    let swapped = b.x < a.x || (b.x == a.x && b.z < a.z);
    let (p, q) = if swapped { (b, a) } else { (a, b) };

    let d = p.xz().distance(q.xz());
    let nn = ((d / sample_dist).floor() as usize + 1).min(MAX_VERTS_PER_EDGE - 1);
    if nn < 2 {
        return Vec::new();
    }

    let edge: Vec<Vec3> = (0..=nn)
        .map(|k| {
            let t = k as f32 / nn as f32;
            let mut s = p.lerp(q, t);
            if k != 0 && k != nn {
                if let Some(h) = sampler.height(s.x, s.z, s.y) {
                    s.y = h;
                }
            }
            s
        })
        .collect();

    // Keep the points that are needed to stay within the error
    let mut idx = vec![0usize, nn];
    let mut k = 0;
    while k + 1 < idx.len() {
        let (a, b) = (idx[k], idx[k + 1]);
        let mut maxd = 0.0;
        let mut maxi = None;
        for m in (a + 1)..b {
            let t = (m - a) as f32 / (b - a) as f32;
            let dev = (edge[m].y - (edge[a].y + (edge[b].y - edge[a].y) * t)).abs();
            if dev > maxd {
                maxd = dev;
                maxi = Some(m);
            }
        }
        match maxi {
            Some(m) if maxd > max_error => idx.insert(k + 1, m),
            _ => k += 1,
        }
    }

    let mut out: Vec<Vec3> = idx[1..idx.len() - 1].iter().map(|&m| edge[m]).collect();
    if swapped {
        out.reverse();
    }
    out
}

fn dist_to_poly_edges(poly: &[Vec3], p: Vec2) -> f32 {
    let n = poly.len();
    (0..n)
        .map(|i| {
            let a = poly[prev(i, n)].xz();
            let b = poly[i].xz();
            dist_pt_seg_2d(p, a, b)
        })
        .fold(f32::MAX, f32::min)
}

fn dist_pt_seg_2d(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    let t = if len2 > 0.0 {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    p.distance(a + ab * t)
}

/// Strip triangulation of a convex hull, starting from the original
/// polygon vertex with the shortest ear
fn triangulate_hull(verts: &[Vec3], hull: &[usize], nin: usize) -> Vec<[usize; 3]> {
    let nhull = hull.len();
    if nhull < 3 {
        return Vec::new();
    }

    let mut start = 0;
    let mut dmin = f32::MAX;
    for i in 0..nhull {
        if hull[i] >= nin {
            continue;
        }
        let pv = verts[hull[prev(i, nhull)]].xz();
        let cv = verts[hull[i]].xz();
        let nv = verts[hull[next(i, nhull)]].xz();
        let d = pv.distance(cv) + cv.distance(nv) + nv.distance(pv);
        if d < dmin {
            start = i;
            dmin = d;
        }
    }

    let mut tris = Vec::with_capacity(nhull - 2);
    let mut left = next(start, nhull);
    let mut right = prev(start, nhull);
    tris.push([hull[start], hull[left], hull[right]]);

    while next(left, nhull) != right {
        let nleft = next(left, nhull);
        let nright = prev(right, nhull);
        let cvleft = verts[hull[left]].xz();
        let nvleft = verts[hull[nleft]].xz();
        let cvright = verts[hull[right]].xz();
        let nvright = verts[hull[nright]].xz();
        let dleft = cvleft.distance(nvleft) + nvleft.distance(cvright);
        let dright = cvright.distance(nvright) + cvleft.distance(nvright);

        if dleft < dright {
            tris.push([hull[left], hull[nleft], hull[right]]);
            left = nleft;
        } else {
            tris.push([hull[left], hull[nright], hull[right]]);
            right = nright;
        }
    }
    tris
}

fn barycentric(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> Option<(f32, f32)> {
    const EPS: f32 = 1e-4;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;
    let denom = v0.x * v1.y - v0.y * v1.x;
    if denom.abs() < f32::EPSILON {
        return None;
    }
    let u = (v1.y * v2.x - v1.x * v2.y) / denom;
    let v = (v0.x * v2.y - v0.y * v2.x) / denom;
    (u >= -EPS && v >= -EPS && u + v <= 1.0 + EPS).then_some((u, v))
}

fn height_on_tris(verts: &[Vec3], tris: &[[usize; 3]], p: Vec2) -> Option<f32> {
    tris.iter().find_map(|t| {
        let (a, b, c) = (verts[t[0]], verts[t[1]], verts[t[2]]);
        barycentric(p, a.xz(), b.xz(), c.xz()).map(|(u, v)| a.y + (c.y - a.y) * u + (b.y - a.y) * v)
    })
}

fn in_circumcircle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if d.abs() < f32::EPSILON {
        return false;
    }
    let (a2, b2, c2) = (a.length_squared(), b.length_squared(), c.length_squared());
    let center = Vec2::new(
        (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d,
        (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d,
    );
    p.distance_squared(center) < center.distance_squared(a) * (1.0 - 1e-5)
}

fn shares_edge(a: &[usize; 3], b: &[usize; 3]) -> bool {
    a.iter().filter(|v| b.contains(v)).count() == 2
}

/// Inserts vertex `pi` into the triangulation by re-triangulating the
/// cavity of triangles whose circumcircle contains it
fn insert_point(verts: &[Vec3], tris: &mut Vec<[usize; 3]>, pi: usize) -> bool {
    let p = verts[pi].xz();
    let xz = |t: &[usize; 3]| (verts[t[0]].xz(), verts[t[1]].xz(), verts[t[2]].xz());

    let Some(first) = tris.iter().position(|t| {
        let (a, b, c) = xz(t);
        barycentric(p, a, b, c).is_some()
    }) else {
        return false;
    };

    let mut bad = vec![false; tris.len()];
    bad[first] = true;
    let mut stack = vec![first];
    while let Some(ti) = stack.pop() {
        for (tj, t) in tris.iter().enumerate() {
            if bad[tj] || !shares_edge(&tris[ti], t) {
                continue;
            }
            let (a, b, c) = xz(t);
            if in_circumcircle(p, a, b, c) {
                bad[tj] = true;
                stack.push(tj);
            }
        }
    }

    let mut boundary = Vec::new();
    for (ti, t) in tris.iter().enumerate() {
        if !bad[ti] {
            continue;
        }
        for e in 0..3 {
            let (e0, e1) = (t[e], t[(e + 1) % 3]);
            let shared = tris.iter().enumerate().any(|(tj, o)| {
                tj != ti && bad[tj] && o.contains(&e0) && o.contains(&e1)
            });
            if !shared {
                boundary.push((e0, e1));
            }
        }
    }

    let mut ti = 0;
    tris.retain(|_| {
        let keep = !bad[ti];
        ti += 1;
        keep
    });
    tris.extend(boundary.into_iter().map(|(e0, e1)| [e0, e1, pi]));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contour::{BuildContoursFlags, ContourSet};
    use crate::heightfield::Heightfield;
    use crate::triangle_utils::WALKABLE_AREA;

    fn flat_setup(size: i32) -> (PolyMesh, CompactHeightfield) {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            0.5,
        );
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1);
            }
        }
        let mut chf = CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap();
        crate::regions::build_regions_monotone(&mut chf, 0, 1, 1).unwrap();
        let cset = ContourSet::build(&chf, 1.3, 0, BuildContoursFlags::default()).unwrap();
        let mesh = PolyMesh::build_from_contour_set(&cset, 6).unwrap();
        (mesh, chf)
    }

    #[test]
    fn test_flat_detail_without_samples() {
        let (mesh, chf) = flat_setup(8);
        let dmesh = PolyMeshDetail::build(&mesh, &chf, 0.0, 1.0).unwrap();
        assert_eq!(dmesh.meshes.len(), mesh.poly_count());
        let (verts, tris) = dmesh.sub_mesh(0).unwrap();
        assert_eq!(verts.len(), mesh.polys[0].verts.len());
        assert_eq!(tris.len(), verts.len() - 2);
    }

    #[test]
    fn test_flat_detail_stays_flat() {
        let (mesh, chf) = flat_setup(12);
        let dmesh = PolyMeshDetail::build(&mesh, &chf, 2.0, 0.5).unwrap();
        for v in &dmesh.verts {
            assert!((v.y - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_triangulate_hull_covers_polygon() {
        let verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        ];
        let hull = [0, 1, 2, 3, 4];
        let tris = triangulate_hull(&verts, &hull, 4);
        assert_eq!(tris.len(), 3);
    }

    #[test]
    fn test_insert_point_splits_triangle() {
        let mut verts = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
        ];
        let mut tris = vec![[0, 1, 2]];
        verts.push(Vec3::new(1.0, 1.0, 1.0));
        assert!(insert_point(&verts, &mut tris, 3));
        assert_eq!(tris.len(), 3);
        assert_eq!(height_on_tris(&verts, &tris, Vec2::new(1.0, 1.0)), Some(1.0));
    }
}
