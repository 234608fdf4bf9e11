//! Math utilities shared by the build pipeline and the query engine
//!
//! Functions with a `_2d` suffix work on the xz-plane of the Y-up working
//! space and ignore the y component.

use glam::Vec3;

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Clamps a value between min and max
#[inline]
pub fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

/// Get the next power of 2 greater than or equal to x
#[inline]
pub fn next_pow2(x: u32) -> u32 {
    if x == 0 {
        return 1;
    }
    let mut n = x - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n + 1
}

/// Integer log base 2
#[inline]
pub fn ilog2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    31 - x.leading_zeros()
}

/// Signed doubled area of the triangle `abc` on the xz-plane.
///
/// Positive when `c` lies to the right of `a -> b` seen from above.
#[inline]
pub fn tri_area_2d(a: Vec3, b: Vec3, c: Vec3) -> f32 {
    let abx = b.x - a.x;
    let abz = b.z - a.z;
    let acx = c.x - a.x;
    let acz = c.z - a.z;
    acx * abz - abx * acz
}

/// Perp-dot product of two vectors on the xz-plane
#[inline]
pub fn vperp_2d(u: Vec3, v: Vec3) -> f32 {
    u.z * v.x - u.x * v.z
}

/// Squared distance of two points on the xz-plane
#[inline]
pub fn dist_sqr_2d(a: Vec3, b: Vec3) -> f32 {
    sqr(b.x - a.x) + sqr(b.z - a.z)
}

/// Returns true when two points are closer than the quantization epsilon
#[inline]
pub fn vequal(a: Vec3, b: Vec3) -> bool {
    const THR: f32 = 1.0 / 16384.0;
    a.distance_squared(b) < THR * THR
}

/// Squared distance from `pt` to the segment `p -> q` on the xz-plane.
///
/// Returns the distance and the parametric position of the closest point.
pub fn dist_pt_seg_sqr_2d(pt: Vec3, p: Vec3, q: Vec3) -> (f32, f32) {
    let pqx = q.x - p.x;
    let pqz = q.z - p.z;
    let dx = pt.x - p.x;
    let dz = pt.z - p.z;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    let t = clamp(t, 0.0, 1.0);
    let dx = p.x + t * pqx - pt.x;
    let dz = p.z + t * pqz - pt.z;
    (dx * dx + dz * dz, t)
}

/// Squared 3D distance from `pt` to the segment `p -> q`
pub fn dist_pt_seg_sqr(pt: Vec3, p: Vec3, q: Vec3) -> f32 {
    let pq = q - p;
    let d = pq.length_squared();
    let mut t = pq.dot(pt - p);
    if d > 0.0 {
        t /= d;
    }
    let t = clamp(t, 0.0, 1.0);
    (p + pq * t).distance_squared(pt)
}

/// Even-odd point in polygon test on the xz-plane
pub fn point_in_polygon_2d(pt: Vec3, verts: &[Vec3]) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Point in polygon test that also reports the squared distance and
/// parametric position of the closest point on every edge.
///
/// `edge_dist[j]` and `edge_t[j]` describe the edge `verts[j] -> verts[j + 1]`.
pub fn dist_pt_poly_edges_sqr(
    pt: Vec3,
    verts: &[Vec3],
    edge_dist: &mut [f32],
    edge_t: &mut [f32],
) -> bool {
    let n = verts.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let vi = verts[i];
        let vj = verts[j];
        if ((vi.z > pt.z) != (vj.z > pt.z))
            && (pt.x < (vj.x - vi.x) * (pt.z - vi.z) / (vj.z - vi.z) + vi.x)
        {
            inside = !inside;
        }
        let (d, t) = dist_pt_seg_sqr_2d(pt, vj, vi);
        edge_dist[j] = d;
        edge_t[j] = t;
        j = i;
    }
    inside
}

/// Height of the triangle `abc` under `p`, if `p` projects inside it
pub fn closest_height_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
    const EPS: f32 = 1e-6;
    let v0 = c - a;
    let v1 = b - a;
    let v2 = p - a;

    let mut denom = v0.x * v1.z - v0.z * v1.x;
    if denom.abs() < EPS {
        return None;
    }

    let mut u = v1.z * v2.x - v1.x * v2.z;
    let mut v = v0.x * v2.z - v0.z * v2.x;
    if denom < 0.0 {
        denom = -denom;
        u = -u;
        v = -v;
    }

    if u >= 0.0 && v >= 0.0 && (u + v) <= denom {
        Some(a.y + (v0.y * u + v1.y * v) / denom)
    } else {
        None
    }
}

/// Closest point on triangle `abc` to `p` in 3D
pub fn closest_pt_point_triangle(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return a;
    }

    let bp = p - b;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        return b;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return a + ab * v;
    }

    let cp = p - c;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        return c;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return a + ac * w;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return b + (c - b) * w;
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    a + ab * v + ac * w
}

/// Intersects the segments `ap -> aq` and `bp -> bq` on the xz-plane.
///
/// Returns the parametric positions along both segments.
pub fn intersect_seg_seg_2d(ap: Vec3, aq: Vec3, bp: Vec3, bq: Vec3) -> Option<(f32, f32)> {
    let u = aq - ap;
    let v = bq - bp;
    let w = ap - bp;
    let d = vperp_2d(u, v);
    if d.abs() < 1e-6 {
        return None;
    }
    let s = vperp_2d(v, w) / d;
    let t = vperp_2d(u, w) / d;
    Some((s, t))
}

/// Returns true when the 1D ranges overlap
#[inline]
pub fn overlap_range(amin: f32, amax: f32, bmin: f32, bmax: f32) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Centroid of a polygon
pub fn poly_center(verts: &[Vec3]) -> Vec3 {
    if verts.is_empty() {
        return Vec3::ZERO;
    }
    verts.iter().copied().sum::<Vec3>() / verts.len() as f32
}

/// Length of a polyline
pub fn polyline_length(points: &[Vec3]) -> f32 {
    points.windows(2).map(|w| w[0].distance(w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2_and_ilog2() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(64), 64);
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(64), 6);
        assert_eq!(ilog2(next_pow2(1000)), 10);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 4.0),
            Vec3::new(4.0, 0.0, 0.0),
        ];
        assert!(point_in_polygon_2d(Vec3::new(2.0, 10.0, 2.0), &square));
        assert!(!point_in_polygon_2d(Vec3::new(5.0, 0.0, 2.0), &square));
    }

    #[test]
    fn test_dist_pt_seg() {
        let (d, t) = dist_pt_seg_sqr_2d(
            Vec3::new(1.0, 5.0, 1.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
        );
        assert!((d - 1.0).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_closest_height_on_triangle() {
        let a = Vec3::new(0.0, 1.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 2.0);
        let c = Vec3::new(2.0, 1.0, 0.0);
        let h = closest_height_point_triangle(Vec3::new(0.5, 0.0, 0.5), a, b, c);
        assert_eq!(h, Some(1.0));
        assert!(closest_height_point_triangle(Vec3::new(3.0, 0.0, 3.0), a, b, c).is_none());
    }

    #[test]
    fn test_segment_intersection() {
        let hit = intersect_seg_seg_2d(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, -1.0),
            Vec3::new(1.0, 0.0, 1.0),
        );
        let (s, t) = hit.expect("segments cross");
        assert!((s - 0.5).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_polyline_length() {
        let pts = [Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), Vec3::new(3.0, 4.0, 0.0)];
        assert!((polyline_length(&pts) - 7.0).abs() < 1e-6);
        assert_eq!(polyline_length(&[]), 0.0);
    }
}
