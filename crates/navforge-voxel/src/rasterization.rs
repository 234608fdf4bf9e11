//! Triangle rasterization into heightfields
//!
//! Each triangle is clipped against the rows and then the columns of the
//! grid; the vertical extent of every clipped piece becomes a span.

use glam::Vec3;
use navforge_common::{Error, Result};

use crate::heightfield::{Heightfield, SPAN_MAX_HEIGHT};

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Z,
}

impl Axis {
    #[inline]
    fn of(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Z => v.z,
        }
    }
}

/// Splits a convex polygon by an axis-aligned line.
///
/// `below` receives the part at or below `axis_offset`, `above` the rest.
fn divide_poly(
    in_verts: &[Vec3],
    below: &mut Vec<Vec3>,
    above: &mut Vec<Vec3>,
    axis_offset: f32,
    axis: Axis,
) {
    below.clear();
    above.clear();
    let n = in_verts.len();
    if n == 0 {
        return;
    }

    let delta: Vec<f32> = in_verts.iter().map(|v| axis_offset - axis.of(*v)).collect();

    let mut b = n - 1;
    for a in 0..n {
        let same_side = (delta[a] >= 0.0) == (delta[b] >= 0.0);
        if !same_side {
            let s = delta[b] / (delta[b] - delta[a]);
            let p = in_verts[b].lerp(in_verts[a], s);
            below.push(p);
            above.push(p);
            if delta[a] > 0.0 {
                below.push(in_verts[a]);
            } else if delta[a] < 0.0 {
                above.push(in_verts[a]);
            }
        } else {
            if delta[a] >= 0.0 {
                below.push(in_verts[a]);
                if delta[a] != 0.0 {
                    b = a;
                    continue;
                }
            }
            above.push(in_verts[a]);
        }
        b = a;
    }
}

/// Rasterizes a single triangle into the heightfield
pub fn rasterize_triangle(
    hf: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) {
    let ics = 1.0 / hf.cs;
    let ich = 1.0 / hf.ch;
    let by = hf.bmax.y - hf.bmin.y;

    let tmin = v0.min(v1).min(v2);
    let tmax = v0.max(v1).max(v2);
    if tmin.x > hf.bmax.x
        || tmax.x < hf.bmin.x
        || tmin.y > hf.bmax.y
        || tmax.y < hf.bmin.y
        || tmin.z > hf.bmax.z
        || tmax.z < hf.bmin.z
    {
        return;
    }

    let z0 = (((tmin.z - hf.bmin.z) * ics) as i32).clamp(-1, hf.height - 1);
    let z1 = (((tmax.z - hf.bmin.z) * ics) as i32).clamp(0, hf.height - 1);

    let mut remaining = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut rest = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);
    let mut row_rest = Vec::with_capacity(7);

    for z in z0..=z1 {
        let cell_z = hf.bmin.z + z as f32 * hf.cs;
        divide_poly(&remaining, &mut row, &mut rest, cell_z + hf.cs, Axis::Z);
        std::mem::swap(&mut remaining, &mut rest);
        if row.len() < 3 || z < 0 {
            continue;
        }

        let (min_x, max_x) = row
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.x), hi.max(v.x)));
        let x0 = ((min_x - hf.bmin.x) * ics) as i32;
        let x1 = ((max_x - hf.bmin.x) * ics) as i32;
        if x1 < 0 || x0 >= hf.width {
            continue;
        }
        let x0 = x0.clamp(-1, hf.width - 1);
        let x1 = x1.clamp(0, hf.width - 1);

        for x in x0..=x1 {
            let cell_x = hf.bmin.x + x as f32 * hf.cs;
            divide_poly(&row, &mut cell, &mut row_rest, cell_x + hf.cs, Axis::X);
            std::mem::swap(&mut row, &mut row_rest);
            if cell.len() < 3 || x < 0 {
                continue;
            }

            let (mut smin, mut smax) = cell
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
            smin -= hf.bmin.y;
            smax -= hf.bmin.y;
            if smax < 0.0 || smin > by {
                continue;
            }
            smin = smin.max(0.0);
            smax = smax.min(by);

            let ismin = ((smin * ich).floor() as i32).clamp(0, SPAN_MAX_HEIGHT as i32);
            let ismax =
                ((smax * ich).ceil() as i32).clamp(ismin + 1, SPAN_MAX_HEIGHT as i32);
            hf.add_span(x, z, ismin as u16, ismax as u16, area, flag_merge_threshold);
        }
    }
}

/// Rasterizes indexed triangles with per-triangle area ids
pub fn rasterize_triangles(
    hf: &mut Heightfield,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    if tris.len() != areas.len() {
        return Err(Error::InvalidMesh(format!(
            "{} triangles but {} area ids",
            tris.len(),
            areas.len()
        )));
    }
    for (tri, &area) in tris.iter().zip(areas) {
        let [a, b, c] = tri.map(|i| verts.get(i as usize).copied());
        let (Some(a), Some(b), Some(c)) = (a, b, c) else {
            return Err(Error::InvalidMesh(format!(
                "triangle index out of range in {tri:?}"
            )));
        };
        rasterize_triangle(hf, a, b, c, area, flag_merge_threshold);
    }
    Ok(())
}
