//! Area erosion and marking on compact heightfields
//!
//! Marking functions only touch spans that are already walkable, so they
//! can be used both to tag areas and to carve obstacles with `NULL_AREA`.

use glam::Vec3;
use navforge_common::Result;

use crate::compact_heightfield::CompactHeightfield;
use crate::triangle_utils::NULL_AREA;

/// Shrinks the walkable area by `radius` cells away from every border
pub fn erode_walkable_area(radius: i32, chf: &mut CompactHeightfield) -> Result<()> {
    let mut dist = vec![0xffu8; chf.span_count()];

    for (x, z, i) in chf.iter_spans() {
        if chf.areas[i] == NULL_AREA {
            dist[i] = 0;
            continue;
        }
        let walkable_neighbours = (0..4)
            .filter_map(|dir| chf.neighbor(x, z, i, dir))
            .filter(|&ai| chf.areas[ai] != NULL_AREA)
            .count();
        if walkable_neighbours != 4 {
            dist[i] = 0;
        }
    }

    let relax = |dist: &mut [u8], i: usize, from: usize, cost: u8| {
        let nd = dist[from].saturating_add(cost);
        if nd < dist[i] {
            dist[i] = nd;
        }
    };

    // Pass 1: (-1,0), (-1,-1), (0,-1), (1,-1)
    for z in 0..chf.height {
        for x in 0..chf.width {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.neighbor(x, z, i, 0) {
                    relax(&mut dist, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x - 1, z, ai, 3) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbor(x, z, i, 3) {
                    relax(&mut dist, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x, z - 1, ai, 2) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    // Pass 2: (1,0), (1,1), (0,1), (-1,1)
    for z in (0..chf.height).rev() {
        for x in (0..chf.width).rev() {
            for i in chf.cell_spans(x, z) {
                if let Some(ai) = chf.neighbor(x, z, i, 2) {
                    relax(&mut dist, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x + 1, z, ai, 1) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
                if let Some(ai) = chf.neighbor(x, z, i, 1) {
                    relax(&mut dist, i, ai, 2);
                    if let Some(aai) = chf.neighbor(x, z + 1, ai, 0) {
                        relax(&mut dist, i, aai, 3);
                    }
                }
            }
        }
    }

    let thr = (radius * 2).clamp(0, 255) as u8;
    let mut eroded = 0usize;
    for (area, d) in chf.areas.iter_mut().zip(&dist) {
        if *d < thr && *area != NULL_AREA {
            *area = NULL_AREA;
            eroded += 1;
        }
    }
    log::debug!("eroded {eroded} spans with radius {radius}");
    Ok(())
}

/// Replaces every walkable area id with the median of its 3x3 neighbourhood
pub fn median_filter_walkable_area(chf: &mut CompactHeightfield) -> Result<()> {
    let mut out = chf.areas.clone();
    for (x, z, i) in chf.iter_spans() {
        let area = chf.areas[i];
        if area == NULL_AREA {
            continue;
        }
        let mut nei = [area; 9];
        for dir in 0..4 {
            let Some(ai) = chf.neighbor(x, z, i, dir) else {
                continue;
            };
            if chf.areas[ai] != NULL_AREA {
                nei[dir * 2] = chf.areas[ai];
            }
            let ax = x + crate::triangle_utils::get_dir_offset_x(dir);
            let az = z + crate::triangle_utils::get_dir_offset_y(dir);
            if let Some(aai) = chf.neighbor(ax, az, ai, (dir + 1) & 0x3) {
                if chf.areas[aai] != NULL_AREA {
                    nei[dir * 2 + 1] = chf.areas[aai];
                }
            }
        }
        nei.sort_unstable();
        out[i] = nei[4];
    }
    chf.areas = out;
    Ok(())
}

/// Grid rectangle and height range overlapped by a world-space box
struct GridBounds {
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    min_y: i32,
    max_y: i32,
}

fn grid_bounds(chf: &CompactHeightfield, bmin: Vec3, bmax: Vec3) -> Option<GridBounds> {
    let ics = 1.0 / chf.cs;
    let ich = 1.0 / chf.ch;
    let min_x = ((bmin.x - chf.bmin.x) * ics).floor() as i32;
    let max_x = ((bmax.x - chf.bmin.x) * ics).floor() as i32;
    let min_z = ((bmin.z - chf.bmin.z) * ics).floor() as i32;
    let max_z = ((bmax.z - chf.bmin.z) * ics).floor() as i32;
    if max_x < 0 || min_x >= chf.width || max_z < 0 || min_z >= chf.height {
        return None;
    }
    Some(GridBounds {
        min_x: min_x.max(0),
        max_x: max_x.min(chf.width - 1),
        min_z: min_z.max(0),
        max_z: max_z.min(chf.height - 1),
        min_y: ((bmin.y - chf.bmin.y) * ich).floor() as i32,
        max_y: ((bmax.y - chf.bmin.y) * ich).floor() as i32,
    })
}

/// Applies `area_id` to every walkable span inside `bounds` whose cell
/// center passes `inside`. Returns the number of changed spans.
fn mark_spans(
    chf: &mut CompactHeightfield,
    bounds: GridBounds,
    area_id: u8,
    inside: impl Fn(f32, f32) -> bool,
) -> usize {
    let mut marked = 0;
    for z in bounds.min_z..=bounds.max_z {
        for x in bounds.min_x..=bounds.max_x {
            let cx = chf.bmin.x + (x as f32 + 0.5) * chf.cs;
            let cz = chf.bmin.z + (z as f32 + 0.5) * chf.cs;
            if !inside(cx, cz) {
                continue;
            }
            for i in chf.cell_spans(x, z) {
                let y = chf.spans[i].y as i32;
                if chf.areas[i] == NULL_AREA || y < bounds.min_y || y > bounds.max_y {
                    continue;
                }
                if chf.areas[i] != area_id {
                    chf.areas[i] = area_id;
                    marked += 1;
                }
            }
        }
    }
    marked
}

/// Marks the walkable spans inside an axis-aligned box
pub fn mark_box_area(bmin: Vec3, bmax: Vec3, area_id: u8, chf: &mut CompactHeightfield) -> usize {
    match grid_bounds(chf, bmin, bmax) {
        Some(bounds) => mark_spans(chf, bounds, area_id, |_, _| true),
        None => 0,
    }
}

/// Marks the walkable spans inside a box rotated by `y_radians` around
/// its vertical axis
pub fn mark_oriented_box_area(
    center: Vec3,
    half_extents: Vec3,
    y_radians: f32,
    area_id: u8,
    chf: &mut CompactHeightfield,
) -> usize {
    let max_r = half_extents.x.hypot(half_extents.z);
    let bmin = Vec3::new(center.x - max_r, center.y - half_extents.y, center.z - max_r);
    let bmax = Vec3::new(center.x + max_r, center.y + half_extents.y, center.z + max_r);
    let Some(bounds) = grid_bounds(chf, bmin, bmax) else {
        return 0;
    };
    let (sin, cos) = (-y_radians).sin_cos();
    mark_spans(chf, bounds, area_id, |x, z| {
        let dx = x - center.x;
        let dz = z - center.z;
        let lx = dx * cos - dz * sin;
        let lz = dx * sin + dz * cos;
        lx.abs() <= half_extents.x && lz.abs() <= half_extents.z
    })
}

/// Marks the walkable spans inside a vertical cylinder standing on `pos`
pub fn mark_cylinder_area(
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
    chf: &mut CompactHeightfield,
) -> usize {
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let Some(bounds) = grid_bounds(chf, bmin, bmax) else {
        return 0;
    };
    let r2 = radius * radius;
    mark_spans(chf, bounds, area_id, |x, z| {
        let dx = x - pos.x;
        let dz = z - pos.z;
        dx * dx + dz * dz < r2
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use crate::triangle_utils::WALKABLE_AREA;

    fn flat_chf(size: i32) -> CompactHeightfield {
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
        CompactHeightfield::build_from_heightfield(4, 1, &hf).unwrap()
    }

    fn area_at(chf: &CompactHeightfield, x: i32, z: i32) -> u8 {
        chf.areas[chf.cell_spans(x, z).start]
    }

    #[test]
    fn test_erode_removes_border_ring() {
        let mut chf = flat_chf(10);
        erode_walkable_area(2, &mut chf).unwrap();
        assert_eq!(area_at(&chf, 0, 5), NULL_AREA);
        assert_eq!(area_at(&chf, 1, 5), NULL_AREA);
        assert_eq!(area_at(&chf, 2, 5), WALKABLE_AREA);
        assert_eq!(area_at(&chf, 5, 5), WALKABLE_AREA);
        assert_eq!(area_at(&chf, 8, 5), NULL_AREA);
    }

    #[test]
    fn test_mark_cylinder() {
        let mut chf = flat_chf(10);
        let marked = mark_cylinder_area(Vec3::new(5.0, 0.0, 5.0), 1.5, 2.0, NULL_AREA, &mut chf);
        assert!(marked > 0);
        assert_eq!(area_at(&chf, 5, 5), NULL_AREA);
        assert_eq!(area_at(&chf, 4, 4), NULL_AREA);
        assert_eq!(area_at(&chf, 8, 8), WALKABLE_AREA);
    }

    #[test]
    fn test_mark_box_outside_height_range() {
        let mut chf = flat_chf(6);
        let marked = mark_box_area(
            Vec3::new(0.0, 5.0, 0.0),
            Vec3::new(3.0, 6.0, 3.0),
            NULL_AREA,
            &mut chf,
        );
        assert_eq!(marked, 0);
        let marked = mark_box_area(Vec3::ZERO, Vec3::new(1.5, 2.0, 1.5), 7, &mut chf);
        assert_eq!(marked, 4);
        assert_eq!(area_at(&chf, 1, 1), 7);
    }

    #[test]
    fn test_mark_oriented_box() {
        let mut chf = flat_chf(10);
        let marked = mark_oriented_box_area(
            Vec3::new(5.0, 1.0, 5.0),
            Vec3::new(3.0, 1.0, 0.6),
            std::f32::consts::FRAC_PI_2,
            NULL_AREA,
            &mut chf,
        );
        assert!(marked > 0);
        // Rotated a quarter turn the long side runs along z
        assert_eq!(area_at(&chf, 4, 7), NULL_AREA);
        assert_eq!(area_at(&chf, 7, 4), WALKABLE_AREA);
    }

    #[test]
    fn test_median_filter_smooths_single_cell() {
        let mut chf = flat_chf(5);
        let i = chf.cell_spans(2, 2).start;
        chf.areas[i] = 5;
        median_filter_walkable_area(&mut chf).unwrap();
        assert_eq!(area_at(&chf, 2, 2), WALKABLE_AREA);
    }
}
