//! Triangle and grid helpers shared by the pipeline stages

use glam::Vec3;

/// Area id of walkable spans
pub const WALKABLE_AREA: u8 = 63;

/// Area id of spans that cannot be walked on
pub const NULL_AREA: u8 = 0;

const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
const DIR_OFFSET_Y: [i32; 4] = [0, 1, 0, -1];

/// X offset of the neighbour cell in direction `dir` (0..4)
#[inline]
pub fn get_dir_offset_x(dir: usize) -> i32 {
    DIR_OFFSET_X[dir & 0x03]
}

/// Z offset of the neighbour cell in direction `dir` (0..4)
#[inline]
pub fn get_dir_offset_y(dir: usize) -> i32 {
    DIR_OFFSET_Y[dir & 0x03]
}

/// Direction index for a unit offset, if the offset is axis aligned
pub fn get_dir_for_offset(x: i32, y: i32) -> Option<usize> {
    (0..4).find(|&dir| DIR_OFFSET_X[dir] == x && DIR_OFFSET_Y[dir] == y)
}

/// Unit normal of a triangle
pub fn calc_tri_normal(v0: Vec3, v1: Vec3, v2: Vec3) -> Vec3 {
    (v1 - v0).cross(v2 - v0).normalize_or_zero()
}

/// Assigns `WALKABLE_AREA` to every triangle whose slope is within
/// `walkable_slope_angle` degrees.
///
/// Both windings are accepted since scene geometry does not agree on one.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &mut [u8],
) {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    for (tri, area) in tris.iter().zip(areas.iter_mut()) {
        let norm = calc_tri_normal(
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
        );
        if norm.y.abs() > walkable_thr {
            *area = WALKABLE_AREA;
        }
    }
}

/// Clears the area of every triangle steeper than `walkable_slope_angle`
pub fn clear_unwalkable_triangles(
    walkable_slope_angle: f32,
    verts: &[Vec3],
    tris: &[[u32; 3]],
    areas: &mut [u8],
) {
    let walkable_thr = walkable_slope_angle.to_radians().cos();
    for (tri, area) in tris.iter().zip(areas.iter_mut()) {
        let norm = calc_tri_normal(
            verts[tri[0] as usize],
            verts[tri[1] as usize],
            verts[tri[2] as usize],
        );
        if norm.y.abs() <= walkable_thr {
            *area = NULL_AREA;
        }
    }
}

/// Calculates the bounds of a vertex list
pub fn calc_bounds(verts: &[Vec3]) -> (Vec3, Vec3) {
    let mut bmin = Vec3::splat(f32::MAX);
    let mut bmax = Vec3::splat(f32::MIN);
    for v in verts {
        bmin = bmin.min(*v);
        bmax = bmax.max(*v);
    }
    (bmin, bmax)
}

/// Grid size in cells for the given bounds
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cell_size: f32) -> (i32, i32) {
    (
        ((bmax.x - bmin.x) / cell_size + 0.5) as i32,
        ((bmax.z - bmin.z) / cell_size + 0.5) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_offsets_round_trip() {
        for dir in 0..4 {
            let x = get_dir_offset_x(dir);
            let y = get_dir_offset_y(dir);
            assert_eq!(get_dir_for_offset(x, y), Some(dir));
        }
        assert_eq!(get_dir_for_offset(1, 1), None);
    }

    #[test]
    fn test_mark_walkable_accepts_both_windings() {
        let verts = [
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let tris = [[0, 1, 2], [0, 2, 1], [3, 4, 5]];
        let mut areas = [NULL_AREA; 3];
        mark_walkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas, [WALKABLE_AREA, WALKABLE_AREA, NULL_AREA]);

        clear_unwalkable_triangles(45.0, &verts, &tris, &mut areas);
        assert_eq!(areas[0], WALKABLE_AREA);
    }

    #[test]
    fn test_grid_size() {
        let (w, h) = calc_grid_size(Vec3::ZERO, Vec3::new(3.0, 1.0, 1.5), 0.3);
        assert_eq!((w, h), (10, 5));
    }
}
