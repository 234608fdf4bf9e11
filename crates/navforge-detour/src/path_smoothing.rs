//! Fixed-step path following along a polygon corridor

use navforge_common::{Result, Vec3};

use crate::{NavMesh, NavMeshQuery, PolyRef, QueryFilter, StraightPathFlags, StraightPathOptions};

/// Look-ahead, in polygons, of the U-turn shortcut
const MAX_LOOK_AHEAD: usize = 6;

/// Neighbours of the first corridor polygon checked by the shortcut
const MAX_NEIS: usize = 16;

/// Steering parameters of `find_smooth_path`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct SmoothPathParams {
    /// Distance moved per iteration
    pub step_size: f32,
    /// Distance at which a steer target counts as reached
    pub slop: f32,
    /// Maximum number of points in the output
    pub max_points: usize,
}

impl Default for SmoothPathParams {
    fn default() -> Self {
        Self {
            step_size: 0.5,
            slop: 0.01,
            max_points: 2048,
        }
    }
}

#[inline]
fn in_range(a: Vec3, b: Vec3, r: f32, h: f32) -> bool {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    dx * dx + dz * dz < r * r && (b.y - a.y).abs() < h
}

/// Steer target for the next step: the first straight path corner farther
/// than `min_target_dist` from `start_pos`
fn steer_target(
    query: &NavMeshQuery<'_>,
    start_pos: Vec3,
    end_pos: Vec3,
    min_target_dist: f32,
    path: &[PolyRef],
) -> Option<(Vec3, StraightPathFlags)> {
    let corners = query
        .find_straight_path(start_pos, end_pos, path, 3, StraightPathOptions::empty())
        .ok()?;

    let target = corners.iter().find(|c| {
        c.flags.contains(StraightPathFlags::END)
            || !in_range(c.pos, start_pos, min_target_dist, 1000.0)
    })?;

    Some((
        Vec3::new(target.pos.x, start_pos.y, target.pos.z),
        target.flags,
    ))
}

/// Replaces the corridor start with the polygons visited while moving.
///
/// The furthest corridor polygon that was visited is located; everything
/// before it is dropped and the visited polygons after it are prepended.
pub(crate) fn fixup_corridor(path: &[PolyRef], visited: &[PolyRef]) -> Vec<PolyRef> {
    let furthest = path.iter().enumerate().rev().find_map(|(i, p)| {
        visited
            .iter()
            .rposition(|v| v == p)
            .map(|j| (i, j))
    });
    let Some((furthest_path, furthest_visited)) = furthest else {
        return path.to_vec();
    };

    visited[furthest_visited..]
        .iter()
        .rev()
        .chain(path[furthest_path + 1..].iter())
        .copied()
        .collect()
}

/// Shortcuts U-turns: when a polygon a few steps down the corridor is a
/// direct neighbour of the first one, the polygons in between are removed.
pub(crate) fn fixup_shortcuts(path: &mut Vec<PolyRef>, nav_mesh: &NavMesh) {
    if path.len() < 3 {
        return;
    }
    let Ok((_, poly)) = nav_mesh.tile_and_poly_by_ref(path[0]) else {
        return;
    };
    let neis: Vec<PolyRef> = poly
        .links
        .iter()
        .map(|l| l.reference)
        .filter(|r| !r.is_null())
        .take(MAX_NEIS)
        .collect();

    let look = MAX_LOOK_AHEAD.min(path.len());
    let cut = (2..look).rev().find(|&i| neis.contains(&path[i]));
    if let Some(cut) = cut {
        path.drain(1..cut);
    }
}

impl NavMeshQuery<'_> {
    /// Walks the corridor `path` from `start_pos` to `end_pos` in fixed
    /// steps, recording a point after every step.
    ///
    /// Each step steers towards the next straight path corner, moves along
    /// the surface, trims the corridor behind the mover and snaps the point
    /// to the detail surface. An unusable corridor gives an empty result.
    pub fn find_smooth_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        filter: &QueryFilter,
        params: &SmoothPathParams,
    ) -> Result<Vec<Vec3>> {
        let (Some(&first), Some(&last)) = (path.first(), path.last()) else {
            return Ok(Vec::new());
        };
        if params.max_points == 0 {
            return Ok(Vec::new());
        }

        let mut polys = path.to_vec();
        let mut iter_pos = self.closest_point_on_poly(first, start_pos)?;
        let target_pos = self.closest_point_on_poly(last, end_pos)?;

        let mut points = vec![iter_pos];

        while !polys.is_empty() && points.len() < params.max_points {
            let Some((steer_pos, steer_flags)) =
                steer_target(self, iter_pos, target_pos, params.slop, &polys)
            else {
                break;
            };
            let end_of_path = steer_flags.contains(StraightPathFlags::END);

            let delta = steer_pos - iter_pos;
            let mut len = delta.length();
            if end_of_path && len < params.step_size {
                len = 1.0;
            } else if len > 0.0 {
                len = params.step_size / len;
            }
            let move_target = iter_pos + delta * len;

            let (result, visited) =
                self.move_along_surface(polys[0], iter_pos, move_target, filter)?;
            polys = fixup_corridor(&polys, &visited);
            fixup_shortcuts(&mut polys, self.nav_mesh());

            iter_pos = result;
            if let Some(&current) = polys.first() {
                if let Some(h) = self.poly_height(current, result)? {
                    iter_pos.y = h;
                }
            }

            if end_of_path && in_range(iter_pos, steer_pos, params.slop, 1.0) {
                points.push(target_pos);
                break;
            }
            points.push(iter_pos);
        }

        log::trace!("smoothed corridor of {} polys into {} points", path.len(), points.len());
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav_mesh_query::tests::strip_mesh;

    fn refs(ids: &[u32]) -> Vec<PolyRef> {
        ids.iter().map(|&i| PolyRef::new(i)).collect()
    }

    #[test]
    fn test_fixup_corridor_moved_forward() {
        let path = refs(&[1, 2, 3, 4]);
        let visited = refs(&[1, 2, 3]);
        assert_eq!(fixup_corridor(&path, &visited), refs(&[3, 4]));
    }

    #[test]
    fn test_fixup_corridor_left_corridor() {
        let path = refs(&[1, 2, 3]);
        let visited = refs(&[1, 7]);
        assert_eq!(fixup_corridor(&path, &visited), refs(&[7, 1, 2, 3]));
    }

    #[test]
    fn test_fixup_corridor_unrelated() {
        let path = refs(&[1, 2]);
        assert_eq!(fixup_corridor(&path, &refs(&[9])), path);
    }

    #[test]
    fn test_smooth_path_follows_strip() {
        let nav = strip_mesh(3);
        let mut query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let start = Vec3::new(1.0, 0.0, 5.0);
        let end = Vec3::new(28.0, 0.0, 5.0);
        let half = Vec3::new(1.0, 2.0, 1.0);
        let (s, _) = query.find_nearest_poly(start, half, &filter).unwrap();
        let (e, _) = query.find_nearest_poly(end, half, &filter).unwrap();
        let path = query.find_path(s, e, start, end, &filter).unwrap();

        let params = SmoothPathParams::default();
        let points = query
            .find_smooth_path(start, end, &path, &filter, &params)
            .unwrap();

        assert!((points[0] - start).length() < 1e-4);
        assert!((points[points.len() - 1] - end).length() < 1e-4);
        for w in points.windows(2) {
            assert!(w[0].distance(w[1]) <= params.step_size + 1e-3);
        }
    }

    #[test]
    fn test_smooth_path_bounded_by_max_points() {
        let nav = strip_mesh(3);
        let query = NavMeshQuery::new(&nav);
        let filter = QueryFilter::default();
        let path: Vec<PolyRef> = nav.poly_refs().collect();
        let params = SmoothPathParams {
            max_points: 5,
            ..Default::default()
        };
        let points = query
            .find_smooth_path(
                Vec3::new(1.0, 0.0, 5.0),
                Vec3::new(28.0, 0.0, 5.0),
                &path,
                &filter,
                &params,
            )
            .unwrap();
        assert_eq!(points.len(), 5);
    }

    #[test]
    fn test_smooth_path_empty_corridor() {
        let nav = strip_mesh(1);
        let query = NavMeshQuery::new(&nav);
        let points = query
            .find_smooth_path(
                Vec3::ZERO,
                Vec3::ONE,
                &[],
                &QueryFilter::default(),
                &SmoothPathParams::default(),
            )
            .unwrap();
        assert!(points.is_empty());
    }
}
