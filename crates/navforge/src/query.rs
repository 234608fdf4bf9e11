//! Path queries in scene space
//!
//! Positions are converted into navigation space, snapped to the nearest
//! polygon within the mesh search extents and converted back on output.
//! A query that misses, or whose corridor does not reach the polygon under
//! the end position, gives an empty path.

use glam::Vec3;
use navforge_common::polyline_length;
use navforge_detour::{NavMeshQuery, PolyRef, SmoothPathParams, StraightPathOptions};

use crate::coords::{from_nav, to_nav};
use crate::nav_mesh::NavMesh;
use crate::poly::NavMeshPoly;

/// Most corner points a straight path can hold
pub const MAX_STRAIGHT_PATH: usize = 256;

/// An ordered list of scene-space points
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavMeshPath {
    points: Vec<Vec3>,
}

impl NavMeshPath {
    pub fn new(points: Vec<Vec3>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<Vec3> {
        self.points.first().copied()
    }

    pub fn last(&self) -> Option<Vec3> {
        self.points.last().copied()
    }

    /// Length of the polyline through every point
    pub fn length(&self) -> f32 {
        polyline_length(&self.points)
    }

    pub fn into_points(self) -> Vec<Vec3> {
        self.points
    }
}

impl From<Vec<Vec3>> for NavMeshPath {
    fn from(points: Vec<Vec3>) -> Self {
        Self::new(points)
    }
}

/// A corridor reaching the end polygon, with both endpoints snapped onto
/// the mesh in navigation space
struct Corridor {
    polys: Vec<PolyRef>,
    start: Vec3,
    end: Vec3,
}

impl NavMesh {
    fn nearest(&self, nav_pos: Vec3) -> Option<(PolyRef, Vec3)> {
        self.tile_mesh()
            .find_nearest_poly(nav_pos, self.search_extents(), self.filter())
    }

    fn corridor(&self, query: &mut NavMeshQuery<'_>, start: Vec3, end: Vec3) -> Option<Corridor> {
        let Some((start_ref, start_pos)) = self.nearest(to_nav(start)) else {
            log::debug!("no polygon near path start {start}");
            return None;
        };
        let Some((end_ref, end_pos)) = self.nearest(to_nav(end)) else {
            log::debug!("no polygon near path end {end}");
            return None;
        };

        let polys = match query.find_path(start_ref, end_ref, start_pos, end_pos, self.filter()) {
            Ok(polys) => polys,
            Err(e) => {
                log::debug!("corridor search failed: {e}");
                return None;
            }
        };
        if polys.last() != Some(&end_ref) {
            log::debug!("end polygon {end_ref} is unreachable from {start_ref}");
            return None;
        }
        Some(Corridor {
            polys,
            start: start_pos,
            end: end_pos,
        })
    }

    /// Closest point on the mesh to `pos`
    pub fn find_nearest_point(&self, pos: Vec3) -> Option<Vec3> {
        self.nearest(to_nav(pos)).map(|(_, p)| from_nav(p))
    }

    /// Polygon closest to `pos`
    pub fn find_nearest_poly(&self, pos: Vec3) -> Option<NavMeshPoly<'_>> {
        self.nearest(to_nav(pos)).and_then(|(r, _)| self.poly(r))
    }

    /// Polygons crossed from `start` to `end`, empty when `end` cannot be
    /// reached
    pub fn find_corridor(&self, start: Vec3, end: Vec3) -> Vec<PolyRef> {
        let mut query = NavMeshQuery::new(self.tile_mesh());
        self.corridor(&mut query, start, end)
            .map(|c| c.polys)
            .unwrap_or_default()
    }

    /// Path through the polygon corridor from `start` to `end`: for each
    /// polygon the boundary point closest to the previous point, then the
    /// end point.
    pub fn find_path(&self, start: Vec3, end: Vec3) -> NavMeshPath {
        let mut query = NavMeshQuery::new(self.tile_mesh());
        let Some(corridor) = self.corridor(&mut query, start, end) else {
            return NavMeshPath::default();
        };

        let mut points = Vec::with_capacity(corridor.polys.len() + 1);
        let mut prev = corridor.start;
        for &r in &corridor.polys {
            match query.closest_point_on_poly_boundary(r, prev) {
                Ok(p) => {
                    points.push(from_nav(p));
                    prev = p;
                }
                Err(e) => {
                    log::debug!("lost polygon {r} while walking a corridor: {e}");
                    return NavMeshPath::default();
                }
            }
        }
        points.push(from_nav(corridor.end));
        NavMeshPath::new(points)
    }

    /// Corner points a straight-line mover passes from `start` to `end`
    pub fn find_straight_path(
        &self,
        start: Vec3,
        end: Vec3,
        options: StraightPathOptions,
    ) -> NavMeshPath {
        let mut query = NavMeshQuery::new(self.tile_mesh());
        let Some(corridor) = self.corridor(&mut query, start, end) else {
            return NavMeshPath::default();
        };

        match query.find_straight_path(
            corridor.start,
            corridor.end,
            &corridor.polys,
            MAX_STRAIGHT_PATH,
            options,
        ) {
            Ok(corners) => corners.into_iter().map(|c| from_nav(c.pos)).collect::<Vec<_>>().into(),
            Err(e) => {
                log::debug!("straight path failed: {e}");
                NavMeshPath::default()
            }
        }
    }

    /// Points recorded while steering along the corridor in fixed steps
    pub fn find_smooth_path(&self, start: Vec3, end: Vec3, params: &SmoothPathParams) -> NavMeshPath {
        let mut query = NavMeshQuery::new(self.tile_mesh());
        let Some(corridor) = self.corridor(&mut query, start, end) else {
            return NavMeshPath::default();
        };

        match query.find_smooth_path(
            corridor.start,
            corridor.end,
            &corridor.polys,
            self.filter(),
            params,
        ) {
            Ok(points) => points.into_iter().map(from_nav).collect::<Vec<_>>().into(),
            Err(e) => {
                log::debug!("smooth path failed: {e}");
                NavMeshPath::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_length() {
        let path = NavMeshPath::new(vec![
            Vec3::ZERO,
            Vec3::new(3.0, 0.0, 0.0),
            Vec3::new(3.0, 4.0, 0.0),
        ]);
        assert_eq!(path.len(), 3);
        assert_eq!(path.length(), 7.0);
        assert_eq!(path.last(), Some(Vec3::new(3.0, 4.0, 0.0)));
        assert_eq!(NavMeshPath::default().length(), 0.0);
        assert!(NavMeshPath::default().is_empty());
    }
}
