//! Navigation mesh queries
//!
//! Corridor search (A*), string pulling over the corridor and constrained
//! movement along the mesh surface.

use std::collections::VecDeque;

use navforge_common::{
    dist_pt_poly_edges_sqr, dist_pt_seg_sqr_2d, intersect_seg_seg_2d, point_in_polygon_2d, sqr,
    tri_area_2d, vequal, Error, Result, Status, Vec3,
};

use crate::node_pool::{NodeFlags, NodePool, NodeQueue};
use crate::{
    NavMesh, PolyRef, QueryFilter, StraightPathFlags, StraightPathOptions, LINK_INTERNAL,
    MAX_VERTS_PER_POLY,
};

/// Default size of the search node pool
const DEFAULT_MAX_NODES: usize = 2048;

/// Scale on the A* heuristic keeping it admissible under rounding
const H_SCALE: f32 = 0.999;

/// Breadth of the surface walk in `move_along_surface`
const MAX_STACK: usize = 48;

/// A vertex of a straight path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightPathPoint {
    pub pos: Vec3,
    pub flags: StraightPathFlags,
    /// Polygon entered at this vertex, null at the end point
    pub poly: PolyRef,
}

/// Query interface over a navigation mesh
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
    node_pool: NodePool,
    open_list: NodeQueue,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query object with the default node pool size
    pub fn new(nav_mesh: &'a NavMesh) -> Self {
        Self::with_max_nodes(nav_mesh, DEFAULT_MAX_NODES)
    }

    /// Creates a query object that visits at most `max_nodes` polygons per
    /// corridor search
    pub fn with_max_nodes(nav_mesh: &'a NavMesh, max_nodes: usize) -> Self {
        Self {
            nav_mesh,
            node_pool: NodePool::new(max_nodes),
            open_list: NodeQueue::new(),
        }
    }

    /// Gets a reference to the navigation mesh
    pub fn nav_mesh(&self) -> &'a NavMesh {
        self.nav_mesh
    }

    /// Finds the polygon nearest to `center` within the query box
    pub fn find_nearest_poly(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Option<(PolyRef, Vec3)> {
        self.nav_mesh.find_nearest_poly(center, half_extents, filter)
    }

    /// Polygons overlapping the query box
    pub fn query_polygons(
        &self,
        center: Vec3,
        half_extents: Vec3,
        filter: &QueryFilter,
    ) -> Vec<PolyRef> {
        self.nav_mesh.query_polygons(center, half_extents, filter)
    }

    /// Closest point on the polygon surface to `pos`
    pub fn closest_point_on_poly(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3> {
        Ok(self.nav_mesh.closest_point_on_poly(poly_ref, pos)?.0)
    }

    /// Returns `pos` when it lies over the polygon, otherwise the closest
    /// point on the polygon outline. Heights are not adjusted.
    pub fn closest_point_on_poly_boundary(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Vec3> {
        let verts = self.nav_mesh.poly_vertices(poly_ref)?;
        let n = verts.len();
        let mut edge_dist = [0.0f32; MAX_VERTS_PER_POLY];
        let mut edge_t = [0.0f32; MAX_VERTS_PER_POLY];
        if dist_pt_poly_edges_sqr(pos, &verts, &mut edge_dist[..n], &mut edge_t[..n]) {
            return Ok(pos);
        }

        let mut imin = 0;
        for i in 1..n {
            if edge_dist[i] < edge_dist[imin] {
                imin = i;
            }
        }
        let va = verts[imin];
        let vb = verts[(imin + 1) % n];
        Ok(va.lerp(vb, edge_t[imin]))
    }

    /// Height of the polygon surface at `pos`
    pub fn poly_height(&self, poly_ref: PolyRef, pos: Vec3) -> Result<Option<f32>> {
        self.nav_mesh.poly_height(poly_ref, pos)
    }

    /// Left and right end points of the edge shared by two polygons
    pub fn portal_points(&self, from: PolyRef, to: PolyRef) -> Result<(Vec3, Vec3)> {
        let (tile, poly) = self.nav_mesh.tile_and_poly_by_ref(from)?;
        let link = poly
            .links
            .iter()
            .find(|l| l.reference == to)
            .ok_or(Error::Detour(Status::InvalidParam))?;

        let nv = poly.verts.len();
        let v0 = tile.verts[poly.verts[link.edge as usize] as usize];
        let v1 = tile.verts[poly.verts[(link.edge as usize + 1) % nv] as usize];

        // Border links may cover only part of the edge
        if link.side != LINK_INTERNAL && (link.bmin != 0 || link.bmax != 255) {
            let s = 1.0 / 255.0;
            let tmin = link.bmin as f32 * s;
            let tmax = link.bmax as f32 * s;
            return Ok((v0.lerp(v1, tmin), v0.lerp(v1, tmax)));
        }
        Ok((v0, v1))
    }

    /// Midpoint of the portal between two polygons
    pub fn edge_mid_point(&self, from: PolyRef, to: PolyRef) -> Result<Vec3> {
        let (left, right) = self.portal_points(from, to)?;
        Ok((left + right) * 0.5)
    }

    /// Finds a polygon corridor from `start_ref` to `end_ref`.
    ///
    /// When the end cannot be reached the corridor leads to the polygon
    /// closest to the end position; callers detect this by comparing the
    /// last polygon with `end_ref`.
    ///
    /// The search always runs from the lower of the two references, so
    /// swapping the endpoints yields the same corridor reversed.
    pub fn find_path(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<PolyRef>> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref) || !self.nav_mesh.is_valid_poly_ref(end_ref)
        {
            return Err(Error::Detour(Status::InvalidParam));
        }
        if !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(Error::Detour(Status::InvalidParam));
        }
        if start_ref == end_ref {
            return Ok(vec![start_ref]);
        }

        if end_ref < start_ref {
            let mut path = self.search_corridor(end_ref, start_ref, end_pos, start_pos, filter)?;
            if path.last() == Some(&start_ref) {
                path.reverse();
                return Ok(path);
            }
        }
        self.search_corridor(start_ref, end_ref, start_pos, end_pos, filter)
    }

    fn search_corridor(
        &mut self,
        start_ref: PolyRef,
        end_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<Vec<PolyRef>> {
        self.node_pool.clear();
        self.open_list.clear();

        let start = self
            .node_pool
            .get_node(start_ref)
            .ok_or(Error::Detour(Status::OutOfMemory))?;
        {
            let node = self.node_pool.node_mut(start);
            node.pos = start_pos;
            node.cost = 0.0;
            node.total = start_pos.distance(end_pos) * H_SCALE;
            node.parent = None;
            node.flags = NodeFlags::OPEN;
        }
        self.open_list.push(&self.node_pool, start);

        let mut last_best = start;
        let mut last_best_cost = self.node_pool.node(start).total;
        let mut out_of_nodes = false;

        while let Some(best) = self.open_list.pop(&self.node_pool) {
            {
                let node = self.node_pool.node_mut(best);
                node.flags.remove(NodeFlags::OPEN);
                node.flags.insert(NodeFlags::CLOSED);
            }

            let (best_ref, best_pos, best_cost, parent) = {
                let node = self.node_pool.node(best);
                (node.id, node.pos, node.cost, node.parent)
            };
            if best_ref == end_ref {
                last_best = best;
                break;
            }

            let parent_ref = parent.map(|p| self.node_pool.node(p).id);
            let (_, best_poly) = self.nav_mesh.tile_and_poly_by_ref(best_ref)?;

            for link in &best_poly.links {
                let neighbour_ref = link.reference;
                if neighbour_ref.is_null() || Some(neighbour_ref) == parent_ref {
                    continue;
                }
                let Ok((_, neighbour_poly)) = self.nav_mesh.tile_and_poly_by_ref(neighbour_ref)
                else {
                    continue;
                };
                if !filter.pass_filter(neighbour_poly.flags) {
                    continue;
                }

                let Some(nidx) = self.node_pool.get_node(neighbour_ref) else {
                    out_of_nodes = true;
                    continue;
                };

                if self.node_pool.node(nidx).flags.is_empty() {
                    let mid = self.edge_mid_point(best_ref, neighbour_ref)?;
                    self.node_pool.node_mut(nidx).pos = mid;
                }
                let neighbour_pos = self.node_pool.node(nidx).pos;

                let (cost, heuristic) = if neighbour_ref == end_ref {
                    let cur_cost = filter.cost(best_pos, neighbour_pos, best_poly.area);
                    let end_cost = filter.cost(neighbour_pos, end_pos, neighbour_poly.area);
                    (best_cost + cur_cost + end_cost, 0.0)
                } else {
                    let cur_cost = filter.cost(best_pos, neighbour_pos, best_poly.area);
                    (
                        best_cost + cur_cost,
                        neighbour_pos.distance(end_pos) * H_SCALE,
                    )
                };
                let total = cost + heuristic;

                let node = self.node_pool.node_mut(nidx);
                if node.flags.intersects(NodeFlags::OPEN | NodeFlags::CLOSED)
                    && total >= node.total
                {
                    continue;
                }

                node.parent = Some(best);
                node.flags.remove(NodeFlags::CLOSED);
                node.flags.insert(NodeFlags::OPEN);
                node.cost = cost;
                node.total = total;
                self.open_list.push(&self.node_pool, nidx);

                if heuristic < last_best_cost {
                    last_best_cost = heuristic;
                    last_best = nidx;
                }
            }
        }

        let path = self.node_pool.path_to(last_best);
        if path.last() != Some(&end_ref) {
            log::debug!(
                "partial corridor of {} polys towards {end_ref}{}",
                path.len(),
                if out_of_nodes { " (node pool exhausted)" } else { "" }
            );
        }
        Ok(path)
    }

    /// String-pulls a corridor into the corner points a straight-line mover
    /// has to pass through.
    pub fn find_straight_path(
        &self,
        start_pos: Vec3,
        end_pos: Vec3,
        path: &[PolyRef],
        max_points: usize,
        options: StraightPathOptions,
    ) -> Result<Vec<StraightPathPoint>> {
        if path.is_empty() || max_points == 0 {
            return Err(Error::Detour(Status::InvalidParam));
        }
        if !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(Error::Detour(Status::InvalidParam));
        }

        let mut out = StraightPathBuilder {
            points: Vec::new(),
            max_points,
        };

        let closest_start = self.closest_point_on_poly_boundary(path[0], start_pos)?;
        let mut closest_end = self.closest_point_on_poly_boundary(path[path.len() - 1], end_pos)?;

        if !out.append(closest_start, StraightPathFlags::START, path[0]) {
            return Ok(out.points);
        }

        let crossings = options.intersects(
            StraightPathOptions::AREA_CROSSINGS | StraightPathOptions::ALL_CROSSINGS,
        );

        if path.len() > 1 {
            let mut portal_apex = closest_start;
            let mut portal_left = portal_apex;
            let mut portal_right = portal_apex;
            let mut apex_index = 0usize;
            let mut left_index = 0usize;
            let mut right_index = 0usize;
            let mut left_poly_ref = path[0];
            let mut right_poly_ref = path[0];

            let mut i = 0usize;
            while i < path.len() {
                let (left, right) = if i + 1 < path.len() {
                    match self.portal_points(path[i], path[i + 1]) {
                        Ok(portal) => portal,
                        Err(_) => {
                            // Corridor is broken; end at the last reachable polygon
                            closest_end = self.closest_point_on_poly_boundary(path[i], end_pos)?;
                            if crossings
                                && !self.append_portals(
                                    &mut out, apex_index, i, closest_end, path, options,
                                )?
                            {
                                return Ok(out.points);
                            }
                            out.append(closest_end, StraightPathFlags::empty(), path[i]);
                            return Ok(out.points);
                        }
                    }
                } else {
                    (closest_end, closest_end)
                };

                // Starting right on the first portal
                if i == 0 {
                    let (d, _) = dist_pt_seg_sqr_2d(portal_apex, left, right);
                    if d < sqr(0.001) {
                        i += 1;
                        continue;
                    }
                }

                let next_ref = path.get(i + 1).copied().unwrap_or(PolyRef::NULL);

                // Right side of the funnel
                if tri_area_2d(portal_apex, portal_right, right) <= 0.0 {
                    if vequal(portal_apex, portal_right)
                        || tri_area_2d(portal_apex, portal_left, right) > 0.0
                    {
                        portal_right = right;
                        right_poly_ref = next_ref;
                        right_index = i;
                    } else {
                        if crossings
                            && !self.append_portals(
                                &mut out, apex_index, left_index, portal_left, path, options,
                            )?
                        {
                            return Ok(out.points);
                        }

                        portal_apex = portal_left;
                        apex_index = left_index;
                        let flags = if left_poly_ref.is_null() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if !out.append(portal_apex, flags, left_poly_ref) {
                            return Ok(out.points);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                // Left side of the funnel
                if tri_area_2d(portal_apex, portal_left, left) >= 0.0 {
                    if vequal(portal_apex, portal_left)
                        || tri_area_2d(portal_apex, portal_right, left) < 0.0
                    {
                        portal_left = left;
                        left_poly_ref = next_ref;
                        left_index = i;
                    } else {
                        if crossings
                            && !self.append_portals(
                                &mut out, apex_index, right_index, portal_right, path, options,
                            )?
                        {
                            return Ok(out.points);
                        }

                        portal_apex = portal_right;
                        apex_index = right_index;
                        let flags = if right_poly_ref.is_null() {
                            StraightPathFlags::END
                        } else {
                            StraightPathFlags::empty()
                        };
                        if !out.append(portal_apex, flags, right_poly_ref) {
                            return Ok(out.points);
                        }

                        portal_left = portal_apex;
                        portal_right = portal_apex;
                        left_index = apex_index;
                        right_index = apex_index;
                        i = apex_index + 1;
                        continue;
                    }
                }

                i += 1;
            }

            if crossings
                && !self.append_portals(
                    &mut out,
                    apex_index,
                    path.len() - 1,
                    closest_end,
                    path,
                    options,
                )?
            {
                return Ok(out.points);
            }
        }

        out.append(closest_end, StraightPathFlags::END, PolyRef::NULL);
        Ok(out.points)
    }

    /// Adds a vertex where the segment from the last point to `end_pos`
    /// crosses each portal between `start_idx` and `end_idx`. Returns false
    /// when the output is full.
    fn append_portals(
        &self,
        out: &mut StraightPathBuilder,
        start_idx: usize,
        end_idx: usize,
        end_pos: Vec3,
        path: &[PolyRef],
        options: StraightPathOptions,
    ) -> Result<bool> {
        let Some(start_pos) = out.points.last().map(|p| p.pos) else {
            return Ok(true);
        };

        for i in start_idx..end_idx {
            let from = path[i];
            let to = path[i + 1];

            if !options.contains(StraightPathOptions::ALL_CROSSINGS) {
                let from_area = self.nav_mesh.poly_area(from)?;
                let to_area = self.nav_mesh.poly_area(to)?;
                if from_area == to_area {
                    continue;
                }
            }

            let Ok((left, right)) = self.portal_points(from, to) else {
                break;
            };
            let Some((_, t)) = intersect_seg_seg_2d(start_pos, end_pos, left, right) else {
                continue;
            };
            if !out.append(left.lerp(right, t), StraightPathFlags::empty(), to) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves from `start_pos` towards `end_pos` while staying on the mesh
    /// surface. Returns the reached position and the polygons visited on the
    /// way; the reached position keeps the start height.
    pub fn move_along_surface(
        &self,
        start_ref: PolyRef,
        start_pos: Vec3,
        end_pos: Vec3,
        filter: &QueryFilter,
    ) -> Result<(Vec3, Vec<PolyRef>)> {
        if !self.nav_mesh.is_valid_poly_ref(start_ref) {
            return Err(Error::Detour(Status::InvalidParam));
        }
        if !start_pos.is_finite() || !end_pos.is_finite() {
            return Err(Error::Detour(Status::InvalidParam));
        }

        let mut pool = NodePool::new(MAX_STACK * 4);
        let mut stack = VecDeque::with_capacity(MAX_STACK);

        let start = pool
            .get_node(start_ref)
            .ok_or(Error::Detour(Status::OutOfMemory))?;
        pool.node_mut(start).flags = NodeFlags::CLOSED;
        stack.push_back(start);

        let mut best_pos = start_pos;
        let mut best_dist = f32::MAX;
        let mut best_node = start;

        let search_pos = start_pos.lerp(end_pos, 0.5);
        let search_rad_sqr = sqr(start_pos.distance(end_pos) / 2.0 + 0.001);

        while let Some(cur) = stack.pop_front() {
            let cur_ref = pool.node(cur).id;
            let (tile, poly) = self.nav_mesh.tile_and_poly_by_ref(cur_ref)?;
            let verts = tile.poly_verts(poly);
            let nv = verts.len();

            if point_in_polygon_2d(end_pos, &verts) {
                best_node = cur;
                best_pos = end_pos;
                break;
            }

            for j in 0..nv {
                let neighbours: Vec<PolyRef> = poly
                    .links
                    .iter()
                    .filter(|l| l.edge as usize == j && !l.reference.is_null())
                    .filter(|l| {
                        self.nav_mesh
                            .tile_and_poly_by_ref(l.reference)
                            .is_ok_and(|(_, p)| filter.pass_filter(p.flags))
                    })
                    .map(|l| l.reference)
                    .collect();

                let vj = verts[j];
                let vi = verts[(j + 1) % nv];

                if neighbours.is_empty() {
                    // Wall edge
                    let (d, t) = dist_pt_seg_sqr_2d(end_pos, vj, vi);
                    if d < best_dist {
                        best_pos = vj.lerp(vi, t);
                        best_dist = d;
                        best_node = cur;
                    }
                    continue;
                }

                for nref in neighbours {
                    let Some(nidx) = pool.get_node(nref) else {
                        continue;
                    };
                    if pool.node(nidx).flags.contains(NodeFlags::CLOSED) {
                        continue;
                    }
                    let (d, _) = dist_pt_seg_sqr_2d(search_pos, vj, vi);
                    if d > search_rad_sqr {
                        continue;
                    }
                    if stack.len() < MAX_STACK {
                        let node = pool.node_mut(nidx);
                        node.parent = Some(cur);
                        node.flags.insert(NodeFlags::CLOSED);
                        stack.push_back(nidx);
                    }
                }
            }
        }

        Ok((
            Vec3::new(best_pos.x, start_pos.y, best_pos.z),
            pool.path_to(best_node),
        ))
    }
}

/// Bounded output of the funnel
struct StraightPathBuilder {
    points: Vec<StraightPathPoint>,
    max_points: usize,
}

impl StraightPathBuilder {
    /// Appends a vertex, merging it with the previous one when they
    /// coincide. Returns false once the path is full or complete.
    fn append(&mut self, pos: Vec3, flags: StraightPathFlags, poly: PolyRef) -> bool {
        if let Some(last) = self.points.last_mut() {
            if vequal(last.pos, pos) {
                last.flags = flags;
                last.poly = poly;
                return !flags.contains(StraightPathFlags::END)
                    && self.points.len() < self.max_points;
            }
        }

        if self.points.len() >= self.max_points {
            return false;
        }
        self.points.push(StraightPathPoint { pos, flags, poly });
        !flags.contains(StraightPathFlags::END) && self.points.len() < self.max_points
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::nav_mesh::tests::quad_tile;
    use crate::{NavMeshParams, PolyFlags};
    use navforge_common::polyline_length;

    /// Row of `n` linked 10x10 tiles along +x
    pub(crate) fn strip_mesh(n: i32) -> NavMesh {
        let mut nav = NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: 10.0,
            tile_height: 10.0,
            max_tiles: 64,
            max_polys: 16,
        })
        .unwrap();
        for x in 0..n {
            nav.add_tile(quad_tile(x, 0, 10.0)).unwrap();
        }
        nav
    }

    /// 2x2 block of tiles with the (1, 1) tile missing, forming an L
    fn l_mesh() -> NavMesh {
        let mut nav = strip_mesh(2);
        nav.add_tile(quad_tile(0, 1, 10.0)).unwrap();
        nav
    }

    fn nearest(nav: &NavMesh, p: Vec3) -> PolyRef {
        nav.find_nearest_poly(p, Vec3::new(1.0, 2.0, 1.0), &QueryFilter::default())
            .unwrap()
            .0
    }

    #[test]
    fn test_find_path_across_tiles() {
        let nav = strip_mesh(3);
        let mut query = NavMeshQuery::new(&nav);
        let start = Vec3::new(1.0, 0.0, 5.0);
        let end = Vec3::new(28.0, 0.0, 5.0);
        let (s, e) = (nearest(&nav, start), nearest(&nav, end));

        let path = query
            .find_path(s, e, start, end, &QueryFilter::default())
            .unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], s);
        assert_eq!(path[2], e);
    }

    #[test]
    fn test_find_path_reversed_matches() {
        let mut nav = l_mesh();
        nav.add_tile(quad_tile(1, 1, 10.0)).unwrap();
        let a = Vec3::new(2.0, 0.0, 2.0);
        let b = Vec3::new(18.0, 0.0, 18.0);
        let (s, e) = (nearest(&nav, a), nearest(&nav, b));

        let mut query = NavMeshQuery::new(&nav);
        let forward = query.find_path(s, e, a, b, &QueryFilter::default()).unwrap();
        let mut backward = query.find_path(e, s, b, a, &QueryFilter::default()).unwrap();
        backward.reverse();
        assert_eq!(forward.len(), 3);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_find_path_same_poly() {
        let nav = strip_mesh(1);
        let mut query = NavMeshQuery::new(&nav);
        let p = nearest(&nav, Vec3::new(5.0, 0.0, 5.0));
        let path = query
            .find_path(p, p, Vec3::ONE, Vec3::splat(2.0), &QueryFilter::default())
            .unwrap();
        assert_eq!(path, vec![p]);
    }

    #[test]
    fn test_find_path_partial_when_blocked() {
        let mut nav = strip_mesh(3);
        let middle = nearest(&nav, Vec3::new(15.0, 0.0, 5.0));
        nav.set_poly_flags(middle, PolyFlags::DISABLED).unwrap();
        let filter = QueryFilter::default().with_exclude_flags(PolyFlags::DISABLED);

        let start = Vec3::new(1.0, 0.0, 5.0);
        let end = Vec3::new(28.0, 0.0, 5.0);
        let (s, e) = (nearest(&nav, start), nearest(&nav, end));
        let mut query = NavMeshQuery::new(&nav);
        let path = query.find_path(s, e, start, end, &filter).unwrap();
        assert_eq!(path, vec![s]);
    }

    #[test]
    fn test_find_path_invalid_ref() {
        let nav = strip_mesh(1);
        let mut query = NavMeshQuery::new(&nav);
        let p = nearest(&nav, Vec3::new(5.0, 0.0, 5.0));
        assert!(query
            .find_path(p, PolyRef::NULL, Vec3::ZERO, Vec3::ZERO, &QueryFilter::default())
            .is_err());
    }

    #[test]
    fn test_straight_path_in_open_strip() {
        let nav = strip_mesh(3);
        let mut query = NavMeshQuery::new(&nav);
        let start = Vec3::new(1.0, 0.0, 5.0);
        let end = Vec3::new(28.0, 0.0, 5.0);
        let (s, e) = (nearest(&nav, start), nearest(&nav, end));
        let path = query
            .find_path(s, e, start, end, &QueryFilter::default())
            .unwrap();

        let straight = query
            .find_straight_path(start, end, &path, 16, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(straight.len(), 2);
        assert!(straight[0].flags.contains(StraightPathFlags::START));
        assert!(straight[1].flags.contains(StraightPathFlags::END));
        assert!(straight[1].poly.is_null());
        assert!((straight[1].pos - end).length() < 1e-4);

        let crossings = query
            .find_straight_path(start, end, &path, 16, StraightPathOptions::ALL_CROSSINGS)
            .unwrap();
        assert_eq!(crossings.len(), 4);
        assert!((crossings[1].pos.x - 10.0).abs() < 1e-4);
        assert!((crossings[2].pos.x - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_straight_path_turns_corner() {
        let nav = l_mesh();
        let mut query = NavMeshQuery::new(&nav);
        let start = Vec3::new(18.0, 0.0, 2.0);
        let end = Vec3::new(8.0, 0.0, 18.0);
        let (s, e) = (nearest(&nav, start), nearest(&nav, end));
        let path = query
            .find_path(s, e, start, end, &QueryFilter::default())
            .unwrap();
        assert_eq!(path.len(), 3);

        let straight = query
            .find_straight_path(start, end, &path, 16, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(straight.len(), 3);
        assert!((straight[1].pos - Vec3::new(10.0, 0.0, 10.0)).length() < 1e-3);

        let points: Vec<Vec3> = straight.iter().map(|p| p.pos).collect();
        assert!(polyline_length(&points) >= start.distance(end));
    }

    #[test]
    fn test_straight_path_respects_max_points() {
        let nav = l_mesh();
        let mut query = NavMeshQuery::new(&nav);
        let start = Vec3::new(18.0, 0.0, 2.0);
        let end = Vec3::new(8.0, 0.0, 18.0);
        let (s, e) = (nearest(&nav, start), nearest(&nav, end));
        let path = query
            .find_path(s, e, start, end, &QueryFilter::default())
            .unwrap();
        let straight = query
            .find_straight_path(start, end, &path, 2, StraightPathOptions::empty())
            .unwrap();
        assert_eq!(straight.len(), 2);
    }

    #[test]
    fn test_move_along_surface_stops_at_wall() {
        let nav = strip_mesh(1);
        let query = NavMeshQuery::new(&nav);
        let start = Vec3::new(5.0, 0.0, 5.0);
        let s = nearest(&nav, start);

        let (pos, visited) = query
            .move_along_surface(s, start, Vec3::new(15.0, 0.0, 5.0), &QueryFilter::default())
            .unwrap();
        assert_eq!(visited, vec![s]);
        assert!((pos - Vec3::new(10.0, 0.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_move_along_surface_crosses_tiles() {
        let nav = strip_mesh(2);
        let query = NavMeshQuery::new(&nav);
        let start = Vec3::new(8.0, 0.0, 5.0);
        let end = Vec3::new(12.0, 0.0, 5.0);
        let s = nearest(&nav, start);

        let (pos, visited) = query
            .move_along_surface(s, start, end, &QueryFilter::default())
            .unwrap();
        assert_eq!(visited.len(), 2);
        assert_eq!(visited[1], nearest(&nav, end));
        assert!((pos - end).length() < 1e-4);
    }

    #[test]
    fn test_closest_point_on_boundary() {
        let nav = strip_mesh(1);
        let query = NavMeshQuery::new(&nav);
        let p = nearest(&nav, Vec3::new(5.0, 0.0, 5.0));
        let inside = Vec3::new(3.0, 1.0, 4.0);
        assert_eq!(query.closest_point_on_poly_boundary(p, inside).unwrap(), inside);
        let outside = query
            .closest_point_on_poly_boundary(p, Vec3::new(5.0, 0.0, -4.0))
            .unwrap();
        assert!((outside - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-4);
    }
}
