//! Incremental rebuilds driven by scene changes
//!
//! An update re-extracts the input triangles and compares them with the
//! set the mesh was last built from. Only tiles near a changed triangle are
//! rebuilt: the tiles under the xz footprint of each changed triangle plus
//! their eight neighbours, clipped to the tile grid. Obstacle nodes are compared by
//! their described shape, so a moved obstacle is removed and added again.

use std::collections::BTreeSet;

use glam::Vec3;
use navforge_common::Result;

use crate::geometry::TriVertGroup;
use crate::nav_mesh::NavMesh;
use crate::scene::GeometrySource;

/// Distance to a tile border under which a vertex also claims the
/// neighbouring tile
pub const TILE_EPSILON: f32 = 1e-3;

/// What an update changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateStats {
    /// Triangles added or removed since the previous update
    pub changed_triangles: usize,
    /// Distinct tile coordinates rebuilt
    pub rebuilt_tiles: usize,
    pub obstacles_added: usize,
    pub obstacles_removed: usize,
}

impl UpdateStats {
    /// True when the update found nothing to do
    pub fn is_empty(&self) -> bool {
        self.changed_triangles == 0
            && self.rebuilt_tiles == 0
            && self.obstacles_added == 0
            && self.obstacles_removed == 0
    }
}

/// Tile coordinates along one axis claimed by a coordinate at `offset`
/// from the grid origin
fn claimed_range(offset: f32, tile_size: f32) -> (i32, i32) {
    let f = offset / tile_size;
    let t = f.floor();
    let frac = (f - t) * tile_size;
    let t = t as i32;
    let lo = if frac < TILE_EPSILON { t - 1 } else { t };
    let hi = if tile_size - frac < TILE_EPSILON { t + 1 } else { t };
    (lo, hi)
}

/// Tiles overlapped by the xz footprint of any changed triangle. Tiles more
/// than one step outside the `tw` x `th` grid are left out.
pub(crate) fn affected_tiles(
    changed: &[TriVertGroup],
    origin: Vec3,
    tile_size: f32,
    (tw, th): (i32, i32),
) -> BTreeSet<(i32, i32)> {
    let mut tiles = BTreeSet::new();
    for tri in changed {
        let b = tri.bounds();
        let (x0, _) = claimed_range(b.min.x - origin.x, tile_size);
        let (_, x1) = claimed_range(b.max.x - origin.x, tile_size);
        let (z0, _) = claimed_range(b.min.z - origin.z, tile_size);
        let (_, z1) = claimed_range(b.max.z - origin.z, tile_size);
        for tz in z0.max(-1)..=z1.min(th) {
            for tx in x0.max(-1)..=x1.min(tw) {
                tiles.insert((tx, tz));
            }
        }
    }
    tiles
}

/// Grows `tiles` by their Moore neighbourhood and clips to a `tw` x `th`
/// grid
pub(crate) fn regeneration_tiles(
    tiles: &BTreeSet<(i32, i32)>,
    tw: i32,
    th: i32,
) -> BTreeSet<(i32, i32)> {
    let mut out = BTreeSet::new();
    for &(tx, ty) in tiles {
        for dy in -1..=1 {
            for dx in -1..=1 {
                let (x, y) = (tx + dx, ty + dy);
                if (0..tw).contains(&x) && (0..th).contains(&y) {
                    out.insert((x, y));
                }
            }
        }
    }
    out
}

impl NavMesh {
    /// Rebuilds the tiles affected by scene changes since the last update
    /// and applies obstacle changes.
    ///
    /// On error the previous triangle snapshot is kept, so the next update
    /// retries the same changes.
    pub fn update(&mut self, scene: &impl GeometrySource) -> Result<UpdateStats> {
        let current = self.collect_triangles(scene);
        let changed: Vec<TriVertGroup> = self
            .last_triangles()
            .symmetric_difference(&current)
            .copied()
            .collect();

        let (tw, th) = self.params().grid_size();
        let affected = affected_tiles(
            &changed,
            self.params().orig_bound_min,
            self.params().tile_cell_size(),
            (tw, th),
        );
        let regen = regeneration_tiles(&affected, tw, th);
        if !changed.is_empty() {
            log::debug!(
                "{} changed triangles affect {} tiles, rebuilding {}",
                changed.len(),
                affected.len(),
                regen.len()
            );
        }

        for &(tx, ty) in &regen {
            self.rebuild_tile_layers(tx, ty, &current);
        }

        let mut sync = self.sync_obstacles(scene)?;
        self.drain_obstacles_for(&mut sync)?;

        for &(tx, ty) in &regen {
            self.build_tiles_at(tx, ty);
        }

        let mut rebuilt = regen;
        rebuilt.extend(sync.touched.iter().copied());

        let stats = UpdateStats {
            changed_triangles: changed.len(),
            rebuilt_tiles: rebuilt.len(),
            obstacles_added: sync.added,
            obstacles_removed: sync.removed,
        };
        self.set_last_triangles(current);

        if stats.is_empty() {
            log::debug!("navigation mesh up to date");
        } else {
            log::info!(
                "updated navigation mesh: {} changed triangles, {} tiles rebuilt, {} obstacles added, {} removed",
                stats.changed_triangles,
                stats.rebuilt_tiles,
                stats.obstacles_added,
                stats.obstacles_removed
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri_at(x: f32, z: f32) -> TriVertGroup {
        TriVertGroup::new(
            Vec3::new(x, 0.0, z),
            Vec3::new(x + 0.1, 0.0, z),
            Vec3::new(x, 0.0, z + 0.1),
        )
    }

    #[test]
    fn test_affected_tiles_interior() {
        let tiles = affected_tiles(&[tri_at(15.0, 5.0)], Vec3::ZERO, 10.0, (3, 3));
        assert_eq!(tiles.into_iter().collect::<Vec<_>>(), vec![(1, 0)]);
    }

    #[test]
    fn test_border_vertex_claims_both_tiles() {
        let tiles = affected_tiles(&[tri_at(10.0, 5.0)], Vec3::ZERO, 10.0, (3, 3));
        assert!(tiles.contains(&(0, 0)));
        assert!(tiles.contains(&(1, 0)));
    }

    #[test]
    fn test_large_triangle_claims_every_tile_under_it() {
        let tri = TriVertGroup::new(
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(69.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 69.0),
        );
        let tiles = affected_tiles(&[tri], Vec3::ZERO, 10.0, (7, 7));
        assert_eq!(tiles.len(), 49);
        assert!(tiles.contains(&(3, 3)));
    }

    #[test]
    fn test_huge_triangle_is_clipped_near_grid() {
        let tri = TriVertGroup::new(
            Vec3::new(-1e6, 0.0, -1e6),
            Vec3::new(1e6, 0.0, -1e6),
            Vec3::new(0.0, 0.0, 1e6),
        );
        let tiles = affected_tiles(&[tri], Vec3::ZERO, 10.0, (2, 2));
        assert_eq!(tiles.len(), 16);
        assert_eq!(regeneration_tiles(&tiles, 2, 2).len(), 4);
    }

    #[test]
    fn test_regeneration_is_clipped_moore_block() {
        let mut tiles = BTreeSet::new();
        tiles.insert((2, 2));
        assert_eq!(regeneration_tiles(&tiles, 5, 5).len(), 9);

        let mut corner = BTreeSet::new();
        corner.insert((0, 0));
        let regen = regeneration_tiles(&corner, 5, 5);
        assert_eq!(
            regen.into_iter().collect::<Vec<_>>(),
            vec![(0, 0), (0, 1), (1, 0), (1, 1)]
        );
    }

    #[test]
    fn test_out_of_grid_changes_are_dropped() {
        let tiles = affected_tiles(&[tri_at(-50.0, -50.0)], Vec3::ZERO, 10.0, (3, 3));
        assert!(regeneration_tiles(&tiles, 3, 3).is_empty());
    }
}
