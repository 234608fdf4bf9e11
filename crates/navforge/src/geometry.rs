//! Triangle sets and geometry extraction from a scene
//!
//! Extraction walks a subtree depth first, composes transforms, fans
//! polygons into triangles and converts every vertex into navigation
//! space. Triangles are kept in an ordered set so identical triangles from
//! different sources collapse and every build sees them in the same order.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use glam::{Mat4, Vec3};
use navforge_common::Aabb;

use crate::coords::{to_nav, transform_to_nav};
use crate::scene::{GeometrySource, NodeId};

/// One triangle, compared and hashed by the bit pattern of its vertices
#[derive(Debug, Clone, Copy)]
pub struct TriVertGroup {
    pub a: Vec3,
    pub b: Vec3,
    pub c: Vec3,
}

impl TriVertGroup {
    pub fn new(a: Vec3, b: Vec3, c: Vec3) -> Self {
        Self { a, b, c }
    }

    fn key(&self) -> [u32; 9] {
        let mut k = [0u32; 9];
        for (i, v) in [self.a, self.b, self.c].iter().enumerate() {
            k[i * 3] = v.x.to_bits();
            k[i * 3 + 1] = v.y.to_bits();
            k[i * 3 + 2] = v.z.to_bits();
        }
        k
    }

    pub fn verts(&self) -> [Vec3; 3] {
        [self.a, self.b, self.c]
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_points(&[self.a, self.b, self.c])
    }
}

impl PartialEq for TriVertGroup {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for TriVertGroup {}

impl PartialOrd for TriVertGroup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TriVertGroup {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for TriVertGroup {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

/// Ordered, deduplicated triangles in navigation space with their bounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriangleSet {
    tris: BTreeSet<TriVertGroup>,
}

impl TriangleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a triangle, returning false if an identical one is present
    pub fn insert(&mut self, tri: TriVertGroup) -> bool {
        self.tris.insert(tri)
    }

    pub fn extend(&mut self, other: &TriangleSet) {
        self.tris.extend(other.tris.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.tris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tris.is_empty()
    }

    pub fn contains(&self, tri: &TriVertGroup) -> bool {
        self.tris.contains(tri)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TriVertGroup> + '_ {
        self.tris.iter()
    }

    /// Bounds of every vertex, empty for an empty set
    pub fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::EMPTY;
        for t in &self.tris {
            bounds.union(&t.bounds());
        }
        bounds
    }

    /// Triangles present in exactly one of the two sets
    pub fn symmetric_difference<'a>(
        &'a self,
        other: &'a TriangleSet,
    ) -> impl Iterator<Item = &'a TriVertGroup> + 'a {
        self.tris.symmetric_difference(&other.tris)
    }

    /// Triangles whose footprint overlaps `bounds` on the xz-plane
    pub fn overlapping_xz(&self, bounds: &Aabb) -> TriangleSet {
        TriangleSet {
            tris: self
                .tris
                .iter()
                .filter(|t| t.bounds().overlaps_xz(bounds))
                .copied()
                .collect(),
        }
    }

    /// Shared vertex and index arrays for the voxelizer
    pub fn to_arrays(&self) -> (Vec<Vec3>, Vec<[u32; 3]>) {
        let mut lookup: BTreeMap<[u32; 3], u32> = BTreeMap::new();
        let mut verts = Vec::new();
        let mut tris = Vec::with_capacity(self.tris.len());
        for t in &self.tris {
            let mut idx = [0u32; 3];
            for (k, v) in t.verts().into_iter().enumerate() {
                let key = [v.x.to_bits(), v.y.to_bits(), v.z.to_bits()];
                idx[k] = *lookup.entry(key).or_insert_with(|| {
                    verts.push(v);
                    (verts.len() - 1) as u32
                });
            }
            tris.push(idx);
        }
        (verts, tris)
    }
}

impl FromIterator<TriVertGroup> for TriangleSet {
    fn from_iter<I: IntoIterator<Item = TriVertGroup>>(iter: I) -> Self {
        Self {
            tris: iter.into_iter().collect(),
        }
    }
}

/// Fans a scene-space polygon into triangles in navigation space
pub fn add_polygon(set: &mut TriangleSet, transform: &Mat4, verts: &[Vec3]) {
    if verts.len() < 3 {
        return;
    }
    let nav: Vec<Vec3> = verts.iter().map(|&v| transform_to_nav(transform, v)).collect();
    for i in 1..nav.len() - 1 {
        set.insert(TriVertGroup::new(nav[0], nav[i], nav[i + 1]));
    }
}

/// Which polygons an extraction collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GeometryKind {
    Visual,
    Collision(u32),
}

fn transform_of(source: &impl GeometrySource, node: NodeId, space: Option<NodeId>) -> Option<Mat4> {
    let world = source.world_transform(node)?;
    match space {
        Some(target) => Some(source.world_transform(target)?.inverse() * world),
        None => Some(world),
    }
}

fn extract(
    source: &impl GeometrySource,
    node: NodeId,
    transform: Mat4,
    kind: GeometryKind,
    set: &mut TriangleSet,
    bounds: &mut Aabb,
) {
    if source.is_hidden(node) {
        return;
    }

    let before = set.len();
    match kind {
        GeometryKind::Visual => {
            for poly in source.visual_polygons(node) {
                add_polygon(set, &transform, poly);
                grow(bounds, &transform, poly);
            }
        }
        GeometryKind::Collision(mask) => {
            for poly in source.collision_polygons(node) {
                if poly.mask & mask != 0 {
                    add_polygon(set, &transform, &poly.verts);
                    grow(bounds, &transform, &poly.verts);
                }
            }
        }
    }
    if set.len() > before {
        log::trace!("node {node:?} contributed {} triangles", set.len() - before);
    }

    for &child in source.children(node) {
        if let Some(local) = source.local_transform(child) {
            extract(source, child, transform * local, kind, set, bounds);
        }
    }
}

fn grow(bounds: &mut Aabb, transform: &Mat4, verts: &[Vec3]) {
    for &v in verts {
        bounds.expand(to_nav(transform.transform_point3(v)));
    }
}

/// Collects the visible triangles under `root`, expressed relative to
/// `space` (the scene root when `None`), into `set`. `bounds` grows to
/// cover every extracted vertex.
pub fn extract_geometry(
    source: &impl GeometrySource,
    root: NodeId,
    space: Option<NodeId>,
    set: &mut TriangleSet,
    bounds: &mut Aabb,
) {
    if let Some(transform) = transform_of(source, root, space) {
        extract(source, root, transform, GeometryKind::Visual, set, bounds);
    }
}

/// Collects the collision triangles under `root` whose collide mask shares
/// a bit with `mask`
pub fn extract_collision_geometry(
    source: &impl GeometrySource,
    root: NodeId,
    mask: u32,
    space: Option<NodeId>,
    set: &mut TriangleSet,
    bounds: &mut Aabb,
) {
    if let Some(transform) = transform_of(source, root, space) {
        extract(source, root, transform, GeometryKind::Collision(mask), set, bounds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneGraph;

    fn quad() -> Vec<Vec3> {
        vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_identical_triangles_collapse() {
        let mut set = TriangleSet::new();
        let t = TriVertGroup::new(Vec3::ZERO, Vec3::X, Vec3::Z);
        assert!(set.insert(t));
        assert!(!set.insert(TriVertGroup::new(Vec3::ZERO, Vec3::X, Vec3::Z)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_polygon_fan_and_axis_swap() {
        let mut set = TriangleSet::new();
        add_polygon(&mut set, &Mat4::IDENTITY, &quad());
        assert_eq!(set.len(), 2);
        let b = set.bounds();
        assert_eq!(b.min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(b.max, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_extract_skips_hidden_and_composes() {
        let mut scene = SceneGraph::new();
        let a = scene.add_node(scene.root(), "a").unwrap();
        let b = scene.add_node(a, "b").unwrap();
        let hidden = scene.add_node(a, "hidden").unwrap();
        scene.set_pos(a, Vec3::new(10.0, 0.0, 0.0)).unwrap();
        scene.add_polygon(b, &quad()).unwrap();
        scene.add_polygon(hidden, &quad()).unwrap();
        scene.set_pos(hidden, Vec3::new(0.0, 0.0, 5.0)).unwrap();
        scene.set_hidden(hidden, true).unwrap();

        let mut set = TriangleSet::new();
        let mut bounds = Aabb::EMPTY;
        extract_geometry(&scene, scene.root(), None, &mut set, &mut bounds);
        assert_eq!(set.len(), 2);
        assert_eq!(bounds.min.x, 10.0);
        assert_eq!(bounds.max.y, 0.0);

        // Relative to `a` the translation cancels out
        let mut local = TriangleSet::new();
        let mut local_bounds = Aabb::EMPTY;
        extract_geometry(&scene, b, Some(a), &mut local, &mut local_bounds);
        assert_eq!(local.bounds().min.x, 0.0);
    }

    #[test]
    fn test_collision_mask_filter() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        scene.add_collision_polygon(root, &quad(), 0b01).unwrap();
        let shifted: Vec<Vec3> = quad().iter().map(|v| *v + Vec3::Z).collect();
        scene.add_collision_polygon(root, &shifted, 0b10).unwrap();

        let mut set = TriangleSet::new();
        let mut bounds = Aabb::EMPTY;
        extract_collision_geometry(&scene, root, 0b10, None, &mut set, &mut bounds);
        assert_eq!(set.len(), 2);
        assert_eq!(bounds.min.y, 1.0);
    }

    #[test]
    fn test_symmetric_difference() {
        let t1 = TriVertGroup::new(Vec3::ZERO, Vec3::X, Vec3::Z);
        let t2 = TriVertGroup::new(Vec3::ONE, Vec3::X, Vec3::Z);
        let t3 = TriVertGroup::new(Vec3::Y, Vec3::X, Vec3::Z);
        let old: TriangleSet = [t1, t2].into_iter().collect();
        let new: TriangleSet = [t2, t3].into_iter().collect();
        let changed: Vec<_> = old.symmetric_difference(&new).copied().collect();
        assert_eq!(changed.len(), 2);
        assert!(changed.contains(&t1) && changed.contains(&t3));
    }

    #[test]
    fn test_to_arrays_shares_vertices() {
        let mut set = TriangleSet::new();
        add_polygon(&mut set, &Mat4::IDENTITY, &quad());
        let (verts, tris) = set.to_arrays();
        assert_eq!(verts.len(), 4);
        assert_eq!(tris.len(), 2);
    }
}
