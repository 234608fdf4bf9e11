//! Minimal scene graph supplying geometry to the navigation mesh
//!
//! Nodes live in a [`SlotMap`], so a [`NodeId`] held by a navigation mesh
//! is a weak key: it never keeps a node alive and simply stops resolving
//! once the node is removed.

use glam::{Mat4, Vec3};
use navforge_common::{Error, Result};
use slotmap::SlotMap;

use crate::obstacle::ObstacleShape;

slotmap::new_key_type! {
    /// Handle of a scene node
    pub struct NodeId;
}

/// A polygon tagged with the collide mask of its solid
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionPolygon {
    pub verts: Vec<Vec3>,
    pub mask: u32,
}

/// Read access to a scene hierarchy, as needed for geometry extraction
pub trait GeometrySource {
    /// Child nodes in traversal order
    fn children(&self, node: NodeId) -> &[NodeId];

    /// Transform relative to the parent node
    fn local_transform(&self, node: NodeId) -> Option<Mat4>;

    /// Transform relative to the scene root
    fn world_transform(&self, node: NodeId) -> Option<Mat4>;

    /// Hidden nodes and their subtrees contribute no geometry
    fn is_hidden(&self, node: NodeId) -> bool;

    /// Visible polygons in node-local space
    fn visual_polygons(&self, node: NodeId) -> &[Vec<Vec3>];

    /// Collision polygons in node-local space
    fn collision_polygons(&self, node: NodeId) -> &[CollisionPolygon];

    /// Obstacle shape attached to the node
    fn obstacle_shape(&self, node: NodeId) -> Option<ObstacleShape>;
}

#[derive(Debug, Clone)]
struct SceneNode {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    transform: Mat4,
    hidden: bool,
    polygons: Vec<Vec<Vec3>>,
    collision: Vec<CollisionPolygon>,
    obstacle: Option<ObstacleShape>,
}

impl SceneNode {
    fn new(name: &str, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            transform: Mat4::IDENTITY,
            hidden: false,
            polygons: Vec::new(),
            collision: Vec::new(),
            obstacle: None,
        }
    }
}

/// Tree of transformed nodes carrying polygons and obstacle shapes
#[derive(Debug, Clone)]
pub struct SceneGraph {
    nodes: SlotMap<NodeId, SceneNode>,
    root: NodeId,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    /// Creates a graph holding only the root node
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(SceneNode::new("root", None));
        Self { nodes, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut SceneNode> {
        self.nodes
            .get_mut(node)
            .ok_or_else(|| Error::InvalidMesh(format!("unknown scene node {node:?}")))
    }

    /// Attaches a new empty node under `parent`
    pub fn add_node(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if !self.nodes.contains_key(parent) {
            return Err(Error::InvalidMesh(format!("unknown parent node {parent:?}")));
        }
        let id = self.nodes.insert(SceneNode::new(name, Some(parent)));
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Removes `node` and its whole subtree. The root cannot be removed.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        if node == self.root {
            return Err(Error::InvalidMesh("the root node cannot be removed".into()));
        }
        let parent = self.node_mut(node)?.parent;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|&c| c != node);
        }

        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if let Some(removed) = self.nodes.remove(id) {
                stack.extend(removed.children);
            }
        }
        Ok(())
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).map(|n| n.name.as_str())
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    pub fn set_transform(&mut self, node: NodeId, transform: Mat4) -> Result<()> {
        self.node_mut(node)?.transform = transform;
        Ok(())
    }

    /// Sets the local transform to a translation
    pub fn set_pos(&mut self, node: NodeId, pos: Vec3) -> Result<()> {
        self.set_transform(node, Mat4::from_translation(pos))
    }

    pub fn set_hidden(&mut self, node: NodeId, hidden: bool) -> Result<()> {
        self.node_mut(node)?.hidden = hidden;
        Ok(())
    }

    /// Adds a visible polygon with at least three vertices
    pub fn add_polygon(&mut self, node: NodeId, verts: &[Vec3]) -> Result<()> {
        if verts.len() < 3 {
            return Err(Error::InvalidMesh(format!(
                "polygon needs at least 3 vertices, got {}",
                verts.len()
            )));
        }
        self.node_mut(node)?.polygons.push(verts.to_vec());
        Ok(())
    }

    /// Adds a collision polygon with at least three vertices
    pub fn add_collision_polygon(&mut self, node: NodeId, verts: &[Vec3], mask: u32) -> Result<()> {
        if verts.len() < 3 {
            return Err(Error::InvalidMesh(format!(
                "polygon needs at least 3 vertices, got {}",
                verts.len()
            )));
        }
        self.node_mut(node)?.collision.push(CollisionPolygon {
            verts: verts.to_vec(),
            mask,
        });
        Ok(())
    }

    /// Drops every visible and collision polygon of `node`
    pub fn clear_geometry(&mut self, node: NodeId) -> Result<()> {
        let n = self.node_mut(node)?;
        n.polygons.clear();
        n.collision.clear();
        Ok(())
    }

    pub fn set_obstacle(&mut self, node: NodeId, shape: Option<ObstacleShape>) -> Result<()> {
        self.node_mut(node)?.obstacle = shape;
        Ok(())
    }
}

impl GeometrySource for SceneGraph {
    fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes.get(node).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    fn local_transform(&self, node: NodeId) -> Option<Mat4> {
        self.nodes.get(node).map(|n| n.transform)
    }

    fn world_transform(&self, node: NodeId) -> Option<Mat4> {
        let mut n = self.nodes.get(node)?;
        let mut transform = n.transform;
        while let Some(parent) = n.parent {
            n = self.nodes.get(parent)?;
            transform = n.transform * transform;
        }
        Some(transform)
    }

    fn is_hidden(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(|n| n.hidden)
    }

    fn visual_polygons(&self, node: NodeId) -> &[Vec<Vec3>] {
        self.nodes.get(node).map(|n| n.polygons.as_slice()).unwrap_or_default()
    }

    fn collision_polygons(&self, node: NodeId) -> &[CollisionPolygon] {
        self.nodes.get(node).map(|n| n.collision.as_slice()).unwrap_or_default()
    }

    fn obstacle_shape(&self, node: NodeId) -> Option<ObstacleShape> {
        self.nodes.get(node).and_then(|n| n.obstacle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_transform_composes_parents() {
        let mut scene = SceneGraph::new();
        let a = scene.add_node(scene.root(), "a").unwrap();
        let b = scene.add_node(a, "b").unwrap();
        scene.set_pos(a, Vec3::new(1.0, 0.0, 0.0)).unwrap();
        scene.set_pos(b, Vec3::new(0.0, 2.0, 0.0)).unwrap();

        let world = scene.world_transform(b).unwrap();
        assert_eq!(world.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(scene.parent(b), Some(a));
        assert_eq!(scene.name(b), Some("b"));
    }

    #[test]
    fn test_remove_subtree_invalidates_keys() {
        let mut scene = SceneGraph::new();
        let a = scene.add_node(scene.root(), "a").unwrap();
        let b = scene.add_node(a, "b").unwrap();
        scene.remove_node(a).unwrap();

        assert!(!scene.contains(a));
        assert!(!scene.contains(b));
        assert!(scene.children(scene.root()).is_empty());
        assert!(scene.world_transform(b).is_none());
        assert!(scene.remove_node(scene.root()).is_err());
    }

    #[test]
    fn test_polygon_validation() {
        let mut scene = SceneGraph::new();
        let root = scene.root();
        assert!(scene.add_polygon(root, &[Vec3::ZERO, Vec3::X]).is_err());
        scene
            .add_polygon(root, &[Vec3::ZERO, Vec3::X, Vec3::Y])
            .unwrap();
        assert_eq!(scene.visual_polygons(root).len(), 1);
        scene.clear_geometry(root).unwrap();
        assert!(scene.visual_polygons(root).is_empty());
    }
}
