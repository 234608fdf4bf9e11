//! Node pool and open list for the corridor search

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use bitflags::bitflags;
use navforge_common::Vec3;

use crate::PolyRef;

bitflags! {
    /// Search state of a node
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct NodeFlags: u8 {
        const OPEN = 0x01;
        const CLOSED = 0x02;
    }
}

/// Index of a node in the pool
pub(crate) type NodeIndex = usize;

/// Search node of one polygon
#[derive(Debug, Clone)]
pub(crate) struct Node {
    /// Entry point into the polygon
    pub pos: Vec3,
    /// Cost from the start
    pub cost: f32,
    /// Cost plus heuristic
    pub total: f32,
    pub parent: Option<NodeIndex>,
    pub flags: NodeFlags,
    pub id: PolyRef,
}

/// Bounded set of search nodes keyed by polygon reference
#[derive(Debug)]
pub(crate) struct NodePool {
    nodes: Vec<Node>,
    lookup: HashMap<PolyRef, NodeIndex>,
    max_nodes: usize,
}

impl NodePool {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(max_nodes.min(1024)),
            lookup: HashMap::new(),
            max_nodes,
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.lookup.clear();
    }

    /// Returns the node for `id`, allocating it if needed. `None` when the
    /// pool is exhausted.
    pub fn get_node(&mut self, id: PolyRef) -> Option<NodeIndex> {
        if let Some(&idx) = self.lookup.get(&id) {
            return Some(idx);
        }
        if self.nodes.len() >= self.max_nodes {
            return None;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            pos: Vec3::ZERO,
            cost: 0.0,
            total: 0.0,
            parent: None,
            flags: NodeFlags::empty(),
            id,
        });
        self.lookup.insert(id, idx);
        Some(idx)
    }

    pub fn node(&self, idx: NodeIndex) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIndex) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Walks parent links from `idx` back to the start node and returns
    /// the polygons in start-to-`idx` order
    pub fn path_to(&self, idx: NodeIndex) -> Vec<PolyRef> {
        let mut path = Vec::new();
        let mut cur = Some(idx);
        while let Some(i) = cur {
            path.push(self.nodes[i].id);
            cur = self.nodes[i].parent;
        }
        path.reverse();
        path
    }
}

#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    total: f32,
    id: PolyRef,
    idx: NodeIndex,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // Reversed so the heap pops the cheapest node first, ties going to
    // the lowest polygon reference
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .total
            .total_cmp(&self.total)
            .then_with(|| other.id.cmp(&self.id))
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

/// Open list ordered by node total cost. Re-pushing a node with a lower
/// total leaves a stale entry behind, which `pop` skips.
#[derive(Debug, Default)]
pub(crate) struct NodeQueue {
    heap: BinaryHeap<QueueEntry>,
}

impl NodeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn push(&mut self, pool: &NodePool, idx: NodeIndex) {
        let node = pool.node(idx);
        self.heap.push(QueueEntry {
            total: node.total,
            id: node.id,
            idx,
        });
    }

    pub fn pop(&mut self, pool: &NodePool) -> Option<NodeIndex> {
        while let Some(entry) = self.heap.pop() {
            let node = pool.node(entry.idx);
            if node.flags.contains(NodeFlags::OPEN) && node.total == entry.total {
                return Some(entry.idx);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_pool() {
        let mut pool = NodePool::new(2);
        let a = pool.get_node(PolyRef::new(1)).unwrap();
        assert_eq!(pool.get_node(PolyRef::new(1)), Some(a));
        let b = pool.get_node(PolyRef::new(2)).unwrap();
        assert_ne!(a, b);
        assert!(pool.get_node(PolyRef::new(3)).is_none());
        assert_eq!(pool.get_node(PolyRef::new(2)), Some(b));

        pool.node_mut(b).parent = Some(a);
        assert_eq!(pool.path_to(b), vec![PolyRef::new(1), PolyRef::new(2)]);
    }

    #[test]
    fn test_node_queue_ties_pop_lowest_ref() {
        let mut pool = NodePool::new(8);
        let mut queue = NodeQueue::new();
        for id in [9, 4, 6] {
            let idx = pool.get_node(PolyRef::new(id)).unwrap();
            let node = pool.node_mut(idx);
            node.total = 2.0;
            node.flags = NodeFlags::OPEN;
            queue.push(&pool, idx);
        }
        let first = queue.pop(&pool).unwrap();
        assert_eq!(pool.node(first).id, PolyRef::new(4));
    }

    #[test]
    fn test_node_queue_order_and_stale_entries() {
        let mut pool = NodePool::new(8);
        let mut queue = NodeQueue::new();
        for (id, total) in [(1, 5.0), (2, 3.0), (3, 7.0)] {
            let idx = pool.get_node(PolyRef::new(id)).unwrap();
            let node = pool.node_mut(idx);
            node.total = total;
            node.flags = NodeFlags::OPEN;
            queue.push(&pool, idx);
        }

        // Lower the cost of node 3 and push it again
        let n3 = pool.get_node(PolyRef::new(3)).unwrap();
        pool.node_mut(n3).total = 1.0;
        queue.push(&pool, n3);

        let order: Vec<u32> = std::iter::from_fn(|| {
            let idx = queue.pop(&pool)?;
            pool.node_mut(idx).flags = NodeFlags::CLOSED;
            Some(pool.node(idx).id.id())
        })
        .collect();
        assert_eq!(order, vec![3, 2, 1]);
        assert!(queue.pop(&pool).is_none());
    }
}
