//! Bounded snapshot storage for the pre-barrier verifier.
//!
//! The snapshot is a flat list of nodes, each owning a contiguous run of
//! edges in a second flat list:
//!
//! ```text
//! nodes:  [ root | A | B | C | … ]
//!            │     │   │
//! edges:  [ r0 r1 │a0 a1│b0│ … ]
//! ```
//!
//! A node's edges are all recorded before the next node is created, which
//! keeps every run contiguous. The arena charges each node and edge against
//! a byte limit; once the limit is hit the arena stays exhausted and every
//! further push fails.

use crate::heap::cell::{CellId, CellKind};
use crate::trace::EdgeLocation;

use rustc_hash::FxHashMap;

/// Index of a node in the arena.
pub type NodeIndex = u32;

/// One cell in the snapshot.
#[derive(Debug, Clone, Copy)]
pub struct VerifyNode {
    /// The cell, or `None` for the synthetic root node.
    pub thing: Option<CellId>,
    /// Kind of the cell; `None` for the root node.
    pub kind: Option<CellKind>,
    /// First edge in the edge list.
    pub first_edge: u32,
    /// Number of edges recorded.
    pub count: u32,
}

/// One outgoing edge at snapshot time. Cancelled edges have no target.
#[derive(Debug, Clone, Copy)]
pub struct EdgeValue {
    /// Target, cleared once the edge is seen again unchanged.
    pub target: Option<CellId>,
    /// Kind of the target.
    pub kind: CellKind,
    /// Debug label.
    pub label: &'static str,
    /// Where the edge was found.
    pub location: EdgeLocation,
}

/// The arena ran out of budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaExhausted;

/// Snapshot arena: nodes, edges and the cell → node map.
#[derive(Debug)]
pub struct VerifierArena {
    nodes: Vec<VerifyNode>,
    edges: Vec<EdgeValue>,
    map: FxHashMap<CellId, NodeIndex>,
    bytes_used: usize,
    limit: usize,
    exhausted: bool,
}

const NODE_BYTES: usize = std::mem::size_of::<VerifyNode>();
const EDGE_BYTES: usize = std::mem::size_of::<EdgeValue>();
const MAP_ENTRY_BYTES: usize = std::mem::size_of::<(CellId, NodeIndex)>();

impl VerifierArena {
    /// An empty arena that may use at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            map: FxHashMap::default(),
            bytes_used: 0,
            limit,
            exhausted: false,
        }
    }

    fn charge(&mut self, bytes: usize) -> Result<(), ArenaExhausted> {
        if self.exhausted || self.bytes_used + bytes > self.limit {
            self.exhausted = true;
            return Err(ArenaExhausted);
        }
        self.bytes_used += bytes;
        Ok(())
    }

    /// Create the root node. Must be the first node.
    pub fn push_root(&mut self) -> Result<NodeIndex, ArenaExhausted> {
        debug_assert!(self.nodes.is_empty(), "root node must come first");
        self.push(None, None)
    }

    /// Create the node for `thing`.
    ///
    /// Returns `Ok(None)` if the cell already has a node.
    pub fn make_node(
        &mut self,
        thing: CellId,
        kind: CellKind,
    ) -> Result<Option<NodeIndex>, ArenaExhausted> {
        if self.map.contains_key(&thing) {
            return Ok(None);
        }
        self.charge(MAP_ENTRY_BYTES)?;
        if self.map.try_reserve(1).is_err() {
            self.exhausted = true;
            return Err(ArenaExhausted);
        }
        let index = self.push(Some(thing), Some(kind))?;
        self.map.insert(thing, index);
        Ok(Some(index))
    }

    fn push(
        &mut self,
        thing: Option<CellId>,
        kind: Option<CellKind>,
    ) -> Result<NodeIndex, ArenaExhausted> {
        self.charge(NODE_BYTES)?;
        if self.nodes.try_reserve(1).is_err() {
            self.exhausted = true;
            return Err(ArenaExhausted);
        }
        let index = self.nodes.len() as NodeIndex;
        self.nodes.push(VerifyNode {
            thing,
            kind,
            first_edge: self.edges.len() as u32,
            count: 0,
        });
        Ok(index)
    }

    /// Append an edge to the most recently created node.
    pub fn push_edge(&mut self, edge: EdgeValue) -> Result<(), ArenaExhausted> {
        self.charge(EDGE_BYTES)?;
        if self.edges.try_reserve(1).is_err() {
            self.exhausted = true;
            return Err(ArenaExhausted);
        }
        let Some(node) = self.nodes.last_mut() else {
            return Err(ArenaExhausted);
        };
        debug_assert_eq!(
            (node.first_edge + node.count) as usize,
            self.edges.len(),
            "edges of a node must be contiguous"
        );
        self.edges.push(edge);
        node.count += 1;
        Ok(())
    }

    /// Whether the byte limit has been hit.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Node by index.
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &VerifyNode {
        &self.nodes[index as usize]
    }

    /// Every node, in creation order.
    pub fn nodes(&self) -> &[VerifyNode] {
        &self.nodes
    }

    /// Edges of node `index`.
    pub fn edges_of(&self, index: NodeIndex) -> &[EdgeValue] {
        let node = self.node(index);
        let start = node.first_edge as usize;
        &self.edges[start..start + node.count as usize]
    }

    /// Mutable edges of node `index`.
    pub fn edges_of_mut(&mut self, index: NodeIndex) -> &mut [EdgeValue] {
        let node = self.nodes[index as usize];
        let start = node.first_edge as usize;
        &mut self.edges[start..start + node.count as usize]
    }

    /// Number of nodes, root included.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    #[inline]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Bytes charged so far.
    #[inline]
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// Node of `thing`, if it was snapshotted.
    pub fn lookup(&self, thing: CellId) -> Option<NodeIndex> {
        self.map.get(&thing).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::RootCategory;

    fn id(index: u32) -> CellId {
        CellId {
            index,
            generation: 0,
        }
    }

    fn edge(target: CellId) -> EdgeValue {
        EdgeValue {
            target: Some(target),
            kind: CellKind::Object,
            label: "test",
            location: EdgeLocation::Root(RootCategory::ExactStack),
        }
    }

    #[test]
    fn test_nodes_are_deduplicated() {
        let mut arena = VerifierArena::new(1 << 20);
        arena.push_root().unwrap();
        assert_eq!(arena.make_node(id(1), CellKind::Object), Ok(Some(1)));
        assert_eq!(arena.make_node(id(1), CellKind::Object), Ok(None));
        assert_eq!(arena.lookup(id(1)), Some(1));
        assert_eq!(arena.node_count(), 2);
    }

    #[test]
    fn test_edges_are_contiguous_per_node() {
        let mut arena = VerifierArena::new(1 << 20);
        let root = arena.push_root().unwrap();
        arena.push_edge(edge(id(1))).unwrap();
        arena.push_edge(edge(id(2))).unwrap();
        let a = arena.make_node(id(1), CellKind::Object).unwrap().unwrap();
        arena.push_edge(edge(id(2))).unwrap();

        assert_eq!(arena.edges_of(root).len(), 2);
        assert_eq!(arena.edges_of(a).len(), 1);
        assert_eq!(arena.node(a).first_edge, 2);
    }

    #[test]
    fn test_exhaustion_is_sticky() {
        let mut arena = VerifierArena::new(NODE_BYTES + EDGE_BYTES);
        arena.push_root().unwrap();
        arena.push_edge(edge(id(1))).unwrap();
        assert_eq!(arena.push_edge(edge(id(2))), Err(ArenaExhausted));
        assert!(arena.is_exhausted());
        assert_eq!(arena.make_node(id(9), CellKind::Object), Err(ArenaExhausted));
        assert!(arena.bytes_used() <= NODE_BYTES + EDGE_BYTES);
    }

    #[test]
    fn test_cancel_in_place() {
        let mut arena = VerifierArena::new(1 << 20);
        let root = arena.push_root().unwrap();
        arena.push_edge(edge(id(3))).unwrap();
        arena.edges_of_mut(root)[0].target = None;
        assert!(arena.edges_of(root)[0].target.is_none());
    }
}
