//! Mesh topology definitions for Tern simulations
//!
//! Provides functions to create various network topologies:
//! - Line and ring: each node connected to its neighbors
//! - Grid: nodes on a lattice, connected horizontally and vertically
//! - Full mesh: every node connected to every other
//! - Random: configurable connection probability, seeded
//! - Custom: build from an edge list
//!
//! Node `i` always has [`Address::from_index`]`(i)`, so an [`AddressBook`]
//! built with [`AddressBook::sequential`] resolves every node of a mesh.

use std::collections::{BTreeMap, BTreeSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tern_core::{Address, AddressBook};

/// A mesh network topology
///
/// Links are symmetric. Taking a link down removes it from the adjacency
/// so frames sent across it are lost, which is how the simulation models
/// nodes moving out of range.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    adjacency: BTreeMap<Address, BTreeSet<Address>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with no links
    pub fn add_node(&mut self, node: Address) {
        self.adjacency.entry(node).or_default();
    }

    /// Add a bidirectional link between two nodes
    pub fn connect(&mut self, a: Address, b: Address) {
        if a == b {
            return; // No self-loops
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Remove the link between two nodes
    ///
    /// Returns false when they were not linked.
    pub fn disconnect(&mut self, a: Address, b: Address) -> bool {
        let removed = self
            .adjacency
            .get_mut(&a)
            .is_some_and(|n| n.remove(&b));
        if let Some(n) = self.adjacency.get_mut(&b) {
            n.remove(&a);
        }
        removed
    }

    /// Get all neighbors of a node
    pub fn neighbors(&self, node: Address) -> impl Iterator<Item = Address> + '_ {
        self.adjacency.get(&node).into_iter().flatten().copied()
    }

    /// Check if two nodes are directly connected
    pub fn are_connected(&self, a: Address, b: Address) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    pub fn contains(&self, node: Address) -> bool {
        self.adjacency.contains_key(&node)
    }

    /// All node addresses in ascending order
    pub fn nodes(&self) -> Vec<Address> {
        self.adjacency.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of links
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(BTreeSet::len).sum::<usize>() / 2
    }

    /// Address book resolving every node of the mesh
    pub fn address_book(&self) -> AddressBook {
        let mut book = AddressBook::new();
        for node in self.adjacency.keys() {
            book.register(*node);
        }
        book
    }

    /// Nodes reachable from `from`, including itself
    pub fn reachable_from(&self, from: Address) -> BTreeSet<Address> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.neighbors(node).filter(|n| !seen.contains(n)));
            }
        }
        seen
    }

    /// Print a simple ASCII visualization of the mesh
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Mesh Topology:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Links: {}\n\n", self.edge_count()));

        for (node, neighbors) in &self.adjacency {
            let neighbor_str: Vec<String> = neighbors.iter().map(|n| n.to_string()).collect();
            output.push_str(&format!("  {} -> [{}]\n", node, neighbor_str.join(", ")));
        }
        output
    }
}

/// Builder for creating mesh topologies
pub struct MeshBuilder {
    node_count: u16,
}

impl MeshBuilder {
    /// Create a builder for nodes `0..node_count`
    pub fn new(node_count: u16) -> Self {
        Self { node_count }
    }

    fn nodes(&self) -> Vec<Address> {
        (0..self.node_count).map(Address::from_index).collect()
    }

    fn empty(&self) -> (Mesh, Vec<Address>) {
        let mut mesh = Mesh::new();
        let nodes = self.nodes();
        for node in &nodes {
            mesh.add_node(*node);
        }
        (mesh, nodes)
    }

    /// Build a line topology: 0 - 1 - 2 - ...
    pub fn line(self) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        for pair in nodes.windows(2) {
            mesh.connect(pair[0], pair[1]);
        }
        mesh
    }

    /// Build a ring: a line whose ends are joined
    pub fn ring(self) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        for i in 0..nodes.len() {
            let next = (i + 1) % nodes.len();
            mesh.connect(nodes[i], nodes[next]);
        }
        mesh
    }

    /// Build a grid `columns` wide, filled row by row
    pub fn grid(self, columns: u16) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        let columns = usize::from(columns.max(1));
        for (i, node) in nodes.iter().enumerate() {
            if (i + 1) % columns != 0 {
                if let Some(right) = nodes.get(i + 1) {
                    mesh.connect(*node, *right);
                }
            }
            if let Some(below) = nodes.get(i + columns) {
                mesh.connect(*node, *below);
            }
        }
        mesh
    }

    /// Build a full mesh where every node is connected to every other
    pub fn full_mesh(self) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                mesh.connect(nodes[i], nodes[j]);
            }
        }
        mesh
    }

    /// Build a star: node 0 in the center
    pub fn star(self) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        if let Some((center, rest)) = nodes.split_first() {
            for node in rest {
                mesh.connect(*center, *node);
            }
        }
        mesh
    }

    /// Build a random mesh with given connection probability
    ///
    /// The same seed always yields the same mesh. Isolated nodes are
    /// linked to one random other node.
    pub fn random(self, connection_probability: f64, seed: u64) -> Mesh {
        let (mut mesh, nodes) = self.empty();
        let mut rng = StdRng::seed_from_u64(seed);

        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if rng.random::<f64>() < connection_probability {
                    mesh.connect(nodes[i], nodes[j]);
                }
            }
        }

        if nodes.len() > 1 {
            for node in &nodes {
                if mesh.neighbors(*node).next().is_none() {
                    let other = loop {
                        let candidate = nodes[rng.random_range(0..nodes.len())];
                        if candidate != *node {
                            break candidate;
                        }
                    };
                    mesh.connect(*node, other);
                }
            }
        }
        mesh
    }
}

/// Create a custom mesh from an edge list of node indices
pub fn from_edges(edges: &[(u16, u16)]) -> Mesh {
    let mut mesh = Mesh::new();
    for (a, b) in edges {
        mesh.connect(Address::from_index(*a), Address::from_index(*b));
    }
    mesh
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(index: u16) -> Address {
        Address::from_index(index)
    }

    #[test]
    fn test_line_topology() {
        let mesh = MeshBuilder::new(4).line();
        assert_eq!(mesh.node_count(), 4);
        assert_eq!(mesh.edge_count(), 3);
        assert!(mesh.are_connected(addr(1), addr(2)));
        assert!(!mesh.are_connected(addr(0), addr(3)));
    }

    #[test]
    fn test_ring_topology() {
        let mesh = MeshBuilder::new(4).ring();
        assert_eq!(mesh.edge_count(), 4);
        assert!(mesh.are_connected(addr(3), addr(0))); // Wrap around
        assert!(!mesh.are_connected(addr(0), addr(2)));
    }

    #[test]
    fn test_grid_topology() {
        // 0 1 2
        // 3 4 5
        let mesh = MeshBuilder::new(6).grid(3);
        assert_eq!(mesh.edge_count(), 7);
        assert!(mesh.are_connected(addr(1), addr(4)));
        assert!(!mesh.are_connected(addr(2), addr(3)));
    }

    #[test]
    fn test_full_mesh() {
        let mesh = MeshBuilder::new(4).full_mesh();
        assert_eq!(mesh.edge_count(), 6); // C(4,2) = 6
        for a in mesh.nodes() {
            for b in mesh.nodes() {
                if a != b {
                    assert!(mesh.are_connected(a, b));
                }
            }
        }
    }

    #[test]
    fn test_random_is_seeded_and_connected() {
        let a = MeshBuilder::new(10).random(0.2, 7);
        let b = MeshBuilder::new(10).random(0.2, 7);
        assert_eq!(a.visualize(), b.visualize());
        for node in a.nodes() {
            assert!(a.neighbors(node).next().is_some());
        }
    }

    #[test]
    fn test_link_down_and_up() {
        let mut mesh = from_edges(&[(0, 1), (1, 2)]);
        assert_eq!(mesh.reachable_from(addr(0)).len(), 3);

        assert!(mesh.disconnect(addr(1), addr(2)));
        assert!(!mesh.disconnect(addr(1), addr(2)));
        assert!(!mesh.are_connected(addr(2), addr(1)));
        assert_eq!(mesh.reachable_from(addr(0)).len(), 2);

        mesh.connect(addr(2), addr(1));
        assert!(mesh.are_connected(addr(1), addr(2)));
    }

    #[test]
    fn test_address_book_covers_mesh() {
        use tern_core::TopologyView;

        let mesh = MeshBuilder::new(3).star();
        let book = mesh.address_book();
        assert_eq!(book.len(), 3);
        assert_eq!(book.node_id(addr(2)), Some(2));
    }
}
