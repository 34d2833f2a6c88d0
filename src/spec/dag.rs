// src/spec/dag.rs

//! Concrete dependency DAG with maximal sharing
//!
//! Nodes are keyed by content hash, so two structurally identical specs are
//! always the same node. Install order comes from a Kahn topological sort
//! over build/link/run edges; the Merkle construction makes cycles
//! unrepresentable, but the sort still validates edge consistency (every
//! referenced child must be present).

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::{Error, Result};
use crate::hash::Hash;

use super::{ConcreteSpec, DepKindSet, Spec};

/// A forest of concrete specs with shared nodes
#[derive(Debug, Clone, Default)]
pub struct ConcreteDag {
    nodes: BTreeMap<Hash, ConcreteSpec>,
    roots: Vec<Hash>,
}

impl ConcreteDag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, deduplicating by hash; returns the node's hash
    pub fn insert(&mut self, spec: ConcreteSpec) -> Hash {
        let hash = spec.hash().clone();
        self.nodes.entry(hash.clone()).or_insert(spec);
        hash
    }

    /// Mark a node as a root request
    pub fn add_root(&mut self, hash: Hash) {
        if !self.roots.contains(&hash) {
            self.roots.push(hash);
        }
    }

    pub fn roots(&self) -> &[Hash] {
        &self.roots
    }

    pub fn node(&self, hash: &Hash) -> Option<&ConcreteSpec> {
        self.nodes.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConcreteSpec> {
        self.nodes.values()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &Hash> {
        self.nodes.keys()
    }

    /// Map from node hash to the hashes of nodes that depend on it
    pub fn dependents(&self) -> HashMap<Hash, Vec<Hash>> {
        let mut reverse: HashMap<Hash, Vec<Hash>> = HashMap::new();
        for (hash, spec) in &self.nodes {
            for edge in spec.edges() {
                reverse.entry(edge.child.clone()).or_default().push(hash.clone());
            }
        }
        reverse
    }

    /// All nodes that transitively depend on `hash` through edges carrying at
    /// least one of the given kinds (used for cascading-skip on failure)
    pub fn transitive_dependents(&self, hash: &Hash, filter: DepKindSet) -> Vec<Hash> {
        let mut reverse: HashMap<&Hash, Vec<&Hash>> = HashMap::new();
        for (parent, spec) in &self.nodes {
            for edge in spec.edges() {
                if edge.kinds.intersects(filter) {
                    reverse.entry(&edge.child).or_default().push(parent);
                }
            }
        }

        let mut seen: HashSet<&Hash> = HashSet::new();
        let mut queue: VecDeque<&Hash> = VecDeque::new();
        queue.push_back(hash);
        while let Some(current) = queue.pop_front() {
            if let Some(parents) = reverse.get(current) {
                for parent in parents {
                    if seen.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }

        let mut result: Vec<Hash> = seen.into_iter().cloned().collect();
        result.sort();
        result
    }

    /// Topological order with dependencies before dependents
    ///
    /// Fails when an edge references a node missing from the DAG.
    pub fn topological_order(&self) -> Result<Vec<Hash>> {
        let mut in_degree: BTreeMap<&Hash, usize> = BTreeMap::new();
        for hash in self.nodes.keys() {
            in_degree.entry(hash).or_insert(0);
        }

        for spec in self.nodes.values() {
            for edge in spec.edges() {
                if !self.nodes.contains_key(&edge.child) {
                    return Err(Error::InvalidDag(format!(
                        "{} references missing node {}",
                        spec.label(),
                        edge.child.short()
                    )));
                }
            }
            // in_degree counts incoming dependency edges: parents wait on
            // children, so parents carry the degree
            *in_degree.entry(spec.hash()).or_insert(0) += spec.edges().len();
        }

        let mut queue: VecDeque<&Hash> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(h, _)| *h)
            .collect();

        let reverse = self.dependents();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(hash) = queue.pop_front() {
            order.push(hash.clone());
            if let Some(parents) = reverse.get(hash) {
                for parent in parents {
                    let degree = in_degree.get_mut(parent).expect("parent tracked");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(self.nodes.get_key_value(parent).expect("node").0);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            return Err(Error::InvalidDag(
                "dependency graph contains a cycle".to_string(),
            ));
        }

        Ok(order)
    }

    /// Check that a node (and its reachable subgraph) satisfies an abstract
    /// request, including the request's `^` dependency constraints
    pub fn satisfies(&self, hash: &Hash, request: &Spec) -> bool {
        let Some(node) = self.nodes.get(hash) else {
            return false;
        };
        if !request.satisfied_by_node(node) {
            return false;
        }

        // Every dependency constraint must be satisfied by some node
        // reachable from this one
        for dep in &request.deps {
            let mut seen = HashSet::new();
            let mut queue: VecDeque<&Hash> = node.edges().iter().map(|e| &e.child).collect();
            let mut found = false;
            while let Some(current) = queue.pop_front() {
                if !seen.insert(current) {
                    continue;
                }
                if let Some(child) = self.nodes.get(current) {
                    if dep.spec.satisfied_by_node(child) {
                        found = true;
                        break;
                    }
                    queue.extend(child.edges().iter().map(|e| &e.child));
                }
            }
            if !found {
                return false;
            }
        }
        true
    }
}
