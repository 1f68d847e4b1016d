//! Node id space and immutable graph topology.
//!
//! The collaborative knowledge graph places every node in one integer id
//! space:
//!
//! ```text
//! [0, n_items)                      items (a prefix of the entities)
//! [0, n_entities)                   knowledge-graph entities
//! [n_entities, n_entities + n_users) users
//! ```
//!
//! # Edge direction
//!
//! An [`Edge`] is a `(head, relation, tail)` fact. Messages flow from the tail
//! to the head, so the head is the destination: the incoming edges of node `v`
//! are exactly the edges whose head is `v`. [`GraphTopology`] stores edges
//! sorted by `(head, relation, tail)` with CSR offsets over heads, which gives
//! every destination a contiguous, fixed-order run of incoming edges.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sizes of the unified node id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphDims {
    /// Number of users.
    pub n_users: usize,
    /// Number of items (a prefix of the entity block).
    pub n_items: usize,
    /// Number of knowledge-graph entities, items included.
    pub n_entities: usize,
    /// Number of relation ids, synthetic interaction relations included.
    pub n_relations: usize,
}

impl GraphDims {
    /// Create a node id space, checking that items fit inside the entity block.
    pub fn new(n_users: usize, n_items: usize, n_entities: usize, n_relations: usize) -> Result<Self> {
        if n_items > n_entities {
            return Err(Error::InvalidGraph(format!(
                "{n_items} items do not fit in {n_entities} entities"
            )));
        }
        Ok(Self {
            n_users,
            n_items,
            n_entities,
            n_relations,
        })
    }

    /// Total number of nodes (entities + users).
    pub fn n_nodes(&self) -> usize {
        self.n_entities + self.n_users
    }

    /// Node id of a raw user id.
    pub fn user_node(&self, user: usize) -> usize {
        self.n_entities + user
    }

    /// Raw user id of a node, if the node lies in the user block.
    pub fn user_of(&self, node: usize) -> Option<usize> {
        (node >= self.n_entities && node < self.n_nodes()).then(|| node - self.n_entities)
    }

    /// Whether the node is an item.
    pub fn is_item(&self, node: usize) -> bool {
        node < self.n_items
    }
}

/// A directed, typed edge. Messages flow `tail -> head`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    /// Destination node.
    pub head: usize,
    /// Relation id.
    pub relation: usize,
    /// Source node.
    pub tail: usize,
}

impl Edge {
    pub fn new(head: usize, relation: usize, tail: usize) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }
}

/// Immutable multi-relational topology in CSR form over destination nodes.
#[derive(Debug, Clone)]
pub struct GraphTopology {
    num_nodes: usize,
    num_relations: usize,
    heads: Vec<u32>,
    relations: Vec<u32>,
    tails: Vec<u32>,
    /// `offsets[v]..offsets[v + 1]` are the incoming edges of node `v`.
    offsets: Vec<usize>,
    /// Edge indices per relation, ascending by relation; empty relations omitted.
    relation_groups: Vec<(usize, Vec<u32>)>,
}

impl GraphTopology {
    /// Build a topology from edges.
    ///
    /// Edges are sorted by `(head, relation, tail)`; parallel edges are kept.
    /// Fails if any endpoint is outside `[0, num_nodes)` or any relation is
    /// outside `[0, num_relations)`.
    pub fn build(
        num_nodes: usize,
        num_relations: usize,
        edges: impl IntoIterator<Item = Edge>,
    ) -> Result<Self> {
        if num_nodes > u32::MAX as usize {
            return Err(Error::InvalidGraph(format!(
                "{num_nodes} nodes exceed the u32 index space"
            )));
        }

        let mut edges: Vec<Edge> = edges.into_iter().collect();
        for e in &edges {
            if e.head >= num_nodes || e.tail >= num_nodes {
                return Err(Error::InvalidGraph(format!(
                    "edge ({}, {}, {}) references a node outside [0, {num_nodes})",
                    e.head, e.relation, e.tail
                )));
            }
            if e.relation >= num_relations {
                return Err(Error::InvalidGraph(format!(
                    "edge ({}, {}, {}) references a relation outside [0, {num_relations})",
                    e.head, e.relation, e.tail
                )));
            }
        }
        edges.sort_unstable();

        let mut offsets = vec![0usize; num_nodes + 1];
        for e in &edges {
            offsets[e.head + 1] += 1;
        }
        for v in 0..num_nodes {
            offsets[v + 1] += offsets[v];
        }

        let mut groups: Vec<Vec<u32>> = vec![Vec::new(); num_relations];
        for (idx, e) in edges.iter().enumerate() {
            groups[e.relation].push(idx as u32);
        }
        let relation_groups = groups
            .into_iter()
            .enumerate()
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        Ok(Self {
            num_nodes,
            num_relations,
            heads: edges.iter().map(|e| e.head as u32).collect(),
            relations: edges.iter().map(|e| e.relation as u32).collect(),
            tails: edges.iter().map(|e| e.tail as u32).collect(),
            offsets,
            relation_groups,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_relations(&self) -> usize {
        self.num_relations
    }

    pub fn num_edges(&self) -> usize {
        self.heads.len()
    }

    /// Destination node of every edge, in storage order.
    pub fn heads(&self) -> &[u32] {
        &self.heads
    }

    /// Source node of every edge, in storage order.
    pub fn tails(&self) -> &[u32] {
        &self.tails
    }

    /// Relation of every edge, in storage order.
    pub fn relations(&self) -> &[u32] {
        &self.relations
    }

    /// CSR offsets over destination nodes (`num_nodes + 1` entries).
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Edge at storage index `idx`.
    pub fn edge(&self, idx: usize) -> Edge {
        Edge::new(
            self.heads[idx] as usize,
            self.relations[idx] as usize,
            self.tails[idx] as usize,
        )
    }

    /// Storage indices of the incoming edges of `node`.
    pub fn incoming(&self, node: usize) -> Range<usize> {
        self.offsets[node]..self.offsets[node + 1]
    }

    pub fn in_degree(&self, node: usize) -> usize {
        self.offsets[node + 1] - self.offsets[node]
    }

    /// Non-empty relation groups as `(relation, edge indices)`, ascending by relation.
    pub fn relation_groups(&self) -> &[(usize, Vec<u32>)] {
        &self.relation_groups
    }

    /// Edge indices of one relation, or `None` when the relation has no edges.
    pub fn relation_edges(&self, relation: usize) -> Option<&[u32]> {
        self.relation_groups
            .binary_search_by_key(&relation, |(r, _)| *r)
            .ok()
            .map(|pos| self.relation_groups[pos].1.as_slice())
    }
}
