//! Reading triples and interactions, and building the collaborative knowledge graph.
//!
//! # File formats
//!
//! | file | line format |
//! |------|-------------|
//! | `kg_final.txt` | `head relation tail` |
//! | `train.txt`, `test.txt` | `user item1 item2 ...` |
//!
//! All ids are non-negative integers separated by whitespace.
//!
//! # Relation layout of the CKG
//!
//! With `n_kg` raw KG relations (`max r + 1`):
//!
//! | relation id | meaning | head | tail |
//! |-------------|---------|------|------|
//! | `0` | interaction | user | item |
//! | `1` | inverse interaction | item | user |
//! | `r + 2` | KG relation `r` | h | t |
//! | `r + 2 + n_kg` | inverse of KG relation `r` | t | h |

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::error::{Error, Result};
use crate::graph::{Edge, GraphDims, GraphTopology};

/// Relation id of user -> item interaction edges.
pub const INTERACTION_RELATION: usize = 0;
/// Relation id of item -> user interaction edges.
pub const INVERSE_INTERACTION_RELATION: usize = 1;

/// A raw knowledge-graph fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Triple {
    pub head: usize,
    pub relation: usize,
    pub tail: usize,
}

impl Triple {
    pub fn new(head: usize, relation: usize, tail: usize) -> Self {
        Self {
            head,
            relation,
            tail,
        }
    }
}

impl From<Triple> for Edge {
    fn from(t: Triple) -> Self {
        Edge::new(t.head, t.relation, t.tail)
    }
}

/// One user's interaction line: `(user, items)`.
pub type Interactions = (usize, Vec<usize>);

fn parse_ids(line: &str, line_no: usize) -> Result<Vec<usize>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<usize>().map_err(|e| Error::Parse {
                line: line_no,
                message: format!("{tok:?}: {e}"),
            })
        })
        .collect()
}

/// Read `head relation tail` lines, dropping duplicates (first occurrence wins).
pub fn read_triples<R: BufRead>(reader: R) -> Result<Vec<Triple>> {
    let mut seen = HashSet::new();
    let mut triples = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let ids = parse_ids(line, i + 1)?;
        if ids.len() != 3 {
            return Err(Error::Parse {
                line: i + 1,
                message: format!("expected 3 fields, found {}", ids.len()),
            });
        }
        let t = Triple::new(ids[0], ids[1], ids[2]);
        if seen.insert(t) {
            triples.push(t);
        }
    }
    Ok(triples)
}

/// Read `user item1 item2 ...` lines.
///
/// Repeated items on a line are collapsed. Lines with a user but no items are
/// skipped.
pub fn read_interactions<R: BufRead>(reader: R) -> Result<Vec<Interactions>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let ids = parse_ids(line.trim(), i + 1)?;
        if ids.len() < 2 {
            continue;
        }
        let mut seen = HashSet::new();
        let items: Vec<usize> = ids[1..].iter().copied().filter(|it| seen.insert(*it)).collect();
        out.push((ids[0], items));
    }
    Ok(out)
}

pub fn read_triples_file(path: impl AsRef<Path>) -> Result<Vec<Triple>> {
    read_triples(BufReader::new(File::open(path)?))
}

pub fn read_interactions_file(path: impl AsRef<Path>) -> Result<Vec<Interactions>> {
    read_interactions(BufReader::new(File::open(path)?))
}

/// The collaborative knowledge graph: KG facts plus user-item interactions in
/// one node id space.
#[derive(Debug, Clone)]
pub struct CollaborativeKg {
    /// Node id space and relation count.
    pub dims: GraphDims,
    /// Number of raw KG relations before remapping.
    pub n_kg_relations: usize,
    /// Training items per user node id.
    pub train_user_dict: BTreeMap<usize, Vec<usize>>,
    /// Test items per user node id.
    pub test_user_dict: BTreeMap<usize, Vec<usize>>,
    /// `(relation, tail)` pairs per head over all CKG triples.
    pub kg_dict: HashMap<usize, Vec<(usize, usize)>>,
    /// Every CKG triple: remapped KG facts, their inverses and interaction edges.
    pub triples: Vec<Triple>,
    /// Number of training interactions.
    pub n_cf_train: usize,
    /// Number of test interactions.
    pub n_cf_test: usize,
    /// Number of KG facts after deduplication, before inverse augmentation.
    pub n_kg_facts: usize,
}

impl CollaborativeKg {
    /// Build the CKG from parsed inputs.
    pub fn build(train: &[Interactions], test: &[Interactions], kg: &[Triple]) -> Result<Self> {
        if train.is_empty() {
            return Err(Error::Empty("training interactions".into()));
        }
        if kg.is_empty() {
            return Err(Error::Empty("knowledge graph triples".into()));
        }

        let all = train.iter().chain(test.iter());
        let n_users = all.clone().map(|(u, _)| u + 1).max().unwrap_or(0);
        let n_items = all
            .flat_map(|(_, items)| items.iter().map(|i| i + 1))
            .max()
            .unwrap_or(0);
        let n_kg_relations = kg.iter().map(|t| t.relation + 1).max().unwrap_or(0);
        let n_entities = kg
            .iter()
            .map(|t| t.head.max(t.tail) + 1)
            .max()
            .unwrap_or(0)
            .max(n_items);
        let n_relations = 2 + 2 * n_kg_relations;
        let dims = GraphDims::new(n_users, n_items, n_entities, n_relations)?;

        let mut triples = Vec::with_capacity(2 * kg.len() + 2 * train.len());
        for t in kg {
            triples.push(Triple::new(t.head, t.relation + 2, t.tail));
        }
        for t in kg {
            triples.push(Triple::new(t.tail, t.relation + 2 + n_kg_relations, t.head));
        }

        let mut n_cf_train = 0;
        let mut train_user_dict: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (user, items) in train {
            let node = dims.user_node(*user);
            for &item in items {
                triples.push(Triple::new(node, INTERACTION_RELATION, item));
                triples.push(Triple::new(item, INVERSE_INTERACTION_RELATION, node));
            }
            n_cf_train += items.len();
            merge_items(train_user_dict.entry(node).or_default(), items);
        }

        let mut n_cf_test = 0;
        let mut test_user_dict: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (user, items) in test {
            n_cf_test += items.len();
            merge_items(test_user_dict.entry(dims.user_node(*user)).or_default(), items);
        }

        let mut kg_dict: HashMap<usize, Vec<(usize, usize)>> = HashMap::new();
        for t in &triples {
            kg_dict.entry(t.head).or_default().push((t.relation, t.tail));
        }

        Ok(Self {
            dims,
            n_kg_relations,
            train_user_dict,
            test_user_dict,
            kg_dict,
            triples,
            n_cf_train,
            n_cf_test,
            n_kg_facts: kg.len(),
        })
    }

    /// Load `train.txt`, `test.txt` and `kg_final.txt` from a dataset directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let train = read_interactions_file(dir.join("train.txt"))?;
        let test = read_interactions_file(dir.join("test.txt"))?;
        let kg = read_triples_file(dir.join("kg_final.txt"))?;
        let ckg = Self::build(&train, &test, &kg)?;
        info!(dir = %dir.display(), "{}", ckg.summary());
        Ok(ckg)
    }

    /// Build the immutable propagation topology over all CKG triples.
    pub fn topology(&self) -> Result<GraphTopology> {
        GraphTopology::build(
            self.dims.n_nodes(),
            self.dims.n_relations,
            self.triples.iter().copied().map(Edge::from),
        )
    }

    /// Number of CKG triples used by the KG objective.
    pub fn n_kg_train(&self) -> usize {
        self.triples.len()
    }

    /// One-line dataset summary.
    pub fn summary(&self) -> String {
        format!(
            "n_users={} n_items={} n_entities={} n_relations={} n_cf_train={} n_cf_test={} n_kg_train={}",
            self.dims.n_users,
            self.dims.n_items,
            self.dims.n_entities,
            self.dims.n_relations,
            self.n_cf_train,
            self.n_cf_test,
            self.n_kg_train()
        )
    }
}

fn merge_items(dst: &mut Vec<usize>, items: &[usize]) {
    dst.extend_from_slice(items);
    dst.sort_unstable();
    dst.dedup();
}
