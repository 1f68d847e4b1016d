//! Negative sampling for the two training objectives.
//!
//! - [`CfSampler`]: `(user, positive item, negative item)` batches for the
//!   pairwise ranking loss.
//! - [`KgSampler`]: `(head, relation, positive tail, negative tail)` batches
//!   for the translational loss.
//!
//! Both samplers are seeded and reproducible. Ids are emitted as `u32` so they
//! can be handed to tensor index ops without conversion.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::prelude::*;
use rand_xorshift::XorShiftRng;

use crate::data::CollaborativeKg;
use crate::error::{Error, Result};

/// A batch for the ranking objective. All ids are node ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CfBatch {
    pub users: Vec<u32>,
    pub pos_items: Vec<u32>,
    pub neg_items: Vec<u32>,
}

impl CfBatch {
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// A batch for the translational objective.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KgBatch {
    pub heads: Vec<u32>,
    pub relations: Vec<u32>,
    pub pos_tails: Vec<u32>,
    pub neg_tails: Vec<u32>,
}

impl KgBatch {
    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }
}

/// Pick `batch_size` keys: without replacement when enough exist, with
/// replacement otherwise.
fn pick_keys(keys: &[usize], batch_size: usize, rng: &mut XorShiftRng) -> Vec<usize> {
    if batch_size <= keys.len() {
        keys.choose_multiple(rng, batch_size).copied().collect()
    } else {
        (0..batch_size)
            .map(|_| keys[rng.random_range(0..keys.len())])
            .collect()
    }
}

/// Samples ranking batches from the training interactions.
pub struct CfSampler<'a> {
    user_dict: &'a BTreeMap<usize, Vec<usize>>,
    positives: HashMap<usize, HashSet<usize>>,
    users: Vec<usize>,
    n_items: usize,
    rng: XorShiftRng,
}

impl<'a> CfSampler<'a> {
    /// Create a sampler over `user_dict` with negatives drawn from `[0, n_items)`.
    ///
    /// Users whose positives cover every item have no negative and are
    /// excluded from sampling.
    pub fn new(user_dict: &'a BTreeMap<usize, Vec<usize>>, n_items: usize, seed: u64) -> Result<Self> {
        let positives: HashMap<usize, HashSet<usize>> = user_dict
            .iter()
            .map(|(u, items)| (*u, items.iter().copied().collect()))
            .collect();
        let users: Vec<usize> = user_dict
            .iter()
            .filter(|(u, items)| !items.is_empty() && positives[*u].len() < n_items)
            .map(|(u, _)| *u)
            .collect();
        if users.is_empty() {
            return Err(Error::Empty("no user has both a positive and a negative item".into()));
        }
        Ok(Self {
            user_dict,
            positives,
            users,
            n_items,
            rng: XorShiftRng::seed_from_u64(seed),
        })
    }

    /// Sampler over the CKG training interactions.
    pub fn from_ckg(ckg: &'a CollaborativeKg, seed: u64) -> Result<Self> {
        Self::new(&ckg.train_user_dict, ckg.dims.n_items, seed)
    }

    /// Number of users eligible for sampling.
    pub fn num_users(&self) -> usize {
        self.users.len()
    }

    pub fn sample(&mut self, batch_size: usize) -> CfBatch {
        let users = pick_keys(&self.users, batch_size, &mut self.rng);
        let mut batch = CfBatch {
            users: Vec::with_capacity(users.len()),
            pos_items: Vec::with_capacity(users.len()),
            neg_items: Vec::with_capacity(users.len()),
        };
        for u in users {
            let items = &self.user_dict[&u];
            let pos = items[self.rng.random_range(0..items.len())];
            let seen = &self.positives[&u];
            let neg = loop {
                let cand = self.rng.random_range(0..self.n_items);
                if !seen.contains(&cand) {
                    break cand;
                }
            };
            batch.users.push(u as u32);
            batch.pos_items.push(pos as u32);
            batch.neg_items.push(neg as u32);
        }
        batch
    }
}

/// Samples translational batches from the CKG triples.
pub struct KgSampler<'a> {
    kg_dict: &'a HashMap<usize, Vec<(usize, usize)>>,
    positives: HashMap<usize, HashSet<(usize, usize)>>,
    heads: Vec<usize>,
    n_nodes: usize,
    rng: XorShiftRng,
}

impl<'a> KgSampler<'a> {
    /// Create a sampler with negative tails drawn from `[0, n_nodes)`.
    pub fn new(kg_dict: &'a HashMap<usize, Vec<(usize, usize)>>, n_nodes: usize, seed: u64) -> Result<Self> {
        let positives: HashMap<usize, HashSet<(usize, usize)>> = kg_dict
            .iter()
            .map(|(h, pairs)| (*h, pairs.iter().copied().collect()))
            .collect();
        // HashMap order is not stable; sort so a seed reproduces the same batches.
        let mut heads: Vec<usize> = kg_dict
            .iter()
            .filter(|(_, pairs)| !pairs.is_empty())
            .map(|(h, _)| *h)
            .collect();
        heads.sort_unstable();
        if heads.is_empty() || n_nodes < 2 {
            return Err(Error::Empty("knowledge graph has no sampleable heads".into()));
        }
        Ok(Self {
            kg_dict,
            positives,
            heads,
            n_nodes,
            rng: XorShiftRng::seed_from_u64(seed),
        })
    }

    /// Sampler over the CKG triples.
    pub fn from_ckg(ckg: &'a CollaborativeKg, seed: u64) -> Result<Self> {
        Self::new(&ckg.kg_dict, ckg.dims.n_nodes(), seed)
    }

    pub fn sample(&mut self, batch_size: usize) -> KgBatch {
        let heads = pick_keys(&self.heads, batch_size, &mut self.rng);
        let mut batch = KgBatch {
            heads: Vec::with_capacity(heads.len()),
            relations: Vec::with_capacity(heads.len()),
            pos_tails: Vec::with_capacity(heads.len()),
            neg_tails: Vec::with_capacity(heads.len()),
        };
        for h in heads {
            let pairs = &self.kg_dict[&h];
            let (relation, pos) = pairs[self.rng.random_range(0..pairs.len())];
            let known = &self.positives[&h];
            // A head whose (relation, *) facts cover every node would never
            // terminate; fall back to any tail other than the positive.
            let saturated = pairs.iter().filter(|(r, _)| *r == relation).count() >= self.n_nodes;
            let neg = loop {
                let cand = self.rng.random_range(0..self.n_nodes);
                if saturated {
                    if cand != pos {
                        break cand;
                    }
                } else if !known.contains(&(relation, cand)) {
                    break cand;
                }
            };
            batch.heads.push(h as u32);
            batch.relations.push(relation as u32);
            batch.pos_tails.push(pos as u32);
            batch.neg_tails.push(neg as u32);
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Triple;

    fn ckg() -> CollaborativeKg {
        let train = vec![(0, vec![0, 1]), (1, vec![2]), (2, vec![0, 3])];
        let test = vec![(0, vec![2])];
        let kg = vec![
            Triple::new(0, 0, 4),
            Triple::new(1, 0, 4),
            Triple::new(2, 1, 5),
            Triple::new(3, 1, 5),
        ];
        CollaborativeKg::build(&train, &test, &kg).unwrap()
    }

    #[test]
    fn test_cf_negatives_are_not_positives() {
        let ckg = ckg();
        let mut sampler = CfSampler::from_ckg(&ckg, 7).unwrap();
        for _ in 0..20 {
            let batch = sampler.sample(8);
            assert_eq!(batch.len(), 8);
            for i in 0..batch.len() {
                let items = &ckg.train_user_dict[&(batch.users[i] as usize)];
                assert!(items.contains(&(batch.pos_items[i] as usize)));
                assert!(!items.contains(&(batch.neg_items[i] as usize)));
                assert!((batch.neg_items[i] as usize) < ckg.dims.n_items);
            }
        }
    }

    #[test]
    fn test_cf_batch_without_replacement_when_small() {
        let ckg = ckg();
        let mut sampler = CfSampler::from_ckg(&ckg, 1).unwrap();
        let batch = sampler.sample(3);
        let distinct: HashSet<u32> = batch.users.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_kg_negatives_are_not_known_facts() {
        let ckg = ckg();
        let mut sampler = KgSampler::from_ckg(&ckg, 3).unwrap();
        for _ in 0..20 {
            let batch = sampler.sample(16);
            for i in 0..batch.len() {
                let pairs = &ckg.kg_dict[&(batch.heads[i] as usize)];
                let r = batch.relations[i] as usize;
                assert!(pairs.contains(&(r, batch.pos_tails[i] as usize)));
                assert!(!pairs.contains(&(r, batch.neg_tails[i] as usize)));
                assert!((batch.neg_tails[i] as usize) < ckg.dims.n_nodes());
            }
        }
    }

    #[test]
    fn test_same_seed_same_batches() {
        let ckg = ckg();
        let mut a = KgSampler::from_ckg(&ckg, 11).unwrap();
        let mut b = KgSampler::from_ckg(&ckg, 11).unwrap();
        assert_eq!(a.sample(10), b.sample(10));

        let mut a = CfSampler::from_ckg(&ckg, 11).unwrap();
        let mut b = CfSampler::from_ckg(&ckg, 11).unwrap();
        assert_eq!(a.sample(10), b.sample(10));
    }

    #[test]
    fn test_saturated_users_are_excluded() {
        let mut dict = BTreeMap::new();
        dict.insert(10, vec![0, 1]);
        assert!(CfSampler::new(&dict, 2, 0).is_err());
        dict.insert(11, vec![0]);
        let sampler = CfSampler::new(&dict, 2, 0).unwrap();
        assert_eq!(sampler.num_users(), 1);
    }
}
