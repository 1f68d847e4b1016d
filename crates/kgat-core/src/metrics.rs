//! Top-K ranking evaluation for recommendation.
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | Recall@K | [0, 1] | Fraction of held-out items ranked in the top K |
//! | NDCG@K | [0, 1] | Position-discounted hits, normalized by the ideal ranking |
//!
//! Items the user interacted with during training are masked out before
//! ranking, so they can neither count as hits nor push test items down.

use std::collections::{BTreeMap, HashSet};

/// Recall@K of a ranked list against a set of relevant items.
pub fn recall_at_k(ranked: &[usize], relevant: &HashSet<usize>, k: usize) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let hits = ranked.iter().take(k).filter(|i| relevant.contains(*i)).count();
    hits as f64 / relevant.len() as f64
}

/// NDCG@K with binary relevance.
pub fn ndcg_at_k(ranked: &[usize], relevant: &HashSet<usize>, k: usize) -> f64 {
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, i)| relevant.contains(*i))
        .map(|(pos, _)| 1.0 / ((pos + 2) as f64).log2())
        .sum();
    let ideal: f64 = (0..relevant.len().min(k))
        .map(|pos| 1.0 / ((pos + 2) as f64).log2())
        .sum();
    if ideal == 0.0 {
        0.0
    } else {
        dcg / ideal
    }
}

/// Rank item indices by descending score; ties broken by ascending index.
pub fn rank_items(scores: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..scores.len()).collect();
    idx.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    idx.truncate(k);
    idx
}

/// Mean Recall@K / NDCG@K over a set of users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingMetrics {
    /// Cutoffs, ascending.
    pub ks: Vec<usize>,
    /// Mean recall per cutoff.
    pub recall: Vec<f64>,
    /// Mean NDCG per cutoff.
    pub ndcg: Vec<f64>,
    /// Users evaluated (users with at least one test item).
    pub num_users: usize,
}

impl RankingMetrics {
    /// Evaluate a block of score rows.
    ///
    /// `scores[i]` holds the scores of items `0..n` for `users[i]`. Users
    /// without test items are skipped.
    pub fn evaluate(
        scores: &[Vec<f32>],
        users: &[usize],
        train: &BTreeMap<usize, Vec<usize>>,
        test: &BTreeMap<usize, Vec<usize>>,
        ks: &[usize],
    ) -> Self {
        let mut ks = ks.to_vec();
        ks.sort_unstable();
        ks.dedup();
        let max_k = ks.last().copied().unwrap_or(0);

        let mut recall = vec![0.0; ks.len()];
        let mut ndcg = vec![0.0; ks.len()];
        let mut num_users = 0;

        for (row, user) in scores.iter().zip(users) {
            let Some(test_items) = test.get(user).filter(|t| !t.is_empty()) else {
                continue;
            };
            let mut row = row.clone();
            for &i in train.get(user).into_iter().flatten() {
                if let Some(s) = row.get_mut(i) {
                    *s = f32::NEG_INFINITY;
                }
            }
            let ranked = rank_items(&row, max_k);
            let relevant: HashSet<usize> = test_items.iter().copied().collect();
            for (j, &k) in ks.iter().enumerate() {
                recall[j] += recall_at_k(&ranked, &relevant, k);
                ndcg[j] += ndcg_at_k(&ranked, &relevant, k);
            }
            num_users += 1;
        }

        if num_users > 0 {
            let n = num_users as f64;
            recall.iter_mut().for_each(|r| *r /= n);
            ndcg.iter_mut().for_each(|d| *d /= n);
        }

        Self {
            ks,
            recall,
            ndcg,
            num_users,
        }
    }

    /// Merge per-batch metrics, weighting by evaluated users.
    pub fn merge(parts: &[Self]) -> Self {
        let Some(first) = parts.iter().find(|p| p.num_users > 0) else {
            return parts.first().cloned().unwrap_or_default();
        };
        let total: usize = parts.iter().map(|p| p.num_users).sum();
        let mut recall = vec![0.0; first.ks.len()];
        let mut ndcg = vec![0.0; first.ks.len()];
        for p in parts.iter().filter(|p| p.num_users > 0) {
            let w = p.num_users as f64 / total as f64;
            for j in 0..recall.len() {
                recall[j] += p.recall[j] * w;
                ndcg[j] += p.ndcg[j] * w;
            }
        }
        Self {
            ks: first.ks.clone(),
            recall,
            ndcg,
            num_users: total,
        }
    }

    /// Recall at the smallest cutoff, the quantity tracked for early stopping.
    pub fn primary_recall(&self) -> f64 {
        self.recall.first().copied().unwrap_or(0.0)
    }

    /// Format as summary string.
    pub fn summary(&self) -> String {
        self.ks
            .iter()
            .enumerate()
            .map(|(j, k)| format!("Recall@{k}={:.4} NDCG@{k}={:.4}", self.recall[j], self.ndcg[j]))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of an early-stopping check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStop {
    /// Best metric value so far.
    pub best: f64,
    /// Index of the first evaluation reaching `best`.
    pub best_index: usize,
    /// Whether `stopping_steps` evaluations have passed without improvement.
    pub should_stop: bool,
}

/// Check a metric history for early stopping. Returns `None` on empty history.
pub fn early_stopping(history: &[f64], stopping_steps: usize) -> Option<EarlyStop> {
    let (best_index, best) = history
        .iter()
        .copied()
        .enumerate()
        .fold(None, |acc: Option<(usize, f64)>, (i, v)| match acc {
            Some((_, b)) if b >= v => acc,
            _ => Some((i, v)),
        })?;
    Some(EarlyStop {
        best,
        best_index,
        should_stop: history.len() - best_index - 1 >= stopping_steps,
    })
}
