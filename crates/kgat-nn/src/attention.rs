//! Knowledge-aware attention.
//!
//! For an edge `(h, r, t)` with messages flowing `t -> h`:
//!
//! ```text
//! score(h, r, t) = (W_r e_t) · tanh(W_r e_h + e_r)
//! ```
//!
//! Scores are computed one relation at a time, each relation group on the
//! rayon pool with its projection matrix passed in explicitly, then
//! normalized with [`edge_softmax`] over the incoming edges of every head.

use std::ops::Range;
use std::sync::Arc;

use candle_core::{DType, Tensor};
use kgat_core::GraphTopology;
use rayon::prelude::*;

use crate::embedding::RelationProjection;
use crate::error::{Error, Result};
use crate::softmax::{edge_softmax, index_tensor, segment_sum, ReductionPolicy};

/// Raw attention scores for the edges of one relation.
///
/// `heads` and `tails` are `u32` node ids into `embed`; `projection` is
/// `(entity_dim, relation_dim)` and `relation_embed` is `(relation_dim,)`.
/// Returns `(E_r,)`.
pub fn score_relation(
    embed: &Tensor,
    heads: &Tensor,
    tails: &Tensor,
    projection: &Tensor,
    relation_embed: &Tensor,
) -> Result<Tensor> {
    let h = embed.index_select(heads, 0)?.matmul(projection)?;
    let t = embed.index_select(tails, 0)?.matmul(projection)?;
    let gate = h.broadcast_add(relation_embed)?.tanh()?;
    Ok((t * gate)?.sum(1)?)
}

/// Raw scores for every edge, in topology storage order.
///
/// Relations without edges are never visited.
pub fn score_edges(
    graph: &GraphTopology,
    embed: &Tensor,
    projection: &RelationProjection,
    relation_embed: &Tensor,
) -> Result<Tensor> {
    let device = embed.device();
    let e = graph.num_edges();
    if e == 0 {
        return Ok(Tensor::zeros(0, embed.dtype(), device)?);
    }
    let (heads, tails) = (graph.heads(), graph.tails());

    let groups: Vec<(Tensor, Tensor)> = graph
        .relation_groups()
        .par_iter()
        .map(|(relation, ids)| -> Result<(Tensor, Tensor)> {
            let h: Vec<u32> = ids.iter().map(|&i| heads[i as usize]).collect();
            let t: Vec<u32> = ids.iter().map(|&i| tails[i as usize]).collect();
            let scores = score_relation(
                embed,
                &index_tensor(&h, device)?,
                &index_tensor(&t, device)?,
                &projection.matrix(*relation)?,
                &relation_embed.get(*relation)?,
            )?;
            Ok((index_tensor(ids, device)?, scores))
        })
        .collect::<Result<_>>()?;

    let (positions, scores): (Vec<Tensor>, Vec<Tensor>) = groups.into_iter().unzip();
    let positions = Tensor::cat(&positions, 0)?;
    let scores = Tensor::cat(&scores, 0)?;
    Ok(Tensor::zeros(e, scores.dtype(), device)?.index_add(&positions, &scores, 0)?)
}

/// Compute normalized attention for the whole graph.
///
/// The weights are detached: attention is refreshed between optimizer steps
/// and treated as a constant by the losses.
pub fn compute(
    graph: Arc<GraphTopology>,
    embed: &Tensor,
    projection: &RelationProjection,
    relation_embed: &Tensor,
    policy: ReductionPolicy,
) -> Result<AttentionSnapshot> {
    let scores = score_edges(&graph, embed, projection, relation_embed)?;
    let weights = edge_softmax(&graph, &scores, policy)?.detach();
    AttentionSnapshot::new(graph, weights)
}

/// Topology plus one set of normalized attention weights.
///
/// Read-only; cheap to clone and share across threads.
#[derive(Debug, Clone)]
pub struct AttentionSnapshot {
    graph: Arc<GraphTopology>,
    weights: Tensor,
    tails: Tensor,
}

impl AttentionSnapshot {
    /// Wrap `(E,)` weights in storage order.
    pub fn new(graph: Arc<GraphTopology>, weights: Tensor) -> Result<Self> {
        let e = weights.dims1()?;
        if e != graph.num_edges() {
            return Err(Error::ShapeMismatch {
                name: "attention weights".into(),
                expected: vec![graph.num_edges()],
                got: vec![e],
            });
        }
        let tails = index_tensor(graph.tails(), weights.device())?;
        Ok(Self {
            graph,
            weights,
            tails,
        })
    }

    pub fn graph(&self) -> &Arc<GraphTopology> {
        &self.graph
    }

    /// `(E,)` weights in topology storage order.
    pub fn weights(&self) -> &Tensor {
        &self.weights
    }

    pub fn weights_vec(&self) -> Result<Vec<f32>> {
        Ok(self.weights.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }

    /// `(source, relation, weight)` for every incoming edge of `node`.
    pub fn incoming_edges(&self, node: usize) -> Result<Vec<(usize, usize, f32)>> {
        let Range { start, end } = self.graph.incoming(node);
        if start == end {
            return Ok(Vec::new());
        }
        let w = self
            .weights
            .narrow(0, start, end - start)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        Ok((start..end)
            .zip(w)
            .map(|(idx, w)| {
                let e = self.graph.edge(idx);
                (e.tail, e.relation, w)
            })
            .collect())
    }

    /// Attention-weighted sum of source features per destination:
    /// `n_v = sum_{e in in(v)} att_e * x_tail(e)`, `(N, d)`.
    pub fn aggregate(&self, features: &Tensor, policy: ReductionPolicy) -> Result<Tensor> {
        let (_, d) = features.dims2()?;
        if self.graph.num_edges() == 0 {
            return Ok(Tensor::zeros(
                (self.graph.num_nodes(), d),
                features.dtype(),
                features.device(),
            )?);
        }
        let messages = features
            .index_select(&self.tails, 0)?
            .broadcast_mul(&self.weights.unsqueeze(1)?)?;
        segment_sum(&self.graph, &messages, policy)
    }
}
