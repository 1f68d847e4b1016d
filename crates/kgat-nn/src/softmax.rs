//! Per-destination reductions and edge softmax.
//!
//! Both the softmax denominator and the neighbor message of an aggregator are
//! segment sums over the incoming edges of each node. [`ReductionPolicy`]
//! picks how that sum is computed:
//!
//! | policy | mechanism | gradients | reproducible |
//! |--------|-----------|-----------|--------------|
//! | `Throughput` | tensor `index_add` on the device | yes | no guarantee |
//! | `Deterministic` | host sum per CSR row, in storage order | no | bit-identical |
//!
//! Deterministic rows are summed in parallel across nodes, but each row is
//! summed sequentially, so the result does not depend on the thread count.

use candle_core::{DType, Device, Tensor};
use kgat_core::GraphTopology;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

/// How per-destination sums are reduced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionPolicy {
    /// Device scatter-add. Differentiable; used for training.
    #[default]
    Throughput,
    /// Fixed-order host reduction. Gradient-free; used for evaluation and tests.
    Deterministic,
}

/// Upload a `u32` index slice.
pub fn index_tensor(ids: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::from_slice(ids, ids.len(), device)?)
}

fn check_edges(graph: &GraphTopology, rows: usize, what: &str) -> Result<()> {
    if rows != graph.num_edges() {
        return Err(Error::ShapeMismatch {
            name: what.to_string(),
            expected: vec![graph.num_edges()],
            got: vec![rows],
        });
    }
    Ok(())
}

/// Sum `(E, d)` edge values into `(N, d)` rows by destination node.
///
/// Nodes without incoming edges get a zero row.
pub fn segment_sum(graph: &GraphTopology, values: &Tensor, policy: ReductionPolicy) -> Result<Tensor> {
    let (e, d) = values.dims2()?;
    check_edges(graph, e, "edge values")?;
    let n = graph.num_nodes();
    let device = values.device();
    if e == 0 || d == 0 {
        return Ok(Tensor::zeros((n, d), values.dtype(), device)?);
    }
    match policy {
        ReductionPolicy::Throughput => {
            let heads = index_tensor(graph.heads(), device)?;
            let zeros = Tensor::zeros((n, d), values.dtype(), device)?;
            Ok(zeros.index_add(&heads, &values.contiguous()?, 0)?)
        }
        ReductionPolicy::Deterministic => {
            let flat = values
                .detach()
                .to_dtype(DType::F32)?
                .flatten_all()?
                .to_vec1::<f32>()?;
            let mut out = vec![0f32; n * d];
            out.par_chunks_mut(d).enumerate().for_each(|(v, row)| {
                for idx in graph.incoming(v) {
                    for (o, x) in row.iter_mut().zip(&flat[idx * d..(idx + 1) * d]) {
                        *o += *x;
                    }
                }
            });
            Ok(Tensor::from_vec(out, (n, d), device)?.to_dtype(values.dtype())?)
        }
    }
}

/// Per-destination maximum of `(E,)` edge scores, `(N,)`. Nodes without
/// incoming edges get 0. Gradient-free.
fn segment_max(graph: &GraphTopology, scores: &Tensor) -> Result<Tensor> {
    let s = scores.detach().to_dtype(DType::F32)?.to_vec1::<f32>()?;
    let max: Vec<f32> = (0..graph.num_nodes())
        .into_par_iter()
        .map(|v| {
            graph
                .incoming(v)
                .map(|idx| s[idx])
                .fold(None, |acc: Option<f32>, x| Some(acc.map_or(x, |m| m.max(x))))
                .unwrap_or(0.0)
        })
        .collect();
    Ok(Tensor::from_vec(max, graph.num_nodes(), scores.device())?.to_dtype(scores.dtype())?)
}

/// Softmax of `(E,)` raw scores over the incoming edges of each destination.
///
/// Scores are shifted by their destination's maximum before exponentiating;
/// the shift is a constant, so the result and its gradient are unchanged.
/// Non-finite weights are logged, not raised.
pub fn edge_softmax(graph: &GraphTopology, scores: &Tensor, policy: ReductionPolicy) -> Result<Tensor> {
    let e = scores.dims1()?;
    check_edges(graph, e, "edge scores")?;
    if e == 0 {
        return Ok(scores.clone());
    }
    let device = scores.device();
    let heads = index_tensor(graph.heads(), device)?;

    let shift = segment_max(graph, scores)?.index_select(&heads, 0)?;
    let exp = scores.sub(&shift)?.exp()?;
    let denom = segment_sum(graph, &exp.unsqueeze(1)?, policy)?.squeeze(1)?;
    let weights = exp.div(&denom.index_select(&heads, 0)?)?;

    let total = weights.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    if !total.is_finite() {
        warn!(edges = e, ?policy, "non-finite attention weights (numeric instability)");
    }
    Ok(weights)
}
