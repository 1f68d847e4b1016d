//! Aggregation strategies.
//!
//! Each layer combines a node's own representation `s` with its attention
//! weighted neighbor message `n`:
//!
//! | kind | transform |
//! |------|-----------|
//! | `gcn` | `σ(W (s + n))` |
//! | `graphsage` | `σ(W [s ‖ n])` |
//! | `bi-interaction` | `σ(W1 (s + n)) + σ(W2 (s ⊙ n))` |
//!
//! `σ` is LeakyReLU, followed by message dropout in training mode.

use std::fmt;
use std::str::FromStr;

use candle_core::Tensor;
use candle_nn::{linear, Dropout, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

use crate::attention::AttentionSnapshot;
use crate::error::{Error, Result};
use crate::softmax::ReductionPolicy;

/// Aggregator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregatorKind {
    Gcn,
    #[serde(rename = "graphsage")]
    GraphSage,
    BiInteraction,
}

impl AggregatorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gcn => "gcn",
            Self::GraphSage => "graphsage",
            Self::BiInteraction => "bi-interaction",
        }
    }
}

impl FromStr for AggregatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gcn" => Ok(Self::Gcn),
            "graphsage" => Ok(Self::GraphSage),
            "bi-interaction" => Ok(Self::BiInteraction),
            other => Err(Error::InvalidConfig(format!(
                "unknown aggregator {other:?} (expected gcn, graphsage or bi-interaction)"
            ))),
        }
    }
}

impl fmt::Display for AggregatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learned combination of self and neighbor representations.
#[derive(Debug, Clone)]
pub enum Aggregator {
    Gcn { w: Linear },
    GraphSage { w: Linear },
    BiInteraction { w1: Linear, w2: Linear },
}

impl Aggregator {
    pub fn new(kind: AggregatorKind, in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match kind {
            AggregatorKind::Gcn => Self::Gcn {
                w: linear(in_dim, out_dim, vb.pp("W"))?,
            },
            AggregatorKind::GraphSage => Self::GraphSage {
                w: linear(in_dim * 2, out_dim, vb.pp("W"))?,
            },
            AggregatorKind::BiInteraction => Self::BiInteraction {
                w1: linear(in_dim, out_dim, vb.pp("W1"))?,
                w2: linear(in_dim, out_dim, vb.pp("W2"))?,
            },
        })
    }

    pub fn kind(&self) -> AggregatorKind {
        match self {
            Self::Gcn { .. } => AggregatorKind::Gcn,
            Self::GraphSage { .. } => AggregatorKind::GraphSage,
            Self::BiInteraction { .. } => AggregatorKind::BiInteraction,
        }
    }

    /// Combine `(N, in)` self and neighbor rows into `(N, out)`, activation
    /// included.
    pub fn combine(&self, ego: &Tensor, neighbor: &Tensor, negative_slope: f64) -> Result<Tensor> {
        let act = |x: Tensor| candle_nn::ops::leaky_relu(&x, negative_slope);
        let out = match self {
            Self::Gcn { w } => act(w.forward(&(ego + neighbor)?)?)?,
            Self::GraphSage { w } => act(w.forward(&Tensor::cat(&[ego, neighbor], 1)?)?)?,
            Self::BiInteraction { w1, w2 } => {
                let sum = act(w1.forward(&(ego + neighbor)?)?)?;
                let bi = act(w2.forward(&(ego * neighbor)?)?)?;
                (sum + bi)?
            }
        };
        Ok(out)
    }
}

/// One propagation layer: neighbor aggregation, combination, dropout.
#[derive(Debug, Clone)]
pub struct AggregatorLayer {
    aggregator: Aggregator,
    dropout: Dropout,
    negative_slope: f64,
    in_dim: usize,
    out_dim: usize,
}

impl AggregatorLayer {
    pub fn new(
        kind: AggregatorKind,
        in_dim: usize,
        out_dim: usize,
        dropout: f32,
        negative_slope: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            aggregator: Aggregator::new(kind, in_dim, out_dim, vb)?,
            dropout: Dropout::new(dropout),
            negative_slope,
            in_dim,
            out_dim,
        })
    }

    pub fn kind(&self) -> AggregatorKind {
        self.aggregator.kind()
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    /// Combine precomputed neighbor messages with `ego`.
    pub fn combine(&self, ego: &Tensor, neighbor: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.aggregator.combine(ego, neighbor, self.negative_slope)?;
        Ok(self.dropout.forward(&out, train)?)
    }

    /// Aggregate over `attention` and combine. `(N, in) -> (N, out)`.
    pub fn forward(
        &self,
        ego: &Tensor,
        attention: &AttentionSnapshot,
        policy: ReductionPolicy,
        train: bool,
    ) -> Result<Tensor> {
        let neighbor = attention.aggregate(ego, policy)?;
        self.combine(ego, &neighbor, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in [
            AggregatorKind::Gcn,
            AggregatorKind::GraphSage,
            AggregatorKind::BiInteraction,
        ] {
            assert_eq!(kind.to_string().parse::<AggregatorKind>().unwrap(), kind);
        }
        assert!(matches!(
            "mean".parse::<AggregatorKind>(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_output_width_per_kind() {
        let device = Device::Cpu;
        let ego = Tensor::randn(0f32, 1f32, (5, 6), &device).unwrap();
        let nb = Tensor::randn(0f32, 1f32, (5, 6), &device).unwrap();
        for kind in [
            AggregatorKind::Gcn,
            AggregatorKind::GraphSage,
            AggregatorKind::BiInteraction,
        ] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let layer = AggregatorLayer::new(kind, 6, 3, 0.1, 0.01, vb).unwrap();
            let out = layer.combine(&ego, &nb, false).unwrap();
            assert_eq!(out.dims(), &[5, 3], "{kind}");
        }
    }

    #[test]
    fn test_parameter_names() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        AggregatorLayer::new(AggregatorKind::BiInteraction, 4, 2, 0.0, 0.01, vb.pp("layer")).unwrap();
        let data = varmap.data().lock().unwrap();
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        assert_eq!(
            names,
            vec!["layer.W1.bias", "layer.W1.weight", "layer.W2.bias", "layer.W2.weight"]
        );
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let layer = AggregatorLayer::new(AggregatorKind::Gcn, 4, 4, 0.5, 0.01, vb).unwrap();
        let x = Tensor::randn(0f32, 1f32, (3, 4), &device).unwrap();
        let a = layer.combine(&x, &x, false).unwrap().to_vec2::<f32>().unwrap();
        let b = layer.combine(&x, &x, false).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(a, b);
    }
}
