//! Multi-layer propagation.
//!
//! ```text
//! e_0 = base table
//! e_l = normalize(layer_l(e_{l-1}))
//! out = e_0 ‖ e_1 ‖ ... ‖ e_L
//! ```

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::aggregator::{AggregatorKind, AggregatorLayer};
use crate::attention::AttentionSnapshot;
use crate::config::KgatConfig;
use crate::error::Result;
use crate::softmax::ReductionPolicy;

/// Row-wise L2 normalization.
pub fn l2_normalize(x: &Tensor) -> Result<Tensor> {
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?;
    Ok(x.broadcast_div(&(norm + 1e-12)?)?)
}

/// `L` aggregator layers applied in sequence.
#[derive(Debug, Clone)]
pub struct PropagationStack {
    layers: Vec<AggregatorLayer>,
    base_dim: usize,
}

impl PropagationStack {
    /// Layer `i` maps `conv_dim_list[i - 1]` (or `entity_dim`) to
    /// `conv_dim_list[i]`. Parameters live under `aggregator_layers.{i}`.
    pub fn new(config: &KgatConfig, kind: AggregatorKind, vb: VarBuilder) -> Result<Self> {
        let vb = vb.pp("aggregator_layers");
        let mut layers = Vec::with_capacity(config.conv_dim_list.len());
        let mut in_dim = config.entity_dim;
        for (i, (&out_dim, &p)) in config
            .conv_dim_list
            .iter()
            .zip(&config.mess_dropout)
            .enumerate()
        {
            layers.push(AggregatorLayer::new(
                kind,
                in_dim,
                out_dim,
                p,
                config.negative_slope,
                vb.pp(i.to_string()),
            )?);
            in_dim = out_dim;
        }
        Ok(Self {
            layers,
            base_dim: config.entity_dim,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[AggregatorLayer] {
        &self.layers
    }

    /// `base_dim + Σ out_dim`.
    pub fn output_dim(&self) -> usize {
        self.base_dim + self.layers.iter().map(|l| l.out_dim()).sum::<usize>()
    }

    /// Propagate `(N, base_dim)` to `(N, output_dim)`.
    pub fn forward(
        &self,
        base: &Tensor,
        attention: &AttentionSnapshot,
        policy: ReductionPolicy,
        train: bool,
    ) -> Result<Tensor> {
        let mut outputs = Vec::with_capacity(self.layers.len() + 1);
        outputs.push(base.clone());
        let mut ego = base.clone();
        for layer in &self.layers {
            ego = l2_normalize(&layer.forward(&ego, attention, policy, train)?)?;
            outputs.push(ego.clone());
        }
        Ok(Tensor::cat(&outputs, 1)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use kgat_core::{Edge, GraphTopology};

    #[test]
    fn test_l2_normalize_unit_rows() {
        let x = Tensor::new(&[[3f32, 4.], [0., 0.]], &Device::Cpu).unwrap();
        let y = l2_normalize(&x).unwrap().to_vec2::<f32>().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-6);
        assert!((y[0][1] - 0.8).abs() < 1e-6);
        // zero rows stay zero instead of NaN
        assert_eq!(y[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_output_width_is_base_plus_layers() {
        let device = Device::Cpu;
        let config = KgatConfig::default()
            .with_entity_dim(8)
            .with_layers(vec![6, 4, 2], vec![0.0, 0.0, 0.0]);
        for kind in [
            AggregatorKind::Gcn,
            AggregatorKind::GraphSage,
            AggregatorKind::BiInteraction,
        ] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let stack = PropagationStack::new(&config, kind, vb).unwrap();
            assert_eq!(stack.output_dim(), 8 + 6 + 4 + 2);

            let graph = Arc::new(
                GraphTopology::build(3, 1, vec![Edge::new(0, 0, 1), Edge::new(1, 0, 2)]).unwrap(),
            );
            let weights = Tensor::ones(2, DType::F32, &device).unwrap();
            let att = AttentionSnapshot::new(graph, weights).unwrap();
            let base = Tensor::randn(0f32, 1f32, (3, 8), &device).unwrap();
            let out = stack
                .forward(&base, &att, ReductionPolicy::Deterministic, false)
                .unwrap();
            assert_eq!(out.dims(), &[3, stack.output_dim()]);
        }
    }
}
