//! The knowledge-aware graph attention model.
//!
//! [`Kgat`] owns every parameter in a single [`VarMap`] shared by both
//! objectives. A training step is:
//!
//! 1. [`Kgat::compute_attention`] over the fixed topology,
//! 2. propagation through the aggregator stack,
//! 3. one of the two losses,
//! 4. an optimizer step on [`Kgat::varmap`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use kgat_core::{CfBatch, GraphDims, GraphTopology, KgBatch};
use tracing::debug;

use crate::attention::{self, AttentionSnapshot};
use crate::checkpoint;
use crate::config::KgatConfig;
use crate::embedding::{merge_pretrained, EmbeddingTables, PretrainedEmbeddings, RelationProjection};
use crate::error::{Error, Result};
use crate::loss;
use crate::propagation::PropagationStack;
use crate::softmax::{index_tensor, ReductionPolicy};

/// What [`Kgat::forward`] computes.
#[derive(Debug, Clone, Copy)]
pub enum ForwardMode<'a> {
    /// Translational loss on raw embeddings.
    KgLoss(&'a KgBatch),
    /// Ranking loss on propagated embeddings (throughput reduction).
    CfLoss {
        attention: &'a AttentionSnapshot,
        batch: &'a CfBatch,
    },
    /// `(users, items)` score matrix (deterministic reduction, no dropout).
    Predict {
        attention: &'a AttentionSnapshot,
        users: &'a [u32],
        items: &'a [u32],
    },
}

/// Result of [`Kgat::forward`].
#[derive(Debug, Clone)]
pub enum ForwardOutput {
    Loss(Tensor),
    Scores(Tensor),
}

impl ForwardOutput {
    pub fn into_tensor(self) -> Tensor {
        match self {
            Self::Loss(t) | Self::Scores(t) => t,
        }
    }
}

pub struct Kgat {
    config: KgatConfig,
    dims: GraphDims,
    device: Device,
    varmap: VarMap,
    tables: EmbeddingTables,
    projection: RelationProjection,
    propagation: PropagationStack,
}

// `VarMap` is not `Debug`, so the impl is written by hand and skips it.
impl std::fmt::Debug for Kgat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kgat")
            .field("config", &self.config)
            .field("dims", &self.dims)
            .field("device", &self.device)
            .field("tables", &self.tables)
            .field("projection", &self.projection)
            .field("propagation", &self.propagation)
            .finish_non_exhaustive()
    }
}

impl Kgat {
    /// Build a freshly initialized model.
    ///
    /// Fails with `InvalidConfig` on a bad config and with `ShapeMismatch`
    /// when `pretrained` disagrees with `dims` or `entity_dim`.
    pub fn new(
        config: KgatConfig,
        dims: GraphDims,
        pretrained: Option<&PretrainedEmbeddings>,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let kind = config.aggregator()?;
        if let Some(pre) = pretrained {
            pre.validate(&dims, config.entity_dim)?;
        }

        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let tables = EmbeddingTables::new(&dims, config.entity_dim, config.relation_dim, &vb)?;
        let projection =
            RelationProjection::new(dims.n_relations, config.entity_dim, config.relation_dim, &vb)?;
        let propagation = PropagationStack::new(&config, kind, vb)?;

        if let Some(pre) = pretrained {
            merge_pretrained(&mut varmap, tables.entity_user(), &dims, config.entity_dim, pre)?;
        }
        debug!(
            aggregator = %kind,
            layers = propagation.num_layers(),
            output_dim = propagation.output_dim(),
            params = varmap.all_vars().len(),
            "built model"
        );

        Ok(Self {
            config,
            dims,
            device: device.clone(),
            varmap,
            tables,
            projection,
            propagation,
        })
    }

    pub fn config(&self) -> &KgatConfig {
        &self.config
    }

    pub fn dims(&self) -> &GraphDims {
        &self.dims
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// All trainable parameters.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn tables(&self) -> &EmbeddingTables {
        &self.tables
    }

    pub fn projection(&self) -> &RelationProjection {
        &self.projection
    }

    pub fn propagation(&self) -> &PropagationStack {
        &self.propagation
    }

    /// Recompute normalized attention over `graph` from the current parameters.
    pub fn compute_attention(
        &self,
        graph: Arc<GraphTopology>,
        policy: ReductionPolicy,
    ) -> Result<AttentionSnapshot> {
        if graph.num_nodes() != self.dims.n_nodes() {
            return Err(Error::ShapeMismatch {
                name: "graph nodes".into(),
                expected: vec![self.dims.n_nodes()],
                got: vec![graph.num_nodes()],
            });
        }
        if graph.num_relations() > self.dims.n_relations {
            return Err(Error::Graph(kgat_core::Error::InvalidGraph(format!(
                "graph has {} relations, model has {}",
                graph.num_relations(),
                self.dims.n_relations
            ))));
        }
        attention::compute(
            graph,
            self.tables.entity_user(),
            &self.projection,
            self.tables.relation(),
            policy,
        )
    }

    /// Propagated `(n_nodes, output_dim)` representation of every node.
    pub fn cf_embedding(
        &self,
        attention: &AttentionSnapshot,
        policy: ReductionPolicy,
        train: bool,
    ) -> Result<Tensor> {
        self.propagation
            .forward(self.tables.entity_user(), attention, policy, train)
    }

    /// Translational loss for a KG batch.
    pub fn kg_loss(&self, batch: &KgBatch) -> Result<Tensor> {
        let ids = |v: &[u32]| index_tensor(v, &self.device);
        let relations = ids(&batch.relations)?;
        loss::kg_loss(
            &self.tables.lookup(&ids(&batch.heads)?)?,
            &self.tables.relation_lookup(&relations)?,
            &self.tables.lookup(&ids(&batch.pos_tails)?)?,
            &self.tables.lookup(&ids(&batch.neg_tails)?)?,
            &self.projection.batched(&relations)?,
            self.config.kg_l2loss_lambda,
        )
    }

    /// Ranking loss for a CF batch.
    pub fn cf_loss(
        &self,
        attention: &AttentionSnapshot,
        batch: &CfBatch,
        policy: ReductionPolicy,
        train: bool,
    ) -> Result<Tensor> {
        let all = self.cf_embedding(attention, policy, train)?;
        let rows = |v: &[u32]| -> Result<Tensor> {
            Ok(all.index_select(&index_tensor(v, &self.device)?, 0)?)
        };
        loss::cf_loss(
            &rows(&batch.users)?,
            &rows(&batch.pos_items)?,
            &rows(&batch.neg_items)?,
            self.config.cf_l2loss_lambda,
        )
    }

    /// Score `users x items` from an already propagated table.
    pub fn score_from(&self, all: &Tensor, users: &[u32], items: &[u32]) -> Result<Tensor> {
        let u = all.index_select(&index_tensor(users, &self.device)?, 0)?;
        let i = all.index_select(&index_tensor(items, &self.device)?, 0)?;
        loss::score(&u, &i)
    }

    /// `(users, items)` affinity matrix. User ids are node ids.
    pub fn score(&self, attention: &AttentionSnapshot, users: &[u32], items: &[u32]) -> Result<Tensor> {
        let all = self.cf_embedding(attention, ReductionPolicy::Deterministic, false)?;
        self.score_from(&all, users, items)
    }

    /// Dispatch on `mode`. `train` enables message dropout for `CfLoss`.
    pub fn forward(&self, mode: ForwardMode<'_>, train: bool) -> Result<ForwardOutput> {
        match mode {
            ForwardMode::KgLoss(batch) => self.kg_loss(batch).map(ForwardOutput::Loss),
            ForwardMode::CfLoss { attention, batch } => self
                .cf_loss(attention, batch, ReductionPolicy::Throughput, train)
                .map(ForwardOutput::Loss),
            ForwardMode::Predict {
                attention,
                users,
                items,
            } => self.score(attention, users, items).map(ForwardOutput::Scores),
        }
    }

    /// Save to `dir/model_epoch{epoch}.safetensors`.
    pub fn save(&self, dir: impl AsRef<Path>, epoch: usize) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = checkpoint::checkpoint_path(dir, epoch);
        checkpoint::save(&self.varmap, &path, epoch)?;
        Ok(path)
    }

    /// Load parameters in place, returning the stored epoch.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<usize> {
        checkpoint::load(&self.varmap, path, &self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> KgatConfig {
        KgatConfig::default()
            .with_entity_dim(4)
            .with_relation_dim(3)
            .with_aggregator("gcn")
            .with_layers(vec![4, 2], vec![0.0, 0.0])
    }

    #[test]
    fn test_parameter_names() {
        let dims = GraphDims::new(2, 2, 3, 4).unwrap();
        let model = Kgat::new(tiny_config(), dims, None, &Device::Cpu).unwrap();
        let data = model.varmap().data().lock().unwrap();
        for name in [
            "entity_user_embed",
            "relation_embed",
            "W_R",
            "aggregator_layers.0.W.weight",
            "aggregator_layers.1.W.bias",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert_eq!(data["W_R"].dims(), &[4, 4, 3]);
    }

    #[test]
    fn test_graph_size_checked() {
        let dims = GraphDims::new(1, 2, 2, 1).unwrap();
        let model = Kgat::new(tiny_config(), dims, None, &Device::Cpu).unwrap();
        let graph = Arc::new(GraphTopology::build(5, 1, Vec::new()).unwrap());
        assert!(matches!(
            model.compute_attention(graph, ReductionPolicy::Deterministic),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let dims = GraphDims::new(1, 2, 2, 1).unwrap();
        let config = tiny_config().with_aggregator("attention");
        assert!(matches!(
            Kgat::new(config, dims, None, &Device::Cpu),
            Err(Error::InvalidConfig(_))
        ));
    }
}
