//! Knowledge-aware graph attention on candle.
//!
//! `kgat-nn` learns user, item and entity embeddings by propagating
//! attention-weighted messages over a collaborative knowledge graph built by
//! `kgat-core`, and trains them with two coupled objectives: a translational
//! KG loss and a pairwise ranking loss.
//!
//! # Modules
//!
//! - [`embedding`]: embedding tables, relation projections, pretrain merge
//! - [`attention`]: per-relation scoring and [`AttentionSnapshot`]
//! - [`softmax`]: segment sums and edge softmax under a [`ReductionPolicy`]
//! - [`aggregator`]: `gcn`, `graphsage`, `bi-interaction`
//! - [`propagation`]: the layer stack
//! - [`loss`]: KG / CF losses and scoring
//! - [`model`]: [`Kgat`], tying the above together
//! - [`checkpoint`]: safetensors save / load
//! - [`trainer`]: alternating training loop and evaluation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use candle_core::Device;
//! use kgat_core::CollaborativeKg;
//! use kgat_nn::{Kgat, KgatConfig, ReductionPolicy};
//!
//! let ckg = CollaborativeKg::from_dir("data/last-fm")?;
//! let graph = Arc::new(ckg.topology()?);
//! let model = Kgat::new(KgatConfig::default(), ckg.dims, None, &Device::Cpu)?;
//!
//! let attention = model.compute_attention(graph, ReductionPolicy::Deterministic)?;
//! let scores = model.score(&attention, &[ckg.dims.user_node(0) as u32], &[0, 1, 2])?;
//! ```

pub mod aggregator;
pub mod attention;
pub mod checkpoint;
pub mod config;
pub mod embedding;
pub mod error;
pub mod loss;
pub mod model;
pub mod propagation;
pub mod softmax;
pub mod trainer;

pub use aggregator::{Aggregator, AggregatorKind, AggregatorLayer};
pub use attention::{score_relation, AttentionSnapshot};
pub use config::{parse_dim_list, parse_dropout_list, KgatConfig, TrainConfig};
pub use embedding::{EmbeddingTables, PretrainedEmbeddings, RelationProjection};
pub use error::{Error, Result};
pub use model::{ForwardMode, ForwardOutput, Kgat};
pub use propagation::PropagationStack;
pub use softmax::{edge_softmax, segment_sum, ReductionPolicy};
pub use trainer::{EpochStats, FitReport, Trainer};
