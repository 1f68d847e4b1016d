//! Substrate for knowledge-aware recommendation.
//!
//! `kgat-core` owns everything that is not a tensor: the unified node id
//! space, the immutable CSR topology that attention and propagation run over,
//! reading the raw data files into a collaborative knowledge graph, seeded
//! negative sampling, and top-K ranking metrics.
//!
//! # Modules
//!
//! - [`graph`]: [`GraphDims`], [`Edge`], [`GraphTopology`]
//! - [`data`]: triple / interaction parsing and [`CollaborativeKg`]
//! - [`sampling`]: [`CfSampler`] and [`KgSampler`]
//! - [`metrics`]: Recall@K, NDCG@K, early stopping
//!
//! # Example
//!
//! ```rust
//! use kgat_core::{CollaborativeKg, Triple};
//!
//! let train = vec![(0, vec![0, 1])];
//! let test = vec![(0, vec![2])];
//! let kg = vec![Triple::new(0, 0, 3), Triple::new(2, 0, 3)];
//!
//! let ckg = CollaborativeKg::build(&train, &test, &kg).unwrap();
//! let graph = ckg.topology().unwrap();
//!
//! assert_eq!(graph.num_nodes(), ckg.dims.n_nodes());
//! // user 0 (node 4) aggregates from its two training items
//! assert_eq!(graph.in_degree(ckg.dims.user_node(0)), 2);
//! ```

pub mod data;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod sampling;

pub use data::{CollaborativeKg, Interactions, Triple};
pub use error::{Error, Result};
pub use graph::{Edge, GraphDims, GraphTopology};
pub use metrics::{early_stopping, EarlyStop, RankingMetrics};
pub use sampling::{CfBatch, CfSampler, KgBatch, KgSampler};
