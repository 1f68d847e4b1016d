//! Model and training configuration.
//!
//! Both configs are plain serde structs with `#[serde(default)]`, so a JSON
//! file only needs the fields it overrides:
//!
//! ```json
//! { "aggregation_type": "gcn", "conv_dim_list": [32, 16], "mess_dropout": [0.1, 0.1] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregator::AggregatorKind;
use crate::error::{Error, Result};

/// Model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KgatConfig {
    /// Width of user / entity embeddings (default: 64).
    pub entity_dim: usize,
    /// Width of relation embeddings (default: 64).
    pub relation_dim: usize,
    /// One of `gcn`, `graphsage`, `bi-interaction` (default: `bi-interaction`).
    pub aggregation_type: String,
    /// Output width of each propagation layer (default: `[64, 32, 16]`).
    pub conv_dim_list: Vec<usize>,
    /// Message dropout per layer (default: `[0.1, 0.1, 0.1]`).
    pub mess_dropout: Vec<f32>,
    /// L2 weight of the translational loss (default: 1e-5).
    pub kg_l2loss_lambda: f64,
    /// L2 weight of the ranking loss (default: 1e-5).
    pub cf_l2loss_lambda: f64,
    /// LeakyReLU slope in the aggregators (default: 0.01).
    pub negative_slope: f64,
}

impl Default for KgatConfig {
    fn default() -> Self {
        Self {
            entity_dim: 64,
            relation_dim: 64,
            aggregation_type: "bi-interaction".to_string(),
            conv_dim_list: vec![64, 32, 16],
            mess_dropout: vec![0.1, 0.1, 0.1],
            kg_l2loss_lambda: 1e-5,
            cf_l2loss_lambda: 1e-5,
            negative_slope: 0.01,
        }
    }
}

impl KgatConfig {
    pub fn with_entity_dim(mut self, dim: usize) -> Self {
        self.entity_dim = dim;
        self
    }

    pub fn with_relation_dim(mut self, dim: usize) -> Self {
        self.relation_dim = dim;
        self
    }

    pub fn with_aggregator(mut self, name: impl Into<String>) -> Self {
        self.aggregation_type = name.into();
        self
    }

    /// Set layer widths and dropout together; they must have equal length.
    pub fn with_layers(mut self, dims: Vec<usize>, dropout: Vec<f32>) -> Self {
        self.conv_dim_list = dims;
        self.mess_dropout = dropout;
        self
    }

    pub fn with_l2_lambdas(mut self, kg: f64, cf: f64) -> Self {
        self.kg_l2loss_lambda = kg;
        self.cf_l2loss_lambda = cf;
        self
    }

    /// Parsed aggregator kind.
    pub fn aggregator(&self) -> Result<AggregatorKind> {
        self.aggregation_type.parse()
    }

    /// Width of the propagated representation: base width plus every layer.
    pub fn output_dim(&self) -> usize {
        self.entity_dim + self.conv_dim_list.iter().sum::<usize>()
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity_dim == 0 || self.relation_dim == 0 {
            return Err(Error::InvalidConfig(
                "entity_dim and relation_dim must be positive".into(),
            ));
        }
        if self.conv_dim_list.is_empty() {
            return Err(Error::InvalidConfig("conv_dim_list is empty".into()));
        }
        if self.conv_dim_list.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "conv_dim_list contains a zero width: {:?}",
                self.conv_dim_list
            )));
        }
        if self.mess_dropout.len() != self.conv_dim_list.len() {
            return Err(Error::InvalidConfig(format!(
                "mess_dropout has {} entries for {} layers",
                self.mess_dropout.len(),
                self.conv_dim_list.len()
            )));
        }
        if let Some(p) = self.mess_dropout.iter().find(|p| !(0.0..1.0).contains(*p)) {
            return Err(Error::InvalidConfig(format!(
                "dropout {p} outside [0, 1)"
            )));
        }
        for (name, v) in [
            ("kg_l2loss_lambda", self.kg_l2loss_lambda),
            ("cf_l2loss_lambda", self.cf_l2loss_lambda),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::InvalidConfig(format!("{name} = {v}")));
            }
        }
        self.aggregator()?;
        Ok(())
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Training-loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Adam learning rate (default: 1e-4).
    pub lr: f64,
    /// Maximum epochs (default: 1000).
    pub epochs: usize,
    /// Ranking-loss batch size (default: 1024).
    pub cf_batch_size: usize,
    /// Translational-loss batch size (default: 2048).
    pub kg_batch_size: usize,
    /// Users scored per evaluation batch (default: 10000).
    pub test_batch_size: usize,
    /// Sampler seed (default: 2019).
    pub seed: u64,
    /// Evaluations without improvement before stopping (default: 10).
    pub stopping_steps: usize,
    /// Evaluate every N epochs (default: 10).
    pub evaluate_every: usize,
    /// Cutoffs for Recall@K / NDCG@K (default: `[20, 40, 60, 80, 100]`).
    pub ks: Vec<usize>,
    /// Where the best checkpoint is kept; `None` disables saving.
    pub save_dir: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-4,
            epochs: 1000,
            cf_batch_size: 1024,
            kg_batch_size: 2048,
            test_batch_size: 10000,
            seed: 2019,
            stopping_steps: 10,
            evaluate_every: 10,
            ks: vec![20, 40, 60, 80, 100],
            save_dir: None,
        }
    }
}

impl TrainConfig {
    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_sizes(mut self, cf: usize, kg: usize) -> Self {
        self.cf_batch_size = cf;
        self.kg_batch_size = kg;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_evaluate_every(mut self, n: usize) -> Self {
        self.evaluate_every = n;
        self
    }

    pub fn with_stopping_steps(mut self, n: usize) -> Self {
        self.stopping_steps = n;
        self
    }

    pub fn with_ks(mut self, ks: Vec<usize>) -> Self {
        self.ks = ks;
        self
    }

    pub fn with_save_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.save_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cf_batch_size == 0 || self.kg_batch_size == 0 || self.test_batch_size == 0 {
            return Err(Error::InvalidConfig("batch sizes must be positive".into()));
        }
        if self.evaluate_every == 0 {
            return Err(Error::InvalidConfig("evaluate_every must be positive".into()));
        }
        if self.ks.is_empty() || self.ks.contains(&0) {
            return Err(Error::InvalidConfig(format!("invalid K list {:?}", self.ks)));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(Error::InvalidConfig(format!("learning rate {}", self.lr)));
        }
        Ok(())
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn split_list(s: &str) -> Result<Vec<&str>> {
    let s = s.trim();
    let inner = match (s.strip_prefix('['), s.strip_suffix(']')) {
        (Some(_), Some(_)) => &s[1..s.len() - 1],
        (None, None) => s,
        _ => return Err(Error::InvalidConfig(format!("unbalanced brackets in {s:?}"))),
    };
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::InvalidConfig(format!("empty entry in {s:?}")));
    }
    Ok(parts)
}

/// Parse a layer-width list such as `[64, 32, 16]` or `64,32,16`.
pub fn parse_dim_list(s: &str) -> Result<Vec<usize>> {
    split_list(s)?
        .into_iter()
        .map(|p| {
            p.parse::<usize>()
                .map_err(|e| Error::InvalidConfig(format!("layer width {p:?}: {e}")))
        })
        .collect()
}

/// Parse a per-layer dropout list such as `[0.1, 0.1, 0.1]`.
pub fn parse_dropout_list(s: &str) -> Result<Vec<f32>> {
    split_list(s)?
        .into_iter()
        .map(|p| {
            p.parse::<f32>()
                .map_err(|e| Error::InvalidConfig(format!("dropout {p:?}: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let c = KgatConfig::default();
        c.validate().unwrap();
        assert_eq!(c.output_dim(), 64 + 64 + 32 + 16);
        TrainConfig::default().validate().unwrap();
    }

    #[test]
    fn test_parse_dim_list() {
        assert_eq!(parse_dim_list("[64, 32, 16]").unwrap(), vec![64, 32, 16]);
        assert_eq!(parse_dim_list("64,32,16").unwrap(), vec![64, 32, 16]);
        assert_eq!(parse_dim_list(" [8] ").unwrap(), vec![8]);
    }

    #[test]
    fn test_parse_dim_list_rejects_malformed() {
        for bad in ["[64, 32", "64,,32", "[]", "a,b", "[-1]", ""] {
            assert!(
                matches!(parse_dim_list(bad), Err(Error::InvalidConfig(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_parse_dropout_list() {
        assert_eq!(parse_dropout_list("[0.1, 0.0]").unwrap(), vec![0.1, 0.0]);
        assert!(parse_dropout_list("[0.1, x]").is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_aggregator() {
        let c = KgatConfig::default().with_aggregator("mean");
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_dropout_mismatch() {
        let c = KgatConfig::default().with_layers(vec![8, 4], vec![0.1]);
        assert!(c.validate().is_err());
        let c = KgatConfig::default().with_layers(vec![8], vec![1.0]);
        assert!(c.validate().is_err());
        let c = KgatConfig::default().with_layers(vec![0], vec![0.0]);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_json_overrides_only_given_fields() {
        let c: KgatConfig =
            serde_json::from_str(r#"{"aggregation_type": "gcn", "conv_dim_list": [8], "mess_dropout": [0.0]}"#)
                .unwrap();
        assert_eq!(c.aggregation_type, "gcn");
        assert_eq!(c.entity_dim, 64);
        c.validate().unwrap();

        let t: TrainConfig = serde_json::from_str(r#"{"epochs": 3}"#).unwrap();
        assert_eq!(t.epochs, 3);
        assert_eq!(t.lr, 1e-4);
    }
}
