//! Alternating CF / KG training with periodic evaluation.
//!
//! One epoch runs `n_cf_train / cf_batch_size + 1` ranking steps, then
//! `n_kg_train / kg_batch_size + 1` translational steps, then refreshes the
//! attention snapshot. Both phases step the same Adam optimizer over the
//! shared parameters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use candle_core::{DType, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use kgat_core::{early_stopping, CfSampler, CollaborativeKg, GraphTopology, KgSampler, RankingMetrics};
use tracing::{debug, info, warn};

use crate::attention::AttentionSnapshot;
use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::model::{ForwardMode, Kgat};
use crate::softmax::ReductionPolicy;

/// Losses and timing of one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochStats {
    pub epoch: usize,
    /// Mean ranking loss over the CF phase.
    pub cf_loss: f64,
    /// Mean translational loss over the KG phase.
    pub kg_loss: f64,
    pub cf_batches: usize,
    pub kg_batches: usize,
    pub elapsed: Duration,
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Epochs actually run.
    pub epochs_run: usize,
    /// Epoch of the best evaluation, if any evaluation ran.
    pub best_epoch: Option<usize>,
    /// `(epoch, metrics)` for every evaluation.
    pub history: Vec<(usize, RankingMetrics)>,
    /// Checkpoint of the best epoch, when saving is enabled.
    pub best_checkpoint: Option<PathBuf>,
}

impl FitReport {
    /// Metrics of the best evaluation.
    pub fn best(&self) -> Option<&RankingMetrics> {
        let best = self.best_epoch?;
        self.history.iter().find(|(e, _)| *e == best).map(|(_, m)| m)
    }
}

pub struct Trainer<'a> {
    model: Kgat,
    ckg: &'a CollaborativeKg,
    graph: Arc<GraphTopology>,
    config: TrainConfig,
    optimizer: AdamW,
    cf_sampler: CfSampler<'a>,
    kg_sampler: KgSampler<'a>,
    attention: AttentionSnapshot,
}

impl<'a> Trainer<'a> {
    pub fn new(model: Kgat, ckg: &'a CollaborativeKg, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        let graph = Arc::new(ckg.topology()?);
        let optimizer = AdamW::new(
            model.varmap().all_vars(),
            ParamsAdamW {
                lr: config.lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;
        let cf_sampler = CfSampler::from_ckg(ckg, config.seed)?;
        let kg_sampler = KgSampler::from_ckg(ckg, config.seed.wrapping_add(1))?;
        let attention = model.compute_attention(graph.clone(), ReductionPolicy::Throughput)?;
        Ok(Self {
            model,
            ckg,
            graph,
            config,
            optimizer,
            cf_sampler,
            kg_sampler,
            attention,
        })
    }

    pub fn model(&self) -> &Kgat {
        &self.model
    }

    pub fn into_model(self) -> Kgat {
        self.model
    }

    /// The attention snapshot used by the next CF phase.
    pub fn attention(&self) -> &AttentionSnapshot {
        &self.attention
    }

    fn step(&mut self, loss: &Tensor, phase: &str, epoch: usize, iter: usize) -> Result<f64> {
        let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()? as f64;
        if !value.is_finite() {
            return Err(Error::Training(format!(
                "{phase} loss is {value} at epoch {epoch}, iteration {iter}"
            )));
        }
        self.optimizer.backward_step(loss)?;
        debug!(phase, epoch, iter, loss = value, "step");
        Ok(value)
    }

    /// Run one CF phase, one KG phase, then refresh attention.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<EpochStats> {
        let start = Instant::now();

        let cf_batches = self.ckg.n_cf_train / self.config.cf_batch_size + 1;
        let mut cf_total = 0.0;
        for iter in 1..=cf_batches {
            let batch = self.cf_sampler.sample(self.config.cf_batch_size);
            let loss = self
                .model
                .forward(
                    ForwardMode::CfLoss {
                        attention: &self.attention,
                        batch: &batch,
                    },
                    true,
                )?
                .into_tensor();
            cf_total += self.step(&loss, "cf", epoch, iter)?;
        }

        let kg_batches = self.ckg.n_kg_train() / self.config.kg_batch_size + 1;
        let mut kg_total = 0.0;
        for iter in 1..=kg_batches {
            let batch = self.kg_sampler.sample(self.config.kg_batch_size);
            let loss = self
                .model
                .forward(ForwardMode::KgLoss(&batch), true)?
                .into_tensor();
            kg_total += self.step(&loss, "kg", epoch, iter)?;
        }

        self.attention = self
            .model
            .compute_attention(self.graph.clone(), ReductionPolicy::Throughput)?;

        let stats = EpochStats {
            epoch,
            cf_loss: cf_total / cf_batches as f64,
            kg_loss: kg_total / kg_batches as f64,
            cf_batches,
            kg_batches,
            elapsed: start.elapsed(),
        };
        info!(
            epoch,
            cf_loss = stats.cf_loss,
            kg_loss = stats.kg_loss,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "epoch done"
        );
        Ok(stats)
    }

    /// Recall@K / NDCG@K over the test users, training items masked.
    pub fn evaluate(&self) -> Result<RankingMetrics> {
        let attention = self
            .model
            .compute_attention(self.graph.clone(), ReductionPolicy::Deterministic)?;
        let all = self
            .model
            .cf_embedding(&attention, ReductionPolicy::Deterministic, false)?;
        let items: Vec<u32> = (0..self.ckg.dims.n_items as u32).collect();
        let users: Vec<usize> = self.ckg.test_user_dict.keys().copied().collect();

        let mut parts = Vec::new();
        for chunk in users.chunks(self.config.test_batch_size) {
            let ids: Vec<u32> = chunk.iter().map(|&u| u as u32).collect();
            let scores = self
                .model
                .score_from(&all, &ids, &items)?
                .to_dtype(DType::F32)?
                .to_vec2::<f32>()?;
            parts.push(RankingMetrics::evaluate(
                &scores,
                chunk,
                &self.ckg.train_user_dict,
                &self.ckg.test_user_dict,
                &self.config.ks,
            ));
        }
        Ok(RankingMetrics::merge(&parts))
    }

    /// Train up to `epochs`, evaluating every `evaluate_every` epochs and on the
    /// last one. Stops after `stopping_steps` evaluations without improving the
    /// smallest-K recall. `on_epoch` sees every epoch and any evaluation.
    pub fn fit(
        &mut self,
        mut on_epoch: impl FnMut(&EpochStats, Option<&RankingMetrics>),
    ) -> Result<FitReport> {
        let mut report = FitReport {
            epochs_run: 0,
            best_epoch: None,
            history: Vec::new(),
            best_checkpoint: None,
        };
        let mut recalls = Vec::new();

        for epoch in 1..=self.config.epochs {
            let stats = self.train_epoch(epoch)?;
            report.epochs_run = epoch;

            if epoch % self.config.evaluate_every != 0 && epoch != self.config.epochs {
                on_epoch(&stats, None);
                continue;
            }

            let metrics = self.evaluate()?;
            info!(epoch, "{}", metrics.summary());
            on_epoch(&stats, Some(&metrics));
            recalls.push(metrics.primary_recall());
            report.history.push((epoch, metrics));

            let Some(stop) = early_stopping(&recalls, self.config.stopping_steps) else {
                continue;
            };
            if stop.best_index == recalls.len() - 1 {
                report.best_epoch = Some(epoch);
                if let Some(dir) = self.config.save_dir.clone() {
                    let path = self.model.save(&dir, epoch)?;
                    if let Some(old) = report.best_checkpoint.replace(path) {
                        if let Err(e) = std::fs::remove_file(&old) {
                            warn!(path = %old.display(), error = %e, "could not remove old checkpoint");
                        }
                    }
                }
            }
            if stop.should_stop {
                info!(epoch, best_epoch = ?report.best_epoch, "early stopping");
                break;
            }
        }
        Ok(report)
    }
}
