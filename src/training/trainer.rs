//! Full-batch trainer with early stopping and checkpointing.
//!
//! Lifecycle: `Init -> (Training -> validate)* -> EarlyStopped | ExhaustedEpochs
//! -> Tested`. The checkpoint on disk always holds the parameters with the
//! lowest validation loss seen so far.

use super::early_stopping::{EarlyStopping, StopSignal};
use super::evaluate::{evaluate, EvalReport};
use super::loss::{positive_weight, weighted_bce_with_logits};
use crate::config::{ModelConfig, TrainingConfig};
use crate::error::{FraudError, Result};
use crate::graph::{GraphTensors, Partition, TypedGraph};
use crate::models::encoder::sigmoid;
use crate::models::{checkpoint, HeteroEncoder, LayerVariant};
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Init,
    Training { epoch: usize },
    EarlyStopped { epoch: usize },
    ExhaustedEpochs,
    Tested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EarlyStopped,
    ExhaustedEpochs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub improved: bool,
}

/// Summary of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub epochs_run: usize,
    pub stop_reason: StopReason,
    pub best_val_loss: Option<f64>,
    pub positive_weight: f64,
    pub variant: LayerVariant,
    pub degraded_reason: Option<String>,
    pub checkpoint_path: PathBuf,
    pub history: Vec<EpochRecord>,
    pub test: EvalReport,
}

/// Order indices of one partition, on device and on host.
struct Split {
    index: Tensor,
    host: Vec<usize>,
}

impl Split {
    fn new(host: Vec<usize>, device: &Device) -> Result<Option<Self>> {
        if host.is_empty() {
            return Ok(None);
        }
        let idx: Vec<u32> = host.iter().map(|&i| i as u32).collect();
        let index = Tensor::from_vec(idx, host.len(), device)?;
        Ok(Some(Self { index, host }))
    }
}

pub struct Trainer {
    config: TrainingConfig,
    encoder: HeteroEncoder,
    optimizer: AdamW,
    tensors: GraphTensors,
    labels: Vec<u8>,
    targets: Tensor,
    train: Split,
    val: Option<Split>,
    test: Option<Split>,
    pos_weight: f64,
    early_stopping: EarlyStopping,
    history: Vec<EpochRecord>,
    state: TrainerState,
    run_id: Uuid,
    checkpoint_path: PathBuf,
    warned_empty_val: bool,
}

impl Trainer {
    /// Set up the encoder, optimizer and loss weight for a split graph.
    ///
    /// Removes any checkpoint already at the target path.
    pub fn new(
        graph: &TypedGraph,
        model: &ModelConfig,
        config: &TrainingConfig,
        device: &Device,
    ) -> Result<Self> {
        let labels = graph
            .labels()
            .ok_or_else(|| FraudError::InvalidSplit("graph has no order labels".to_string()))?
            .to_vec();
        let partitions = graph.partitions().ok_or_else(|| {
            FraudError::InvalidSplit("graph has no train/val/test partitions".to_string())
        })?;

        let train = Split::new(partitions.indices(Partition::Train), device)?
            .ok_or_else(|| FraudError::InvalidSplit("training partition is empty".to_string()))?;
        let val = Split::new(partitions.indices(Partition::Val), device)?;
        let test = Split::new(partitions.indices(Partition::Test), device)?;

        let train_labels: Vec<u8> = train.host.iter().map(|&i| labels[i]).collect();
        let pos_weight = positive_weight(&train_labels);

        let encoder = HeteroEncoder::new(model, graph, device)?;
        let optimizer = AdamW::new(
            encoder.varmap().all_vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: config.weight_decay,
                ..Default::default()
            },
        )?;

        let tensors = GraphTensors::from_graph(graph, device)?;
        let target_values: Vec<f32> = labels.iter().map(|&y| y as f32).collect();
        let targets = Tensor::from_vec(target_values, labels.len(), device)?;

        let run_id = Uuid::new_v4();
        let checkpoint_path = if config.run_scoped_checkpoints {
            run_scoped(&config.checkpoint_path, &run_id)
        } else {
            config.checkpoint_path.clone()
        };
        remove_stale(&checkpoint_path)?;
        if !config.run_scoped_checkpoints {
            checkpoint::clear_latest(&config.checkpoint_path)?;
        }

        info!(
            run_id = %run_id,
            train = train.host.len(),
            val = val.as_ref().map_or(0, |s| s.host.len()),
            test = test.as_ref().map_or(0, |s| s.host.len()),
            pos_weight = pos_weight,
            checkpoint = %checkpoint_path.display(),
            "Trainer initialized"
        );

        Ok(Self {
            config: config.clone(),
            encoder,
            optimizer,
            tensors,
            labels,
            targets,
            train,
            val,
            test,
            pos_weight,
            early_stopping: EarlyStopping::new(config.patience),
            history: Vec::new(),
            state: TrainerState::Init,
            run_id,
            checkpoint_path,
            warned_empty_val: false,
        })
    }

    /// One forward pass over the whole graph and one optimizer step.
    pub fn train_epoch(&mut self) -> Result<f64> {
        let logits = self.encoder.forward(&self.tensors)?;
        let loss = self.masked_loss(&logits, &self.train)?;
        self.optimizer.backward_step(&loss)?;
        Ok(loss.to_scalar::<f32>()? as f64)
    }

    /// Validation loss, or the training loss when there is no validation set.
    pub fn validate(&mut self) -> Result<f64> {
        let logits = self.eval_logits()?;
        let split = match &self.val {
            Some(val) => val,
            None => {
                if !self.warned_empty_val {
                    warn!("Validation partition is empty, early stopping on training loss");
                    self.warned_empty_val = true;
                }
                &self.train
            }
        };
        let loss = self.masked_loss(&logits, split)?;
        Ok(loss.to_scalar::<f32>()? as f64)
    }

    /// Run epochs until early stopping triggers or the budget is spent.
    pub fn fit(&mut self) -> Result<StopReason> {
        for epoch in 1..=self.config.epochs {
            self.state = TrainerState::Training { epoch };
            let train_loss = self.train_epoch()?;
            let val_loss = self.validate()?;
            let signal = self.early_stopping.observe(val_loss);
            let improved = signal == StopSignal::Improved;
            if improved {
                checkpoint::save(&self.encoder, &self.checkpoint_path)?;
            }
            self.history.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                improved,
            });
            info!(
                epoch = epoch,
                train_loss = train_loss,
                val_loss = val_loss,
                improved = improved,
                "Epoch complete"
            );

            if signal == StopSignal::Stop {
                info!(epoch = epoch, "Early stopping");
                self.state = TrainerState::EarlyStopped { epoch };
                return Ok(StopReason::EarlyStopped);
            }
        }
        self.state = TrainerState::ExhaustedEpochs;
        Ok(StopReason::ExhaustedEpochs)
    }

    /// Restore the best checkpoint if there is one, then score the test set.
    pub fn test(&mut self) -> Result<EvalReport> {
        if self.checkpoint_path.exists() {
            self.encoder = checkpoint::load_matching(
                &self.checkpoint_path,
                self.encoder.schema(),
                self.encoder.device(),
            )?;
        } else {
            warn!(
                path = %self.checkpoint_path.display(),
                "No saved model found, evaluating the current parameters"
            );
        }

        let report = match &self.test {
            Some(test) => {
                let logits = self.eval_logits()?;
                let loss = self.masked_loss(&logits, test)?.to_scalar::<f32>()? as f64;
                let all = logits.to_vec1::<f32>()?;
                let scores: Vec<f32> = test.host.iter().map(|&i| sigmoid(all[i])).collect();
                let labels: Vec<u8> = test.host.iter().map(|&i| self.labels[i]).collect();
                evaluate(&scores, &labels, loss)
            }
            None => {
                warn!("Test partition is empty");
                evaluate(&[], &[], f64::NAN)
            }
        };
        self.state = TrainerState::Tested;
        Ok(report)
    }

    /// Point the configured checkpoint path at this run's file.
    fn publish_run_checkpoint(&self) -> Result<()> {
        if self.config.run_scoped_checkpoints && self.checkpoint_path.exists() {
            checkpoint::write_latest(&self.config.checkpoint_path, &self.checkpoint_path)?;
        }
        Ok(())
    }

    /// Fit, test and summarize. Hands back the best encoder.
    pub fn run(mut self) -> Result<(TrainingReport, HeteroEncoder)> {
        let started_at = Utc::now();
        let stop_reason = self.fit()?;
        let test = self.test()?;
        self.publish_run_checkpoint()?;

        let report = TrainingReport {
            run_id: self.run_id,
            started_at,
            finished_at: Utc::now(),
            epochs_run: self.history.len(),
            stop_reason,
            best_val_loss: self.early_stopping.best(),
            positive_weight: self.pos_weight,
            variant: self.encoder.variant(),
            degraded_reason: self.encoder.degraded_reason().map(str::to_string),
            checkpoint_path: self.checkpoint_path.clone(),
            history: self.history,
            test,
        };
        info!(
            run_id = %report.run_id,
            epochs = report.epochs_run,
            stop_reason = ?report.stop_reason,
            roc_auc = report.test.roc_auc,
            average_precision = report.test.average_precision,
            threshold = report.test.threshold,
            "Training run finished"
        );
        Ok((report, self.encoder))
    }

    /// Order logits cut off from the autograd graph.
    fn eval_logits(&self) -> Result<Tensor> {
        Ok(self.encoder.forward(&self.tensors)?.detach())
    }

    fn masked_loss(&self, logits: &Tensor, split: &Split) -> Result<Tensor> {
        let logits = logits.index_select(&split.index, 0)?;
        let targets = self.targets.index_select(&split.index, 0)?;
        Ok(weighted_bce_with_logits(&logits, &targets, self.pos_weight)?)
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn positive_weight(&self) -> f64 {
        self.pos_weight
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn encoder(&self) -> &HeteroEncoder {
        &self.encoder
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }
}

/// `dir/name.ext` becomes `dir/name-<run id>.ext`.
fn run_scoped(path: &Path, run_id: &Uuid) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}-{}.{}", stem, run_id, ext.to_string_lossy()),
        None => format!("{}-{}", stem, run_id),
    };
    path.with_file_name(name)
}

fn remove_stale(path: &Path) -> Result<()> {
    if path.exists() {
        debug!(path = %path.display(), "Removing stale checkpoint");
        fs::remove_file(path)?;
    }
    Ok(())
}
