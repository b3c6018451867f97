use std::borrow::Borrow;
use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::batching::{Batch, BatchSegmenter};
use crate::config::TrainingConfig;
use crate::error::{Error, Result};
use crate::models::rnn_lm::RnnLm;
use crate::optimizers::{Adam, Optimizer};
use crate::state::{CarriedState, HiddenState};

/// Summed per-position loss and the number of positions it covers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct LossTotals {
    sum: f64,
    count: usize,
}

impl LossTotals {
    fn add(&mut self, losses: &Array1<f64>) {
        self.sum += losses.sum();
        self.count += losses.len();
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Result of one pass over the training windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// Mean loss per token
    pub loss: f64,
    pub perplexity: f64,
    pub tokens: usize,
    pub windows: usize,
    pub time_elapsed: f64,
}

/// Result of evaluating on held-out windows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalStats {
    pub loss: f64,
    pub perplexity: f64,
    pub tokens: usize,
}

/// Training metrics tracked per epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: EpochStats,
    pub valid: EvalStats,
}

/// Summary of a whole `fit` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: TrainingConfig,
    pub num_parameters: usize,
    pub epochs: Vec<EpochMetrics>,
    pub test: EvalStats,
}

impl TrainingReport {
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| Error::io(path, e))
    }
}

/// Truncated-BPTT trainer for [`RnnLm`].
pub struct LmTrainer<O: Optimizer> {
    pub model: RnnLm,
    pub optimizer: O,
    pub config: TrainingConfig,
    pub metrics_history: Vec<EpochMetrics>,
}

impl<O: Optimizer> LmTrainer<O> {
    pub fn new(model: RnnLm, optimizer: O, config: TrainingConfig) -> Self {
        LmTrainer {
            model,
            optimizer,
            config,
            metrics_history: Vec::new(),
        }
    }

    /// One forward/backward/update step. The window's state replaces the
    /// carried one; gradient never crosses into the previous window.
    pub fn train_window(
        &mut self,
        batch: &Batch,
        state: &mut CarriedState,
    ) -> Result<Array1<f64>> {
        let carried = self.take_checked(state, batch)?;
        let pass = self.model.forward_train(batch, carried)?;
        let mut gradients = self.model.backward(&pass)?;

        if self.config.clip_gradient_norm > 0.0 {
            gradients.clip_global_norm(self.config.clip_gradient_norm);
        }
        self.model.update_parameters(&gradients, &mut self.optimizer)?;

        state.store(pass.state);
        Ok(pass.losses)
    }

    /// Hand over the carried state once it is known to fit `batch`. A
    /// mismatch leaves the carrier untouched.
    fn take_checked(&self, state: &mut CarriedState, batch: &Batch) -> Result<Option<HiddenState>> {
        if let Some(carried) = state.get() {
            self.model.check_state(carried, batch.streams())?;
        }
        Ok(state.take())
    }

    pub fn train_epoch<I>(&mut self, epoch: usize, batches: I) -> Result<EpochStats>
    where
        I: IntoIterator,
        I::Item: Borrow<Batch>,
    {
        let start_time = Instant::now();
        let mut state = CarriedState::unset();
        let mut totals = LossTotals::default();
        let mut windows = 0;

        self.model.train();
        for (iter_count, batch) in batches.into_iter().enumerate() {
            let losses = self.train_window(batch.borrow(), &mut state)?;
            totals.add(&losses);
            windows += 1;

            let log_every = self.config.log_every.max(1);
            if iter_count % log_every == 0 {
                let loss = totals.mean();
                info!("[Epoch {:<3}] loss: {:6.2}, perplexity: {:6.2}", epoch, loss, loss.exp());
            } else {
                let window_loss = losses.mean().unwrap_or(0.0);
                debug!(epoch, iter_count, window_loss, "window done");
            }
        }
        state.clear();

        let loss = totals.mean();
        Ok(EpochStats {
            loss,
            perplexity: loss.exp(),
            tokens: totals.count,
            windows,
            time_elapsed: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Mean per-token loss and perplexity over every position of every window.
    pub fn evaluate<I>(&mut self, batches: I) -> Result<EvalStats>
    where
        I: IntoIterator,
        I::Item: Borrow<Batch>,
    {
        let mut state = CarriedState::unset();
        let mut totals = LossTotals::default();

        self.model.eval();
        for batch in batches {
            let batch: &Batch = batch.borrow();
            let carried = self.take_checked(&mut state, batch)?;
            let (losses, next) = self.model.forward(batch, carried)?;
            totals.add(&losses);
            state.store(next);
        }
        state.clear();

        if totals.count == 0 {
            return Err(Error::EmptyEvaluation);
        }
        let loss = totals.mean();
        Ok(EvalStats {
            loss,
            perplexity: loss.exp(),
            tokens: totals.count,
        })
    }

    /// Train for `config.epochs` epochs with validation after each, then
    /// evaluate once on the test split.
    pub fn fit(
        &mut self,
        train: &[usize],
        valid: &[usize],
        test: &[usize],
    ) -> Result<TrainingReport> {
        self.config.validate()?;
        let started_at = Utc::now();
        self.metrics_history.clear();

        let (streams, window) = (self.config.batch_size, self.config.bptt_steps);
        let segment = |data: &[usize]| BatchSegmenter::new(data, streams, window);
        let train_batches = segment(train)?;
        let valid_batches = segment(valid)?;
        let test_batches = segment(test)?;
        debug!(
            train_windows = train_batches.num_windows(),
            valid_windows = valid_batches.num_windows(),
            test_windows = test_batches.num_windows(),
            "segmented splits"
        );

        info!(
            "Starting training for {} epochs (lr {})...",
            self.config.epochs,
            self.optimizer.learning_rate()
        );
        for epoch in 1..=self.config.epochs {
            let train_stats = self.train_epoch(epoch, &train_batches)?;
            info!(
                "[Epoch {:<3}] ended with train_loss: {:6.2}, ppl: {:6.2}",
                epoch, train_stats.loss, train_stats.perplexity
            );

            let valid_stats = self.evaluate(&valid_batches)?;
            info!(
                "[Epoch {:<3}] ended with valid_loss: {:6.2}, valid_ppl: {:6.2}",
                epoch, valid_stats.loss, valid_stats.perplexity
            );
            info!("[Epoch {:<3}] completed in {:.2} seconds", epoch, train_stats.time_elapsed);

            self.metrics_history.push(EpochMetrics {
                epoch,
                train: train_stats,
                valid: valid_stats,
            });
        }

        let test_stats = self.evaluate(&test_batches)?;
        info!(
            " ---> Final test set performance: {:6.2}, test_ppl: {:6.2}",
            test_stats.loss, test_stats.perplexity
        );

        Ok(TrainingReport {
            started_at,
            finished_at: Utc::now(),
            config: self.config.clone(),
            num_parameters: self.model.num_parameters(),
            epochs: self.metrics_history.clone(),
            test: test_stats,
        })
    }
}

/// Trainer with Adam at the configured learning rate.
pub fn create_adam_trainer(model: RnnLm, config: TrainingConfig) -> LmTrainer<Adam> {
    let optimizer = Adam::new(config.learning_rate);
    LmTrainer::new(model, optimizer, config)
}
