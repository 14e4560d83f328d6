//! Pull-driven training loop.
//!
//! [`BaseModel::train`] returns a [`TrainingLoop`] iterator. Each call to
//! `next()` trains on exactly one batch and yields a [`TrainingProgress`];
//! nothing happens between calls, so dropping the iterator stops training
//! with parameters reflecting exactly the batches consumed.

use crate::batch::{Batch, Sampler};
use crate::error::ModelError;
use crate::model::{BaseModel, Predictor};
use crate::optimizer::OptimizerBinding;
use serde::{Deserialize, Serialize};

/// Snapshot emitted after every trained batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingProgress {
    pub epoch: usize,
    pub batch: usize,
    /// Sample-weighted mean loss over the batches of this epoch so far.
    pub average_loss: f64,
}

/// Lazy sequence of per-batch training steps.
///
/// Owns a fresh, unbound [`OptimizerBinding`]; the optimizer is bound at the
/// first batch using the rate of the stage active at that point.
pub struct TrainingLoop<'a, P: Predictor, S: Sampler> {
    model: &'a mut BaseModel<P, S::Batch>,
    sampler: &'a S,
    binding: OptimizerBinding,
    epoch: usize,
    batches: Option<Box<dyn Iterator<Item = S::Batch> + 'a>>,
    batch_number: usize,
    weighted_loss: f64,
    samples: usize,
    finished: bool,
}

impl<P: Predictor, B: Batch> BaseModel<P, B> {
    /// Start a training run over `sampler`.
    ///
    /// With `stage` the schedule is moved to that stage first; without it the
    /// currently active stage is reused.
    pub fn train<'a, S>(&'a mut self, sampler: &'a S, stage: Option<usize>) -> TrainingLoop<'a, P, S>
    where
        S: Sampler<Batch = B>,
    {
        if let Some(stage) = stage {
            self.schedule.set_stage_index(stage);
        }
        let binding = OptimizerBinding::new(self.optimizer);
        TrainingLoop {
            model: self,
            sampler,
            binding,
            epoch: 0,
            batches: None,
            batch_number: 0,
            weighted_loss: 0.0,
            samples: 0,
            finished: false,
        }
    }
}

impl<'a, P: Predictor, S: Sampler> TrainingLoop<'a, P, S> {
    /// Change the active stage mid-run.
    ///
    /// The bound optimizer is discarded so the next batch rebinds at the new
    /// rate. The new epoch count applies from the next epoch boundary.
    pub fn set_stage_index(&mut self, index: usize) {
        self.model.schedule.set_stage_index(index);
        self.binding.discard();
    }

    pub fn model(&self) -> &BaseModel<P, S::Batch> {
        self.model
    }

    pub fn optimizer(&self) -> &OptimizerBinding {
        &self.binding
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    fn end_epoch(&mut self) {
        self.epoch += 1;
        self.batches = None;
    }

    /// Train on one batch. `Ok(None)` means the batch was empty and the rest
    /// of the epoch must be skipped.
    fn step(&mut self, batch: S::Batch) -> Result<Option<TrainingProgress>, ModelError> {
        let model = &*self.model;
        let rate = model.schedule.current_rate();
        tracing::info!(
            epoch = self.epoch + 1,
            total_epochs = model.schedule.current_epochs(),
            batch = self.batch_number,
            "[EPOCH-BATCH] Training"
        );

        self.binding.zero_grad(&model.params, rate)?;

        let real = batch.target(model.flatten.target)?;
        let batch_size = real.dims().first().copied().unwrap_or(0);
        if batch_size == 0 {
            tracing::warn!(
                epoch = self.epoch,
                batch = self.batch_number,
                "Empty batch, skipping the rest of the epoch"
            );
            return Ok(None);
        }

        let predicted = model.predict(&batch)?;
        let loss = model.loss.compute(&predicted, &real)?;
        let loss_value = f64::from(loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?);

        self.samples += batch_size;
        self.weighted_loss += model.loss_precision.apply(loss_value) * batch_size as f64;
        let average_loss = self.weighted_loss / self.samples as f64;

        self.binding.backward(&loss)?;
        self.binding.step(&model.params, rate)?;

        let progress = TrainingProgress {
            epoch: self.epoch,
            batch: self.batch_number,
            average_loss,
        };
        self.batch_number += 1;
        Ok(Some(progress))
    }
}

impl<'a, P: Predictor, S: Sampler> Iterator for TrainingLoop<'a, P, S> {
    type Item = Result<TrainingProgress, ModelError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }

            if self.batches.is_none() {
                if self.epoch >= self.model.schedule.current_epochs() {
                    self.finished = true;
                    return None;
                }
                let sampler = self.sampler;
                self.batches = Some(sampler.batches());
                self.batch_number = 0;
                self.weighted_loss = 0.0;
                self.samples = 0;
            }

            let next = self.batches.as_mut().and_then(|batches| batches.next());
            let Some(batch) = next else {
                self.end_epoch();
                continue;
            };

            match self.step(batch) {
                Ok(Some(progress)) => return Some(Ok(progress)),
                Ok(None) => self.end_epoch(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

impl<'a, P: Predictor, S: Sampler> std::iter::FusedIterator for TrainingLoop<'a, P, S> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{TargetLayout, TensorBatch, VecSampler};
    use crate::config::{LossPrecision, ModelConfig};
    use crate::optimizer::OptimizerKind;
    use crate::predictors::{LinearRegressor, LinearSpec};
    use candle_core::Device;

    fn batch(rows: usize, value: f32) -> TensorBatch {
        let layout = TargetLayout::single("y", 1).unwrap();
        TensorBatch::from_rows(
            &vec![vec![0.0]; rows],
            &[("y".into(), vec![vec![value]; rows])],
            1,
            &layout,
            &Device::Cpu,
        )
        .unwrap()
    }

    fn model(stages: &[(f64, usize)]) -> BaseModel<LinearRegressor, TensorBatch> {
        let config = ModelConfig {
            optimizer: OptimizerKind::Sgd,
            ..ModelConfig::with_stages(stages.iter().copied())
        };
        BaseModel::new(LinearSpec { zero_init: true }, batch(1, 0.0), &config).unwrap()
    }

    #[test]
    fn test_yields_one_progress_per_batch_per_epoch() {
        let mut m = model(&[(0.01, 2)]);
        let sampler = VecSampler::new(vec![batch(2, 1.0), batch(2, 1.0), batch(1, 1.0)]);
        let progress: Vec<_> = m.train(&sampler, None).map(Result::unwrap).collect();
        let positions: Vec<_> = progress.iter().map(|p| (p.epoch, p.batch)).collect();
        assert_eq!(
            positions,
            vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]
        );
    }

    #[test]
    fn test_empty_batch_ends_epoch() {
        let mut m = model(&[(0.01, 2)]);
        let sampler = VecSampler::new(vec![batch(2, 1.0), batch(0, 1.0), batch(2, 1.0)]);
        let progress: Vec<_> = m.train(&sampler, None).map(Result::unwrap).collect();
        let positions: Vec<_> = progress.iter().map(|p| (p.epoch, p.batch)).collect();
        assert_eq!(positions, vec![(0, 0), (1, 0)]);
    }

    #[test]
    fn test_zero_epoch_stage_yields_nothing() {
        let mut m = model(&[(0.01, 0)]);
        let sampler = VecSampler::new(vec![batch(2, 1.0)]);
        assert_eq!(m.train(&sampler, None).count(), 0);
    }

    #[test]
    fn test_stage_argument_selects_rate() {
        let mut m = model(&[(0.1, 1), (0.02, 1)]);
        let sampler = VecSampler::new(vec![batch(2, 1.0)]);
        let mut run = m.train(&sampler, Some(1));
        assert!(run.next().unwrap().is_ok());
        assert_eq!(run.optimizer().bound_rate(), Some(0.02));
    }

    #[test]
    fn test_mid_run_stage_change_rebinds() {
        let mut m = model(&[(0.1, 3), (0.02, 3)]);
        let sampler = VecSampler::new(vec![batch(2, 1.0)]);
        let mut run = m.train(&sampler, None);
        run.next().unwrap().unwrap();
        assert_eq!(run.optimizer().bound_rate(), Some(0.1));
        run.set_stage_index(1);
        assert!(!run.optimizer().is_bound());
        run.next().unwrap().unwrap();
        assert_eq!(run.optimizer().bound_rate(), Some(0.02));
    }

    #[test]
    fn test_truncated_policy_drops_fraction() {
        // Zero-initialised weights predict 0 against a target of 1.5, so the
        // first-batch MSE is exactly 2.25.
        let mut m = model(&[(1e-9, 1)]);
        m.set_loss_precision(LossPrecision::Truncated);
        let sampler = VecSampler::new(vec![batch(4, 1.5)]);
        let first = m.train(&sampler, None).next().unwrap().unwrap();
        assert_eq!(first.average_loss, 2.0);
    }
}
