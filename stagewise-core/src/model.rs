//! The predictor contract and the base model that wraps it.
//!
//! A concrete model variant implements [`Predictor`]: `setup` builds its
//! parameters from the reference batch's shape, `forward` maps inputs to
//! flattened predictions. Both are required, so a variant that forgets either
//! does not compile. [`BaseModel`] adds everything shared: parameter storage,
//! the learning-rate schedule, loss/error functions and checkpoint bookkeeping.

use crate::batch::{Batch, ShapeInfo, flatten_rows};
use crate::config::{LossPrecision, ModelConfig};
use crate::error::ModelError;
use crate::loss::LossFunction;
use crate::optimizer::OptimizerKind;
use crate::schedule::LearningRateSchedule;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A trainable forward computation.
pub trait Predictor: Sized {
    /// Serializable hyperparameters needed to rebuild the predictor.
    type Spec: Clone + Serialize + DeserializeOwned;

    /// Stable name recorded in checkpoints.
    const KIND: &'static str;

    /// Create parameters through `vb` for inputs and targets shaped like `shape`.
    fn setup(spec: &Self::Spec, shape: &ShapeInfo, vb: VarBuilder) -> Result<Self, ModelError>;

    /// Map an input batch to predictions of width `shape.layout.total_width()`.
    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError>;
}

/// Whether batches are flattened before the forward pass and the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenPolicy {
    pub input: bool,
    pub target: bool,
}

/// A predictor together with its training state.
pub struct BaseModel<P: Predictor, B: Batch> {
    pub(crate) params: VarMap,
    pub(crate) predictor: P,
    pub(crate) spec: P::Spec,
    pub(crate) shape: ShapeInfo,
    pub(crate) reference: Option<B>,
    pub(crate) schedule: LearningRateSchedule,
    pub(crate) optimizer: OptimizerKind,
    pub(crate) loss: LossFunction,
    pub(crate) error: LossFunction,
    pub(crate) flatten: FlattenPolicy,
    pub(crate) loss_precision: LossPrecision,
    pub(crate) latest_checkpoint: Option<String>,
    pub(crate) device: Device,
}

impl<P: Predictor, B: Batch> BaseModel<P, B> {
    /// Build a model whose shapes follow `reference`.
    ///
    /// Fails when the schedule is empty or when the predictor's output on the
    /// reference batch does not match the target layout.
    pub fn new(spec: P::Spec, reference: B, config: &ModelConfig) -> Result<Self, ModelError> {
        let schedule = LearningRateSchedule::new(config.stages.clone())?;
        let shape = reference.shape();
        if shape.layout.total_width() == 0 {
            return Err(ModelError::config("reference batch has no target columns"));
        }

        let flatten = FlattenPolicy {
            input: config.flatten_input,
            target: config.flatten_target,
        };
        let sample_input = reference.input(flatten.input)?;
        let device = sample_input.device().clone();

        let params = VarMap::new();
        let vb = VarBuilder::from_varmap(&params, DType::F32, &device);
        let predictor = P::setup(&spec, &shape, vb)?;

        let model = Self {
            params,
            predictor,
            spec,
            shape,
            reference: Some(reference),
            schedule,
            optimizer: config.optimizer,
            loss: config.loss,
            error: config.error,
            flatten,
            loss_precision: config.loss_precision,
            latest_checkpoint: None,
            device,
        };
        model.check_output_width(&sample_input)?;

        tracing::info!(
            predictor = P::KIND,
            input_width = model.shape.input_width,
            target_width = model.shape.layout.total_width(),
            stages = model.schedule.len(),
            "Model initialized"
        );
        Ok(model)
    }

    fn check_output_width(&self, sample_input: &Tensor) -> Result<(), ModelError> {
        if sample_input.dims().first().copied().unwrap_or(0) == 0 {
            return Ok(());
        }
        let output = flatten_rows(&self.predictor.forward(sample_input)?)?;
        let width = output.dims()[1];
        let expected = self.shape.layout.total_width();
        if width != expected {
            return Err(ModelError::config(format!(
                "{} produces {width} outputs per row, target layout expects {expected}",
                P::KIND
            )));
        }
        Ok(())
    }

    /// Run the predictor on an already prepared input tensor.
    pub fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        self.predictor.forward(input)
    }

    /// Forward pass on a batch using the model's flatten policy.
    pub fn predict(&self, batch: &B) -> Result<Tensor, ModelError> {
        self.forward(&batch.input(self.flatten.input)?)
    }

    /// Inference-only predictions and real targets for `batch`, plus its
    /// sample count. Predictions are detached from the parameter graph.
    pub(crate) fn batch_outputs(&self, batch: &B) -> Result<(Tensor, Tensor, usize), ModelError> {
        let real = batch.target(self.flatten.target)?;
        let size = real.dims().first().copied().unwrap_or(0);
        if size == 0 {
            return Ok((real.clone(), real, 0));
        }
        let predicted = self.predict(batch)?.detach();
        Ok((predicted, real, size))
    }

    pub fn schedule(&self) -> &LearningRateSchedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut LearningRateSchedule {
        &mut self.schedule
    }

    /// Shorthand for `schedule_mut().set_stage_index(index)`.
    pub fn set_stage_index(&mut self, index: usize) {
        self.schedule.set_stage_index(index);
    }

    pub fn shape(&self) -> &ShapeInfo {
        &self.shape
    }

    pub fn spec(&self) -> &P::Spec {
        &self.spec
    }

    pub fn predictor(&self) -> &P {
        &self.predictor
    }

    pub fn parameters(&self) -> &VarMap {
        &self.params
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn loss_function(&self) -> LossFunction {
        self.loss
    }

    pub fn error_function(&self) -> LossFunction {
        self.error
    }

    pub fn optimizer_kind(&self) -> OptimizerKind {
        self.optimizer
    }

    pub fn flatten_policy(&self) -> FlattenPolicy {
        self.flatten
    }

    pub fn loss_precision(&self) -> LossPrecision {
        self.loss_precision
    }

    pub fn set_loss_precision(&mut self, precision: LossPrecision) {
        self.loss_precision = precision;
    }

    pub fn reference_batch(&self) -> Option<&B> {
        self.reference.as_ref()
    }

    /// Re-attach a reference batch, e.g. after loading from a checkpoint.
    pub fn attach_reference_batch(&mut self, batch: B) -> Result<(), ModelError> {
        let shape = batch.shape();
        if shape != self.shape {
            return Err(ModelError::invalid_input(format!(
                "reference batch shape {shape:?} does not match model shape {:?}",
                self.shape
            )));
        }
        self.reference = Some(batch);
        Ok(())
    }

    /// Identifier of the most recent checkpoint written by this model.
    pub fn latest_checkpoint(&self) -> Option<&str> {
        self.latest_checkpoint.as_deref()
    }
}

impl<P: Predictor, B: Batch> std::fmt::Debug for BaseModel<P, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseModel")
            .field("predictor", &P::KIND)
            .field("shape", &self.shape)
            .field("schedule", &self.schedule)
            .field("optimizer", &self.optimizer)
            .field("loss", &self.loss)
            .field("error", &self.error)
            .field("has_reference", &self.reference.is_some())
            .field("latest_checkpoint", &self.latest_checkpoint)
            .finish()
    }
}
