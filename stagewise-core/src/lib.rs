//! # stagewise-core - staged training for predictive models
//!
//! Base abstraction for trainable models inside a model-serving framework:
//!
//! - [`LearningRateSchedule`]: ordered `(rate, epochs)` stages with an active pointer
//! - [`TrainingLoop`]: a pull-driven iterator yielding one [`TrainingProgress`] per batch
//! - [`BaseModel::evaluate`]: per-target error and R² accuracy over a held-out sampler
//! - [`BaseModel::save_to_disk`] and friends: checkpointing through a [`CheckpointStore`]
//!
//! Concrete architectures implement [`Predictor`]; tensors and gradients come
//! from `candle`.

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod loss;
pub mod model;
pub mod optimizer;
pub mod predictors;
pub mod schedule;
pub mod state;
pub mod training;

// Re-exports
pub use batch::{Batch, Sampler, ShapeInfo, TargetArray, TargetColumn, TargetLayout, TensorBatch, VecSampler};
pub use checkpoint::{CheckpointRecord, CheckpointRef, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use config::{LossPrecision, ModelConfig, load_config};
pub use error::ModelError;
pub use evaluation::{EvaluationResult, VARIANCE_EPSILON};
pub use loss::LossFunction;
pub use model::{BaseModel, FlattenPolicy, Predictor};
pub use optimizer::{OptimizerBinding, OptimizerKind};
pub use schedule::{LearningRateSchedule, LearningRateStage};
pub use state::ModelState;
pub use training::{TrainingLoop, TrainingProgress};
