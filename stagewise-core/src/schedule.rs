//! Staged learning-rate schedule.
//!
//! A schedule is an ordered, non-empty list of `(rate, epochs)` stages with a
//! pointer to the active one. Training runs the active stage's epoch count at
//! the active stage's rate.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};

/// One `(learning rate, epoch count)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRateStage {
    pub rate: f64,
    pub epochs: usize,
}

impl LearningRateStage {
    pub fn new(rate: f64, epochs: usize) -> Self {
        Self { rate, epochs }
    }
}

impl From<(f64, usize)> for LearningRateStage {
    fn from((rate, epochs): (f64, usize)) -> Self {
        Self { rate, epochs }
    }
}

/// Ordered stages plus the index of the active stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningRateSchedule {
    stages: Vec<LearningRateStage>,
    index: usize,
    current_rate: f64,
    current_epochs: usize,
}

impl LearningRateSchedule {
    /// Build a schedule positioned on the first stage.
    pub fn new(stages: Vec<LearningRateStage>) -> Result<Self, ModelError> {
        let Some(first) = stages.first().copied() else {
            return Err(ModelError::config(
                "learning rate schedule needs at least one stage",
            ));
        };
        if let Some(bad) = stages.iter().find(|s| !s.rate.is_finite() || s.rate <= 0.0) {
            return Err(ModelError::config(format!(
                "learning rate must be finite and positive, got {}",
                bad.rate
            )));
        }
        Ok(Self {
            stages,
            index: 0,
            current_rate: first.rate,
            current_epochs: first.epochs,
        })
    }

    /// Point the schedule at stage `index`.
    ///
    /// Indices past the last stage are clamped to the last stage with a
    /// warning; this never fails.
    pub fn set_stage_index(&mut self, index: usize) {
        let last = self.stages.len() - 1;
        let index = if index > last {
            tracing::warn!(
                requested = index,
                available = self.stages.len(),
                "Learning rate stage index out of range, clamping to last stage"
            );
            last
        } else {
            index
        };

        self.index = index;
        let stage = self.stages[index];
        self.current_rate = stage.rate;
        self.current_epochs = stage.epochs;
    }

    /// Move to the next stage. Returns `false` when already on the last one.
    pub fn advance(&mut self) -> bool {
        if self.index + 1 >= self.stages.len() {
            return false;
        }
        self.set_stage_index(self.index + 1);
        true
    }

    pub fn current_rate(&self) -> f64 {
        self.current_rate
    }

    pub fn current_epochs(&self) -> usize {
        self.current_epochs
    }

    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn stages(&self) -> &[LearningRateStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
