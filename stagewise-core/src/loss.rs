//! Loss and error functions.
//!
//! The same enum serves as the training loss and as the per-target error
//! reported by evaluation; a model carries one of each.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

/// Reduction of `(predicted, real)` to a scalar tensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    /// Mean squared error.
    #[default]
    Mse,
    /// Root mean squared error.
    Rmse,
    /// Mean absolute error.
    Mae,
}

impl LossFunction {
    /// Compute the loss as a rank-0 tensor that stays on the autodiff graph.
    pub fn compute(&self, predicted: &Tensor, real: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Mse => candle_nn::loss::mse(predicted, real),
            Self::Rmse => candle_nn::loss::mse(predicted, real)?.sqrt(),
            Self::Mae => predicted.sub(real)?.abs()?.mean_all(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::Rmse => "rmse",
            Self::Mae => "mae",
        }
    }
}
