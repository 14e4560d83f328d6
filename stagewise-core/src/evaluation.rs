//! Held-out evaluation: per-target error and R² accuracy.

use crate::batch::{Batch, Sampler, TargetArray, flatten_rows};
use crate::error::ModelError;
use crate::loss::LossFunction;
use crate::model::{BaseModel, Predictor};
use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Substituted for a zero total sum of squares.
pub const VARIANCE_EPSILON: f64 = 1e-7;

/// Summary of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Mean of the per-target error function values.
    pub error: f64,
    /// Mean of the per-target R² values.
    pub accuracy: f64,
    pub predicted_targets: BTreeMap<String, TargetArray>,
    pub real_targets: BTreeMap<String, TargetArray>,
    /// Per-target `R = 1 - SSE / SStot` before squaring.
    pub r_values: BTreeMap<String, f64>,
}

/// `1 - SSE / SStot` for one target, with the epsilon guard on `SStot`.
pub fn r_value(real: &TargetArray, predicted: &TargetArray) -> f64 {
    let sse: f64 = real
        .values
        .iter()
        .zip(&predicted.values)
        .map(|(r, p)| (r - p).powi(2))
        .sum::<f64>()
        .abs();

    let means = real.column_means();
    let mut ss_tot = if real.width == 0 {
        0.0
    } else {
        real.values
            .chunks_exact(real.width)
            .flat_map(|row| row.iter().zip(&means).map(|(v, m)| (v - m).powi(2)))
            .sum::<f64>()
            .abs()
    };
    if ss_tot == 0.0 {
        ss_tot = VARIANCE_EPSILON;
    }

    1.0 - sse / ss_tot
}

fn target_error(
    function: LossFunction,
    predicted: &TargetArray,
    real: &TargetArray,
    device: &Device,
) -> Result<f64, ModelError> {
    let p = predicted.to_tensor(device)?;
    let r = real.to_tensor(device)?;
    Ok(function.compute(&p, &r)?.to_scalar::<f64>()?)
}

fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    values.sum::<f64>() / n as f64
}

impl<P: Predictor, B: Batch> BaseModel<P, B> {
    /// Run the model over `sampler` without training and score it per target.
    pub fn evaluate<S>(&self, sampler: &S) -> Result<EvaluationResult, ModelError>
    where
        S: Sampler<Batch = B>,
    {
        let width = self.shape.layout.total_width();
        let mut predicted_all: Vec<f64> = Vec::new();
        let mut real_all: Vec<f64> = Vec::new();

        for (batch_number, batch) in sampler.batches().enumerate() {
            tracing::info!(batch = batch_number, "[EPOCH-BATCH] Testing");
            let (predicted, real, size) = self.batch_outputs(&batch)?;
            if size == 0 {
                continue;
            }
            let predicted = flatten_rows(&predicted)?;
            let real = flatten_rows(&real)?;
            for (name, t) in [("predicted", &predicted), ("real", &real)] {
                if t.dims()[1] != width {
                    return Err(ModelError::invalid_input(format!(
                        "{name} values have width {}, target layout expects {width}",
                        t.dims()[1]
                    )));
                }
            }
            predicted_all.extend(predicted.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?);
            real_all.extend(real.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?);
        }

        if real_all.is_empty() {
            return Err(ModelError::invalid_input(
                "evaluation sampler produced no samples",
            ));
        }

        let predicted_targets = self.shape.layout.deflatten(&predicted_all)?;
        let real_targets = self.shape.layout.deflatten(&real_all)?;

        let mut r_values = BTreeMap::new();
        let mut errors = BTreeMap::new();
        for (key, real) in &real_targets {
            let predicted = predicted_targets
                .get(key)
                .ok_or_else(|| ModelError::invalid_input(format!("no predictions for '{key}'")))?;
            r_values.insert(key.clone(), r_value(real, predicted));
            errors.insert(
                key.clone(),
                target_error(self.error, predicted, real, &self.device)?,
            );
        }

        let error = mean(errors.values().copied());
        let accuracy = mean(r_values.values().map(|r| r * r));

        tracing::info!(
            error,
            accuracy,
            error_function = self.error.name(),
            targets = real_targets.len(),
            "Evaluation complete"
        );

        Ok(EvaluationResult {
            error,
            accuracy,
            predicted_targets,
            real_targets,
            r_values,
        })
    }
}
