//! Serializable model snapshot handed to checkpoint stores.
//!
//! A [`ModelState`] holds everything needed to rebuild a [`BaseModel`] except
//! the reference batch, which has no field here and is never persisted.

use crate::batch::{Batch, ShapeInfo};
use crate::config::LossPrecision;
use crate::error::ModelError;
use crate::loss::LossFunction;
use crate::model::{BaseModel, FlattenPolicy, Predictor};
use crate::optimizer::OptimizerKind;
use crate::schedule::{LearningRateSchedule, LearningRateStage};
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Dims and row-major values of one parameter tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSnapshot {
    pub dims: Vec<usize>,
    pub values: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub format_version: u32,
    /// [`Predictor::KIND`] of the predictor that produced this state.
    pub predictor_kind: String,
    pub predictor_spec: serde_json::Value,
    pub shape: ShapeInfo,
    pub stages: Vec<LearningRateStage>,
    pub stage_index: usize,
    pub optimizer: OptimizerKind,
    pub loss: LossFunction,
    pub error: LossFunction,
    pub flatten_input: bool,
    pub flatten_target: bool,
    pub loss_precision: LossPrecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_checkpoint: Option<String>,
    pub parameters: BTreeMap<String, TensorSnapshot>,
    pub saved_at: DateTime<Utc>,
}

fn snapshot_parameters(params: &VarMap) -> Result<BTreeMap<String, TensorSnapshot>, ModelError> {
    let data = params
        .data()
        .lock()
        .map_err(|_| ModelError::storage("parameter map lock poisoned"))?;
    let mut out = BTreeMap::new();
    for (name, var) in data.iter() {
        let tensor = var.as_tensor();
        let values = tensor
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        out.insert(
            name.clone(),
            TensorSnapshot {
                dims: tensor.dims().to_vec(),
                values,
            },
        );
    }
    Ok(out)
}

impl<P: Predictor, B: Batch> BaseModel<P, B> {
    /// Capture the persistable state of this model.
    pub fn to_state(&self) -> Result<ModelState, ModelError> {
        Ok(ModelState {
            format_version: STATE_FORMAT_VERSION,
            predictor_kind: P::KIND.to_string(),
            predictor_spec: serde_json::to_value(&self.spec)?,
            shape: self.shape.clone(),
            stages: self.schedule.stages().to_vec(),
            stage_index: self.schedule.current_index(),
            optimizer: self.optimizer,
            loss: self.loss,
            error: self.error,
            flatten_input: self.flatten.input,
            flatten_target: self.flatten.target,
            loss_precision: self.loss_precision,
            latest_checkpoint: self.latest_checkpoint.clone(),
            parameters: snapshot_parameters(&self.params)?,
            saved_at: Utc::now(),
        })
    }

    /// Rebuild a model from `state` on `device`, without a reference batch.
    pub fn from_state(state: ModelState, device: &Device) -> Result<Self, ModelError> {
        if state.format_version != STATE_FORMAT_VERSION {
            return Err(ModelError::invalid_input(format!(
                "unsupported model state version {}",
                state.format_version
            )));
        }
        if state.predictor_kind != P::KIND {
            return Err(ModelError::invalid_input(format!(
                "state holds a '{}' predictor, expected '{}'",
                state.predictor_kind,
                P::KIND
            )));
        }

        let spec: P::Spec = serde_json::from_value(state.predictor_spec)?;
        let mut schedule = LearningRateSchedule::new(state.stages)?;
        schedule.set_stage_index(state.stage_index);

        let mut params = VarMap::new();
        let vb = VarBuilder::from_varmap(&params, DType::F32, device);
        let predictor = P::setup(&spec, &state.shape, vb)?;

        let expected = params
            .data()
            .lock()
            .map_err(|_| ModelError::storage("parameter map lock poisoned"))?
            .len();
        if expected != state.parameters.len() {
            return Err(ModelError::invalid_input(format!(
                "state has {} parameters, {} expects {expected}",
                state.parameters.len(),
                P::KIND
            )));
        }
        for (name, snapshot) in state.parameters {
            let tensor = Tensor::from_vec(snapshot.values, snapshot.dims, device)?;
            params.set_one(&name, &tensor).map_err(|e| {
                ModelError::invalid_input(format!("cannot restore parameter '{name}': {e}"))
            })?;
        }

        Ok(Self {
            params,
            predictor,
            spec,
            shape: state.shape,
            reference: None,
            schedule,
            optimizer: state.optimizer,
            loss: state.loss,
            error: state.error,
            flatten: FlattenPolicy {
                input: state.flatten_input,
                target: state.flatten_target,
            },
            loss_precision: state.loss_precision,
            latest_checkpoint: state.latest_checkpoint,
            device: device.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{TargetLayout, TensorBatch};
    use crate::config::ModelConfig;
    use crate::predictors::{LinearRegressor, LinearSpec, Mlp, MlpSpec};

    fn reference() -> TensorBatch {
        let layout = TargetLayout::single("y", 1).unwrap();
        TensorBatch::from_rows(
            &[vec![1.0, 2.0, 3.0]],
            &[("y".into(), vec![vec![1.0]])],
            3,
            &layout,
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_state_has_named_parameters() {
        let model: BaseModel<LinearRegressor, TensorBatch> =
            BaseModel::new(LinearSpec::default(), reference(), &ModelConfig::default()).unwrap();
        let state = model.to_state().unwrap();
        let names: Vec<_> = state.parameters.keys().cloned().collect();
        assert_eq!(names, vec!["linear.bias", "linear.weight"]);
        assert_eq!(state.parameters["linear.weight"].dims, vec![1, 3]);
        assert_eq!(state.predictor_kind, "linear");
    }

    #[test]
    fn test_round_trip_preserves_forward() {
        let mut model: BaseModel<Mlp, TensorBatch> =
            BaseModel::new(MlpSpec { hidden: 4 }, reference(), &ModelConfig::default()).unwrap();
        model.set_stage_index(3);
        let input = reference().input(true).unwrap();
        let before: Vec<Vec<f32>> = model.forward(&input).unwrap().to_vec2().unwrap();

        let json = serde_json::to_string(&model.to_state().unwrap()).unwrap();
        let state: ModelState = serde_json::from_str(&json).unwrap();
        let restored: BaseModel<Mlp, TensorBatch> =
            BaseModel::from_state(state, &Device::Cpu).unwrap();

        let after: Vec<Vec<f32>> = restored.forward(&input).unwrap().to_vec2().unwrap();
        assert_eq!(before, after);
        assert_eq!(restored.schedule().current_index(), 3);
        assert!(restored.reference_batch().is_none());
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let model: BaseModel<LinearRegressor, TensorBatch> =
            BaseModel::new(LinearSpec::default(), reference(), &ModelConfig::default()).unwrap();
        let state = model.to_state().unwrap();
        let result = BaseModel::<Mlp, TensorBatch>::from_state(state, &Device::Cpu);
        assert!(matches!(result, Err(ModelError::InvalidInput(_))));
    }
}
