//! Lazily bound optimizer.
//!
//! An [`OptimizerBinding`] starts unbound. The first `zero_grad` or `step`
//! constructs the optimizer against the parameters and rate passed at that
//! moment; later schedule changes do not touch an already bound optimizer
//! until [`OptimizerBinding::discard`] is called.

use crate::error::ModelError;
use candle_core::Tensor;
use candle_core::backprop::GradStore;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD, VarMap};
use serde::{Deserialize, Serialize};

/// Which update rule to bind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Adam (AdamW without weight decay).
    #[default]
    Adam,
    /// Plain stochastic gradient descent.
    Sgd,
}

enum BoundOptimizer {
    Adam(AdamW),
    Sgd(SGD),
}

impl BoundOptimizer {
    fn bind(kind: OptimizerKind, params: &VarMap, rate: f64) -> candle_core::Result<Self> {
        let vars = params.all_vars();
        Ok(match kind {
            OptimizerKind::Adam => Self::Adam(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: rate,
                    weight_decay: 0.0,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => Self::Sgd(SGD::new(vars, rate)?),
        })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        match self {
            Self::Adam(opt) => opt.step(grads),
            Self::Sgd(opt) => opt.step(grads),
        }
    }

    fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam(opt) => opt.learning_rate(),
            Self::Sgd(opt) => opt.learning_rate(),
        }
    }
}

/// Optimizer slot with lazy construction and held gradients.
pub struct OptimizerBinding {
    kind: OptimizerKind,
    bound: Option<BoundOptimizer>,
    grads: Option<GradStore>,
}

impl OptimizerBinding {
    pub fn new(kind: OptimizerKind) -> Self {
        Self {
            kind,
            bound: None,
            grads: None,
        }
    }

    fn ensure_bound(&mut self, params: &VarMap, rate: f64) -> Result<&mut BoundOptimizer, ModelError> {
        if self.bound.is_none() {
            tracing::debug!(optimizer = ?self.kind, rate, "Binding optimizer");
            self.bound = Some(BoundOptimizer::bind(self.kind, params, rate)?);
        }
        self.bound
            .as_mut()
            .ok_or_else(|| ModelError::config("optimizer failed to bind"))
    }

    /// Bind if needed, then drop any accumulated gradients.
    pub fn zero_grad(&mut self, params: &VarMap, rate: f64) -> Result<(), ModelError> {
        self.ensure_bound(params, rate)?;
        self.grads = None;
        Ok(())
    }

    /// Backpropagate `loss` and hold the resulting gradients for `step`.
    pub fn backward(&mut self, loss: &Tensor) -> Result<(), ModelError> {
        self.grads = Some(loss.backward()?);
        Ok(())
    }

    /// Bind if needed, then apply one update from the held gradients.
    pub fn step(&mut self, params: &VarMap, rate: f64) -> Result<(), ModelError> {
        let grads = self.grads.take();
        let optimizer = self.ensure_bound(params, rate)?;
        if let Some(grads) = grads {
            optimizer.step(&grads)?;
        }
        Ok(())
    }

    /// Unbind so the next call rebinds at the rate passed then.
    pub fn discard(&mut self) {
        self.bound = None;
        self.grads = None;
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Learning rate of the bound optimizer, if any.
    pub fn bound_rate(&self) -> Option<f64> {
        self.bound.as_ref().map(BoundOptimizer::learning_rate)
    }

    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }
}

impl std::fmt::Debug for OptimizerBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerBinding")
            .field("kind", &self.kind)
            .field("bound_rate", &self.bound_rate())
            .field("has_grads", &self.grads.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::{Init, VarBuilder};

    fn params() -> (VarMap, Tensor) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let w = vb.get_with_hints(1, "w", Init::Const(1.0)).unwrap();
        (varmap, w)
    }

    #[test]
    fn test_lazy_binding() {
        let (varmap, _) = params();
        let mut binding = OptimizerBinding::new(OptimizerKind::Sgd);
        assert!(!binding.is_bound());
        binding.zero_grad(&varmap, 0.5).unwrap();
        assert!(binding.is_bound());
        assert_eq!(binding.bound_rate(), Some(0.5));
    }

    #[test]
    fn test_bound_rate_survives_new_rate_until_discard() {
        let (varmap, _) = params();
        let mut binding = OptimizerBinding::new(OptimizerKind::Adam);
        binding.zero_grad(&varmap, 0.1).unwrap();
        binding.step(&varmap, 0.01).unwrap();
        assert_eq!(binding.bound_rate(), Some(0.1));

        binding.discard();
        assert!(!binding.is_bound());
        binding.step(&varmap, 0.01).unwrap();
        assert_eq!(binding.bound_rate(), Some(0.01));
    }

    #[test]
    fn test_sgd_step_moves_parameter() {
        let (varmap, w) = params();
        let mut binding = OptimizerBinding::new(OptimizerKind::Sgd);
        binding.zero_grad(&varmap, 0.5).unwrap();
        // d(w^2)/dw = 2w = 2 at w = 1, so w becomes 1 - 0.5 * 2 = 0.
        let loss = w.sqr().unwrap().sum_all().unwrap();
        binding.backward(&loss).unwrap();
        binding.step(&varmap, 0.5).unwrap();
        let updated: Vec<f32> = varmap.all_vars()[0].as_tensor().to_vec1().unwrap();
        assert!(updated[0].abs() < 1e-6);
    }

    #[test]
    fn test_step_without_grads_is_noop() {
        let (varmap, _) = params();
        let mut binding = OptimizerBinding::new(OptimizerKind::Sgd);
        binding.step(&varmap, 0.5).unwrap();
        let value: Vec<f32> = varmap.all_vars()[0].as_tensor().to_vec1().unwrap();
        assert_eq!(value, vec![1.0]);
    }
}
