//! Two-layer perceptron with a ReLU hidden layer.

use crate::batch::ShapeInfo;
use crate::error::ModelError;
use crate::model::Predictor;
use candle_core::Tensor;
use candle_nn::{Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`Mlp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpSpec {
    #[serde(default = "default_hidden")]
    pub hidden: usize,
}

impl Default for MlpSpec {
    fn default() -> Self {
        Self {
            hidden: default_hidden(),
        }
    }
}

fn default_hidden() -> usize {
    16
}

#[derive(Debug, Clone)]
pub struct Mlp {
    hidden: Linear,
    output: Linear,
}

impl Predictor for Mlp {
    type Spec = MlpSpec;

    const KIND: &'static str = "mlp";

    fn setup(spec: &MlpSpec, shape: &ShapeInfo, vb: VarBuilder) -> Result<Self, ModelError> {
        if spec.hidden == 0 {
            return Err(ModelError::config("mlp hidden width must be positive"));
        }
        let hidden = candle_nn::linear(shape.input_width, spec.hidden, vb.pp("hidden"))?;
        let output = candle_nn::linear(spec.hidden, shape.layout.total_width(), vb.pp("output"))?;
        Ok(Self { hidden, output })
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        let h = self.hidden.forward(input)?.relu()?;
        Ok(self.output.forward(&h)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::TargetLayout;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_output_shape_and_params() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let shape = ShapeInfo {
            input_width: 5,
            layout: TargetLayout::single("y", 3).unwrap(),
        };
        let mlp = Mlp::setup(&MlpSpec { hidden: 8 }, &shape, vb).unwrap();
        let x = Tensor::zeros((2, 5), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(mlp.forward(&x).unwrap().dims(), &[2, 3]);
        assert_eq!(varmap.all_vars().len(), 4);
    }

    #[test]
    fn test_zero_hidden_rejected() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let shape = ShapeInfo {
            input_width: 1,
            layout: TargetLayout::single("y", 1).unwrap(),
        };
        assert!(Mlp::setup(&MlpSpec { hidden: 0 }, &shape, vb).is_err());
    }
}
