//! Single affine layer.

use crate::batch::ShapeInfo;
use crate::error::ModelError;
use crate::model::Predictor;
use candle_core::Tensor;
use candle_nn::{Init, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`LinearRegressor`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearSpec {
    /// Start from all-zero weights instead of the default random init.
    #[serde(default)]
    pub zero_init: bool,
}

/// `y = x W^T + b` over flattened inputs.
#[derive(Debug, Clone)]
pub struct LinearRegressor {
    layer: Linear,
}

impl Predictor for LinearRegressor {
    type Spec = LinearSpec;

    const KIND: &'static str = "linear";

    fn setup(spec: &LinearSpec, shape: &ShapeInfo, vb: VarBuilder) -> Result<Self, ModelError> {
        let inputs = shape.input_width;
        let outputs = shape.layout.total_width();
        let layer = if spec.zero_init {
            let vb = vb.pp("linear");
            let weight = vb.get_with_hints((outputs, inputs), "weight", Init::Const(0.0))?;
            let bias = vb.get_with_hints(outputs, "bias", Init::Const(0.0))?;
            Linear::new(weight, Some(bias))
        } else {
            candle_nn::linear(inputs, outputs, vb.pp("linear"))?
        };
        Ok(Self { layer })
    }

    fn forward(&self, input: &Tensor) -> Result<Tensor, ModelError> {
        Ok(self.layer.forward(input)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::TargetLayout;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_zero_init_predicts_zero() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let shape = ShapeInfo {
            input_width: 3,
            layout: TargetLayout::single("y", 2).unwrap(),
        };
        let model = LinearRegressor::setup(&LinearSpec { zero_init: true }, &shape, vb).unwrap();
        let x = Tensor::ones((4, 3), DType::F32, &Device::Cpu).unwrap();
        let y: Vec<Vec<f32>> = model.forward(&x).unwrap().to_vec2().unwrap();
        assert_eq!(y, vec![vec![0.0, 0.0]; 4]);
        assert_eq!(varmap.all_vars().len(), 2);
    }
}
