//! Batches, samplers and target layout metadata.
//!
//! A [`Batch`] hands out its input and target tensors, optionally flattened to
//! `(rows, width)`. The [`TargetLayout`] describes which flattened target
//! columns belong to which named target, so aggregated predictions can be
//! split back into per-target arrays after evaluation.

use crate::error::ModelError;
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A unit of training or evaluation data.
pub trait Batch {
    /// Input tensor. With `flatten` the result is `(rows, input_width)`.
    fn input(&self, flatten: bool) -> Result<Tensor, ModelError>;

    /// Target tensor. With `flatten` the result is `(rows, layout.total_width())`.
    fn target(&self, flatten: bool) -> Result<Tensor, ModelError>;

    /// Shape metadata used to build predictors and de-flatten outputs.
    fn shape(&self) -> ShapeInfo;
}

/// Produces a finite, ordered sequence of batches. Called once per epoch.
pub trait Sampler {
    type Batch: Batch;

    fn batches(&self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

/// One named target occupying `width` consecutive flattened columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetColumn {
    pub key: String,
    pub width: usize,
}

/// Ordered column layout of a flattened target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLayout {
    columns: Vec<TargetColumn>,
}

impl TargetLayout {
    pub fn new(columns: Vec<TargetColumn>) -> Result<Self, ModelError> {
        let mut seen = HashSet::new();
        for column in &columns {
            if column.width == 0 {
                return Err(ModelError::invalid_input(format!(
                    "target '{}' has zero width",
                    column.key
                )));
            }
            if !seen.insert(column.key.as_str()) {
                return Err(ModelError::invalid_input(format!(
                    "duplicate target key '{}'",
                    column.key
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Layout with a single target of the given width.
    pub fn single(key: impl Into<String>, width: usize) -> Result<Self, ModelError> {
        Self::new(vec![TargetColumn {
            key: key.into(),
            width,
        }])
    }

    pub fn columns(&self) -> &[TargetColumn] {
        &self.columns
    }

    pub fn total_width(&self) -> usize {
        self.columns.iter().map(|c| c.width).sum()
    }

    /// Split row-major `(rows, total_width)` values into per-target arrays.
    pub fn deflatten(&self, values: &[f64]) -> Result<BTreeMap<String, TargetArray>, ModelError> {
        let total = self.total_width();
        if total == 0 || values.len() % total != 0 {
            return Err(ModelError::invalid_input(format!(
                "cannot split {} values into rows of width {total}",
                values.len()
            )));
        }

        let rows = values.len() / total;
        let mut out: BTreeMap<String, TargetArray> = BTreeMap::new();
        let mut offset = 0;
        for column in &self.columns {
            let mut data = Vec::with_capacity(rows * column.width);
            for row in values.chunks_exact(total) {
                data.extend_from_slice(&row[offset..offset + column.width]);
            }
            out.insert(
                column.key.clone(),
                TargetArray {
                    width: column.width,
                    values: data,
                },
            );
            offset += column.width;
        }
        Ok(out)
    }
}

/// Shape metadata captured from a reference batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeInfo {
    /// Width of one flattened input row.
    pub input_width: usize,
    pub layout: TargetLayout,
}

/// Row-major values of one target across all evaluated samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetArray {
    pub width: usize,
    pub values: Vec<f64>,
}

impl TargetArray {
    pub fn rows(&self) -> usize {
        if self.width == 0 {
            0
        } else {
            self.values.len() / self.width
        }
    }

    /// Mean of every column (axis 0).
    pub fn column_means(&self) -> Vec<f64> {
        let rows = self.rows();
        let mut means = vec![0.0; self.width];
        if rows == 0 {
            return means;
        }
        for row in self.values.chunks_exact(self.width) {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        for m in &mut means {
            *m /= rows as f64;
        }
        means
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor, ModelError> {
        Ok(Tensor::from_vec(
            self.values.clone(),
            (self.rows(), self.width),
            device,
        )?)
    }
}

/// Reshape `(rows, ...)` into `(rows, product of remaining dims)`.
pub fn flatten_rows(tensor: &Tensor) -> Result<Tensor, ModelError> {
    let dims = tensor.dims();
    let Some((&rows, rest)) = dims.split_first() else {
        return Err(ModelError::invalid_input(
            "scalar tensor has no leading batch dimension",
        ));
    };
    let width: usize = rest.iter().product();
    Ok(tensor.reshape((rows, width))?)
}

/// In-memory batch backed by candle tensors.
#[derive(Debug, Clone)]
pub struct TensorBatch {
    input: Tensor,
    target: Tensor,
    layout: TargetLayout,
}

impl TensorBatch {
    /// Wrap tensors whose leading dimension is the sample count.
    pub fn new(input: Tensor, target: Tensor, layout: TargetLayout) -> Result<Self, ModelError> {
        let input_rows = input.dims().first().copied();
        let target_rows = target.dims().first().copied();
        if input_rows.is_none() || input_rows != target_rows {
            return Err(ModelError::invalid_input(format!(
                "input dims {:?} and target dims {:?} disagree on batch size",
                input.dims(),
                target.dims()
            )));
        }
        let target_width: usize = target.dims()[1..].iter().product();
        if target_width != layout.total_width() {
            return Err(ModelError::invalid_input(format!(
                "target width {target_width} does not match layout width {}",
                layout.total_width()
            )));
        }
        Ok(Self {
            input,
            target,
            layout,
        })
    }

    /// Build a batch from row vectors and named target rows.
    ///
    /// Every target named by `layout` must have one row per input row, each
    /// row exactly as wide as its layout column.
    pub fn from_rows(
        inputs: &[Vec<f32>],
        targets: &[(String, Vec<Vec<f32>>)],
        input_width: usize,
        layout: &TargetLayout,
        device: &Device,
    ) -> Result<Self, ModelError> {
        let rows = inputs.len();
        let mut input_values = Vec::with_capacity(rows * input_width);
        for (i, row) in inputs.iter().enumerate() {
            if row.len() != input_width {
                return Err(ModelError::invalid_input(format!(
                    "input row {i} has width {}, expected {input_width}",
                    row.len()
                )));
            }
            input_values.extend_from_slice(row);
        }

        let by_key: BTreeMap<&str, &Vec<Vec<f32>>> =
            targets.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let total = layout.total_width();
        let mut target_values = vec![0f32; rows * total];
        let mut offset = 0;
        for column in layout.columns() {
            let values = by_key.get(column.key.as_str()).ok_or_else(|| {
                ModelError::invalid_input(format!("missing target '{}'", column.key))
            })?;
            if values.len() != rows {
                return Err(ModelError::invalid_input(format!(
                    "target '{}' has {} rows, expected {rows}",
                    column.key,
                    values.len()
                )));
            }
            for (r, row) in values.iter().enumerate() {
                if row.len() != column.width {
                    return Err(ModelError::invalid_input(format!(
                        "target '{}' row {r} has width {}, expected {}",
                        column.key,
                        row.len(),
                        column.width
                    )));
                }
                let start = r * total + offset;
                target_values[start..start + column.width].copy_from_slice(row);
            }
            offset += column.width;
        }

        let input = Tensor::from_vec(input_values, (rows, input_width), device)?;
        let target = Tensor::from_vec(target_values, (rows, total), device)?;
        Self::new(input, target, layout.clone())
    }

    pub fn rows(&self) -> usize {
        self.target.dims()[0]
    }
}

impl Batch for TensorBatch {
    fn input(&self, flatten: bool) -> Result<Tensor, ModelError> {
        if flatten {
            flatten_rows(&self.input)
        } else {
            Ok(self.input.clone())
        }
    }

    fn target(&self, flatten: bool) -> Result<Tensor, ModelError> {
        if flatten {
            flatten_rows(&self.target)
        } else {
            Ok(self.target.clone())
        }
    }

    fn shape(&self) -> ShapeInfo {
        ShapeInfo {
            input_width: self.input.dims()[1..].iter().product(),
            layout: self.layout.clone(),
        }
    }
}

/// Sampler over a fixed list of batches, replayed in order every epoch.
#[derive(Debug, Clone, Default)]
pub struct VecSampler<B> {
    batches: Vec<B>,
}

impl<B> VecSampler<B> {
    pub fn new(batches: Vec<B>) -> Self {
        Self { batches }
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn first(&self) -> Option<&B> {
        self.batches.first()
    }
}

impl<B: Batch + Clone> Sampler for VecSampler<B> {
    type Batch = B;

    fn batches(&self) -> Box<dyn Iterator<Item = B> + '_> {
        Box::new(self.batches.iter().cloned())
    }
}
