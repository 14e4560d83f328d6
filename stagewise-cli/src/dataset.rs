//! JSON datasets split into fixed-size batches.
//!
//! ```json
//! { "inputs": [[0.1, 0.2], [0.3, 0.4]], "targets": { "price": [[1.0], [2.0]] } }
//! ```

use anyhow::{Context, bail};
use candle_core::Device;
use serde::Deserialize;
use stagewise_core::{TargetColumn, TargetLayout, TensorBatch, VecSampler};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Dataset {
    pub inputs: Vec<Vec<f32>>,
    pub targets: BTreeMap<String, Vec<Vec<f32>>>,
}

impl Dataset {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dataset {}", path.display()))?;
        let dataset: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse dataset {}", path.display()))?;
        if dataset.inputs.is_empty() {
            bail!("Dataset {} has no rows", path.display());
        }
        Ok(dataset)
    }

    pub fn input_width(&self) -> usize {
        self.inputs.first().map(Vec::len).unwrap_or(0)
    }

    /// Target layout in key order, widths taken from each target's first row.
    pub fn layout(&self) -> anyhow::Result<TargetLayout> {
        let columns = self
            .targets
            .iter()
            .map(|(key, rows)| TargetColumn {
                key: key.clone(),
                width: rows.first().map(Vec::len).unwrap_or(0),
            })
            .collect();
        Ok(TargetLayout::new(columns)?)
    }

    /// Split into batches of at most `batch_size` rows shaped by `layout`.
    pub fn into_sampler(
        self,
        batch_size: usize,
        layout: &TargetLayout,
        device: &Device,
    ) -> anyhow::Result<VecSampler<TensorBatch>> {
        if batch_size == 0 {
            bail!("batch_size must be positive");
        }
        let input_width = self.input_width();
        let rows = self.inputs.len();
        let mut batches = Vec::with_capacity(rows.div_ceil(batch_size));
        for start in (0..rows).step_by(batch_size) {
            let end = (start + batch_size).min(rows);
            let targets: Vec<(String, Vec<Vec<f32>>)> = self
                .targets
                .iter()
                .map(|(key, values)| {
                    let slice = values.get(start..end).unwrap_or_default().to_vec();
                    (key.clone(), slice)
                })
                .collect();
            let batch = TensorBatch::from_rows(
                &self.inputs[start..end],
                &targets,
                input_width,
                layout,
                device,
            )
            .with_context(|| format!("Invalid rows {start}..{end}"))?;
            batches.push(batch);
        }
        Ok(VecSampler::new(batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagewise_core::{Batch, Sampler};

    fn write(content: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_load_and_batch() {
        let (_dir, path) = write(
            r#"{
                "inputs": [[1.0], [2.0], [3.0], [4.0], [5.0]],
                "targets": { "y": [[2.0], [4.0], [6.0], [8.0], [10.0]], "a": [[0.0, 1.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0], [0.0, 1.0]] }
            }"#,
        );
        let dataset = Dataset::load(&path).unwrap();
        let layout = dataset.layout().unwrap();
        assert_eq!(layout.total_width(), 3);
        assert_eq!(layout.columns()[0].key, "a");

        let sampler = dataset.into_sampler(2, &layout, &Device::Cpu).unwrap();
        let sizes: Vec<usize> = sampler.batches().map(|b| b.rows()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);

        let first = sampler.batches().next().unwrap();
        let target: Vec<Vec<f32>> = first.target(true).unwrap().to_vec2().unwrap();
        assert_eq!(target[1], vec![0.0, 1.0, 4.0]);
    }

    #[test]
    fn test_short_target_is_rejected() {
        let (_dir, path) = write(r#"{ "inputs": [[1.0], [2.0]], "targets": { "y": [[2.0]] } }"#);
        let dataset = Dataset::load(&path).unwrap();
        let layout = dataset.layout().unwrap();
        assert!(dataset.into_sampler(4, &layout, &Device::Cpu).is_err());
    }

    #[test]
    fn test_empty_dataset_is_rejected() {
        let (_dir, path) = write(r#"{ "inputs": [], "targets": {} }"#);
        assert!(Dataset::load(&path).is_err());
    }
}
