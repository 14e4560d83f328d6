//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use crate::config::{self, CliConfig, PredictorConfig};
use crate::dataset::Dataset;
use anyhow::{Context, bail};
use candle_core::Device;
use stagewise_core::predictors::{LinearRegressor, Mlp};
use stagewise_core::{
    BaseModel, CheckpointStore, EvaluationResult, FileCheckpointStore, ModelState, Predictor,
    TensorBatch, TrainingProgress, VecSampler,
};
use std::path::{Path, PathBuf};

/// Options for `stagewise train`.
#[derive(Debug)]
pub struct TrainArgs {
    pub data: PathBuf,
    pub eval_data: Option<PathBuf>,
    pub stage: Option<usize>,
    pub all_stages: bool,
}

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config_path: Option<&Path>) -> anyhow::Result<()> {
    let path = config::config_file(config_path, Path::new("."));
    let config = config::load(&path, config_path.is_some())?;
    tracing::debug!(
        predictor = ?config.predictor,
        batch_size = config.batch_size,
        stages = config.model.stages.len(),
        "Configuration loaded"
    );

    match command {
        Commands::Train {
            data,
            eval_data,
            stage,
            all_stages,
        } => handle_train(
            TrainArgs {
                data,
                eval_data,
                stage,
                all_stages,
            },
            &config,
        ),
        Commands::Evaluate { data, checkpoint } => handle_evaluate(&data, &checkpoint, &config),
        Commands::Checkpoints => handle_checkpoints(&config),
        Commands::Config { action } => handle_config(action, &path, &config),
    }
}

fn store_for(config: &CliConfig) -> FileCheckpointStore {
    FileCheckpointStore::new(config.checkpoint_dir(), config.max_checkpoints)
}

fn handle_train(args: TrainArgs, config: &CliConfig) -> anyhow::Result<()> {
    match &config.predictor {
        PredictorConfig::Linear(spec) => train_with::<LinearRegressor>(spec.clone(), args, config),
        PredictorConfig::Mlp(spec) => train_with::<Mlp>(spec.clone(), args, config),
    }
}

fn train_with<P: Predictor>(spec: P::Spec, args: TrainArgs, config: &CliConfig) -> anyhow::Result<()> {
    let device = Device::Cpu;
    let dataset = Dataset::load(&args.data)?;
    let layout = dataset.layout()?;
    let sampler = dataset.into_sampler(config.batch_size, &layout, &device)?;
    let reference = sampler
        .first()
        .cloned()
        .context("Training dataset produced no batches")?;

    let mut model: BaseModel<P, TensorBatch> = BaseModel::new(spec, reference, &config.model)?;
    if let Some(stage) = args.stage {
        model.set_stage_index(stage);
    }

    loop {
        let stage = model.schedule().current_index();
        let rate = model.schedule().current_rate();
        println!(
            "Stage {} (rate {}, {} epochs)",
            stage,
            rate,
            model.schedule().current_epochs()
        );
        run_stage(&mut model, &sampler)?;
        if !args.all_stages || !model.schedule_mut().advance() {
            break;
        }
    }

    if let Some(eval_path) = &args.eval_data {
        let eval_sampler = Dataset::load(eval_path)?.into_sampler(
            config.batch_size,
            &model.shape().layout,
            &device,
        )?;
        let result = model.evaluate(&eval_sampler)?;
        print_evaluation(&result);
    }

    let store = store_for(config);
    let saved = model.save_to_disk(&store)?;
    println!("Checkpoint {} saved to {}", saved.id, saved.path.display());
    Ok(())
}

/// Consume one training run, printing the final average loss of each epoch.
fn run_stage<P: Predictor>(
    model: &mut BaseModel<P, TensorBatch>,
    sampler: &VecSampler<TensorBatch>,
) -> anyhow::Result<()> {
    let mut last: Option<TrainingProgress> = None;
    for progress in model.train(sampler, None) {
        let progress = progress?;
        if let Some(prev) = last
            && prev.epoch != progress.epoch
        {
            println!("  epoch {:>4}  loss {:.6}", prev.epoch + 1, prev.average_loss);
        }
        last = Some(progress);
    }
    if let Some(prev) = last {
        println!("  epoch {:>4}  loss {:.6}", prev.epoch + 1, prev.average_loss);
    }
    Ok(())
}

fn handle_evaluate(data: &Path, checkpoint: &str, config: &CliConfig) -> anyhow::Result<()> {
    let store = store_for(config);
    let id = if checkpoint == "latest" {
        store
            .latest()?
            .map(|r| r.id)
            .context("No checkpoints recorded yet")?
    } else {
        checkpoint.to_string()
    };

    let state = store
        .load(&id)
        .with_context(|| format!("Failed to load checkpoint {id}"))?;
    let result = match state.predictor_kind.as_str() {
        LinearRegressor::KIND => evaluate_with::<LinearRegressor>(state, data, config)?,
        Mlp::KIND => evaluate_with::<Mlp>(state, data, config)?,
        other => bail!("Checkpoint {id} holds unknown predictor '{other}'"),
    };
    print_evaluation(&result);
    Ok(())
}

fn evaluate_with<P: Predictor>(
    state: ModelState,
    data: &Path,
    config: &CliConfig,
) -> anyhow::Result<EvaluationResult> {
    let device = Device::Cpu;
    let model: BaseModel<P, TensorBatch> = BaseModel::from_state(state, &device)?;
    let sampler =
        Dataset::load(data)?.into_sampler(config.batch_size, &model.shape().layout, &device)?;
    Ok(model.evaluate(&sampler)?)
}

fn print_evaluation(result: &EvaluationResult) {
    println!("Error:    {:.6}", result.error);
    println!("Accuracy: {:.6}", result.accuracy);
    for (key, r) in &result.r_values {
        println!("  {key}: R = {r:.6}");
    }
}

fn handle_checkpoints(config: &CliConfig) -> anyhow::Result<()> {
    let store = store_for(config);
    let records = store.list()?;
    if records.is_empty() {
        println!("No checkpoints in {}", store.base_dir().display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {:<8} {:>10} bytes  {}",
            record.id,
            record.predictor_kind,
            record.size_bytes,
            record.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn handle_config(action: ConfigAction, path: &Path, config: &CliConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            if path.exists() {
                println!("Configuration file already exists at: {}", path.display());
                return Ok(());
            }
            let toml_str = toml::to_string_pretty(&CliConfig::default())?;
            std::fs::write(path, &toml_str)?;
            println!("Created default configuration at: {}", path.display());
            Ok(())
        }
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagewise_core::predictors::LinearSpec;

    fn write_dataset(dir: &Path) -> PathBuf {
        let path = dir.join("train.json");
        let inputs: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32 / 10.0]).collect();
        let ys: Vec<Vec<f32>> = inputs.iter().map(|x| vec![3.0 * x[0] - 1.0]).collect();
        let json = serde_json::json!({ "inputs": inputs, "targets": { "y": ys } });
        std::fs::write(&path, json.to_string()).unwrap();
        path
    }

    fn config(dir: &Path) -> CliConfig {
        CliConfig {
            batch_size: 4,
            checkpoint_dir: Some(dir.join("ckpt")),
            predictor: PredictorConfig::Linear(LinearSpec { zero_init: true }),
            model: stagewise_core::ModelConfig::with_stages([(0.1, 3), (0.01, 2)]),
            ..CliConfig::default()
        }
    }

    #[test]
    fn test_train_then_evaluate_latest() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_dataset(dir.path());
        let config = config(dir.path());

        handle_train(
            TrainArgs {
                data: data.clone(),
                eval_data: Some(data.clone()),
                stage: None,
                all_stages: true,
            },
            &config,
        )
        .unwrap();

        let records = store_for(&config).list().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].predictor_kind, "linear");

        handle_evaluate(&data, "latest", &config).unwrap();
        handle_evaluate(&data, &records[0].id, &config).unwrap();
    }

    #[test]
    fn test_config_init_is_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = config::config_file(None, dir.path());
        handle_config(ConfigAction::Init, &path, &CliConfig::default()).unwrap();
        assert!(path.exists());

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("batch_size = 32"));
        std::fs::write(&path, text.replace("batch_size = 32", "batch_size = 7")).unwrap();

        let loaded = config::load(&path, false).unwrap();
        assert_eq!(loaded.batch_size, 7);
        handle_config(ConfigAction::Show, &path, &loaded).unwrap();

        // A second init keeps the edited file.
        handle_config(ConfigAction::Init, &path, &CliConfig::default()).unwrap();
        assert_eq!(config::load(&path, false).unwrap().batch_size, 7);
    }

    #[test]
    fn test_evaluate_without_checkpoints_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = write_dataset(dir.path());
        assert!(handle_evaluate(&data, "latest", &config(dir.path())).is_err());
    }
}
