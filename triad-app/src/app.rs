use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use triad_train::{LoadIteration, ModelParams, Scene, SceneOptions};

use crate::errors::AppError;
use crate::{Args, Command};

pub fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();
}

/// Merge the config file (if any) with command-line overrides.
pub fn model_params(args: &Args) -> Result<ModelParams, AppError> {
    let mut params = match &args.config {
        Some(path) => ModelParams::from_json_file(path)?,
        None => ModelParams::default(),
    };
    if let Some(source) = &args.source {
        params.source_path = source.clone();
    }
    if let Some(model) = &args.model {
        params.model_path = model.clone();
    }
    if params.source_path.as_os_str().is_empty() {
        return Err(AppError::MissingArgument("source path"));
    }
    if params.model_path.as_os_str().is_empty() {
        return Err(AppError::MissingArgument("model path"));
    }
    // None of the commands render, so images are never decoded
    params.load_images = false;
    Ok(params)
}

fn load_iteration(flag: i64) -> Result<Option<LoadIteration>, AppError> {
    match flag {
        0 => Ok(None),
        _ => LoadIteration::from_flag(flag)
            .map(Some)
            .ok_or(AppError::InvalidLoadIteration(flag)),
    }
}

pub fn run(args: Args) -> Result<(), AppError> {
    let params = model_params(&args)?;
    let mut rng = StdRng::seed_from_u64(args.seed);

    match args.command {
        Command::Parts => {
            let options = SceneOptions {
                load_iteration: load_iteration(args.load_iteration)?,
                shuffle: false,
                ..SceneOptions::default()
            };
            let scene: Scene = Scene::new(params, &options, &mut rng)?;
            for part in scene.parts() {
                let bounds = part
                    .bounds
                    .map(|b| format!("{} .. {}", b.min, b.max))
                    .unwrap_or_else(|| "unbounded".to_string());
                println!(
                    "{}\t{}\t{} cameras",
                    part.name,
                    bounds,
                    part.selected_count()
                );
            }
        }
        Command::Export { iteration, part } => {
            let options = SceneOptions {
                load_iteration: load_iteration(args.load_iteration)?,
                ..SceneOptions::default()
            };
            let mut scene: Scene = Scene::new(params, &options, &mut rng)?;
            let parts = match part {
                Some(name) => {
                    let part = scene
                        .parts()
                        .iter()
                        .find(|p| p.name == name)
                        .cloned()
                        .ok_or(AppError::UnknownPart(name))?;
                    vec![part]
                }
                None => scene.parts().to_vec(),
            };
            for part in &parts {
                info!(
                    "Part '{}': {} training cameras",
                    part.name,
                    scene.train_cameras_for_part(part, 1.0)?.len()
                );
                scene.replace_model()?;
                scene.save_part(part, iteration)?;
            }
            info!("Exported {} parts at iteration {}", parts.len(), iteration);
        }
        Command::Merge { iteration } => {
            if args.load_iteration != 0 {
                return Err(AppError::LoadIterationNotApplicable("merge"));
            }
            // Resuming skips the fresh-run snapshots; the checkpoint itself is not read
            let options = SceneOptions {
                load_iteration: Some(LoadIteration::At(iteration)),
                shuffle: false,
                ..SceneOptions::default()
            };
            let scene: Scene = Scene::new(params, &options, &mut rng)?;
            let count = scene.merge_parts(iteration)?;
            println!("{}", count);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("params.json");
        std::fs::write(
            &config,
            r#"{"source_path": "/data/a", "model_path": "/out/a", "sh_degree": 1}"#,
        )
        .unwrap();

        let args = Args::parse_from([
            "triad",
            "--config",
            config.to_str().unwrap(),
            "--model",
            "/out/b",
            "merge",
            "--iteration",
            "30",
        ]);
        let params = model_params(&args).unwrap();
        assert_eq!(params.source_path, std::path::PathBuf::from("/data/a"));
        assert_eq!(params.model_path, std::path::PathBuf::from("/out/b"));
        assert_eq!(params.sh_degree, 1);
        assert!(!params.load_images);
        assert!(matches!(args.command, Command::Merge { iteration: 30 }));
    }

    #[test]
    fn test_missing_source() {
        let args = Args::parse_from(["triad", "--model", "/out", "parts"]);
        assert!(matches!(
            model_params(&args),
            Err(AppError::MissingArgument(_))
        ));
    }

    #[test]
    fn test_load_iteration_flag() {
        assert_eq!(load_iteration(0).unwrap(), None);
        assert_eq!(load_iteration(-1).unwrap(), Some(LoadIteration::Latest));
        assert_eq!(load_iteration(7).unwrap(), Some(LoadIteration::At(7)));
        assert!(matches!(
            load_iteration(-5),
            Err(AppError::InvalidLoadIteration(-5))
        ));
    }

    #[test]
    fn test_merge_rejects_load_iteration() {
        let args = Args::parse_from([
            "triad",
            "--source",
            "/nonexistent/data",
            "--model",
            "/nonexistent/out",
            "merge",
            "--iteration",
            "7",
            "--load-iteration",
            "-1",
        ]);
        assert!(matches!(
            run(args),
            Err(AppError::LoadIterationNotApplicable("merge"))
        ));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "triad",
            "export",
            "--iteration",
            "7",
            "--seed",
            "3",
            "--load-iteration",
            "-1",
        ]);
        assert_eq!(args.seed, 3);
        assert_eq!(args.load_iteration, -1);
        assert!(matches!(args.command, Command::Export { iteration: 7, part: None }));
    }
}
