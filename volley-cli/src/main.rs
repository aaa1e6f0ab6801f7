use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use volley_config::{ConfigLoader, VolleyConfig};
use volley_invocation::{validate, Engine, TargetSpec};
use volley_results::ResultsCollector;

mod cli;
use cli::{Cli, Commands, ConfigCommands};

fn load_config(config_path: Option<&PathBuf>) -> Result<VolleyConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                info!("Loading configuration from: {:?}", path);
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                warn!("Configuration file not found: {:?}. Using defaults.", path);
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => {
            debug!("No configuration file specified. Loading from environment or defaults.");
            loader
                .from_env()
                .context("Failed to load configuration from environment")
        }
    }
}

/// Read a target specification; `.json` files are parsed as JSON, anything else as YAML
fn load_target(path: &Path) -> Result<TargetSpec> {
    let content = fs::read_to_string(path).context(format!("Failed to read target file {:?}", path))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let spec = if is_json {
        serde_json::from_str(&content).context(format!("Failed to parse JSON target {:?}", path))?
    } else {
        serde_yaml::from_str(&content).context(format!("Failed to parse YAML target {:?}", path))?
    };
    Ok(spec)
}

async fn run_target(config: VolleyConfig, target: &Path, stop_after: Option<Duration>, invocations: bool) -> Result<()> {
    let spec = load_target(target)?;
    let engine = Engine::from_config(&config).context("Failed to create invocation engine")?;
    let collector = ResultsCollector::from_config(&config).context("Failed to create results collector")?;
    let sweeper = engine.start_client_sweeper();

    let tracker = engine
        .register(spec, &[collector.direct_sink_factory()])
        .await
        .context("Failed to register target")?;
    let target_name = tracker.target_name().to_string();
    info!(
        "Running target {} ({} calls)",
        target_name,
        tracker.spec().total_calls()
    );

    let mut run = engine.spawn(tracker.clone());
    let deadline = async {
        match stop_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        joined = &mut run => Some(joined),
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping target {}", target_name);
            None
        }
        _ = deadline => {
            info!("Stopping target {} after {:?}", target_name, stop_after.unwrap_or_default());
            None
        }
    };
    let outcome = match outcome {
        Some(joined) => joined,
        None => {
            engine.stop(&target_name);
            run.await
        }
    };
    outcome
        .context("Dispatch task panicked")?
        .context("Invocation failed")?;

    println!("{}", collector.targets_results_json()?);
    if invocations {
        println!("{}", collector.invocation_results_json()?);
    }

    engine.shutdown();
    let _ = sweeper.await;
    if let Some(mirror) = collector.mirror() {
        mirror.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.parse().map_err(anyhow::Error::msg)?;
    }
    volley_logging::init_logging_from_config(&config.logging)?;

    match cli.command {
        Commands::Run {
            target,
            stop_after,
            invocations,
        } => run_target(config, &target, stop_after, invocations).await,
        Commands::Validate { target } => {
            let spec = load_target(&target)?;
            let normalised = validate(&spec).context("Invalid target specification")?;
            print!("{}", serde_yaml::to_string(&normalised)?);
            Ok(())
        }
        Commands::Config { config_cmd } => match config_cmd {
            ConfigCommands::Validate { config_file } => {
                let config = ConfigLoader::new()
                    .from_file(&config_file)
                    .context(format!("Failed to load configuration from {:?}", config_file))?;
                config.validate_all()?;
                println!("Configuration {:?} is valid", config_file);
                Ok(())
            }
            ConfigCommands::Sample => {
                print!("{}", VolleyConfig::generate_sample());
                Ok(())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_yaml_target() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "name: svc\nmethod: GET\nurl: http://localhost:8080/\nreplicas: 2\nrequestCount: 5\ndelay: 50ms"
        )
        .unwrap();

        let spec = load_target(file.path()).unwrap();
        assert_eq!(spec.name, "svc");
        assert_eq!(spec.replicas, 2);
        assert_eq!(spec.request_count, 5);
        assert_eq!(spec.delay, "50ms");
    }

    #[test]
    fn test_load_json_target() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"name":"svc","method":"POST","url":"https://example.com","abMode":true,"burls":["https://b.example.com"]}}"#
        )
        .unwrap();

        let spec = load_target(file.path()).unwrap();
        assert!(spec.ab_mode);
        assert!(validate(&spec).is_ok());
    }

    #[test]
    fn test_load_target_errors() {
        assert!(load_target(Path::new("/nonexistent/target.yaml")).is_err());

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "not json").unwrap();
        assert!(load_target(file.path()).is_err());
    }
}
