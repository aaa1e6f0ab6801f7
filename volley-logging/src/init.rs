use anyhow::Result;
use tracing_subscriber::EnvFilter;
use volley_config::{LogFormat, LoggingConfig};

/// Build the `EnvFilter` for a config: the level plus any extra directives.
///
/// `RUST_LOG` wins when the configured filter cannot be parsed.
pub fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let mut filter = config.level.to_string();
    for directive in &config.directives {
        filter.push(',');
        filter.push_str(directive.trim());
    }

    EnvFilter::try_new(&filter)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize logging from configuration
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    // Use try_init to avoid panic if global subscriber already set
    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}
