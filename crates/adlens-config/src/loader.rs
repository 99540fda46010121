use std::path::Path;

use adlens_common::{Error, Result};
use tracing::{info, warn};

use crate::model::AppConfig;

/// Loads configuration from a TOML file with environment overrides.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `path` if it exists, otherwise start from defaults.
    /// A malformed file is an error; a missing one is not.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let mut config = if path.is_file() {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("failed to read config at {}: {e}", path.display()))
            })?;
            let parsed: AppConfig = toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid config file: {e}")))?;
            info!("loaded config from {}", path.display());
            parsed
        } else {
            info!(
                "no config file at {}, using defaults",
                path.display()
            );
            AppConfig::default()
        };

        apply_env_overrides(&mut config);
        validate(&config)?;
        Ok(config)
    }
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(bind) = std::env::var("ADLENS_BIND") {
        config.gateway.bind = bind;
    }
    if let Ok(db_path) = std::env::var("ADLENS_DB_PATH") {
        config.gateway.db_path = db_path;
    }
    if let Ok(base_url) = std::env::var("ADLENS_REASONING_BASE_URL") {
        config.reasoning.base_url = base_url;
    }
    if let Ok(model) = std::env::var("ADLENS_REASONING_MODEL") {
        config.reasoning.model = model;
    }
    if let Ok(base_url) = std::env::var("ADLENS_ADS_API_BASE_URL") {
        config.ads_api.base_url = base_url;
    }
    if let Ok(token_url) = std::env::var("ADLENS_ADS_TOKEN_URL") {
        config.ads_api.token_url = token_url;
    }
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.orchestrator.max_retries == 0 {
        return Err(Error::Config(
            "orchestrator.max_retries must be at least 1".to_string(),
        ));
    }
    if config.memory.decay_half_life_hours <= 0.0 {
        return Err(Error::Config(
            "memory.decay_half_life_hours must be positive".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.memory.retention_floor) {
        return Err(Error::Config(
            "memory.retention_floor must be within 0..=1".to_string(),
        ));
    }
    if config.memory.session_idle_hours <= 0 {
        return Err(Error::Config(
            "memory.session_idle_hours must be positive".to_string(),
        ));
    }
    if config.gateway.bind.parse::<std::net::SocketAddr>().is_err() {
        warn!(
            "gateway.bind '{}' is not a socket address; binding may fail at startup",
            config.gateway.bind
        );
    }
    Ok(())
}
