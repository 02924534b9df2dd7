//! Configuration loader with TOML parsing and environment variable overrides

use super::layer::{LayerConfig, LAYER_CONFIG_FILE};
use super::schema::Settings;
use crate::config::secret_string;
use crate::domain::errors::SyncError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads the settings file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into [`Settings`]
/// 4. Applies environment variable overrides (GEOSYNC_* prefix)
/// 5. Validates the result
///
/// # Examples
///
/// ```no_run
/// use geosync::config::load_settings;
///
/// let settings = load_settings("geosync.toml").expect("Failed to load settings");
/// println!("{}", settings.remote.wfs_url);
/// ```
pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(SyncError::Configuration(format!(
            "Settings file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        SyncError::Configuration(format!(
            "Failed to read settings file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut settings: Settings = toml::from_str(&contents)
        .map_err(|e| SyncError::Configuration(format!("Failed to parse TOML: {}", e)))?;

    apply_env_overrides(&mut settings);

    settings
        .validate()
        .map_err(|e| SyncError::Configuration(format!("Settings validation failed: {}", e)))?;

    Ok(settings)
}

/// Loads `layer.toml` from a dataset directory
pub fn load_layer_config(layer_dir: impl AsRef<Path>) -> Result<LayerConfig> {
    let path = layer_dir.as_ref().join(LAYER_CONFIG_FILE);

    if !path.exists() {
        return Err(SyncError::Configuration(format!(
            "Dataset is not initialized ({} missing); run with --init first",
            path.display()
        )));
    }

    let contents = fs::read_to_string(&path)?;
    let config: LayerConfig = toml::from_str(&contents)?;

    config.validate().map_err(|e| {
        SyncError::Configuration(format!("{} is invalid: {}", path.display(), e))
    })?;

    Ok(config)
}

/// Writes `layer.toml` into a dataset directory
pub fn save_layer_config(layer_dir: impl AsRef<Path>, config: &LayerConfig) -> Result<()> {
    let path = layer_dir.as_ref().join(LAYER_CONFIG_FILE);
    let contents = toml::to_string_pretty(config)?;
    fs::write(&path, contents)?;
    tracing::debug!(path = %path.display(), "Layer configuration written");
    Ok(())
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are left untouched. Every missing variable is reported at once.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| SyncError::Other(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&format!("${{{var_name}}}"), &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(SyncError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

/// Applies environment variable overrides using the GEOSYNC_* prefix
///
/// Variables follow the pattern GEOSYNC_<SECTION>_<KEY>, for example
/// GEOSYNC_REMOTE_API_KEY or GEOSYNC_STORE_CONNECTION_STRING.
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("GEOSYNC_APPLICATION_LOG_LEVEL") {
        settings.application.log_level = val;
    }
    if let Ok(val) = std::env::var("GEOSYNC_APPLICATION_DATA_DIRECTORY") {
        settings.application.data_directory = val.into();
    }

    if let Ok(val) = std::env::var("GEOSYNC_REMOTE_API_KEY") {
        settings.remote.api_key = secret_string(val);
    }
    if let Ok(val) = std::env::var("GEOSYNC_REMOTE_API_URL") {
        settings.remote.api_url = val;
    }
    if let Ok(val) = std::env::var("GEOSYNC_REMOTE_WFS_URL") {
        settings.remote.wfs_url = val;
    }
    if let Ok(val) = std::env::var("GEOSYNC_REMOTE_HTTP_PROXY") {
        settings.remote.http_proxy = Some(val);
    }
    if let Ok(val) = std::env::var("GEOSYNC_REMOTE_HTTPS_PROXY") {
        settings.remote.https_proxy = Some(val);
    }

    if let Ok(val) = std::env::var("GEOSYNC_STORE_CONNECTION_STRING") {
        settings.store.connection_string = secret_string(val);
    }
    if let Ok(val) = std::env::var("GEOSYNC_STORE_SCHEMA") {
        settings.store.schema = val;
    }
    if let Ok(val) = std::env::var("GEOSYNC_STORE_MAX_CONNECTIONS") {
        if let Ok(max) = val.parse() {
            settings.store.max_connections = max;
        }
    }

    if let Ok(val) = std::env::var("GEOSYNC_LOGGING_LOCAL_ENABLED") {
        settings.logging.local_enabled = val.parse().unwrap_or(true);
    }
}
