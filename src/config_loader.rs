// Configuration file loader for the Transcription API
//
// The file is a flat TOML table whose keys are the environment variable
// names. Values are exported into the process environment unless the
// variable is already set, so the environment always wins.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use toml::Value;

const CONFIG_FILE_PATH: &str = "transcribe_api.conf";

/// Environment variable overriding the configuration file location
const CONFIG_PATH_VAR: &str = "TRANSCRIBE_API_CONFIG";

/// Flatten a TOML document into `KEY -> value` strings.
///
/// Arrays and nested tables have no environment form and are skipped.
pub fn parse_flat_config(content: &str) -> Result<BTreeMap<String, String>, toml::de::Error> {
    let table: toml::Table = content.parse()?;
    let mut values = BTreeMap::new();

    for (key, value) in table {
        let text = match value {
            Value::String(s) => s,
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            _ => {
                warn!("Skipping unsupported TOML value type for key: {}", key);
                continue;
            }
        };
        values.insert(key, text);
    }
    Ok(values)
}

/// Load the configuration file into the environment.
///
/// Returns true if a file was found and applied.
pub fn load_config() -> bool {
    let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_FILE_PATH.to_string());
    load_config_from(Path::new(&path))
}

pub fn load_config_from(config_path: &Path) -> bool {
    if !config_path.exists() {
        debug!("Configuration file not found at: {}", config_path.display());
        return false;
    }

    let values = match fs::read_to_string(config_path)
        .map_err(|e| e.to_string())
        .and_then(|content| parse_flat_config(&content).map_err(|e| e.to_string()))
    {
        Ok(values) => values,
        Err(e) => {
            warn!("Ignoring configuration file {}: {}", config_path.display(), e);
            return false;
        }
    };

    let mut applied = 0;
    for (key, value) in values {
        if env::var_os(&key).is_some() {
            debug!("{} set in environment, file value ignored", key);
            continue;
        }
        env::set_var(&key, value);
        applied += 1;
    }

    info!(
        "Configuration loaded from {} ({} values applied)",
        config_path.display(),
        applied
    );
    true
}
