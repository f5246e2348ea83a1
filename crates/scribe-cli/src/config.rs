use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use scribe_core::config::Config;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {}", .path.display(), .source)]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scribe").join("config.toml"))
}

/// Loads the config file. A missing file at the default location yields
/// defaults; a missing file named explicitly is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let explicit = path.is_some();
    let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) else {
        return Ok(Config::default());
    };

    match fs::read_to_string(&path) {
        Ok(text) => parse_config(&text).map_err(|source| ConfigError::Parse { path, source }),
        Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => Ok(Config::default()),
        Err(source) => Err(ConfigError::Read { path, source }),
    }
}

pub fn parse_config(text: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(text)
}
