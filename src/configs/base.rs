use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{common::types::AnyResult, configs::*};

const CONFIG_CANDIDATES: [&str; 2] = ["config.toml", "config.default.toml"];

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
  pub logging: Option<LoggingConfig>,
  #[serde(default)]
  pub gaana: GaanaConfig,
}

impl Config {
  /// Loads `path` when given, otherwise the first of `config.toml` /
  /// `config.default.toml` that exists. Falls back to built-in defaults when
  /// neither file is present. Returns the file that was read, if any.
  pub fn load(path: Option<&str>) -> AnyResult<(Self, Option<String>)> {
    let config_path = match path {
      Some(p) => p.to_string(),
      None => match CONFIG_CANDIDATES.iter().find(|p| Path::new(p).exists()) {
        Some(p) => p.to_string(),
        None => return Ok((Self::default(), None)),
      },
    };

    let config_str = std::fs::read_to_string(&config_path)?;
    let config = Self::parse(&config_str).map_err(|e| format!("{}: {}", config_path, e))?;
    Ok((config, Some(config_path)))
  }

  pub fn parse(config_str: &str) -> AnyResult<Self> {
    if config_str.trim().is_empty() {
      return Err("config file is empty".into());
    }
    Ok(toml::from_str(config_str)?)
  }
}
