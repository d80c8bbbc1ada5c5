use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::api::TokenFile;
use crate::cache::{CacheKey, QueryOptions};
use crate::gesture::GestureConfig;
use crate::invalidation::{InvalidationPolicy, MutationDescriptor};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub gesture: GestureConfig,
  /// Extra descriptors appended to the built-in storefront table
  #[serde(default)]
  pub invalidation: Vec<DescriptorConfig>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
  /// Overrides the default token location (`~` is expanded)
  pub token_file: Option<PathBuf>,
}

fn default_request_timeout_ms() -> u64 {
  15_000
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_stale_after_ms")]
  pub stale_after_ms: u64,
  #[serde(default)]
  pub refetch_interval_ms: Option<u64>,
}

fn default_stale_after_ms() -> u64 {
  60_000
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_after_ms: default_stale_after_ms(),
      refetch_interval_ms: None,
    }
  }
}

impl CacheConfig {
  /// Default options applied to reads that don't pass their own.
  pub fn query_options(&self) -> QueryOptions {
    let options = QueryOptions::default().stale_after(Duration::from_millis(self.stale_after_ms));
    match self.refetch_interval_ms {
      Some(ms) => options.refetch_every(Duration::from_millis(ms)),
      None => options,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptorConfig {
  pub pattern: String,
  pub keys: Vec<CacheKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
  /// Log directory (defaults to $XDG_DATA_HOME/shopsync/logs)
  pub directory: Option<PathBuf>,
}

impl LoggingConfig {
  pub fn directory(&self) -> Result<PathBuf> {
    match &self.directory {
      Some(dir) => Ok(expand_home(dir)),
      None => dirs::data_dir()
        .map(|d| d.join("shopsync").join("logs"))
        .ok_or_else(|| eyre!("Could not determine data directory")),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shopsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shopsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/shopsync/config.yaml\n\
                 See shopsync.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shopsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shopsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    self.base_url()?;
    self.gesture.validate()?;
    for descriptor in &self.invalidation {
      if !descriptor.pattern.starts_with('/') {
        return Err(eyre!(
          "Invalidation pattern must start with '/': {}",
          descriptor.pattern
        ));
      }
    }
    Ok(())
  }

  /// The parsed API base URL; only http and https are accepted.
  pub fn base_url(&self) -> Result<Url> {
    let url = Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid api.base_url {:?}: {}", self.api.base_url, e))?;
    match url.scheme() {
      "http" | "https" => Ok(url),
      other => Err(eyre!("Unsupported api.base_url scheme: {}", other)),
    }
  }

  pub fn token_path(&self) -> Result<PathBuf> {
    match &self.api.token_file {
      Some(p) => Ok(expand_home(p)),
      None => TokenFile::default_path(),
    }
  }

  /// Storefront table followed by the configured descriptors.
  pub fn invalidation_policy(&self) -> InvalidationPolicy {
    InvalidationPolicy::storefront().extend(
      self
        .invalidation
        .iter()
        .map(|d| MutationDescriptor::new(&d.pattern, d.keys.clone())),
    )
  }
}

fn expand_home(path: &Path) -> PathBuf {
  match (path.strip_prefix("~"), dirs::home_dir()) {
    (Ok(rest), Some(home)) => home.join(rest),
    _ => path.to_path_buf(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"
api:
  base_url: https://shop.example.com
  request_timeout_ms: 5000
  token_file: /tmp/shopsync-token
cache:
  stale_after_ms: 120000
  refetch_interval_ms: 30000
gesture:
  threshold: 60
  max_pull: 100
  resistance: 0.4
invalidation:
  - pattern: /api/admin/banners
    keys: [[/api/banners]]
logging:
  directory: /tmp/shopsync-logs
"#;

  #[test]
  fn test_full_config() {
    let config = Config::parse(FULL).unwrap();
    assert_eq!(config.api.request_timeout_ms, 5000);
    assert_eq!(config.token_path().unwrap(), PathBuf::from("/tmp/shopsync-token"));
    assert_eq!(config.gesture.threshold, 60.0);
    assert_eq!(
      config.logging.directory().unwrap(),
      PathBuf::from("/tmp/shopsync-logs")
    );

    let options = config.cache.query_options();
    assert_eq!(options.stale_after, Duration::from_millis(120_000));
    assert_eq!(options.refetch_interval, Some(Duration::from_millis(30_000)));
  }

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: http://localhost:8080\n").unwrap();
    assert_eq!(config.api.request_timeout_ms, 15_000);
    assert_eq!(config.cache.stale_after_ms, 60_000);
    assert_eq!(config.cache.refetch_interval_ms, None);
    assert_eq!(config.gesture, GestureConfig::default());
    assert!(config.invalidation.is_empty());
  }

  #[test]
  fn test_configured_descriptors_extend_storefront_table() {
    let config = Config::parse(FULL).unwrap();
    let policy = config.invalidation_policy();
    let descriptor = policy.lookup("/api/admin/banners").unwrap();
    assert_eq!(descriptor.affected_keys, vec![CacheKey::path("/api/banners")]);
    assert!(policy.covers("/api/topup/generate-qr"));
  }

  #[test]
  fn test_rejects_non_http_base_url() {
    let err = Config::parse("api:\n  base_url: ftp://shop.example.com\n").unwrap_err();
    assert!(err.to_string().contains("scheme"));
    assert!(Config::parse("api:\n  base_url: not a url\n").is_err());
  }

  #[test]
  fn test_rejects_bad_gesture_tuning() {
    let yaml = "api:\n  base_url: https://a.b\ngesture:\n  resistance: 1.5\n";
    assert!(Config::parse(yaml).is_err());

    let yaml = "api:\n  base_url: https://a.b\ngesture:\n  threshold: 200\n  max_pull: 120\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_rejects_relative_pattern() {
    let yaml = "api:\n  base_url: https://a.b\n\
                invalidation:\n  - pattern: api/x\n    keys: [[/api/x]]\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_missing_explicit_path() {
    let err = Config::load(Some(Path::new("/nonexistent/shopsync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_missing_base_url_fails() {
    assert!(Config::parse("cache:\n  stale_after_ms: 10\n").is_err());
  }
}
