//! Credential sources for the `Authorization` header.
//!
//! Tokens are read on every request and never held by the executor.

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use tracing::warn;

/// Environment variable that overrides the stored token.
pub const TOKEN_ENV_VAR: &str = "SHOPSYNC_TOKEN";

/// Something that can hand out the current auth token, if any.
pub trait CredentialSource: Send + Sync {
  fn token(&self) -> Option<String>;
}

/// Token kept in a file in durable client storage.
#[derive(Debug, Clone)]
pub struct TokenFile {
  path: PathBuf,
}

impl TokenFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// `$XDG_DATA_HOME/shopsync/token`, falling back to `~/.local/share`.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shopsync").join("token"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl CredentialSource for TokenFile {
  fn token(&self) -> Option<String> {
    match std::fs::read_to_string(&self.path) {
      Ok(contents) => non_empty(contents),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
      Err(e) => {
        warn!(path = %self.path.display(), error = %e, "failed to read token file");
        None
      }
    }
  }
}

/// Token taken from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvToken {
  var: String,
}

impl EnvToken {
  pub fn new(var: impl Into<String>) -> Self {
    Self { var: var.into() }
  }
}

impl Default for EnvToken {
  fn default() -> Self {
    Self::new(TOKEN_ENV_VAR)
  }
}

impl CredentialSource for EnvToken {
  fn token(&self) -> Option<String> {
    std::env::var(&self.var).ok().and_then(non_empty)
  }
}

/// Fixed token, mostly for tests and one-off tools.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(pub Option<String>);

impl CredentialSource for StaticToken {
  fn token(&self) -> Option<String> {
    self.0.clone()
  }
}

/// Tries each source in order and returns the first token found.
pub struct FirstOf(pub Vec<Box<dyn CredentialSource>>);

impl CredentialSource for FirstOf {
  fn token(&self) -> Option<String> {
    self.0.iter().find_map(|source| source.token())
  }
}

fn non_empty(raw: String) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    None
  } else {
    Some(trimmed.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn scratch_file(name: &str, contents: Option<&str>) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("shopsync-cred-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    match contents {
      Some(c) => std::fs::write(&path, c).unwrap(),
      None => {
        let _ = std::fs::remove_file(&path);
      }
    }
    path
  }

  #[test]
  fn test_token_file_trims_contents() {
    let path = scratch_file("trimmed", Some("  abc123\n"));
    assert_eq!(TokenFile::new(&path).token().as_deref(), Some("abc123"));
  }

  #[test]
  fn test_token_file_is_read_on_every_call() {
    let path = scratch_file("rotating", Some("first"));
    let source = TokenFile::new(&path);
    assert_eq!(source.token().as_deref(), Some("first"));

    std::fs::write(&path, "second").unwrap();
    assert_eq!(source.token().as_deref(), Some("second"));
  }

  #[test]
  fn test_missing_or_blank_token_file_is_absent() {
    let missing = scratch_file("missing", None);
    assert_eq!(TokenFile::new(&missing).token(), None);

    let blank = scratch_file("blank", Some("   \n"));
    assert_eq!(TokenFile::new(&blank).token(), None);
  }

  #[test]
  fn test_first_of_prefers_earlier_sources() {
    let chain = FirstOf(vec![
      Box::new(StaticToken(None)),
      Box::new(StaticToken(Some("second".into()))),
      Box::new(StaticToken(Some("third".into()))),
    ]);
    assert_eq!(chain.token().as_deref(), Some("second"));
  }
}
