//! Structural cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One primitive component of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
  Bool(bool),
  Int(i64),
  Str(String),
}

impl fmt::Display for KeyPart {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      KeyPart::Bool(b) => write!(f, "{}", b),
      KeyPart::Int(i) => write!(f, "{}", i),
      KeyPart::Str(s) => write!(f, "{}", s),
    }
  }
}

impl From<&str> for KeyPart {
  fn from(value: &str) -> Self {
    KeyPart::Str(value.to_string())
  }
}

impl From<String> for KeyPart {
  fn from(value: String) -> Self {
    KeyPart::Str(value)
  }
}

impl From<i64> for KeyPart {
  fn from(value: i64) -> Self {
    KeyPart::Int(value)
  }
}

impl From<i32> for KeyPart {
  fn from(value: i32) -> Self {
    KeyPart::Int(i64::from(value))
  }
}

impl From<bool> for KeyPart {
  fn from(value: bool) -> Self {
    KeyPart::Bool(value)
  }
}

/// Identifies a cached query: usually a resource path followed by parameters.
///
/// Equality is structural. A key is also usable as a prefix that matches
/// every key beginning with the same parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<KeyPart>);

impl CacheKey {
  pub fn new(parts: Vec<KeyPart>) -> Self {
    Self(parts)
  }

  /// Key for a plain resource path, e.g. `/api/user/balance`.
  pub fn path(path: impl Into<String>) -> Self {
    Self(vec![KeyPart::Str(path.into())])
  }

  /// Append a parameter.
  pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
    self.0.push(part.into());
    self
  }

  pub fn parts(&self) -> &[KeyPart] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// The leading path component, when the key starts with one.
  pub fn resource_path(&self) -> Option<&str> {
    match self.0.first() {
      Some(KeyPart::Str(s)) => Some(s),
      _ => None,
    }
  }

  /// True when `prefix`'s parts equal the first parts of this key.
  /// Every key starts with itself and with the empty key.
  ///
  /// A prefix made of a single path also covers the paths below it, so
  /// `[/api/user]` matches `[/api/user/balance]` and
  /// `[/api/products?page=2]`-style keys match `[/api/products]`.
  pub fn starts_with(&self, prefix: &CacheKey) -> bool {
    match (prefix.0.as_slice(), self.0.first()) {
      ([KeyPart::Str(base)], Some(KeyPart::Str(path))) => path_covers(base, path),
      _ => self.0.starts_with(&prefix.0),
    }
  }
}

/// Segment-aligned path prefix: `/api/orders` covers `/api/orders`,
/// `/api/orders/77` and `/api/orders?page=2`, but not `/api/orders-archive`.
fn path_covers(base: &str, path: &str) -> bool {
  let base = base.trim_end_matches('/');
  match path.strip_prefix(base) {
    Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
    None => false,
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[")?;
    for (i, part) in self.0.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}", part)?;
    }
    write!(f, "]")
  }
}

impl From<&str> for CacheKey {
  fn from(path: &str) -> Self {
    CacheKey::path(path)
  }
}
