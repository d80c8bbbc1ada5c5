//! Which cached queries a successful mutation makes stale.
//!
//! The table is explicit: nothing is inferred from endpoint names. A new
//! state-changing endpoint that affects cached data needs a descriptor here
//! (or in the config file), and must be added to [`UI_MUTATIONS`].

use std::fmt;

use tracing::debug;

use crate::cache::{CacheKey, CacheStore};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
  Literal(String),
  /// `*`: exactly one segment
  Any,
}

/// Endpoint pattern: `/`-separated segments, `*` matching one segment.
/// A pattern matches every endpoint whose leading segments it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPattern {
  raw: String,
  segments: Vec<Segment>,
}

impl EndpointPattern {
  pub fn parse(raw: &str) -> Self {
    let segments = split_path(raw)
      .into_iter()
      .map(|s| {
        if s == "*" {
          Segment::Any
        } else {
          Segment::Literal(s.to_string())
        }
      })
      .collect();

    Self {
      raw: raw.to_string(),
      segments,
    }
  }

  pub fn as_str(&self) -> &str {
    &self.raw
  }

  pub fn matches(&self, endpoint: &str) -> bool {
    let parts = split_path(endpoint);
    parts.len() >= self.segments.len()
      && self
        .segments
        .iter()
        .zip(parts.iter())
        .all(|(segment, part)| match segment {
          Segment::Any => true,
          Segment::Literal(lit) => lit == part,
        })
  }

  /// Precedence among matching patterns: more segments, then more literals.
  fn specificity(&self) -> (usize, usize) {
    let literals = self
      .segments
      .iter()
      .filter(|s| matches!(s, Segment::Literal(_)))
      .count();
    (self.segments.len(), literals)
  }
}

impl fmt::Display for EndpointPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.raw)
  }
}

/// Path segments, ignoring the query string and empty segments.
fn split_path(path: &str) -> Vec<&str> {
  let path = path.split(['?', '#']).next().unwrap_or_default();
  path.split('/').filter(|s| !s.is_empty()).collect()
}

/// One row of the invalidation table.
#[derive(Debug, Clone)]
pub struct MutationDescriptor {
  pub pattern: EndpointPattern,
  /// Keys (or key prefixes) to invalidate
  pub affected_keys: Vec<CacheKey>,
}

impl MutationDescriptor {
  pub fn new(pattern: &str, affected_keys: Vec<CacheKey>) -> Self {
    Self {
      pattern: EndpointPattern::parse(pattern),
      affected_keys,
    }
  }
}

/// Built-in storefront table: endpoint pattern and the resource paths it invalidates.
const STOREFRONT_TABLE: &[(&str, &[&str])] = &[
  // Wallet top-ups
  ("/api/topup/generate-qr", &["/api/user/balance", "/api/topup/history"]),
  ("/api/topup/*/confirm", &["/api/user/balance", "/api/topup/history"]),
  ("/api/topup/*/cancel", &["/api/topup/history"]),
  // Shopper
  ("/api/cart", &["/api/cart"]),
  ("/api/orders", &["/api/orders", "/api/cart", "/api/user/balance", "/api/products"]),
  ("/api/orders/*/cancel", &["/api/orders", "/api/user/balance", "/api/products"]),
  ("/api/user/profile", &["/api/user/profile"]),
  ("/api/auth/login", &["/api/user", "/api/cart", "/api/orders"]),
  // Admin console
  ("/api/admin/products", &["/api/admin/products", "/api/products"]),
  ("/api/admin/categories", &["/api/categories", "/api/products"]),
  ("/api/admin/orders/*/status", &["/api/admin/orders", "/api/orders", "/api/admin/stats"]),
  ("/api/admin/users", &["/api/admin/users"]),
  ("/api/admin/users/*/balance", &["/api/admin/users", "/api/user/balance", "/api/admin/stats"]),
];

/// State-changing endpoints that deliberately invalidate nothing.
pub const CACHE_IRRELEVANT: &[&str] = &[
  "/api/analytics/events",
  "/api/auth/password-reset",
  "/api/support/tickets",
];

/// Every mutating call the console makes. Each one must be covered by a
/// descriptor or listed in [`CACHE_IRRELEVANT`].
pub const UI_MUTATIONS: &[(&str, &str)] = &[
  ("POST", "/api/topup/generate-qr"),
  ("POST", "/api/topup/381/confirm"),
  ("POST", "/api/topup/381/cancel"),
  ("POST", "/api/cart/items"),
  ("DELETE", "/api/cart/items/12"),
  ("PATCH", "/api/cart/items/12"),
  ("POST", "/api/orders"),
  ("POST", "/api/orders/77/cancel"),
  ("PUT", "/api/user/profile"),
  ("POST", "/api/auth/login"),
  ("POST", "/api/auth/password-reset"),
  ("POST", "/api/analytics/events"),
  ("POST", "/api/support/tickets"),
  ("POST", "/api/admin/products"),
  ("PUT", "/api/admin/products/5"),
  ("DELETE", "/api/admin/products/5"),
  ("POST", "/api/admin/categories"),
  ("PUT", "/api/admin/orders/77/status"),
  ("POST", "/api/admin/users"),
  ("PATCH", "/api/admin/users/9"),
  ("POST", "/api/admin/users/9/balance"),
];

/// Maps mutation endpoints to the cache keys they invalidate.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPolicy {
  descriptors: Vec<MutationDescriptor>,
}

impl InvalidationPolicy {
  pub fn new(descriptors: Vec<MutationDescriptor>) -> Self {
    Self { descriptors }
  }

  /// The built-in storefront/admin table.
  pub fn storefront() -> Self {
    let descriptors = STOREFRONT_TABLE
      .iter()
      .map(|(pattern, keys)| {
        MutationDescriptor::new(pattern, keys.iter().map(|k| CacheKey::path(*k)).collect())
      })
      .collect();
    Self { descriptors }
  }

  /// Append descriptors. Earlier rows win ties, so built-ins keep precedence
  /// over equally specific additions.
  pub fn extend(mut self, extra: impl IntoIterator<Item = MutationDescriptor>) -> Self {
    self.descriptors.extend(extra);
    self
  }

  pub fn descriptors(&self) -> &[MutationDescriptor] {
    &self.descriptors
  }

  /// The most specific descriptor matching `endpoint`, if any.
  pub fn lookup(&self, endpoint: &str) -> Option<&MutationDescriptor> {
    let mut best: Option<&MutationDescriptor> = None;
    for descriptor in self.descriptors.iter().filter(|d| d.pattern.matches(endpoint)) {
      match best {
        Some(current) if descriptor.pattern.specificity() <= current.pattern.specificity() => {}
        _ => best = Some(descriptor),
      }
    }
    best
  }

  /// Invalidate everything the matching descriptor names.
  /// No match is not an error; returns the keys invalidated.
  pub fn on_mutation_success(&self, endpoint: &str, store: &CacheStore) -> Vec<CacheKey> {
    let Some(descriptor) = self.lookup(endpoint) else {
      debug!(endpoint, "mutation has no invalidation descriptor");
      return Vec::new();
    };

    for key in &descriptor.affected_keys {
      store.invalidate(key);
    }
    debug!(
      endpoint,
      pattern = %descriptor.pattern,
      keys = descriptor.affected_keys.len(),
      "applied invalidation"
    );
    descriptor.affected_keys.clone()
  }

  /// Whether `endpoint` is covered by a descriptor or documented as irrelevant.
  pub fn covers(&self, endpoint: &str) -> bool {
    self.lookup(endpoint).is_some()
      || CACHE_IRRELEVANT
        .iter()
        .any(|p| EndpointPattern::parse(p).matches(endpoint))
  }
}
