//! Client-side data layer for a storefront and its admin console.
//!
//! Requests go through an [`api::Executor`] that normalizes every response
//! into a payload or an [`ApiError`]. Reads are cached per key in a
//! [`cache::CacheStore`], mutations invalidate the keys an
//! [`invalidation::InvalidationPolicy`] maps them to, and
//! [`gesture::PullToRefresh`] turns a touch drag into a refresh.

pub mod api;
pub mod cache;
pub mod config;
pub mod event;
pub mod gesture;
pub mod invalidation;
pub mod query;

pub use api::{ApiError, DataClient, Payload};
pub use cache::{CacheKey, CacheStore, QueryOptions, QueryStatus};
pub use query::{Query, QueryState};
