//! In-memory query cache with stale-while-revalidate semantics.
//!
//! This module provides a keyed cache that:
//! - Serves fresh entries without touching the network
//! - De-duplicates concurrent fetches for the same key
//! - Keeps the last good value visible across refetches and failures
//! - Notifies subscribers of every state change, in order
//! - Optionally polls observed entries in the background

mod entry;
mod key;
mod store;

pub use entry::{CacheEntry, CacheResult, CacheSource, QueryOptions, QueryStatus};
pub use key::{CacheKey, KeyPart};
pub use store::{loader, CacheStore, CallbackSubscription, Loader, Subscription};
