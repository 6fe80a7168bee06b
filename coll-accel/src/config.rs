//! Runtime-configurable staging parameters.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `COLL_ACCEL_`) or by constructing a custom `AccelConfig`.

use std::sync::Arc;

use crate::memory::{Budget, HostAllocator, StagingPool, SystemAllocator};

/// How host staging memory is obtained.
#[derive(Debug, Clone)]
pub struct AccelConfig {
    /// Reuse staging buffers through a [`StagingPool`] instead of
    /// allocating fresh memory for every call.
    pub pool_staging: bool,

    /// Cap on host staging bytes outstanding at once. Calls that would
    /// exceed it fail with `OutOfResource`.
    pub max_staging_bytes: Option<usize>,

    /// Buffers pre-allocated in the pool's small tier.
    pub small_pool_size: usize,

    /// Buffers pre-allocated in the pool's large tier.
    pub large_pool_size: usize,
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            pool_staging: true,
            max_staging_bytes: None,
            small_pool_size: 64,
            large_pool_size: 8,
        }
    }
}

impl AccelConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `COLL_ACCEL_POOL_STAGING`
    /// - `COLL_ACCEL_MAX_STAGING_BYTES`
    /// - `COLL_ACCEL_SMALL_POOL_SIZE`
    /// - `COLL_ACCEL_LARGE_POOL_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("COLL_ACCEL_POOL_STAGING")
            && let Some(b) = parse_bool(&v)
        {
            cfg.pool_staging = b;
        }
        if let Some(v) = lookup("COLL_ACCEL_MAX_STAGING_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.max_staging_bytes = Some(n);
        }
        if let Some(v) = lookup("COLL_ACCEL_SMALL_POOL_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.small_pool_size = n;
        }
        if let Some(v) = lookup("COLL_ACCEL_LARGE_POOL_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.large_pool_size = n;
        }

        cfg
    }

    /// Build the staging allocator this config describes.
    pub fn allocator(&self) -> Arc<dyn HostAllocator> {
        let budget = match self.max_staging_bytes {
            Some(limit) => Budget::with_limit(limit),
            None => Budget::unlimited(),
        };
        if self.pool_staging {
            Arc::new(StagingPool::with_budget(
                self.small_pool_size,
                self.large_pool_size,
                budget,
            ))
        } else {
            match self.max_staging_bytes {
                Some(limit) => Arc::new(SystemAllocator::with_limit(limit)),
                None => Arc::new(SystemAllocator::new()),
            }
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
