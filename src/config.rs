//! Configuration Module
//!
//! Behaviour knobs for the cache, loadable from environment variables.

use std::env;
use std::str::FromStr;

// == Force Policy ==
/// What `force_get` does when a load is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcePolicy {
    /// Await the in-flight load; it already started after the caller's intent.
    #[default]
    Join,
    /// Reset to idle immediately and start a new load. The old load's
    /// result is discarded when it settles.
    Restart,
}

impl FromStr for ForcePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "join" => Ok(ForcePolicy::Join),
            "restart" => Ok(ForcePolicy::Restart),
            other => Err(format!("unknown force policy: {other}")),
        }
    }
}

// == Missing Key Policy ==
/// What `KeyCache::get_map` does with keys the batch loader did not return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingKeyPolicy {
    /// Mark each missing key `Rejected(MissingFromBatch)`.
    #[default]
    Reject,
    /// Fail the whole `get_map` call and reset missing keys to idle so a
    /// later per-key `get` loads them individually.
    FailBatch,
}

impl FromStr for MissingKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(MissingKeyPolicy::Reject),
            "fail" | "fail_batch" => Ok(MissingKeyPolicy::FailBatch),
            other => Err(format!("unknown missing key policy: {other}")),
        }
    }
}

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheConfig {
    /// Behaviour of `force_get` while a load is pending
    pub force_policy: ForcePolicy,
    /// Handling of keys a batch loader left out
    pub missing_key_policy: MissingKeyPolicy,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MEMO_FORCE_POLICY` - `join` or `restart` (default: join)
    /// - `MEMO_MISSING_KEYS` - `reject` or `fail` (default: reject)
    pub fn from_env() -> Self {
        Self {
            force_policy: env::var("MEMO_FORCE_POLICY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
            missing_key_policy: env::var("MEMO_MISSING_KEYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Returns a copy with the given force policy.
    pub fn with_force_policy(mut self, policy: ForcePolicy) -> Self {
        self.force_policy = policy;
        self
    }

    /// Returns a copy with the given missing key policy.
    pub fn with_missing_key_policy(mut self, policy: MissingKeyPolicy) -> Self {
        self.missing_key_policy = policy;
        self
    }
}
