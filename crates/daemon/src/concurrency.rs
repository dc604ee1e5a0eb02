//! Concurrency planning for transcodes
//!
//! Derives how many transcodes may run at once from the CPU core count and configuration.

use crate::config::TranscodeConfig;

/// Upper bound for auto-derived transcode slots
const MAX_DERIVED_SLOTS: u32 = 4;

/// Cores assumed per software encode when deriving slots
const CORES_PER_ENCODE: u32 = 4;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of concurrent transcodes
    pub max_concurrent_transcodes: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan for the detected core count
    pub fn derive(cfg: &TranscodeConfig) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    /// Derive a concurrency plan for a known core count
    ///
    /// An explicit non-zero `max_concurrent` wins; otherwise one slot per
    /// four cores, between 1 and 4.
    pub fn derive_with_cores(cfg: &TranscodeConfig, total_cores: u32) -> Self {
        let max_concurrent_transcodes = if cfg.max_concurrent > 0 {
            cfg.max_concurrent
        } else {
            derive_slots(total_cores)
        };

        Self {
            total_cores,
            max_concurrent_transcodes,
        }
    }
}

fn derive_slots(cores: u32) -> u32 {
    (cores / CORES_PER_ENCODE).clamp(1, MAX_DERIVED_SLOTS)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &TranscodeConfig) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}
