//! Balancer configuration: an in-process [`LoadBalancerConfig`] plus a `serde`-deserializable
//! on-disk form that validates before it is allowed to become one.

use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Default period between directory refreshes.
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(30);
/// Default seconds-per-unit-task-size estimate used before a peer has any measured throughput.
pub const DEFAULT_INITIAL_THROUGHPUT: f64 = 1.0;
/// Default EMA smoothing factor.
pub const DEFAULT_EMA_ALPHA: f64 = 0.1;
/// Default blacklist TTL knob (see `SPEC_FULL.md` §9 on why `ban()` does not use this directly).
pub const DEFAULT_BLACKLIST_TTL: Duration = Duration::from_secs(30);
/// Default number of refresh cycles `lease` will wait through before raising `NoPeers`.
pub const DEFAULT_MAX_RETRIES: usize = 3;
/// Preserved for callers accounting for a second (backward) RPC phase at a larger task size; the
/// core itself never applies this multiplier.
pub const DEFAULT_BACKWARD_TASK_SIZE_MULTIPLIER: f64 = 2.5;

/// Runtime configuration for a [`crate::balancer::LoadBalancer`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerConfig {
    pub update_period: Duration,
    pub initial_throughput: f64,
    pub ema_alpha: f64,
    pub blacklist_ttl: Duration,
    pub max_retries: usize,
    pub backward_task_size_multiplier: f64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            update_period: DEFAULT_UPDATE_PERIOD,
            initial_throughput: DEFAULT_INITIAL_THROUGHPUT,
            ema_alpha: DEFAULT_EMA_ALPHA,
            blacklist_ttl: DEFAULT_BLACKLIST_TTL,
            max_retries: DEFAULT_MAX_RETRIES,
            backward_task_size_multiplier: DEFAULT_BACKWARD_TASK_SIZE_MULTIPLIER,
        }
    }
}

impl LoadBalancerConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.update_period.is_zero() {
            bail!("update_period must be positive");
        }
        if !(self.initial_throughput.is_finite() && self.initial_throughput > 0.0) {
            bail!("initial_throughput must be a positive, finite number of seconds per unit task_size");
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            bail!("ema_alpha must be in (0, 1]");
        }
        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if !(self.backward_task_size_multiplier.is_finite() && self.backward_task_size_multiplier > 0.0)
        {
            bail!("backward_task_size_multiplier must be a positive, finite number");
        }
        Ok(())
    }
}

/// On-disk representation of [`LoadBalancerConfig`]. Durations are seconds to keep the file
/// format simple; missing fields fall back to the same defaults as [`LoadBalancerConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawLoadBalancerConfig {
    pub update_period_secs: f64,
    pub initial_throughput: f64,
    pub ema_alpha: f64,
    pub blacklist_ttl_secs: f64,
    pub max_retries: usize,
    pub backward_task_size_multiplier: f64,
}

impl Default for RawLoadBalancerConfig {
    fn default() -> Self {
        let defaults = LoadBalancerConfig::default();
        Self {
            update_period_secs: defaults.update_period.as_secs_f64(),
            initial_throughput: defaults.initial_throughput,
            ema_alpha: defaults.ema_alpha,
            blacklist_ttl_secs: defaults.blacklist_ttl.as_secs_f64(),
            max_retries: defaults.max_retries,
            backward_task_size_multiplier: defaults.backward_task_size_multiplier,
        }
    }
}

impl TryFrom<RawLoadBalancerConfig> for LoadBalancerConfig {
    type Error = anyhow::Error;

    fn try_from(raw: RawLoadBalancerConfig) -> Result<Self, Self::Error> {
        if !raw.update_period_secs.is_finite() || raw.update_period_secs <= 0.0 {
            bail!("update_period_secs must be a positive, finite number of seconds");
        }
        if !raw.blacklist_ttl_secs.is_finite() || raw.blacklist_ttl_secs < 0.0 {
            bail!("blacklist_ttl_secs must be a non-negative, finite number of seconds");
        }
        let config = LoadBalancerConfig {
            update_period: Duration::from_secs_f64(raw.update_period_secs),
            initial_throughput: raw.initial_throughput,
            ema_alpha: raw.ema_alpha,
            blacklist_ttl: Duration::from_secs_f64(raw.blacklist_ttl_secs),
            max_retries: raw.max_retries,
            backward_task_size_multiplier: raw.backward_task_size_multiplier,
        };
        config.validate()?;
        Ok(config)
    }
}

impl RawLoadBalancerConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<LoadBalancerConfig> {
        let raw: RawLoadBalancerConfig =
            serde_json::from_str(json).context("parsing load balancer config JSON")?;
        raw.try_into()
    }
}
