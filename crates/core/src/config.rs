//! Manager configuration: chain id, send-tick period, gas price bounds,
//! and knobs that used to be hard-coded constants (`Confirmation`,
//! `ConfirmationDelay`, `MaxNumKnownTx`, send throttle) — here they are
//! `serde`-backed fields with defaults, loadable from TOML: a plain
//! data struct with `#[serde(default = ...)]` on every field and a
//! handful of named profiles instead of one hard-coded shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ManagerError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Signing chain id.
    pub chain_id: u64,

    /// Send-tick period, in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Initial process-wide gas price, in wei.
    #[serde(default = "default_gas_price")]
    pub gas_price: u128,

    /// Lower clamp for the gas price controller.
    #[serde(default = "default_min_gas_price")]
    pub min_gas_price: u128,

    /// Upper clamp for the gas price controller.
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price: u128,

    /// Blocks of depth past mining before a raw is moved to `confirmed`.
    #[serde(default = "default_confirmation")]
    pub confirmation: u64,

    /// Debounce, in blocks, between head-triggered confirmation passes.
    #[serde(default = "default_confirmation_delay")]
    pub confirmation_delay: u64,

    /// Consecutive "known transaction" responses tolerated before the
    /// send loop gives up and defers to the next tick.
    #[serde(default = "default_max_num_known_tx")]
    pub max_num_known_tx: u32,

    /// Minimum blocks between resubmissions of the same raw.
    #[serde(default = "default_send_delay_blocks")]
    pub send_delay_blocks: u64,
}

fn default_interval_ms() -> u64 {
    15_000
}
fn default_gas_price() -> u128 {
    10_000_000_000
}
fn default_min_gas_price() -> u128 {
    1_000_000_000
}
fn default_max_gas_price() -> u128 {
    500_000_000_000
}
fn default_confirmation() -> u64 {
    32
}
fn default_confirmation_delay() -> u64 {
    4
}
fn default_max_num_known_tx() -> u32 {
    5
}
fn default_send_delay_blocks() -> u64 {
    2
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            interval_ms: default_interval_ms(),
            gas_price: default_gas_price(),
            min_gas_price: default_min_gas_price(),
            max_gas_price: default_max_gas_price(),
            confirmation: default_confirmation(),
            confirmation_delay: default_confirmation_delay(),
            max_num_known_tx: default_max_num_known_tx(),
            send_delay_blocks: default_send_delay_blocks(),
        }
    }
}

impl ManagerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// A profile tuned for fast local testnets: short tick, shallow
    /// confirmation depth, no throttling.
    pub fn testing(chain_id: u64) -> Self {
        Self {
            chain_id,
            interval_ms: 200,
            confirmation: 2,
            confirmation_delay: 1,
            send_delay_blocks: 0,
            ..Self::default()
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ManagerError> {
        if self.min_gas_price > self.max_gas_price {
            return Err(ManagerError::InvalidConfig(format!(
                "min_gas_price ({}) must be <= max_gas_price ({})",
                self.min_gas_price, self.max_gas_price
            )));
        }
        if self.gas_price < self.min_gas_price || self.gas_price > self.max_gas_price {
            return Err(ManagerError::InvalidConfig(format!(
                "initial gas_price ({}) must lie within [{}, {}]",
                self.gas_price, self.min_gas_price, self.max_gas_price
            )));
        }
        Ok(())
    }

    pub fn log_config(&self) {
        tracing::info!(
            chain_id = self.chain_id,
            interval_ms = self.interval_ms,
            gas_price = %self.gas_price,
            min_gas_price = %self.min_gas_price,
            max_gas_price = %self.max_gas_price,
            confirmation = self.confirmation,
            confirmation_delay = self.confirmation_delay,
            max_num_known_tx = self.max_num_known_tx,
            send_delay_blocks = self.send_delay_blocks,
            "transaction manager configuration loaded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_min_above_max() {
        let mut cfg = ManagerConfig::default();
        cfg.min_gas_price = cfg.max_gas_price + 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn testing_profile_has_short_interval() {
        let cfg = ManagerConfig::testing(1337);
        assert_eq!(cfg.interval_ms, 200);
        assert_eq!(cfg.confirmation, 2);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = ManagerConfig::testing(7);
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: ManagerConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.chain_id, 7);
        assert_eq!(parsed.confirmation, cfg.confirmation);
    }
}
