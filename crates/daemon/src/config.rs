// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration, read from a TOML document at startup.
//!
//! Anything wrong here is fatal: a scheduler with a bad priority-class table
//! or an unbindable listener must not come up half-working.

use fm_jobdb::PriorityClasses;
use fm_scheduler::CycleConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Executor API listener, e.g. "0.0.0.0:50051".
    #[serde(default = "defaults::listen_addr")]
    pub listen_addr: String,

    #[serde(default = "defaults::cycle_period_ms")]
    pub cycle_period_ms: u64,

    /// Run the heavy scheduling pass every Nth cycle.
    #[serde(default = "defaults::schedule_every")]
    pub schedule_every: u32,

    #[serde(default = "defaults::executor_timeout_ms")]
    pub executor_timeout_ms: u64,

    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Node label that uniquely identifies a node; lease-return
    /// anti-affinities key on it.
    #[serde(default = "defaults::node_id_label")]
    pub node_id_label: String,

    #[serde(default = "defaults::max_contexts_per_executor")]
    pub max_contexts_per_executor: usize,

    #[serde(default = "defaults::event_partitions")]
    pub event_partitions: u32,

    #[serde(default = "defaults::partition_marker_period_ms")]
    pub partition_marker_period_ms: u64,

    #[serde(default)]
    pub leader: LeaderConfig,

    /// Required: a scheduler without priority classes cannot build jobs.
    pub priority_classes: PriorityClasses,

    #[serde(default = "defaults::log_filter")]
    pub log_filter: String,

    /// When set, logs also roll daily into this directory.
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum LeaderConfig {
    #[default]
    Standalone,
    ClusterCoordinated {
        /// Identity under which the lease is held; defaults to the hostname.
        holder: Option<String>,
        #[serde(default = "defaults::lease_refresh_ms")]
        lease_refresh_ms: u64,
    },
}

mod defaults {
    pub fn listen_addr() -> String {
        "127.0.0.1:50051".to_string()
    }
    pub fn cycle_period_ms() -> u64 {
        1_000
    }
    pub fn schedule_every() -> u32 {
        10
    }
    pub fn executor_timeout_ms() -> u64 {
        60_000
    }
    pub fn max_attempts() -> u32 {
        5
    }
    pub fn node_id_label() -> String {
        "foreman.io/node-id".to_string()
    }
    pub fn max_contexts_per_executor() -> usize {
        50
    }
    pub fn event_partitions() -> u32 {
        1
    }
    pub fn partition_marker_period_ms() -> u64 {
        10_000
    }
    pub fn lease_refresh_ms() -> u64 {
        5_000
    }
    pub fn log_filter() -> String {
        "info".to_string()
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.priority_classes.is_empty() {
            return Err(ConfigError::Invalid("priority_classes must not be empty".to_string()));
        }
        if self.cycle_period_ms == 0 {
            return Err(ConfigError::Invalid("cycle_period_ms must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be positive".to_string()));
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bad listen_addr: {:?}", self.listen_addr)))
    }

    pub fn cycle_config(&self) -> CycleConfig {
        CycleConfig {
            cycle_period: Duration::from_millis(self.cycle_period_ms),
            schedule_every: self.schedule_every,
            executor_timeout: Duration::from_millis(self.executor_timeout_ms),
            max_attempts: self.max_attempts,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
