// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::str::FromStr;

use infra::infra::InfraConfig;
use serde::Deserialize;

/// Scheduler tuning, exposed so a deployment can widen the lease past the slowest handler's
/// expected wall-time (§4.4 Model) without a rebuild.
#[derive(Clone, Deserialize, Debug)]
pub struct SchedulerSettings {
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: i64,
    #[serde(default = "default_max_concurrent_copy_items")]
    pub max_concurrent_copy_items: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            tick_interval_seconds: default_tick_interval_seconds(),
            lease_seconds: default_lease_seconds(),
            max_concurrent_copy_items: default_max_concurrent_copy_items(),
        }
    }
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_lease_seconds() -> i64 {
    300
}

fn default_max_concurrent_copy_items() -> usize {
    4
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    /// IP address on which to listen for connections.
    pub listen_address: String,

    /// Path to the sqlite database file.
    pub database_url: String,

    /// Base64-encoded 64-byte master key used to seal secret fields of `config_json` at rest
    /// (`infra::crypto::SecretBox`). Absent only in test/demo deployments that never persist a
    /// secret-bearing storage type.
    pub secret_key_base64: Option<String>,

    /// Admin endpoints configuration.
    pub infra: Option<InfraConfig>,

    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

impl FromStr for Config {
    type Err = String;

    fn from_str(raw_config: &str) -> Result<Self, Self::Err> {
        serde_yaml::from_str(raw_config).map_err(|e| format!("config parse error: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
listen_address: "0.0.0.0:8080"
database_url: "storagehub.db"
"#;
        let config = Config::from_str(raw).unwrap();
        assert_eq!(config.listen_address, "0.0.0.0:8080");
        assert_eq!(config.scheduler.tick_interval_seconds, 30);
    }

    #[test]
    fn rejects_malformed_yaml() {
        assert!(Config::from_str("not: [valid").is_err());
    }
}
