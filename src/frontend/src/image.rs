//! Image configuration assembly.
//!
//! Tracks the evolving image configuration for the stage being dispatched
//! and serializes it in the Docker image-config JSON shape (the OCI config
//! plus the Docker extensions: healthcheck, shell, onbuild).

use std::collections::BTreeMap;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use basalt_core::error::Result;
use basalt_core::platform::Platform;

use crate::instruction::HealthConfig;

/// Default search path used when an exec environment carries no PATH.
pub const DEFAULT_PATH_ENV: &str =
    "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Serializes as `{}`; the value type of port and volume sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// The `config` section of an image configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, EmptyObject>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckSpec>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, EmptyObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub on_build: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<Vec<String>>,
}

/// Healthcheck in the Docker wire shape (durations in nanoseconds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HealthcheckSpec {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub test: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub interval: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub timeout: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub start_period: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub start_interval: i64,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub retries: u32,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

impl From<&HealthConfig> for HealthcheckSpec {
    fn from(health: &HealthConfig) -> Self {
        let nanos = |d: Option<std::time::Duration>| d.map(|d| d.as_nanos() as i64).unwrap_or(0);
        HealthcheckSpec {
            test: health.test.clone(),
            interval: nanos(health.interval),
            timeout: nanos(health.timeout),
            start_period: nanos(health.start_period),
            start_interval: nanos(health.start_interval),
            retries: health.retries.unwrap_or(0),
        }
    }
}

/// One history entry per dispatched instruction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub created_by: String,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub empty_layer: bool,
}

/// The image configuration a stage accumulates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub config: RuntimeConfig,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub history: Vec<HistoryEntry>,
}

impl ImageConfig {
    /// Fresh configuration stamped with the effective platform.
    pub fn for_platform(platform: &Platform) -> Self {
        ImageConfig {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            variant: platform.variant.clone(),
            ..ImageConfig::default()
        }
    }

    /// Look up an environment variable by key.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.config.env.iter().find_map(|e| {
            let (k, v) = e.split_once('=')?;
            (k == key).then_some(v)
        })
    }

    /// Set an environment variable, replacing any existing binding.
    pub fn set_env(&mut self, key: &str, value: &str) {
        let entry = format!("{}={}", key, value);
        match self
            .config
            .env
            .iter_mut()
            .find(|e| e.split_once('=').map(|(k, _)| k) == Some(key))
        {
            Some(existing) => *existing = entry,
            None => self.config.env.push(entry),
        }
    }

    /// The exec environment: configured env plus a default PATH when none
    /// has been set.
    pub fn env_with_defaults(&self) -> Vec<String> {
        let mut env = self.config.env.clone();
        if self.get_env("PATH").is_none() {
            env.insert(0, format!("PATH={}", DEFAULT_PATH_ENV));
        }
        env
    }

    /// Append a history entry. With an epoch the timestamp is stable; with
    /// none it is omitted so output stays deterministic.
    pub fn commit_history(&mut self, created_by: &str, empty_layer: bool, epoch: Option<i64>) {
        self.history.push(HistoryEntry {
            created: epoch.and_then(format_epoch),
            created_by: created_by.to_string(),
            empty_layer,
        });
    }

    /// Serialized configuration, byte-stable for identical inputs.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn format_epoch(epoch: i64) -> Option<String> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_for_platform() {
        let config = ImageConfig::for_platform(&Platform::parse("linux/arm/v7").unwrap());
        assert_eq!(config.architecture, "arm");
        assert_eq!(config.os, "linux");
        assert_eq!(config.variant, Some("v7".to_string()));
    }

    #[test]
    fn test_set_env_replaces() {
        let mut config = ImageConfig::default();
        config.set_env("A", "1");
        config.set_env("B", "2");
        config.set_env("A", "3");
        assert_eq!(config.config.env, vec!["A=3", "B=2"]);
        assert_eq!(config.get_env("A"), Some("3"));
        assert_eq!(config.get_env("C"), None);
    }

    #[test]
    fn test_env_with_defaults_injects_path() {
        let mut config = ImageConfig::default();
        config.set_env("FOO", "bar");
        let env = config.env_with_defaults();
        assert!(env[0].starts_with("PATH="));

        config.set_env("PATH", "/custom");
        let env = config.env_with_defaults();
        assert_eq!(env.iter().filter(|e| e.starts_with("PATH=")).count(), 1);
    }

    #[test]
    fn test_history_without_epoch_has_no_timestamp() {
        let mut config = ImageConfig::default();
        config.commit_history("RUN true", false, None);
        assert_eq!(config.history[0].created, None);
        assert_eq!(config.history[0].created_by, "RUN true");
    }

    #[test]
    fn test_history_with_epoch() {
        let mut config = ImageConfig::default();
        config.commit_history("FROM alpine", true, Some(0));
        assert_eq!(
            config.history[0].created.as_deref(),
            Some("1970-01-01T00:00:00Z")
        );
        assert!(config.history[0].empty_layer);
    }

    #[test]
    fn test_serialized_shape() {
        let mut config = ImageConfig::for_platform(&Platform::parse("linux/amd64").unwrap());
        config.set_env("A", "1");
        config.config.exposed_ports.insert("80/tcp".to_string(), EmptyObject {});
        config.config.healthcheck = Some(HealthcheckSpec::from(&HealthConfig {
            test: vec!["CMD-SHELL".to_string(), "true".to_string()],
            interval: Some(Duration::from_secs(30)),
            ..HealthConfig::default()
        }));
        let json = String::from_utf8(config.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"Env\":[\"A=1\"]"));
        assert!(json.contains("\"ExposedPorts\":{\"80/tcp\":{}}"));
        assert!(json.contains("\"Interval\":30000000000"));
        assert!(!json.contains("\"Cmd\""));
    }

    #[test]
    fn test_serialization_is_stable() {
        let build = || {
            let mut config = ImageConfig::for_platform(&Platform::parse("linux/amd64").unwrap());
            config.config.labels.insert("b".to_string(), "2".to_string());
            config.config.labels.insert("a".to_string(), "1".to_string());
            config.commit_history("LABEL a=1 b=2", true, None);
            config.to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }
}
