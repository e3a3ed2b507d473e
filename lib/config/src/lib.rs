//! Ambient configuration for the controller, loaded once from the
//! process environment the same way the teacher loads `CoreConfig`:
//! `envy::from_env()` over a typed struct, with an optional `.env` file
//! read first via `dotenvy`.

use std::sync::OnceLock;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  Standard,
  Json,
  None,
}

impl Default for StdioLogMode {
  fn default() -> Self {
    StdioLogMode::Standard
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
  #[serde(default)]
  pub stdio: StdioLogMode,
  #[serde(default)]
  pub pretty: bool,
  #[serde(default)]
  pub location: bool,
  #[serde(default = "default_true")]
  pub ansi: bool,
  #[serde(default)]
  pub otlp_endpoint: String,
  #[serde(default = "default_service_name")]
  pub opentelemetry_service_name: String,
  #[serde(default = "default_scope_name")]
  pub opentelemetry_scope_name: String,
}

fn default_log_level() -> String {
  "info".to_string()
}
fn default_true() -> bool {
  true
}
fn default_service_name() -> String {
  "index-lifecycle-controller".to_string()
}
fn default_scope_name() -> String {
  "ilm-core".to_string()
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      stdio: StdioLogMode::default(),
      pretty: false,
      location: false,
      ansi: true,
      otlp_endpoint: String::new(),
      opentelemetry_service_name: default_service_name(),
      opentelemetry_scope_name: default_scope_name(),
    }
  }
}

/// Top-level controller configuration (`SPEC_FULL.md` §8).
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
  #[serde(default = "default_lock_ttl_ms")]
  pub lock_ttl_ms: u64,
  #[serde(default = "default_backoff_initial_delay_ms")]
  pub backoff_initial_delay_ms: u64,
  #[serde(default = "default_backoff_max_attempts")]
  pub backoff_max_attempts: u32,
  #[serde(default = "default_rollup_max_page_failures")]
  pub rollup_max_page_failures: u32,
  #[serde(default = "default_management_index")]
  pub management_index: String,
  #[serde(default)]
  pub log: LogConfig,
}

fn default_lock_ttl_ms() -> u64 {
  30_000
}
fn default_backoff_initial_delay_ms() -> u64 {
  250
}
fn default_backoff_max_attempts() -> u32 {
  3
}
fn default_rollup_max_page_failures() -> u32 {
  5
}
fn default_management_index() -> String {
  ".ism-config".to_string()
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      lock_ttl_ms: default_lock_ttl_ms(),
      backoff_initial_delay_ms: default_backoff_initial_delay_ms(),
      backoff_max_attempts: default_backoff_max_attempts(),
      rollup_max_page_failures: default_rollup_max_page_failures(),
      management_index: default_management_index(),
      log: LogConfig::default(),
    }
  }
}

/// Loads configuration from the environment once per process. Missing
/// variables fall back to the defaults above rather than erroring, since
/// every field has a sane default; a malformed present variable (e.g.
/// `LOCK_TTL_MS=not-a-number`) still fails loudly via `envy`.
pub fn controller_config() -> &'static ControllerConfig {
  static CONFIG: OnceLock<ControllerConfig> = OnceLock::new();
  CONFIG.get_or_init(|| {
    let _ = dotenvy::dotenv();
    load_from_env().expect("failed to load controller configuration")
  })
}

fn load_from_env() -> anyhow::Result<ControllerConfig> {
  envy::from_env::<ControllerConfig>()
    .context("failed to parse controller environment configuration")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let cfg = ControllerConfig::default();
    assert_eq!(cfg.lock_ttl_ms, 30_000);
    assert_eq!(cfg.backoff_initial_delay_ms, 250);
    assert_eq!(cfg.backoff_max_attempts, 3);
    assert_eq!(cfg.rollup_max_page_failures, 5);
  }
}
