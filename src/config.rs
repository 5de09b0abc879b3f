//! On-disk configuration, loaded once at startup.
//!
//! A plain struct tree deserialized from TOML with `#[serde(default = "...")]`
//! functions covering every optional knob, so a nearly-empty config file is
//! enough to get started.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file at {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("parsing config file at {}", path.display()))?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            executor: ExecutorConfig::default(),
            suite: SuiteConfig::default(),
        }
    }
}

/// How to reach the automation server: TCP or a Unix domain socket.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub unix_socket_path: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            unix_socket_path: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:6790".to_string()
}

/// 5 minutes, matching the automation server's own tolerance for slow
/// operations (APK install, screenshots).
fn default_timeout_ms() -> u64 {
    5 * 60 * 1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub clear_state: bool,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub apk_dir: Option<String>,
    #[serde(default = "default_server_start_deadline_ms")]
    pub server_start_deadline_ms: u64,
    #[serde(default = "default_health_check_probe_ms")]
    pub health_check_probe_ms: u64,
    #[serde(default = "default_health_check_retry_ms")]
    pub health_check_retry_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            device_id: None,
            app_id: None,
            clear_state: false,
            permissions: Vec::new(),
            apk_dir: None,
            server_start_deadline_ms: default_server_start_deadline_ms(),
            health_check_probe_ms: default_health_check_probe_ms(),
            health_check_retry_ms: default_health_check_retry_ms(),
        }
    }
}

fn default_platform() -> String {
    "android".to_string()
}

fn default_server_start_deadline_ms() -> u64 {
    30_000
}

fn default_health_check_probe_ms() -> u64 {
    2_000
}

fn default_health_check_retry_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    #[serde(default = "default_scroll_cap")]
    pub scroll_cap: u32,
    #[serde(default = "default_long_press_ms")]
    pub long_press_ms: u64,
    #[serde(default = "default_assert_not_visible_ms")]
    pub assert_not_visible_ms: u64,
    #[serde(default = "default_scroll_until_visible_ms")]
    pub scroll_until_visible_ms: u64,
    #[serde(default = "default_wait_until_ms")]
    pub wait_until_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            scroll_cap: default_scroll_cap(),
            long_press_ms: default_long_press_ms(),
            assert_not_visible_ms: default_assert_not_visible_ms(),
            scroll_until_visible_ms: default_scroll_until_visible_ms(),
            wait_until_ms: default_wait_until_ms(),
        }
    }
}

fn default_step_timeout_ms() -> u64 {
    10_000
}

fn default_scroll_cap() -> u32 {
    20
}

fn default_long_press_ms() -> u64 {
    1_000
}

fn default_assert_not_visible_ms() -> u64 {
    2_000
}

fn default_scroll_until_visible_ms() -> u64 {
    30_000
}

fn default_wait_until_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteConfig {
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default = "default_report_format")]
    pub report_format: String,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            report_format: default_report_format(),
        }
    }
}

fn default_report_format() -> String {
    "json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.transport.base_url, "http://127.0.0.1:6790");
        assert_eq!(config.session.platform, "android");
        assert_eq!(config.executor.scroll_cap, 20);
        assert_eq!(config.suite.report_format, "json");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let toml_str = r#"
            [session]
            platform = "ios"
            app_id = "com.example.app"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.session.platform, "ios");
        assert_eq!(config.session.app_id.as_deref(), Some("com.example.app"));
        assert_eq!(config.session.server_start_deadline_ms, 30_000);
        assert_eq!(config.transport.timeout_ms, 5 * 60 * 1000);
    }

    #[test]
    fn load_missing_file_errors() {
        let result = Config::load(Path::new("/nonexistent/hermitflow.toml"));
        assert!(result.is_err());
    }
}
