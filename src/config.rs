//! Configuration Module
//!
//! Provides TOML-based configuration for netsleuth.
//! Configuration is optional - CLI arguments can override file settings,
//! and credentials may come from the environment instead of the file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyzer::{AnomalyFilter, DEFAULT_TOP_K, DEFAULT_ZSCORE_THRESHOLD};
use crate::export::OutputFormat;
use crate::flow::KeySpec;
use crate::passive_dns::DEFAULT_API_BASE_URL;
use crate::resolver::{SuppressionMatch, SuppressionRule, DEFAULT_SUPPRESSION_SUBSTRING};

/// Environment variable overriding `auth.tenant_id`.
pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
/// Environment variable overriding `auth.client_id`.
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
/// Environment variable overriding `auth.client_secret`.
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub detection: DetectionConfig,
    pub enrichment: EnrichmentConfig,
    pub auth: AuthConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Fills credentials from the environment, which takes precedence.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let pairs = [
            (ENV_TENANT_ID, &mut self.auth.tenant_id),
            (ENV_CLIENT_ID, &mut self.auth.client_id),
            (ENV_CLIENT_SECRET, &mut self.auth.client_secret),
        ];
        for (name, slot) in pairs {
            if let Some(value) = lookup(name).filter(|v| !v.is_empty()) {
                *slot = Some(value);
            }
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.detection.zscore_threshold.is_finite() || self.detection.zscore_threshold < 0.0 {
            anyhow::bail!("zscore_threshold must be a finite, non-negative number");
        }
        if self.detection.top_k == 0 {
            anyhow::bail!("top_k must be greater than 0");
        }
        if self.enrichment.max_concurrent_lookups == 0 {
            anyhow::bail!("max_concurrent_lookups must be greater than 0");
        }
        if self.input.group_by_columns.is_empty() {
            anyhow::bail!("group_by_columns must name at least one column");
        }
        for (name, value) in [
            ("metric_column", &self.input.metric_column),
            ("source_column", &self.input.source_column),
            ("destination_column", &self.input.destination_column),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
        }
        Ok(())
    }

    /// Checks that everything needed for DNS enrichment is present.
    pub fn validate_enrichment(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("tenant_id", &self.auth.tenant_id),
            ("client_id", &self.auth.client_id),
            ("client_secret", &self.auth.client_secret),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "missing credentials: {} (set them in [auth] or via {}, {}, {})",
                missing.join(", "),
                ENV_TENANT_ID,
                ENV_CLIENT_ID,
                ENV_CLIENT_SECRET
            );
        }
        Ok(())
    }

    /// Grouping key derived from the input columns.
    pub fn key_spec(&self) -> KeySpec {
        KeySpec::from_columns(
            &self.input.group_by_columns,
            &self.input.source_column,
            &self.input.destination_column,
        )
    }

    pub fn anomaly_filter(&self) -> AnomalyFilter {
        AnomalyFilter::new(self.detection.zscore_threshold, self.detection.top_k)
    }

    pub fn suppression_rule(&self) -> SuppressionRule {
        SuppressionRule::new(
            &self.enrichment.suppression_substring,
            self.enrichment.suppression_match,
        )
    }
}

/// Input column mapping
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Numeric column scored per group
    pub metric_column: String,
    /// Column holding the source identifier
    pub source_column: String,
    /// Column holding the destination identifier
    pub destination_column: String,
    /// Columns forming the group key, in order
    pub group_by_columns: Vec<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            metric_column: "num_octets".to_string(),
            source_column: "src_ip_addr".to_string(),
            destination_column: "dst_ip_addr".to_string(),
            group_by_columns: vec!["src_ip_addr".to_string(), "dst_ip_addr".to_string()],
        }
    }
}

/// Detection-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Records with |z| strictly above this are anomalies
    pub zscore_threshold: f64,
    /// Number of findings to report
    pub top_k: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: DEFAULT_ZSCORE_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

/// Passive-DNS enrichment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Hostname marker for known infrastructure; empty disables suppression
    pub suppression_substring: String,
    /// How the marker is matched
    pub suppression_match: SuppressionMatch,
    /// Graph API base URL
    pub api_base_url: String,
    /// Lookups in flight at once
    pub max_concurrent_lookups: usize,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl EnrichmentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            suppression_substring: DEFAULT_SUPPRESSION_SUBSTRING.to_string(),
            suppression_match: SuppressionMatch::Substring,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            max_concurrent_lookups: 4,
            request_timeout_secs: 30,
        }
    }
}

/// Identity provider configuration
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// OAuth2 authority, without the tenant segment
    pub authority_url: String,
    /// Scope requested for the token
    pub scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_id: None,
            client_id: None,
            client_secret: None,
            authority_url: "https://login.microsoftonline.com".to_string(),
            scope: "https://graph.microsoft.com/.default".to_string(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("authority_url", &self.authority_url)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl, csv)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Output file path (None = stdout)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::GroupField;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.detection.zscore_threshold, 2.0);
        assert_eq!(config.detection.top_k, 10);
        assert_eq!(config.input.metric_column, "num_octets");
        assert_eq!(config.enrichment.suppression_substring, "zpath.net");
        assert_eq!(config.key_spec(), KeySpec::default());
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.detection.top_k = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.zscore_threshold = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.input.group_by_columns.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.enrichment.max_concurrent_lookups = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_enrichment_reports_missing() {
        let mut config = Config::default();
        let err = config.validate_enrichment().unwrap_err().to_string();
        assert!(err.contains("tenant_id"));
        assert!(err.contains("client_secret"));

        config.auth.tenant_id = Some("t".to_string());
        config.auth.client_id = Some("c".to_string());
        config.auth.client_secret = Some("s".to_string());
        assert!(config.validate_enrichment().is_ok());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = Config::default();
        config.auth.client_id = Some("from-file".to_string());

        let env: HashMap<&str, &str> = [(ENV_CLIENT_ID, "from-env"), (ENV_TENANT_ID, "")]
            .into_iter()
            .collect();
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.auth.client_id.as_deref(), Some("from-env"));
        assert_eq!(config.auth.tenant_id, None);
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[input]"));
        assert!(config_str.contains("[detection]"));
        assert!(config_str.contains("[enrichment]"));
        assert!(config_str.contains("[auth]"));
        assert!(config_str.contains("[output]"));

        let parsed: Config = toml::from_str(&config_str).unwrap();
        assert_eq!(parsed.detection.top_k, 10);
        assert_eq!(parsed.enrichment.suppression_match, SuppressionMatch::Substring);
    }

    #[test]
    fn test_auth_debug_redacts_secret() {
        let auth = AuthConfig {
            client_secret: Some("hunter2".to_string()),
            ..Default::default()
        };
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[input]
metric_column = "bytes"
group_by_columns = ["src_ip_addr", "dst_ip_addr", "dst_port"]

[detection]
zscore_threshold = 3.0
top_k = 25

[enrichment]
suppression_substring = "corp-vpn.example"
suppression_match = "suffix"
max_concurrent_lookups = 8

[output]
format = "json"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.input.metric_column, "bytes");
        assert_eq!(config.input.source_column, "src_ip_addr");
        assert_eq!(config.detection.zscore_threshold, 3.0);
        assert_eq!(config.detection.top_k, 25);
        assert_eq!(config.enrichment.suppression_match, SuppressionMatch::Suffix);
        assert_eq!(config.enrichment.max_concurrent_lookups, 8);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(
            config.key_spec().fields(),
            &[
                GroupField::Source,
                GroupField::Destination,
                GroupField::Extra("dst_port".to_string()),
            ]
        );
        assert!(config.suppression_rule().matches("gw.corp-vpn.example"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netsleuth.toml");
        std::fs::write(&path, "[detection]\ntop_k = 3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.detection.top_k, 3);

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
