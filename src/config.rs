// src/config.rs
//! Notifier configuration.
//!
//! Sources, later wins:
//! 1) built-in defaults,
//! 2) TOML file (`$NOTIFIER_CONFIG_PATH`, else `config/notifier.toml` if present),
//! 3) `NOTIFIER_*` environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::distr::{Alphanumeric, SampleString};
use serde::Deserialize;

use crate::history::{FileHistory, InMemoryHistory, VideoHistory, DEFAULT_CAPACITY, DEFAULT_PER_CHANNEL};

pub const ENV_CONFIG_PATH: &str = "NOTIFIER_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/notifier.toml";

const ENV_CALLBACK_URL: &str = "NOTIFIER_CALLBACK_URL";
const ENV_SECRET: &str = "NOTIFIER_SECRET";
const ENV_PORT: &str = "NOTIFIER_PORT";
const ENV_CHANNELS: &str = "NOTIFIER_CHANNELS";

const SECRET_LEN: usize = 32;

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_endpoint() -> String {
    "/".into()
}
fn default_renewal_secs() -> u64 {
    86_400
}
fn default_hub_url() -> String {
    "https://pubsubhubbub.appspot.com".into()
}
fn default_topic_base() -> String {
    "https://www.youtube.com/feeds/videos.xml?channel_id=".into()
}
fn default_channel_base() -> String {
    "https://www.youtube.com/channel/".into()
}
fn default_poll_ms() -> u64 {
    100
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Memory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub kind: HistoryKind,
    /// In-memory capacity (video IDs).
    pub capacity: usize,
    /// Directory for per-channel logs.
    pub dir: PathBuf,
    pub per_channel: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            kind: HistoryKind::Memory,
            capacity: DEFAULT_CAPACITY,
            dir: PathBuf::from("history"),
            per_channel: DEFAULT_PER_CHANNEL,
        }
    }
}

impl HistoryConfig {
    pub fn build(&self) -> Arc<dyn VideoHistory> {
        match self.kind {
            HistoryKind::Memory => Arc::new(InMemoryHistory::with_capacity(self.capacity)),
            HistoryKind::File => Arc::new(FileHistory::with_limit(&self.dir, self.per_channel)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NotifierConfig {
    /// Public address the hub pushes to. `None` means a tunnel is opened.
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Shared HMAC secret. `None` generates one; `Some("")` turns
    /// signature checks off.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path the callback is served on behind a tunnel. A configured
    /// `callback_url` brings its own path instead.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_renewal_secs")]
    pub renewal_interval_secs: u64,
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    #[serde(default = "default_topic_base")]
    pub topic_base: String,
    #[serde(default = "default_channel_base")]
    pub channel_base: String,
    #[serde(default)]
    pub lease_seconds: Option<u64>,
    #[serde(default = "default_poll_ms")]
    pub readiness_poll_ms: u64,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub metrics: bool,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            callback_url: None,
            secret: None,
            host: default_host(),
            port: default_port(),
            endpoint: default_endpoint(),
            renewal_interval_secs: default_renewal_secs(),
            hub_url: default_hub_url(),
            topic_base: default_topic_base(),
            channel_base: default_channel_base(),
            lease_seconds: None,
            readiness_poll_ms: default_poll_ms(),
            history: HistoryConfig::default(),
            channels: Vec::new(),
            metrics: false,
        }
    }
}

impl NotifierConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: NotifierConfig = toml::from_str(s).context("parsing notifier config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading notifier config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env()?;
        Ok(cfg)
    }

    /// `$NOTIFIER_CONFIG_PATH`, then `config/notifier.toml`, then defaults;
    /// env overrides are applied in every case.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        let mut cfg = Self::default();
        cfg.apply_env()?;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(v) = env::var(ENV_CALLBACK_URL) {
            let v = v.trim();
            self.callback_url = (!v.is_empty()).then(|| v.to_string());
        }
        if let Ok(v) = env::var(ENV_SECRET) {
            self.secret = Some(v);
        }
        if let Ok(v) = env::var(ENV_PORT) {
            self.port = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT}={v:?} is not a port"))?;
        }
        if let Ok(v) = env::var(ENV_CHANNELS) {
            self.channels = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.renewal_interval_secs == 0 {
            return Err(anyhow!("renewal_interval_secs must be > 0"));
        }
        if self.readiness_poll_ms == 0 {
            return Err(anyhow!("readiness_poll_ms must be > 0"));
        }
        if !self.endpoint.starts_with('/') {
            return Err(anyhow!("endpoint must start with '/': {:?}", self.endpoint));
        }
        if let Some(url) = &self.callback_url {
            reqwest::Url::parse(url).with_context(|| format!("callback_url {url:?} is not a URL"))?;
        }
        Ok(())
    }

    /// Path the callback route is mounted on: the path of `callback_url`
    /// when one is set, else `endpoint`.
    pub fn route_path(&self) -> String {
        self.callback_url
            .as_deref()
            .and_then(|u| reqwest::Url::parse(u).ok())
            .map(|u| u.path().to_string())
            .unwrap_or_else(|| self.endpoint.clone())
    }

    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.renewal_interval_secs)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    /// The configured secret, or a fresh random one.
    pub fn resolve_secret(&self) -> String {
        match &self.secret {
            Some(s) => s.clone(),
            None => generate_secret(),
        }
    }
}

/// Random alphanumeric token from the thread-local CSPRNG.
pub fn generate_secret() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), SECRET_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for k in [ENV_CONFIG_PATH, ENV_CALLBACK_URL, ENV_SECRET, ENV_PORT, ENV_CHANNELS] {
            env::remove_var(k);
        }
    }

    #[test]
    fn defaults() {
        let cfg = NotifierConfig::default();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.renewal_interval(), Duration::from_secs(24 * 3600));
        assert_eq!(cfg.history.capacity, 5000);
        assert_eq!(cfg.history.kind, HistoryKind::Memory);
        assert!(cfg.callback_url.is_none());
    }

    #[test]
    fn toml_sections_and_partial_fields() {
        let cfg = NotifierConfig::from_toml_str(
            r#"
            callback_url = "https://example.org/hook"
            port = 9001
            lease_seconds = 3600
            channels = ["UC1", "UC2"]

            [history]
            kind = "file"
            dir = "/tmp/hist"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.callback_url.as_deref(), Some("https://example.org/hook"));
        assert_eq!(cfg.port, 9001);
        assert_eq!(cfg.lease_seconds, Some(3600));
        assert_eq!(cfg.history.kind, HistoryKind::File);
        assert_eq!(cfg.history.per_channel, DEFAULT_PER_CHANNEL);
        assert_eq!(cfg.host, "0.0.0.0");
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(NotifierConfig::from_toml_str("renewal_interval_secs = 0").is_err());
        assert!(NotifierConfig::from_toml_str(r#"endpoint = "hook""#).is_err());
        assert!(NotifierConfig::from_toml_str("port = \"x\"").is_err());
    }

    #[test]
    fn route_path_follows_callback_url() {
        let mut cfg = NotifierConfig::default();
        assert_eq!(cfg.route_path(), "/");

        cfg.endpoint = "/push".into();
        assert_eq!(cfg.route_path(), "/push");

        cfg.callback_url = Some("https://example.org/hook".into());
        assert_eq!(cfg.route_path(), "/hook");

        cfg.callback_url = Some("https://example.org".into());
        assert_eq!(cfg.route_path(), "/");

        assert!(NotifierConfig::from_toml_str(r#"callback_url = "not a url""#).is_err());
    }

    #[test]
    fn secret_generation() {
        let a = generate_secret();
        assert_eq!(a.len(), SECRET_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, generate_secret());

        let cfg = NotifierConfig {
            secret: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(cfg.resolve_secret(), "");
    }

    #[serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        clear_env();

        // nothing on disk: defaults
        let cfg = NotifierConfig::load_default().unwrap();
        assert_eq!(cfg, NotifierConfig::default());

        let p = tmp.path().join("custom.toml");
        fs::write(&p, "port = 7000\n").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        env::set_var(ENV_CHANNELS, " UC1, ,UC2 ");
        env::set_var(ENV_SECRET, "");
        let cfg = NotifierConfig::load_default().unwrap();
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.channels, vec!["UC1".to_string(), "UC2".to_string()]);
        assert_eq!(cfg.secret.as_deref(), Some(""));

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(NotifierConfig::load_default().is_err());

        clear_env();
        env::set_current_dir(&old).unwrap();
    }

    #[test]
    fn example_config_parses() {
        let cfg = NotifierConfig::from_toml_str(include_str!("../config/notifier.example.toml"))
            .expect("example config");
        assert_eq!(cfg, NotifierConfig::default());
    }
}
