use std::collections::BTreeMap;
use std::{env, fs, path::PathBuf, str::FromStr};

use async_trait::async_trait;
use dashmap::DashMap;
use msg_protocol::{Channel, Severity};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::stack::DEFAULT_MAX_DEPTH;

/// Source of `DISCBUS_*` settings.
#[async_trait::async_trait]
#[typetag::serde]
pub trait ConfigManagerType: Send + Sync {
    async fn keys(&self) -> Vec<String>;
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str) -> Result<(), String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads the process environment after loading an optional `.env` file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvConfigManager {
    env_file: Option<PathBuf>,
}

impl EnvConfigManager {
    pub fn new(env_file: Option<PathBuf>) -> Box<Self> {
        match &env_file {
            Some(path) if path.exists() => match dotenvy::from_path(path) {
                Ok(()) => info!("Loaded .env from {}", path.display()),
                Err(e) => warn!("could not load .env from {}: {e}", path.display()),
            },
            Some(path) => info!("no .env at {}, using the process environment", path.display()),
            None => {}
        }
        Box::new(Self { env_file })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn keys(&self) -> Vec<String> {
        env::vars().map(|(k, _)| k).filter(|k| k.starts_with(KEY_PREFIX)).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        unsafe {
            env::set_var(key, value);
        };
        let Some(env_path) = &self.env_file else {
            return Ok(());
        };
        let content = fs::read_to_string(env_path).unwrap_or_default();
        let mut found = false;
        let mut lines: Vec<String> = content
            .lines()
            .map(|line| match line.split_once('=') {
                Some((k, _)) if k.trim() == key => {
                    found = true;
                    format!("{key}={value}")
                }
                _ => line.to_string(),
            })
            .collect();
        if !found {
            lines.push(format!("{key}={value}"));
        }
        fs::write(env_path, lines.join("\n") + "\n").map_err(|e| e.to_string())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "EnvConfigManager".to_string()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn with(pairs: &[(&str, &str)]) -> Box<Self> {
        let map = DashMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Box::new(Self { map })
    }
}

#[typetag::serde]
#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn keys(&self) -> Vec<String> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), String> {
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: String, value: String },
}

pub const KEY_PREFIX: &str = "DISCBUS_";

/// Settings of one message bus context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BusConfig {
    /// Name used in submitted message prefixes and log banners.
    pub program_name: String,
    pub max_stack_depth: usize,
    /// Emit packet lines (`R:1: ...`) instead of raw text.
    pub packet_output: bool,
    /// Backslash-encode non-printable bytes of result lines.
    pub encode_results: bool,
    /// Backslash-encode non-printable bytes of info and mark lines.
    pub encode_infos: bool,
    /// Log file per channel letter: `.` (all channels), `R`, `I`, `M`.
    pub log_files: BTreeMap<String, PathBuf>,
    pub packet_log: Option<PathBuf>,
    /// Minimum severity of submitted messages that get printed.
    pub report_about: Severity,
    /// Problem status at which callers are told to abort.
    pub abort_on: Severity,
    /// Upper bound for the watcher's reaction to a stop request.
    pub watcher_poll_ms: u64,
    pub frontend_allowed: bool,
    /// Allow launching frontends when real and effective user differ.
    pub allow_setuid_exec: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            program_name: "xorriso".to_string(),
            max_stack_depth: DEFAULT_MAX_DEPTH,
            packet_output: false,
            encode_results: false,
            encode_infos: false,
            log_files: BTreeMap::new(),
            packet_log: None,
            report_about: Severity::Update,
            abort_on: Severity::Failure,
            watcher_poll_ms: 1,
            frontend_allowed: true,
            allow_setuid_exec: false,
        }
    }
}

impl BusConfig {
    pub fn log_file(&self, channel: Channel) -> Option<&PathBuf> {
        self.log_files.get(&channel.letter().to_string())
    }

    pub fn encodes(&self, channel: Channel) -> bool {
        match channel {
            Channel::Result => self.encode_results,
            Channel::Info | Channel::Mark => self.encode_infos,
            Channel::None => false,
        }
    }

    /// Builds a configuration from `DISCBUS_*` keys, defaults for the rest.
    pub async fn from_manager(mgr: &ConfigManager) -> Result<Self, ConfigError> {
        let mut cfg = BusConfig::default();
        let get = |key: &'static str| async move { mgr.0.get(key).await.map(|v| (key, v)) };

        if let Some((_, v)) = get("DISCBUS_PROGRAM_NAME").await {
            cfg.program_name = v;
        }
        if let Some((k, v)) = get("DISCBUS_MAX_STACK_DEPTH").await {
            cfg.max_stack_depth = parse(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_PKT_OUTPUT").await {
            cfg.packet_output = parse_switch(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_ENCODE_RESULTS").await {
            cfg.encode_results = parse_switch(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_ENCODE_INFOS").await {
            cfg.encode_infos = parse_switch(k, &v)?;
        }
        for channel in Channel::ALL {
            let key = match channel {
                Channel::None => "DISCBUS_LOG_ALL",
                Channel::Result => "DISCBUS_LOG_R",
                Channel::Info => "DISCBUS_LOG_I",
                Channel::Mark => "DISCBUS_LOG_M",
            };
            if let Some((_, v)) = get(key).await {
                cfg.log_files.insert(channel.letter().to_string(), PathBuf::from(v));
            }
        }
        if let Some((_, v)) = get("DISCBUS_PKT_LOG").await {
            cfg.packet_log = Some(PathBuf::from(v));
        }
        if let Some((k, v)) = get("DISCBUS_REPORT_ABOUT").await {
            cfg.report_about = parse(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_ABORT_ON").await {
            cfg.abort_on = parse(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_WATCHER_POLL_MS").await {
            cfg.watcher_poll_ms = parse(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_FRONTEND_ALLOWED").await {
            cfg.frontend_allowed = parse_switch(k, &v)?;
        }
        if let Some((k, v)) = get("DISCBUS_ALLOW_SETUID_EXEC").await {
            cfg.allow_setuid_exec = parse_switch(k, &v)?;
        }
        Ok(cfg)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_switch(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue { key: key.to_string(), value: value.to_string() }
}
