//! Internal diagnostics of the bus itself.
//!
//! These never travel over the message channels. Standard output is left
//! alone because it may carry the packet protocol.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

#[async_trait]
#[typetag::serde]
pub trait LoggerType: Send + Sync {
    fn log(&self, level: LogLevel, context: &str, msg: &str);
    fn clone_box(&self) -> Box<dyn LoggerType>;
    fn debug_box(&self) -> String;
}

#[derive(Serialize, Deserialize)]
pub struct Logger(pub Box<dyn LoggerType>);

impl Logger {
    pub fn into_inner(self) -> Box<dyn LoggerType> {
        self.0
    }

    pub fn log(&self, level: LogLevel, context: &str, msg: &str) {
        self.0.log(level, context, msg)
    }
}

impl Clone for Logger {
    fn clone(&self) -> Self {
        Logger(self.0.clone_box())
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Forwards to the `tracing` macros.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TracingLogger;

impl TracingLogger {
    pub fn new() -> Self {
        Self
    }
}

#[typetag::serde]
#[async_trait]
impl LoggerType for TracingLogger {
    fn log(&self, level: LogLevel, context: &str, msg: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(%context, "{msg}"),
            LogLevel::Debug => tracing::debug!(%context, "{msg}"),
            LogLevel::Info => tracing::info!(%context, "{msg}"),
            LogLevel::Warn => tracing::warn!(%context, "{msg}"),
            LogLevel::Error => tracing::error!(%context, "{msg}"),
            LogLevel::Critical => tracing::error!(%context, "[CRITICAL] {msg}"),
        }
    }

    fn clone_box(&self) -> Box<dyn LoggerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        "TracingLogger".to_string()
    }
}

/// Installs the global subscriber.
///
/// With `log_dir` the diagnostics go to a daily rolling `discbus.log` in
/// that directory, otherwise to stderr. `RUST_LOG` overrides `log_level`.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<Logger> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "discbus.log");
            let layer = fmt::layer().with_writer(appender).with_ansi(false);
            Registry::default()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("tracing subscriber already installed")?;
        }
        None => {
            let layer = fmt::layer().with_writer(std::io::stderr).with_thread_names(true);
            Registry::default()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("tracing subscriber already installed")?;
        }
    }

    Ok(Logger(Box::new(TracingLogger::new())))
}
