// src/debug.rs

//! Gated diagnostics facade
//!
//! The server decides which diagnostic sections are audible. Every call is
//! dropped unless the global switch is on AND the named section's flag is
//! exactly `true`. When audible, calls are forwarded to a console-like
//! sink at the matching severity with a fixed tag; if the sink does not
//! support that severity, the call is dropped silently rather than
//! rerouted to a different one.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::DebugSettings;

/// Severity channels mirroring the browser console surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugLevel {
    Debug,
    Log,
    Info,
    Warn,
    Error,
}

impl fmt::Display for DebugLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Log => write!(f, "log"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Console-like output seam for the debug sink
pub trait DebugConsole: Send + Sync + fmt::Debug {
    /// Whether this console exposes the given severity channel
    fn supports(&self, level: DebugLevel) -> bool;

    /// Writes an already-gated line, with optional structured payload
    fn write(&self, level: DebugLevel, line: &str, data: Option<&serde_json::Value>);
}

/// Default console that forwards to `tracing` at the matching level
#[derive(Debug, Default)]
pub struct TracingConsole;

impl DebugConsole for TracingConsole {
    fn supports(&self, _level: DebugLevel) -> bool {
        true
    }

    fn write(&self, level: DebugLevel, line: &str, data: Option<&serde_json::Value>) {
        match (level, data) {
            (DebugLevel::Debug, Some(d)) => tracing::debug!(data = %d, "{}", line),
            (DebugLevel::Debug, None) => tracing::debug!("{}", line),
            (DebugLevel::Log | DebugLevel::Info, Some(d)) => tracing::info!(data = %d, "{}", line),
            (DebugLevel::Log | DebugLevel::Info, None) => tracing::info!("{}", line),
            (DebugLevel::Warn, Some(d)) => tracing::warn!(data = %d, "{}", line),
            (DebugLevel::Warn, None) => tracing::warn!("{}", line),
            (DebugLevel::Error, Some(d)) => tracing::error!(data = %d, "{}", line),
            (DebugLevel::Error, None) => tracing::error!("{}", line),
        }
    }
}

/// Partial configuration for `DebugSink::update_config`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugConfigUpdate {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub sections: Option<std::collections::HashMap<String, bool>>,
}

/// Section-gated diagnostics sink
#[derive(Debug, Clone)]
pub struct DebugSink {
    config: Arc<RwLock<DebugSettings>>,
    console: Arc<dyn DebugConsole>,
}

impl DebugSink {
    /// Creates a sink over the given console
    pub fn new(config: DebugSettings, console: Arc<dyn DebugConsole>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            console,
        }
    }

    /// Creates a sink backed by the default tracing console
    pub fn with_tracing(config: DebugSettings) -> Self {
        Self::new(config, Arc::new(TracingConsole))
    }

    /// True only when the global switch is on and the section flag is
    /// exactly `true`.
    pub fn is_enabled(&self, section: &str) -> bool {
        let config = self.config.read();
        config.enabled && config.sections.get(section) == Some(&true)
    }

    /// Shallow-merges `partial` into the current configuration. A provided
    /// `sections` map replaces the existing one wholesale; sections absent
    /// from the new map lose their previous flag.
    pub fn update_config(&self, partial: DebugConfigUpdate) {
        let mut config = self.config.write();
        if let Some(enabled) = partial.enabled {
            config.enabled = enabled;
        }
        if let Some(sections) = partial.sections {
            config.sections = sections;
        }
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> DebugSettings {
        self.config.read().clone()
    }

    pub fn log(&self, section: &str, message: &str, data: Option<&serde_json::Value>) {
        self.emit(DebugLevel::Log, section, message, data);
    }

    pub fn warn(&self, section: &str, message: &str, data: Option<&serde_json::Value>) {
        self.emit(DebugLevel::Warn, section, message, data);
    }

    pub fn error(&self, section: &str, message: &str, data: Option<&serde_json::Value>) {
        self.emit(DebugLevel::Error, section, message, data);
    }

    pub fn debug(&self, section: &str, message: &str, data: Option<&serde_json::Value>) {
        self.emit(DebugLevel::Debug, section, message, data);
    }

    pub fn info(&self, section: &str, message: &str, data: Option<&serde_json::Value>) {
        self.emit(DebugLevel::Info, section, message, data);
    }

    fn emit(&self, level: DebugLevel, section: &str, message: &str, data: Option<&serde_json::Value>) {
        if !self.is_enabled(section) {
            return;
        }
        if !self.console.supports(level) {
            return;
        }
        let line = format!("[Explainer:{}] {}", section, message);
        self.console.write(level, &line, data);
    }
}
