// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Initialization and runtime control of logging. Log levels can be changed at runtime,
//! globally or per target, by reloading the filter of the installed subscriber.

use crate::errors::RouterError;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Registry, prelude::*, reload};

#[allow(unused)]
use tracing::{debug, error, info, warn};

/// The levels in use: a default one and per-target overrides
#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    level: LevelFilter,
    targets: BTreeMap<String, LevelFilter>,
    env: Option<String>,
}

impl LogConfig {
    #[must_use]
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            targets: BTreeMap::new(),
            env: None,
        }
    }

    /// Render the config as filter directives, e.g. `info,zebra_routing::mlag=debug`.
    /// Directives taken from the environment go last, so they win.
    #[must_use]
    pub fn as_config_string(&self) -> String {
        let mut out = self.level.to_string().to_lowercase();
        for (target, level) in &self.targets {
            out.push_str(&format!(",{target}={}", level.to_string().to_lowercase()));
        }
        if let Some(env) = &self.env {
            out.push(',');
            out.push_str(env);
        }
        out
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::new(self.as_config_string())
    }
}

/// Handle to change log levels after [`init_tracing`]
#[derive(Debug, Clone)]
pub struct LogControl {
    config: Arc<Mutex<LogConfig>>,
    reload_filter: reload::Handle<EnvFilter, Registry>,
}

impl LogControl {
    fn reload(&self, config: &LogConfig) {
        if let Err(e) = self.reload_filter.reload(config.env_filter()) {
            error!("Failed to reload tracing filter: {e}");
        }
    }

    pub fn set_default_level(&self, level: LevelFilter) {
        if let Ok(mut config) = self.config.lock() {
            if config.level != level {
                config.level = level;
                self.reload(&config);
                info!("Set default log level to {level}");
            }
        }
    }

    #[must_use]
    pub fn get_default_level(&self) -> Option<LevelFilter> {
        self.config.lock().ok().map(|config| config.level)
    }

    /// Set the level of a target (e.g. a module path)
    pub fn set_target_level(&self, target: &str, level: LevelFilter) {
        if let Ok(mut config) = self.config.lock() {
            config.targets.insert(target.to_owned(), level);
            self.reload(&config);
            info!("Set log level of '{target}' to {level}");
        }
    }

    #[must_use]
    pub fn config(&self) -> Option<LogConfig> {
        self.config.lock().ok().map(|c| c.clone())
    }
}

/// Install the global tracing subscriber. Directives in `RUST_LOG` are honored on top of
/// the given default level. Log lines carry the thread name and the source line.
///
/// # Errors
/// Fails if a global subscriber was already installed.
pub fn init_tracing(level: LevelFilter) -> Result<LogControl, RouterError> {
    let mut config = LogConfig::new(level);
    config.env = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty());

    let (filter, reload_filter) = reload::Layer::new(config.env_filter());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|_| RouterError::InvalidConfig("tracing subscriber already initialized"))?;

    Ok(LogControl {
        config: Arc::new(Mutex::new(config)),
        reload_filter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_string() {
        let mut config = LogConfig::new(LevelFilter::INFO);
        assert_eq!(config.as_config_string(), "info");
        config
            .targets
            .insert("zebra_routing::mlag".to_string(), LevelFilter::DEBUG);
        config.env = Some("zebra_routing::rib=trace".to_string());
        assert_eq!(
            config.as_config_string(),
            "info,zebra_routing::mlag=debug,zebra_routing::rib=trace"
        );
    }
}
