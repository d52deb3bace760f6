//! Process-wide registry.
//!
//! Created on first use from [`MonitorConfig::from_env`]. Threads racing on
//! first access block until construction finishes and then share the same
//! instance. The instance lives until [`shutdown_global`] drains it, which
//! applications call once at exit.

use super::registry::Registry;
use crate::config::MonitorConfig;
use crate::error::{PropertyError, Result};
use once_cell::sync::OnceCell;

static GLOBAL: OnceCell<Registry> = OnceCell::new();

/// The process-wide registry, starting it on first call.
pub fn global() -> Result<&'static Registry> {
    GLOBAL.get_or_try_init(|| Registry::start(MonitorConfig::from_env()?))
}

/// Starts the process-wide registry with an explicit config.
///
/// Fails with `AlreadyInitialized` if it is already running or was shut down.
pub fn init_global(config: MonitorConfig) -> Result<&'static Registry> {
    let mut created = false;
    let registry = GLOBAL.get_or_try_init(|| {
        created = true;
        Registry::start(config)
    })?;
    if created {
        Ok(registry)
    } else {
        Err(PropertyError::AlreadyInitialized)
    }
}

/// Drains and joins the process-wide registry if it was started.
pub fn shutdown_global() {
    if let Some(registry) = GLOBAL.get() {
        registry.shutdown();
    }
}
