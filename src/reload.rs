// Configuration hot reload module
// Handles SIGHUP signal to swap in a new origin registry without downtime

use crate::config::Config;
use crate::origin::{OriginRegistry, SharedRegistry};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// ReloadManager handles configuration reload via SIGHUP signal
pub struct ReloadManager {
    config_path: PathBuf,
    registry: SharedRegistry,
    reload_requested: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl ReloadManager {
    /// Create a new ReloadManager that swaps reloaded origins into `registry`
    pub fn new(config_path: PathBuf, registry: SharedRegistry) -> Self {
        Self {
            config_path,
            registry,
            reload_requested: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
        }
    }

    /// Register SIGHUP signal handler
    #[cfg(unix)]
    pub fn register_signal_handler(&self) -> Result<(), String> {
        use signal_hook::consts::SIGHUP;
        use signal_hook::flag;

        flag::register(SIGHUP, Arc::clone(&self.reload_requested))
            .map_err(|e| format!("Failed to register SIGHUP handler: {}", e))?;

        Ok(())
    }

    /// Check if reload was requested via SIGHUP
    pub fn is_reload_requested(&self) -> bool {
        self.reload_requested.load(Ordering::Relaxed)
    }

    /// Flag a reload as if SIGHUP had arrived
    pub fn request_reload(&self) {
        self.reload_requested.store(true, Ordering::Relaxed);
    }

    /// Clear the reload request flag
    pub fn clear_reload_request(&self) {
        self.reload_requested.store(false, Ordering::Relaxed);
    }

    /// Load and validate the config file without applying it
    pub fn reload_config(&self) -> Result<Config, String> {
        let new_config = Config::from_file(&self.config_path)?;
        new_config.validate()?;
        Ok(new_config)
    }

    /// Reload the config file and swap in a registry built from it
    ///
    /// On any error the running registry is left untouched. Returns the new
    /// generation number.
    pub fn apply_reload(&self) -> Result<u64, String> {
        let mut config = self.reload_config()?;
        let generation = self.generation() + 1;
        config.generation = generation;
        let registry = OriginRegistry::from_config(&config).map_err(|e| e.to_string())?;
        self.generation.store(generation, Ordering::SeqCst);

        tracing::info!(
            config_file = %self.config_path.display(),
            generation = generation,
            origins = registry.origin_count(),
            sources = registry.source_count(),
            "Origin registry reloaded"
        );
        self.registry.store(Arc::new(registry));
        Ok(generation)
    }

    /// Apply a pending SIGHUP reload, if any; returns true if a new registry was swapped in
    pub fn check_and_reload(&self) -> bool {
        if !self.is_reload_requested() {
            return false;
        }
        self.clear_reload_request();

        match self.apply_reload() {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    config_file = %self.config_path.display(),
                    error = %e,
                    "Config reload failed, keeping current origins"
                );
                false
            }
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Get the config file path
    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}
