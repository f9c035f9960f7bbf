//! Relay configuration

use std::path::PathBuf;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::registry::RegistryConfig;
use crate::server::ServerConfig;
use crate::supervisor::RestartPolicy;

/// Complete relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Directory holding the transport endpoints
    pub transport_dir: PathBuf,

    /// Stream server settings
    pub server: ServerConfig,

    /// External registry settings
    pub registry: RegistryConfig,

    /// Delays between connection cycles
    pub restart: RestartPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            transport_dir: PathBuf::from(Catalog::DEFAULT_TRANSPORT_DIR),
            server: ServerConfig::default(),
            registry: RegistryConfig::default(),
            restart: RestartPolicy::default(),
        }
    }
}

impl RelayConfig {
    /// Set the transport directory
    pub fn transport_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transport_dir = dir.into();
        self
    }

    /// Set the server settings
    pub fn server(mut self, server: ServerConfig) -> Self {
        self.server = server;
        self
    }

    /// Set the registry settings
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the restart policy
    pub fn restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    /// Catalog with endpoints under the transport directory
    pub fn catalog(&self) -> Catalog {
        Catalog::new(&self.transport_dir)
    }

    /// Check values that would fail every cycle
    pub fn validate(&self) -> Result<()> {
        if !self.transport_dir.is_absolute() {
            return Err(Error::Config(format!(
                "transport directory '{}' must be absolute",
                self.transport_dir.display()
            )));
        }
        let base = &self.registry.redirect_base;
        if self.registry.enabled && !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(Error::Config(format!(
                "redirect base '{}' is not served by the stream server (expected http)",
                base
            )));
        }
        if self.restart.short_delay > self.restart.long_delay {
            return Err(Error::Config(
                "short restart delay exceeds the long delay".into(),
            ));
        }
        Ok(())
    }
}
