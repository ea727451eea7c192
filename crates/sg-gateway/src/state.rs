//! Global gateway state

use std::sync::Arc;

use sg_core::config::GatewayConfig;
use sg_core::error::ConfigError;
use sg_core::{CommandResolver, IdentityVerifier};

use crate::auth::verifier_from_config;
use crate::pty::{NativePtySpawner, PtySpawner};
use crate::resolver::TemplateResolver;
use crate::session::SessionRegistry;

/// Shared by every connection the gateway accepts
pub struct GatewayState {
    /// Configuration
    pub config: GatewayConfig,
    /// Decides which keys may log in as which user
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Decides what each user's session runs
    pub resolver: Arc<dyn CommandResolver>,
    /// Starts commands on fresh ptys
    pub spawner: Arc<dyn PtySpawner>,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
}

impl GatewayState {
    /// Create state with explicit collaborators
    pub fn new(
        config: GatewayConfig,
        verifier: Arc<dyn IdentityVerifier>,
        resolver: Arc<dyn CommandResolver>,
        spawner: Arc<dyn PtySpawner>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.limits.max_sessions));
        Self {
            config,
            verifier,
            resolver,
            spawner,
            registry,
        }
    }

    /// Create state with the collaborators the configuration describes
    pub fn from_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let verifier = verifier_from_config(&config.auth)?;
        let resolver = Arc::new(TemplateResolver::new(config.command.clone()));
        Ok(Self::new(config, verifier, resolver, Arc::new(NativePtySpawner)))
    }

    /// Number of live sessions
    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }
}
