//! Configuration loading
//!
//! The orchestrator asks a [`ConfigurationLoader`] for the list of
//! user-facing VPN profiles on every full reload.

use crate::error::VpnError;
use crate::native::NativeSessionProvider;
use crate::types::ConnectionProfile;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Source of VPN profiles
#[async_trait]
pub trait ConfigurationLoader: Send + Sync {
    /// Return every user-facing profile; may be called repeatedly
    async fn load_configurations(&self) -> Result<Vec<ConnectionProfile>, VpnError>;
}

/// Loader that lists profiles through a native session provider
pub struct ProviderConfigurationLoader {
    provider: Arc<dyn NativeSessionProvider>,
}

impl ProviderConfigurationLoader {
    pub fn new(provider: Arc<dyn NativeSessionProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ConfigurationLoader for ProviderConfigurationLoader {
    #[tracing::instrument(skip(self), fields(provider = self.provider.name()))]
    async fn load_configurations(&self) -> Result<Vec<ConnectionProfile>, VpnError> {
        let provider = Arc::clone(&self.provider);
        let profiles = tokio::task::spawn_blocking(move || provider.list_profiles())
            .await
            .map_err(|e| VpnError::FrameworkLoadFailed {
                reason: e.to_string(),
            })??;

        let total = profiles.len();
        let visible: Vec<ConnectionProfile> = profiles
            .into_iter()
            .filter(|profile| !profile.system)
            .map(|profile| ConnectionProfile::new(profile.id, profile.name))
            .collect();

        debug!(total, visible = visible.len(), "Loaded VPN configurations");
        Ok(visible)
    }
}
