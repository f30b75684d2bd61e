//! Download client abstraction.
//!
//! This module provides the `DownloaderGateway` trait the engine drives, plus
//! qBittorrent and Transmission backends and a registry keyed by profile id.

mod qbittorrent;
mod transmission;
mod types;

use std::sync::Arc;

pub use qbittorrent::QBittorrentGateway;
pub use transmission::TransmissionGateway;
pub use types::*;

use crate::config::{BackendKind, DownloaderProfile};

/// Build the gateway for a downloader profile.
pub fn create_gateway(
    profile: &DownloaderProfile,
) -> Result<Arc<dyn DownloaderGateway>, GatewayError> {
    let gateway: Arc<dyn DownloaderGateway> = match profile.backend_kind {
        BackendKind::Qbittorrent => Arc::new(QBittorrentGateway::new(profile.clone())?),
        BackendKind::Transmission => Arc::new(TransmissionGateway::new(profile.clone())?),
    };
    Ok(gateway)
}

/// Gateways by downloader profile id, in configuration order.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: Vec<(String, Arc<dyn DownloaderGateway>)>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a gateway for every profile.
    pub fn from_profiles(profiles: &[DownloaderProfile]) -> Result<Self, GatewayError> {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(&profile.id, create_gateway(profile)?);
        }
        Ok(registry)
    }

    /// Add or replace the gateway for `id`.
    pub fn register(&mut self, id: &str, gateway: Arc<dyn DownloaderGateway>) {
        match self.gateways.iter_mut().find(|(existing, _)| existing == id) {
            Some(entry) => entry.1 = gateway,
            None => self.gateways.push((id.to_string(), gateway)),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DownloaderGateway>> {
        self.gateways
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, gateway)| Arc::clone(gateway))
    }

    /// Id of the first registered gateway.
    pub fn default_id(&self) -> Option<&str> {
        self.gateways.first().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.gateways.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}
