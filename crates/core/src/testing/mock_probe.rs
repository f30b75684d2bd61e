//! Mock site probe for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collaborators::{ProbeError, SiteProbe, TorrentAttributes};

#[derive(Debug, Default)]
struct ProbeState {
    default: TorrentAttributes,
    by_url: HashMap<String, TorrentAttributes>,
    next_error: Option<String>,
    probes: Vec<(String, Option<String>)>,
}

/// Mock implementation of the SiteProbe trait.
///
/// Answers with per-url attributes when configured, otherwise with the
/// default attributes (a plain, unpromoted torrent unless changed).
#[derive(Debug, Clone, Default)]
pub struct MockSiteProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl MockSiteProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attributes returned for every url without its own entry.
    pub fn set_attributes(&self, attributes: TorrentAttributes) {
        self.state().default = attributes;
    }

    pub fn set_attributes_for(&self, detail_url: &str, attributes: TorrentAttributes) {
        self.state()
            .by_url
            .insert(detail_url.to_string(), attributes);
    }

    /// Configure the next probe to fail.
    pub fn set_next_error(&self, message: &str) {
        self.state().next_error = Some(message.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.state().probes.len()
    }

    /// Cookies sent with each probe, in order.
    pub fn cookies(&self) -> Vec<Option<String>> {
        self.state().probes.iter().map(|(_, c)| c.clone()).collect()
    }
}

#[async_trait]
impl SiteProbe for MockSiteProbe {
    async fn probe(
        &self,
        detail_url: &str,
        cookie: Option<&str>,
    ) -> Result<TorrentAttributes, ProbeError> {
        let mut state = self.state();
        state
            .probes
            .push((detail_url.to_string(), cookie.map(str::to_string)));
        if let Some(message) = state.next_error.take() {
            return Err(ProbeError::Request(message));
        }
        Ok(state
            .by_url
            .get(detail_url)
            .copied()
            .unwrap_or(state.default))
    }
}
