//! Mock media resolver for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collaborators::{LibraryReport, MediaInfo, MediaResolver, ResolverError};

#[derive(Debug, Default)]
struct ResolverState {
    media: HashMap<String, MediaInfo>,
    library: HashMap<String, LibraryReport>,
    library_error: Option<String>,
    library_lookups: usize,
}

/// Mock implementation of the MediaResolver trait.
///
/// Resolves only the release titles it was given, and reports library
/// contents by canonical title.
#[derive(Debug, Clone, Default)]
pub struct MockMediaResolver {
    state: Arc<Mutex<ResolverState>>,
}

impl MockMediaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_media(&self, raw_title: &str, media: MediaInfo) {
        self.state().media.insert(raw_title.to_string(), media);
    }

    pub fn set_library(&self, title: &str, report: LibraryReport) {
        self.state().library.insert(title.to_string(), report);
    }

    /// Make every library lookup fail.
    pub fn set_library_error(&self, message: &str) {
        self.state().library_error = Some(message.to_string());
    }

    pub fn library_lookups(&self) -> usize {
        self.state().library_lookups
    }
}

#[async_trait]
impl MediaResolver for MockMediaResolver {
    async fn resolve(
        &self,
        title: &str,
        _subtitle: Option<&str>,
    ) -> Result<Option<MediaInfo>, ResolverError> {
        Ok(self.state().media.get(title).cloned())
    }

    async fn library_report(
        &self,
        media: &MediaInfo,
        _season: Option<u32>,
    ) -> Result<Option<LibraryReport>, ResolverError> {
        let mut state = self.state();
        state.library_lookups += 1;
        if let Some(message) = &state.library_error {
            return Err(ResolverError::LibraryUnavailable(message.clone()));
        }
        Ok(state.library.get(&media.title).cloned())
    }
}
