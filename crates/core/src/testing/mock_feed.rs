//! Mock feed client for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::feed::{FeedClient, FeedError, FeedItem};

#[derive(Debug, Default)]
struct FeedState {
    items: HashMap<String, Vec<FeedItem>>,
    failing: HashSet<String>,
    fetches: Vec<String>,
}

/// Mock implementation of the FeedClient trait.
///
/// Returns the configured items for a url; unknown urls yield an empty feed.
#[derive(Debug, Clone, Default)]
pub struct MockFeedClient {
    state: Arc<Mutex<FeedState>>,
}

impl MockFeedClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_items(&self, url: &str, items: Vec<FeedItem>) {
        self.state().items.insert(url.to_string(), items);
    }

    /// Make fetches of `url` fail.
    pub fn set_failing(&self, url: &str) {
        self.state().failing.insert(url.to_string());
    }

    /// Urls fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.state().fetches.clone()
    }
}

#[async_trait]
impl FeedClient for MockFeedClient {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, FeedError> {
        let mut state = self.state();
        state.fetches.push(url.to_string());
        if state.failing.contains(url) {
            return Err(FeedError::Http(format!("{} unreachable", url)));
        }
        Ok(state.items.get(url).cloned().unwrap_or_default())
    }
}
