//! Mock downloader gateway for testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::downloader::{
    AddTorrentRequest, DownloaderGateway, GatewayError, StatusFilter, TorrentView,
};

/// A recorded add_torrent call for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAdd {
    /// The request that was made.
    pub request: AddTorrentRequest,
    /// Id the mock assigned.
    pub id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct GatewayState {
    torrents: Vec<TorrentView>,
    added: Vec<RecordedAdd>,
    started: Vec<String>,
    stopped: Vec<String>,
    deletes: Vec<(Vec<String>, bool)>,
    failing_cohorts: HashSet<StatusFilter>,
    downloading_count: Option<usize>,
    count_unavailable: bool,
    next_add_error: Option<String>,
    next_delete_error: Option<String>,
    list_calls: usize,
    counter: u32,
}

/// Mock implementation of the DownloaderGateway trait.
///
/// Added torrents become visible to later status queries as downloading
/// torrents, so acquisition and lifecycle cycles can share one mock.
///
/// # Example
///
/// ```rust,ignore
/// let gateway = MockGateway::new();
/// gateway.add_mock_torrent(fixtures::seeding_torrent("abc", 31 * 24));
/// gateway.set_cohort_error(StatusFilter::Completed, true);
///
/// let query = gateway.get_torrents(&ids, StatusFilter::Completed).await;
/// assert!(query.has_error);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<GatewayState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-populate a torrent for status queries.
    pub fn add_mock_torrent(&self, view: TorrentView) {
        let mut state = self.state();
        state.torrents.retain(|t| t.id != view.id);
        state.torrents.push(view);
    }

    /// Forget a torrent, as if it was removed by hand.
    pub fn remove_mock_torrent(&self, id: &str) {
        self.state().torrents.retain(|t| t.id != id);
    }

    /// Make status queries for `cohort` fail (or succeed again).
    pub fn set_cohort_error(&self, cohort: StatusFilter, failing: bool) {
        let mut state = self.state();
        if failing {
            state.failing_cohorts.insert(cohort);
        } else {
            state.failing_cohorts.remove(&cohort);
        }
    }

    /// Override the downloading count. By default it is the number of
    /// known torrents below 100%.
    pub fn set_downloading_count(&self, count: usize) {
        self.state().downloading_count = Some(count);
    }

    /// Make the downloading count query fail.
    pub fn set_count_unavailable(&self, unavailable: bool) {
        self.state().count_unavailable = unavailable;
    }

    /// Configure the next add_torrent call to fail.
    pub fn set_next_add_error(&self, message: &str) {
        self.state().next_add_error = Some(message.to_string());
    }

    /// Configure the next delete_torrents call to fail.
    pub fn set_next_delete_error(&self, message: &str) {
        self.state().next_delete_error = Some(message.to_string());
    }

    pub fn added(&self) -> Vec<RecordedAdd> {
        self.state().added.clone()
    }

    pub fn add_count(&self) -> usize {
        self.state().added.len()
    }

    pub fn started(&self) -> Vec<String> {
        self.state().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    /// Every delete_torrents call with its delete_files flag.
    pub fn delete_calls(&self) -> Vec<(Vec<String>, bool)> {
        self.state().deletes.clone()
    }

    /// All ids passed to delete_torrents.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.state()
            .deletes
            .iter()
            .flat_map(|(ids, _)| ids.iter().cloned())
            .collect()
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn torrent_ids(&self) -> Vec<String> {
        self.state().torrents.iter().map(|t| t.id.clone()).collect()
    }
}

#[async_trait]
impl DownloaderGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_torrents(
        &self,
        ids: &[String],
        filter: StatusFilter,
    ) -> Result<Vec<TorrentView>, GatewayError> {
        let mut state = self.state();
        state.list_calls += 1;
        if state.failing_cohorts.contains(&filter) {
            return Err(GatewayError::ConnectionFailed(format!(
                "{} query failed",
                filter.as_str()
            )));
        }
        Ok(state
            .torrents
            .iter()
            .filter(|t| ids.contains(&t.id) && filter.admits(t.progress_pct))
            .cloned()
            .collect())
    }

    async fn add_torrent(
        &self,
        request: AddTorrentRequest,
    ) -> Result<Option<String>, GatewayError> {
        let mut state = self.state();
        if let Some(message) = state.next_add_error.take() {
            return Err(GatewayError::ApiError(message));
        }

        state.counter += 1;
        let id = format!("mockhash{:08x}", state.counter);
        let now = Utc::now();
        state.torrents.push(TorrentView {
            id: id.clone(),
            name: request.content_ref.clone(),
            added_at: Some(now),
            completed_at: None,
            uploaded_bytes: 0,
            downloaded_bytes: 0,
            ratio: 0.0,
            total_size: 0,
            progress_pct: 0.0,
        });
        state.added.push(RecordedAdd {
            request,
            id: id.clone(),
            timestamp: now,
        });
        Ok(Some(id))
    }

    async fn start_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.state().started.extend_from_slice(ids);
        Ok(())
    }

    async fn stop_torrents(&self, ids: &[String]) -> Result<(), GatewayError> {
        self.state().stopped.extend_from_slice(ids);
        Ok(())
    }

    async fn delete_torrents(&self, ids: &[String], delete_files: bool) -> Result<(), GatewayError> {
        let mut state = self.state();
        if let Some(message) = state.next_delete_error.take() {
            return Err(GatewayError::ApiError(message));
        }
        state.torrents.retain(|t| !ids.contains(&t.id));
        state.deletes.push((ids.to_vec(), delete_files));
        Ok(())
    }

    async fn downloading_count(&self) -> Result<usize, GatewayError> {
        let state = self.state();
        if state.count_unavailable {
            return Err(GatewayError::Timeout);
        }
        Ok(state.downloading_count.unwrap_or_else(|| {
            state
                .torrents
                .iter()
                .filter(|t| StatusFilter::Downloading.admits(t.progress_pct))
                .count()
        }))
    }
}
