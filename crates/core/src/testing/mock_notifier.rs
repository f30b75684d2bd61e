//! Recording notifier for testing.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::collaborators::{Notifier, NotifyError};

/// Notifier that keeps every message instead of sending it.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn messages_mut(&self) -> MutexGuard<'_, Vec<(String, String)>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorded (title, body) pairs.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages_mut().clone()
    }

    pub fn count(&self) -> usize {
        self.messages_mut().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        self.messages_mut()
            .push((title.to_string(), body.to_string()));
        Ok(())
    }
}
