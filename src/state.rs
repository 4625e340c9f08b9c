//! Application state management

use std::sync::Arc;

use crate::attachments::AttachmentStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    attachments: AttachmentStore,
}

impl AppState {
    pub fn new(attachments: AttachmentStore) -> Self {
        Self {
            inner: Arc::new(AppStateInner { attachments }),
        }
    }

    /// Get the attachment store
    pub fn attachments(&self) -> &AttachmentStore {
        &self.inner.attachments
    }
}
