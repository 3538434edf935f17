//! Explicit per-tab context: identity and the in-flight task id.

use std::sync::{Arc, OnceLock};

use solasola_core::types::{ClientId, TaskId};

use crate::store::{SessionStore, StoreError};

const CLIENT_ID_KEY: &str = "clientId";
const TASK_ID_KEY: &str = "currentTaskId";

/// Identity and resumable state of one tab.
///
/// Cloning is cheap; clones share the same store and identity.
#[derive(Clone)]
pub struct TabContext {
    store: Arc<dyn SessionStore>,
    client_id: Arc<OnceLock<ClientId>>,
}

impl TabContext {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            client_id: Arc::new(OnceLock::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// The tab's identity, generated (UUID v4) and persisted on first use.
    ///
    /// A storage failure still yields a usable identity for this process.
    pub fn client_id(&self) -> ClientId {
        self.client_id
            .get_or_init(|| match self.store.get(CLIENT_ID_KEY) {
                Ok(Some(id)) if !id.trim().is_empty() => id,
                Ok(_) => {
                    let id = uuid::Uuid::new_v4().to_string();
                    if let Err(e) = self.store.set(CLIENT_ID_KEY, &id) {
                        tracing::warn!(error = %e, "Failed to persist client id");
                    }
                    tracing::debug!(client_id = %id, "Generated tab identity");
                    id
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read client id");
                    uuid::Uuid::new_v4().to_string()
                }
            })
            .clone()
    }

    /// Task id left behind by a previous load of this tab, if any.
    pub fn load_task_id(&self) -> Result<Option<TaskId>, StoreError> {
        Ok(self
            .store
            .get(TASK_ID_KEY)?
            .filter(|id| !id.trim().is_empty()))
    }

    pub fn persist_task_id(&self, task_id: &str) -> Result<(), StoreError> {
        self.store.set(TASK_ID_KEY, task_id)
    }

    pub fn clear_task_id(&self) -> Result<(), StoreError> {
        self.store.remove(TASK_ID_KEY)
    }
}

impl std::fmt::Debug for TabContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabContext")
            .field("client_id", &self.client_id.get())
            .finish_non_exhaustive()
    }
}
