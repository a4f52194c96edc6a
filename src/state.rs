use crate::completion::CompletionService;
use crate::config::AppConfig;
use crate::models::{Session, Settings, SystemInstruction};
use crate::persistence::PersistenceScheduler;
use crate::request_tracker::RequestTracker;
use crate::session_store::{Dirty, SessionStore};
use crate::storage::{negotiate_backend, DocumentKey, KeyValueStore};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::Mutex;

// Core application state shared by every command and background task
#[derive(Clone)]
pub struct AppState {
    // Every mutation goes through this lock, which serializes them the way a
    // UI event loop would. It is never held across a completion call.
    pub store: Arc<Mutex<SessionStore>>,
    pub completion: Arc<dyn CompletionService>,
    pub tracker: RequestTracker,
    pub persistence: PersistenceScheduler,
    pub config: AppConfig,
}

impl AppState {
    /// Creates the state with an empty store. Nothing is persisted until
    /// [`AppState::initialize`] has attached storage.
    pub fn new(config: AppConfig, completion: Arc<dyn CompletionService>) -> Self {
        Self {
            store: Arc::new(Mutex::new(SessionStore::new())),
            completion,
            tracker: RequestTracker::new(),
            persistence: PersistenceScheduler::new(config.debounce),
            config,
        }
    }

    /// Negotiates the storage backend, attaches it and loads the workspace.
    pub async fn initialize(&self) -> Result<(), anyhow::Error> {
        let backend = negotiate_backend(&self.config.storage_config())
            .await
            .context("Failed to initialize workspace storage")?;
        let kv = Arc::new(KeyValueStore::new(backend));
        self.persistence.attach(kv.clone());

        let loaded = load_store(&kv).await;
        log::info!(
            "Workspace loaded: {} sessions, {} instructions ({:?} backend)",
            loaded.sessions().len(),
            loaded.instructions().len(),
            kv.backend_kind()
        );
        *self.store.lock().await = loaded;
        Ok(())
    }

    pub async fn open(
        config: AppConfig,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self, anyhow::Error> {
        let state = Self::new(config, completion);
        state.initialize().await?;
        Ok(state)
    }

    pub fn kv(&self) -> Option<Arc<KeyValueStore>> {
        self.persistence.store()
    }

    /// Schedules a write of every document in `dirty`, snapshotting the
    /// store now. Call while holding the store lock so writes are queued in
    /// mutation order.
    pub fn persist(&self, store: &SessionStore, dirty: Dirty) {
        for key in dirty.keys() {
            match key {
                DocumentKey::Sessions => {
                    let sessions: Vec<Session> = store.sessions().to_vec();
                    self.persistence
                        .schedule(key, move || Ok(serde_json::to_value(sessions)?));
                }
                DocumentKey::Settings => {
                    let settings: Settings = store.settings();
                    self.persistence
                        .schedule(key, move || Ok(serde_json::to_value(settings)?));
                }
                DocumentKey::Instructions => {
                    let instructions: Vec<SystemInstruction> = store.instructions().to_vec();
                    self.persistence
                        .schedule(key, move || Ok(serde_json::to_value(instructions)?));
                }
            }
        }
    }

    /// Writes out anything still waiting on a debounce timer.
    pub async fn shutdown(&self) {
        self.persistence.flush().await;
    }
}

/// Builds a store from the persisted documents; anything absent takes defaults.
pub async fn load_store(kv: &KeyValueStore) -> SessionStore {
    let sessions = kv
        .read_as::<Vec<Session>>(DocumentKey::Sessions.name())
        .await
        .unwrap_or_default();
    let settings = kv
        .read_as::<Settings>(DocumentKey::Settings.name())
        .await
        .unwrap_or_default();
    let instructions = kv
        .read_as::<Vec<SystemInstruction>>(DocumentKey::Instructions.name())
        .await
        .unwrap_or_default();
    SessionStore::from_documents(sessions, settings, instructions)
}
