// Commands exposed to the UI layer

use crate::attachments;
use crate::backup::{self, WorkspaceSnapshot};
use crate::config;
use crate::error::{parse_id, CommandError};
use crate::models::{ChatConfig, Message, Session, Settings, SystemInstruction, Theme};
use crate::session_store::Dirty;
use crate::state::{load_store, AppState};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use uuid::Uuid;

// --- Sessions ---

pub async fn list_sessions(state: &AppState) -> Vec<Session> {
    state.store.lock().await.sessions().to_vec()
}

pub async fn get_session(state: &AppState, session_id: &str) -> Result<Option<Session>, CommandError> {
    let id = parse_id(session_id)?;
    Ok(state.store.lock().await.session(id).cloned())
}

pub async fn active_session_id(state: &AppState) -> Option<Uuid> {
    state.store.lock().await.active_session_id()
}

pub async fn create_session(state: &AppState) -> Result<Session, CommandError> {
    let mut store = state.store.lock().await;
    let (id, dirty) = store.create_session();
    state.persist(&store, dirty);
    store.session(id).cloned().ok_or(CommandError::SessionNotFound(id))
}

pub async fn select_session(state: &AppState, session_id: &str) -> Result<(), CommandError> {
    let id = parse_id(session_id)?;
    let mut store = state.store.lock().await;
    let dirty = store.select_session(id);
    state.persist(&store, dirty);
    Ok(())
}

pub async fn delete_session(state: &AppState, session_id: &str) -> Result<(), CommandError> {
    let id = parse_id(session_id)?;
    log::warn!("[CMD] Deleting session {}", id);
    let mut store = state.store.lock().await;
    let dirty = store.delete_session(id);
    state.persist(&store, dirty);
    if state.tracker.is_processing(id) {
        log::info!("Session {} deleted with a request in flight; its response will be dropped", id);
    }
    Ok(())
}

/// Replaces the session's configuration and returns it as stored, which may
/// differ from the input when the reasoning effort had to be corrected.
pub async fn update_session_config(
    state: &AppState,
    session_id: &str,
    new_config: ChatConfig,
) -> Result<ChatConfig, CommandError> {
    let id = parse_id(session_id)?;
    let mut store = state.store.lock().await;
    let dirty = store.update_config(id, new_config);
    state.persist(&store, dirty);
    store
        .session(id)
        .map(|s| s.config.clone())
        .ok_or(CommandError::SessionNotFound(id))
}

pub async fn rename_session(state: &AppState, session_id: &str, title: &str) -> Result<(), CommandError> {
    let id = parse_id(session_id)?;
    let mut store = state.store.lock().await;
    let dirty = store.rename_session(id, title);
    state.persist(&store, dirty);
    Ok(())
}

// --- Request state ---

/// Loading indicator for the focused session.
pub async fn is_loading(state: &AppState) -> bool {
    match state.store.lock().await.active_session_id() {
        Some(id) => state.tracker.is_processing(id),
        None => false,
    }
}

pub fn is_processing(state: &AppState, session_id: &str) -> Result<bool, CommandError> {
    Ok(state.tracker.is_processing(parse_id(session_id)?))
}

/// Background work started by [`send_message`].
#[derive(Debug)]
pub struct SendHandle {
    pub session_id: Uuid,
    pub user_message: Message,
    pub completion: JoinHandle<()>,
    pub title: Option<JoinHandle<()>>,
}

impl SendHandle {
    /// Waits for the response (and title, if one was requested) to land.
    pub async fn finished(self) {
        if let Err(e) = self.completion.await {
            log::error!("Completion task for session {} failed: {}", self.session_id, e);
        }
        if let Some(title) = self.title {
            if let Err(e) = title.await {
                log::error!("Title task for session {} failed: {}", self.session_id, e);
            }
        }
    }
}

/// Sends a user message and dispatches the completion in the background.
///
/// The response is appended to `session_id` whenever it arrives, no matter
/// which session has focus by then. A failed request is recorded as an
/// `Error: ...` assistant message. A session can have only one request in
/// flight.
pub async fn send_message(
    state: &AppState,
    session_id: &str,
    content: &str,
    attachment_paths: &[PathBuf],
) -> Result<SendHandle, CommandError> {
    let target = parse_id(session_id)?;
    log::info!("Sending message to session {}", target);

    {
        let store = state.store.lock().await;
        if store.session(target).is_none() {
            return Err(CommandError::SessionNotFound(target));
        }
        if state.tracker.is_processing(target) {
            return Err(CommandError::RequestInFlight(target));
        }
    }

    let attachments = attachments::load_attachments(attachment_paths)
        .await
        .map_err(CommandError::Attachment)?;
    let user_message = Message::user(content, attachments);

    // Everything the request needs is captured while the message is appended,
    // so later edits to the session do not leak into this turn.
    let (guard, history, chat_config, instruction, credential, title_seed) = {
        let mut store = state.store.lock().await;
        let session = store
            .session(target)
            .ok_or(CommandError::SessionNotFound(target))?;
        let guard = state
            .tracker
            .try_begin(target)
            .ok_or(CommandError::RequestInFlight(target))?;

        let title_seed = if session.messages.is_empty() {
            user_message.title_seed()
        } else {
            None
        };
        let mut history = session.messages.clone();
        history.push(user_message.clone());
        let chat_config = session.config.clone();
        let instruction = store.system_instruction_text(target);
        let credential = config::resolve_api_key(&store.settings().api_key);

        let dirty = store.append_message(target, user_message.clone());
        state.persist(&store, dirty);
        (guard, history, chat_config, instruction, credential, title_seed)
    };

    let title = title_seed.map(|seed| {
        let state = state.clone();
        let credential = credential.clone();
        tokio::spawn(async move {
            match state.completion.summarize_to_title(&seed, &credential).await {
                Ok(title) => {
                    let mut store = state.store.lock().await;
                    let dirty = store.apply_generated_title(target, &title);
                    state.persist(&store, dirty);
                }
                Err(e) => {
                    log::warn!("Title generation failed for session {}, keeping provisional title: {}", target, e);
                }
            }
        })
    });

    let task_state = state.clone();
    let completion = tokio::spawn(async move {
        // Released on every exit path, including a panic in the service.
        let _guard = guard;

        let reply = match task_state
            .completion
            .complete(&history, &chat_config, &credential, instruction.as_deref())
            .await
        {
            Ok(completion) => Message {
                thinking: completion.thinking,
                thinking_duration: Some(completion.thinking_duration_ms),
                sources: if completion.sources.is_empty() {
                    None
                } else {
                    Some(completion.sources)
                },
                model: Some(chat_config.model),
                reasoning_effort: Some(chat_config.reasoning_effort),
                ..Message::assistant(completion.text)
            },
            Err(e) => {
                log::error!("Completion request for session {} failed: {}", target, e);
                Message::error(e)
            }
        };

        let mut store = task_state.store.lock().await;
        let dirty = store.append_message(target, reply);
        if dirty.is_empty() {
            log::info!("Session {} no longer exists, dropping its response", target);
        }
        task_state.persist(&store, dirty);
    });

    Ok(SendHandle {
        session_id: target,
        user_message,
        completion,
        title,
    })
}

// --- System instructions ---

pub async fn list_instructions(state: &AppState) -> Vec<SystemInstruction> {
    state.store.lock().await.instructions().to_vec()
}

/// Creates an empty instruction; when `assign_to_active` it is also selected
/// on the focused session.
pub async fn create_instruction(
    state: &AppState,
    assign_to_active: bool,
) -> Result<SystemInstruction, CommandError> {
    let mut store = state.store.lock().await;
    let (id, dirty) = store.create_instruction(assign_to_active);
    state.persist(&store, dirty);
    store
        .instruction(id)
        .cloned()
        .ok_or(CommandError::InstructionNotFound(id))
}

pub async fn update_instruction(state: &AppState, instruction: SystemInstruction) {
    let mut store = state.store.lock().await;
    let dirty = store.update_instruction(instruction);
    state.persist(&store, dirty);
}

pub async fn delete_instruction(state: &AppState, instruction_id: &str) -> Result<(), CommandError> {
    let id = parse_id(instruction_id)?;
    let mut store = state.store.lock().await;
    let dirty = store.delete_instruction(id);
    state.persist(&store, dirty);
    Ok(())
}

// --- Settings ---

pub async fn get_settings(state: &AppState) -> Settings {
    state.store.lock().await.settings()
}

pub async fn set_theme(state: &AppState, theme: Theme) {
    let mut store = state.store.lock().await;
    let dirty = store.set_theme(theme);
    state.persist(&store, dirty);
}

pub async fn toggle_theme(state: &AppState) -> Theme {
    let mut store = state.store.lock().await;
    let dirty = store.toggle_theme();
    state.persist(&store, dirty);
    store.settings().theme
}

pub async fn set_api_key(state: &AppState, api_key: &str) {
    let mut store = state.store.lock().await;
    let dirty = store.set_api_key(api_key);
    state.persist(&store, dirty);
}

// --- Backup / restore ---

/// Snapshot of the persisted workspace. Pending debounced writes are flushed
/// first so the bundle reflects what the user currently sees.
pub async fn export_workspace(state: &AppState) -> Result<WorkspaceSnapshot, CommandError> {
    let kv = state.kv().ok_or(CommandError::StorageUnavailable)?;
    state.persistence.flush().await;
    Ok(backup::export(&kv).await)
}

/// Writes the bundle into `dir` under a dated file name and returns its path.
pub async fn export_workspace_to(state: &AppState, dir: &Path) -> Result<PathBuf, CommandError> {
    let snapshot = export_workspace(state).await?;
    let text = backup::to_pretty_json(&snapshot)?;
    let path = dir.join(backup::backup_file_name(chrono::Local::now().date_naive()));
    tokio::fs::write(&path, text).await?;
    log::info!("Workspace exported to {}", path.display());
    Ok(path)
}

/// Replaces the whole workspace with a backup bundle.
///
/// The bundle is validated before anything is touched; a rejected bundle
/// leaves memory and storage unchanged. On success the in-memory store is
/// rebuilt from the restored documents rather than merged.
pub async fn import_workspace(state: &AppState, bundle: &[u8]) -> Result<(), CommandError> {
    let snapshot = backup::parse_bundle(bundle).map_err(|e| {
        log::error!("Rejected workspace import: {}", e);
        e
    })?;
    let kv = state.kv().ok_or(CommandError::StorageUnavailable)?;

    let mut store = state.store.lock().await;
    let writes = state.persistence.exclusive().await;
    let restored = backup::restore(&kv, &snapshot).await;
    drop(writes);
    if let Err(e) = restored {
        // Nothing was applied; put back the writes that were just cancelled.
        state.persist(&store, Dirty::ALL);
        return Err(e.into());
    }
    *store = load_store(&kv).await;
    log::info!("Workspace restored from backup taken at {}", snapshot.timestamp);
    Ok(())
}

pub async fn import_workspace_from(state: &AppState, path: &Path) -> Result<(), CommandError> {
    let bundle = tokio::fs::read(path).await?;
    import_workspace(state, &bundle).await
}
