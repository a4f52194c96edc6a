// In-memory source of truth for sessions, system instructions and settings.
// Every mutation returns the `Dirty` set of documents the caller must persist.
// Operations on ids that no longer exist are silent no-ops.

use crate::models::{
    now_millis, ChatConfig, Message, Session, Settings, SystemInstruction, Theme, Timestamp,
    DEFAULT_INSTRUCTION_TITLE, DEFAULT_SESSION_TITLE,
};
use crate::storage::DocumentKey;
use std::ops::{BitOr, BitOrAssign};
use uuid::Uuid;

/// Longest provisional title, in characters, before the ellipsis.
pub const PROVISIONAL_TITLE_CHARS: usize = 30;

/// Documents touched by a mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub sessions: bool,
    pub settings: bool,
    pub instructions: bool,
}

impl Dirty {
    pub const NONE: Dirty = Dirty {
        sessions: false,
        settings: false,
        instructions: false,
    };
    pub const SESSIONS: Dirty = Dirty {
        sessions: true,
        ..Dirty::NONE
    };
    pub const SETTINGS: Dirty = Dirty {
        settings: true,
        ..Dirty::NONE
    };
    pub const INSTRUCTIONS: Dirty = Dirty {
        instructions: true,
        ..Dirty::NONE
    };
    pub const ALL: Dirty = Dirty {
        sessions: true,
        settings: true,
        instructions: true,
    };

    pub fn is_empty(&self) -> bool {
        *self == Dirty::NONE
    }

    pub fn keys(&self) -> Vec<DocumentKey> {
        let mut keys = Vec::new();
        if self.sessions {
            keys.push(DocumentKey::Sessions);
        }
        if self.settings {
            keys.push(DocumentKey::Settings);
        }
        if self.instructions {
            keys.push(DocumentKey::Instructions);
        }
        keys
    }
}

impl BitOr for Dirty {
    type Output = Dirty;

    fn bitor(self, rhs: Dirty) -> Dirty {
        Dirty {
            sessions: self.sessions || rhs.sessions,
            settings: self.settings || rhs.settings,
            instructions: self.instructions || rhs.instructions,
        }
    }
}

impl BitOrAssign for Dirty {
    fn bitor_assign(&mut self, rhs: Dirty) {
        *self = *self | rhs;
    }
}

/// Cuts `text` to the provisional-title limit, marking the cut with `...`.
pub fn provisional_title(text: &str) -> String {
    if text.chars().count() > PROVISIONAL_TITLE_CHARS {
        let prefix: String = text.chars().take(PROVISIONAL_TITLE_CHARS).collect();
        format!("{}...", prefix)
    } else {
        text.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    // Most recently created first
    sessions: Vec<Session>,
    active_session_id: Option<Uuid>,
    instructions: Vec<SystemInstruction>,
    settings: Settings,
    last_issued: Timestamp,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the store from persisted documents.
    ///
    /// The remembered active session is restored when it still exists;
    /// otherwise the first session is selected. Without a remembered id
    /// nothing is active.
    pub fn from_documents(
        sessions: Vec<Session>,
        settings: Settings,
        instructions: Vec<SystemInstruction>,
    ) -> Self {
        let active_session_id = settings.last_active_session_id.and_then(|remembered| {
            if sessions.iter().any(|s| s.id == remembered) {
                Some(remembered)
            } else {
                sessions.first().map(|s| s.id)
            }
        });
        let last_issued = sessions.iter().map(|s| s.last_modified).max().unwrap_or(0);

        let mut store = Self {
            sessions,
            active_session_id,
            instructions,
            settings,
            last_issued,
        };
        store.repair_loaded_configs();
        store
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn session(&self, id: Uuid) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_session_id(&self) -> Option<Uuid> {
        self.active_session_id
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.active_session_id.and_then(|id| self.session(id))
    }

    pub fn instructions(&self) -> &[SystemInstruction] {
        &self.instructions
    }

    pub fn instruction(&self, id: Uuid) -> Option<&SystemInstruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    /// Content of the instruction referenced by the session's config, if any.
    pub fn system_instruction_text(&self, session_id: Uuid) -> Option<String> {
        let instruction_id = self.session(session_id)?.config.system_instruction_id?;
        self.instruction(instruction_id).map(|i| i.content.clone())
    }

    /// Settings as persisted, including the current active session.
    pub fn settings(&self) -> Settings {
        Settings {
            last_active_session_id: self.active_session_id,
            ..self.settings.clone()
        }
    }

    // Timestamps handed out by the store strictly increase, so creation and
    // modification order stay observable even within one millisecond.
    fn next_timestamp(&mut self) -> Timestamp {
        let now = now_millis().max(self.last_issued + 1);
        self.last_issued = now;
        now
    }

    fn session_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    // --- Sessions ---

    /// Starts a new session that inherits the active session's configuration.
    pub fn create_session(&mut self) -> (Uuid, Dirty) {
        let config = self
            .active_session()
            .map(|s| s.config.clone())
            .unwrap_or_default();
        let session = Session {
            id: Uuid::new_v4(),
            title: DEFAULT_SESSION_TITLE.to_string(),
            messages: Vec::new(),
            config,
            last_modified: self.next_timestamp(),
        };
        let id = session.id;
        log::info!("Created session {}", id);
        self.sessions.insert(0, session);
        self.active_session_id = Some(id);
        (id, Dirty::SESSIONS | Dirty::SETTINGS)
    }

    pub fn select_session(&mut self, id: Uuid) -> Dirty {
        if self.session(id).is_none() {
            log::debug!("Ignoring selection of unknown session {}", id);
            return Dirty::NONE;
        }
        if self.active_session_id == Some(id) {
            return Dirty::NONE;
        }
        self.active_session_id = Some(id);
        Dirty::SETTINGS
    }

    /// Removes a session. Deleting the active one activates the first remaining session.
    pub fn delete_session(&mut self, id: Uuid) -> Dirty {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != id);
        if self.sessions.len() == before {
            log::debug!("Attempted to delete non-existent session: {}", id);
            return Dirty::NONE;
        }
        log::info!("Deleted session {}", id);

        if self.active_session_id == Some(id) {
            self.active_session_id = self.sessions.first().map(|s| s.id);
            return Dirty::SESSIONS | Dirty::SETTINGS;
        }
        Dirty::SESSIONS
    }

    /// Replaces a session's configuration, correcting an incompatible
    /// reasoning effort and dropping a reference to a missing instruction.
    pub fn update_config(&mut self, id: Uuid, config: ChatConfig) -> Dirty {
        let mut config = config.normalized();
        if let Some(instruction_id) = config.system_instruction_id {
            if self.instruction(instruction_id).is_none() {
                log::warn!(
                    "Session {} referenced unknown instruction {}, clearing",
                    id,
                    instruction_id
                );
                config.system_instruction_id = None;
            }
        }

        let Some(session) = self.session_mut(id) else {
            return Dirty::NONE;
        };
        session.config = config;
        Dirty::SESSIONS
    }

    /// Appends in call order. The first message also sets a provisional title.
    pub fn append_message(&mut self, id: Uuid, message: Message) -> Dirty {
        let now = self.next_timestamp();
        let Some(session) = self.session_mut(id) else {
            log::debug!("Dropping message for missing session {}", id);
            return Dirty::NONE;
        };

        if session.messages.is_empty() {
            if let Some(seed) = message.title_seed() {
                session.title = provisional_title(&seed);
            }
        }
        session.messages.push(message);
        session.last_modified = now;
        Dirty::SESSIONS
    }

    /// Overwrites the title with one produced by the completion service.
    /// Whatever arrives last wins, including over a manual rename.
    pub fn apply_generated_title(&mut self, id: Uuid, title: &str) -> Dirty {
        let title = title.trim();
        if title.is_empty() {
            return Dirty::NONE;
        }
        let Some(session) = self.session_mut(id) else {
            return Dirty::NONE;
        };
        session.title = title.to_string();
        Dirty::SESSIONS
    }

    pub fn rename_session(&mut self, id: Uuid, title: &str) -> Dirty {
        let title = title.trim();
        if title.is_empty() {
            return Dirty::NONE;
        }
        let now = self.next_timestamp();
        let Some(session) = self.session_mut(id) else {
            return Dirty::NONE;
        };
        session.title = title.to_string();
        session.last_modified = now;
        Dirty::SESSIONS
    }

    // --- System instructions ---

    /// Adds an empty instruction, optionally selecting it on the active session.
    pub fn create_instruction(&mut self, assign_to_active: bool) -> (Uuid, Dirty) {
        let instruction = SystemInstruction {
            id: Uuid::new_v4(),
            title: DEFAULT_INSTRUCTION_TITLE.to_string(),
            content: String::new(),
        };
        let id = instruction.id;
        self.instructions.push(instruction);

        let mut dirty = Dirty::INSTRUCTIONS;
        if assign_to_active {
            if let Some(session) = self
                .active_session_id
                .and_then(|active| self.sessions.iter_mut().find(|s| s.id == active))
            {
                session.config.system_instruction_id = Some(id);
                dirty |= Dirty::SESSIONS;
            }
        }
        (id, dirty)
    }

    pub fn update_instruction(&mut self, updated: SystemInstruction) -> Dirty {
        match self.instructions.iter_mut().find(|i| i.id == updated.id) {
            Some(existing) => {
                *existing = updated;
                Dirty::INSTRUCTIONS
            }
            None => Dirty::NONE,
        }
    }

    /// Removes an instruction and clears it from every session referencing it.
    pub fn delete_instruction(&mut self, id: Uuid) -> Dirty {
        let before = self.instructions.len();
        self.instructions.retain(|i| i.id != id);
        if self.instructions.len() == before {
            return Dirty::NONE;
        }

        let mut dirty = Dirty::INSTRUCTIONS;
        for session in &mut self.sessions {
            if session.config.system_instruction_id == Some(id) {
                session.config.system_instruction_id = None;
                dirty |= Dirty::SESSIONS;
            }
        }
        dirty
    }

    // Documents come from disk or a backup bundle, so the config invariants
    // enforced by `update_config` cannot be assumed.
    fn repair_loaded_configs(&mut self) {
        let known: Vec<Uuid> = self.instructions.iter().map(|i| i.id).collect();
        for session in &mut self.sessions {
            if !session.config.reasoning_effort.is_permitted_for(session.config.model) {
                log::warn!(
                    "Session {} loaded with reasoning effort '{}' unsupported by {}",
                    session.id,
                    session.config.reasoning_effort.as_str(),
                    session.config.model.as_str()
                );
                session.config = session.config.clone().normalized();
            }
            if let Some(id) = session.config.system_instruction_id {
                if !known.contains(&id) {
                    session.config.system_instruction_id = None;
                }
            }
        }
    }

    // --- Settings ---

    pub fn set_theme(&mut self, theme: Theme) -> Dirty {
        if self.settings.theme == theme {
            return Dirty::NONE;
        }
        self.settings.theme = theme;
        Dirty::SETTINGS
    }

    pub fn toggle_theme(&mut self) -> Dirty {
        let next = match self.settings.theme {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        };
        self.set_theme(next)
    }

    pub fn set_api_key(&mut self, api_key: &str) -> Dirty {
        if self.settings.api_key == api_key {
            return Dirty::NONE;
        }
        self.settings.api_key = api_key.to_string();
        Dirty::SETTINGS
    }
}
