use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Milliseconds since the Unix epoch, the unit used by every persisted timestamp.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
pub const DEFAULT_INSTRUCTION_TITLE: &str = "Untitled instruction";

// Who authored a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

// A file attached to a user message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    // Inlined payload: a base64 data URL for images, absent for other files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

// A citation returned alongside a response
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub url: String,
}

// Represents a single message in a session. Never edited once appended.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_duration: Option<u64>, // milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: now_millis(),
            attachments: if attachments.is_empty() {
                None
            } else {
                Some(attachments)
            },
            thinking: None,
            thinking_duration: None,
            sources: None,
            model: None,
            reasoning_effort: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: now_millis(),
            attachments: None,
            thinking: None,
            thinking_duration: None,
            sources: None,
            model: None,
            reasoning_effort: None,
        }
    }

    /// Synthetic assistant message standing in for a failed completion.
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::assistant(format!("Error: {}", reason))
    }

    /// Text used to name a session after its first message.
    pub fn title_seed(&self) -> Option<String> {
        if !self.content.is_empty() {
            return Some(self.content.clone());
        }
        self.attachments
            .as_ref()
            .and_then(|list| list.first())
            .map(|first| format!("File analysis of {}", first.name))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelId {
    #[serde(rename = "gpt-5.2")]
    Gpt52,
    #[serde(rename = "gpt-5-mini")]
    Gpt5Mini,
    #[serde(rename = "gpt-5-nano")]
    Gpt5Nano,
    #[serde(rename = "o3")]
    O3,
}

/// Groups models that accept the same reasoning-effort values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFamily {
    Flagship,
    Compact,
    OSeries,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    None,
    Minimal,
    Low,
    Medium,
    High,
    XHigh,
}

const FLAGSHIP_EFFORTS: &[ReasoningEffort] = &[
    ReasoningEffort::None,
    ReasoningEffort::Low,
    ReasoningEffort::Medium,
    ReasoningEffort::High,
    ReasoningEffort::XHigh,
];
const COMPACT_EFFORTS: &[ReasoningEffort] = &[
    ReasoningEffort::Minimal,
    ReasoningEffort::Low,
    ReasoningEffort::Medium,
    ReasoningEffort::High,
];
const O_SERIES_EFFORTS: &[ReasoningEffort] = &[
    ReasoningEffort::Low,
    ReasoningEffort::Medium,
    ReasoningEffort::High,
];

impl ModelId {
    pub const ALL: [ModelId; 4] = [
        ModelId::Gpt52,
        ModelId::Gpt5Mini,
        ModelId::Gpt5Nano,
        ModelId::O3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gpt52 => "gpt-5.2",
            ModelId::Gpt5Mini => "gpt-5-mini",
            ModelId::Gpt5Nano => "gpt-5-nano",
            ModelId::O3 => "o3",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelId::Gpt52 => "GPT-5.2 (Flagship)",
            ModelId::Gpt5Mini => "GPT-5 Mini",
            ModelId::Gpt5Nano => "GPT-5 Nano",
            ModelId::O3 => "o3",
        }
    }

    pub fn family(&self) -> ModelFamily {
        match self {
            ModelId::Gpt52 => ModelFamily::Flagship,
            ModelId::Gpt5Mini | ModelId::Gpt5Nano => ModelFamily::Compact,
            ModelId::O3 => ModelFamily::OSeries,
        }
    }

    pub fn permitted_efforts(&self) -> &'static [ReasoningEffort] {
        self.family().permitted_efforts()
    }

    // o3 ignores the verbosity setting
    pub fn supports_verbosity(&self) -> bool {
        self.family() != ModelFamily::OSeries
    }
}

impl ModelFamily {
    pub fn permitted_efforts(&self) -> &'static [ReasoningEffort] {
        match self {
            ModelFamily::Flagship => FLAGSHIP_EFFORTS,
            ModelFamily::Compact => COMPACT_EFFORTS,
            ModelFamily::OSeries => O_SERIES_EFFORTS,
        }
    }
}

impl ReasoningEffort {
    /// Accepted by every model family.
    pub const FALLBACK: ReasoningEffort = ReasoningEffort::Medium;

    pub fn is_permitted_for(&self, model: ModelId) -> bool {
        model.permitted_efforts().contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::None => "none",
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::XHigh => "xhigh",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TextVerbosity {
    Low,
    Medium,
    High,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolToggles {
    pub web_search: bool,
    pub code_interpreter: bool,
}

// Per-session model configuration
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    pub model: ModelId,
    pub reasoning_effort: ReasoningEffort,
    pub text_verbosity: TextVerbosity,
    pub tools: ToolToggles,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction_id: Option<Uuid>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: ModelId::Gpt52,
            reasoning_effort: ReasoningEffort::Medium,
            text_verbosity: TextVerbosity::Medium,
            tools: ToolToggles {
                web_search: true,
                code_interpreter: false,
            },
            system_instruction_id: None,
        }
    }
}

impl ChatConfig {
    /// Resets the reasoning effort when the selected model does not accept it.
    pub fn normalized(mut self) -> Self {
        if !self.reasoning_effort.is_permitted_for(self.model) {
            log::debug!(
                "Reasoning effort '{}' not supported by {}, resetting to '{}'",
                self.reasoning_effort.as_str(),
                self.model.as_str(),
                ReasoningEffort::FALLBACK.as_str()
            );
            self.reasoning_effort = ReasoningEffort::FALLBACK;
        }
        self
    }

    pub fn with_model(self, model: ModelId) -> Self {
        Self { model, ..self }.normalized()
    }
}

// One conversation thread
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    pub config: ChatConfig,
    pub last_modified: Timestamp,
}

// A named, reusable system prompt
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SystemInstruction {
    pub id: Uuid,
    pub title: String,
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

// User preferences persisted in the settings document
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub theme: Theme,
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_session_id: Option<Uuid>,
}
