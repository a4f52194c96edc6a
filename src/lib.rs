// Workspace core for a multi-session chat client: sessions, system
// instructions and settings, persisted with a debounced write-behind and
// backed up as a single JSON bundle.

// Declare the modules
pub mod attachments;
pub mod backup;
pub mod commands;
pub mod completion;
pub mod config;
pub mod error;
pub mod models;
pub mod persistence;
pub mod request_tracker;
pub mod session_store;
pub mod state;
pub mod storage;

pub use completion::{Completion, CompletionError, CompletionService, OfflineCompletionService};
pub use config::AppConfig;
pub use error::CommandError;
pub use state::AppState;
