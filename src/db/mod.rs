//! On-device durable storage.

pub mod local;

pub use local::{DurableStore, FileStore, MemoryStore};

/// Storage key names as constants.
pub mod keys {
    /// Serialized authentication session.
    pub const SESSION: &str = "lingua_session_v1";
    /// Serialized progress document for the local backend.
    pub const PROGRESS: &str = "lingua_progress_v1";

    /// Local mirror of a remote user's progress document.
    pub fn progress_mirror(user_id: &str) -> String {
        format!("{PROGRESS}.{user_id}")
    }
}
