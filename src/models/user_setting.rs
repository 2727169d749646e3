//! Per-owner preferences and pending-interaction state.

use crate::models::file::StorageKind;
use serde::{Deserialize, Serialize};

/// Settings row for one owner key, created lazily on first contact and
/// soft-reset (never deleted) afterwards.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserSetting {
    /// Owner key (unique).
    pub chat_id: String,

    /// Preferred storage backend for new uploads.
    pub storage: StorageKind,

    /// Currently active category, `None` meaning the default.
    pub category_id: Option<i64>,

    /// Pending-input tag when a conversation is waiting on the owner
    /// (e.g. `"new_suffix"`), `None` when idle.
    pub waiting_for: Option<String>,

    /// File the pending input applies to, if any.
    pub editing_file_id: Option<i64>,
}

impl UserSetting {
    pub fn idle(chat_id: impl Into<String>, storage: StorageKind) -> Self {
        Self {
            chat_id: chat_id.into(),
            storage,
            category_id: None,
            waiting_for: None,
            editing_file_id: None,
        }
    }

    /// Clear the two-slot interaction state back to idle.
    pub fn reset_interaction(&mut self) {
        self.waiting_for = None;
        self.editing_file_id = None;
    }
}
