//! Represents a category — a named grouping files can be filed under.

use serde::{Deserialize, Serialize};

/// Name of the category that must always exist. Files whose category is
/// deleted are reassigned here rather than left dangling.
pub const DEFAULT_CATEGORY_NAME: &str = "默认分类";

/// A file category.
///
/// Categories act as lightweight folders. Exactly one category — identified
/// by [`DEFAULT_CATEGORY_NAME`] — is the designated default and can never be
/// deleted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Category {
    /// Surrogate key.
    pub id: i64,

    /// Unique display name.
    pub name: String,

    /// Creation time as unix seconds.
    pub created_at: i64,
}

impl Category {
    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_CATEGORY_NAME
    }
}
