//! Changeset record tagging

use super::feature::{Feature, FieldValue};
use std::fmt;

/// Synthetic column carrying the change tag of a changeset record.
pub const CHANGE_TAG_COLUMN: &str = "__change__";

/// Kind of change a changeset record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Classifies a raw tag.
    ///
    /// `DELETE` matches in any case while `INSERT` and `UPDATE` must match
    /// exactly. The two rules are inconsistent and are kept that way on
    /// purpose.
    pub fn classify(tag: &str) -> Option<ChangeKind> {
        if tag.eq_ignore_ascii_case("delete") {
            Some(ChangeKind::Delete)
        } else if tag == "INSERT" {
            Some(ChangeKind::Insert)
        } else if tag == "UPDATE" {
            Some(ChangeKind::Update)
        } else {
            None
        }
    }

    /// Tag of a feature, if it carries a recognised one
    pub fn of(feature: &Feature) -> Option<ChangeKind> {
        match feature.get(CHANGE_TAG_COLUMN) {
            Some(FieldValue::Text(tag)) => ChangeKind::classify(tag),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
