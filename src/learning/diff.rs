//! Before/after edit capture for the learning engine.
//!
//! A `CodeDiff` records an accepted correction to previously emitted
//! output. The line-level change descriptors are derived once at
//! construction with a real diff algorithm rather than naive zip, so
//! insertions do not shift every following line into a false change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use similar::{DiffOp, TextDiff};

/// A single line-level change descriptor.
///
/// Line numbers are 1-based and refer to the side the content came from
/// (before for removals, after for additions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum LineChange {
    Added {
        line: usize,
        content: String,
    },
    Removed {
        line: usize,
        content: String,
    },
    Replaced {
        line: usize,
        before: String,
        after: String,
    },
}

/// An accepted before/after edit to a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeDiff {
    /// Identifier of the edited file.
    pub file: String,
    /// Full text before the edit.
    pub before: String,
    /// Full text after the edit.
    pub after: String,
    /// Derived line-level change descriptors.
    pub changes: Vec<LineChange>,
    /// When the edit was captured.
    pub timestamp: DateTime<Utc>,
    /// Who made the edit.
    pub author: String,
}

impl CodeDiff {
    /// Capture an edit, deriving its line-level changes.
    pub fn new(file: &str, before: &str, after: &str, author: &str) -> Self {
        Self {
            file: file.to_string(),
            before: before.to_string(),
            after: after.to_string(),
            changes: line_changes(before, after),
            timestamp: Utc::now(),
            author: author.to_string(),
        }
    }
}

/// Derive line-level change descriptors from two texts.
pub fn line_changes(before: &str, after: &str) -> Vec<LineChange> {
    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let diff = TextDiff::from_lines(before, after);

    let mut changes = Vec::new();
    for op in diff.ops() {
        match *op {
            DiffOp::Equal { .. } => {}
            DiffOp::Delete {
                old_index, old_len, ..
            } => {
                for i in 0..old_len {
                    changes.push(LineChange::Removed {
                        line: old_index + i + 1,
                        content: before_lines[old_index + i].to_string(),
                    });
                }
            }
            DiffOp::Insert {
                new_index, new_len, ..
            } => {
                for i in 0..new_len {
                    changes.push(LineChange::Added {
                        line: new_index + i + 1,
                        content: after_lines[new_index + i].to_string(),
                    });
                }
            }
            DiffOp::Replace {
                old_index,
                old_len,
                new_index,
                new_len,
            } => {
                let paired = old_len.min(new_len);
                for i in 0..paired {
                    changes.push(LineChange::Replaced {
                        line: old_index + i + 1,
                        before: before_lines[old_index + i].to_string(),
                        after: after_lines[new_index + i].to_string(),
                    });
                }
                for i in paired..old_len {
                    changes.push(LineChange::Removed {
                        line: old_index + i + 1,
                        content: before_lines[old_index + i].to_string(),
                    });
                }
                for i in paired..new_len {
                    changes.push(LineChange::Added {
                        line: new_index + i + 1,
                        content: after_lines[new_index + i].to_string(),
                    });
                }
            }
        }
    }
    changes
}
