//! Trigger events.
//!
//! An event is the immutable input to a workflow run: a single git ref,
//! either a branch or a tag. Exactly one run owns a given event.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    Branch,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub ref_name: String,
    pub kind: RefKind,
}

impl Event {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            ref_name: name.into(),
            kind: RefKind::Branch,
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            ref_name: name.into(),
            kind: RefKind::Tag,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.kind == RefKind::Branch
    }

    pub fn is_tag(&self) -> bool {
        self.kind == RefKind::Tag
    }
}
