use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Post,
    Comment,
}

/// Something a user can upvote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteTarget {
    pub kind: TargetKind,
    pub id: i64,
}

impl VoteTarget {
    pub fn post(id: i64) -> Self {
        Self {
            kind: TargetKind::Post,
            id,
        }
    }

    pub fn comment(id: i64) -> Self {
        Self {
            kind: TargetKind::Comment,
            id,
        }
    }
}

/// Authoritative result of a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOutcome {
    /// Points after the toggle committed.
    pub count: i32,
    pub is_upvoted: bool,
}
