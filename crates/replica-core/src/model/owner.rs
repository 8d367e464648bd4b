//! Target owners of a copied pipeline.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Concrete owner a copy is produced for. Exactly one kind is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetOwner {
    /// A single user.
    User(Uuid),
    /// A group of users.
    Group(i64),
}

impl TargetOwner {
    /// Stable key used for the one-active-copy-per-owner guard.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::User(id) => format!("user:{id}"),
            Self::Group(id) => format!("group:{id}"),
        }
    }

    /// User id when the owner is a user.
    #[must_use]
    pub const fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User(id) => Some(*id),
            Self::Group(_) => None,
        }
    }

    /// Group id when the owner is a group.
    #[must_use]
    pub const fn group_id(&self) -> Option<i64> {
        match self {
            Self::User(_) => None,
            Self::Group(id) => Some(*id),
        }
    }

    /// Rebuild an owner from the pair of nullable storage columns.
    #[must_use]
    pub const fn from_columns(user_id: Option<Uuid>, group_id: Option<i64>) -> Option<Self> {
        match (user_id, group_id) {
            (Some(user), None) => Some(Self::User(user)),
            (None, Some(group)) => Some(Self::Group(group)),
            _ => None,
        }
    }
}

impl Display for TargetOwner {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.key())
    }
}

/// Owner as named by the caller, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerRequest {
    /// Target user by username.
    Username(String),
    /// Target group by id.
    Group(i64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_require_exactly_one_owner() {
        let user = Uuid::new_v4();
        assert_eq!(
            TargetOwner::from_columns(Some(user), None),
            Some(TargetOwner::User(user))
        );
        assert_eq!(
            TargetOwner::from_columns(None, Some(4)),
            Some(TargetOwner::Group(4))
        );
        assert_eq!(TargetOwner::from_columns(Some(user), Some(4)), None);
        assert_eq!(TargetOwner::from_columns(None, None), None);
    }

    #[test]
    fn keys_distinguish_kinds() {
        let group = TargetOwner::Group(12);
        assert_eq!(group.key(), "group:12");
        assert_eq!(group.group_id(), Some(12));
        assert!(group.user_id().is_none());
        let user = TargetOwner::User(Uuid::nil());
        assert_eq!(user.to_string(), format!("user:{}", Uuid::nil()));
    }
}
