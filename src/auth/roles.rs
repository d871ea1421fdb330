//! User roles and the trusted actor passed into every mutation

use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::CivicError;

/// Role of the calling user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Resident - reports issues, comments, votes
    #[default]
    User,
    /// Municipal authority - moderates issue status, posts notices
    Authority,
    /// Administrator
    Admin,
}

impl Role {
    /// Whether this role may create, edit, or delete notices
    pub fn can_publish_notices(self) -> bool {
        matches!(self, Role::Authority | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Authority => write!(f, "authority"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for Role {
    type Err = CivicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "authority" => Ok(Role::Authority),
            "admin" => Ok(Role::Admin),
            other => Err(CivicError::Validation(format!("Unknown role: {}", other))),
        }
    }
}

/// Verified caller identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ObjectId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: ObjectId, role: Role) -> Self {
        Self { id, role }
    }

    pub fn user(id: ObjectId) -> Self {
        Self::new(id, Role::User)
    }

    pub fn authority(id: ObjectId) -> Self {
        Self::new(id, Role::Authority)
    }

    pub fn admin(id: ObjectId) -> Self {
        Self::new(id, Role::Admin)
    }
}
