//! The principal on whose behalf an operation runs.

use common::UserId;
use serde::{Deserialize, Serialize};

/// Role granted to an authenticated account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// A shopper; may act on their own cart and orders only.
    #[default]
    Customer,
    /// Back-office operator; may read any order and change its status.
    Admin,
}

impl Role {
    /// Returns the role name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An authenticated caller.
///
/// Authentication itself happens upstream; the pipeline only consumes the
/// resulting identity and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    /// Creates an actor with the customer role.
    pub fn customer(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    /// Creates an actor with the operator (admin) role.
    pub fn admin(user_id: UserId) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Returns true if the actor holds operator privilege.
    pub fn is_operator(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    /// Returns true if the actor may read resources owned by `owner`.
    pub fn can_access(&self, owner: UserId) -> bool {
        self.is_operator() || self.user_id == owner
    }
}
