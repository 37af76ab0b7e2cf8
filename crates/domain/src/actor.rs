//! The authenticated caller of an order operation.

use common::UserId;
use serde::{Deserialize, Serialize};

/// Marketplace role of an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Buyer,
    Seller,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buyer" | "user" => Ok(Role::Buyer),
            "seller" => Ok(Role::Seller),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// An already-authenticated identity. The order core trusts it as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn buyer(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Buyer,
        }
    }

    pub fn seller(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Seller,
        }
    }

    pub fn is_seller(&self) -> bool {
        self.role == Role::Seller
    }
}
