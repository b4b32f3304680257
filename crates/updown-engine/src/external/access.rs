//! Role-based access control

use std::collections::{HashMap, HashSet};

use tracing::info;

use crate::types::{AccountId, Role};

pub trait AccessControl {
    fn has_role(&self, account: &AccountId, role: Role) -> bool;
}

/// In-memory role table
#[derive(Clone, Debug, Default)]
pub struct RoleRegistry {
    members: HashMap<Role, HashSet<AccountId>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose `admin` holds every role
    pub fn with_admin(admin: impl Into<AccountId>) -> Self {
        let admin = admin.into();
        let mut registry = Self::new();
        for role in [Role::Admin, Role::GameAdmin, Role::MarketMaker] {
            registry.grant(role, admin.clone());
        }
        registry
    }

    /// Returns false if the account already held the role
    pub fn grant(&mut self, role: Role, account: impl Into<AccountId>) -> bool {
        let account = account.into();
        let added = self.members.entry(role).or_default().insert(account.clone());
        if added {
            info!("Granted {} to {}", role, account);
        }
        added
    }

    pub fn revoke(&mut self, role: Role, account: &AccountId) -> bool {
        let removed = self.members.get_mut(&role).is_some_and(|m| m.remove(account));
        if removed {
            info!("Revoked {} from {}", role, account);
        }
        removed
    }

    pub fn members(&self, role: Role) -> impl Iterator<Item = &AccountId> {
        self.members.get(&role).into_iter().flatten()
    }
}

impl AccessControl for RoleRegistry {
    fn has_role(&self, account: &AccountId, role: Role) -> bool {
        self.members.get(&role).is_some_and(|m| m.contains(account))
    }
}
