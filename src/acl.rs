//! Object-level access control lists.
//!
//! Serialized the same way clients expect: a map from `"*"`, a user id or
//! `"role:<name>"` to `{"read": bool, "write": bool}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const PUBLIC: &str = "*";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default, skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub write: bool,
}

fn is_false(v: &bool) -> bool {
    !*v
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(BTreeMap<String, Permission>);

impl Acl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role_key(role: &str) -> String {
        format!("role:{}", role)
    }

    pub fn set_public_read(&mut self, allowed: bool) {
        self.set(PUBLIC.to_string(), Some(allowed), None);
    }

    pub fn set_public_write(&mut self, allowed: bool) {
        self.set(PUBLIC.to_string(), None, Some(allowed));
    }

    pub fn set_read_access(&mut self, user_id: &str, allowed: bool) {
        self.set(user_id.to_string(), Some(allowed), None);
    }

    pub fn set_write_access(&mut self, user_id: &str, allowed: bool) {
        self.set(user_id.to_string(), None, Some(allowed));
    }

    pub fn set_role_read_access(&mut self, role: &str, allowed: bool) {
        self.set(Self::role_key(role), Some(allowed), None);
    }

    pub fn set_role_write_access(&mut self, role: &str, allowed: bool) {
        self.set(Self::role_key(role), None, Some(allowed));
    }

    fn set(&mut self, key: String, read: Option<bool>, write: Option<bool>) {
        let entry = self.0.entry(key.clone()).or_default();
        if let Some(read) = read {
            entry.read = read;
        }
        if let Some(write) = write {
            entry.write = write;
        }
        if !entry.read && !entry.write {
            self.0.remove(&key);
        }
    }

    pub fn permission(&self, key: &str) -> Permission {
        self.0.get(key).copied().unwrap_or_default()
    }

    pub fn can_read(&self, user_id: Option<&str>, roles: &[String]) -> bool {
        self.check(user_id, roles, |p| p.read)
    }

    pub fn can_write(&self, user_id: Option<&str>, roles: &[String]) -> bool {
        self.check(user_id, roles, |p| p.write)
    }

    fn check(&self, user_id: Option<&str>, roles: &[String], pick: impl Fn(&Permission) -> bool) -> bool {
        if pick(&self.permission(PUBLIC)) {
            return true;
        }
        if let Some(user_id) = user_id {
            if pick(&self.permission(user_id)) {
                return true;
            }
        }
        roles.iter().any(|role| pick(&self.permission(&Self::role_key(role))))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RoleRule {
    pub role: String,
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Clone)]
pub struct OwnerRule {
    pub user_id: String,
    pub read: bool,
    pub write: bool,
}

/// Declarative ACL recipe used by triggers and handlers.
#[derive(Debug, Clone, Default)]
pub struct AclOptions {
    pub public_read: bool,
    pub public_write: bool,
    pub role_rules: Vec<RoleRule>,
    pub excluded_roles: Vec<String>,
    pub owner: Option<OwnerRule>,
}

impl AclOptions {
    pub fn role(mut self, role: &str, read: bool, write: bool) -> Self {
        self.role_rules.push(RoleRule {
            role: role.to_string(),
            read,
            write,
        });
        self
    }

    pub fn owner(mut self, user_id: &str, read: bool, write: bool) -> Self {
        self.owner = Some(OwnerRule {
            user_id: user_id.to_string(),
            read,
            write,
        });
        self
    }

    pub fn exclude_role(mut self, role: &str) -> Self {
        self.excluded_roles.push(role.to_string());
        self
    }
}

pub fn implement_acl(options: &AclOptions) -> Acl {
    let mut acl = Acl::new();
    acl.set_public_read(options.public_read);
    acl.set_public_write(options.public_write);

    for rule in &options.role_rules {
        if options.excluded_roles.iter().any(|r| r == &rule.role) {
            continue;
        }
        acl.set_role_read_access(&rule.role, rule.read);
        acl.set_role_write_access(&rule.role, rule.write);
    }

    if let Some(owner) = &options.owner {
        acl.set_read_access(&owner.user_id, owner.read);
        acl.set_write_access(&owner.user_id, owner.write);
    }

    acl
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_owner_and_role_acl() {
        let acl = implement_acl(
            &AclOptions::default()
                .role("SuperAdmin", true, true)
                .role("Parent", true, false)
                .exclude_role("Parent")
                .owner("u1", true, true),
        );

        let value = serde_json::to_value(&acl).unwrap();
        assert_eq!(
            value,
            json!({
                "role:SuperAdmin": {"read": true, "write": true},
                "u1": {"read": true, "write": true}
            })
        );
    }

    #[test]
    fn checks_read_through_roles() {
        let acl = implement_acl(&AclOptions::default().role("Admin", true, false));
        assert!(!acl.can_read(Some("u1"), &[]));
        assert!(acl.can_read(Some("u1"), &["Admin".to_string()]));
        assert!(!acl.can_write(Some("u1"), &["Admin".to_string()]));
    }

    #[test]
    fn public_read_allows_anonymous() {
        let acl = implement_acl(&AclOptions {
            public_read: true,
            ..Default::default()
        });
        assert!(acl.can_read(None, &[]));
        assert!(!acl.can_write(None, &[]));
    }

    #[test]
    fn clearing_both_flags_drops_entry() {
        let mut acl = Acl::new();
        acl.set_read_access("u1", true);
        acl.set_read_access("u1", false);
        assert!(acl.is_empty());
    }
}
