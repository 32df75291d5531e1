//! Access-control list evaluation.
//!
//! Explicit per-identity entries are consulted first; a default
//! permission-by-pattern table is the fallback. Absence of any match is a
//! denial, never an implicit grant.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Permission levels an ACL entry can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Execute,
    Admin,
}

/// A single access-control entry for one identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AclEntry {
    /// Subject agent id.
    pub agent_id: String,
    /// Resource pattern: exact string, trailing-wildcard prefix, or "*".
    pub resource: String,
    /// Permissions granted by this entry.
    pub permissions: HashSet<Permission>,
    /// Optional context conditions that must all match for the grant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<HashMap<String, Value>>,
}

/// ACL evaluator. Entries and defaults are loaded at startup and checked on
/// every authorization decision.
#[derive(Default)]
pub struct AccessControl {
    entries: RwLock<Vec<AclEntry>>,
    /// (resource pattern, permissions) in insertion order.
    defaults: RwLock<Vec<(String, HashSet<Permission>)>>,
}

impl AccessControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit ACL entry.
    pub fn add_entry(
        &self,
        agent_id: impl Into<String>,
        resource: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
        conditions: Option<HashMap<String, Value>>,
    ) {
        let entry = AclEntry {
            agent_id: agent_id.into(),
            resource: resource.into(),
            permissions: permissions.into_iter().collect(),
            conditions,
        };
        log::info!(
            "ACL entry added: {} -> {} ({:?})",
            entry.agent_id,
            entry.resource,
            entry.permissions
        );
        self.entries.write().push(entry);
    }

    /// Set default permissions for a resource pattern.
    pub fn set_default(
        &self,
        pattern: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
    ) {
        let pattern = pattern.into();
        let permissions: HashSet<Permission> = permissions.into_iter().collect();
        log::info!("Default permissions set for {}: {:?}", pattern, permissions);
        self.defaults.write().push((pattern, permissions));
    }

    /// Check whether `agent_id` holds `permission` on `resource`.
    ///
    /// The first explicit entry that matches identity, resource pattern,
    /// permission, and conditions wins; otherwise the default table is
    /// consulted. No match means denial.
    pub fn check_permission(
        &self,
        agent_id: &str,
        resource: &str,
        permission: Permission,
        context: Option<&HashMap<String, Value>>,
    ) -> bool {
        for entry in self.entries.read().iter() {
            if entry.agent_id == agent_id
                && match_resource(&entry.resource, resource)
                && entry.permissions.contains(&permission)
            {
                if let Some(conditions) = &entry.conditions {
                    if !conditions_met(conditions, context) {
                        continue;
                    }
                }
                log::debug!("Permission granted: {} -> {} ({:?})", agent_id, resource, permission);
                return true;
            }
        }

        for (pattern, permissions) in self.defaults.read().iter() {
            if match_resource(pattern, resource) && permissions.contains(&permission) {
                log::debug!(
                    "Default permission granted: {} -> {} ({:?})",
                    agent_id,
                    resource,
                    permission
                );
                return true;
            }
        }

        log::warn!("Permission denied: {} -> {} ({:?})", agent_id, resource, permission);
        false
    }
}

/// Match a resource pattern against a concrete resource string.
fn match_resource(pattern: &str, resource: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return resource.starts_with(prefix);
    }
    pattern == resource
}

/// All condition keys must be present in the context with equal values.
fn conditions_met(conditions: &HashMap<String, Value>, context: Option<&HashMap<String, Value>>) -> bool {
    let Some(context) = context else {
        return false;
    };
    conditions
        .iter()
        .all(|(key, value)| context.get(key) == Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_entry_grants() {
        let acl = AccessControl::new();
        acl.add_entry("menu", "agent:menu:*", [Permission::Execute], None);
        assert!(acl.check_permission("menu", "agent:menu:lookup", Permission::Execute, None));
        assert!(!acl.check_permission("menu", "agent:menu:lookup", Permission::Admin, None));
    }

    #[test]
    fn test_wildcard_entries_do_not_leak_across_identities() {
        let acl = AccessControl::new();
        acl.add_entry("orchestrator", "*", [Permission::Execute, Permission::Admin], None);
        // No entry and no default for "rogue": deny regardless of the
        // orchestrator's wildcard grant.
        assert!(!acl.check_permission("rogue", "agent:menu:lookup", Permission::Execute, None));
        assert!(acl.check_permission("orchestrator", "agent:menu:lookup", Permission::Execute, None));
    }

    #[test]
    fn test_default_pattern_fallback() {
        let acl = AccessControl::new();
        acl.set_default("agent:menu:*", [Permission::Execute]);
        assert!(acl.check_permission("anyone", "agent:menu:lookup", Permission::Execute, None));
        assert!(!acl.check_permission("anyone", "agent:orders:lookup", Permission::Execute, None));
    }

    #[test]
    fn test_no_match_is_denial() {
        let acl = AccessControl::new();
        assert!(!acl.check_permission("menu", "agent:menu:lookup", Permission::Read, None));
    }

    #[test]
    fn test_conditions_must_all_match() {
        let acl = AccessControl::new();
        let mut conditions = HashMap::new();
        conditions.insert("env".to_string(), Value::String("prod".to_string()));
        acl.add_entry("menu", "agent:menu:*", [Permission::Execute], Some(conditions));

        // No context: conditional entry does not apply.
        assert!(!acl.check_permission("menu", "agent:menu:lookup", Permission::Execute, None));

        let mut context = HashMap::new();
        context.insert("env".to_string(), Value::String("prod".to_string()));
        assert!(acl.check_permission(
            "menu",
            "agent:menu:lookup",
            Permission::Execute,
            Some(&context)
        ));
    }

    #[test]
    fn test_exact_match_pattern() {
        let acl = AccessControl::new();
        acl.add_entry("menu", "agent:menu:lookup", [Permission::Execute], None);
        assert!(acl.check_permission("menu", "agent:menu:lookup", Permission::Execute, None));
        assert!(!acl.check_permission("menu", "agent:menu:delete", Permission::Execute, None));
    }
}
