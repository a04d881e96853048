//! Role-based authorization policies.
//!
//! A policy is a set of acceptable roles. An identity satisfies it when any
//! of its roles is in the set, or when the set is empty. Role names compare
//! exactly (case-sensitive).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::auth::identity::ClientIdentity;
use crate::error::GatewayError;

/// Built-in policy admitting any authenticated identity.
pub const AUTHENTICATED_POLICY: &str = "authenticated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug, Clone)]
pub struct AuthorizationPolicy {
    name: String,
    required_roles: HashSet<String>,
}

impl AuthorizationPolicy {
    pub fn new<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            required_roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, identity: &ClientIdentity) -> Decision {
        if self.required_roles.is_empty()
            || identity.roles().iter().any(|r| self.required_roles.contains(r))
        {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// All named policies of one configuration snapshot.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    policies: HashMap<String, Arc<AuthorizationPolicy>>,
}

impl PolicySet {
    pub fn from_config(policies: &BTreeMap<String, Vec<String>>) -> Self {
        let mut set: HashMap<String, Arc<AuthorizationPolicy>> = policies
            .iter()
            .map(|(name, roles)| {
                (
                    name.clone(),
                    Arc::new(AuthorizationPolicy::new(name.clone(), roles.iter().cloned())),
                )
            })
            .collect();
        set.entry(AUTHENTICATED_POLICY.to_string()).or_insert_with(|| {
            Arc::new(AuthorizationPolicy::new(AUTHENTICATED_POLICY, Vec::<String>::new()))
        });
        Self { policies: set }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<AuthorizationPolicy>> {
        self.policies.get(name)
    }

    /// Evaluate a named policy. Unknown names deny.
    pub fn authorize(&self, name: &str, identity: &ClientIdentity) -> Result<(), GatewayError> {
        let decision = self
            .get(name)
            .map(|p| p.evaluate(identity))
            .unwrap_or(Decision::Deny);
        match decision {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(GatewayError::Forbidden {
                policy: name.to_string(),
            }),
        }
    }
}
