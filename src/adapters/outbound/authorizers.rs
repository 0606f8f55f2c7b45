//! Authorizers
//!
//! `AllowAll` for local runs. `GrantAuthorizer` keeps an explicit list of
//! granted actions per user.

use crate::domain::ports::{Action, Authorizer, Decision};
use dashmap::DashMap;
use std::collections::HashSet;

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _user: &str, _action: Action) -> Decision {
        Decision::Allow
    }
}

#[derive(Default)]
pub struct GrantAuthorizer {
    grants: DashMap<String, HashSet<Action>>,
}

impl GrantAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, user: impl Into<String>, action: Action) {
        self.grants.entry(user.into()).or_default().insert(action);
    }

    pub fn grant_all(&self, user: impl Into<String>) {
        let user = user.into();
        for action in Action::ALL {
            self.grant(user.clone(), action);
        }
    }

    pub fn revoke(&self, user: &str, action: Action) {
        if let Some(mut actions) = self.grants.get_mut(user) {
            actions.remove(&action);
        }
    }

    /// Parse `alice=server.add,proxy.add;bob=*`. Unknown grant names are
    /// logged and ignored.
    pub fn from_spec(spec: &str) -> Self {
        let authorizer = Self::new();
        for entry in spec.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((user, actions)) = entry.split_once('=') else {
                tracing::warn!("ignoring grant entry without '=': {}", entry);
                continue;
            };
            let user = user.trim();
            for name in actions.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                if name == "*" {
                    authorizer.grant_all(user);
                } else if let Some(action) = Action::parse(name) {
                    authorizer.grant(user, action);
                } else {
                    tracing::warn!("ignoring unknown grant {} for {}", name, user);
                }
            }
        }
        authorizer
    }
}

impl Authorizer for GrantAuthorizer {
    fn authorize(&self, user: &str, action: Action) -> Decision {
        let granted = self
            .grants
            .get(user)
            .map(|actions| actions.contains(&action))
            .unwrap_or(false);
        if granted {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}
