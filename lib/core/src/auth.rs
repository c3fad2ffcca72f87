//! Authorization gate shared by all modules.
//!
//! The core does not authenticate anyone. An external collaborator (an
//! auth proxy or session layer) resolves the caller's identity and
//! permission set and injects them into each request; the engine only
//! asks "may this actor perform this action" through the [`Authorizer`]
//! trait, which is injected at startup time.

use std::collections::HashSet;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::ServiceError;

/// Header carrying the caller's identity, set by the upstream auth layer.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
/// Header carrying the caller's roles, comma-separated.
pub const ACTOR_ROLES_HEADER: &str = "x-actor-roles";
/// Header carrying the caller's resolved permissions, comma-separated.
pub const ACTOR_PERMISSIONS_HEADER: &str = "x-actor-permissions";

/// A resolved caller: identity plus the permission set granted by the
/// external authentication collaborator.
///
/// Permissions are flat `module:resource:action` strings, e.g.
/// `production:batch:release` or `billing:payment:confirm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub permissions: HashSet<String>,
}

impl Actor {
    /// Build an actor with the given permission set (mostly for tests
    /// and for the system actor used by internal triggers).
    pub fn with_permissions<I, S>(id: &str, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            roles: Vec::new(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse the identity headers injected by the upstream auth layer.
    ///
    /// Returns `Validation` if the identity header is missing — requests
    /// are expected to arrive pre-authenticated.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ServiceError> {
        let id = headers
            .get(ACTOR_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ServiceError::Validation(format!("missing {ACTOR_ID_HEADER} header"))
            })?;

        let roles = csv_header(headers, ACTOR_ROLES_HEADER);
        let permissions = csv_header(headers, ACTOR_PERMISSIONS_HEADER)
            .into_iter()
            .collect();

        Ok(Self {
            id: id.to_string(),
            roles,
            permissions,
        })
    }
}

fn csv_header(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Pluggable capability check. Every mutating operation consults this
/// before touching state.
pub trait Authorizer: Send + Sync + 'static {
    /// May `actor` perform `action` on `resource`?
    ///
    /// `resource` and `action` combine into the flat permission string
    /// `{resource}:{action}`, e.g. (`production:batch`, `release`).
    fn has_permission(&self, actor: &Actor, resource: &str, action: &str) -> bool;
}

/// Grants exactly what the actor's resolved permission set contains.
/// This is the production authorizer: the permission set is computed by
/// the external auth collaborator, not by this crate.
pub struct ActorPermissions;

impl Authorizer for ActorPermissions {
    fn has_permission(&self, actor: &Actor, resource: &str, action: &str) -> bool {
        let needed = format!("{resource}:{action}");
        actor.permissions.contains(&needed)
            || actor.permissions.contains(&format!("{resource}:*"))
    }
}

/// Allows everything. Used for testing.
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn has_permission(&self, _actor: &Actor, _resource: &str, _action: &str) -> bool {
        true
    }
}

/// Denies everything. Used for testing.
pub struct DenyAll;

impl Authorizer for DenyAll {
    fn has_permission(&self, _actor: &Actor, _resource: &str, _action: &str) -> bool {
        false
    }
}

/// Check a permission, mapping refusal to `PermissionDenied`.
pub fn require(
    authorizer: &dyn Authorizer,
    actor: &Actor,
    resource: &str,
    action: &str,
) -> Result<(), ServiceError> {
    if authorizer.has_permission(actor, resource, action) {
        Ok(())
    } else {
        Err(ServiceError::PermissionDenied(format!(
            "actor {} lacks {resource}:{action}",
            actor.id
        )))
    }
}
