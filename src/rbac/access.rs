//! Access evaluation — the effective scopes and roles a principal holds.
//!
//! # The role-grant prerequisite
//!
//! A role assignment contributes to the result only when the principal also
//! holds at least one scope assignment that survives the request's scope
//! narrowing. The gate is "some scope match": roles are never intersected
//! per-scope. Requesting an existing scope the principal does not hold
//! therefore empties *both* sets, while requesting a scope that does not
//! exist at all is `ScopeNotFound`.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::names::{validate_principal_id, validate_request_scope, DEFAULT_SCOPE};
use crate::store::OpContext;
use crate::{Error, Result};

use super::repository::RbacRepository;

/// The computed view of a principal's access on one resource.
///
/// Both sets are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrincipalAccess {
    /// Resource the access was evaluated against
    pub resource_name: String,
    /// Scope names the principal effectively holds
    pub scopes: Vec<String>,
    /// Role names the principal effectively holds
    pub roles: Vec<String>,
}

impl PrincipalAccess {
    /// Whether the principal holds nothing on this resource.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty() && self.roles.is_empty()
    }
}

/// Evaluates principal access against the repository with strongly
/// consistent reads, so a token never reflects a prior database state.
pub struct AccessEvaluator {
    repository: Arc<dyn RbacRepository>,
}

impl AccessEvaluator {
    /// Build an evaluator over the repository.
    pub fn new(repository: Arc<dyn RbacRepository>) -> Self {
        Self { repository }
    }

    /// Compute the effective access `principal_id` holds on
    /// `resource_name`, optionally narrowed by `request_scope`.
    ///
    /// `request_scope` of `None` or the [`DEFAULT_SCOPE`] sentinel means
    /// "all scopes the principal holds". A named scope must exist on the
    /// resource; the result's scope set is then the intersection of the
    /// held scopes with that one name.
    pub async fn principal_access(
        &self,
        ctx: &OpContext,
        principal_id: &str,
        resource_name: &str,
        request_scope: Option<&str>,
    ) -> Result<PrincipalAccess> {
        validate_principal_id(principal_id)?;
        if let Some(scope) = request_scope {
            validate_request_scope(scope)?;
        }

        let resource = self
            .repository
            .get_resource(ctx, resource_name)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(resource_name.to_string()))?;
        let resource_name = resource.resource_name;

        let narrowing = request_scope.filter(|s| *s != DEFAULT_SCOPE);
        if let Some(scope) = narrowing {
            if self
                .repository
                .get_scope(ctx, &resource_name, scope)
                .await?
                .is_none()
            {
                return Err(Error::ScopeNotFound {
                    resource: resource_name,
                    scope: scope.to_string(),
                });
            }
        }

        let assigned_scopes: BTreeSet<String> = self
            .repository
            .scope_assignments(ctx, &resource_name)
            .await?
            .into_iter()
            .filter(|(_, principal)| principal.as_str() == principal_id)
            .map(|(scope, _)| scope)
            .collect();

        let assigned_roles: BTreeSet<String> = self
            .repository
            .role_assignments(ctx, &resource_name)
            .await?
            .into_iter()
            .filter(|(_, principal)| principal.as_str() == principal_id)
            .map(|(role, _)| role)
            .collect();

        let scopes: Vec<String> = match narrowing {
            None => assigned_scopes.into_iter().collect(),
            Some(scope) => assigned_scopes
                .into_iter()
                .filter(|held| held.as_str() == scope)
                .collect(),
        };

        // Roles are gated by some scope match, never intersected per-scope.
        let roles: Vec<String> = if scopes.is_empty() {
            Vec::new()
        } else {
            assigned_roles.into_iter().collect()
        };

        debug!(
            principal = principal_id,
            resource = %resource_name,
            scopes = scopes.len(),
            roles = roles.len(),
            "Principal access evaluated"
        );

        Ok(PrincipalAccess {
            resource_name,
            scopes,
            roles,
        })
    }
}
