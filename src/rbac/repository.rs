//! RBAC repository — the administrative CRUD surface over the wide table.
//!
//! Every write path follows the same shape: validate inputs, read or
//! condition on the parent rows it references, compose one `TransactWrite`,
//! translate cancellations. Creates are idempotent — finding the row
//! already present is success, not `Conflict`. Deletes of absent rows
//! succeed. Referential integrity on create is enforced by transaction
//! conditions, so a create racing a parent delete linearizes: the cancelled
//! transaction surfaces as the parent's not-found error with zero retries.
//!
//! Cascades are *not* transactional across children. `delete_resource`
//! sweeps the partition in transaction-sized chunks and loops until the
//! entity query is empty, so a concurrent create either fails its parent
//! condition or is picked up by a later pass.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::names::{
    validate_principal_id, validate_resource_name, validate_role_name, validate_scope_name,
};
use crate::store::{
    ItemCancelReason, KvAdapter, OpContext, Row, TransactWriteOutcome, WideTable, WriteOp,
    MAX_TRANSACT_ITEMS,
};
use crate::{Error, Result};

use super::keys::{
    self, parse_role_assignment, parse_scope_assignment, RESOURCE_SUBJECT, ROLE_PREFIX,
    SCOPE_PREFIX,
};

/// Passes `delete_resource` will sweep before giving up. Each pass deletes
/// everything the entity query returned, so hitting this cap means writers
/// are outpacing the cascade.
const MAX_CASCADE_PASSES: usize = 32;

/// A stored resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRecord {
    /// Normalized resource name
    pub resource_name: String,
}

/// A stored scope definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeRecord {
    /// Parent resource name
    pub resource_name: String,
    /// Scope name
    pub scope_name: String,
}

/// A stored role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleRecord {
    /// Parent resource name
    pub resource_name: String,
    /// Role name
    pub role_name: String,
}

/// The repository contract administrative flows and the access evaluator
/// consume.
///
/// All creates and deletes are idempotent. All listings come back in
/// lexicographic ascending order of the identifier that names the element.
#[async_trait]
pub trait RbacRepository: Send + Sync + 'static {
    /// Create a resource. Success whether or not it already existed.
    async fn create_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()>;

    /// Delete a resource and cascade to every scope, role and assignment
    /// under it, looping until the partition is empty.
    async fn delete_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()>;

    /// Create a scope under an existing resource.
    async fn create_scope(&self, ctx: &OpContext, resource_name: &str, scope_name: &str)
        -> Result<()>;

    /// Delete a scope and every assignment of it.
    async fn delete_scope(&self, ctx: &OpContext, resource_name: &str, scope_name: &str)
        -> Result<()>;

    /// Create a role under an existing resource.
    async fn create_role(&self, ctx: &OpContext, resource_name: &str, role_name: &str)
        -> Result<()>;

    /// Delete a role and every assignment of it.
    async fn delete_role(&self, ctx: &OpContext, resource_name: &str, role_name: &str)
        -> Result<()>;

    /// Bind a scope to a principal. Requires the resource and scope to
    /// exist at the transaction point.
    async fn create_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()>;

    /// Remove a scope assignment. Absence is success.
    async fn delete_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()>;

    /// Bind a role to a principal. Requires the resource and role to exist
    /// at the transaction point. The scope-holding prerequisite is *not*
    /// checked here — it is a read-path filter, so administrators may bind
    /// roles before scopes without ordering constraints.
    async fn create_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()>;

    /// Remove a role assignment. Absence is success.
    async fn delete_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()>;

    /// Remove every assignment a principal holds, across all resources.
    async fn delete_principal(&self, ctx: &OpContext, principal_id: &str) -> Result<()>;

    /// Read a resource. Absence is `None`, never an error.
    async fn get_resource(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>>;

    /// Read a scope definition. Absence is `None`, never an error.
    async fn get_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Option<ScopeRecord>>;

    /// Read a role definition. Absence is `None`, never an error.
    async fn get_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Option<RoleRecord>>;

    /// List every resource name, ascending.
    async fn get_resources(&self, ctx: &OpContext) -> Result<Vec<String>>;

    /// List the principals holding a scope, ascending. Requires the
    /// resource and scope to exist.
    async fn principals_for_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Vec<String>>;

    /// List the principals holding a role, ascending. Requires the
    /// resource and role to exist.
    async fn principals_for_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Vec<String>>;

    /// Every `(scopeName, principalId)` assignment pair under a resource,
    /// ascending by scope then principal. Consumed by the access evaluator.
    async fn scope_assignments(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Vec<(String, String)>>;

    /// Every `(roleName, principalId)` assignment pair under a resource.
    async fn role_assignments(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Vec<(String, String)>>;
}

/// Repository over a [`WideTable`] via the retrying [`KvAdapter`].
pub struct TableRbacRepository<T> {
    kv: KvAdapter<T>,
}

impl<T: WideTable> TableRbacRepository<T> {
    /// Build the repository on top of an adapter.
    pub fn new(kv: KvAdapter<T>) -> Self {
        Self { kv }
    }

    /// Delete the given rows in independent transaction-sized chunks.
    ///
    /// Each chunk only deletes leaf rows, so a failure between chunks
    /// leaves a consistent, retryable state.
    async fn delete_rows(&self, ctx: &OpContext, rows: &[Row]) -> Result<()> {
        for chunk in rows.chunks(MAX_TRANSACT_ITEMS) {
            let ops = chunk
                .iter()
                .map(|row| WriteOp::delete(row.entity_name.clone(), row.subject_name.clone()))
                .collect();
            match self.kv.transact_write(ctx, ops).await? {
                TransactWriteOutcome::Committed => {}
                TransactWriteOutcome::Cancelled(_) => {
                    return Err(Error::internal(
                        "unconditioned delete transaction was cancelled",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Create a child definition row (`scope#…` / `role#…`) conditioned on
    /// the parent resource marker.
    async fn create_child(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        subject_name: String,
    ) -> Result<()> {
        let ops = vec![
            WriteOp::check_exists(resource_name, RESOURCE_SUBJECT),
            WriteOp::put_if_absent(Row::new(resource_name, subject_name)),
        ];
        match self.kv.transact_write(ctx, ops).await? {
            TransactWriteOutcome::Committed => Ok(()),
            TransactWriteOutcome::Cancelled(reasons) => {
                if matches!(reasons.first(), Some(ItemCancelReason::ConditionFailed)) {
                    return Err(Error::ResourceNotFound(resource_name.to_string()));
                }
                // The put's absence check failed: the child already
                // exists, which is idempotent success.
                if matches!(reasons.get(1), Some(ItemCancelReason::ConditionFailed)) {
                    return Ok(());
                }
                Err(Error::internal(
                    "child create transaction cancelled without a failed condition",
                ))
            }
        }
    }

    /// Delete a child definition row and every assignment under it.
    async fn delete_child(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        assignment_prefix: &str,
        subject_name: &str,
    ) -> Result<()> {
        let assignments = self
            .kv
            .query_by_entity(ctx, resource_name, Some(assignment_prefix))
            .await?;
        self.delete_rows(ctx, &assignments).await?;
        self.kv.delete_item(ctx, resource_name, subject_name).await?;
        Ok(())
    }

    /// Create an assignment row conditioned on its resource and its named
    /// scope/role both existing.
    async fn create_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        definition_subject: String,
        assignment_subject: String,
        missing_definition: Error,
    ) -> Result<()> {
        let ops = vec![
            WriteOp::check_exists(resource_name, RESOURCE_SUBJECT),
            WriteOp::check_exists(resource_name, definition_subject),
            WriteOp::put_if_absent(Row::new(resource_name, assignment_subject)),
        ];
        match self.kv.transact_write(ctx, ops).await? {
            TransactWriteOutcome::Committed => Ok(()),
            TransactWriteOutcome::Cancelled(reasons) => {
                if matches!(reasons.first(), Some(ItemCancelReason::ConditionFailed)) {
                    return Err(Error::ResourceNotFound(resource_name.to_string()));
                }
                if matches!(reasons.get(1), Some(ItemCancelReason::ConditionFailed)) {
                    return Err(missing_definition);
                }
                // Assignment already present: idempotent success.
                if matches!(reasons.get(2), Some(ItemCancelReason::ConditionFailed)) {
                    return Ok(());
                }
                Err(Error::internal(
                    "assignment create transaction cancelled without a failed condition",
                ))
            }
        }
    }

    async fn assignments_with_prefix(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        prefix: &str,
        parse: fn(&str) -> Option<(&str, &str)>,
    ) -> Result<Vec<(String, String)>> {
        let resource_name = validate_resource_name(resource_name)?;
        let rows = self
            .kv
            .query_by_entity(ctx, &resource_name, Some(prefix))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse(&row.subject_name))
            .map(|(name, principal)| (name.to_string(), principal.to_string()))
            .collect())
    }
}

#[async_trait]
impl<T: WideTable> RbacRepository for TableRbacRepository<T> {
    async fn create_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        self.kv
            .put_item_if_absent(ctx, Row::new(&resource_name, RESOURCE_SUBJECT))
            .await?;
        debug!(resource = %resource_name, "Resource created");
        Ok(())
    }

    async fn delete_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;

        for _pass in 0..MAX_CASCADE_PASSES {
            let rows = self.kv.query_by_entity(ctx, &resource_name, None).await?;
            if rows.is_empty() {
                debug!(resource = %resource_name, "Resource cascade complete");
                return Ok(());
            }
            self.delete_rows(ctx, &rows).await?;
        }

        Err(Error::internal(format!(
            "resource cascade on {resource_name} did not converge in {MAX_CASCADE_PASSES} passes"
        )))
    }

    async fn create_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;
        self.create_child(ctx, &resource_name, keys::scope_subject(scope_name))
            .await?;
        debug!(resource = %resource_name, scope = scope_name, "Scope created");
        Ok(())
    }

    async fn delete_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;
        self.delete_child(
            ctx,
            &resource_name,
            &keys::scope_assignment_prefix(scope_name),
            &keys::scope_subject(scope_name),
        )
        .await?;
        debug!(resource = %resource_name, scope = scope_name, "Scope deleted");
        Ok(())
    }

    async fn create_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;
        self.create_child(ctx, &resource_name, keys::role_subject(role_name))
            .await?;
        debug!(resource = %resource_name, role = role_name, "Role created");
        Ok(())
    }

    async fn delete_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;
        self.delete_child(
            ctx,
            &resource_name,
            &keys::role_assignment_prefix(role_name),
            &keys::role_subject(role_name),
        )
        .await?;
        debug!(resource = %resource_name, role = role_name, "Role deleted");
        Ok(())
    }

    async fn create_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;
        validate_principal_id(principal_id)?;
        self.create_assignment(
            ctx,
            &resource_name,
            keys::scope_subject(scope_name),
            keys::scope_assignment_subject(scope_name, principal_id),
            Error::ScopeNotFound {
                resource: resource_name.clone(),
                scope: scope_name.to_string(),
            },
        )
        .await?;
        debug!(
            resource = %resource_name,
            scope = scope_name,
            principal = principal_id,
            "Scope assignment created"
        );
        Ok(())
    }

    async fn delete_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;
        validate_principal_id(principal_id)?;
        self.kv
            .delete_item(
                ctx,
                &resource_name,
                &keys::scope_assignment_subject(scope_name, principal_id),
            )
            .await?;
        Ok(())
    }

    async fn create_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;
        validate_principal_id(principal_id)?;
        self.create_assignment(
            ctx,
            &resource_name,
            keys::role_subject(role_name),
            keys::role_assignment_subject(role_name, principal_id),
            Error::RoleNotFound {
                resource: resource_name.clone(),
                role: role_name.to_string(),
            },
        )
        .await?;
        debug!(
            resource = %resource_name,
            role = role_name,
            principal = principal_id,
            "Role assignment created"
        );
        Ok(())
    }

    async fn delete_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;
        validate_principal_id(principal_id)?;
        self.kv
            .delete_item(
                ctx,
                &resource_name,
                &keys::role_assignment_subject(role_name, principal_id),
            )
            .await?;
        Ok(())
    }

    async fn delete_principal(&self, ctx: &OpContext, principal_id: &str) -> Result<()> {
        validate_principal_id(principal_id)?;

        let rows = self.kv.scan(ctx).await?;
        let assignments: Vec<Row> = rows
            .into_iter()
            .filter(|row| keys::assignment_principal(&row.subject_name) == Some(principal_id))
            .collect();

        let swept = assignments.len();
        self.delete_rows(ctx, &assignments).await?;
        debug!(principal = principal_id, rows = swept, "Principal deleted");
        Ok(())
    }

    async fn get_resource(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>> {
        let resource_name = validate_resource_name(resource_name)?;
        let row = self.kv.get_item(ctx, &resource_name, RESOURCE_SUBJECT).await?;
        Ok(row.map(|_| ResourceRecord { resource_name }))
    }

    async fn get_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Option<ScopeRecord>> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;
        let row = self
            .kv
            .get_item(ctx, &resource_name, &keys::scope_subject(scope_name))
            .await?;
        Ok(row.map(|_| ScopeRecord {
            resource_name,
            scope_name: scope_name.to_string(),
        }))
    }

    async fn get_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Option<RoleRecord>> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;
        let row = self
            .kv
            .get_item(ctx, &resource_name, &keys::role_subject(role_name))
            .await?;
        Ok(row.map(|_| RoleRecord {
            resource_name,
            role_name: role_name.to_string(),
        }))
    }

    async fn get_resources(&self, ctx: &OpContext) -> Result<Vec<String>> {
        let rows = self.kv.scan(ctx).await?;
        let mut names: Vec<String> = rows
            .into_iter()
            .filter(|row| row.subject_name == RESOURCE_SUBJECT)
            .map(|row| row.entity_name)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn principals_for_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Vec<String>> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_scope_name(scope_name)?;

        if self.get_resource(ctx, &resource_name).await?.is_none() {
            return Err(Error::ResourceNotFound(resource_name));
        }
        if self.get_scope(ctx, &resource_name, scope_name).await?.is_none() {
            return Err(Error::ScopeNotFound {
                resource: resource_name,
                scope: scope_name.to_string(),
            });
        }

        let rows = self
            .kv
            .query_by_entity(ctx, &resource_name, Some(&keys::scope_assignment_prefix(scope_name)))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_scope_assignment(&row.subject_name))
            .map(|(_, principal)| principal.to_string())
            .collect())
    }

    async fn principals_for_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Vec<String>> {
        let resource_name = validate_resource_name(resource_name)?;
        validate_role_name(role_name)?;

        if self.get_resource(ctx, &resource_name).await?.is_none() {
            return Err(Error::ResourceNotFound(resource_name));
        }
        if self.get_role(ctx, &resource_name, role_name).await?.is_none() {
            return Err(Error::RoleNotFound {
                resource: resource_name,
                role: role_name.to_string(),
            });
        }

        let rows = self
            .kv
            .query_by_entity(ctx, &resource_name, Some(&keys::role_assignment_prefix(role_name)))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| parse_role_assignment(&row.subject_name))
            .map(|(_, principal)| principal.to_string())
            .collect())
    }

    async fn scope_assignments(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Vec<(String, String)>> {
        self.assignments_with_prefix(ctx, resource_name, SCOPE_PREFIX, parse_scope_assignment)
            .await
    }

    async fn role_assignments(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Vec<(String, String)>> {
        self.assignments_with_prefix(ctx, resource_name, ROLE_PREFIX, parse_role_assignment)
            .await
    }
}
