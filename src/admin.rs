//! Administrative surface — the contract admin flows consume.
//!
//! A thin service over the repository: every mutation is delegated
//! unchanged (the repository already validates), and every successful
//! mutation emits a structured audit event via `tracing::info!` with
//! `target: "audit"`, queryable by any log aggregator.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `resource.created` / `resource.deleted` | Resource lifecycle |
//! | `scope.created` / `scope.deleted` | Scope lifecycle |
//! | `role.created` / `role.deleted` | Role lifecycle |
//! | `assignment.created` / `assignment.deleted` | Scope/role assignment lifecycle |
//! | `principal.deleted` | A principal's assignments were swept |

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::rbac::{RbacRepository, ResourceRecord, RoleRecord, ScopeRecord};
use crate::store::OpContext;
use crate::Result;

/// Structured audit event emitted for every administrative mutation.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"scope.created"`)
    pub event: &'static str,
    /// Affected resource
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Affected scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Affected role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Affected principal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

impl AuditEvent {
    fn new(event: &'static str) -> Self {
        Self {
            event,
            resource: None,
            scope: None,
            role: None,
            principal: None,
        }
    }

    fn resource(mut self, resource: &str) -> Self {
        self.resource = Some(resource.to_string());
        self
    }

    fn scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    fn role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }

    fn principal(mut self, principal: &str) -> Self {
        self.principal = Some(principal.to_string());
        self
    }
}

/// Emit an audit event as a structured log record.
pub fn emit(event: &AuditEvent) {
    info!(
        target: "audit",
        event = event.event,
        resource = event.resource.as_deref().unwrap_or(""),
        scope = event.scope.as_deref().unwrap_or(""),
        role = event.role.as_deref().unwrap_or(""),
        principal = event.principal.as_deref().unwrap_or(""),
        "Administrative mutation"
    );
}

/// The administrative service.
pub struct AdminService {
    repository: Arc<dyn RbacRepository>,
}

impl AdminService {
    /// Wrap the repository.
    pub fn new(repository: Arc<dyn RbacRepository>) -> Self {
        Self { repository }
    }

    /// Create a resource.
    pub async fn create_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()> {
        self.repository.create_resource(ctx, resource_name).await?;
        emit(&AuditEvent::new("resource.created").resource(resource_name));
        Ok(())
    }

    /// Delete a resource, cascading to everything under it.
    pub async fn delete_resource(&self, ctx: &OpContext, resource_name: &str) -> Result<()> {
        self.repository.delete_resource(ctx, resource_name).await?;
        emit(&AuditEvent::new("resource.deleted").resource(resource_name));
        Ok(())
    }

    /// Create a scope under a resource.
    pub async fn create_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<()> {
        self.repository.create_scope(ctx, resource_name, scope_name).await?;
        emit(
            &AuditEvent::new("scope.created")
                .resource(resource_name)
                .scope(scope_name),
        );
        Ok(())
    }

    /// Delete a scope and its assignments.
    pub async fn delete_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<()> {
        self.repository.delete_scope(ctx, resource_name, scope_name).await?;
        emit(
            &AuditEvent::new("scope.deleted")
                .resource(resource_name)
                .scope(scope_name),
        );
        Ok(())
    }

    /// Create a role under a resource.
    pub async fn create_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<()> {
        self.repository.create_role(ctx, resource_name, role_name).await?;
        emit(
            &AuditEvent::new("role.created")
                .resource(resource_name)
                .role(role_name),
        );
        Ok(())
    }

    /// Delete a role and its assignments.
    pub async fn delete_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<()> {
        self.repository.delete_role(ctx, resource_name, role_name).await?;
        emit(
            &AuditEvent::new("role.deleted")
                .resource(resource_name)
                .role(role_name),
        );
        Ok(())
    }

    /// Bind a scope to a principal.
    pub async fn create_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        self.repository
            .create_scope_assignment(ctx, resource_name, scope_name, principal_id)
            .await?;
        emit(
            &AuditEvent::new("assignment.created")
                .resource(resource_name)
                .scope(scope_name)
                .principal(principal_id),
        );
        Ok(())
    }

    /// Remove a scope assignment.
    pub async fn delete_scope_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        self.repository
            .delete_scope_assignment(ctx, resource_name, scope_name, principal_id)
            .await?;
        emit(
            &AuditEvent::new("assignment.deleted")
                .resource(resource_name)
                .scope(scope_name)
                .principal(principal_id),
        );
        Ok(())
    }

    /// Bind a role to a principal.
    pub async fn create_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        self.repository
            .create_role_assignment(ctx, resource_name, role_name, principal_id)
            .await?;
        emit(
            &AuditEvent::new("assignment.created")
                .resource(resource_name)
                .role(role_name)
                .principal(principal_id),
        );
        Ok(())
    }

    /// Remove a role assignment.
    pub async fn delete_role_assignment(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
        principal_id: &str,
    ) -> Result<()> {
        self.repository
            .delete_role_assignment(ctx, resource_name, role_name, principal_id)
            .await?;
        emit(
            &AuditEvent::new("assignment.deleted")
                .resource(resource_name)
                .role(role_name)
                .principal(principal_id),
        );
        Ok(())
    }

    /// Sweep every assignment a principal holds.
    pub async fn delete_principal(&self, ctx: &OpContext, principal_id: &str) -> Result<()> {
        self.repository.delete_principal(ctx, principal_id).await?;
        emit(&AuditEvent::new("principal.deleted").principal(principal_id));
        Ok(())
    }

    /// Read a resource. `None` when absent.
    pub async fn get_resource(
        &self,
        ctx: &OpContext,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>> {
        self.repository.get_resource(ctx, resource_name).await
    }

    /// Read a scope. `None` when absent.
    pub async fn get_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Option<ScopeRecord>> {
        self.repository.get_scope(ctx, resource_name, scope_name).await
    }

    /// Read a role. `None` when absent.
    pub async fn get_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Option<RoleRecord>> {
        self.repository.get_role(ctx, resource_name, role_name).await
    }

    /// List every resource, ascending.
    pub async fn get_resources(&self, ctx: &OpContext) -> Result<Vec<String>> {
        self.repository.get_resources(ctx).await
    }

    /// List the principals holding a scope, ascending.
    pub async fn principals_for_scope(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        scope_name: &str,
    ) -> Result<Vec<String>> {
        self.repository
            .principals_for_scope(ctx, resource_name, scope_name)
            .await
    }

    /// List the principals holding a role, ascending.
    pub async fn principals_for_role(
        &self,
        ctx: &OpContext,
        resource_name: &str,
        role_name: &str,
    ) -> Result<Vec<String>> {
        self.repository
            .principals_for_role(ctx, resource_name, role_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rbac::TableRbacRepository;
    use crate::store::{InMemoryTable, KvAdapter};

    fn admin() -> AdminService {
        AdminService::new(Arc::new(TableRbacRepository::new(KvAdapter::new(
            Arc::new(InMemoryTable::new()),
        ))))
    }

    #[tokio::test]
    async fn admin_flow_delegates_to_the_repository() {
        // GIVEN: an admin service over an empty repository
        let admin = admin();
        let ctx = OpContext::detached();

        // WHEN: a full administrative flow runs
        admin.create_resource(&ctx, "urn://r1").await.unwrap();
        admin.create_scope(&ctx, "urn://r1", "s1").await.unwrap();
        admin.create_role(&ctx, "urn://r1", "role1").await.unwrap();
        admin
            .create_scope_assignment(&ctx, "urn://r1", "s1", "p1")
            .await
            .unwrap();

        // THEN: the repository reflects every mutation
        assert!(admin.get_resource(&ctx, "urn://r1").await.unwrap().is_some());
        assert_eq!(
            admin.principals_for_scope(&ctx, "urn://r1", "s1").await.unwrap(),
            vec!["p1"]
        );
        assert_eq!(admin.get_resources(&ctx).await.unwrap(), vec!["urn://r1"]);
    }

    #[tokio::test]
    async fn admin_surfaces_repository_errors_unchanged() {
        let admin = admin();
        let ctx = OpContext::detached();

        let result = admin.create_scope(&ctx, "urn://missing", "s1").await;
        assert!(matches!(result, Err(crate::Error::ResourceNotFound(_))));
    }

    #[test]
    fn audit_events_serialize_with_sparse_fields() {
        // GIVEN: an event touching a scope assignment
        let event = AuditEvent::new("assignment.created")
            .resource("urn://r1")
            .scope("s1")
            .principal("p1");

        // THEN: absent fields are omitted from the serialized form
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "assignment.created");
        assert_eq!(json["scope"], "s1");
        assert!(json.get("role").is_none());
    }
}
