//! Role-based access control over the wide table.
//!
//! Four entity kinds (resources, scopes, roles, and implicit principals)
//! and two assignment kinds share the table; the split is purely a
//! `subjectName` convention ([`keys`]) so a resource cascade is a single
//! prefix query. [`repository`] owns the administrative CRUD surface and
//! its referential-integrity transactions; [`access`] computes the
//! effective access a principal holds on a resource.

pub mod access;
pub mod keys;
pub mod repository;

pub use access::{AccessEvaluator, PrincipalAccess};
pub use repository::{
    RbacRepository, ResourceRecord, RoleRecord, ScopeRecord, TableRbacRepository,
};
