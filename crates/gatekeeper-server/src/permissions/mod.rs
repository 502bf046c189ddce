//! Permission resolution and grant management
//!
//! A grant ties a subject (user or group) to a resource at a permission level.
//! Levels are totally ordered by precedence, lower meaning more access. The
//! engine answers "what can this subject do" by:
//!
//! 1. Expanding the subject into an identity set (itself, plus its direct
//!    groups for user lookups)
//! 2. Reading every grant held by that set
//! 3. Collapsing the grants so each resource carries only its most permissive
//!    grant
//!
//! Mutations run in a single write transaction each. Group directory
//! enrichment happens after commit and never fails the operation.

pub mod catalog;
pub mod identity;
pub mod levels;
mod model;
pub mod mutation;
pub mod query;

pub use catalog::CatalogService;
pub use identity::{IdentitySet, SubjectIdentityResolver};
pub use model::*;

use std::sync::Arc;

use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::db::{Database, DatabaseError, TxMode};
use crate::directory::{DirectoryError, GroupDirectory};

/// Permission-specific errors
#[derive(Error, Debug)]
pub enum PermissionError {
    #[error("{0}")]
    BadRequest(String),

    #[error("incorrect type for subject, {subject_id}: {subject_type}")]
    IncorrectSubjectType {
        subject_id: String,
        subject_type: SubjectType,
    },

    #[error("no permission level named {0}")]
    UnknownPermissionLevel(String),

    #[error("no resource type named {0}")]
    UnknownResourceType(String),

    #[error("invalid subject type: {0}")]
    InvalidSubjectType(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl PermissionError {
    /// Whether the caller caused the failure, as opposed to the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PermissionError::BadRequest(_)
                | PermissionError::IncorrectSubjectType { .. }
                | PermissionError::UnknownPermissionLevel(_)
                | PermissionError::UnknownResourceType(_)
                | PermissionError::InvalidSubjectType(_)
                | PermissionError::NotFound(_)
                | PermissionError::Conflict(_)
        )
    }
}

impl From<DatabaseError> for PermissionError {
    fn from(err: DatabaseError) -> Self {
        PermissionError::Database(err.to_string())
    }
}

impl From<libsql::Error> for PermissionError {
    fn from(err: libsql::Error) -> Self {
        PermissionError::Database(err.to_string())
    }
}

pub(crate) fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Entry point for permission queries and mutations.
#[derive(Clone)]
pub struct PermissionService {
    db: Database,
    directory: Arc<dyn GroupDirectory>,
    resolver: SubjectIdentityResolver,
}

impl PermissionService {
    pub fn new(db: Database, directory: Arc<dyn GroupDirectory>) -> Self {
        let resolver = SubjectIdentityResolver::new(Arc::clone(&directory));
        Self {
            db,
            directory,
            resolver,
        }
    }

    async fn enrich(&self, mut permissions: Vec<Permission>) -> Enriched<Vec<Permission>> {
        let warning = match self.directory.enrich(&mut permissions).await {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to add subject source IDs: {}", e);
                Some(e.to_string())
            }
        };
        Enriched {
            value: permissions,
            warning,
        }
    }

    async fn enrich_one(&self, permission: Permission) -> Enriched<Permission> {
        let Enriched { value, warning } = self.enrich(vec![permission.clone()]).await;
        Enriched {
            value: value.into_iter().next().unwrap_or(permission),
            warning,
        }
    }

    async fn identities(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        lookup: bool,
    ) -> Result<IdentitySet, PermissionError> {
        let conn = self.db.acquire().await?;
        self.resolver
            .resolve(&conn, subject_type, subject_id, lookup)
            .await
    }

    // Queries

    /// Effective permissions of a subject on every resource.
    #[instrument(skip(self))]
    pub async fn effective_permissions(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        lookup: bool,
        min_level: Option<&str>,
    ) -> Result<Enriched<Vec<Permission>>, PermissionError> {
        let identities = self.identities(subject_type, subject_id, lookup).await?;
        let tx = self.db.begin(TxMode::Read).await?;
        let result = query::effective_permissions(&tx, &identities, min_level).await;
        let permissions = tx.finish(result).await?;
        Ok(self.enrich(permissions).await)
    }

    /// Effective permissions of a subject on resources of one type.
    #[instrument(skip(self))]
    pub async fn effective_permissions_for_type(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        lookup: bool,
        min_level: Option<&str>,
    ) -> Result<Enriched<Vec<Permission>>, PermissionError> {
        let identities = self.identities(subject_type, subject_id, lookup).await?;
        let tx = self.db.begin(TxMode::Read).await?;
        let result =
            query::effective_permissions_for_type(&tx, &identities, resource_type, min_level)
                .await;
        let permissions = tx.finish(result).await?;
        Ok(self.enrich(permissions).await)
    }

    /// Effective permission of a subject on one resource.
    #[instrument(skip(self))]
    pub async fn effective_permissions_for_resource(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        resource_name: &str,
        lookup: bool,
        min_level: Option<&str>,
    ) -> Result<Enriched<Vec<Permission>>, PermissionError> {
        let identities = self.identities(subject_type, subject_id, lookup).await?;
        let tx = self.db.begin(TxMode::Read).await?;
        let result = query::effective_permissions_for_resource(
            &tx,
            &identities,
            resource_type,
            resource_name,
            min_level,
        )
        .await;
        let permissions = tx.finish(result).await?;
        Ok(self.enrich(permissions).await)
    }

    /// Effective permissions on one resource type, without subject details.
    #[instrument(skip(self))]
    pub async fn abbreviated_effective_permissions_for_type(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        lookup: bool,
        min_level: Option<&str>,
    ) -> Result<Vec<AbbreviatedPermission>, PermissionError> {
        let identities = self.identities(subject_type, subject_id, lookup).await?;
        let tx = self.db.begin(TxMode::Read).await?;
        let result = query::abbreviated_effective_permissions_for_type(
            &tx,
            &identities,
            resource_type,
            min_level,
        )
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn list_permissions(&self) -> Result<Enriched<Vec<Permission>>, PermissionError> {
        let tx = self.db.begin(TxMode::Read).await?;
        let result = query::list_permissions(&tx).await;
        let permissions = tx.finish(result).await?;
        Ok(self.enrich(permissions).await)
    }

    #[instrument(skip(self))]
    pub async fn list_resource_permissions(
        &self,
        resource_type: &str,
        resource_name: &str,
    ) -> Result<Enriched<Vec<Permission>>, PermissionError> {
        let tx = self.db.begin(TxMode::Read).await?;
        let result = query::list_resource_permissions(&tx, resource_type, resource_name).await;
        let permissions = tx.finish(result).await?;
        Ok(self.enrich(permissions).await)
    }

    // Mutations

    #[instrument(skip(self))]
    pub async fn grant(
        &self,
        request: &PermissionGrantRequest,
    ) -> Result<Enriched<Permission>, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = mutation::grant(
            &tx,
            &request.subject,
            &request.resource,
            &request.permission_level,
        )
        .await;
        let permission = tx.finish(result).await?;
        Ok(self.enrich_one(permission).await)
    }

    #[instrument(skip(self))]
    pub async fn put_permission(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        resource_name: &str,
        level: &str,
    ) -> Result<Enriched<Permission>, PermissionError> {
        let subject = SubjectIn::new(subject_type, subject_id);
        let resource = ResourceIn::new(resource_type, resource_name);
        let tx = self.db.begin(TxMode::Write).await?;
        let result = mutation::grant(&tx, &subject, &resource, level).await;
        let permission = tx.finish(result).await?;
        Ok(self.enrich_one(permission).await)
    }

    #[instrument(skip(self))]
    pub async fn revoke(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        resource_name: &str,
    ) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result =
            mutation::revoke(&tx, subject_type, subject_id, resource_type, resource_name).await;
        tx.finish(result).await
    }

    /// Copy a subject's grants onto each destination. Returns the number of
    /// grants written.
    #[instrument(skip(self, dests), fields(dests = dests.len()))]
    pub async fn copy_permissions(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        dests: &[SubjectIn],
    ) -> Result<usize, PermissionError> {
        let source = SubjectIn::new(subject_type, subject_id);
        let tx = self.db.begin(TxMode::Write).await?;
        let result = mutation::copy_to_subjects(&tx, &source, dests).await;
        tx.finish(result).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::MigrationRunner;

    pub async fn migrated_db() -> Database {
        let db = Database::in_memory("gatekeeper-test").await.unwrap();
        MigrationRunner::permissions().run(&db).await.unwrap();
        db
    }

    pub async fn seed_resource_types(db: &Database) {
        let catalog = CatalogService::new(db.clone());
        for name in ["app", "analysis"] {
            catalog
                .add_resource_type(&ResourceTypeIn {
                    name: name.to_string(),
                    description: None,
                })
                .await
                .unwrap();
        }
    }

    pub async fn grant(
        db: &Database,
        subject_type: SubjectType,
        subject_id: &str,
        resource_type: &str,
        resource_name: &str,
        level: &str,
    ) -> Permission {
        let tx = db.begin(TxMode::Write).await.unwrap();
        let permission = mutation::grant(
            &tx,
            &SubjectIn::new(subject_type, subject_id),
            &ResourceIn::new(resource_type, resource_name),
            level,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        permission
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::directory::StaticGroupDirectory;

    async fn service(directory: StaticGroupDirectory) -> (PermissionService, Arc<StaticGroupDirectory>) {
        let db = migrated_db().await;
        seed_resource_types(&db).await;
        let directory = Arc::new(directory);
        (PermissionService::new(db, directory.clone()), directory)
    }

    fn grant_request(
        subject_type: SubjectType,
        subject_id: &str,
        resource: &str,
        level: &str,
    ) -> PermissionGrantRequest {
        PermissionGrantRequest {
            subject: SubjectIn::new(subject_type, subject_id),
            resource: ResourceIn::new("app", resource),
            permission_level: level.to_string(),
        }
    }

    fn levels_by_resource(permissions: &[Permission]) -> Vec<(&str, &str)> {
        permissions
            .iter()
            .map(|p| (p.resource.name.as_str(), p.permission_level.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_group_grant_collapses_with_own_grant() {
        let (service, _) =
            service(StaticGroupDirectory::new().with_membership("alice", "staff", "org:staff")).await;
        service
            .grant(&grant_request(SubjectType::User, "alice", "a1", "read"))
            .await
            .unwrap();
        service
            .grant(&grant_request(SubjectType::Group, "staff", "a1", "own"))
            .await
            .unwrap();

        let with_lookup = service
            .effective_permissions(SubjectType::User, "alice", true, None)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(levels_by_resource(&with_lookup), vec![("a1", "own")]);
        assert_eq!(with_lookup[0].subject.subject_id, "staff");

        let without_lookup = service
            .effective_permissions(SubjectType::User, "alice", false, None)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(levels_by_resource(&without_lookup), vec![("a1", "read")]);
    }

    #[tokio::test]
    async fn test_nested_group_grants_are_not_inherited() {
        let (service, _) = service(
            StaticGroupDirectory::new()
                .with_membership("alice", "g1", "org:g1")
                .with_membership("g1", "g2", "org:g2"),
        )
        .await;
        service
            .grant(&grant_request(SubjectType::Group, "g2", "a1", "own"))
            .await
            .unwrap();
        service
            .grant(&grant_request(SubjectType::Group, "g1", "a2", "read"))
            .await
            .unwrap();

        let effective = service
            .effective_permissions(SubjectType::User, "alice", true, None)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(levels_by_resource(&effective), vec![("a2", "read")]);
    }

    #[tokio::test]
    async fn test_min_level_floor() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        for (resource, level) in [("r-read", "read"), ("r-write", "write"), ("r-own", "own")] {
            service
                .grant(&grant_request(SubjectType::User, "alice", resource, level))
                .await
                .unwrap();
        }

        let effective = service
            .effective_permissions(SubjectType::User, "alice", false, Some("write"))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            levels_by_resource(&effective),
            vec![("r-own", "own"), ("r-write", "write")]
        );

        let err = service
            .effective_permissions(SubjectType::User, "alice", false, Some("superuser"))
            .await
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_grant_then_lookup_round_trip() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        let granted = service
            .grant(&grant_request(SubjectType::User, "alice", "a1", "write"))
            .await
            .unwrap()
            .into_inner();

        let found = service
            .effective_permissions_for_resource(SubjectType::User, "alice", "app", "a1", false, None)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, granted.id);
        assert_eq!(found[0].permission_level, "write");
        assert_eq!(found[0].resource.id, granted.resource.id);
        assert_eq!(found[0].subject.id, granted.subject.id);
    }

    #[tokio::test]
    async fn test_put_permission_creates_resource() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        let put = service
            .put_permission(SubjectType::User, "alice", "app", "fresh", "admin")
            .await
            .unwrap()
            .into_inner();
        assert_eq!(put.resource.name, "fresh");
        assert_eq!(put.permission_level, "admin");

        let updated = service
            .put_permission(SubjectType::User, "alice", "app", "fresh", "read")
            .await
            .unwrap()
            .into_inner();
        assert_eq!(updated.id, put.id);
        assert_eq!(updated.permission_level, "read");
    }

    #[tokio::test]
    async fn test_subject_type_mismatch_is_client_error() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        service
            .grant(&grant_request(SubjectType::Group, "staff", "a1", "read"))
            .await
            .unwrap();

        let err = service
            .effective_permissions(SubjectType::User, "staff", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::IncorrectSubjectType { .. }));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_directory_failure_during_lookup_is_server_fault() {
        let (service, directory) = service(StaticGroupDirectory::new()).await;
        directory.set_unavailable(true);

        let err = service
            .effective_permissions(SubjectType::User, "alice", true, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::Directory(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_enrichment_failure_does_not_roll_back_grant() {
        let (service, directory) =
            service(StaticGroupDirectory::new().with_source("alice", "ldap")).await;

        let enriched = service
            .grant(&grant_request(SubjectType::User, "alice", "a1", "read"))
            .await
            .unwrap();
        assert!(enriched.warning.is_none());
        assert_eq!(enriched.value.subject.subject_source_id.as_deref(), Some("ldap"));

        directory.set_unavailable(true);
        let enriched = service
            .grant(&grant_request(SubjectType::User, "alice", "a2", "own"))
            .await
            .unwrap();
        assert!(enriched.warning.is_some());
        assert_eq!(enriched.value.subject.subject_source_id, None);

        directory.set_unavailable(false);
        let listed = service.list_permissions().await.unwrap();
        assert_eq!(listed.value.len(), 2);
        assert!(listed
            .value
            .iter()
            .all(|p| p.subject.subject_source_id.as_deref() == Some("ldap")));
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_no_partial_writes() {
        let (service, _) = service(StaticGroupDirectory::new()).await;

        let err = service
            .grant(&grant_request(SubjectType::User, "alice", "a1", "superuser"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::UnknownPermissionLevel(_)));

        let catalog = CatalogService::new(service.db.clone());
        assert!(catalog.list_subjects(None, None).await.unwrap().is_empty());
        assert!(catalog.list_resources(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_copy_permissions_through_service() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        service
            .grant(&grant_request(SubjectType::User, "src", "a1", "read"))
            .await
            .unwrap();
        service
            .grant(&grant_request(SubjectType::User, "dst", "a1", "own"))
            .await
            .unwrap();

        service
            .copy_permissions(
                SubjectType::User,
                "src",
                &[SubjectIn::new(SubjectType::User, "dst")],
            )
            .await
            .unwrap();

        let effective = service
            .effective_permissions(SubjectType::User, "dst", false, None)
            .await
            .unwrap()
            .into_inner();
        assert_eq!(levels_by_resource(&effective), vec![("a1", "own")]);
    }

    #[tokio::test]
    async fn test_revoke_then_lookup() {
        let (service, _) = service(StaticGroupDirectory::new()).await;
        service
            .grant(&grant_request(SubjectType::User, "alice", "a1", "read"))
            .await
            .unwrap();
        service
            .revoke(SubjectType::User, "alice", "app", "a1")
            .await
            .unwrap();

        assert!(service
            .effective_permissions(SubjectType::User, "alice", false, None)
            .await
            .unwrap()
            .value
            .is_empty());
        let err = service
            .revoke(SubjectType::User, "alice", "app", "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_grants_and_queries_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local("concurrent", dir.path().join("permissions.db"))
            .await
            .unwrap();
        crate::db::MigrationRunner::permissions().run(&db).await.unwrap();
        seed_resource_types(&db).await;
        let service = PermissionService::new(db, Arc::new(StaticGroupDirectory::new()));

        let levels = ["own", "admin", "write", "read"];
        let mut handles = Vec::new();
        for i in 0..32 {
            let service = service.clone();
            let subject = format!("u{}", i % 4);
            let level = levels[i % levels.len()];
            handles.push(tokio::spawn(async move {
                service
                    .grant(&grant_request(SubjectType::User, &subject, "a1", level))
                    .await
                    .map_err(|e| format!("grant: {}", e))?;
                service
                    .effective_permissions(SubjectType::User, &subject, false, None)
                    .await
                    .map_err(|e| format!("query: {}", e))?;
                Ok::<_, String>(())
            }));
        }

        let mut failures = Vec::new();
        for handle in handles {
            if let Err(e) = handle.await.unwrap() {
                failures.push(e);
            }
        }
        assert!(failures.is_empty(), "failures: {:?}", failures);

        // One grant per subject survives, each at the level its writers agreed on
        let permissions = service.list_permissions().await.unwrap().into_inner();
        assert_eq!(permissions.len(), 4);
        for permission in &permissions {
            let n: usize = permission.subject.subject_id[1..].parse().unwrap();
            assert_eq!(permission.permission_level, levels[n]);
        }
    }
}
