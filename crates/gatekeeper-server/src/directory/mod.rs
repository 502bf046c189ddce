//! Group directory trait and implementations.
//!
//! The group directory is the system of record for group membership and for
//! the identity-provider source of each subject. Gatekeeper only reads from it:
//! - `groups_for` lists the groups a subject directly belongs to
//! - `source_ids` maps subject IDs to their identity-provider source
//!
//! Two implementations are provided: [`LibSqlGroupDirectory`] reads a
//! Grouper-style database, and [`StaticGroupDirectory`] serves fixed data.

use async_trait::async_trait;
use libsql::params::Params;
use libsql::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::permissions::Permission;

/// Errors that can occur while consulting the group directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Group directory unavailable: {0}")]
    Unavailable(String),

    #[error("Group directory query failed: {0}")]
    QueryFailed(String),
}

impl From<libsql::Error> for DirectoryError {
    fn from(e: libsql::Error) -> Self {
        DirectoryError::QueryFailed(e.to_string())
    }
}

/// A group a subject belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub id: String,
    pub name: String,
}

/// Read-only view of group membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Groups the subject is a direct member of. Memberships of those groups
    /// are not followed.
    async fn groups_for(&self, subject_id: &str) -> Result<Vec<GroupInfo>, DirectoryError>;

    /// Identity-provider source for each known subject ID. Unknown IDs are
    /// absent from the returned map.
    async fn source_ids(
        &self,
        subject_ids: &[String],
    ) -> Result<HashMap<String, String>, DirectoryError>;

    /// Annotate each permission's subject with its source ID.
    async fn enrich(&self, permissions: &mut [Permission]) -> Result<(), DirectoryError> {
        if permissions.is_empty() {
            return Ok(());
        }

        let subject_ids: Vec<String> = permissions
            .iter()
            .map(|p| p.subject.subject_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let sources = self.source_ids(&subject_ids).await?;

        for permission in permissions.iter_mut() {
            permission.subject.subject_source_id =
                sources.get(&permission.subject.subject_id).cloned();
        }
        Ok(())
    }
}

/// Group directory backed by a Grouper database.
///
/// Only groups whose name starts with the configured folder prefix are
/// reported, and only through `members` lists.
pub struct LibSqlGroupDirectory {
    db: Database,
    prefix: String,
}

impl LibSqlGroupDirectory {
    pub fn new(db: Database, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
        }
    }

    fn prefix_pattern(&self) -> String {
        let mut pattern = String::with_capacity(self.prefix.len() + 1);
        for c in self.prefix.chars() {
            if matches!(c, '%' | '_' | '\\') {
                pattern.push('\\');
            }
            pattern.push(c);
        }
        pattern.push('%');
        pattern
    }
}

#[async_trait]
impl GroupDirectory for LibSqlGroupDirectory {
    #[instrument(skip(self))]
    async fn groups_for(&self, subject_id: &str) -> Result<Vec<GroupInfo>, DirectoryError> {
        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let mut rows = conn
            .query(
                r#"
                SELECT group_id, group_name FROM grouper_memberships_v
                WHERE subject_id = ?1 AND group_name LIKE ?2 ESCAPE '\' AND list_name = 'members'
                ORDER BY group_name
                "#,
                libsql::params![subject_id, self.prefix_pattern()],
            )
            .await?;

        let mut groups = Vec::new();
        while let Some(row) = rows.next().await? {
            groups.push(GroupInfo {
                id: row.get(0)?,
                name: row.get(1)?,
            });
        }

        debug!("Found {} groups", groups.len());
        Ok(groups)
    }

    #[instrument(skip_all, fields(count = subject_ids.len()))]
    async fn source_ids(
        &self,
        subject_ids: &[String],
    ) -> Result<HashMap<String, String>, DirectoryError> {
        if subject_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self
            .db
            .acquire()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        let placeholders = vec!["?"; subject_ids.len()].join(", ");
        let sql = format!(
            "SELECT subject_id, subject_source FROM grouper_members WHERE subject_id IN ({})",
            placeholders
        );
        let params = Params::Positional(
            subject_ids
                .iter()
                .map(|id| Value::Text(id.clone()))
                .collect(),
        );

        let mut rows = conn.query(&sql, params).await?;
        let mut sources = HashMap::new();
        while let Some(row) = rows.next().await? {
            let subject_id: String = row.get(0)?;
            let source: String = row.get(1)?;
            sources.insert(subject_id, source);
        }
        Ok(sources)
    }
}

/// Group directory serving fixed memberships, for tests and deployments
/// without a directory.
#[derive(Debug, Default)]
pub struct StaticGroupDirectory {
    groups: HashMap<String, Vec<GroupInfo>>,
    sources: HashMap<String, String>,
    unavailable: AtomicBool,
}

impl StaticGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `subject_id` as a direct member of a group.
    pub fn with_membership(
        mut self,
        subject_id: impl Into<String>,
        group_id: impl Into<String>,
        group_name: impl Into<String>,
    ) -> Self {
        self.groups
            .entry(subject_id.into())
            .or_default()
            .push(GroupInfo {
                id: group_id.into(),
                name: group_name.into(),
            });
        self
    }

    pub fn with_source(mut self, subject_id: impl Into<String>, source: impl Into<String>) -> Self {
        self.sources.insert(subject_id.into(), source.into());
        self
    }

    /// Make every call fail with [`DirectoryError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(DirectoryError::Unavailable(
                "static directory switched off".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn groups_for(&self, subject_id: &str) -> Result<Vec<GroupInfo>, DirectoryError> {
        self.check_available()?;
        Ok(self.groups.get(subject_id).cloned().unwrap_or_default())
    }

    async fn source_ids(
        &self,
        subject_ids: &[String],
    ) -> Result<HashMap<String, String>, DirectoryError> {
        self.check_available()?;
        Ok(subject_ids
            .iter()
            .filter_map(|id| self.sources.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{Resource, Subject, SubjectType};

    const GROUPER_FIXTURE: &str = r#"
        CREATE TABLE grouper_memberships_v (
            subject_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            group_name TEXT NOT NULL,
            list_name TEXT NOT NULL
        );
        CREATE TABLE grouper_members (
            subject_id TEXT NOT NULL,
            subject_source TEXT NOT NULL
        );
        INSERT INTO grouper_memberships_v VALUES
            ('alice', 'g1', 'iplant:users:team-a', 'members'),
            ('alice', 'g2', 'iplant:users:team_b', 'members'),
            ('alice', 'g3', 'other:team-c', 'members'),
            ('alice', 'g4', 'iplant:users:team-d', 'admins'),
            ('bob', 'g1', 'iplant:users:team-a', 'members');
        INSERT INTO grouper_members VALUES
            ('alice', 'ldap'),
            ('g1', 'g:gsa');
    "#;

    async fn grouper_db() -> Database {
        let db = Database::in_memory("grouper").await.unwrap();
        db.execute_batch(GROUPER_FIXTURE).await.unwrap();
        db
    }

    fn permission_for(subject_id: &str) -> Permission {
        Permission {
            id: format!("p-{}", subject_id),
            subject: Subject {
                id: format!("s-{}", subject_id),
                subject_id: subject_id.to_string(),
                subject_type: SubjectType::User,
                subject_source_id: None,
            },
            resource: Resource {
                id: "r1".to_string(),
                name: "app".to_string(),
                resource_type: "app".to_string(),
            },
            permission_level: "read".to_string(),
        }
    }

    #[tokio::test]
    async fn test_groups_for_filters_prefix_and_list() {
        let directory = LibSqlGroupDirectory::new(grouper_db().await, "iplant:users:");
        let groups = directory.groups_for("alice").await.unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g2"]);
    }

    #[tokio::test]
    async fn test_groups_for_escapes_wildcards() {
        let directory = LibSqlGroupDirectory::new(grouper_db().await, "iplant:users:team_");
        let groups = directory.groups_for("alice").await.unwrap();
        let ids: Vec<&str> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g2"]);
    }

    #[tokio::test]
    async fn test_source_ids_and_enrich() {
        let directory = LibSqlGroupDirectory::new(grouper_db().await, "iplant:users:");
        let mut permissions = vec![
            permission_for("alice"),
            permission_for("g1"),
            permission_for("nobody"),
        ];
        directory.enrich(&mut permissions).await.unwrap();

        assert_eq!(permissions[0].subject.subject_source_id.as_deref(), Some("ldap"));
        assert_eq!(permissions[1].subject.subject_source_id.as_deref(), Some("g:gsa"));
        assert_eq!(permissions[2].subject.subject_source_id, None);
    }

    #[tokio::test]
    async fn test_source_ids_empty_input() {
        let directory = LibSqlGroupDirectory::new(grouper_db().await, "iplant:users:");
        assert!(directory.source_ids(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_directory_is_single_level() {
        let directory = StaticGroupDirectory::new()
            .with_membership("alice", "g1", "team-1")
            .with_membership("g1", "g2", "team-2");

        let groups = directory.groups_for("alice").await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "g1");
        assert!(directory.groups_for("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_static_directory_unavailable() {
        let directory = StaticGroupDirectory::new().with_source("alice", "ldap");
        directory.set_unavailable(true);

        assert!(matches!(
            directory.groups_for("alice").await,
            Err(DirectoryError::Unavailable(_))
        ));
        let mut permissions = vec![permission_for("alice")];
        assert!(directory.enrich(&mut permissions).await.is_err());

        directory.set_unavailable(false);
        directory.enrich(&mut permissions).await.unwrap();
        assert_eq!(permissions[0].subject.subject_source_id.as_deref(), Some("ldap"));
    }
}
