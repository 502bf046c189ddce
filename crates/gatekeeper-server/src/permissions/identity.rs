//! Expansion of a subject into the set of identities whose grants it holds.

use std::collections::BTreeSet;
use std::sync::Arc;

use libsql::Connection;
use tracing::{debug, instrument};

use super::catalog;
use super::{PermissionError, SubjectType};
use crate::directory::GroupDirectory;

/// External subject IDs whose grants apply to a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySet(BTreeSet<String>);

impl IdentitySet {
    pub fn single(subject_id: impl Into<String>) -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(subject_id.into());
        Self(ids)
    }

    pub fn insert(&mut self, subject_id: impl Into<String>) {
        self.0.insert(subject_id.into());
    }

    pub fn contains(&self, subject_id: &str) -> bool {
        self.0.contains(subject_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Resolves a `(subject type, external id)` pair into an [`IdentitySet`].
#[derive(Clone)]
pub struct SubjectIdentityResolver {
    directory: Arc<dyn GroupDirectory>,
}

impl SubjectIdentityResolver {
    pub fn new(directory: Arc<dyn GroupDirectory>) -> Self {
        Self { directory }
    }

    /// Check the declared type against the stored subject, then expand.
    ///
    /// Runs outside any transaction; the directory is consulted while `conn`
    /// is held but no write lock is taken.
    #[instrument(skip(self, conn))]
    pub async fn resolve(
        &self,
        conn: &Connection,
        subject_type: SubjectType,
        subject_id: &str,
        lookup: bool,
    ) -> Result<IdentitySet, PermissionError> {
        verify_subject_type(conn, subject_type, subject_id).await?;
        self.expand(subject_type, subject_id, lookup).await
    }

    /// Only users are expanded, and only by one level of group membership.
    pub async fn expand(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
        lookup: bool,
    ) -> Result<IdentitySet, PermissionError> {
        let mut identities = IdentitySet::single(subject_id);
        if !lookup || subject_type != SubjectType::User {
            return Ok(identities);
        }

        for group in self.directory.groups_for(subject_id).await? {
            identities.insert(group.id);
        }
        debug!("Expanded {} to {} identities", subject_id, identities.len());
        Ok(identities)
    }
}

/// Fail when a subject with this external ID is stored under another type.
/// An unknown external ID passes.
pub async fn verify_subject_type(
    conn: &Connection,
    subject_type: SubjectType,
    subject_id: &str,
) -> Result<(), PermissionError> {
    match catalog::find_subject_by_external_id(conn, subject_id).await? {
        Some(existing) if existing.subject_type != subject_type => {
            Err(PermissionError::IncorrectSubjectType {
                subject_id: subject_id.to_string(),
                subject_type,
            })
        }
        _ => Ok(()),
    }
}
