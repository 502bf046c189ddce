//! Grant, revoke and copy.
//!
//! Each function runs inside the caller's write transaction. A subject holds at
//! most one grant per resource; writes go through `INSERT .. ON CONFLICT` on
//! `(subject_id, resource_id)` so concurrent writers update the same row.

use libsql::Connection;
use tracing::{debug, info, instrument};

use super::catalog;
use super::levels;
use super::query;
use super::{
    new_id, Permission, PermissionError, PermissionLevel, Resource, ResourceIn, Subject,
    SubjectIn, SubjectType,
};

/// Insert or overwrite the grant for `(subject, resource)`.
async fn upsert_permission(
    conn: &Connection,
    subject: &Subject,
    resource: &Resource,
    level: &PermissionLevel,
) -> Result<Permission, PermissionError> {
    let mut rows = conn
        .query(
            r#"
            INSERT INTO permissions (id, subject_id, resource_id, permission_level_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (subject_id, resource_id)
            DO UPDATE SET permission_level_id = excluded.permission_level_id
            RETURNING id
            "#,
            libsql::params![
                new_id(),
                subject.id.as_str(),
                resource.id.as_str(),
                level.id.as_str()
            ],
        )
        .await?;

    let id: String = match rows.next().await? {
        Some(row) => row.get(0)?,
        None => {
            return Err(PermissionError::InvariantViolation(format!(
                "upsert of permission for {}/{} on {}/{} returned no row",
                subject.subject_type, subject.subject_id, resource.resource_type, resource.name
            )))
        }
    };
    if rows.next().await?.is_some() {
        return Err(PermissionError::InvariantViolation(format!(
            "upsert of permission for {}/{} on {}/{} affected more than one row",
            subject.subject_type, subject.subject_id, resource.resource_type, resource.name
        )));
    }

    Ok(Permission {
        id,
        subject: subject.clone(),
        resource: resource.clone(),
        permission_level: level.name.clone(),
    })
}

/// Grant `level` to a subject on a resource, creating either if needed.
/// A second grant to the same pair replaces the level.
#[instrument(skip(conn))]
pub async fn grant(
    conn: &Connection,
    subject: &SubjectIn,
    resource: &ResourceIn,
    level: &str,
) -> Result<Permission, PermissionError> {
    let subject = catalog::get_or_create_subject(conn, subject).await?;
    let resource = catalog::get_or_create_resource(conn, resource).await?;
    let level = levels::level_by_name(conn, level).await?;

    let permission = upsert_permission(conn, &subject, &resource, &level).await?;
    info!(
        "Granted {} on {}/{} to {}/{}",
        permission.permission_level,
        resource.resource_type,
        resource.name,
        subject.subject_type,
        subject.subject_id
    );
    Ok(permission)
}

/// Remove the grant a subject holds directly on a resource.
#[instrument(skip(conn))]
pub async fn revoke(
    conn: &Connection,
    subject_type: SubjectType,
    subject_id: &str,
    resource_type: &str,
    resource_name: &str,
) -> Result<(), PermissionError> {
    let rt = catalog::find_resource_type(conn, resource_type)
        .await?
        .ok_or_else(|| {
            PermissionError::NotFound(format!("resource type not found: {}", resource_type))
        })?;
    let resource = catalog::find_resource(conn, &rt, resource_name)
        .await?
        .ok_or_else(|| {
            PermissionError::NotFound(format!(
                "resource not found: {}/{}",
                resource_type, resource_name
            ))
        })?;
    let subject = catalog::find_subject(conn, subject_type, subject_id)
        .await?
        .ok_or_else(|| {
            PermissionError::NotFound(format!("subject not found: {}/{}", subject_type, subject_id))
        })?;
    let permission = query::find_grant(conn, &subject.id, &resource.id)
        .await?
        .ok_or_else(|| {
            PermissionError::NotFound(format!(
                "permission not found: {}/{}:{}/{}",
                resource_type, resource_name, subject_type, subject_id
            ))
        })?;

    let deleted = conn
        .execute(
            "DELETE FROM permissions WHERE id = ?1",
            libsql::params![permission.id.as_str()],
        )
        .await?;
    match deleted {
        1 => {
            info!(
                "Revoked {} on {}/{} from {}/{}",
                permission.permission_level, resource_type, resource_name, subject_type, subject_id
            );
            Ok(())
        }
        0 => Err(PermissionError::InvariantViolation(format!(
            "no permissions deleted for id {}",
            permission.id
        ))),
        n => Err(PermissionError::InvariantViolation(format!(
            "{} permissions deleted for id {}",
            n, permission.id
        ))),
    }
}

/// Copy every grant `source` holds onto `dest`. A destination grant that is
/// already at least as permissive is left as it is.
#[instrument(skip(conn), fields(source = %source.subject_id, dest = %dest.subject_id))]
pub async fn copy_permissions(
    conn: &Connection,
    source: &Subject,
    dest: &Subject,
) -> Result<usize, PermissionError> {
    let mut rows = conn
        .query(
            r#"
            SELECT p.resource_id, p.permission_level_id, pl.precedence
            FROM permissions p
            JOIN permission_levels pl ON p.permission_level_id = pl.id
            WHERE p.subject_id = ?1
            "#,
            libsql::params![source.id.as_str()],
        )
        .await?;

    let mut grants: Vec<(String, String, i64)> = Vec::new();
    while let Some(row) = rows.next().await? {
        grants.push((row.get(0)?, row.get(1)?, row.get(2)?));
    }
    drop(rows);

    let mut written = 0;
    for (resource_id, level_id, precedence) in &grants {
        written += conn
            .execute(
                r#"
                INSERT INTO permissions (id, subject_id, resource_id, permission_level_id)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (subject_id, resource_id)
                DO UPDATE SET permission_level_id = excluded.permission_level_id
                WHERE ?5 < (
                    SELECT precedence FROM permission_levels
                    WHERE id = permissions.permission_level_id
                )
                "#,
                libsql::params![
                    new_id(),
                    dest.id.as_str(),
                    resource_id.as_str(),
                    level_id.as_str(),
                    *precedence
                ],
            )
            .await? as usize;
    }

    debug!(
        "Copied {} of {} grants from {} to {}",
        written,
        grants.len(),
        source.subject_id,
        dest.subject_id
    );
    Ok(written)
}

/// Resolve or create the source and every destination, then copy the
/// source's grants onto each destination in turn.
#[instrument(skip(conn, dests), fields(dests = dests.len()))]
pub async fn copy_to_subjects(
    conn: &Connection,
    source: &SubjectIn,
    dests: &[SubjectIn],
) -> Result<usize, PermissionError> {
    let source = catalog::get_or_create_subject(conn, source).await?;
    let mut written = 0;
    for dest in dests {
        let dest = catalog::get_or_create_subject(conn, dest).await?;
        written += copy_permissions(conn, &source, &dest).await?;
    }
    Ok(written)
}
