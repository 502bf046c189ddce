//! Effective permission queries.
//!
//! Every query shape reads the candidate grants held by an identity set,
//! optionally restricted to one resource type or one resource, and then
//! collapses them so each resource appears once, carrying its most permissive
//! grant. The collapse happens in memory over the fetched rows.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use libsql::params::Params;
use libsql::{Connection, Row, Value};
use tracing::{debug, instrument};

use super::catalog::{self, resource_from_row, subject_from_row};
use super::identity::IdentitySet;
use super::levels::{self, PrecedencePredicate};
use super::{AbbreviatedPermission, Permission, PermissionError, Resource, ResourceType};

const GRANT_SELECT: &str = r#"
    SELECT p.id,
           s.id, s.subject_id, s.subject_type,
           r.id, r.name, rt.name,
           pl.name, pl.precedence
    FROM permissions p
    JOIN subjects s ON p.subject_id = s.id
    JOIN resources r ON p.resource_id = r.id
    JOIN resource_types rt ON r.resource_type_id = rt.id
    JOIN permission_levels pl ON p.permission_level_id = pl.id
"#;

/// A stored grant together with the precedence of its level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRow {
    pub permission: Permission,
    pub precedence: i64,
}

impl GrantRow {
    fn rank(&self) -> (i64, &str) {
        (self.precedence, self.permission.id.as_str())
    }
}

fn grant_from_row(row: &Row) -> Result<GrantRow, PermissionError> {
    Ok(GrantRow {
        permission: Permission {
            id: row.get(0)?,
            subject: subject_from_row(row, 1)?,
            resource: resource_from_row(row, 4)?,
            permission_level: row.get(7)?,
        },
        precedence: row.get(8)?,
    })
}

async fn query_grants(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<GrantRow>, PermissionError> {
    let mut rows = conn.query(sql, params).await?;
    let mut grants = Vec::new();
    while let Some(row) = rows.next().await? {
        grants.push(grant_from_row(&row)?);
    }
    Ok(grants)
}

/// Restriction applied to candidate grants.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    All,
    ResourceType(&'a ResourceType),
    Resource(&'a Resource),
}

/// Every grant held directly by a member of `identities` within `scope`.
pub async fn fetch_grants(
    conn: &Connection,
    identities: &IdentitySet,
    scope: Scope<'_>,
) -> Result<Vec<GrantRow>, PermissionError> {
    if identities.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; identities.len()].join(", ");
    let mut values: Vec<Value> = identities
        .iter()
        .map(|id| Value::Text(id.to_string()))
        .collect();

    let mut sql = format!("{} WHERE s.subject_id IN ({})", GRANT_SELECT, placeholders);
    match scope {
        Scope::All => {}
        Scope::ResourceType(resource_type) => {
            sql.push_str(" AND rt.id = ?");
            values.push(Value::Text(resource_type.id.clone()));
        }
        Scope::Resource(resource) => {
            sql.push_str(" AND r.id = ?");
            values.push(Value::Text(resource.id.clone()));
        }
    }

    query_grants(conn, &sql, Params::Positional(values)).await
}

/// Reduce grants to one per resource: the smallest precedence wins, then the
/// smallest permission ID. Grants failing `floor` are dropped before the
/// reduction. Output is ordered by resource name, then resource type.
pub fn collapse(grants: Vec<GrantRow>, floor: Option<&PrecedencePredicate>) -> Vec<Permission> {
    let mut best: HashMap<String, GrantRow> = HashMap::new();

    for grant in grants {
        if let Some(floor) = floor {
            if !floor.matches(grant.precedence) {
                continue;
            }
        }
        match best.entry(grant.permission.resource.id.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(grant);
            }
            Entry::Occupied(mut entry) => {
                if grant.rank() < entry.get().rank() {
                    entry.insert(grant);
                }
            }
        }
    }

    let mut effective: Vec<Permission> = best.into_values().map(|g| g.permission).collect();
    effective.sort_by(|a, b| {
        a.resource
            .name
            .cmp(&b.resource.name)
            .then_with(|| a.resource.resource_type.cmp(&b.resource.resource_type))
            .then_with(|| a.resource.id.cmp(&b.resource.id))
    });
    effective
}

async fn floor_for(
    conn: &Connection,
    min_level: Option<&str>,
) -> Result<Option<PrecedencePredicate>, PermissionError> {
    match min_level {
        Some(name) => Ok(Some(levels::at_least(conn, name).await?)),
        None => Ok(None),
    }
}

/// Effective permissions across every resource.
#[instrument(skip(conn, identities), fields(identities = identities.len()))]
pub async fn effective_permissions(
    conn: &Connection,
    identities: &IdentitySet,
    min_level: Option<&str>,
) -> Result<Vec<Permission>, PermissionError> {
    let floor = floor_for(conn, min_level).await?;
    let grants = fetch_grants(conn, identities, Scope::All).await?;
    debug!("Collapsing {} candidate grants", grants.len());
    Ok(collapse(grants, floor.as_ref()))
}

/// Effective permissions on resources of one type. An unknown type yields no
/// permissions.
#[instrument(skip(conn, identities), fields(identities = identities.len()))]
pub async fn effective_permissions_for_type(
    conn: &Connection,
    identities: &IdentitySet,
    resource_type: &str,
    min_level: Option<&str>,
) -> Result<Vec<Permission>, PermissionError> {
    let floor = floor_for(conn, min_level).await?;
    let Some(resource_type) = catalog::find_resource_type(conn, resource_type).await? else {
        return Ok(Vec::new());
    };
    let grants = fetch_grants(conn, identities, Scope::ResourceType(&resource_type)).await?;
    Ok(collapse(grants, floor.as_ref()))
}

/// Effective permission on one resource, as a list of at most one entry. An
/// unknown type or resource yields no permissions.
#[instrument(skip(conn, identities), fields(identities = identities.len()))]
pub async fn effective_permissions_for_resource(
    conn: &Connection,
    identities: &IdentitySet,
    resource_type: &str,
    resource_name: &str,
    min_level: Option<&str>,
) -> Result<Vec<Permission>, PermissionError> {
    let floor = floor_for(conn, min_level).await?;
    let Some(resource_type) = catalog::find_resource_type(conn, resource_type).await? else {
        return Ok(Vec::new());
    };
    let Some(resource) = catalog::find_resource(conn, &resource_type, resource_name).await? else {
        return Ok(Vec::new());
    };
    let grants = fetch_grants(conn, identities, Scope::Resource(&resource)).await?;
    Ok(collapse(grants, floor.as_ref()))
}

/// Same as [`effective_permissions_for_type`], without subject details.
pub async fn abbreviated_effective_permissions_for_type(
    conn: &Connection,
    identities: &IdentitySet,
    resource_type: &str,
    min_level: Option<&str>,
) -> Result<Vec<AbbreviatedPermission>, PermissionError> {
    Ok(
        effective_permissions_for_type(conn, identities, resource_type, min_level)
            .await?
            .into_iter()
            .map(AbbreviatedPermission::from)
            .collect(),
    )
}

/// Every stored grant, uncollapsed.
pub async fn list_permissions(conn: &Connection) -> Result<Vec<Permission>, PermissionError> {
    let sql = format!("{} ORDER BY s.subject_id, r.name, pl.precedence", GRANT_SELECT);
    Ok(query_grants(conn, &sql, ())
        .await?
        .into_iter()
        .map(|g| g.permission)
        .collect())
}

/// Every grant on one resource, uncollapsed. An unknown type or resource
/// yields no permissions.
pub async fn list_resource_permissions(
    conn: &Connection,
    resource_type: &str,
    resource_name: &str,
) -> Result<Vec<Permission>, PermissionError> {
    let Some(resource_type) = catalog::find_resource_type(conn, resource_type).await? else {
        return Ok(Vec::new());
    };
    let Some(resource) = catalog::find_resource(conn, &resource_type, resource_name).await? else {
        return Ok(Vec::new());
    };

    let sql = format!("{} WHERE r.id = ?1 ORDER BY s.subject_id", GRANT_SELECT);
    Ok(
        query_grants(conn, &sql, libsql::params![resource.id.as_str()])
            .await?
            .into_iter()
            .map(|g| g.permission)
            .collect(),
    )
}

/// The grant a subject holds directly on a resource, by internal IDs.
pub async fn find_grant(
    conn: &Connection,
    subject_id: &str,
    resource_id: &str,
) -> Result<Option<Permission>, PermissionError> {
    let sql = format!("{} WHERE p.subject_id = ?1 AND p.resource_id = ?2", GRANT_SELECT);
    Ok(
        query_grants(conn, &sql, libsql::params![subject_id, resource_id])
            .await?
            .into_iter()
            .next()
            .map(|g| g.permission),
    )
}
