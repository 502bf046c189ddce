//! Subjects, resource types and resources.
//!
//! The free functions run against a caller's connection or transaction and are
//! shared with the query and mutation engines. [`CatalogService`] wraps them in
//! transactions for the administrative endpoints.

use libsql::params::Params;
use libsql::{Connection, Row, Value};
use tracing::{debug, info, instrument};

use super::{
    new_id, normalize_name, PermissionError, Resource, ResourceIn, ResourceType, ResourceTypeIn,
    ResourceUpdate, Subject, SubjectIn, SubjectType,
};
use crate::db::{Database, TxMode};

const SUBJECT_COLUMNS: &str = "id, subject_id, subject_type";
const RESOURCE_SELECT: &str = r#"
    SELECT r.id, r.name, t.name
    FROM resources r JOIN resource_types t ON r.resource_type_id = t.id
"#;

pub(crate) fn subject_from_row(row: &Row, offset: i32) -> Result<Subject, PermissionError> {
    let subject_type: String = row.get(offset + 2)?;
    let subject_type = subject_type.parse::<SubjectType>().map_err(|_| {
        PermissionError::InvariantViolation(format!("stored subject type is invalid: {}", subject_type))
    })?;
    Ok(Subject {
        id: row.get(offset)?,
        subject_id: row.get(offset + 1)?,
        subject_type,
        subject_source_id: None,
    })
}

pub(crate) fn resource_from_row(row: &Row, offset: i32) -> Result<Resource, PermissionError> {
    Ok(Resource {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        resource_type: row.get(offset + 2)?,
    })
}

fn resource_type_from_row(row: &Row) -> Result<ResourceType, PermissionError> {
    Ok(ResourceType {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get::<String>(2).ok(),
    })
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn require_name(kind: &str, name: &str) -> Result<(), PermissionError> {
    if name.trim().is_empty() {
        return Err(PermissionError::BadRequest(format!("{} name must not be empty", kind)));
    }
    Ok(())
}

async fn query_subjects(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<Subject>, PermissionError> {
    let mut rows = conn.query(sql, params).await?;
    let mut subjects = Vec::new();
    while let Some(row) = rows.next().await? {
        subjects.push(subject_from_row(&row, 0)?);
    }
    Ok(subjects)
}

async fn query_resources(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<Resource>, PermissionError> {
    let mut rows = conn.query(sql, params).await?;
    let mut resources = Vec::new();
    while let Some(row) = rows.next().await? {
        resources.push(resource_from_row(&row, 0)?);
    }
    Ok(resources)
}

async fn query_resource_types(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<ResourceType>, PermissionError> {
    let mut rows = conn.query(sql, params).await?;
    let mut resource_types = Vec::new();
    while let Some(row) = rows.next().await? {
        resource_types.push(resource_type_from_row(&row)?);
    }
    Ok(resource_types)
}

// Subjects

/// The subject stored under this external ID, whatever its type.
pub async fn find_subject_by_external_id(
    conn: &Connection,
    subject_id: &str,
) -> Result<Option<Subject>, PermissionError> {
    let sql = format!(
        "SELECT {} FROM subjects WHERE subject_id = ?1 ORDER BY subject_type LIMIT 1",
        SUBJECT_COLUMNS
    );
    Ok(query_subjects(conn, &sql, libsql::params![subject_id])
        .await?
        .into_iter()
        .next())
}

/// The subject stored under exactly this external ID and type.
pub async fn find_subject(
    conn: &Connection,
    subject_type: SubjectType,
    subject_id: &str,
) -> Result<Option<Subject>, PermissionError> {
    let sql = format!(
        "SELECT {} FROM subjects WHERE subject_id = ?1 AND subject_type = ?2",
        SUBJECT_COLUMNS
    );
    Ok(
        query_subjects(conn, &sql, libsql::params![subject_id, subject_type.as_str()])
            .await?
            .into_iter()
            .next(),
    )
}

pub async fn get_subject(conn: &Connection, id: &str) -> Result<Option<Subject>, PermissionError> {
    let sql = format!("SELECT {} FROM subjects WHERE id = ?1", SUBJECT_COLUMNS);
    Ok(query_subjects(conn, &sql, libsql::params![id])
        .await?
        .into_iter()
        .next())
}

async fn insert_subject(conn: &Connection, input: &SubjectIn) -> Result<Subject, PermissionError> {
    require_name("subject", &input.subject_id)?;
    let subject = Subject {
        id: new_id(),
        subject_id: input.subject_id.clone(),
        subject_type: input.subject_type,
        subject_source_id: None,
    };
    conn.execute(
        "INSERT INTO subjects (id, subject_id, subject_type) VALUES (?1, ?2, ?3)",
        libsql::params![
            subject.id.as_str(),
            subject.subject_id.as_str(),
            subject.subject_type.as_str()
        ],
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            PermissionError::Conflict(format!("subject, {}, already exists", input.subject_id))
        } else {
            PermissionError::from(e)
        }
    })?;
    debug!("Created subject {}/{}", subject.subject_type, subject.subject_id);
    Ok(subject)
}

/// Look up a subject by external ID and type, creating it if no subject uses
/// the external ID. An external ID held by a subject of another type is a
/// conflict.
#[instrument(skip(conn))]
pub async fn get_or_create_subject(
    conn: &Connection,
    input: &SubjectIn,
) -> Result<Subject, PermissionError> {
    if let Some(subject) = find_subject(conn, input.subject_type, &input.subject_id).await? {
        return Ok(subject);
    }
    if find_subject_by_external_id(conn, &input.subject_id)
        .await?
        .is_some()
    {
        return Err(PermissionError::Conflict(format!(
            "another subject with the ID, {}, already exists",
            input.subject_id
        )));
    }
    insert_subject(conn, input).await
}

// Resource types

/// Resource type by name, ignoring case and surrounding or repeated whitespace.
pub async fn find_resource_type(
    conn: &Connection,
    name: &str,
) -> Result<Option<ResourceType>, PermissionError> {
    Ok(query_resource_types(
        conn,
        "SELECT id, name, description FROM resource_types WHERE name = ?1",
        libsql::params![normalize_name(name)],
    )
    .await?
    .into_iter()
    .next())
}

pub async fn get_resource_type(
    conn: &Connection,
    id: &str,
) -> Result<Option<ResourceType>, PermissionError> {
    Ok(query_resource_types(
        conn,
        "SELECT id, name, description FROM resource_types WHERE id = ?1",
        libsql::params![id],
    )
    .await?
    .into_iter()
    .next())
}

async fn count_resources_of_type(conn: &Connection, resource_type_id: &str) -> Result<i64, PermissionError> {
    let mut rows = conn
        .query(
            "SELECT count(*) FROM resources WHERE resource_type_id = ?1",
            libsql::params![resource_type_id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get(0)?),
        None => Ok(0),
    }
}

// Resources

pub async fn find_resource(
    conn: &Connection,
    resource_type: &ResourceType,
    name: &str,
) -> Result<Option<Resource>, PermissionError> {
    let sql = format!("{} WHERE r.resource_type_id = ?1 AND r.name = ?2", RESOURCE_SELECT);
    Ok(
        query_resources(conn, &sql, libsql::params![resource_type.id.as_str(), name])
            .await?
            .into_iter()
            .next(),
    )
}

pub async fn get_resource(conn: &Connection, id: &str) -> Result<Option<Resource>, PermissionError> {
    let sql = format!("{} WHERE r.id = ?1", RESOURCE_SELECT);
    Ok(query_resources(conn, &sql, libsql::params![id])
        .await?
        .into_iter()
        .next())
}

async fn insert_resource(
    conn: &Connection,
    resource_type: &ResourceType,
    name: &str,
) -> Result<Resource, PermissionError> {
    require_name("resource", name)?;
    let resource = Resource {
        id: new_id(),
        name: name.to_string(),
        resource_type: resource_type.name.clone(),
    };
    conn.execute(
        "INSERT INTO resources (id, name, resource_type_id) VALUES (?1, ?2, ?3)",
        libsql::params![
            resource.id.as_str(),
            resource.name.as_str(),
            resource_type.id.as_str()
        ],
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            PermissionError::Conflict(format!(
                "a resource of the same type named, '{}', already exists",
                name
            ))
        } else {
            PermissionError::from(e)
        }
    })?;
    debug!("Created resource {}/{}", resource.resource_type, resource.name);
    Ok(resource)
}

/// Look up a resource by type and name, creating it under an existing type if
/// absent. An unknown resource type is a client error.
#[instrument(skip(conn))]
pub async fn get_or_create_resource(
    conn: &Connection,
    input: &ResourceIn,
) -> Result<Resource, PermissionError> {
    let resource_type = find_resource_type(conn, &input.resource_type)
        .await?
        .ok_or_else(|| PermissionError::UnknownResourceType(input.resource_type.clone()))?;
    if let Some(resource) = find_resource(conn, &resource_type, &input.name).await? {
        return Ok(resource);
    }
    insert_resource(conn, &resource_type, &input.name).await
}

/// Administrative operations on the catalog, each in its own transaction.
#[derive(Clone)]
pub struct CatalogService {
    db: Database,
}

impl CatalogService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // Resource types

    pub async fn list_resource_types(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<ResourceType>, PermissionError> {
        let conn = self.db.acquire().await?;
        match name {
            Some(name) => Ok(find_resource_type(&conn, name).await?.into_iter().collect()),
            None => {
                query_resource_types(
                    &conn,
                    "SELECT id, name, description FROM resource_types ORDER BY name",
                    (),
                )
                .await
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn add_resource_type(
        &self,
        input: &ResourceTypeIn,
    ) -> Result<ResourceType, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = insert_resource_type(&tx, input).await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn update_resource_type(
        &self,
        id: &str,
        input: &ResourceTypeIn,
    ) -> Result<ResourceType, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = update_resource_type(&tx, id, input).await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_resource_type(&self, id: &str) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            let resource_type = get_resource_type(&tx, id)
                .await?
                .ok_or_else(|| PermissionError::NotFound(format!("resource type {} not found", id)))?;
            if count_resources_of_type(&tx, &resource_type.id).await? > 0 {
                return Err(PermissionError::BadRequest(format!(
                    "resource type {} has resources associated with it",
                    id
                )));
            }
            delete_one(&tx, "DELETE FROM resource_types WHERE id = ?1", &resource_type.id).await
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_resource_type_by_name(&self, name: &str) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            let resource_type = find_resource_type(&tx, name).await?.ok_or_else(|| {
                PermissionError::NotFound(format!("resource type name not found: {}", name))
            })?;
            if count_resources_of_type(&tx, &resource_type.id).await? > 0 {
                return Err(PermissionError::BadRequest(format!(
                    "resource type has resources associated with it: {}",
                    name
                )));
            }
            delete_one(&tx, "DELETE FROM resource_types WHERE id = ?1", &resource_type.id).await
        }
        .await;
        tx.finish(result).await
    }

    // Resources

    pub async fn list_resources(
        &self,
        resource_type: Option<&str>,
        name: Option<&str>,
    ) -> Result<Vec<Resource>, PermissionError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(resource_type) = resource_type {
            clauses.push("t.name = ?");
            values.push(Value::Text(normalize_name(resource_type)));
        }
        if let Some(name) = name {
            clauses.push("r.name = ?");
            values.push(Value::Text(name.to_string()));
        }

        let mut sql = RESOURCE_SELECT.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY t.name, r.name");

        let conn = self.db.acquire().await?;
        query_resources(&conn, &sql, Params::Positional(values)).await
    }

    #[instrument(skip(self))]
    pub async fn add_resource(&self, input: &ResourceIn) -> Result<Resource, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            let resource_type = find_resource_type(&tx, &input.resource_type)
                .await?
                .ok_or_else(|| PermissionError::UnknownResourceType(input.resource_type.clone()))?;
            if find_resource(&tx, &resource_type, &input.name).await?.is_some() {
                return Err(PermissionError::Conflict(format!(
                    "a resource of the same type named, '{}', already exists",
                    input.name
                )));
            }
            insert_resource(&tx, &resource_type, &input.name).await
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn update_resource(
        &self,
        id: &str,
        update: &ResourceUpdate,
    ) -> Result<Resource, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            require_name("resource", &update.name)?;
            let existing = get_resource(&tx, id)
                .await?
                .ok_or_else(|| PermissionError::NotFound(format!("resource, {}, not found", id)))?;
            tx.execute(
                "UPDATE resources SET name = ?1 WHERE id = ?2",
                libsql::params![update.name.as_str(), id],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    PermissionError::Conflict(format!(
                        "a resource of the same type named, '{}', already exists",
                        update.name
                    ))
                } else {
                    PermissionError::from(e)
                }
            })?;
            Ok::<_, PermissionError>(Resource {
                name: update.name.clone(),
                ..existing
            })
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_resource(&self, id: &str) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            if get_resource(&tx, id).await?.is_none() {
                return Err(PermissionError::NotFound(format!("resource, {}, not found", id)));
            }
            delete_one(&tx, "DELETE FROM resources WHERE id = ?1", id).await
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_resource_by_name(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            let not_found =
                || PermissionError::NotFound(format!("resource not found: {}:{}", resource_type, name));
            let rt = find_resource_type(&tx, resource_type)
                .await?
                .ok_or_else(not_found)?;
            let resource = find_resource(&tx, &rt, name).await?.ok_or_else(not_found)?;
            delete_one(&tx, "DELETE FROM resources WHERE id = ?1", &resource.id).await
        }
        .await;
        tx.finish(result).await
    }

    // Subjects

    pub async fn list_subjects(
        &self,
        subject_type: Option<SubjectType>,
        subject_id: Option<&str>,
    ) -> Result<Vec<Subject>, PermissionError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(subject_type) = subject_type {
            clauses.push("subject_type = ?");
            values.push(Value::Text(subject_type.as_str().to_string()));
        }
        if let Some(subject_id) = subject_id {
            clauses.push("subject_id = ?");
            values.push(Value::Text(subject_id.to_string()));
        }

        let mut sql = format!("SELECT {} FROM subjects", SUBJECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY subject_type, subject_id");

        let conn = self.db.acquire().await?;
        query_subjects(&conn, &sql, Params::Positional(values)).await
    }

    #[instrument(skip(self))]
    pub async fn add_subject(&self, input: &SubjectIn) -> Result<Subject, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            if find_subject_by_external_id(&tx, &input.subject_id)
                .await?
                .is_some()
            {
                return Err(PermissionError::Conflict(format!(
                    "subject, {}, already exists",
                    input.subject_id
                )));
            }
            insert_subject(&tx, input).await
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn update_subject(
        &self,
        id: &str,
        input: &SubjectIn,
    ) -> Result<Subject, PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            require_name("subject", &input.subject_id)?;
            if get_subject(&tx, id).await?.is_none() {
                return Err(PermissionError::NotFound(format!("subject, {}, not found", id)));
            }
            let duplicate = find_subject_by_external_id(&tx, &input.subject_id).await?;
            if duplicate.is_some_and(|other| other.id != id) {
                return Err(PermissionError::Conflict(format!(
                    "another subject with the ID, {}, already exists",
                    input.subject_id
                )));
            }
            tx.execute(
                "UPDATE subjects SET subject_id = ?1, subject_type = ?2 WHERE id = ?3",
                libsql::params![
                    input.subject_id.as_str(),
                    input.subject_type.as_str(),
                    id
                ],
            )
            .await?;
            Ok(Subject {
                id: id.to_string(),
                subject_id: input.subject_id.clone(),
                subject_type: input.subject_type,
                subject_source_id: None,
            })
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_subject(&self, id: &str) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            if get_subject(&tx, id).await?.is_none() {
                return Err(PermissionError::NotFound(format!("subject, {}, not found", id)));
            }
            delete_one(&tx, "DELETE FROM subjects WHERE id = ?1", id).await
        }
        .await;
        tx.finish(result).await
    }

    #[instrument(skip(self))]
    pub async fn delete_subject_by_external_id(
        &self,
        subject_type: SubjectType,
        subject_id: &str,
    ) -> Result<(), PermissionError> {
        let tx = self.db.begin(TxMode::Write).await?;
        let result = async {
            let subject = find_subject(&tx, subject_type, subject_id)
                .await?
                .ok_or_else(|| {
                    PermissionError::NotFound(format!(
                        "subject not found: {}:{}",
                        subject_type, subject_id
                    ))
                })?;
            delete_one(&tx, "DELETE FROM subjects WHERE id = ?1", &subject.id).await
        }
        .await;
        tx.finish(result).await
    }
}

async fn insert_resource_type(
    conn: &Connection,
    input: &ResourceTypeIn,
) -> Result<ResourceType, PermissionError> {
    let name = normalize_name(&input.name);
    require_name("resource type", &name)?;
    if find_resource_type(conn, &name).await?.is_some() {
        return Err(PermissionError::Conflict(format!(
            "a resource type named {} already exists",
            name
        )));
    }

    let resource_type = ResourceType {
        id: new_id(),
        name,
        description: input.description.clone(),
    };
    conn.execute(
        "INSERT INTO resource_types (id, name, description) VALUES (?1, ?2, ?3)",
        libsql::params![
            resource_type.id.as_str(),
            resource_type.name.as_str(),
            resource_type.description.clone()
        ],
    )
    .await?;
    info!("Added resource type {}", resource_type.name);
    Ok(resource_type)
}

async fn update_resource_type(
    conn: &Connection,
    id: &str,
    input: &ResourceTypeIn,
) -> Result<ResourceType, PermissionError> {
    let name = normalize_name(&input.name);
    require_name("resource type", &name)?;
    if get_resource_type(conn, id).await?.is_none() {
        return Err(PermissionError::NotFound(format!("resource type {} not found", id)));
    }
    if let Some(other) = find_resource_type(conn, &name).await? {
        if other.id != id {
            return Err(PermissionError::Conflict(format!(
                "another resource type named {} already exists",
                name
            )));
        }
    }

    conn.execute(
        "UPDATE resource_types SET name = ?1, description = ?2 WHERE id = ?3",
        libsql::params![name.as_str(), input.description.clone(), id],
    )
    .await?;
    Ok(ResourceType {
        id: id.to_string(),
        name,
        description: input.description.clone(),
    })
}

/// Delete the single row keyed by `id`. Any other row count means the
/// existence check that preceded the delete no longer holds.
async fn delete_one(conn: &Connection, sql: &str, id: &str) -> Result<(), PermissionError> {
    let deleted = conn.execute(sql, libsql::params![id]).await?;
    if deleted != 1 {
        return Err(PermissionError::InvariantViolation(format!(
            "expected to delete one row for {}, deleted {}",
            id, deleted
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::testing::{migrated_db, seed_resource_types};

    async fn catalog() -> CatalogService {
        let db = migrated_db().await;
        seed_resource_types(&db).await;
        CatalogService::new(db)
    }

    #[tokio::test]
    async fn test_get_or_create_subject_is_stable() {
        let db = migrated_db().await;
        let conn = db.acquire().await.unwrap();
        let input = SubjectIn::new(SubjectType::User, "alice");

        let first = get_or_create_subject(&conn, &input).await.unwrap();
        let second = get_or_create_subject(&conn, &input).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.subject_type, SubjectType::User);
    }

    #[tokio::test]
    async fn test_external_id_is_unique_across_types() {
        let db = migrated_db().await;
        let conn = db.acquire().await.unwrap();
        get_or_create_subject(&conn, &SubjectIn::new(SubjectType::User, "shared"))
            .await
            .unwrap();

        let err = get_or_create_subject(&conn, &SubjectIn::new(SubjectType::Group, "shared"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::Conflict(_)));
        assert_eq!(err.to_string(), "another subject with the ID, shared, already exists");
    }

    #[tokio::test]
    async fn test_get_or_create_resource_requires_type() {
        let db = migrated_db().await;
        seed_resource_types(&db).await;
        let conn = db.acquire().await.unwrap();

        let err = get_or_create_resource(&conn, &ResourceIn::new("widget", "w1"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::UnknownResourceType(_)));

        let created = get_or_create_resource(&conn, &ResourceIn::new("  APP ", "a1"))
            .await
            .unwrap();
        assert_eq!(created.resource_type, "app");
        let again = get_or_create_resource(&conn, &ResourceIn::new("app", "a1"))
            .await
            .unwrap();
        assert_eq!(created.id, again.id);
    }

    #[tokio::test]
    async fn test_resource_type_names_are_normalized() {
        let catalog = catalog().await;

        let added = catalog
            .add_resource_type(&ResourceTypeIn {
                name: "  notebook   session ".to_string(),
                description: Some("Interactive sessions".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(added.name, "notebook session");

        let err = catalog
            .add_resource_type(&ResourceTypeIn {
                name: "Notebook Session".to_string(),
                description: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "a resource type named Notebook Session already exists");

        let listed = catalog
            .list_resource_types(Some("NOTEBOOK  SESSION"))
            .await
            .unwrap();
        assert_eq!(listed, vec![added]);
    }

    #[tokio::test]
    async fn test_update_resource_type() {
        let catalog = catalog().await;
        let app = catalog.list_resource_types(Some("app")).await.unwrap().remove(0);

        let err = catalog
            .update_resource_type(
                &app.id,
                &ResourceTypeIn {
                    name: "analysis".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::Conflict(_)));

        let renamed = catalog
            .update_resource_type(
                &app.id,
                &ResourceTypeIn {
                    name: "tool".to_string(),
                    description: Some("Tools".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "tool");

        let err = catalog
            .update_resource_type(
                "missing",
                &ResourceTypeIn {
                    name: "x".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resource_type_delete_blocked_by_resources() {
        let catalog = catalog().await;
        catalog.add_resource(&ResourceIn::new("app", "a1")).await.unwrap();

        let err = catalog.delete_resource_type_by_name("app").await.unwrap_err();
        assert!(matches!(err, PermissionError::BadRequest(_)));
        assert_eq!(err.to_string(), "resource type has resources associated with it: app");

        catalog.delete_resource_by_name("app", "a1").await.unwrap();
        catalog.delete_resource_type_by_name("app").await.unwrap();
        assert!(catalog.list_resource_types(Some("app")).await.unwrap().is_empty());

        let err = catalog.delete_resource_type_by_name("app").await.unwrap_err();
        assert!(matches!(err, PermissionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resources_crud() {
        let catalog = catalog().await;

        let a1 = catalog.add_resource(&ResourceIn::new("app", "a1")).await.unwrap();
        catalog.add_resource(&ResourceIn::new("analysis", "a1")).await.unwrap();

        let err = catalog.add_resource(&ResourceIn::new("app", "a1")).await.unwrap_err();
        assert!(matches!(err, PermissionError::Conflict(_)));

        let all = catalog.list_resources(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let apps = catalog.list_resources(Some("app"), None).await.unwrap();
        assert_eq!(apps, vec![a1.clone()]);
        let named = catalog.list_resources(None, Some("a1")).await.unwrap();
        assert_eq!(named.len(), 2);

        let renamed = catalog
            .update_resource(&a1.id, &ResourceUpdate { name: "a2".to_string() })
            .await
            .unwrap();
        assert_eq!(renamed.name, "a2");
        assert_eq!(renamed.resource_type, "app");

        catalog.delete_resource(&a1.id).await.unwrap();
        let err = catalog.delete_resource(&a1.id).await.unwrap_err();
        assert!(matches!(err, PermissionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_subjects_crud() {
        let catalog = catalog().await;

        let alice = catalog
            .add_subject(&SubjectIn::new(SubjectType::User, "alice"))
            .await
            .unwrap();
        let staff = catalog
            .add_subject(&SubjectIn::new(SubjectType::Group, "staff"))
            .await
            .unwrap();

        let err = catalog
            .add_subject(&SubjectIn::new(SubjectType::Group, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, PermissionError::Conflict(_)));

        let users = catalog
            .list_subjects(Some(SubjectType::User), None)
            .await
            .unwrap();
        assert_eq!(users, vec![alice.clone()]);

        let err = catalog
            .update_subject(&staff.id, &SubjectIn::new(SubjectType::Group, "alice"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "another subject with the ID, alice, already exists");

        let updated = catalog
            .update_subject(&alice.id, &SubjectIn::new(SubjectType::User, "alice2"))
            .await
            .unwrap();
        assert_eq!(updated.subject_id, "alice2");

        catalog
            .delete_subject_by_external_id(SubjectType::User, "alice2")
            .await
            .unwrap();
        let err = catalog.delete_subject(&alice.id).await.unwrap_err();
        assert!(matches!(err, PermissionError::NotFound(_)));
        catalog.delete_subject(&staff.id).await.unwrap();
        assert!(catalog.list_subjects(None, None).await.unwrap().is_empty());
    }
}
