//! Database migration system for Gatekeeper
//!
//! This module provides:
//! - Compile-time embedded SQL migrations
//! - Version tracking via a migrations table
//! - Automatic migration on database initialization

use super::Database;
use super::DatabaseError;
use std::collections::HashMap;
use tracing::{debug, info, instrument};

/// Represents a single database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number (must be unique and incrementing)
    pub version: i64,
    /// Description of what this migration does
    pub description: String,
    /// SQL to execute for the migration
    pub sql: &'static str,
}

/// Permission store migrations
pub mod permissions {
    use super::Migration;

    /// Catalog and grant tables.
    pub const V0001_SCHEMA: &str = r#"
CREATE TABLE subjects (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    subject_type TEXT NOT NULL CHECK (subject_type IN ('user', 'group')),
    UNIQUE(subject_id, subject_type)
);

CREATE INDEX idx_subjects_subject_id ON subjects(subject_id);

CREATE TABLE resource_types (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL COLLATE NOCASE,
    description TEXT,
    UNIQUE(name)
);

CREATE TABLE resources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    resource_type_id TEXT NOT NULL,
    UNIQUE(name, resource_type_id),
    FOREIGN KEY (resource_type_id) REFERENCES resource_types(id) ON DELETE RESTRICT
);

CREATE INDEX idx_resources_resource_type_id ON resources(resource_type_id);

CREATE TABLE permission_levels (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    precedence INTEGER NOT NULL UNIQUE
);

CREATE TABLE permissions (
    id TEXT PRIMARY KEY,
    subject_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    permission_level_id TEXT NOT NULL,
    UNIQUE(subject_id, resource_id),
    FOREIGN KEY (subject_id) REFERENCES subjects(id) ON DELETE CASCADE,
    FOREIGN KEY (resource_id) REFERENCES resources(id) ON DELETE CASCADE,
    FOREIGN KEY (permission_level_id) REFERENCES permission_levels(id)
);

CREATE INDEX idx_permissions_resource_id ON permissions(resource_id);
CREATE INDEX idx_permissions_level_id ON permissions(permission_level_id);
"#;

    /// Built-in permission levels, most permissive first.
    pub const V0002_SEED_LEVELS: &str = r#"
INSERT INTO permission_levels (id, name, description, precedence) VALUES
    ('8ac7b3fe-0f25-4a3e-9a53-9b2e6f0f5a01', 'own', 'Full control, including granting access', 0),
    ('8ac7b3fe-0f25-4a3e-9a53-9b2e6f0f5a02', 'admin', 'Administrative access', 1),
    ('8ac7b3fe-0f25-4a3e-9a53-9b2e6f0f5a03', 'write', 'Read and modify', 2),
    ('8ac7b3fe-0f25-4a3e-9a53-9b2e6f0f5a04', 'read', 'Read only', 3);
"#;

    /// Get all permission store migrations in order
    pub fn all() -> Vec<Migration> {
        vec![
            Migration {
                version: 1,
                description: "Subjects, resources and permission grants".to_string(),
                sql: V0001_SCHEMA,
            },
            Migration {
                version: 2,
                description: "Seed built-in permission levels".to_string(),
                sql: V0002_SEED_LEVELS,
            },
        ]
    }
}

/// Migration runner for applying migrations to a database
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    /// Create a new migration runner with the given migrations
    pub fn new(migrations: Vec<Migration>) -> Self {
        let mut sorted = migrations;
        sorted.sort_by_key(|m| m.version);
        Self { migrations: sorted }
    }

    /// Create a runner for the permission store
    pub fn permissions() -> Self {
        Self::new(permissions::all())
    }

    /// Run all pending migrations on the database
    #[instrument(skip_all, fields(db_name = %db.name()))]
    pub async fn run(&self, db: &Database) -> Result<Vec<i64>, DatabaseError> {
        let conn = db.acquire().await?;
        self.run_with_connection(&conn).await
    }

    async fn run_with_connection(
        &self,
        conn: &libsql::Connection,
    ) -> Result<Vec<i64>, DatabaseError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                description TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to create migrations table: {}", e))
        })?;

        let mut applied: Vec<(i64, String)> = Vec::new();
        let mut rows = conn
            .query(
                "SELECT version, description FROM _migrations ORDER BY version",
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to query migrations: {}", e))
            })?;

        while let Some(row) = rows.next().await.map_err(|e| {
            DatabaseError::MigrationFailed(format!("Failed to read migration row: {}", e))
        })? {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to get version from row: {}", e))
            })?;
            let description: String = row.get(1).map_err(|e| {
                DatabaseError::MigrationFailed(format!("Failed to get description from row: {}", e))
            })?;
            applied.push((version, description));
        }

        // Refuse to migrate over a history this binary does not recognize.
        let expected: HashMap<i64, &str> = self
            .migrations
            .iter()
            .map(|m| (m.version, m.description.as_str()))
            .collect();
        if let Some((version, description)) = applied.iter().find(|(version, description)| {
            expected
                .get(version)
                .map(|expected_desc| *expected_desc != description.as_str())
                .unwrap_or(true)
        }) {
            return Err(DatabaseError::MigrationFailed(format!(
                "Unknown migration v{} ('{}') recorded in database",
                version, description
            )));
        }

        let applied: Vec<i64> = applied.into_iter().map(|(version, _)| version).collect();
        debug!("Already applied migrations: {:?}", applied);

        let mut newly_applied = Vec::new();
        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                debug!("Skipping already applied migration v{}", migration.version);
                continue;
            }

            info!(
                "Applying migration v{}: {}",
                migration.version, migration.description
            );

            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Migration v{} failed: {}",
                    migration.version, e
                ))
            })?;

            conn.execute(
                "INSERT INTO _migrations (version, description) VALUES (?, ?)",
                (migration.version, migration.description.as_str()),
            )
            .await
            .map_err(|e| {
                DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    migration.version, e
                ))
            })?;

            newly_applied.push(migration.version);
        }

        if newly_applied.is_empty() {
            debug!("No new migrations to apply");
        } else {
            info!("Applied {} new migrations", newly_applied.len());
        }

        Ok(newly_applied)
    }
}
