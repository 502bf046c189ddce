//! Permission level catalog.
//!
//! Levels are seeded by migration and never changed at runtime. A lower
//! precedence grants more access, so "at least as permissive as `write`"
//! means "precedence <= precedence of `write`".

use libsql::Connection;
use tracing::instrument;

use super::{PermissionError, PermissionLevel};

/// Comparison applied between a grant's precedence and a reference level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

/// A predicate over precedences, bound to the precedence of a named level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecedencePredicate {
    pub comparator: Comparator,
    pub precedence: i64,
}

impl PrecedencePredicate {
    pub fn matches(&self, precedence: i64) -> bool {
        match self.comparator {
            Comparator::Less => precedence < self.precedence,
            Comparator::LessOrEqual => precedence <= self.precedence,
            Comparator::Equal => precedence == self.precedence,
            Comparator::GreaterOrEqual => precedence >= self.precedence,
            Comparator::Greater => precedence > self.precedence,
        }
    }
}

/// Look up a level by its exact name.
#[instrument(skip(conn))]
pub async fn level_by_name(
    conn: &Connection,
    name: &str,
) -> Result<PermissionLevel, PermissionError> {
    let mut rows = conn
        .query(
            "SELECT id, name, precedence FROM permission_levels WHERE name = ?1",
            libsql::params![name],
        )
        .await?;

    match rows.next().await? {
        Some(row) => Ok(PermissionLevel {
            id: row.get(0)?,
            name: row.get(1)?,
            precedence: row.get(2)?,
        }),
        None => Err(PermissionError::UnknownPermissionLevel(name.to_string())),
    }
}

/// Every level, most permissive first.
pub async fn list_levels(conn: &Connection) -> Result<Vec<PermissionLevel>, PermissionError> {
    let mut rows = conn
        .query(
            "SELECT id, name, precedence FROM permission_levels ORDER BY precedence",
            (),
        )
        .await?;

    let mut levels = Vec::new();
    while let Some(row) = rows.next().await? {
        levels.push(PermissionLevel {
            id: row.get(0)?,
            name: row.get(1)?,
            precedence: row.get(2)?,
        });
    }
    Ok(levels)
}

/// Build a predicate comparing a precedence against the level called `name`.
pub async fn precedence_expression(
    conn: &Connection,
    comparator: Comparator,
    name: &str,
) -> Result<PrecedencePredicate, PermissionError> {
    let level = level_by_name(conn, name).await?;
    Ok(PrecedencePredicate {
        comparator,
        precedence: level.precedence,
    })
}

/// The floor used by `min_level` filters: grants at least as permissive as `name`.
pub async fn at_least(
    conn: &Connection,
    name: &str,
) -> Result<PrecedencePredicate, PermissionError> {
    precedence_expression(conn, Comparator::LessOrEqual, name).await
}
