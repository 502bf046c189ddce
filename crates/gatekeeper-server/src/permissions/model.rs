//! Records exchanged by the permission engine and its callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::PermissionError;

/// Kind of identity a subject represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Group,
}

impl SubjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::User => "user",
            SubjectType::Group => "group",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(SubjectType::User),
            "group" => Ok(SubjectType::Group),
            _ => Err(PermissionError::InvalidSubjectType(s.to_string())),
        }
    }
}

/// A stored subject.
///
/// `id` is the internal identifier; `subject_id` is the external identifier
/// assigned by the identity provider and is unique across all subject types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub subject_id: String,
    pub subject_type: SubjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_source_id: Option<String>,
}

/// A subject as named by a caller, before it is resolved or created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectIn {
    pub subject_id: String,
    pub subject_type: SubjectType,
}

impl SubjectIn {
    pub fn new(subject_type: SubjectType, subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeIn {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A stored resource, carrying the name of its resource type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub resource_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIn {
    pub name: String,
    pub resource_type: String,
}

impl ResourceIn {
    pub fn new(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
        }
    }
}

/// Body of a resource rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub name: String,
}

/// An entry in the permission level catalog. Lower precedence means more access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub id: String,
    pub name: String,
    pub precedence: i64,
}

/// A grant, as stored or as the effective grant for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub subject: Subject,
    pub resource: Resource,
    pub permission_level: String,
}

/// Effective grant projection without subject details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbbreviatedPermission {
    pub id: String,
    pub resource_name: String,
    pub resource_type: String,
    pub permission_level: String,
}

impl From<Permission> for AbbreviatedPermission {
    fn from(permission: Permission) -> Self {
        Self {
            id: permission.id,
            resource_name: permission.resource.name,
            resource_type: permission.resource.resource_type,
            permission_level: permission.permission_level,
        }
    }
}

/// Body of a grant request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrantRequest {
    pub subject: SubjectIn,
    pub resource: ResourceIn,
    pub permission_level: String,
}

/// Body of a path-addressed grant request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionPutRequest {
    pub permission_level: String,
}

/// Destinations of a copy request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsIn {
    pub subjects: Vec<SubjectIn>,
}

/// A result paired with the reason its directory enrichment failed, if it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enriched<T> {
    pub value: T,
    pub warning: Option<String>,
}

impl<T> Enriched<T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Collapse runs of whitespace to a single space and trim the ends.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}
