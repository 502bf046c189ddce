//! Service configuration.
//!
//! Settings are layered, later sources overriding earlier ones:
//! - built-in defaults
//! - an optional YAML or TOML file given with `--config`
//! - `GATEKEEPER__*` environment variables, with `__` separating nested keys
//!   (`GATEKEEPER__DB__PATH` sets `db.path`)

use std::net::SocketAddr;
use std::path::Path;

use ::config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::db::DatabaseConfig;

const ENV_PREFIX: &str = "GATEKEEPER";
const ENV_SEPARATOR: &str = "__";

/// Grouper database used as the group directory
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GrouperSettings {
    /// Path to the Grouper database. Without one, nobody belongs to any group.
    pub path: Option<String>,
    /// Only groups under this folder are considered
    pub folder_name_prefix: String,
}

impl Default for GrouperSettings {
    fn default() -> Self {
        Self {
            path: None,
            folder_name_prefix: "iplant:de".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub db: DatabaseConfig,
    #[serde(default)]
    pub grouper: GrouperSettings,
}

impl Settings {
    /// Load settings from the defaults, `path` if given, and the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, Environment::with_prefix(ENV_PREFIX))
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().set_default("listen_addr", "0.0.0.0:3000")?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder
            .add_source(env.separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()
    }
}
