use crate::error::Result;
use crate::sql::planner::GroupingMode;
use crate::sql::shaper::Casing;

use serde::Deserialize;

/// litequery configuration. Built from defaults, then an optional config
/// file, then LITEQUERY_* environment variables, e.g.
/// LITEQUERY_DATABASE=movies.db.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The database file, or :memory:.
    pub database: String,
    pub log_level: String,
    /// The naming convention for declared result names.
    pub casing: Casing,
    pub grouping: GroupingMode,
    /// Validate rows before writes. The store enforces its constraints
    /// either way.
    pub validate_before_write: bool,
    /// Query deadline in milliseconds. 0 disables it.
    pub query_timeout_ms: u64,
    /// How long to wait for a locked database file, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Config {
    /// Loads the configuration. A missing file is ignored.
    pub fn load(file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("database", ":memory:")?
            .set_default("log_level", "info")?
            .set_default("casing", "preserve")?
            .set_default("grouping", "permissive")?
            .set_default("validate_before_write", true)?
            .set_default("query_timeout_ms", 0)?
            .set_default("busy_timeout_ms", 5000)?;
        if let Some(file) = file {
            builder = builder.add_source(config::File::with_name(file).required(false));
        }
        let config = builder
            .add_source(config::Environment::with_prefix("LITEQUERY").try_parsing(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: ":memory:".to_string(),
            log_level: "info".to_string(),
            casing: Casing::Preserve,
            grouping: GroupingMode::Permissive,
            validate_before_write: true,
            query_timeout_ms: 0,
            busy_timeout_ms: 5000,
        }
    }
}
