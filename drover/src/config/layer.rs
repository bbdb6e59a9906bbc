//! Partial configuration layers and the property key table.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::duration::ConfigDuration;
use crate::error::ConfigError;
use crate::storage::BackendType;

/// Root namespace shared by every property key.
pub const ROOT_NAMESPACE: &str = "drover";

/// Every property key accepted by [`ConfigLayer::set_property`], without the
/// root namespace.
pub const PROPERTY_KEYS: &[&str] = &[
    "database.skip-create",
    "database.database-name",
    "database.table-prefix",
    "database.datasource",
    "database.type",
    "jobs.default-number-of-retries",
    "jobs.back-off-time-seed",
    "job-scheduler.enabled",
    "job-scheduler.job-details-generator",
    "background-job-server.enabled",
    "background-job-server.worker-count",
    "background-job-server.poll-interval-in-seconds",
    "background-job-server.delete-succeeded-jobs-after",
    "background-job-server.permanently-delete-deleted-jobs-after",
    "dashboard.enabled",
    "dashboard.port",
    "dashboard.username",
    "dashboard.password",
];

/// Environment variable name for a property key, e.g.
/// `DROVER_BACKGROUND_JOB_SERVER_POLL_INTERVAL_IN_SECONDS`.
pub fn env_var_name(prefix: &str, key: &str) -> String {
    let key = key.replace(['.', '-'], "_").to_ascii_uppercase();
    format!("{prefix}_{key}")
}

/// Overrides for the persistence group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DatabaseLayer {
    pub skip_create: Option<bool>,
    pub database_name: Option<String>,
    pub table_prefix: Option<String>,
    pub datasource: Option<String>,
    #[serde(rename = "type")]
    pub backend_type: Option<BackendType>,
}

/// Overrides for the job policy group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JobsLayer {
    pub default_number_of_retries: Option<i64>,
    pub back_off_time_seed: Option<i64>,
}

/// Overrides for the scheduler group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JobSchedulerLayer {
    pub enabled: Option<bool>,
    pub job_details_generator: Option<String>,
}

/// Overrides for the worker server group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackgroundJobServerLayer {
    pub enabled: Option<bool>,
    pub worker_count: Option<i64>,
    pub poll_interval_in_seconds: Option<i64>,
    pub delete_succeeded_jobs_after: Option<ConfigDuration>,
    pub permanently_delete_deleted_jobs_after: Option<ConfigDuration>,
}

/// Overrides for the dashboard group.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DashboardLayer {
    pub enabled: Option<bool>,
    pub port: Option<i64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// One source of configuration overrides.
///
/// Every field is optional; an unset field falls through to the layer below
/// when layers are merged by [`ConfigLoader`](super::ConfigLoader). Numeric
/// fields are kept signed so out-of-range input survives until validation
/// and is reported rather than clamped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigLayer {
    #[serde(default)]
    pub database: DatabaseLayer,
    #[serde(default)]
    pub jobs: JobsLayer,
    #[serde(default)]
    pub job_scheduler: JobSchedulerLayer,
    #[serde(default)]
    pub background_job_server: BackgroundJobServerLayer,
    #[serde(default)]
    pub dashboard: DashboardLayer,
}

fn overlay<T>(base: &mut Option<T>, top: Option<T>) {
    if top.is_some() {
        *base = top;
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::parse(key, value, e.to_string()))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Like [`non_empty`] but keeps surrounding whitespace, for secrets.
fn verbatim(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

impl ConfigLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document. A top-level `[drover]` table is unwrapped.
    ///
    /// Values go through [`set_property`](Self::set_property), so a bad value
    /// is reported against its dotted key just like a property would be.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = toml::from_str(source)?;
        if let Some(root) = table.remove(ROOT_NAMESPACE) {
            let inner = match root {
                toml::Value::Table(inner) => inner,
                other => {
                    return Err(ConfigError::parse(
                        ROOT_NAMESPACE,
                        other.to_string(),
                        "expected a table",
                    ))
                }
            };
            if let Some(key) = table.keys().next() {
                return Err(ConfigError::UnknownKey { key: key.clone() });
            }
            table = inner;
        }

        let mut layer = Self::default();
        for (group, entries) in table {
            let entries = match entries {
                toml::Value::Table(entries) => entries,
                other => return Err(ConfigError::parse(group, other.to_string(), "expected a table")),
            };
            for (name, value) in entries {
                let key = format!("{group}.{name}");
                let raw = match value {
                    toml::Value::String(s) => s,
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    other => {
                        return Err(ConfigError::parse(key, other.to_string(), "expected a scalar"))
                    }
                };
                layer.set_property(&key, &raw)?;
            }
        }
        Ok(layer)
    }

    /// Read and parse a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration file");
        Self::from_toml_str(&source)
    }

    /// Build a layer from flat `key = value` properties.
    pub fn from_properties<I, K, V>(properties: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut layer = Self::default();
        for (key, value) in properties {
            layer.set_property(key.as_ref(), value.as_ref())?;
        }
        Ok(layer)
    }

    /// Build a layer from the process environment.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_vars(prefix, std::env::vars())
    }

    /// Build a layer from environment-style variables such as
    /// `DROVER_DASHBOARD_PORT`. Variables carrying the prefix that match no
    /// key are ignored.
    pub fn from_env_vars<I>(prefix: &str, vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut layer = Self::default();
        let marker = format!("{prefix}_");
        for (name, value) in vars {
            if !name.starts_with(&marker) {
                continue;
            }
            match PROPERTY_KEYS
                .iter()
                .find(|key| env_var_name(prefix, key) == name)
            {
                Some(key) => layer.set_property(key, &value)?,
                None => warn!(variable = %name, "ignoring unrecognised configuration variable"),
            }
        }
        Ok(layer)
    }

    /// Set a single property from its string form.
    ///
    /// The key may carry the `drover.` root namespace. Empty values for
    /// optional string fields leave the field unset.
    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let name = key
            .strip_prefix(ROOT_NAMESPACE)
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(key);

        match name {
            "database.skip-create" => self.database.skip_create = Some(parse_value(key, value)?),
            "database.database-name" => self.database.database_name = non_empty(value),
            "database.table-prefix" => self.database.table_prefix = non_empty(value),
            "database.datasource" => self.database.datasource = non_empty(value),
            "database.type" => self.database.backend_type = Some(parse_value(key, value)?),
            "jobs.default-number-of-retries" => {
                self.jobs.default_number_of_retries = Some(parse_value(key, value)?)
            }
            "jobs.back-off-time-seed" => {
                self.jobs.back_off_time_seed = Some(parse_value(key, value)?)
            }
            "job-scheduler.enabled" => self.job_scheduler.enabled = Some(parse_value(key, value)?),
            "job-scheduler.job-details-generator" => {
                self.job_scheduler.job_details_generator = non_empty(value)
            }
            "background-job-server.enabled" => {
                self.background_job_server.enabled = Some(parse_value(key, value)?)
            }
            "background-job-server.worker-count" => {
                self.background_job_server.worker_count = Some(parse_value(key, value)?)
            }
            "background-job-server.poll-interval-in-seconds" => {
                self.background_job_server.poll_interval_in_seconds =
                    Some(parse_value(key, value)?)
            }
            "background-job-server.delete-succeeded-jobs-after" => {
                self.background_job_server.delete_succeeded_jobs_after =
                    Some(parse_value(key, value)?)
            }
            "background-job-server.permanently-delete-deleted-jobs-after" => {
                self.background_job_server.permanently_delete_deleted_jobs_after =
                    Some(parse_value(key, value)?)
            }
            "dashboard.enabled" => self.dashboard.enabled = Some(parse_value(key, value)?),
            "dashboard.port" => self.dashboard.port = Some(parse_value(key, value)?),
            "dashboard.username" => self.dashboard.username = non_empty(value),
            "dashboard.password" => self.dashboard.password = verbatim(value),
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.to_string(),
                })
            }
        }
        Ok(())
    }

    /// Apply `top` over `self`; fields set in `top` win.
    pub fn merge(&mut self, top: ConfigLayer) {
        let ConfigLayer {
            database,
            jobs,
            job_scheduler,
            background_job_server,
            dashboard,
        } = top;

        overlay(&mut self.database.skip_create, database.skip_create);
        overlay(&mut self.database.database_name, database.database_name);
        overlay(&mut self.database.table_prefix, database.table_prefix);
        overlay(&mut self.database.datasource, database.datasource);
        overlay(&mut self.database.backend_type, database.backend_type);

        overlay(
            &mut self.jobs.default_number_of_retries,
            jobs.default_number_of_retries,
        );
        overlay(&mut self.jobs.back_off_time_seed, jobs.back_off_time_seed);

        overlay(&mut self.job_scheduler.enabled, job_scheduler.enabled);
        overlay(
            &mut self.job_scheduler.job_details_generator,
            job_scheduler.job_details_generator,
        );

        let server = &mut self.background_job_server;
        overlay(&mut server.enabled, background_job_server.enabled);
        overlay(&mut server.worker_count, background_job_server.worker_count);
        overlay(
            &mut server.poll_interval_in_seconds,
            background_job_server.poll_interval_in_seconds,
        );
        overlay(
            &mut server.delete_succeeded_jobs_after,
            background_job_server.delete_succeeded_jobs_after,
        );
        overlay(
            &mut server.permanently_delete_deleted_jobs_after,
            background_job_server.permanently_delete_deleted_jobs_after,
        );

        overlay(&mut self.dashboard.enabled, dashboard.enabled);
        overlay(&mut self.dashboard.port, dashboard.port);
        overlay(&mut self.dashboard.username, dashboard.username);
        overlay(&mut self.dashboard.password, dashboard.password);
    }

    pub fn skip_create(mut self, skip: bool) -> Self {
        self.database.skip_create = Some(skip);
        self
    }

    pub fn database_name(mut self, name: impl Into<String>) -> Self {
        self.database.database_name = Some(name.into());
        self
    }

    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.database.table_prefix = Some(prefix.into());
        self
    }

    pub fn datasource(mut self, name: impl Into<String>) -> Self {
        self.database.datasource = Some(name.into());
        self
    }

    pub fn backend_type(mut self, backend: BackendType) -> Self {
        self.database.backend_type = Some(backend);
        self
    }

    pub fn default_number_of_retries(mut self, retries: i64) -> Self {
        self.jobs.default_number_of_retries = Some(retries);
        self
    }

    pub fn back_off_time_seed(mut self, seed: i64) -> Self {
        self.jobs.back_off_time_seed = Some(seed);
        self
    }

    pub fn scheduler_enabled(mut self, enabled: bool) -> Self {
        self.job_scheduler.enabled = Some(enabled);
        self
    }

    pub fn job_details_generator(mut self, id: impl Into<String>) -> Self {
        self.job_scheduler.job_details_generator = Some(id.into());
        self
    }

    pub fn server_enabled(mut self, enabled: bool) -> Self {
        self.background_job_server.enabled = Some(enabled);
        self
    }

    pub fn worker_count(mut self, count: i64) -> Self {
        self.background_job_server.worker_count = Some(count);
        self
    }

    pub fn poll_interval_in_seconds(mut self, seconds: i64) -> Self {
        self.background_job_server.poll_interval_in_seconds = Some(seconds);
        self
    }

    pub fn delete_succeeded_jobs_after(mut self, after: impl Into<ConfigDuration>) -> Self {
        self.background_job_server.delete_succeeded_jobs_after = Some(after.into());
        self
    }

    pub fn permanently_delete_deleted_jobs_after(
        mut self,
        after: impl Into<ConfigDuration>,
    ) -> Self {
        self.background_job_server.permanently_delete_deleted_jobs_after = Some(after.into());
        self
    }

    pub fn dashboard_enabled(mut self, enabled: bool) -> Self {
        self.dashboard.enabled = Some(enabled);
        self
    }

    pub fn dashboard_port(mut self, port: i64) -> Self {
        self.dashboard.port = Some(port);
        self
    }

    pub fn dashboard_username(mut self, username: impl Into<String>) -> Self {
        self.dashboard.username = Some(username.into());
        self
    }

    pub fn dashboard_password(mut self, password: impl Into<String>) -> Self {
        self.dashboard.password = Some(password.into());
        self
    }
}
