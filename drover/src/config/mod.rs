//! Validated, immutable configuration for the scheduler, worker server,
//! persistence layer and dashboard.
//!
//! A [`DroverConfig`] is produced once by [`ConfigLoader`], which merges
//! ordered [`ConfigLayer`]s over the built-in defaults and validates the
//! result. After that nothing can fail: every accessor is a plain read.

mod duration;
mod layer;
mod loader;

use std::time::Duration;

use serde::Serialize;
use tracing::warn;

pub use duration::{format_duration, parse_duration, ConfigDuration};
pub use layer::{
    env_var_name, BackgroundJobServerLayer, ConfigLayer, DashboardLayer, DatabaseLayer,
    JobSchedulerLayer, JobsLayer, PROPERTY_KEYS, ROOT_NAMESPACE,
};
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};

use crate::details::JobDetailsStrategy;
use crate::error::ConfigError;
use crate::policy::RetryPolicy;
use crate::storage::BackendType;

pub const DEFAULT_NUMBER_OF_RETRIES: u32 = 10;
pub const DEFAULT_BACKOFF_TIME_SEED: u32 = 3;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u32 = 15;
pub const DEFAULT_DELETE_SUCCEEDED_AFTER_HOURS: u64 = 36;
pub const DEFAULT_PERMANENTLY_DELETE_AFTER_HOURS: u64 = 72;
pub const DEFAULT_DASHBOARD_PORT: u16 = 8000;

/// Persistence settings. Some fields only matter to specific backends.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceSettings {
    skip_create: bool,
    database_name: Option<String>,
    table_prefix: Option<String>,
    datasource: Option<String>,
    backend_type: Option<BackendType>,
}

impl PersistenceSettings {
    /// Whether providers must leave schema creation to external migrations.
    pub fn skip_table_creation(&self) -> bool {
        self.skip_create
    }

    /// Database name for document stores.
    pub fn database_name(&self) -> Option<&str> {
        self.database_name.as_deref()
    }

    /// Prefix applied to every schema object name.
    pub fn table_prefix(&self) -> Option<&str> {
        self.table_prefix.as_deref()
    }

    /// Named connection to use instead of the default one.
    pub fn named_connection(&self) -> Option<&str> {
        self.datasource.as_deref()
    }

    /// Explicit backend type; `None` means infer from connection candidates.
    pub fn backend_type(&self) -> Option<BackendType> {
        self.backend_type
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobPolicySettings {
    default_number_of_retries: u32,
    back_off_time_seed: u32,
}

impl Default for JobPolicySettings {
    fn default() -> Self {
        Self {
            default_number_of_retries: DEFAULT_NUMBER_OF_RETRIES,
            back_off_time_seed: DEFAULT_BACKOFF_TIME_SEED,
        }
    }
}

impl JobPolicySettings {
    pub fn default_retry_count(&self) -> u32 {
        self.default_number_of_retries
    }

    pub fn retry_backoff_seed(&self) -> u32 {
        self.back_off_time_seed
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.default_number_of_retries, self.back_off_time_seed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchedulerSettings {
    enabled: bool,
    job_details_strategy: JobDetailsStrategy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            job_details_strategy: JobDetailsStrategy::Caching,
        }
    }
}

impl SchedulerSettings {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn job_details_strategy(&self) -> JobDetailsStrategy {
        self.job_details_strategy
    }
}

/// Worker server settings.
///
/// `retain_succeeded_jobs_for` is expected to be shorter than
/// `purge_deleted_jobs_after`; the loader warns when it is not.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerServerSettings {
    enabled: bool,
    worker_count: Option<u32>,
    resolved_worker_count: usize,
    poll_interval_in_seconds: u32,
    delete_succeeded_jobs_after: ConfigDuration,
    permanently_delete_deleted_jobs_after: ConfigDuration,
}

impl Default for WorkerServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: None,
            resolved_worker_count: available_workers(),
            poll_interval_in_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            delete_succeeded_jobs_after: ConfigDuration::from_hours(
                DEFAULT_DELETE_SUCCEEDED_AFTER_HOURS,
            ),
            permanently_delete_deleted_jobs_after: ConfigDuration::from_hours(
                DEFAULT_PERMANENTLY_DELETE_AFTER_HOURS,
            ),
        }
    }
}

impl WorkerServerSettings {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Number of workers, resolved to the available parallelism when unset.
    pub fn worker_count(&self) -> usize {
        self.resolved_worker_count
    }

    /// The explicitly configured worker count, if any.
    pub fn configured_worker_count(&self) -> Option<u32> {
        self.worker_count
    }

    pub fn poll_interval_seconds(&self) -> u32 {
        self.poll_interval_in_seconds
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.poll_interval_in_seconds))
    }

    /// How long succeeded jobs are kept before moving to the deleted state.
    pub fn retain_succeeded_jobs_for(&self) -> Duration {
        self.delete_succeeded_jobs_after.as_duration()
    }

    /// How long deleted jobs are kept before being removed for good.
    pub fn purge_deleted_jobs_after(&self) -> Duration {
        self.permanently_delete_deleted_jobs_after.as_duration()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DashboardSettings {
    enabled: bool,
    port: u16,
    username: Option<String>,
    #[serde(skip_serializing)]
    password: Option<String>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_DASHBOARD_PORT,
            username: None,
            password: None,
        }
    }
}

impl DashboardSettings {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Basic-auth credentials; present only when both halves are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.username().zip(self.password())
    }
}

/// The complete, validated configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DroverConfig {
    database: PersistenceSettings,
    jobs: JobPolicySettings,
    job_scheduler: SchedulerSettings,
    background_job_server: WorkerServerSettings,
    dashboard: DashboardSettings,
}

fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn positive_u32(field: &'static str, value: i64) -> Result<u32, ConfigError> {
    if value <= 0 {
        return Err(ConfigError::invalid(
            field,
            format!("must be greater than 0, got {value}"),
        ));
    }
    u32::try_from(value)
        .map_err(|_| ConfigError::invalid(field, format!("must be at most {}, got {value}", u32::MAX)))
}

fn non_zero_duration(
    field: &'static str,
    value: Option<ConfigDuration>,
    default_hours: u64,
) -> Result<ConfigDuration, ConfigError> {
    let value = value.unwrap_or(ConfigDuration::from_hours(default_hours));
    if value.as_duration().is_zero() {
        return Err(ConfigError::invalid(field, "must be a non-zero duration"));
    }
    Ok(value)
}

impl DroverConfig {
    /// Apply defaults to a merged layer and validate every constraint.
    pub fn from_layer(layer: ConfigLayer) -> Result<Self, ConfigError> {
        let ConfigLayer {
            database,
            jobs,
            job_scheduler,
            background_job_server: server,
            dashboard,
        } = layer;

        if let Some(prefix) = database.table_prefix.as_deref() {
            if let Some(bad) = prefix
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '.'))
            {
                return Err(ConfigError::invalid(
                    "database.table-prefix",
                    format!("may only contain ASCII letters, digits, `_` and `.`, found `{bad}`"),
                ));
            }
        }
        let database = PersistenceSettings {
            skip_create: database.skip_create.unwrap_or(false),
            database_name: database.database_name,
            table_prefix: database.table_prefix,
            datasource: database.datasource,
            backend_type: database.backend_type,
        };

        let retries = jobs
            .default_number_of_retries
            .unwrap_or(i64::from(DEFAULT_NUMBER_OF_RETRIES));
        if retries < 0 {
            return Err(ConfigError::invalid(
                "jobs.default-number-of-retries",
                format!("must not be negative, got {retries}"),
            ));
        }
        let jobs = JobPolicySettings {
            default_number_of_retries: u32::try_from(retries).map_err(|_| {
                ConfigError::invalid(
                    "jobs.default-number-of-retries",
                    format!("must be at most {}, got {retries}", u32::MAX),
                )
            })?,
            back_off_time_seed: positive_u32(
                "jobs.back-off-time-seed",
                jobs.back_off_time_seed
                    .unwrap_or(i64::from(DEFAULT_BACKOFF_TIME_SEED)),
            )?,
        };

        let job_details_strategy = match job_scheduler.job_details_generator.as_deref() {
            Some(id) => id.parse::<JobDetailsStrategy>().map_err(|reason| {
                ConfigError::invalid("job-scheduler.job-details-generator", reason)
            })?,
            None => JobDetailsStrategy::Caching,
        };
        let job_scheduler = SchedulerSettings {
            enabled: job_scheduler.enabled.unwrap_or(true),
            job_details_strategy,
        };

        let worker_count = server
            .worker_count
            .map(|count| positive_u32("background-job-server.worker-count", count))
            .transpose()?;
        let background_job_server = WorkerServerSettings {
            enabled: server.enabled.unwrap_or(false),
            worker_count,
            resolved_worker_count: worker_count
                .map(|count| count as usize)
                .unwrap_or_else(available_workers),
            poll_interval_in_seconds: positive_u32(
                "background-job-server.poll-interval-in-seconds",
                server
                    .poll_interval_in_seconds
                    .unwrap_or(i64::from(DEFAULT_POLL_INTERVAL_SECONDS)),
            )?,
            delete_succeeded_jobs_after: non_zero_duration(
                "background-job-server.delete-succeeded-jobs-after",
                server.delete_succeeded_jobs_after,
                DEFAULT_DELETE_SUCCEEDED_AFTER_HOURS,
            )?,
            permanently_delete_deleted_jobs_after: non_zero_duration(
                "background-job-server.permanently-delete-deleted-jobs-after",
                server.permanently_delete_deleted_jobs_after,
                DEFAULT_PERMANENTLY_DELETE_AFTER_HOURS,
            )?,
        };
        if background_job_server.delete_succeeded_jobs_after
            >= background_job_server.permanently_delete_deleted_jobs_after
        {
            warn!(
                delete_succeeded_jobs_after = %background_job_server.delete_succeeded_jobs_after,
                permanently_delete_deleted_jobs_after = %background_job_server.permanently_delete_deleted_jobs_after,
                "succeeded jobs are retained at least as long as deleted jobs"
            );
        }

        let port = dashboard.port.unwrap_or(i64::from(DEFAULT_DASHBOARD_PORT));
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| {
                ConfigError::invalid("dashboard.port", format!("must be in 1..=65535, got {port}"))
            })?;
        match (&dashboard.username, &dashboard.password) {
            (Some(_), None) => {
                return Err(ConfigError::invalid(
                    "dashboard.password",
                    "must be set when dashboard.username is set",
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::invalid(
                    "dashboard.username",
                    "must be set when dashboard.password is set",
                ))
            }
            _ => {}
        }
        let dashboard = DashboardSettings {
            enabled: dashboard.enabled.unwrap_or(false),
            port,
            username: dashboard.username,
            password: dashboard.password,
        };

        Ok(Self {
            database,
            jobs,
            job_scheduler,
            background_job_server,
            dashboard,
        })
    }

    pub fn persistence(&self) -> &PersistenceSettings {
        &self.database
    }

    pub fn job_policy(&self) -> &JobPolicySettings {
        &self.jobs
    }

    pub fn scheduler(&self) -> &SchedulerSettings {
        &self.job_scheduler
    }

    pub fn worker_server(&self) -> &WorkerServerSettings {
        &self.background_job_server
    }

    pub fn dashboard(&self) -> &DashboardSettings {
        &self.dashboard
    }

    /// Render the configuration as namespaced properties.
    ///
    /// Unset optional values are omitted; durations use their canonical form.
    /// Loading the output through [`ConfigLayer::from_properties`] yields an
    /// equal configuration.
    pub fn to_properties(&self) -> Vec<(String, String)> {
        let mut props: Vec<(&str, String)> = Vec::new();

        let db = &self.database;
        props.push(("database.skip-create", db.skip_create.to_string()));
        if let Some(name) = &db.database_name {
            props.push(("database.database-name", name.clone()));
        }
        if let Some(prefix) = &db.table_prefix {
            props.push(("database.table-prefix", prefix.clone()));
        }
        if let Some(datasource) = &db.datasource {
            props.push(("database.datasource", datasource.clone()));
        }
        if let Some(backend) = db.backend_type {
            props.push(("database.type", backend.as_str().to_string()));
        }

        props.push((
            "jobs.default-number-of-retries",
            self.jobs.default_number_of_retries.to_string(),
        ));
        props.push((
            "jobs.back-off-time-seed",
            self.jobs.back_off_time_seed.to_string(),
        ));

        props.push((
            "job-scheduler.enabled",
            self.job_scheduler.enabled.to_string(),
        ));
        props.push((
            "job-scheduler.job-details-generator",
            self.job_scheduler.job_details_strategy.id().to_string(),
        ));

        let server = &self.background_job_server;
        props.push(("background-job-server.enabled", server.enabled.to_string()));
        if let Some(count) = server.worker_count {
            props.push(("background-job-server.worker-count", count.to_string()));
        }
        props.push((
            "background-job-server.poll-interval-in-seconds",
            server.poll_interval_in_seconds.to_string(),
        ));
        props.push((
            "background-job-server.delete-succeeded-jobs-after",
            server.delete_succeeded_jobs_after.to_string(),
        ));
        props.push((
            "background-job-server.permanently-delete-deleted-jobs-after",
            server.permanently_delete_deleted_jobs_after.to_string(),
        ));

        props.push(("dashboard.enabled", self.dashboard.enabled.to_string()));
        props.push(("dashboard.port", self.dashboard.port.to_string()));
        if let Some((username, password)) = self.dashboard.credentials() {
            props.push(("dashboard.username", username.to_string()));
            props.push(("dashboard.password", password.to_string()));
        }

        props
            .into_iter()
            .map(|(key, value)| (format!("{ROOT_NAMESPACE}.{key}"), value))
            .collect()
    }

    /// Render the configuration as environment variables under `prefix`.
    pub fn to_env_vars(&self, prefix: &str) -> Vec<(String, String)> {
        self.to_properties()
            .into_iter()
            .map(|(key, value)| {
                let bare = key
                    .strip_prefix(ROOT_NAMESPACE)
                    .and_then(|k| k.strip_prefix('.'))
                    .unwrap_or(&key);
                (env_var_name(prefix, bare), value)
            })
            .collect()
    }
}
