//! End-to-end harness for storage backends.
//!
//! A [`BackgroundJobContainer`] runs one scenario: start a database for a
//! [`BackendVariant`], build a storage provider against it, start the
//! application configured for the same database, submit a job and poll it
//! to a terminal state. Both containers are torn down on every exit path.
//!
//! ```ignore
//! let harness = BackgroundJobContainer::new(
//!     Box::new(MySqlVariant::new()),
//!     Arc::new(DockerApplicationLauncher::new()?),
//! );
//! let report = harness.run_scenario(sample_jobs::noop()).await?;
//! assert_eq!(report.job_state, JobState::Succeeded);
//! ```

mod application;
mod mysql;
mod postgres;
mod variant;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use drover::storage::{StorageProvider, StorageProviderFactory};
use drover::{DroverConfig, JobId, JobRequest, JobScheduler, JobState, SchedulerError, StorageError};
use drover::telemetry::{instrument_scenario, record_job_outcome, PhaseTimer};
use tracing::{info, warn};

pub use application::{
    application_env, ApplicationHandle, ApplicationLaunch, ApplicationLauncher,
    DockerApplicationLauncher,
};
pub use mysql::MySqlVariant;
pub use postgres::PostgresVariant;
pub use variant::{
    BackendVariant, ContainerHandle, DatabaseHandle, Endpoint, ImageRef, Sandbox, Testcontainer,
};

/// Steps of one scenario, in order. `JobSucceeded`, `JobFailed` and
/// `TimedOut` are alternatives; `TornDown` always comes last.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ScenarioState {
    Created,
    DatabaseStarting,
    DatabaseReady,
    ApplicationStarting,
    ApplicationReady,
    JobSubmitted,
    JobPolling,
    JobSucceeded,
    JobFailed,
    TimedOut,
    TornDown,
}

impl ScenarioState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioState::Created => "created",
            ScenarioState::DatabaseStarting => "database_starting",
            ScenarioState::DatabaseReady => "database_ready",
            ScenarioState::ApplicationStarting => "application_starting",
            ScenarioState::ApplicationReady => "application_ready",
            ScenarioState::JobSubmitted => "job_submitted",
            ScenarioState::JobPolling => "job_polling",
            ScenarioState::JobSucceeded => "job_succeeded",
            ScenarioState::JobFailed => "job_failed",
            ScenarioState::TimedOut => "timed_out",
            ScenarioState::TornDown => "torn_down",
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time budgets for one scenario.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessSettings {
    pub database_startup_timeout: Duration,
    pub application_startup_timeout: Duration,
    /// Spacing between job-state checks and between readiness probes.
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    /// Upper bound for everything before teardown.
    pub scenario_deadline: Duration,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            database_startup_timeout: Duration::from_secs(120),
            application_startup_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            max_poll_attempts: 60,
            scenario_deadline: Duration::from_secs(300),
        }
    }
}

/// Why a scenario did not reach `JobSucceeded`.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("database did not become healthy: {0}")]
    BackendUnavailable(String),

    #[error("storage provider construction failed: {0}")]
    Storage(#[from] StorageError),

    #[error("job submission failed: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("application did not become ready: {0}")]
    ApplicationUnavailable(String),

    #[error("job {job_id} still {job_state} after {attempts} polls")]
    TimedOut {
        job_id: JobId,
        job_state: JobState,
        attempts: u32,
    },

    #[error("job {job_id} ended {job_state}: {}", .error.as_deref().unwrap_or("no error recorded"))]
    JobFailed {
        job_id: JobId,
        job_state: JobState,
        error: Option<String>,
    },

    #[error("scenario deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("teardown failed: {0}")]
    Teardown(String),
}

/// A failed scenario with the last state it reached and how long it ran.
#[derive(Debug, thiserror::Error)]
#[error("{variant} scenario failed in {last_state} after {elapsed:?}: {cause}")]
pub struct ScenarioError {
    pub variant: String,
    pub last_state: ScenarioState,
    pub elapsed: Duration,
    pub transitions: Vec<ScenarioState>,
    #[source]
    pub cause: HarnessError,
}

/// Outcome of a successful scenario.
#[derive(Clone, Debug)]
pub struct ScenarioReport {
    pub variant: String,
    pub final_state: ScenarioState,
    pub job_id: JobId,
    pub job_state: JobState,
    /// Polls needed to observe the terminal state.
    pub attempts: u32,
    pub elapsed: Duration,
    /// Schema objects present in the database before teardown.
    pub schema_objects: Vec<String>,
    pub transitions: Vec<ScenarioState>,
}

struct Tracker {
    variant: String,
    state: ScenarioState,
    transitions: Vec<ScenarioState>,
    started: Instant,
}

impl Tracker {
    fn new(variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            state: ScenarioState::Created,
            transitions: vec![ScenarioState::Created],
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: ScenarioState) {
        info!(
            variant = %self.variant,
            from = %self.state,
            to = %next,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "scenario transition"
        );
        self.state = next;
        self.transitions.push(next);
    }
}

/// Resources acquired so far; whatever is present gets torn down.
#[derive(Default)]
struct Resources {
    database: Option<DatabaseHandle>,
    storage: Option<Arc<dyn StorageProvider>>,
    application: Option<Box<dyn ApplicationHandle>>,
}

struct Observed {
    job_id: JobId,
    job_state: JobState,
    attempts: u32,
}

/// Runs the end-to-end scenario for one backend variant.
pub struct BackgroundJobContainer {
    variant: Box<dyn BackendVariant>,
    launcher: Arc<dyn ApplicationLauncher>,
    factory: StorageProviderFactory,
    config: DroverConfig,
    settings: HarnessSettings,
    sandbox: Sandbox,
}

impl BackgroundJobContainer {
    pub fn new(variant: Box<dyn BackendVariant>, launcher: Arc<dyn ApplicationLauncher>) -> Self {
        Self {
            variant,
            launcher,
            factory: StorageProviderFactory::with_defaults(),
            config: DroverConfig::default(),
            settings: HarnessSettings::default(),
            sandbox: Sandbox::new(),
        }
    }

    pub fn with_config(mut self, config: DroverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_factory(mut self, factory: StorageProviderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn config(&self) -> &DroverConfig {
        &self.config
    }

    /// Run the scenario for `job`.
    ///
    /// Teardown runs whatever happened before it. A teardown failure after a
    /// successful job is reported as [`HarnessError::Teardown`]; after a
    /// failed one it is logged and the original cause is returned.
    pub async fn run_scenario(&self, job: JobRequest) -> Result<ScenarioReport, ScenarioError> {
        instrument_scenario(self.variant.name(), self.sandbox.id(), self.run(job)).await
    }

    async fn run(&self, job: JobRequest) -> Result<ScenarioReport, ScenarioError> {
        let mut tracker = Tracker::new(self.variant.name());
        let mut resources = Resources::default();

        let deadline = self.settings.scenario_deadline;
        let driven = tokio::time::timeout(deadline, self.drive(&mut tracker, &mut resources, job))
            .await
            .unwrap_or(Err(HarnessError::DeadlineExceeded(deadline)));

        let schema_objects = match &resources.storage {
            Some(storage) => storage.existing_schema_objects().await.unwrap_or_else(|e| {
                warn!(error = %e, "could not list schema objects");
                Vec::new()
            }),
            None => Vec::new(),
        };
        // Recorded before teardown so failures report the state that failed.
        let last_state = tracker.state;

        let teardown = self.teardown(resources).await;
        tracker.advance(ScenarioState::TornDown);
        let elapsed = tracker.started.elapsed();

        let fail = |cause: HarnessError, transitions: Vec<ScenarioState>| ScenarioError {
            variant: self.variant.name().to_string(),
            last_state,
            elapsed,
            transitions,
            cause,
        };

        match (driven, teardown) {
            (Ok(observed), Ok(())) => {
                record_job_outcome(
                    observed.job_id.to_string(),
                    observed.job_state.as_str(),
                    elapsed.as_secs_f64(),
                );
                Ok(ScenarioReport {
                    variant: self.variant.name().to_string(),
                    final_state: last_state,
                    job_id: observed.job_id,
                    job_state: observed.job_state,
                    attempts: observed.attempts,
                    elapsed,
                    schema_objects,
                    transitions: tracker.transitions,
                })
            }
            (Ok(_), Err(e)) => Err(fail(HarnessError::Teardown(e), tracker.transitions)),
            (Err(cause), teardown) => {
                if let Err(e) = teardown {
                    warn!(error = %e, "teardown failed after scenario failure");
                }
                Err(fail(cause, tracker.transitions))
            }
        }
    }

    async fn drive(
        &self,
        tracker: &mut Tracker,
        resources: &mut Resources,
        job: JobRequest,
    ) -> Result<Observed, HarnessError> {
        let settings = &self.settings;

        tracker.advance(ScenarioState::DatabaseStarting);
        let timer = PhaseTimer::start("database_startup");
        let startup = settings.database_startup_timeout;
        let database = tokio::time::timeout(
            startup,
            self.variant.start_database(&self.sandbox, startup),
        )
        .await
        .map_err(|_| HarnessError::BackendUnavailable(format!("no healthy database after {startup:?}")))?
        .map_err(|e| HarnessError::BackendUnavailable(format!("{e:#}")))?;
        info!(
            container = database.container_id(),
            external = %database.external,
            elapsed_ms = timer.finish().as_millis() as u64,
            "database ready"
        );
        let database = &*resources.database.insert(database);
        tracker.advance(ScenarioState::DatabaseReady);

        tracker.advance(ScenarioState::ApplicationStarting);
        let timer = PhaseTimer::start("application_startup");
        let storage = self
            .variant
            .init_storage_provider(database, self.config.persistence(), &self.factory)
            .await?;
        resources.storage = Some(storage.clone());

        let launch = ApplicationLaunch {
            sandbox: &self.sandbox,
            image: self.variant.application_image(),
            config: &self.config,
            descriptor: self.variant.connection_descriptor(database, &database.internal),
            storage: storage.clone(),
            startup_timeout: settings.application_startup_timeout,
        };
        let application = self
            .launcher
            .launch(launch)
            .await
            .map_err(|e| HarnessError::ApplicationUnavailable(format!("{e:#}")))?;
        let application = resources.application.insert(application);
        self.wait_until_ready(application.as_ref()).await?;
        info!(
            application = application.id(),
            elapsed_ms = timer.finish().as_millis() as u64,
            "application ready"
        );
        tracker.advance(ScenarioState::ApplicationReady);

        let scheduler = JobScheduler::new(&self.config, storage)?;
        let job_id = scheduler.enqueue(job).await?;
        tracing::Span::current().record("job_id", tracing::field::display(job_id));
        tracker.advance(ScenarioState::JobSubmitted);

        tracker.advance(ScenarioState::JobPolling);
        let mut job_state = JobState::Enqueued;
        for attempt in 1..=settings.max_poll_attempts {
            let record = scheduler.job(job_id).await?;
            job_state = record.state;
            match job_state {
                JobState::Succeeded => {
                    tracker.advance(ScenarioState::JobSucceeded);
                    return Ok(Observed {
                        job_id,
                        job_state,
                        attempts: attempt,
                    });
                }
                JobState::Failed | JobState::Deleted => {
                    tracker.advance(ScenarioState::JobFailed);
                    return Err(HarnessError::JobFailed {
                        job_id,
                        job_state,
                        error: record.last_error,
                    });
                }
                _ if attempt < settings.max_poll_attempts => {
                    tokio::time::sleep(settings.poll_interval).await
                }
                _ => {}
            }
        }

        tracker.advance(ScenarioState::TimedOut);
        Err(HarnessError::TimedOut {
            job_id,
            job_state,
            attempts: settings.max_poll_attempts,
        })
    }

    async fn wait_until_ready(&self, application: &dyn ApplicationHandle) -> Result<(), HarnessError> {
        let timeout = self.settings.application_startup_timeout;
        let probe = async {
            loop {
                match application.is_ready().await {
                    Ok(true) => return Ok(()),
                    Ok(false) => {}
                    Err(e) => return Err(HarnessError::ApplicationUnavailable(format!("{e:#}"))),
                }
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, probe).await.map_err(|_| {
            HarnessError::ApplicationUnavailable(format!(
                "{} not ready after {timeout:?}",
                application.id()
            ))
        })?
    }

    /// Stop the application, then the database. Both are attempted even if
    /// the first fails.
    async fn teardown(&self, resources: Resources) -> Result<(), String> {
        let mut errors = Vec::new();
        drop(resources.storage);

        if let Some(application) = resources.application {
            let id = application.id().to_string();
            if let Err(e) = application.stop().await {
                errors.push(format!("application {id}: {e:#}"));
            }
        }
        if let Some(database) = resources.database {
            let id = database.container_id().to_string();
            if let Err(e) = database.stop().await {
                errors.push(format!("database {id}: {e:#}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = HarnessSettings::default();
        assert_eq!(settings.database_startup_timeout, Duration::from_secs(120));
        assert_eq!(settings.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.max_poll_attempts, 60);
        assert!(settings.scenario_deadline > settings.database_startup_timeout);
    }

    #[test]
    fn test_tracker_records_transitions_in_order() {
        let mut tracker = Tracker::new("mysql");
        tracker.advance(ScenarioState::DatabaseStarting);
        tracker.advance(ScenarioState::DatabaseReady);

        assert_eq!(tracker.state, ScenarioState::DatabaseReady);
        assert_eq!(
            tracker.transitions,
            vec![
                ScenarioState::Created,
                ScenarioState::DatabaseStarting,
                ScenarioState::DatabaseReady
            ]
        );
    }

    #[test]
    fn test_scenario_error_names_state_and_cause() {
        let err = ScenarioError {
            variant: "mysql".to_string(),
            last_state: ScenarioState::DatabaseStarting,
            elapsed: Duration::from_secs(3),
            transitions: vec![],
            cause: HarnessError::BackendUnavailable("refused".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("database_starting"));
        assert!(message.contains("refused"));
    }
}
