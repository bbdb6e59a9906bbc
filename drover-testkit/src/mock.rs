use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use drover::storage::{BackendType, ConnectionDescriptor, StorageProvider, StorageProviderFactory};
use drover::JobState;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::harness::{
    application_env, ApplicationHandle, ApplicationLaunch, ApplicationLauncher, BackendVariant,
    ContainerHandle, DatabaseHandle, Endpoint, ImageRef, Sandbox,
};
use crate::storage::{InMemoryDatabase, InMemoryStorageVariant};

/// Container stand-in that counts stops.
pub struct FakeContainer {
    id: String,
    stops: Arc<AtomicUsize>,
    fail_stop: bool,
}

impl FakeContainer {
    pub fn new(id: impl Into<String>, stops: Arc<AtomicUsize>) -> Self {
        Self {
            id: id.into(),
            stops,
            fail_stop: false,
        }
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait]
impl ContainerHandle for FakeContainer {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            anyhow::bail!("container {} did not stop", self.id);
        }
        Ok(())
    }
}

/// How [`InMemoryVariant::start_database`] behaves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DatabaseBehaviour {
    Healthy,
    /// Startup returns an error.
    Fails,
    /// Startup never completes.
    Hangs,
}

/// Backend variant over an [`InMemoryDatabase`], for exercising the harness
/// without Docker.
#[derive(Clone)]
pub struct InMemoryVariant {
    database: InMemoryDatabase,
    behaviour: DatabaseBehaviour,
    fail_stop: bool,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl Default for InMemoryVariant {
    fn default() -> Self {
        Self {
            database: InMemoryDatabase::new(),
            behaviour: DatabaseBehaviour::Healthy,
            fail_stop: false,
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl InMemoryVariant {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(mut self, behaviour: DatabaseBehaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    /// Make the database container fail to stop.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.database
    }

    /// A factory that connects to this variant's database.
    pub fn factory(&self) -> StorageProviderFactory {
        StorageProviderFactory::new()
            .with_variant(Arc::new(InMemoryStorageVariant::new(self.database.clone())))
    }

    pub fn databases_started(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn databases_stopped(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendVariant for InMemoryVariant {
    fn name(&self) -> &str {
        "memory"
    }

    fn application_image(&self) -> ImageRef {
        ImageRef::new("drover-e2e-memory", "test")
    }

    async fn start_database(
        &self,
        sandbox: &Sandbox,
        _startup_timeout: Duration,
    ) -> anyhow::Result<DatabaseHandle> {
        match self.behaviour {
            DatabaseBehaviour::Healthy => {}
            DatabaseBehaviour::Fails => anyhow::bail!("database exited during startup"),
            DatabaseBehaviour::Hangs => std::future::pending::<()>().await,
        }

        self.starts.fetch_add(1, Ordering::SeqCst);
        let name = sandbox.container_name("memory");
        let mut container = FakeContainer::new(name.clone(), self.stops.clone());
        if self.fail_stop {
            container = container.failing_stop();
        }
        Ok(DatabaseHandle::new(
            Box::new(container),
            Endpoint::new("localhost", 0),
            Endpoint::new(name, 0),
            "memory",
            "drover",
            "",
        ))
    }

    fn connection_descriptor(
        &self,
        database: &DatabaseHandle,
        endpoint: &Endpoint,
    ) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            BackendType::Sql,
            format!("memory://{}/{}", endpoint.authority(), database.database),
        )
        .with_credentials(&database.username, &database.password)
    }
}

/// What the fake application's worker does with enqueued jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FakeOutcome {
    Succeed,
    Fail,
    /// Leave jobs enqueued.
    Ignore,
}

/// Launches an in-process stand-in for the application container. Its
/// worker moves enqueued jobs through `Processing` to the configured outcome
/// using the shared storage provider.
#[derive(Clone)]
pub struct FakeApplicationLauncher {
    outcome: FakeOutcome,
    ready_after: u32,
    never_ready: bool,
    tick: Duration,
    launches: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    stops: Arc<AtomicUsize>,
}

impl FakeApplicationLauncher {
    pub fn new(outcome: FakeOutcome) -> Self {
        Self {
            outcome,
            ready_after: 0,
            never_ready: false,
            tick: Duration::from_millis(5),
            launches: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report not-ready for the first `probes` readiness probes.
    pub fn ready_after(mut self, probes: u32) -> Self {
        self.ready_after = probes;
        self
    }

    pub fn never_ready(mut self) -> Self {
        self.never_ready = true;
        self
    }

    /// Environment of every launch so far.
    pub fn launches(&self) -> Vec<Vec<(String, String)>> {
        self.launches.lock().clone()
    }

    pub fn applications_stopped(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

async fn work(storage: Arc<dyn StorageProvider>, outcome: FakeOutcome, tick: Duration) {
    let terminal = match outcome {
        FakeOutcome::Succeed => JobState::Succeeded,
        FakeOutcome::Fail => JobState::Failed,
        FakeOutcome::Ignore => return,
    };
    loop {
        tokio::time::sleep(tick).await;
        let now = Utc::now();
        let picked = storage
            .move_by_state_before(JobState::Enqueued, JobState::Processing, now)
            .await;
        let finished = storage
            .move_by_state_before(JobState::Processing, terminal, now)
            .await;
        match (picked, finished) {
            (Ok(picked), Ok(finished)) if picked + finished > 0 => {
                debug!(picked, finished, "fake worker tick");
            }
            (Ok(_), Ok(_)) => {}
            (Err(e), _) | (_, Err(e)) => debug!(error = %e, "fake worker storage error"),
        }
    }
}

#[async_trait]
impl ApplicationLauncher for FakeApplicationLauncher {
    async fn launch(
        &self,
        launch: ApplicationLaunch<'_>,
    ) -> anyhow::Result<Box<dyn ApplicationHandle>> {
        self.launches
            .lock()
            .push(application_env(launch.config, &launch.descriptor));

        let worker = tokio::spawn(work(launch.storage.clone(), self.outcome, self.tick));
        Ok(Box::new(FakeApplication {
            id: launch.sandbox.container_name("app"),
            ready_after: self.ready_after,
            never_ready: self.never_ready,
            probes: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
            stops: self.stops.clone(),
            worker,
        }))
    }
}

struct FakeApplication {
    id: String,
    ready_after: u32,
    never_ready: bool,
    probes: AtomicU32,
    stopped: AtomicBool,
    stops: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

#[async_trait]
impl ApplicationHandle for FakeApplication {
    fn id(&self) -> &str {
        &self.id
    }

    async fn is_ready(&self) -> anyhow::Result<bool> {
        if self.never_ready || self.stopped.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let seen = self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(seen >= self.ready_after)
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.worker.abort();
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
