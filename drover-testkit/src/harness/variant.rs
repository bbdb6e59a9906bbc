use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover::config::PersistenceSettings;
use drover::storage::{
    BackendType, ConnectionDescriptor, StorageProvider, StorageProviderFactory,
};
use drover::StorageError;
use testcontainers::{ContainerAsync, Image};
use uuid::Uuid;

/// Isolation boundary for one scenario: a dedicated container network and
/// container names no other harness instance will use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sandbox {
    id: String,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn network(&self) -> String {
        format!("drover-e2e-{}", self.id)
    }

    /// Container name for `role`; also its hostname on the sandbox network.
    pub fn container_name(&self, role: &str) -> String {
        format!("drover-e2e-{}-{role}", self.id)
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Image name and tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// A running container the harness must stop.
#[async_trait]
pub trait ContainerHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Stop and remove the container.
    async fn stop(self: Box<Self>) -> anyhow::Result<()>;
}

/// [`ContainerHandle`] over a testcontainers container.
pub struct Testcontainer<I: Image>(ContainerAsync<I>);

impl<I: Image> Testcontainer<I> {
    pub fn new(container: ContainerAsync<I>) -> Self {
        Self(container)
    }

    pub fn inner(&self) -> &ContainerAsync<I> {
        &self.0
    }
}

#[async_trait]
impl<I> ContainerHandle for Testcontainer<I>
where
    I: Image + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        self.0.id()
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        self.0.stop().await?;
        self.0.rm().await?;
        Ok(())
    }
}

/// A healthy database started for one scenario.
pub struct DatabaseHandle {
    /// Address reachable from the test process.
    pub external: Endpoint,
    /// Address reachable from containers on the sandbox network.
    pub internal: Endpoint,
    pub database: String,
    pub username: String,
    pub password: String,
    container: Box<dyn ContainerHandle>,
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("external", &self.external)
            .field("internal", &self.internal)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("container", &self.container.id())
            .finish()
    }
}

impl DatabaseHandle {
    pub fn new(
        container: Box<dyn ContainerHandle>,
        external: Endpoint,
        internal: Endpoint,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            external,
            internal,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            container,
        }
    }

    pub fn container_id(&self) -> &str {
        self.container.id()
    }

    pub async fn stop(self) -> anyhow::Result<()> {
        self.container.stop().await
    }
}

/// One database technology wired into the harness.
///
/// Variants differ only in the images they run and the connection
/// descriptor they build; the scenario itself lives in
/// [`BackgroundJobContainer`](super::BackgroundJobContainer).
#[async_trait]
pub trait BackendVariant: Send + Sync {
    fn name(&self) -> &str;

    fn backend_type(&self) -> BackendType {
        BackendType::Sql
    }

    /// Image of the application under test, built for this backend.
    fn application_image(&self) -> ImageRef;

    /// Start the database and return once it accepts connections.
    async fn start_database(
        &self,
        sandbox: &Sandbox,
        startup_timeout: Duration,
    ) -> anyhow::Result<DatabaseHandle>;

    /// Descriptor for reaching `database` at `endpoint`.
    fn connection_descriptor(
        &self,
        database: &DatabaseHandle,
        endpoint: &Endpoint,
    ) -> ConnectionDescriptor;

    /// Build the test process's storage provider for `database`.
    async fn init_storage_provider(
        &self,
        database: &DatabaseHandle,
        persistence: &PersistenceSettings,
        factory: &StorageProviderFactory,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        let descriptor = self.connection_descriptor(database, &database.external);
        factory.create(&descriptor, persistence).await
    }
}
