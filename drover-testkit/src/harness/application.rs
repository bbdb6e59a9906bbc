use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use drover::config::DEFAULT_ENV_PREFIX;
use drover::storage::{ConnectionDescriptor, StorageProvider};
use drover::DroverConfig;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tracing::debug;

use super::variant::{ImageRef, Sandbox};

const HEALTH_PATH: &str = "/health";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to start the application under test.
pub struct ApplicationLaunch<'a> {
    pub sandbox: &'a Sandbox,
    pub image: ImageRef,
    pub config: &'a DroverConfig,
    /// Descriptor for the database as seen from the sandbox network.
    pub descriptor: ConnectionDescriptor,
    /// The test process's provider for the same database.
    pub storage: Arc<dyn StorageProvider>,
    pub startup_timeout: Duration,
}

/// Starts the application under test.
#[async_trait]
pub trait ApplicationLauncher: Send + Sync {
    async fn launch(&self, launch: ApplicationLaunch<'_>)
        -> anyhow::Result<Box<dyn ApplicationHandle>>;
}

/// A running application instance.
#[async_trait]
pub trait ApplicationHandle: Send + Sync {
    fn id(&self) -> &str;

    /// One readiness probe. `Ok(false)` means not ready yet.
    async fn is_ready(&self) -> anyhow::Result<bool>;

    async fn stop(self: Box<Self>) -> anyhow::Result<()>;
}

/// Environment handed to the application: the exported configuration plus
/// the database connection.
pub fn application_env(
    config: &DroverConfig,
    descriptor: &ConnectionDescriptor,
) -> Vec<(String, String)> {
    let mut env = config.to_env_vars(DEFAULT_ENV_PREFIX);
    let var = |name: &str| format!("{DEFAULT_ENV_PREFIX}_DATABASE_{name}");

    if config.persistence().backend_type().is_none() {
        env.push((var("TYPE"), descriptor.backend.to_string()));
    }
    env.push((var("URL"), descriptor.connection_url()));
    if let Some(username) = &descriptor.username {
        env.push((var("USERNAME"), username.clone()));
    }
    if let Some(password) = &descriptor.password {
        env.push((var("PASSWORD"), password.clone()));
    }
    env
}

/// Runs the application image in Docker on the sandbox network and probes
/// `GET /health` on the dashboard port.
#[derive(Clone, Debug)]
pub struct DockerApplicationLauncher {
    client: reqwest::Client,
}

impl DockerApplicationLauncher {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ApplicationLauncher for DockerApplicationLauncher {
    async fn launch(
        &self,
        launch: ApplicationLaunch<'_>,
    ) -> anyhow::Result<Box<dyn ApplicationHandle>> {
        let port = launch.config.dashboard().port();
        let env = application_env(launch.config, &launch.descriptor);

        let request = GenericImage::new(&launch.image.name, &launch.image.tag)
            .with_exposed_port(port.tcp())
            .with_wait_for(WaitFor::Nothing)
            .with_network(launch.sandbox.network())
            .with_container_name(launch.sandbox.container_name("app"))
            .with_startup_timeout(launch.startup_timeout);
        let request = env
            .into_iter()
            .fold(request, |request, (key, value)| request.with_env_var(key, value));

        let container = request
            .start()
            .await
            .with_context(|| format!("failed to start application image {}", launch.image))?;
        let host = container.get_host().await?;
        let host_port = container.get_host_port_ipv4(port).await?;
        let health_url = format!("http://{host}:{host_port}{HEALTH_PATH}");
        debug!(container = container.id(), %health_url, "application container started");

        Ok(Box::new(DockerApplication {
            container,
            client: self.client.clone(),
            health_url,
        }))
    }
}

struct DockerApplication {
    container: ContainerAsync<GenericImage>,
    client: reqwest::Client,
    health_url: String,
}

#[async_trait]
impl ApplicationHandle for DockerApplication {
    fn id(&self) -> &str {
        self.container.id()
    }

    async fn is_ready(&self) -> anyhow::Result<bool> {
        match self.client.get(&self.health_url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(e) if e.is_connect() || e.is_timeout() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop(self: Box<Self>) -> anyhow::Result<()> {
        self.container.stop().await?;
        self.container.rm().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover::storage::BackendType;
    use drover::ConfigLayer;

    fn descriptor() -> ConnectionDescriptor {
        ConnectionDescriptor::new(BackendType::Sql, "mysql://drover-e2e-1-db:3306/test")
            .with_credentials("root", "secret")
            .with_option("pool", "true")
    }

    fn lookup<'a>(env: &'a [(String, String)], key: &str) -> Option<&'a str> {
        env.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_application_env_carries_config_and_connection() {
        let config = DroverConfig::from_layer(ConfigLayer::new().table_prefix("e2e_")).unwrap();
        let env = application_env(&config, &descriptor());

        assert_eq!(lookup(&env, "DROVER_DATABASE_TABLE_PREFIX"), Some("e2e_"));
        assert_eq!(
            lookup(&env, "DROVER_BACKGROUND_JOB_SERVER_POLL_INTERVAL_IN_SECONDS"),
            Some("15")
        );
        assert_eq!(
            lookup(&env, "DROVER_DATABASE_URL"),
            Some("mysql://drover-e2e-1-db:3306/test?pool=true")
        );
        assert_eq!(lookup(&env, "DROVER_DATABASE_TYPE"), Some("sql"));
        assert_eq!(lookup(&env, "DROVER_DATABASE_PASSWORD"), Some("secret"));
    }

    #[test]
    fn test_application_env_keeps_configured_backend_type() {
        let config =
            DroverConfig::from_layer(ConfigLayer::new().backend_type(BackendType::Sql)).unwrap();
        let env = application_env(&config, &descriptor());

        let types: Vec<_> = env.iter().filter(|(k, _)| k == "DROVER_DATABASE_TYPE").collect();
        assert_eq!(types.len(), 1);
    }
}
