use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use drover::storage::{BackendType, ConnectionDescriptor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::mysql::Mysql;

use super::variant::{BackendVariant, DatabaseHandle, Endpoint, ImageRef, Sandbox, Testcontainer};

const MYSQL_PORT: u16 = 3306;
// Credentials and database created by the mysql module's image defaults.
const MYSQL_DATABASE: &str = "test";
const MYSQL_USER: &str = "root";

/// MySQL backend with statement batching enabled.
#[derive(Clone, Debug)]
pub struct MySqlVariant {
    tag: String,
    application: ImageRef,
}

impl Default for MySqlVariant {
    fn default() -> Self {
        Self {
            tag: "8.0".to_string(),
            application: ImageRef::new("drover-e2e-mysql", "1.0"),
        }
    }
}

impl MySqlVariant {
    pub fn new() -> Self {
        Self::default()
    }

    /// MySQL server image tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_application_image(mut self, image: ImageRef) -> Self {
        self.application = image;
        self
    }
}

#[async_trait]
impl BackendVariant for MySqlVariant {
    fn name(&self) -> &str {
        "mysql"
    }

    fn application_image(&self) -> ImageRef {
        self.application.clone()
    }

    async fn start_database(
        &self,
        sandbox: &Sandbox,
        startup_timeout: Duration,
    ) -> anyhow::Result<DatabaseHandle> {
        let name = sandbox.container_name("mysql");
        let container = Mysql::default()
            .with_tag(&self.tag)
            .with_network(sandbox.network())
            .with_container_name(&name)
            .with_startup_timeout(startup_timeout)
            .start()
            .await
            .context("failed to start MySQL container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(MYSQL_PORT).await?;

        Ok(DatabaseHandle::new(
            Box::new(Testcontainer::new(container)),
            Endpoint::new(host.to_string(), port),
            Endpoint::new(name, MYSQL_PORT),
            MYSQL_DATABASE,
            MYSQL_USER,
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
            format!("mysql://{}/{}", endpoint.authority(), database.database),
        )
        .with_credentials(&database.username, &database.password)
        .with_option("rewriteBatchedStatements", "true")
        .with_option("pool", "true")
    }
}
