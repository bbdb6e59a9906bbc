use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use drover::storage::{BackendType, ConnectionDescriptor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers_modules::postgres::Postgres;

use super::variant::{BackendVariant, DatabaseHandle, Endpoint, ImageRef, Sandbox, Testcontainer};

const POSTGRES_PORT: u16 = 5432;
const POSTGRES_DATABASE: &str = "drover";
const POSTGRES_USER: &str = "drover";
const POSTGRES_PASSWORD: &str = "drover";

#[derive(Clone, Debug)]
pub struct PostgresVariant {
    tag: String,
    application: ImageRef,
}

impl Default for PostgresVariant {
    fn default() -> Self {
        Self {
            tag: "16-alpine".to_string(),
            application: ImageRef::new("drover-e2e-postgres", "1.0"),
        }
    }
}

impl PostgresVariant {
    pub fn new() -> Self {
        Self::default()
    }

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
impl BackendVariant for PostgresVariant {
    fn name(&self) -> &str {
        "postgres"
    }

    fn application_image(&self) -> ImageRef {
        self.application.clone()
    }

    async fn start_database(
        &self,
        sandbox: &Sandbox,
        startup_timeout: Duration,
    ) -> anyhow::Result<DatabaseHandle> {
        let name = sandbox.container_name("postgres");
        let container = Postgres::default()
            .with_db_name(POSTGRES_DATABASE)
            .with_user(POSTGRES_USER)
            .with_password(POSTGRES_PASSWORD)
            .with_tag(&self.tag)
            .with_network(sandbox.network())
            .with_container_name(&name)
            .with_startup_timeout(startup_timeout)
            .start()
            .await
            .context("failed to start Postgres container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(POSTGRES_PORT).await?;

        Ok(DatabaseHandle::new(
            Box::new(Testcontainer::new(container)),
            Endpoint::new(host.to_string(), port),
            Endpoint::new(name, POSTGRES_PORT),
            POSTGRES_DATABASE,
            POSTGRES_USER,
            POSTGRES_PASSWORD,
        ))
    }

    fn connection_descriptor(
        &self,
        database: &DatabaseHandle,
        endpoint: &Endpoint,
    ) -> ConnectionDescriptor {
        ConnectionDescriptor::new(
            BackendType::Sql,
            format!("postgres://{}/{}", endpoint.authority(), database.database),
        )
        .with_credentials(&database.username, &database.password)
        .with_option("reWriteBatchedInserts", "true")
    }
}
