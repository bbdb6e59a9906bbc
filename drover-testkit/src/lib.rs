//! Test support for drover.
//!
//! - [`storage`]: an in-memory [`StorageProvider`](drover::StorageProvider) and
//!   factory variant with the same schema rules as the SQL provider
//! - [`mock`]: a Docker-free backend variant and application launcher
//! - [`harness`]: the containerized end-to-end scenario runner and its MySQL
//!   and PostgreSQL variants

pub mod harness;
pub mod job;
pub mod mock;
pub mod storage;

pub use harness::{
    BackendVariant, BackgroundJobContainer, HarnessError, HarnessSettings, MySqlVariant,
    PostgresVariant, ScenarioError, ScenarioReport, ScenarioState,
};
pub use job::{sample_jobs, TestJob};
pub use mock::{DatabaseBehaviour, FakeApplicationLauncher, FakeOutcome, InMemoryVariant};
pub use storage::{InMemoryDatabase, InMemoryStorageProvider, InMemoryStorageVariant};

/// Install a test log subscriber honouring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
