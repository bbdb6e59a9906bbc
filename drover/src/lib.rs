//! Drover - configuration and storage layer for a background job system.
//!
//! The crate covers the pieces a scheduler, worker server and dashboard share:
//! a validated configuration model, job records and their details, the
//! storage-provider contract with a SQL implementation, and the scheduling
//! entry point that writes jobs into storage.
//!
//! # Core Concepts
//!
//! - **Configuration**: [`DroverConfig`] is built once by a [`ConfigLoader`] from
//!   ordered [`ConfigLayer`]s (defaults, TOML file, properties, environment) and
//!   is immutable afterwards.
//!
//! - **Storage**: [`StorageProvider`] persists [`JobRecord`]s against one backend.
//!   The [`StorageProviderFactory`] builds providers from a
//!   [`ConnectionDescriptor`] and the persistence settings.
//!
//! - **Scheduling**: [`JobScheduler`] turns [`JobRequest`]s into enqueued records;
//!   [`RetentionSweeper`] applies the worker server's retention rules.
//!
//! # Feature Flags
//!
//! - `sql` (default) - MySQL and PostgreSQL storage via sqlx
//!
//! # Example
//!
//! ```ignore
//! use drover::*;
//!
//! let config = ConfigLoader::from_default_sources(None)?.load()?;
//! let descriptor = ConnectionDescriptor::new(BackendType::Sql, "mysql://db:3306/jobs")
//!     .with_credentials("drover", "secret");
//! let storage = StorageProviderFactory::with_defaults()
//!     .create(&descriptor, config.persistence())
//!     .await?;
//! let scheduler = JobScheduler::new(&config, storage)?;
//! let id = scheduler.enqueue(JobRequest::new("noop", serde_json::json!({}))).await?;
//! ```

/// Configuration model, layers and loader.
pub mod config;

/// Job details strategies.
pub mod details;

/// Error types for configuration, storage and scheduling.
pub mod error;

/// Job identifiers, states and records.
pub mod job;

/// Retention sweeps over finished jobs.
pub mod maintenance;

/// Retry policy derived from the job settings.
pub mod policy;

/// Job submission entry point.
pub mod scheduler;

/// Storage-provider contract, connection descriptors and the provider factory.
pub mod storage;

/// Tracing spans and log helpers.
pub mod telemetry;

pub use config::{ConfigLayer, ConfigLoader, DroverConfig};
pub use details::{JobDetails, JobDetailsGenerator, JobDetailsStrategy};
pub use error::{ConfigError, SchedulerError, StorageError};
pub use job::{JobId, JobRecord, JobRequest, JobState};
pub use maintenance::{RetentionSweeper, SweepReport};
pub use policy::RetryPolicy;
pub use scheduler::JobScheduler;
pub use storage::{
    BackendType, ConnectionCandidates, ConnectionDescriptor, SchemaNames, StorageProvider,
    StorageProviderFactory, StorageVariant,
};
