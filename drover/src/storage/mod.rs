//! Storage providers and the factory that builds them.
//!
//! A [`StorageProvider`] persists and queries [`JobRecord`]s against one
//! backend. Providers are created by the [`StorageProviderFactory`] from a
//! [`ConnectionDescriptor`] and the persistence settings.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::job::{JobId, JobRecord, JobState};

mod descriptor;
mod factory;
#[cfg(feature = "sql")]
pub mod sql;

pub use descriptor::{ConnectionCandidates, ConnectionDescriptor, DEFAULT_CONNECTION};
pub use factory::{StorageProviderFactory, StorageVariant};
#[cfg(feature = "sql")]
pub use sql::{SqlDialect, SqlStorageProvider, SqlStorageVariant};

/// Database technologies a deployment can select.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum BackendType {
    #[serde(rename = "sql")]
    Sql,
    #[serde(rename = "mongodb")]
    MongoDb,
    #[serde(rename = "redis-lettuce")]
    RedisLettuce,
    #[serde(rename = "redis-jedis")]
    RedisJedis,
    #[serde(rename = "elasticsearch")]
    Elasticsearch,
}

impl BackendType {
    pub const ALL: [BackendType; 5] = [
        BackendType::Sql,
        BackendType::MongoDb,
        BackendType::RedisLettuce,
        BackendType::RedisJedis,
        BackendType::Elasticsearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Sql => "sql",
            BackendType::MongoDb => "mongodb",
            BackendType::RedisLettuce => "redis-lettuce",
            BackendType::RedisJedis => "redis-jedis",
            BackendType::Elasticsearch => "elasticsearch",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|backend| backend.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|b| b.as_str()).collect();
                format!("unknown backend type `{wanted}`, expected one of {known:?}")
            })
    }
}

pub const JOBS_TABLE: &str = "drover_jobs";
pub const MIGRATIONS_TABLE: &str = "drover_migrations";

/// Names of the schema objects a provider owns, with the table prefix applied.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SchemaNames {
    prefix: String,
}

impl SchemaNames {
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.unwrap_or_default().to_string(),
        }
    }

    pub fn jobs(&self) -> String {
        format!("{}{JOBS_TABLE}", self.prefix)
    }

    pub fn migrations(&self) -> String {
        format!("{}{MIGRATIONS_TABLE}", self.prefix)
    }

    pub fn all(&self) -> Vec<String> {
        vec![self.jobs(), self.migrations()]
    }
}

/// Backend-independent persistence for job records.
///
/// When the provider was built with table creation skipped and its schema
/// is absent, every job operation fails with [`StorageError::SchemaMissing`].
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short name for logs, e.g. `sql/mysql`.
    fn name(&self) -> &str;

    fn backend_type(&self) -> BackendType;

    /// Schema objects this provider creates and queries.
    fn schema_objects(&self) -> Vec<String>;

    /// Create the schema if it does not exist. Idempotent.
    async fn ensure_schema(&self) -> Result<(), StorageError>;

    /// The subset of [`schema_objects`](Self::schema_objects) present in the backend.
    async fn existing_schema_objects(&self) -> Result<Vec<String>, StorageError>;

    /// Insert or replace a record.
    async fn save(&self, record: &JobRecord) -> Result<(), StorageError>;

    /// Insert or replace several records. Providers that can batch writes
    /// override this.
    async fn save_all(&self, records: &[JobRecord]) -> Result<(), StorageError> {
        for record in records {
            self.save(record).await?;
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StorageError>;

    /// Move a job to `state`. A failure increments the attempt counter and
    /// records `error`.
    async fn update_state(
        &self,
        id: JobId,
        state: JobState,
        error: Option<String>,
    ) -> Result<JobRecord, StorageError>;

    async fn count_by_state(&self, state: JobState) -> Result<u64, StorageError>;

    /// Move jobs in `from` last updated before `before` to `to`.
    async fn move_by_state_before(
        &self,
        from: JobState,
        to: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError>;

    /// Permanently remove jobs in `state` last updated before `before`.
    async fn delete_by_state_before(
        &self,
        state: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_identifiers() {
        for backend in BackendType::ALL {
            assert_eq!(backend.as_str().parse::<BackendType>(), Ok(backend));
        }
        assert_eq!("SQL".parse::<BackendType>(), Ok(BackendType::Sql));
        assert!("cassandra".parse::<BackendType>().is_err());
    }

    #[test]
    fn test_schema_names_apply_prefix() {
        let names = SchemaNames::new(Some("tenant1_"));
        assert_eq!(names.all(), vec!["tenant1_drover_jobs", "tenant1_drover_migrations"]);

        assert_eq!(SchemaNames::new(None).jobs(), "drover_jobs");
    }
}
