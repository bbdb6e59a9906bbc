//! SQL storage provider for MySQL and PostgreSQL.
//!
//! Both dialects go through the sqlx `Any` driver. Timestamps are stored as
//! epoch milliseconds and JSON columns as text so the same schema works on
//! both servers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::error::DatabaseError;
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn, Instrument};

use crate::config::PersistenceSettings;
use crate::error::StorageError;
use crate::job::{JobId, JobRecord, JobState};
use crate::telemetry::schema_span;

use super::{
    BackendType, ConnectionDescriptor, SchemaNames, StorageProvider, StorageVariant,
};

/// Descriptor options that turn on multi-row batched inserts. MySQL and
/// PostgreSQL deployments spell this hint differently.
pub const BATCH_WRITE_OPTIONS: [&str; 2] = ["rewriteBatchedStatements", "reWriteBatchedInserts"];
/// Descriptor option: `false` restricts the provider to a single connection.
pub const OPTION_POOL: &str = "pool";
/// Descriptor option: connection pool size when pooling is on.
pub const OPTION_MAX_CONNECTIONS: &str = "max-connections";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const JOB_COLUMNS: &str =
    "id, kind, state, attempts, max_retries, payload, details, last_error, created_at, updated_at";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SqlDialect {
    MySql,
    Postgres,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split_once("://").map(|(scheme, _)| scheme)?;
        match scheme {
            "mysql" | "mariadb" => Some(SqlDialect::MySql),
            "postgres" | "postgresql" => Some(SqlDialect::Postgres),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlDialect::MySql => "mysql",
            SqlDialect::Postgres => "postgres",
        }
    }

    /// Bind marker for the `n`th (1-based) parameter.
    fn param(&self, n: usize) -> String {
        match self {
            SqlDialect::MySql => "?".to_string(),
            SqlDialect::Postgres => format!("${n}"),
        }
    }

    fn upsert_tail(&self) -> &'static str {
        match self {
            SqlDialect::MySql => {
                " ON DUPLICATE KEY UPDATE state = VALUES(state), attempts = VALUES(attempts), \
                 max_retries = VALUES(max_retries), payload = VALUES(payload), \
                 details = VALUES(details), last_error = VALUES(last_error), \
                 updated_at = VALUES(updated_at)"
            }
            SqlDialect::Postgres => {
                " ON CONFLICT (id) DO UPDATE SET state = EXCLUDED.state, \
                 attempts = EXCLUDED.attempts, max_retries = EXCLUDED.max_retries, \
                 payload = EXCLUDED.payload, details = EXCLUDED.details, \
                 last_error = EXCLUDED.last_error, updated_at = EXCLUDED.updated_at"
            }
        }
    }

    fn current_schema(&self) -> &'static str {
        match self {
            SqlDialect::MySql => "DATABASE()",
            SqlDialect::Postgres => "current_schema()",
        }
    }

    fn is_missing_table(&self, code: &str) -> bool {
        matches!(
            (self, code),
            (SqlDialect::MySql, "42S02") | (SqlDialect::Postgres, "42P01")
        )
    }

    fn is_auth_failure(&self, code: &str) -> bool {
        matches!(code, "28000" | "28P01" | "3D000")
    }

    fn is_unique_violation(&self, code: &str) -> bool {
        matches!(
            (self, code),
            (SqlDialect::MySql, "23000") | (SqlDialect::Postgres, "23505")
        )
    }

    /// Table or index already exists. MySQL reports these under the generic
    /// 42000 state, so its error number is checked instead.
    fn is_duplicate_object(&self, err: &(dyn DatabaseError + 'static)) -> bool {
        match self {
            SqlDialect::MySql => err
                .try_downcast_ref::<MySqlDatabaseError>()
                .is_some_and(|e| matches!(e.number(), 1050 | 1061)),
            SqlDialect::Postgres => err.code().is_some_and(|c| c == "42P07"),
        }
    }

    /// Map a database error code onto the storage taxonomy. `object` is the
    /// schema object the failed statement touched.
    fn classify(&self, object: &str, code: &str, message: String) -> StorageError {
        if self.is_missing_table(code) {
            StorageError::SchemaMissing {
                object: object.to_string(),
            }
        } else if self.is_auth_failure(code) {
            StorageError::ConnectionFailed {
                backend: BackendType::Sql,
                reason: message,
            }
        } else {
            StorageError::Backend(format!("{message} ({code})"))
        }
    }
}

/// Registers [`SqlStorageProvider`] with the factory.
#[derive(Clone, Copy, Debug, Default)]
pub struct SqlStorageVariant;

#[async_trait]
impl StorageVariant for SqlStorageVariant {
    fn backend_type(&self) -> BackendType {
        BackendType::Sql
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PersistenceSettings,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        let provider = SqlStorageProvider::connect(descriptor, settings).await?;
        Ok(Arc::new(provider))
    }
}

/// SQL-backed job storage.
#[derive(Debug)]
pub struct SqlStorageProvider {
    pool: AnyPool,
    dialect: SqlDialect,
    names: SchemaNames,
    batch_writes: bool,
    name: String,
}

struct Migration {
    version: i32,
    description: &'static str,
    statement: fn(&SchemaNames, SqlDialect) -> String,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create jobs table",
        statement: |names, _| {
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id VARCHAR(36) NOT NULL PRIMARY KEY,
                    kind VARCHAR(255) NOT NULL,
                    state VARCHAR(20) NOT NULL,
                    attempts INTEGER NOT NULL,
                    max_retries INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    details TEXT NOT NULL,
                    last_error TEXT NULL,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL
                )",
                names.jobs()
            )
        },
    },
    Migration {
        version: 2,
        description: "index jobs by state and update time",
        statement: |names, dialect| {
            let jobs = names.jobs();
            let index = format!("{}_state_idx", jobs.replace('.', "_"));
            // MySQL has no IF NOT EXISTS for indexes; a duplicate is tolerated
            // when the migration runs.
            let guard = match dialect {
                SqlDialect::MySql => "",
                SqlDialect::Postgres => "IF NOT EXISTS ",
            };
            format!("CREATE INDEX {guard}{index} ON {jobs} (state, updated_at)")
        },
    },
];

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(column: &str, value: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(value)
        .ok_or_else(|| StorageError::Codec(format!("{column} out of range: {value}")))
}

/// Insert credentials into a `scheme://host/...` URL.
fn url_with_credentials(descriptor: &ConnectionDescriptor, url: &str) -> String {
    let Some(user) = descriptor.username.as_deref() else {
        return url.to_string();
    };
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let user = urlencoding::encode(user);
    match descriptor.password.as_deref() {
        Some(password) => format!("{scheme}://{user}:{}@{rest}", urlencoding::encode(password)),
        None => format!("{scheme}://{user}@{rest}"),
    }
}

impl SqlStorageProvider {
    /// Open a connection pool. Provider options are consumed here and
    /// every other descriptor option is passed to the driver.
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        settings: &PersistenceSettings,
    ) -> Result<Self, StorageError> {
        let dialect = SqlDialect::from_url(&descriptor.url).ok_or_else(|| {
            StorageError::ConnectionFailed {
                backend: BackendType::Sql,
                reason: format!("unsupported SQL url `{}`", descriptor.url),
            }
        })?;

        let flag = |key: &str| descriptor.option(key).map(|v| v.eq_ignore_ascii_case("true"));
        let batch_writes = BATCH_WRITE_OPTIONS
            .iter()
            .any(|key| flag(key).unwrap_or(false));
        let max_connections = match (flag(OPTION_POOL), descriptor.option(OPTION_MAX_CONNECTIONS)) {
            (Some(false), _) => 1,
            (_, Some(raw)) => raw.parse::<u32>().map_err(|_| StorageError::ConnectionFailed {
                backend: BackendType::Sql,
                reason: format!("invalid {OPTION_MAX_CONNECTIONS} `{raw}`"),
            })?,
            (_, None) => DEFAULT_MAX_CONNECTIONS,
        };

        let mut driver_descriptor = descriptor.clone();
        for key in BATCH_WRITE_OPTIONS
            .iter()
            .chain([OPTION_POOL, OPTION_MAX_CONNECTIONS].iter())
        {
            driver_descriptor.options.remove(*key);
        }
        let url = url_with_credentials(descriptor, &driver_descriptor.connection_url());

        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(&url)
            .await
            .map_err(|e| StorageError::ConnectionFailed {
                backend: BackendType::Sql,
                reason: e.to_string(),
            })?;

        debug!(
            dialect = dialect.as_str(),
            max_connections, batch_writes, "opened SQL connection pool"
        );

        Ok(Self {
            pool,
            dialect,
            names: SchemaNames::new(settings.table_prefix()),
            batch_writes,
            name: format!("sql/{}", dialect.as_str()),
        })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    fn map_err(&self, err: sqlx::Error) -> StorageError {
        self.map_err_on(&self.names.jobs(), err)
    }

    fn map_err_on(&self, object: &str, err: sqlx::Error) -> StorageError {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
                self.dialect.classify(object, &code, db_err.to_string())
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StorageError::ConnectionFailed {
                backend: BackendType::Sql,
                reason: err.to_string(),
            },
            other => StorageError::Backend(other.to_string()),
        }
    }

    fn record_from_row(row: &AnyRow) -> Result<JobRecord, StorageError> {
        let get_err = |e: sqlx::Error| StorageError::Codec(e.to_string());

        let id: String = row.try_get("id").map_err(get_err)?;
        let state: String = row.try_get("state").map_err(get_err)?;
        let payload: String = row.try_get("payload").map_err(get_err)?;
        let details: String = row.try_get("details").map_err(get_err)?;
        let attempts: i32 = row.try_get("attempts").map_err(get_err)?;
        let max_retries: i32 = row.try_get("max_retries").map_err(get_err)?;

        Ok(JobRecord {
            id: id
                .parse()
                .map_err(|e: uuid::Error| StorageError::Codec(e.to_string()))?,
            kind: row.try_get("kind").map_err(get_err)?,
            payload: serde_json::from_str(&payload)?,
            details: serde_json::from_str(&details)?,
            state: state.parse().map_err(StorageError::Codec)?,
            attempts: u32::try_from(attempts).unwrap_or_default(),
            max_retries: u32::try_from(max_retries).unwrap_or_default(),
            last_error: row.try_get("last_error").map_err(get_err)?,
            created_at: from_millis("created_at", row.try_get("created_at").map_err(get_err)?)?,
            updated_at: from_millis("updated_at", row.try_get("updated_at").map_err(get_err)?)?,
        })
    }

    fn insert_sql(&self, rows: usize) -> String {
        let mut values = Vec::with_capacity(rows);
        let mut n = 0;
        for _ in 0..rows {
            let markers: Vec<String> = (0..10)
                .map(|_| {
                    n += 1;
                    self.dialect.param(n)
                })
                .collect();
            values.push(format!("({})", markers.join(", ")));
        }
        format!(
            "INSERT INTO {} ({JOB_COLUMNS}) VALUES {}{}",
            self.names.jobs(),
            values.join(", "),
            self.dialect.upsert_tail()
        )
    }

    async fn applied_versions(&self) -> Result<Vec<i32>, StorageError> {
        let migrations = self.names.migrations();
        let sql = format!("SELECT version FROM {migrations}");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_err_on(&migrations, e))?;
        rows.iter()
            .map(|row| {
                row.try_get::<i32, _>("version")
                    .map_err(|e| StorageError::Codec(e.to_string()))
            })
            .collect()
    }
}

/// Bind one record's columns onto a query in [`JOB_COLUMNS`] order.
macro_rules! bind_record {
    ($query:expr, $record:expr, $payload:expr, $details:expr) => {
        $query
            .bind($record.id.to_string())
            .bind($record.kind.clone())
            .bind($record.state.as_str())
            .bind($record.attempts as i32)
            .bind($record.max_retries as i32)
            .bind($payload)
            .bind($details)
            .bind($record.last_error.clone())
            .bind(millis($record.created_at))
            .bind(millis($record.updated_at))
    };
}

#[async_trait]
impl StorageProvider for SqlStorageProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Sql
    }

    fn schema_objects(&self) -> Vec<String> {
        self.names.all()
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        let span = schema_span(&self.name, &self.names.jobs());
        async {
            let migrations = self.names.migrations();
            let create_migrations = format!(
                "CREATE TABLE IF NOT EXISTS {migrations} (
                    version INTEGER NOT NULL PRIMARY KEY,
                    description VARCHAR(255) NOT NULL,
                    installed_at BIGINT NOT NULL
                )"
            );
            sqlx::query(&create_migrations)
                .execute(&self.pool)
                .await
                .map_err(|e| self.map_err_on(&migrations, e))?;

            let applied = self.applied_versions().await?;
            for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
                let applied_now = sqlx::query(&(migration.statement)(&self.names, self.dialect))
                    .execute(&self.pool)
                    .await;
                match applied_now {
                    Ok(_) => {}
                    // Another process ran the same migration concurrently.
                    Err(sqlx::Error::Database(db_err))
                        if self.dialect.is_duplicate_object(db_err.as_ref()) =>
                    {
                        debug!(version = migration.version, "migration objects already exist");
                    }
                    Err(e) => return Err(self.map_err(e)),
                }

                let record = format!(
                    "INSERT INTO {migrations} (version, description, installed_at) VALUES ({}, {}, {})",
                    self.dialect.param(1),
                    self.dialect.param(2),
                    self.dialect.param(3)
                );
                let inserted = sqlx::query(&record)
                    .bind(migration.version)
                    .bind(migration.description)
                    .bind(millis(Utc::now()))
                    .execute(&self.pool)
                    .await;
                match inserted {
                    Ok(_) => info!(
                        version = migration.version,
                        description = migration.description,
                        "applied schema migration"
                    ),
                    // Another process recorded the same migration first.
                    Err(sqlx::Error::Database(db_err))
                        if db_err
                            .code()
                            .is_some_and(|c| self.dialect.is_unique_violation(&c)) =>
                    {
                        debug!(version = migration.version, "migration already recorded");
                    }
                    Err(e) => return Err(self.map_err_on(&migrations, e)),
                }
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn existing_schema_objects(&self) -> Result<Vec<String>, StorageError> {
        let mut present = Vec::new();
        for object in self.names.all() {
            let (schema, table) = match object.rsplit_once('.') {
                Some((schema, table)) => (Some(schema), table),
                None => (None, object.as_str()),
            };
            let schema_filter = match schema {
                Some(_) => self.dialect.param(2),
                None => self.dialect.current_schema().to_string(),
            };
            let sql = format!(
                "SELECT COUNT(*) AS n FROM information_schema.tables \
                 WHERE table_name = {} AND table_schema = {schema_filter}",
                self.dialect.param(1)
            );
            let mut query = sqlx::query(&sql).bind(table.to_string());
            if let Some(schema) = schema {
                query = query.bind(schema.to_string());
            }
            let row = query
                .fetch_one(&self.pool)
                .await
                .map_err(|e| self.map_err(e))?;
            let count: i64 = row
                .try_get("n")
                .map_err(|e| StorageError::Codec(e.to_string()))?;
            if count > 0 {
                present.push(object.clone());
            }
        }
        Ok(present)
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&record.payload)?;
        let details = serde_json::to_string(&record.details)?;
        let sql = self.insert_sql(1);
        bind_record!(sqlx::query(&sql), record, payload, details)
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn save_all(&self, records: &[JobRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let encoded = records
            .iter()
            .map(|r| Ok((serde_json::to_string(&r.payload)?, serde_json::to_string(&r.details)?)))
            .collect::<Result<Vec<_>, StorageError>>()?;

        if self.batch_writes {
            let sql = self.insert_sql(records.len());
            let mut query = sqlx::query(&sql);
            for (record, (payload, details)) in records.iter().zip(encoded) {
                query = bind_record!(query, record, payload, details);
            }
            query
                .execute(&self.pool)
                .await
                .map_err(|e| self.map_err(e))?;
            debug!(rows = records.len(), "batched job insert");
            return Ok(());
        }

        let sql = self.insert_sql(1);
        let mut tx = self.pool.begin().await.map_err(|e| self.map_err(e))?;
        for (record, (payload, details)) in records.iter().zip(encoded) {
            if let Err(e) = bind_record!(sqlx::query(&sql), record, payload, details)
                .execute(&mut *tx)
                .await
            {
                drop(tx.rollback().await);
                return Err(self.map_err(e));
            }
        }
        tx.commit().await.map_err(|e| self.map_err(e))?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StorageError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM {} WHERE id = {}",
            self.names.jobs(),
            self.dialect.param(1)
        );
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?
            .ok_or(StorageError::JobNotFound(id))?;
        Self::record_from_row(&row)
    }

    async fn update_state(
        &self,
        id: JobId,
        state: JobState,
        error: Option<String>,
    ) -> Result<JobRecord, StorageError> {
        let failed_increment = i32::from(state == JobState::Failed);
        let p = |n| self.dialect.param(n);
        let sql = format!(
            "UPDATE {} SET state = {}, attempts = attempts + {}, \
             last_error = COALESCE({}, last_error), updated_at = {} WHERE id = {}",
            self.names.jobs(),
            p(1),
            p(2),
            p(3),
            p(4),
            p(5)
        );
        sqlx::query(&sql)
            .bind(state.as_str())
            .bind(failed_increment)
            .bind(error)
            .bind(millis(Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;

        let record = self.get(id).await?;
        if record.state != state {
            warn!(job_id = %id, expected = %state, actual = %record.state, "state changed concurrently");
        }
        Ok(record)
    }

    async fn count_by_state(&self, state: JobState) -> Result<u64, StorageError> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE state = {}",
            self.names.jobs(),
            self.dialect.param(1)
        );
        let row = sqlx::query(&sql)
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        let count: i64 = row
            .try_get("n")
            .map_err(|e| StorageError::Codec(e.to_string()))?;
        Ok(count.max(0) as u64)
    }

    async fn move_by_state_before(
        &self,
        from: JobState,
        to: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let p = |n| self.dialect.param(n);
        let sql = format!(
            "UPDATE {} SET state = {}, updated_at = {} WHERE state = {} AND updated_at < {}",
            self.names.jobs(),
            p(1),
            p(2),
            p(3),
            p(4)
        );
        let res = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(millis(Utc::now()))
            .bind(from.as_str())
            .bind(millis(before))
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(res.rows_affected())
    }

    async fn delete_by_state_before(
        &self,
        state: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let sql = format!(
            "DELETE FROM {} WHERE state = {} AND updated_at < {}",
            self.names.jobs(),
            self.dialect.param(1),
            self.dialect.param(2)
        );
        let res = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(millis(before))
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_err(e))?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_from_url() {
        assert_eq!(SqlDialect::from_url("mysql://root@db/test"), Some(SqlDialect::MySql));
        assert_eq!(SqlDialect::from_url("mariadb://db/test"), Some(SqlDialect::MySql));
        assert_eq!(
            SqlDialect::from_url("postgresql://pg/db"),
            Some(SqlDialect::Postgres)
        );
        assert_eq!(SqlDialect::from_url("redis://cache"), None);
        assert_eq!(SqlDialect::from_url("not a url"), None);
    }

    #[test]
    fn test_param_markers() {
        assert_eq!(SqlDialect::MySql.param(3), "?");
        assert_eq!(SqlDialect::Postgres.param(3), "$3");
    }

    #[test]
    fn test_credentials_are_encoded_into_url() {
        let descriptor = ConnectionDescriptor::new(BackendType::Sql, "mysql://db:3306/test")
            .with_credentials("root", "p@ss/word");
        assert_eq!(
            url_with_credentials(&descriptor, &descriptor.url),
            "mysql://root:p%40ss%2Fword@db:3306/test"
        );

        let passwordless =
            ConnectionDescriptor::new(BackendType::Sql, "mysql://db/test").with_credentials("root", "");
        assert_eq!(
            url_with_credentials(&passwordless, &passwordless.url),
            "mysql://root@db/test"
        );
    }

    #[test]
    fn test_migrations_use_prefixed_names() {
        let names = SchemaNames::new(Some("jobs."));
        let statements: Vec<String> = MIGRATIONS
            .iter()
            .map(|m| (m.statement)(&names, SqlDialect::MySql))
            .collect();

        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS jobs.drover_jobs"));
        assert!(statements[1].contains("CREATE INDEX jobs_drover_jobs_state_idx ON jobs.drover_jobs"));
    }

    #[test]
    fn test_postgres_index_migration_is_idempotent() {
        let names = SchemaNames::new(Some("e2e_"));
        let index = (MIGRATIONS[1].statement)(&names, SqlDialect::Postgres);
        assert_eq!(
            index,
            "CREATE INDEX IF NOT EXISTS e2e_drover_jobs_state_idx ON e2e_drover_jobs (state, updated_at)"
        );
    }

    #[test]
    fn test_missing_table_names_the_object_queried() {
        let err = SqlDialect::Postgres.classify("e2e_drover_migrations", "42P01", "missing".into());
        assert!(
            matches!(&err, StorageError::SchemaMissing { object } if object == "e2e_drover_migrations"),
            "{err}"
        );

        let err = SqlDialect::MySql.classify("drover_jobs", "28000", "denied".into());
        assert!(matches!(err, StorageError::ConnectionFailed { .. }));

        let err = SqlDialect::MySql.classify("drover_jobs", "22001", "too long".into());
        assert!(matches!(err, StorageError::Backend(message) if message.contains("22001")));
    }

    #[test]
    fn test_error_code_classification() {
        assert!(SqlDialect::MySql.is_missing_table("42S02"));
        assert!(!SqlDialect::MySql.is_missing_table("42P01"));
        assert!(SqlDialect::Postgres.is_missing_table("42P01"));
        assert!(SqlDialect::Postgres.is_auth_failure("28P01"));
        assert!(SqlDialect::Postgres.is_unique_violation("23505"));
    }
}
