use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover::config::PersistenceSettings;
use drover::storage::{
    BackendType, ConnectionDescriptor, SchemaNames, StorageProvider, StorageVariant,
};
use drover::{JobId, JobRecord, JobState, StorageError};
use parking_lot::Mutex;

/// Shared state of one fake database. Clones see the same tables.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    objects: Arc<Mutex<HashSet<String>>>,
    tables: Arc<Mutex<HashMap<String, HashMap<JobId, JobRecord>>>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schema objects that exist, sorted.
    pub fn objects(&self) -> Vec<String> {
        let mut objects: Vec<_> = self.objects.lock().iter().cloned().collect();
        objects.sort();
        objects
    }

    /// Create `names` as if an external migration had run.
    pub fn create_schema(&self, names: &SchemaNames) {
        let mut objects = self.objects.lock();
        for object in names.all() {
            objects.insert(object);
        }
        self.tables.lock().entry(names.jobs()).or_default();
    }

    pub fn job_count(&self) -> usize {
        self.tables.lock().values().map(HashMap::len).sum()
    }
}

/// [`StorageProvider`] over an [`InMemoryDatabase`].
///
/// Like the SQL provider it needs its tables to exist: operations fail with
/// [`StorageError::SchemaMissing`] until [`ensure_schema`](StorageProvider::ensure_schema)
/// has run or the schema was created on the database.
#[derive(Clone)]
pub struct InMemoryStorageProvider {
    database: InMemoryDatabase,
    names: SchemaNames,
    backend: BackendType,
}

impl InMemoryStorageProvider {
    pub fn new(database: InMemoryDatabase, table_prefix: Option<&str>) -> Self {
        Self {
            database,
            names: SchemaNames::new(table_prefix),
            backend: BackendType::Sql,
        }
    }

    /// A provider with its schema in place.
    pub fn ready() -> Self {
        let provider = Self::new(InMemoryDatabase::new(), None);
        provider.database.create_schema(&provider.names);
        provider
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.database
    }

    /// Run `f` against the jobs table, failing if it does not exist.
    fn with_jobs<T>(
        &self,
        f: impl FnOnce(&mut HashMap<JobId, JobRecord>) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let table = self.names.jobs();
        let mut tables = self.database.tables.lock();
        let jobs = tables
            .get_mut(&table)
            .ok_or(StorageError::SchemaMissing { object: table })?;
        f(jobs)
    }
}

#[async_trait]
impl StorageProvider for InMemoryStorageProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn backend_type(&self) -> BackendType {
        self.backend
    }

    fn schema_objects(&self) -> Vec<String> {
        self.names.all()
    }

    async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.database.create_schema(&self.names);
        Ok(())
    }

    async fn existing_schema_objects(&self) -> Result<Vec<String>, StorageError> {
        let objects = self.database.objects.lock();
        Ok(self
            .names
            .all()
            .into_iter()
            .filter(|name| objects.contains(name))
            .collect())
    }

    async fn save(&self, record: &JobRecord) -> Result<(), StorageError> {
        self.with_jobs(|jobs| {
            jobs.insert(record.id, record.clone());
            Ok(())
        })
    }

    async fn get(&self, id: JobId) -> Result<JobRecord, StorageError> {
        self.with_jobs(|jobs| jobs.get(&id).cloned().ok_or(StorageError::JobNotFound(id)))
    }

    async fn update_state(
        &self,
        id: JobId,
        state: JobState,
        error: Option<String>,
    ) -> Result<JobRecord, StorageError> {
        self.with_jobs(|jobs| {
            let record = jobs.get_mut(&id).ok_or(StorageError::JobNotFound(id))?;
            record.transition(state);
            if state == JobState::Failed {
                record.attempts += 1;
            }
            if error.is_some() {
                record.last_error = error;
            }
            Ok(record.clone())
        })
    }

    async fn count_by_state(&self, state: JobState) -> Result<u64, StorageError> {
        self.with_jobs(|jobs| Ok(jobs.values().filter(|r| r.state == state).count() as u64))
    }

    async fn move_by_state_before(
        &self,
        from: JobState,
        to: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        self.with_jobs(|jobs| {
            let mut moved = 0;
            for record in jobs
                .values_mut()
                .filter(|r| r.state == from && r.updated_at < before)
            {
                record.transition(to);
                moved += 1;
            }
            Ok(moved)
        })
    }

    async fn delete_by_state_before(
        &self,
        state: JobState,
        before: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        self.with_jobs(|jobs| {
            let before_len = jobs.len();
            jobs.retain(|_, r| !(r.state == state && r.updated_at < before));
            Ok((before_len - jobs.len()) as u64)
        })
    }
}

/// Factory variant that hands out providers over one shared database.
#[derive(Clone)]
pub struct InMemoryStorageVariant {
    database: InMemoryDatabase,
    backend: BackendType,
    unreachable: bool,
}

impl InMemoryStorageVariant {
    pub fn new(database: InMemoryDatabase) -> Self {
        Self {
            database,
            backend: BackendType::Sql,
            unreachable: false,
        }
    }

    /// Register under `backend` instead of `sql`.
    pub fn for_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Fail every connection attempt with `ConnectionFailed`.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[async_trait]
impl StorageVariant for InMemoryStorageVariant {
    fn backend_type(&self) -> BackendType {
        self.backend
    }

    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PersistenceSettings,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        if self.unreachable {
            return Err(StorageError::ConnectionFailed {
                backend: self.backend,
                reason: format!("{} refused the connection", descriptor.url),
            });
        }
        let provider = InMemoryStorageProvider::new(self.database.clone(), settings.table_prefix())
            .with_backend(self.backend);
        Ok(Arc::new(provider))
    }
}
