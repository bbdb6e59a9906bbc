use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, Instrument};

use crate::config::PersistenceSettings;
use crate::error::StorageError;
use crate::telemetry::storage_create_span;

use super::{BackendType, ConnectionCandidates, ConnectionDescriptor, StorageProvider};

/// Builds providers for one backend type.
#[async_trait]
pub trait StorageVariant: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Open a provider. Must not create schema objects; the factory decides
    /// whether [`StorageProvider::ensure_schema`] runs.
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PersistenceSettings,
    ) -> Result<Arc<dyn StorageProvider>, StorageError>;
}

/// Registry of storage variants keyed by backend type.
#[derive(Clone, Default)]
pub struct StorageProviderFactory {
    variants: HashMap<BackendType, Arc<dyn StorageVariant>>,
}

impl fmt::Debug for StorageProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProviderFactory")
            .field("backends", &self.registered_backends())
            .finish()
    }
}

impl StorageProviderFactory {
    /// A factory with no variants registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory with every variant compiled into this build.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut factory = Self::new();
        #[cfg(feature = "sql")]
        factory.register(Arc::new(super::SqlStorageVariant));
        factory
    }

    /// Register a variant, replacing any previous one for the same backend.
    pub fn register(&mut self, variant: Arc<dyn StorageVariant>) -> &mut Self {
        self.variants.insert(variant.backend_type(), variant);
        self
    }

    pub fn with_variant(mut self, variant: Arc<dyn StorageVariant>) -> Self {
        self.register(variant);
        self
    }

    pub fn is_registered(&self, backend: BackendType) -> bool {
        self.variants.contains_key(&backend)
    }

    pub fn registered_backends(&self) -> Vec<BackendType> {
        let mut backends: Vec<_> = self.variants.keys().copied().collect();
        backends.sort();
        backends
    }

    /// Build a provider for `descriptor`.
    ///
    /// Unless `skip_table_creation` is set, the provider's schema is created
    /// before it is returned.
    pub async fn create(
        &self,
        descriptor: &ConnectionDescriptor,
        settings: &PersistenceSettings,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        if let Some(wanted) = settings.backend_type() {
            if wanted != descriptor.backend {
                return Err(StorageError::NoCandidate(format!(
                    "descriptor for backend `{wanted}` (got `{}`)",
                    descriptor.backend
                )));
            }
        }

        let variant = self
            .variants
            .get(&descriptor.backend)
            .ok_or(StorageError::UnsupportedBackend(descriptor.backend))?;

        let span = storage_create_span(descriptor.backend.as_str(), settings.table_prefix());
        async move {
            let provider = variant.connect(descriptor, settings).await?;
            if settings.skip_table_creation() {
                info!(
                    provider = provider.name(),
                    "schema creation skipped; expecting externally managed tables"
                );
            } else {
                provider.ensure_schema().await?;
            }
            info!(
                provider = provider.name(),
                target = %descriptor.redacted(),
                "storage provider ready"
            );
            Ok(provider)
        }
        .instrument(span)
        .await
    }

    /// Select a descriptor from `candidates` and build a provider for it.
    pub async fn create_from_candidates(
        &self,
        candidates: &ConnectionCandidates,
        settings: &PersistenceSettings,
    ) -> Result<Arc<dyn StorageProvider>, StorageError> {
        let descriptor = candidates.select(settings)?;
        self.create(&descriptor, settings).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigLayer, DroverConfig};

    #[tokio::test]
    async fn test_unregistered_backend_is_unsupported() {
        let factory = StorageProviderFactory::new();
        let settings = DroverConfig::default().persistence().clone();
        let descriptor = ConnectionDescriptor::new(BackendType::Sql, "mysql://db/test");

        let err = factory.create(&descriptor, &settings).await.err().unwrap();
        assert!(matches!(err, StorageError::UnsupportedBackend(BackendType::Sql)));
    }

    #[tokio::test]
    async fn test_descriptor_must_match_configured_backend() {
        let factory = StorageProviderFactory::with_defaults();
        let settings = DroverConfig::from_layer(ConfigLayer::new().backend_type(BackendType::MongoDb))
            .unwrap()
            .persistence()
            .clone();
        let descriptor = ConnectionDescriptor::new(BackendType::Sql, "mysql://db/test");

        let err = factory.create(&descriptor, &settings).await.err().unwrap();
        assert!(matches!(err, StorageError::NoCandidate(_)));
    }

    #[cfg(feature = "sql")]
    #[test]
    fn test_defaults_register_sql() {
        let factory = StorageProviderFactory::with_defaults();
        assert_eq!(factory.registered_backends(), vec![BackendType::Sql]);
        assert!(!factory.is_registered(BackendType::RedisJedis));
    }
}
