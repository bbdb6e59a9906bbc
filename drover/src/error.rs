use std::path::PathBuf;

use crate::job::JobId;
use crate::storage::BackendType;

/// Errors raised while building or validating a [`DroverConfig`](crate::DroverConfig).
///
/// Every variant names the offending property key so the message can be
/// traced back to the source that set it.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A merged value violates a constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    Invalid {
        field: &'static str,
        constraint: String,
    },

    /// A raw value could not be parsed into the field's type.
    #[error("cannot parse `{value}` for `{field}`: {reason}")]
    Parse {
        field: String,
        value: String,
        reason: String,
    },

    /// A property key that is not part of the configuration surface.
    #[error("unknown configuration key `{key}`")]
    UnknownKey { key: String },

    /// A TOML layer failed to deserialize.
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),

    /// A configuration file could not be read.
    #[error("cannot read configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, constraint: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            constraint: constraint.into(),
        }
    }

    pub(crate) fn parse(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Parse {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// The property key this error refers to, when there is one.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Parse { field, .. } => Some(field),
            Self::UnknownKey { key } => Some(key),
            Self::Toml(_) | Self::Io { .. } => None,
        }
    }
}

/// Errors surfaced by storage providers and the provider factory.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend could not be reached or refused the credentials.
    #[error("connection to {backend} backend failed: {reason}")]
    ConnectionFailed { backend: BackendType, reason: String },

    /// No storage variant is registered for the requested backend.
    #[error("no storage variant registered for backend `{0}`")]
    UnsupportedBackend(BackendType),

    /// The backend type was not configured and several candidates qualify.
    #[error("cannot infer storage backend: candidates for {0:?}; set `database.type`")]
    AmbiguousBackend(Vec<BackendType>),

    /// No connection candidate matched the persistence settings.
    #[error("no connection candidate matches {0}")]
    NoCandidate(String),

    /// A required table or collection does not exist and creation was skipped.
    #[error("required schema object `{object}` is missing")]
    SchemaMissing { object: String },

    #[error("job {0} not found")]
    JobNotFound(JobId),

    /// A stored record could not be encoded or decoded.
    #[error("job record codec error: {0}")]
    Codec(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// Errors raised by the [`JobScheduler`](crate::JobScheduler) entry point.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("job scheduling is disabled by `job-scheduler.enabled`")]
    Disabled,

    #[error(transparent)]
    Storage(#[from] StorageError),
}
