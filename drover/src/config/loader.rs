use std::path::Path;

use tracing::{debug, info};

use super::{ConfigLayer, DroverConfig};
use crate::error::ConfigError;

/// Environment prefix used by [`ConfigLoader::from_default_sources`].
pub const DEFAULT_ENV_PREFIX: &str = "DROVER";

/// Merges ordered configuration layers over the built-in defaults.
///
/// Layers are applied in insertion order, so a layer added later overrides
/// every field it sets in earlier layers. Validation runs once, after the
/// merge.
///
/// ```ignore
/// let config = ConfigLoader::new()
///     .layer(ConfigLayer::from_toml_file("drover.toml")?)
///     .layer(ConfigLayer::from_env("DROVER")?)
///     .load()?;
/// ```
#[derive(Clone, Debug, Default)]
pub struct ConfigLoader {
    layers: Vec<ConfigLayer>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer with higher priority than every layer added so far.
    pub fn layer(mut self, layer: ConfigLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// The standard stack: defaults, then an optional TOML file, then
    /// `DROVER_*` environment variables.
    pub fn from_default_sources(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut loader = Self::new();
        if let Some(path) = file {
            loader = loader.layer(ConfigLayer::from_toml_file(path)?);
        }
        Ok(loader.layer(ConfigLayer::from_env(DEFAULT_ENV_PREFIX)?))
    }

    /// Merge every layer and validate the result.
    pub fn load(self) -> Result<DroverConfig, ConfigError> {
        let layer_count = self.layers.len();
        let merged = self
            .layers
            .into_iter()
            .fold(ConfigLayer::default(), |mut acc, layer| {
                acc.merge(layer);
                acc
            });
        debug!(layer_count, "merged configuration layers");

        let config = DroverConfig::from_layer(merged)?;
        info!(
            scheduler_enabled = config.scheduler().enabled(),
            server_enabled = config.worker_server().enabled(),
            worker_count = config.worker_server().worker_count(),
            dashboard_enabled = config.dashboard().enabled(),
            "configuration loaded"
        );
        Ok(config)
    }
}
