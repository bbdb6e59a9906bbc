//! Layered loading through the public API: TOML file, properties and
//! environment stacked over the defaults.

use std::time::Duration;

use drover::config::{ConfigLayer, ConfigLoader, DroverConfig, DEFAULT_ENV_PREFIX};
use drover::storage::BackendType;
use drover::{ConfigError, JobDetailsStrategy};
use proptest::prelude::*;

const FILE: &str = r#"
[drover.database]
table-prefix = "file_"
type = "sql"

[drover.background-job-server]
enabled = true
poll-interval-in-seconds = 30
delete-succeeded-jobs-after = "12h"

[drover.dashboard]
port = 9000
"#;

fn env(pairs: &[(&str, &str)]) -> ConfigLayer {
    ConfigLayer::from_env_vars(
        DEFAULT_ENV_PREFIX,
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
    )
    .unwrap()
}

#[test]
fn test_later_layers_win_and_unset_fields_fall_through() {
    let file = ConfigLayer::from_toml_str(FILE).unwrap();
    let props = ConfigLayer::from_properties([
        ("drover.background-job-server.poll-interval-in-seconds", "20"),
        ("drover.job-scheduler.job-details-generator", "direct"),
    ])
    .unwrap();
    let vars = env(&[("DROVER_DASHBOARD_PORT", "9100")]);

    let config = ConfigLoader::new()
        .layer(file)
        .layer(props)
        .layer(vars)
        .load()
        .unwrap();

    assert_eq!(config.persistence().table_prefix(), Some("file_"));
    assert_eq!(config.persistence().backend_type(), Some(BackendType::Sql));
    assert!(config.worker_server().enabled());
    assert_eq!(config.worker_server().poll_interval_seconds(), 20);
    assert_eq!(
        config.worker_server().retain_succeeded_jobs_for(),
        Duration::from_secs(12 * 3600)
    );
    assert_eq!(
        config.worker_server().purge_deleted_jobs_after(),
        Duration::from_secs(72 * 3600)
    );
    assert_eq!(config.scheduler().job_details_strategy(), JobDetailsStrategy::Direct);
    assert_eq!(config.dashboard().port(), 9100);
    assert_eq!(config.job_policy().default_retry_count(), 10);
}

#[test]
fn test_invalid_override_names_field() {
    let err = ConfigLoader::new()
        .layer(ConfigLayer::from_toml_str(FILE).unwrap())
        .layer(env(&[("DROVER_BACKGROUND_JOB_SERVER_WORKER_COUNT", "0")]))
        .load()
        .unwrap_err();

    assert_eq!(err.field(), Some("background-job-server.worker-count"));
}

#[test]
fn test_unknown_backend_type_is_rejected_at_load() {
    let err = ConfigLayer::from_properties([("drover.database.type", "cassandra")]).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_exported_env_reloads_to_equal_config() {
    let config = ConfigLoader::new()
        .layer(ConfigLayer::from_toml_str(FILE).unwrap())
        .layer(
            ConfigLayer::new()
                .dashboard_username("admin")
                .dashboard_password("secret")
                .worker_count(4),
        )
        .load()
        .unwrap();

    let reloaded = ConfigLoader::new()
        .layer(
            ConfigLayer::from_env_vars(DEFAULT_ENV_PREFIX, config.to_env_vars(DEFAULT_ENV_PREFIX))
                .unwrap(),
        )
        .load()
        .unwrap();

    assert_eq!(reloaded, config);
}

fn poll_layer(value: Option<u8>) -> ConfigLayer {
    match value {
        Some(v) => ConfigLayer::new().poll_interval_in_seconds(i64::from(v) + 1),
        None => ConfigLayer::new(),
    }
}

proptest! {
    #[test]
    fn prop_highest_layer_setting_a_field_wins(values in proptest::collection::vec(any::<Option<u8>>(), 0..6)) {
        let loader = values
            .iter()
            .fold(ConfigLoader::new(), |loader, v| loader.layer(poll_layer(*v)));
        let config = loader.load().unwrap();

        let expected = values
            .iter()
            .rev()
            .find_map(|v| v.map(|v| u32::from(v) + 1))
            .unwrap_or_else(|| DroverConfig::default().worker_server().poll_interval_seconds());
        prop_assert_eq!(config.worker_server().poll_interval_seconds(), expected);
    }
}
