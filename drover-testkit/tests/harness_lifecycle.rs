//! Scenario lifecycle tests using the in-memory variant and the fake
//! application launcher. No Docker required.

use std::sync::Arc;
use std::time::Duration;

use drover::storage::{BackendType, StorageProviderFactory};
use drover::{ConfigLayer, DroverConfig, JobState, StorageError};
use drover_testkit::harness::{BackendVariant, DatabaseHandle, Endpoint};
use drover_testkit::mock::FakeContainer;
use drover_testkit::{
    init_test_logging, sample_jobs, BackgroundJobContainer, DatabaseBehaviour,
    FakeApplicationLauncher, FakeOutcome, HarnessError, HarnessSettings, InMemoryStorageVariant,
    InMemoryVariant, MySqlVariant, PostgresVariant, ScenarioState,
};

fn fast_settings() -> HarnessSettings {
    HarnessSettings {
        database_startup_timeout: Duration::from_millis(200),
        application_startup_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        max_poll_attempts: 50,
        scenario_deadline: Duration::from_secs(5),
    }
}

fn harness(variant: &InMemoryVariant, launcher: &FakeApplicationLauncher) -> BackgroundJobContainer {
    BackgroundJobContainer::new(Box::new(variant.clone()), Arc::new(launcher.clone()))
        .with_factory(variant.factory())
        .with_settings(fast_settings())
}

#[tokio::test]
async fn test_noop_job_succeeds_and_schema_exists_under_prefix() {
    init_test_logging();
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);
    let config = DroverConfig::from_layer(ConfigLayer::new().table_prefix("e2e_")).unwrap();

    let report = harness(&variant, &launcher)
        .with_config(config)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap();

    assert_eq!(report.final_state, ScenarioState::JobSucceeded);
    assert_eq!(report.job_state, JobState::Succeeded);
    assert_eq!(
        report.schema_objects,
        vec!["e2e_drover_jobs", "e2e_drover_migrations"]
    );
    assert_eq!(
        report.transitions,
        vec![
            ScenarioState::Created,
            ScenarioState::DatabaseStarting,
            ScenarioState::DatabaseReady,
            ScenarioState::ApplicationStarting,
            ScenarioState::ApplicationReady,
            ScenarioState::JobSubmitted,
            ScenarioState::JobPolling,
            ScenarioState::JobSucceeded,
            ScenarioState::TornDown,
        ]
    );
    assert_eq!(variant.databases_stopped(), 1);
    assert_eq!(launcher.applications_stopped(), 1);
}

#[tokio::test]
async fn test_application_receives_exported_config() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);
    let harness = harness(&variant, &launcher);

    harness.run_scenario(sample_jobs::noop()).await.unwrap();

    let launches = launcher.launches();
    assert_eq!(launches.len(), 1);
    let url = launches[0]
        .iter()
        .find(|(k, _)| k == "DROVER_DATABASE_URL")
        .map(|(_, v)| v.clone())
        .unwrap();
    // The application gets the address on the sandbox network.
    assert!(url.contains(&harness.sandbox().container_name("memory")));
}

#[tokio::test]
async fn test_failed_job_is_reported_as_job_failure() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Fail);

    let err = harness(&variant, &launcher)
        .run_scenario(sample_jobs::failing("boom"))
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        HarnessError::JobFailed { job_state: JobState::Failed, .. }
    ));
    assert_eq!(err.last_state, ScenarioState::JobFailed);
    assert_eq!(err.transitions.last(), Some(&ScenarioState::TornDown));
    assert_eq!(variant.databases_stopped(), 1);
    assert_eq!(launcher.applications_stopped(), 1);
}

#[tokio::test]
async fn test_unprocessed_job_times_out() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Ignore);
    let settings = HarnessSettings {
        max_poll_attempts: 3,
        ..fast_settings()
    };

    let err = harness(&variant, &launcher)
        .with_settings(settings)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    match err.cause {
        HarnessError::TimedOut {
            job_state, attempts, ..
        } => {
            assert_eq!(job_state, JobState::Enqueued);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected TimedOut, got {other}"),
    }
    assert_eq!(err.last_state, ScenarioState::TimedOut);
    assert!(err.elapsed > Duration::ZERO);
    assert_eq!(launcher.applications_stopped(), 1);
}

#[tokio::test]
async fn test_timeout_does_not_wait_after_last_poll() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Ignore);
    let settings = HarnessSettings {
        poll_interval: Duration::from_secs(2),
        max_poll_attempts: 1,
        ..fast_settings()
    };

    let err = harness(&variant, &launcher)
        .with_settings(settings)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::TimedOut { attempts: 1, .. }));
    assert!(err.elapsed < Duration::from_secs(1), "{:?}", err.elapsed);
}

#[tokio::test]
async fn test_database_startup_failure_is_backend_unavailable() {
    let variant = InMemoryVariant::new().with_behaviour(DatabaseBehaviour::Fails);
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);

    let err = harness(&variant, &launcher)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::BackendUnavailable(_)));
    assert_eq!(err.last_state, ScenarioState::DatabaseStarting);
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn test_database_startup_timeout_is_backend_unavailable() {
    let variant = InMemoryVariant::new().with_behaviour(DatabaseBehaviour::Hangs);
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);

    let err = harness(&variant, &launcher)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::BackendUnavailable(_)));
    assert!(err.elapsed >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_scenario_deadline_aborts_and_tears_down() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Ignore);
    let settings = HarnessSettings {
        max_poll_attempts: u32::MAX,
        scenario_deadline: Duration::from_millis(100),
        ..fast_settings()
    };

    let err = harness(&variant, &launcher)
        .with_settings(settings)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::DeadlineExceeded(_)));
    assert_eq!(err.last_state, ScenarioState::JobPolling);
    assert_eq!(variant.databases_stopped(), 1);
    assert_eq!(launcher.applications_stopped(), 1);
}

#[tokio::test]
async fn test_application_that_never_becomes_ready() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed).never_ready();

    let err = harness(&variant, &launcher)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::ApplicationUnavailable(_)));
    assert_eq!(err.last_state, ScenarioState::ApplicationStarting);
    assert_eq!(launcher.applications_stopped(), 1);
    assert_eq!(variant.databases_stopped(), 1);
}

#[tokio::test]
async fn test_slow_readiness_is_waited_for() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed).ready_after(3);

    let report = harness(&variant, &launcher)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap();

    assert_eq!(report.job_state, JobState::Succeeded);
}

#[tokio::test]
async fn test_skip_create_without_schema_fails_with_schema_missing() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);
    let config = DroverConfig::from_layer(ConfigLayer::new().skip_create(true)).unwrap();

    let err = harness(&variant, &launcher)
        .with_config(config)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        HarnessError::Scheduler(drover::SchedulerError::Storage(StorageError::SchemaMissing { .. }))
    ));
    assert!(variant.database().objects().is_empty());
}

#[tokio::test]
async fn test_unregistered_backend_fails_with_unsupported_backend() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);

    let err = harness(&variant, &launcher)
        .with_factory(StorageProviderFactory::new())
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        HarnessError::Storage(StorageError::UnsupportedBackend(BackendType::Sql))
    ));
    assert_eq!(variant.databases_stopped(), 1);
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn test_unreachable_database_fails_with_connection_failed() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);
    let factory = StorageProviderFactory::new().with_variant(Arc::new(
        InMemoryStorageVariant::new(variant.database().clone()).unreachable(),
    ));

    let err = harness(&variant, &launcher)
        .with_factory(factory)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        HarnessError::Storage(StorageError::ConnectionFailed { .. })
    ));
}

#[tokio::test]
async fn test_disabled_scheduler_is_reported() {
    let variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);
    let config = DroverConfig::from_layer(ConfigLayer::new().scheduler_enabled(false)).unwrap();

    let err = harness(&variant, &launcher)
        .with_config(config)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(
        err.cause,
        HarnessError::Scheduler(drover::SchedulerError::Disabled)
    ));
    assert_eq!(err.last_state, ScenarioState::ApplicationReady);
}

#[tokio::test]
async fn test_teardown_failure_after_success_is_reported() {
    let variant = InMemoryVariant::new().failing_stop();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);

    let err = harness(&variant, &launcher)
        .run_scenario(sample_jobs::noop())
        .await
        .unwrap_err();

    assert!(matches!(err.cause, HarnessError::Teardown(_)));
    assert_eq!(err.last_state, ScenarioState::JobSucceeded);
    // The application is still stopped when the database fails to.
    assert_eq!(launcher.applications_stopped(), 1);
}

#[tokio::test]
async fn test_parallel_scenarios_use_separate_sandboxes() {
    let a_variant = InMemoryVariant::new();
    let b_variant = InMemoryVariant::new();
    let launcher = FakeApplicationLauncher::new(FakeOutcome::Succeed);

    let a = harness(&a_variant, &launcher);
    let b = harness(&b_variant, &launcher);
    assert_ne!(a.sandbox().network(), b.sandbox().network());

    let (ra, rb) = tokio::join!(
        a.run_scenario(sample_jobs::noop()),
        b.run_scenario(sample_jobs::send_email("ops@example.com"))
    );
    assert_eq!(ra.unwrap().job_state, JobState::Succeeded);
    assert_eq!(rb.unwrap().job_state, JobState::Succeeded);
    assert_eq!(a_variant.database().job_count(), 1);
    assert_eq!(b_variant.database().job_count(), 1);
}

fn fake_database(variant_name: &str) -> DatabaseHandle {
    DatabaseHandle::new(
        Box::new(FakeContainer::new(variant_name, Default::default())),
        Endpoint::new("127.0.0.1", 49153),
        Endpoint::new("drover-e2e-x-db", 3306),
        "test",
        "root",
        "",
    )
}

#[test]
fn test_mysql_descriptor_enables_batching_and_pooling() {
    let variant = MySqlVariant::new();
    let database = fake_database("mysql");

    let external = variant.connection_descriptor(&database, &database.external);
    assert_eq!(
        external.connection_url(),
        "mysql://127.0.0.1:49153/test?pool=true&rewriteBatchedStatements=true"
    );
    assert_eq!(external.username.as_deref(), Some("root"));
    assert_eq!(external.password, None);

    let internal = variant.connection_descriptor(&database, &database.internal);
    assert!(internal.url.starts_with("mysql://drover-e2e-x-db:3306/"));
    assert_eq!(variant.application_image().to_string(), "drover-e2e-mysql:1.0");
}

#[test]
fn test_postgres_descriptor_enables_batched_inserts() {
    let variant = PostgresVariant::new();
    let database = fake_database("postgres");

    let descriptor = variant.connection_descriptor(&database, &database.external);
    assert_eq!(descriptor.option("reWriteBatchedInserts"), Some("true"));
    assert!(descriptor.url.starts_with("postgres://127.0.0.1:49153/"));
    assert_eq!(variant.backend_type(), BackendType::Sql);
}
