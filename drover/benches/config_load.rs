//! Benchmarks for configuration loading using criterion.
//!
//! These benchmarks measure the performance of:
//! - Parsing a TOML layer
//! - Merging and validating several layers
//! - Duration parsing and job details generation

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use drover::config::{parse_duration, ConfigLayer, ConfigLoader, DroverConfig, DEFAULT_ENV_PREFIX};
use drover::{JobDetailsStrategy, JobRequest};

const FILE: &str = r#"
[drover.database]
table-prefix = "bench_"
type = "sql"

[drover.jobs]
default-number-of-retries = 5

[drover.background-job-server]
enabled = true
worker-count = 8
delete-succeeded-jobs-after = "PT36H"
permanently-delete-deleted-jobs-after = "3d"

[drover.dashboard]
enabled = true
username = "admin"
password = "admin"
"#;

fn bench_parse_toml(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_parse");
    group.throughput(Throughput::Bytes(FILE.len() as u64));

    group.bench_function("toml_layer", |b| {
        b.iter(|| ConfigLayer::from_toml_str(black_box(FILE)).unwrap())
    });

    group.finish();
}

fn bench_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_load");
    let env = DroverConfig::from_layer(ConfigLayer::from_toml_str(FILE).unwrap())
        .unwrap()
        .to_env_vars(DEFAULT_ENV_PREFIX);

    group.bench_function("defaults", |b| {
        b.iter(|| ConfigLoader::new().load().unwrap())
    });

    group.bench_function("file_properties_env", |b| {
        b.iter(|| {
            ConfigLoader::new()
                .layer(ConfigLayer::from_toml_str(FILE).unwrap())
                .layer(
                    ConfigLayer::from_properties([("drover.dashboard.port", "9000")]).unwrap(),
                )
                .layer(ConfigLayer::from_env_vars(DEFAULT_ENV_PREFIX, black_box(env.clone())).unwrap())
                .load()
                .unwrap()
        })
    });

    group.finish();
}

fn bench_durations(c: &mut Criterion) {
    let mut group = c.benchmark_group("duration_parse");
    for input in ["36", "90m", "PT1H30M", "P3DT12H"] {
        group.bench_function(input, |b| b.iter(|| parse_duration(black_box(input)).unwrap()));
    }
    group.finish();
}

fn bench_details(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_details");
    let request = JobRequest::new(
        "send_email",
        json!({"to": "ops@example.com", "subject": "report", "body": "x".repeat(256)}),
    );

    for strategy in JobDetailsStrategy::ALL {
        let generator = strategy.build();
        group.bench_function(strategy.id(), |b| {
            b.iter(|| generator.details(black_box(&request)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_parse_toml,
    bench_load,
    bench_durations,
    bench_details
);
criterion_main!(benches);
