//! Tracing helpers for drover.
//!
//! Span constructors for the operations that talk to a backend: provider
//! creation, schema setup, job submission, retention sweeps and harness
//! scenarios. Span names are prefixed with `drover.` so they can be filtered
//! as a group.
//!
//! # Example
//!
//! ```ignore
//! use drover::telemetry::enqueue_span;
//! use tracing::Instrument;
//!
//! scheduler.enqueue(request).instrument(enqueue_span("send_email")).await?;
//! ```

use std::future::Future;
use std::time::Instant;

use tracing::{info_span, Instrument, Span};

/// Span for building a storage provider.
#[must_use]
pub fn storage_create_span(backend: impl AsRef<str>, table_prefix: Option<&str>) -> Span {
    info_span!(
        "drover.storage.create",
        backend = %backend.as_ref(),
        table_prefix = table_prefix.unwrap_or(""),
    )
}

/// Span for schema creation or migration on one provider.
#[must_use]
pub fn schema_span(provider: impl AsRef<str>, jobs_table: impl AsRef<str>) -> Span {
    info_span!(
        "drover.schema",
        provider = %provider.as_ref(),
        jobs_table = %jobs_table.as_ref(),
    )
}

/// Span for submitting one job.
#[must_use]
pub fn enqueue_span(job_kind: impl AsRef<str>) -> Span {
    info_span!("drover.enqueue", job_kind = %job_kind.as_ref())
}

/// Span for one retention sweep.
#[must_use]
pub fn sweep_span(provider: impl AsRef<str>) -> Span {
    info_span!("drover.sweep", provider = %provider.as_ref())
}

/// Span for one end-to-end scenario against a backend variant.
///
/// `job_id` starts empty and is recorded once the job is submitted.
#[must_use]
pub fn scenario_span(variant: impl AsRef<str>, sandbox: impl AsRef<str>) -> Span {
    info_span!(
        "drover.scenario",
        variant = %variant.as_ref(),
        sandbox = %sandbox.as_ref(),
        job_id = tracing::field::Empty,
    )
}

/// Run `future` inside a scenario span.
pub fn instrument_scenario<F>(
    variant: impl AsRef<str>,
    sandbox: impl AsRef<str>,
    future: F,
) -> impl Future<Output = F::Output>
where
    F: Future,
{
    future.instrument(scenario_span(variant, sandbox))
}

/// Log a job submission.
pub fn record_job_enqueued(job_id: impl AsRef<str>, job_kind: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        job_kind = %job_kind.as_ref(),
        "job enqueued"
    );
}

/// Log a terminal job observation with the time it took to get there.
pub fn record_job_outcome(job_id: impl AsRef<str>, state: impl AsRef<str>, elapsed_secs: f64) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        state = %state.as_ref(),
        elapsed_secs,
        "job reached terminal state"
    );
}

/// Wall-clock timer for a phase, logged when finished.
#[derive(Debug)]
pub struct PhaseTimer {
    phase: &'static str,
    start: Instant,
}

impl PhaseTimer {
    #[must_use]
    pub fn start(phase: &'static str) -> Self {
        Self {
            phase,
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn phase(&self) -> &'static str {
        self.phase
    }

    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    /// Log the phase duration and return it.
    pub fn finish(self) -> std::time::Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!(
            phase = self.phase,
            elapsed_ms = elapsed.as_millis() as u64,
            "phase finished"
        );
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_create_span() {
        let span = storage_create_span("sql", Some("tenant_"));
        assert_eq!(span.metadata().unwrap().name(), "drover.storage.create");
    }

    #[test]
    fn test_schema_span() {
        let span = schema_span("sql/mysql", "drover_jobs");
        assert_eq!(span.metadata().unwrap().name(), "drover.schema");
    }

    #[test]
    fn test_enqueue_span() {
        let span = enqueue_span("send_email");
        assert_eq!(span.metadata().unwrap().name(), "drover.enqueue");
    }

    #[test]
    fn test_sweep_span() {
        let span = sweep_span("memory");
        assert_eq!(span.metadata().unwrap().name(), "drover.sweep");
    }

    #[test]
    fn test_scenario_span() {
        let span = scenario_span("mysql", "drover-e2e-1234");
        assert_eq!(span.metadata().unwrap().name(), "drover.scenario");
    }

    #[tokio::test]
    async fn test_instrument_scenario_passes_output_through() {
        let value = instrument_scenario("mysql", "sandbox", async { 42 }).await;
        assert_eq!(value, 42);
    }

    #[test]
    fn test_phase_timer() {
        let timer = PhaseTimer::start("startup");
        assert_eq!(timer.phase(), "startup");

        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(timer.elapsed().as_nanos() > 0);
        assert!(timer.finish().as_nanos() > 0);
    }
}
