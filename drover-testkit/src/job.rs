use drover::JobRequest;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Jobs the e2e application images know how to run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TestJob {
    /// Does nothing and succeeds.
    Noop,
    SendEmail { to: String, subject: String },
    /// Fails with `error` on every attempt.
    Failing { error: String },
}

impl TestJob {
    pub fn kind(&self) -> &'static str {
        match self {
            TestJob::Noop => "noop",
            TestJob::SendEmail { .. } => "send_email",
            TestJob::Failing { .. } => "failing",
        }
    }

    pub fn request(&self) -> JobRequest {
        let payload = match self {
            TestJob::Noop => json!({}),
            TestJob::SendEmail { to, subject } => json!({ "to": to, "subject": subject }),
            TestJob::Failing { error } => json!({ "error": error }),
        };
        JobRequest::new(self.kind(), payload)
    }
}

impl From<TestJob> for JobRequest {
    fn from(job: TestJob) -> Self {
        job.request()
    }
}

/// Ready-made requests.
pub mod sample_jobs {
    use super::*;

    pub fn noop() -> JobRequest {
        TestJob::Noop.request()
    }

    pub fn send_email(to: &str) -> JobRequest {
        TestJob::SendEmail {
            to: to.to_string(),
            subject: "drover e2e".to_string(),
        }
        .request()
    }

    pub fn failing(error: &str) -> JobRequest {
        TestJob::Failing {
            error: error.to_string(),
        }
        .request()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requests_carry_kind_and_payload() {
        let request = sample_jobs::send_email("ops@example.com");
        assert_eq!(request.kind, "send_email");
        assert_eq!(request.payload["to"], "ops@example.com");

        assert_eq!(JobRequest::from(TestJob::Noop).kind, "noop");
    }
}
