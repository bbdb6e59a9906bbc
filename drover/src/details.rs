//! Job details strategies.
//!
//! A strategy turns a [`JobRequest`] into the [`JobDetails`] stored with the
//! job record. Strategies are looked up by identifier while the
//! configuration is validated, so an unknown identifier fails at load time.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::job::JobRequest;

/// Descriptive information stored alongside a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDetails {
    pub kind: String,
    /// Human readable call shape, e.g. `send_email(body, to)`.
    pub signature: String,
    /// Top-level payload field names, sorted.
    pub payload_fields: Vec<String>,
}

impl JobDetails {
    pub fn for_request(request: &JobRequest) -> Self {
        let payload_fields = payload_fields(request);
        let signature = signature(&request.kind, &payload_fields);
        Self {
            kind: request.kind.clone(),
            signature,
            payload_fields,
        }
    }
}

fn payload_fields(request: &JobRequest) -> Vec<String> {
    let mut fields: Vec<String> = match &request.payload {
        serde_json::Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    };
    fields.sort();
    fields
}

fn signature(kind: &str, fields: &[String]) -> String {
    format!("{kind}({})", fields.join(", "))
}

/// Produces [`JobDetails`] for incoming requests.
pub trait JobDetailsGenerator: Send + Sync {
    fn details(&self, request: &JobRequest) -> JobDetails;
}

/// Computes details for every request.
#[derive(Debug, Default)]
pub struct DirectJobDetailsGenerator;

impl JobDetailsGenerator for DirectJobDetailsGenerator {
    fn details(&self, request: &JobRequest) -> JobDetails {
        JobDetails::for_request(request)
    }
}

/// Memoizes details per job shape: the kind plus its sorted payload fields.
#[derive(Debug, Default)]
pub struct CachingJobDetailsGenerator {
    cache: RwLock<HashMap<(String, Vec<String>), JobDetails>>,
}

impl CachingJobDetailsGenerator {
    pub fn cached_shapes(&self) -> usize {
        self.cache.read().len()
    }
}

impl JobDetailsGenerator for CachingJobDetailsGenerator {
    fn details(&self, request: &JobRequest) -> JobDetails {
        let key = (request.kind.clone(), payload_fields(request));
        if let Some(hit) = self.cache.read().get(&key) {
            return hit.clone();
        }
        let details = JobDetails {
            kind: key.0.clone(),
            signature: signature(&key.0, &key.1),
            payload_fields: key.1.clone(),
        };
        self.cache.write().entry(key).or_insert(details).clone()
    }
}

/// Registered job details strategies.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobDetailsStrategy {
    Caching,
    Direct,
}

impl JobDetailsStrategy {
    pub const ALL: [JobDetailsStrategy; 2] = [JobDetailsStrategy::Caching, JobDetailsStrategy::Direct];

    pub fn id(&self) -> &'static str {
        match self {
            JobDetailsStrategy::Caching => "caching",
            JobDetailsStrategy::Direct => "direct",
        }
    }

    pub fn build(&self) -> Box<dyn JobDetailsGenerator> {
        match self {
            JobDetailsStrategy::Caching => Box::new(CachingJobDetailsGenerator::default()),
            JobDetailsStrategy::Direct => Box::new(DirectJobDetailsGenerator),
        }
    }
}

impl fmt::Display for JobDetailsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for JobDetailsStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|strategy| strategy.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|s| s.id()).collect();
                format!("unknown strategy `{wanted}`, expected one of {known:?}")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_details_list_sorted_payload_fields() {
        let request = JobRequest::new("send_email", json!({"to": "a@b.c", "body": "hi"}));
        let details = JobDetails::for_request(&request);

        assert_eq!(details.payload_fields, vec!["body", "to"]);
        assert_eq!(details.signature, "send_email(body, to)");
    }

    #[test]
    fn test_caching_generator_keeps_per_request_fields() {
        let generator = CachingJobDetailsGenerator::default();

        let year = generator.details(&JobRequest::new("report", json!({"year": 2024})));
        let month = generator.details(&JobRequest::new("report", json!({"month": 3})));
        let again = generator.details(&JobRequest::new("report", json!({"year": 2025})));
        generator.details(&JobRequest::new("noop", json!(null)));

        assert_eq!(year.payload_fields, vec!["year"]);
        assert_eq!(year.signature, "report(year)");
        assert_eq!(month.payload_fields, vec!["month"]);
        assert_eq!(month.signature, "report(month)");
        assert_eq!(again, year);
        assert_eq!(generator.cached_shapes(), 3);
    }

    #[test]
    fn test_caching_matches_direct() {
        let caching = JobDetailsStrategy::Caching.build();
        let direct = JobDetailsStrategy::Direct.build();
        for payload in [json!({"b": 1, "a": 2}), json!({"a": 1}), json!([1, 2]), json!({"b": 1, "a": 2})] {
            let request = JobRequest::new("mixed", payload);
            assert_eq!(caching.details(&request), direct.details(&request));
        }
    }

    #[test]
    fn test_registry_lookup() {
        assert_eq!("Caching".parse::<JobDetailsStrategy>(), Ok(JobDetailsStrategy::Caching));
        assert_eq!(" direct ".parse::<JobDetailsStrategy>(), Ok(JobDetailsStrategy::Direct));
        assert!("asm".parse::<JobDetailsStrategy>().is_err());

        for strategy in JobDetailsStrategy::ALL {
            assert_eq!(strategy.id().parse::<JobDetailsStrategy>(), Ok(strategy));
            let request = JobRequest::new("noop", json!({}));
            assert_eq!(strategy.build().details(&request).kind, "noop");
        }
    }
}
