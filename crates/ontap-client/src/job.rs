//! Asynchronous job tracking
//!
//! Mutations that take longer than `return_timeout` answer `202 Accepted`
//! with a `job` object. The job is polled until it reaches a terminal state
//! or the wait budget runs out.

use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::OntapError;
use crate::ontap_trait::{Method, OntapTransport, RestRequest};

/// Polling settings for one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    pub poll_interval: Duration,
    /// Total wait before giving up
    pub timeout: Duration,
    /// Consecutive failed reads of the job endpoint that are tolerated
    pub max_consecutive_errors: u32,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            max_consecutive_errors: 3,
        }
    }
}

/// Job state as reported by `GET cluster/jobs/<uuid>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// `running`, `queued` or `paused`
    Running,
    Success,
    /// `failure` or `error`
    Failure,
    /// Any state this client does not know; treated as terminal
    Unknown(String),
}

impl From<&str> for JobState {
    fn from(state: &str) -> Self {
        match state {
            "running" | "queued" | "paused" => JobState::Running,
            "success" => JobState::Success,
            "failure" | "error" => JobState::Failure,
            other => JobState::Unknown(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let state = String::deserialize(deserializer)?;
        Ok(JobState::from(state.as_str()))
    }
}

/// Job record
#[derive(Debug, Clone, Deserialize)]
pub struct JobRecord {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(skip)]
    pub href: String,
    pub state: JobState,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub start_time: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub end_time: Option<DateTime<FixedOffset>>,
}

impl JobRecord {
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }

    /// Wall-clock duration, when the cluster reported both ends
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.end_time? - self.start_time?)
    }
}

/// `job._links.self.href` of a 202 response body
pub fn job_href(body: &Value) -> Option<&str> {
    body.pointer("/job/_links/self/href").and_then(Value::as_str)
}

/// Strip the `/api/` prefix so the href can be used as a REST api path.
fn href_to_api(href: &str) -> &str {
    let trimmed = href.trim_start_matches('/');
    trimmed.strip_prefix("api/").unwrap_or(trimmed)
}

async fn read_job(transport: &dyn OntapTransport, api: &str) -> Result<JobRecord, OntapError> {
    let response = transport.send_rest(RestRequest::new(Method::Get, api)).await?;
    if !response.is_success() {
        return Err(crate::rest::rest_error(Method::Get, api, &response));
    }
    let body = response
        .body
        .ok_or_else(|| OntapError::InvalidResponse(format!("empty body reading job {api}")))?;
    Ok(serde_json::from_value(body)?)
}

/// Poll a job until it reaches a terminal state.
///
/// A successful job returns its record. A failed job, an unknown terminal
/// state, too many consecutive read errors, or the timeout return an error.
pub async fn wait_on_job(
    transport: &dyn OntapTransport,
    href: &str,
    options: &JobOptions,
) -> Result<JobRecord, OntapError> {
    let api = href_to_api(href);
    let mut waited = Duration::ZERO;
    let mut consecutive_errors = 0u32;

    loop {
        match read_job(transport, api).await {
            Ok(mut record) => {
                consecutive_errors = 0;
                record.href = href.to_string();
                match &record.state {
                    JobState::Running => debug!("Job {} still running: {}", api, record.message()),
                    JobState::Success => {
                        info!("Job {} completed: {}", api, record.message());
                        return Ok(record);
                    }
                    JobState::Failure => {
                        return Err(OntapError::Job(match record.message.as_deref() {
                            Some(message) if !message.is_empty() => message.to_string(),
                            _ => format!("job {api} failed without a message"),
                        }));
                    }
                    JobState::Unknown(state) => {
                        return Err(OntapError::Job(format!(
                            "job {api} ended in unexpected state '{state}': {}",
                            record.message()
                        )));
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                debug!(
                    status_code = e.status(),
                    endpoint = api,
                    message = %e,
                    "failed to read job status (attempt {}/{})",
                    consecutive_errors,
                    options.max_consecutive_errors
                );
                if consecutive_errors > options.max_consecutive_errors {
                    return Err(e);
                }
            }
        }

        if waited >= options.timeout {
            return Err(OntapError::JobTimeout(format!(
                "Timeout waiting for job {href} to complete after {} seconds. \
                 The operation continues on the cluster; check its status with the job uuid.",
                options.timeout.as_secs()
            )));
        }
        tokio::time::sleep(options.poll_interval).await;
        waited += options.poll_interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_state_mapping() {
        assert_eq!(JobState::from("running"), JobState::Running);
        assert_eq!(JobState::from("queued"), JobState::Running);
        assert_eq!(JobState::from("success"), JobState::Success);
        assert_eq!(JobState::from("error"), JobState::Failure);
        assert_eq!(JobState::from("failure"), JobState::Failure);
        assert_eq!(JobState::from("weird"), JobState::Unknown("weird".to_string()));
    }

    #[test]
    fn test_job_href_extraction() {
        let body = json!({"job": {"uuid": "u1", "_links": {"self": {"href": "/api/cluster/jobs/u1"}}}});
        assert_eq!(job_href(&body), Some("/api/cluster/jobs/u1"));
        assert_eq!(href_to_api("/api/cluster/jobs/u1"), "cluster/jobs/u1");
        assert_eq!(job_href(&json!({"num_records": 0})), None);
    }

    #[test]
    fn test_record_deserialize_with_times() {
        let record: JobRecord = serde_json::from_value(json!({
            "uuid": "u1",
            "state": "success",
            "message": "success",
            "start_time": "2024-01-02T10:00:00-05:00",
            "end_time": "2024-01-02T10:00:42-05:00"
        }))
        .unwrap();
        assert_eq!(record.state, JobState::Success);
        assert_eq!(record.elapsed(), Some(chrono::Duration::seconds(42)));
    }
}
