//! Mock OntapTransport for unit testing
//!
//! Scripts the cluster as an ordered queue of expected calls. Each call is
//! matched against the next expectation (method + api for REST, api name for
//! ZAPI) and answered with the scripted response. Every call is recorded so
//! tests can assert on request bodies and query parameters afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::OntapError;
use crate::ontap_trait::{Method, OntapTransport, RestRequest, RestResponse};
use crate::zapi::{self, ZapiElement};

#[derive(Debug, Clone)]
enum Reply {
    Rest(RestResponse),
    Zapi(Result<ZapiElement, (String, String)>),
    Connection(String),
}

#[derive(Debug, Clone)]
struct Expectation {
    method: Option<Method>,
    api: String,
    reply: Reply,
}

/// A call received by the mock
#[derive(Debug, Clone)]
pub enum RecordedCall {
    Rest(RestRequest),
    Zapi {
        request: ZapiElement,
        vserver: Option<String>,
    },
}

impl RecordedCall {
    /// `"GET cluster"`, `"ZAPI lun-get-iter"`
    pub fn label(&self) -> String {
        match self {
            RecordedCall::Rest(request) => format!("{} {}", request.method, request.api),
            RecordedCall::Zapi { request, .. } => format!("ZAPI {}", request.name()),
        }
    }
}

/// Mock transport for testing
#[derive(Debug, Clone)]
pub struct MockOntapClient {
    host: String,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for MockOntapClient {
    fn default() -> Self {
        Self::new("mock-cluster")
    }
}

impl MockOntapClient {
    /// Create a new mock with no scripted responses
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn push(&self, method: Option<Method>, api: &str, reply: Reply) -> &Self {
        lock(&self.expectations).push_back(Expectation {
            method,
            api: api.to_string(),
            reply,
        });
        self
    }

    /// Answer the next `method api` call with `status` and a JSON body
    pub fn expect_rest(&self, method: Method, api: &str, status: u16, body: Value) -> &Self {
        self.push(Some(method), api, Reply::Rest(RestResponse::new(status, Some(body))))
    }

    /// Answer the next `method api` call with `status` and no body
    pub fn expect_rest_empty(&self, method: Method, api: &str, status: u16) -> &Self {
        self.push(Some(method), api, Reply::Rest(RestResponse::new(status, None)))
    }

    /// Answer the next `method api` call with an ONTAP error body
    pub fn expect_rest_error(&self, method: Method, api: &str, status: u16, message: &str) -> &Self {
        self.expect_rest(
            method,
            api,
            status,
            serde_json::json!({"error": {"message": message, "code": status.to_string()}}),
        )
    }

    /// Fail the next `method api` call at the connection level
    pub fn expect_connection_error(&self, method: Method, api: &str, message: &str) -> &Self {
        self.push(Some(method), api, Reply::Connection(message.to_string()))
    }

    /// Answer the next ZAPI call with a `results` document.
    ///
    /// `results_xml` is the `<results>` element; a failed status becomes a
    /// ZAPI error exactly as the real client reports it.
    pub fn expect_zapi(&self, api: &str, results_xml: &str) -> &Self {
        let reply = match ZapiElement::parse(results_xml).and_then(|r| zapi::check_results(api, r)) {
            Ok(results) => Ok(results),
            Err(OntapError::Zapi { code, reason, .. }) => Err((code, reason)),
            Err(e) => Err(("mock".to_string(), e.to_string())),
        };
        self.push(None, api, Reply::Zapi(reply))
    }

    /// Answer the next ZAPI call with a fault
    pub fn expect_zapi_error(&self, api: &str, code: &str, reason: &str) -> &Self {
        self.push(None, api, Reply::Zapi(Err((code.to_string(), reason.to_string()))))
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// REST requests received so far
    pub fn rest_calls(&self) -> Vec<RestRequest> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Rest(request) => Some(request.clone()),
                RecordedCall::Zapi { .. } => None,
            })
            .collect()
    }

    /// REST requests matching a method
    pub fn rest_calls_with(&self, method: Method) -> Vec<RestRequest> {
        self.rest_calls()
            .into_iter()
            .filter(|request| request.method == method)
            .collect()
    }

    /// ZAPI requests received so far
    pub fn zapi_calls(&self) -> Vec<ZapiElement> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Zapi { request, .. } => Some(request.clone()),
                RecordedCall::Rest(_) => None,
            })
            .collect()
    }

    /// `"METHOD api"` labels of every call, in order
    pub fn call_labels(&self) -> Vec<String> {
        lock(&self.calls).iter().map(RecordedCall::label).collect()
    }

    /// Scripted responses not consumed yet
    pub fn remaining(&self) -> usize {
        lock(&self.expectations).len()
    }

    fn next(&self, method: Option<Method>, api: &str) -> Result<Reply, OntapError> {
        let mut expectations = lock(&self.expectations);
        let label = match method {
            Some(method) => format!("{method} {api}"),
            None => format!("ZAPI {api}"),
        };
        let Some(expected) = expectations.front() else {
            return Err(OntapError::InvalidRequest(format!("unexpected call {label}: no responses left")));
        };
        if expected.method != method || expected.api != api {
            let wanted = match expected.method {
                Some(m) => format!("{m} {}", expected.api),
                None => format!("ZAPI {}", expected.api),
            };
            return Err(OntapError::InvalidRequest(format!("unexpected call {label}, expected {wanted}")));
        }
        expectations
            .pop_front()
            .map(|e| e.reply)
            .ok_or_else(|| OntapError::InvalidRequest(format!("unexpected call {label}")))
    }
}

#[async_trait::async_trait]
impl OntapTransport for MockOntapClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn send_rest(&self, request: RestRequest) -> Result<RestResponse, OntapError> {
        lock(&self.calls).push(RecordedCall::Rest(request.clone()));
        match self.next(Some(request.method), &request.api)? {
            Reply::Rest(response) => Ok(response),
            Reply::Connection(message) => Err(OntapError::Connection(message)),
            Reply::Zapi(_) => Err(OntapError::InvalidRequest(format!(
                "{} {} scripted with a ZAPI reply",
                request.method, request.api
            ))),
        }
    }

    async fn invoke_zapi(
        &self,
        request: ZapiElement,
        vserver: Option<&str>,
    ) -> Result<ZapiElement, OntapError> {
        let api = request.name().to_string();
        lock(&self.calls).push(RecordedCall::Zapi {
            request,
            vserver: vserver.map(str::to_string),
        });
        match self.next(None, &api)? {
            Reply::Zapi(Ok(results)) => Ok(results),
            Reply::Zapi(Err((code, reason))) => Err(OntapError::zapi(api, code, reason)),
            Reply::Connection(message) => Err(OntapError::Connection(message)),
            Reply::Rest(_) => Err(OntapError::InvalidRequest(format!("ZAPI {api} scripted with a REST reply"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_order_is_enforced() {
        let mock = MockOntapClient::default();
        mock.expect_rest(Method::Get, "cluster", 200, json!({"version": {"generation": 9, "major": 10, "minor": 1}}));

        let err = mock
            .send_rest(RestRequest::new(Method::Get, "storage/luns"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected GET cluster"));

        let ok = mock.send_rest(RestRequest::new(Method::Get, "cluster")).await.unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(mock.remaining(), 0);
        assert_eq!(mock.call_labels(), vec!["GET storage/luns", "GET cluster"]);
    }

    #[tokio::test]
    async fn test_zapi_failed_results_become_errors() {
        let mock = MockOntapClient::default();
        mock.expect_zapi("lun-get-iter", r#"<results status="failed" errno="13005" reason="Unable to find API"/>"#);
        let err = mock
            .invoke_zapi(ZapiElement::new("lun-get-iter"), Some("svm1"))
            .await
            .unwrap_err();
        assert!(matches!(err, OntapError::Zapi { ref code, .. } if code == "13005"));
        match &mock.calls()[0] {
            RecordedCall::Zapi { vserver, .. } => assert_eq!(vserver.as_deref(), Some("svm1")),
            RecordedCall::Rest(_) => panic!("expected a ZAPI call"),
        }
    }
}
