//! OntapTransport trait for mocking
//!
//! The reconciler only talks to the cluster through this trait. The
//! concrete [`crate::OntapClient`] implements it over HTTP, and tests use
//! [`crate::mock::MockOntapClient`] to script responses.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::OntapError;
use crate::zapi::ZapiElement;

/// HTTP method of a REST call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One REST request, relative to `/api/`
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    pub method: Method,
    /// Path below `/api/`, e.g. `storage/aggregates/<uuid>`
    pub api: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    /// Overrides the client-wide request timeout
    pub timeout: Option<Duration>,
}

impl RestRequest {
    pub fn new(method: Method, api: impl Into<String>) -> Self {
        Self {
            method,
            api: api.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a query parameter
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Raw REST response. Error statuses are returned here, not as `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl RestResponse {
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Trait for ONTAP transport operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
/// Only transport faults (connection refused, TLS failure, timeout) are
/// returned as `Err` from [`send_rest`](Self::send_rest); HTTP error
/// statuses come back as a [`RestResponse`] so callers can classify them.
#[async_trait::async_trait]
pub trait OntapTransport: Send + Sync {
    /// Host the transport talks to
    fn host(&self) -> &str;

    /// Send one REST request
    async fn send_rest(&self, request: RestRequest) -> Result<RestResponse, OntapError>;

    /// Invoke a ZAPI call and return its `results` element.
    ///
    /// `status="failed"` is returned as [`OntapError::Zapi`].
    async fn invoke_zapi(
        &self,
        request: ZapiElement,
        vserver: Option<&str>,
    ) -> Result<ZapiElement, OntapError>;

    /// Raw text of the last ZAPI response, for tracing
    fn last_zapi_response(&self) -> Option<String> {
        None
    }
}
