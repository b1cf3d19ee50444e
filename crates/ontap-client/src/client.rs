//! ONTAP HTTP client
//!
//! One client per reconciliation. REST calls go to `https://<host>/api/`,
//! ZAPI calls are POSTed as XML to the filer servlet. Both share the same
//! `reqwest::Client`, so TLS settings and credentials apply to either dialect.

use std::sync::{Mutex, MutexGuard, PoisonError};

use reqwest::{Client, Identity};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{ConnectionConfig, Credentials};
use crate::error::OntapError;
use crate::ontap_trait::{Method, OntapTransport, RestRequest, RestResponse};
use crate::zapi::{self, DEFAULT_ZAPI_VERSION, ZapiElement};

/// Header carrying the client identification
const CLIENT_APP_HEADER: &str = "X-Dot-Client-App";

/// ONTAP API client
pub struct OntapClient {
    client: Client,
    host: String,
    rest_base_url: String,
    zapi_url: String,
    basic_auth: Option<(String, String)>,
    client_app: String,
    sanitize_code_points: Vec<u8>,
    trace_apis: bool,
    zapi_version: Mutex<(u32, u32)>,
    last_zapi_raw: Mutex<Option<String>>,
}

impl std::fmt::Debug for OntapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OntapClient")
            .field("host", &self.host)
            .field("rest_base_url", &self.rest_base_url)
            .field("zapi_url", &self.zapi_url)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl OntapClient {
    /// Create a client for the configured cluster.
    ///
    /// Certificate files are read once, here.
    pub fn new(config: &ConnectionConfig) -> Result<Self, OntapError> {
        Self::with_urls(config, config.rest_base_url(), config.zapi_url())
    }

    /// Create a client against explicit endpoints (used to point at a local
    /// test server).
    pub fn with_urls(
        config: &ConnectionConfig,
        rest_base_url: impl Into<String>,
        zapi_url: impl Into<String>,
    ) -> Result<Self, OntapError> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.validate_certs);

        if let Some(pem) = config.credentials.identity_pem()? {
            let identity = Identity::from_pem(&pem)
                .map_err(|e| OntapError::Certificate(format!("invalid client certificate: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(OntapError::Http)?;

        let basic_auth = match &config.credentials {
            Credentials::Basic { username, password } => Some((username.clone(), password.clone())),
            _ => None,
        };

        let mut rest_base_url = rest_base_url.into();
        if !rest_base_url.ends_with('/') {
            rest_base_url.push('/');
        }

        Ok(Self {
            client,
            host: config.hostname.clone(),
            rest_base_url,
            zapi_url: zapi_url.into(),
            basic_auth,
            client_app: config.client_app.clone(),
            sanitize_code_points: config.sanitize_code_points.clone(),
            trace_apis: config.trace_apis,
            zapi_version: Mutex::new(DEFAULT_ZAPI_VERSION),
            last_zapi_raw: Mutex::new(None),
        })
    }

    /// Get the REST base URL
    pub fn rest_base_url(&self) -> &str {
        &self.rest_base_url
    }

    /// ZAPI version currently used in the envelope
    pub fn zapi_version(&self) -> (u32, u32) {
        *lock(&self.zapi_version)
    }

    /// Ask the cluster for its highest supported ZAPI version and use it.
    ///
    /// Failures keep the default version; the call is advisory.
    pub async fn negotiate_zapi_version(&self) -> (u32, u32) {
        let request = ZapiElement::new("system-get-ontapi-version");
        match self.invoke_zapi(request, None).await {
            Ok(results) => {
                let major = results.child_content("major-version").and_then(|v| v.parse().ok());
                let minor = results.child_content("minor-version").and_then(|v| v.parse().ok());
                if let (Some(major), Some(minor)) = (major, minor) {
                    *lock(&self.zapi_version) = (major, minor);
                }
            }
            Err(e) => debug!("ZAPI version negotiation failed, keeping default: {}", e),
        }
        self.zapi_version()
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(CLIENT_APP_HEADER, &self.client_app);
        match &self.basic_auth {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl OntapTransport for OntapClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn send_rest(&self, request: RestRequest) -> Result<RestResponse, OntapError> {
        let url = format!("{}{}", self.rest_base_url, request.api.trim_start_matches('/'));
        debug!("{} {}", request.method, url);
        if self.trace_apis {
            info!(query = ?request.query, body = ?request.body, "request {} {}", request.method, request.api);
        }

        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Patch => self.client.patch(&url),
            Method::Delete => self.client.delete(&url),
        };
        let mut builder = self
            .authorize(builder)
            .header("Accept", "application/json")
            .query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(OntapError::from_send)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(OntapError::from_send)?;

        let body = if text.trim().is_empty() {
            None
        } else {
            // Proxies and load balancers may answer with HTML or plain text
            Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        };

        debug!(status_code = status, endpoint = %request.api, "REST {} {} -> {}", request.method, request.api, status);
        if self.trace_apis {
            info!(body = ?body, "response {} {}", request.method, request.api);
        }

        Ok(RestResponse::new(status, body))
    }

    async fn invoke_zapi(
        &self,
        request: ZapiElement,
        vserver: Option<&str>,
    ) -> Result<ZapiElement, OntapError> {
        let api = request.name().to_string();
        let envelope = zapi::build_envelope(&request, self.zapi_version(), vserver);
        debug!("ZAPI {} on {}", api, vserver.unwrap_or("cluster"));
        if self.trace_apis {
            info!(request = %envelope, "ZAPI request {}", api);
        }

        let response = self
            .authorize(self.client.post(&self.zapi_url))
            .header("Content-Type", "text/xml; charset=utf-8")
            .body(envelope)
            .send()
            .await
            .map_err(OntapError::from_send)?;

        let status = response.status();
        let raw = response.text().await.map_err(OntapError::from_send)?;
        *lock(&self.last_zapi_raw) = Some(raw.clone());

        if self.trace_apis {
            info!(response = %raw, "ZAPI response {}", api);
        }

        if !status.is_success() {
            return Err(OntapError::zapi(
                api,
                status.as_u16().to_string(),
                status.canonical_reason().unwrap_or("HTTP error").to_string(),
            ));
        }

        zapi::parse_response(&api, &raw, &self.sanitize_code_points)
    }

    fn last_zapi_response(&self) -> Option<String> {
        lock(&self.last_zapi_raw).clone()
    }
}
