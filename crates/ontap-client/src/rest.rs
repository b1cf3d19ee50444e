//! REST helpers shared by every resource
//!
//! Thin layer over [`OntapTransport::send_rest`]: record lookups with
//! pagination and 503 retries, and mutations that resolve `202 Accepted`
//! through the job tracker.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::OntapError;
use crate::job::{self, JobOptions};
use crate::ontap_trait::{Method, OntapTransport, RestRequest, RestResponse};

/// `return_timeout` sent with mutations unless the caller supplies one
pub const DEFAULT_RETURN_TIMEOUT: u32 = 30;

/// Retries for a GET answered with 503
const GET_RETRIES: u32 = 3;
const GET_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// SVM tunneling for cluster-scoped credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SvmTunnel {
    Name(String),
    Uuid(String),
}

impl SvmTunnel {
    fn header(&self) -> (String, String) {
        match self {
            SvmTunnel::Name(name) => ("X-Dot-SVM-Name".to_string(), name.clone()),
            SvmTunnel::Uuid(uuid) => ("X-Dot-SVM-UUID".to_string(), uuid.clone()),
        }
    }
}

/// Build the error for a non-2xx response.
///
/// ONTAP reports failures as `{"error": {"message", "code", "target"}}`.
pub fn rest_error(method: Method, api: &str, response: &RestResponse) -> OntapError {
    let error = response.body.as_ref().and_then(|b| b.get("error"));
    let message = match (error, &response.body) {
        (Some(error), _) => {
            let message = error.get("message").and_then(Value::as_str).unwrap_or("no error message");
            match error.get("target").and_then(Value::as_str) {
                Some(target) if !target.is_empty() => format!("{message} (target: {target})"),
                _ => message.to_string(),
            }
        }
        (None, Some(Value::String(text))) => text.chars().take(500).collect(),
        (None, Some(other)) => other.to_string(),
        (None, None) => "no response body".to_string(),
    };
    let code = error.and_then(|e| e.get("code")).map(|code| match code {
        Value::String(code) => code.clone(),
        other => other.to_string(),
    });
    OntapError::Rest {
        method: method.as_str().to_string(),
        api: api.to_string(),
        status: response.status,
        code,
        message,
    }
}

/// Add `return_timeout` to a mutation query.
///
/// A caller-supplied value wins; `0` removes the parameter altogether.
pub fn build_query_with_timeout(query: &[(&str, &str)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    match out.iter().position(|(k, _)| k == "return_timeout") {
        Some(index) if out[index].1.trim() == "0" => {
            out.remove(index);
        }
        Some(_) => {}
        None => out.push(("return_timeout".to_string(), DEFAULT_RETURN_TIMEOUT.to_string())),
    }
    out
}

fn owned_query(query: &[(&str, &str)]) -> Vec<(String, String)> {
    query
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

/// Split a `_links.next.href` into an api path and query pairs.
fn split_next_href(href: &str) -> (String, Vec<(String, String)>) {
    let trimmed = href.trim_start_matches('/');
    let trimmed = trimmed.strip_prefix("api/").unwrap_or(trimmed);
    let (path, query) = trimmed.split_once('?').unwrap_or((trimmed, ""));
    let pairs = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| {
                urlencoding::decode(s).map_or_else(|_| s.to_string(), std::borrow::Cow::into_owned)
            };
            (decode(k), decode(v))
        })
        .collect();
    (path.to_string(), pairs)
}

/// Join a collection api and a resource key
pub fn join_api(api: &str, key: Option<&str>) -> String {
    match key {
        Some(key) if !key.is_empty() => format!("{}/{}", api.trim_end_matches('/'), key),
        _ => api.to_string(),
    }
}

/// REST calls for one reconciliation
pub struct RestApi<'a> {
    transport: &'a dyn OntapTransport,
    job_options: JobOptions,
    strict_json: bool,
    tunnel: Option<SvmTunnel>,
}

impl std::fmt::Debug for RestApi<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestApi")
            .field("host", &self.transport.host())
            .field("job_options", &self.job_options)
            .field("strict_json", &self.strict_json)
            .field("tunnel", &self.tunnel)
            .finish()
    }
}

impl<'a> RestApi<'a> {
    pub fn new(transport: &'a dyn OntapTransport, job_options: JobOptions) -> Self {
        Self {
            transport,
            job_options,
            strict_json: true,
            tunnel: None,
        }
    }

    /// Accept 2xx responses whose body is not JSON
    #[must_use]
    pub fn with_strict_json(mut self, strict_json: bool) -> Self {
        self.strict_json = strict_json;
        self
    }

    /// Send `X-Dot-SVM-Name` / `X-Dot-SVM-UUID` with every call
    #[must_use]
    pub fn tunnel_to(mut self, tunnel: SvmTunnel) -> Self {
        self.tunnel = Some(tunnel);
        self
    }

    pub fn transport(&self) -> &'a dyn OntapTransport {
        self.transport
    }

    pub fn job_options(&self) -> &JobOptions {
        &self.job_options
    }

    fn request(&self, method: Method, api: &str) -> RestRequest {
        let request = RestRequest::new(method, api);
        match &self.tunnel {
            Some(tunnel) => {
                let (name, value) = tunnel.header();
                request.with_header(name, value)
            }
            None => request,
        }
    }

    fn check_body(&self, method: Method, api: &str, body: Option<Value>) -> Result<Option<Value>, OntapError> {
        match body {
            Some(Value::String(text)) if self.strict_json => Err(OntapError::InvalidResponse(format!(
                "{method} {api}: expected a JSON object, got: {}",
                text.chars().take(500).collect::<String>()
            ))),
            Some(Value::String(_)) => Ok(None),
            other => Ok(other),
        }
    }

    /// GET with up to three retries on 503
    async fn get_with_retry(&self, request: RestRequest) -> Result<RestResponse, OntapError> {
        let mut attempt = 0;
        loop {
            let response = self.transport.send_rest(request.clone()).await?;
            if response.status != 503 || attempt >= GET_RETRIES {
                return Ok(response);
            }
            attempt += 1;
            let message = rest_error(Method::Get, &request.api, &response).to_string();
            debug!(
                status_code = response.status,
                endpoint = %request.api,
                message = %message,
                "retrying GET (attempt {}/{})",
                attempt,
                GET_RETRIES
            );
            tokio::time::sleep(GET_RETRY_PAUSE).await;
        }
    }

    /// GET a single object (e.g. `cluster`, `support/autosupport`).
    pub async fn get(&self, api: &str, query: &[(&str, &str)]) -> Result<Value, OntapError> {
        let request = self.request(Method::Get, api).with_query(owned_query(query));
        let response = self.get_with_retry(request).await?;
        if !response.is_success() {
            return Err(rest_error(Method::Get, api, &response));
        }
        Ok(self
            .check_body(Method::Get, api, response.body)?
            .unwrap_or(Value::Object(Map::new())))
    }

    /// GET a collection and return all `records`, following `_links.next`.
    pub async fn get_records(&self, api: &str, query: &[(&str, &str)]) -> Result<Vec<Value>, OntapError> {
        let mut records = Vec::new();
        let mut path = api.to_string();
        let mut pairs = owned_query(query);

        loop {
            let request = self.request(Method::Get, &path).with_query(pairs);
            let response = self.get_with_retry(request).await?;
            if !response.is_success() {
                return Err(rest_error(Method::Get, &path, &response));
            }
            let Some(body) = self.check_body(Method::Get, &path, response.body)? else {
                break;
            };
            if let Some(Value::Array(page)) = body.get("records") {
                records.extend(page.iter().cloned());
            }
            match body.pointer("/_links/next/href").and_then(Value::as_str) {
                Some(next) => {
                    debug!("Fetching next page: {}", next);
                    (path, pairs) = split_next_href(next);
                }
                None => break,
            }
        }
        Ok(records)
    }

    /// GET a collection expected to hold at most one record.
    pub async fn get_one_record(&self, api: &str, query: &[(&str, &str)]) -> Result<Option<Value>, OntapError> {
        let mut records = self.get_records(api, query).await?;
        match records.len() {
            0 => Ok(None),
            1 => Ok(records.pop()),
            n => Err(OntapError::InvalidResponse(format!(
                "calling {api}: expected at most one record, found {n} records with query {query:?}"
            ))),
        }
    }

    async fn mutate(
        &self,
        method: Method,
        api: &str,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, OntapError> {
        let mut request = self.request(method, api).with_query(build_query_with_timeout(query));
        if let Some(body) = body {
            request = request.with_body(body);
        }
        let response = self.transport.send_rest(request).await?;
        if !response.is_success() {
            return Err(rest_error(method, api, &response));
        }

        let status = response.status;
        let body = self.check_body(method, api, response.body)?;
        if status != 202 {
            return Ok(body);
        }

        let Some(mut body) = body else {
            return Err(OntapError::InvalidResponse(format!(
                "{method} {api}: 202 Accepted without a job link"
            )));
        };
        let href = job::job_href(&body)
            .map(str::to_string)
            .ok_or_else(|| OntapError::InvalidResponse(format!("{method} {api}: 202 Accepted without a job link")))?;
        let record = job::wait_on_job(self.transport, &href, &self.job_options).await?;
        if let Value::Object(map) = &mut body {
            map.insert("job_response".to_string(), Value::String(record.message().to_string()));
        }
        Ok(Some(body))
    }

    /// POST, waiting for the job when the cluster answers 202.
    pub async fn post_async(
        &self,
        api: &str,
        body: Value,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, OntapError> {
        self.mutate(Method::Post, api, Some(body), query).await
    }

    /// PATCH `api/<key>`, waiting for the job when the cluster answers 202.
    pub async fn patch_async(
        &self,
        api: &str,
        key: Option<&str>,
        body: Value,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, OntapError> {
        self.mutate(Method::Patch, &join_api(api, key), Some(body), query).await
    }

    /// DELETE `api/<key>`, waiting for the job when the cluster answers 202.
    pub async fn delete_async(
        &self,
        api: &str,
        key: Option<&str>,
        body: Option<Value>,
        query: &[(&str, &str)],
    ) -> Result<Option<Value>, OntapError> {
        self.mutate(Method::Delete, &join_api(api, key), body, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_return_timeout_added_by_default() {
        let query = build_query_with_timeout(&[("fields", "name")]);
        assert_eq!(
            query,
            vec![
                ("fields".to_string(), "name".to_string()),
                ("return_timeout".to_string(), "30".to_string())
            ]
        );
    }

    #[test]
    fn test_return_timeout_caller_value_wins_and_zero_suppresses() {
        let query = build_query_with_timeout(&[("return_timeout", "120")]);
        assert_eq!(query, vec![("return_timeout".to_string(), "120".to_string())]);
        assert!(build_query_with_timeout(&[("return_timeout", "0")]).is_empty());
    }

    #[test]
    fn test_rest_error_from_body() {
        let response = RestResponse::new(
            400,
            Some(json!({"error": {"message": "New LUN size is the same as the old LUN size", "code": "5374922"}})),
        );
        let err = rest_error(Method::Patch, "storage/luns/u1", &response);
        match &err {
            OntapError::Rest { status, code, message, .. } => {
                assert_eq!(*status, 400);
                assert_eq!(code.as_deref(), Some("5374922"));
                assert_eq!(message, "New LUN size is the same as the old LUN size");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "REST API error calling PATCH storage/luns/u1: 400 - New LUN size is the same as the old LUN size"
        );
    }

    #[test]
    fn test_rest_error_with_target_and_numeric_code() {
        let response = RestResponse::new(
            404,
            Some(json!({"error": {"message": "entry doesn't exist", "code": 4, "target": "svm.name"}})),
        );
        let err = rest_error(Method::Get, "svm/svms", &response);
        assert_eq!(err.cluster_message(), Some("entry doesn't exist (target: svm.name)"));
        assert!(matches!(err, OntapError::Rest { code: Some(ref c), .. } if c == "4"));
    }

    #[test]
    fn test_split_next_href() {
        let (path, pairs) = split_next_href("/api/storage/aggregates?start.uuid=abc&fields=name%2Cuuid");
        assert_eq!(path, "storage/aggregates");
        assert_eq!(
            pairs,
            vec![
                ("start.uuid".to_string(), "abc".to_string()),
                ("fields".to_string(), "name,uuid".to_string())
            ]
        );
    }

    #[test]
    fn test_join_api() {
        assert_eq!(join_api("storage/luns", Some("u1")), "storage/luns/u1");
        assert_eq!(join_api("storage/luns/", Some("u1")), "storage/luns/u1");
        assert_eq!(join_api("cluster", None), "cluster");
    }
}
