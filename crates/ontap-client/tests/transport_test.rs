#![allow(clippy::unwrap_used)]
// Integration tests for `OntapClient` using wiremock.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ontap_client::zapi::ZAPI_PATH;
use ontap_client::{
    ConnectionConfig, Credentials, JobOptions, Method, OntapClient, OntapError, OntapTransport, RestApi, RestRequest,
    SvmTunnel, ZapiElement,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> ConnectionConfig {
    let credentials = Credentials::from_options(Some("admin"), Some("secret"), None, None).unwrap();
    ConnectionConfig::new("cluster1", credentials)
}

async fn setup() -> (MockServer, OntapClient) {
    let server = MockServer::start().await;
    let client = OntapClient::with_urls(
        &config(),
        format!("{}/api/", server.uri()),
        format!("{}{}", server.uri(), ZAPI_PATH),
    )
    .unwrap();
    (server, client)
}

fn fast_jobs() -> JobOptions {
    JobOptions {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_secs(5),
        max_consecutive_errors: 3,
    }
}

// ── REST transport ──────────────────────────────────────────────────

#[tokio::test]
async fn test_basic_auth_and_client_header_are_sent() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/cluster"))
        .and(header("authorization", "Basic YWRtaW46c2VjcmV0"))
        .and(header_exists("X-Dot-Client-App"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "cluster1"})))
        .mount(&server)
        .await;

    let response = client.send_rest(RestRequest::new(Method::Get, "cluster")).await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, Some(json!({"name": "cluster1"})));
}

#[tokio::test]
async fn test_error_status_is_returned_not_raised() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/storage/luns/u1"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": {"message": "entry doesn't exist", "code": "4"}})),
        )
        .mount(&server)
        .await;

    let response = client
        .send_rest(RestRequest::new(Method::Get, "storage/luns/u1"))
        .await
        .unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_connection_refused_is_a_connection_error() {
    let client = OntapClient::with_urls(&config(), "http://127.0.0.1:1/api/", "http://127.0.0.1:1/zapi").unwrap();

    let result = client.send_rest(RestRequest::new(Method::Get, "cluster")).await;
    assert!(
        matches!(result, Err(OntapError::Connection(_))),
        "expected Connection error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_post_adds_return_timeout() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/storage/aggregates"))
        .and(query_param("return_timeout", "30"))
        .and(body_partial_json(json!({"name": "aggr1"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"num_records": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let body = rest
        .post_async("storage/aggregates", json!({"name": "aggr1"}), &[])
        .await
        .unwrap();
    assert_eq!(body, Some(json!({"num_records": 1})));
}

#[tokio::test]
async fn test_svm_tunnel_header() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/storage/luns"))
        .and(header("X-Dot-SVM-Name", "svm1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": [], "num_records": 0})))
        .expect(1)
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs()).tunnel_to(SvmTunnel::Name("svm1".to_string()));
    assert!(rest.get_records("storage/luns", &[]).await.unwrap().is_empty());
}

// ── Jobs ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_accepted_response_waits_for_job() {
    let (server, client) = setup().await;

    Mock::given(method("PATCH"))
        .and(path("/api/storage/aggregates/a1"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job": {"uuid": "j1", "_links": {"self": {"href": "/api/cluster/jobs/j1"}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cluster/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "j1", "state": "running"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cluster/jobs/j1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "j1", "state": "success", "message": "Aggregate renamed"
        })))
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let body = rest
        .patch_async("storage/aggregates", Some("a1"), json!({"name": "aggr2"}), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["job_response"], json!("Aggregate renamed"));
}

#[tokio::test]
async fn test_failed_job_is_an_error() {
    let (server, client) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/storage/qos/policies/q1"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job": {"uuid": "j2", "_links": {"self": {"href": "/api/cluster/jobs/j2"}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cluster/jobs/j2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "j2", "state": "failure", "message": "policy group is in use"
        })))
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let err = rest
        .delete_async("storage/qos/policies", Some("q1"), None, &[])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Job error: policy group is in use");
}

#[tokio::test]
async fn test_job_timeout_names_the_budget() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/cluster/software"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job": {"uuid": "j3", "_links": {"self": {"href": "/api/cluster/jobs/j3"}}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/cluster/jobs/j3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"uuid": "j3", "state": "running"})))
        .mount(&server)
        .await;

    let options = JobOptions {
        poll_interval: Duration::from_millis(10),
        timeout: Duration::from_millis(30),
        max_consecutive_errors: 3,
    };
    let rest = RestApi::new(&client, options);
    let err = rest.post_async("cluster/software", json!({}), &[]).await.unwrap_err();
    assert!(matches!(err, OntapError::JobTimeout(_)));
    assert!(err.to_string().contains("continues on the cluster"));
}

// ── Records ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_records_follows_next_link() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/storage/luns"))
        .and(query_param("start.uuid", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{"name": "/vol/v1/l2"}], "num_records": 1
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/storage/luns"))
        .and(query_param("fields", "name"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{"name": "/vol/v1/l1"}],
            "num_records": 1,
            "_links": {"next": {"href": "/api/storage/luns?start.uuid=u1"}}
        })))
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let records = rest.get_records("storage/luns", &[("fields", "name")]).await.unwrap();
    assert_eq!(records, vec![json!({"name": "/vol/v1/l1"}), json!({"name": "/vol/v1/l2"})]);
}

#[tokio::test]
async fn test_get_one_record_rejects_duplicates() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/svm/svms"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{"name": "svm1"}, {"name": "svm1"}], "num_records": 2
        })))
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let err = rest.get_one_record("svm/svms", &[("name", "svm1")]).await.unwrap_err();
    assert!(err.to_string().contains("expected at most one record"));
}

#[tokio::test]
async fn test_strict_json_rejects_html() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/cluster"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let rest = RestApi::new(&client, fast_jobs());
    let err = rest.get("cluster", &[]).await.unwrap_err();
    assert!(matches!(err, OntapError::InvalidResponse(_)));

    let lenient = RestApi::new(&client, fast_jobs()).with_strict_json(false);
    assert_eq!(lenient.get("cluster", &[]).await.unwrap(), json!({}));
}

// ── ZAPI ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_zapi_envelope_and_sanitized_response() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(ZAPI_PATH))
        .and(header("content-type", "text/xml; charset=utf-8"))
        .and(body_string_contains("vfiler=\"svm1\""))
        .and(body_string_contains("<system-cli/>"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<?xml version='1.0'?><netapp><results status=\"passed\"><cli-output>done\u{8}</cli-output></results></netapp>",
        ))
        .mount(&server)
        .await;

    let results = client
        .invoke_zapi(ZapiElement::new("system-cli"), Some("svm1"))
        .await
        .unwrap();
    assert_eq!(results.child_content("cli-output"), Some("done."));
    assert!(client.last_zapi_response().unwrap().contains("done\u{8}"));
}

#[tokio::test]
async fn test_zapi_failure_carries_code_and_reason() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(ZAPI_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<netapp><results status="failed" errno="15661" reason="entry doesn't exist"/></netapp>"#,
        ))
        .mount(&server)
        .await;

    let err = client
        .invoke_zapi(ZapiElement::new("qos-policy-group-delete"), None)
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "ZAPI error calling qos-policy-group-delete: code 15661 - entry doesn't exist"
    );
}

#[tokio::test]
async fn test_zapi_version_negotiation() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path(ZAPI_PATH))
        .and(body_string_contains("system-get-ontapi-version"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<netapp><results status=\"passed\"><major-version>1</major-version>\
             <minor-version>170</minor-version></results></netapp>",
        ))
        .mount(&server)
        .await;

    assert_eq!(client.zapi_version(), (1, 110));
    assert_eq!(client.negotiate_zapi_version().await, (1, 170));
    assert_eq!(client.zapi_version(), (1, 170));
}
