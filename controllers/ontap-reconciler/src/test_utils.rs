//! Test utilities for unit testing the kernel and the module adapters
//!
//! Helpers to build sessions on top of `MockOntapClient`, script common
//! cluster answers and run a module end to end.

#[cfg(test)]
use std::collections::BTreeSet;
#[cfg(test)]
use std::sync::Arc;

#[cfg(test)]
use crate::controller;
#[cfg(test)]
use crate::emitter::{Emitter, Outcome};
#[cfg(test)]
use crate::kernel::session::{Session, SessionOptions};
#[cfg(test)]
use ontap_client::{ClusterVersion, Dialect, JobOptions, Method, MockOntapClient, OntapVersion};
#[cfg(test)]
use serde_json::{Map, Value, json};

/// Connection options every test module invocation carries
#[cfg(test)]
pub fn host_params(extra: Value) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("hostname".to_string(), json!("cluster1.example.com"));
    params.insert("username".to_string(), json!("admin"));
    params.insert("password".to_string(), json!("netapp1!"));
    if let Value::Object(extra) = extra {
        params.extend(extra);
    }
    params
}

/// Session over a mock transport with a known cluster version
#[cfg(test)]
pub fn test_session(mock: &MockOntapClient, dialect: Dialect, version: (u32, u32, u32), check_mode: bool) -> Session {
    let (generation, major, minor) = version;
    Session::new(
        Arc::new(mock.clone()),
        dialect,
        ClusterVersion::known(OntapVersion::new(generation, major, minor)),
        SessionOptions {
            check_mode,
            job_options: JobOptions::default(),
            strict_json: true,
            ..SessionOptions::default()
        },
        Emitter::new(BTreeSet::new(), true),
    )
}

/// Script the REST probe (`GET cluster`) answering `9.<major>.<minor>`
#[cfg(test)]
pub fn expect_cluster_version(mock: &MockOntapClient, major: u32, minor: u32) {
    mock.expect_rest(
        Method::Get,
        "cluster",
        200,
        json!({"version": {"generation": 9, "major": major, "minor": minor, "full": format!("NetApp Release 9.{major}.{minor}")}}),
    );
}

/// Script `system-get-version` answering `9.<major>.<minor>`
#[cfg(test)]
pub fn expect_zapi_version(mock: &MockOntapClient, major: u32, minor: u32) {
    mock.expect_zapi(
        "system-get-version",
        &format!(
            "<results status=\"passed\"><version>NetApp Release 9.{major}.{minor}</version>\
             <version-tuple><system-version-tuple><generation>9</generation><major>{major}</major>\
             <minor>{minor}</minor></system-version-tuple></version-tuple></results>"
        ),
    );
}

/// REST collection body
#[cfg(test)]
pub fn records(items: Vec<Value>) -> Value {
    json!({"num_records": items.len(), "records": items})
}

/// Empty REST collection body
#[cfg(test)]
pub fn no_records() -> Value {
    records(Vec::new())
}

/// `202 Accepted` body pointing at job `uuid`
#[cfg(test)]
pub fn job_accepted(uuid: &str) -> Value {
    json!({"job": {"uuid": uuid, "_links": {"self": {"href": format!("/api/cluster/jobs/{uuid}")}}}})
}

/// Script a 202 on `method api` followed by a successful job
#[cfg(test)]
pub fn expect_async_success(mock: &MockOntapClient, method: Method, api: &str, uuid: &str) {
    mock.expect_rest(method, api, 202, job_accepted(uuid));
    mock.expect_rest(
        Method::Get,
        &format!("cluster/jobs/{uuid}"),
        200,
        json!({"uuid": uuid, "state": "success", "message": "success"}),
    );
}

/// `*-get-iter` results with the given records
#[cfg(test)]
pub fn zapi_records(count: usize, records_xml: &str) -> String {
    format!(
        "<results status=\"passed\"><num-records>{count}</num-records><attributes-list>{records_xml}</attributes-list></results>"
    )
}

/// `*-get-iter` results without records
#[cfg(test)]
pub fn zapi_no_records() -> String {
    "<results status=\"passed\"><num-records>0</num-records></results>".to_string()
}

/// Plain successful ZAPI results
#[cfg(test)]
pub fn zapi_passed() -> &'static str {
    "<results status=\"passed\"/>"
}

/// Run a module end to end against the mock
#[cfg(test)]
pub async fn run_module(mock: &MockOntapClient, module: &str, params: Value, check_mode: bool) -> Outcome {
    controller::run_with_transport(module, host_params(params), check_mode, Arc::new(mock.clone())).await
}
