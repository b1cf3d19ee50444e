//! Unit tests for the software update adapter

#[cfg(test)]
mod tests {
    use ontap_client::{Method, MockOntapClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::test_utils::*;

    fn params(extra: serde_json::Value) -> serde_json::Value {
        let mut params = json!({
            "package_version": "9.10.1",
            "package_url": "http://repo.example.com/9101_q_image.tgz"
        });
        if let (Some(params), serde_json::Value::Object(extra)) = (params.as_object_mut(), extra) {
            params.extend(extra);
        }
        params
    }

    #[tokio::test]
    async fn test_refused_without_rest() {
        let mock = MockOntapClient::default();

        let outcome = run_module(&mock, "software_update", params(json!({"use_rest": "never"})), false).await;

        assert!(outcome.failed);
        assert_eq!(
            outcome.msg.as_deref(),
            Some("Error: software_update only supports REST, and use_rest is set to never.")
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_download_then_update() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 9, 1);
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"version": "9.9.1", "state": "completed"}));
        mock.expect_rest(Method::Get, "cluster/software/packages", 200, no_records());
        expect_async_success(&mock, Method::Post, "cluster/software/download", "j1");
        expect_async_success(&mock, Method::Patch, "cluster/software", "j2");
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"version": "9.10.1", "state": "completed"}));

        let outcome = run_module(&mock, "software_update", params(json!({})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        let patch = &mock.rest_calls_with(Method::Patch)[0];
        assert_eq!(patch.body, Some(json!({"version": "9.10.1"})));
        assert_eq!(patch.query_value("skip_warnings"), Some("false"));
        assert_eq!(
            mock.rest_calls_with(Method::Post)[0].body,
            Some(json!({"url": "http://repo.example.com/9101_q_image.tgz"}))
        );
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_already_on_version() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"version": "9.10.1", "state": "completed"}));
        mock.expect_rest(
            Method::Get,
            "cluster/software/packages",
            200,
            records(vec![json!({"version": "9.10.1"})]),
        );

        let outcome = run_module(&mock, "software_update", params(json!({})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_download_only_skips_update() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 9, 1);
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"version": "9.9.1", "state": "completed"}));
        mock.expect_rest(Method::Get, "cluster/software/packages", 200, no_records());
        expect_async_success(&mock, Method::Post, "cluster/software/download", "j1");

        let outcome = run_module(&mock, "software_update", params(json!({"download_only": true})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert!(mock.rest_calls_with(Method::Patch).is_empty());
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_validation_failure_reports_results() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 9, 1);
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"version": "9.9.1", "state": "completed"}));
        mock.expect_rest(
            Method::Get,
            "cluster/software/packages",
            200,
            records(vec![json!({"version": "9.10.1"})]),
        );
        mock.expect_rest_error(Method::Patch, "cluster/software", 400, "Validation failed");
        let report = json!({
            "update_check": "Manual checks",
            "status": "warning",
            "issue": {"message": "Manual validation checks need to be performed"},
            "action": {"message": "Refer to the upgrade guide"}
        });
        mock.expect_rest(Method::Get, "cluster/software", 200, json!({"validation_results": [report.clone()]}));

        let outcome = run_module(&mock, "software_update", params(json!({})), false).await;

        assert!(outcome.failed);
        assert!(
            outcome
                .msg
                .as_deref()
                .is_some_and(|msg| msg.starts_with("Error modifying software update '9.10.1'")),
            "{:?}",
            outcome.msg
        );
        assert_eq!(outcome.validation_reports, vec![report]);
    }
}
