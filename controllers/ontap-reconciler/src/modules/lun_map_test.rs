//! Unit tests for the LUN map adapter

#[cfg(test)]
mod tests {
    use ontap_client::{Method, MockOntapClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::test_utils::*;

    fn params(extra: serde_json::Value) -> serde_json::Value {
        let mut params = json!({"path": "/vol/vol1/lun1", "initiator_group_name": "ig1", "vserver": "svm1"});
        if let (Some(params), serde_json::Value::Object(extra)) = (params.as_object_mut(), extra) {
            params.extend(extra);
        }
        params
    }

    fn rest_map(lun_id: i64) -> serde_json::Value {
        json!({"logical_unit_number": lun_id, "lun": {"uuid": "lu1"}, "igroup": {"uuid": "ig-u1"}})
    }

    #[tokio::test]
    async fn test_create_with_lun_id() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "protocols/san/lun-maps", 200, no_records());
        mock.expect_rest(Method::Post, "protocols/san/lun-maps", 201, json!({}));

        let outcome = run_module(&mock, "lun_map", params(json!({"lun_id": 2})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(
            mock.rest_calls_with(Method::Post)[0].body,
            Some(json!({
                "svm": {"name": "svm1"},
                "lun": {"name": "/vol/vol1/lun1"},
                "igroup": {"name": "ig1"},
                "logical_unit_number": 2
            }))
        );
    }

    #[tokio::test]
    async fn test_existing_map_is_left_alone() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "protocols/san/lun-maps", 200, records(vec![rest_map(2)]));

        let outcome = run_module(&mock, "lun_map", params(json!({"lun_id": 2})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(!outcome.changed);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_lun_id_cannot_change() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "protocols/san/lun-maps", 200, records(vec![rest_map(2)]));

        let outcome = run_module(&mock, "lun_map", params(json!({"lun_id": 3})), false).await;

        assert!(outcome.failed);
        assert_eq!(
            outcome.msg.as_deref(),
            Some("Error: lun_id is not modifiable. Cannot change to: 3.")
        );
    }

    #[tokio::test]
    async fn test_delete_uses_both_uuids() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "protocols/san/lun-maps", 200, records(vec![rest_map(0)]));
        mock.expect_rest(Method::Delete, "protocols/san/lun-maps/lu1/ig-u1", 200, json!({}));

        let outcome = run_module(&mock, "lun_map", params(json!({"state": "absent"})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_map_over_zapi() {
        let mock = MockOntapClient::default();
        expect_zapi_version(&mock, 9, 8);
        mock.expect_zapi(
            "lun-map-list-info",
            "<results status=\"passed\"><initiator-groups><initiator-group-info>\
             <initiator-group-name>other</initiator-group-name><lun-id>0</lun-id>\
             </initiator-group-info></initiator-groups></results>",
        );
        mock.expect_zapi("lun-map", zapi_passed());

        let outcome = run_module(&mock, "lun_map", params(json!({"use_rest": "never"})), false).await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(
            mock.zapi_calls()[2].to_xml(),
            "<lun-map><path>/vol/vol1/lun1</path><initiator-group>ig1</initiator-group></lun-map>"
        );
    }

    #[tokio::test]
    async fn test_unmap_over_zapi() {
        let mock = MockOntapClient::default();
        expect_zapi_version(&mock, 9, 8);
        mock.expect_zapi(
            "lun-map-list-info",
            "<results status=\"passed\"><initiator-groups><initiator-group-info>\
             <initiator-group-name>ig1</initiator-group-name><lun-id>0</lun-id>\
             </initiator-group-info></initiator-groups></results>",
        );
        mock.expect_zapi("lun-unmap", zapi_passed());

        let outcome = run_module(&mock, "lun_map", params(json!({"use_rest": "never", "state": "absent"})), false).await;

        assert!(outcome.changed);
        assert_eq!(mock.call_labels(), vec!["ZAPI system-get-version", "ZAPI lun-map-list-info", "ZAPI lun-unmap"]);
    }
}
