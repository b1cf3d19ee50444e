//! Unit tests for the service processor network adapter

#[cfg(test)]
mod tests {
    use ontap_client::{Method, MockOntapClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::test_utils::*;

    fn rest_node(enabled: bool, dhcp: bool) -> serde_json::Value {
        json!({
            "uuid": "n1",
            "name": "node1",
            "service_processor": {
                "dhcp_enabled": dhcp,
                "ipv4_interface": {
                    "enabled": enabled,
                    "address": "10.10.10.10",
                    "netmask": "255.255.255.0",
                    "gateway": "10.10.10.1"
                }
            }
        })
    }

    #[tokio::test]
    async fn test_disable_sends_only_enabled_flag() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "cluster/nodes", 200, records(vec![rest_node(true, false)]));
        mock.expect_rest(Method::Patch, "cluster/nodes/n1", 200, json!({}));

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "is_enabled": false, "ip_address": "10.10.10.11"}),
            false,
        )
        .await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        let patches = mock.rest_calls_with(Method::Patch);
        assert_eq!(patches.len(), 1);
        assert_eq!(
            patches[0].body,
            Some(json!({"service_processor": {"ipv4_interface": {"enabled": false}}}))
        );
        assert_eq!(mock.remaining(), 0);
    }

    #[tokio::test]
    async fn test_dhcp_ignores_static_address() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "cluster/nodes", 200, records(vec![rest_node(true, true)]));

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "is_enabled": true, "dhcp": "v4",
                   "ip_address": "10.10.10.99"}),
            false,
        )
        .await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_static_address_change() {
        let mock = MockOntapClient::default();
        expect_cluster_version(&mock, 10, 1);
        mock.expect_rest(Method::Get, "cluster/nodes", 200, records(vec![rest_node(true, false)]));
        mock.expect_rest(Method::Patch, "cluster/nodes/n1", 200, json!({}));

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "is_enabled": true, "dhcp": "none",
                   "ip_address": "10.10.10.11", "netmask": "255.255.255.0"}),
            false,
        )
        .await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(
            mock.rest_calls_with(Method::Patch)[0].body,
            Some(json!({"service_processor": {"ipv4_interface": {"address": "10.10.10.11"}}}))
        );
    }

    #[tokio::test]
    async fn test_prefix_length_rejected_for_ipv4() {
        let mock = MockOntapClient::default();

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "prefix_length": 64}),
            false,
        )
        .await;

        assert!(outcome.failed);
        assert_eq!(
            outcome.msg.as_deref(),
            Some("Error: prefix_length is not supported with address_type ipv4")
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_modify_over_zapi_always_sends_is_enabled() {
        let mock = MockOntapClient::default();
        expect_zapi_version(&mock, 9, 8);
        mock.expect_zapi(
            "service-processor-network-get-iter",
            &zapi_records(
                1,
                "<service-processor-network-info><node>node1</node><address-type>ipv4</address-type>\
                 <is-enabled>true</is-enabled><dhcp>none</dhcp><ip-address>10.10.10.10</ip-address>\
                 <netmask>255.255.255.0</netmask><gateway-ip-address>10.10.10.1</gateway-ip-address>\
                 <setup-status>succeeded</setup-status></service-processor-network-info>",
            ),
        );
        mock.expect_zapi("service-processor-network-modify", zapi_passed());

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "gateway_ip_address": "10.10.10.254",
                   "use_rest": "never"}),
            false,
        )
        .await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(
            mock.zapi_calls()[2].to_xml(),
            "<service-processor-network-modify><node>node1</node><address-type>ipv4</address-type>\
             <is-enabled>true</is-enabled><gateway-ip-address>10.10.10.254</gateway-ip-address>\
             </service-processor-network-modify>"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_setup_over_zapi() {
        let mock = MockOntapClient::default();
        expect_zapi_version(&mock, 9, 8);
        let info = |status: &str| {
            zapi_records(
                1,
                &format!(
                    "<service-processor-network-info><node>node1</node><is-enabled>false</is-enabled>\
                     <setup-status>{status}</setup-status></service-processor-network-info>"
                ),
            )
        };
        mock.expect_zapi("service-processor-network-get-iter", &info("succeeded"));
        mock.expect_zapi("service-processor-network-modify", zapi_passed());
        mock.expect_zapi("service-processor-network-get-iter", &info("in_progress"));
        mock.expect_zapi("service-processor-network-get-iter", &info("succeeded"));

        let outcome = run_module(
            &mock,
            "service_processor_network",
            json!({"node": "node1", "address_type": "ipv4", "is_enabled": true, "wait_for_completion": true,
                   "use_rest": "never"}),
            false,
        )
        .await;

        assert!(!outcome.failed, "{:?}", outcome.msg);
        assert!(outcome.changed);
        assert_eq!(mock.remaining(), 0);
    }
}
