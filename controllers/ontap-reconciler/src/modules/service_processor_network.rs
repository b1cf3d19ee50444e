//! Service processor networks
//!
//! Per-node, per-address-family network settings of the service processor.
//! The configuration always exists; it can only be read and modified.
//! Disabling the interface or turning on DHCP takes the static address
//! settings out of the comparison.

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::{Value, json};
use tracing::debug;

use crate::adapter::{
    Applied, Capabilities, Current, ResourceAdapter, desired_from_params, rest_uuid, zapi_get_one, zapi_iter_request,
};
use crate::backoff::PollBudget;
use crate::error::ReconcileError;
use crate::kernel::plan::ChangePlan;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi, lookup, set_json_path, to_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params};

const KIND: &str = "service processor network";
const API: &str = "cluster/nodes";

/// Attributes that only matter for a statically addressed, enabled interface
const ADDRESS_ATTRS: &[&str] = &["ip_address", "netmask", "prefix_length", "gateway_ip_address"];

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        OptionSpec::new("node", OptionKind::Str).required(),
        OptionSpec::new("address_type", OptionKind::Choice(&["ipv4", "ipv6"])).required(),
        OptionSpec::new("is_enabled", OptionKind::Bool),
        OptionSpec::new("dhcp", OptionKind::Choice(&["v4", "none"])),
        OptionSpec::new("ip_address", OptionKind::Str),
        OptionSpec::new("netmask", OptionKind::Str),
        OptionSpec::new("prefix_length", OptionKind::Int),
        OptionSpec::new("gateway_ip_address", OptionKind::Str),
        OptionSpec::new("wait_for_completion", OptionKind::Bool).default("false"),
    ],
    mutually_exclusive: &[&["netmask", "prefix_length"]],
    required_together: &[],
    required_if: &[],
};

const IPV4_FIELDS: &[FieldMap] = &[
    FieldMap::new("is_enabled", FieldKind::Bool)
        .rest("service_processor.ipv4_interface.enabled")
        .zapi("is-enabled"),
    FieldMap::new("ip_address", FieldKind::Str)
        .rest("service_processor.ipv4_interface.address")
        .zapi("ip-address"),
    FieldMap::new("netmask", FieldKind::Str)
        .rest("service_processor.ipv4_interface.netmask")
        .zapi("netmask"),
    FieldMap::new("gateway_ip_address", FieldKind::Str)
        .rest("service_processor.ipv4_interface.gateway")
        .zapi("gateway-ip-address"),
    // REST has a boolean `service_processor.dhcp_enabled`
    FieldMap::new("dhcp", FieldKind::Str).zapi("dhcp"),
    FieldMap::new("setup_status", FieldKind::Str).zapi("setup-status"),
];

const IPV6_FIELDS: &[FieldMap] = &[
    FieldMap::new("is_enabled", FieldKind::Bool)
        .rest("service_processor.ipv6_interface.enabled")
        .zapi("is-enabled"),
    FieldMap::new("ip_address", FieldKind::Str)
        .rest("service_processor.ipv6_interface.address")
        .zapi("ip-address"),
    FieldMap::new("prefix_length", FieldKind::Int)
        .rest("service_processor.ipv6_interface.netmask")
        .zapi("prefix-length"),
    FieldMap::new("gateway_ip_address", FieldKind::Str)
        .rest("service_processor.ipv6_interface.gateway")
        .zapi("gateway-ip-address"),
    FieldMap::new("dhcp", FieldKind::Str).zapi("dhcp"),
    FieldMap::new("setup_status", FieldKind::Str).zapi("setup-status"),
];

pub struct ServiceProcessorNetwork {
    node: String,
    address_type: String,
    fields: &'static [FieldMap],
    wait: bool,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let address_type = params.require_str("address_type")?.to_string();
    let fields = if address_type == "ipv6" { IPV6_FIELDS } else { IPV4_FIELDS };
    let unsupported = if address_type == "ipv6" { "netmask" } else { "prefix_length" };
    if params.is_supplied(unsupported) {
        return Err(ReconcileError::Validation(format!(
            "Error: {unsupported} is not supported with address_type {address_type}"
        )));
    }
    Ok(Box::new(ServiceProcessorNetwork {
        node: params.require_str("node")?.to_string(),
        address_type,
        fields,
        wait: params.flag("wait_for_completion"),
        desired: desired_from_params(params, fields),
    }))
}

/// Drop the static address settings when they do not apply
fn without_address(attrs: &mut Attributes, dhcp_too: bool) {
    attrs.retain(|attr, _| !ADDRESS_ATTRS.contains(&attr.as_str()) && !(dhcp_too && attr == "dhcp"));
}

impl ServiceProcessorNetwork {
    async fn get_rest(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let record = session
            .rest()
            .get_one_record(API, &[("name", &self.node), ("fields", "uuid,service_processor")])
            .await?;
        Ok(record.map(|record| {
            let mut attrs = from_rest(self.fields, &record);
            if let Some(dhcp) = record.pointer("/service_processor/dhcp_enabled").and_then(Value::as_bool) {
                attrs.insert("dhcp".to_string(), AttrValue::str(if dhcp { "v4" } else { "none" }));
            }
            Current::new(attrs).with_key(rest_uuid(&record))
        }))
    }

    async fn get_zapi(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let request = zapi_iter_request(
            "service-processor-network-get-iter",
            "service-processor-network-info",
            &[("node", &self.node), ("address-type", &self.address_type)],
        );
        let record = zapi_get_one(session, request, None).await?;
        Ok(record.map(|record| Current::new(from_zapi(self.fields, &record))))
    }

    /// Desired attributes match what the cluster reports
    fn is_settled(&self, session: &Session, current: &Current) -> bool {
        let mut have = current.attrs.clone();
        let mut want = self.desired.clone();
        self.prepare_diff(session, &mut have, &mut want);
        want.iter()
            .all(|(attr, value)| have.get(attr).is_some_and(|have| have.semantic_eq(value)))
    }

    async fn modify_zapi(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<(), ReconcileError> {
        let mut request = ZapiElement::new("service-processor-network-modify")
            .with_child("node", &self.node)
            .with_child("address-type", &self.address_type);
        // is-enabled is mandatory for the modify call
        let enabled = modify
            .get("is_enabled")
            .or_else(|| current.attrs.get("is_enabled"))
            .and_then(AttrValue::as_bool)
            .unwrap_or(true);
        request.add_new_child("is-enabled", enabled.to_string());
        for (attr, value) in modify.iter().filter(|(attr, _)| attr.as_str() != "is_enabled") {
            if let Some(tag) = lookup(self.fields, attr).and_then(|map| map.zapi) {
                request.add_new_child(tag, value.to_string());
            }
        }
        session.zapi(request, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for ServiceProcessorNetwork {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.node
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::MODIFY_ONLY
    }

    fn field_map(&self) -> &'static [FieldMap] {
        self.fields
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    fn prepare_diff(&self, _session: &Session, current: &mut Attributes, desired: &mut Attributes) {
        current.remove("setup_status");
        let disabled = desired.get("is_enabled").and_then(AttrValue::as_bool) == Some(false);
        let dhcp = desired.get("dhcp").and_then(AttrValue::as_str) == Some("v4");
        if disabled || dhcp {
            without_address(current, disabled);
            without_address(desired, disabled);
        }
    }

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session).await
        } else {
            self.get_zapi(session).await
        }
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if !session.is_rest() {
            self.modify_zapi(session, current, modify).await?;
            return Ok(Applied::Changed);
        }
        let uuid = current.require_key(KIND)?;
        let mut body = to_rest(self.fields, modify);
        if let Some(dhcp) = modify.get("dhcp").and_then(AttrValue::as_str) {
            set_json_path(&mut body, "service_processor.dhcp_enabled", json!(dhcp == "v4"));
        }
        session.rest().patch_async(API, Some(uuid), Value::Object(body), &[]).await?;
        Ok(Applied::Changed)
    }

    async fn wait_for_completion(&self, session: &Session, plan: &ChangePlan) -> Result<(), ReconcileError> {
        if !self.wait || plan.modify.is_empty() {
            return Ok(());
        }
        let mut budget = PollBudget::default();
        loop {
            if let Some(current) = self.get_current(session, &self.node).await? {
                match current.str("setup_status") {
                    Some("succeeded") => return Ok(()),
                    Some("failed") => {
                        debug!("Last ZAPI response: {:?}", session.last_zapi_response());
                        return Err(ReconcileError::PostCondition(format!(
                            "Error: service processor network setup failed on node {}",
                            self.node
                        )));
                    }
                    Some(status) => debug!("Service processor setup on {} is {}", self.node, status),
                    None if self.is_settled(session, &current) => return Ok(()),
                    None => {}
                }
            }
            if !budget.try_consume() {
                break;
            }
            budget.pause().await;
        }
        Err(ReconcileError::PostCondition(format!(
            "Error: service processor network on node {} did not reach the requested settings after {} seconds",
            self.node,
            budget.total_seconds()
        )))
    }
}
