//! Autosupport configuration
//!
//! Node-scoped over ZAPI, cluster-wide over REST. `state` toggles the
//! `enabled` flag; there is nothing to create or delete.

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::Value;

use crate::adapter::{Applied, Capabilities, Current, ResourceAdapter, desired_from_params};
use crate::emitter::{has_url_password, redact_url_passwords};
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi, rest_fields, to_rest, to_zapi};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "autosupport";
const API: &str = "support/autosupport";

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("node_name", OptionKind::Str).required(),
        OptionSpec::new("transport", OptionKind::Choice(&["http", "https", "smtp"])),
        OptionSpec::new("noteto", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("post_url", OptionKind::Str),
        OptionSpec::new("support", OptionKind::Bool),
        OptionSpec::new("mail_hosts", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("from_address", OptionKind::Str),
        OptionSpec::new("partner_addresses", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("to_addresses", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("proxy_url", OptionKind::Str),
        OptionSpec::new("hostname_in_subject", OptionKind::Bool),
        OptionSpec::new("nht_data_enabled", OptionKind::Bool),
        OptionSpec::new("perf_data_enabled", OptionKind::Bool),
        OptionSpec::new("reminder_enabled", OptionKind::Bool),
        OptionSpec::new("private_data_removed", OptionKind::Bool),
        OptionSpec::new("local_collection_enabled", OptionKind::Bool),
        OptionSpec::new("ondemand_enabled", OptionKind::Bool),
        OptionSpec::new("retry_count", OptionKind::Int),
        OptionSpec::new("validate_digital_certificate", OptionKind::Bool),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

pub const ANNOTATIONS: DialectAnnotations = DialectAnnotations {
    rest_unsupported: &[
        "noteto",
        "post_url",
        "hostname_in_subject",
        "nht_data_enabled",
        "perf_data_enabled",
        "reminder_enabled",
        "local_collection_enabled",
        "ondemand_enabled",
        "retry_count",
        "validate_digital_certificate",
    ],
    zapi_unsupported: &[],
    rest_minimum: &[],
    rest_only: false,
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("enabled", FieldKind::Bool).rest("enabled").zapi("is-enabled"),
    FieldMap::new("transport", FieldKind::Str).rest("transport").zapi("transport"),
    FieldMap::new("mail_hosts", FieldKind::StrSet)
        .rest("mail_hosts")
        .zapi("mail-hosts/string"),
    FieldMap::new("from_address", FieldKind::Str).rest("from").zapi("from"),
    FieldMap::new("to_addresses", FieldKind::StrSet)
        .rest("to")
        .zapi("to/mail-address"),
    FieldMap::new("partner_addresses", FieldKind::StrSet)
        .rest("partner_addresses")
        .zapi("partner-address/mail-address"),
    FieldMap::new("proxy_url", FieldKind::Str).rest("proxy_url").zapi("proxy-url"),
    FieldMap::new("support", FieldKind::Bool)
        .rest("contact_support")
        .zapi("is-support-enabled"),
    FieldMap::new("private_data_removed", FieldKind::Bool)
        .rest("is_minimal")
        .zapi("is-private-data-removed"),
    FieldMap::new("noteto", FieldKind::StrSet).zapi("noteto/mail-address"),
    FieldMap::new("post_url", FieldKind::Str).zapi("post-url"),
    FieldMap::new("hostname_in_subject", FieldKind::Bool).zapi("is-node-in-subject"),
    FieldMap::new("nht_data_enabled", FieldKind::Bool).zapi("is-nht-data-enabled"),
    FieldMap::new("perf_data_enabled", FieldKind::Bool).zapi("is-perf-data-enabled"),
    FieldMap::new("reminder_enabled", FieldKind::Bool).zapi("is-reminder-enabled"),
    FieldMap::new("local_collection_enabled", FieldKind::Bool).zapi("is-local-collection-enabled"),
    FieldMap::new("ondemand_enabled", FieldKind::Bool).zapi("is-ondemand-enabled"),
    FieldMap::new("retry_count", FieldKind::Int).zapi("retry-count"),
    FieldMap::new("validate_digital_certificate", FieldKind::Bool).zapi("validate-digital-certificate"),
];

pub struct Autosupport {
    node_name: String,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let mut desired = desired_from_params(params, FIELDS);
    desired.insert("enabled".to_string(), AttrValue::Bool(params.str("state") != Some("absent")));
    Ok(Box::new(Autosupport {
        node_name: params.require_str("node_name")?.to_string(),
        desired,
    }))
}

impl Autosupport {
    async fn get_rest(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let fields = rest_fields(FIELDS, session.version(), &[]);
        let record = session.rest().get(API, &[("fields", fields.as_str())]).await?;
        Ok(Some(Current::new(from_rest(FIELDS, &record))))
    }

    async fn get_zapi(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let request = ZapiElement::new("autosupport-config-get").with_child("node-name", &self.node_name);
        let results = session.zapi(request, None).await?;
        Ok(results
            .get_path("attributes/autosupport-config-info")
            .map(|info| Current::new(from_zapi(FIELDS, info))))
    }
}

#[async_trait]
impl ResourceAdapter for Autosupport {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.node_name
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::MODIFY_ONLY
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    fn prepare_diff(&self, session: &Session, _current: &mut Attributes, desired: &mut Attributes) {
        if desired
            .get("proxy_url")
            .and_then(AttrValue::as_str)
            .is_some_and(has_url_password)
        {
            session.warn("autosupport is not idempotent because the password value in proxy_url cannot be compared.");
        }
    }

    /// The cluster never returns the proxy password in clear
    fn attrs_equal(&self, attr: &str, current: &AttrValue, desired: &AttrValue) -> bool {
        match (attr, current.as_str(), desired.as_str()) {
            ("proxy_url", Some(current), Some(desired)) => {
                redact_url_passwords(current) == redact_url_passwords(desired)
            }
            _ => current.semantic_eq(desired),
        }
    }

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session).await
        } else {
            self.get_zapi(session).await
        }
    }

    async fn modify(&self, session: &Session, _current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if session.is_rest() {
            session
                .rest()
                .patch_async(API, None, Value::Object(to_rest(FIELDS, modify)), &[])
                .await?;
        } else {
            let mut request = ZapiElement::new("autosupport-config-modify").with_child("node-name", &self.node_name);
            to_zapi(FIELDS, modify, &mut request);
            session.zapi(request, None).await?;
        }
        Ok(Applied::Changed)
    }
}
