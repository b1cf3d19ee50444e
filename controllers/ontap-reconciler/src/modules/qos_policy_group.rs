//! QoS policy groups
//!
//! Fixed throughput ceilings and floors for an SVM's workloads. Throughput is
//! written as `<n>iops`, `<n>MB/s` or both comma-joined; `INF` (ceiling) and
//! `0` (floor) mean no limit. Both sides are compared in the canonical form
//! `<iops>iops,<mbps>MB/s` where 0 stands for an unset component.

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::{Map, Value, json};

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, rest_uuid, zapi_get_one, zapi_iter_request,
};
use crate::error::ReconcileError;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_zapi};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "QoS policy group";
const API: &str = "storage/qos/policies";

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("from_name", OptionKind::Str),
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("max_throughput", OptionKind::Str),
        OptionSpec::new("min_throughput", OptionKind::Str),
        OptionSpec::new("is_shared", OptionKind::Bool),
        OptionSpec::new("force", OptionKind::Bool).default("false"),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

const FIELDS: &[FieldMap] = &[
    // REST splits throughput into iops and mbps fields, see `Throughput`
    FieldMap::new("max_throughput", FieldKind::Str).zapi("max-throughput"),
    FieldMap::new("min_throughput", FieldKind::Str).zapi("min-throughput"),
    FieldMap::new("is_shared", FieldKind::Bool)
        .rest("fixed.capacity_shared")
        .zapi("is-shared")
        .create_only(),
];

/// One throughput limit; 0 is an unset component
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Throughput {
    iops: u64,
    mbps: u64,
}

impl Throughput {
    fn parse(option: &str, value: &str) -> Result<Self, ReconcileError> {
        let invalid = || {
            ReconcileError::Validation(format!(
                "Error: {option} must be a combination of <n>iops and <n>MB/s, INF or 0, got: {value}"
            ))
        };
        let mut throughput = Throughput::default();
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("inf") || trimmed == "0" || trimmed.is_empty() {
            return Ok(throughput);
        }
        for part in trimmed.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let split = part.find(|c: char| !c.is_ascii_digit()).ok_or_else(invalid)?;
            let (number, unit) = part.split_at(split);
            let number: u64 = number.parse().map_err(|_| invalid())?;
            match unit.trim().to_ascii_lowercase().as_str() {
                "iops" => throughput.iops = number,
                "mb/s" | "mbps" => throughput.mbps = number,
                _ => return Err(invalid()),
            }
        }
        Ok(throughput)
    }

    fn from_rest(fixed: &Value, bound: &str) -> Self {
        let field = |unit: &str| {
            fixed
                .get(format!("{bound}_throughput_{unit}"))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Throughput {
            iops: field("iops"),
            mbps: field("mbps"),
        }
    }

    fn canonical(self) -> String {
        format!("{}iops,{}MB/s", self.iops, self.mbps)
    }

    /// ZAPI form; `unlimited` is written when no component is set
    fn zapi(self, unlimited: &str) -> String {
        let mut parts = Vec::new();
        if self.iops > 0 {
            parts.push(format!("{}iops", self.iops));
        }
        if self.mbps > 0 {
            parts.push(format!("{}MB/s", self.mbps));
        }
        if parts.is_empty() {
            unlimited.to_string()
        } else {
            parts.join(",")
        }
    }

    fn write_rest(self, fixed: &mut Map<String, Value>, bound: &str) {
        fixed.insert(format!("{bound}_throughput_iops"), json!(self.iops));
        fixed.insert(format!("{bound}_throughput_mbps"), json!(self.mbps));
    }
}

pub struct QosPolicyGroup {
    name: String,
    from_name: Option<String>,
    vserver: String,
    state: DesiredState,
    force: bool,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let mut desired = Attributes::new();
    for attr in ["max_throughput", "min_throughput"] {
        if let Some(value) = params.str(attr) {
            let throughput = Throughput::parse(attr, value)?;
            desired.insert(attr.to_string(), AttrValue::str(throughput.canonical()));
        }
    }
    if let Some(shared) = params.bool("is_shared") {
        desired.insert("is_shared".to_string(), AttrValue::Bool(shared));
    }
    Ok(Box::new(QosPolicyGroup {
        name: params.require_str("name")?.to_string(),
        from_name: params.str("from_name").map(str::to_string),
        vserver: params.require_str("vserver")?.to_string(),
        state: DesiredState::from_params(params),
        force: params.flag("force"),
        desired,
    }))
}

/// Throughput attribute back into its components
fn throughput_of(attrs: &Attributes, attr: &str) -> Result<Option<Throughput>, ReconcileError> {
    attrs
        .get(attr)
        .and_then(AttrValue::as_str)
        .map(|value| Throughput::parse(attr, value))
        .transpose()
}

impl QosPolicyGroup {
    async fn get_rest(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let record = session
            .rest()
            .get_one_record(API, &[("name", name), ("svm.name", &self.vserver), ("fields", "uuid,name,fixed")])
            .await?;
        Ok(record.map(|record| {
            let fixed = record.get("fixed").cloned().unwrap_or(Value::Null);
            let mut attrs = Attributes::new();
            for (attr, bound) in [("max_throughput", "max"), ("min_throughput", "min")] {
                attrs.insert(attr.to_string(), AttrValue::str(Throughput::from_rest(&fixed, bound).canonical()));
            }
            if let Some(shared) = fixed.get("capacity_shared").and_then(Value::as_bool) {
                attrs.insert("is_shared".to_string(), AttrValue::Bool(shared));
            }
            Current::new(attrs).with_key(rest_uuid(&record))
        }))
    }

    async fn get_zapi(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        let request = zapi_iter_request(
            "qos-policy-group-get-iter",
            "qos-policy-group-info",
            &[("policy-group", name), ("vserver", &self.vserver)],
        );
        let Some(record) = zapi_get_one(session, request, None).await? else {
            return Ok(None);
        };
        let mut attrs = from_zapi(FIELDS, &record);
        for attr in ["max_throughput", "min_throughput"] {
            if let Some(throughput) = throughput_of(&attrs, attr)? {
                attrs.insert(attr.to_string(), AttrValue::str(throughput.canonical()));
            }
        }
        Ok(Some(Current::new(attrs)))
    }

    /// `fixed` object of a REST body for the given attributes
    fn rest_fixed(attrs: &Attributes) -> Result<Map<String, Value>, ReconcileError> {
        let mut fixed = Map::new();
        if let Some(max) = throughput_of(attrs, "max_throughput")? {
            max.write_rest(&mut fixed, "max");
        }
        if let Some(min) = throughput_of(attrs, "min_throughput")? {
            min.write_rest(&mut fixed, "min");
        }
        if let Some(shared) = attrs.get("is_shared").and_then(AttrValue::as_bool) {
            fixed.insert("capacity_shared".to_string(), json!(shared));
        }
        Ok(fixed)
    }

    fn add_zapi_throughput(request: &mut ZapiElement, attrs: &Attributes) -> Result<(), ReconcileError> {
        if let Some(max) = throughput_of(attrs, "max_throughput")? {
            request.add_new_child("max-throughput", max.zapi("INF"));
        }
        if let Some(min) = throughput_of(attrs, "min_throughput")? {
            request.add_new_child("min-throughput", min.zapi("0"));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for QosPolicyGroup {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn from_name(&self) -> Option<&str> {
        self.from_name.as_deref()
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::ALL
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    async fn get_current(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session, name).await
        } else {
            self.get_zapi(session, name).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let mut body = json!({"name": self.name, "svm": {"name": self.vserver}});
            let fixed = Self::rest_fixed(&self.desired)?;
            if !fixed.is_empty() {
                body["fixed"] = Value::Object(fixed);
            }
            session.rest().post_async(API, body, &[]).await?;
            return Ok(());
        }
        let mut request = ZapiElement::new("qos-policy-group-create")
            .with_child("policy-group", &self.name)
            .with_child("vserver", &self.vserver);
        Self::add_zapi_throughput(&mut request, &self.desired)?;
        if let Some(shared) = self.desired.get("is_shared") {
            request.add_new_child("is-shared", shared.to_string());
        }
        session.zapi(request, None).await?;
        Ok(())
    }

    async fn rename(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().patch_async(API, Some(uuid), json!({"name": self.name}), &[]).await?;
        } else {
            let request = ZapiElement::new("qos-policy-group-rename")
                .with_child("policy-group-name", self.from_name.as_deref().unwrap_or_default())
                .with_child("new-name", &self.name);
            session.zapi(request, None).await?;
        }
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            let body = json!({"fixed": Self::rest_fixed(modify)?});
            session.rest().patch_async(API, Some(uuid), body, &[]).await?;
        } else {
            let mut request = ZapiElement::new("qos-policy-group-modify").with_child("policy-group", &self.name);
            Self::add_zapi_throughput(&mut request, modify)?;
            session.zapi(request, None).await?;
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().delete_async(API, Some(uuid), None, &[]).await?;
        } else {
            let request = ZapiElement::new("qos-policy-group-delete")
                .with_child("policy-group", &self.name)
                .with_child("force", self.force.to_string());
            session.zapi(request, None).await?;
        }
        Ok(())
    }
}
