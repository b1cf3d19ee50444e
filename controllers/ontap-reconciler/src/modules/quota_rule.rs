//! Quota rules
//!
//! A rule is keyed by volume, qtree, target and type. Limit changes only
//! take effect once quotas are resized (or reinitialized) on the volume;
//! `activate_quota_on_change` picks which after every create, modify and
//! delete. `set_quota_status` turns quotas on or off for the whole volume.

use async_trait::async_trait;
use ontap_client::{Dialect, OntapError, OntapVersion, UnitTable, ZapiElement};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_uuid, zapi_get_one,
    zapi_iter_request,
};
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, to_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "quota rule";
const API: &str = "storage/quota/rules";
const VOLUMES_API: &str = "storage/volumes";

/// Cluster message when quotas are switched on for a volume without rules.
/// Matched as a substring; the cluster offers no dedicated error code.
// TODO: match on the error code once one is confirmed for both dialects
pub const NO_VALID_QUOTA_RULES: &str = "No valid quota rules found";

const KB_LIMIT: OptionKind = OptionKind::Size {
    table: UnitTable::Binary,
    implicit: "kb",
};

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("volume", OptionKind::Str).required(),
        OptionSpec::new("quota_target", OptionKind::Str).required(),
        OptionSpec::new("qtree", OptionKind::Str).default(""),
        OptionSpec::new("type", OptionKind::Choice(&["user", "group", "tree"])).required(),
        OptionSpec::new("policy", OptionKind::Str),
        OptionSpec::new("set_quota_status", OptionKind::Bool),
        OptionSpec::new("perform_user_mapping", OptionKind::Bool),
        OptionSpec::new("file_limit", OptionKind::Int),
        OptionSpec::new("disk_limit", KB_LIMIT),
        OptionSpec::new("soft_file_limit", OptionKind::Int),
        OptionSpec::new("soft_disk_limit", KB_LIMIT),
        OptionSpec::new("threshold", KB_LIMIT),
        OptionSpec::new("activate_quota_on_change", OptionKind::Choice(&["resize", "reinitialize", "none"]))
            .default("resize"),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

pub const ANNOTATIONS: DialectAnnotations = DialectAnnotations {
    rest_unsupported: &["policy", "threshold"],
    zapi_unsupported: &[],
    rest_minimum: &[("perform_user_mapping", OntapVersion::new(9, 8, 0))],
    rest_only: false,
};

// ZAPI limits are KB strings with `-` for unlimited; see ZAPI_LIMITS
const FIELDS: &[FieldMap] = &[
    FieldMap::new("disk_limit", FieldKind::Size).rest("space.hard_limit"),
    FieldMap::new("soft_disk_limit", FieldKind::Size).rest("space.soft_limit"),
    FieldMap::new("threshold", FieldKind::Size),
    FieldMap::new("file_limit", FieldKind::Int).rest("files.hard_limit"),
    FieldMap::new("soft_file_limit", FieldKind::Int).rest("files.soft_limit"),
    FieldMap::new("perform_user_mapping", FieldKind::Bool).rest("user_mapping"),
    // volume-wide, read separately
    FieldMap::new("set_quota_status", FieldKind::Bool),
];

/// `(attribute, ZAPI tag, value in KB)`
const ZAPI_LIMITS: &[(&str, &str, bool)] = &[
    ("disk_limit", "disk-limit", true),
    ("soft_disk_limit", "soft-disk-limit", true),
    ("threshold", "threshold", true),
    ("file_limit", "file-limit", false),
    ("soft_file_limit", "soft-file-limit", false),
];

/// Attributes that require quotas to be activated again when changed
const RULE_ATTRS: &[&str] = &[
    "disk_limit",
    "soft_disk_limit",
    "threshold",
    "file_limit",
    "soft_file_limit",
    "perform_user_mapping",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Resize,
    Reinitialize,
    None,
}

pub struct QuotaRule {
    vserver: String,
    volume: String,
    target: String,
    qtree: String,
    quota_type: String,
    policy: Option<String>,
    activation: Activation,
    state: DesiredState,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let activation = match params.str("activate_quota_on_change") {
        Some("reinitialize") => Activation::Reinitialize,
        Some("none") => Activation::None,
        _ => Activation::Resize,
    };
    Ok(Box::new(QuotaRule {
        vserver: params.require_str("vserver")?.to_string(),
        volume: params.require_str("volume")?.to_string(),
        target: params.require_str("quota_target")?.to_string(),
        qtree: params.str("qtree").unwrap_or_default().to_string(),
        quota_type: params.require_str("type")?.to_string(),
        policy: params.str("policy").map(str::to_string),
        activation,
        state: DesiredState::from_params(params),
        desired: desired_from_params(params, FIELDS),
    }))
}

/// Limits of a quota entry; `-` means unlimited
fn zapi_limits_from(record: &ZapiElement, attrs: &mut Attributes) -> Result<(), OntapError> {
    for (attr, tag, in_kb) in ZAPI_LIMITS {
        let Some(value) = record.child_content(tag).filter(|value| *value != "-") else {
            continue;
        };
        let Ok(number) = value.parse::<i64>() else {
            debug!("Ignoring unparsable quota {}: {}", tag, value);
            continue;
        };
        let value = if *in_kb {
            let bytes = u64::try_from(number)
                .ok()
                .and_then(|kb| kb.checked_mul(1024))
                .ok_or_else(|| OntapError::InvalidResponse(format!("quota-entry: {tag} out of range: {value}")))?;
            AttrValue::Size(bytes)
        } else {
            AttrValue::Int(number)
        };
        attrs.insert((*attr).to_string(), value);
    }
    Ok(())
}

fn zapi_limits_into(attrs: &Attributes, request: &mut ZapiElement) {
    for (attr, tag, in_kb) in ZAPI_LIMITS {
        let value = match attrs.get(*attr) {
            Some(AttrValue::Size(bytes)) if *in_kb => (bytes / 1024).to_string(),
            Some(value) => value.to_string(),
            None => continue,
        };
        request.add_new_child(*tag, value);
    }
}

/// Swallow the "no rules" error, leaving a warning behind
fn tolerate_no_rules(session: &Session, context: &str, result: Result<(), OntapError>) -> Result<(), ReconcileError> {
    match result {
        Err(err) if err.cluster_message().is_some_and(|msg| msg.contains(NO_VALID_QUOTA_RULES)) => {
            session.warn(format!("{context}: {err}"));
            Ok(())
        }
        other => other.map_err(ReconcileError::from),
    }
}

impl QuotaRule {
    fn rest_query(&self) -> Vec<(&str, &str)> {
        let mut query = vec![
            ("svm.name", self.vserver.as_str()),
            ("volume.name", self.volume.as_str()),
            ("type", self.quota_type.as_str()),
        ];
        match self.quota_type.as_str() {
            "tree" => query.push(("qtree.name", self.target.as_str())),
            kind => {
                query.push((if kind == "user" { "users.name" } else { "group.name" }, self.target.as_str()));
                query.push(("qtree.name", self.qtree.as_str()));
            }
        }
        query
    }

    /// `(volume uuid, quotas on)`
    async fn volume_quota_rest(&self, session: &Session) -> Result<(String, bool), ReconcileError> {
        let record = session
            .rest()
            .get_one_record(
                VOLUMES_API,
                &[("name", &self.volume), ("svm.name", &self.vserver), ("fields", "uuid,quota.enabled")],
            )
            .await?
            .ok_or_else(|| {
                ReconcileError::Precondition(format!(
                    "Error: volume {} not found in vserver {}",
                    self.volume, self.vserver
                ))
            })?;
        let enabled = record.pointer("/quota/enabled").and_then(Value::as_bool).unwrap_or(false);
        let uuid = rest_uuid(&record).ok_or_else(|| {
            ReconcileError::Internal(format!("volume {} has no uuid", self.volume))
        })?;
        Ok((uuid, enabled))
    }

    async fn set_status_rest(&self, session: &Session, volume_uuid: &str, enabled: bool) -> Result<(), ReconcileError> {
        info!("Turning quotas {} on volume {}", if enabled { "on" } else { "off" }, self.volume);
        let result = session
            .rest()
            .patch_async(VOLUMES_API, Some(volume_uuid), json!({"quota": {"enabled": enabled}}), &[])
            .await
            .map(|_| ());
        tolerate_no_rules(session, &format!("quota on for volume {}", self.volume), result)
    }

    async fn quota_status_zapi(&self, session: &Session) -> Result<String, ReconcileError> {
        let request = ZapiElement::new("quota-status").with_child("volume", &self.volume);
        let results = session.zapi(request, Some(self.vserver.as_str())).await?;
        Ok(results.child_content("status").unwrap_or("unknown").to_string())
    }

    /// `quota-on`, `quota-off` or `quota-resize` on the volume
    async fn volume_call_zapi(&self, session: &Session, api: &str) -> Result<(), ReconcileError> {
        info!("{} on volume {}", api, self.volume);
        let request = ZapiElement::new(api).with_child("volume", &self.volume);
        let result = session.zapi(request, Some(self.vserver.as_str())).await.map(|_| ());
        if api == "quota-off" {
            return result.map_err(ReconcileError::from);
        }
        tolerate_no_rules(session, &format!("{api} for volume {}", self.volume), result)
    }

    /// Make rule changes effective on a volume whose quotas are on
    async fn activate(&self, session: &Session) -> Result<(), ReconcileError> {
        if self.activation == Activation::None {
            return Ok(());
        }
        if session.is_rest() {
            // REST resizes on every rule change by itself
            if self.activation != Activation::Reinitialize {
                return Ok(());
            }
            let (uuid, enabled) = self.volume_quota_rest(session).await?;
            if enabled {
                self.set_status_rest(session, &uuid, false).await?;
                self.set_status_rest(session, &uuid, true).await?;
            }
            return Ok(());
        }
        let status = self.quota_status_zapi(session).await?;
        if status != "on" {
            debug!("Quotas on volume {} are {}, not activating", self.volume, status);
            return Ok(());
        }
        match self.activation {
            Activation::Reinitialize => {
                self.volume_call_zapi(session, "quota-off").await?;
                self.volume_call_zapi(session, "quota-on").await
            }
            _ => self.volume_call_zapi(session, "quota-resize").await,
        }
    }

    async fn get_rest(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let mut query = self.rest_query();
        query.push(("fields", "uuid,volume.uuid,space,files,user_mapping"));
        let Some(record) = session.rest().get_one_record(API, &query).await? else {
            return Ok(None);
        };
        let mut attrs = from_rest(FIELDS, &record);
        let mut parent = record.pointer("/volume/uuid").and_then(Value::as_str).map(str::to_string);
        if self.desired.contains_key("set_quota_status") {
            let (uuid, enabled) = self.volume_quota_rest(session).await?;
            attrs.insert("set_quota_status".to_string(), AttrValue::Bool(enabled));
            parent = Some(uuid);
        }
        Ok(Some(Current::new(attrs).with_key(rest_uuid(&record)).with_parent(parent)))
    }

    fn zapi_entry(&self, api: &str) -> ZapiElement {
        let mut request = ZapiElement::new(api)
            .with_child("volume", &self.volume)
            .with_child("quota-target", &self.target)
            .with_child("quota-type", &self.quota_type)
            .with_child("qtree", &self.qtree);
        if let Some(policy) = &self.policy {
            request.add_new_child("policy", policy);
        }
        request
    }

    async fn get_zapi(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let mut fields = vec![
            ("volume", self.volume.as_str()),
            ("quota-target", self.target.as_str()),
            ("quota-type", self.quota_type.as_str()),
            ("qtree", self.qtree.as_str()),
        ];
        if let Some(policy) = &self.policy {
            fields.push(("policy", policy.as_str()));
        }
        let request = zapi_iter_request("quota-list-entries-iter", "quota-entry", &fields);
        let Some(record) = zapi_get_one(session, request, Some(self.vserver.as_str())).await? else {
            return Ok(None);
        };
        let mut attrs = Attributes::new();
        zapi_limits_from(&record, &mut attrs)?;
        if let Some(mapping) = record.child_content("perform-user-mapping") {
            attrs.insert("perform_user_mapping".to_string(), AttrValue::Bool(mapping == "on"));
        }
        if self.desired.contains_key("set_quota_status") {
            let status = self.quota_status_zapi(session).await?;
            attrs.insert("set_quota_status".to_string(), AttrValue::Bool(status == "on"));
        }
        Ok(Some(Current::new(attrs)))
    }

    fn zapi_with_attrs(&self, api: &str, attrs: &Attributes) -> ZapiElement {
        let mut request = self.zapi_entry(api);
        zapi_limits_into(attrs, &mut request);
        if let Some(mapping) = attrs.get("perform_user_mapping").and_then(AttrValue::as_bool) {
            request.add_new_child("perform-user-mapping", if mapping { "on" } else { "off" });
        }
        request
    }

    async fn create_rest(&self, session: &Session) -> Result<(), ReconcileError> {
        let rule_attrs: Attributes = self
            .desired
            .iter()
            .filter(|(attr, _)| attr.as_str() != "set_quota_status")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut body = to_rest(FIELDS, &rule_attrs);
        body.insert("svm".to_string(), json!({"name": self.vserver}));
        body.insert("volume".to_string(), json!({"name": self.volume}));
        body.insert("type".to_string(), json!(self.quota_type));
        match self.quota_type.as_str() {
            "tree" => {
                body.insert("qtree".to_string(), json!({"name": self.target}));
            }
            kind => {
                let target = if kind == "user" {
                    ("users", json!([{"name": self.target}]))
                } else {
                    ("group", json!({"name": self.target}))
                };
                body.insert(target.0.to_string(), target.1);
                body.insert("qtree".to_string(), json!({"name": self.qtree}));
            }
        }
        session.rest().post_async(API, Value::Object(body), &[]).await?;
        Ok(())
    }

    async fn set_quota_status(&self, session: &Session, current: &Current, enabled: bool) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = match &current.parent {
                Some(uuid) => uuid.clone(),
                None => self.volume_quota_rest(session).await?.0,
            };
            return self.set_status_rest(session, &uuid, enabled).await;
        }
        self.volume_call_zapi(session, if enabled { "quota-on" } else { "quota-off" }).await
    }
}

#[async_trait]
impl ResourceAdapter for QuotaRule {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.target
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities::ALL.without_rename()
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    fn post_create_attrs(&self) -> &'static [&'static str] {
        &["set_quota_status"]
    }

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session).await
        } else {
            self.get_zapi(session).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        if session.is_rest() {
            self.create_rest(session).await?;
        } else {
            let request = self.zapi_with_attrs("quota-add-entry", &self.desired);
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        self.activate(session).await
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        let rule_changed = modify.keys().any(|attr| RULE_ATTRS.contains(&attr.as_str()));
        if rule_changed {
            if session.is_rest() {
                let uuid = current.require_key(KIND)?;
                session
                    .rest()
                    .patch_async(API, Some(uuid), Value::Object(to_rest(FIELDS, modify)), &[])
                    .await?;
            } else {
                let request = self.zapi_with_attrs("quota-modify-entry", modify);
                session.zapi(request, Some(self.vserver.as_str())).await?;
            }
        }
        match modify.get("set_quota_status").and_then(AttrValue::as_bool) {
            Some(enabled) => self.set_quota_status(session, current, enabled).await?,
            None if rule_changed => self.activate(session).await?,
            None => {}
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().delete_async(API, Some(uuid), None, &[]).await?;
        } else {
            session
                .zapi(self.zapi_entry("quota-delete-entry"), Some(self.vserver.as_str()))
                .await?;
        }
        self.activate(session).await
    }
}
