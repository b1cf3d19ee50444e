//! LUNs
//!
//! SVM-scoped block devices inside a volume, addressed by path
//! (`/vol/<volume>/<lun>`). `size` is given in `size_unit` units and
//! compared in bytes.

use async_trait::async_trait;
use ontap_client::{Dialect, OntapError, OntapVersion, UnitTable, ZapiElement, parse_size};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_uuid, zapi_get_one,
    zapi_iter_request,
};
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi, rest_fields, set_json_path, to_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "LUN";
const API: &str = "storage/luns";

/// Resize rejected by REST because nothing would change
const REST_SAME_SIZE: &str = "New LUN size is the same as the old LUN size";
/// Same rejection over ZAPI
const ZAPI_SAME_SIZE_CODE: &str = "9042";

const SIZE_UNITS: &[&str] = &["bytes", "b", "kb", "mb", "gb", "tb", "pb", "eb", "zb", "yb"];

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("from_name", OptionKind::Str),
        OptionSpec::new("flexvol_name", OptionKind::Str),
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("size", OptionKind::Int),
        OptionSpec::new("size_unit", OptionKind::Choice(SIZE_UNITS)).default("gb"),
        OptionSpec::new("os_type", OptionKind::Str),
        OptionSpec::new("comment", OptionKind::Str),
        OptionSpec::new("space_reserve", OptionKind::Bool),
        OptionSpec::new("space_allocation", OptionKind::Bool),
        OptionSpec::new("qos_policy_group", OptionKind::Str),
        OptionSpec::new("qos_adaptive_policy_group", OptionKind::Str),
        OptionSpec::new("force_remove", OptionKind::Bool).default("false"),
        OptionSpec::new("force_resize", OptionKind::Bool).default("false"),
    ],
    mutually_exclusive: &[&["qos_policy_group", "qos_adaptive_policy_group"]],
    required_together: &[],
    required_if: &[],
};

pub const ANNOTATIONS: DialectAnnotations = DialectAnnotations {
    rest_unsupported: &[],
    zapi_unsupported: &[],
    rest_minimum: &[("qos_adaptive_policy_group", OntapVersion::new(9, 11, 1))],
    rest_only: false,
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("size", FieldKind::Size).rest("space.size").zapi("size"),
    FieldMap::new("os_type", FieldKind::Str)
        .rest("os_type")
        .zapi("multiprotocol-type")
        .create_only(),
    FieldMap::new("comment", FieldKind::Str).rest("comment").zapi("comment"),
    FieldMap::new("space_reserve", FieldKind::Bool)
        .rest("space.guarantee.requested")
        .zapi("is-space-reservation-enabled"),
    FieldMap::new("space_allocation", FieldKind::Bool)
        .rest("space.scsi_thin_provisioning_support_enabled")
        .zapi("is-space-alloc-enabled"),
    FieldMap::new("qos_policy_group", FieldKind::Str)
        .rest("qos_policy.name")
        .zapi("qos-policy-group"),
    FieldMap::new("qos_adaptive_policy_group", FieldKind::Str)
        .rest("qos_policy.name")
        .zapi("qos-adaptive-policy-group")
        .since(OntapVersion::new(9, 11, 1)),
];

const ZAPI_CREATE_TAGS: &[(&str, &str)] = &[
    ("size", "size"),
    ("os_type", "ostype"),
    ("comment", "comment"),
    ("space_reserve", "space-reservation-enabled"),
    ("space_allocation", "space-allocation-enabled"),
    ("qos_policy_group", "qos-policy-group"),
    ("qos_adaptive_policy_group", "qos-adaptive-policy-group"),
];

pub struct Lun {
    name: String,
    from_name: Option<String>,
    flexvol_name: Option<String>,
    vserver: String,
    state: DesiredState,
    force_remove: bool,
    force_resize: bool,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let flexvol_name = params.str("flexvol_name").map(str::to_string);
    let names = [params.str("name"), params.str("from_name")];
    if flexvol_name.is_none() && names.into_iter().flatten().any(|name| !name.starts_with("/vol/")) {
        return Err(ReconcileError::Validation(
            "Error: flexvol_name is required when name or from_name is not a LUN path".to_string(),
        ));
    }

    let mut desired = desired_from_params(params, FIELDS);
    if let Some(size) = params.int("size") {
        let unit = params.str("size_unit").unwrap_or("gb");
        let bytes = parse_size("size", &format!("{size}{unit}"), UnitTable::Binary, "bytes")?;
        desired.insert("size".to_string(), AttrValue::Size(bytes));
    }

    Ok(Box::new(Lun {
        name: params.require_str("name")?.to_string(),
        from_name: params.str("from_name").map(str::to_string),
        flexvol_name,
        vserver: params.require_str("vserver")?.to_string(),
        state: DesiredState::from_params(params),
        force_remove: params.flag("force_remove"),
        force_resize: params.flag("force_resize"),
        desired,
    }))
}

fn is_same_size(err: &OntapError) -> bool {
    match err {
        OntapError::Zapi { code, .. } => code == ZAPI_SAME_SIZE_CODE,
        other => other.cluster_message().is_some_and(|message| message.contains(REST_SAME_SIZE)),
    }
}

impl Lun {
    /// Full path of a LUN name
    fn path_of(&self, name: &str) -> String {
        match &self.flexvol_name {
            Some(volume) if !name.starts_with("/vol/") => format!("/vol/{volume}/{name}"),
            _ => name.to_string(),
        }
    }

    fn path(&self) -> String {
        self.path_of(&self.name)
    }

    fn check_create_options(&self) -> Result<(), ReconcileError> {
        let missing: Vec<&str> = ["size", "os_type"]
            .into_iter()
            .filter(|attr| !self.desired.contains_key(*attr))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ReconcileError::Precondition(format!(
                "Error: creating LUN {} requires: {}",
                self.path(),
                missing.join(", ")
            )))
        }
    }

    async fn resize(&self, session: &Session, current: &Current, size: &AttrValue) -> Result<bool, ReconcileError> {
        let result = if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session
                .rest()
                .patch_async(API, Some(uuid), json!({"space": {"size": size.to_json()}}), &[])
                .await
                .map(|_| ())
        } else {
            let request = ZapiElement::new("lun-resize")
                .with_child("path", self.path())
                .with_child("size", size.to_string())
                .with_child("force", self.force_resize.to_string());
            session.zapi(request, Some(self.vserver.as_str())).await.map(|_| ())
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if is_same_size(&err) => {
                debug!("LUN {} already has size {}: {}", self.path(), size, err);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn modify_zapi(&self, session: &Session, modify: &Attributes) -> Result<(), ReconcileError> {
        let path = self.path();
        let mut requests = Vec::new();
        if let Some(comment) = modify.get("comment") {
            requests.push(
                ZapiElement::new("lun-set-comment")
                    .with_child("path", &path)
                    .with_child("comment", comment.to_string()),
            );
        }
        for (attr, tag) in [
            ("qos_policy_group", "qos-policy-group"),
            ("qos_adaptive_policy_group", "qos-adaptive-policy-group"),
        ] {
            if let Some(group) = modify.get(attr) {
                requests.push(
                    ZapiElement::new("lun-set-qos-policy-group")
                        .with_child("path", &path)
                        .with_child(tag, group.to_string()),
                );
            }
        }
        if let Some(enable) = modify.get("space_reserve") {
            requests.push(
                ZapiElement::new("lun-set-space-reservation-info")
                    .with_child("path", &path)
                    .with_child("enable", enable.to_string()),
            );
        }
        if let Some(enable) = modify.get("space_allocation") {
            requests.push(
                ZapiElement::new("lun-set-space-alloc")
                    .with_child("path", &path)
                    .with_child("enable", enable.to_string()),
            );
        }
        for request in requests {
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for Lun {
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
        let path = self.path_of(name);
        if session.is_rest() {
            let fields = rest_fields(FIELDS, session.version(), &["uuid", "name"]);
            let record = session
                .rest()
                .get_one_record(API, &[("name", &path), ("svm.name", &self.vserver), ("fields", &fields)])
                .await?;
            return Ok(record.map(|record| Current::new(from_rest(FIELDS, &record)).with_key(rest_uuid(&record))));
        }
        let request = zapi_iter_request("lun-get-iter", "lun-info", &[("path", &path), ("vserver", &self.vserver)]);
        let record = zapi_get_one(session, request, Some(self.vserver.as_str())).await?;
        Ok(record.map(|record| Current::new(from_zapi(FIELDS, &record))))
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        self.check_create_options()?;
        let path = self.path();
        if session.is_rest() {
            let mut body = to_rest(FIELDS, &self.desired);
            body.insert("name".to_string(), json!(path));
            set_json_path(&mut body, "svm.name", json!(self.vserver));
            session.rest().post_async(API, Value::Object(body), &[]).await?;
            return Ok(());
        }
        let mut request = ZapiElement::new("lun-create-by-size").with_child("path", &path);
        for (attr, tag) in ZAPI_CREATE_TAGS {
            if let Some(value) = self.desired.get(*attr) {
                request.add_new_child(*tag, value.to_string());
            }
        }
        session.zapi(request, Some(self.vserver.as_str())).await?;
        Ok(())
    }

    async fn rename(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            session.rest().patch_async(API, Some(uuid), json!({"name": self.path()}), &[]).await?;
        } else {
            let from = self.path_of(self.from_name.as_deref().unwrap_or_default());
            let request = ZapiElement::new("lun-move")
                .with_child("path", from)
                .with_child("new-path", self.path());
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        let mut others = modify.clone();
        let size = others.remove("size");
        let mut changed = false;

        if !others.is_empty() {
            if session.is_rest() {
                let uuid = current.require_key(KIND)?;
                let body = Value::Object(to_rest(FIELDS, &others));
                session.rest().patch_async(API, Some(uuid), body, &[]).await?;
            } else {
                self.modify_zapi(session, &others).await?;
            }
            changed = true;
        }
        if let Some(size) = size {
            info!("Resizing LUN {} to {} bytes", self.path(), size);
            changed |= self.resize(session, current, &size).await?;
        }
        Ok(if changed { Applied::Changed } else { Applied::Unchanged })
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let uuid = current.require_key(KIND)?;
            let query: &[(&str, &str)] = if self.force_remove {
                &[("allow_delete_while_mapped", "true")]
            } else {
                &[]
            };
            session.rest().delete_async(API, Some(uuid), None, query).await?;
        } else {
            let request = ZapiElement::new("lun-destroy")
                .with_child("path", self.path())
                .with_child("force", self.force_remove.to_string());
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        Ok(())
    }
}
