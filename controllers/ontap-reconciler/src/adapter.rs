//! Module adapter contract
//!
//! Each managed resource type implements [`ResourceAdapter`]; the kernel
//! drives it through get → diff → plan → apply. Adapters own the dialect
//! specifics, the kernel owns ordering and idempotence.

use async_trait::async_trait;
use ontap_client::zapi::{iter_records, num_records};
use ontap_client::{Dialect, ZapiElement};
use serde_json::Value;

use crate::error::ReconcileError;
use crate::kernel::plan::ChangePlan;
use crate::kernel::session::Session;
use crate::mapping::FieldMap;
use crate::model::{AttrValue, Attributes};
use crate::params::Params;

/// `state` option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Present,
    Absent,
}

impl DesiredState {
    pub fn from_params(params: &Params) -> Self {
        match params.str("state") {
            Some("absent") => DesiredState::Absent,
            _ => DesiredState::Present,
        }
    }
}

/// Operations an adapter implements for the current dialect
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub create: bool,
    pub modify: bool,
    pub delete: bool,
    pub rename: bool,
}

impl Capabilities {
    pub const ALL: Capabilities = Capabilities {
        create: true,
        modify: true,
        delete: true,
        rename: true,
    };

    /// Singletons that can only be read and modified
    pub const MODIFY_ONLY: Capabilities = Capabilities {
        create: false,
        modify: true,
        delete: false,
        rename: false,
    };

    pub const fn without_rename(self) -> Self {
        Capabilities { rename: false, ..self }
    }
}

/// Resource as read from the cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Current {
    pub attrs: Attributes,
    /// REST key of the resource (usually its uuid)
    pub key: Option<String>,
    /// Owner key (SVM uuid, node uuid, ...)
    pub parent: Option<String>,
}

impl Current {
    pub fn new(attrs: Attributes) -> Self {
        Self {
            attrs,
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: Option<String>) -> Self {
        self.key = key;
        self
    }

    pub fn with_parent(mut self, parent: Option<String>) -> Self {
        self.parent = parent;
        self
    }

    /// REST key, required by every REST mutation
    pub fn require_key(&self, kind: &str) -> Result<&str, ReconcileError> {
        self.key
            .as_deref()
            .ok_or_else(|| ReconcileError::Internal(format!("{kind} record has no uuid")))
    }

    pub fn str(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr).and_then(AttrValue::as_str)
    }
}

/// Result of a modification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// The cluster reported the change as a no-op
    Unchanged,
}

fn unsupported(kind: &str, operation: &str) -> ReconcileError {
    ReconcileError::Internal(format!("{kind} does not implement {operation}"))
}

#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// Resource kind used in messages, e.g. `aggregate`
    fn kind(&self) -> &'static str;

    /// Target name
    fn name(&self) -> &str;

    /// Name of the resource to rename from
    fn from_name(&self) -> Option<&str> {
        None
    }

    fn desired_state(&self) -> DesiredState {
        DesiredState::Present
    }

    fn capabilities(&self, dialect: Dialect) -> Capabilities;

    fn field_map(&self) -> &'static [FieldMap];

    /// Desired attributes, normalized
    fn desired(&self) -> &Attributes;

    /// Attributes applied as a follow-up modification after creation
    fn post_create_attrs(&self) -> &'static [&'static str] {
        &[]
    }

    /// Reshape both sides before diffing
    fn prepare_diff(&self, _session: &Session, _current: &mut Attributes, _desired: &mut Attributes) {}

    /// Attribute comparison; defaults to normalized equality
    fn attrs_equal(&self, _attr: &str, current: &AttrValue, desired: &AttrValue) -> bool {
        current.semantic_eq(desired)
    }

    async fn get_current(&self, session: &Session, name: &str) -> Result<Option<Current>, ReconcileError>;

    async fn create(&self, _session: &Session) -> Result<(), ReconcileError> {
        Err(unsupported(self.kind(), "create"))
    }

    async fn modify(
        &self,
        _session: &Session,
        _current: &Current,
        _modify: &Attributes,
    ) -> Result<Applied, ReconcileError> {
        Err(unsupported(self.kind(), "modify"))
    }

    async fn delete(&self, _session: &Session, _current: &Current) -> Result<(), ReconcileError> {
        Err(unsupported(self.kind(), "delete"))
    }

    /// Rename `current` (found under `from_name`) to `name`
    async fn rename(&self, _session: &Session, _current: &Current) -> Result<(), ReconcileError> {
        Err(unsupported(self.kind(), "rename"))
    }

    /// Re-read after mutation until the resource settles
    async fn wait_for_completion(&self, _session: &Session, _plan: &ChangePlan) -> Result<(), ReconcileError> {
        Ok(())
    }
}

/// Desired attributes: every mapped option the caller supplied
pub fn desired_from_params(params: &Params, maps: &[FieldMap]) -> Attributes {
    maps.iter()
        .filter(|map| params.is_supplied(map.attr))
        .filter_map(|map| params.get(map.attr).map(|v| (map.attr.to_string(), v.clone())))
        .collect()
}

/// `<api><query><tag>fields</tag></query></api>` for a `*-get-iter` call
pub fn zapi_iter_request(api: &str, info_tag: &str, fields: &[(&str, &str)]) -> ZapiElement {
    let mut info = ZapiElement::new(info_tag);
    for (name, value) in fields {
        info.path_mut(name).set_content(*value);
    }
    ZapiElement::new(api).with_element(ZapiElement::new("query").with_element(info))
}

/// Single record of a `*-get-iter` call; more than one is an error
pub async fn zapi_get_one(
    session: &Session,
    request: ZapiElement,
    vserver: Option<&str>,
) -> Result<Option<ZapiElement>, ReconcileError> {
    let api = request.name().to_string();
    let results = session.zapi(request, vserver).await?;
    match num_records(&results) {
        0 => Ok(None),
        1 => Ok(iter_records(&results).first().cloned()),
        n => Err(ReconcileError::Internal(format!(
            "{api}: expected at most one record, found {n}"
        ))),
    }
}

/// String field of a REST record at a dotted path
pub fn rest_str<'a>(record: &'a Value, path: &str) -> Option<&'a str> {
    record
        .pointer(&format!("/{}", path.replace('.', "/")))
        .and_then(Value::as_str)
}

/// `uuid` of a REST record
pub fn rest_uuid(record: &Value) -> Option<String> {
    rest_str(record, "uuid").map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zapi_iter_request() {
        let request = zapi_iter_request("lun-get-iter", "lun-info", &[("path", "/vol/v1/l1"), ("vserver", "svm1")]);
        assert_eq!(
            request.to_xml(),
            "<lun-get-iter><query><lun-info><path>/vol/v1/l1</path><vserver>svm1</vserver></lun-info></query></lun-get-iter>"
        );
    }

    #[test]
    fn test_rest_str() {
        let record = serde_json::json!({"svm": {"name": "svm1"}, "uuid": "u1"});
        assert_eq!(rest_str(&record, "svm.name"), Some("svm1"));
        assert_eq!(rest_uuid(&record), Some("u1".to_string()));
    }
}
