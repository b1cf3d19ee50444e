//! LUN maps
//!
//! Association of a LUN with an initiator group. A map is created or
//! removed, never modified; the LUN id is fixed at creation.

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::json;

use crate::adapter::{Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_str};
use crate::error::ReconcileError;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "LUN map";
const API: &str = "protocols/san/lun-maps";

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("path", OptionKind::Str).required(),
        OptionSpec::new("initiator_group_name", OptionKind::Str).required(),
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("lun_id", OptionKind::Int),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

const FIELDS: &[FieldMap] = &[FieldMap::new("lun_id", FieldKind::Int)
    .rest("logical_unit_number")
    .zapi("lun-id")
    .immutable()];

pub struct LunMap {
    path: String,
    igroup: String,
    vserver: String,
    state: DesiredState,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    Ok(Box::new(LunMap {
        path: params.require_str("path")?.to_string(),
        igroup: params.require_str("initiator_group_name")?.to_string(),
        vserver: params.require_str("vserver")?.to_string(),
        state: DesiredState::from_params(params),
        desired: desired_from_params(params, FIELDS),
    }))
}

impl LunMap {
    async fn get_rest(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let record = session
            .rest()
            .get_one_record(
                API,
                &[
                    ("lun.name", &self.path),
                    ("igroup.name", &self.igroup),
                    ("svm.name", &self.vserver),
                    ("fields", "logical_unit_number,lun.uuid,igroup.uuid"),
                ],
            )
            .await?;
        Ok(record.map(|record| {
            // lun-maps are keyed by both uuids
            let key = match (rest_str(&record, "lun.uuid"), rest_str(&record, "igroup.uuid")) {
                (Some(lun), Some(igroup)) => Some(format!("{lun}/{igroup}")),
                _ => None,
            };
            Current::new(from_rest(FIELDS, &record)).with_key(key)
        }))
    }

    async fn get_zapi(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let request = ZapiElement::new("lun-map-list-info").with_child("path", &self.path);
        let results = session.zapi(request, Some(self.vserver.as_str())).await?;
        let groups: &[ZapiElement] = results.child("initiator-groups").map_or(&[], ZapiElement::children);
        let found = groups
            .iter()
            .find(|group| group.child_content("initiator-group-name") == Some(self.igroup.as_str()));
        Ok(found.map(|group| {
            let mut attrs = Attributes::new();
            if let Some(id) = group.child_content("lun-id").and_then(|id| id.parse::<i64>().ok()) {
                attrs.insert("lun_id".to_string(), AttrValue::Int(id));
            }
            Current::new(attrs)
        }))
    }
}

#[async_trait]
impl ResourceAdapter for LunMap {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.path
    }

    fn desired_state(&self) -> DesiredState {
        self.state
    }

    fn capabilities(&self, _dialect: Dialect) -> Capabilities {
        Capabilities {
            create: true,
            delete: true,
            ..Capabilities::default()
        }
    }

    fn field_map(&self) -> &'static [FieldMap] {
        FIELDS
    }

    fn desired(&self) -> &Attributes {
        &self.desired
    }

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session).await
        } else {
            self.get_zapi(session).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        let lun_id = self.desired.get("lun_id").and_then(AttrValue::as_int);
        if session.is_rest() {
            let mut body = json!({
                "svm": {"name": self.vserver},
                "lun": {"name": self.path},
                "igroup": {"name": self.igroup},
            });
            if let Some(id) = lun_id {
                body["logical_unit_number"] = json!(id);
            }
            session.rest().post_async(API, body, &[]).await?;
            return Ok(());
        }
        let mut request = ZapiElement::new("lun-map")
            .with_child("path", &self.path)
            .with_child("initiator-group", &self.igroup);
        if let Some(id) = lun_id {
            request.add_new_child("lun-id", id.to_string());
        }
        session.zapi(request, Some(self.vserver.as_str())).await?;
        Ok(())
    }

    async fn delete(&self, session: &Session, current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let key = current.require_key(KIND)?;
            session.rest().delete_async(API, Some(key), None, &[]).await?;
            return Ok(());
        }
        let request = ZapiElement::new("lun-unmap")
            .with_child("path", &self.path)
            .with_child("initiator-group", &self.igroup);
        session.zapi(request, Some(self.vserver.as_str())).await?;
        Ok(())
    }
}
