//! UNIX groups
//!
//! Local UNIX groups of an SVM name service. Membership is a set of user
//! names, added to a new group right after it is created.

use async_trait::async_trait;
use ontap_client::{Dialect, ZapiElement};
use serde_json::{Value, json};
use tracing::info;

use crate::adapter::{
    Applied, Capabilities, Current, DesiredState, ResourceAdapter, desired_from_params, rest_str, zapi_get_one,
    zapi_iter_request,
};
use crate::error::ReconcileError;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap, from_rest, from_zapi};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params, STATE};

const KIND: &str = "UNIX group";
const API: &str = "name-services/unix-groups";

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        STATE,
        OptionSpec::new("name", OptionKind::Str).required(),
        OptionSpec::new("vserver", OptionKind::Str).required(),
        OptionSpec::new("id", OptionKind::Int),
        OptionSpec::new("users", OptionKind::List(&OptionKind::Str)),
        OptionSpec::new("skip_name_validation", OptionKind::Bool),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("id", FieldKind::Int).rest("id").zapi("group-id"),
    // members are nested records on both sides
    FieldMap::new("users", FieldKind::StrSet),
];

pub struct UnixGroup {
    name: String,
    vserver: String,
    state: DesiredState,
    skip_name_validation: Option<bool>,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let mut desired = desired_from_params(params, FIELDS);
    if let Some(users) = params.str_list("users") {
        desired.insert("users".to_string(), AttrValue::str_set(users));
    }
    Ok(Box::new(UnixGroup {
        name: params.require_str("name")?.to_string(),
        vserver: params.require_str("vserver")?.to_string(),
        state: DesiredState::from_params(params),
        skip_name_validation: params.bool("skip_name_validation"),
        desired,
    }))
}

/// Users in `a` and not in `b`
fn missing_from(a: Option<&AttrValue>, b: Option<&AttrValue>) -> Vec<String> {
    let have = b.map(AttrValue::as_str_items).unwrap_or_default();
    a.map(AttrValue::as_str_items)
        .unwrap_or_default()
        .into_iter()
        .filter(|user| !have.contains(user))
        .collect()
}

impl UnixGroup {
    async fn group_api(&self, session: &Session) -> Result<String, ReconcileError> {
        let svm_uuid = session.svm_uuid(&self.vserver).await?;
        Ok(format!("{API}/{svm_uuid}/{}", urlencoding::encode(&self.name)))
    }

    async fn get_rest(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let record = session
            .rest()
            .get_one_record(
                API,
                &[("name", &self.name), ("svm.name", &self.vserver), ("fields", "name,id,users.name")],
            )
            .await?;
        Ok(record.map(|record| {
            let mut attrs = from_rest(FIELDS, &record);
            let users = record
                .get("users")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .filter_map(|user| rest_str(user, "name"));
            attrs.insert("users".to_string(), AttrValue::str_set(users));
            Current::new(attrs)
        }))
    }

    async fn get_zapi(&self, session: &Session) -> Result<Option<Current>, ReconcileError> {
        let request = zapi_iter_request(
            "name-mapping-unix-group-get-iter",
            "unix-group-info",
            &[("group-name", &self.name)],
        );
        let Some(record) = zapi_get_one(session, request, Some(self.vserver.as_str())).await? else {
            return Ok(None);
        };
        let mut attrs = from_zapi(FIELDS, &record);
        let users = record
            .child("users")
            .map_or(&[][..], ZapiElement::children)
            .iter()
            .filter_map(|user| user.child_content("user-name"));
        attrs.insert("users".to_string(), AttrValue::str_set(users));
        Ok(Some(Current::new(attrs)))
    }

    async fn set_users_rest(&self, session: &Session, add: &[String], remove: &[String]) -> Result<(), ReconcileError> {
        let api = format!("{}/users", self.group_api(session).await?);
        if !add.is_empty() {
            let records: Vec<Value> = add.iter().map(|user| json!({"name": user})).collect();
            let mut body = json!({"records": records});
            if let Some(skip) = self.skip_name_validation {
                body["skip_name_validation"] = json!(skip);
            }
            session.rest().post_async(&api, body, &[]).await?;
        }
        for user in remove {
            session
                .rest()
                .delete_async(&api, Some(urlencoding::encode(user).as_ref()), None, &[])
                .await?;
        }
        Ok(())
    }

    async fn set_users_zapi(&self, session: &Session, add: &[String], remove: &[String]) -> Result<(), ReconcileError> {
        for user in add {
            let mut request = ZapiElement::new("name-mapping-unix-group-add-user")
                .with_child("group-name", &self.name)
                .with_child("user-name", user);
            if let Some(skip) = self.skip_name_validation {
                request.add_new_child("skip-name-validation", skip.to_string());
            }
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        for user in remove {
            let request = ZapiElement::new("name-mapping-unix-group-delete-user")
                .with_child("group-name", &self.name)
                .with_child("user-name", user);
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceAdapter for UnixGroup {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.name
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
        &["users"]
    }

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        if session.is_rest() {
            self.get_rest(session).await
        } else {
            self.get_zapi(session).await
        }
    }

    async fn create(&self, session: &Session) -> Result<(), ReconcileError> {
        let Some(id) = self.desired.get("id").and_then(AttrValue::as_int) else {
            return Err(ReconcileError::Precondition(format!(
                "Error: id is required to create UNIX group {}",
                self.name
            )));
        };
        if session.is_rest() {
            let mut body = json!({"svm": {"name": self.vserver}, "name": self.name, "id": id});
            if let Some(skip) = self.skip_name_validation {
                body["skip_name_validation"] = json!(skip);
            }
            session.rest().post_async(API, body, &[]).await?;
            return Ok(());
        }
        let mut request = ZapiElement::new("name-mapping-unix-group-create")
            .with_child("group-name", &self.name)
            .with_child("group-id", id.to_string());
        if let Some(skip) = self.skip_name_validation {
            request.add_new_child("skip-name-validation", skip.to_string());
        }
        session.zapi(request, Some(self.vserver.as_str())).await?;
        Ok(())
    }

    async fn modify(&self, session: &Session, current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if let Some(id) = modify.get("id").and_then(AttrValue::as_int) {
            if session.is_rest() {
                let api = self.group_api(session).await?;
                session.rest().patch_async(&api, None, json!({"id": id}), &[]).await?;
            } else {
                let request = ZapiElement::new("name-mapping-unix-group-modify")
                    .with_child("group-name", &self.name)
                    .with_child("group-id", id.to_string());
                session.zapi(request, Some(self.vserver.as_str())).await?;
            }
        }
        if modify.contains_key("users") {
            let add = missing_from(modify.get("users"), current.attrs.get("users"));
            let remove = missing_from(current.attrs.get("users"), modify.get("users"));
            info!("UNIX group {}: adding {:?}, removing {:?}", self.name, add, remove);
            if session.is_rest() {
                self.set_users_rest(session, &add, &remove).await?;
            } else {
                self.set_users_zapi(session, &add, &remove).await?;
            }
        }
        Ok(Applied::Changed)
    }

    async fn delete(&self, session: &Session, _current: &Current) -> Result<(), ReconcileError> {
        if session.is_rest() {
            let api = self.group_api(session).await?;
            session.rest().delete_async(&api, None, None, &[]).await?;
        } else {
            let request = ZapiElement::new("name-mapping-unix-group-destroy").with_child("group-name", &self.name);
            session.zapi(request, Some(self.vserver.as_str())).await?;
        }
        Ok(())
    }
}
