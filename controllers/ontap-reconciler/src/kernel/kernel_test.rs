#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use ontap_client::{Dialect, MockOntapClient, OntapError};
    use pretty_assertions::assert_eq;

    use crate::adapter::{Applied, Capabilities, Current, DesiredState, ResourceAdapter};
    use crate::error::ReconcileError;
    use crate::kernel::reconcile;
    use crate::kernel::session::Session;
    use crate::mapping::{FieldKind, FieldMap};
    use crate::model::{AttrValue, Attributes};
    use crate::test_utils::test_session;

    const MAPS: &[FieldMap] = &[
        FieldMap::new("comment", FieldKind::Str),
        FieldMap::new("hosts", FieldKind::StrSet),
        FieldMap::new("members", FieldKind::StrSet),
        FieldMap::new("disk_count", FieldKind::Int).create_only(),
        FieldMap::new("lun_id", FieldKind::Int).immutable(),
    ];

    /// In-memory resource store standing in for the cluster
    struct FakeAdapter {
        name: String,
        from_name: Option<String>,
        state: DesiredState,
        desired: Attributes,
        capabilities: Capabilities,
        store: Mutex<BTreeMap<String, Attributes>>,
        calls: Mutex<Vec<String>>,
        modify_result: Result<Applied, String>,
        post_create: &'static [&'static str],
    }

    impl FakeAdapter {
        fn new(name: &str, desired: Attributes) -> Self {
            Self {
                name: name.to_string(),
                from_name: None,
                state: DesiredState::Present,
                desired,
                capabilities: Capabilities::ALL,
                store: Mutex::new(BTreeMap::new()),
                calls: Mutex::new(Vec::new()),
                modify_result: Ok(Applied::Changed),
                post_create: &[],
            }
        }

        fn with_existing(self, name: &str, attrs: Attributes) -> Self {
            self.store.lock().unwrap().insert(name.to_string(), attrs);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl ResourceAdapter for FakeAdapter {
        fn kind(&self) -> &'static str {
            "widget"
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
            self.capabilities
        }

        fn field_map(&self) -> &'static [FieldMap] {
            MAPS
        }

        fn desired(&self) -> &Attributes {
            &self.desired
        }

        fn post_create_attrs(&self) -> &'static [&'static str] {
            self.post_create
        }

        async fn get_current(&self, _session: &Session, name: &str) -> Result<Option<Current>, ReconcileError> {
            self.record(format!("get {name}"));
            Ok(self
                .store
                .lock()
                .unwrap()
                .get(name)
                .map(|attrs| Current::new(attrs.clone()).with_key(Some(format!("uuid-{name}")))))
        }

        async fn create(&self, _session: &Session) -> Result<(), ReconcileError> {
            self.record("create".to_string());
            let attrs: Attributes = self
                .desired
                .iter()
                .filter(|(k, _)| !self.post_create.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.store.lock().unwrap().insert(self.name.clone(), attrs);
            Ok(())
        }

        async fn modify(
            &self,
            _session: &Session,
            current: &Current,
            modify: &Attributes,
        ) -> Result<Applied, ReconcileError> {
            let keys: Vec<&str> = modify.keys().map(String::as_str).collect();
            self.record(format!("modify {} [{}]", current.key.as_deref().unwrap_or(""), keys.join(",")));
            match &self.modify_result {
                Ok(applied) => Ok(*applied),
                Err(message) => Err(OntapError::Rest {
                    method: "PATCH".to_string(),
                    api: "widgets".to_string(),
                    status: 400,
                    code: None,
                    message: message.clone(),
                }
                .into()),
            }
        }

        async fn delete(&self, _session: &Session, current: &Current) -> Result<(), ReconcileError> {
            self.record(format!("delete {}", current.key.as_deref().unwrap_or("")));
            Ok(())
        }

        async fn rename(&self, _session: &Session, current: &Current) -> Result<(), ReconcileError> {
            self.record(format!("rename {} -> {}", current.key.as_deref().unwrap_or(""), self.name));
            Ok(())
        }
    }

    fn attrs(pairs: &[(&str, AttrValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    fn session(check_mode: bool) -> Session {
        test_session(&MockOntapClient::default(), Dialect::Rest, (9, 12, 1), check_mode)
    }

    #[tokio::test]
    async fn test_create_then_idempotent() {
        let adapter = FakeAdapter::new("w1", attrs(&[("comment", AttrValue::str("hello"))]));
        let first = session(false);
        reconcile(&adapter, &first).await.unwrap();
        assert!(first.into_emitter().changed());
        assert_eq!(adapter.calls(), vec!["get w1", "create"]);

        let second = session(false);
        reconcile(&adapter, &second).await.unwrap();
        assert!(!second.into_emitter().changed());
        assert_eq!(adapter.calls(), vec!["get w1", "create", "get w1"]);
    }

    #[tokio::test]
    async fn test_absent_and_missing_is_noop() {
        let mut adapter = FakeAdapter::new("w1", Attributes::new());
        adapter.state = DesiredState::Absent;
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert!(!session.into_emitter().changed());
        assert_eq!(adapter.calls(), vec!["get w1"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let mut adapter = FakeAdapter::new("w1", Attributes::new()).with_existing("w1", Attributes::new());
        adapter.state = DesiredState::Absent;
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert!(session.into_emitter().changed());
        assert_eq!(adapter.calls(), vec!["get w1", "delete uuid-w1"]);
    }

    #[tokio::test]
    async fn test_set_order_is_not_a_change() {
        let adapter = FakeAdapter::new("w1", attrs(&[("hosts", AttrValue::str_set(["b", "a"]))]))
            .with_existing("w1", attrs(&[("hosts", AttrValue::str_set(["a", "b"]))]));
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert!(!session.into_emitter().changed());
    }

    #[tokio::test]
    async fn test_modify_records_modification_set() {
        let adapter = FakeAdapter::new(
            "w1",
            attrs(&[("comment", AttrValue::str("new")), ("disk_count", AttrValue::Int(12))]),
        )
        .with_existing(
            "w1",
            attrs(&[("comment", AttrValue::str("old")), ("disk_count", AttrValue::Int(8))]),
        );
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert_eq!(adapter.calls(), vec!["get w1", "modify uuid-w1 [comment]"]);
        let outcome = session.into_emitter().success();
        assert!(outcome.changed);
        assert_eq!(outcome.modify.unwrap()["comment"], serde_json::json!("new"));
    }

    #[tokio::test]
    async fn test_unchanged_modify_keeps_changed_false() {
        let mut adapter = FakeAdapter::new("w1", attrs(&[("comment", AttrValue::str("new"))]))
            .with_existing("w1", attrs(&[("comment", AttrValue::str("old"))]));
        adapter.modify_result = Ok(Applied::Unchanged);
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert!(!session.into_emitter().changed());
    }

    #[tokio::test]
    async fn test_immutable_attribute_refused() {
        let adapter = FakeAdapter::new("w1", attrs(&[("lun_id", AttrValue::Int(3))]))
            .with_existing("w1", attrs(&[("lun_id", AttrValue::Int(1))]));
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert_eq!(err.to_string(), "Error: lun_id is not modifiable. Cannot change to: 3.");
        assert_eq!(adapter.calls(), vec!["get w1"]);
    }

    #[tokio::test]
    async fn test_unknown_attribute_is_internal_error() {
        let adapter = FakeAdapter::new("w1", attrs(&[("bogus", AttrValue::Int(3))]))
            .with_existing("w1", Attributes::new());
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Internal(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[tokio::test]
    async fn test_check_mode_makes_no_mutation() {
        let adapter = FakeAdapter::new("w1", attrs(&[("comment", AttrValue::str("hello"))]));
        let session = session(true);
        reconcile(&adapter, &session).await.unwrap();
        assert!(session.into_emitter().changed());
        assert_eq!(adapter.calls(), vec!["get w1"]);
    }

    #[tokio::test]
    async fn test_rename_precedes_modify() {
        let mut adapter = FakeAdapter::new("new", attrs(&[("comment", AttrValue::str("c2"))]))
            .with_existing("old", attrs(&[("comment", AttrValue::str("c1"))]));
        adapter.from_name = Some("old".to_string());
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert_eq!(
            adapter.calls(),
            vec!["get new", "get old", "rename uuid-old -> new", "modify uuid-old [comment]"]
        );
        assert!(session.into_emitter().changed());
    }

    #[tokio::test]
    async fn test_rename_with_both_existing_fails() {
        let mut adapter = FakeAdapter::new("new", Attributes::new())
            .with_existing("old", Attributes::new())
            .with_existing("new", Attributes::new());
        adapter.from_name = Some("old".to_string());
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error renaming widget: both from_name 'old' and name 'new' exist"
        );
        assert_eq!(adapter.calls(), vec!["get new", "get old"]);
    }

    #[tokio::test]
    async fn test_rename_with_neither_existing_fails() {
        let mut adapter = FakeAdapter::new("new", Attributes::new());
        adapter.from_name = Some("old".to_string());
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error renaming widget 'new': no resource with from_name 'old'"
        );
    }

    #[tokio::test]
    async fn test_rename_requires_capability() {
        let mut adapter = FakeAdapter::new("new", Attributes::new()).with_existing("old", Attributes::new());
        adapter.from_name = Some("old".to_string());
        adapter.capabilities = Capabilities::ALL.without_rename();
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert_eq!(err.to_string(), "Error: renaming widget is not supported with REST");
    }

    #[tokio::test]
    async fn test_post_create_follow_up() {
        let mut adapter = FakeAdapter::new(
            "w1",
            attrs(&[
                ("comment", AttrValue::str("c")),
                ("members", AttrValue::str_set(["u1", "u2"])),
            ]),
        );
        adapter.post_create = &["members"];
        let session = session(false);
        reconcile(&adapter, &session).await.unwrap();
        assert_eq!(
            adapter.calls(),
            vec!["get w1", "create", "get w1", "modify uuid-w1 [members]"]
        );
    }

    #[tokio::test]
    async fn test_failure_is_prefixed() {
        let mut adapter = FakeAdapter::new("w1", attrs(&[("comment", AttrValue::str("new"))]))
            .with_existing("w1", attrs(&[("comment", AttrValue::str("old"))]));
        adapter.modify_result = Err("invalid value for comment".to_string());
        let err = reconcile(&adapter, &session(false)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error modifying widget 'w1': REST API error calling PATCH widgets: 400 - invalid value for comment"
        );
    }
}
