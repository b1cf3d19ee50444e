//! Cluster software update
//!
//! REST only. Downloads the package when the cluster does not have it yet,
//! then starts the update and follows `cluster/software` until it settles.
//! A failed validation leaves its report in the outcome.

use std::time::Duration;

use async_trait::async_trait;
use ontap_client::Dialect;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::adapter::{Applied, Capabilities, Current, ResourceAdapter, rest_str};
use crate::backoff::PollBudget;
use crate::error::ReconcileError;
use crate::gate::DialectAnnotations;
use crate::kernel::plan::ChangePlan;
use crate::kernel::session::Session;
use crate::mapping::{FieldKind, FieldMap};
use crate::model::{AttrValue, Attributes};
use crate::params::{ModuleSchema, OptionKind, OptionSpec, Params};

const KIND: &str = "software update";
const API: &str = "cluster/software";
const PACKAGES_API: &str = "cluster/software/packages";
const DOWNLOAD_API: &str = "cluster/software/download";

/// Pause between two reads of the update state
const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub const SCHEMA: ModuleSchema = ModuleSchema {
    options: &[
        OptionSpec::new("package_version", OptionKind::Str).required(),
        OptionSpec::new("package_url", OptionKind::Str).required(),
        OptionSpec::new("ignore_validation_warning", OptionKind::Bool).default("false"),
        OptionSpec::new("download_only", OptionKind::Bool).default("false"),
        OptionSpec::new("timeout", OptionKind::Int).default("1800"),
    ],
    mutually_exclusive: &[],
    required_together: &[],
    required_if: &[],
};

pub const ANNOTATIONS: DialectAnnotations = DialectAnnotations {
    rest_unsupported: &[],
    zapi_unsupported: &[],
    rest_minimum: &[],
    rest_only: true,
};

const FIELDS: &[FieldMap] = &[
    FieldMap::new("version", FieldKind::Str).rest("version"),
    // listed under cluster/software/packages
    FieldMap::new("package_downloaded", FieldKind::Bool),
];

pub struct SoftwareUpdate {
    version: String,
    url: String,
    skip_warnings: bool,
    timeout: Duration,
    desired: Attributes,
}

pub fn build(params: &Params) -> Result<Box<dyn ResourceAdapter>, ReconcileError> {
    let version = params.require_str("package_version")?.to_string();
    let timeout = params.int("timeout").unwrap_or(1800);
    let timeout = u64::try_from(timeout)
        .ok()
        .filter(|seconds| *seconds > 0)
        .ok_or_else(|| ReconcileError::Validation(format!("Error: timeout must be a positive number, got {timeout}")))?;
    let mut desired = Attributes::new();
    desired.insert("package_downloaded".to_string(), AttrValue::Bool(true));
    if !params.flag("download_only") {
        desired.insert("version".to_string(), AttrValue::str(&version));
    }
    Ok(Box::new(SoftwareUpdate {
        version,
        url: params.require_str("package_url")?.to_string(),
        skip_warnings: params.flag("ignore_validation_warning"),
        timeout: Duration::from_secs(timeout),
        desired,
    }))
}

impl SoftwareUpdate {
    async fn software_state(&self, session: &Session) -> Result<Value, ReconcileError> {
        Ok(session
            .rest()
            .get(API, &[("fields", "version,state,status_details")])
            .await?)
    }

    async fn download(&self, session: &Session) -> Result<(), ReconcileError> {
        info!("Downloading software package {} from {}", self.version, self.url);
        session
            .rest_with_job_timeout(self.timeout)
            .post_async(DOWNLOAD_API, json!({"url": self.url}), &[])
            .await?;
        Ok(())
    }

    /// Keep the cluster's validation report, then pass the error on
    async fn collect_validation_reports(&self, session: &Session, err: ReconcileError) -> ReconcileError {
        match session.rest().get(API, &[("fields", "validation_results")]).await {
            Ok(record) => {
                let reports = record
                    .get("validation_results")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                debug!("{} validation report(s) for {}", reports.len(), self.version);
                session.with_emitter(|emitter| emitter.add_validation_reports(reports));
            }
            Err(read_err) => warn!("Unable to read validation results: {}", read_err),
        }
        err
    }

    async fn start_update(&self, session: &Session) -> Result<(), ReconcileError> {
        info!("Updating cluster software to {}", self.version);
        let skip = if self.skip_warnings { "true" } else { "false" };
        let result = session
            .rest_with_job_timeout(self.timeout)
            .patch_async(API, None, json!({"version": self.version}), &[("skip_warnings", skip)])
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => Err(self.collect_validation_reports(session, err.into()).await),
        }
    }
}

#[async_trait]
impl ResourceAdapter for SoftwareUpdate {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn name(&self) -> &str {
        &self.version
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

    async fn get_current(&self, session: &Session, _name: &str) -> Result<Option<Current>, ReconcileError> {
        let software = self.software_state(session).await?;
        let mut attrs = Attributes::new();
        if let Some(version) = rest_str(&software, "version") {
            attrs.insert("version".to_string(), AttrValue::str(version));
        }
        let packages = session.rest().get_records(PACKAGES_API, &[("fields", "version")]).await?;
        let downloaded = packages
            .iter()
            .any(|package| rest_str(package, "version") == Some(self.version.as_str()));
        attrs.insert("package_downloaded".to_string(), AttrValue::Bool(downloaded));
        Ok(Some(Current::new(attrs)))
    }

    async fn modify(&self, session: &Session, _current: &Current, modify: &Attributes) -> Result<Applied, ReconcileError> {
        if modify.get("package_downloaded").and_then(AttrValue::as_bool) == Some(true) {
            self.download(session).await?;
        }
        if modify.contains_key("version") {
            self.start_update(session).await?;
        }
        Ok(Applied::Changed)
    }

    async fn wait_for_completion(&self, session: &Session, plan: &ChangePlan) -> Result<(), ReconcileError> {
        if !plan.modify.contains_key("version") {
            return Ok(());
        }
        let attempts = u32::try_from(self.timeout.as_secs() / POLL_INTERVAL.as_secs()).unwrap_or(u32::MAX);
        let mut budget = PollBudget::new(attempts.max(1), POLL_INTERVAL);
        loop {
            let software = self.software_state(session).await?;
            match rest_str(&software, "state") {
                Some("completed") => return Ok(()),
                Some(state @ ("failed" | "canceled" | "pause_on_error")) => {
                    let details = software.get("status_details").cloned().unwrap_or(Value::Null);
                    return Err(ReconcileError::PostCondition(format!(
                        "Error: software update to {} ended in state {state}: {details}",
                        self.version
                    )));
                }
                state => debug!("Software update to {} is {:?}", self.version, state),
            }
            if !budget.try_consume() {
                break;
            }
            budget.pause().await;
        }
        Err(ReconcileError::PostCondition(format!(
            "Error: software update to {} did not complete after {} seconds",
            self.version,
            budget.total_seconds()
        )))
    }
}
