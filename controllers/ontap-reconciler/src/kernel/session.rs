//! Per-reconciliation session
//!
//! Holds the transport, the settled dialect and version, and the mutable
//! bits of one run (outcome accumulator, parent UUID cache). Nothing here
//! outlives the reconciliation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ontap_client::{
    ClusterVersion, ContinueOnError, Dialect, JobOptions, OntapError, OntapTransport, RestApi, ZapiElement,
};
use serde_json::Value;
use tracing::debug;

use crate::emitter::Emitter;
use crate::error::ReconcileError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything an adapter needs to talk to the cluster during one run
pub struct Session {
    transport: Arc<dyn OntapTransport>,
    dialect: Dialect,
    version: ClusterVersion,
    check_mode: bool,
    job_options: JobOptions,
    strict_json: bool,
    continue_on_error: ContinueOnError,
    emitter: Mutex<Emitter>,
    svm_uuids: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.transport.host())
            .field("dialect", &self.dialect)
            .field("version", &self.version)
            .field("check_mode", &self.check_mode)
            .finish_non_exhaustive()
    }
}

/// Builder-style settings for a [`Session`]
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub check_mode: bool,
    pub job_options: JobOptions,
    pub strict_json: bool,
    pub continue_on_error: ContinueOnError,
}

impl Session {
    pub fn new(
        transport: Arc<dyn OntapTransport>,
        dialect: Dialect,
        version: ClusterVersion,
        options: SessionOptions,
        emitter: Emitter,
    ) -> Self {
        Self {
            transport,
            dialect,
            version,
            check_mode: options.check_mode,
            job_options: options.job_options,
            strict_json: options.strict_json,
            continue_on_error: options.continue_on_error,
            emitter: Mutex::new(emitter),
            svm_uuids: Mutex::new(HashMap::new()),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_rest(&self) -> bool {
        self.dialect == Dialect::Rest
    }

    pub fn version(&self) -> &ClusterVersion {
        &self.version
    }

    pub fn meets_minimum(&self, generation: u32, major: u32, minor: u32) -> bool {
        self.version.meets_minimum(generation, major, minor)
    }

    pub fn check_mode(&self) -> bool {
        self.check_mode
    }

    pub fn continue_on_error(&self) -> &ContinueOnError {
        &self.continue_on_error
    }

    /// REST helper bound to this session's transport and job settings
    pub fn rest(&self) -> RestApi<'_> {
        RestApi::new(self.transport.as_ref(), self.job_options).with_strict_json(self.strict_json)
    }

    /// REST helper for long-running jobs; never waits less than the host
    /// `job_timeout`
    pub fn rest_with_job_timeout(&self, timeout: Duration) -> RestApi<'_> {
        let job_options = JobOptions {
            timeout: timeout.max(self.job_options.timeout),
            ..self.job_options
        };
        RestApi::new(self.transport.as_ref(), job_options).with_strict_json(self.strict_json)
    }

    /// Invoke a ZAPI call, tunneled to `vserver` when given
    pub async fn zapi(&self, request: ZapiElement, vserver: Option<&str>) -> Result<ZapiElement, OntapError> {
        self.transport.invoke_zapi(request, vserver).await
    }

    /// Raw text of the last ZAPI response, for diagnostics
    pub fn last_zapi_response(&self) -> Option<String> {
        self.transport.last_zapi_response()
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        lock(&self.emitter).warn(message);
    }

    pub fn with_emitter<R>(&self, f: impl FnOnce(&mut Emitter) -> R) -> R {
        f(&mut lock(&self.emitter))
    }

    /// Hand the accumulated outcome back once the run is over
    pub fn into_emitter(self) -> Emitter {
        self.emitter.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// UUID of an SVM, read once per reconciliation
    pub async fn svm_uuid(&self, svm: &str) -> Result<String, ReconcileError> {
        if let Some(uuid) = lock(&self.svm_uuids).get(svm) {
            return Ok(uuid.clone());
        }
        let record = self
            .rest()
            .get_one_record("svm/svms", &[("name", svm), ("fields", "uuid")])
            .await?
            .ok_or_else(|| ReconcileError::Precondition(format!("Error: SVM {svm} not found")))?;
        let uuid = record
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| ReconcileError::Internal(format!("no uuid in svm record for {svm}")))?
            .to_string();
        debug!("Resolved SVM {} to {}", svm, uuid);
        lock(&self.svm_uuids).insert(svm.to_string(), uuid.clone());
        Ok(uuid)
    }
}
