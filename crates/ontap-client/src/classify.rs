//! Error classification
//!
//! Collapses REST status/body pairs and ZAPI fault codes into one set of
//! classes the reconciler can act on.

use std::fmt;

use crate::error::OntapError;

/// ZAPI `errno` values the classifier recognizes
pub mod zapi_codes {
    /// RPC: Couldn't make connection
    pub const RPC_ERROR: &str = "13001";
    /// Insufficient privileges for the API
    pub const API_PRIVILEGE: &str = "13003";
    /// Unable to find API
    pub const API_NOT_FOUND: &str = "13005";
    /// Invalid value for an input
    pub const INVALID_INPUT: &str = "13115";
    /// Entry doesn't exist
    pub const ENTRY_NOT_FOUND: &str = "15661";
}

/// Semantic class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transient,
    MissingVserverApi,
    MissingResource,
    Permission,
    ValueInvalid,
    Conflict,
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Transient => "transient",
            ErrorClass::MissingVserverApi => "missing-vserver-api",
            ErrorClass::MissingResource => "missing-resource",
            ErrorClass::Permission => "permission",
            ErrorClass::ValueInvalid => "value-invalid",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Fatal => "fatal",
        })
    }
}

fn classify_rest(api: &str, status: u16, message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    match status {
        404 if lower.contains("entry doesn't exist") && is_svm_scoped(api, &lower) => {
            ErrorClass::MissingVserverApi
        }
        404 => ErrorClass::MissingResource,
        401 | 403 => ErrorClass::Permission,
        400 if lower.contains("invalid value") => ErrorClass::ValueInvalid,
        409 => ErrorClass::Conflict,
        502..=504 => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// SVM-scoped endpoints either name the SVM in the path or report the
/// `svm` target in the error.
fn is_svm_scoped(api: &str, lower_message: &str) -> bool {
    api.split('/').any(|segment| segment == "svm" || segment == "svms") || lower_message.contains("target: svm")
}

fn is_zapi_rpc_fault(code: &str, reason: &str) -> bool {
    code == zapi_codes::RPC_ERROR || reason.contains("RPC: Couldn't make connection")
}

fn classify_zapi(code: &str, reason: &str) -> ErrorClass {
    let lower = reason.to_ascii_lowercase();
    if is_zapi_rpc_fault(code, reason) {
        ErrorClass::Transient
    } else if code == zapi_codes::API_NOT_FOUND && reason.contains("Unable to find API") && reason.contains("data vserver") {
        ErrorClass::MissingVserverApi
    } else if code == zapi_codes::ENTRY_NOT_FOUND || lower.contains("entry doesn't exist") || lower.contains("object not found") {
        ErrorClass::MissingResource
    } else if code == zapi_codes::API_PRIVILEGE
        || lower.contains("insufficient privileges")
        || lower.contains("does not have write access")
    {
        ErrorClass::Permission
    } else if code == zapi_codes::INVALID_INPUT || lower.contains("invalid value") {
        ErrorClass::ValueInvalid
    } else if lower.contains("duplicate entry") || lower.contains("already exists") {
        ErrorClass::Conflict
    } else {
        ErrorClass::Fatal
    }
}

impl OntapError {
    /// Semantic class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            OntapError::Connection(_) => ErrorClass::Transient,
            OntapError::Rest {
                api, status, message, ..
            } => classify_rest(api, *status, message),
            OntapError::Zapi { code, reason, .. } => classify_zapi(code, reason),
            _ => ErrorClass::Fatal,
        }
    }

    /// ZAPI `RPC: Couldn't make connection` fault
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, OntapError::Zapi { code, reason, .. } if is_zapi_rpc_fault(code, reason))
    }

    /// `true` for errors the cluster reported (as opposed to local or
    /// transport failures)
    pub fn is_cluster_error(&self) -> bool {
        matches!(self, OntapError::Rest { .. } | OntapError::Zapi { .. } | OntapError::Job(_))
    }
}

/// Error classes a caller may ask to continue past
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinueOnError {
    always: bool,
    missing_vserver_api: bool,
    rpc: bool,
    other: bool,
}

impl ContinueOnError {
    /// Accepted keywords
    pub const CHOICES: [&'static str; 5] = ["never", "always", "missing_vserver_api_error", "rpc_error", "other_error"];

    /// Parse the `continue_on_error` list.
    ///
    /// `never` and `always` must appear alone.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, OntapError> {
        let values: Vec<&str> = values.iter().map(|v| v.as_ref()).collect();
        for exclusive in ["never", "always"] {
            if values.contains(&exclusive) && values.len() > 1 {
                return Err(OntapError::InvalidConfig(format!(
                    "continue_on_error: '{exclusive}' cannot be combined with other values, got: {}",
                    values.join(", ")
                )));
            }
        }
        let mut policy = ContinueOnError::default();
        for value in values {
            match value {
                "never" => {}
                "always" => policy.always = true,
                "missing_vserver_api_error" => policy.missing_vserver_api = true,
                "rpc_error" => policy.rpc = true,
                "other_error" => policy.other = true,
                other => {
                    return Err(OntapError::InvalidConfig(format!(
                        "continue_on_error: unexpected value '{other}', expecting one of: {}",
                        Self::CHOICES.join(", ")
                    )));
                }
            }
        }
        Ok(policy)
    }

    pub fn is_never(&self) -> bool {
        *self == ContinueOnError::default()
    }

    /// Whether a failure of this kind may be turned into a warning
    pub fn should_continue(&self, err: &OntapError) -> bool {
        if self.always {
            return true;
        }
        if !err.is_cluster_error() && !matches!(err, OntapError::Connection(_)) {
            return false;
        }
        if err.is_rpc_error() {
            return self.rpc;
        }
        match err.class() {
            ErrorClass::MissingVserverApi => self.missing_vserver_api,
            _ => self.other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rest(api: &str, status: u16, message: &str) -> OntapError {
        OntapError::Rest {
            method: "GET".to_string(),
            api: api.to_string(),
            status,
            code: None,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_rest_classes() {
        assert_eq!(rest("svm/svms/u1", 404, "entry doesn't exist").class(), ErrorClass::MissingVserverApi);
        assert_eq!(
            rest("name-services/unix-groups", 404, "entry doesn't exist (target: svm.name)").class(),
            ErrorClass::MissingVserverApi
        );
        assert_eq!(rest("storage/luns/u1", 404, "entry doesn't exist").class(), ErrorClass::MissingResource);
        assert_eq!(rest("storage/luns", 401, "not authorized").class(), ErrorClass::Permission);
        assert_eq!(rest("storage/luns", 403, "forbidden").class(), ErrorClass::Permission);
        assert_eq!(rest("storage/luns", 400, "Invalid value for field size").class(), ErrorClass::ValueInvalid);
        assert_eq!(rest("storage/luns", 409, "duplicate").class(), ErrorClass::Conflict);
        assert_eq!(rest("storage/luns", 500, "boom").class(), ErrorClass::Fatal);
        assert_eq!(OntapError::Connection("refused".to_string()).class(), ErrorClass::Transient);
    }

    #[test]
    fn test_zapi_classes() {
        assert_eq!(OntapError::zapi("x", "13001", "RPC: Couldn't make connection").class(), ErrorClass::Transient);
        assert_eq!(
            OntapError::zapi("lun-get-iter", "13005", "Unable to find API: lun-get-iter on data vserver svm1").class(),
            ErrorClass::MissingVserverApi
        );
        assert_eq!(OntapError::zapi("x", "15661", "entry doesn't exist").class(), ErrorClass::MissingResource);
        assert_eq!(OntapError::zapi("x", "13003", "Insufficient privileges").class(), ErrorClass::Permission);
        assert_eq!(OntapError::zapi("x", "13115", "Invalid value specified").class(), ErrorClass::ValueInvalid);
        assert_eq!(OntapError::zapi("x", "13130", "duplicate entry").class(), ErrorClass::Conflict);
        assert_eq!(OntapError::zapi("x", "18241", "Feature license missing").class(), ErrorClass::Fatal);
        assert_eq!(OntapError::zapi("x", "1", "who knows").class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_continue_on_error_exclusivity() {
        assert!(ContinueOnError::parse(&["never"]).unwrap().is_never());
        assert!(ContinueOnError::parse(&["never", "rpc_error"]).is_err());
        assert!(ContinueOnError::parse(&["always", "other_error"]).is_err());
        assert!(ContinueOnError::parse(&["bogus"]).is_err());
        assert!(ContinueOnError::parse(&["rpc_error", "missing_vserver_api_error"]).is_ok());
    }

    #[test]
    fn test_should_continue_by_class() {
        let policy = ContinueOnError::parse(&["missing_vserver_api_error"]).unwrap();
        let missing = OntapError::zapi("lun-get-iter", "13005", "Unable to find API: lun-get-iter on data vserver svm1");
        assert!(policy.should_continue(&missing));
        assert!(!policy.should_continue(&OntapError::zapi("x", "13001", "RPC: Couldn't make connection")));
        assert!(!policy.should_continue(&OntapError::InvalidConfig("x".to_string())));

        let other = ContinueOnError::parse(&["other_error"]).unwrap();
        assert!(other.should_continue(&rest("storage/luns", 500, "boom")));
        assert!(!other.should_continue(&missing));

        let rpc = ContinueOnError::parse(&["rpc_error"]).unwrap();
        assert!(rpc.should_continue(&OntapError::zapi("x", "13001", "RPC: Couldn't make connection")));
        assert!(!rpc.should_continue(&rest("storage/luns", 503, "unavailable")));
        assert!(!rpc.should_continue(&OntapError::Connection("refused".to_string())));
        assert!(other.should_continue(&rest("storage/luns", 503, "unavailable")));

        let always = ContinueOnError::parse(&["always"]).unwrap();
        assert!(always.should_continue(&OntapError::InvalidConfig("x".to_string())));
    }
}
