//! Host options shared by every module
//!
//! Connection settings, dialect policy, error policy and feature flags.
//! Everything here lives for one reconciliation only.

use std::time::Duration;

use ontap_client::{ConnectionConfig, ContinueOnError, Credentials, JobOptions, OntapVersion, UseRest};
use serde_json::Value;

use crate::error::ReconcileError;
use crate::model::AttrValue;
use crate::params::{OptionKind, OptionSpec, Params};

const CONTINUE_ON_ERROR_KIND: OptionKind = OptionKind::Choice(&ContinueOnError::CHOICES);

/// Options accepted by every module
pub const HOST_OPTIONS: &[OptionSpec] = &[
    OptionSpec::new("hostname", OptionKind::Str).required(),
    OptionSpec::new("username", OptionKind::Str),
    OptionSpec::new("password", OptionKind::Str).no_log(),
    OptionSpec::new("https", OptionKind::Bool).default("false"),
    OptionSpec::new("validate_certs", OptionKind::Bool).default("true"),
    OptionSpec::new("http_port", OptionKind::Int),
    OptionSpec::new("cert_filepath", OptionKind::Str),
    OptionSpec::new("key_filepath", OptionKind::Str),
    OptionSpec::new("use_rest", OptionKind::Choice(&["never", "auto", "always"])).default("auto"),
    OptionSpec::new("feature_flags", OptionKind::Raw),
    OptionSpec::new("force_ontap_version", OptionKind::Str),
    OptionSpec::new("continue_on_error", OptionKind::List(&CONTINUE_ON_ERROR_KIND)).default("never"),
    OptionSpec::new("http_timeout", OptionKind::Int).default("60"),
    OptionSpec::new("job_poll_interval", OptionKind::Int).default("10"),
    OptionSpec::new("job_timeout", OptionKind::Int).default("600"),
];

/// Per-reconciliation toggles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Log every request and response at info level
    pub trace_apis: bool,
    pub sanitize_xml: bool,
    pub sanitize_code_points: Vec<u8>,
    /// Fail on REST responses that are not JSON objects
    pub strict_json_check: bool,
    /// Include `modify` in the outcome
    pub show_modified: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            trace_apis: false,
            sanitize_xml: true,
            sanitize_code_points: vec![7, 8],
            strict_json_check: true,
            show_modified: true,
        }
    }
}

impl FeatureFlags {
    fn from_value(value: Option<&AttrValue>) -> Result<Self, ReconcileError> {
        let mut flags = FeatureFlags::default();
        let Some(value) = value else {
            return Ok(flags);
        };
        let dict = value
            .as_dict()
            .ok_or_else(|| ReconcileError::Validation("feature_flags must be a dictionary".to_string()))?;
        for (name, value) in dict {
            let as_bool = || {
                value.as_bool().ok_or_else(|| {
                    ReconcileError::Validation(format!("feature_flags.{name} must be a boolean, got: {value}"))
                })
            };
            match name.as_str() {
                "trace_apis" => flags.trace_apis = as_bool()?,
                "sanitize_xml" => flags.sanitize_xml = as_bool()?,
                "strict_json_check" => flags.strict_json_check = as_bool()?,
                "show_modified" => flags.show_modified = as_bool()?,
                "sanitize_code_points" => {
                    flags.sanitize_code_points = value
                        .as_items()
                        .unwrap_or_default()
                        .iter()
                        .map(|item| item.as_int().and_then(|i| u8::try_from(i).ok()))
                        .collect::<Option<Vec<u8>>>()
                        .ok_or_else(|| {
                            ReconcileError::Validation(format!(
                                "feature_flags.sanitize_code_points must be a list of byte values, got: {value}"
                            ))
                        })?;
                }
                other => {
                    return Err(ReconcileError::Validation(format!("Unknown feature flag: {other}")));
                }
            }
        }
        Ok(flags)
    }

    /// Bytes replaced before ZAPI parsing; empty when sanitizing is off
    pub fn effective_code_points(&self) -> Vec<u8> {
        if self.sanitize_xml {
            self.sanitize_code_points.clone()
        } else {
            Vec::new()
        }
    }
}

/// Host options after validation
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub connection: ConnectionConfig,
    pub use_rest: UseRest,
    pub force_ontap_version: Option<OntapVersion>,
    pub continue_on_error: ContinueOnError,
    pub job_options: JobOptions,
    pub features: FeatureFlags,
}

fn seconds(params: &Params, name: &str) -> Result<Duration, ReconcileError> {
    let value = params.int(name).unwrap_or_default();
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| ReconcileError::Validation(format!("{name} must be a positive number of seconds, got: {value}")))
}

impl HostOptions {
    pub fn from_params(params: &Params) -> Result<Self, ReconcileError> {
        let credentials = Credentials::from_options(
            params.str("username"),
            params.str("password"),
            params.str("cert_filepath"),
            params.str("key_filepath"),
        )
        .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let features = FeatureFlags::from_value(params.get("feature_flags"))?;

        let mut connection = ConnectionConfig::new(params.require_str("hostname")?, credentials);
        connection.https = params.flag("https");
        connection.validate_certs = params.bool("validate_certs").unwrap_or(true);
        connection.http_port = match params.int("http_port") {
            Some(port) => Some(
                u16::try_from(port)
                    .map_err(|_| ReconcileError::Validation(format!("http_port out of range: {port}")))?,
            ),
            None => None,
        };
        connection.timeout = seconds(params, "http_timeout")?;
        connection.sanitize_code_points = features.effective_code_points();
        connection.trace_apis = features.trace_apis;

        let use_rest = params
            .str("use_rest")
            .unwrap_or("auto")
            .parse::<UseRest>()
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let force_ontap_version = params
            .str("force_ontap_version")
            .map(OntapVersion::parse_forced)
            .transpose()
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let continue_on_error = ContinueOnError::parse(&params.str_list("continue_on_error").unwrap_or_default())
            .map_err(|e| ReconcileError::Validation(e.to_string()))?;

        let job_options = JobOptions {
            poll_interval: seconds(params, "job_poll_interval")?,
            timeout: seconds(params, "job_timeout")?,
            ..JobOptions::default()
        };

        Ok(Self {
            connection,
            use_rest,
            force_ontap_version,
            continue_on_error,
            job_options,
            features,
        })
    }
}

/// Fill host options the parameter file omits from the environment
pub fn merge_env_defaults(params: &mut serde_json::Map<String, Value>, env: &[(&str, Option<String>)]) {
    for (name, value) in env {
        if let Some(value) = value {
            params
                .entry((*name).to_string())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ModuleSchema;
    use serde_json::json;

    const EMPTY: ModuleSchema = ModuleSchema {
        options: &[],
        mutually_exclusive: &[],
        required_together: &[],
        required_if: &[],
    };

    fn host(value: Value) -> Result<HostOptions, ReconcileError> {
        let Value::Object(map) = value else { unreachable!() };
        HostOptions::from_params(&EMPTY.validate(&map)?)
    }

    #[test]
    fn test_defaults() {
        let options = host(json!({"hostname": "10.0.0.1", "username": "admin", "password": "pw"})).unwrap();
        assert_eq!(options.use_rest, UseRest::Auto);
        assert!(options.continue_on_error.is_never());
        assert_eq!(options.job_options.poll_interval, Duration::from_secs(10));
        assert_eq!(options.job_options.timeout, Duration::from_secs(600));
        assert_eq!(options.connection.timeout, Duration::from_secs(60));
        assert_eq!(options.connection.sanitize_code_points, vec![7, 8]);
        assert!(options.connection.validate_certs);
        assert_eq!(options.features, FeatureFlags::default());
    }

    #[test]
    fn test_credentials_mix_rejected() {
        let err = host(json!({"hostname": "h", "username": "admin", "password": "pw", "cert_filepath": "/c.pem"}))
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Validation(_)));
        assert!(err.to_string().contains("cannot mix"));
    }

    #[test]
    fn test_feature_flags() {
        let options = host(json!({
            "hostname": "h", "username": "a", "password": "p",
            "feature_flags": {"trace_apis": true, "sanitize_xml": false}
        }))
        .unwrap();
        assert!(options.connection.trace_apis);
        assert!(options.connection.sanitize_code_points.is_empty());

        let err = host(json!({
            "hostname": "h", "username": "a", "password": "p",
            "feature_flags": {"no_such_flag": true}
        }))
        .unwrap_err();
        assert_eq!(err.to_string(), "Unknown feature flag: no_such_flag");
    }

    #[test]
    fn test_continue_on_error_exclusive_keywords() {
        let err = host(json!({
            "hostname": "h", "username": "a", "password": "p",
            "continue_on_error": ["never", "rpc_error"]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("'never' cannot be combined"));

        let options = host(json!({
            "hostname": "h", "username": "a", "password": "p",
            "continue_on_error": ["missing_vserver_api_error", "rpc_error"]
        }))
        .unwrap();
        assert!(!options.continue_on_error.is_never());
    }

    #[test]
    fn test_forced_version_must_parse() {
        let options = host(json!({"hostname": "h", "username": "a", "password": "p", "force_ontap_version": "9.10"}))
            .unwrap();
        assert_eq!(options.force_ontap_version, Some(OntapVersion::new(9, 10, 0)));
        assert!(host(json!({"hostname": "h", "username": "a", "password": "p", "force_ontap_version": "9"})).is_err());
    }

    #[test]
    fn test_env_defaults_do_not_override() {
        let mut params = serde_json::Map::new();
        params.insert("hostname".to_string(), json!("from-file"));
        merge_env_defaults(
            &mut params,
            &[
                ("hostname", Some("from-env".to_string())),
                ("username", Some("admin".to_string())),
                ("password", None),
            ],
        );
        assert_eq!(params["hostname"], json!("from-file"));
        assert_eq!(params["username"], json!("admin"));
        assert!(!params.contains_key("password"));
    }
}
