//! Connection settings and credentials

use std::path::PathBuf;
use std::time::Duration;

use crate::error::OntapError;
use crate::zapi::DEFAULT_SANITIZE_CODE_POINTS;

/// How the client authenticates. Selected once per client.
#[derive(Clone)]
pub enum Credentials {
    /// HTTP basic auth, sent preemptively on every request
    Basic { username: String, password: String },
    /// A single PEM file holding both the client certificate and its key
    Certificate { cert_filepath: PathBuf },
    /// Separate PEM files for the client certificate and key
    CertificateAndKey {
        cert_filepath: PathBuf,
        key_filepath: PathBuf,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"********")
                .finish(),
            Credentials::Certificate { cert_filepath } => f
                .debug_struct("Certificate")
                .field("cert_filepath", cert_filepath)
                .finish(),
            Credentials::CertificateAndKey {
                cert_filepath,
                key_filepath,
            } => f
                .debug_struct("CertificateAndKey")
                .field("cert_filepath", cert_filepath)
                .field("key_filepath", key_filepath)
                .finish(),
        }
    }
}

impl Credentials {
    /// Pick the authentication method from the host options.
    ///
    /// Exactly one of username+password, a certificate file, or a certificate
    /// plus key file must be given; any mix is rejected.
    pub fn from_options(
        username: Option<&str>,
        password: Option<&str>,
        cert_filepath: Option<&str>,
        key_filepath: Option<&str>,
    ) -> Result<Self, OntapError> {
        match (username, password, cert_filepath, key_filepath) {
            (Some(username), Some(password), None, None) => Ok(Credentials::Basic {
                username: username.to_string(),
                password: password.to_string(),
            }),
            (None, None, Some(cert), None) => Ok(Credentials::Certificate {
                cert_filepath: PathBuf::from(cert),
            }),
            (None, None, Some(cert), Some(key)) => Ok(Credentials::CertificateAndKey {
                cert_filepath: PathBuf::from(cert),
                key_filepath: PathBuf::from(key),
            }),
            (None, None, None, None) => Err(OntapError::InvalidConfig(
                "missing credentials: provide username and password, or cert_filepath (and optionally key_filepath)"
                    .to_string(),
            )),
            (Some(_), None, None, None) | (None, Some(_), None, None) => Err(OntapError::InvalidConfig(
                "username and password must be provided together".to_string(),
            )),
            (None, None, None, Some(_)) => Err(OntapError::InvalidConfig(
                "key_filepath requires cert_filepath".to_string(),
            )),
            _ => Err(OntapError::InvalidConfig(
                "cannot mix username/password authentication with certificate authentication".to_string(),
            )),
        }
    }

    /// Certificate-authenticated connections are always TLS.
    pub fn is_certificate(&self) -> bool {
        !matches!(self, Credentials::Basic { .. })
    }

    /// Load the client identity PEM (certificate and key concatenated).
    pub fn identity_pem(&self) -> Result<Option<Vec<u8>>, OntapError> {
        let read = |path: &PathBuf| {
            std::fs::read(path)
                .map_err(|e| OntapError::Certificate(format!("failed to read {}: {e}", path.display())))
        };
        match self {
            Credentials::Basic { .. } => Ok(None),
            Credentials::Certificate { cert_filepath } => read(cert_filepath).map(Some),
            Credentials::CertificateAndKey {
                cert_filepath,
                key_filepath,
            } => {
                let mut pem = read(cert_filepath)?;
                if !pem.ends_with(b"\n") {
                    pem.push(b'\n');
                }
                pem.extend(read(key_filepath)?);
                Ok(Some(pem))
            }
        }
    }
}

/// Everything needed to build an [`crate::OntapClient`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub http_port: Option<u16>,
    /// Use HTTPS for ZAPI. REST is always HTTPS.
    pub https: bool,
    pub validate_certs: bool,
    pub credentials: Credentials,
    /// Per-request timeout for synchronous calls
    pub timeout: Duration,
    /// Bytes replaced with `.` before a ZAPI response is parsed
    pub sanitize_code_points: Vec<u8>,
    /// Client identification sent with every request
    pub client_app: String,
    /// Log request and response bodies at debug level
    pub trace_apis: bool,
}

impl ConnectionConfig {
    /// Config with defaults: HTTP for ZAPI, certificate validation on, 60s timeout.
    pub fn new(hostname: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            hostname: hostname.into(),
            http_port: None,
            https: false,
            validate_certs: true,
            credentials,
            timeout: Duration::from_secs(60),
            sanitize_code_points: DEFAULT_SANITIZE_CODE_POINTS.to_vec(),
            client_app: format!("ontap-reconciler/{}", env!("CARGO_PKG_VERSION")),
            trace_apis: false,
        }
    }

    /// HTTPS is forced for certificate authentication.
    pub fn use_https_for_zapi(&self) -> bool {
        self.https || self.credentials.is_certificate()
    }

    /// `host[:port]`, bracketing IPv6 literals
    fn authority(&self) -> String {
        let host = if self.hostname.contains(':') && !self.hostname.starts_with('[') {
            format!("[{}]", self.hostname)
        } else {
            self.hostname.clone()
        };
        match self.http_port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        }
    }

    /// `https://<host>[:<port>]/api/`
    pub fn rest_base_url(&self) -> String {
        format!("https://{}/api/", self.authority())
    }

    /// ZAPI servlet URL, over HTTP or HTTPS
    pub fn zapi_url(&self) -> String {
        let scheme = if self.use_https_for_zapi() { "https" } else { "http" };
        format!("{scheme}://{}{}", self.authority(), crate::zapi::ZAPI_PATH)
    }
}
