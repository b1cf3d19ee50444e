//! NetApp ONTAP API client
//!
//! Speaks both ONTAP dialects: the REST API (`/api/...`, JSON) on modern
//! clusters and the legacy ZAPI XML interface on older ones.
//!
//! # Example
//!
//! ```no_run
//! use ontap_client::{ConnectionConfig, Credentials, JobOptions, OntapClient, RestApi};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::from_options(Some("admin"), Some("netapp1!"), None, None)?;
//! let config = ConnectionConfig::new("cluster1.example.com", credentials);
//! let client = OntapClient::new(&config)?;
//!
//! let rest = RestApi::new(&client, JobOptions::default());
//! let aggregate = rest
//!     .get_one_record("storage/aggregates", &[("name", "aggr1"), ("fields", "uuid,state")])
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Dual dialect**: REST with automatic probing, ZAPI fallback
//! - **Jobs**: `202 Accepted` responses are polled to completion
//! - **Error classes**: REST statuses and ZAPI fault codes share one taxonomy
//! - **Sizes**: `1567gb`-style size strings in decimal or binary units

pub mod classify;
pub mod client;
pub mod config;
pub mod dialect;
pub mod error;
pub mod job;
#[path = "trait.rs"]
pub mod ontap_trait;
pub mod rest;
pub mod size;
pub mod version;
pub mod zapi;
#[cfg(feature = "test-util")]
pub mod mock;

pub use classify::{ContinueOnError, ErrorClass};
pub use client::OntapClient;
pub use config::{ConnectionConfig, Credentials};
pub use dialect::{Dialect, Probe, UseRest};
pub use error::{OntapError, SizeError};
pub use job::{JobOptions, JobRecord, JobState};
pub use ontap_trait::{Method, OntapTransport, RestRequest, RestResponse};
pub use rest::{RestApi, SvmTunnel};
pub use size::{UnitTable, format_size, parse_size};
pub use version::{ClusterVersion, OntapVersion};
pub use zapi::ZapiElement;
#[cfg(feature = "test-util")]
pub use mock::MockOntapClient;
