//! zoophy-portal - Job submission portal
//!
//! *Le Portail* (The Portal) - validates phylogeography job requests, parses
//! custom GLM predictor tables and drives the two-phase validate/run
//! submission against the remote analysis service.
//!
//! The core modules are transport independent. The `server` feature adds the
//! axum HTTP surface and the `cli` feature adds the command line front end.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

/// Portal configuration from defaults, TOML and environment
pub mod config;

/// Named field rules and the generic input check
pub mod validation;

/// Tab-separated predictor table parser
pub mod predictors;

/// Upload acceptance and staged file lifecycle
pub mod intake;

/// Job request assembly and aggregated field validation
pub mod job;

/// Analysis service gateway
pub mod gateway;

/// Caller-facing result shape
pub mod status;

/// Two-phase validate/run submission
pub mod submit;

/// HTTP server
#[cfg(feature = "server")]
pub mod server;

/// Command line interface
#[cfg(feature = "cli")]
pub mod cli;

pub use config::{ConfigError, PortalConfig};
pub use gateway::{AnalysisGateway, GatewayError, GatewayReply, HttpGateway};
pub use job::{assemble_job, JobRequest, JobRules, ValidationOutcome, XmlOptions};
pub use predictors::{parse_predictor_table, Predictor, PredictorFileError, PredictorMap};
pub use status::JobStatus;
pub use submit::{SubmissionOrchestrator, SubmissionOutcome};
pub use validation::{parse_accession_list, AccessionListError};

#[cfg(feature = "server")]
pub use server::{ApiError, PortalServer};
