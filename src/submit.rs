//! Two-phase job submission
//!
//! A validated [`JobRequest`] is first sent to the analysis service as a dry
//! run. Only when the service accepts it is the same job sent again to start
//! the run. Each submission walks `Idle -> Validating -> Running` and ends in
//! exactly one [`SubmissionOutcome`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::gateway::AnalysisGateway;
use crate::job::JobRequest;
use crate::status::{JobStatus, STATUS_ACCEPTED, STATUS_INTERNAL_ERROR, STATUS_OK};

/// Status code the run endpoint answers with when a job starts
pub const RUN_ACCEPTED_STATUS: u16 = 202;

/// Reason used when validation fails without a remote explanation
pub const UNKNOWN_VALIDATION_ERROR: &str = "Unknown analysis service error during validation";

/// Reason used for any failure during the run phase
pub const UNKNOWN_START_ERROR: &str = "Unknown analysis service error during start";

/// Caller-facing text for transport failures; detail is only logged
pub const GATEWAY_FAILURE: &str = "Failed to reach the analysis service";

/// Body of a validate-phase response
///
/// `accessionsUsed` and `accessionsRemoved` are required; a body without
/// them is not a validation result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Business-level rejection, `null` when the job may run
    pub error: Option<String>,

    /// Accessions the job will use
    pub accessions_used: Vec<String>,

    /// Accessions dropped by remote validation
    pub accessions_removed: Vec<String>,
}

/// Non-empty `error` string of a response body, if it carries one
fn remote_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .as_str()
        .filter(|e| !e.is_empty())
        .map(str::to_string)
}

/// Terminal result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Job started
    Accepted {
        /// Number of accessions actually used
        job_size: usize,
        /// Accessions dropped during validation
        records_removed: Vec<String>,
        /// Opaque tracking message from the service
        tracking_message: String,
    },

    /// The service refused the job during the dry run
    RejectedByValidation {
        /// Rejection reason
        reason: String,
    },

    /// The validate call failed at the transport level or returned garbage
    GatewayError {
        /// Logged detail, never shown to the caller
        reason: String,
    },

    /// The run call failed or answered with an unexpected status
    UnknownServiceError,
}

impl SubmissionOutcome {
    /// HTTP status code for this outcome
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Accepted { .. } => STATUS_ACCEPTED,
            Self::RejectedByValidation { .. } => STATUS_OK,
            Self::GatewayError { .. } | Self::UnknownServiceError => STATUS_INTERNAL_ERROR,
        }
    }

    /// Caller-facing response body
    pub fn to_status(&self) -> JobStatus {
        match self {
            Self::Accepted {
                job_size,
                records_removed,
                tracking_message,
            } => JobStatus {
                status: STATUS_ACCEPTED,
                message: Some(tracking_message.clone()),
                job_size: Some(*job_size),
                records_removed: Some(records_removed.clone()),
                ..Default::default()
            },
            Self::RejectedByValidation { reason } => JobStatus::error(STATUS_OK, reason.clone()),
            Self::GatewayError { .. } => JobStatus::internal(GATEWAY_FAILURE),
            Self::UnknownServiceError => JobStatus::internal(UNKNOWN_START_ERROR),
        }
    }
}

/// Submission lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionPhase {
    /// Nothing sent yet
    Idle,
    /// Dry run in flight
    Validating,
    /// Start call in flight, carrying the accepted validation report
    Running(ValidationReport),
    /// Terminal
    Finished(SubmissionOutcome),
}

/// Drives the validate-then-run protocol against an [`AnalysisGateway`]
///
/// Holds no per-submission state, so one orchestrator can serve any number
/// of concurrent submissions.
pub struct SubmissionOrchestrator<G: AnalysisGateway + ?Sized> {
    gateway: Arc<G>,
}

impl<G: AnalysisGateway + ?Sized> Clone for SubmissionOrchestrator<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<G: AnalysisGateway + ?Sized> SubmissionOrchestrator<G> {
    /// Create an orchestrator over a gateway
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Gateway used by this orchestrator
    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    /// Submit a validated job and wait for a terminal outcome
    pub async fn submit(&self, job: &JobRequest) -> SubmissionOutcome {
        let mut phase = SubmissionPhase::Idle;
        loop {
            phase = match phase {
                SubmissionPhase::Idle => {
                    info!(
                        "Testing job for {} with {} accessions",
                        job.reply_email,
                        job.accessions.len()
                    );
                    SubmissionPhase::Validating
                }
                SubmissionPhase::Validating => self.validate_phase(job).await,
                SubmissionPhase::Running(report) => self.run_phase(job, report).await,
                SubmissionPhase::Finished(outcome) => return outcome,
            };
        }
    }

    async fn validate_phase(&self, job: &JobRequest) -> SubmissionPhase {
        let reply = match self.gateway.validate(job).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Job validation call failed: {}", e);
                return SubmissionPhase::Finished(SubmissionOutcome::GatewayError {
                    reason: e.to_string(),
                });
            }
        };

        if !reply.is_success() {
            let reason =
                remote_error(&reply.body).unwrap_or_else(|| UNKNOWN_VALIDATION_ERROR.to_string());
            warn!("Job validation answered {}: {}", reply.status, reason);
            return SubmissionPhase::Finished(SubmissionOutcome::RejectedByValidation { reason });
        }

        let report = match serde_json::from_str::<ValidationReport>(&reply.body) {
            Ok(report) => report,
            Err(e) => {
                error!("Malformed validation response: {}", e);
                return SubmissionPhase::Finished(SubmissionOutcome::GatewayError {
                    reason: format!("Malformed validation response: {}", e),
                });
            }
        };

        if let Some(reason) = report.error.as_deref() {
            let reason = if reason.is_empty() {
                UNKNOWN_VALIDATION_ERROR
            } else {
                reason
            };
            warn!("Job rejected during validation: {}", reason);
            return SubmissionPhase::Finished(SubmissionOutcome::RejectedByValidation {
                reason: reason.to_string(),
            });
        }

        if !report.accessions_removed.is_empty() {
            warn!(
                "Accessions removed in job validation: {}",
                report.accessions_removed.join(",")
            );
        }
        info!(
            "Starting job for {} with {} records",
            job.reply_email,
            report.accessions_used.len()
        );
        SubmissionPhase::Running(report)
    }

    async fn run_phase(&self, job: &JobRequest, report: ValidationReport) -> SubmissionPhase {
        let outcome = match self.gateway.run(job).await {
            Ok(reply) if reply.status == RUN_ACCEPTED_STATUS => {
                info!("Job started: {}", reply.body);
                SubmissionOutcome::Accepted {
                    job_size: report.accessions_used.len(),
                    records_removed: report.accessions_removed,
                    tracking_message: reply.body,
                }
            }
            Ok(reply) => {
                error!("Job start answered unexpected status {}", reply.status);
                SubmissionOutcome::UnknownServiceError
            }
            Err(e) => {
                error!("Job start call failed: {}", e);
                SubmissionOutcome::UnknownServiceError
            }
        };
        SubmissionPhase::Finished(outcome)
    }
}
