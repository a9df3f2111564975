//! Caller-facing result shape
//!
//! Every endpoint answers with a [`JobStatus`] whose `status` field mirrors
//! the HTTP status code.

use serde::{Deserialize, Serialize};

use crate::predictors::PredictorMap;

/// 200: success, or a business-level rejection carried in `error`
pub const STATUS_OK: u16 = 200;

/// 202: job accepted and started
pub const STATUS_ACCEPTED: u16 = 202;

/// 400: malformed or invalid request
pub const STATUS_BAD_REQUEST: u16 = 400;

/// 500: analysis service or local failure
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Uniform response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    /// Mirrors the HTTP status code
    pub status: u16,

    /// Error text, for rejections and failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Tracking message from the analysis service
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Number of records the started job uses
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_size: Option<usize>,

    /// Accessions dropped by remote validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records_removed: Option<Vec<String>>,

    /// Parsed predictors from an upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictors: Option<PredictorMap>,

    /// Relative URL of a generated download
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_path: Option<String>,
}

impl JobStatus {
    /// Status with an error message
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// 400 with an error message
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(STATUS_BAD_REQUEST, message)
    }

    /// 500 with an error message
    pub fn internal(message: impl Into<String>) -> Self {
        Self::error(STATUS_INTERNAL_ERROR, message)
    }

    /// 200 carrying parsed predictors
    pub fn predictors(predictors: PredictorMap) -> Self {
        Self {
            status: STATUS_OK,
            predictors: Some(predictors),
            ..Default::default()
        }
    }

    /// 200 carrying a download path
    pub fn download(path: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK,
            download_path: Some(path.into()),
            ..Default::default()
        }
    }
}
