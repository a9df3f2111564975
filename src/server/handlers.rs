//! HTTP handlers for the job endpoints

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PortalConfig;
use crate::gateway::AnalysisGateway;
use crate::intake::{IntakeError, StagedUpload, UploadPolicy, PREDICTOR_CONTENT_TYPE};
use crate::job::{assemble_job, collect_accessions, JobRules, ValidationOutcome};
use crate::predictors::parse_predictor_table;
use crate::server::error::{ApiError, ApiResult};
use crate::status::{JobStatus, STATUS_OK};
use crate::submit::{SubmissionOrchestrator, GATEWAY_FAILURE};
use crate::validation::{display_value, PREDICTOR_FILE_NAME};

/// Multipart field carrying the predictor table
pub const PREDICTOR_FIELD: &str = "predictorsBatchFile";

/// Room for multipart framing on top of the file size cap
const MULTIPART_OVERHEAD: usize = 16 * 1024;

/// State shared across all handlers
///
/// Everything is immutable after startup; requests share nothing mutable.
#[derive(Clone)]
pub struct AppState {
    /// Portal configuration
    pub config: Arc<PortalConfig>,

    /// Field rules derived from configuration
    pub rules: Arc<JobRules>,

    /// Two-phase submission driver
    pub orchestrator: SubmissionOrchestrator<dyn AnalysisGateway>,
}

impl AppState {
    /// Build state around an analysis gateway
    pub fn new(config: PortalConfig, gateway: Arc<dyn AnalysisGateway>) -> Result<Self, ApiError> {
        let rules = JobRules::new(&config.substitution_models)?;
        Ok(Self {
            config: Arc::new(config),
            rules: Arc::new(rules),
            orchestrator: SubmissionOrchestrator::new(gateway),
        })
    }
}

/// Turn a JSON extraction failure into a 400
fn json_body(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        warn!("Rejected request body: {}", rejection.body_text());
        ApiError::bad_request("Malformed request body")
    })
}

/// POST /job/run - Validate and start a job
pub async fn run_job(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<JobStatus> {
    let raw = json_body(payload)?;

    let job = match assemble_job(&raw, &state.rules) {
        ValidationOutcome::Valid(job) => job,
        ValidationOutcome::Invalid(message) => {
            warn!("{}", message);
            return Err(ApiError::bad_request(message));
        }
    };

    info!("Submitting job with {} accessions", job.accessions.len());
    let outcome = state.orchestrator.submit(&job).await;
    Ok(outcome.to_status())
}

/// POST /job/predictors - Parse an uploaded predictor table
pub async fn upload_predictors(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<JobStatus> {
    info!("Setting predictors...");

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("Failed to read multipart body: {}", e);
        ApiError::bad_request("Invalid Predictor File")
    })? {
        if field.name() != Some(PREDICTOR_FIELD) {
            warn!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.map_err(|e| {
            warn!("Failed to read predictor upload: {}", e);
            ApiError::bad_request("Invalid Predictor File")
        })?;
        upload = Some((content_type, file_name, data));
    }

    let Some((content_type, file_name, data)) = upload else {
        return Err(ApiError::bad_request("Missing Predictor File"));
    };

    let policy = UploadPolicy {
        content_type: PREDICTOR_CONTENT_TYPE,
        file_name: &PREDICTOR_FILE_NAME,
        max_bytes: state.config.max_upload_bytes,
    };
    if let Err(e) = policy.check(content_type.as_deref(), file_name.as_deref(), data.len()) {
        warn!("Rejected predictor upload: {}", e);
        return Err(ApiError::bad_request("Invalid Predictor File"));
    }

    info!("Processing predictor file upload...");
    let staged = StagedUpload::stage(&state.config.upload_dir, &data)
        .await
        .map_err(|e| {
            error!("{}", e);
            ApiError::internal("Failed to store Predictor File")
        })?;
    let text = staged.read_and_discard().await.map_err(|e| match e {
        IntakeError::Decode { .. } => {
            warn!("{}", e);
            ApiError::bad_request("Invalid Predictor File")
        }
        other => {
            error!("{}", other);
            ApiError::internal("Failed to read Predictor File")
        }
    })?;

    let predictors = parse_predictor_table(&text).map_err(|e| {
        warn!("{}", e);
        ApiError::bad_request(e.to_string())
    })?;

    info!("Parsed predictors for {} states", predictors.len());
    Ok(JobStatus::predictors(predictors))
}

/// POST /job/predictors/template - Fetch a predictor template for download
pub async fn predictor_template(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<JobStatus> {
    let raw = json_body(payload)?;

    let Some(items) = raw.get("accessions").filter(|v| !v.is_null()) else {
        return Err(ApiError::bad_request("Missing Accessions"));
    };
    let Some(items) = items.as_array() else {
        return Err(ApiError::bad_request(format!(
            "Invalid Accessions: {}",
            display_value(items)
        )));
    };
    let accessions = collect_accessions(items).map_err(|bad| {
        let shown = display_value(&bad);
        warn!("Bad Accession Requested: {}", shown);
        ApiError::bad_request(format!("Invalid Accession: {}", shown))
    })?;

    info!(
        "Retrieving predictors download for {} records...",
        accessions.len()
    );
    let reply = state
        .orchestrator
        .gateway()
        .template(&accessions)
        .await
        .map_err(|e| {
            error!("{}", e);
            ApiError::internal(GATEWAY_FAILURE)
        })?;

    if reply.status != STATUS_OK {
        error!("Download request failed: {}", reply.status);
        return Err(ApiError::internal("Analysis service download request failed"));
    }

    let file_name = format!("{}.tsv", Uuid::new_v4());
    let dir = &state.config.download_dir;
    let path = dir.join(&file_name);
    info!("Download received. Writing file: {}", path.display());

    let written = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::write(&path, reply.body.as_bytes()).await,
        Err(e) => Err(e),
    };
    written.map_err(|e| {
        error!("Error writing download {}: {}", path.display(), e);
        ApiError::internal("Error writing download")
    })?;

    Ok(JobStatus::download(format!("/downloads/{}", file_name)))
}

/// GET /api/health - Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    Ok(Json(serde_json::json!({
        "status": "ok",
        "service": "zoophy-portal",
        "version": env!("CARGO_PKG_VERSION"),
        "substitutionModels": state.config.substitution_models,
    })))
}

/// Last-resort 500 for a handler that panicked
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Request handler panicked: {}", detail);
    ApiError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to process request",
    )
    .into_response()
}

fn cors_layer(config: &PortalConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

/// Create router with all routes
pub fn create_router(config: &PortalConfig) -> Router<AppState> {
    let upload_limit = config.max_upload_bytes + MULTIPART_OVERHEAD;

    Router::new()
        .route("/api/health", get(health_check))
        .route("/job/run", post(run_job))
        .route(
            "/job/predictors",
            post(upload_predictors).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/job/predictors/template", post(predictor_template))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
        .layer(cors_layer(config))
}
