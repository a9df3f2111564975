//! Job request assembly
//!
//! Turns a raw JSON submission into a normalized [`JobRequest`]. Every field
//! is checked independently and every failure is reported in one aggregated
//! message; a `JobRequest` only exists when nothing failed.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, DEFAULT_SUBSTITUTION_MODELS};
use crate::predictors::{Predictor, PredictorMap};
use crate::validation::{
    check_input, display_value, InputType, Rule, ACCESSION, EMAIL, JOB_NAME, PREDICTOR_NAME,
    STATE_NAME,
};

/// Prefix of every aggregated validation message
pub const BASE_ERROR: &str = "INVALID JOB PARAMETER(S): ";

/// Fewest accessions a job may contain
pub const MIN_ACCESSIONS: usize = 5;

/// Most accessions a job may contain
pub const MAX_ACCESSIONS: usize = 1000;

/// Closed-set rules that come from configuration
#[derive(Debug, Clone)]
pub struct JobRules {
    substitution_model: Rule,
}

impl JobRules {
    /// Build rules accepting the given substitution models
    pub fn new<S: AsRef<str>>(substitution_models: &[S]) -> Result<Self, ConfigError> {
        let models: Vec<&str> = substitution_models
            .iter()
            .map(AsRef::as_ref)
            .filter(|m| !m.trim().is_empty())
            .collect();
        let substitution_model = Rule::one_of("substitution model", &models).ok_or_else(|| {
            ConfigError::Invalid("At least one substitution model must be configured".to_string())
        })?;
        Ok(Self { substitution_model })
    }

    /// Rule for `xmlOptions.substitutionModel`
    pub fn substitution_model(&self) -> &Rule {
        &self.substitution_model
    }
}

impl Default for JobRules {
    fn default() -> Self {
        Self {
            substitution_model: Rule::one_of("substitution model", DEFAULT_SUBSTITUTION_MODELS)
                .expect("non-empty default model list"),
        }
    }
}

/// BEAST XML generation options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlOptions {
    /// MCMC chain length
    pub chain_length: Number,
    /// Sampling frequency
    pub sub_sample_rate: Number,
    /// Nucleotide substitution model
    pub substitution_model: String,
}

/// A fully validated job, ready for submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Sequence accessions, in submission order
    pub accessions: Vec<String>,
    /// Address job results are mailed to
    pub reply_email: String,
    /// Optional human readable job name
    pub job_name: Option<String>,
    /// Whether the GLM model is requested
    #[serde(rename = "useGLM")]
    pub use_glm: bool,
    /// Custom GLM predictors, only when `use_glm`
    pub predictors: Option<PredictorMap>,
    /// XML generation options
    pub xml_options: XmlOptions,
}

/// Result of assembling a job
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    /// Every field passed
    Valid(JobRequest),
    /// Aggregated message naming every failed field
    Invalid(String),
}

impl ValidationOutcome {
    /// Whether a job was produced
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<JobRequest, String> {
        match self {
            Self::Valid(job) => Ok(job),
            Self::Invalid(message) => Err(message),
        }
    }
}

/// Accumulates human readable validation failures
#[derive(Debug, Default)]
struct JobErrors {
    fragments: Vec<String>,
}

impl JobErrors {
    fn missing(&mut self, field: &str) {
        self.fragments.push(format!("Missing {}", field));
    }

    fn invalid(&mut self, field: &str) {
        self.fragments.push(format!("Invalid {}", field));
    }

    fn invalid_value(&mut self, field: &str, value: impl fmt::Display) {
        self.fragments.push(format!("Invalid {}: {}", field, value));
    }

    fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn into_message(self) -> String {
        format!("{}{}", BASE_ERROR, self.fragments.join(", "))
    }
}

/// Collect accessions, stopping at the first one that fails the rule
///
/// Returns the offending raw value on failure.
pub fn collect_accessions(items: &[Value]) -> Result<Vec<String>, Value> {
    let mut accessions = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if check_input(item, InputType::String, Some(&ACCESSION)) => {
                accessions.push(s.clone());
            }
            other => return Err(other.clone()),
        }
    }
    Ok(accessions)
}

/// Look up a field, treating JSON `null` as absent
fn field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

/// Look up a field, treating `null` and `""` as absent
fn non_empty_field<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    field(raw, key).filter(|v| v.as_str() != Some(""))
}

fn check_accessions(value: Option<&Value>, errors: &mut JobErrors) -> Option<Vec<String>> {
    let Some(value) = value else {
        errors.missing("Accessions");
        return None;
    };
    let Some(items) = value.as_array() else {
        errors.invalid_value("Accessions", display_value(value));
        return None;
    };
    if !(MIN_ACCESSIONS..=MAX_ACCESSIONS).contains(&items.len()) {
        errors.invalid_value("number of Accessions", items.len());
        return None;
    }
    match collect_accessions(items) {
        Ok(accessions) => Some(accessions),
        Err(bad) => {
            errors.invalid_value("Accession", display_value(&bad));
            None
        }
    }
}

fn check_email(value: Option<&Value>, errors: &mut JobErrors) -> Option<String> {
    let Some(value) = value else {
        errors.missing("Reply Email");
        return None;
    };
    match value {
        Value::String(s) if check_input(value, InputType::String, Some(&EMAIL)) => Some(s.clone()),
        other => {
            errors.invalid_value("Email", display_value(other));
            None
        }
    }
}

fn check_job_name(value: Option<&Value>, errors: &mut JobErrors) -> Option<String> {
    let value = value?;
    match value {
        Value::String(s) if check_input(value, InputType::String, Some(&JOB_NAME)) => {
            Some(s.clone())
        }
        other => {
            errors.invalid_value("Job Name", display_value(other));
            None
        }
    }
}

/// One predictor entry as posted by the client
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PredictorEntry {
    state: Value,
    name: Value,
    value: Value,
    year: Value,
}

impl PredictorEntry {
    fn into_predictor(self, state: &str) -> Option<Predictor> {
        if self.state.as_str() != Some(state) {
            return None;
        }
        if !check_input(&self.name, InputType::String, Some(&PREDICTOR_NAME)) {
            return None;
        }
        if !check_input(&self.value, InputType::Number, None) {
            return None;
        }
        // Time varying predictors are not supported yet.
        if !self.year.is_null() {
            return None;
        }
        Some(Predictor::new(state, self.name.as_str()?, self.value.as_f64()?))
    }
}

/// Validate a client predictor payload
///
/// All or nothing: `None` as soon as any state or entry fails.
pub fn validate_predictors(value: &Value) -> Option<PredictorMap> {
    let groups = value.as_object()?;
    let mut predictors = PredictorMap::new();

    for (state, entries) in groups {
        if !STATE_NAME.matches(state) {
            debug!("Rejecting predictors for invalid state {:?}", state);
            return None;
        }
        let mut row = Vec::new();
        for entry in entries.as_array()? {
            let entry: PredictorEntry = serde_json::from_value(entry.clone()).ok()?;
            row.push(entry.into_predictor(state)?);
        }
        predictors.insert(state.clone(), row);
    }

    Some(predictors)
}

fn check_xml_options(
    value: Option<&Value>,
    rules: &JobRules,
    errors: &mut JobErrors,
) -> Option<XmlOptions> {
    let Some(value) = value else {
        errors.missing("XML Parameters");
        return None;
    };

    let chain_length = value.get("chainLength").unwrap_or(&Value::Null);
    let sub_sample_rate = value.get("subSampleRate").unwrap_or(&Value::Null);
    let substitution_model = value.get("substitutionModel").unwrap_or(&Value::Null);

    let options = match (chain_length, sub_sample_rate, substitution_model) {
        (Value::Number(chain), Value::Number(rate), Value::String(model))
            if check_input(chain_length, InputType::Number, None)
                && check_input(sub_sample_rate, InputType::Number, None)
                && rules.substitution_model().matches(model) =>
        {
            Some(XmlOptions {
                chain_length: chain.clone(),
                sub_sample_rate: rate.clone(),
                substitution_model: model.clone(),
            })
        }
        _ => None,
    };

    if options.is_none() {
        errors.invalid("XML Parameters");
    }
    options
}

/// Validate a raw submission and build a [`JobRequest`]
///
/// Field order in the aggregated message: accessions, reply email, job name,
/// predictors, XML options.
pub fn assemble_job(raw: &Value, rules: &JobRules) -> ValidationOutcome {
    let mut errors = JobErrors::default();

    let accessions = check_accessions(field(raw, "accessions"), &mut errors);
    let reply_email = check_email(non_empty_field(raw, "replyEmail"), &mut errors);
    let job_name = check_job_name(non_empty_field(raw, "jobName"), &mut errors);
    let use_glm = raw.get("useGLM") == Some(&Value::Bool(true));

    let mut predictors = None;
    if use_glm {
        if let Some(payload) = field(raw, "predictors") {
            info!("Job is using custom predictors");
            predictors = validate_predictors(payload);
            if predictors.is_none() {
                errors.invalid("Custom Job Predictors");
            }
        }
    }

    let xml_options = check_xml_options(field(raw, "xmlOptions"), rules, &mut errors);

    if !errors.is_empty() {
        let message = errors.into_message();
        warn!("{}", message);
        return ValidationOutcome::Invalid(message);
    }

    match (accessions, reply_email, xml_options) {
        (Some(accessions), Some(reply_email), Some(xml_options)) => {
            ValidationOutcome::Valid(JobRequest {
                accessions,
                reply_email,
                job_name,
                use_glm,
                predictors,
                xml_options,
            })
        }
        _ => ValidationOutcome::Invalid(BASE_ERROR.trim_end().to_string()),
    }
}
