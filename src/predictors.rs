//! GLM predictor tables
//!
//! Parses tab separated predictor uploads into per-state predictor lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::validation::{coerce_number, PREDICTOR_NAME, STATE_NAME};

/// Predictors grouped by state name
pub type PredictorMap = BTreeMap<String, Vec<Predictor>>;

/// A named numeric covariate attached to one state
///
/// Serialized with the four-field shape the analysis service expects:
/// `{state, name, value, year}`. Time varying predictors are not supported,
/// so `year` is always `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictor {
    /// Group (state) the value belongs to
    #[serde(rename = "state")]
    pub group: String,

    /// Predictor name from the table header
    pub name: String,

    /// Predictor value
    pub value: f64,

    /// Reserved for time varying predictors
    pub year: Option<i32>,
}

impl Predictor {
    /// Create a time-invariant predictor
    pub fn new(group: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            value,
            year: None,
        }
    }
}

/// Errors raised while parsing a predictor table
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictorFileError {
    /// File has no header row
    #[error("Empty Predictor file")]
    Empty,

    /// Header cell failed the predictor name rule
    #[error("Invalid Predictor name: \"{0}\"")]
    InvalidName(String),

    /// First column of a row failed the state name rule
    #[error("Invalid Predictor state: \"{0}\"")]
    InvalidState(String),

    /// Cell is not a finite number
    #[error("Invalid Predictor value: \"{0}\"")]
    InvalidValue(String),

    /// Row is shorter than the header
    #[error("Missing Predictor value for \"{state}\" in column \"{column}\"")]
    MissingCell {
        /// State on the short row
        state: String,
        /// Header name of the first missing column
        column: String,
    },

    /// Row is longer than the header
    #[error("Unexpected Predictor value for \"{state}\" in column #{index}")]
    UnexpectedCell {
        /// State on the long row
        state: String,
        /// 1-based column number of the first extra cell
        index: usize,
    },
}

/// Parse a tab separated predictor table
///
/// The first line holds predictor names (its first column labels the state
/// column and is not validated). Every following line is one state: its name
/// and one value per predictor column. Parsing stops at the first invalid
/// header name, state or cell and no partial map is returned.
///
/// A header-only table is valid and yields an empty map.
pub fn parse_predictor_table(text: &str) -> Result<PredictorMap, PredictorFileError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PredictorFileError::Empty);
    }

    let mut lines = trimmed.split('\n');
    let header: Vec<&str> = lines
        .next()
        .unwrap_or_default()
        .trim()
        .split('\t')
        .map(str::trim)
        .collect();

    if let Some(bad) = header.iter().skip(1).find(|name| !PREDICTOR_NAME.matches(name)) {
        warn!("Rejecting predictor table with invalid name: {}", bad);
        return Err(PredictorFileError::InvalidName(bad.to_string()));
    }

    let mut predictors = PredictorMap::new();
    for line in lines {
        let cells: Vec<&str> = line.trim().split('\t').collect();
        let state = cells.first().copied().unwrap_or_default().trim();
        if !STATE_NAME.matches(state) {
            return Err(PredictorFileError::InvalidState(state.to_string()));
        }

        let mut row = Vec::with_capacity(header.len().saturating_sub(1));
        for (index, column) in header.iter().enumerate().skip(1) {
            let Some(raw) = cells.get(index) else {
                return Err(PredictorFileError::MissingCell {
                    state: state.to_string(),
                    column: column.to_string(),
                });
            };
            let Some(value) = coerce_number(raw) else {
                return Err(PredictorFileError::InvalidValue(raw.to_string()));
            };
            row.push(Predictor::new(state, *column, value));
        }

        if cells.len() > header.len() {
            return Err(PredictorFileError::UnexpectedCell {
                state: state.to_string(),
                index: header.len() + 1,
            });
        }

        predictors.insert(state.to_string(), row);
    }

    debug!("Parsed predictors for {} states", predictors.len());
    Ok(predictors)
}
