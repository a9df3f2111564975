//! Field validation rules
//!
//! *La Validation* (The Validation) - Named, anchored predicate rules for every
//! user-supplied field, plus the accession list parser used by accession uploads.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Maximum number of accession lines read from one accession list
pub const DEFAULT_ACCESSION_UPLOAD_LIMIT: usize = 2500;

/// Expected JSON type of a raw value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputType {
    /// JSON string
    String,
    /// JSON number (finite)
    Number,
}

/// A named validation rule
///
/// The pattern is always anchored at both ends. Rules with large repetition
/// bounds keep the bound in `length` (counted in characters) instead of the
/// pattern so the compiled regex stays small.
#[derive(Debug, Clone)]
pub struct Rule {
    name: &'static str,
    pattern: Regex,
    length: Option<RangeInclusive<usize>>,
}

impl Rule {
    fn new(
        name: &'static str,
        pattern: &str,
        length: Option<RangeInclusive<usize>>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            pattern: Regex::new(pattern)?,
            length,
        })
    }

    /// Build a closed-enum rule accepting exactly one of `values`
    ///
    /// Returns `None` when `values` is empty or the resulting pattern fails
    /// to compile.
    pub fn one_of<S: AsRef<str>>(name: &'static str, values: &[S]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let alternatives: Vec<String> = values
            .iter()
            .map(|v| regex::escape(v.as_ref()))
            .collect();
        let pattern = Regex::new(&format!("^(?:{})$", alternatives.join("|"))).ok()?;
        Some(Self {
            name,
            pattern,
            length: None,
        })
    }

    /// Rule name, used in log output
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether the whole of `value` satisfies the rule
    pub fn matches(&self, value: &str) -> bool {
        if let Some(length) = &self.length {
            if !length.contains(&value.chars().count()) {
                return false;
            }
        }
        self.pattern.is_match(value)
    }
}

/// Job accession: 5-10 chars of `[A-Z0-9_.]`
pub static ACCESSION: Lazy<Rule> =
    Lazy::new(|| Rule::new("accession", r"^[A-Z0-9_.]{5,10}$", None).expect("valid built-in pattern"));

/// Bare accession without version: 5-10 chars of `[A-Z0-9]`
pub static BARE_ACCESSION: Lazy<Rule> =
    Lazy::new(|| Rule::new("bare accession", r"^[A-Z0-9]{5,10}$", None).expect("valid built-in pattern"));

/// Versioned accession, e.g. `KX369547.1`
pub static VERSIONED_ACCESSION: Lazy<Rule> = Lazy::new(|| {
    Rule::new(
        "versioned accession",
        r"^[A-Z0-9_.]{5,10}\.[0-9]{1,2}$",
        None,
    )
    .expect("valid built-in pattern")
});

/// Reply email: `local@domain.tld` with no whitespace or extra `@`
pub static EMAIL: Lazy<Rule> =
    Lazy::new(|| Rule::new("email", r"^[^@\s]+@[^@\s]+\.[^@\s]+$", None).expect("valid built-in pattern"));

/// Optional job name
pub static JOB_NAME: Lazy<Rule> =
    Lazy::new(|| Rule::new("job name", r"^[A-Za-z0-9_ \-#&]+$", Some(3..=255)).expect("valid built-in pattern"));

/// GLM group (state) name
pub static STATE_NAME: Lazy<Rule> =
    Lazy::new(|| Rule::new("state name", r"^[A-Za-z0-9_\-.,' ]+$", Some(1..=255)).expect("valid built-in pattern"));

/// GLM predictor name
pub static PREDICTOR_NAME: Lazy<Rule> =
    Lazy::new(|| Rule::new("predictor name", r"^[A-Za-z0-9_\-. ]+$", Some(1..=255)).expect("valid built-in pattern"));

/// Record search query
pub static SEARCH_QUERY: Lazy<Rule> =
    Lazy::new(|| Rule::new("search query", r"^[A-Za-z0-9_ :\[\]()]+$", Some(5..=5000)).expect("valid built-in pattern"));

/// Uploaded predictor file name
pub static PREDICTOR_FILE_NAME: Lazy<Rule> = Lazy::new(|| {
    Rule::new(
        "predictor file name",
        r"^[A-Za-z0-9_\-.]{1,250}\.tsv$",
        None,
    )
    .expect("valid built-in pattern")
});

/// Uploaded accession list file name
pub static ACCESSION_FILE_NAME: Lazy<Rule> = Lazy::new(|| {
    Rule::new(
        "accession file name",
        r"^[A-Za-z0-9_\-.]{1,250}\.txt$",
        None,
    )
    .expect("valid built-in pattern")
});

/// Check a raw JSON value against an expected type and optional rule
///
/// Strings must match `rule` in full. Numbers must be finite; when a rule
/// is given it is matched against the number's JSON rendering. Any other
/// JSON type is rejected regardless of the rule. Never panics.
pub fn check_input(value: &Value, expected: InputType, rule: Option<&Rule>) -> bool {
    match (expected, value) {
        (InputType::String, Value::String(s)) => rule.map_or(true, |r| r.matches(s)),
        (InputType::Number, Value::Number(n)) => {
            let finite = n.as_f64().is_some_and(f64::is_finite);
            finite && rule.map_or(true, |r| r.matches(&n.to_string()))
        }
        _ => false,
    }
}

/// Check a plain string against a rule
pub fn check_str(value: &str, rule: &Rule) -> bool {
    rule.matches(value)
}

/// Coerce a text cell into a finite number
///
/// This is the explicit caller-side coercion for tabular input; JSON
/// strings are never treated as numbers by [`check_input`].
pub fn coerce_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Human readable rendering of a raw value for error messages
///
/// Strings are shown without quotes; everything else as compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Accession list rejected line by line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid Accession(s): {}", .entries.join(", "))]
pub struct AccessionListError {
    /// One `"<line>" on line #<n>` entry per rejected line
    pub entries: Vec<String>,
}

/// Parse a newline separated accession list
///
/// Reads at most `limit` lines. Versioned accessions are normalised to their
/// bare form by dropping everything from the first `.`. Every invalid line is
/// reported, not only the first.
pub fn parse_accession_list(text: &str, limit: usize) -> Result<Vec<String>, AccessionListError> {
    let mut accessions = Vec::new();
    let mut entries = Vec::new();

    for (index, raw) in text.trim().split('\n').take(limit).enumerate() {
        let line = raw.trim();
        if BARE_ACCESSION.matches(line) {
            accessions.push(line.to_string());
        } else if VERSIONED_ACCESSION.matches(line) {
            let bare = line.split('.').next().unwrap_or(line);
            accessions.push(bare.to_string());
        } else {
            entries.push(format!("\"{}\" on line #{}", line, index + 1));
        }
    }

    if entries.is_empty() {
        Ok(accessions)
    } else {
        Err(AccessionListError { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_builtin_rules_compile() {
        let rules: [&Rule; 10] = [
            &ACCESSION,
            &BARE_ACCESSION,
            &VERSIONED_ACCESSION,
            &EMAIL,
            &JOB_NAME,
            &STATE_NAME,
            &PREDICTOR_NAME,
            &SEARCH_QUERY,
            &PREDICTOR_FILE_NAME,
            &ACCESSION_FILE_NAME,
        ];
        for rule in rules {
            assert!(!rule.name().is_empty());
        }
    }

    #[test]
    fn test_rule_new_reports_bad_pattern() {
        assert!(Rule::new("broken", "^[unclosed$", None).is_err());
    }

    #[rstest]
    #[case("AB123", true)]
    #[case("KX369547", true)]
    #[case("NC_045512", true)]
    #[case("AB12.3", true)]
    #[case("AB12", false)]
    #[case("ABCDEFGHIJK", false)]
    #[case("ab123", false)]
    #[case("AB 123", false)]
    fn test_accession_rule(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(check_str(value, &ACCESSION), expected);
    }

    #[rstest]
    #[case("KX369547.1", true)]
    #[case("KX369547.12", true)]
    #[case("KX369547.123", false)]
    #[case("KX369547", false)]
    #[case("AB1.1", false)]
    fn test_versioned_accession_rule(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(check_str(value, &VERSIONED_ACCESSION), expected);
    }

    #[rstest]
    #[case("a@b.com", true)]
    #[case("first.last@lab.example.org", true)]
    #[case("ab.com", false)]
    #[case("a@bcom", false)]
    #[case("a b@c.com", false)]
    #[case("a@b@c.com", false)]
    #[case("@b.com", false)]
    fn test_email_rule(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(check_str(value, &EMAIL), expected);
    }

    #[rstest]
    #[case("H5N1 run #2 & more", true)]
    #[case("ab", false)]
    #[case("name;drop", false)]
    fn test_job_name_rule(#[case] value: &str, #[case] expected: bool) {
        assert_eq!(check_str(value, &JOB_NAME), expected);
    }

    #[test]
    fn test_job_name_length_bound() {
        assert!(JOB_NAME.matches(&"a".repeat(255)));
        assert!(!JOB_NAME.matches(&"a".repeat(256)));
    }

    #[test]
    fn test_state_and_predictor_names() {
        assert!(STATE_NAME.matches("Hawai'i, US"));
        assert!(!PREDICTOR_NAME.matches("Hawai'i"));
        assert!(PREDICTOR_NAME.matches("Pop-density 2010"));
        assert!(!STATE_NAME.matches(""));
    }

    #[test]
    fn test_search_query_rule() {
        assert!(SEARCH_QUERY.matches("Organism:(H1N1) AND Date:[2000 TO 2010]"));
        assert!(!SEARCH_QUERY.matches("abc"));
        assert!(!SEARCH_QUERY.matches("Organism:\"H1N1\""));
    }

    #[test]
    fn test_file_name_rules() {
        assert!(PREDICTOR_FILE_NAME.matches("predictors-2017.tsv"));
        assert!(!PREDICTOR_FILE_NAME.matches("predictors.csv"));
        assert!(!PREDICTOR_FILE_NAME.matches("../etc/passwd.tsv"));
        assert!(ACCESSION_FILE_NAME.matches("accessions.txt"));
    }

    #[test]
    fn test_one_of_rule() {
        let rule = Rule::one_of("substitution model", &["HKY", "GTR"]).expect("rule");
        assert!(rule.matches("HKY"));
        assert!(rule.matches("GTR"));
        assert!(!rule.matches("HKYX"));
        assert!(!rule.matches("hky"));
        assert!(Rule::one_of::<&str>("empty", &[]).is_none());
    }

    #[test]
    fn test_check_input_types() {
        assert!(check_input(&json!("AB123"), InputType::String, Some(&ACCESSION)));
        assert!(!check_input(&json!(12345), InputType::String, Some(&ACCESSION)));
        assert!(!check_input(&json!(["AB123"]), InputType::String, None));
        assert!(check_input(&json!(1000000), InputType::Number, None));
        assert!(check_input(&json!(0.5), InputType::Number, None));
        assert!(!check_input(&json!("1000"), InputType::Number, None));
        assert!(!check_input(&Value::Null, InputType::Number, None));
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number("10"), Some(10.0));
        assert_eq!(coerce_number(" 2.5 "), Some(2.5));
        assert_eq!(coerce_number("abc"), None);
        assert_eq!(coerce_number("NaN"), None);
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number(""), None);
    }

    #[test]
    fn test_parse_accession_list_strips_versions() {
        let parsed = parse_accession_list("AB123\nKX369547.1\r\nCD456\n", 10).expect("valid list");
        assert_eq!(parsed, vec!["AB123", "KX369547", "CD456"]);
    }

    #[test]
    fn test_parse_accession_list_reports_every_bad_line() {
        let err = parse_accession_list("AB123\nbad\nCD456\nworse!", 10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid Accession(s): \"bad\" on line #2, \"worse!\" on line #4"
        );
    }

    #[test]
    fn test_parse_accession_list_respects_limit() {
        let parsed = parse_accession_list("AB123\nCD456\nnot valid", 2).expect("limited list");
        assert_eq!(parsed.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_emails_without_at_are_rejected(s in "[a-z0-9.]{1,20}") {
            prop_assert!(!EMAIL.matches(&s));
        }

        #[test]
        fn prop_well_formed_emails_are_accepted(
            local in "[a-z0-9._%+-]{1,12}",
            domain in "[a-z0-9-]{1,12}",
            tld in "[a-z]{2,6}",
        ) {
            let email = format!("{}@{}.{}", local, domain, tld);
            prop_assert!(EMAIL.matches(&email));
        }

        #[test]
        fn prop_emails_with_whitespace_are_rejected(
            local in "[a-z]{1,8}",
            domain in "[a-z]{1,8}",
        ) {
            let email = format!("{} x@{}.com", local, domain);
            prop_assert!(!EMAIL.matches(&email));
        }
    }
}
