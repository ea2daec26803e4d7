//! Automated analysis of recordings
//!
//! A recording is a stream of JSON objects, one per line, each carrying a
//! `type` and the event's fields. The [`RuleEngine`] runs a selection of
//! [`Rule`]s over the parsed events and produces one [`RuleEvaluation`] per rule,
//! keyed by rule id.

mod rules;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::BufRead;

pub use rules::{CpuLoadRule, ExceptionRateRule, GcPauseRule, HeapUsageRule};

/// Score reported by rules that found nothing to judge
pub const NOT_APPLICABLE: f64 = -1.0;

/// One event from a recording
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RecordedEvent {
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Numeric field, if present
    pub fn number(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(Value::as_f64)
    }
}

/// A recording line that is not a JSON event
#[derive(Debug, thiserror::Error)]
#[error("line {line}: {source}")]
pub struct ParseError {
    pub line: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Failure reading a recording
#[derive(Debug, thiserror::Error)]
pub enum RecordingError {
    #[error("malformed recording: {0}")]
    Parse(#[from] ParseError),
    #[error("malformed recording: line {line} is not valid UTF-8")]
    Encoding { line: usize },
    #[error("failed to read recording: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse a recording; blank lines are skipped
pub fn parse_recording(reader: impl BufRead) -> Result<Vec<RecordedEvent>, RecordingError> {
    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => RecordingError::Encoding { line: index + 1 },
            _ => RecordingError::Io(e),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|source| ParseError {
            line: index + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// Outcome of one rule over one recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    /// 0 (nothing to worry about) to 100 (severe); -1 when not applicable
    pub score: f64,
    pub name: String,
    pub topic: String,
    pub description: String,
}

/// A check run against the events of a recording
pub trait Rule: Send + Sync {
    /// Stable identifier used as the result key and in filters
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    /// Group of related rules, also accepted in filters
    fn topic(&self) -> &'static str;

    fn evaluate(&self, events: &[RecordedEvent]) -> RuleEvaluation;

    /// Build an evaluation attributed to this rule
    fn evaluation(&self, score: f64, description: String) -> RuleEvaluation {
        RuleEvaluation {
            score,
            name: self.name().to_string(),
            topic: self.topic().to_string(),
            description,
        }
    }
}

/// Runs a set of rules over recordings
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Engine preloaded with every built-in rule
    pub fn with_builtin_rules() -> Self {
        Self::new(vec![
            Box::new(GcPauseRule::default()),
            Box::new(HeapUsageRule::default()),
            Box::new(CpuLoadRule::default()),
            Box::new(ExceptionRateRule::default()),
        ])
    }

    /// Rules matching a comma-separated filter of rule ids or topics
    ///
    /// An empty filter selects every rule; matching ignores case and unknown
    /// tokens select nothing.
    pub fn select(&self, filter: &str) -> Vec<&dyn Rule> {
        let tokens: Vec<String> = filter
            .split(',')
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .collect();

        self.rules
            .iter()
            .map(AsRef::as_ref)
            .filter(|rule| {
                tokens.is_empty()
                    || tokens.iter().any(|token| {
                        token.eq_ignore_ascii_case(rule.id())
                            || token.eq_ignore_ascii_case(rule.topic())
                    })
            })
            .collect()
    }

    pub fn evaluate(
        &self,
        events: &[RecordedEvent],
        filter: &str,
    ) -> BTreeMap<String, RuleEvaluation> {
        self.select(filter)
            .into_iter()
            .map(|rule| (rule.id().to_string(), rule.evaluate(events)))
            .collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_builtin_rules()
    }
}
