use super::{RecordedEvent, Rule, RuleEvaluation, NOT_APPLICABLE};

/// Map `value` so that reaching `limit` scores 75 and the score saturates at 100
fn scaled(value: f64, limit: f64) -> f64 {
    (value / limit * 75.0).clamp(0.0, 100.0)
}

fn max_of<'a>(events: impl Iterator<Item = &'a RecordedEvent>, field: &str) -> Option<f64> {
    events
        .filter_map(|event| event.number(field))
        .fold(None, |max, value| Some(max.map_or(value, |m: f64| m.max(value))))
}

/// Longest stop-the-world pause
#[derive(Debug, Clone)]
pub struct GcPauseRule {
    pub severe_pause_ms: f64,
}

impl Default for GcPauseRule {
    fn default() -> Self {
        Self {
            severe_pause_ms: 1000.0,
        }
    }
}

impl Rule for GcPauseRule {
    fn id(&self) -> &'static str {
        "GcPause"
    }

    fn name(&self) -> &'static str {
        "GC Pauses"
    }

    fn topic(&self) -> &'static str {
        "heap"
    }

    fn evaluate(&self, events: &[RecordedEvent]) -> RuleEvaluation {
        let pauses = events.iter().filter(|e| e.is("GarbageCollection"));
        match max_of(pauses, "duration") {
            Some(longest) => self.evaluation(
                scaled(longest, self.severe_pause_ms),
                format!("The longest garbage collection pause was {longest:.1} ms."),
            ),
            None => self.evaluation(
                NOT_APPLICABLE,
                "No garbage collections were recorded.".to_string(),
            ),
        }
    }
}

/// Peak heap occupancy relative to the committed heap
#[derive(Debug, Clone, Default)]
pub struct HeapUsageRule;

impl Rule for HeapUsageRule {
    fn id(&self) -> &'static str {
        "HeapUsage"
    }

    fn name(&self) -> &'static str {
        "Heap Usage"
    }

    fn topic(&self) -> &'static str {
        "heap"
    }

    fn evaluate(&self, events: &[RecordedEvent]) -> RuleEvaluation {
        let peak = events
            .iter()
            .filter(|e| e.is("GCHeapSummary"))
            .filter_map(|e| match (e.number("heapUsed"), e.number("heapCommitted")) {
                (Some(used), Some(committed)) if committed > 0.0 => Some(used / committed),
                _ => None,
            })
            .fold(None, |max: Option<f64>, ratio| Some(max.map_or(ratio, |m| m.max(ratio))));

        match peak {
            Some(ratio) => self.evaluation(
                (ratio * 100.0).clamp(0.0, 100.0),
                format!("Peak heap usage reached {:.0}% of the committed heap.", ratio * 100.0),
            ),
            None => self.evaluation(
                NOT_APPLICABLE,
                "No heap summaries were recorded.".to_string(),
            ),
        }
    }
}

/// Peak machine CPU load
#[derive(Debug, Clone, Default)]
pub struct CpuLoadRule;

impl Rule for CpuLoadRule {
    fn id(&self) -> &'static str {
        "CpuLoad"
    }

    fn name(&self) -> &'static str {
        "CPU Load"
    }

    fn topic(&self) -> &'static str {
        "cpu"
    }

    fn evaluate(&self, events: &[RecordedEvent]) -> RuleEvaluation {
        let samples = events.iter().filter(|e| e.is("CPULoad"));
        match max_of(samples, "machineTotal") {
            Some(load) => self.evaluation(
                (load * 100.0).clamp(0.0, 100.0),
                format!("Machine CPU load peaked at {:.0}%.", load * 100.0),
            ),
            None => self.evaluation(
                NOT_APPLICABLE,
                "No CPU load samples were recorded.".to_string(),
            ),
        }
    }
}

/// Volume of thrown exceptions
#[derive(Debug, Clone)]
pub struct ExceptionRateRule {
    pub severe_count: f64,
}

impl Default for ExceptionRateRule {
    fn default() -> Self {
        Self {
            severe_count: 1000.0,
        }
    }
}

impl Rule for ExceptionRateRule {
    fn id(&self) -> &'static str {
        "ExceptionRate"
    }

    fn name(&self) -> &'static str {
        "Thrown Exceptions"
    }

    fn topic(&self) -> &'static str {
        "exceptions"
    }

    fn evaluate(&self, events: &[RecordedEvent]) -> RuleEvaluation {
        if events.is_empty() {
            return self.evaluation(NOT_APPLICABLE, "The recording is empty.".to_string());
        }
        let thrown = events.iter().filter(|e| e.is("ExceptionThrown")).count();
        self.evaluation(
            scaled(thrown as f64, self.severe_count),
            format!("{thrown} exceptions were thrown."),
        )
    }
}
