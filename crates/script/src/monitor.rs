//! Execution monitoring for fragment evaluation
//!
//! Records a trace entry for every namespace built, fragment evaluated and
//! function invoked, and keeps running counters. The sandbox shares one
//! monitor across requests; tests read the counters to prove that a rejected
//! task never reached the interpreter.

use crate::error::Result;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

/// Execution trace entry
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub id: Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: TraceEventType,
    pub subject: String,
    pub data: JsonValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
}

/// Types of trace events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventType {
    NamespaceCreated,
    FragmentEvaluated,
    FunctionInvoked,
    Failed,
}

/// Running counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub namespaces: u64,
    pub evaluations: u64,
    pub invocations: u64,
    pub failures: u64,
}

/// Execution monitor shared by every interpreter of a sandbox
pub struct ExecutionMonitor {
    traces: Mutex<VecDeque<TraceEntry>>,
    stats: Mutex<ExecutionStats>,
    max_traces: usize,
}

impl Default for ExecutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionMonitor {
    pub fn new() -> Self {
        Self::with_max_traces(1000)
    }

    pub fn with_max_traces(max_traces: usize) -> Self {
        Self {
            traces: Mutex::new(VecDeque::new()),
            stats: Mutex::new(ExecutionStats::default()),
            max_traces,
        }
    }

    /// A fresh namespace was built for an execution
    pub fn record_namespace(&self, subject: &str, bindings: usize) {
        self.stats.lock().namespaces += 1;
        self.add_trace(
            TraceEventType::NamespaceCreated,
            subject,
            serde_json::json!({ "bindings": bindings }),
            None,
        );
    }

    pub fn record_evaluation(&self, fragment: &str, duration: Duration, result: &Result<Value>) {
        self.stats.lock().evaluations += 1;
        self.record_outcome(TraceEventType::FragmentEvaluated, fragment, duration, result);
    }

    pub fn record_invocation(&self, function: &str, duration: Duration, result: &Result<Value>) {
        self.stats.lock().invocations += 1;
        self.record_outcome(TraceEventType::FunctionInvoked, function, duration, result);
    }

    fn record_outcome(
        &self,
        event_type: TraceEventType,
        subject: &str,
        duration: Duration,
        result: &Result<Value>,
    ) {
        let (event_type, data) = match result {
            Ok(_) => (event_type, serde_json::json!({ "success": true })),
            Err(err) => {
                self.stats.lock().failures += 1;
                (
                    TraceEventType::Failed,
                    serde_json::json!({ "success": false, "error": err.to_string() }),
                )
            }
        };
        self.add_trace(event_type, subject, data, Some(duration));
    }

    fn add_trace(
        &self,
        event_type: TraceEventType,
        subject: &str,
        data: JsonValue,
        duration: Option<Duration>,
    ) {
        let mut traces = self.traces.lock();
        traces.push_back(TraceEntry {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            subject: subject.to_string(),
            data,
            duration_ms: duration.map(|d| d.as_millis()),
        });

        // Keep only the most recent traces
        while traces.len() > self.max_traces {
            traces.pop_front();
        }
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats.lock().clone()
    }

    /// Most recent traces, oldest first
    pub fn recent_traces(&self, limit: usize) -> Vec<TraceEntry> {
        let traces = self.traces.lock();
        let skip = traces.len().saturating_sub(limit);
        traces.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&self) {
        self.traces.lock().clear();
        *self.stats.lock() = ExecutionStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptError;

    #[test]
    fn test_counters_track_outcomes() {
        let monitor = ExecutionMonitor::new();
        monitor.record_namespace("task", 12);
        monitor.record_evaluation("tokenizer", Duration::from_millis(1), &Ok(Value::Null));
        monitor.record_evaluation(
            "model",
            Duration::from_millis(1),
            &Err(ScriptError::execution("boom")),
        );
        monitor.record_invocation("custom_function", Duration::ZERO, &Ok(Value::Int(1)));

        assert_eq!(
            monitor.stats(),
            ExecutionStats {
                namespaces: 1,
                evaluations: 2,
                invocations: 1,
                failures: 1,
            }
        );
        let traces = monitor.recent_traces(10);
        assert_eq!(traces.len(), 4);
        assert_eq!(traces[2].event_type, TraceEventType::Failed);
        assert_eq!(traces[2].subject, "model");
    }

    #[test]
    fn test_trace_buffer_is_bounded() {
        let monitor = ExecutionMonitor::with_max_traces(3);
        for i in 0..5 {
            monitor.record_namespace(&format!("run-{}", i), 0);
        }
        let traces = monitor.recent_traces(10);
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].subject, "run-2");
        assert_eq!(monitor.stats().namespaces, 5);
    }
}
