//! Per-agent execution metrics.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolMetrics {
    pub total_calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub calls_by_tool: HashMap<String, u64>,
}

impl ToolMetrics {
    pub fn record_call(&mut self, tool: &str, success: bool, duration: Duration) {
        self.total_calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration_ms += duration.as_millis() as u64;
        *self.calls_by_tool.entry(tool.to_string()).or_default() += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successes as f64 / self.total_calls as f64
    }

    pub fn most_used_tool(&self) -> Option<&str> {
        self.calls_by_tool
            .iter()
            .max_by_key(|(_, count)| **count)
            .map(|(name, _)| name.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Iteration metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct IterationMetrics {
    pub total_iterations: u64,
    pub iterations_with_tools: u64,
    pub completed_early: u64,
    pub max_iterations_reached: u64,
}

impl IterationMetrics {
    pub fn record_iteration(&mut self, had_tools: bool, completed_early: bool, hit_max: bool) {
        self.total_iterations += 1;
        if had_tools {
            self.iterations_with_tools += 1;
        }
        if completed_early {
            self.completed_early += 1;
        }
        if hit_max {
            self.max_iterations_reached += 1;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize)]
pub struct LlmMetrics {
    pub total_calls: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub total_response_chars: u64,
}

impl LlmMetrics {
    pub fn record_call(&mut self, success: bool, duration: Duration, response_chars: usize) {
        self.total_calls += 1;
        if !success {
            self.failures += 1;
        }
        self.total_duration_ms += duration.as_millis() as u64;
        self.total_response_chars += response_chars as u64;
    }

    pub fn avg_call_ms(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_duration_ms as f64 / self.total_calls as f64
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregated metrics for one agent, snapshotted by the session layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub tools: ToolMetrics,
    pub iterations: IterationMetrics,
    pub llm: LlmMetrics,
    pub loop_breaks: u64,
    pub refusal_overrides: u64,
}

impl AgentMetrics {
    pub fn snapshot(&self) -> AgentMetrics {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_metrics_track_success_rate_and_top_tool() {
        let mut metrics = ToolMetrics::default();
        metrics.record_call("read_file", true, Duration::from_millis(10));
        metrics.record_call("read_file", true, Duration::from_millis(20));
        metrics.record_call("write_file", false, Duration::from_millis(5));

        assert_eq!(metrics.total_calls, 3);
        assert!((metrics.success_rate() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(metrics.most_used_tool(), Some("read_file"));
        assert_eq!(metrics.total_duration_ms, 35);
    }

    #[test]
    fn iteration_metrics_categorize() {
        let mut metrics = IterationMetrics::default();
        metrics.record_iteration(true, false, false);
        metrics.record_iteration(false, true, false);
        metrics.record_iteration(false, false, true);

        assert_eq!(metrics.total_iterations, 3);
        assert_eq!(metrics.iterations_with_tools, 1);
        assert_eq!(metrics.completed_early, 1);
        assert_eq!(metrics.max_iterations_reached, 1);
    }

    #[test]
    fn llm_metrics_average() {
        let mut metrics = LlmMetrics::default();
        assert_eq!(metrics.avg_call_ms(), 0.0);
        metrics.record_call(true, Duration::from_millis(100), 500);
        metrics.record_call(false, Duration::from_millis(300), 0);
        assert!((metrics.avg_call_ms() - 200.0).abs() < 1e-9);
        assert_eq!(metrics.failures, 1);
    }
}
