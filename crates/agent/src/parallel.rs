//! Bounded parallel tool execution.
//!
//! Multiple independent tool calls from one assistant message run
//! concurrently on a semaphore-bounded pool. Parallelism is conservative:
//! a batch qualifies only when every call is read-only, or when no write
//! targets collide and no reader touches a path written in the same batch.
//! Results always come back in the parser's call order, and a worker
//! failure becomes a failed `ToolResult` rather than poisoning the batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use sov_domain::config::AgentConfig;
use sov_domain::message::{ToolCall, ToolResult};
use sov_tools::Tool;

use crate::cancel::CancelToken;

/// Tools that never mutate state and always parallelize.
const READ_ONLY_TOOLS: &[&str] = &["read_file", "list_directory", "code_search", "git_status"];
/// Tools whose `path` parameter names a write target.
const WRITE_TOOLS: &[&str] = &["write_file", "str_replace"];

/// One executed call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub result: ToolResult,
    pub duration: Duration,
}

/// A completed batch, outcomes in original call order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub outcomes: Vec<CallOutcome>,
    pub total_duration: Duration,
    /// Σ per-call durations / wall-clock time.
    pub parallel_speedup: f64,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ParallelStats {
    pub parallel_batches: u64,
    pub total_parallel_calls: u64,
    pub total_sequential_calls: u64,
}

pub struct ParallelExecutor {
    max_workers: usize,
    call_timeout: Duration,
    stats: Mutex<ParallelStats>,
}

impl ParallelExecutor {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_workers: config.parallel_workers.max(1),
            call_timeout: Duration::from_secs(config.tool_timeout_secs),
            stats: Mutex::new(ParallelStats::default()),
        }
    }

    // ── Safety analysis ────────────────────────────────────────────

    /// Whether a batch of calls is safe to run concurrently.
    pub fn can_parallelize(calls: &[ToolCall]) -> bool {
        if calls.len() < 2 {
            return false;
        }

        if calls.iter().all(|c| READ_ONLY_TOOLS.contains(&c.name.as_str())) {
            return true;
        }

        // Two writers on one path conflict.
        let mut write_paths: Vec<&str> = Vec::new();
        for call in calls {
            if WRITE_TOOLS.contains(&call.name.as_str()) {
                if let Some(path) = call.params.get("path") {
                    if write_paths.contains(&path.as_str()) {
                        return false;
                    }
                    write_paths.push(path);
                }
            }
        }

        // A reader of a path written in the same batch must run after it.
        for call in calls {
            if READ_ONLY_TOOLS.contains(&call.name.as_str()) {
                if let Some(path) = call.params.get("path") {
                    if write_paths.contains(&path.as_str()) {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Greedy partition preserving order: a new batch starts whenever adding
    /// the next call would make the current batch unsafe.
    pub fn group_for_parallel(calls: &[ToolCall]) -> Vec<Vec<ToolCall>> {
        let mut groups: Vec<Vec<ToolCall>> = Vec::new();
        let mut current: Vec<ToolCall> = Vec::new();

        for call in calls {
            if current.is_empty() {
                current.push(call.clone());
                continue;
            }
            let mut candidate = current.clone();
            candidate.push(call.clone());
            if Self::can_parallelize(&candidate) {
                current = candidate;
            } else {
                groups.push(std::mem::take(&mut current));
                current.push(call.clone());
            }
        }
        if !current.is_empty() {
            groups.push(current);
        }
        groups
    }

    // ── Execution ──────────────────────────────────────────────────

    /// Run the batch on the worker pool. The returned outcomes line up
    /// index-for-index with `batch`; failures and timeouts inside a worker
    /// surface as failed results.
    pub async fn execute_parallel(
        &self,
        batch: Vec<(ToolCall, Arc<dyn Tool>)>,
        cancel: &CancelToken,
    ) -> BatchOutcome {
        let batch_len = batch.len();
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let call_timeout = self.call_timeout;

        let mut handles = Vec::with_capacity(batch_len);
        for (call, tool) in batch {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return CallOutcome {
                            result: ToolResult::err("executor pool shut down"),
                            duration: Duration::ZERO,
                        }
                    }
                };

                if cancel.is_cancelled() {
                    return CallOutcome {
                        result: ToolResult::err("cancelled before execution"),
                        duration: Duration::ZERO,
                    };
                }

                let call_started = Instant::now();
                let result =
                    match tokio::time::timeout(call_timeout, tool.execute(&call.params)).await {
                        Ok(result) => result,
                        Err(_) => ToolResult::err(format!(
                            "tool '{}' timed out after {}s",
                            call.name,
                            call_timeout.as_secs()
                        )),
                    };
                CallOutcome {
                    result,
                    duration: call_started.elapsed(),
                }
            }));
        }

        // Collect in original order; join_all preserves index order even
        // when workers finish out of order.
        let joined = futures_util::future::join_all(handles).await;
        let mut outcomes = Vec::with_capacity(batch_len);
        for join_result in joined {
            match join_result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => outcomes.push(CallOutcome {
                    result: ToolResult::err(format!("tool task failed: {e}")),
                    duration: Duration::ZERO,
                }),
            }
        }

        let total_duration = started.elapsed();
        let work: Duration = outcomes.iter().map(|o| o.duration).sum();
        let parallel_speedup = if total_duration.as_secs_f64() > 0.0 {
            work.as_secs_f64() / total_duration.as_secs_f64()
        } else {
            1.0
        };

        {
            let mut stats = self.stats.lock();
            stats.parallel_batches += 1;
            stats.total_parallel_calls += batch_len as u64;
        }

        tracing::debug!(
            calls = batch_len,
            wall_ms = total_duration.as_millis() as u64,
            speedup = format!("{parallel_speedup:.2}"),
            "parallel batch complete"
        );

        BatchOutcome {
            outcomes,
            total_duration,
            parallel_speedup,
        }
    }

    pub fn record_sequential(&self, count: u64) {
        self.stats.lock().total_sequential_calls += count;
    }

    pub fn stats(&self) -> ParallelStats {
        self.stats.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sov_domain::message::ToolParams;
    use sov_tools::{ParamSpec, ParamType};

    fn call(name: &str, path: &str) -> ToolCall {
        let mut params = ToolParams::new();
        params.insert("path".into(), path.into());
        ToolCall::new(name, params)
    }

    // ── can_parallelize ────────────────────────────────────────────

    #[test]
    fn single_call_never_parallelizes() {
        assert!(!ParallelExecutor::can_parallelize(&[call("read_file", "/a")]));
    }

    #[test]
    fn all_read_only_parallelizes() {
        let calls = [
            call("read_file", "/a"),
            call("read_file", "/b"),
            call("list_directory", "/c"),
        ];
        assert!(ParallelExecutor::can_parallelize(&calls));
    }

    #[test]
    fn distinct_writes_parallelize() {
        let calls = [call("write_file", "/a"), call("write_file", "/b")];
        assert!(ParallelExecutor::can_parallelize(&calls));
    }

    #[test]
    fn same_path_writes_conflict() {
        let calls = [call("write_file", "/a"), call("str_replace", "/a")];
        assert!(!ParallelExecutor::can_parallelize(&calls));
    }

    #[test]
    fn write_then_read_same_path_conflicts() {
        let calls = [call("write_file", "/a"), call("read_file", "/a")];
        assert!(!ParallelExecutor::can_parallelize(&calls));
    }

    #[test]
    fn group_splits_at_conflict() {
        let calls = vec![
            call("read_file", "/x"),
            call("write_file", "/a"),
            call("read_file", "/a"),
            call("read_file", "/y"),
        ];
        let groups = ParallelExecutor::group_for_parallel(&calls);
        // The read of /a cannot join the batch that writes /a.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);
        assert_eq!(groups[1][0].params.get("path").unwrap(), "/a");
    }

    #[test]
    fn group_keeps_order_within_and_across_batches() {
        let calls = vec![call("read_file", "/1"), call("read_file", "/2"), call("read_file", "/3")];
        let groups = ParallelExecutor::group_for_parallel(&calls);
        assert_eq!(groups.len(), 1);
        let paths: Vec<_> = groups[0]
            .iter()
            .map(|c| c.params.get("path").unwrap().clone())
            .collect();
        assert_eq!(paths, vec!["/1", "/2", "/3"]);
    }

    // ── execute_parallel ───────────────────────────────────────────

    struct SleepTool {
        millis: u64,
        label: &'static str,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            "sleep_tool"
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters(&self) -> &[ParamSpec] {
            const PARAMS: &[ParamSpec] =
                &[ParamSpec::required("path", ParamType::String, "ignored")];
            PARAMS
        }
        async fn execute(&self, _params: &ToolParams) -> ToolResult {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            if self.fail {
                ToolResult::err(format!("{} failed", self.label))
            } else {
                ToolResult::ok(self.label)
            }
        }
    }

    fn executor() -> ParallelExecutor {
        ParallelExecutor::new(&AgentConfig::default())
    }

    #[tokio::test]
    async fn batch_preserves_order_and_speeds_up() {
        let batch: Vec<(ToolCall, Arc<dyn Tool>)> = vec![
            (call("read_file", "/1"), Arc::new(SleepTool { millis: 100, label: "one", fail: false })),
            (call("read_file", "/2"), Arc::new(SleepTool { millis: 100, label: "two", fail: false })),
            (call("read_file", "/3"), Arc::new(SleepTool { millis: 100, label: "three", fail: false })),
        ];

        let outcome = executor().execute_parallel(batch, &CancelToken::new()).await;

        let outputs: Vec<_> = outcome.outcomes.iter().map(|o| o.result.output.clone()).collect();
        assert_eq!(outputs, vec!["one", "two", "three"]);
        assert!(
            outcome.parallel_speedup >= 1.5,
            "speedup was {:.2}",
            outcome.parallel_speedup
        );
    }

    #[tokio::test]
    async fn worker_failure_does_not_poison_batch() {
        let batch: Vec<(ToolCall, Arc<dyn Tool>)> = vec![
            (call("read_file", "/1"), Arc::new(SleepTool { millis: 5, label: "ok", fail: false })),
            (call("read_file", "/2"), Arc::new(SleepTool { millis: 5, label: "bad", fail: true })),
        ];

        let outcome = executor().execute_parallel(batch, &CancelToken::new()).await;
        assert!(outcome.outcomes[0].result.success);
        assert!(!outcome.outcomes[1].result.success);
    }

    #[tokio::test]
    async fn timeout_becomes_failed_result() {
        let config = AgentConfig {
            tool_timeout_secs: 0,
            ..Default::default()
        };
        // Zero-second timeout forces the slow call to expire.
        let executor = ParallelExecutor::new(&config);
        let batch: Vec<(ToolCall, Arc<dyn Tool>)> = vec![
            (call("read_file", "/slow"), Arc::new(SleepTool { millis: 200, label: "slow", fail: false })),
            (call("read_file", "/slow2"), Arc::new(SleepTool { millis: 200, label: "slow2", fail: false })),
        ];

        let outcome = executor.execute_parallel(batch, &CancelToken::new()).await;
        for o in &outcome.outcomes {
            assert!(!o.result.success);
            assert!(o.result.error.as_ref().unwrap().contains("timed out"));
        }
    }

    #[tokio::test]
    async fn cancelled_batch_reports_per_call_failures() {
        let cancel = CancelToken::new();
        cancel.cancel();

        let batch: Vec<(ToolCall, Arc<dyn Tool>)> = vec![(
            call("read_file", "/1"),
            Arc::new(SleepTool { millis: 50, label: "x", fail: false }),
        ), (
            call("read_file", "/2"),
            Arc::new(SleepTool { millis: 50, label: "y", fail: false }),
        )];

        let outcome = executor().execute_parallel(batch, &cancel).await;
        assert!(outcome.outcomes.iter().all(|o| !o.result.success));
    }
}
