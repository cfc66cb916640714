use serde::{Deserialize, Serialize};

use crate::time::now_ms;

/// Timing and outcome record for one step of one iteration of one runner.
///
/// Created when the step begins executing and sealed when it ends. Owned
/// exclusively by the runner until it is handed to the aggregator or the sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawReport {
    pub step_id: String,
    pub step_name: String,
    pub runner_id: usize,
    pub iteration: u64,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub ended_normally: bool,
    /// Child reports in tree order. Empty for leaf steps.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RawReport>,
}

impl RawReport {
    /// Start a report for a step that is about to execute.
    pub fn begin(step_id: &str, step_name: &str, runner_id: usize, iteration: u64) -> Self {
        Self {
            step_id: step_id.to_string(),
            step_name: step_name.to_string(),
            runner_id,
            iteration,
            started_at_ms: now_ms(),
            ended_at_ms: 0,
            ended_normally: true,
            children: Vec::new(),
        }
    }

    /// Record the end timestamp. Called exactly once, when the step finishes.
    pub fn seal(&mut self) {
        self.ended_at_ms = now_ms();
    }

    pub fn duration_ms(&self) -> i64 {
        self.ended_at_ms - self.started_at_ms
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// All iterations of one scenario executed by one runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario_name: String,
    /// One root report per iteration, in iteration order.
    pub iterations: Vec<RawReport>,
}

/// Everything one runner produced, returned from [`run`](crate::prelude) when
/// its iteration loop exits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerReport {
    pub runner_id: usize,
    pub simulation: String,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub ended_normally: bool,
    pub scenarios: Vec<ScenarioReport>,
}
