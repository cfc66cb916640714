use gust_core::prelude::RawReport;
use serde::Serialize;

use crate::criteria::Criteria;

/// Cross-iteration statistical summary for one step-tree position.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateReport {
    pub step_name: String,
    /// How many raw reports contributed, i.e. iterations across all runners.
    pub iterations: usize,
    pub total_time_ms: i64,
    pub average_time_ms: i64,
    /// True if any contributing raw report did not end normally.
    pub errors_occurred: bool,
    /// True if no configured criteria matched the contributing raw reports.
    pub passed: bool,
    /// Instantaneous count of in-flight iterations for every second of the
    /// step's activity window, starting at the earliest observed start.
    pub concurrency_per_second: Vec<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<AggregateReport>,
    /// The contributing raw reports, kept only when retention is configured.
    /// Nested children are dropped to avoid storing the tree twice.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_reports: Option<Vec<RawReport>>,
}

/// Folds per-iteration raw report trees, grouped by tree position, into one
/// aggregate tree.
///
/// Correctness depends only on every raw report at the same position having
/// the same shape, which the runner guarantees by always walking the whole
/// step tree. Temporal order of the input is irrelevant.
pub struct ReportAggregator {
    criteria: Vec<Criteria>,
    retain_raw: bool,
}

impl ReportAggregator {
    pub fn new(criteria: Vec<Criteria>, retain_raw: bool) -> Self {
        Self {
            criteria,
            retain_raw,
        }
    }

    /// Aggregate all raw reports recorded for one tree position, one per
    /// iteration, flattened across runners. Returns `None` for an empty list
    /// so that a missing position contributes nothing to the parent.
    pub fn aggregate(&self, reports: &[&RawReport]) -> Option<AggregateReport> {
        let first = reports.first()?;

        let sub_steps = (0..first.children.len())
            .filter_map(|child_index| {
                let nested = reports
                    .iter()
                    .filter_map(|r| r.children.get(child_index))
                    .collect::<Vec<_>>();
                self.aggregate(&nested)
            })
            .collect();

        let total_time_ms: i64 = reports.iter().map(|r| r.duration_ms()).sum();

        Some(AggregateReport {
            step_name: first.step_name.clone(),
            iterations: reports.len(),
            total_time_ms,
            average_time_ms: total_time_ms / reports.len() as i64,
            errors_occurred: reports.iter().any(|r| !r.ended_normally),
            passed: self.criteria.iter().all(|c| !c.matches(reports)),
            concurrency_per_second: concurrency_histogram(reports),
            sub_steps,
            raw_reports: self.retain_raw.then(|| {
                reports
                    .iter()
                    .map(|r| {
                        let mut retained = (*r).clone();
                        retained.children.clear();
                        retained
                    })
                    .collect()
            }),
        })
    }
}

/// Sweep-line over the report intervals: +1 at the second a report starts,
/// -1 at the second it ends, prefix-summed across the activity window.
fn concurrency_histogram(reports: &[&RawReport]) -> Vec<u32> {
    let min_start = match reports.iter().map(|r| r.started_at_ms).min() {
        Some(v) => v,
        None => return Vec::new(),
    };
    let max_end = reports.iter().map(|r| r.ended_at_ms).max().unwrap_or(min_start);

    // Number of whole or partial seconds covered by [min_start, max_end).
    let seconds = ((max_end - min_start) as u64).div_ceil(1000) as usize;

    let mut deltas = vec![0i64; seconds + 1];
    for report in reports {
        deltas[((report.started_at_ms - min_start) / 1000) as usize] += 1;
        deltas[((report.ended_at_ms - min_start) / 1000) as usize] -= 1;
    }

    let mut histogram = Vec::with_capacity(seconds);
    let mut in_flight = 0i64;
    for delta in deltas.iter().take(seconds) {
        in_flight += delta;
        histogram.push(in_flight as u32);
    }
    histogram
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn raw(start: i64, end: i64, ok: bool, children: Vec<RawReport>) -> RawReport {
        RawReport {
            step_id: "step".to_string(),
            step_name: "step".to_string(),
            runner_id: 0,
            iteration: 0,
            started_at_ms: start,
            ended_at_ms: end,
            ended_normally: ok,
            children,
        }
    }

    fn aggregator() -> ReportAggregator {
        ReportAggregator::new(vec![Criteria::MinimumFailures(1)], false)
    }

    #[test]
    fn average_is_total_over_iterations() {
        let reports = vec![
            raw(0, 10, true, vec![]),
            raw(0, 20, true, vec![]),
            raw(0, 30, true, vec![]),
        ];
        let refs = reports.iter().collect::<Vec<_>>();

        let aggregate = aggregator().aggregate(&refs).unwrap();
        assert_eq!(aggregate.iterations, 3);
        assert_eq!(aggregate.total_time_ms, 60);
        assert_eq!(aggregate.average_time_ms, 20);
        assert!(!aggregate.errors_occurred);
        assert!(aggregate.passed);
    }

    #[test]
    fn child_count_matches_the_tree_at_every_level() {
        let iteration = || {
            raw(
                0,
                50,
                true,
                vec![
                    raw(0, 20, true, vec![raw(0, 10, true, vec![])]),
                    raw(20, 50, true, vec![]),
                ],
            )
        };
        let reports = vec![iteration(), iteration(), iteration()];
        let refs = reports.iter().collect::<Vec<_>>();

        let aggregate = aggregator().aggregate(&refs).unwrap();
        assert_eq!(aggregate.sub_steps.len(), 2);
        assert_eq!(aggregate.sub_steps[0].sub_steps.len(), 1);
        assert_eq!(aggregate.sub_steps[1].sub_steps.len(), 0);
        for sub in &aggregate.sub_steps {
            assert_eq!(sub.iterations, aggregate.iterations);
        }
    }

    #[test]
    fn empty_input_is_safe() {
        assert_eq!(aggregator().aggregate(&[]), None);
    }

    #[test]
    fn a_failing_report_sets_errors_and_fails_the_default_criteria() {
        let reports = vec![raw(0, 10, true, vec![]), raw(0, 10, false, vec![])];
        let refs = reports.iter().collect::<Vec<_>>();

        let aggregate = aggregator().aggregate(&refs).unwrap();
        assert!(aggregate.errors_occurred);
        assert!(!aggregate.passed);
    }

    #[test]
    fn histogram_matches_the_worked_example() {
        // Two iterations, active over [0s, 2s) and [1s, 3s).
        let reports = vec![raw(0, 2000, true, vec![]), raw(1000, 3000, true, vec![])];
        let refs = reports.iter().collect::<Vec<_>>();

        let aggregate = aggregator().aggregate(&refs).unwrap();
        assert_eq!(aggregate.concurrency_per_second, vec![1, 2, 1]);
    }

    #[test]
    fn histogram_offsets_against_the_earliest_start() {
        let reports = vec![
            raw(5000, 6000, true, vec![]),
            raw(5000, 8000, true, vec![]),
        ];
        let refs = reports.iter().collect::<Vec<_>>();

        let aggregate = aggregator().aggregate(&refs).unwrap();
        assert_eq!(aggregate.concurrency_per_second, vec![2, 1, 1]);
    }

    #[test]
    fn raw_reports_are_redacted_unless_retention_is_enabled() {
        let reports = vec![raw(0, 10, true, vec![raw(0, 5, true, vec![])])];
        let refs = reports.iter().collect::<Vec<_>>();

        let redacted = aggregator().aggregate(&refs).unwrap();
        assert_eq!(redacted.raw_reports, None);

        let retaining = ReportAggregator::new(vec![Criteria::MinimumFailures(1)], true);
        let retained = retaining.aggregate(&refs).unwrap();
        let kept = retained.raw_reports.unwrap();
        assert_eq!(kept.len(), 1);
        // Nested children are dropped so the tree is not stored twice.
        assert!(kept[0].children.is_empty());
        assert_eq!(
            retained.sub_steps[0].raw_reports.as_ref().unwrap().len(),
            1
        );
    }
}
