use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::aggregate::AggregateReport;

#[derive(Tabled)]
struct StepRow {
    step: String,
    iterations: usize,
    total_time_ms: i64,
    average_time_ms: i64,
    errors: bool,
    passed: bool,
}

fn push_rows(report: &AggregateReport, depth: usize, rows: &mut Vec<StepRow>) {
    rows.push(StepRow {
        step: format!("{}{}", "  ".repeat(depth), report.step_name),
        iterations: report.iterations,
        total_time_ms: report.total_time_ms,
        average_time_ms: report.average_time_ms,
        errors: report.errors_occurred,
        passed: report.passed,
    });
    for sub in &report.sub_steps {
        push_rows(sub, depth + 1, rows);
    }
}

/// Print the aggregate tree of one scenario as a table, depth-first with
/// children indented under their group.
pub fn print_summary(simulation: &str, scenarios: &[AggregateReport]) {
    println!("\nSummary for simulation `{simulation}`");
    let mut rows = Vec::new();
    for scenario in scenarios {
        push_rows(scenario, 0, &mut rows);
    }

    let mut table = Table::new(rows);
    table.with(Style::modern());

    println!("{table}");
}
