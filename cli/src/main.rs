use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gust_core::prelude::{now_ms, SimulationRegistry};
use gust_reporting::{
    print_summary, Criteria, CriteriaParseError, JsonlWriter, ReportAggregator, ReportExporter,
    ReportSink, UnknownExportFormatError,
};
use gust_runner::prelude::{
    collect_scenario_iterations, load_config, pool_size, Executor, InvalidConfigError,
    InvalidSimulationError, SimulationConfig, SimulationNotFoundError, SimulationOutcome,
    SimulationStatus, Simulator,
};

/// Runs load simulations described by a configuration file and exports the
/// aggregated reports.
#[derive(Parser)]
#[command(name = "gust", version)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Only run the simulations with these names.
    #[arg(short, long)]
    simulation: Vec<String>,

    /// Disable the per-simulation progress bar.
    #[arg(long)]
    no_progress: bool,
}

/// A failure while persisting reports, distinct from a failed run.
#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("{reason}")]
struct ReportingError {
    reason: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(e: &anyhow::Error) -> i32 {
    if e.downcast_ref::<InvalidConfigError>().is_some()
        || e.downcast_ref::<CriteriaParseError>().is_some()
    {
        3
    } else if e.downcast_ref::<SimulationNotFoundError>().is_some() {
        5
    } else if e.downcast_ref::<InvalidSimulationError>().is_some() {
        6
    } else if e.downcast_ref::<UnknownExportFormatError>().is_some()
        || e.downcast_ref::<ReportingError>().is_some()
    {
        7
    } else {
        1
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli.config)?;
    let criteria = Criteria::parse_all(&config.fail_when)?;
    let exporter = ReportExporter::from_config(
        &config.reporting.export_formats,
        &config.reporting.export_directory_path,
    )?;

    let mut registry = SimulationRegistry::new();
    gust_sample_simulations::register_all(&mut registry);
    let registry = Arc::new(registry);

    let simulations = config
        .simulations
        .iter()
        .filter(|s| cli.simulation.is_empty() || cli.simulation.contains(&s.name))
        .cloned()
        .collect::<Vec<_>>();
    if simulations.is_empty() {
        return Err(InvalidConfigError {
            path: cli.config.display().to_string(),
            reason: if cli.simulation.is_empty() {
                "it defines no simulations".to_string()
            } else {
                format!(
                    "it defines none of the selected simulations ({})",
                    cli.simulation.join(", ")
                )
            },
        }
        .into());
    }

    validate_providers(&registry, &simulations)?;

    let executor = Arc::new(Executor::new(pool_size(&simulations))?);
    let simulator = Simulator::new(
        registry,
        &config.engine,
        config.custom.clone(),
        executor,
    )?
    .with_no_progress(cli.no_progress);
    simulator.install_ctrl_c_handler();

    let aggregator = ReportAggregator::new(criteria, config.reporting.include_raw_report);

    let mut outcomes = Vec::new();
    for simulation in &simulations {
        let sink = if simulation.enabled {
            let path = config
                .reporting
                .export_directory_path
                .join(format!("{}-raw-{}.jsonl", simulation.name, now_ms()));
            let writer = JsonlWriter::create(&path).map_err(|e| ReportingError {
                reason: format!("failed to open the raw report sink {}: {e:#}", path.display()),
            })?;
            Some(ReportSink::new(writer, config.reporting.batch_size))
        } else {
            None
        };

        let Some(outcome) = simulator.execute(simulation, &aggregator, sink)? else {
            continue;
        };

        print_summary(&outcome.simulation, &outcome.scenarios);

        if config.debugging.export_raw_report {
            exporter.export_debug(&outcome.simulation, "raw", &outcome.runner_reports);
        }
        if config.debugging.export_transformed_raw_report {
            let transformed = collect_scenario_iterations(&outcome.runner_reports);
            exporter.export_debug(&outcome.simulation, "transformed-raw", &transformed);
        }

        outcomes.push(outcome);

        if simulator.interrupted() {
            log::warn!("Stopping the batch, a shutdown was requested");
            break;
        }
    }

    let exported = exporter.export_aggregate(&outcomes).map_err(|e| ReportingError {
        reason: format!("failed to export the aggregate report: {e:#}"),
    })?;
    for path in exported {
        println!("Exported {}", path.display());
    }

    Ok(final_exit_code(simulator.interrupted(), &outcomes))
}

/// Instantiate every enabled provider and check it yields scenarios, before
/// any simulation starts. A typo or a broken provider in the last simulation
/// must not surface after the first ones already ran.
fn validate_providers(
    registry: &SimulationRegistry,
    simulations: &[SimulationConfig],
) -> anyhow::Result<()> {
    for simulation in simulations.iter().filter(|s| s.enabled) {
        let factory =
            registry
                .resolve(&simulation.simulation)
                .ok_or_else(|| SimulationNotFoundError {
                    name: simulation.simulation.clone(),
                })?;
        let mut probe = factory();
        if probe.scenarios().is_empty() {
            return Err(InvalidSimulationError {
                name: simulation.simulation.clone(),
                reason: "it defines no scenarios".to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Failed criteria show up in the report as `passed = false`, not as a
/// non-zero exit. Only a cancellation or an interruption changes the code.
fn final_exit_code(interrupted: bool, outcomes: &[SimulationOutcome]) -> i32 {
    let cancelled = interrupted
        || outcomes
            .iter()
            .any(|o| o.status == SimulationStatus::Cancelled);
    if cancelled {
        4
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gust_core::prelude::{Simulation, Step};

    struct Empty;

    impl Simulation for Empty {
        fn scenarios(&mut self) -> Vec<Step> {
            Vec::new()
        }
    }

    struct Single;

    impl Simulation for Single {
        fn scenarios(&mut self) -> Vec<Step> {
            vec![Step::group("root", vec![Step::check("ok", |_| true)])]
        }
    }

    fn registry() -> SimulationRegistry {
        let mut registry = SimulationRegistry::new();
        registry.register("test.empty", || Empty);
        registry.register("test.single", || Single);
        registry
    }

    fn simulation(provider: &str, enabled: bool) -> SimulationConfig {
        SimulationConfig {
            name: format!("{provider}-run"),
            simulation: provider.to_string(),
            concurrency: 1,
            throughput: None,
            iterations: None,
            hold_for: "1s".to_string(),
            enabled,
        }
    }

    #[test]
    fn validation_accepts_registered_providers_with_scenarios() {
        let simulations = vec![simulation("test.single", true)];
        assert!(validate_providers(&registry(), &simulations).is_ok());
    }

    #[test]
    fn validation_rejects_unknown_providers() {
        let simulations = vec![simulation("test.single", true), simulation("test.missing", true)];
        let err = validate_providers(&registry(), &simulations).unwrap_err();
        assert!(err.downcast_ref::<SimulationNotFoundError>().is_some());
    }

    #[test]
    fn validation_rejects_scenarioless_providers() {
        let simulations = vec![simulation("test.empty", true)];
        let err = validate_providers(&registry(), &simulations).unwrap_err();
        assert!(err.downcast_ref::<InvalidSimulationError>().is_some());
    }

    #[test]
    fn disabled_simulations_are_not_validated() {
        let simulations = vec![simulation("test.missing", false), simulation("test.empty", false)];
        assert!(validate_providers(&registry(), &simulations).is_ok());
    }

    fn outcome(status: SimulationStatus) -> SimulationOutcome {
        SimulationOutcome {
            simulation: "s".to_string(),
            status,
            scenarios: Vec::new(),
            cancelled: None,
            runner_reports: Vec::new(),
        }
    }

    #[test]
    fn a_cancelled_simulation_sets_the_exit_code() {
        let outcomes = vec![
            outcome(SimulationStatus::Completed),
            outcome(SimulationStatus::Cancelled),
        ];
        assert_eq!(final_exit_code(false, &outcomes), 4);
        assert_eq!(final_exit_code(true, &[]), 4);
    }

    #[test]
    fn a_completed_run_exits_zero_even_when_criteria_failed() {
        // Criteria failures live in the report, not the exit code.
        let outcomes = vec![outcome(SimulationStatus::Completed)];
        assert_eq!(final_exit_code(false, &outcomes), 0);
    }
}
