use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gust_core::prelude::{RawReport, RunnerReport, ShutdownHandle, SimulationRegistry};
use gust_reporting::{AggregateReport, ReportAggregator, ReportSink};
use serde::Serialize;

use crate::config::{GlobalConfig, SimulationConfig};
use crate::executor::Executor;
use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::runner::Runner;

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("no simulation is registered under `{name}`")]
pub struct SimulationNotFoundError {
    pub name: String,
}

#[derive(derive_more::Error, derive_more::Display, Debug)]
#[display("the simulation `{name}` is invalid: {reason}")]
pub struct InvalidSimulationError {
    pub name: String,
    pub reason: String,
}

/// The distinguished error for a simulation that exceeded its forced deadline.
#[derive(derive_more::Error, derive_more::Display, Debug, Clone)]
#[display(
    "the simulation `{simulation}` was cancelled forcefully because it exceeded the maximum \
     duration (including the {grace_period_percentage}% grace period) of {force_end_after_ms}ms"
)]
pub struct SimulationCancelled {
    pub simulation: String,
    pub grace_period_percentage: u32,
    pub force_end_after_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationStatus {
    /// The hold-for window elapsed or every runner hit its iteration cap.
    Completed,
    /// The forced deadline expired with runners still in flight.
    Cancelled,
}

/// What one simulation produced. Serialized into the batch report artifact.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationOutcome {
    pub simulation: String,
    pub status: SimulationStatus,
    /// One aggregate tree per scenario, in authored order.
    pub scenarios: Vec<AggregateReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<String>,
    /// The per-runner raw report trees the aggregates were derived from.
    /// Kept for debug exports, not part of the serialized outcome.
    #[serde(skip)]
    pub runner_reports: Vec<RunnerReport>,
}

/// Group the surviving runner reports by scenario position and flatten each
/// position's iterations across runners, in the shape the aggregator expects.
pub fn collect_scenario_iterations(
    reports: &[RunnerReport],
) -> Vec<(String, Vec<&RawReport>)> {
    let scenario_count = reports
        .iter()
        .map(|r| r.scenarios.len())
        .max()
        .unwrap_or(0);

    (0..scenario_count)
        .filter_map(|index| {
            let name = reports
                .iter()
                .find_map(|r| r.scenarios.get(index).map(|s| s.scenario_name.clone()))?;
            let iterations = reports
                .iter()
                .filter_map(|r| r.scenarios.get(index))
                .flat_map(|s| s.iterations.iter())
                .collect();
            Some((name, iterations))
        })
        .collect()
}

/// Executes simulations one at a time on a shared worker pool and hands the
/// collected raw reports to the aggregator.
pub struct Simulator {
    registry: Arc<SimulationRegistry>,
    executor: Arc<Executor>,
    max_hold_for: Duration,
    grace_period_percentage: u32,
    custom: Arc<HashMap<String, serde_yaml::Value>>,
    no_progress: bool,
    master_shutdown: ShutdownHandle,
    interrupted: Arc<AtomicBool>,
}

impl Simulator {
    pub fn new(
        registry: Arc<SimulationRegistry>,
        global: &GlobalConfig,
        custom: HashMap<String, serde_yaml::Value>,
        executor: Arc<Executor>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            registry,
            executor,
            max_hold_for: global.max_hold_for()?,
            grace_period_percentage: global.grace_period_percentage,
            custom: Arc::new(custom),
            no_progress: false,
            master_shutdown: ShutdownHandle::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_no_progress(mut self, no_progress: bool) -> Self {
        self.no_progress = no_progress;
        self
    }

    /// Stop the current and all following simulations at the next safe
    /// boundary when Ctrl-C is received.
    pub fn install_ctrl_c_handler(&self) {
        let master_shutdown = self.master_shutdown.clone();
        let interrupted = self.interrupted.clone();
        self.executor.handle().spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("Received shutdown signal, stopping runners...");
                interrupted.store(true, Ordering::SeqCst);
                master_shutdown.shutdown();
            }
        });
    }

    /// Whether Ctrl-C was received at any point during the batch.
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Execute one simulation and aggregate its results.
    ///
    /// Returns `Ok(None)` when the simulation is disabled. `Err` is reserved
    /// for pre-flight failures: an unknown or invalid provider, detected once
    /// before any runner starts so every runner does not re-report the same
    /// configuration error. A forced cancellation is not an `Err`: the
    /// outcome carries the cancellation and the partial results of runners
    /// that completed in time.
    pub fn execute(
        &self,
        config: &SimulationConfig,
        aggregator: &ReportAggregator,
        sink: Option<ReportSink>,
    ) -> anyhow::Result<Option<SimulationOutcome>> {
        if !config.enabled {
            log::info!("Simulation `{}` ignored as it is disabled", config.name);
            return Ok(None);
        }

        log::info!("Starting simulation `{}`", config.name);

        let factory =
            self.registry
                .resolve(&config.simulation)
                .ok_or_else(|| SimulationNotFoundError {
                    name: config.simulation.clone(),
                })?;

        // Pre-flight verification that the provider actually produces a
        // scenario tree before any runner starts.
        let mut probe = factory();
        if probe.scenarios().is_empty() {
            return Err(InvalidSimulationError {
                name: config.simulation.clone(),
                reason: "it defines no scenarios".to_string(),
            }
            .into());
        }

        let requested_hold_for = config.hold_for()?;
        let hold_for = if requested_hold_for > self.max_hold_for {
            log::warn!(
                "The hold-for duration {:?} exceeds the maximum allowed {:?}, the simulation \
                 will only run for {:?}",
                requested_hold_for,
                self.max_hold_for,
                self.max_hold_for
            );
            self.max_hold_for
        } else {
            requested_hold_for
        };

        // Hard ceiling for runaway user code: beyond this point runners are
        // cancelled even mid-iteration.
        let force_end_after =
            hold_for.mul_f64(1.0 + self.grace_period_percentage as f64 / 100.0);

        let shutdown = ShutdownHandle::new();
        let bridge = {
            let mut master_listener = self.master_shutdown.new_listener();
            let shutdown = shutdown.clone();
            self.executor.handle().spawn(async move {
                master_listener.wait_for_shutdown().await;
                shutdown.shutdown();
            })
        };

        if !self.no_progress {
            start_progress(&config.name, hold_for, shutdown.new_listener());
        }
        start_monitor(shutdown.new_listener());

        let publisher = sink
            .as_ref()
            .map(|s| s.register_publisher(self.executor.handle()));
        let (results_tx, mut results_rx) = tokio::sync::mpsc::unbounded_channel();

        let shared_config = Arc::new(config.clone());
        let mut join_set = tokio::task::JoinSet::new();
        for runner_id in 0..config.concurrency {
            let runner = Runner::new(
                runner_id,
                shared_config.clone(),
                factory.clone(),
                hold_for,
                publisher.clone(),
                self.custom.clone(),
                shutdown.new_listener(),
            );
            let results_tx = results_tx.clone();
            let simulation = config.name.clone();
            join_set.spawn_on(
                async move {
                    match runner.run().await {
                        Ok(report) => {
                            let _ = results_tx.send(report);
                        }
                        Err(e) => {
                            log::error!(
                                "Runner {runner_id} for simulation `{simulation}` failed: {e:?}"
                            );
                        }
                    }
                },
                self.executor.handle(),
            );
        }
        drop(results_tx);
        drop(publisher);

        let all_done = async {
            while join_set.join_next().await.is_some() {}
        };
        let cancelled = match self
            .executor
            .block_on(async { tokio::time::timeout(force_end_after, all_done).await })
        {
            Ok(()) => None,
            Err(_) => {
                shutdown.shutdown();
                join_set.abort_all();
                Some(SimulationCancelled {
                    simulation: config.name.clone(),
                    grace_period_percentage: self.grace_period_percentage,
                    force_end_after_ms: force_end_after.as_millis() as u64,
                })
            }
        };

        // Stops the progress and monitor threads after a normal completion.
        shutdown.shutdown();
        bridge.abort();

        if let Some(sink) = sink {
            self.executor.block_on(sink.close());
        }

        // Everything that finished before the deadline, cancelled or not.
        let mut runner_reports = Vec::new();
        while let Ok(report) = results_rx.try_recv() {
            runner_reports.push(report);
        }

        match &cancelled {
            Some(cancelled) => log::error!("{cancelled}"),
            None => log::info!("Simulation `{}` completed", config.name),
        }

        log::info!(
            "Simulation `{}`: generating the aggregate report from {} runner reports",
            config.name,
            runner_reports.len()
        );
        let scenarios = collect_scenario_iterations(&runner_reports)
            .into_iter()
            .filter_map(|(_, iterations)| aggregator.aggregate(&iterations))
            .collect();

        Ok(Some(SimulationOutcome {
            simulation: config.name.clone(),
            status: if cancelled.is_some() {
                SimulationStatus::Cancelled
            } else {
                SimulationStatus::Completed
            },
            scenarios,
            cancelled: cancelled.map(|c| c.to_string()),
            runner_reports,
        }))
    }
}
