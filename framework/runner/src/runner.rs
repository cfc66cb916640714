use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gust_core::prelude::{
    now_ms, DelegatedShutdownListener, RawReport, RunnerReport, ScenarioReport, Session,
    SimulationFactory, Step, StepKind,
};
use tokio::sync::mpsc;

use crate::config::SimulationConfig;

/// One concurrency slot of a simulation.
///
/// A runner repeatedly instantiates a fresh simulation, walks each of its
/// scenario trees, records outcomes and self-throttles to the configured
/// throughput. It stops
/// starting new iterations once the hold-for deadline passes, the iteration
/// cap is reached or shutdown is requested, then returns its sealed report.
pub struct Runner {
    runner_id: usize,
    config: Arc<SimulationConfig>,
    factory: SimulationFactory,
    hold_for: Duration,
    start_delay: Duration,
    publisher: Option<mpsc::Sender<RawReport>>,
    custom: Arc<HashMap<String, serde_yaml::Value>>,
    shutdown: DelegatedShutdownListener,
    tag: String,
}

impl Runner {
    pub fn new(
        runner_id: usize,
        config: Arc<SimulationConfig>,
        factory: SimulationFactory,
        hold_for: Duration,
        publisher: Option<mpsc::Sender<RawReport>>,
        custom: Arc<HashMap<String, serde_yaml::Value>>,
        shutdown: DelegatedShutdownListener,
    ) -> Self {
        let tag = format!("Simulation `{}` : Runner {}", config.name, runner_id);
        Self {
            runner_id,
            config,
            factory,
            hold_for,
            start_delay: Duration::ZERO,
            publisher,
            custom,
            shutdown,
            tag,
        }
    }

    /// Delay the first iteration, for staggered ramp-up.
    pub fn with_start_delay(mut self, start_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self
    }

    pub async fn run(mut self) -> anyhow::Result<RunnerReport> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        log::debug!("{} : started", self.tag);

        let started_at = now_ms();
        // Time after which no new iterations will be started.
        let deadline = started_at + self.hold_for.as_millis() as i64;

        // The host instance owns the lifecycle hooks and fixes the scenario
        // layout. The trees that actually execute come from a fresh instance
        // every iteration so no state leaks between iterations.
        let mut host = (self.factory)();
        let scenario_names = host
            .scenarios()
            .iter()
            .map(|s| s.name().to_string())
            .collect::<Vec<_>>();

        if let Err(e) = host.before_simulation() {
            log::warn!("{} : before_simulation hook failed: {e:?}", self.tag);
        }
        for scenario_name in &scenario_names {
            if let Err(e) = host.before_scenario(scenario_name) {
                log::warn!("{} : before_scenario hook failed: {e:?}", self.tag);
            }
        }

        let mut report = RunnerReport {
            runner_id: self.runner_id,
            simulation: self.config.name.clone(),
            started_at_ms: started_at,
            ended_at_ms: 0,
            ended_normally: true,
            scenarios: Vec::with_capacity(scenario_names.len()),
        };

        // Every scenario root executes once per iteration, interleaved, so
        // they all share the hold-for window instead of the first scenario
        // consuming it.
        let mut per_scenario: Vec<Vec<RawReport>> = vec![Vec::new(); scenario_names.len()];
        let mut iteration: u64 = 0;
        while now_ms() <= deadline
            && self.config.iterations.map_or(true, |cap| iteration < cap)
            && !self.shutdown.should_shutdown()
        {
            self.maintain_throughput(started_at, iteration).await;

            let mut fresh = (self.factory)();
            let scenarios = fresh.scenarios();
            if scenarios.len() != scenario_names.len() {
                log::error!(
                    "{} : the simulation produced {} scenarios but {} were expected",
                    self.tag,
                    scenarios.len(),
                    scenario_names.len()
                );
                report.ended_normally = false;
                break;
            }

            let mut session = Session::new(self.custom.clone());
            for (scenario_index, scenario) in scenarios.iter().enumerate() {
                let scenario_name = &scenario_names[scenario_index];
                if let Err(e) = host.before_iteration(scenario_name, iteration) {
                    log::warn!("{} : before_iteration hook failed: {e:?}", self.tag);
                }

                let iteration_report = self.execute_step(&mut session, scenario, iteration);
                if !iteration_report.ended_normally {
                    report.ended_normally = false;
                }
                per_scenario[scenario_index].push(iteration_report);

                if let Err(e) = host.after_iteration(scenario_name, iteration) {
                    log::warn!("{} : after_iteration hook failed: {e:?}", self.tag);
                }
            }

            iteration += 1;
        }

        for (scenario_name, iterations) in scenario_names.iter().zip(per_scenario) {
            report.scenarios.push(ScenarioReport {
                scenario_name: scenario_name.clone(),
                iterations,
            });
        }

        for scenario_name in &scenario_names {
            if let Err(e) = host.after_scenario(scenario_name) {
                log::warn!("{} : after_scenario hook failed: {e:?}", self.tag);
            }
        }
        if let Err(e) = host.after_simulation() {
            log::warn!("{} : after_simulation hook failed: {e:?}", self.tag);
        }

        report.ended_at_ms = now_ms();
        log::debug!("{} : ended", self.tag);

        Ok(report)
    }

    /// Execute one step and all of its children, recursively.
    ///
    /// A failure in one step never aborts its siblings: the whole tree is
    /// always walked to completion so every iteration's report has the same
    /// shape, which aggregation depends on. Leaf reports are published to the
    /// sink the moment they are sealed.
    fn execute_step(&self, session: &mut Session, step: &Step, iteration: u64) -> RawReport {
        let mut report = RawReport::begin(step.id(), step.name(), self.runner_id, iteration);

        match step.kind() {
            StepKind::Exec(f) => {
                if let Err(e) = f(session) {
                    log::debug!("{} : step `{}` failed: {e:?}", self.tag, step.name());
                    report.ended_normally = false;
                }
            }
            StepKind::Check(predicate) => {
                if !predicate(session) {
                    log::debug!("{} : check `{}` failed", self.tag, step.name());
                    report.ended_normally = false;
                }
            }
            StepKind::Group(children) => {
                for child in children {
                    let child_report = self.execute_step(session, child, iteration);
                    report.ended_normally &= child_report.ended_normally;
                    report.children.push(child_report);
                }
            }
        }

        report.seal();
        if step.is_leaf() {
            self.publish(&report);
        }
        report
    }

    fn publish(&self, report: &RawReport) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        if let Err(e) = publisher.try_send(report.clone()) {
            log::warn!("{} : dropping a raw report for the sink: {e}", self.tag);
        }
    }

    /// Sleep long enough to keep the observed throughput at or below the
    /// configured maximum. Sampled once per iteration boundary, so drift
    /// within one iteration's duration is accepted.
    async fn maintain_throughput(&self, started_at_ms: i64, iteration: u64) {
        let Some(max_throughput) = self.config.throughput else {
            return;
        };
        if iteration == 0 {
            return;
        }

        let elapsed = (now_ms() - started_at_ms) as f64 / 1000.0;
        let current = iteration as f64 / elapsed;
        if current > max_throughput as f64 {
            let wait = iteration as f64 / max_throughput as f64 - elapsed;
            if wait > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            }
        }
    }
}
