use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gust_core::prelude::{ShutdownHandle, Simulation, SimulationFactory, Step};
use gust_runner::prelude::{Runner, SimulationConfig};

fn config(iterations: Option<u64>, throughput: Option<u32>) -> Arc<SimulationConfig> {
    Arc::new(SimulationConfig {
        name: "test".to_string(),
        simulation: "test.sim".to_string(),
        concurrency: 1,
        throughput,
        iterations,
        hold_for: "10s".to_string(),
        enabled: true,
    })
}

fn runner(config: Arc<SimulationConfig>, factory: SimulationFactory) -> (Runner, ShutdownHandle) {
    let shutdown = ShutdownHandle::new();
    let runner = Runner::new(
        0,
        config,
        factory,
        Duration::from_secs(10),
        None,
        Arc::new(HashMap::new()),
        shutdown.new_listener(),
    );
    // The handle is returned so callers keep the shutdown channel open for
    // the duration of the run; dropping it reads as a shutdown request.
    (runner, shutdown)
}

struct FailThenRecord {
    after: Arc<AtomicUsize>,
}

impl Simulation for FailThenRecord {
    fn scenarios(&mut self) -> Vec<Step> {
        let after = self.after.clone();
        vec![Step::group(
            "flow",
            vec![
                Step::exec("boom", |_| anyhow::bail!("boom")),
                Step::exec("after", move |_| {
                    after.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            ],
        )]
    }
}

#[tokio::test]
async fn a_failing_step_does_not_abort_its_siblings() {
    let after = Arc::new(AtomicUsize::new(0));
    let factory: SimulationFactory = {
        let after = after.clone();
        Arc::new(move || Box::new(FailThenRecord { after: after.clone() }))
    };

    let (runner, _shutdown) = runner(config(Some(1), None), factory);
    let report = runner.run().await.unwrap();

    // The sibling of the failing step still ran.
    assert_eq!(after.load(Ordering::SeqCst), 1);

    let iteration = &report.scenarios[0].iterations[0];
    assert!(!iteration.ended_normally);
    assert!(!iteration.children[0].ended_normally);
    assert!(iteration.children[1].ended_normally);
    assert!(!report.ended_normally);
}

struct Counting {
    executions: Arc<AtomicUsize>,
}

impl Simulation for Counting {
    fn scenarios(&mut self) -> Vec<Step> {
        let executions = self.executions.clone();
        vec![Step::exec("count", move |_| {
            executions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })]
    }
}

fn counting_factory(executions: Arc<AtomicUsize>) -> SimulationFactory {
    Arc::new(move || {
        Box::new(Counting {
            executions: executions.clone(),
        })
    })
}

#[tokio::test]
async fn the_iteration_cap_is_honoured() {
    let executions = Arc::new(AtomicUsize::new(0));
    let (runner, _shutdown) = runner(config(Some(3), None), counting_factory(executions.clone()));
    let report = runner.run().await.unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 3);
    assert_eq!(report.scenarios[0].iterations.len(), 3);
    assert!(report.ended_normally);
}

#[tokio::test]
async fn throughput_throttling_spaces_out_iterations() {
    let executions = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let (runner, _shutdown) = runner(
        config(Some(3), Some(5)),
        counting_factory(executions.clone()),
    );
    let report = runner.run().await.unwrap();
    let elapsed = start.elapsed();

    // Three iterations at 5/s means the third may not start before 400ms.
    assert_eq!(report.scenarios[0].iterations.len(), 3);
    assert!(
        elapsed >= Duration::from_millis(300),
        "ran unthrottled in {elapsed:?}"
    );
    assert!(elapsed < Duration::from_secs(2), "over-throttled: {elapsed:?}");
}

#[tokio::test]
async fn leaf_reports_are_streamed_while_running() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let executions = Arc::new(AtomicUsize::new(0));

    let report = Runner::new(
        0,
        config(Some(2), None),
        counting_factory(executions),
        Duration::from_secs(10),
        Some(tx),
        Arc::new(HashMap::new()),
        ShutdownHandle::new().new_listener(),
    )
    .run()
    .await
    .unwrap();

    let mut streamed = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        streamed.push(raw);
    }

    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[0].step_name, "count");
    assert_eq!(streamed, report.scenarios[0].iterations);
}

#[tokio::test]
async fn shutdown_prevents_new_iterations() {
    let executions = Arc::new(AtomicUsize::new(0));
    let shutdown = ShutdownHandle::new();
    let listener = shutdown.new_listener();
    shutdown.shutdown();

    let report = Runner::new(
        0,
        config(None, None),
        counting_factory(executions.clone()),
        Duration::from_secs(10),
        None,
        Arc::new(HashMap::new()),
        listener,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(executions.load(Ordering::SeqCst), 0);
    assert_eq!(report.scenarios.len(), 1);
    assert!(report.scenarios[0].iterations.is_empty());
}

struct TwoScenarios {
    first: Arc<AtomicUsize>,
    second: Arc<AtomicUsize>,
}

impl Simulation for TwoScenarios {
    fn scenarios(&mut self) -> Vec<Step> {
        let first = self.first.clone();
        let second = self.second.clone();
        vec![
            Step::group(
                "one",
                vec![Step::exec("first", move |_| {
                    first.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })],
            ),
            Step::group(
                "two",
                vec![Step::exec("second", move |_| {
                    second.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })],
            ),
        ]
    }
}

#[tokio::test]
async fn every_scenario_shares_the_hold_for_window() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let factory: SimulationFactory = {
        let first = first.clone();
        let second = second.clone();
        Arc::new(move || {
            Box::new(TwoScenarios {
                first: first.clone(),
                second: second.clone(),
            })
        })
    };

    // Bounded by hold-for only. Interleaved execution means the second
    // scenario iterates even though the first alone could fill the window.
    let report = Runner::new(
        0,
        config(None, None),
        factory,
        Duration::from_millis(300),
        None,
        Arc::new(HashMap::new()),
        ShutdownHandle::new().new_listener(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.scenarios.len(), 2);
    let one = &report.scenarios[0].iterations;
    let two = &report.scenarios[1].iterations;
    assert!(!one.is_empty());
    assert!(!two.is_empty(), "second scenario never iterated");
    assert_eq!(one.len(), two.len());
    assert_eq!(second.load(Ordering::SeqCst), two.len());
}

#[derive(Default)]
struct HookCounts {
    before_simulation: AtomicUsize,
    after_simulation: AtomicUsize,
    before_scenario: AtomicUsize,
    after_scenario: AtomicUsize,
    before_iteration: AtomicUsize,
    after_iteration: AtomicUsize,
}

struct Hooked {
    counts: Arc<HookCounts>,
}

impl Simulation for Hooked {
    fn scenarios(&mut self) -> Vec<Step> {
        vec![Step::exec("noop", |_| Ok(()))]
    }

    fn before_simulation(&mut self) -> anyhow::Result<()> {
        self.counts.before_simulation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_simulation(&mut self) -> anyhow::Result<()> {
        self.counts.after_simulation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn before_scenario(&mut self, _scenario: &str) -> anyhow::Result<()> {
        self.counts.before_scenario.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_scenario(&mut self, _scenario: &str) -> anyhow::Result<()> {
        self.counts.after_scenario.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn before_iteration(&mut self, _scenario: &str, _iteration: u64) -> anyhow::Result<()> {
        self.counts.before_iteration.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn after_iteration(&mut self, _scenario: &str, _iteration: u64) -> anyhow::Result<()> {
        self.counts.after_iteration.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn lifecycle_hooks_fire_on_the_host_instance_only() {
    let counts = Arc::new(HookCounts::default());
    let factory: SimulationFactory = {
        let counts = counts.clone();
        Arc::new(move || Box::new(Hooked { counts: counts.clone() }))
    };

    let (runner, _shutdown) = runner(config(Some(3), None), factory);
    runner.run().await.unwrap();

    // One host instance plus one fresh instance per iteration were created,
    // but only the host sees the hooks: once per simulation and scenario,
    // once per iteration for the iteration hooks.
    assert_eq!(counts.before_simulation.load(Ordering::SeqCst), 1);
    assert_eq!(counts.after_simulation.load(Ordering::SeqCst), 1);
    assert_eq!(counts.before_scenario.load(Ordering::SeqCst), 1);
    assert_eq!(counts.after_scenario.load(Ordering::SeqCst), 1);
    assert_eq!(counts.before_iteration.load(Ordering::SeqCst), 3);
    assert_eq!(counts.after_iteration.load(Ordering::SeqCst), 3);
}
