//! Self-contained demonstration simulations, registered under the
//! `sample.*` provider identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use gust_core::prelude::{Simulation, SimulationRegistry, Step};

const DEFAULT_FIBONACCI_DEPTH: u64 = 30;

/// A CPU-bound simulation: compute a Fibonacci number, stash it in the
/// session and verify it in a separate check step. The depth can be tuned
/// with the `fibonacci-depth` custom configuration value.
pub struct FibonacciSimulation;

impl Simulation for FibonacciSimulation {
    fn scenarios(&mut self) -> Vec<Step> {
        vec![Step::group(
            "fibonacci",
            vec![
                Step::exec("compute", |session| {
                    let depth = session
                        .custom("fibonacci-depth")
                        .and_then(|v| v.as_u64())
                        .unwrap_or(DEFAULT_FIBONACCI_DEPTH);
                    session.put("fibonacci", fibonacci(depth));
                    Ok(())
                }),
                Step::check("verify", |session| {
                    session.get::<u64>("fibonacci").is_some_and(|&n| n > 0)
                }),
            ],
        )]
    }

    fn before_simulation(&mut self) -> anyhow::Result<()> {
        log::info!("Warming up the Fibonacci simulation");
        Ok(())
    }
}

fn fibonacci(depth: u64) -> u64 {
    let (mut previous, mut current) = (0u64, 1u64);
    for _ in 0..depth {
        let next = previous.wrapping_add(current);
        previous = current;
        current = next;
    }
    previous
}

/// A simulation that fails every third execution, useful for exercising
/// fail-when criteria without an unreliable external dependency.
pub struct FlakySimulation;

static FLAKY_EXECUTIONS: AtomicU64 = AtomicU64::new(0);

impl Simulation for FlakySimulation {
    fn scenarios(&mut self) -> Vec<Step> {
        vec![Step::group(
            "flaky",
            vec![Step::exec("maybe-fail", |_| {
                let execution = FLAKY_EXECUTIONS.fetch_add(1, Ordering::Relaxed);
                if execution % 3 == 2 {
                    anyhow::bail!("scripted failure on execution {execution}");
                }
                Ok(())
            })],
        )]
    }
}

pub fn register_all(registry: &mut SimulationRegistry) {
    registry.register("sample.fibonacci", || FibonacciSimulation);
    registry.register("sample.flaky", || FlakySimulation);
}
