mod config;
mod executor;
mod monitor;
mod progress;
mod runner;
mod scheduler;

pub mod prelude {
    pub use crate::config::{
        load_config, DebuggingConfig, EngineConfig, GlobalConfig, InvalidConfigError,
        ReportingConfig, SimulationConfig,
    };
    pub use crate::executor::{pool_size, Executor};
    pub use crate::runner::Runner;
    pub use crate::scheduler::{
        collect_scenario_iterations, InvalidSimulationError, SimulationCancelled,
        SimulationNotFoundError, SimulationOutcome, SimulationStatus, Simulator,
    };
}
