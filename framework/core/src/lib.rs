mod report;
mod session;
mod shutdown;
mod simulation;
mod step;
mod time;

pub mod prelude {
    pub use crate::report::{RawReport, RunnerReport, ScenarioReport};
    pub use crate::session::Session;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle};
    pub use crate::simulation::{HookResult, Simulation, SimulationFactory, SimulationRegistry};
    pub use crate::step::{CheckFn, ExecFn, Step, StepKind};
    pub use crate::time::{now_ms, parse_duration};
}
