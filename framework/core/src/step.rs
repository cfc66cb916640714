use std::fmt;
use std::sync::Arc;

use nanoid::nanoid;

use crate::session::Session;

/// User code run against the iteration's session. Any error fails the step.
pub type ExecFn = Arc<dyn Fn(&mut Session) -> anyhow::Result<()> + Send + Sync>;

/// A predicate over the session. Returning `false` is a semantic failure of
/// the step, not an error.
pub type CheckFn = Arc<dyn Fn(&Session) -> bool + Send + Sync>;

/// The closed set of step variants. User-supplied behaviour lives in the
/// function values, so the set never needs to grow for new simulations.
#[derive(Clone)]
pub enum StepKind {
    Exec(ExecFn),
    Check(CheckFn),
    Group(Vec<Step>),
}

/// One node of a simulation's step tree.
///
/// The id is assigned once, when the step is constructed, and identifies the
/// node in raw reports. The tree shape must be the same for every iteration of
/// the same simulation because aggregation matches steps by position.
#[derive(Clone)]
pub struct Step {
    id: String,
    name: String,
    kind: StepKind,
}

impl Step {
    /// An ordered sequence of child steps, itself addressable as a named step.
    /// The root group of a simulation is its scenario.
    pub fn group(name: impl Into<String>, children: Vec<Step>) -> Self {
        Self {
            id: nanoid!(),
            name: name.into(),
            kind: StepKind::Group(children),
        }
    }

    pub fn exec(
        name: impl Into<String>,
        f: impl Fn(&mut Session) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: nanoid!(),
            name: name.into(),
            kind: StepKind::Exec(Arc::new(f)),
        }
    }

    pub fn check(
        name: impl Into<String>,
        f: impl Fn(&Session) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: nanoid!(),
            name: name.into(),
            kind: StepKind::Check(Arc::new(f)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, StepKind::Group(_))
    }

    /// The ordered children of a group. Empty for leaf steps.
    pub fn children(&self) -> &[Step] {
        match &self.kind {
            StepKind::Group(children) => children,
            _ => &[],
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StepKind::Exec(_) => "exec".to_string(),
            StepKind::Check(_) => "check".to_string(),
            StepKind::Group(children) => format!("group[{}]", children.len()),
        };
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}
