use gust_core::prelude::RawReport;

/// A pass/fail predicate evaluated against all raw reports aggregated for one
/// step-tree position. `matches` returning `true` means the failure condition
/// holds and the step does not pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    /// Fails the step once at least this many raw reports failed.
    MinimumFailures(u64),
    /// Fails the step once at least this percentage of raw reports failed.
    ///
    /// The comparison is done in floating point so that small sample sizes
    /// still fail, e.g. 1 failure out of 3 reports is 33.3%.
    PercentFailures(f64),
}

impl Criteria {
    pub fn matches(&self, reports: &[&RawReport]) -> bool {
        let failed = reports.iter().filter(|r| !r.ended_normally).count();
        match self {
            Criteria::MinimumFailures(min) => failed as u64 >= *min,
            Criteria::PercentFailures(percent) => {
                !reports.is_empty() && failed as f64 / reports.len() as f64 * 100.0 >= *percent
            }
        }
    }

    /// Parse a `fail-when` criteria string.
    ///
    /// Two forms are recognised, case-insensitively: `atleast <N> failure[s]`
    /// and `<N>% failure[s]`.
    pub fn parse(input: &str) -> Result<Self, CriteriaParseError> {
        let err = || CriteriaParseError {
            criteria: input.to_string(),
        };

        let lowered = input.trim().to_ascii_lowercase();
        let tokens = lowered.split_whitespace().collect::<Vec<_>>();

        match tokens.as_slice() {
            ["atleast", count, unit] if is_failure_word(unit) => count
                .parse()
                .map(Criteria::MinimumFailures)
                .map_err(|_| err()),
            [percent, unit] if is_failure_word(unit) => {
                let digits = percent.strip_suffix('%').ok_or_else(err)?;
                let value: f64 = digits.parse().map_err(|_| err())?;
                if !(0.0..=100.0).contains(&value) {
                    return Err(err());
                }
                Ok(Criteria::PercentFailures(value))
            }
            _ => Err(err()),
        }
    }

    /// Parse every configured criteria string. When none are configured the
    /// default applies: a single failure fails the step.
    pub fn parse_all(inputs: &[String]) -> Result<Vec<Self>, CriteriaParseError> {
        if inputs.is_empty() {
            return Ok(vec![Criteria::MinimumFailures(1)]);
        }
        inputs.iter().map(|s| Self::parse(s)).collect()
    }
}

fn is_failure_word(token: &str) -> bool {
    token == "failure" || token == "failures"
}

#[derive(thiserror::Error, Debug)]
#[error("the fail-when criteria `{criteria}` is invalid, make sure the syntax is correct")]
pub struct CriteriaParseError {
    pub criteria: String,
}
