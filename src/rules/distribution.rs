use chrono::{DateTime, Utc};

use crate::ConfigurationValue;

/// How a multi-variant rule spreads values over owners.
#[derive(Debug, Clone, PartialEq)]
pub enum Distribution {
    /// `true` for a `p` share of owners, `false` for the rest.
    Bernoulli(f64),
    /// Values with relative weights.
    Weighted(Vec<(ConfigurationValue, f64)>),
}

impl Distribution {
    /// Pick a value for an owner falling into the `fraction` bucket (`0 <= fraction < 1`).
    ///
    /// Returns `None` if the distribution has no positive weight.
    pub fn sample(&self, fraction: f64) -> Option<ConfigurationValue> {
        match self {
            Distribution::Bernoulli(p) => Some(ConfigurationValue::Bool(fraction < *p)),
            Distribution::Weighted(entries) => {
                let total: f64 = entries.iter().map(|(_, weight)| weight).sum();
                if total <= 0.0 {
                    return None;
                }
                let target = fraction * total;
                let mut cumulative = 0.0;
                for (value, weight) in entries {
                    cumulative += weight;
                    if target < cumulative {
                        return Some(value.clone());
                    }
                }
                // Rounding may leave `target` at the very top of the range.
                entries
                    .iter()
                    .rev()
                    .find(|(_, weight)| *weight > 0.0)
                    .map(|(value, _)| value.clone())
            }
        }
    }
}

/// Distribution of a multi-variant rule, optionally changing over time.
#[derive(Debug, Clone, PartialEq)]
pub enum Distributions {
    Single(Distribution),
    /// Distributions by start date, sorted by date. Owners get the distribution that was active
    /// when they were created.
    TimePhased(Vec<(DateTime<Utc>, Distribution)>),
}

impl Distributions {
    pub fn time_phased(mut phases: Vec<(DateTime<Utc>, Distribution)>) -> Distributions {
        phases.sort_by_key(|(start, _)| *start);
        Distributions::TimePhased(phases)
    }

    /// Select the distribution for an owner created at `created_at`.
    ///
    /// An owner without a known creation date gets the latest distribution. An owner created
    /// before the first phase gets none.
    pub fn select(&self, created_at: Option<DateTime<Utc>>) -> Option<&Distribution> {
        match self {
            Distributions::Single(distribution) => Some(distribution),
            Distributions::TimePhased(phases) => match created_at {
                None => phases.last().map(|(_, distribution)| distribution),
                Some(created_at) => phases
                    .iter()
                    .rev()
                    .find(|(start, _)| *start <= created_at)
                    .map(|(_, distribution)| distribution),
            },
        }
    }
}
