use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Staleness multiples of the failure delay after which rules are considered degraded or
/// unhealthy.
const DEGRADED_FAILURE_DELAYS: u32 = 5;
const UNHEALTHY_FAILURE_DELAYS: u32 = 60;

/// How much the currently served rules can be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum RepositoryHealth {
    Healthy,
    /// Rules are served but have not been confirmed current for a while.
    Degraded(String),
    Unhealthy(String),
}

impl RepositoryHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, RepositoryHealth::Healthy)
    }
}

/// Bookkeeping the health is derived from.
#[derive(Debug, Clone, Default)]
pub(crate) struct HealthInput<'a> {
    /// Version of the served snapshot.
    pub loaded_version: Option<&'a str>,
    /// Last time the driver confirmed which version is latest.
    pub last_check_time: Option<DateTime<Utc>>,
    /// The latest version reported by the driver failed to load.
    pub failed_version: Option<&'a str>,
}

pub(crate) fn assess(
    input: &HealthInput,
    now: DateTime<Utc>,
    failure_delay: Duration,
) -> RepositoryHealth {
    let Some(loaded_version) = input.loaded_version else {
        return RepositoryHealth::Unhealthy("rules have not been loaded".into());
    };

    let elapsed = input
        .last_check_time
        .and_then(|last_check_time| (now - last_check_time).to_std().ok())
        .unwrap_or(Duration::ZERO);
    let stale = || format!("rules were last confirmed current {}s ago", elapsed.as_secs());

    if elapsed > failure_delay.saturating_mul(UNHEALTHY_FAILURE_DELAYS) {
        return RepositoryHealth::Unhealthy(stale());
    }
    // Older rules are still being served.
    if let Some(failed_version) = input.failed_version {
        return RepositoryHealth::Degraded(format!(
            "failed to load version {failed_version}, serving {loaded_version}"
        ));
    }
    if elapsed > failure_delay.saturating_mul(DEGRADED_FAILURE_DELAYS) {
        return RepositoryHealth::Degraded(stale());
    }
    RepositoryHealth::Healthy
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{assess, HealthInput, RepositoryHealth};

    #[test]
    fn unhealthy_without_rules() {
        let health = assess(&HealthInput::default(), Utc::now(), Duration::from_secs(10));
        assert!(matches!(health, RepositoryHealth::Unhealthy(_)));
    }

    #[test]
    fn degrades_with_staleness() {
        let checked = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let input = HealthInput {
            loaded_version: Some("v1"),
            last_check_time: Some(checked),
            failed_version: None,
        };
        let failure_delay = Duration::from_secs(10);
        let after = |secs| checked + chrono::Duration::seconds(secs);

        assert_eq!(assess(&input, after(30), failure_delay), RepositoryHealth::Healthy);
        assert_eq!(assess(&input, after(50), failure_delay), RepositoryHealth::Healthy);
        assert!(matches!(
            assess(&input, after(51), failure_delay),
            RepositoryHealth::Degraded(_)
        ));
        assert!(matches!(
            assess(&input, after(600), failure_delay),
            RepositoryHealth::Degraded(_)
        ));
        assert!(matches!(
            assess(&input, after(601), failure_delay),
            RepositoryHealth::Unhealthy(_)
        ));
    }

    #[test]
    fn failed_latest_version_only_degrades() {
        let checked = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let input = HealthInput {
            loaded_version: Some("v1"),
            last_check_time: Some(checked),
            failed_version: Some("v2"),
        };
        let failure_delay = Duration::from_secs(10);
        let after = |secs| checked + chrono::Duration::seconds(secs);

        assert_eq!(
            assess(&input, checked, failure_delay),
            RepositoryHealth::Degraded("failed to load version v2, serving v1".into())
        );
        assert!(matches!(
            assess(&input, after(600), failure_delay),
            RepositoryHealth::Degraded(_)
        ));
        assert!(matches!(
            assess(&input, after(601), failure_delay),
            RepositoryHealth::Unhealthy(_)
        ));
    }
}
