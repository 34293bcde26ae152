//! Thread-safe holder of the current [`RulesSnapshot`].
//!
//! Readers (calculations) take the current snapshot and keep it for the duration of their work.
//! Writers (the background [`RulesPoller`] or a push-style driver calling
//! [`RulesRepository::load`]) replace the snapshot as a whole, and subscribers are notified
//! through a [`tokio::sync::watch`] channel.
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::{parser::ParserRegistry, snapshot::RulesSnapshot, Error, Result};

mod driver;
mod health;
mod management;
mod poller;

pub use driver::{InMemoryRulesDriver, RulesDriver, Ruleset};
pub use health::RepositoryHealth;
pub use management::{ManagementDriverConfig, ManagementRulesDriver, VERSION_HEADER};
pub use poller::{RepositoryConfig, RulesPoller};

use health::HealthInput;

/// Lifecycle of the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryState {
    /// No rules have been loaded and no load is in progress.
    Uninitialized,
    /// The first load is in progress.
    Loading,
    /// Rules are loaded.
    Ready,
    /// Rules are loaded and a newer version is being checked for.
    Refreshing,
}

/// Point-in-time report of the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    /// Version label of the served rules.
    pub label: Option<String>,
    /// Last time the rules driver confirmed which version is latest.
    pub last_check_time: Option<DateTime<Utc>>,
    pub state: RepositoryState,
    pub health: RepositoryHealth,
}

#[derive(Debug)]
struct Bookkeeping {
    state: RepositoryState,
    last_check_time: Option<DateTime<Utc>>,
    /// Latest version reported by the driver that could not be loaded.
    failed_version: Option<String>,
}

pub struct RulesRepository {
    snapshot: RwLock<Option<Arc<RulesSnapshot>>>,
    bookkeeping: Mutex<Bookkeeping>,
    notifier: watch::Sender<Option<Arc<RulesSnapshot>>>,
    parsers: ParserRegistry,
    config: RepositoryConfig,
}

impl RulesRepository {
    pub fn new(parsers: ParserRegistry, config: RepositoryConfig) -> RulesRepository {
        let (notifier, _) = watch::channel(None);
        RulesRepository {
            snapshot: RwLock::new(None),
            bookkeeping: Mutex::new(Bookkeeping {
                state: RepositoryState::Uninitialized,
                last_check_time: None,
                failed_version: None,
            }),
            notifier,
            parsers,
            config,
        }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Currently served rules. Returns `None` if no rules have been loaded yet.
    pub fn snapshot(&self) -> Option<Arc<RulesSnapshot>> {
        // self.snapshot.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let snapshot = self
            .snapshot
            .read()
            .expect("thread holding snapshot lock should not panic");
        snapshot.clone()
    }

    /// Receive every newly loaded snapshot. The receiver starts with the current one.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<RulesSnapshot>>> {
        self.notifier.subscribe()
    }

    /// Parse `ruleset` and start serving it.
    pub fn load(&self, ruleset: Ruleset) -> Arc<RulesSnapshot> {
        let snapshot = Arc::new(RulesSnapshot::parse(
            ruleset.version,
            ruleset.rules,
            &self.parsers,
        ));

        {
            let mut slot = self
                .snapshot
                .write()
                .expect("thread holding snapshot lock should not panic");
            *slot = Some(snapshot.clone());
        }
        {
            let mut bookkeeping = self.bookkeeping();
            bookkeeping.state = RepositoryState::Ready;
            bookkeeping.last_check_time = Some(Utc::now());
            bookkeeping.failed_version = None;
        }
        self.notifier.send_replace(Some(snapshot.clone()));

        log::info!(target: "tweek",
                   version = snapshot.version.as_str(),
                   paths = snapshot.len(),
                   errors = snapshot.errors().count();
                   "loaded rules");
        snapshot
    }

    /// Check the driver for a newer version and load it if there is one.
    ///
    /// Returns whether a new version was loaded.
    pub async fn refresh(&self, driver: &dyn RulesDriver) -> Result<bool> {
        let current = self.snapshot();
        self.set_state(if current.is_some() {
            RepositoryState::Refreshing
        } else {
            RepositoryState::Loading
        });

        let result = self.try_refresh(driver, current.as_deref()).await;

        self.set_state(if self.snapshot().is_some() {
            RepositoryState::Ready
        } else {
            RepositoryState::Uninitialized
        });
        result
    }

    async fn try_refresh(
        &self,
        driver: &dyn RulesDriver,
        current: Option<&RulesSnapshot>,
    ) -> Result<bool> {
        let latest = driver.get_version().await.map_err(Error::RulesDriver)?;
        self.bookkeeping().last_check_time = Some(Utc::now());

        if current.is_some_and(|current| current.version == latest) {
            log::debug!(target: "tweek", version = latest.as_str(); "rules are up to date");
            self.bookkeeping().failed_version = None;
            return Ok(false);
        }

        match driver.get_ruleset().await {
            Ok(ruleset) => {
                self.load(ruleset);
                Ok(true)
            }
            Err(err) => {
                self.bookkeeping().failed_version = Some(latest);
                Err(Error::RulesDriver(err))
            }
        }
    }

    pub fn status(&self) -> RepositoryStatus {
        self.status_at(Utc::now())
    }

    fn status_at(&self, now: DateTime<Utc>) -> RepositoryStatus {
        let snapshot = self.snapshot();
        let bookkeeping = self.bookkeeping();
        let health = health::assess(
            &HealthInput {
                loaded_version: snapshot.as_deref().map(|snapshot| snapshot.version.as_str()),
                last_check_time: bookkeeping.last_check_time,
                failed_version: bookkeeping.failed_version.as_deref(),
            },
            now,
            self.config.failure_delay,
        );
        RepositoryStatus {
            label: snapshot.map(|snapshot| snapshot.version.clone()),
            last_check_time: bookkeeping.last_check_time,
            state: bookkeeping.state,
            health,
        }
    }

    fn set_state(&self, state: RepositoryState) {
        self.bookkeeping().state = state;
    }

    fn bookkeeping(&self) -> std::sync::MutexGuard<'_, Bookkeeping> {
        self.bookkeeping
            .lock()
            .expect("thread holding bookkeeping lock should not panic")
    }
}

impl Default for RulesRepository {
    fn default() -> RulesRepository {
        RulesRepository::new(ParserRegistry::default(), RepositoryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{
        InMemoryRulesDriver, RepositoryHealth, RepositoryState, RulesDriver, RulesRepository,
        Ruleset,
    };
    use crate::{error::DriverError, rules::RuleDefinition, Error};

    fn ruleset(version: &str) -> Ruleset {
        Ruleset {
            version: version.into(),
            rules: [("abc/x".to_owned(), RuleDefinition::new("const", "1"))].into(),
        }
    }

    /// Reports a version but fails to serve it.
    struct BrokenRulesetDriver;

    #[async_trait]
    impl RulesDriver for BrokenRulesetDriver {
        async fn get_version(&self) -> Result<String, DriverError> {
            Ok("v2".into())
        }
        async fn get_ruleset(&self) -> Result<Ruleset, DriverError> {
            Err(DriverError::Unavailable("bucket missing".into()))
        }
    }

    #[test]
    fn starts_uninitialized() {
        let repository = RulesRepository::default();
        let status = repository.status();

        assert!(repository.snapshot().is_none());
        assert_eq!(status.state, RepositoryState::Uninitialized);
        assert_eq!(status.label, None);
        assert!(matches!(status.health, RepositoryHealth::Unhealthy(_)));
    }

    #[test]
    fn load_swaps_snapshot_and_notifies() {
        let repository = RulesRepository::default();
        let mut receiver = repository.subscribe();
        assert!(receiver.borrow_and_update().is_none());

        let first = repository.load(ruleset("v1"));
        let held = repository.snapshot().unwrap();
        repository.load(ruleset("v2"));

        // Holders of an older snapshot keep it.
        assert_eq!(held.version, "v1");
        assert!(Arc::ptr_eq(&held, &first));
        assert_eq!(repository.snapshot().unwrap().version, "v2");

        assert!(receiver.has_changed().unwrap());
        assert_eq!(
            receiver.borrow_and_update().as_ref().unwrap().version,
            "v2"
        );

        let status = repository.status();
        assert_eq!(status.state, RepositoryState::Ready);
        assert_eq!(status.label.as_deref(), Some("v2"));
        assert_eq!(status.health, RepositoryHealth::Healthy);
    }

    #[tokio::test]
    async fn refresh_loads_only_new_versions() {
        let repository = RulesRepository::default();
        let driver = InMemoryRulesDriver::new().with_ruleset(ruleset("v1"));

        assert!(repository.refresh(&driver).await.unwrap());
        assert!(!repository.refresh(&driver).await.unwrap());

        driver.publish(ruleset("v2"));
        assert!(repository.refresh(&driver).await.unwrap());
        assert_eq!(repository.status().label.as_deref(), Some("v2"));
        assert_eq!(repository.status().state, RepositoryState::Ready);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_serving_previous_rules() {
        let repository = RulesRepository::default();
        repository.load(ruleset("v1"));

        let result = repository.refresh(&BrokenRulesetDriver).await;
        assert!(matches!(result, Err(Error::RulesDriver(_))));

        let status = repository.status();
        assert_eq!(status.label.as_deref(), Some("v1"));
        assert_eq!(status.state, RepositoryState::Ready);
        assert_eq!(
            status.health,
            RepositoryHealth::Degraded("failed to load version v2, serving v1".into())
        );

        // A successful check of the served version clears the failure.
        let driver = InMemoryRulesDriver::new().with_ruleset(ruleset("v1"));
        assert!(!repository.refresh(&driver).await.unwrap());
        assert_eq!(repository.status().health, RepositoryHealth::Healthy);
    }

    #[tokio::test]
    async fn failed_first_load_stays_uninitialized() {
        let repository = RulesRepository::default();
        assert!(repository.refresh(&InMemoryRulesDriver::new()).await.is_err());
        assert_eq!(repository.status().state, RepositoryState::Uninitialized);
    }

    #[test]
    fn health_degrades_when_checks_stop() {
        let repository = RulesRepository::default();
        repository.load(ruleset("v1"));

        let failure_delay = chrono::Duration::from_std(repository.config().failure_delay).unwrap();
        let later = |delays: i32| Utc::now() + failure_delay * delays;

        assert!(matches!(
            repository.status_at(later(10)).health,
            RepositoryHealth::Degraded(_)
        ));
        assert!(matches!(
            repository.status_at(later(61)).health,
            RepositoryHealth::Unhealthy(_)
        ));
    }
}
