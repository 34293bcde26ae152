//! A background task that periodically checks the rules driver for a new version and loads it into
//! the repository.
use std::{sync::Arc, time::Duration};

use rand::{thread_rng, Rng};
use tokio::{sync::watch, task::JoinHandle};

use crate::{snapshot::RulesSnapshot, Error, Result};

use super::{RulesDriver, RulesRepository};

/// Configuration for [`RulesRepository`] and its [`RulesPoller`].
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Interval to wait between version checks.
    ///
    /// Defaults to [`RepositoryConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Jitter applies a randomized duration to wait between version checks. This helps to avoid
    /// multiple instances synchronizing and producing spiky load on the rules source.
    ///
    /// Defaults to [`RepositoryConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
    /// Delay before the first retry after a failure. Consecutive failures double it. Also the unit
    /// of staleness for [`RepositoryHealth`](super::RepositoryHealth).
    ///
    /// Defaults to [`RepositoryConfig::DEFAULT_FAILURE_DELAY`].
    pub failure_delay: Duration,
    /// Upper bound of the retry delay.
    ///
    /// Defaults to [`RepositoryConfig::DEFAULT_MAX_FAILURE_DELAY`].
    pub max_failure_delay: Duration,
}

impl RepositoryConfig {
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);
    pub const DEFAULT_FAILURE_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_FAILURE_DELAY: Duration = Duration::from_secs(60);

    pub fn new() -> RepositoryConfig {
        RepositoryConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> RepositoryConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> RepositoryConfig {
        self.jitter = jitter;
        self
    }

    pub fn with_failure_delay(mut self, failure_delay: Duration) -> RepositoryConfig {
        self.failure_delay = failure_delay;
        self
    }

    pub fn with_max_failure_delay(mut self, max_failure_delay: Duration) -> RepositoryConfig {
        self.max_failure_delay = max_failure_delay;
        self
    }
}

impl Default for RepositoryConfig {
    fn default() -> RepositoryConfig {
        RepositoryConfig {
            interval: RepositoryConfig::DEFAULT_POLL_INTERVAL,
            jitter: RepositoryConfig::DEFAULT_POLL_JITTER,
            failure_delay: RepositoryConfig::DEFAULT_FAILURE_DELAY,
            max_failure_delay: RepositoryConfig::DEFAULT_MAX_FAILURE_DELAY,
        }
    }
}

/// Polls a [`RulesDriver`] in a background task and keeps a [`RulesRepository`] current.
///
/// Failures never stop the task. It retries with exponential back-off until it is stopped.
pub struct RulesPoller {
    join_handle: JoinHandle<()>,
    /// Used to send a stop command to the poller task.
    stop_sender: watch::Sender<bool>,
    repository: Arc<RulesRepository>,
}

impl RulesPoller {
    /// Spawn the poller task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn start(repository: Arc<RulesRepository>, driver: Arc<dyn RulesDriver>) -> RulesPoller {
        let (stop_sender, stop_receiver) = watch::channel(false);
        let join_handle = tokio::spawn(run(repository.clone(), driver, stop_receiver));

        RulesPoller {
            join_handle,
            stop_sender,
            repository,
        }
    }

    /// Wait until the repository holds rules.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerStopped`] if the poller is stopped before rules are loaded.
    pub async fn wait_for_rules(&self) -> Result<Arc<RulesSnapshot>> {
        let mut snapshots = self.repository.subscribe();
        let mut stopped = self.stop_sender.subscribe();

        tokio::select! {
            snapshot = snapshots.wait_for(Option::is_some) => {
                snapshot
                    .ok()
                    .and_then(|snapshot| snapshot.clone())
                    .ok_or(Error::PollerStopped)
            }
            _ = stopped.wait_for(|stopped| *stopped) => Err(Error::PollerStopped),
        }
    }

    /// Stop the poller task.
    ///
    /// This function does not wait for the task to actually stop.
    pub fn stop(&self) {
        self.stop_sender.send_replace(true);
    }

    /// Stop the poller task and wait for it to exit.
    ///
    /// # Errors
    ///
    /// - [`Error::PollerStopped`] if the task panicked or was cancelled.
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle.await.map_err(|_| Error::PollerStopped)
    }
}

async fn run(
    repository: Arc<RulesRepository>,
    driver: Arc<dyn RulesDriver>,
    mut stop: watch::Receiver<bool>,
) {
    let mut schedule = PollSchedule::new(repository.config());

    loop {
        log::debug!(target: "tweek", "checking for new rules");
        let delay = match repository.refresh(driver.as_ref()).await {
            Ok(_) => schedule.after_success(),
            Err(err) => {
                let delay = schedule.after_failure();
                log::warn!(target: "tweek",
                           attempt = schedule.failures;
                           "failed to refresh rules, retrying in {delay:?}: {err}");
                delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            // Also completes when the sender is dropped.
            _ = stop.wait_for(|stop| *stop) => {
                log::debug!(target: "tweek", "rules poller received stop command");
                return;
            }
        }
    }
}

/// Delay before the next version check. Successful checks are spaced by the jittered interval.
/// Consecutive failures back off exponentially from `failure_delay` up to `max_failure_delay`.
#[derive(Debug)]
struct PollSchedule {
    interval: Duration,
    jitter: Duration,
    failure_delay: Duration,
    max_failure_delay: Duration,
    failures: u32,
}

impl PollSchedule {
    fn new(config: &RepositoryConfig) -> PollSchedule {
        PollSchedule {
            interval: config.interval,
            jitter: config.jitter,
            failure_delay: config.failure_delay,
            max_failure_delay: config.max_failure_delay,
            failures: 0,
        }
    }

    fn after_success(&mut self) -> Duration {
        self.failures = 0;
        // Never longer than `interval`.
        self.interval
            .saturating_sub(thread_rng().gen_range(Duration::ZERO..=self.jitter))
    }

    fn after_failure(&mut self) -> Duration {
        let delay = self
            .failure_delay
            .saturating_mul(2u32.saturating_pow(self.failures))
            .min(self.max_failure_delay);
        self.failures = self.failures.saturating_add(1);
        delay
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;

    use super::{PollSchedule, RepositoryConfig, RulesPoller};
    use crate::{
        error::DriverError,
        parser::ParserRegistry,
        repository::{InMemoryRulesDriver, RulesDriver, RulesRepository, Ruleset},
        rules::RuleDefinition,
        Error,
    };

    fn ruleset(version: &str) -> Ruleset {
        Ruleset {
            version: version.into(),
            rules: [("abc/x".to_owned(), RuleDefinition::new("const", "1"))].into(),
        }
    }

    fn repository() -> Arc<RulesRepository> {
        Arc::new(RulesRepository::new(
            ParserRegistry::default(),
            RepositoryConfig::new()
                .with_interval(Duration::from_secs(1))
                .with_jitter(Duration::ZERO)
                .with_failure_delay(Duration::from_millis(100))
                .with_max_failure_delay(Duration::from_millis(400)),
        ))
    }

    /// Fails the first `failures` calls.
    struct FlakyDriver {
        failures: usize,
        calls: AtomicUsize,
        inner: InMemoryRulesDriver,
    }

    #[async_trait]
    impl RulesDriver for FlakyDriver {
        async fn get_version(&self) -> Result<String, DriverError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(DriverError::Unavailable("flaky".into()));
            }
            self.inner.get_version().await
        }

        async fn get_ruleset(&self) -> Result<Ruleset, DriverError> {
            self.inner.get_ruleset().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loads_and_follows_new_versions() {
        let _ = env_logger::builder().is_test(true).try_init();

        let repository = repository();
        let driver = Arc::new(InMemoryRulesDriver::new().with_ruleset(ruleset("v1")));
        let poller = RulesPoller::start(repository.clone(), driver.clone());

        let snapshot = poller.wait_for_rules().await.unwrap();
        assert_eq!(snapshot.version, "v1");

        driver.publish(ruleset("v2"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(repository.snapshot().unwrap().version, "v2");

        poller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_after_failures() {
        let repository = repository();
        let driver = Arc::new(FlakyDriver {
            failures: 3,
            calls: AtomicUsize::new(0),
            inner: InMemoryRulesDriver::new().with_ruleset(ruleset("v1")),
        });
        let poller = RulesPoller::start(repository.clone(), driver.clone());

        let snapshot = poller.wait_for_rules().await.unwrap();
        assert_eq!(snapshot.version, "v1");
        assert_eq!(driver.calls.load(Ordering::SeqCst), 4);

        poller.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn wait_fails_once_stopped() {
        let poller = RulesPoller::start(repository(), Arc::new(InMemoryRulesDriver::new()));
        poller.stop();
        assert!(matches!(
            poller.wait_for_rules().await,
            Err(Error::PollerStopped)
        ));
        poller.shutdown().await.unwrap();
    }

    fn schedule() -> PollSchedule {
        PollSchedule::new(
            &RepositoryConfig::new()
                .with_interval(Duration::from_secs(30))
                .with_jitter(Duration::from_secs(3))
                .with_failure_delay(Duration::from_secs(10))
                .with_max_failure_delay(Duration::from_secs(60)),
        )
    }

    #[test]
    fn failures_back_off_exponentially() {
        let mut schedule = schedule();
        let delays = (0..5).map(|_| schedule.after_failure()).collect::<Vec<_>>();
        assert_eq!(
            delays,
            [10, 20, 40, 60, 60].map(Duration::from_secs).to_vec()
        );
        assert_eq!(schedule.failures, 5);
    }

    #[test]
    fn success_resets_back_off() {
        let mut schedule = schedule();
        schedule.after_failure();
        schedule.after_failure();

        let delay = schedule.after_success();
        assert!(
            (Duration::from_secs(27)..=Duration::from_secs(30)).contains(&delay),
            "{delay:?} must be within the jittered interval"
        );
        assert_eq!(schedule.failures, 0);
        assert_eq!(schedule.after_failure(), Duration::from_secs(10));
    }

    #[test]
    fn back_off_does_not_overflow() {
        let mut schedule = schedule();
        schedule.failures = 200;
        assert_eq!(schedule.after_failure(), Duration::from_secs(60));
    }

    #[test]
    fn jitter_never_extends_interval() {
        let mut schedule = PollSchedule::new(
            &RepositoryConfig::new()
                .with_interval(Duration::from_secs(1))
                .with_jitter(Duration::from_secs(30)),
        );
        for _ in 0..100 {
            assert!(schedule.after_success() <= Duration::from_secs(1));
        }

        let mut fixed = PollSchedule::new(&RepositoryConfig::new().with_jitter(Duration::ZERO));
        assert_eq!(fixed.after_success(), RepositoryConfig::DEFAULT_POLL_INTERVAL);
    }
}
