use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::DriverError, rules::RuleDefinition};

/// Rule definitions of every path at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruleset {
    pub version: String,
    pub rules: HashMap<String, RuleDefinition>,
}

/// Source of rule definitions.
#[async_trait]
pub trait RulesDriver: Send + Sync {
    /// Latest available version label. Cheap compared to [`RulesDriver::get_ruleset`].
    async fn get_version(&self) -> Result<String, DriverError>;

    /// Latest ruleset, with its version.
    async fn get_ruleset(&self) -> Result<Ruleset, DriverError>;
}

/// A rules driver holding a ruleset in memory. New versions are published explicitly.
#[derive(Debug, Default)]
pub struct InMemoryRulesDriver {
    ruleset: RwLock<Option<Ruleset>>,
}

impl InMemoryRulesDriver {
    pub fn new() -> InMemoryRulesDriver {
        InMemoryRulesDriver::default()
    }

    pub fn with_ruleset(self, ruleset: Ruleset) -> InMemoryRulesDriver {
        self.publish(ruleset);
        self
    }

    /// Replace the served ruleset.
    pub fn publish(&self, ruleset: Ruleset) {
        let mut slot = self
            .ruleset
            .write()
            .expect("thread holding ruleset lock should not panic");
        *slot = Some(ruleset);
    }

    fn current(&self) -> Result<Ruleset, DriverError> {
        self.ruleset
            .read()
            .expect("thread holding ruleset lock should not panic")
            .clone()
            .ok_or_else(|| DriverError::Unavailable("no ruleset published".into()))
    }
}

#[async_trait]
impl RulesDriver for InMemoryRulesDriver {
    async fn get_version(&self) -> Result<String, DriverError> {
        Ok(self.current()?.version)
    }

    async fn get_ruleset(&self) -> Result<Ruleset, DriverError> {
        self.current()
    }
}
