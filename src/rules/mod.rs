//! Parsed rules of a configuration path.
use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    context::dependency_path, error::RuleDefinitionError, matcher::Matcher, parser, path,
    sharder::Sharder, ConfigurationValue, ValueType,
};

mod distribution;
mod eval;

pub use distribution::{Distribution, Distributions};
pub(crate) use eval::{RuleEnv, RuleOutcome};

/// Default partition branch.
pub const DEFAULT_PARTITION: &str = "*";

/// Serialized rules of one path, as stored by the rules driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Selects the parser (`jpad`, `const`, `alias`, or a custom one).
    pub format: String,
    /// Format-specific payload. Bundles may carry JSON payloads inline; they are kept as JSON
    /// text.
    #[serde(deserialize_with = "payload_text")]
    pub payload: String,
    /// Paths this definition depends on, as recorded by the publisher. Informational only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl RuleDefinition {
    pub fn new(format: impl Into<String>, payload: impl Into<String>) -> RuleDefinition {
        RuleDefinition {
            format: format.into(),
            payload: payload.into(),
            dependencies: Vec::new(),
        }
    }
}

fn payload_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// A single rule. Rules of a path are tried in order and the first match wins.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Fixed value when the matcher matches.
    SingleVariant {
        matcher: Matcher,
        value: ConfigurationValue,
    },
    /// Value picked deterministically per owner when the matcher matches.
    MultiVariant {
        matcher: Matcher,
        /// Identity type whose id is hashed into a bucket.
        owner_type: String,
        salt: String,
        distribution: Distributions,
        sharder: Arc<dyn Sharder>,
    },
    /// The value of another path.
    Alias { target: String },
    /// Always the same value.
    Const { value: ConfigurationValue },
}

/// Rules of a path, possibly split by the values of context properties.
#[derive(Debug, Clone)]
pub enum RuleTree {
    Rules(Vec<Rule>),
    Partition {
        /// Lower-cased context property whose value selects the branch.
        property: String,
        /// Branches keyed by lower-cased property value.
        branches: HashMap<String, RuleTree>,
        /// Branch used when no other branch matches, or when it does not produce a value.
        default: Option<Box<RuleTree>>,
    },
}

/// Everything known about a single configuration path.
#[derive(Debug, Clone)]
pub struct RuleSet {
    tree: RuleTree,
    value_type: Option<ValueType>,
    default_value: Option<ConfigurationValue>,
    dependencies: Vec<String>,
}

impl RuleSet {
    pub fn new(tree: RuleTree) -> RuleSet {
        let mut dependencies = Vec::new();
        tree.collect_dependencies(&mut dependencies);
        RuleSet {
            tree,
            value_type: None,
            default_value: None,
            dependencies,
        }
    }

    pub fn from_rules(rules: Vec<Rule>) -> RuleSet {
        RuleSet::new(RuleTree::Rules(rules))
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> RuleSet {
        self.value_type = Some(value_type);
        self
    }

    /// Value used when no rule matches.
    pub fn with_default_value(mut self, value: ConfigurationValue) -> RuleSet {
        self.default_value = Some(value);
        self
    }

    pub fn tree(&self) -> &RuleTree {
        &self.tree
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.value_type
    }

    pub fn default_value(&self) -> Option<&ConfigurationValue> {
        self.default_value.as_ref()
    }

    /// Paths whose values are needed to evaluate this rule set, normalized.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Serialize to a definition that parses back into equivalent rules. A lone alias keeps the
    /// `alias` format and a lone constant the `const` format. Everything else is written as `jpad`.
    ///
    /// # Errors
    ///
    /// - [`RuleDefinitionError::NotSerializable`] if an alias is mixed with other rules, a version
    ///   value has no declared type, or partition branches split on different properties.
    pub fn to_definition(&self) -> Result<RuleDefinition, RuleDefinitionError> {
        let lone_rule = match &self.tree {
            RuleTree::Rules(rules) if rules.len() == 1 => rules.first(),
            _ => None,
        };
        let mut definition = match lone_rule {
            Some(Rule::Alias { target }) => RuleDefinition::new("alias", target.clone()),
            // `const` infers the type from JSON, which cannot tell a version from a string.
            Some(Rule::Const { value })
                if !matches!(value, ConfigurationValue::Version(_))
                    && self.value_type.map_or(true, |ty| ty == value.value_type()) =>
            {
                RuleDefinition::new("const", value.to_json().to_string())
            }
            _ => RuleDefinition::new("jpad", parser::to_jpad_payload(self)?),
        };
        definition.dependencies = self.dependencies.clone();
        Ok(definition)
    }

    /// Coerce a value from outside the rules (e.g. a fixed override) to this path's type.
    pub(crate) fn coerce(&self, json: &serde_json::Value) -> Option<ConfigurationValue> {
        ConfigurationValue::from_json(json, self.value_type)
    }
}

impl RuleTree {
    fn collect_dependencies(&self, dependencies: &mut Vec<String>) {
        match self {
            RuleTree::Rules(rules) => {
                for rule in rules {
                    match rule {
                        Rule::SingleVariant { matcher, .. } | Rule::MultiVariant { matcher, .. } => {
                            for path in matcher.dependencies() {
                                push_unique(dependencies, path.clone());
                            }
                        }
                        Rule::Alias { target } => push_unique(dependencies, path::normalize(target)),
                        Rule::Const { .. } => {}
                    }
                }
            }
            RuleTree::Partition {
                property,
                branches,
                default,
            } => {
                if let Some(path) = dependency_path(property) {
                    push_unique(dependencies, path);
                }
                for branch in branches.values().chain(default.as_deref()) {
                    branch.collect_dependencies(dependencies);
                }
            }
        }
    }
}

fn push_unique(paths: &mut Vec<String>, path: String) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}
