//! Rule definition formats.
//!
//! Each path's [`RuleDefinition`] names a format that selects the [`RuleParser`] for its payload.
//! Three formats are built in:
//!
//! - `jpad`: a list of rules with matchers, optionally partitioned by context properties,
//! - `const`: a JSON value that always applies,
//! - `alias`: the path whose value this path takes.
use std::{collections::HashMap, fmt::Debug, sync::Arc};

use crate::{
    error::RuleDefinitionError,
    matcher::ComparerRegistry,
    path,
    rules::{Rule, RuleDefinition, RuleSet},
    sharder::{Md5Sharder, Sharder},
    ConfigurationValue,
};

mod jpad;

pub use jpad::{JPadBuilder, JPadParser};
pub(crate) use jpad::to_payload as to_jpad_payload;

/// Parses the payload of one rule format.
pub trait RuleParser: Debug + Send + Sync {
    fn parse(&self, payload: &str) -> Result<RuleSet, RuleDefinitionError>;
}

/// Settings shared by the built-in parsers.
#[derive(Debug, Clone)]
pub struct ParserSettings {
    /// Comparers available to matchers.
    pub comparers: ComparerRegistry,
    /// Sharder used by multi-variant rules to bucket owners.
    pub sharder: Arc<dyn Sharder>,
}

impl ParserSettings {
    pub fn with_comparers(mut self, comparers: ComparerRegistry) -> ParserSettings {
        self.comparers = comparers;
        self
    }

    pub fn with_sharder(mut self, sharder: impl Sharder + 'static) -> ParserSettings {
        self.sharder = Arc::new(sharder);
        self
    }
}

impl Default for ParserSettings {
    fn default() -> ParserSettings {
        ParserSettings {
            comparers: ComparerRegistry::default(),
            sharder: Arc::new(Md5Sharder),
        }
    }
}

/// Parsers by format name.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn RuleParser>>,
}

impl ParserRegistry {
    /// Registry with the built-in formats.
    pub fn new(settings: ParserSettings) -> ParserRegistry {
        ParserRegistry::empty()
            .with_parser("jpad", JPadParser::new(settings))
            .with_parser("const", ConstParser)
            .with_parser("alias", AliasParser)
    }

    pub fn empty() -> ParserRegistry {
        ParserRegistry {
            parsers: HashMap::new(),
        }
    }

    /// Register `parser` for `format`, replacing any parser already registered for it.
    pub fn with_parser(
        mut self,
        format: impl AsRef<str>,
        parser: impl RuleParser + 'static,
    ) -> ParserRegistry {
        self.parsers
            .insert(format.as_ref().to_lowercase(), Arc::new(parser));
        self
    }

    pub fn parse(&self, definition: &RuleDefinition) -> Result<RuleSet, RuleDefinitionError> {
        let parser = self
            .parsers
            .get(&definition.format.to_lowercase())
            .ok_or_else(|| RuleDefinitionError::UnknownFormat(definition.format.clone()))?;
        parser.parse(&definition.payload)
    }
}

impl Default for ParserRegistry {
    fn default() -> ParserRegistry {
        ParserRegistry::new(ParserSettings::default())
    }
}

/// `const` format: the payload is the JSON value of the path.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstParser;

impl RuleParser for ConstParser {
    fn parse(&self, payload: &str) -> Result<RuleSet, RuleDefinitionError> {
        let json: serde_json::Value = serde_json::from_str(payload)
            .map_err(|err| RuleDefinitionError::MalformedPayload(err.to_string()))?;
        let value =
            ConfigurationValue::infer(&json).ok_or_else(|| RuleDefinitionError::InvalidValue {
                value: json.to_string(),
                value_type: None,
            })?;
        let value_type = value.value_type();
        Ok(RuleSet::from_rules(vec![Rule::Const { value }]).with_value_type(value_type))
    }
}

/// `alias` format: the payload is the target path, either bare or as a JSON string.
#[derive(Debug, Clone, Copy, Default)]
pub struct AliasParser;

impl RuleParser for AliasParser {
    fn parse(&self, payload: &str) -> Result<RuleSet, RuleDefinitionError> {
        let target = match serde_json::from_str::<String>(payload) {
            Ok(target) => path::normalize(&target),
            Err(_) => path::normalize(payload),
        };
        if target.is_empty() {
            return Err(RuleDefinitionError::MalformedPayload(
                "alias target is empty".to_owned(),
            ));
        }
        Ok(RuleSet::from_rules(vec![Rule::Alias { target }]))
    }
}
