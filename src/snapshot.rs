//! Immutable set of parsed rules, replaced as a whole when a new version is loaded.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::{
    error::RuleDefinitionError,
    parser::ParserRegistry,
    path::{self, PathQuery},
    rules::{RuleDefinition, RuleSet},
};

/// Rules of every path at one version.
#[derive(Debug)]
pub struct RulesSnapshot {
    /// Version label reported by the rules driver.
    pub version: String,
    /// When the snapshot was loaded.
    pub loaded_at: DateTime<Utc>,
    /// Rules by normalized path.
    ///
    /// A path whose definition failed to parse keeps its error, so other paths remain usable and
    /// evaluating the broken one reports why.
    rules: BTreeMap<String, Result<RuleSet, RuleDefinitionError>>,
}

impl RulesSnapshot {
    /// Parse all `definitions`. Failures are isolated to their own path.
    pub fn parse(
        version: impl Into<String>,
        definitions: impl IntoIterator<Item = (String, RuleDefinition)>,
        parsers: &ParserRegistry,
    ) -> RulesSnapshot {
        let version = version.into();
        let rules = definitions
            .into_iter()
            .map(|(path, definition)| {
                let path = path::normalize(&path);
                let rules = parsers.parse(&definition);
                if let Err(err) = &rules {
                    log::warn!(target: "tweek",
                               version = version.as_str(),
                               path = path.as_str();
                               "failed to parse rules: {err}");
                }
                (path, rules)
            })
            .collect();

        RulesSnapshot {
            version,
            loaded_at: Utc::now(),
            rules,
        }
    }

    /// An empty snapshot.
    pub fn empty(version: impl Into<String>) -> RulesSnapshot {
        RulesSnapshot {
            version: version.into(),
            loaded_at: Utc::now(),
            rules: BTreeMap::new(),
        }
    }

    /// Rules of a normalized `path`, or the error that prevented parsing them.
    pub fn get(&self, path: &str) -> Option<Result<&RuleSet, &RuleDefinitionError>> {
        self.rules.get(path).map(Result::as_ref)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.rules.contains_key(path)
    }

    /// All paths, in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Paths covered by `query`, in order, with the key each is reported under.
    pub fn matching<'a>(
        &'a self,
        query: &'a PathQuery,
    ) -> Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a> {
        match query {
            PathQuery::Exact(path) => Box::new(
                self.rules
                    .get_key_value(path)
                    .map(|(path, _)| (path.as_str(), ""))
                    .into_iter(),
            ),
            PathQuery::Prefix(prefix) => Box::new(
                self.rules
                    .range::<String, _>(prefix..)
                    .map(|(path, _)| path.as_str())
                    .take_while(move |path| path.starts_with(prefix.as_str()))
                    .filter_map(move |path| Some((path, query.relative_key(path)?))),
            ),
        }
    }

    /// Paths whose rules failed to parse.
    pub fn errors(&self) -> impl Iterator<Item = (&str, &RuleDefinitionError)> {
        self.rules
            .iter()
            .filter_map(|(path, rules)| Some((path.as_str(), rules.as_ref().err()?)))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
