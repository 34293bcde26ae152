//! Evaluation of paths within a single calculation.
use std::collections::HashMap;

use crate::{
    context::{dependency_path, Context, GetContextValue},
    error::EvaluationError,
    path,
    rules::{RuleEnv, RuleOutcome},
    snapshot::RulesSnapshot,
    ConfigurationValue,
};

use super::EvaluatedValue;

type PathResult = Result<Option<EvaluatedValue>, EvaluationError>;

/// Evaluates paths against one snapshot and one merged context.
///
/// Every path is evaluated at most once per scope. Results are shared between the requested paths
/// and the paths they depend on.
pub(crate) struct EvaluationScope<'a> {
    snapshot: &'a RulesSnapshot,
    context: &'a Context,
    strict_owner_identity: bool,
    resolved: HashMap<String, PathResult>,
    /// Paths currently being evaluated, outermost first.
    visiting: Vec<String>,
}

impl<'a> EvaluationScope<'a> {
    pub fn new(
        snapshot: &'a RulesSnapshot,
        context: &'a Context,
        strict_owner_identity: bool,
    ) -> EvaluationScope<'a> {
        EvaluationScope {
            snapshot,
            context,
            strict_owner_identity,
            resolved: HashMap::new(),
            visiting: Vec::new(),
        }
    }

    /// Evaluate a normalized `path`. `Ok(None)` means the path has no value.
    pub fn evaluate(&mut self, path: &str) -> PathResult {
        if let Some(result) = self.resolved.get(path) {
            return result.clone();
        }
        if self.visiting.iter().any(|visiting| visiting == path) {
            let mut chain = self.visiting.clone();
            chain.push(path.to_owned());
            return Err(EvaluationError::CircularDependency {
                path: path.to_owned(),
                chain,
            });
        }

        self.visiting.push(path.to_owned());
        let result = self.resolve(path);
        self.visiting.pop();

        match &result {
            Ok(Some(value)) => log::trace!(target: "tweek",
                                           path = path,
                                           value = value.value,
                                           source = value.source.as_str();
                                           "evaluated path"),
            Ok(None) => log::trace!(target: "tweek", path = path; "path has no value"),
            Err(_) => {}
        }

        self.resolved.insert(path.to_owned(), result.clone());
        result
    }

    fn resolve(&mut self, path: &str) -> PathResult {
        let snapshot = self.snapshot;
        let rules = snapshot.get(path);

        if let Some(fixed) = self.context.fixed_value(path) {
            let value = match rules {
                Some(Ok(rules)) => rules.coerce(fixed),
                _ => ConfigurationValue::infer(fixed),
            };
            match value {
                Some(value) => {
                    return Ok(Some(EvaluatedValue {
                        value,
                        source: path.to_owned(),
                    }))
                }
                None => log::warn!(target: "tweek",
                                   path = path;
                                   "ignoring fixed value {fixed} that does not fit the path"),
            }
        }

        let rules = match rules {
            None => return Ok(None),
            Some(Err(err)) => {
                return Err(EvaluationError::InvalidRuleDefinition {
                    path: path.to_owned(),
                    source: err.clone(),
                })
            }
            Some(Ok(rules)) => rules,
        };

        // A dependency that is part of a cycle fails its dependents as well. Other dependency
        // failures only make the dependency value absent.
        for dependency in rules.dependencies() {
            if let Err(err @ EvaluationError::CircularDependency { .. }) = self.evaluate(dependency)
            {
                return Err(err);
            }
        }

        let outcome = rules.eval(&RuleEnv {
            path,
            context: &ScopedContext {
                context: self.context,
                resolved: &self.resolved,
            },
            strict_owner_identity: self.strict_owner_identity,
        })?;

        match outcome {
            RuleOutcome::Value(value) => Ok(Some(EvaluatedValue {
                value,
                source: path.to_owned(),
            })),
            RuleOutcome::Alias(target) => self.evaluate(&path::normalize(target)),
            RuleOutcome::NoMatch => Ok(rules.default_value().map(|value| EvaluatedValue {
                value: value.clone(),
                source: path.to_owned(),
            })),
        }
    }
}

/// The merged context extended with the values of already evaluated paths.
struct ScopedContext<'a> {
    context: &'a Context,
    resolved: &'a HashMap<String, PathResult>,
}

impl GetContextValue for ScopedContext<'_> {
    fn get_value(&self, property: &str) -> Option<String> {
        match dependency_path(property) {
            Some(path) => match self.resolved.get(&path) {
                Some(Ok(Some(value))) => Some(value.value.to_string()),
                _ => None,
            },
            None => self.context.get_value(property),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::EvaluationScope;
    use crate::{
        context::{Context, ContextProperties},
        error::{EvaluationError, RuleDefinitionError},
        parser::{JPadBuilder, ParserRegistry},
        rules::RuleDefinition,
        snapshot::RulesSnapshot,
        ConfigurationValue, Identity, ValueType,
    };

    fn snapshot(definitions: Vec<(&str, RuleDefinition)>) -> RulesSnapshot {
        RulesSnapshot::parse(
            "test",
            definitions
                .into_iter()
                .map(|(path, definition)| (path.to_owned(), definition)),
            &ParserRegistry::default(),
        )
    }

    fn context(properties: &[(&str, serde_json::Value)]) -> Context {
        let identity = Identity::new("device", "1");
        let properties: ContextProperties = properties
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Context::merge([(&identity, &properties)], Utc::now())
    }

    fn flag(matcher: serde_json::Value) -> RuleDefinition {
        JPadBuilder::new()
            .with_value_type(ValueType::Boolean)
            .add_single_variant_rule(matcher, true)
            .generate()
    }

    #[test]
    fn fixed_value_is_coerced_to_declared_type() {
        let snapshot = snapshot(vec![("abc/flag", flag(json!({})))]);
        let context = context(&[("@fixed:abc/flag", json!("false"))]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        let value = scope.evaluate("abc/flag").unwrap().unwrap();
        assert_eq!(value.value, ConfigurationValue::Bool(false));
        assert_eq!(value.source, "abc/flag");
    }

    #[test]
    fn unfit_fixed_value_falls_back_to_rules() {
        let snapshot = snapshot(vec![("abc/flag", flag(json!({})))]);
        let context = context(&[("@fixed:abc/flag", json!("maybe"))]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        let value = scope.evaluate("abc/flag").unwrap().unwrap();
        assert_eq!(value.value, ConfigurationValue::Bool(true));
    }

    #[test]
    fn dependency_values_feed_matchers() {
        let snapshot = snapshot(vec![
            ("abc/dep", flag(json!({ "device.prop": 5 }))),
            ("abc/main", flag(json!({ "keys.abc/dep": true }))),
        ]);

        let matching = context(&[("prop", json!(5))]);
        let mut scope = EvaluationScope::new(&snapshot, &matching, false);
        assert!(scope.evaluate("abc/main").unwrap().is_some());

        let other = context(&[("prop", json!(6))]);
        let mut scope = EvaluationScope::new(&snapshot, &other, false);
        assert_eq!(scope.evaluate("abc/main"), Ok(None));
    }

    #[test]
    fn broken_dependency_is_absent() {
        let snapshot = snapshot(vec![
            ("abc/broken", RuleDefinition::new("jpad", "{")),
            ("abc/main", flag(json!({ "@@key:abc/broken": { "$ne": null } }))),
            ("abc/other", flag(json!({ "@@key:abc/broken": null }))),
        ]);
        let context = context(&[]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        assert_eq!(scope.evaluate("abc/main"), Ok(None));
        assert!(scope.evaluate("abc/other").unwrap().is_some());
        assert!(matches!(
            scope.evaluate("abc/broken"),
            Err(EvaluationError::InvalidRuleDefinition {
                source: RuleDefinitionError::MalformedPayload(_),
                ..
            })
        ));
    }

    #[test]
    fn reports_cycle_chain() {
        let snapshot = snapshot(vec![
            ("abc/a", flag(json!({ "@@key:abc/b": true }))),
            ("abc/b", flag(json!({ "@@key:abc/c": true }))),
            ("abc/c", flag(json!({ "@@key:abc/a": true }))),
        ]);
        let context = context(&[]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        assert_eq!(
            scope.evaluate("abc/a"),
            Err(EvaluationError::CircularDependency {
                path: "abc/a".into(),
                chain: vec![
                    "abc/a".into(),
                    "abc/b".into(),
                    "abc/c".into(),
                    "abc/a".into()
                ],
            })
        );
        assert!(matches!(
            scope.evaluate("abc/b"),
            Err(EvaluationError::CircularDependency { .. })
        ));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let snapshot = snapshot(vec![("abc/a", flag(json!({ "@@key:abc/a": true })))]);
        let context = context(&[]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        assert!(matches!(
            scope.evaluate("abc/a"),
            Err(EvaluationError::CircularDependency { .. })
        ));
    }

    #[test]
    fn alias_reports_target_as_source() {
        let snapshot = snapshot(vec![
            ("abc/target", RuleDefinition::new("const", "\"v\"")),
            ("abc/alias", RuleDefinition::new("alias", "abc/target")),
            ("abc/alias2", RuleDefinition::new("alias", "abc/alias")),
            ("abc/dangling", RuleDefinition::new("alias", "abc/missing")),
        ]);
        let context = context(&[]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        let value = scope.evaluate("abc/alias2").unwrap().unwrap();
        assert_eq!(value.value, ConfigurationValue::from("v"));
        assert_eq!(value.source, "abc/target");
        assert_eq!(scope.evaluate("abc/dangling"), Ok(None));
    }

    #[test]
    fn default_value_applies_when_nothing_matches() {
        let definition = JPadBuilder::new()
            .with_value_type(ValueType::String)
            .with_default_value("fallback")
            .add_single_variant_rule(json!({ "device.prop": 1 }), "matched")
            .generate();
        let snapshot = snapshot(vec![("abc/path", definition)]);
        let context = context(&[]);
        let mut scope = EvaluationScope::new(&snapshot, &context, false);

        let value = scope.evaluate("abc/path").unwrap().unwrap();
        assert_eq!(value.value, ConfigurationValue::from("fallback"));
        assert_eq!(value.source, "abc/path");
    }
}
