//! `jpad` rule format.
//!
//! A payload is either a bare array of rules or an object:
//!
//! ```json
//! {
//!   "valueType": "string",
//!   "defaultValue": "blue",
//!   "partitions": ["user.country"],
//!   "rules": {
//!     "israel": [{ "Matcher": { "user.beta": true }, "Value": "green", "Type": "SingleVariant" }],
//!     "*": [{
//!       "Id": "rollout",
//!       "Matcher": {},
//!       "Type": "MultiVariant",
//!       "OwnerType": "user",
//!       "ValueDistribution": { "type": "weighted", "args": { "red": 20, "blue": 80 } }
//!     }]
//!   }
//! }
//! ```
use std::collections::HashMap;

use serde_json::Value;

use crate::{
    error::RuleDefinitionError,
    matcher::Matcher,
    rules::{Distribution, Distributions, Rule, RuleSet, RuleTree, DEFAULT_PARTITION},
    value::parse_date,
    ConfigurationValue, ValueType,
};

use super::{ParserSettings, RuleParser};

mod builder;
mod models;
mod serializer;

pub use builder::JPadBuilder;
pub(crate) use serializer::to_payload;

use models::{DistributionWire, JPadWire, RuleTypeWire, RuleWire, WeightedEntryWire};

type Result<T> = std::result::Result<T, RuleDefinitionError>;

#[derive(Debug, Clone, Default)]
pub struct JPadParser {
    settings: ParserSettings,
}

impl JPadParser {
    pub fn new(settings: ParserSettings) -> JPadParser {
        JPadParser { settings }
    }
}

impl RuleParser for JPadParser {
    fn parse(&self, payload: &str) -> Result<RuleSet> {
        let json: Value = serde_json::from_str(payload).map_err(malformed)?;
        let document = match json {
            Value::Array(_) => JPadWire {
                value_type: None,
                default_value: None,
                partitions: Vec::new(),
                rules: json,
            },
            Value::Object(_) => serde_json::from_value(json).map_err(malformed)?,
            other => {
                return Err(RuleDefinitionError::MalformedPayload(format!(
                    "expected an array or an object, found {other}"
                )))
            }
        };

        let value_type = document
            .value_type
            .as_deref()
            .map(|name| name.parse::<ValueType>())
            .transpose()
            .map_err(RuleDefinitionError::MalformedPayload)?;

        let compiler = Compiler {
            settings: &self.settings,
            value_type,
        };
        let mut rules = RuleSet::new(compiler.tree(&document.partitions, &document.rules)?);
        if let Some(value_type) = value_type {
            rules = rules.with_value_type(value_type);
        }
        match &document.default_value {
            None | Some(Value::Null) => {}
            Some(default_value) => {
                rules = rules.with_default_value(compiler.value(default_value)?);
            }
        }
        Ok(rules)
    }
}

struct Compiler<'a> {
    settings: &'a ParserSettings,
    value_type: Option<ValueType>,
}

impl Compiler<'_> {
    fn tree(&self, partitions: &[String], rules: &Value) -> Result<RuleTree> {
        let Some((property, rest)) = partitions.split_first() else {
            let rules: Vec<RuleWire> = serde_json::from_value(rules.clone()).map_err(malformed)?;
            return Ok(RuleTree::Rules(
                rules
                    .into_iter()
                    .map(|rule| self.rule(rule))
                    .collect::<Result<_>>()?,
            ));
        };

        let Value::Object(object) = rules else {
            return Err(RuleDefinitionError::MalformedPayload(format!(
                "rules partitioned by {property} must be an object keyed by property value"
            )));
        };

        let mut branches = HashMap::with_capacity(object.len());
        let mut default = None;
        for (key, branch) in object {
            let tree = self.tree(rest, branch)?;
            if key == DEFAULT_PARTITION {
                default = Some(Box::new(tree));
            } else {
                branches.insert(key.to_lowercase(), tree);
            }
        }

        Ok(RuleTree::Partition {
            property: property.to_lowercase(),
            branches,
            default,
        })
    }

    fn rule(&self, rule: RuleWire) -> Result<Rule> {
        let matcher = match &rule.matcher {
            Value::Null => Matcher::match_all(),
            matcher => Matcher::compile(matcher, &self.settings.comparers)?,
        };

        Ok(match rule.rule_type {
            RuleTypeWire::SingleVariant => {
                let value = rule.value.as_ref().ok_or_else(|| {
                    RuleDefinitionError::MalformedPayload("SingleVariant rule without Value".into())
                })?;
                Rule::SingleVariant {
                    matcher,
                    value: self.value(value)?,
                }
            }
            RuleTypeWire::MultiVariant => {
                let owner_type = rule.owner_type.ok_or_else(|| {
                    RuleDefinitionError::MalformedPayload("MultiVariant rule without OwnerType".into())
                })?;
                let distribution = rule.value_distribution.as_ref().ok_or_else(|| {
                    RuleDefinitionError::MalformedPayload(
                        "MultiVariant rule without ValueDistribution".into(),
                    )
                })?;
                Rule::MultiVariant {
                    matcher,
                    owner_type,
                    salt: rule.salt.or(rule.id).unwrap_or_default(),
                    distribution: self.distributions(distribution)?,
                    sharder: self.settings.sharder.clone(),
                }
            }
        })
    }

    fn value(&self, json: &Value) -> Result<ConfigurationValue> {
        ConfigurationValue::from_json(json, self.value_type).ok_or_else(|| {
            RuleDefinitionError::InvalidValue {
                value: json.to_string(),
                value_type: self.value_type,
            }
        })
    }

    /// A single distribution (has a `type`) or a map from start date to distribution.
    fn distributions(&self, json: &Value) -> Result<Distributions> {
        let Value::Object(object) = json else {
            return Err(invalid_distribution(format!("expected an object, found {json}")));
        };
        if object.contains_key("type") {
            return Ok(Distributions::Single(self.distribution(json)?));
        }

        let phases = object
            .iter()
            .map(|(start, distribution)| {
                let start = parse_date(start)
                    .ok_or_else(|| invalid_distribution(format!("invalid start date {start:?}")))?;
                Ok((start, self.distribution(distribution)?))
            })
            .collect::<Result<Vec<_>>>()?;
        if phases.is_empty() {
            return Err(invalid_distribution("no distribution".to_owned()));
        }
        Ok(Distributions::time_phased(phases))
    }

    fn distribution(&self, json: &Value) -> Result<Distribution> {
        let wire: DistributionWire =
            serde_json::from_value(json.clone()).map_err(|err| invalid_distribution(err.to_string()))?;

        match wire.kind.to_lowercase().as_str() {
            "bernoullitrial" | "bernoulli" => {
                if !matches!(self.value_type, None | Some(ValueType::Boolean)) {
                    return Err(invalid_distribution(format!(
                        "bernoulliTrial produces booleans, path type is {:?}",
                        self.value_type
                    )));
                }
                match wire.args.as_f64() {
                    Some(p) if (0.0..=1.0).contains(&p) => Ok(Distribution::Bernoulli(p)),
                    _ => Err(invalid_distribution(format!(
                        "bernoulliTrial expects a probability, found {}",
                        wire.args
                    ))),
                }
            }
            "weighted" => {
                let entries = match &wire.args {
                    Value::Object(weights) => weights
                        .iter()
                        .map(|(value, weight)| {
                            let weight = weight.as_f64().ok_or_else(|| {
                                invalid_distribution(format!("weight {weight} is not a number"))
                            })?;
                            Ok((self.value(&Value::String(value.clone()))?, weight))
                        })
                        .collect::<Result<Vec<_>>>()?,
                    Value::Array(_) => {
                        let entries: Vec<WeightedEntryWire> =
                            serde_json::from_value(wire.args.clone())
                                .map_err(|err| invalid_distribution(err.to_string()))?;
                        entries
                            .into_iter()
                            .map(|entry| Ok((self.value(&entry.value)?, entry.weight)))
                            .collect::<Result<Vec<_>>>()?
                    }
                    other => {
                        return Err(invalid_distribution(format!(
                            "weighted expects an object or an array, found {other}"
                        )))
                    }
                };
                if entries.iter().any(|(_, weight)| weight.is_nan() || *weight < 0.0) {
                    return Err(invalid_distribution("negative weight".to_owned()));
                }
                Ok(Distribution::Weighted(entries))
            }
            "uniform" => {
                let Value::Array(values) = &wire.args else {
                    return Err(invalid_distribution(format!(
                        "uniform expects an array, found {}",
                        wire.args
                    )));
                };
                Ok(Distribution::Weighted(
                    values
                        .iter()
                        .map(|value| Ok((self.value(value)?, 1.0)))
                        .collect::<Result<_>>()?,
                ))
            }
            other => Err(invalid_distribution(format!("unknown type {other:?}"))),
        }
    }
}

fn malformed(err: serde_json::Error) -> RuleDefinitionError {
    RuleDefinitionError::MalformedPayload(err.to_string())
}

fn invalid_distribution(message: String) -> RuleDefinitionError {
    RuleDefinitionError::InvalidDistribution(message)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use semver::Version;
    use serde_json::json;

    use super::JPadParser;
    use crate::{
        context::GetContextValue,
        error::RuleDefinitionError,
        parser::{ParserSettings, RuleParser},
        rules::{Distribution, Distributions, Rule, RuleEnv, RuleOutcome, RuleSet, RuleTree},
        ConfigurationValue, ValueType,
    };

    fn parse(payload: serde_json::Value) -> Result<RuleSet, RuleDefinitionError> {
        JPadParser::new(ParserSettings::default()).parse(&payload.to_string())
    }

    fn outcome(rules: &RuleSet, entries: &[(&str, &str)]) -> Option<ConfigurationValue> {
        let context: HashMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env = RuleEnv {
            path: "abc/path",
            context: &context as &dyn GetContextValue,
            strict_owner_identity: false,
        };
        match rules.eval(&env).unwrap() {
            RuleOutcome::Value(value) => Some(value),
            RuleOutcome::Alias(_) | RuleOutcome::NoMatch => None,
        }
    }

    fn single_rule(rules: &RuleSet) -> &Rule {
        match rules.tree() {
            RuleTree::Rules(rules) if rules.len() == 1 => &rules[0],
            other => panic!("expected a single rule, found {other:?}"),
        }
    }

    #[test]
    fn parses_bare_rules_array() {
        let rules = parse(json!([
            { "Matcher": { "device.SomeDeviceProp": 5 }, "Value": "SomeValue", "Type": "SingleVariant" },
            { "Matcher": {}, "Value": "Other" }
        ]))
        .unwrap();

        assert_eq!(rules.value_type(), None);
        assert_eq!(
            outcome(&rules, &[("device.somedeviceprop", "5")]),
            Some("SomeValue".into())
        );
        assert_eq!(outcome(&rules, &[]), Some("Other".into()));
    }

    #[test]
    fn parses_typed_document() {
        let rules = parse(json!({
            "valueType": "version",
            "defaultValue": "1.0",
            "rules": [{ "Matcher": { "device.beta": true }, "Value": "2.1.0" }]
        }))
        .unwrap();

        assert_eq!(rules.value_type(), Some(ValueType::Version));
        assert_eq!(
            rules.default_value(),
            Some(&ConfigurationValue::Version(Version::new(1, 0, 0)))
        );
        assert_eq!(
            outcome(&rules, &[("device.beta", "true")]),
            Some(ConfigurationValue::Version(Version::new(2, 1, 0)))
        );
    }

    #[test]
    fn parses_partitions() {
        let rules = parse(json!({
            "partitions": ["user.Country", "device.os"],
            "rules": {
                "Israel": {
                    "ios": [{ "Matcher": {}, "Value": "il-ios" }],
                    "*": [{ "Matcher": {}, "Value": "il" }]
                },
                "*": {
                    "*": [{ "Matcher": {}, "Value": "default" }]
                }
            }
        }))
        .unwrap();

        assert_eq!(
            outcome(&rules, &[("user.country", "israel"), ("device.os", "iOS")]),
            Some("il-ios".into())
        );
        assert_eq!(
            outcome(&rules, &[("user.country", "israel"), ("device.os", "android")]),
            Some("il".into())
        );
        assert_eq!(outcome(&rules, &[("user.country", "spain")]), Some("default".into()));
    }

    #[test]
    fn parses_distributions() {
        let rule = |distribution: serde_json::Value| {
            json!([{
                "Id": "rule-1",
                "Type": "MultiVariant",
                "OwnerType": "user",
                "ValueDistribution": distribution
            }])
        };

        let bernoulli = parse(rule(json!({ "type": "bernoulliTrial", "args": 0.3 }))).unwrap();
        match single_rule(&bernoulli) {
            Rule::MultiVariant {
                salt, distribution, ..
            } => {
                assert_eq!(salt, "rule-1");
                assert_eq!(distribution, &Distributions::Single(Distribution::Bernoulli(0.3)));
            }
            other => panic!("unexpected rule {other:?}"),
        }

        let weighted = parse(rule(json!({ "type": "weighted", "args": { "a": 1, "b": 3 } }))).unwrap();
        let weighted_array = parse(rule(json!({
            "type": "weighted",
            "args": [{ "value": "a", "weight": 1 }, { "value": "b", "weight": 3 }]
        })))
        .unwrap();
        for rules in [&weighted, &weighted_array] {
            let Rule::MultiVariant { distribution, .. } = single_rule(rules) else {
                panic!("expected a multi-variant rule");
            };
            let Distributions::Single(Distribution::Weighted(entries)) = distribution else {
                panic!("expected a weighted distribution");
            };
            let mut entries = entries.clone();
            entries.sort_by(|a, b| a.1.total_cmp(&b.1));
            assert_eq!(
                entries,
                vec![
                    (ConfigurationValue::from("a"), 1.0),
                    (ConfigurationValue::from("b"), 3.0)
                ]
            );
        }

        let uniform = parse(rule(json!({ "type": "uniform", "args": ["x", "y"] }))).unwrap();
        let Rule::MultiVariant { distribution, .. } = single_rule(&uniform) else {
            panic!("expected a multi-variant rule");
        };
        assert_eq!(
            distribution,
            &Distributions::Single(Distribution::Weighted(vec![
                ("x".into(), 1.0),
                ("y".into(), 1.0)
            ]))
        );
    }

    #[test]
    fn parses_time_phased_distribution() {
        let rules = parse(json!([{
            "Type": "MultiVariant",
            "OwnerType": "user",
            "Salt": "phased",
            "ValueDistribution": {
                "08/08/08": { "type": "bernoulliTrial", "args": 0 },
                "06/06/06": { "type": "bernoulliTrial", "args": 1 }
            }
        }]))
        .unwrap();

        let Rule::MultiVariant { distribution, salt, .. } = single_rule(&rules) else {
            panic!("expected a multi-variant rule");
        };
        assert_eq!(salt, "phased");
        let Distributions::TimePhased(phases) = distribution else {
            panic!("expected phases");
        };
        assert_eq!(phases.len(), 2);
        assert!(phases[0].0 < phases[1].0);
        assert_eq!(phases[0].1, Distribution::Bernoulli(1.0));
    }

    #[test]
    fn converts_values_to_declared_type() {
        let rules = parse(json!({
            "valueType": "number",
            "rules": [{ "Matcher": {}, "Value": "5" }]
        }))
        .unwrap();
        assert_eq!(outcome(&rules, &[]), Some(ConfigurationValue::Number(5.0)));

        assert_eq!(
            parse(json!({ "valueType": "number", "rules": [{ "Value": "five" }] })).unwrap_err(),
            RuleDefinitionError::InvalidValue {
                value: "\"five\"".into(),
                value_type: Some(ValueType::Number)
            }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        let bad = |payload: &str| JPadParser::default().parse(payload).unwrap_err();

        assert!(matches!(bad("[{"), RuleDefinitionError::MalformedPayload(_)));
        assert!(matches!(bad("42"), RuleDefinitionError::MalformedPayload(_)));
        assert!(matches!(
            bad(r#"{ "valueType": "object", "rules": [] }"#),
            RuleDefinitionError::MalformedPayload(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Matcher": {} }]"#),
            RuleDefinitionError::MalformedPayload(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Matcher": { "$bogus": 1 }, "Value": 1 }]"#),
            RuleDefinitionError::InvalidMatcher(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Type": "MultiVariant", "ValueDistribution": { "type": "uniform", "args": [1] } }]"#),
            RuleDefinitionError::MalformedPayload(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Type": "MultiVariant", "OwnerType": "user", "ValueDistribution": { "type": "bernoulliTrial", "args": 1.5 } }]"#),
            RuleDefinitionError::InvalidDistribution(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Type": "MultiVariant", "OwnerType": "user", "ValueDistribution": { "type": "dice", "args": 6 } }]"#),
            RuleDefinitionError::InvalidDistribution(_)
        ));
        assert!(matches!(
            bad(r#"[{ "Type": "MultiVariant", "OwnerType": "user", "ValueDistribution": { "someday": { "type": "uniform", "args": [1] } } }]"#),
            RuleDefinitionError::InvalidDistribution(_)
        ));
        assert!(matches!(
            bad(r#"{ "valueType": "string", "rules": [{ "Type": "MultiVariant", "OwnerType": "user", "ValueDistribution": { "type": "bernoulliTrial", "args": 0.5 } }] }"#),
            RuleDefinitionError::InvalidDistribution(_)
        ));
        assert!(matches!(
            bad(r#"{ "partitions": ["user.country"], "rules": [] }"#),
            RuleDefinitionError::MalformedPayload(_)
        ));
    }
}
