use serde_json::{json, Map, Value};

use crate::{
    error::RuleDefinitionError,
    matcher::Matcher,
    rules::{Distribution, Distributions, Rule, RuleSet, RuleTree, DEFAULT_PARTITION},
    ConfigurationValue, ValueType,
};

use super::models::{JPadDocument, RuleDocument, RuleTypeWire};

type Result<T> = std::result::Result<T, RuleDefinitionError>;

/// Write `rules` as a `jpad` payload that parses back into equivalent rules.
///
/// Constants become match-all single-variant rules.
pub(crate) fn to_payload(rules: &RuleSet) -> Result<String> {
    let writer = Writer {
        value_type: rules.value_type(),
        match_all: Matcher::match_all(),
    };

    let document = JPadDocument {
        value_type: rules.value_type(),
        default_value: rules
            .default_value()
            .map(|value| writer.value(value))
            .transpose()?,
        partitions: partitions(rules.tree())?,
        rules: writer.tree(rules.tree())?,
    };

    let json = if document.value_type.is_none()
        && document.default_value.is_none()
        && document.partitions.is_empty()
    {
        document.rules
    } else {
        serde_json::to_value(&document).map_err(|err| not_serializable(err.to_string()))?
    };
    Ok(json.to_string())
}

struct Writer {
    value_type: Option<ValueType>,
    match_all: Matcher,
}

impl Writer {
    fn tree(&self, tree: &RuleTree) -> Result<Value> {
        match tree {
            RuleTree::Rules(rules) => Ok(Value::Array(
                rules
                    .iter()
                    .map(|rule| self.rule(rule))
                    .collect::<Result<_>>()?,
            )),
            RuleTree::Partition {
                branches, default, ..
            } => {
                let mut object = Map::with_capacity(branches.len() + 1);
                for (key, branch) in branches {
                    object.insert(key.clone(), self.tree(branch)?);
                }
                if let Some(default) = default {
                    object.insert(DEFAULT_PARTITION.to_owned(), self.tree(default)?);
                }
                Ok(Value::Object(object))
            }
        }
    }

    fn rule(&self, rule: &Rule) -> Result<Value> {
        let document = match rule {
            Rule::SingleVariant { matcher, value } => RuleDocument {
                matcher,
                rule_type: RuleTypeWire::SingleVariant,
                value: Some(self.value(value)?),
                owner_type: None,
                salt: None,
                value_distribution: None,
            },
            Rule::Const { value } => RuleDocument {
                matcher: &self.match_all,
                rule_type: RuleTypeWire::SingleVariant,
                value: Some(self.value(value)?),
                owner_type: None,
                salt: None,
                value_distribution: None,
            },
            Rule::MultiVariant {
                matcher,
                owner_type,
                salt,
                distribution,
                ..
            } => RuleDocument {
                matcher,
                rule_type: RuleTypeWire::MultiVariant,
                value: None,
                owner_type: Some(owner_type.as_str()),
                salt: Some(salt.as_str()),
                value_distribution: Some(self.distributions(distribution)?),
            },
            Rule::Alias { target } => {
                return Err(not_serializable(format!(
                    "alias to {target} cannot be combined with other rules"
                )))
            }
        };
        serde_json::to_value(document).map_err(|err| not_serializable(err.to_string()))
    }

    fn distributions(&self, distributions: &Distributions) -> Result<Value> {
        match distributions {
            Distributions::Single(distribution) => self.distribution(distribution),
            Distributions::TimePhased(phases) => phases
                .iter()
                .map(|(start, distribution)| {
                    Ok((start.to_rfc3339(), self.distribution(distribution)?))
                })
                .collect::<Result<Map<_, _>>>()
                .map(Value::Object),
        }
    }

    fn distribution(&self, distribution: &Distribution) -> Result<Value> {
        Ok(match distribution {
            Distribution::Bernoulli(p) => json!({ "type": "bernoulliTrial", "args": p }),
            Distribution::Weighted(entries) => {
                let args = entries
                    .iter()
                    .map(|(value, weight)| {
                        Ok(json!({ "value": self.value(value)?, "weight": weight }))
                    })
                    .collect::<Result<Vec<_>>>()?;
                json!({ "type": "weighted", "args": args })
            }
        })
    }

    /// Versions are written as strings and read back as strings unless the type is declared.
    fn value<'a>(&self, value: &'a ConfigurationValue) -> Result<&'a ConfigurationValue> {
        if self.value_type.is_none() && matches!(value, ConfigurationValue::Version(_)) {
            return Err(not_serializable(format!(
                "version {value} requires a declared value type"
            )));
        }
        Ok(value)
    }
}

/// Partition properties by depth. All branches must split on the same properties below them.
fn partitions(tree: &RuleTree) -> Result<Vec<&str>> {
    let RuleTree::Partition {
        property,
        branches,
        default,
    } = tree
    else {
        return Ok(Vec::new());
    };

    let mut nested: Option<Vec<&str>> = None;
    for branch in branches.values().chain(default.as_deref()) {
        let branch_partitions = partitions(branch)?;
        match &nested {
            None => nested = Some(branch_partitions),
            Some(existing) if *existing == branch_partitions => {}
            Some(existing) => {
                return Err(not_serializable(format!(
                    "branches of {property} are partitioned by both {existing:?} and {branch_partitions:?}"
                )))
            }
        }
    }

    let mut result = vec![property.as_str()];
    result.extend(nested.unwrap_or_default());
    Ok(result)
}

fn not_serializable(message: String) -> RuleDefinitionError {
    RuleDefinitionError::NotSerializable(message)
}
