use crate::{
    context::{property_name, GetContextValue, CREATION_DATE_PROPERTY, ID_PROPERTY},
    error::EvaluationError,
    sharder::{bucket_fraction, bucket_input},
    value::parse_date,
    ConfigurationValue,
};

use super::{Rule, RuleSet, RuleTree};

/// Result of running the rules of a single path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum RuleOutcome<'a> {
    Value(ConfigurationValue),
    /// The value is the value of another path.
    Alias(&'a str),
    NoMatch,
}

pub(crate) struct RuleEnv<'a> {
    pub path: &'a str,
    pub context: &'a dyn GetContextValue,
    pub strict_owner_identity: bool,
}

impl RuleSet {
    /// Run the rules against `env.context`. Default values are left to the caller.
    pub(crate) fn eval(&self, env: &RuleEnv) -> Result<RuleOutcome<'_>, EvaluationError> {
        self.tree.eval(env)
    }
}

impl RuleTree {
    fn eval(&self, env: &RuleEnv) -> Result<RuleOutcome<'_>, EvaluationError> {
        match self {
            RuleTree::Rules(rules) => {
                for rule in rules {
                    match rule.eval(env)? {
                        RuleOutcome::NoMatch => continue,
                        outcome => return Ok(outcome),
                    }
                }
                Ok(RuleOutcome::NoMatch)
            }
            RuleTree::Partition {
                property,
                branches,
                default,
            } => {
                let branch = env
                    .context
                    .get_value(property)
                    .and_then(|value| branches.get(&value.to_lowercase()));
                if let Some(branch) = branch {
                    let outcome = branch.eval(env)?;
                    if outcome != RuleOutcome::NoMatch {
                        return Ok(outcome);
                    }
                }
                match default {
                    Some(default) => default.eval(env),
                    None => Ok(RuleOutcome::NoMatch),
                }
            }
        }
    }
}

impl Rule {
    fn eval(&self, env: &RuleEnv) -> Result<RuleOutcome<'_>, EvaluationError> {
        match self {
            Rule::Const { value } => Ok(RuleOutcome::Value(value.clone())),
            Rule::Alias { target } => Ok(RuleOutcome::Alias(target)),
            Rule::SingleVariant { matcher, value } => Ok(if matcher.matches(env.context) {
                RuleOutcome::Value(value.clone())
            } else {
                RuleOutcome::NoMatch
            }),
            Rule::MultiVariant {
                matcher,
                owner_type,
                salt,
                distribution,
                sharder,
            } => {
                if !matcher.matches(env.context) {
                    return Ok(RuleOutcome::NoMatch);
                }

                let Some(owner_id) = env.context.get_value(&property_name(owner_type, ID_PROPERTY))
                else {
                    if env.strict_owner_identity {
                        return Err(EvaluationError::MissingIdentity {
                            path: env.path.to_owned(),
                            owner_type: owner_type.clone(),
                        });
                    }
                    return Ok(RuleOutcome::NoMatch);
                };

                let created_at = env
                    .context
                    .get_value(&property_name(owner_type, CREATION_DATE_PROPERTY))
                    .and_then(|date| parse_date(&date));
                let Some(distribution) = distribution.select(created_at) else {
                    return Ok(RuleOutcome::NoMatch);
                };

                let fraction =
                    bucket_fraction(sharder.as_ref(), &bucket_input(&owner_id, env.path, salt));
                Ok(distribution
                    .sample(fraction)
                    .map_or(RuleOutcome::NoMatch, RuleOutcome::Value))
            }
        }
    }
}
