use std::sync::Arc;

use regex::Regex;
use serde_json::{Map, Value};

use super::{Comparer, ComparerRegistry, Matcher, Node, Op, Operand, Predicate};
use crate::{context::dependency_path, error::RuleDefinitionError};

type Result<T> = std::result::Result<T, RuleDefinitionError>;

pub(super) fn compile(source: &Value, comparers: &ComparerRegistry) -> Result<Matcher> {
    let object = as_object(source)?;

    let ignore_key_types = match find_key(object, "$ignoreKeyTypes") {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(other) => {
            return Err(invalid(format!(
                "$ignoreKeyTypes must be a boolean, found {other}"
            )))
        }
    };

    let compiler = Compiler {
        comparers,
        ignore_key_types,
    };
    let root = compiler.node(object)?;

    let mut dependencies = Vec::new();
    root.collect_dependencies(&mut dependencies);

    Ok(Matcher {
        source: source.clone(),
        root,
        dependencies,
    })
}

struct Compiler<'a> {
    comparers: &'a ComparerRegistry,
    /// Compare all literals as strings and ignore declared property types.
    ignore_key_types: bool,
}

impl Compiler<'_> {
    fn node(&self, object: &Map<String, Value>) -> Result<Node> {
        let mut nodes = Vec::with_capacity(object.len());
        for (key, value) in object {
            if !key.starts_with('$') {
                let property = key.to_lowercase();
                let comparer = if self.ignore_key_types {
                    None
                } else {
                    self.comparers.for_property(&property)
                };
                nodes.push(Node::Property {
                    predicate: self.predicate(value, comparer)?,
                    property,
                });
                continue;
            }

            match key.to_lowercase().as_str() {
                "$ignorekeytypes" => {}
                "$or" => nodes.push(Node::Any(self.nodes(value)?)),
                "$and" => nodes.push(Node::All(self.nodes(value)?)),
                "$not" => nodes.push(Node::Not(Box::new(self.node(as_object(value)?)?))),
                _ => return Err(invalid(format!("unknown matcher operator {key}"))),
            }
        }

        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            Node::All(nodes)
        })
    }

    /// Operands of a top-level `$or`/`$and`: either an array of matchers or an object whose
    /// entries are separate conditions.
    fn nodes(&self, value: &Value) -> Result<Vec<Node>> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.node(as_object(item)?))
                .collect(),
            Value::Object(object) => object
                .iter()
                .map(|(key, value)| {
                    let mut single = Map::new();
                    single.insert(key.clone(), value.clone());
                    self.node(&single)
                })
                .collect(),
            other => Err(invalid(format!(
                "expected an array or an object of conditions, found {other}"
            ))),
        }
    }

    fn predicate(&self, value: &Value, comparer: Option<Arc<dyn Comparer>>) -> Result<Predicate> {
        match value {
            Value::Array(items) => Ok(Predicate::In {
                operands: items
                    .iter()
                    .map(|item| self.operand(item))
                    .collect::<Result<_>>()?,
                comparer,
            }),
            Value::Object(object) => {
                let mut predicates = self.operators(object, comparer)?;
                match predicates.len() {
                    0 => Err(invalid("empty condition".to_owned())),
                    1 => Ok(predicates.remove(0)),
                    _ => Ok(Predicate::All(predicates)),
                }
            }
            scalar => Ok(Predicate::Compare {
                op: Op::Eq,
                operand: self.operand(scalar)?,
                comparer,
            }),
        }
    }

    /// Compile every operator of a condition object. `$compare` applies to all operators of the
    /// object, including nested ones.
    fn operators(
        &self,
        object: &Map<String, Value>,
        comparer: Option<Arc<dyn Comparer>>,
    ) -> Result<Vec<Predicate>> {
        let comparer = match find_key(object, "$compare") {
            None => comparer,
            Some(Value::String(type_name)) => self.comparers.get(type_name),
            Some(other) => {
                return Err(invalid(format!(
                    "$compare expects a type name, found {other}"
                )))
            }
        };

        let mut predicates = Vec::with_capacity(object.len());
        for (key, value) in object {
            let op = match key.to_lowercase().as_str() {
                "$compare" => continue,
                "$eq" => Op::Eq,
                "$ne" => Op::Ne,
                "$gt" => Op::Gt,
                "$ge" => Op::Ge,
                "$lt" => Op::Lt,
                "$le" => Op::Le,
                "$in" => {
                    let Value::Array(_) = value else {
                        return Err(invalid(format!("$in expects an array, found {value}")));
                    };
                    predicates.push(self.predicate(value, comparer.clone())?);
                    continue;
                }
                "$contains" => {
                    predicates.push(Predicate::Contains(text(key, value)?.to_lowercase()));
                    continue;
                }
                "$startswith" => {
                    predicates.push(Predicate::StartsWith(text(key, value)?.to_lowercase()));
                    continue;
                }
                "$endswith" => {
                    predicates.push(Predicate::EndsWith(text(key, value)?.to_lowercase()));
                    continue;
                }
                "$match" => {
                    let pattern = text(key, value)?;
                    let regex = Regex::new(&pattern)
                        .map_err(|err| invalid(format!("invalid $match pattern: {err}")))?;
                    predicates.push(Predicate::Match(regex));
                    continue;
                }
                "$withintime" => {
                    predicates.push(Predicate::WithinTime(parse_duration(&text(key, value)?)?));
                    continue;
                }
                "$not" => {
                    predicates.push(Predicate::Not(Box::new(
                        self.predicate(value, comparer.clone())?,
                    )));
                    continue;
                }
                "$or" => {
                    predicates.push(Predicate::Any(self.predicates(value, &comparer)?));
                    continue;
                }
                "$and" => {
                    predicates.push(Predicate::All(self.predicates(value, &comparer)?));
                    continue;
                }
                _ if key.starts_with('$') => {
                    return Err(invalid(format!("unknown operator {key}")))
                }
                _ => return Err(invalid(format!("expected an operator, found {key}"))),
            };

            if matches!(value, Value::Array(_) | Value::Object(_)) {
                return Err(invalid(format!("{key} expects a literal, found {value}")));
            }
            predicates.push(Predicate::Compare {
                op,
                operand: self.operand(value)?,
                comparer: comparer.clone(),
            });
        }
        Ok(predicates)
    }

    /// Operands of a property-level `$or`/`$and`.
    fn predicates(
        &self,
        value: &Value,
        comparer: &Option<Arc<dyn Comparer>>,
    ) -> Result<Vec<Predicate>> {
        match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.predicate(item, comparer.clone()))
                .collect(),
            Value::Object(object) => self.operators(object, comparer.clone()),
            other => Err(invalid(format!(
                "expected an array or an object of operators, found {other}"
            ))),
        }
    }

    fn operand(&self, value: &Value) -> Result<Operand> {
        Ok(match value {
            Value::Null => Operand::Null,
            Value::String(s) => Operand::String(s.clone()),
            Value::Number(n) if self.ignore_key_types => Operand::String(n.to_string()),
            Value::Number(n) => Operand::Number(
                n.as_f64()
                    .ok_or_else(|| invalid(format!("unsupported number {n}")))?,
            ),
            Value::Bool(b) if self.ignore_key_types => Operand::String(b.to_string()),
            Value::Bool(b) => Operand::Bool(*b),
            other => return Err(invalid(format!("expected a literal, found {other}"))),
        })
    }
}

impl Node {
    fn collect_dependencies(&self, dependencies: &mut Vec<String>) {
        match self {
            Node::All(nodes) | Node::Any(nodes) => {
                for node in nodes {
                    node.collect_dependencies(dependencies);
                }
            }
            Node::Not(node) => node.collect_dependencies(dependencies),
            Node::Property { property, .. } => {
                if let Some(path) = dependency_path(property) {
                    if !dependencies.contains(&path) {
                        dependencies.push(path);
                    }
                }
            }
        }
    }
}

/// Parse `<n>s`, `<n>m`, `<n>h` or `<n>d`.
fn parse_duration(s: &str) -> Result<chrono::Duration> {
    let s = s.trim();
    let error = || invalid(format!("invalid $withinTime duration {s:?}"));

    let unit = s.chars().last().ok_or_else(error)?;
    let amount: i64 = s[..s.len() - unit.len_utf8()]
        .trim()
        .parse()
        .map_err(|_| error())?;
    match unit.to_ascii_lowercase() {
        's' => chrono::Duration::try_seconds(amount),
        'm' => chrono::Duration::try_minutes(amount),
        'h' => chrono::Duration::try_hours(amount),
        'd' => chrono::Duration::try_days(amount),
        _ => None,
    }
    .ok_or_else(error)
}

fn text(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(invalid(format!("{key} expects a string, found {other}"))),
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| invalid(format!("matcher must be an object, found {value}")))
}

fn find_key<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v)
}

fn invalid(message: String) -> RuleDefinitionError {
    RuleDefinitionError::InvalidMatcher(message)
}
