use std::cmp::Ordering;

use chrono::Utc;

use super::{Comparer, Node, Op, Operand, Predicate};
use crate::{
    context::{GetContextValue, TIME_PROPERTY},
    value::{parse_bool, parse_date},
};

impl Node {
    pub(super) fn eval(&self, context: &dyn GetContextValue) -> bool {
        match self {
            Node::All(nodes) => nodes.iter().all(|node| node.eval(context)),
            Node::Any(nodes) => nodes.iter().any(|node| node.eval(context)),
            Node::Not(node) => !node.eval(context),
            Node::Property {
                property,
                predicate,
            } => {
                let value = context.get_value(property);
                predicate.eval(value.as_deref(), context)
            }
        }
    }
}

impl Predicate {
    /// Returns `false` if the predicate cannot be applied (missing property, unparseable value).
    fn eval(&self, value: Option<&str>, context: &dyn GetContextValue) -> bool {
        self.try_eval(value, context).unwrap_or(false)
    }

    /// Try applying the predicate, returning `None` if it cannot be applied.
    fn try_eval(&self, value: Option<&str>, context: &dyn GetContextValue) -> Option<bool> {
        match self {
            Predicate::All(predicates) => Some(predicates.iter().all(|p| p.eval(value, context))),
            Predicate::Any(predicates) => Some(predicates.iter().any(|p| p.eval(value, context))),
            Predicate::Not(predicate) => {
                // Negation does not make a missing property match.
                value?;
                Some(!predicate.eval(value, context))
            }
            Predicate::Compare {
                op,
                operand,
                comparer,
            } => compare(*op, value, operand, comparer.as_deref()),
            Predicate::In { operands, comparer } => Some(operands.iter().any(|operand| {
                compare(Op::Eq, value, operand, comparer.as_deref()).unwrap_or(false)
            })),
            Predicate::Contains(needle) => Some(value?.to_lowercase().contains(needle.as_str())),
            Predicate::StartsWith(prefix) => {
                Some(value?.to_lowercase().starts_with(prefix.as_str()))
            }
            Predicate::EndsWith(suffix) => Some(value?.to_lowercase().ends_with(suffix.as_str())),
            Predicate::Match(regex) => Some(regex.is_match(value?)),
            Predicate::WithinTime(duration) => {
                let date = parse_date(value?)?;
                let now = context
                    .get_value(TIME_PROPERTY)
                    .and_then(|now| parse_date(&now))
                    .unwrap_or_else(Utc::now);
                Some((now - date).abs() <= *duration)
            }
        }
    }
}

fn compare(
    op: Op,
    value: Option<&str>,
    operand: &Operand,
    comparer: Option<&dyn Comparer>,
) -> Option<bool> {
    let value = match (value, operand) {
        (value, Operand::Null) => {
            return match op {
                Op::Eq => Some(value.is_none()),
                Op::Ne => Some(value.is_some()),
                _ => None,
            }
        }
        (None, _) => return None,
        (Some(value), _) => value,
    };

    let ordering = match (comparer, operand) {
        (Some(comparer), operand) => comparer.compare(value, &operand_text(operand))?,
        (None, Operand::String(s)) => compare_strings(value, s)?,
        (None, Operand::Number(n)) => value.trim().parse::<f64>().ok()?.partial_cmp(n)?,
        (None, Operand::Bool(b)) => parse_bool(value)?.cmp(b),
        (None, Operand::Null) => return None,
    };

    Some(op.accepts(ordering))
}

/// Numeric if both sides are numbers, otherwise case-insensitive.
fn compare_strings(value: &str, operand: &str) -> Option<Ordering> {
    match (value.trim().parse::<f64>(), operand.trim().parse::<f64>()) {
        (Ok(value), Ok(operand)) => value.partial_cmp(&operand),
        _ => Some(value.to_lowercase().cmp(&operand.to_lowercase())),
    }
}

fn operand_text(operand: &Operand) -> String {
    match operand {
        Operand::String(s) => s.clone(),
        Operand::Number(n) => n.to_string(),
        Operand::Bool(b) => b.to_string(),
        Operand::Null => String::new(),
    }
}

impl Op {
    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            Op::Eq => ordering == Ordering::Equal,
            Op::Ne => ordering != Ordering::Equal,
            Op::Gt => ordering == Ordering::Greater,
            Op::Ge => ordering != Ordering::Less,
            Op::Lt => ordering == Ordering::Less,
            Op::Le => ordering != Ordering::Greater,
        }
    }
}
