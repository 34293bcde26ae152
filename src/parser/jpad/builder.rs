use serde_json::{json, Value};

use crate::{rules::RuleDefinition, ValueType};

/// Builds `jpad` rule definitions.
///
/// ```
/// # use serde_json::json;
/// # use tweek_core::parser::JPadBuilder;
/// let definition = JPadBuilder::new()
///     .add_single_variant_rule(json!({ "device.SomeDeviceProp": 5 }), "SomeValue")
///     .add_multi_variant_rule(json!({}), "user", json!({ "type": "bernoulliTrial", "args": 0.5 }))
///     .generate();
/// assert_eq!(definition.format, "jpad");
/// ```
#[derive(Debug, Clone, Default)]
pub struct JPadBuilder {
    value_type: Option<ValueType>,
    default_value: Option<Value>,
    rules: Vec<Value>,
}

impl JPadBuilder {
    pub fn new() -> JPadBuilder {
        JPadBuilder::default()
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> JPadBuilder {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_default_value(mut self, value: impl Into<Value>) -> JPadBuilder {
        self.default_value = Some(value.into());
        self
    }

    pub fn add_single_variant_rule(mut self, matcher: Value, value: impl Into<Value>) -> JPadBuilder {
        let id = self.next_rule_id();
        self.rules.push(json!({
            "Id": id,
            "Matcher": matcher,
            "Value": value.into(),
            "Type": "SingleVariant",
        }));
        self
    }

    /// Add a multi-variant rule. The generated rule id doubles as the bucketing salt.
    pub fn add_multi_variant_rule(
        mut self,
        matcher: Value,
        owner_type: &str,
        distribution: Value,
    ) -> JPadBuilder {
        let id = self.next_rule_id();
        self.rules.push(json!({
            "Id": id,
            "Matcher": matcher,
            "Type": "MultiVariant",
            "OwnerType": owner_type,
            "ValueDistribution": distribution,
        }));
        self
    }

    pub fn generate(&self) -> RuleDefinition {
        let rules = Value::Array(self.rules.clone());
        let payload = if self.value_type.is_none() && self.default_value.is_none() {
            rules
        } else {
            let mut document = json!({ "rules": rules });
            if let Some(value_type) = self.value_type {
                document["valueType"] = value_type.name().into();
            }
            if let Some(default_value) = &self.default_value {
                document["defaultValue"] = default_value.clone();
            }
            document
        };
        RuleDefinition::new("jpad", payload.to_string())
    }

    fn next_rule_id(&self) -> String {
        format!("rule-{}", self.rules.len() + 1)
    }
}
