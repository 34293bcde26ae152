use serde::{Deserialize, Serialize};

use crate::{matcher::Matcher, ConfigurationValue, ValueType};

/// Object form of a jpad payload. The bare form is just the `rules` array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JPadWire {
    #[serde(default)]
    pub value_type: Option<String>,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
    /// Context properties splitting the rules. `rules` is then nested one object level per
    /// partition, keyed by property value.
    #[serde(default)]
    pub partitions: Vec<String>,
    pub rules: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RuleWire {
    #[serde(default, alias = "id")]
    pub id: Option<String>,
    #[serde(default = "match_all", alias = "matcher")]
    pub matcher: serde_json::Value,
    #[serde(rename = "Type", default, alias = "type")]
    pub rule_type: RuleTypeWire,
    #[serde(default, alias = "value")]
    pub value: Option<serde_json::Value>,
    #[serde(default, alias = "ownerType")]
    pub owner_type: Option<String>,
    #[serde(default, alias = "salt")]
    pub salt: Option<String>,
    #[serde(default, alias = "valueDistribution")]
    pub value_distribution: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(super) enum RuleTypeWire {
    #[default]
    #[serde(alias = "singleVariant")]
    SingleVariant,
    #[serde(alias = "multiVariant")]
    MultiVariant,
}

#[derive(Debug, Deserialize)]
pub(super) struct DistributionWire {
    #[serde(rename = "type")]
    pub kind: String,
    pub args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub(super) struct WeightedEntryWire {
    pub value: serde_json::Value,
    pub weight: f64,
}

/// Object form written back from parsed rules.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct JPadDocument<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_type: Option<ValueType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<&'a ConfigurationValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<&'a str>,
    pub rules: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RuleDocument<'a> {
    pub matcher: &'a Matcher,
    #[serde(rename = "Type")]
    pub rule_type: RuleTypeWire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<&'a ConfigurationValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_distribution: Option<serde_json::Value>,
}

fn match_all() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}
