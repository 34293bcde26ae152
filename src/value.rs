use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use derive_more::From;
use semver::Version;
use serde::{Deserialize, Serialize, Serializer};

/// Declared type of the values a rule set produces.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Version,
}

/// A resolved configuration value.
///
/// Values are converted to their declared [`ValueType`] when rules are parsed, so evaluation never
/// has to coerce types.
#[derive(Debug, Clone, PartialEq, From)]
pub enum ConfigurationValue {
    String(String),
    Number(f64),
    Bool(bool),
    Version(Version),
}

impl ConfigurationValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ConfigurationValue::String(_) => ValueType::String,
            ConfigurationValue::Number(_) => ValueType::Number,
            ConfigurationValue::Bool(_) => ValueType::Boolean,
            ConfigurationValue::Version(_) => ValueType::Version,
        }
    }

    /// Convert a JSON value without a declared type. Only scalars are accepted.
    pub fn infer(json: &serde_json::Value) -> Option<ConfigurationValue> {
        match json {
            serde_json::Value::String(s) => Some(ConfigurationValue::String(s.clone())),
            serde_json::Value::Number(n) => n.as_f64().map(ConfigurationValue::Number),
            serde_json::Value::Bool(b) => Some(ConfigurationValue::Bool(*b)),
            _ => None,
        }
    }

    /// Convert a JSON value under the declared type, or infer the type if none is declared.
    pub fn from_json(
        json: &serde_json::Value,
        value_type: Option<ValueType>,
    ) -> Option<ConfigurationValue> {
        match value_type {
            Some(ty) => ty.convert(json),
            None => ConfigurationValue::infer(json),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ConfigurationValue::String(s) => serde_json::Value::String(s.clone()),
            ConfigurationValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            ConfigurationValue::Bool(b) => serde_json::Value::Bool(*b),
            ConfigurationValue::Version(v) => serde_json::Value::String(v.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigurationValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ConfigurationValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigurationValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_version(&self) -> Option<&Version> {
        match self {
            ConfigurationValue::Version(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for ConfigurationValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl fmt::Display for ConfigurationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationValue::String(s) => f.write_str(s),
            ConfigurationValue::Number(n) => write!(f, "{n}"),
            ConfigurationValue::Bool(b) => write!(f, "{b}"),
            ConfigurationValue::Version(v) => write!(f, "{v}"),
        }
    }
}

impl Serialize for ConfigurationValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ConfigurationValue::String(s) => serializer.serialize_str(s),
            ConfigurationValue::Number(n) => serializer.serialize_f64(*n),
            ConfigurationValue::Bool(b) => serializer.serialize_bool(*b),
            ConfigurationValue::Version(v) => serializer.collect_str(v),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<ValueType, String> {
        match s.trim().to_lowercase().as_str() {
            "string" => Ok(ValueType::String),
            "number" => Ok(ValueType::Number),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            "version" => Ok(ValueType::Version),
            other => Err(format!("unknown value type {other:?}")),
        }
    }
}

impl log::kv::ToValue for ConfigurationValue {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Version => "version",
        }
    }

    /// Convert `json` to a value of this type. Strings are accepted for every type as long as
    /// they parse.
    pub fn convert(self, json: &serde_json::Value) -> Option<ConfigurationValue> {
        use serde_json::Value as Json;

        Some(match (self, json) {
            (ValueType::String, Json::String(s)) => ConfigurationValue::String(s.clone()),
            (ValueType::String, Json::Number(n)) => ConfigurationValue::String(n.to_string()),
            (ValueType::String, Json::Bool(b)) => ConfigurationValue::String(b.to_string()),

            (ValueType::Number, Json::Number(n)) => ConfigurationValue::Number(n.as_f64()?),
            (ValueType::Number, Json::String(s)) => {
                let n = s.trim().parse::<f64>().ok()?;
                if !n.is_finite() {
                    return None;
                }
                ConfigurationValue::Number(n)
            }

            (ValueType::Boolean, Json::Bool(b)) => ConfigurationValue::Bool(*b),
            (ValueType::Boolean, Json::String(s)) => ConfigurationValue::Bool(parse_bool(s)?),

            (ValueType::Version, Json::String(s)) => ConfigurationValue::Version(parse_version(s)?),

            _ => return None,
        })
    }

    /// Convert a context string (e.g. a fixed override) to a value of this type.
    pub fn convert_str(self, s: &str) -> Option<ConfigurationValue> {
        self.convert(&serde_json::Value::String(s.to_owned()))
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse a semantic version, accepting `major` and `major.minor` shorthands.
pub(crate) fn parse_version(s: &str) -> Option<Version> {
    let s = s.trim();
    if let Ok(version) = Version::parse(s) {
        return Some(version);
    }
    let parts = s.split('.').collect::<Vec<_>>();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        *slot = part.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

// Two-digit years must be tried first, `%Y` would read "08" as year 8.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%y", "%m/%d/%Y"];
const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse a date as found in context properties and distribution schedules. Dates without an
/// offset are taken as UTC.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.with_timezone(&Utc));
    }
    if let Some(date) = DATE_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
    {
        return Some(date.and_utc());
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc())
}
