//! Evaluation context: a flat, read-only property bag assembled from the stored context of every
//! requesting identity.
//!
//! Stored properties are namespaced by identity type, so `SomeDeviceProp` of `device/1` is visible
//! as `device.somedeviceprop`. Property names are case-insensitive and are normalized to lower
//! case. Two prefixes are handled specially:
//!
//! - `@fixed:<path>` stored on an identity forces the value of `<path>`, bypassing its rules.
//! - `@@key:<path>` (or `keys.<path>`) used in a matcher reads the calculated value of another
//!   path. These are not stored; the engine resolves them while evaluating.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{path, Identity};

mod driver;
mod multi;

pub use driver::{ContextDriver, InMemoryContextDriver};
pub use multi::MultiContextDriver;

/// Properties stored for a single identity.
pub type ContextProperties = HashMap<String, serde_json::Value>;

pub const FIXED_PREFIX: &str = "@fixed:";
pub const DEPENDENCY_PREFIX: &str = "@@key:";
pub const KEYS_PREFIX: &str = "keys.";
/// Built-in property holding the evaluation time.
pub const TIME_PROPERTY: &str = "system.time_utc";
/// Built-in property suffix holding the identity id, e.g. `device.@@id`.
pub const ID_PROPERTY: &str = "@@id";
/// Stored property holding the identity creation date.
pub const CREATION_DATE_PROPERTY: &str = "@creationdate";

/// Read access to context properties. `property` is expected in normalized (lower) case.
pub trait GetContextValue {
    fn get_value(&self, property: &str) -> Option<String>;
}

impl GetContextValue for HashMap<String, String> {
    fn get_value(&self, property: &str) -> Option<String> {
        self.get(property).cloned()
    }
}

/// Merged context of all identities taking part in a calculation.
#[derive(Debug, Clone, Default)]
pub struct Context {
    properties: HashMap<String, String>,
    fixed: BTreeMap<String, serde_json::Value>,
}

impl Context {
    /// Merge stored contexts of `identities` into a single context evaluated at `now`.
    ///
    /// Contexts are merged in identity order, so the result does not depend on the order in which
    /// fetches completed. Identity types that differ only in case share a namespace. If two
    /// identities set the same property or fix the same path, the first identity in that order
    /// wins.
    pub fn merge<'a>(
        identities: impl IntoIterator<Item = (&'a Identity, &'a ContextProperties)>,
        now: DateTime<Utc>,
    ) -> Context {
        let mut sorted = identities.into_iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut context = Context::default();
        for (identity, properties) in sorted {
            for (name, value) in properties {
                if let Some(fixed_path) = strip_prefix_ignore_case(name, FIXED_PREFIX) {
                    context
                        .fixed
                        .entry(path::normalize(fixed_path))
                        .or_insert_with(|| value.clone());
                    continue;
                }
                if let Some(rendered) = render_value(value) {
                    context
                        .properties
                        .entry(property_name(identity.identity_type(), name))
                        .or_insert(rendered);
                }
            }
            context
                .properties
                .entry(property_name(identity.identity_type(), ID_PROPERTY))
                .or_insert_with(|| identity.id().to_owned());
        }
        context.properties.insert(
            TIME_PROPERTY.to_owned(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        );
        context
    }

    /// Look up a property by name (case-insensitive).
    pub fn get(&self, property: &str) -> Option<&str> {
        self.properties
            .get(&property.to_lowercase())
            .map(String::as_str)
    }

    /// Fixed value for `path`, if any identity forces one.
    pub fn fixed_value(&self, path: &str) -> Option<&serde_json::Value> {
        self.fixed.get(path)
    }

    /// All fixed paths, in order.
    pub fn fixed_paths(&self) -> impl Iterator<Item = &str> {
        self.fixed.keys().map(String::as_str)
    }
}

impl GetContextValue for Context {
    fn get_value(&self, property: &str) -> Option<String> {
        self.properties.get(property).cloned()
    }
}

/// Name under which `name` of an identity of `identity_type` is visible in the context.
pub(crate) fn property_name(identity_type: &str, name: &str) -> String {
    format!("{identity_type}.{name}").to_lowercase()
}

/// If `property` references another path's value, return that path.
pub(crate) fn dependency_path(property: &str) -> Option<String> {
    strip_prefix_ignore_case(property, DEPENDENCY_PREFIX)
        .or_else(|| strip_prefix_ignore_case(property, KEYS_PREFIX))
        .map(path::normalize)
}

/// Render a stored JSON value as a context string. `null` means absent.
pub(crate) fn render_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}
