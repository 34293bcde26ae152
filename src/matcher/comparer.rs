//! Typed comparison of context values.
use std::{cmp::Ordering, collections::HashMap, fmt::Debug, sync::Arc};

use crate::value::{parse_date, parse_version};

/// Compares a context value with a matcher operand under a specific type.
pub trait Comparer: Debug + Send + Sync {
    /// Returns `None` if either side cannot be read as the comparer's type.
    fn compare(&self, value: &str, operand: &str) -> Option<Ordering>;
}

/// Compares semantic versions (`1.2` reads as `1.2.0`).
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionComparer;

impl Comparer for VersionComparer {
    fn compare(&self, value: &str, operand: &str) -> Option<Ordering> {
        Some(parse_version(value)?.cmp(&parse_version(operand)?))
    }
}

/// Compares dates.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateComparer;

impl Comparer for DateComparer {
    fn compare(&self, value: &str, operand: &str) -> Option<Ordering> {
        Some(parse_date(value)?.cmp(&parse_date(operand)?))
    }
}

/// Comparers by type name, plus declared types of context properties.
///
/// A matcher picks a comparer either explicitly (`{"$compare": "version", "$gt": "1.0.0"}`) or
/// through the declared type of the property it tests. Types without a registered comparer fall
/// back to plain literal comparison.
#[derive(Debug, Clone)]
pub struct ComparerRegistry {
    comparers: HashMap<String, Arc<dyn Comparer>>,
    property_types: HashMap<String, String>,
}

impl ComparerRegistry {
    /// A registry without any comparer.
    pub fn empty() -> ComparerRegistry {
        ComparerRegistry {
            comparers: HashMap::new(),
            property_types: HashMap::new(),
        }
    }

    pub fn with_comparer(
        mut self,
        type_name: impl AsRef<str>,
        comparer: impl Comparer + 'static,
    ) -> ComparerRegistry {
        self.comparers
            .insert(type_name.as_ref().to_lowercase(), Arc::new(comparer));
        self
    }

    /// Declare the type of a context property, e.g. `device.appversion` → `version`.
    pub fn with_property_type(
        mut self,
        property: impl AsRef<str>,
        type_name: impl AsRef<str>,
    ) -> ComparerRegistry {
        self.property_types.insert(
            property.as_ref().to_lowercase(),
            type_name.as_ref().to_lowercase(),
        );
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn Comparer>> {
        self.comparers.get(&type_name.to_lowercase()).cloned()
    }

    /// Comparer for the declared type of `property`, if any.
    pub fn for_property(&self, property: &str) -> Option<Arc<dyn Comparer>> {
        self.property_types
            .get(property)
            .and_then(|type_name| self.get(type_name))
    }
}

impl Default for ComparerRegistry {
    fn default() -> ComparerRegistry {
        ComparerRegistry::empty()
            .with_comparer("version", VersionComparer)
            .with_comparer("date", DateComparer)
    }
}
