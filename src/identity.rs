use std::fmt;

use serde::{Deserialize, Serialize};

/// A typed subject that requests configuration, e.g. `user/123` or `device/456`.
///
/// Identities are used both to fetch stored context and as bucketing keys for multi-variant rules.
/// The type is case-sensitive and the id is opaque. Context property names are not, so types that
/// differ only in case share a namespace in the [merged context](crate::context::Context::merge).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    #[serde(rename = "type")]
    identity_type: String,
    id: String,
}

impl Identity {
    /// Create a new identity.
    ///
    /// ```
    /// # use tweek_core::Identity;
    /// let identity = Identity::new("device", "456");
    /// assert_eq!(identity.to_string(), "device/456");
    /// ```
    pub fn new(identity_type: impl Into<String>, id: impl Into<String>) -> Identity {
        Identity {
            identity_type: identity_type.into(),
            id: id.into(),
        }
    }

    pub fn identity_type(&self) -> &str {
        &self.identity_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.identity_type, self.id)
    }
}

impl log::kv::ToValue for Identity {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::Identity;

    #[test]
    fn type_is_case_sensitive() {
        let identities: HashSet<Identity> = [
            Identity::new("device", "1"),
            Identity::new("Device", "1"),
            Identity::new("device", "1"),
        ]
        .into();
        assert_eq!(identities.len(), 2);
    }

    #[test]
    fn orders_by_type_then_id() {
        let mut identities = vec![
            Identity::new("user", "1"),
            Identity::new("device", "2"),
            Identity::new("device", "1"),
        ];
        identities.sort();
        assert_eq!(
            identities,
            vec![
                Identity::new("device", "1"),
                Identity::new("device", "2"),
                Identity::new("user", "1"),
            ]
        );
    }
}
