use std::{collections::BTreeMap, sync::Arc};

use crate::{Identity, ValueType};

/// Represents a result type for engine operations.
///
/// This `Result` type is a standard Rust `Result` type where the error variant is the
/// crate-specific [`Error`] enum.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a whole operation.
///
/// Per-path problems during a calculation are not reported here but collected as
/// [`EvaluationError`]s next to the successful results.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// No rules snapshot has been loaded yet.
    #[error("rules have not been loaded yet")]
    RulesNotLoaded,

    /// Context for one of the requested identities could not be fetched. There is no safe partial
    /// answer in this case, so the whole calculation fails.
    #[error("failed to fetch context for {identity}")]
    ContextDriver {
        identity: Identity,
        #[source]
        source: DriverError,
    },

    /// The rules driver failed to provide a version or a ruleset.
    #[error("rules driver failed")]
    RulesDriver(#[source] DriverError),

    /// At least one path failed while the caller asked to ensure success.
    #[error("calculation failed for {} path(s)", errors.len())]
    CalculationFailed {
        errors: BTreeMap<String, EvaluationError>,
    },

    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The background rules poller stopped before rules were loaded.
    #[error("rules poller stopped")]
    PollerStopped,
}

/// Failure of an external driver (context store or rules source).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum DriverError {
    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// The driver returned a payload that could not be decoded.
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    #[error(transparent)]
    Decode(Arc<serde_json::Error>),

    /// The driver answered, but not with something usable.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The backing store is not reachable.
    #[error("driver unavailable: {0}")]
    Unavailable(String),
}

impl From<reqwest::Error> for DriverError {
    fn from(value: reqwest::Error) -> Self {
        DriverError::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for DriverError {
    fn from(value: serde_json::Error) -> Self {
        DriverError::Decode(Arc::new(value))
    }
}

/// A rule payload could not be parsed. Isolated to the path it belongs to.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RuleDefinitionError {
    #[error("unknown rule format {0:?}")]
    UnknownFormat(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("invalid matcher: {0}")]
    InvalidMatcher(String),

    #[error("{value} is not a valid {}", .value_type.map_or("value", ValueType::name))]
    InvalidValue {
        value: String,
        value_type: Option<ValueType>,
    },

    #[error("invalid value distribution: {0}")]
    InvalidDistribution(String),

    /// Rules built in code that no rule format can express.
    #[error("rules cannot be serialized: {0}")]
    NotSerializable(String),
}

/// Failure to evaluate a single path. Does not affect other paths in the same calculation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EvaluationError {
    /// The path's rule definition failed to parse when the snapshot was loaded.
    #[error("invalid rule definition for {path}: {source}")]
    InvalidRuleDefinition {
        path: String,
        source: RuleDefinitionError,
    },

    /// Resolving dependencies revisited a path that is already being resolved.
    #[error("circular dependency detected at {path}: {}", chain.join(" -> "))]
    CircularDependency { path: String, chain: Vec<String> },

    /// A multi-variant rule's owner identity was not supplied (strict mode only).
    #[error("rule for {path} requires an identity of type {owner_type}")]
    MissingIdentity { path: String, owner_type: String },
}
