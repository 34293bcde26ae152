//! `tweek_core` is a rule evaluation engine for hierarchical configuration and feature flags.
//!
//! # Overview
//!
//! Configuration is organized as slash-delimited [paths](path) such as `abc/somepath`. Every path
//! has a [`RuleDefinition`](rules::RuleDefinition): a payload in one of the supported formats
//! (`jpad`, `const`, `alias`) that a [`ParserRegistry`](parser::ParserRegistry) turns into a
//! [`RuleSet`](rules::RuleSet). A rule set is an ordered list of rules gated by
//! [matchers](matcher::Matcher) over a [`Context`](context::Context). The first matching rule
//! decides the value. Values are typed as a [`ConfigurationValue`].
//!
//! [`RulesSnapshot`](snapshot::RulesSnapshot) is an immutable, versioned view of all parsed rules.
//! A path whose payload fails to parse keeps its error in the snapshot, so one broken definition
//! does not affect the others.
//!
//! [`RulesRepository`](repository::RulesRepository) holds the current snapshot and replaces it as a
//! whole when a new version is loaded. Readers keep the snapshot they started with. A
//! [`RulesPoller`](repository::RulesPoller) keeps the repository current by polling a
//! [`RulesDriver`](repository::RulesDriver) in a background task.
//!
//! [`Engine`](engine::Engine) is what callers use. It fetches the stored context of the requesting
//! [identities](Identity) from a [`ContextDriver`](context::ContextDriver), expands wildcard paths,
//! resolves dependencies between paths (`@@key:<path>` in matchers) and fixed overrides
//! (`@fixed:<path>` in context), and returns the value of every path along with per-path errors.
//!
//! # Error Handling
//!
//! Errors that abort a whole operation are represented by the [`Error`] enum. Problems that only
//! affect a single path are reported as [`EvaluationError`](error::EvaluationError)s next to the
//! values of the other paths.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate with the `tweek` target.
//! Consider integrating a `log`-compatible logger implementation for better visibility into rule
//! loading and evaluation.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod parser;
pub mod path;
pub mod repository;
pub mod rules;
pub mod sharder;
pub mod snapshot;

mod identity;
mod value;

pub use error::{Error, Result};
pub use identity::Identity;
pub use value::{ConfigurationValue, ValueType};
