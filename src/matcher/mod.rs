//! Matcher DSL: a JSON object of `property → condition` compiled into a predicate over a
//! [`Context`](crate::context::Context).
//!
//! ```json
//! {
//!   "device.Country": "israel",
//!   "device.Age": { "$gt": 18, "$lt": 60 },
//!   "device.AppVersion": { "$compare": "version", "$ge": "1.2.0" },
//!   "$or": [{ "user.Role": ["admin", "qa"] }, { "@@key:abc/beta": true }]
//! }
//! ```
//!
//! An empty object matches everything. A condition on a property that is missing from the context
//! never matches, unless it tests for absence with `null`.
use std::sync::Arc;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::{context::GetContextValue, error::RuleDefinitionError};

mod comparer;
mod compiler;
mod eval;

pub use comparer::{Comparer, ComparerRegistry, DateComparer, VersionComparer};

/// A compiled matcher.
#[derive(Debug, Clone)]
pub struct Matcher {
    source: serde_json::Value,
    root: Node,
    dependencies: Vec<String>,
}

#[derive(Debug, Clone)]
enum Node {
    All(Vec<Node>),
    Any(Vec<Node>),
    Not(Box<Node>),
    Property {
        /// Lower-cased property name.
        property: String,
        predicate: Predicate,
    },
}

#[derive(Debug, Clone)]
enum Predicate {
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        op: Op,
        operand: Operand,
        comparer: Option<Arc<dyn Comparer>>,
    },
    In {
        operands: Vec<Operand>,
        comparer: Option<Arc<dyn Comparer>>,
    },
    /// Lower-cased needle.
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Match(Regex),
    WithinTime(chrono::Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    String(String),
    Number(f64),
    Bool(bool),
    /// Property is absent.
    Null,
}

impl Matcher {
    /// Compile a matcher from its JSON form.
    pub fn compile(
        source: &serde_json::Value,
        comparers: &ComparerRegistry,
    ) -> Result<Matcher, RuleDefinitionError> {
        compiler::compile(source, comparers)
    }

    /// A matcher that matches every context.
    pub fn match_all() -> Matcher {
        Matcher {
            source: serde_json::Value::Object(Default::default()),
            root: Node::All(Vec::new()),
            dependencies: Vec::new(),
        }
    }

    pub fn matches(&self, context: &dyn GetContextValue) -> bool {
        self.root.eval(context)
    }

    /// Paths whose calculated values this matcher reads (`@@key:<path>` and `keys.<path>`
    /// properties), normalized.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// JSON form the matcher was compiled from.
    pub fn to_json(&self) -> &serde_json::Value {
        &self.source
    }

    pub fn is_match_all(&self) -> bool {
        matches!(&self.root, Node::All(nodes) if nodes.is_empty())
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Serialize for Matcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}
