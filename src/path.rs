//! Configuration path normalization and wildcard queries.
use std::fmt;

/// Last segment of a path that requests everything under a prefix.
pub const WILDCARD: &str = "_";

const HIDDEN_SEGMENT_PREFIX: char = '@';

/// Normalize a configuration path: surrounding whitespace and slashes are trimmed and the path is
/// lower-cased.
///
/// ```
/// # use tweek_core::path::normalize;
/// assert_eq!(normalize(" /Abc/SomePath/ "), "abc/somepath");
/// ```
pub fn normalize(path: &str) -> String {
    path.trim().trim_matches('/').to_lowercase()
}

/// A requested path, either a single key or a wildcard over a prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathQuery {
    /// A single path. Its value is reported under the empty key.
    Exact(String),
    /// All paths under the prefix. The prefix is either empty (root) or ends with `/`.
    Prefix(String),
}

impl PathQuery {
    pub fn parse(path: &str) -> PathQuery {
        let normalized = normalize(path);
        if normalized == WILDCARD {
            return PathQuery::Prefix(String::new());
        }
        match normalized.strip_suffix(WILDCARD) {
            Some(prefix) if prefix.ends_with('/') => PathQuery::Prefix(prefix.to_owned()),
            _ => PathQuery::Exact(normalized),
        }
    }

    /// Return the key under which `path` is reported for this query, or `None` if the query does
    /// not cover `path`.
    ///
    /// Wildcard queries skip paths that contain hidden (`@`-prefixed) segments below the prefix.
    pub fn relative_key<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            PathQuery::Exact(exact) => (exact == path).then_some(""),
            PathQuery::Prefix(prefix) => {
                let rest = path.strip_prefix(prefix.as_str())?;
                if rest.is_empty()
                    || rest
                        .split('/')
                        .any(|segment| segment.starts_with(HIDDEN_SEGMENT_PREFIX))
                {
                    None
                } else {
                    Some(rest)
                }
            }
        }
    }

    pub fn covers(&self, path: &str) -> bool {
        self.relative_key(path).is_some()
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, PathQuery::Prefix(_))
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathQuery::Exact(path) => f.write_str(path),
            PathQuery::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
        }
    }
}
