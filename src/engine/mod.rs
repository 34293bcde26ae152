//! Calculation of configuration values for a set of requesting identities.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use chrono::Utc;
use futures::future::try_join_all;
use serde::Serialize;

use crate::{
    context::{Context, ContextDriver, ContextProperties},
    error::EvaluationError,
    path::PathQuery,
    repository::{RepositoryStatus, RulesRepository},
    snapshot::RulesSnapshot,
    ConfigurationValue, Error, Identity, Result,
};

mod scope;

use scope::EvaluationScope;

/// Configuration for [`Engine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Report a [`EvaluationError::MissingIdentity`] when a multi-variant rule matches but the
    /// identity it buckets on was not supplied. Otherwise such a rule does not match.
    ///
    /// Defaults to `false`.
    pub strict_owner_identity: bool,
}

impl EngineConfig {
    pub fn new() -> EngineConfig {
        EngineConfig::default()
    }

    pub fn with_strict_owner_identity(mut self, strict: bool) -> EngineConfig {
        self.strict_owner_identity = strict;
        self
    }
}

/// Per-call options of [`Engine::calculate`].
#[derive(Debug, Clone, Default)]
pub struct CalculateOptions {
    /// Properties merged over the stored context of the matching requested identity. Entries for
    /// identities that are not part of the request are ignored.
    pub context_override: HashMap<Identity, ContextProperties>,
    /// Fail the whole call with [`Error::CalculationFailed`] if any path failed.
    pub ensure_success: bool,
}

impl CalculateOptions {
    pub fn new() -> CalculateOptions {
        CalculateOptions::default()
    }

    pub fn with_context_override(
        mut self,
        identity: Identity,
        properties: ContextProperties,
    ) -> CalculateOptions {
        self.context_override
            .entry(identity)
            .or_default()
            .extend(properties);
        self
    }

    pub fn with_ensure_success(mut self, ensure_success: bool) -> CalculateOptions {
        self.ensure_success = ensure_success;
        self
    }
}

/// A calculated value and the path whose rules produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluatedValue {
    pub value: ConfigurationValue,
    /// Differs from the calculated path when the value came through an alias.
    pub source: String,
}

/// Result of a calculation: values of the paths that have one and errors of the paths that failed.
/// Paths without a value appear in neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calculation {
    pub values: BTreeMap<String, EvaluatedValue>,
    pub errors: BTreeMap<String, EvaluationError>,
}

impl Calculation {
    pub fn get(&self, key: &str) -> Option<&ConfigurationValue> {
        self.values.get(key).map(|value| &value.value)
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Calculates configuration values from the rules currently held by a [`RulesRepository`] and the
/// context stored for the requesting identities.
pub struct Engine {
    repository: Arc<RulesRepository>,
    context_driver: Arc<dyn ContextDriver>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        repository: Arc<RulesRepository>,
        context_driver: Arc<dyn ContextDriver>,
        config: EngineConfig,
    ) -> Engine {
        Engine {
            repository,
            context_driver,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<RulesRepository> {
        &self.repository
    }

    /// Calculate every path covered by `paths`. Results are keyed by full path.
    ///
    /// # Errors
    ///
    /// - [`Error::RulesNotLoaded`] if the repository has no rules yet.
    /// - [`Error::ContextDriver`] if the context of any identity could not be fetched.
    /// - [`Error::CalculationFailed`] if `options.ensure_success` is set and any path failed.
    pub async fn calculate(
        &self,
        paths: &[&str],
        identities: &HashSet<Identity>,
        options: &CalculateOptions,
    ) -> Result<Calculation> {
        let snapshot = self.repository.snapshot().ok_or(Error::RulesNotLoaded)?;
        let context = self
            .fetch_context(identities, &options.context_override)
            .await?;

        let queries = paths
            .iter()
            .map(|path| PathQuery::parse(path))
            .collect::<Vec<_>>();
        let mut expanded = BTreeMap::new();
        for query in &queries {
            expanded.extend(expand(&snapshot, &context, query));
        }

        let calculation = calculate_paths(
            &snapshot,
            &context,
            expanded.into_keys().map(|path| (path.clone(), path)),
            &self.config,
        );
        ensure_success(calculation, options.ensure_success)
    }

    /// Calculate a single path or wildcard. Results are keyed relative to `path`: the empty key
    /// for an exact path and the suffix below the prefix for a wildcard.
    ///
    /// # Errors
    ///
    /// Same as [`Engine::calculate`], without ensuring success.
    pub async fn calculate_path(
        &self,
        path: &str,
        identities: &HashSet<Identity>,
    ) -> Result<Calculation> {
        let snapshot = self.repository.snapshot().ok_or(Error::RulesNotLoaded)?;
        let context = self.fetch_context(identities, &HashMap::new()).await?;

        let query = PathQuery::parse(path);
        Ok(calculate_paths(
            &snapshot,
            &context,
            expand(&snapshot, &context, &query),
            &self.config,
        ))
    }

    /// Version label, last check time, state and health of the served rules.
    pub fn status(&self) -> RepositoryStatus {
        self.repository.status()
    }

    async fn fetch_context(
        &self,
        identities: &HashSet<Identity>,
        overrides: &HashMap<Identity, ContextProperties>,
    ) -> Result<Context> {
        let fetched = try_join_all(identities.iter().map(|identity| async move {
            let stored = self
                .context_driver
                .get_context(identity)
                .await
                .map_err(|source| {
                    log::warn!(target: "tweek",
                               identity = identity;
                               "failed to fetch context: {source}");
                    Error::ContextDriver {
                        identity: identity.clone(),
                        source,
                    }
                })?;

            let mut properties = lowercase_keys(stored);
            if let Some(overrides) = overrides.get(identity) {
                properties.extend(lowercase_keys(overrides.clone()));
            }
            Ok::<_, Error>((identity, properties))
        }))
        .await?;

        Ok(Context::merge(
            fetched
                .iter()
                .map(|(identity, properties)| (*identity, properties)),
            Utc::now(),
        ))
    }
}

/// Paths covered by `query`, mapped to the key they are reported under. Includes paths that only
/// exist as fixed values.
fn expand(
    snapshot: &RulesSnapshot,
    context: &Context,
    query: &PathQuery,
) -> BTreeMap<String, String> {
    let mut expanded = snapshot
        .matching(query)
        .map(|(path, key)| (path.to_owned(), key.to_owned()))
        .collect::<BTreeMap<_, _>>();
    for path in context.fixed_paths() {
        if let Some(key) = query.relative_key(path) {
            expanded.insert(path.to_owned(), key.to_owned());
        }
    }
    expanded
}

/// Evaluate `(path, key)` pairs and report each result under its key.
fn calculate_paths(
    snapshot: &RulesSnapshot,
    context: &Context,
    paths: impl IntoIterator<Item = (String, String)>,
    config: &EngineConfig,
) -> Calculation {
    let mut scope = EvaluationScope::new(snapshot, context, config.strict_owner_identity);
    let mut calculation = Calculation::default();

    for (path, key) in paths {
        match scope.evaluate(&path) {
            Ok(Some(value)) => {
                calculation.values.insert(key, value);
            }
            Ok(None) => {}
            Err(err) => {
                log::warn!(target: "tweek",
                           version = snapshot.version.as_str(),
                           path = path.as_str();
                           "failed to calculate path: {err}");
                calculation.errors.insert(key, err);
            }
        }
    }

    calculation
}

fn ensure_success(calculation: Calculation, ensure_success: bool) -> Result<Calculation> {
    if ensure_success && !calculation.is_success() {
        return Err(Error::CalculationFailed {
            errors: calculation.errors,
        });
    }
    Ok(calculation)
}

fn lowercase_keys(properties: ContextProperties) -> ContextProperties {
    properties
        .into_iter()
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect()
}
