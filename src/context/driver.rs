use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;

use crate::{error::DriverError, Identity};

use super::ContextProperties;

/// Storage of per-identity context.
///
/// Reads are used by every calculation. Writes back the override mechanism (e.g. storing
/// `@fixed:<path>` values) and are not used by evaluation itself.
#[async_trait]
pub trait ContextDriver: Send + Sync {
    /// Fetch all stored properties of `identity`. Unknown identities have an empty context.
    async fn get_context(&self, identity: &Identity) -> Result<ContextProperties, DriverError>;

    /// Merge `context` into the stored properties of `identity`.
    async fn append_context(
        &self,
        identity: &Identity,
        context: ContextProperties,
    ) -> Result<(), DriverError>;

    /// Remove a single property from the stored context of `identity`.
    async fn remove_from_context(&self, identity: &Identity, key: &str)
        -> Result<(), DriverError>;
}

/// A context driver that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryContextDriver {
    contexts: RwLock<HashMap<Identity, ContextProperties>>,
}

impl InMemoryContextDriver {
    pub fn new() -> Self {
        InMemoryContextDriver::default()
    }

    /// Seed the stored context of `identity`.
    pub fn with_context<K: Into<String>>(
        self,
        identity: Identity,
        properties: impl IntoIterator<Item = (K, serde_json::Value)>,
    ) -> Self {
        {
            let mut contexts = self
                .contexts
                .write()
                .expect("thread holding context lock should not panic");
            contexts
                .entry(identity)
                .or_default()
                .extend(properties.into_iter().map(|(k, v)| (k.into(), v)));
        }
        self
    }
}

#[async_trait]
impl ContextDriver for InMemoryContextDriver {
    async fn get_context(&self, identity: &Identity) -> Result<ContextProperties, DriverError> {
        let contexts = self
            .contexts
            .read()
            .map_err(|_| DriverError::Unavailable("context lock poisoned".into()))?;
        Ok(contexts.get(identity).cloned().unwrap_or_default())
    }

    async fn append_context(
        &self,
        identity: &Identity,
        context: ContextProperties,
    ) -> Result<(), DriverError> {
        let mut contexts = self
            .contexts
            .write()
            .map_err(|_| DriverError::Unavailable("context lock poisoned".into()))?;
        contexts.entry(identity.clone()).or_default().extend(context);
        Ok(())
    }

    async fn remove_from_context(
        &self,
        identity: &Identity,
        key: &str,
    ) -> Result<(), DriverError> {
        let mut contexts = self
            .contexts
            .write()
            .map_err(|_| DriverError::Unavailable("context lock poisoned".into()))?;
        if let Some(properties) = contexts.get_mut(identity) {
            properties.remove(key);
        }
        Ok(())
    }
}
