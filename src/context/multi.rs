use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::{error::DriverError, Identity};

use super::{ContextDriver, ContextProperties};

/// Combines several context drivers.
///
/// Reads go to the first reader that answers, falling back to the next one on error. Writes go to
/// every writer concurrently and fail if any writer fails.
pub struct MultiContextDriver {
    readers: Vec<Arc<dyn ContextDriver>>,
    writers: Vec<Arc<dyn ContextDriver>>,
}

impl MultiContextDriver {
    pub fn new(
        readers: Vec<Arc<dyn ContextDriver>>,
        writers: Vec<Arc<dyn ContextDriver>>,
    ) -> MultiContextDriver {
        MultiContextDriver { readers, writers }
    }
}

#[async_trait]
impl ContextDriver for MultiContextDriver {
    async fn get_context(&self, identity: &Identity) -> Result<ContextProperties, DriverError> {
        let mut last_error = None;
        for reader in &self.readers {
            match reader.get_context(identity).await {
                Ok(context) => return Ok(context),
                Err(err) => {
                    log::warn!(target: "tweek",
                               identity = identity;
                               "context reader failed, trying next one: {err}");
                    last_error = Some(err);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| DriverError::Unavailable("no context readers configured".into())))
    }

    async fn append_context(
        &self,
        identity: &Identity,
        context: ContextProperties,
    ) -> Result<(), DriverError> {
        try_join_all(
            self.writers
                .iter()
                .map(|writer| writer.append_context(identity, context.clone())),
        )
        .await?;
        Ok(())
    }

    async fn remove_from_context(
        &self,
        identity: &Identity,
        key: &str,
    ) -> Result<(), DriverError> {
        try_join_all(
            self.writers
                .iter()
                .map(|writer| writer.remove_from_context(identity, key)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::json;

    use super::MultiContextDriver;
    use crate::{
        context::{ContextDriver, ContextProperties, InMemoryContextDriver},
        error::DriverError,
        Identity,
    };

    struct FailingDriver;

    #[async_trait]
    impl ContextDriver for FailingDriver {
        async fn get_context(&self, _: &Identity) -> Result<ContextProperties, DriverError> {
            Err(DriverError::Unavailable("down".into()))
        }
        async fn append_context(
            &self,
            _: &Identity,
            _: ContextProperties,
        ) -> Result<(), DriverError> {
            Err(DriverError::Unavailable("down".into()))
        }
        async fn remove_from_context(&self, _: &Identity, _: &str) -> Result<(), DriverError> {
            Err(DriverError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn falls_back_to_next_reader() {
        let identity = Identity::new("user", "1");
        let healthy = Arc::new(
            InMemoryContextDriver::new().with_context(identity.clone(), [("age", json!(3))]),
        );
        let driver = MultiContextDriver::new(vec![Arc::new(FailingDriver), healthy], vec![]);

        let context = driver.get_context(&identity).await.unwrap();
        assert_eq!(context["age"], json!(3));
    }

    #[tokio::test]
    async fn reports_last_reader_error() {
        let driver = MultiContextDriver::new(vec![Arc::new(FailingDriver)], vec![]);
        let result = driver.get_context(&Identity::new("user", "1")).await;
        assert!(matches!(result, Err(DriverError::Unavailable(_))));
    }

    #[tokio::test]
    async fn writes_to_every_writer() {
        let identity = Identity::new("user", "1");
        let first = Arc::new(InMemoryContextDriver::new());
        let second = Arc::new(InMemoryContextDriver::new());
        let driver = MultiContextDriver::new(
            vec![first.clone()],
            vec![first.clone(), second.clone()],
        );

        driver
            .append_context(&identity, [("age".to_owned(), json!(3))].into())
            .await
            .unwrap();

        assert_eq!(first.get_context(&identity).await.unwrap()["age"], json!(3));
        assert_eq!(second.get_context(&identity).await.unwrap()["age"], json!(3));
    }

    #[tokio::test]
    async fn write_fails_if_any_writer_fails() {
        let driver = MultiContextDriver::new(
            vec![],
            vec![Arc::new(InMemoryContextDriver::new()), Arc::new(FailingDriver)],
        );
        let result = driver
            .remove_from_context(&Identity::new("user", "1"), "age")
            .await;
        assert!(result.is_err());
    }
}
