//! A rules driver that fetches rules from the management service over HTTP.
use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use url::Url;

use crate::{
    error::{DriverError, Error},
    rules::RuleDefinition,
    Result,
};

use super::{RulesDriver, Ruleset};

const VERSION_ENDPOINT: &str = "ruleset/latest/version";
const RULESET_ENDPOINT: &str = "ruleset/latest";
/// Response header carrying the version of a served ruleset.
pub const VERSION_HEADER: &str = "X-Version";

/// Configuration for [`ManagementRulesDriver`].
#[derive(Debug, Clone)]
pub struct ManagementDriverConfig {
    /// Base URL of the management service, e.g. `http://management/`.
    pub base_url: String,
    /// Timeout of a single request.
    ///
    /// Defaults to [`ManagementDriverConfig::DEFAULT_REQUEST_TIMEOUT`].
    pub request_timeout: Duration,
}

impl ManagementDriverConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: impl Into<String>) -> ManagementDriverConfig {
        ManagementDriverConfig {
            base_url: base_url.into(),
            request_timeout: ManagementDriverConfig::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> ManagementDriverConfig {
        self.request_timeout = timeout;
        self
    }
}

pub struct ManagementRulesDriver {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    base_url: Url,
}

impl ManagementRulesDriver {
    pub fn new(config: ManagementDriverConfig) -> Result<ManagementRulesDriver> {
        let mut base_url = Url::parse(&config.base_url).map_err(Error::InvalidBaseUrl)?;
        // Relative joins replace the last segment unless the base ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| Error::RulesDriver(err.into()))?;

        Ok(ManagementRulesDriver { client, base_url })
    }

    fn url(&self, endpoint: &str) -> std::result::Result<Url, DriverError> {
        self.base_url
            .join(endpoint)
            .map_err(|err| DriverError::UnexpectedResponse(format!("invalid endpoint url: {err}")))
    }

    async fn get(&self, endpoint: &str) -> std::result::Result<reqwest::Response, DriverError> {
        let response = self.client.get(self.url(endpoint)?).send().await?;
        response.error_for_status().map_err(|err| {
            log::warn!(target: "tweek",
                       "received non-200 response from management service: {err:?}");
            DriverError::from(err)
        })
    }
}

#[async_trait]
impl RulesDriver for ManagementRulesDriver {
    async fn get_version(&self) -> std::result::Result<String, DriverError> {
        log::debug!(target: "tweek", "checking latest rules version");
        let version = self.get(VERSION_ENDPOINT).await?.text().await?;
        let version = version.trim();
        if version.is_empty() {
            return Err(DriverError::UnexpectedResponse("empty version".into()));
        }
        Ok(version.to_owned())
    }

    async fn get_ruleset(&self) -> std::result::Result<Ruleset, DriverError> {
        log::debug!(target: "tweek", "fetching latest ruleset");
        let response = self.get(RULESET_ENDPOINT).await?;

        let version = response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                DriverError::UnexpectedResponse(format!("missing {VERSION_HEADER} header"))
            })?;

        let body = response.bytes().await?;
        let rules: HashMap<String, RuleDefinition> = serde_json::from_slice(&body)?;

        log::debug!(target: "tweek", version = version.as_str(); "fetched ruleset");
        Ok(Ruleset { version, rules })
    }
}
