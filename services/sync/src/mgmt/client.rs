use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use unisync_config::AppConfig;

use super::models::{Connection, Customer, SyncConfig};
use super::ManagementApi;

#[derive(Debug, Clone)]
pub struct MgmtClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl MgmtClientConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.mgmt_api_url.clone(),
            api_key: config.unified_api_key.clone(),
            max_retries: config.http_max_retries,
            timeout_secs: config.http_timeout_secs,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MgmtClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

#[derive(Clone)]
pub struct MgmtClient {
    client: Client,
    config: MgmtClientConfig,
}

impl MgmtClient {
    pub fn new(config: MgmtClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, MgmtClientError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| MgmtClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| MgmtClientError::InvalidUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_with_retry<T: DeserializeOwned>(&self, url: Url) -> Result<T, MgmtClientError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = std::cmp::min(1u64 << attempt, 30);
                tracing::warn!(attempt, backoff_secs, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .get(url.clone())
                .header("x-api-key", &self.config.api_key)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(MgmtClientError::RequestError(e));
                }
            };

            let status = response.status();

            if status.is_success() {
                return response
                    .json::<T>()
                    .await
                    .map_err(MgmtClientError::RequestError);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(MgmtClientError::HttpError { status, body });
        }

        Err(MgmtClientError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl ManagementApi for MgmtClient {
    async fn list_customers(&self) -> Result<Vec<Customer>, MgmtClientError> {
        self.get_with_retry(self.endpoint(&["customers"])?).await
    }

    async fn list_connections(
        &self,
        customer_id: &str,
    ) -> Result<Vec<Connection>, MgmtClientError> {
        self.get_with_retry(self.endpoint(&["customers", customer_id, "connections"])?)
            .await
    }

    async fn list_sync_configs(&self) -> Result<Vec<SyncConfig>, MgmtClientError> {
        self.get_with_retry(self.endpoint(&["sync_configs"])?).await
    }
}
