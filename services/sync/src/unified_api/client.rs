use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use unisync_common::types::Vertical;
use unisync_config::AppConfig;
use unisync_vdk::{ConnectionRef, Page, PageRequest, Provider, ProviderError};

use super::models::{ErrorShape, ListResponse};

const PROVIDER_NAME: &str = "unified";
const MAX_BACKOFF_SECS: u64 = 30;
const MAX_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct UnifiedApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl UnifiedApiConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.unified_api_url.clone(),
            api_key: config.unified_api_key.clone(),
            max_retries: config.http_max_retries,
            timeout_secs: config.http_timeout_secs,
        }
    }
}

/// Serves every stream of every provider through the unified API, which
/// proxies credentials and maps provider objects to the common schema.
#[derive(Clone)]
pub struct UnifiedApiProvider {
    client: Client,
    config: UnifiedApiConfig,
}

impl UnifiedApiProvider {
    pub fn new(config: UnifiedApiConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    fn page_url(&self, request: &PageRequest) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!(
            "{}/{}/v2/{}",
            self.config.base_url.trim_end_matches('/'),
            request.vertical,
            request.stream
        ))
        .map_err(|e| ProviderError::Decode(format!("invalid url: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(cursor) = &request.cursor {
                query.append_pair("cursor", cursor);
            }
            if let Some(page_size) = request.page_size {
                query.append_pair("page_size", &page_size.to_string());
            }
        }
        Ok(url)
    }

    async fn request_with_retry(
        &self,
        connection: &ConnectionRef,
        request: &PageRequest,
    ) -> Result<Page, ProviderError> {
        let url = self.page_url(request)?;
        let mut last_error = String::new();
        let mut waited_retry_after = false;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 && !std::mem::take(&mut waited_retry_after) {
                let backoff_secs = std::cmp::min(1u64 << attempt, MAX_BACKOFF_SECS);
                tracing::warn!(
                    attempt,
                    backoff_secs,
                    stream = %request.stream,
                    "retrying after backoff"
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            let response = match self
                .client
                .get(url.clone())
                .header("x-api-key", &self.config.api_key)
                .header("x-customer-id", &connection.customer_id)
                .header("x-provider-name", &connection.provider_name)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(ProviderError::Transport(last_error));
                }
            };

            let status = response.status();

            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::Transport(e.to_string()))?;
                let list: ListResponse = serde_json::from_str(&body)
                    .map_err(|e| ProviderError::Decode(e.to_string()))?;
                return Ok(list.into());
            }

            if status == StatusCode::NOT_IMPLEMENTED {
                return Err(ProviderError::NotImplemented {
                    provider_name: connection.provider_name.clone(),
                    stream: request.stream.clone(),
                });
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, MAX_RETRY_AFTER_SECS);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    waited_retry_after = true;
                }
                last_error = "429 Too Many Requests".to_string();
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let shape = ErrorShape::parse(&body);

            if status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || shape.as_ref().is_some_and(ErrorShape::is_no_longer_authenticated)
            {
                let detail = shape
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| format!("{status}: {body}"));
                return Err(ProviderError::Unauthorized(detail));
            }

            if status.is_server_error() {
                last_error = format!("{status}: {body}");
                continue;
            }

            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Err(ProviderError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
        })
    }
}

#[async_trait]
impl Provider for UnifiedApiProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn streams(&self, vertical: Vertical) -> Vec<String> {
        vertical
            .common_streams()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    async fn list_page(
        &self,
        connection: &ConnectionRef,
        request: &PageRequest,
    ) -> Result<Page, ProviderError> {
        self.request_with_retry(connection, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unisync_common::error::ErrorType;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> UnifiedApiConfig {
        UnifiedApiConfig {
            base_url: base_url.to_string(),
            api_key: "sk-test".to_string(),
            max_retries: 1,
            timeout_secs: 5,
        }
    }

    fn connection() -> ConnectionRef {
        ConnectionRef::new("cus_1", "hubspot")
    }

    fn request(stream: &str, cursor: Option<&str>) -> PageRequest {
        PageRequest {
            vertical: Vertical::Crm,
            stream: stream.to_string(),
            cursor: cursor.map(str::to_string),
            page_size: None,
        }
    }

    fn contacts_page(ids: &[&str], next_cursor: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "items": ids
                .iter()
                .map(|id| serde_json::json!({
                    "id": id,
                    "first_name": format!("Contact {id}"),
                    "updated_at": "2024-03-01T10:00:00Z",
                    "raw_data": {"id": id}
                }))
                .collect::<Vec<_>>(),
            "next_cursor": next_cursor,
            "has_next_page": next_cursor.is_some()
        })
    }

    #[tokio::test]
    async fn fetches_page_with_connection_headers() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .and(header("x-api-key", "sk-test"))
            .and(header("x-customer-id", "cus_1"))
            .and(header("x-provider-name", "hubspot"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(contacts_page(&["1", "2"], Some("c2"))),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let page = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "1");
        assert_eq!(page.items[0].raw_data, Some(serde_json::json!({"id": "1"})));
        assert_eq!(page.next_cursor.as_deref(), Some("c2"));
        assert!(page.has_next_page);
    }

    #[tokio::test]
    async fn forwards_cursor_and_page_size() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/engagement/v2/sequence"))
            .and(query_param("cursor", "c2"))
            .and(query_param("page_size", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contacts_page(&["3"], None)))
            .expect(1)
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let req = PageRequest {
            vertical: Vertical::Engagement,
            stream: "sequence".to_string(),
            cursor: Some("c2".to_string()),
            page_size: Some(50),
        };
        let page = provider.list_page(&connection(), &req).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.has_next_page);
    }

    #[tokio::test]
    async fn not_implemented_is_distinguished() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/lead"))
            .respond_with(ResponseTemplate::new(501).set_body_string("not implemented"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("lead", None))
            .await
            .unwrap_err();
        assert!(err.is_not_implemented());
        assert!(err.error_type().is_none());
    }

    #[tokio::test]
    async fn fails_fast_on_401() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert_eq!(err.error_type(), Some(ErrorType::UserError));
    }

    #[tokio::test]
    async fn revoked_access_body_is_a_user_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "class": "NoLongerAuthenticatedError",
                "code": "UNAUTHORIZED",
                "message": "cus_1/hubspot: refresh token revoked"
            })))
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), Some(ErrorType::UserError));
        assert!(err.to_string().contains("refresh token revoked"));
    }

    #[tokio::test]
    async fn other_client_errors_are_internal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad cursor"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("contact", Some("garbage")))
            .await
            .unwrap_err();
        match &err {
            ProviderError::Http { status, body } => {
                assert_eq!(*status, 422);
                assert_eq!(body, "bad cursor");
            }
            other => panic!("expected Http, got: {other:?}"),
        }
        assert_eq!(err.error_type(), Some(ErrorType::InternalError));
    }

    #[tokio::test]
    async fn retries_on_500() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contacts_page(&["1"], None)))
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let page = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn retry_after_replaces_the_backoff() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contacts_page(&["1"], None)))
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let started = std::time::Instant::now();
        let page = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap();

        assert_eq!(page.items.len(), 1);
        // Retry-After is 1s; the first backoff step alone would be 2s.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1900), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn max_retries_exceeded_is_a_remote_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::MaxRetriesExceeded { attempts: 2, .. }
        ));
        assert_eq!(err.error_type(), Some(ErrorType::RemoteError));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/crm/v2/contact"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let provider = UnifiedApiProvider::new(test_config(&server.uri())).unwrap();
        let err = provider
            .list_page(&connection(), &request("contact", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Decode(_)));
    }

    #[test]
    fn serves_every_common_stream() {
        let provider = UnifiedApiProvider::new(test_config("http://localhost")).unwrap();
        assert_eq!(provider.streams(Vertical::Crm).len(), Vertical::Crm.common_streams().len());
        assert!(provider
            .streams(Vertical::Engagement)
            .contains(&"sequence_state".to_string()));
    }
}
