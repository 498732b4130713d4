//! Main API client implementation

use crate::config::ClientConfig;
use crate::endpoints::VisitsApi;
use crate::error::{ApiError, ApiResult, ErrorContext};
use carevisit_core::retry::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Request correlation ID header
const X_REQUEST_ID: &str = "X-Request-ID";

/// API key header for Supabase
const APIKEY_HEADER: &str = "apikey";

/// PostgREST preference header
const PREFER_HEADER: &str = "Prefer";

/// carevisit API client
///
/// Wraps `reqwest` and adds:
/// - Retry with exponential backoff for reads
/// - Single-shot writes (the backend does not deduplicate them)
/// - A circuit breaker shared by all requests
/// - Request correlation IDs for tracing
#[derive(Clone)]
pub struct CareVisitClient {
    inner: Client,
    config: Arc<ClientConfig>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl CareVisitClient {
    /// Create a new client with configuration from the environment
    pub fn new() -> ApiResult<Self> {
        let config = ClientConfig::from_env()?;
        Self::with_config(config)
    }

    /// Create a new client with specific configuration
    pub fn with_config(config: ClientConfig) -> ApiResult<Self> {
        config.validate()?;

        let mut default_headers = HeaderMap::new();
        default_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        default_headers.insert(USER_AGENT, HeaderValue::from_static("carevisit-api-client/1.0"));

        if let Some(ref key) = config.anon_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| ApiError::config("anon key is not a valid header value"))?;
            default_headers.insert(APIKEY_HEADER, value);
        }

        let inner = Client::builder()
            .timeout(config.timeout)
            .default_headers(default_headers)
            .build()
            .map_err(ApiError::Request)?;

        Ok(Self {
            inner,
            config: Arc::new(config),
            circuit_breaker: Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        })
    }

    /// Get the current configuration
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get circuit breaker state
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    /// Reset the circuit breaker
    pub fn reset_circuit(&self) {
        self.circuit_breaker.reset();
    }

    /// Access visit endpoints
    #[must_use]
    pub fn visits(&self) -> VisitsApi {
        VisitsApi::new(self.clone())
    }

    // -------------------------------------------------------------------------
    // Low-level HTTP methods
    // -------------------------------------------------------------------------

    /// GET a PostgREST path, retrying transient failures
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        self.execute(Method::GET, path, Option::<&()>::None).await
    }

    /// PATCH a PostgREST path once and return the affected rows
    #[instrument(skip(self, body))]
    pub async fn patch<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> ApiResult<T> {
        self.execute(Method::PATCH, path, Some(body)).await
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.config.rest_url(), path.trim_start_matches('/'))
    }

    /// Only reads are retried; the backend does not deduplicate writes
    fn policy_for(&self, method: &Method) -> RetryConfig {
        if method.is_safe() {
            self.config.read_retry.clone()
        } else {
            RetryConfig::no_retry()
        }
    }

    async fn execute<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let ctx = ErrorContext {
            request_id: Some(Uuid::new_v4().to_string()),
            endpoint: path.to_string(),
            method: method.to_string(),
        };
        let url = self.url_for(path);
        let retry = self.policy_for(&method);

        if !self.circuit_breaker.can_execute() {
            warn!(%ctx, "Circuit breaker is open, rejecting request");
            return Err(ApiError::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            attempt += 1;

            let started = Instant::now();
            let result = self.send(&ctx, method.clone(), &url, body).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let err = match result {
                Ok(value) => {
                    self.circuit_breaker.record_success();
                    debug!(%ctx, attempt, elapsed_ms, "Request succeeded");
                    return Ok(value);
                }
                Err(err) => err,
            };
            self.circuit_breaker.record_failure();

            if !err.is_retryable() {
                warn!(%ctx, attempt, elapsed_ms, error = %err, "Request failed");
                return Err(err);
            }
            if !retry.allows_another(attempt) {
                warn!(%ctx, attempt, error = %err, "Giving up after retries");
                return Err(if attempt > 1 {
                    ApiError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    }
                } else {
                    err
                });
            }
            debug!(%ctx, attempt, error = %err, "Request failed, will retry");
        }
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        ctx: &ErrorContext,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> ApiResult<T> {
        let mut request = self
            .inner
            .request(method, url)
            .header(PREFER_HEADER, "return=representation");

        if let Some(id) = &ctx.request_id {
            request = request.header(X_REQUEST_ID, id);
        }
        // Row-level security keys off the worker's token; the anon key is the fallback
        if let Some(token) = self.config.access_token.as_ref().or(self.config.anon_key.as_ref()) {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_body(status.as_u16(), &body));
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = CareVisitClient::with_config(ClientConfig::development());
        assert!(client.is_ok());
    }

    #[test]
    fn test_client_rejects_invalid_config() {
        let config = ClientConfig::development().with_base_url("not-a-url");
        assert!(CareVisitClient::with_config(config).is_err());
    }

    #[test]
    fn test_url_for_joins_rest_root() {
        let client = CareVisitClient::with_config(
            ClientConfig::development().with_base_url("https://abc.supabase.co"),
        )
        .unwrap();
        assert_eq!(
            client.url_for("/visits?id=eq.1"),
            "https://abc.supabase.co/rest/v1/visits?id=eq.1"
        );
    }

    #[test]
    fn test_only_reads_are_retried() {
        let client = CareVisitClient::with_config(
            ClientConfig::development().with_read_retry(RetryConfig::interactive()),
        )
        .unwrap();
        assert_eq!(client.policy_for(&Method::GET).max_attempts, 3);
        assert_eq!(client.policy_for(&Method::PATCH).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_network() {
        let client = CareVisitClient::with_config(ClientConfig::development()).unwrap();
        for _ in 0..CircuitBreakerConfig::default().failure_threshold {
            client.circuit_breaker.record_failure();
        }
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let result: ApiResult<serde_json::Value> = client.get("visits").await;
        assert!(matches!(result, Err(ApiError::CircuitOpen)));

        client.reset_circuit();
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }
}
