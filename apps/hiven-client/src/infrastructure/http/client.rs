//! HTTP client for the Hiven REST API with retry logic.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::application::ports::{HttpError, RequestTransport};
use crate::domain::credentials::Token;
use crate::infrastructure::config::{ApiSettings, RetrySettings};

/// Error body returned by the API.
#[derive(Debug, Deserialize)]
struct HivenErrorResponse {
    error: HivenErrorBody,
}

#[derive(Debug, Deserialize)]
struct HivenErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// REST transport backed by `reqwest`.
///
/// The token is stored by [`RequestTransport::connect`] and sent in the
/// `Authorization` header of every later request.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    default_timeout: Duration,
    retry: RetrySettings,
    token: RwLock<Option<Token>>,
}

impl HttpTransport {
    /// Create a new transport from API settings.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Network`] if the underlying client cannot be
    /// built.
    pub fn new(settings: &ApiSettings) -> Result<Self, HttpError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| HttpError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            default_timeout: settings.request_timeout,
            retry: settings.retry.clone(),
            token: RwLock::new(None),
        })
    }

    /// Base URL endpoints are appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{endpoint}", self.base_url)
        } else {
            format!("{}/{endpoint}", self.base_url)
        }
    }

    /// Send one request with retries, authenticating with `token`.
    #[allow(clippy::too_many_lines)]
    async fn send(
        &self,
        token: &Token,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError> {
        let url = self.url(endpoint);
        let timeout = timeout.unwrap_or(self.default_timeout);
        let mut backoff = ExponentialBackoff::new(&self.retry);

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Authorization", token.expose())
                .timeout(timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            error = %e,
                            method = %method,
                            endpoint,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if e.is_timeout() {
                        return Err(HttpError::Timeout { timeout });
                    }
                    return Err(HttpError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                if status == StatusCode::NO_CONTENT {
                    return Ok(Value::Null);
                }
                let text = response
                    .text()
                    .await
                    .map_err(|e| HttpError::Network(e.to_string()))?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text).map_err(|e| HttpError::JsonParse(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let error_body = response.text().await.unwrap_or_default();
            let (error_code, error_message) = parse_error_body(status, error_body);

            match categorize_status(status) {
                ErrorCategory::RateLimited => {
                    tracing::warn!(
                        method = %method,
                        endpoint,
                        retry_after_secs = retry_after,
                        "Rate limited"
                    );
                    return Err(HttpError::RateLimited {
                        retry_after_secs: retry_after,
                    });
                }
                ErrorCategory::Retryable => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            status = status.as_u16(),
                            code = %error_code,
                            message = %error_message,
                            delay_ms = delay.as_millis(),
                            "Retryable error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(HttpError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                    });
                }
                ErrorCategory::NonRetryable => {
                    return match status {
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            Err(HttpError::Unauthorized {
                                status: status.as_u16(),
                            })
                        }
                        _ => Err(HttpError::Api {
                            status: status.as_u16(),
                            code: error_code,
                            message: error_message,
                        }),
                    };
                }
            }
        }
    }

    async fn authenticated(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError> {
        let token = self.token.read().clone().ok_or(HttpError::NotConnected)?;
        self.send(&token, method, endpoint, body, timeout).await
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn connect(&self, token: &Token) -> Result<Value, HttpError> {
        let identity = self
            .send(token, Method::GET, "/users/@me", None, None)
            .await?;
        *self.token.write() = Some(token.clone());
        tracing::debug!(base_url = %self.base_url, "Request transport connected");
        Ok(identity)
    }

    async fn close(&self) {
        if self.token.write().take().is_some() {
            tracing::debug!("Request transport closed");
        }
    }

    fn is_connected(&self) -> bool {
        self.token.read().is_some()
    }

    async fn request(&self, endpoint: &str, timeout: Option<Duration>) -> Result<Value, HttpError> {
        self.authenticated(Method::GET, endpoint, None, timeout)
            .await
    }

    async fn post(
        &self,
        endpoint: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError> {
        self.authenticated(Method::POST, endpoint, body.as_ref(), timeout)
            .await
    }

    async fn patch(
        &self,
        endpoint: &str,
        body: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, HttpError> {
        self.authenticated(Method::PATCH, endpoint, body.as_ref(), timeout)
            .await
    }

    async fn delete(&self, endpoint: &str, timeout: Option<Duration>) -> Result<Value, HttpError> {
        self.authenticated(Method::DELETE, endpoint, None, timeout)
            .await
    }
}

/// Extract `(code, message)` from an error response body.
fn parse_error_body(status: StatusCode, body: String) -> (String, String) {
    match serde_json::from_str::<HivenErrorResponse>(&body) {
        Ok(err) => (
            err.error
                .code
                .unwrap_or_else(|| status.as_u16().to_string()),
            err.error.message.unwrap_or_default(),
        ),
        Err(_) => (status.as_u16().to_string(), body),
    }
}

/// Error category for determining retry behavior.
#[derive(Debug, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500 | 502 | 503 | 504 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator.
struct ExponentialBackoff {
    attempt: u32,
    max_attempts: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
}

impl ExponentialBackoff {
    const fn new(config: &RetrySettings) -> Self {
        Self {
            attempt: 0,
            max_attempts: config.max_attempts,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
            multiplier: config.multiplier,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token() -> Token {
        Token::parse(&"t".repeat(128), &[128]).unwrap()
    }

    fn transport(server: &MockServer) -> HttpTransport {
        let settings = ApiSettings {
            base_url: server.uri(),
            retry: RetrySettings {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
            },
            ..ApiSettings::default()
        };
        HttpTransport::new(&settings).unwrap()
    }

    #[test_case(StatusCode::TOO_MANY_REQUESTS, ErrorCategory::RateLimited ; "rate limited")]
    #[test_case(StatusCode::REQUEST_TIMEOUT, ErrorCategory::Retryable ; "request timeout")]
    #[test_case(StatusCode::BAD_GATEWAY, ErrorCategory::Retryable ; "bad gateway")]
    #[test_case(StatusCode::SERVICE_UNAVAILABLE, ErrorCategory::Retryable ; "unavailable")]
    #[test_case(StatusCode::NOT_FOUND, ErrorCategory::NonRetryable ; "not found")]
    #[test_case(StatusCode::UNAUTHORIZED, ErrorCategory::NonRetryable ; "unauthorized")]
    fn categorize(status: StatusCode, expected: ErrorCategory) {
        assert_eq!(categorize_status(status), expected);
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let config = RetrySettings {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 10.0,
        };

        let mut backoff = ExponentialBackoff::new(&config);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn hiven_error_body_is_parsed() {
        let (code, message) = parse_error_body(
            StatusCode::BAD_REQUEST,
            r#"{"success":false,"error":{"code":"bad_request","message":"nope"}}"#.to_string(),
        );
        assert_eq!(code, "bad_request");
        assert_eq!(message, "nope");

        let (code, message) = parse_error_body(StatusCode::BAD_REQUEST, "plain".to_string());
        assert_eq!(code, "400");
        assert_eq!(message, "plain");
    }

    #[tokio::test]
    async fn connect_stores_token_and_returns_identity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("Authorization", token().expose()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "1", "username": "me"})),
            )
            .mount(&server)
            .await;

        let transport = transport(&server);
        assert!(!transport.is_connected());

        let identity = transport.connect(&token()).await.unwrap();
        assert_eq!(identity["username"], "me");
        assert!(transport.is_connected());

        transport.close().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connect_maps_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = transport(&server).connect(&token()).await.unwrap_err();
        assert_eq!(err, HttpError::Unauthorized { status: 401 });
    }

    #[tokio::test]
    async fn requests_require_connect() {
        let server = MockServer::start().await;
        let err = transport(&server)
            .request("/users/1", None)
            .await
            .unwrap_err();
        assert_eq!(err, HttpError::NotConnected);
    }

    #[tokio::test]
    async fn patch_sends_body_and_maps_no_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/rooms/10"))
            .and(body_json(json!({"name": "lobby"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server);
        transport.connect(&token()).await.unwrap();
        let value = transport
            .patch("/rooms/10", Some(json!({"name": "lobby"})), None)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/houses/1"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let transport = transport(&server);
        transport.connect(&token()).await.unwrap();
        let err = transport.request("/houses/1", None).await.unwrap_err();
        assert_eq!(err, HttpError::MaxRetriesExceeded { attempts: 3 });
    }

    #[tokio::test]
    async fn rate_limit_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/rooms/10/messages"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = transport(&server);
        transport.connect(&token()).await.unwrap();
        let err = transport
            .post("/rooms/10/messages", Some(json!({"content": "hi"})), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            HttpError::RateLimited {
                retry_after_secs: Some(7)
            }
        );
    }

    #[tokio::test]
    async fn api_errors_carry_code_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/rooms/10/messages/5"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "not_found", "message": "unknown message"}
            })))
            .mount(&server)
            .await;

        let transport = transport(&server);
        transport.connect(&token()).await.unwrap();
        let err = transport
            .delete("/rooms/10/messages/5", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(
            err,
            HttpError::Api {
                status: 404,
                code: "not_found".to_string(),
                message: "unknown message".to_string(),
            }
        );
    }
}
