use std::time::Duration;

use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, Response, StatusCode};
use url::Url;

use crate::auth::Credentials;
use crate::config::{JenkinsConfig, RetryConfig};
use crate::error::{Result, SentinelError};

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Exponential backoff settings for Jenkins requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay slept after the zero-based `attempt` fails: `initial * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// 429, 408 and every 5xx are worth another attempt; other failures are final.
pub(super) fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Authenticated Jenkins REST client with bounded exponential-backoff retry.
pub struct JenkinsClient {
    client: Client,
    base_url: Url,
    credentials: Credentials,
    retry: RetryPolicy,
}

impl JenkinsClient {
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .user_agent(concat!("ci-sentinel/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SentinelError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| SentinelError::Config(format!("Invalid base URL: {e}")))?;

        // Url::join drops the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            credentials,
            retry,
        })
    }

    /// Builds a client from the `jenkins` config section.
    pub fn from_config(config: &JenkinsConfig) -> Result<Self> {
        let credentials = Credentials::resolve(
            &config.username,
            config.token.as_deref(),
            config.password.as_deref(),
        )?;

        Self::new(
            &config.base_url,
            credentials,
            RetryPolicy::from(&config.retry),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Resolves `{base}/{job_path}/{suffix}`.
    pub(super) fn job_url(&self, job_path: &str, suffix: &str) -> Result<Url> {
        let relative = format!("{}/{}", job_path.trim_matches('/'), suffix);
        self.base_url
            .join(&relative)
            .map_err(|e| SentinelError::Config(format!("Invalid job URL {relative}: {e}")))
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(self.credentials.username(), Some(self.credentials.secret()))
    }

    /// Sends a GET, retrying transient failures.
    ///
    /// Returns the first 2xx response. A non-retryable status is returned as
    /// `SentinelError::Api` straight away. Once every attempt is used up the
    /// last failure is wrapped in `SentinelError::RetriesExhausted`.
    pub(super) async fn get_with_backoff(&self, url: &Url) -> Result<Response> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let request = self.auth_request(self.client.get(url.clone()));

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!("GET {url} -> {status} (attempt {})", attempt + 1);

                    if status.is_success() {
                        return Ok(response);
                    }

                    if !should_retry(status) {
                        let body = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unable to read error response".to_string());
                        return Err(SentinelError::Api {
                            status: status.as_u16(),
                            message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
                        });
                    }

                    last_error = Some(SentinelError::RetryableStatus(status.as_u16()));
                }
                Err(e) => last_error = Some(SentinelError::Network(e)),
            }

            if attempt + 1 == max_attempts {
                break;
            }

            let backoff = self.retry.delay(attempt);
            if let Some(err) = &last_error {
                warn!(
                    "Retrying Jenkins API request: method=GET url={url} attempt={}/{max_attempts} backoff={backoff:?} error={err}",
                    attempt + 1
                );
            }
            tokio::time::sleep(backoff).await;
        }

        let last = last_error.unwrap_or_else(|| SentinelError::Api {
            status: 0,
            message: "no request was attempted".to_string(),
        });

        Err(SentinelError::RetriesExhausted {
            attempts: max_attempts,
            last: Box::new(last),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn test_client(base_url: &str, retry: RetryPolicy) -> JenkinsClient {
        let credentials = Credentials::resolve("ci", Some("token"), None).unwrap();
        JenkinsClient::new(base_url, credentials, retry, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(4000));
        assert_eq!(policy.delay(4), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(8));
        assert_eq!(policy.delay(40), Duration::from_secs(8));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::REQUEST_TIMEOUT));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!should_retry(StatusCode::NOT_FOUND));
        assert!(!should_retry(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_job_url_keeps_context_path() {
        let client = test_client("https://ci.example.com/jenkins", fast_policy(1));
        let url = client.job_url("/job/api/", "42/api/json").unwrap();
        assert_eq!(url.as_str(), "https://ci.example.com/jenkins/job/api/42/api/json");
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut server = mockito::Server::new_async().await;
        let unavailable = server
            .mock("GET", "/job/api/1/api/json")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/job/api/1/api/json")
            .with_status(200)
            .with_body(r#"{"building": false}"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url(), fast_policy(5));
        let url = client.job_url("job/api", "1/api/json").unwrap();
        let response = client.get_with_backoff(&url).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        unavailable.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let missing = server
            .mock("GET", "/job/api/1/api/json")
            .with_status(404)
            .with_body("no such build")
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url(), fast_policy(5));
        let url = client.job_url("job/api", "1/api/json").unwrap();
        let err = client.get_with_backoff(&url).await.unwrap_err();

        match err {
            SentinelError::Api { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such build");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_wrap_last_status() {
        let mut server = mockito::Server::new_async().await;
        let throttled = server
            .mock("GET", "/job/api/1/api/json")
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let client = test_client(&server.url(), fast_policy(3));
        let url = client.job_url("job/api", "1/api/json").unwrap();
        let err = client.get_with_backoff(&url).await.unwrap_err();

        match err {
            SentinelError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, SentinelError::RetryableStatus(429)));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        throttled.assert_async().await;
    }

    #[tokio::test]
    async fn test_sends_basic_auth_and_accept_header() {
        let mut server = mockito::Server::new_async().await;
        // "ci:token" base64-encoded
        let authed = server
            .mock("GET", "/job/api/1/api/json")
            .match_header("authorization", "Basic Y2k6dG9rZW4=")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = test_client(&server.url(), fast_policy(1));
        let url = client.job_url("job/api", "1/api/json").unwrap();
        client.get_with_backoff(&url).await.unwrap();
        authed.assert_async().await;
    }
}
