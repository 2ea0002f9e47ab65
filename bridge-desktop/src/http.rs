//! Upstream Source Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    upstream::{
        clamp_stream, parse_content_range, parse_unsatisfied_range, ByteRange, RetryPolicy,
        UpstreamResponse, UpstreamSource,
    },
};
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Reqwest-based upstream source
///
/// Provides media range reads with:
/// - `Range: bytes=a-b` partial content requests
/// - Automatic retry with exponential backoff before the body starts
/// - Fallback for origins that ignore ranges and answer `200 OK`
/// - Async streaming of the body
pub struct ReqwestUpstreamSource {
    client: Client,
    retry: RetryPolicy,
}

/// How to turn a response body into the requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodyPlan {
    total_length: Option<u64>,
    skip: u64,
    limit: Option<u64>,
    empty: bool,
}

impl ReqwestUpstreamSource {
    /// Create an upstream with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create an upstream whose reads time out after `timeout` without progress
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .read_timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent("media-cache/0.1.0")
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;

        Ok(Self::with_client(client))
    }

    /// Create an upstream around a preconfigured client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send the range request, retrying on connect errors, 5xx and 429.
    async fn send_with_retry(&self, uri: &str, range: ByteRange) -> Result<reqwest::Response> {
        let policy = &self.retry;
        let mut attempt = 0;
        let mut last_error = None;

        while attempt < policy.max_attempts {
            debug!(
                attempt = attempt + 1,
                max_attempts = policy.max_attempts,
                range = %range,
                "Requesting upstream range"
            );

            let request = self
                .client
                .get(uri)
                .header(header::RANGE, range.to_header_value());

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();

                    if status >= 500 || status == 429 {
                        warn!(
                            status = status,
                            attempt = attempt + 1,
                            "Upstream request failed with retryable status"
                        );
                        last_error = Some(BridgeError::Http {
                            status,
                            uri: uri.to_string(),
                        });
                    } else {
                        return Ok(response);
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        "Upstream request failed"
                    );

                    if e.is_timeout() {
                        last_error = Some(BridgeError::Network("Request timed out".to_string()));
                    } else if e.is_connect() {
                        last_error = Some(BridgeError::Network(format!(
                            "Connection failed: {}",
                            e
                        )));
                    } else {
                        last_error = Some(BridgeError::Network(e.to_string()));
                    }
                }
            }

            attempt += 1;

            if attempt < policy.max_attempts {
                let delay = policy.delay_for(attempt);
                debug!(delay_ms = delay.as_millis(), "Retrying after delay");
                sleep(delay).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BridgeError::Network("All retry attempts exhausted".to_string())
        }))
    }

    fn plan_body(
        status: StatusCode,
        content_range: Option<&str>,
        content_length: Option<u64>,
        range: ByteRange,
        uri: &str,
    ) -> Result<BodyPlan> {
        match status {
            StatusCode::PARTIAL_CONTENT => {
                let (first, _last, total) = content_range
                    .and_then(parse_content_range)
                    .ok_or_else(|| {
                        BridgeError::OperationFailed(
                            "206 response without a valid Content-Range".to_string(),
                        )
                    })?;
                if first != range.start {
                    return Err(BridgeError::OperationFailed(format!(
                        "Upstream answered range starting at {} for request {}",
                        first, range
                    )));
                }
                Ok(BodyPlan {
                    total_length: total,
                    skip: 0,
                    limit: range.length,
                    empty: false,
                })
            }
            StatusCode::OK => {
                // Origin ignored the Range header and sent the whole resource.
                let empty = content_length.map_or(false, |len| range.start >= len);
                Ok(BodyPlan {
                    total_length: content_length,
                    skip: range.start,
                    limit: range.length,
                    empty,
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE => Ok(BodyPlan {
                total_length: content_range.and_then(parse_unsatisfied_range),
                skip: 0,
                limit: Some(0),
                empty: true,
            }),
            other => Err(BridgeError::Http {
                status: other.as_u16(),
                uri: uri.to_string(),
            }),
        }
    }
}

#[async_trait]
impl UpstreamSource for ReqwestUpstreamSource {
    async fn read(&self, uri: &str, range: ByteRange) -> Result<UpstreamResponse> {
        if range.is_empty() {
            return Ok(UpstreamResponse::empty(None));
        }

        let response = self.send_with_retry(uri, range).await?;
        let content_range = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let plan = Self::plan_body(
            response.status(),
            content_range.as_deref(),
            response.content_length(),
            range,
            uri,
        )?;

        debug!(
            status = response.status().as_u16(),
            total_length = ?plan.total_length,
            skip = plan.skip,
            "Upstream response accepted"
        );

        if plan.empty {
            return Ok(UpstreamResponse::empty(plan.total_length));
        }

        let body = response
            .bytes_stream()
            .map_err(|e| BridgeError::Network(e.to_string()))
            .boxed();

        Ok(UpstreamResponse::new(
            plan.total_length,
            clamp_stream(body, plan.skip, plan.limit),
        ))
    }

    fn name(&self) -> &str {
        "reqwest"
    }
}
