//! Upstream Source Abstraction
//!
//! Byte-range reads against the remote origin of a media resource.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::time::Duration;

use crate::error::Result;

/// Stream of body chunks produced by an upstream read.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Half-open byte range `[start, start + length)`.
///
/// A `length` of `None` means "until the end of the resource".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, length: u64) -> Self {
        Self {
            start,
            length: Some(length),
        }
    }

    /// Range from `start` to the end of the resource.
    pub fn from(start: u64) -> Self {
        Self {
            start,
            length: None,
        }
    }

    /// The whole resource.
    pub fn full() -> Self {
        Self::from(0)
    }

    /// Exclusive end offset, if bounded.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.start.saturating_add(len))
    }

    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && self.end().map_or(true, |end| position < end)
    }

    /// Value for an HTTP `Range` request header, e.g. `bytes=0-99`.
    pub fn to_header_value(&self) -> String {
        match self.length {
            Some(len) if len > 0 => format!("bytes={}-{}", self.start, self.start + len - 1),
            _ => format!("bytes={}-", self.start),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end() {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, EOF)", self.start),
        }
    }
}

/// Result of opening an upstream read.
pub struct UpstreamResponse {
    /// Total length of the resource, when the origin reported it.
    pub total_length: Option<u64>,
    /// Body bytes, starting exactly at the requested offset.
    pub stream: ByteStream,
}

impl UpstreamResponse {
    pub fn new(total_length: Option<u64>, stream: ByteStream) -> Self {
        Self {
            total_length,
            stream,
        }
    }

    /// Response with no body, e.g. for a range starting at EOF.
    pub fn empty(total_length: Option<u64>) -> Self {
        Self::new(total_length, stream::empty().boxed())
    }
}

impl fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("total_length", &self.total_length)
            .finish_non_exhaustive()
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

/// Range-capable origin for media bytes.
///
/// Implementations should handle:
/// - Translating the range into the transport's partial-content request
/// - Retrying transient failures before the body starts
/// - Reporting the total resource length when the origin exposes it
///
/// The returned stream must start at `range.start` and must not yield more
/// than `range.length` bytes. Ending early means the resource ended.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::upstream::{ByteRange, UpstreamSource};
/// use futures::StreamExt;
///
/// async fn first_kib(source: &dyn UpstreamSource, uri: &str) -> Result<Vec<u8>> {
///     let mut response = source.read(uri, ByteRange::new(0, 1024)).await?;
///     let mut out = Vec::new();
///     while let Some(chunk) = response.stream.next().await {
///         out.extend_from_slice(&chunk?);
///     }
///     Ok(out)
/// }
/// ```
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Open a read of `range` from the resource at `uri`.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The origin is unreachable or the request times out
    /// - The origin answers with a non-retryable status
    /// - Maximum retries exceeded
    async fn read(&self, uri: &str, range: ByteRange) -> Result<UpstreamResponse>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "upstream"
    }
}

/// Parse an HTTP `Content-Range` value.
///
/// Returns `(first, last, total)` for `bytes a-b/N` or `bytes a-b/*`.
/// The `bytes */N` form is handled by [`parse_unsatisfied_range`].
pub fn parse_content_range(value: &str) -> Option<(u64, u64, Option<u64>)> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let (first, last) = span.split_once('-')?;
    let first = first.trim().parse().ok()?;
    let last = last.trim().parse().ok()?;
    if last < first {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };
    Some((first, last, total))
}

/// Parse the `bytes */N` form sent with `416 Range Not Satisfiable`.
pub fn parse_unsatisfied_range(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    rest.strip_prefix("*/")?.trim().parse().ok()
}

/// Drop the first `skip` bytes of `stream` and stop after `limit` bytes.
///
/// Used when an origin ignores the requested range or sends past its end.
pub fn clamp_stream(stream: ByteStream, skip: u64, limit: Option<u64>) -> ByteStream {
    stream::unfold(
        (stream, skip, limit),
        |(mut stream, mut skip, remaining)| async move {
            loop {
                if remaining == Some(0) {
                    return None;
                }
                let mut chunk = match stream.next().await? {
                    Ok(chunk) => chunk,
                    Err(e) => return Some((Err(e), (stream, skip, Some(0)))),
                };
                if skip > 0 {
                    let dropped = skip.min(chunk.len() as u64);
                    chunk = chunk.slice(dropped as usize..);
                    skip -= dropped;
                    if chunk.is_empty() {
                        continue;
                    }
                }
                let remaining = remaining.map(|rem| {
                    let take = rem.min(chunk.len() as u64);
                    chunk.truncate(take as usize);
                    rem - take
                });
                return Some((Ok(chunk), (stream, skip, remaining)));
            }
        },
    )
    .boxed()
}
