//! ureq agent setup, size-capped body reads and retry backoff for the API
//! gateway.

use std::fmt::Display;
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::config::HttpSettings;

const USER_AGENT: &str = concat!("modeldesk/", env!("CARGO_PKG_VERSION"));
/// Backoff stops doubling after this many attempts.
const MAX_BACKOFF_DOUBLINGS: u32 = 16;

/// Bounded exponential backoff.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetryConfig {
    /// Attempts including the first try.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Idempotent catalog reads (`models`, `datasets`, `profile`).
    pub(crate) const CATALOG_READS: Self = Self {
        max_attempts: 3,
        base_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
    };

    fn delay_after(&self, attempt: usize) -> Duration {
        let doublings = u32::try_from(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX)
            .min(MAX_BACKOFF_DOUBLINGS);
        self.base_delay
            .saturating_mul(1 << doublings)
            .min(self.max_delay)
    }
}

/// A response body that could not be read within its size cap.
#[derive(Debug, thiserror::Error)]
pub(crate) enum BodyError {
    #[error("Response declared {declared} bytes, limit is {limit}")]
    Declared { declared: u64, limit: u64 },
    #[error("Response exceeded {limit} bytes")]
    Exceeded { limit: u64 },
    #[error("Failed to read response body: {0}")]
    Io(#[from] io::Error),
}

pub(crate) fn build_agent(settings: &HttpSettings) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(settings.connect_timeout())
        .timeout_read(settings.read_timeout())
        .timeout_write(settings.write_timeout())
        .user_agent(USER_AGENT)
        .build()
}

/// Run `action` until it succeeds, `should_retry` rejects the error, or the
/// attempts run out. Each retry is logged with `label`.
pub(crate) fn retry_with_backoff<T, E, F, R>(
    label: &str,
    config: RetryConfig,
    mut action: F,
    should_retry: R,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 1;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < config.max_attempts && should_retry(&err) => {
                let delay = config.delay_after(attempt);
                tracing::warn!(
                    "{label} failed (attempt {attempt}/{}): {err}; retrying in {delay:?}",
                    config.max_attempts
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Buffer a whole body, failing once it grows past `limit` bytes.
pub(crate) fn read_body(response: ureq::Response, limit: u64) -> Result<Vec<u8>, BodyError> {
    let mut bytes = Vec::new();
    stream_body(response, &mut bytes, limit)?;
    Ok(bytes)
}

/// Copy a body into `writer` and return the byte count. On
/// [`BodyError::Exceeded`] the writer holds a truncated prefix.
pub(crate) fn stream_body(
    response: ureq::Response,
    writer: &mut impl Write,
    limit: u64,
) -> Result<u64, BodyError> {
    if let Some(declared) = declared_length(&response)
        && declared > limit
    {
        return Err(BodyError::Declared { declared, limit });
    }
    let mut capped = response.into_reader().take(limit.saturating_add(1));
    let copied = io::copy(&mut capped, writer)?;
    if copied > limit {
        return Err(BodyError::Exceeded { limit });
    }
    Ok(copied)
}

fn declared_length(response: &ureq::Response) -> Option<u64> {
    response.header("Content-Length")?.trim().parse().ok()
}
