//! Hosted-platform bridges
//!
//! Vapi and ElevenLabs carry audio in-band over their platform WebSockets;
//! Retell and Bland ride the SIP channel and are reconciled against the
//! platform's REST API after the call. Each bridge normalises its provider's
//! schema to `ObservedToolCall`.

pub mod bland;
pub mod elevenlabs;
pub mod retell;
pub mod vapi;

use std::future::Future;
use std::time::Duration;

use crate::ChannelError;

/// Delay before fetching post-call transcripts; platforms index them lazily.
pub(crate) const TRANSCRIPT_FETCH_DELAY: Duration = Duration::from_secs(3);
/// Call-id resolution retries (list-calls lags the call itself).
pub(crate) const RESOLVE_ATTEMPTS: usize = 5;
pub(crate) const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Retry an operation that legitimately returns empty while the platform
/// catches up. Gives up after `attempts`.
pub(crate) async fn resolve_with_retries<T, F, Fut>(
    what: &str,
    attempts: usize,
    f: F,
) -> Result<T, ChannelError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, ChannelError>>,
{
    for attempt in 1..=attempts {
        match f().await? {
            Some(value) => return Ok(value),
            None if attempt < attempts => {
                tracing::debug!(what, attempt, "not visible yet, retrying");
                tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
            }
            None => break,
        }
    }
    Err(ChannelError::Platform(format!(
        "{} did not become visible after {} attempts",
        what, attempts
    )))
}
