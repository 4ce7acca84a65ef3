//! Chunked range fetching with provider-driven splitting and backoff.

use std::{collections::VecDeque, future::Future, time::Duration};

use futures::{stream, StreamExt, TryStreamExt};
use tracery_intervals::IntervalSet;
use tracery_rpc::{plan_range_split, RpcError};
use tracing::{debug, warn};

use crate::error::{HistoricalError, Result};

/// Tunables for historical fetching.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    /// Initial chunk size; providers may force smaller via range errors.
    pub max_block_range: u64,
    /// Concurrent in-flight chunk fetches per chain.
    pub max_concurrency: usize,
    /// Attempts per chunk for rate-limit/transient errors.
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt.
    pub backoff_base: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_block_range: 2_000,
            max_concurrency: 8,
            max_retries: 4,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Fetches every block range in `required`, chunked by the policy, fanning
/// out up to `max_concurrency` chunks while keeping output in range order.
pub(crate) async fn fetch_chunks<T, F, Fut>(
    policy: &FetchPolicy,
    required: &IntervalSet,
    fetch: &F,
) -> Result<Vec<T>>
where
    F: Fn(u64, u64) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<T>, RpcError>>,
{
    let chunks = required.chunk(policy.max_block_range);

    let results: Vec<Vec<T>> = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| fetch_one_chunk(policy, chunk.from, chunk.to, fetch)),
    )
    .buffered(policy.max_concurrency)
    .try_collect()
    .await?;

    Ok(results.into_iter().flatten().collect())
}

/// Fetches one chunk, splitting on range rejections and backing off on
/// retryable failures.
async fn fetch_one_chunk<T, F, Fut>(
    policy: &FetchPolicy,
    from: u64,
    to: u64,
    fetch: &F,
) -> Result<Vec<T>>
where
    F: Fn(u64, u64) -> Fut,
    Fut: Future<Output = std::result::Result<Vec<T>, RpcError>>,
{
    let mut queue: VecDeque<(u64, u64)> = VecDeque::from([(from, to)]);
    let mut collected = Vec::new();

    while let Some((range_from, range_to)) = queue.pop_front() {
        let mut attempt = 0u32;
        loop {
            match fetch(range_from, range_to).await {
                Ok(mut items) => {
                    collected.append(&mut items);
                    break;
                }
                Err(RpcError::RangeTooLarge { message }) => {
                    let splits = plan_range_split(&message, range_from, range_to);
                    if splits.is_empty() {
                        return Err(HistoricalError::RangeUnsplittable {
                            from: range_from,
                            to: range_to,
                        });
                    }
                    debug!(
                        from = range_from,
                        to = range_to,
                        parts = splits.len(),
                        "provider rejected range; splitting"
                    );
                    // Preserve ascending order: sub-ranges go to the front.
                    for split in splits.into_iter().rev() {
                        queue.push_front(split);
                    }
                    break;
                }
                Err(error @ (RpcError::RateLimited(_) | RpcError::Transient(_))) => {
                    if attempt >= policy.max_retries {
                        return Err(HistoricalError::RetriesExhausted(error));
                    }
                    let delay = policy.backoff_base * 2u32.saturating_pow(attempt);
                    warn!(
                        from = range_from,
                        to = range_to,
                        %error,
                        attempt,
                        ?delay,
                        "retryable fetch failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(fatal) => return Err(HistoricalError::Rpc(fatal)),
            }
        }
    }

    Ok(collected)
}
