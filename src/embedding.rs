//! The embedding provider contract and the batching/retry layer over it.

use std::time::Duration;

use backon::{BlockingRetryable, ExponentialBuilder};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// What the embedded text will be used for. Providers may specialize
/// vectors per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingTask {
    Document,
    Query,
}

/// A source of fixed-length vectors for text.
///
/// Implementations must return exactly one vector per input, in input
/// order. Throttling is reported as [`Error::RateLimited`]; anything else
/// is treated as fatal for the current batch.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>>;

    /// Short identifier used in logs.
    fn name(&self) -> &str;
}

/// Bounded exponential backoff for rate-limited calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(160),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_factor(2.0)
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.attempts.saturating_sub(1) as usize)
    }
}

/// Call the provider once, retrying only on rate limiting, and check that
/// it answered one vector per input.
pub fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    task: EmbeddingTask,
    policy: &RetryPolicy,
) -> Result<Vec<Vec<f32>>> {
    let vectors = (|| provider.embed(texts, task))
        .retry(policy.backoff())
        .sleep(std::thread::sleep)
        .when(Error::is_retryable)
        .notify(|e: &Error, delay: Duration| {
            warn!(
                provider = provider.name(),
                delay_ms = delay.as_millis() as u64,
                "embedding request throttled, retrying: {e}"
            );
        })
        .call()?;

    if vectors.len() != texts.len() {
        return Err(Error::Embedding(format!(
            "{} returned {} vectors for {} inputs",
            provider.name(),
            vectors.len(),
            texts.len()
        )));
    }
    Ok(vectors)
}

/// Splits large inputs into fixed-size requests with a pause between them.
pub struct BatchEmbedder<'a> {
    provider: &'a dyn EmbeddingProvider,
    batch_size: usize,
    pause: Duration,
    retry: RetryPolicy,
}

impl<'a> BatchEmbedder<'a> {
    pub fn new(provider: &'a dyn EmbeddingProvider) -> Self {
        Self {
            provider,
            batch_size: 50,
            pause: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Embed every text, in order. Fails as a whole if any batch fails.
    pub fn embed_all(
        &self,
        texts: &[String],
        task: EmbeddingTask,
    ) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let batches = texts.len().div_ceil(self.batch_size);

        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 && !self.pause.is_zero() {
                std::thread::sleep(self.pause);
            }
            debug!(
                batch = i + 1,
                of = batches,
                size = batch.len(),
                "embedding batch"
            );
            vectors.extend(embed_with_retry(
                self.provider,
                batch,
                task,
                &self.retry,
            )?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    /// Fails with the given error `failures` times, then embeds each text as
    /// `[len, 1.0]`.
    pub(crate) struct FlakyProvider {
        failures: AtomicUsize,
        error: fn() -> Error,
        pub(crate) calls: AtomicUsize,
        pub(crate) batch_sizes: Mutex<Vec<usize>>,
    }

    impl FlakyProvider {
        pub(crate) fn new(failures: usize, error: fn() -> Error) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
                error,
                calls: AtomicUsize::new(0),
                batch_sizes: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn reliable() -> Self {
            Self::new(0, || Error::Embedding("unused".into()))
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        fn embed(
            &self,
            texts: &[String],
            _task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batch_sizes.lock().unwrap().push(texts.len());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err((self.error)());
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    struct ShortProvider;

    impl EmbeddingProvider for ShortProvider {
        fn embed(
            &self,
            _texts: &[String],
            _task: EmbeddingTask,
        ) -> Result<Vec<Vec<f32>>> {
            Ok(vec![vec![0.0]])
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn texts(n: usize) -> Vec<String> {
        (0..n).map(|i| "x".repeat(i + 1)).collect()
    }

    #[test]
    fn rate_limits_are_retried() {
        let provider =
            FlakyProvider::new(2, || Error::RateLimited("429".into()));
        let vectors = embed_with_retry(
            &provider,
            &texts(2),
            EmbeddingTask::Document,
            &fast_retry(5),
        )
        .unwrap();

        assert_eq!(vectors, vec![vec![1.0, 1.0], vec![2.0, 1.0]]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retries_are_bounded() {
        let provider =
            FlakyProvider::new(10, || Error::RateLimited("429".into()));
        let err = embed_with_retry(
            &provider,
            &texts(1),
            EmbeddingTask::Document,
            &fast_retry(3),
        )
        .unwrap_err();

        assert!(matches!(err, Error::RateLimited(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let provider =
            FlakyProvider::new(1, || Error::Embedding("bad request".into()));
        let err = embed_with_retry(
            &provider,
            &texts(1),
            EmbeddingTask::Query,
            &fast_retry(5),
        )
        .unwrap_err();

        assert!(matches!(err, Error::Embedding(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wrong_vector_count_is_an_error() {
        let err = embed_with_retry(
            &ShortProvider,
            &texts(3),
            EmbeddingTask::Document,
            &fast_retry(1),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn batches_preserve_order() {
        let provider = FlakyProvider::reliable();
        let embedder = BatchEmbedder::new(&provider)
            .with_batch_size(2)
            .with_pause(Duration::ZERO)
            .with_retry(fast_retry(1));

        let vectors =
            embedder.embed_all(&texts(5), EmbeddingTask::Document).unwrap();

        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let provider = FlakyProvider::reliable();
        let vectors = BatchEmbedder::new(&provider)
            .embed_all(&[], EmbeddingTask::Document)
            .unwrap();
        assert!(vectors.is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
