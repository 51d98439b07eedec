//! Debounced batching for asynchronous coordinate conversion
//!
//! Some SDKs can only turn coordinates into their own datum through a remote call
//! that accepts many points at once. An adapter owns a [`ConversionBatcher`] and
//! funnels single requests through it; they go out together once the queue has
//! waited `flush_delay` or reached `max_batch_size`, whichever comes first.

use crate::{runtime, MapError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// When to send a batch
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Send as soon as this many requests are waiting
    pub max_batch_size: usize,
    /// Send this long after the first request of a batch arrived
    pub flush_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_delay: Duration::from_millis(50),
        }
    }
}

type FlushFn<T, R> = Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<Vec<R>>> + Send + Sync>;
type Responder<R> = oneshot::Sender<Result<R>>;

/// Queue that groups conversion requests into batches.
///
/// The flush function receives the inputs in request order and must return exactly
/// one output per input, in the same order.
pub struct ConversionBatcher<T, R> {
    inner: Arc<BatcherInner<T, R>>,
}

struct BatcherInner<T, R> {
    config: BatchConfig,
    flush: FlushFn<T, R>,
    queue: Mutex<BatchQueue<T, R>>,
    /// Cancelled once, when the batcher shuts down
    shutdown: CancellationToken,
}

struct BatchQueue<T, R> {
    pending: Vec<(T, Responder<R>)>,
    timer: Option<CancellationToken>,
}

impl<T, R> ConversionBatcher<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new<F, Fut>(config: BatchConfig, flush: F) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        let flush: FlushFn<T, R> = Arc::new(move |items| Box::pin(flush(items)));
        Self {
            inner: Arc::new(BatcherInner {
                config: BatchConfig {
                    max_batch_size: config.max_batch_size.max(1),
                    ..config
                },
                flush,
                queue: Mutex::new(BatchQueue {
                    pending: Vec::new(),
                    timer: None,
                }),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queues `item` for conversion.
    ///
    /// The request is queued when this is called; the returned future only waits for
    /// the answer.
    pub fn convert(&self, item: T) -> impl Future<Output = Result<R>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.enqueue(item, tx);
        async move { rx.await.unwrap_or(Err(MapError::Cancelled)) }
    }

    fn enqueue(&self, item: T, responder: Responder<R>) {
        if self.inner.shutdown.is_cancelled() {
            let _ = responder.send(Err(MapError::Cancelled));
            return;
        }

        let full_batch = {
            let mut queue = self.inner.queue.lock();
            queue.pending.push((item, responder));

            if queue.pending.len() >= self.inner.config.max_batch_size {
                if let Some(timer) = queue.timer.take() {
                    timer.cancel();
                }
                Some(std::mem::take(&mut queue.pending))
            } else {
                if queue.timer.is_none() {
                    let timer = CancellationToken::new();
                    queue.timer = Some(timer.clone());
                    self.start_timer(timer);
                }
                None
            }
        };

        if let Some(batch) = full_batch {
            dispatch(self.inner.clone(), batch);
        }
    }

    fn start_timer(&self, timer: CancellationToken) {
        let inner = self.inner.clone();
        runtime::spawn(async move {
            tokio::select! {
                biased;
                _ = timer.cancelled() => return,
                _ = runtime::async_delay(inner.config.flush_delay) => {}
            }

            let batch = {
                let mut queue = inner.queue.lock();
                // A size-triggered flush or cancel() got here first
                if timer.is_cancelled() {
                    return;
                }
                queue.timer = None;
                std::mem::take(&mut queue.pending)
            };
            if !batch.is_empty() {
                dispatch(inner, batch);
            }
        });
    }

    /// Number of requests waiting for the next batch
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().pending.len()
    }

    /// Drops every queued and in-flight request, failing them with
    /// [`MapError::Cancelled`]. Later requests fail the same way. Calling this more
    /// than once has no further effect.
    pub fn cancel(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        let dropped = {
            let mut queue = self.inner.queue.lock();
            if let Some(timer) = queue.timer.take() {
                timer.cancel();
            }
            std::mem::take(&mut queue.pending)
        };
        log::debug!("Conversion batcher cancelled, dropping {} requests", dropped.len());
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

fn dispatch<T, R>(inner: Arc<BatcherInner<T, R>>, batch: Vec<(T, Responder<R>)>)
where
    T: Send + 'static,
    R: Send + 'static,
{
    let (items, responders): (Vec<T>, Vec<Responder<R>>) = batch.into_iter().unzip();
    log::debug!("Flushing conversion batch of {}", items.len());

    let request = (inner.flush)(items);
    let shutdown = inner.shutdown.clone();
    runtime::spawn(async move {
        let result = tokio::select! {
            biased;
            // Dropping the responders fails every waiter with Cancelled
            _ = shutdown.cancelled() => return,
            result = request => result,
        };

        match result {
            Ok(outputs) if outputs.len() == responders.len() => {
                for (responder, output) in responders.into_iter().zip(outputs) {
                    let _ = responder.send(Ok(output));
                }
            }
            Ok(outputs) => {
                log::warn!(
                    "Conversion returned {} results for {} requests",
                    outputs.len(),
                    responders.len()
                );
                let message = format!(
                    "conversion returned {} results for {} requests",
                    outputs.len(),
                    responders.len()
                );
                for responder in responders {
                    let _ = responder.send(Err(MapError::Provider(message.clone())));
                }
            }
            Err(e) => {
                let message = e.to_string();
                for responder in responders {
                    let _ = responder.send(Err(MapError::Provider(message.clone())));
                }
            }
        }
    });
}

impl<T, R> Drop for ConversionBatcher<T, R> {
    fn drop(&mut self) {
        // Timer and flush tasks hold their own reference, so stop them explicitly
        self.inner.shutdown.cancel();
        if let Some(timer) = self.inner.queue.lock().timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doubling_batcher(
        config: BatchConfig,
        batches: Arc<Mutex<Vec<Vec<u32>>>>,
    ) -> ConversionBatcher<u32, u32> {
        ConversionBatcher::new(config, move |items: Vec<u32>| {
            batches.lock().push(items.clone());
            async move { Ok(items.into_iter().map(|n| n * 2).collect()) }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_are_batched_after_delay() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let batcher = doubling_batcher(
            BatchConfig {
                max_batch_size: 10,
                flush_delay: Duration::from_millis(20),
            },
            batches.clone(),
        );

        let requests: Vec<_> = (1..=3).map(|n| batcher.convert(n)).collect();
        assert_eq!(batcher.pending(), 3);

        let results = futures::future::join_all(requests).await;
        let results: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(results, vec![2, 4, 6]);
        assert_eq!(*batches.lock(), vec![vec![1, 2, 3]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_flushes_early() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let batcher = doubling_batcher(
            BatchConfig {
                max_batch_size: 2,
                flush_delay: Duration::from_secs(60),
            },
            batches.clone(),
        );

        let a = batcher.convert(5);
        let b = batcher.convert(6);
        assert_eq!(batcher.pending(), 0);

        let timeout = Duration::from_secs(1);
        assert_eq!(tokio::time::timeout(timeout, a).await.unwrap().unwrap(), 10);
        assert_eq!(tokio::time::timeout(timeout, b).await.unwrap().unwrap(), 12);
        assert_eq!(batches.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_fails_pending_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let batcher: ConversionBatcher<u32, u32> = ConversionBatcher::new(
            BatchConfig {
                max_batch_size: 10,
                flush_delay: Duration::from_millis(20),
            },
            move |items: Vec<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok(items) }
            },
        );

        let request = batcher.convert(1);
        batcher.cancel();
        batcher.cancel();

        assert!(matches!(request.await, Err(MapError::Cancelled)));
        assert!(matches!(batcher.convert(2).await, Err(MapError::Cancelled)));
        assert!(batcher.is_cancelled());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mismatched_result_length_is_an_error() {
        let batcher: ConversionBatcher<u32, u32> = ConversionBatcher::new(
            BatchConfig {
                max_batch_size: 2,
                flush_delay: Duration::from_millis(5),
            },
            |_items: Vec<u32>| async move { Ok(vec![1]) },
        );

        let (a, b) = tokio::join!(batcher.convert(1), batcher.convert(2));
        assert!(matches!(a, Err(MapError::Provider(_))));
        assert!(matches!(b, Err(MapError::Provider(_))));
    }

    #[tokio::test]
    async fn test_flush_error_reaches_every_request() {
        let batcher: ConversionBatcher<u32, u32> = ConversionBatcher::new(
            BatchConfig::default(),
            |_items: Vec<u32>| async move { Err(MapError::Provider("quota exceeded".into())) },
        );

        let (a, b) = tokio::join!(batcher.convert(1), batcher.convert(2));
        assert!(matches!(a, Err(MapError::Provider(ref m)) if m.contains("quota exceeded")));
        assert!(b.is_err());
    }
}
