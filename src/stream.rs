//! Streaming explain API: relay backend tokens as they arrive.
//!
//! ## Task / consumer split
//!
//! [`Explainer::explain_stream`] validates the request and checks the cache
//! on the caller's task, then spawns a producer that feeds a single-slot
//! `mpsc` queue. The caller pulls chunks from the returned [`ChunkStream`].
//! A slow consumer therefore applies back-pressure all the way to the
//! backend socket, and chunks arrive in exactly the order they were produced.
//!
//! ## Cancellation
//!
//! The caller's [`CancellationToken`] is observed while preprocessing, while
//! waiting for the next backend token and while waiting for queue space.
//! On cancellation the producer makes one non-blocking attempt to enqueue
//! `Err(Cancelled)`, skips the cache write and exits.
//!
//! ## Terminal chunks
//!
//! `Done` and `Err` are delivered "deliver-or-drop": a `try_send`, then a
//! wait for queue space bounded by [`ExplainConfig::terminal_grace`] and by
//! cancellation. A consumer that stopped reading never wedges the producer.
//!
//! [`ExplainConfig::terminal_grace`]: crate::config::ExplainConfig::terminal_grace

use crate::error::ExplainError;
use crate::explain::Explainer;
use crate::request::{ExplainRequest, StreamChunk};
use futures::StreamExt;
use std::pin::Pin;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A boxed stream of explanation chunks. Ends after the first terminal chunk.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// What the consumer wants besides the deltas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Deltas only; a cache hit arrives as a single `Delta`.
    #[default]
    Deltas,
    /// Deltas plus one `Explanation` with the full text right before `Done`;
    /// a cache hit arrives as a single `Explanation`.
    WithExplanation,
}

/// Lifecycle of one streaming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    CacheCheck,
    Dispatching,
    Streaming,
    Completed,
    Failed,
}

impl StreamState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StreamState::Completed | StreamState::Failed)
    }
}

impl Explainer {
    /// Explain one file, streaming the answer.
    ///
    /// # Returns
    /// - `Err(ExplainError)` when validation fails; nothing is spawned.
    /// - `Ok(ChunkStream)` otherwise. Preprocessing and backend failures
    ///   arrive as a terminal [`StreamChunk::Err`].
    ///
    /// # Example
    /// ```rust,no_run
    /// use edgequake_explain::{DeliveryMode, ExplainRequest, Explainer, OpenAiBackend, StreamChunk};
    /// use futures::StreamExt;
    /// use std::sync::Arc;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let backend = Arc::new(OpenAiBackend::new("http://localhost:8000/v1", None)?);
    /// let explainer = Explainer::builder(backend).build();
    /// let request: ExplainRequest = serde_json::from_str(&std::fs::read_to_string("req.json")?)?;
    ///
    /// let mut chunks = explainer
    ///     .explain_stream(request, CancellationToken::new(), DeliveryMode::Deltas)
    ///     .await?;
    /// while let Some(chunk) = chunks.next().await {
    ///     match chunk {
    ///         StreamChunk::Delta(text) => print!("{text}"),
    ///         StreamChunk::Err(e) => eprintln!("\nerror: {e}"),
    ///         _ => {}
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn explain_stream(
        &self,
        request: ExplainRequest,
        cancel: CancellationToken,
        mode: DeliveryMode,
    ) -> Result<ChunkStream, ExplainError> {
        request.validate()?;

        let mut state = StreamState::Idle;
        let cached = if self.cache.is_enabled() {
            state = StreamState::CacheCheck;
            self.cache.lookup(&request).await
        } else {
            None
        };

        let (tx, rx) = mpsc::channel(1);
        let producer = Producer {
            explainer: self.clone(),
            tx,
            cancel,
            mode,
            grace: self.config.terminal_grace(),
            state,
        };
        tokio::spawn(producer.run(request, cached));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// The spawned half of a streaming request.
struct Producer {
    explainer: Explainer,
    tx: mpsc::Sender<StreamChunk>,
    cancel: CancellationToken,
    mode: DeliveryMode,
    grace: Duration,
    state: StreamState,
}

impl Producer {
    async fn run(mut self, request: ExplainRequest, cached: Option<String>) {
        let start = Instant::now();

        if let Some(text) = cached {
            info!("Streaming {} from cache", request.file_name);
            let chunk = match self.mode {
                DeliveryMode::Deltas => StreamChunk::Delta(text),
                DeliveryMode::WithExplanation => StreamChunk::Explanation(text),
            };
            if self.push(chunk).await {
                self.complete(true).await;
            }
            return;
        }

        // ── Preprocess ───────────────────────────────────────────────────
        self.transition(StreamState::Dispatching);
        let prepared = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExplainError::Cancelled),
            chat = self.explainer.prepare(&request) => chat,
        };
        let chat = match prepared {
            Ok(chat) => chat,
            Err(e) => return self.fail(e).await,
        };

        // ── Open backend stream ──────────────────────────────────────────
        self.transition(StreamState::Streaming);
        let backend = std::sync::Arc::clone(&self.explainer.backend);
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ExplainError::Cancelled),
            tokens = backend.stream(&chat) => tokens,
        };
        let mut tokens = match opened {
            Ok(tokens) => tokens,
            Err(e) => return self.fail(e).await,
        };

        // ── Relay ────────────────────────────────────────────────────────
        let mut explanation = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.fail(ExplainError::Cancelled).await,
                next = tokens.next() => next,
            };
            match next {
                None => break,
                Some(Err(e)) => return self.fail(e).await,
                Some(Ok(delta)) if delta.is_empty() => continue,
                Some(Ok(delta)) => {
                    explanation.push_str(&delta);
                    if !self.push(StreamChunk::Delta(delta)).await {
                        return;
                    }
                }
            }
        }

        if self.cancel.is_cancelled() {
            return self.fail(ExplainError::Cancelled).await;
        }

        self.explainer.cache.store(&request, &explanation).await;
        debug!(
            "Streamed {} chars for {} in {:?}",
            explanation.len(),
            request.file_name,
            start.elapsed()
        );

        if self.mode == DeliveryMode::WithExplanation
            && !self.push(StreamChunk::Explanation(explanation)).await
        {
            return;
        }
        self.complete(false).await;
    }

    fn transition(&mut self, next: StreamState) {
        debug!("Stream state {:?} → {:?}", self.state, next);
        self.state = next;
    }

    /// Enqueue a non-terminal chunk, waiting for space.
    ///
    /// Returns `false` when the request is over: the consumer is gone or the
    /// token fired (in which case the cancellation error has been attempted).
    async fn push(&mut self, chunk: StreamChunk) -> bool {
        if self.cancel.is_cancelled() {
            self.abort_cancelled();
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.abort_cancelled();
                false
            }
            sent = self.tx.send(chunk) => match sent {
                Ok(()) => true,
                Err(_) => {
                    debug!("Stream consumer went away");
                    self.transition(StreamState::Failed);
                    false
                }
            },
        }
    }

    async fn complete(&mut self, from_cache: bool) {
        self.transition(StreamState::Completed);
        self.deliver_terminal(StreamChunk::Done(from_cache)).await;
    }

    async fn fail(&mut self, error: ExplainError) {
        if error == ExplainError::Cancelled {
            self.abort_cancelled();
            return;
        }
        warn!("Stream failed: {}", error);
        self.transition(StreamState::Failed);
        self.deliver_terminal(StreamChunk::Err(error)).await;
    }

    /// One non-blocking attempt to report cancellation.
    fn abort_cancelled(&mut self) {
        info!("Stream cancelled");
        self.transition(StreamState::Failed);
        if self.tx.try_send(StreamChunk::Err(ExplainError::Cancelled)).is_err() {
            debug!("Cancellation chunk dropped");
        }
    }

    async fn deliver_terminal(&self, chunk: StreamChunk) {
        let chunk = match self.tx.try_send(chunk) {
            Ok(()) => return,
            Err(TrySendError::Closed(_)) => {
                debug!("Terminal chunk dropped: consumer closed");
                return;
            }
            Err(TrySendError::Full(chunk)) => chunk,
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => debug!("Terminal chunk dropped: cancelled"),
            sent = tokio::time::timeout(self.grace, self.tx.send(chunk)) => match sent {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("Terminal chunk dropped: consumer closed"),
                Err(_) => warn!("Terminal chunk dropped after {:?} grace", self.grace),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ChatBackend, TokenStream};
    use crate::cache::{Cache, MemoryCache};
    use crate::config::ExplainConfig;
    use crate::pipeline::message::ChatRequest;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Streams scripted items; with `hang`, never ends after them.
    struct ScriptedBackend {
        items: Vec<Result<String, ExplainError>>,
        hang: bool,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(items: Vec<Result<String, ExplainError>>) -> Self {
            Self {
                items,
                hang: false,
                calls: AtomicUsize::new(0),
            }
        }

        fn hanging(items: Vec<Result<String, ExplainError>>) -> Self {
            Self {
                hang: true,
                ..Self::new(items)
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn complete(&self, _request: &ChatRequest) -> Result<String, ExplainError> {
            unreachable!("streaming tests never call complete")
        }

        async fn stream(&self, _request: &ChatRequest) -> Result<TokenStream, ExplainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let items = futures::stream::iter(self.items.clone());
            if self.hang {
                Ok(Box::pin(items.chain(futures::stream::pending())))
            } else {
                Ok(Box::pin(items))
            }
        }
    }

    fn request() -> ExplainRequest {
        ExplainRequest {
            prompt: String::new(),
            file_base64: "iVBORw0KGgo=".into(),
            file_name: "seq.png".into(),
            file_format: "png".into(),
            generation: None,
        }
    }

    fn explainer(backend: Arc<ScriptedBackend>, cache: Option<Arc<MemoryCache>>) -> Explainer {
        explainer_with_grace(backend, cache, 1000)
    }

    fn explainer_with_grace(
        backend: Arc<ScriptedBackend>,
        cache: Option<Arc<MemoryCache>>,
        grace_ms: u64,
    ) -> Explainer {
        let config = ExplainConfig::builder()
            .terminal_grace_ms(grace_ms)
            .build()
            .unwrap();
        let mut builder = Explainer::builder(backend).config(config);
        if let Some(cache) = cache {
            builder = builder.cache(cache);
        }
        builder.build()
    }

    fn ok(items: &[&str]) -> Vec<Result<String, ExplainError>> {
        items.iter().map(|s| Ok(s.to_string())).collect()
    }

    #[tokio::test]
    async fn deltas_arrive_in_order_then_done() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let backend = Arc::new(ScriptedBackend::new(ok(&["A", "", "B", "C"])));
        let explainer = explainer(backend, Some(cache.clone()));

        let chunks: Vec<_> = explainer
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta("A".into()),
                StreamChunk::Delta("B".into()),
                StreamChunk::Delta("C".into()),
                StreamChunk::Done(false),
            ]
        );
        let key = crate::cache::cache_key(&request());
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("ABC"));
    }

    #[tokio::test]
    async fn with_explanation_mode_sends_full_text_before_done() {
        let backend = Arc::new(ScriptedBackend::new(ok(&["x", "y"])));
        let chunks: Vec<_> = explainer(backend, None)
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::WithExplanation)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(
            chunks[2..],
            [StreamChunk::Explanation("xy".into()), StreamChunk::Done(false)]
        );
    }

    #[tokio::test]
    async fn cache_hit_skips_backend() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        cache
            .set(&crate::cache::cache_key(&request()), "from cache")
            .await
            .unwrap();
        let backend = Arc::new(ScriptedBackend::new(ok(&["never"])));
        let explainer = explainer(backend.clone(), Some(cache));

        let chunks: Vec<_> = explainer
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![StreamChunk::Delta("from cache".into()), StreamChunk::Done(true)]
        );

        let chunks: Vec<_> = explainer
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::WithExplanation)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![StreamChunk::Explanation("from cache".into()), StreamChunk::Done(true)]
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_mid_stream_ends_with_error_and_skips_cache() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let backend = Arc::new(ScriptedBackend::hanging(ok(&["A"])));
        let cancel = CancellationToken::new();
        let mut stream = explainer(backend, Some(cache.clone()))
            .explain_stream(request(), cancel.clone(), DeliveryMode::Deltas)
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(StreamChunk::Delta("A".into())));
        cancel.cancel();
        assert_eq!(stream.next().await, Some(StreamChunk::Err(ExplainError::Cancelled)));
        assert_eq!(stream.next().await, None);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn backend_error_is_terminal() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let mut items = ok(&["partial"]);
        items.push(Err(ExplainError::Backend("upstream reset".into())));
        items.push(Ok("unreachable".into()));
        let backend = Arc::new(ScriptedBackend::new(items));

        let chunks: Vec<_> = explainer(backend, Some(cache.clone()))
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Delta("partial".into()),
                StreamChunk::Err(ExplainError::Backend("upstream reset".into())),
            ]
        );
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn preprocessing_error_never_opens_backend() {
        let backend = Arc::new(ScriptedBackend::new(ok(&["A"])));
        let req = ExplainRequest {
            file_base64: "***not base64***".into(),
            ..request()
        };
        let chunks: Vec<_> = explainer(backend.clone(), None)
            .explain_stream(req, CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(chunks[0], StreamChunk::Err(ExplainError::InvalidPayload { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_failure_is_returned_directly() {
        let backend = Arc::new(ScriptedBackend::new(ok(&["A"])));
        let req = ExplainRequest {
            file_base64: String::new(),
            ..request()
        };
        let result = explainer(backend, None)
            .explain_stream(req, CancellationToken::new(), DeliveryMode::Deltas)
            .await;
        assert!(matches!(result, Err(ExplainError::Validation(_))));
    }

    #[tokio::test]
    async fn dropped_consumer_stops_producer() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let backend = Arc::new(ScriptedBackend::new(ok(&["A", "B", "C", "D"])));
        let mut stream = explainer(backend, Some(cache.clone()))
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap();

        assert_eq!(stream.next().await, Some(StreamChunk::Delta("A".into())));
        drop(stream);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.is_empty().await, "aborted stream must not be cached");
    }

    #[tokio::test]
    async fn stalled_consumer_loses_terminal_chunk_after_grace() {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
        let backend = Arc::new(ScriptedBackend::new(ok(&["A"])));
        let mut stream = explainer_with_grace(backend, Some(cache.clone()), 50)
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap();

        // Nobody reads: "A" fills the single slot, so `Done` finds the queue full.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let key = crate::cache::cache_key(&request());
        assert_eq!(cache.get(&key).await.unwrap().as_deref(), Some("A"));

        // The producer gave up on `Done` and exited, closing the queue.
        assert_eq!(stream.next().await, Some(StreamChunk::Delta("A".into())));
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), stream.next()).await,
            Ok(None)
        );
    }

    #[tokio::test]
    async fn slow_consumer_within_grace_still_gets_done() {
        let backend = Arc::new(ScriptedBackend::new(ok(&["A"])));
        let mut stream = explainer_with_grace(backend, None, 1000)
            .explain_stream(request(), CancellationToken::new(), DeliveryMode::Deltas)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stream.next().await, Some(StreamChunk::Delta("A".into())));
        assert_eq!(stream.next().await, Some(StreamChunk::Done(false)));
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn terminal_states() {
        assert!(StreamState::Completed.is_terminal());
        assert!(StreamState::Failed.is_terminal());
        assert!(!StreamState::Streaming.is_terminal());
    }
}
