//! Topic-scoped publish/subscribe over server-sent events.

use crate::metrics::MetricsRegistry;
use crate::topic::TopicResolver;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{StreamExt, future};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Broadcaster errors
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("operation not supported by this broadcaster")]
    NotSupported,

    #[error("broadcaster is closed")]
    Closed,

    #[error("refusing to use an empty topic")]
    EmptyTopic,

    #[error("payload is not valid UTF-8")]
    InvalidPayload,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish/subscribe transport
pub trait Broadcaster: Send + Sync {
    /// Deliver `payload` to the current subscribers of `topic`.
    ///
    /// A topic without subscribers is not an error.
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BroadcastError>;

    /// Router serving the streaming endpoint at its root
    fn http_handler(&self) -> Router;

    /// Channel-based subscription, for transports that offer one
    fn subscribe(&self, _topic: &str) -> Result<broadcast::Receiver<Bytes>, BroadcastError> {
        Err(BroadcastError::NotSupported)
    }

    /// End every live stream. Repeated calls are no-ops.
    fn close(&self);
}

struct Inner {
    topics: DashMap<String, broadcast::Sender<Bytes>>,
    resolver: Arc<dyn TopicResolver>,
    capacity: usize,
    keep_alive: Duration,
    closed: CancellationToken,
    metrics: Option<Arc<MetricsRegistry>>,
}

/// Broadcaster backed by one SSE stream per connection.
///
/// Each topic owns a `broadcast` channel created on first subscription and
/// dropped once a publish finds it without receivers.
#[derive(Clone)]
pub struct SseBroadcaster {
    inner: Arc<Inner>,
}

impl SseBroadcaster {
    pub fn new(
        resolver: Arc<dyn TopicResolver>,
        capacity: usize,
        keep_alive: Duration,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: DashMap::new(),
                resolver,
                capacity: capacity.max(1),
                keep_alive,
                closed: CancellationToken::new(),
                metrics,
            }),
        }
    }

    /// Live subscribers of `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .get(topic)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Topics with a registered channel
    pub fn topic_count(&self) -> usize {
        self.inner.topics.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    fn register(&self, topic: &str) -> broadcast::Receiver<Bytes> {
        self.inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }
}

impl Broadcaster for SseBroadcaster {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), BroadcastError> {
        if self.is_closed() {
            return Err(BroadcastError::Closed);
        }
        if topic.is_empty() {
            return Err(BroadcastError::EmptyTopic);
        }
        let payload = normalize_payload(payload)?;

        let delivered = match self.inner.topics.get(topic) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        };

        if delivered == 0 {
            self.inner
                .topics
                .remove_if(topic, |_, tx| tx.receiver_count() == 0);
        }

        Ok(())
    }

    fn http_handler(&self) -> Router {
        Router::new()
            .route("/", get(stream_handler))
            .with_state(self.clone())
    }

    fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.closed.cancel();
        self.inner.topics.clear();
        info!("Broadcaster closed");
    }
}

/// Check that `payload` can travel as SSE data.
///
/// Event data is text, and `\r` is not allowed inside a field, so `\r\n` and
/// lone `\r` line endings are rewritten to `\n`.
fn normalize_payload(payload: Bytes) -> Result<Bytes, BroadcastError> {
    let text = std::str::from_utf8(&payload).map_err(|_| BroadcastError::InvalidPayload)?;
    if !text.contains('\r') {
        return Ok(payload);
    }
    Ok(Bytes::from(text.replace("\r\n", "\n").replace('\r', "\n")))
}

/// Keeps the subscriber gauge in step with the stream's lifetime
struct SubscriberGuard {
    topic: String,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl SubscriberGuard {
    fn new(topic: String, metrics: Option<Arc<MetricsRegistry>>) -> Self {
        if let Some(ref metrics) = metrics {
            metrics.subscriber_connected();
        }
        debug!(%topic, "Subscriber connected");
        Self { topic, metrics }
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        if let Some(ref metrics) = self.metrics {
            metrics.subscriber_disconnected();
        }
        debug!(topic = %self.topic, "Subscriber disconnected");
    }
}

async fn stream_handler(
    State(broadcaster): State<SseBroadcaster>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    if broadcaster.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }

    let topic = match broadcaster.inner.resolver.resolve(&headers, &uri) {
        Ok(topic) if !topic.is_empty() => topic,
        Ok(_) => {
            warn!("Topic resolver returned an empty topic");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
        Err(e) => {
            debug!(error = %e, "Stream request rejected");
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    };

    let receiver = broadcaster.register(&topic);
    let guard = SubscriberGuard::new(topic, broadcaster.inner.metrics.clone());

    let stream = BroadcastStream::new(receiver)
        .filter_map(move |item| {
            let _guard = &guard;
            future::ready(match item {
                Ok(payload) => match std::str::from_utf8(&payload) {
                    Ok(text) => Some(Ok::<_, Infallible>(Event::default().data(text))),
                    Err(_) => None,
                },
                Err(e) => {
                    debug!(error = %e, "Subscriber lagging, skipping payloads");
                    None
                }
            })
        })
        .take_until(broadcaster.inner.closed.clone().cancelled_owned());

    Sse::new(stream)
        .keep_alive(
            KeepAlive::new()
                .interval(broadcaster.inner.keep_alive)
                .text("ping"),
        )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::{StreamKind, TopicError, topic_for};

    fn broadcaster() -> SseBroadcaster {
        let resolver = |_: &HeaderMap, _: &Uri| {
            Ok::<_, TopicError>(topic_for(1, StreamKind::Servers))
        };
        SseBroadcaster::new(Arc::new(resolver), 8, Duration::from_secs(15), None)
    }

    #[test]
    fn test_publish_without_subscribers() {
        let b = broadcaster();
        assert!(b.publish("owner-1:services", Bytes::from_static(b"[]")).is_ok());
        assert_eq!(b.topic_count(), 0);
    }

    #[test]
    fn test_empty_topic_rejected() {
        let b = broadcaster();
        assert!(matches!(
            b.publish("", Bytes::from_static(b"[]")),
            Err(BroadcastError::EmptyTopic)
        ));
    }

    #[test]
    fn test_stale_topic_dropped_on_publish() {
        let b = broadcaster();
        let rx = b.register("owner-1:servers");
        assert_eq!(b.subscriber_count("owner-1:servers"), 1);

        drop(rx);
        b.publish("owner-1:servers", Bytes::from_static(b"[]")).unwrap();
        assert_eq!(b.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_registered_receiver_gets_payload() {
        let b = broadcaster();
        let mut rx = b.register("owner-1:servers");

        b.publish("owner-1:servers", Bytes::from_static(b"hello")).unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_non_utf8_payload_rejected() {
        let b = broadcaster();
        let _rx = b.register("owner-1:servers");

        assert!(matches!(
            b.publish("owner-1:servers", Bytes::from_static(&[0xff, 0xfe, b'a'])),
            Err(BroadcastError::InvalidPayload)
        ));
    }

    #[tokio::test]
    async fn test_carriage_returns_become_newlines() {
        let b = broadcaster();
        let mut rx = b.register("owner-1:servers");

        b.publish("owner-1:servers", Bytes::from_static(b"a\r\nb\rc\nd"))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"a\nb\nc\nd"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let b = broadcaster();
        let _rx = b.register("owner-1:servers");

        b.close();
        b.close();

        assert!(b.is_closed());
        assert_eq!(b.topic_count(), 0);
        assert!(matches!(
            b.publish("owner-1:servers", Bytes::new()),
            Err(BroadcastError::Closed)
        ));
    }
}
