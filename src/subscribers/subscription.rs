use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::core::registry::Registration;
use crate::events::Event;

/// One local subscriber on a channel.
///
/// Yields the channel's events in bus order. The registration is released on
/// [`close`](Self::close) or drop, whichever comes first; when the last
/// subscriber of a channel goes away the bus subscription is dropped too.
///
/// End of stream (`None`) means the subscription was closed and drained, or
/// the broadcaster stopped.
pub struct Subscription {
    channel: Arc<str>,
    queue: mpsc::UnboundedReceiver<Event>,
    registration: Option<Registration>,
}

impl Subscription {
    pub(crate) fn new(registration: Registration, queue: mpsc::UnboundedReceiver<Event>) -> Self {
        Self {
            channel: Arc::clone(registration.channel()),
            queue,
            registration: Some(registration),
        }
    }

    /// Channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next event; `None` once the stream has ended.
    ///
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<Event> {
        self.queue.recv().await
    }

    /// Returns an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.queue.try_recv().ok()
    }

    /// Releases the registration now.
    ///
    /// Events already queued stay readable; after them `recv` returns `None`.
    pub fn close(&mut self) {
        self.registration.take();
    }

    /// Whether no further events will be queued (already queued ones may remain).
    pub fn is_closed(&self) -> bool {
        self.registration.is_none() || self.queue.is_closed()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.queue.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::{Registered, Registry};
    use futures::StreamExt;

    fn subscription(registry: &Arc<Registry>, channel: &str) -> Subscription {
        let Registered {
            registration,
            queue,
            ..
        } = registry.register(channel).unwrap();
        Subscription::new(registration, queue)
    }

    #[tokio::test]
    async fn test_close_keeps_queued_events() {
        let (registry, _commands) = Registry::new();
        let mut sub = subscription(&registry, "chat");
        registry.fan_out(&Event::new("chat", "a"));
        registry.fan_out(&Event::new("chat", "b"));

        sub.close();
        assert!(sub.is_closed());
        assert_eq!(registry.channels(), Vec::<String>::new());
        // Not delivered: released before it was fanned out.
        assert_eq!(registry.fan_out(&Event::new("chat", "c")), 0);

        assert_eq!(sub.recv().await.unwrap().message(), "a");
        assert_eq!(sub.recv().await.unwrap().message(), "b");
        assert!(sub.recv().await.is_none());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_ends_on_registry_close() {
        let (registry, _commands) = Registry::new();
        let sub = subscription(&registry, "chat");
        registry.fan_out(&Event::new("chat", "only"));
        registry.close();

        let got: Vec<Event> = sub.collect().await;
        assert_eq!(got, vec![Event::new("chat", "only")]);
    }

    #[test]
    fn test_drop_releases_registration() {
        let (registry, _commands) = Registry::new();
        let sub = subscription(&registry, "chat");
        assert_eq!(sub.channel(), "chat");
        assert_eq!(registry.queue_count("chat"), 1);
        drop(sub);
        assert_eq!(registry.queue_count("chat"), 0);
    }
}
