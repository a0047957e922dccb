//! Event bus - ordered, multi-subscriber delivery of task events.
//!
//! Backed by a tokio broadcast channel. Every subscriber has its own bounded backlog
//! of `event_buffer_size` events. When a subscriber falls behind, the oldest events
//! in its backlog are dropped and the subscriber receives a single [`Event::Gap`]
//! telling it how many were lost. Publishing never blocks, so a slow UI can never
//! slow a download down.
//!
//! Publishing [`Event::Shutdown`] closes the bus: later events are dropped and new
//! subscriptions end immediately.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::types::Event;

/// Publishing side of the event bus (cheap to clone)
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    closed: Arc<AtomicBool>,
}

impl EventBus {
    /// Create a bus where each subscriber buffers up to `capacity` events
    ///
    /// `capacity` must be non-zero; [`Config::validate`](crate::Config::validate)
    /// enforces this for manager-owned buses.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Publish an event to all current subscribers
    ///
    /// If there are no subscribers the event is dropped, as is anything published
    /// after [`Event::Shutdown`].
    pub fn publish(&self, event: Event) {
        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(?event, "Event bus closed, dropping event");
            return;
        }
        let closing = matches!(event, Event::Shutdown);

        // send() only fails when nobody is listening
        self.tx.send(event).ok();

        if closing {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Open a new subscription that sees every event published from now on
    ///
    /// Once the bus is closed the subscription ends without yielding anything.
    pub fn subscribe(&self) -> Subscription {
        let mut subscription = Subscription::new(self.tx.subscribe());
        subscription.finished = self.is_closed();
        subscription
    }

    /// Whether [`Event::Shutdown`] has been published
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's live event feed
///
/// Ends (yields `None`) right after delivering [`Event::Shutdown`], or when the
/// bus itself is dropped. Dropping a subscription unsubscribes it without
/// affecting anyone else.
pub struct Subscription {
    inner: BroadcastStream<Event>,
    finished: bool,
}

impl Subscription {
    fn new(rx: broadcast::Receiver<Event>) -> Self {
        Self {
            inner: BroadcastStream::new(rx),
            finished: false,
        }
    }

    /// Wait for the next event, `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<Event> {
        futures::StreamExt::next(self).await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("finished", &self.finished)
            .finish()
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                if matches!(event, Event::Shutdown) {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                tracing::warn!(missed, "Event subscriber lagged, dropped oldest events");
                Poll::Ready(Some(Event::Gap { missed }))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
