//! # Event
//!
//! In-process pub/sub of message lifecycle events. [`EventBroker`] is the
//! provided implementation of the [`crate::provider::EventStream`] seam:
//! tenant-scoped, filtered subscriptions receiving live events over channels.
//! Subscribers are channel receivers, so dropping one cancels delivery.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::messages::MessagesFilter;
use crate::records::RecordsFilter;
use crate::store::{Entry, EntryType, index};

/// A message lifecycle event: the persisted entry, indexes included.
pub type Event = Entry;

/// Filter applied to a subscription; an event is delivered when any filter
/// in the set matches (an empty set matches everything).
#[derive(Clone, Debug, Deserialize, Serialize)]
#[allow(missing_docs)]
pub enum SubscribeFilter {
    Messages(Vec<MessagesFilter>),
    Records(Vec<RecordsFilter>),
}

impl Default for SubscribeFilter {
    fn default() -> Self {
        Self::Messages(Vec::default())
    }
}

impl SubscribeFilter {
    /// Check the event matches the filter set.
    #[must_use]
    pub fn is_match(&self, event: &Event) -> bool {
        match self {
            Self::Messages(filters) => {
                filters.is_empty()
                    || filters
                        .iter()
                        .any(|filter| index::matches(&event.indexes, &filter.to_filter()))
            }
            Self::Records(filters) => {
                // records subscriptions never see protocol configurations
                if let EntryType::Configure(_) = event.message {
                    return false;
                }
                filters.is_empty()
                    || filters
                        .iter()
                        .any(|filter| index::matches(&event.indexes, &filter.to_filter()))
            }
        }
    }
}

/// A subscription's receiving end: a stream of matching events. Dropping the
/// subscriber cancels the subscription before the next emit.
pub struct Subscriber {
    /// The subscription's id.
    pub id: String,

    inner: Pin<Box<dyn Stream<Item = Event> + Send>>,
}

impl Subscriber {
    /// Wrap an event stream for surfacing to subscribers.
    #[must_use]
    pub fn new(id: impl Into<String>, stream: Pin<Box<dyn Stream<Item = Event> + Send>>) -> Self {
        Self {
            id: id.into(),
            inner: stream,
        }
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self {
            id: String::new(),
            inner: Box::pin(futures::stream::empty()),
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("id", &self.id).finish()
    }
}

impl Stream for Subscriber {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

struct Subscription {
    id: String,
    filter: SubscribeFilter,
    sender: mpsc::UnboundedSender<Event>,
}

/// The in-process event stream. One broker serves every tenant; subscription
/// registries are per tenant and delivery order within a tenant equals
/// emission order.
#[derive(Clone, Default)]
pub struct EventBroker {
    subscribers: Arc<Mutex<HashMap<String, Vec<Subscription>>>>,
}

impl EventBroker {
    /// Create a broker with no subscriptions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filtered subscription to a tenant's events.
    pub async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> Subscriber {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, mut receiver) = mpsc::unbounded_channel();

        let mut subscribers = self.subscribers.lock().await;
        subscribers.entry(owner.to_string()).or_default().push(Subscription {
            id: id.clone(),
            filter,
            sender,
        });

        let stream = futures::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        Subscriber::new(id, Box::pin(stream))
    }

    /// Deliver an event to each matching subscription, in registration order.
    /// Subscriptions whose receiver has been dropped are detached.
    pub async fn emit(&self, owner: &str, event: &Event) {
        let mut subscribers = self.subscribers.lock().await;
        let Some(subscriptions) = subscribers.get_mut(owner) else {
            return;
        };

        subscriptions.retain(|subscription| {
            if !subscription.filter.is_match(event) {
                return !subscription.sender.is_closed();
            }
            if subscription.sender.send(event.clone()).is_err() {
                tracing::debug!(target: "event", "detaching closed subscription {}", subscription.id);
                return false;
            }
            true
        });
    }

    /// Detach a subscription by id, taking effect before the next emit.
    pub async fn close(&self, owner: &str, id: &str) {
        let mut subscribers = self.subscribers.lock().await;
        if let Some(subscriptions) = subscribers.get_mut(owner) {
            subscriptions.retain(|subscription| subscription.id != id);
        }
    }
}

#[async_trait]
impl crate::provider::EventStream for EventBroker {
    async fn subscribe(&self, owner: &str, filter: SubscribeFilter) -> anyhow::Result<Subscriber> {
        Ok(Self::subscribe(self, owner, filter).await)
    }

    async fn emit(&self, owner: &str, event: &Event) -> anyhow::Result<()> {
        Self::emit(self, owner, event).await;
        Ok(())
    }
}
