//! In-process broker, dead-letter sink and search index.
//!
//! Useful for tests and for running the pipeline without Kafka or a search
//! cluster. All types are cheap to clone and clones share state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::dead_letter::DeadLetter;
use crate::domain::document::ProductDocument;
use crate::domain::envelope::{Delivery, MessageEnvelope};
use crate::domain::events::IntegrationEvent;
use crate::domain::ports::{DeadLetterSink, EventPublisher, MessageSource, SearchIndex};
use crate::errors::{BrokerError, PublishError, SearchIndexError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct BrokerState {
    pending: VecDeque<Delivery>,
    published: Vec<MessageEnvelope>,
    committed: Vec<i64>,
    subscribed: Vec<String>,
    next_offset: i64,
}

/// A single-partition broker: publishes are appended, polls pop in order.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    failing_subscribes: Arc<AtomicU32>,
    subscribe_attempts: Arc<AtomicU32>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a raw envelope on `topic`.
    pub fn push(&self, topic: &str, envelope: MessageEnvelope) {
        let mut state = lock(&self.state);
        let offset = state.next_offset;
        state.next_offset += 1;
        state.published.push(envelope.clone());
        state.pending.push_back(Delivery {
            envelope,
            topic: topic.to_string(),
            partition: 0,
            offset,
        });
    }

    /// Every envelope ever published, in order.
    pub fn published(&self) -> Vec<MessageEnvelope> {
        lock(&self.state).published.clone()
    }

    /// Offsets committed by consumers, in commit order.
    pub fn committed(&self) -> Vec<i64> {
        lock(&self.state).committed.clone()
    }

    /// Make the next `times` subscribe calls fail.
    pub fn fail_subscribes(&self, times: u32) {
        self.failing_subscribes.store(times, Ordering::SeqCst);
    }

    pub fn subscribe_attempts(&self) -> u32 {
        self.subscribe_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &IntegrationEvent) -> Result<(), PublishError> {
        let envelope = MessageEnvelope::from_event(event)?;
        self.push(event.aggregate_type(), envelope);
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InMemoryBroker {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), BrokerError> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_subscribes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Subscribe("broker unavailable".to_string()));
        }
        lock(&self.state).subscribed = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, _timeout: Duration) -> Result<Option<Delivery>, BrokerError> {
        let mut state = lock(&self.state);
        let position = state
            .pending
            .iter()
            .position(|d| state.subscribed.contains(&d.topic));
        Ok(position.and_then(|i| state.pending.remove(i)))
    }

    fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        lock(&self.state).committed.push(delivery.offset);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Arc<Mutex<Vec<DeadLetter>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        lock(&self.letters).clone()
    }

    /// Make every send fail while `failing` is set.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn send(&self, letter: &DeadLetter) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Broker("dead-letter sink unavailable".to_string()));
        }
        lock(&self.letters).push(letter.clone());
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySearchIndex {
    documents: Arc<Mutex<HashMap<String, ProductDocument>>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<ProductDocument> {
        lock(&self.documents).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.documents).is_empty()
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn upsert(&self, document: &ProductDocument) -> Result<(), SearchIndexError> {
        lock(&self.documents).insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), SearchIndexError> {
        lock(&self.documents).remove(id);
        Ok(())
    }
}
