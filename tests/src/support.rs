//! Shared fixtures for the integration suite.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use scope_kernel::{Context, EventFilter, EventTopic, KernelEvent};
use serde_json::Value;

/// Shared hit counter.
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Ordered record of values seen by callbacks.
#[derive(Clone)]
pub struct Journal<T>(Arc<Mutex<Vec<T>>>);

impl<T: Clone> Journal<T> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    pub fn push(&self, value: T) {
        self.0.lock().push(value);
    }

    pub fn entries(&self) -> Vec<T> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn last(&self) -> Option<T> {
        self.0.lock().last().cloned()
    }
}

/// Record every event of the given topics broadcast under `ctx`.
pub fn record_topics(ctx: &Context, topics: Vec<EventTopic>) -> Journal<KernelEvent> {
    let journal = Journal::new();
    let sink = journal.clone();
    ctx.on(EventFilter::topics(topics), move |event| sink.push(event.clone()));
    journal
}

/// Configs a body was started with.
pub type ConfigLog = Journal<Value>;
