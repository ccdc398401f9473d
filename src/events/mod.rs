// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Intra-process event fan-out.
//!
//! Publishers call [`EventBus::publish`] from the dispatch task; subscribers
//! run synchronously, in registration order, and must not block. Anything
//! slow gets enqueued by the subscriber for later.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::warn;

/// The kinds of internal events the bus can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NMinusOneFlowDeallocated,
}

/// An internal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEvent {
    /// The N-1 flow carrying the given port-id went away. Every per-session
    /// state keyed by that port (security contexts in particular) must be
    /// discarded.
    NMinusOneFlowDeallocated { port_id: u32 },
}

impl InternalEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InternalEvent::NMinusOneFlowDeallocated { .. } => {
                EventKind::NMinusOneFlowDeallocated
            },
        }
    }
}

pub trait EventSubscriber: Send + Sync {
    fn event_happened(&self, event: &InternalEvent);
}

/// Synchronous fan-out bus. Single-threaded per process: publish is called
/// from the dispatch task only.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<Arc<dyn EventSubscriber>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, subscriber: Arc<dyn EventSubscriber>) {
        let mut subs = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subs.entry(kind).or_default().push(subscriber);
    }

    pub fn publish(&self, event: &InternalEvent) {
        let targets = {
            let subs = match self.subscribers.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            subs.get(&event.kind()).cloned().unwrap_or_default()
        };
        if targets.is_empty() {
            warn!(?event, "internal event has no subscribers");
        }
        for sub in targets {
            sub.event_happened(event);
        }
    }
}
