//! Event system for publish progress
//!
//! An in-process broadcast bus: the posting service emits events while a
//! publish runs, and any number of subscribers (the dashboard's status
//! endpoint, log forwarders, tests) can listen.
//!
//! If no subscribers exist, events are dropped immediately. Subscribers can
//! lag without blocking emitters; a lagging receiver loses the oldest events.
//!
//! # Example
//!
//! ```no_run
//! use libinstalaz::service::events::{Event, EventBus};
//!
//! # async fn example() {
//! let event_bus = EventBus::new(100);
//! let mut receiver = event_bus.subscribe();
//!
//! event_bus.emit(Event::PublishStarted {
//!     account_id: 1,
//!     account_name: "@daily".to_string(),
//!     trigger: "manual".to_string(),
//! });
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<Event>;

/// Event bus for distributing progress events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers; never blocks
    pub fn emit(&self, event: Event) {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Events emitted while publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PublishStarted {
        account_id: i64,
        account_name: String,
        /// `manual`, or the slot name for scheduled runs
        trigger: String,
    },

    /// Status line such as "Uploading image 2/5..."
    PublishProgress {
        account_id: i64,
        status: String,
    },

    PublishCompleted {
        account_id: i64,
        media_id: String,
        permalink: Option<String>,
    },

    PublishFailed {
        account_id: i64,
        /// Failure category, e.g. `auth_expired`
        kind: String,
        error: String,
    },
}

impl Event {
    pub fn account_id(&self) -> i64 {
        match self {
            Event::PublishStarted { account_id, .. }
            | Event::PublishProgress { account_id, .. }
            | Event::PublishCompleted { account_id, .. }
            | Event::PublishFailed { account_id, .. } => *account_id,
        }
    }
}
