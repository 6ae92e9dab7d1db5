//! Named, timestamped notifications published by simulators and resources.
//!
//! Subscribers are called synchronously on the thread that publishes the notification, in
//! the order of subscription. A [`ChannelListener`] forwards notifications to an
//! [`mpsc`](std::sync::mpsc) channel instead, so that they can be consumed on another thread
//! in the order they were published.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use strum::{Display as StrumDisplay, EnumIter, EnumString};

use crate::{EventId, RunState, SimTime};

/// Kind of a notification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    StrumDisplay,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// The simulation clock moved to a new value.
    TimeChanged,
    /// The simulator entered the running state.
    RunStarted,
    /// The simulator stopped, either paused or at the run-until target.
    RunStopped,
    /// The replication has ended.
    ReplicationEnded,
    /// The warm-up period of a steady-state replication is over.
    Warmup,
    /// Claimed amount or capacity of a resource changed.
    ResourceUtilizationChanged,
    /// Length of a resource wait queue changed.
    QueueLengthChanged,
    /// An event action returned an error or panicked.
    EventFailed,
}

/// Kind-specific payload of a notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// No additional data.
    None,
    /// Run state after the transition.
    State(RunState),
    /// Resource utilization.
    Utilization {
        /// Resource name.
        resource: Arc<str>,
        /// Currently claimed amount.
        claimed: f64,
        /// Total capacity.
        capacity: f64,
    },
    /// Resource queue length.
    QueueLength {
        /// Resource name.
        resource: Arc<str>,
        /// Number of waiting requests.
        length: usize,
    },
    /// Identity of a failed event and the error message.
    Failure {
        /// Failed event.
        event: EventId,
        /// Name of the action.
        action: &'static str,
        /// Error message, including the error chain.
        message: String,
    },
}

/// A notification delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<T> {
    /// Kind of the notification.
    pub kind: NotificationKind,
    /// Simulation time at which it was published.
    pub time: T,
    /// Kind-specific data.
    pub payload: Payload,
}

/// Receives notifications.
///
/// Implemented for any `Fn(&Notification<T>)` closure that is `Send + Sync`.
pub trait Listener<T>: Send + Sync {
    /// Called once for each published notification the listener is subscribed to.
    fn notify(&self, notification: &Notification<T>);
}

impl<T, F> Listener<T> for F
where
    F: Fn(&Notification<T>) + Send + Sync,
{
    fn notify(&self, notification: &Notification<T>) {
        self(notification);
    }
}

/// Listener forwarding clones of received notifications to a channel.
///
/// Notifications are sent in the order they are published. Once the receiver is dropped,
/// notifications are silently discarded.
pub struct ChannelListener<T> {
    sender: Mutex<Sender<Notification<T>>>,
}

impl<T: Send> ChannelListener<T> {
    /// Creates a listener together with the receiving end of its channel.
    #[must_use]
    pub fn new() -> (Self, Receiver<Notification<T>>) {
        let (sender, receiver) = channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl<T: SimTime> Listener<T> for ChannelListener<T> {
    fn notify(&self, notification: &Notification<T>) {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sender.send(notification.clone());
    }
}

/// Identifies a subscription, used to unsubscribe.
#[derive(From, Into, Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription<T> {
    id: SubscriptionId,
    kinds: Option<Vec<NotificationKind>>,
    listener: Arc<dyn Listener<T>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kinds: self.kinds.clone(),
            listener: Arc::clone(&self.listener),
        }
    }
}

impl<T> Subscription<T> {
    fn accepts(&self, kind: NotificationKind) -> bool {
        self.kinds.as_ref().map_or(true, |kinds| kinds.contains(&kind))
    }
}

/// Subscriber registry.
pub struct Notifier<T> {
    subscriptions: Mutex<Vec<Subscription<T>>>,
    next_id: AtomicU64,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<T: SimTime> Notifier<T> {
    fn add(
        &self,
        kinds: Option<Vec<NotificationKind>>,
        listener: Arc<dyn Listener<T>>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscription {
                id,
                kinds,
                listener,
            });
        id
    }

    /// Subscribes `listener` to all notifications.
    pub fn subscribe<L: Listener<T> + 'static>(&self, listener: L) -> SubscriptionId {
        self.add(None, Arc::new(listener))
    }

    /// Subscribes `listener` to notifications of the given kinds only.
    pub fn subscribe_to<L: Listener<T> + 'static>(
        &self,
        kinds: &[NotificationKind],
        listener: L,
    ) -> SubscriptionId {
        self.add(Some(kinds.to_vec()), Arc::new(listener))
    }

    /// Removes a subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivers `notification` to all subscribers accepting its kind.
    ///
    /// Listeners may subscribe or unsubscribe while being notified; such changes take effect
    /// from the next published notification.
    pub fn publish(&self, notification: &Notification<T>) {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for subscription in subscriptions
            .iter()
            .filter(|s| s.accepts(notification.kind))
        {
            subscription.listener.notify(notification);
        }
    }
}
