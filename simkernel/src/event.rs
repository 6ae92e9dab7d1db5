use std::cmp::{Ordering, Reverse};
use std::convert::TryFrom;
use std::fmt;

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

use crate::{ScheduleError, SimTime, Simulator};

/// Event priority in the range `[Priority::MIN, Priority::MAX]`.
///
/// Among events scheduled at the same time, the ones with higher priority are executed first.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// The lowest priority.
    pub const MIN: Priority = Priority(1);
    /// The highest priority.
    pub const MAX: Priority = Priority(10);
    /// The default priority.
    pub const NORMAL: Priority = Priority(5);

    /// Constructs a priority, failing if `value` is out of bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::PriorityOutOfBounds`] if `value` is not in `[1, 10]`.
    pub fn new(value: u8) -> Result<Self, ScheduleError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ScheduleError::PriorityOutOfBounds(value))
        }
    }

    /// Numeric value of the priority.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = ScheduleError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

/// Insertion sequence number of an event, unique within one event list.
#[derive(From, Into, Display, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

/// Identifies a scheduled event, and doubles as its ordering key.
///
/// Handles are ordered by `(time, -priority, id)`: earlier time first, then higher priority,
/// then earlier insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle<T> {
    time: T,
    priority: Reverse<Priority>,
    id: EventId,
}

impl<T: SimTime> EventHandle<T> {
    pub(crate) fn new(time: T, priority: Priority, id: EventId) -> Self {
        Self {
            time,
            priority: Reverse(priority),
            id,
        }
    }

    /// Absolute execution time.
    #[must_use]
    pub fn time(&self) -> T {
        self.time
    }

    /// Event priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority.0
    }

    /// Insertion sequence number.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.id
    }
}

impl<T: SimTime> PartialOrd for EventHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SimTime> Ord for EventHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.priority, self.id).cmp(&(other.time, other.priority, other.id))
    }
}

/// A scheduled action executed by the simulator.
///
/// Any `FnOnce(&Simulator<T>) -> eyre::Result<()>` closure is an action.
pub trait Action<T: SimTime>: Send + 'static {
    /// Executes the action, consuming it.
    fn execute(self: Box<Self>, simulator: &Simulator<T>) -> eyre::Result<()>;

    /// A name identifying the action in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<T, F> Action<T> for F
where
    T: SimTime,
    F: FnOnce(&Simulator<T>) -> eyre::Result<()> + Send + 'static,
{
    fn execute(self: Box<Self>, simulator: &Simulator<T>) -> eyre::Result<()> {
        (*self)(simulator)
    }
}

/// An immutable scheduling record: an action, its execution time, priority, and insertion
/// sequence number.
///
/// Events can only be created by an [`EventList`](crate::EventList), and are executed at most
/// once, since [`SimEvent::execute`] consumes the event.
pub struct SimEvent<T: SimTime> {
    handle: EventHandle<T>,
    action: Box<dyn Action<T>>,
}

impl<T: SimTime> SimEvent<T> {
    pub(crate) fn new(handle: EventHandle<T>, action: Box<dyn Action<T>>) -> Self {
        Self { handle, action }
    }

    pub(crate) fn rekey(self, id: EventId) -> Self {
        Self {
            handle: EventHandle::new(self.handle.time, self.handle.priority(), id),
            action: self.action,
        }
    }

    /// The handle, which is also the ordering key of this event.
    #[must_use]
    pub fn handle(&self) -> EventHandle<T> {
        self.handle
    }

    /// Absolute execution time.
    #[must_use]
    pub fn time(&self) -> T {
        self.handle.time
    }

    /// Event priority.
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.handle.priority()
    }

    /// Insertion sequence number.
    #[must_use]
    pub fn id(&self) -> EventId {
        self.handle.id
    }

    /// Name of the action, used in logs.
    #[must_use]
    pub fn action_name(&self) -> &'static str {
        self.action.name()
    }

    /// Executes the action of this event.
    ///
    /// # Errors
    ///
    /// Passes on any error returned by the action.
    pub fn execute(self, simulator: &Simulator<T>) -> eyre::Result<()> {
        self.action.execute(simulator)
    }
}

impl<T: SimTime> fmt::Debug for SimEvent<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimEvent")
            .field("id", &self.handle.id)
            .field("time", &self.handle.time)
            .field("priority", &self.handle.priority())
            .field("action", &self.action.name())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_priority_bounds() {
        assert_eq!(Priority::new(0), Err(ScheduleError::PriorityOutOfBounds(0)));
        assert_eq!(Priority::new(11), Err(ScheduleError::PriorityOutOfBounds(11)));
        assert_eq!(Priority::new(1), Ok(Priority::MIN));
        assert_eq!(Priority::new(10), Ok(Priority::MAX));
        assert_eq!(Priority::default(), Priority::NORMAL);
        assert_eq!(u8::from(Priority::NORMAL), 5);
    }

    #[test]
    fn test_priority_deserialize() {
        let priority: Priority = serde_json::from_str("7").unwrap();
        assert_eq!(priority.value(), 7);
        assert!(serde_json::from_str::<Priority>("42").is_err());
    }

    #[test]
    fn test_handle_order() {
        let high = Priority::new(8).unwrap();
        let low = Priority::new(2).unwrap();
        let handle = |time: i64, priority, id: u64| EventHandle::new(time, priority, EventId(id));
        assert!(handle(1, low, 5) < handle(2, high, 0));
        assert!(handle(1, high, 5) < handle(1, low, 0));
        assert!(handle(1, high, 0) < handle(1, high, 1));
        assert_eq!(
            handle(3, Priority::NORMAL, 2).cmp(&handle(3, Priority::NORMAL, 2)),
            Ordering::Equal
        );
    }
}
