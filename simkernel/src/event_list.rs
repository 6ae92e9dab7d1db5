use std::collections::BTreeMap;

use crate::{Action, EventHandle, EventId, Priority, SimEvent, SimTime};

/// Ordered multiset of pending events.
///
/// Events are ordered by `(time, -priority, insertion id)`, see [`EventHandle`].
/// The insertion id is assigned by the list from its own monotonic counter, so two events
/// scheduled at the same time and priority are always removed in insertion order.
///
/// # Examples
///
/// ```
/// # use simkernel::{EventList, Priority, Simulator};
/// let mut events = EventList::<i64>::default();
/// let action = |_: &Simulator<i64>| -> eyre::Result<()> { Ok(()) };
/// let first = events.create(5, Priority::MIN, Box::new(action));
/// let second = events.create(5, Priority::MIN, Box::new(action));
/// let urgent = events.create(5, Priority::MAX, Box::new(action));
/// assert_eq!(events.remove_first().map(|e| e.handle()), Some(urgent));
/// assert_eq!(events.remove_first().map(|e| e.handle()), Some(first));
/// assert_eq!(events.remove_first().map(|e| e.handle()), Some(second));
/// assert!(events.remove_first().is_none());
/// ```
pub struct EventList<T: SimTime> {
    events: BTreeMap<EventHandle<T>, SimEvent<T>>,
    next_id: u64,
}

impl<T: SimTime> Default for EventList<T> {
    fn default() -> Self {
        Self {
            events: BTreeMap::new(),
            next_id: 0,
        }
    }
}

impl<T: SimTime> EventList<T> {
    fn next_id(&mut self) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        EventId::from(id)
    }

    /// Creates a new event executing `action` at `time` and inserts it to the list.
    pub fn create(
        &mut self,
        time: T,
        priority: Priority,
        action: Box<dyn Action<T>>,
    ) -> EventHandle<T> {
        let handle = EventHandle::new(time, priority, self.next_id());
        self.events.insert(handle, SimEvent::new(handle, action));
        handle
    }

    /// Inserts an event previously removed from a list, preserving its time and priority.
    ///
    /// The event receives a new insertion id, so it is ordered after any events already in
    /// the list with the same time and priority. Returns the new handle.
    pub fn insert(&mut self, event: SimEvent<T>) -> EventHandle<T> {
        let event = event.rekey(self.next_id());
        let handle = event.handle();
        self.events.insert(handle, event);
        handle
    }

    /// Removes and returns the first event, or `None` if the list is empty.
    pub fn remove_first(&mut self) -> Option<SimEvent<T>> {
        self.events.pop_first().map(|(_, event)| event)
    }

    /// Removes and returns the last event, or `None` if the list is empty.
    pub fn remove_last(&mut self) -> Option<SimEvent<T>> {
        self.events.pop_last().map(|(_, event)| event)
    }

    /// Returns the first event without removing it.
    #[must_use]
    pub fn peek_first(&self) -> Option<&SimEvent<T>> {
        self.events.values().next()
    }

    /// Returns the last event without removing it.
    #[must_use]
    pub fn peek_last(&self) -> Option<&SimEvent<T>> {
        self.events.values().next_back()
    }

    /// Removes the event identified by `handle`, returning it if it was still pending.
    pub fn remove(&mut self, handle: &EventHandle<T>) -> Option<SimEvent<T>> {
        self.events.remove(handle)
    }

    /// Checks if the event identified by `handle` is still pending.
    #[must_use]
    pub fn contains(&self, handle: &EventHandle<T>) -> bool {
        self.events.contains_key(handle)
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Answers whether there are no pending events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes all pending events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Iterates over handles of pending events in execution order.
    pub fn handles(&self) -> impl Iterator<Item = &EventHandle<T>> + '_ {
        self.events.keys()
    }
}
