//! Capacity-limited shared resource with a priority wait queue.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::{
    ConfigError, NotificationKind, Payload, Priority, ScheduleError, SimTime, Simulator,
};

/// Receives capacity granted by a [`Resource`].
///
/// Implemented for any `FnOnce(f64, &Resource<T>, &Simulator<T>) -> eyre::Result<()>` closure.
pub trait Requestor<T: SimTime>: Send + 'static {
    /// Called, as a same-time event, once `amount` has been claimed on behalf of the
    /// requestor.
    fn on_resource_granted(
        self: Box<Self>,
        amount: f64,
        resource: &Resource<T>,
        simulator: &Simulator<T>,
    ) -> eyre::Result<()>;
}

impl<T, F> Requestor<T> for F
where
    T: SimTime,
    F: FnOnce(f64, &Resource<T>, &Simulator<T>) -> eyre::Result<()> + Send + 'static,
{
    fn on_resource_granted(
        self: Box<Self>,
        amount: f64,
        resource: &Resource<T>,
        simulator: &Simulator<T>,
    ) -> eyre::Result<()> {
        (*self)(amount, resource, simulator)
    }
}

/// Result of a capacity request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Capacity was claimed; the requestor is notified at the current time.
    Granted,
    /// The request is waiting in the queue.
    Queued,
}

struct Request<T: SimTime> {
    amount: f64,
    priority: Priority,
    requestor: Box<dyn Requestor<T>>,
}

struct ResourceState<T: SimTime> {
    capacity: f64,
    claimed: f64,
    queue: BTreeMap<(Reverse<Priority>, u64), Request<T>>,
    next_request: u64,
}

struct Inner<T: SimTime> {
    name: Arc<str>,
    simulator: Simulator<T>,
    state: Mutex<ResourceState<T>>,
}

/// A numeric capacity pool arbitrated among requestors.
///
/// Requests that cannot be satisfied wait in a queue ordered by priority (highest first) and
/// arrival (FIFO within a priority). When capacity becomes available, the queue is served from
/// its head, and serving stops at the first request that still does not fit: later, smaller
/// requests never overtake it.
///
/// The handle is cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct Resource<T: SimTime> {
    inner: Arc<Inner<T>>,
}

impl<T: SimTime> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Resource")
            .field("name", &self.inner.name)
            .field("capacity", &state.capacity)
            .field("claimed", &state.claimed)
            .field("queue_length", &state.queue.len())
            .finish()
    }
}

fn valid_amount(amount: f64) -> Result<f64, ScheduleError> {
    if amount.is_finite() && amount >= 0.0 {
        Ok(amount)
    } else {
        Err(ScheduleError::InvalidAmount(amount))
    }
}

impl<T: SimTime> Resource<T> {
    /// Creates a resource with `capacity` owned by `simulator`.
    ///
    /// # Errors
    ///
    /// Fails if the capacity is negative or not finite, or if the simulator is a fixed-step
    /// one, since grants are delivered as events.
    pub fn new<S: Into<String>>(
        simulator: &Simulator<T>,
        name: S,
        capacity: f64,
    ) -> Result<Self, ConfigError> {
        let name: String = name.into();
        if !simulator.formalism().has_event_list() {
            return Err(ConfigError::EventListRequired(name));
        }
        if !(capacity.is_finite() && capacity >= 0.0) {
            return Err(ConfigError::InvalidCapacity(capacity));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                name: Arc::from(name),
                simulator: simulator.clone(),
                state: Mutex::new(ResourceState {
                    capacity,
                    claimed: 0.0,
                    queue: BTreeMap::new(),
                    next_request: 0,
                }),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, ResourceState<T>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the resource.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total capacity.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.state().capacity
    }

    /// Currently claimed amount.
    #[must_use]
    pub fn claimed(&self) -> f64 {
        self.state().claimed
    }

    /// Capacity that can be granted right now.
    #[must_use]
    pub fn available_capacity(&self) -> f64 {
        let state = self.state();
        (state.capacity - state.claimed).max(0.0)
    }

    /// Number of waiting requests.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.state().queue.len()
    }

    /// Requests `amount` with normal priority. See [`Resource::request_capacity_with_priority`].
    ///
    /// # Errors
    ///
    /// See [`Resource::request_capacity_with_priority`].
    pub fn request_capacity<R: Requestor<T>>(
        &self,
        amount: f64,
        requestor: R,
    ) -> Result<RequestOutcome, ScheduleError> {
        self.request_capacity_with_priority(amount, Priority::NORMAL, requestor)
    }

    /// Requests `amount` of capacity.
    ///
    /// If enough capacity is available, it is claimed right away and the requestor is called
    /// from an event scheduled at the current time with `priority`, even if other requests
    /// are waiting. Otherwise the request is queued, including one larger than the total
    /// capacity, which waits until [`Resource::set_capacity`] makes room for it.
    ///
    /// # Errors
    ///
    /// Fails if `amount` is negative or not finite, or if the grant cannot be scheduled.
    pub fn request_capacity_with_priority<R: Requestor<T>>(
        &self,
        amount: f64,
        priority: Priority,
        requestor: R,
    ) -> Result<RequestOutcome, ScheduleError> {
        let amount = valid_amount(amount)?;
        let mut state = self.state();
        let request = Request {
            amount,
            priority,
            requestor: Box::new(requestor),
        };
        if state.capacity - state.claimed >= amount {
            self.grant(&mut state, request)?;
            let claimed = (state.claimed, state.capacity);
            drop(state);
            self.publish_utilization(claimed);
            Ok(RequestOutcome::Granted)
        } else {
            let sequence = state.next_request;
            state.next_request += 1;
            state.queue.insert((Reverse(priority), sequence), request);
            let length = state.queue.len();
            drop(state);
            debug!(
                "{}: queued request of {} with priority {} ({} waiting)",
                self.inner.name, amount, priority, length
            );
            self.publish_queue_length(length);
            Ok(RequestOutcome::Queued)
        }
    }

    /// Releases `amount` of claimed capacity and serves waiting requests.
    ///
    /// Releasing more than is claimed releases everything.
    ///
    /// # Errors
    ///
    /// Fails if `amount` is negative or not finite, or if a waiting request cannot be
    /// granted. The capacity is released regardless, and the request stays queued.
    pub fn release_capacity(&self, amount: f64) -> Result<(), ScheduleError> {
        let amount = valid_amount(amount)?;
        let mut guard = self.state();
        let state = &mut *guard;
        state.claimed = (state.claimed - amount).max(0.0);
        let length = state.queue.len();
        let mut served = 0;
        let mut result = Ok(());
        while let Some(entry) = state.queue.first_entry() {
            if state.capacity - state.claimed < entry.get().amount {
                break;
            }
            if let Err(err) = self.inner.simulator.accepts_events() {
                result = Err(err);
                break;
            }
            let request = entry.remove();
            if let Err(err) = self.grant(state, request) {
                result = Err(err);
                break;
            }
            served += 1;
        }
        let utilization = (state.claimed, state.capacity);
        drop(guard);
        self.publish_utilization(utilization);
        if served > 0 {
            self.publish_queue_length(length - served);
        }
        result
    }

    /// Changes the total capacity and serves waiting requests that fit the new capacity.
    ///
    /// Decreasing the capacity below the claimed amount does not revoke any grant.
    ///
    /// # Errors
    ///
    /// Fails if `capacity` is negative or not finite.
    pub fn set_capacity(&self, capacity: f64) -> Result<(), ScheduleError> {
        let capacity = valid_amount(capacity)?;
        self.state().capacity = capacity;
        debug!("{}: capacity set to {}", self.inner.name, capacity);
        self.release_capacity(0.0)
    }

    /// Claims the request's amount and schedules its notification.
    fn grant(
        &self,
        state: &mut ResourceState<T>,
        request: Request<T>,
    ) -> Result<(), ScheduleError> {
        let Request {
            amount,
            priority,
            requestor,
        } = request;
        let resource = self.clone();
        self.inner.simulator.schedule_now(priority, move |simulator| {
            requestor.on_resource_granted(amount, &resource, simulator)
        })?;
        state.claimed += amount;
        debug!(
            "{}: granted {} with priority {} ({} of {} claimed)",
            self.inner.name, amount, priority, state.claimed, state.capacity
        );
        Ok(())
    }

    fn publish_utilization(&self, (claimed, capacity): (f64, f64)) {
        self.inner.simulator.notify(
            NotificationKind::ResourceUtilizationChanged,
            Payload::Utilization {
                resource: Arc::clone(&self.inner.name),
                claimed,
                capacity,
            },
        );
    }

    fn publish_queue_length(&self, length: usize) {
        self.inner.simulator.notify(
            NotificationKind::QueueLengthChanged,
            Payload::QueueLength {
                resource: Arc::clone(&self.inner.name),
                length,
            },
        );
    }
}
