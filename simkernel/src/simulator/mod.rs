//! The simulator: clock, event list, and run-state machine.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use delegate::delegate;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    Action, ConfigError, EventHandle, EventList, Listener, Notification, NotificationKind,
    Notifier, Payload, Priority, RandomStreams, Replication, ScheduleError, SimError, SimTime,
    Stream, SubscriptionId,
};

mod run;

/// Run state of a simulator.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Constructed, no replication yet.
    Created,
    /// Replication set and model constructed; ready to start.
    Initialized,
    /// The run loop is executing.
    Running,
    /// A stop was requested; the run loop stops at the next event boundary.
    Stopping,
    /// Paused; can be started again.
    Stopped,
    /// The replication has ended.
    Ended,
}

/// Run-loop strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formalism<R> {
    /// Jump from event to event.
    EventDriven,
    /// Advance the clock by a fixed step, without an event list.
    FixedStep(R),
    /// Advance by a fixed step, executing discrete events falling between ticks.
    Hybrid(R),
}

impl<R: Copy> Formalism<R> {
    /// Time step, if the formalism has one.
    pub fn step(&self) -> Option<R> {
        match self {
            Self::EventDriven => None,
            Self::FixedStep(step) | Self::Hybrid(step) => Some(*step),
        }
    }

    /// Whether events can be scheduled.
    pub fn has_event_list(&self) -> bool {
        !matches!(self, Self::FixedStep(_))
    }
}

/// Builds the initial state of a model: schedules its first events, creates its resources.
///
/// Called once by [`Simulator::initialize`]. Implemented for any
/// `FnMut(&Simulator<T>) -> eyre::Result<()>` closure.
pub trait Model<T: SimTime> {
    /// Constructs the model within `simulator`.
    fn construct(&mut self, simulator: &Simulator<T>) -> eyre::Result<()>;
}

impl<T, F> Model<T> for F
where
    T: SimTime,
    F: FnMut(&Simulator<T>) -> eyre::Result<()>,
{
    fn construct(&mut self, simulator: &Simulator<T>) -> eyre::Result<()> {
        self(simulator)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunUntil<T> {
    pub(crate) time: T,
    pub(crate) inclusive: bool,
}

pub(crate) struct Core<T: SimTime> {
    pub(crate) state: RunState,
    pub(crate) formalism: Formalism<T::Relative>,
    pub(crate) time: T,
    pub(crate) start: T,
    pub(crate) end: Option<T>,
    pub(crate) events: EventList<T>,
    pub(crate) streams: RandomStreams,
    pub(crate) until: Option<RunUntil<T>>,
    pub(crate) pause_on_error: bool,
    pub(crate) speed: Option<f64>,
    pub(crate) anchor: (Instant, T),
    pub(crate) ticks: u64,
    pub(crate) executed: u64,
    pub(crate) warmup_at: Option<T>,
}

impl<T: SimTime> Core<T> {
    pub(crate) fn notification(&self, kind: NotificationKind, payload: Payload) -> Notification<T> {
        Notification {
            kind,
            time: self.time,
            payload,
        }
    }

    /// Moves the clock, recording a time-changed notification if it actually moved.
    pub(crate) fn set_time(&mut self, time: T, notes: &mut Vec<Notification<T>>) {
        if time != self.time {
            self.time = time;
            notes.push(self.notification(NotificationKind::TimeChanged, Payload::None));
        }
    }

    fn accepts_events(&self) -> Result<(), ScheduleError> {
        if self.state == RunState::Created {
            return Err(ScheduleError::NotInitialized);
        }
        if !self.formalism.has_event_list() {
            return Err(ScheduleError::NoEventList);
        }
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: RunState, notes: &mut Vec<Notification<T>>) {
        debug!("{:?}: {} -> {}", self.time, self.state, state);
        self.state = state;
        let kind = match state {
            RunState::Running => Some(NotificationKind::RunStarted),
            RunState::Stopped => Some(NotificationKind::RunStopped),
            RunState::Ended => Some(NotificationKind::ReplicationEnded),
            _ => None,
        };
        if let Some(kind) = kind {
            notes.push(self.notification(kind, Payload::State(state)));
        }
    }
}

pub(crate) struct Shared<T: SimTime> {
    pub(crate) name: String,
    pub(crate) core: Mutex<Core<T>>,
    pub(crate) wakeup: Condvar,
    pub(crate) notifier: Notifier<T>,
}

/// Handle to a simulator.
///
/// Cloning the handle is cheap, and all clones refer to the same simulator. All methods take
/// `&self`; state transitions and event-list mutations are serialized by an internal lock,
/// which is never held while an action, a model constructor, or a listener is running.
#[derive(Clone)]
pub struct Simulator<T: SimTime> {
    pub(crate) shared: Arc<Shared<T>>,
}

impl<T: SimTime> fmt::Debug for Simulator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.lock();
        f.debug_struct("Simulator")
            .field("name", &self.shared.name)
            .field("state", &core.state)
            .field("time", &core.time)
            .field("pending_events", &core.events.len())
            .finish()
    }
}

struct Warmup;

impl<T: SimTime> Action<T> for Warmup {
    fn execute(self: Box<Self>, simulator: &Simulator<T>) -> eyre::Result<()> {
        info!("{}: warm-up period over at {:?}", simulator.name(), simulator.now());
        simulator.notify(NotificationKind::Warmup, Payload::None);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "warmup"
    }
}

impl<T: SimTime> Simulator<T> {
    /// Creates a simulator in the [`RunState::Created`] state.
    ///
    /// # Errors
    ///
    /// Fails if the formalism has a step that is not strictly positive and finite.
    pub fn new<S: Into<String>>(
        name: S,
        formalism: Formalism<T::Relative>,
    ) -> Result<Self, ConfigError> {
        if let Some(step) = formalism.step() {
            let valid = T::validate_relative(step)
                .map_or(false, |step| step > T::zero_relative());
            if !valid {
                return Err(ConfigError::InvalidStep(format!("{:?}", step)));
            }
        }
        let epoch = T::epoch();
        Ok(Self {
            shared: Arc::new(Shared {
                name: name.into(),
                core: Mutex::new(Core {
                    state: RunState::Created,
                    formalism,
                    time: epoch,
                    start: epoch,
                    end: None,
                    events: EventList::default(),
                    streams: RandomStreams::default(),
                    until: None,
                    pause_on_error: false,
                    speed: None,
                    anchor: (Instant::now(), epoch),
                    ticks: 0,
                    executed: 0,
                    warmup_at: None,
                }),
                wakeup: Condvar::new(),
                notifier: Notifier::default(),
            }),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Core<T>> {
        self.shared.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn publish(&self, notes: Vec<Notification<T>>) {
        for note in &notes {
            self.shared.notifier.publish(note);
        }
    }

    /// Name of the simulator.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// Current simulation time.
    #[must_use]
    pub fn now(&self) -> T {
        self.lock().time
    }

    /// Start time of the replication, or the epoch before initialization.
    #[must_use]
    pub fn start_time(&self) -> T {
        self.lock().start
    }

    /// End time of the replication, or `None` before initialization.
    #[must_use]
    pub fn end_time(&self) -> Option<T> {
        self.lock().end
    }

    /// The run-loop strategy.
    #[must_use]
    pub fn formalism(&self) -> Formalism<T::Relative> {
        self.lock().formalism
    }

    /// Number of events executed so far, including failed ones.
    #[must_use]
    pub fn executed_events(&self) -> u64 {
        self.lock().executed
    }

    /// Number of events waiting in the event list.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.lock().events.len()
    }

    /// Sets whether a failing action stops the run (`true`) or is skipped (`false`, default).
    pub fn set_pause_on_error(&self, pause: bool) {
        self.lock().pause_on_error = pause;
    }

    /// Enables best-effort real-time pacing at `speed` model time units per wall-clock
    /// second, or disables pacing if `None`.
    ///
    /// # Errors
    ///
    /// Fails if `speed` is not strictly positive and finite.
    pub fn set_real_time(&self, speed: Option<f64>) -> Result<(), ConfigError> {
        if let Some(speed) = speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(ConfigError::InvalidSpeed(speed));
            }
        }
        let mut core = self.lock();
        core.speed = speed;
        core.anchor = (Instant::now(), core.time);
        Ok(())
    }

    /// Sets up the replication and constructs the model, moving from `Created` to
    /// `Initialized`.
    ///
    /// The clock is set to the replication start. For steady-state replications with a
    /// non-zero warm-up, a `WARMUP` notification is published at the end of the warm-up. The
    /// model may schedule events while being constructed.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigError::AlreadyInitialized`] if called more than once, and with
    /// [`SimError::Construction`] if the model fails to construct, in which case the simulator
    /// returns to `Created`.
    pub fn initialize<M: Model<T> + ?Sized>(
        &self,
        replication: Replication<T>,
        model: &mut M,
    ) -> Result<(), SimError> {
        {
            let mut core = self.lock();
            if core.state != RunState::Created {
                return Err(ConfigError::AlreadyInitialized.into());
            }
            let start = replication.start();
            core.time = start;
            core.start = start;
            core.end = Some(replication.end_time());
            core.streams = replication.streams();
            core.anchor = (Instant::now(), start);
            core.ticks = 0;
            core.executed = 0;
            core.warmup_at = None;
            if replication.has_warmup() {
                if core.formalism.has_event_list() {
                    core.events
                        .create(replication.warmup_time(), Priority::MAX, Box::new(Warmup));
                } else {
                    core.warmup_at = Some(replication.warmup_time());
                }
            }
            core.state = RunState::Initialized;
        }
        info!(
            "{}: initializing replication {} (seed {}) from {:?} to {:?}",
            self.name(),
            replication.index(),
            replication.seed(),
            replication.start(),
            replication.end_time()
        );
        if let Err(err) = model.construct(self) {
            let mut core = self.lock();
            core.state = RunState::Created;
            core.events.clear();
            core.end = None;
            core.warmup_at = None;
            return Err(SimError::Construction(err));
        }
        Ok(())
    }

    /// Schedules `action` at absolute `time`.
    ///
    /// # Errors
    ///
    /// Fails if `time` is before the current time, if the simulator has no event list, or if
    /// it has not been initialized.
    pub fn schedule<F>(
        &self,
        time: T,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, ScheduleError>
    where
        F: FnOnce(&Simulator<T>) -> eyre::Result<()> + Send + 'static,
    {
        self.schedule_action(time, priority, Box::new(action))
    }

    /// Schedules `action` after a relative `delay` from now.
    ///
    /// # Errors
    ///
    /// Fails if `delay` is negative or not finite, and in the same cases as
    /// [`Simulator::schedule`].
    pub fn schedule_relative<F>(
        &self,
        delay: T::Relative,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, ScheduleError>
    where
        F: FnOnce(&Simulator<T>) -> eyre::Result<()> + Send + 'static,
    {
        let delay = T::validate_relative(delay)?;
        self.insert(|now| Ok(now.plus(delay)), priority, Box::new(action))
    }

    /// Schedules `action` after `units` model time units, typically drawn from a distribution.
    ///
    /// # Errors
    ///
    /// Fails if `units` is negative, not finite, or cannot be represented by the time type,
    /// and in the same cases as [`Simulator::schedule`].
    pub fn schedule_after_units<F>(
        &self,
        units: f64,
        priority: Priority,
        action: F,
    ) -> Result<EventHandle<T>, ScheduleError>
    where
        F: FnOnce(&Simulator<T>) -> eyre::Result<()> + Send + 'static,
    {
        let delay = T::relative_from_units(units)?;
        self.insert(|now| Ok(now.plus(delay)), priority, Box::new(action))
    }

    /// Schedules `action` at the current time. It runs after all events already scheduled
    /// for the current time with a priority at least as high.
    ///
    /// # Errors
    ///
    /// Fails if the simulator has no event list or is not initialized.
    pub fn schedule_now<F>(&self, priority: Priority, action: F) -> Result<EventHandle<T>, ScheduleError>
    where
        F: FnOnce(&Simulator<T>) -> eyre::Result<()> + Send + 'static,
    {
        self.insert(Ok, priority, Box::new(action))
    }

    /// Schedules a boxed action at absolute `time`.
    ///
    /// # Errors
    ///
    /// See [`Simulator::schedule`].
    pub fn schedule_action(
        &self,
        time: T,
        priority: Priority,
        action: Box<dyn Action<T>>,
    ) -> Result<EventHandle<T>, ScheduleError> {
        self.insert(
            |now| {
                if time < now {
                    Err(ScheduleError::InPast {
                        at: format!("{:?}", time),
                        now: format!("{:?}", now),
                    })
                } else {
                    Ok(time)
                }
            },
            priority,
            action,
        )
    }

    fn insert<F>(
        &self,
        time: F,
        priority: Priority,
        action: Box<dyn Action<T>>,
    ) -> Result<EventHandle<T>, ScheduleError>
    where
        F: FnOnce(T) -> Result<T, ScheduleError>,
    {
        let handle = {
            let mut core = self.lock();
            core.accepts_events()?;
            let time = time(core.time)?;
            core.events.create(time, priority, action)
        };
        self.shared.wakeup.notify_all();
        Ok(handle)
    }

    /// Fails the way [`Simulator::schedule_now`] would, without scheduling anything.
    pub(crate) fn accepts_events(&self) -> Result<(), ScheduleError> {
        self.lock().accepts_events()
    }

    /// Removes a pending event. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&self, handle: &EventHandle<T>) -> bool {
        let removed = self.lock().events.remove(handle).is_some();
        if removed {
            self.shared.wakeup.notify_all();
        }
        removed
    }

    /// Returns the random stream called `name`, creating it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the simulator has not been initialized with a replication.
    pub fn stream(&self, name: &str) -> Result<Stream, ScheduleError> {
        let mut core = self.lock();
        if core.state == RunState::Created {
            return Err(ScheduleError::NotInitialized);
        }
        Ok(core.streams.stream(name))
    }

    /// Publishes a notification timestamped with the current time.
    pub fn notify(&self, kind: NotificationKind, payload: Payload) {
        let note = self.lock().notification(kind, payload);
        self.shared.notifier.publish(&note);
    }

    /// Subscribes `listener` to all notifications of this simulator.
    pub fn subscribe<L: Listener<T> + 'static>(&self, listener: L) -> SubscriptionId {
        self.shared.notifier.subscribe(listener)
    }

    /// Subscribes `listener` to notifications of the given kinds.
    pub fn subscribe_to<L: Listener<T> + 'static>(
        &self,
        kinds: &[NotificationKind],
        listener: L,
    ) -> SubscriptionId {
        self.shared.notifier.subscribe_to(kinds, listener)
    }

    delegate! {
        to self.shared.notifier {
            /// Removes a subscription. Returns `false` if it did not exist.
            pub fn unsubscribe(&self, id: SubscriptionId) -> bool;
            /// Number of active subscriptions.
            #[must_use]
            pub fn subscriber_count(&self) -> usize;
        }
    }
}
