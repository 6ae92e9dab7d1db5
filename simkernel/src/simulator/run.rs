use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::PoisonError;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use super::{Core, Formalism, RunState, RunUntil, Simulator};
use crate::{
    NotificationKind, Payload, RunStateError, ScheduleError, SimError, SimEvent, SimTime,
};

/// How much a run may do before it stops by itself.
#[derive(Debug, Clone, Copy)]
enum Budget {
    Unlimited,
    /// A single event or tick.
    One,
    /// All events and ticks sharing the time of the first one.
    SameTime,
}

/// What the run loop does next.
enum Next<T: SimTime> {
    /// Execute the first event of the list.
    Execute(T),
    /// Advance the clock to the next tick.
    Tick(T),
    /// Wait until the wall clock catches up with simulated time.
    Wait(Instant),
    /// Stop at the run-until target.
    ReachedUntil(T),
    /// End the replication with the clock at the given time.
    Finish(T),
}

impl<T: SimTime> Core<T> {
    fn next_tick(&self) -> Option<T> {
        let step = self.formalism.step()?;
        let offset = T::scale(step, self.ticks.checked_add(1)?)?;
        Some(self.start.plus(offset))
    }

    /// Time and kind of the next unit of work, before considering the end and run-until times.
    fn candidate(&self) -> Option<(T, bool)> {
        let event = self.events.peek_first().map(SimEvent::time);
        match self.formalism {
            Formalism::EventDriven => event.map(|time| (time, true)),
            Formalism::FixedStep(_) => self.next_tick().map(|time| (time, false)),
            Formalism::Hybrid(_) => match (event, self.next_tick()) {
                (Some(event), Some(tick)) if event < tick => Some((event, true)),
                (_, Some(tick)) => Some((tick, false)),
                (event, None) => event.map(|time| (time, true)),
            },
        }
    }

    fn deadline(&self, time: T) -> Option<Instant> {
        let speed = self.speed?;
        let (instant, origin) = self.anchor;
        let wall = Duration::try_from_secs_f64(T::to_units(time.minus(origin)) / speed).ok()?;
        instant.checked_add(wall)
    }

    fn next(&self, pace: bool) -> Next<T> {
        let candidate = self.candidate();
        if self.formalism.step().is_some() && self.next_tick().is_none() {
            warn!("{:?}: tick counter overflow", self.time);
        }
        if let Some(until) = self.until {
            let blocked = candidate.map_or(true, |(time, _)| {
                time > until.time || (time == until.time && !until.inclusive)
            });
            if blocked && self.end.map_or(true, |end| until.time <= end) {
                let drained = candidate.map_or(true, |(time, _)| time > until.time);
                if drained && self.end == Some(until.time) {
                    return Next::Finish(until.time);
                }
                return Next::ReachedUntil(until.time);
            }
        }
        let (time, is_event) = match candidate {
            Some(candidate) => candidate,
            None => return Next::Finish(self.time),
        };
        if let Some(end) = self.end {
            if time > end {
                return Next::Finish(end);
            }
        }
        if pace {
            if let Some(deadline) = self.deadline(time) {
                if deadline > Instant::now() {
                    return Next::Wait(deadline);
                }
            }
        }
        if is_event {
            Next::Execute(time)
        } else {
            Next::Tick(time)
        }
    }
}

impl<T: SimTime> Simulator<T> {
    /// Moves to `Running`, checking that the transition is allowed.
    fn begin(
        &self,
        operation: &'static str,
        until: Option<RunUntil<T>>,
    ) -> Result<(), SimError> {
        let notes = {
            let mut core = self.lock();
            match core.state {
                RunState::Initialized | RunState::Stopped => {}
                state => {
                    warn!("{}: cannot {} while {}", self.name(), operation, state);
                    return Err(RunStateError::InvalidTransition { operation, state }.into());
                }
            }
            if let Some(until) = until {
                if until.time < core.time {
                    return Err(ScheduleError::InPast {
                        at: format!("{:?}", until.time),
                        now: format!("{:?}", core.time),
                    }
                    .into());
                }
                core.until = Some(until);
            }
            if core.state == RunState::Initialized
                && matches!(core.formalism, Formalism::EventDriven)
                && core.events.is_empty()
                && core.until.is_none()
            {
                return Err(RunStateError::NothingToRun.into());
            }
            core.anchor = (Instant::now(), core.time);
            let mut notes = Vec::new();
            core.set_state(RunState::Running, &mut notes);
            notes
        };
        self.publish(notes);
        Ok(())
    }

    /// Runs until the replication ends, the run-until target is reached, or [`Simulator::stop`]
    /// is called. Blocks the calling thread.
    ///
    /// Returns the state in which the run finished: `Stopped` or `Ended`.
    ///
    /// # Errors
    ///
    /// Fails if the simulator is not `Initialized` or `Stopped`, or if a freshly initialized
    /// event-driven simulator has nothing to run. A stopped simulator with nothing left ends.
    pub fn start(&self) -> Result<RunState, SimError> {
        self.begin("start", None)?;
        Ok(self.run(Budget::Unlimited, true))
    }

    /// Starts the run on a new thread. The transition to `Running` happens before this
    /// returns, so a subsequent [`Simulator::stop`] is never lost.
    ///
    /// # Errors
    ///
    /// See [`Simulator::start`].
    pub fn spawn(&self) -> Result<JoinHandle<RunState>, SimError> {
        self.begin("start", None)?;
        let simulator = self.clone();
        Ok(thread::spawn(move || simulator.run(Budget::Unlimited, true)))
    }

    /// Requests the run to stop at the next event boundary. Pending events are kept.
    ///
    /// Stopping a simulator that is already stopped or stopping does nothing.
    ///
    /// # Errors
    ///
    /// Fails if the simulator has never been started or has ended.
    pub fn stop(&self) -> Result<(), RunStateError> {
        let mut core = self.lock();
        let state = core.state;
        match state {
            RunState::Running => {
                debug!("{}: stop requested at {:?}", self.name(), core.time);
                core.state = RunState::Stopping;
                drop(core);
                self.shared.wakeup.notify_all();
                Ok(())
            }
            RunState::Stopping | RunState::Stopped => Ok(()),
            state => Err(RunStateError::InvalidTransition {
                operation: "stop",
                state,
            }),
        }
    }

    /// Alias of [`Simulator::stop`].
    ///
    /// # Errors
    ///
    /// See [`Simulator::stop`].
    pub fn pause(&self) -> Result<(), RunStateError> {
        self.stop()
    }

    /// Executes exactly one event (or one tick for fixed-step simulators) and stops.
    ///
    /// A hybrid simulator executes the next event if it falls before the next tick, and
    /// otherwise advances by one tick.
    ///
    /// # Errors
    ///
    /// See [`Simulator::start`].
    pub fn step(&self) -> Result<RunState, SimError> {
        self.begin("step", None)?;
        Ok(self.run(Budget::One, false))
    }

    /// Executes all events sharing the next execution time and stops.
    ///
    /// # Errors
    ///
    /// See [`Simulator::start`].
    pub fn step_to_next_time(&self) -> Result<RunState, SimError> {
        self.begin("step to next time", None)?;
        Ok(self.run(Budget::SameTime, false))
    }

    /// Runs until `time`. With `inclusive`, events at exactly `time` are executed, otherwise
    /// they remain pending. The clock is then set to `time` and the simulator stops.
    ///
    /// If the replication ends before `time`, the simulator ends as with
    /// [`Simulator::start`].
    ///
    /// # Errors
    ///
    /// Fails if `time` is in the past, and in the same cases as [`Simulator::start`], except
    /// that an empty event list is allowed.
    pub fn run_until(&self, time: T, inclusive: bool) -> Result<RunState, SimError> {
        self.begin("run until", Some(RunUntil { time, inclusive }))?;
        Ok(self.run(Budget::Unlimited, true))
    }

    fn run(&self, budget: Budget, pace: bool) -> RunState {
        let mut units = 0_u64;
        let mut first_time: Option<T> = None;
        loop {
            let mut core = self.lock();
            let mut notes = Vec::new();
            if core.state == RunState::Stopping {
                core.set_state(RunState::Stopped, &mut notes);
                drop(core);
                self.publish(notes);
                return RunState::Stopped;
            }
            let next = core.next(pace);
            // A spent step stops before anything else, including the end of the replication.
            let exhausted = match budget {
                Budget::Unlimited => false,
                Budget::One => units >= 1,
                Budget::SameTime => first_time.map_or(false, |first| match &next {
                    Next::Execute(time) | Next::Tick(time) => first != *time,
                    _ => true,
                }),
            };
            if exhausted {
                core.set_state(RunState::Stopped, &mut notes);
                drop(core);
                self.publish(notes);
                return RunState::Stopped;
            }
            match next {
                Next::Wait(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    let _ = self
                        .shared
                        .wakeup
                        .wait_timeout(core, timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                Next::ReachedUntil(time) => {
                    core.until = None;
                    core.set_time(time, &mut notes);
                    core.set_state(RunState::Stopped, &mut notes);
                    drop(core);
                    debug!("{}: reached run-until time {:?}", self.name(), time);
                    self.publish(notes);
                    return RunState::Stopped;
                }
                Next::Finish(time) => {
                    core.until = None;
                    core.set_time(time, &mut notes);
                    core.set_state(RunState::Ended, &mut notes);
                    let executed = core.executed;
                    // Pending events may hold handles to this simulator.
                    core.events.clear();
                    drop(core);
                    info!(
                        "{}: replication ended at {:?} after {} events",
                        self.name(),
                        time,
                        executed
                    );
                    self.publish(notes);
                    return RunState::Ended;
                }
                Next::Tick(time) => {
                    core.ticks += 1;
                    core.time = time;
                    notes.push(core.notification(NotificationKind::TimeChanged, Payload::None));
                    if core.warmup_at.map_or(false, |warmup| warmup <= time) {
                        core.warmup_at = None;
                        notes.push(core.notification(NotificationKind::Warmup, Payload::None));
                    }
                    drop(core);
                    self.publish(notes);
                    first_time.get_or_insert(time);
                }
                Next::Execute(time) => {
                    let event = core.events.remove_first();
                    core.set_time(time, &mut notes);
                    core.executed += 1;
                    drop(core);
                    self.publish(notes);
                    if let Some(event) = event {
                        self.execute(event);
                    }
                    first_time.get_or_insert(time);
                }
            }
            units += 1;
        }
    }

    fn execute(&self, event: SimEvent<T>) {
        let (id, time, priority, action) =
            (event.id(), event.time(), event.priority(), event.action_name());
        trace!(
            "{}: executing event {} at {:?} with priority {} ({})",
            self.name(),
            id,
            time,
            priority,
            action
        );
        let message = match catch_unwind(AssertUnwindSafe(|| event.execute(self))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{:#}", err),
            Err(panic) => panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("action panicked")),
        };
        error!(
            "{}: event {} at {:?} with priority {} ({}) failed: {}",
            self.name(),
            id,
            time,
            priority,
            action,
            message
        );
        self.notify(
            NotificationKind::EventFailed,
            Payload::Failure {
                event: id,
                action,
                message,
            },
        );
        let mut core = self.lock();
        if core.pause_on_error && core.state == RunState::Running {
            core.state = RunState::Stopping;
        }
    }
}
