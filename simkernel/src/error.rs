//! Error types reported by the kernel.
//!
//! Errors fall into four groups:
//! - [`ConfigError`]: invalid setup, reported before any run starts;
//! - [`ScheduleError`]: invalid scheduling or capacity requests, reported synchronously to the
//!   caller;
//! - [`RunStateError`]: invalid run-state transitions, the state is left unchanged;
//! - execution errors: failures of event actions, which never surface as `Err` from the run
//!   loop but are logged, published as notifications, and handled per the pause-on-error policy.

use thiserror::Error;

use crate::RunState;

/// Invalid conversion or validation of a relative time value.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TimeError {
    /// Relative time is negative.
    #[error("relative time {0} is negative")]
    Negative(String),
    /// Relative time is not a finite number.
    #[error("relative time {0} is not finite")]
    NonFinite(String),
    /// Relative time cannot be represented by the time type.
    #[error("relative time of {0} units cannot be represented")]
    Overflow(f64),
}

/// Configuration errors, detected at setup time.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Time step of a fixed-step or hybrid simulator is not strictly positive and finite.
    #[error("time step {0} must be strictly positive and finite")]
    InvalidStep(String),
    /// Resource capacity is negative or not finite.
    #[error("invalid capacity {0}: must be finite and non-negative")]
    InvalidCapacity(f64),
    /// Replication parameters are inconsistent.
    #[error("invalid replication: {0}")]
    InvalidReplication(String),
    /// `initialize` was called on a simulator that is already initialized.
    #[error("simulator is already initialized")]
    AlreadyInitialized,
    /// Real-time speed factor is not strictly positive and finite.
    #[error("real-time speed {0} must be strictly positive and finite")]
    InvalidSpeed(f64),
    /// An experiment was configured with zero replications.
    #[error("experiment needs at least one replication")]
    NoReplications,
    /// The component needs an event list, but the simulator is a fixed-step one.
    #[error("`{0}` requires a simulator with an event list")]
    EventListRequired(String),
}

/// Errors of scheduling and capacity requests.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    /// Requested execution time is earlier than the current simulation time.
    #[error("cannot schedule at {at} before the current time {now}")]
    InPast {
        /// Requested time.
        at: String,
        /// Current simulation time.
        now: String,
    },
    /// Priority outside of the allowed range.
    #[error("priority {0} is outside of the allowed range [1, 10]")]
    PriorityOutOfBounds(u8),
    /// Relative delay is negative, non-finite, or not representable.
    #[error("invalid delay: {0}")]
    InvalidDelay(#[from] TimeError),
    /// Requested or released capacity is negative or not finite.
    #[error("capacity amount {0} must be finite and non-negative")]
    InvalidAmount(f64),
    /// Fixed-step simulators do not have an event list.
    #[error("fixed-step simulator has no event list")]
    NoEventList,
    /// Scheduling before the simulator has been initialized with a replication.
    #[error("simulator has not been initialized")]
    NotInitialized,
}

/// Run-state errors. The simulator state is unchanged when these are returned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunStateError {
    /// The operation is not allowed in the current state.
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        /// Name of the rejected operation.
        operation: &'static str,
        /// State at the time of the call.
        state: RunState,
    },
    /// `start` on an event-driven simulator with no events and no run-until target.
    #[error("nothing to run: event list is empty and no run-until time is set")]
    NothingToRun,
}

/// Any error returned by the kernel API.
#[derive(Debug, Error)]
pub enum SimError {
    /// See [`ConfigError`].
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// See [`ScheduleError`].
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    /// See [`RunStateError`].
    #[error(transparent)]
    RunState(#[from] RunStateError),
    /// Model construction failed during `initialize`.
    #[error("model construction failed: {0:#}")]
    Construction(eyre::Report),
}

impl From<TimeError> for SimError {
    fn from(err: TimeError) -> Self {
        Self::Schedule(ScheduleError::InvalidDelay(err))
    }
}
