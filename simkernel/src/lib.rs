#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::missing_errors_doc
)]

//! Multi-formalism discrete-event simulation kernel.
//!
//! A [`Simulator`] advances a logical clock of any [`SimTime`] type and executes scheduled
//! actions in `(time, -priority, insertion)` order. It supports three formalisms:
//! event-driven, fixed-step and hybrid (see [`Formalism`]). Models contend for capacity of
//! shared [`Resource`]s, and queueing networks are composed from the stations in [`flow`].
//! A [`Replication`] supplies the run length, warm-up and named random streams, and an
//! [`Experiment`] runs several independent replications.
//!
//! # Examples
//!
//! ```
//! # use simkernel::{Formalism, Priority, Replication, RunState, Simulator};
//! # fn main() -> eyre::Result<()> {
//! let sim = Simulator::<i64>::new("example", Formalism::EventDriven)?;
//! sim.initialize(Replication::new(0, 0, 100)?, &mut |sim: &Simulator<i64>| -> eyre::Result<()> {
//!     sim.schedule(10, Priority::NORMAL, |sim: &Simulator<i64>| -> eyre::Result<()> {
//!         log::info!("hello at {}", sim.now());
//!         Ok(())
//!     })?;
//!     Ok(())
//! })?;
//! assert_eq!(sim.start()?, RunState::Ended);
//! assert_eq!(sim.executed_events(), 1);
//! # Ok(())
//! # }
//! ```

pub use error::{ConfigError, RunStateError, ScheduleError, SimError, TimeError};
pub use event::{Action, EventHandle, EventId, Priority, SimEvent};
pub use event_list::EventList;
pub use experiment::{Experiment, ReplicationOutcome};
pub use notification::{
    ChannelListener, Listener, Notification, NotificationKind, Notifier, Payload,
    SubscriptionId,
};
pub use replication::{Replication, ReplicationMode};
pub use resource::{RequestOutcome, Requestor, Resource};
pub use simulator::{Formalism, Model, RunState, Simulator};
pub use stream::{RandomStreams, Stream};
pub use time::SimTime;

mod error;
mod event;
mod event_list;
mod experiment;
pub mod flow;
mod notification;
mod replication;
mod resource;
mod simulator;
mod stream;
mod time;
