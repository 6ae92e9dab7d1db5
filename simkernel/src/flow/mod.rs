//! Queueing-network building blocks.
//!
//! Entities are created by a [`Generator`] and passed from one [`Station`] to the next:
//! a [`Seize`] claims resource capacity, a [`Delay`] holds the entity for a drawn duration,
//! a [`Release`] gives the capacity back, and a [`Destroy`] removes the entity from the
//! system.
//!
//! Random durations are drawn from the simulator's named [`Stream`](crate::Stream)s, so runs
//! with equal seeds are reproducible.

use std::sync::Arc;

use derive_more::{Display, From, Into};
use rand::distributions::Distribution;
use rand::Rng;

use crate::{SimTime, Simulator};

mod delay;
mod destroy;
mod generator;
mod release;
mod seize;

pub use delay::Delay;
pub use destroy::Destroy;
pub use generator::Generator;
pub use release::Release;
pub use seize::Seize;

/// Identifier of an entity, unique within its generator.
#[derive(From, Into, Display, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u64);

/// An item flowing through the network.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<T> {
    /// Identifier within the generator.
    pub id: EntityId,
    /// Name of the generator that created the entity.
    pub origin: Arc<str>,
    /// Creation time.
    pub created: T,
}

/// A node of the network that entities are sent to.
pub trait Station<T: SimTime>: Send + Sync {
    /// Name of the station.
    fn name(&self) -> &str;

    /// Accepts `entity` at the current simulation time.
    ///
    /// # Errors
    ///
    /// Any error is reported as a failure of the event during which the entity arrived.
    fn receive(&self, entity: Entity<T>, simulator: &Simulator<T>) -> eyre::Result<()>;
}

/// Shared reference to the next station.
pub type Destination<T> = Arc<dyn Station<T>>;

/// Distribution always returning the same value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant<X>(pub X);

impl<X: Copy> Distribution<X> for Constant<X> {
    fn sample<R: Rng + ?Sized>(&self, _: &mut R) -> X {
        self.0
    }
}
