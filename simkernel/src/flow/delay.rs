use std::sync::Arc;

use rand::distributions::Distribution;

use super::{Destination, Entity, Station};
use crate::{Priority, SimTime, Simulator};

/// Holds each entity for a duration drawn from a distribution, in model units.
pub struct Delay<T: SimTime, D> {
    name: String,
    duration: D,
    stream: String,
    destination: Destination<T>,
}

impl<T, D> Delay<T, D>
where
    T: SimTime,
    D: Distribution<f64> + Send + Sync + 'static,
{
    /// Creates a delay drawing from the stream with the station's name.
    pub fn new<S: Into<String>>(name: S, duration: D, destination: Destination<T>) -> Self {
        let name = name.into();
        Self {
            stream: name.clone(),
            name,
            duration,
            destination,
        }
    }

    /// Draws durations from the stream called `name`.
    #[must_use]
    pub fn stream<S: Into<String>>(mut self, name: S) -> Self {
        self.stream = name.into();
        self
    }
}

impl<T, D> Station<T> for Delay<T, D>
where
    T: SimTime,
    D: Distribution<f64> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, entity: Entity<T>, simulator: &Simulator<T>) -> eyre::Result<()> {
        let units = simulator
            .stream(&self.stream)?
            .with(|rng| self.duration.sample(rng));
        let destination = Arc::clone(&self.destination);
        simulator.schedule_after_units(units, Priority::NORMAL, move |simulator| {
            destination.receive(entity, simulator)
        })?;
        Ok(())
    }
}
