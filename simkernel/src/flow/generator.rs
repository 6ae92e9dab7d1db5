use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use rand::distributions::Distribution;

use super::{Constant, Destination, Entity, EntityId};
use crate::{EventHandle, Priority, ScheduleError, SimTime, Simulator};

/// Source of entities.
///
/// On each arrival, the generator draws a batch size and an inter-arrival time (in model
/// units), schedules the next arrival and sends the batch to its destination. A destination
/// failing to receive an entity does not stop the arrivals.
pub struct Generator<T: SimTime, I, B = Constant<u64>> {
    name: Arc<str>,
    interarrival: I,
    batch: B,
    start_time: Option<T>,
    max_number: Option<u64>,
    stream: String,
    destination: Destination<T>,
    generated: AtomicU64,
}

impl<T, I> Generator<T, I>
where
    T: SimTime,
    I: Distribution<f64> + Send + Sync + 'static,
{
    /// Creates a generator of single entities with the given inter-arrival distribution.
    /// Randomness is drawn from the stream with the generator's name.
    pub fn new<S: Into<String>>(name: S, interarrival: I, destination: Destination<T>) -> Self {
        let name = name.into();
        Self {
            stream: name.clone(),
            name: Arc::from(name),
            interarrival,
            batch: Constant(1),
            start_time: None,
            max_number: None,
            destination,
            generated: AtomicU64::new(0),
        }
    }
}

impl<T, I, B> Generator<T, I, B>
where
    T: SimTime,
    I: Distribution<f64> + Send + Sync + 'static,
    B: Distribution<u64> + Send + Sync + 'static,
{
    /// Sets the batch size distribution.
    pub fn batch_size<D>(self, batch: D) -> Generator<T, I, D>
    where
        D: Distribution<u64> + Send + Sync + 'static,
    {
        Generator {
            name: self.name,
            interarrival: self.interarrival,
            batch,
            start_time: self.start_time,
            max_number: self.max_number,
            stream: self.stream,
            destination: self.destination,
            generated: self.generated,
        }
    }

    /// Sets the time of the first arrival. By default, it is the time of [`Generator::start`].
    #[must_use]
    pub fn start_time(mut self, time: T) -> Self {
        self.start_time = Some(time);
        self
    }

    /// Stops generating after `max` entities.
    #[must_use]
    pub fn max_number(mut self, max: u64) -> Self {
        self.max_number = Some(max);
        self
    }

    /// Draws randomness from the stream called `name`.
    #[must_use]
    pub fn stream<S: Into<String>>(mut self, name: S) -> Self {
        self.stream = name.into();
        self
    }

    /// Name of the generator.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entities generated so far.
    #[must_use]
    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    /// Schedules the first arrival.
    ///
    /// # Errors
    ///
    /// Fails if the start time is in the past or the simulator cannot schedule events.
    pub fn start(self: Arc<Self>, simulator: &Simulator<T>) -> Result<EventHandle<T>, ScheduleError> {
        let time = self.start_time.unwrap_or_else(|| simulator.now());
        simulator.schedule(time, Priority::NORMAL, move |simulator| self.generate(simulator))
    }

    fn generate(self: Arc<Self>, simulator: &Simulator<T>) -> eyre::Result<()> {
        let generated = self.generated();
        let remaining = self.max_number.map_or(u64::MAX, |max| max.saturating_sub(generated));
        if remaining == 0 {
            return Ok(());
        }
        let (batch, delay) = simulator
            .stream(&self.stream)?
            .with(|rng| (self.batch.sample(rng), self.interarrival.sample(rng)));
        let batch = batch.min(remaining);
        trace!("{}: generating {} entities at {:?}", self.name, batch, simulator.now());
        // The next arrival must not depend on the destination accepting this batch.
        if batch < remaining {
            let next = Arc::clone(&self);
            simulator.schedule_after_units(delay, Priority::NORMAL, move |simulator| {
                next.generate(simulator)
            })?;
        }
        for _ in 0..batch {
            let id = self.generated.fetch_add(1, Ordering::Relaxed);
            let entity = Entity {
                id: EntityId::from(id),
                origin: Arc::clone(&self.name),
                created: simulator.now(),
            };
            self.destination.receive(entity, simulator)?;
        }
        Ok(())
    }
}
