use std::sync::{Mutex, PoisonError};

use super::{Entity, Station};
use crate::{SimTime, Simulator};

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    count: u64,
    time_in_system: f64,
}

/// Sink removing entities from the system and measuring their time in it.
#[derive(Debug)]
pub struct Destroy {
    name: String,
    totals: Mutex<Totals>,
}

impl Destroy {
    /// Creates a sink.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            totals: Mutex::default(),
        }
    }

    fn totals(&self) -> Totals {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of destroyed entities.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.totals().count
    }

    /// Total time spent in the system by destroyed entities, in model units.
    #[must_use]
    pub fn total_time_in_system(&self) -> f64 {
        self.totals().time_in_system
    }

    /// Mean time in the system, or `None` if nothing was destroyed.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_time_in_system(&self) -> Option<f64> {
        let totals = self.totals();
        if totals.count == 0 {
            None
        } else {
            Some(totals.time_in_system / totals.count as f64)
        }
    }

    /// Forgets everything destroyed so far, e.g., at the end of a warm-up period.
    pub fn reset(&self) {
        *self.totals.lock().unwrap_or_else(PoisonError::into_inner) = Totals::default();
    }
}

impl<T: SimTime> Station<T> for Destroy {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, entity: Entity<T>, simulator: &Simulator<T>) -> eyre::Result<()> {
        let elapsed = T::to_units(simulator.now().minus(entity.created));
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.count += 1;
        totals.time_in_system += elapsed;
        Ok(())
    }
}
