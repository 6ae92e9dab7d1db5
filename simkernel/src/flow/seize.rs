use std::sync::Arc;

use super::{Destination, Entity, Station};
use crate::{Priority, Resource, SimTime, Simulator};

/// Claims capacity of a resource for each entity, and forwards the entity once granted.
pub struct Seize<T: SimTime> {
    name: String,
    resource: Resource<T>,
    amount: f64,
    priority: Priority,
    destination: Destination<T>,
}

impl<T: SimTime> Seize<T> {
    /// Creates a station claiming `amount` of `resource` per entity with normal priority.
    pub fn new<S: Into<String>>(
        name: S,
        resource: Resource<T>,
        amount: f64,
        destination: Destination<T>,
    ) -> Self {
        Self {
            name: name.into(),
            resource,
            amount,
            priority: Priority::NORMAL,
            destination,
        }
    }

    /// Sets the priority of the capacity requests.
    #[must_use]
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// The resource claimed by this station.
    #[must_use]
    pub fn resource(&self) -> &Resource<T> {
        &self.resource
    }
}

impl<T: SimTime> Station<T> for Seize<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, entity: Entity<T>, _: &Simulator<T>) -> eyre::Result<()> {
        let destination = Arc::clone(&self.destination);
        self.resource.request_capacity_with_priority(
            self.amount,
            self.priority,
            move |_: f64, _: &Resource<T>, simulator: &Simulator<T>| -> eyre::Result<()> {
                destination.receive(entity, simulator)
            },
        )?;
        Ok(())
    }
}
