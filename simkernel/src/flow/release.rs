use super::{Destination, Entity, Station};
use crate::{Resource, SimTime, Simulator};

/// Gives back capacity of a resource for each entity, then forwards the entity, if there is
/// a destination.
pub struct Release<T: SimTime> {
    name: String,
    resource: Resource<T>,
    amount: f64,
    destination: Option<Destination<T>>,
}

impl<T: SimTime> Release<T> {
    /// Creates a station releasing `amount` of `resource` per entity.
    pub fn new<S: Into<String>>(name: S, resource: Resource<T>, amount: f64) -> Self {
        Self {
            name: name.into(),
            resource,
            amount,
            destination: None,
        }
    }

    /// Forwards entities to `destination` after releasing.
    #[must_use]
    pub fn then(mut self, destination: Destination<T>) -> Self {
        self.destination = Some(destination);
        self
    }
}

impl<T: SimTime> Station<T> for Release<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, entity: Entity<T>, simulator: &Simulator<T>) -> eyre::Result<()> {
        self.resource.release_capacity(self.amount)?;
        match &self.destination {
            Some(destination) => destination.receive(entity, simulator),
            None => Ok(()),
        }
    }
}
