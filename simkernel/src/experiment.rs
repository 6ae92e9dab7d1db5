use log::{info, warn};

use crate::stream::mix;
use crate::{
    ConfigError, Formalism, Model, Replication, RunState, RunStateError, SimError, SimTime,
    Simulator,
};

/// Result of a single replication of an experiment.
#[derive(Debug)]
pub struct ReplicationOutcome<T, M> {
    /// Index of the replication.
    pub index: usize,
    /// Seed the random streams were derived from.
    pub seed: u64,
    /// State in which the run finished.
    pub state: RunState,
    /// Simulation time at the end of the run.
    pub end_time: T,
    /// Number of executed events.
    pub executed: u64,
    /// The model, with whatever it collected during the run.
    pub model: M,
}

/// A series of independent replications of the same model.
///
/// Every replication runs on a fresh simulator with its own seed, derived from the base seed
/// and the replication index, so any single replication can be reproduced on its own.
#[derive(Debug, Clone)]
pub struct Experiment<T: SimTime> {
    name: String,
    formalism: Formalism<T::Relative>,
    template: Replication<T>,
    replications: usize,
    base_seed: u64,
    pause_on_error: bool,
}

impl<T: SimTime> Experiment<T> {
    /// Creates an experiment running `replications` copies of `template`.
    ///
    /// # Errors
    ///
    /// Fails if `replications` is zero.
    pub fn new<S: Into<String>>(
        name: S,
        formalism: Formalism<T::Relative>,
        template: Replication<T>,
        replications: usize,
    ) -> Result<Self, ConfigError> {
        if replications == 0 {
            return Err(ConfigError::NoReplications);
        }
        Ok(Self {
            name: name.into(),
            formalism,
            template,
            replications,
            base_seed: 0,
            pause_on_error: false,
        })
    }

    /// Sets the seed from which replication seeds are derived.
    #[must_use]
    pub fn base_seed(mut self, seed: u64) -> Self {
        self.base_seed = seed;
        self
    }

    /// Sets the pause-on-error policy of the simulators.
    #[must_use]
    pub fn pause_on_error(mut self, pause: bool) -> Self {
        self.pause_on_error = pause;
        self
    }

    /// Number of replications.
    #[must_use]
    pub fn replications(&self) -> usize {
        self.replications
    }

    /// Parameters of the replication with the given index.
    #[must_use]
    pub fn replication(&self, index: usize) -> Replication<T> {
        self.template
            .clone()
            .with_index(index)
            .with_seed(mix(self.base_seed, index as u64))
    }

    /// Creates the simulator for the replication with the given index.
    ///
    /// # Errors
    ///
    /// Fails if the formalism is invalid.
    pub fn simulator(&self, index: usize) -> Result<Simulator<T>, ConfigError> {
        let simulator = Simulator::new(format!("{}#{}", self.name, index), self.formalism)?;
        simulator.set_pause_on_error(self.pause_on_error);
        Ok(simulator)
    }

    /// Runs a single replication of `model` to completion.
    ///
    /// # Errors
    ///
    /// Fails if the model cannot be constructed or the simulator cannot be started.
    pub fn run_one<M: Model<T>>(
        &self,
        index: usize,
        mut model: M,
    ) -> Result<ReplicationOutcome<T, M>, SimError> {
        let replication = self.replication(index);
        let seed = replication.seed();
        let simulator = self.simulator(index)?;
        info!(
            "{}: replication {} of {} (seed {})",
            self.name,
            index + 1,
            self.replications,
            seed
        );
        simulator.initialize(replication, &mut model)?;
        let state = match simulator.start() {
            Ok(state) => state,
            Err(SimError::RunState(RunStateError::NothingToRun)) => {
                warn!("{}: replication {} has no events", self.name, index);
                simulator.state()
            }
            Err(err) => return Err(err),
        };
        Ok(ReplicationOutcome {
            index,
            seed,
            state,
            end_time: simulator.now(),
            executed: simulator.executed_events(),
            model,
        })
    }

    /// Runs all replications in order, building each model with `make_model(index)`.
    ///
    /// # Errors
    ///
    /// Stops at the first replication that fails; see [`Experiment::run_one`].
    pub fn run<M, F>(&self, mut make_model: F) -> Result<Vec<ReplicationOutcome<T, M>>, SimError>
    where
        M: Model<T>,
        F: FnMut(usize) -> M,
    {
        (0..self.replications)
            .map(|index| self.run_one(index, make_model(index)))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Priority;

    struct Counter {
        fired: Vec<i64>,
    }

    impl Model<i64> for Counter {
        fn construct(&mut self, simulator: &Simulator<i64>) -> eyre::Result<()> {
            self.fired.push(simulator.now());
            simulator.schedule(3, Priority::NORMAL, |_| Ok(()))?;
            Ok(())
        }
    }

    #[test]
    fn test_replications_have_distinct_seeds() -> eyre::Result<()> {
        let template = Replication::new(0, 0, 10)?;
        let experiment = Experiment::new("exp", Formalism::EventDriven, template, 3)?.base_seed(9);
        let outcomes = experiment.run(|_| Counter { fired: Vec::new() })?;
        assert_eq!(outcomes.len(), 3);
        assert_eq!(
            outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(outcomes.iter().all(|o| o.state == RunState::Ended));
        assert!(outcomes.iter().all(|o| o.end_time == 3 && o.executed == 1));
        assert!(outcomes.iter().all(|o| o.model.fired == vec![0]));
        assert_ne!(outcomes[0].seed, outcomes[1].seed);
        assert_eq!(outcomes[2].seed, experiment.replication(2).seed());
        Ok(())
    }

    #[test]
    fn test_no_replications() {
        let template = Replication::<i64>::new(0, 0, 10).unwrap();
        assert!(matches!(
            Experiment::new("exp", Formalism::EventDriven, template, 0),
            Err(ConfigError::NoReplications)
        ));
    }
}
