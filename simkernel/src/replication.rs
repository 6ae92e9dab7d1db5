use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, RandomStreams, SimTime};

/// Whether the beginning of a replication is discarded from statistics.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// The whole run is measured; no warm-up notification is published.
    Terminating,
    /// A `WARMUP` notification marks the end of the transient period.
    SteadyState,
}

impl Default for ReplicationMode {
    fn default() -> Self {
        Self::SteadyState
    }
}

/// Parameters of a single run: start time, warm-up and run length, and random streams.
#[derive(Debug, Clone)]
pub struct Replication<T: SimTime> {
    index: usize,
    start: T,
    warmup: T::Relative,
    run_length: T::Relative,
    mode: ReplicationMode,
    seed: u64,
    stream_seeds: BTreeMap<String, u64>,
}

impl<T: SimTime> Replication<T> {
    /// Creates a replication starting at `start` and lasting `run_length`, with the first
    /// `warmup` of it treated as the transient period.
    ///
    /// # Errors
    ///
    /// Fails if either length is negative or not finite, or if the warm-up is longer than
    /// the run.
    pub fn new(start: T, warmup: T::Relative, run_length: T::Relative) -> Result<Self, ConfigError> {
        let invalid = |err: crate::TimeError| ConfigError::InvalidReplication(err.to_string());
        let warmup = T::validate_relative(warmup).map_err(invalid)?;
        let run_length = T::validate_relative(run_length).map_err(invalid)?;
        if warmup > run_length {
            return Err(ConfigError::InvalidReplication(format!(
                "warm-up {:?} is longer than the run length {:?}",
                warmup, run_length
            )));
        }
        Ok(Self {
            index: 0,
            start,
            warmup,
            run_length,
            mode: ReplicationMode::default(),
            seed: 0,
            stream_seeds: BTreeMap::new(),
        })
    }

    /// Sets the index of this replication within an experiment.
    #[must_use]
    pub fn with_index(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Sets the seed from which random streams are derived.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the replication mode.
    #[must_use]
    pub fn mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Seeds the stream called `name` with `seed` instead of deriving it.
    #[must_use]
    pub fn seed_stream<S: Into<String>>(mut self, name: S, seed: u64) -> Self {
        self.stream_seeds.insert(name.into(), seed);
        self
    }

    /// Index within an experiment.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Start time.
    #[must_use]
    pub fn start(&self) -> T {
        self.start
    }

    /// Warm-up length.
    #[must_use]
    pub fn warmup(&self) -> T::Relative {
        self.warmup
    }

    /// Run length, including warm-up.
    #[must_use]
    pub fn run_length(&self) -> T::Relative {
        self.run_length
    }

    /// Replication mode.
    #[must_use]
    pub fn replication_mode(&self) -> ReplicationMode {
        self.mode
    }

    /// Base seed of the random streams.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Time at which the replication ends.
    #[must_use]
    pub fn end_time(&self) -> T {
        self.start.plus(self.run_length)
    }

    /// Time at which the warm-up period ends.
    #[must_use]
    pub fn warmup_time(&self) -> T {
        self.start.plus(self.warmup)
    }

    /// Checks if a warm-up notification should be published.
    pub(crate) fn has_warmup(&self) -> bool {
        self.mode == ReplicationMode::SteadyState && self.warmup > T::zero_relative()
    }

    /// Builds the random streams, applying per-stream seed overrides.
    #[must_use]
    pub fn streams(&self) -> RandomStreams {
        let mut streams = RandomStreams::new(self.seed);
        for (name, &seed) in &self.stream_seeds {
            streams.reseed(name, seed);
        }
        streams
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ordered_float::OrderedFloat;
    use rand::Rng;
    use std::str::FromStr;

    #[test]
    fn test_lengths() {
        let replication = Replication::new(OrderedFloat(10.0), 2.0, 5.0).unwrap();
        assert_eq!(replication.end_time(), OrderedFloat(15.0));
        assert_eq!(replication.warmup_time(), OrderedFloat(12.0));
        assert!(replication.has_warmup());
        assert!(!replication.mode(ReplicationMode::Terminating).has_warmup());
    }

    #[test]
    fn test_invalid_lengths() {
        assert!(matches!(
            Replication::<i64>::new(0, 10, 5),
            Err(ConfigError::InvalidReplication(_))
        ));
        assert!(Replication::<i64>::new(0, -1, 5).is_err());
        assert!(Replication::<OrderedFloat<f64>>::new(OrderedFloat(0.0), 0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_stream_overrides() {
        let replication = Replication::<i64>::new(0, 0, 5)
            .unwrap()
            .with_seed(1)
            .seed_stream("service", 7);
        let mut streams = replication.streams();
        let mut expected = RandomStreams::new(0);
        expected.reseed("other", 7);
        let drawn: u64 = streams.stream("service").gen();
        assert_eq!(drawn, expected.stream("other").gen::<u64>());
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(ReplicationMode::SteadyState.to_string(), "steady_state");
        assert_eq!(
            ReplicationMode::from_str("terminating").unwrap(),
            ReplicationMode::Terminating
        );
        let mode: ReplicationMode = serde_json::from_str("\"steady_state\"").unwrap();
        assert_eq!(mode, ReplicationMode::SteadyState);
    }
}
