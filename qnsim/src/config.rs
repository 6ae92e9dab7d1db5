use std::io::Read;

use itertools::Itertools;
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use rand_distr::{Exp, Normal};
use serde::{Deserialize, Serialize};
use simkernel::{Experiment, Formalism, Priority, Replication, ReplicationMode};

use crate::Time;

/// Errors in the network description.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file is not a valid description.
    #[error("invalid network description: {0}")]
    Json(#[from] serde_json::Error),
    /// The line has no stages.
    #[error("the line has no stages")]
    NoStages,
    /// Two stages share a name, which would make their resources and streams collide.
    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),
    /// Number of servers is not a positive finite number.
    #[error("stage {stage} has an invalid number of servers: {servers}")]
    InvalidServers {
        /// Stage name.
        stage: String,
        /// Configured number of servers.
        servers: f64,
    },
    /// Stage priority is out of bounds.
    #[error("stage {stage} has an invalid priority: {priority}")]
    InvalidPriority {
        /// Stage name.
        stage: String,
        /// Configured priority.
        priority: u8,
    },
    /// Distribution parameters are invalid.
    #[error("invalid {name} distribution: {reason}")]
    InvalidDistribution {
        /// What the distribution is used for.
        name: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Arrival batches must contain at least one entity.
    #[error("arrival batch size must be positive")]
    InvalidBatchSize,
    /// Replication or experiment parameters rejected by the kernel.
    #[error(transparent)]
    Kernel(#[from] simkernel::ConfigError),
}

/// Probability distribution of a duration, in model units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistributionConfig {
    /// Exponential distribution with the given rate.
    Exponential {
        /// Events per model unit.
        rate: f64,
    },
    /// Uniform distribution over `[low, high)`.
    Uniform {
        /// Lower bound.
        low: f64,
        /// Upper bound, exclusive.
        high: f64,
    },
    /// Normal distribution; negative draws are truncated to zero.
    Normal {
        /// Mean.
        mean: f64,
        /// Standard deviation.
        std_dev: f64,
    },
    /// Always the same value.
    Constant {
        /// The value.
        value: f64,
    },
}

impl DistributionConfig {
    /// Validates the parameters and builds a sampler. `name` is used in error messages.
    pub fn sampler(&self, name: &str) -> Result<Sampler, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidDistribution {
            name: name.to_string(),
            reason: format!("{} ({})", reason, self),
        };
        match *self {
            Self::Exponential { rate } => {
                if !(rate.is_finite() && rate > 0.0) {
                    return Err(invalid("rate must be positive and finite"));
                }
                Exp::new(rate)
                    .map(Sampler::Exponential)
                    .map_err(|err| invalid(&err.to_string()))
            }
            Self::Uniform { low, high } => {
                if !(low.is_finite() && high.is_finite() && low >= 0.0 && low < high) {
                    return Err(invalid("bounds must satisfy 0 <= low < high"));
                }
                Ok(Sampler::Uniform(Uniform::new(low, high)))
            }
            Self::Normal { mean, std_dev } => {
                if !(mean.is_finite() && std_dev.is_finite() && std_dev >= 0.0) {
                    return Err(invalid("mean and standard deviation must be finite"));
                }
                Normal::new(mean, std_dev)
                    .map(Sampler::Normal)
                    .map_err(|err| invalid(&err.to_string()))
            }
            Self::Constant { value } => {
                if !(value.is_finite() && value >= 0.0) {
                    return Err(invalid("value must be non-negative and finite"));
                }
                Ok(Sampler::Constant(value))
            }
        }
    }
}

/// Validated distribution, sampling non-negative durations.
#[derive(Debug, Clone, Copy)]
pub enum Sampler {
    /// See [`DistributionConfig::Exponential`].
    Exponential(Exp<f64>),
    /// See [`DistributionConfig::Uniform`].
    Uniform(Uniform<f64>),
    /// See [`DistributionConfig::Normal`].
    Normal(Normal<f64>),
    /// See [`DistributionConfig::Constant`].
    Constant(f64),
}

impl Distribution<f64> for Sampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Exponential(exp) => exp.sample(rng),
            Self::Uniform(uniform) => uniform.sample(rng),
            Self::Normal(normal) => normal.sample(rng).max(0.0),
            Self::Constant(value) => *value,
        }
    }
}

/// Simulation formalism of the line. Fixed-step simulation has no event list, so it cannot
/// drive resources and is not offered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FormalismConfig {
    /// Pure discrete-event simulation.
    EventDriven,
    /// Events interleaved with fixed clock ticks of `step` model units.
    Hybrid {
        /// Tick length.
        step: f64,
    },
}

impl Default for FormalismConfig {
    fn default() -> Self {
        Self::EventDriven
    }
}

impl From<FormalismConfig> for Formalism<f64> {
    fn from(config: FormalismConfig) -> Self {
        match config {
            FormalismConfig::EventDriven => Formalism::EventDriven,
            FormalismConfig::Hybrid { step } => Formalism::Hybrid(step),
        }
    }
}

fn one() -> u64 {
    1
}

fn one_server() -> f64 {
    1.0
}

fn default_replications() -> usize {
    1
}

fn default_name() -> String {
    String::from("qnsim")
}

/// Arrival process of the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArrivalConfig {
    /// Time between consecutive batches.
    pub interarrival: DistributionConfig,
    /// Number of entities arriving together.
    #[serde(default = "one")]
    pub batch_size: u64,
    /// Stop after this many entities.
    #[serde(default)]
    pub max_number: Option<u64>,
    /// Time of the first arrival; the replication start by default.
    #[serde(default)]
    pub start: Option<f64>,
}

/// One stage of the line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Name of the stage, also naming its resource and random stream.
    pub name: String,
    /// Number of identical servers, i.e., capacity of the resource.
    #[serde(default = "one_server")]
    pub servers: f64,
    /// Service time distribution.
    pub service: DistributionConfig,
    /// Priority of capacity requests, `[1, 10]`.
    #[serde(default)]
    pub priority: Option<u8>,
}

impl StageConfig {
    /// Priority of requests issued by this stage.
    pub fn priority(&self) -> Result<Priority, ConfigError> {
        self.priority.map_or(Ok(Priority::NORMAL), |priority| {
            Priority::new(priority).map_err(|_| ConfigError::InvalidPriority {
                stage: self.name.clone(),
                priority,
            })
        })
    }
}

/// Description of the experiment and the line it simulates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Experiment name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of independent replications.
    #[serde(default = "default_replications")]
    pub replications: usize,
    /// Base seed.
    #[serde(default)]
    pub seed: u64,
    /// Start time of each replication.
    #[serde(default)]
    pub start: f64,
    /// Warm-up length; statistics are reset when it is over.
    #[serde(default)]
    pub warmup: f64,
    /// Replication length, including the warm-up.
    pub run_length: f64,
    /// Replication mode.
    #[serde(default)]
    pub mode: ReplicationMode,
    /// Simulation formalism.
    #[serde(default)]
    pub formalism: FormalismConfig,
    /// Pause a replication at the first failed event.
    #[serde(default)]
    pub pause_on_error: bool,
    /// Arrival process.
    pub arrivals: ArrivalConfig,
    /// Stages, in the order entities visit them.
    pub stages: Vec<StageConfig>,
}

impl NetworkConfig {
    /// Reads and validates a JSON description.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked before running.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::NoStages);
        }
        if let Some((name, _)) = self
            .stages
            .iter()
            .map(|stage| stage.name.as_str())
            .sorted()
            .tuple_windows()
            .find(|(lhs, rhs)| lhs == rhs)
        {
            return Err(ConfigError::DuplicateStage(name.to_string()));
        }
        for stage in &self.stages {
            if !(stage.servers.is_finite() && stage.servers > 0.0) {
                return Err(ConfigError::InvalidServers {
                    stage: stage.name.clone(),
                    servers: stage.servers,
                });
            }
            stage.priority()?;
            stage.service.sampler(&stage.name)?;
        }
        if self.arrivals.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        self.arrivals.interarrival.sampler("interarrival")?;
        self.experiment()?;
        Ok(())
    }

    /// Replication template.
    pub fn replication(&self) -> Result<Replication<Time>, ConfigError> {
        Ok(Replication::new(Time::from(self.start), self.warmup, self.run_length)?.mode(self.mode))
    }

    /// Experiment running all replications.
    pub fn experiment(&self) -> Result<Experiment<Time>, ConfigError> {
        Ok(Experiment::new(
            self.name.clone(),
            self.formalism.into(),
            self.replication()?,
            self.replications,
        )?
        .base_seed(self.seed)
        .pause_on_error(self.pause_on_error))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use quickcheck_macros::quickcheck;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rstest::rstest;

    const CONFIG: &str = r#"{
        "name": "two-stage",
        "replications": 3,
        "seed": 17,
        "warmup": 10.0,
        "run_length": 100.0,
        "mode": "steady_state",
        "formalism": { "type": "hybrid", "step": 0.5 },
        "arrivals": { "interarrival": { "type": "exponential", "rate": 1.0 } },
        "stages": [
            { "name": "triage", "service": { "type": "constant", "value": 0.5 } },
            {
                "name": "treatment",
                "servers": 2,
                "service": { "type": "uniform", "low": 1.0, "high": 2.0 },
                "priority": 7
            }
        ]
    }"#;

    #[test]
    fn test_parse() -> eyre::Result<()> {
        let config = NetworkConfig::from_reader(CONFIG.as_bytes())?;
        assert_eq!(config.name, "two-stage");
        assert_eq!(config.replications, 3);
        assert_eq!(config.seed, 17);
        assert_eq!(config.mode, ReplicationMode::SteadyState);
        assert_eq!(config.formalism, FormalismConfig::Hybrid { step: 0.5 });
        assert_eq!(config.arrivals.batch_size, 1);
        assert_eq!(config.arrivals.max_number, None);
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].servers, 1.0);
        assert_eq!(config.stages[0].priority()?, Priority::NORMAL);
        assert_eq!(config.stages[1].servers, 2.0);
        assert_eq!(u8::from(config.stages[1].priority()?), 7);
        let experiment = config.experiment()?;
        assert_eq!(experiment.replications(), 3);
        assert_eq!(experiment.replication(0).warmup_time(), Time::from(10.0));
        assert_eq!(experiment.replication(0).end_time(), Time::from(100.0));
        Ok(())
    }

    #[test]
    fn test_bundled_config() -> eyre::Result<()> {
        let config =
            NetworkConfig::from_reader(include_str!("../configs/clinic.json").as_bytes())?;
        assert_eq!(config.stages.len(), 3);
        assert_eq!(config.experiment()?.replications(), 10);
        Ok(())
    }

    #[test]
    fn test_defaults() -> eyre::Result<()> {
        let config = NetworkConfig::from_reader(
            r#"{
                "run_length": 5,
                "arrivals": { "interarrival": { "type": "constant", "value": 1 } },
                "stages": [{ "name": "s", "service": { "type": "constant", "value": 1 } }]
            }"#
            .as_bytes(),
        )?;
        assert_eq!(config.name, "qnsim");
        assert_eq!(config.replications, 1);
        assert_eq!(config.formalism, FormalismConfig::EventDriven);
        assert_eq!(config.mode, ReplicationMode::SteadyState);
        assert!(!config.pause_on_error);
        Ok(())
    }

    #[rstest(
        distribution,
        case(DistributionConfig::Exponential { rate: 0.0 }),
        case(DistributionConfig::Exponential { rate: f64::INFINITY }),
        case(DistributionConfig::Uniform { low: 2.0, high: 2.0 }),
        case(DistributionConfig::Uniform { low: -1.0, high: 2.0 }),
        case(DistributionConfig::Normal { mean: 1.0, std_dev: -1.0 }),
        case(DistributionConfig::Normal { mean: f64::NAN, std_dev: 1.0 }),
        case(DistributionConfig::Constant { value: -1.0 })
    )]
    fn test_invalid_distribution(distribution: DistributionConfig) {
        assert!(matches!(
            distribution.sampler("service"),
            Err(ConfigError::InvalidDistribution { name, .. }) if name == "service"
        ));
    }

    fn with_stages(stages: &str) -> String {
        format!(
            r#"{{
                "run_length": 5,
                "arrivals": {{ "interarrival": {{ "type": "constant", "value": 1 }} }},
                "stages": {}
            }}"#,
            stages
        )
    }

    #[test]
    fn test_invalid_stages() {
        let parse = |stages: &str| NetworkConfig::from_reader(with_stages(stages).as_bytes());
        assert!(matches!(parse("[]"), Err(ConfigError::NoStages)));
        assert!(matches!(
            parse(
                r#"[{ "name": "a", "service": { "type": "constant", "value": 1 } },
                    { "name": "a", "service": { "type": "constant", "value": 1 } }]"#
            ),
            Err(ConfigError::DuplicateStage(name)) if name == "a"
        ));
        assert!(matches!(
            parse(r#"[{ "name": "a", "servers": 0, "service": { "type": "constant", "value": 1 } }]"#),
            Err(ConfigError::InvalidServers { .. })
        ));
        assert!(matches!(
            parse(r#"[{ "name": "a", "priority": 11, "service": { "type": "constant", "value": 1 } }]"#),
            Err(ConfigError::InvalidPriority { priority: 11, .. })
        ));
        assert!(matches!(
            parse(r#"[{ "name": "a", "service": { "type": "gamma", "shape": 1 } }]"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_invalid_replication() {
        let config = NetworkConfig::from_reader(
            r#"{
                "run_length": 5,
                "warmup": 10,
                "arrivals": { "interarrival": { "type": "constant", "value": 1 } },
                "stages": [{ "name": "s", "service": { "type": "constant", "value": 1 } }]
            }"#
            .as_bytes(),
        );
        assert!(matches!(config, Err(ConfigError::Kernel(_))));
    }

    #[quickcheck]
    fn samples_are_non_negative(seed: u64, mean: i8, std_dev: u8) -> bool {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = DistributionConfig::Normal {
            mean: f64::from(mean),
            std_dev: f64::from(std_dev),
        };
        let uniform = DistributionConfig::Uniform {
            low: 0.0,
            high: f64::from(std_dev) + 1.0,
        };
        let (normal, uniform) = match (normal.sampler("n"), uniform.sampler("u")) {
            (Ok(normal), Ok(uniform)) => (normal, uniform),
            _ => return false,
        };
        (0..20).all(|_| {
            let u = uniform.sample(&mut rng);
            normal.sample(&mut rng) >= 0.0 && u >= 0.0 && u < f64::from(std_dev) + 1.0
        })
    }
}
