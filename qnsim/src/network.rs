use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use ordered_float::OrderedFloat;
use simkernel::flow::{Constant, Delay, Destination, Destroy, Generator, Release, Seize};
use simkernel::{Model, Notification, NotificationKind, Resource, Simulator};

use crate::{NetworkConfig, ResourceSummary, Sampler, Statistics, Time, TraceRecord};

type Arrivals = Generator<Time, Sampler, Constant<u64>>;

/// Model of a tandem line: arrivals, then each stage in turn, then the exit.
///
/// A fresh line is needed for each replication.
pub struct TandemLine {
    config: Arc<NetworkConfig>,
    replication: usize,
    statistics: Arc<Statistics>,
    exit: Arc<Destroy>,
    arrivals: Option<Arc<Arrivals>>,
    trace: Option<Sender<TraceRecord>>,
}

impl TandemLine {
    /// Creates the line for the replication with the given index.
    #[must_use]
    pub fn new(config: Arc<NetworkConfig>, replication: usize) -> Self {
        Self {
            config,
            replication,
            statistics: Arc::default(),
            exit: Arc::new(Destroy::new("exit")),
            arrivals: None,
            trace: None,
        }
    }

    /// Sends every notification of the replication to `sender`, until the run stops or ends.
    #[must_use]
    pub fn trace(mut self, sender: Sender<TraceRecord>) -> Self {
        self.trace = Some(sender);
        self
    }

    /// Number of entities that entered the line.
    #[must_use]
    pub fn generated(&self) -> u64 {
        self.arrivals.as_ref().map_or(0, |arrivals| arrivals.generated())
    }

    /// Number of entities that left the line since the warm-up.
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.exit.count()
    }

    /// Mean time entities spent in the line, measured on those that left after the warm-up.
    #[must_use]
    pub fn mean_time_in_system(&self) -> Option<f64> {
        self.exit.mean_time_in_system()
    }

    /// Per-stage resource statistics, with the window closed at `until`.
    #[must_use]
    pub fn resources(&self, until: Time) -> Vec<ResourceSummary> {
        self.statistics.summary(until)
    }
}

impl Model<Time> for TandemLine {
    fn construct(&mut self, simulator: &Simulator<Time>) -> eyre::Result<()> {
        let now = simulator.now();
        let mut next: Destination<Time> = self.exit.clone();
        for stage in self.config.stages.iter().rev() {
            let resource = Resource::new(simulator, stage.name.as_str(), stage.servers)?;
            self.statistics.track(&stage.name, now);
            let release = Release::new(format!("{}/release", stage.name), resource.clone(), 1.0)
                .then(next);
            let service = Delay::new(
                format!("{}/service", stage.name),
                stage.service.sampler(&stage.name)?,
                Arc::new(release),
            )
            .stream(stage.name.as_str());
            next = Arc::new(
                Seize::new(
                    format!("{}/seize", stage.name),
                    resource,
                    1.0,
                    Arc::new(service),
                )
                .priority(stage.priority()?),
            );
        }

        let config = &self.config.arrivals;
        let mut arrivals = Generator::new(
            "arrivals",
            config.interarrival.sampler("interarrival")?,
            next,
        )
        .batch_size(Constant(config.batch_size));
        if let Some(max) = config.max_number {
            arrivals = arrivals.max_number(max);
        }
        if let Some(start) = config.start {
            arrivals = arrivals.start_time(OrderedFloat(start));
        }
        let arrivals = Arc::new(arrivals);
        Arc::clone(&arrivals).start(simulator)?;
        self.arrivals = Some(arrivals);

        let statistics = Arc::clone(&self.statistics);
        simulator.subscribe_to(&Statistics::kinds(), move |n: &Notification<Time>| {
            statistics.record(n)
        });
        let exit = Arc::clone(&self.exit);
        simulator.subscribe_to(&[NotificationKind::Warmup], move |_: &Notification<Time>| {
            exit.reset()
        });
        if let Some(sender) = self.trace.take() {
            let replication = self.replication;
            let sender = Mutex::new(Some(sender));
            // The sender is dropped once the run is over so that the trace writer can finish
            // even if the simulator outlives the replication.
            simulator.subscribe(move |n: &Notification<Time>| {
                let mut sender = sender.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(tx) = sender.as_ref() {
                    let _ = tx.send(TraceRecord::new(replication, n));
                }
                if matches!(
                    n.kind,
                    NotificationKind::RunStopped | NotificationKind::ReplicationEnded
                ) {
                    *sender = None;
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ArrivalConfig, DistributionConfig, FormalismConfig, StageConfig};
    use float_cmp::approx_eq;
    use rstest::{fixture, rstest};
    use simkernel::{ReplicationMode, RunState};
    use std::sync::mpsc::channel;

    fn stage(name: &str, servers: f64, service: f64) -> StageConfig {
        StageConfig {
            name: name.to_string(),
            servers,
            service: DistributionConfig::Constant { value: service },
            priority: None,
        }
    }

    #[fixture]
    fn config() -> NetworkConfig {
        NetworkConfig {
            name: String::from("line"),
            replications: 1,
            seed: 0,
            start: 0.0,
            warmup: 0.0,
            run_length: 100.0,
            mode: ReplicationMode::Terminating,
            formalism: FormalismConfig::EventDriven,
            pause_on_error: false,
            arrivals: ArrivalConfig {
                interarrival: DistributionConfig::Constant { value: 1.0 },
                batch_size: 1,
                max_number: Some(3),
                start: None,
            },
            stages: vec![stage("desk", 1.0, 1.5)],
        }
    }

    fn run(config: NetworkConfig) -> eyre::Result<(Simulator<Time>, TandemLine)> {
        let config = Arc::new(config);
        let experiment = config.experiment()?;
        let mut line = TandemLine::new(Arc::clone(&config), 0);
        let simulator = experiment.simulator(0)?;
        simulator.initialize(experiment.replication(0), &mut line)?;
        simulator.start()?;
        Ok((simulator, line))
    }

    #[rstest]
    fn test_single_stage(config: NetworkConfig) -> eyre::Result<()> {
        let (simulator, line) = run(config)?;
        assert_eq!(simulator.state(), RunState::Ended);
        assert_eq!(simulator.now(), OrderedFloat(4.5));
        assert_eq!(line.generated(), 3);
        assert_eq!(line.completed(), 3);
        assert!(approx_eq!(f64, line.mean_time_in_system().unwrap(), 2.0, epsilon = 1e-9));
        let desk = &line.resources(simulator.now())[0];
        assert_eq!(desk.resource, "desk");
        assert!(approx_eq!(f64, desk.utilization.unwrap(), 1.0, epsilon = 1e-9));
        assert!(approx_eq!(f64, desk.mean_queue_length.unwrap(), 1.5 / 4.5, epsilon = 1e-9));
        assert_eq!(desk.max_queue_length, 1);
        Ok(())
    }

    #[rstest]
    fn test_two_stages(config: NetworkConfig) -> eyre::Result<()> {
        let mut config = config;
        config.stages = vec![stage("desk", 1.0, 0.5), stage("lab", 2.0, 3.0)];
        let (simulator, line) = run(config)?;
        // Entities leave the desk at 0.5, 1.5 and 2.5; the lab has two servers, so the
        // third one waits until the first is done at 3.5.
        assert_eq!(simulator.now(), OrderedFloat(6.5));
        assert_eq!(line.completed(), 3);
        assert!(approx_eq!(
            f64,
            line.mean_time_in_system().unwrap(),
            (3.5 + 3.5 + 4.5) / 3.0,
            epsilon = 1e-9
        ));
        let resources = line.resources(simulator.now());
        assert_eq!(resources[1].resource, "lab");
        assert_eq!(resources[1].max_queue_length, 1);
        Ok(())
    }

    #[rstest]
    fn test_warmup(config: NetworkConfig) -> eyre::Result<()> {
        let mut config = config;
        config.mode = ReplicationMode::SteadyState;
        config.warmup = 2.0;
        let (_, line) = run(config)?;
        assert_eq!(line.generated(), 3);
        assert_eq!(line.completed(), 2);
        Ok(())
    }

    #[rstest]
    fn test_trace(config: NetworkConfig) -> eyre::Result<()> {
        let (sender, receiver) = channel();
        let config = Arc::new(config);
        let experiment = config.experiment()?;
        let line = TandemLine::new(Arc::clone(&config), 0).trace(sender);
        experiment.run_one(0, line)?;
        let records: Vec<_> = receiver.try_iter().collect();
        assert_eq!(
            records.first().map(|r| r.kind),
            Some(NotificationKind::RunStarted)
        );
        assert_eq!(
            records.last().map(|r| r.kind),
            Some(NotificationKind::ReplicationEnded)
        );
        assert_eq!(
            records
                .iter()
                .filter(|r| r.kind == NotificationKind::QueueLengthChanged)
                .map(|r| r.detail.as_str())
                .collect::<Vec<_>>(),
            vec!["desk 1", "desk 0", "desk 1", "desk 0"]
        );
        assert!(records.iter().all(|r| r.replication == 0));
        Ok(())
    }

    #[rstest]
    fn test_replications_are_reproducible(config: NetworkConfig) -> eyre::Result<()> {
        let mut config = config;
        config.replications = 2;
        config.seed = 5;
        config.arrivals.interarrival = DistributionConfig::Exponential { rate: 1.0 };
        config.arrivals.max_number = None;
        config.stages = vec![StageConfig {
            service: DistributionConfig::Uniform { low: 0.2, high: 1.4 },
            ..stage("desk", 1.0, 0.0)
        }];
        let config = Arc::new(config);
        let experiment = config.experiment()?;
        let summarize = || -> eyre::Result<Vec<(u64, u64)>> {
            Ok(experiment
                .run(|index| TandemLine::new(Arc::clone(&config), index))?
                .iter()
                .map(|o| (o.model.generated(), o.model.completed()))
                .collect())
        };
        let first = summarize()?;
        assert_eq!(first, summarize()?);
        assert_ne!(first[0], first[1]);
        Ok(())
    }
}
