use std::sync::{Arc, Mutex};

use float_cmp::approx_eq;
use ordered_float::OrderedFloat;
use rand::distributions::Distribution;
use rand_distr::Exp;
use rstest::rstest;
use simkernel::flow::{Constant, Delay, Destination, Destroy, Generator, Release, Seize};
use simkernel::{
    Experiment, Formalism, Model, Notification, NotificationKind, Payload, Replication,
    ReplicationMode, Resource, RunState, Simulator,
};
use testing::Cycle;

type Time = OrderedFloat<f64>;

/// Single-server line: Generator -> Seize -> Delay -> Release -> Destroy.
struct Line<I, S> {
    interarrival: Option<I>,
    service: Option<S>,
    max_number: Option<u64>,
    reset_on_warmup: bool,
    sink: Arc<Destroy>,
    queue_lengths: Arc<Mutex<Vec<usize>>>,
}

impl<I, S> Line<I, S> {
    fn new(interarrival: I, service: S) -> Self {
        Self {
            interarrival: Some(interarrival),
            service: Some(service),
            max_number: None,
            reset_on_warmup: false,
            sink: Arc::new(Destroy::new("exit")),
            queue_lengths: Arc::default(),
        }
    }
}

impl<I, S> Model<Time> for Line<I, S>
where
    I: Distribution<f64> + Send + Sync + 'static,
    S: Distribution<f64> + Send + Sync + 'static,
{
    fn construct(&mut self, sim: &Simulator<Time>) -> eyre::Result<()> {
        let interarrival = self
            .interarrival
            .take()
            .ok_or_else(|| eyre::eyre!("line constructed twice"))?;
        let service = self
            .service
            .take()
            .ok_or_else(|| eyre::eyre!("line constructed twice"))?;
        let server = Resource::new(sim, "server", 1.0)?;
        let sink: Destination<Time> = self.sink.clone();
        let release: Destination<Time> =
            Arc::new(Release::new("release", server.clone(), 1.0).then(sink));
        let delay: Destination<Time> = Arc::new(Delay::new("service", service, release));
        let seize: Destination<Time> = Arc::new(Seize::new("seize", server, 1.0, delay));
        let mut generator = Generator::new("arrivals", interarrival, seize);
        if let Some(max) = self.max_number {
            generator = generator.max_number(max);
        }
        Arc::new(generator).start(sim)?;

        let lengths = Arc::clone(&self.queue_lengths);
        sim.subscribe_to(
            &[NotificationKind::QueueLengthChanged],
            move |n: &Notification<Time>| {
                if let Payload::QueueLength { length, .. } = n.payload {
                    lengths.lock().unwrap().push(length);
                }
            },
        );
        if self.reset_on_warmup {
            let sink = Arc::clone(&self.sink);
            sim.subscribe_to(&[NotificationKind::Warmup], move |_: &Notification<Time>| {
                sink.reset()
            });
        }
        Ok(())
    }
}

fn run(mode: ReplicationMode, warmup: f64) -> eyre::Result<(Simulator<Time>, Line<Cycle<f64>, Constant<f64>>)> {
    let mut line = Line::new(Cycle::new(vec![1.0]), Constant(1.5));
    line.max_number = Some(3);
    line.reset_on_warmup = true;
    let sim = Simulator::new("line", Formalism::EventDriven)?;
    sim.initialize(
        Replication::new(OrderedFloat(0.0), warmup, 100.0)?.mode(mode),
        &mut line,
    )?;
    assert_eq!(sim.start()?, RunState::Ended);
    Ok((sim, line))
}

#[test]
fn test_single_server_line() -> eyre::Result<()> {
    let (sim, line) = run(ReplicationMode::Terminating, 0.0)?;
    assert_eq!(sim.now(), OrderedFloat(4.5));
    assert_eq!(line.sink.count(), 3);
    assert!(approx_eq!(f64, line.sink.total_time_in_system(), 6.0, epsilon = 1e-9));
    assert!(approx_eq!(
        f64,
        line.sink.mean_time_in_system().unwrap(),
        2.0,
        epsilon = 1e-9
    ));
    assert_eq!(*line.queue_lengths.lock().unwrap(), vec![1, 0, 1, 0]);
    Ok(())
}

#[test]
fn test_warmup_resets_statistics() -> eyre::Result<()> {
    let (_, line) = run(ReplicationMode::SteadyState, 2.0)?;
    assert_eq!(line.sink.count(), 2);
    assert!(approx_eq!(f64, line.sink.total_time_in_system(), 4.5, epsilon = 1e-9));
    Ok(())
}

fn experiment(seed: u64) -> eyre::Result<Vec<(u64, f64)>> {
    let template = Replication::new(OrderedFloat(0.0), 0.0, 200.0)?;
    let outcomes = Experiment::new("mm1", Formalism::EventDriven, template, 2)?
        .base_seed(seed)
        .run(|_| Line::new(Exp::new(1.0).unwrap(), Exp::new(1.25).unwrap()))?;
    Ok(outcomes
        .iter()
        .map(|o| (o.model.sink.count(), o.model.sink.total_time_in_system()))
        .collect())
}

#[rstest(seed, case(1), case(2021))]
fn test_experiments_are_reproducible(seed: u64) -> eyre::Result<()> {
    let first = experiment(seed)?;
    assert_eq!(first, experiment(seed)?);
    assert_ne!(first[0], first[1]);
    assert!(first.iter().all(|(count, _)| *count > 100));
    Ok(())
}
