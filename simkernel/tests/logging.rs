use simkernel::{Formalism, Priority, Replication, RunState, Simulator};
use testing::logger;

#[test]
fn test_failures_are_logged() -> anyhow::Result<()> {
    logger::LoggerBuilder::default()
        .level(log::LevelFilter::Info)
        .target("simkernel")
        .init()?;
    let sim = Simulator::<i64>::new("logged", Formalism::EventDriven)?;
    sim.initialize(
        Replication::new(0, 0, 10)?,
        &mut |sim: &Simulator<i64>| -> eyre::Result<()> {
            sim.schedule(1, Priority::NORMAL, |_| Err(eyre::eyre!("boom")))?;
            Ok(())
        },
    )?;
    assert_eq!(sim.start()?, RunState::Ended);
    let logs = logger::clear()?;
    assert_eq!(logs.len(), 3);
    assert_eq!(
        logs[0],
        "[INFO]  logged: initializing replication 0 (seed 0) from 0 to 10"
    );
    assert!(logs[1].starts_with("[ERROR] logged: event 0 at 1 with priority 5 ("));
    assert!(logs[1].ends_with(") failed: boom"));
    assert_eq!(
        logs[2],
        "[INFO]  logged: replication ended at 1 after 1 events"
    );
    log::warn!("outside of the kernel");
    assert!(logger::clear()?.is_empty());
    Ok(())
}
