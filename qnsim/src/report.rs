use std::io;

use serde::Serialize;
use simkernel::{ReplicationOutcome, RunState};

use crate::{TandemLine, Time};

/// One row of the summary file: a stage of the line in one replication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    /// Replication index.
    pub replication: usize,
    /// Replication seed.
    pub seed: u64,
    /// State the replication finished in.
    pub state: RunState,
    /// Simulation time at the end.
    pub end_time: f64,
    /// Number of executed events.
    pub executed_events: u64,
    /// Entities that entered the line.
    pub generated: u64,
    /// Entities that left the line after the warm-up.
    pub completed: u64,
    /// Mean time in the line of completed entities.
    pub mean_time_in_system: Option<f64>,
    /// Stage name.
    pub stage: String,
    /// Mean fraction of servers busy.
    pub utilization: Option<f64>,
    /// Mean number of entities waiting for a server.
    pub mean_queue_length: Option<f64>,
    /// Maximum number of entities waiting for a server.
    pub max_queue_length: usize,
}

/// Flattens the outcome of a replication into one row per stage.
#[must_use]
pub fn summary_rows(outcome: &ReplicationOutcome<Time, TandemLine>) -> Vec<SummaryRow> {
    let line = &outcome.model;
    line.resources(outcome.end_time)
        .into_iter()
        .map(|resource| SummaryRow {
            replication: outcome.index,
            seed: outcome.seed,
            state: outcome.state,
            end_time: outcome.end_time.into_inner(),
            executed_events: outcome.executed,
            generated: line.generated(),
            completed: line.completed(),
            mean_time_in_system: line.mean_time_in_system(),
            stage: resource.resource,
            utilization: resource.utilization,
            mean_queue_length: resource.mean_queue_length,
            max_queue_length: resource.max_queue_length,
        })
        .collect()
}

/// Appends `rows` to the summary.
pub fn write_summary<W: io::Write>(
    writer: &mut csv::Writer<W>,
    rows: &[SummaryRow],
) -> csv::Result<()> {
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::NetworkConfig;
    use std::sync::Arc;

    const CONFIG: &str = r#"{
        "replications": 2,
        "run_length": 10,
        "mode": "terminating",
        "arrivals": {
            "interarrival": { "type": "constant", "value": 2 },
            "max_number": 2
        },
        "stages": [
            { "name": "a", "service": { "type": "constant", "value": 1 } },
            { "name": "b", "service": { "type": "constant", "value": 1 } }
        ]
    }"#;

    #[test]
    fn test_summary() -> eyre::Result<()> {
        let config = Arc::new(NetworkConfig::from_reader(CONFIG.as_bytes())?);
        let experiment = config.experiment()?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        for index in 0..experiment.replications() {
            let outcome = experiment.run_one(index, TandemLine::new(Arc::clone(&config), index))?;
            let rows = summary_rows(&outcome);
            assert_eq!(
                rows.iter().map(|r| r.stage.as_str()).collect::<Vec<_>>(),
                vec!["a", "b"]
            );
            assert!(rows.iter().all(|r| r.completed == 2 && r.end_time == 4.0));
            write_summary(&mut writer, &rows)?;
        }
        let written = writer
            .into_inner()
            .map_err(|err| eyre::eyre!("{}", err.error()))?;
        let written = String::from_utf8(written)?;
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(
            lines[0],
            "replication,seed,state,end_time,executed_events,generated,completed,\
             mean_time_in_system,stage,utilization,mean_queue_length,max_queue_length"
        );
        assert!(lines[1].starts_with("0,"));
        assert!(lines[1].contains(",ENDED,4.0,"));
        assert!(lines[4].starts_with("1,"));
        assert!(lines[4].ends_with(",b,0.5,0.0,0"));
        Ok(())
    }
}
