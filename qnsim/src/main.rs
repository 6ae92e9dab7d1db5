//! Tandem queueing line simulation application.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use clap::Parser;
use eyre::WrapErr;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;

use qnsim::{summary_rows, write_from_channel, write_summary, NetworkConfig, TandemLine};

/// Runs replications of a tandem queueing line.
#[derive(Parser)]
#[clap(version, author)]
struct Opt {
    /// Path to a JSON file describing the line and the experiment.
    config: PathBuf,

    /// Output CSV file with one row per replication and stage.
    #[clap(short, long, default_value = "summary.csv")]
    output: PathBuf,

    /// Write all notifications to this CSV file.
    #[clap(long)]
    trace: Option<PathBuf>,

    /// Override the number of replications.
    #[clap(short, long)]
    replications: Option<usize>,

    /// Override the base seed.
    #[clap(short, long)]
    seed: Option<u64>,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,

    /// Do not display the progress bar.
    #[clap(long)]
    no_progress: bool,
}

impl Opt {
    fn network(&self) -> eyre::Result<NetworkConfig> {
        let file = File::open(&self.config).wrap_err_with(|| {
            format!("unable to open configuration: {}", self.config.display())
        })?;
        let mut config =
            NetworkConfig::from_reader(io::BufReader::new(file)).wrap_err("invalid configuration")?;
        if let Some(replications) = self.replications {
            config.replications = replications;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn level_filter(verbose: i32) -> log::LevelFilter {
    match verbose {
        v if v <= 0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Wall-clock time, level and emitting module of a log line.
fn log_prefix(now: SystemTime, record: &log::Record<'_>) -> String {
    format!(
        "{} {:<5} {}:",
        humantime::format_rfc3339_seconds(now),
        record.level(),
        record.target()
    )
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("{} {}", log_prefix(SystemTime::now(), record), message))
        })
        .level(level_filter(opt.verbose));
    let dispatch = if let Some(path) = &opt.log_output {
        let _ = std::fs::remove_file(path);
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(false)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn progress_bar(opt: &Opt, len: usize) -> ProgressBar {
    if opt.no_progress {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(len as u64)
            .with_style(ProgressStyle::default_bar().template("{msg} {wide_bar} {pos}/{len}"))
    }
}

fn run(opt: &Opt) -> eyre::Result<()> {
    let config = Arc::new(opt.network()?);
    let experiment = config.experiment()?;
    log::info!(
        "{}: {} replications of {} stages ({})",
        config.name,
        config.replications,
        config.stages.len(),
        config.stages.iter().map(|stage| stage.name.as_str()).join(" -> ")
    );

    let mut summary = csv::Writer::from_writer(
        File::create(&opt.output)
            .wrap_err_with(|| format!("unable to create {}", opt.output.display()))?,
    );
    let trace = match &opt.trace {
        Some(path) => {
            let file = File::create(path)
                .wrap_err_with(|| format!("unable to create {}", path.display()))?;
            let (sender, receiver) = std::sync::mpsc::channel();
            Some((sender, write_from_channel(io::BufWriter::new(file), receiver)))
        }
        None => None,
    };

    let started = Instant::now();
    let pb = progress_bar(opt, experiment.replications());
    for index in 0..experiment.replications() {
        pb.set_message(&format!("[replication {}]", index));
        let mut line = TandemLine::new(Arc::clone(&config), index);
        if let Some((sender, _)) = &trace {
            line = line.trace(sender.clone());
        }
        let outcome = experiment.run_one(index, line)?;
        log::info!(
            "replication {} ended at {} in state {} after {} events",
            index,
            outcome.end_time,
            outcome.state,
            outcome.executed
        );
        write_summary(&mut summary, &summary_rows(&outcome))?;
        pb.inc(1);
    }
    pb.finish();

    if let Some((sender, writer)) = trace {
        drop(sender);
        writer
            .join()
            .map_err(|_| eyre::eyre!("trace writer panicked"))??;
    }
    log::info!(
        "finished in {}",
        humantime::format_duration(started.elapsed())
    );
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt)?;
    run(&opt)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_log_prefix() {
        let record = log::Record::builder()
            .level(log::Level::Info)
            .target("qnsim::network")
            .build();
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400 + 90);
        assert_eq!(
            log_prefix(now, &record),
            "1970-01-02T00:01:30Z INFO  qnsim::network:"
        );
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(0), log::LevelFilter::Warn);
        assert_eq!(level_filter(1), log::LevelFilter::Info);
        assert_eq!(level_filter(2), log::LevelFilter::Debug);
        assert_eq!(level_filter(7), log::LevelFilter::Trace);
    }
}
