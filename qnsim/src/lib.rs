#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::default_trait_access,
    clippy::missing_errors_doc
)]

//! Tandem queueing line simulation built on [`simkernel`].
//!
//! Entities arrive according to a configured process, pass through a sequence of stages,
//! each served by a pool of identical servers, and leave the system. Each stage holds one
//! unit of its resource for the duration of the service.

use ordered_float::OrderedFloat;

mod config;
pub use config::{
    ArrivalConfig, ConfigError, DistributionConfig, FormalismConfig, NetworkConfig, Sampler,
    StageConfig,
};

mod network;
pub use network::TandemLine;

mod stats;
pub use stats::{ResourceSummary, Statistics, TimeWeighted};

mod report;
pub use report::{summary_rows, write_summary, SummaryRow};

mod trace;
pub use trace::{write_from_channel, TraceRecord};

/// Simulation time used by the line: model units as a totally ordered float.
pub type Time = OrderedFloat<f64>;
