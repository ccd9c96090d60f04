pub mod cli;
pub mod config;
pub mod corpus;
pub mod decoder;
pub mod error;
pub mod metric;
mod metrics;
pub mod partition;
pub mod pipeline;
pub mod pixel;
pub mod record;
pub mod sampler;
pub mod shard;
pub mod utils;

pub use config::Opts;
pub use pipeline::{JobPhase, JobReport, RankingConfig, RankingPipeline};
