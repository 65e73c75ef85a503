pub mod config;
pub mod error;
pub mod db;
pub mod model;
pub mod source;
pub mod resolve;
pub mod bridge;
pub mod graph;
pub mod pipeline;

pub use config::Config;
pub use error::{PlaygraphError, Result};
pub use pipeline::{Phase, PhaseSummary, Pipeline, RunReport};
pub use resolve::{EntityResolver, RawIdentity};
