pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::{PipelineSettings, TomlConfig};

pub use adapters::{MemoryConnector, MemoryStore, MySqlConnector, MySqlStore};
pub use core::{etl::EtlEngine, pipeline::StreamingPipeline};
pub use domain::model::{ConnectionParams, PaymentRow, RunResult, RunStatus};
pub use utils::error::{EtlError, Result};
