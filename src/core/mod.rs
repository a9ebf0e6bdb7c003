pub mod batcher;
pub mod committer;
pub mod etl;
pub mod pipeline;
pub mod progress;
pub mod source;
pub mod transform;

pub use crate::domain::model::{Batch, PaymentRow, RawRecord, RunResult, RunState};
pub use crate::domain::ports::{ConfigProvider, PaymentStore, ProgressReporter, StoreConnector};
pub use crate::utils::error::Result;
