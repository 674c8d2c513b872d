//! ChartHarvest Runner: the concurrent harvest engine.
//!
//! Builds on `chartharvest-core` to run one harvest:
//! - Acquire one exclusively owned session per worker
//! - Authenticate every session behind a count-down latch
//! - Run each worker over its date slice, writing through a shared sink
//! - Release every session, whatever happened

pub mod cancel;
pub mod config;
pub mod harvest;
pub mod latch;
pub mod login;
pub mod pool;
pub mod worker;

use chartharvest_core::{PartitionError, SessionError, SinkError};
use thiserror::Error;

pub use cancel::CancelToken;
pub use config::{ConfigError, RunConfig, RunSection, SessionSection};
pub use harvest::{run_harvest, HarvestPlan, RunSummary};
pub use latch::{Arrival, CountDownLatch};
pub use login::{LoginCoordinator, SessionOutcome};
pub use pool::{Session, SessionPool, SessionState};
pub use worker::{DateFailure, FailureReason, HarvestWorker, SliceOutcome, SliceReport};

/// Errors that abort a whole run. Everything narrower is reported, not raised.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("failed to construct session {index}: {source}")]
    SessionConstruction {
        index: usize,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Partition(#[from] PartitionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("reset destination: {0}")]
    Sink(#[from] SinkError),

    #[error("all_regions requires a region registry")]
    MissingRegistry,
}
