//! Metrics outputs for the Pandora pipeline and TSDB backends.
//!
//! Two outputs share the same primitives:
//!
//! * [`PipelineOutput`] writes tab-separated records into a pipeline repo and,
//!   when allowed, provisions the repo schema and per-series exports into the
//!   TSDB repo of the same name.
//! * [`TsdbOutput`] writes line protocol straight into a TSDB repo and, when
//!   allowed, creates missing series.
//!
//! Neither output retries. A batch the backend cannot accept because of a
//! recoverable condition is dropped after provisioning; the next batch is
//! expected to go through.

pub mod client;
pub mod config;
pub mod forwarder;
pub mod http;
pub mod line_protocol;
mod pipeline;
mod point;
pub mod reconcile;
pub mod record;
pub mod registry;
pub mod schema;
pub mod submit;
mod tsdb;

pub use pipeline::{PipelineOutput, PIPELINE_SAMPLE_CONFIG};
pub use point::{FieldValue, Point};
pub use tokio_util::sync::CancellationToken;
pub use tsdb::{TsdbOutput, TSDB_SAMPLE_CONFIG};

use thiserror::Error;

use crate::client::ApiError;
use crate::config::ConfigError;
use crate::reconcile::ReconcileError;

/// Possible failure while encoding a batch.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The written buffer does not match its predicted size.
    #[error("Buffer size mismatch; expected={expected}; actual={actual}")]
    SizeMismatch { expected: usize, actual: usize },
    /// A record line could not be parsed back.
    #[error("Malformed record; line={0:?}")]
    MalformedRecord(String),
}

/// Possible failure of an output operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Config; err={0}")]
    Config(#[from] ConfigError),
    #[error("Output not connected")]
    NotConnected,
    #[error("Encoding; err={0}")]
    Encoding(#[from] EncodingError),
    #[error("Backend; err={0}")]
    Backend(#[from] ApiError),
    #[error("Reconcile; err={0}")]
    Reconcile(#[from] ReconcileError),
    #[error("Build http client; err={0}")]
    Client(#[from] reqwest::Error),
    #[error("Spawn thread; err={0}")]
    SpawnThread(#[from] std::io::Error),
}
