//! Boundary to the Pandora backend.
//!
//! The backend reports failures as free-form messages with an embedded code.
//! [`ErrorCode::classify`] extracts the code once, here, so the rest of the
//! crate only ever matches on the enum.

use std::collections::BTreeMap;
use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::SchemaEntry;

/// Backend error codes the write path reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `E18102`: the pipeline repo does not exist.
    RepoNotExist,
    /// `E18111`: the submitted data does not match the repo schema.
    SchemaMismatch,
    /// `E18301`: the export already exists.
    ExportExists,
    /// `E6302`: the TSDB series already exists.
    SeriesExists,
    /// `E7101`: the TSDB series does not exist.
    SeriesNotExist,
    /// Points were rejected because a field changed type.
    FieldTypeConflict,
}

impl ErrorCode {
    const MARKERS: [(&'static str, ErrorCode); 6] = [
        ("E18102", ErrorCode::RepoNotExist),
        ("E18111", ErrorCode::SchemaMismatch),
        ("E18301", ErrorCode::ExportExists),
        ("E6302", ErrorCode::SeriesExists),
        ("E7101", ErrorCode::SeriesNotExist),
        ("field type conflict", ErrorCode::FieldTypeConflict),
    ];

    #[must_use]
    pub fn classify(message: &str) -> Option<Self> {
        Self::MARKERS
            .iter()
            .find(|(marker, _)| message.contains(marker))
            .map(|(_, code)| *code)
    }
}

/// Failure reported by (or while reaching) the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    pub code: Option<ErrorCode>,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
    pub message: String,
}

impl ApiError {
    /// Error carrying a backend message; the code is extracted from it.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();

        ApiError { code: ErrorCode::classify(&message), status: None, message }
    }

    /// Network, timeout or decoding failure. Never carries a code.
    pub fn transport(err: impl Display) -> Self {
        ApiError { code: None, status: None, message: format!("Transport; err={err}") }
    }

    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == Some(code)
    }
}

/// Routing of one series from the pipeline repo into the TSDB repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSpec {
    pub dest_repo_name: String,
    pub series_name: String,
    /// Field reference holding the point timestamp.
    pub timestamp: String,
    /// Tag key to field reference (`#<series>_<tag>`).
    pub tags: BTreeMap<String, String>,
    /// Field key to field reference (`#<series>_<field>`).
    pub fields: BTreeMap<String, String>,
}

/// Pipeline (data ingestion + schema + export) API.
#[async_trait]
pub trait PipelineApi: Send + Sync {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError>;

    async fn get_repo(&self, repo: &str) -> Result<Vec<SchemaEntry>, ApiError>;

    async fn create_repo(
        &self,
        repo: &str,
        region: &str,
        schema: &[SchemaEntry],
    ) -> Result<(), ApiError>;

    async fn update_repo(&self, repo: &str, schema: &[SchemaEntry]) -> Result<(), ApiError>;

    async fn create_export(&self, repo: &str, name: &str, spec: &ExportSpec)
        -> Result<(), ApiError>;

    async fn update_export(&self, repo: &str, name: &str, spec: &ExportSpec)
        -> Result<(), ApiError>;
}

/// Time-series database API.
#[async_trait]
pub trait TsdbApi: Send + Sync {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError>;

    async fn create_repo(&self, repo: &str, region: &str) -> Result<(), ApiError>;

    /// `retention` of `None` leaves the backend default in place.
    async fn create_series(
        &self,
        repo: &str,
        series: &str,
        retention: Option<&str>,
    ) -> Result<(), ApiError>;
}
