use metrics::counter;
use tracing::{error, warn};

use crate::client::{ApiError, ErrorCode};

/// Which backend a write went to; decides which codes are recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Pipeline,
    Tsdb,
}

/// Classified result of a single write call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    /// Some points conflicted with the existing field types and were dropped
    /// by the backend. Never retried.
    FieldConflict,
    MissingSeries,
    MissingRepo,
    SchemaMismatch,
    Fatal(ApiError),
}

impl WriteOutcome {
    const fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Ok => "ok",
            WriteOutcome::FieldConflict => "field_conflict",
            WriteOutcome::MissingSeries => "missing_series",
            WriteOutcome::MissingRepo => "missing_repo",
            WriteOutcome::SchemaMismatch => "schema_mismatch",
            WriteOutcome::Fatal(_) => "fatal",
        }
    }
}

/// Classifies the result of a write call.
///
/// Every outcome is counted; every non-`Ok` outcome is logged once.
pub fn classify(result: Result<(), ApiError>, variant: Variant, repo: &str) -> WriteOutcome {
    let outcome = match result {
        Ok(()) => WriteOutcome::Ok,
        Err(err) => match (err.code, variant) {
            (Some(ErrorCode::FieldTypeConflict), _) => {
                warn!(repo, %err, "Field type conflict, dropping conflicted points");
                WriteOutcome::FieldConflict
            }
            (Some(ErrorCode::SeriesNotExist), Variant::Tsdb) => {
                warn!(repo, %err, "Series does not exist");
                WriteOutcome::MissingSeries
            }
            (Some(ErrorCode::RepoNotExist), Variant::Pipeline) => {
                warn!(repo, %err, "Repo does not exist");
                WriteOutcome::MissingRepo
            }
            (Some(ErrorCode::SchemaMismatch), Variant::Pipeline) => {
                warn!(repo, %err, "Schema does not match");
                WriteOutcome::SchemaMismatch
            }
            _ => {
                error!(repo, ?variant, %err, "Write failed");
                WriteOutcome::Fatal(err)
            }
        },
    };
    counter!("pandora_output_write_outcomes_total", "outcome" => outcome.label()).increment(1);

    outcome
}
