//! Best-effort provisioning of pipeline repos, TSDB series and exports.
//!
//! Nothing here keeps state between calls: every invocation re-derives the
//! desired objects from the batch and pushes the backend towards them. Repo
//! schemas only ever grow.

use metrics::counter;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::client::{ApiError, ErrorCode, ExportSpec, PipelineApi, TsdbApi};
use crate::record::{namespaced_key, TIMESTAMP_KEY};
use crate::schema::{merge_delta, ExtractedSchema, SeriesKeys};

/// Retention given to series created while routing exports.
pub const EXPORT_SERIES_RETENTION: &str = "7d";

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The TSDB repo backing a freshly created pipeline repo could not be
    /// created.
    #[error("Create tsdb repo; repo={repo}; err={source}")]
    TsdbRepo {
        repo: String,
        #[source]
        source: ApiError,
    },
    #[error("Create export; series={series}; err={source}")]
    Export {
        series: String,
        #[source]
        source: ApiError,
    },
}

#[must_use]
pub fn export_name(series: &str) -> String {
    format!("export_{series}_toTSDB")
}

/// Desired export for `series`; every tag and field is routed from its
/// namespaced pipeline column.
#[must_use]
pub fn export_spec(repo: &str, series: &str, keys: &SeriesKeys) -> ExportSpec {
    let reference = |key: &String| (key.clone(), format!("#{}", namespaced_key(series, key)));

    ExportSpec {
        dest_repo_name: repo.to_string(),
        series_name: series.to_string(),
        timestamp: format!("#{TIMESTAMP_KEY}"),
        tags: keys.tags.iter().map(reference).collect(),
        fields: keys.fields.iter().map(reference).collect(),
    }
}

/// Ensures the TSDB series and the export for `series` exist and match
/// `keys`.
///
/// An existing export is replaced wholesale, never merged.
///
/// # Errors
///
/// Returns [`ReconcileError::Export`] if creating the export fails for any
/// reason other than it already existing.
pub async fn create_or_update_export<P, T>(
    pipeline: &P,
    tsdb: &T,
    repo: &str,
    series: &str,
    keys: &SeriesKeys,
) -> Result<(), ReconcileError>
where
    P: PipelineApi + ?Sized,
    T: TsdbApi + ?Sized,
{
    let result = tsdb
        .create_series(repo, series, Some(EXPORT_SERIES_RETENTION))
        .await;
    record_call("create_series", &result);
    match result {
        Ok(()) => info!(repo, series, "Created series"),
        Err(err) if err.is(ErrorCode::SeriesExists) => {}
        Err(err) => warn!(repo, series, %err, "Create series failed, continuing"),
    }

    let name = export_name(series);
    let spec = export_spec(repo, series, keys);

    let result = pipeline.create_export(repo, &name, &spec).await;
    record_call("create_export", &result);
    match result {
        Ok(()) => {
            info!(repo, export = %name, "Created export");

            Ok(())
        }
        Err(err) if err.is(ErrorCode::ExportExists) => {
            let result = pipeline.update_export(repo, &name, &spec).await;
            record_call("update_export", &result);
            match result {
                Ok(()) => debug!(repo, export = %name, "Updated export"),
                Err(err) => warn!(repo, export = %name, %err, "Update export failed"),
            }

            Ok(())
        }
        Err(source) => Err(ReconcileError::Export { series: series.to_string(), source }),
    }
}

/// Runs [`create_or_update_export`] for every series of the batch.
///
/// Failures are logged per series and do not stop the remaining series.
pub async fn update_exports<P, T>(pipeline: &P, tsdb: &T, repo: &str, extracted: &ExtractedSchema)
where
    P: PipelineApi + ?Sized,
    T: TsdbApi + ?Sized,
{
    for series in &extracted.series {
        let Some(keys) = extracted.per_series.get(series) else {
            continue;
        };

        if let Err(err) = create_or_update_export(pipeline, tsdb, repo, series, keys).await {
            error!(repo, series = series.as_str(), %err, "Export reconciliation failed");
        }
    }
}

/// Brings the pipeline repo schema up to date with the batch, creating the
/// repo (and its TSDB counterpart) when it does not exist yet, then
/// reconciles the exports.
///
/// # Errors
///
/// Only [`ReconcileError::TsdbRepo`] is returned; every other failure is
/// logged.
pub async fn reconcile_schema<P, T>(
    pipeline: &P,
    tsdb: &T,
    repo: &str,
    region: &str,
    extracted: &ExtractedSchema,
) -> Result<(), ReconcileError>
where
    P: PipelineApi + ?Sized,
    T: TsdbApi + ?Sized,
{
    let result = pipeline.get_repo(repo).await;
    record_call("get_repo", &result);
    let (fetched, create_repo) = match result {
        Ok(fetched) => (fetched, false),
        Err(err) if err.is(ErrorCode::RepoNotExist) => (Vec::new(), true),
        Err(err) => {
            error!(repo, %err, "Fetch repo schema failed, skipping reconciliation");

            return Ok(());
        }
    };

    let delta = merge_delta(&fetched, extracted);
    info!(repo, create_repo, fetched = fetched.len(), delta = delta.len(), "Reconciling schema");

    let has_delta = !delta.is_empty();
    let mut schema = fetched;
    schema.extend(delta);

    match create_repo {
        true => {
            let result = pipeline.create_repo(repo, region, &schema).await;
            record_call("create_repo", &result);
            if let Err(err) = result {
                error!(repo, region, %err, "Create pipeline repo failed");

                return Ok(());
            }
            info!(repo, region, "Created pipeline repo");

            let result = tsdb.create_repo(repo, region).await;
            record_call("create_tsdb_repo", &result);
            if let Err(source) = result {
                error!(repo, region, err = %source, "Create tsdb repo failed");

                return Err(ReconcileError::TsdbRepo { repo: repo.to_string(), source });
            }
            info!(repo, region, "Created tsdb repo");
        }
        false if has_delta => {
            let result = pipeline.update_repo(repo, &schema).await;
            record_call("update_repo", &result);
            match result {
                Ok(()) => info!(repo, columns = schema.len(), "Updated repo schema"),
                Err(err) => error!(repo, %err, "Update repo schema failed"),
            }
        }
        false => debug!(repo, "Repo schema already up to date"),
    }

    update_exports(pipeline, tsdb, repo, extracted).await;

    Ok(())
}

fn record_call<T>(call: &'static str, result: &Result<T, ApiError>) {
    let result = match result {
        Ok(_) => "ok",
        Err(_) => "err",
    };

    counter!("pandora_output_reconcile_calls_total", "call" => call, "result" => result)
        .increment(1);
}
