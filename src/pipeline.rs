use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::client::{PipelineApi, TsdbApi};
use crate::config::{parse_endpoint, PipelineConfig};
use crate::http::{HttpPipelineClient, HttpTsdbClient};
use crate::submit::{self, Variant, WriteOutcome};
use crate::{reconcile, record, schema, Error, Point};

pub const PIPELINE_SAMPLE_CONFIG: &str = r#"
  # Configuration for Pandora Pipeline server to send metrics to
  [[outputs.pipeline]]
  ## Pipeline endpoint (required).
  url = "https://pipeline.qiniu.com"
  ## TSDB endpoint the per-series exports route into.
  # tsdb_url = "https://tsdb.qiniu.com"
  ## The target repo for metrics (required).
  repo = "monitor"
  ## Region used when the repo is created.
  # region = "nb"
  ## Create the repo and grow its schema from newly observed tags and fields.
  auto_create_repo = false
  ## Write timeout, formatted as a string. 0s means no timeout (not
  ## recommended).
  timeout = "5s"
  ## Minimum time between export refresh sweeps. 0s disables the sweep.
  # export_refresh_interval = "60s"
  ak = "ACCESS_KEY"
  sk = "SECRET_KEY"
"#;

enum State<P, T> {
    Unconnected,
    Connected { pipeline: P, tsdb: T },
    Closed,
}

/// Output writing records into a pipeline repo.
///
/// Writes take `&mut self`; a single output never handles two batches at
/// once.
pub struct PipelineOutput<P = HttpPipelineClient, T = HttpTsdbClient> {
    config: PipelineConfig,
    state: State<P, T>,
    refresh: RefreshSchedule,
}

impl PipelineOutput {
    /// Validates the endpoints and builds the HTTP clients.
    ///
    /// # Errors
    ///
    /// Errors if either endpoint is not a valid `http(s)` URL or a client
    /// cannot be built. The output stays unconnected.
    pub fn connect(&mut self) -> Result<(), Error> {
        let url = parse_endpoint(&self.config.url)?;
        let tsdb_url = parse_endpoint(&self.config.tsdb_url)?;

        let pipeline =
            HttpPipelineClient::new(url, &self.config.ak, &self.config.sk, self.config.timeout)?;
        let tsdb =
            HttpTsdbClient::new(tsdb_url, &self.config.ak, &self.config.sk, self.config.timeout)?;

        self.connect_with(pipeline, tsdb)
    }
}

impl<P, T> PipelineOutput<P, T>
where
    P: PipelineApi,
    T: TsdbApi,
{
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let refresh = RefreshSchedule::new(config.export_refresh_interval);

        PipelineOutput { config, state: State::Unconnected, refresh }
    }

    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    /// Connects using prebuilt clients. The endpoints are still validated.
    ///
    /// # Errors
    ///
    /// Errors if either endpoint is not a valid `http(s)` URL.
    pub fn connect_with(&mut self, pipeline: P, tsdb: T) -> Result<(), Error> {
        parse_endpoint(&self.config.url)?;
        parse_endpoint(&self.config.tsdb_url)?;

        self.state = State::Connected { pipeline, tsdb };
        info!(url = %self.config.url, repo = %self.config.repo, "Pipeline output connected");

        Ok(())
    }

    /// There is nothing to release; the output simply stops accepting
    /// writes.
    ///
    /// # Errors
    ///
    /// Never errors.
    pub fn close(&mut self) -> Result<(), Error> {
        self.state = State::Closed;

        Ok(())
    }

    /// Writes a batch, provisioning the repo and exports if the backend
    /// reports them missing and `auto_create_repo` is set.
    ///
    /// # Errors
    ///
    /// Errors if the output is not connected, the batch cannot be encoded,
    /// the backend fails with a non-recoverable error, or the TSDB repo
    /// cannot be created while bootstrapping a new repo.
    pub async fn write(&mut self, points: &[Point]) -> Result<(), Error> {
        let State::Connected { pipeline, tsdb } = &self.state else {
            return Err(Error::NotConnected);
        };
        if points.is_empty() {
            return Ok(());
        }

        let repo = self.config.repo.as_str();
        let body = record::encode(points)?;
        debug!(repo, points = points.len(), bytes = body.len(), "Writing records");

        match submit::classify(pipeline.write(repo, body).await, Variant::Pipeline, repo) {
            WriteOutcome::Ok => {
                if self.refresh.due(Instant::now()) {
                    debug!(repo, "Refreshing exports");
                    reconcile::update_exports(pipeline, tsdb, repo, &schema::extract(points))
                        .await;
                }

                Ok(())
            }
            // Dropped by the backend; retrying would wedge the batch forever.
            WriteOutcome::FieldConflict => Ok(()),
            WriteOutcome::MissingRepo | WriteOutcome::SchemaMismatch => {
                if !self.config.auto_create_repo {
                    info!(repo, "auto_create_repo disabled, dropping batch");

                    return Ok(());
                }

                info!(repo, "Reconciling repo schema");
                reconcile::reconcile_schema(
                    pipeline,
                    tsdb,
                    repo,
                    &self.config.region,
                    &schema::extract(points),
                )
                .await
                .map_err(Into::into)
            }
            // Only produced by the TSDB variant.
            WriteOutcome::MissingSeries => Ok(()),
            WriteOutcome::Fatal(err) => Err(err.into()),
        }
    }
}

/// Decides when a successful write is followed by an export refresh.
///
/// The first successful write always refreshes; afterwards at most one
/// refresh runs per `interval`. A zero interval never refreshes.
#[derive(Debug)]
struct RefreshSchedule {
    interval: Duration,
    last_refresh: Option<Instant>,
}

impl RefreshSchedule {
    const fn new(interval: Duration) -> Self {
        RefreshSchedule { interval, last_refresh: None }
    }

    fn due(&mut self, now: Instant) -> bool {
        if self.interval.is_zero() {
            return false;
        }

        match self.last_refresh {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_refresh = Some(now);

                true
            }
        }
    }
}
