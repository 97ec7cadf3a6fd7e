use tracing::{debug, info, warn};

use crate::client::TsdbApi;
use crate::config::{parse_endpoint, TsdbConfig};
use crate::http::HttpTsdbClient;
use crate::submit::{self, Variant, WriteOutcome};
use crate::{line_protocol, Error, Point};

pub const TSDB_SAMPLE_CONFIG: &str = r#"
  # Configuration for Pandora TSDB server to send metrics to
  [[outputs.pandora]]
  ## TSDB endpoint (required).
  url = "http://localhost:8086"
  ## The target repo for metrics (required).
  repo = "telegraf"
  ## Create series named by the batch when the backend reports them missing.
  auto_create_series = false
  ## Retention of auto-created series, 1d to 30d. Empty uses the backend
  ## default.
  retention_policy = ""
  ## Write timeout, formatted as a string. 0s means no timeout (not
  ## recommended).
  timeout = "5s"
  ak = "ACCESS_KEY"
  sk = "SECRET_KEY"
"#;

enum State<T> {
    Unconnected,
    Connected { tsdb: T },
    Closed,
}

/// Output writing line protocol into a TSDB repo.
pub struct TsdbOutput<T = HttpTsdbClient> {
    config: TsdbConfig,
    state: State<T>,
}

impl TsdbOutput {
    /// Validates the endpoint and builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Errors if the endpoint is not a valid `http(s)` URL or the client
    /// cannot be built. The output stays unconnected.
    pub fn connect(&mut self) -> Result<(), Error> {
        let url = parse_endpoint(&self.config.url)?;
        let tsdb = HttpTsdbClient::new(url, &self.config.ak, &self.config.sk, self.config.timeout)?;

        self.connect_with(tsdb)
    }
}

impl<T> TsdbOutput<T>
where
    T: TsdbApi,
{
    #[must_use]
    pub const fn new(config: TsdbConfig) -> Self {
        TsdbOutput { config, state: State::Unconnected }
    }

    #[must_use]
    pub const fn config(&self) -> &TsdbConfig {
        &self.config
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    /// Connects using a prebuilt client. The endpoint is still validated.
    ///
    /// # Errors
    ///
    /// Errors if the endpoint is not a valid `http(s)` URL.
    pub fn connect_with(&mut self, tsdb: T) -> Result<(), Error> {
        parse_endpoint(&self.config.url)?;

        self.state = State::Connected { tsdb };
        info!(url = %self.config.url, repo = %self.config.repo, "TSDB output connected");

        Ok(())
    }

    /// # Errors
    ///
    /// Never errors.
    pub fn close(&mut self) -> Result<(), Error> {
        self.state = State::Closed;

        Ok(())
    }

    /// Writes a batch, creating the series it names if the backend reports
    /// them missing and `auto_create_series` is set.
    ///
    /// # Errors
    ///
    /// Errors if the output is not connected, the batch cannot be encoded or
    /// the backend fails with a non-recoverable error.
    pub async fn write(&mut self, points: &[Point]) -> Result<(), Error> {
        let State::Connected { tsdb } = &self.state else {
            return Err(Error::NotConnected);
        };

        let repo = self.config.repo.as_str();
        let body = line_protocol::encode(points)?;
        if body.is_empty() {
            return Ok(());
        }
        debug!(repo, points = points.len(), bytes = body.len(), "Writing points");

        // Named before the body moves into the write.
        let series_names = match self.config.auto_create_series {
            true => line_protocol::series_names(&body),
            false => Vec::new(),
        };

        match submit::classify(tsdb.write(repo, body).await, Variant::Tsdb, repo) {
            WriteOutcome::MissingSeries if self.config.auto_create_series => {
                let retention = self.config.retention();
                for series in series_names {
                    info!(repo, series = series.as_str(), retention, "Creating series");
                    if let Err(err) = tsdb.create_series(repo, &series, retention).await {
                        warn!(repo, series = series.as_str(), %err, "Create series failed");
                    }
                }

                Ok(())
            }
            WriteOutcome::MissingSeries => {
                info!(repo, "auto_create_series disabled, dropping batch");

                Ok(())
            }
            // Repo level codes are only produced by the pipeline variant.
            WriteOutcome::Ok
            | WriteOutcome::FieldConflict
            | WriteOutcome::MissingRepo
            | WriteOutcome::SchemaMismatch => Ok(()),
            WriteOutcome::Fatal(err) => Err(err.into()),
        }
    }
}
