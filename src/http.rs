use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::client::{ApiError, ExportSpec, PipelineApi, TsdbApi};
use crate::schema::SchemaEntry;

const PIPELINE_API: &str = "v2";
const TSDB_API: &str = "v4";

/// Shared HTTP plumbing for both backend APIs.
#[derive(Debug, Clone)]
struct HttpBackend {
    client: Client,
    base: Url,
    access_key: String,
    secret_key: String,
}

impl HttpBackend {
    fn new(
        base: Url,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // A zero timeout means no deadline at all.
        let mut builder = Client::builder();
        if !timeout.is_zero() {
            builder = builder.timeout(timeout);
        }

        Ok(HttpBackend {
            client: builder.build()?,
            base,
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ApiError::transport(format!("base url cannot be a base; url={}", self.base))
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.access_key, Some(&self.secret_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(ApiError::transport)?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        Err(ApiError::new(error_message(status, &body)).with_status(status.as_u16()))
    }

    async fn post_text(&self, segments: &[&str], body: String) -> Result<(), ApiError> {
        let url = self.url(segments)?;
        self.send(
            self.client
                .post(url)
                .header(CONTENT_TYPE, "text/plain")
                .body(body),
        )
        .await
        .map(drop)
    }

    async fn post_json<T: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: &T,
    ) -> Result<(), ApiError> {
        let url = self.url(segments)?;
        self.send(self.client.post(url).json(body)).await.map(drop)
    }

    async fn put_json<T: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: &T,
    ) -> Result<(), ApiError> {
        let url = self.url(segments)?;
        self.send(self.client.put(url).json(body)).await.map(drop)
    }
}

/// Pulls the backend message out of an error response.
///
/// Pandora (and InfluxDB-compatible endpoints) answer `{"error": "..."}`;
/// anything else is passed through verbatim.
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => error,
        Err(_) if body.trim().is_empty() => status.to_string(),
        Err(_) => body.trim().to_string(),
    }
}

/// [`PipelineApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPipelineClient {
    backend: HttpBackend,
}

impl HttpPipelineClient {
    /// # Errors
    ///
    /// Errors if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(HttpPipelineClient {
            backend: HttpBackend::new(endpoint, access_key, secret_key, timeout)?,
        })
    }
}

#[derive(Serialize)]
struct CreateRepoBody<'a> {
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a [SchemaEntry]>,
}

#[derive(Serialize)]
struct UpdateRepoBody<'a> {
    schema: &'a [SchemaEntry],
}

#[derive(Deserialize)]
struct GetRepoBody {
    #[serde(default)]
    schema: Vec<SchemaEntry>,
}

#[derive(Serialize)]
struct CreateExportBody<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    whence: &'static str,
    spec: &'a ExportSpec,
}

#[derive(Serialize)]
struct UpdateExportBody<'a> {
    spec: &'a ExportSpec,
}

#[async_trait]
impl PipelineApi for HttpPipelineClient {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError> {
        self.backend
            .post_text(&[PIPELINE_API, "repos", repo, "data"], body)
            .await
    }

    async fn get_repo(&self, repo: &str) -> Result<Vec<SchemaEntry>, ApiError> {
        let url = self.backend.url(&[PIPELINE_API, "repos", repo])?;
        let resp = self.backend.send(self.backend.client.get(url)).await?;
        let body: GetRepoBody = resp.json().await.map_err(ApiError::transport)?;

        Ok(body.schema)
    }

    async fn create_repo(
        &self,
        repo: &str,
        region: &str,
        schema: &[SchemaEntry],
    ) -> Result<(), ApiError> {
        self.backend
            .post_json(
                &[PIPELINE_API, "repos", repo],
                &CreateRepoBody { region, schema: Some(schema) },
            )
            .await
    }

    async fn update_repo(&self, repo: &str, schema: &[SchemaEntry]) -> Result<(), ApiError> {
        self.backend
            .put_json(&[PIPELINE_API, "repos", repo], &UpdateRepoBody { schema })
            .await
    }

    async fn create_export(
        &self,
        repo: &str,
        name: &str,
        spec: &ExportSpec,
    ) -> Result<(), ApiError> {
        self.backend
            .post_json(
                &[PIPELINE_API, "repos", repo, "exports", name],
                &CreateExportBody { kind: "tsdb", whence: "oldest", spec },
            )
            .await
    }

    async fn update_export(
        &self,
        repo: &str,
        name: &str,
        spec: &ExportSpec,
    ) -> Result<(), ApiError> {
        self.backend
            .put_json(&[PIPELINE_API, "repos", repo, "exports", name], &UpdateExportBody { spec })
            .await
    }
}

/// [`TsdbApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTsdbClient {
    backend: HttpBackend,
}

impl HttpTsdbClient {
    /// # Errors
    ///
    /// Errors if the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: Url,
        access_key: &str,
        secret_key: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(HttpTsdbClient { backend: HttpBackend::new(endpoint, access_key, secret_key, timeout)? })
    }
}

#[derive(Serialize)]
struct CreateSeriesBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    retention: Option<&'a str>,
}

#[async_trait]
impl TsdbApi for HttpTsdbClient {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError> {
        self.backend
            .post_text(&[TSDB_API, "repos", repo, "points"], body)
            .await
    }

    async fn create_repo(&self, repo: &str, region: &str) -> Result<(), ApiError> {
        self.backend
            .post_json(&[TSDB_API, "repos", repo], &CreateRepoBody { region, schema: None })
            .await
    }

    async fn create_series(
        &self,
        repo: &str,
        series: &str,
        retention: Option<&str>,
    ) -> Result<(), ApiError> {
        self.backend
            .post_json(
                &[TSDB_API, "repos", repo, "series", series],
                &CreateSeriesBody { retention },
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;
    use reqwest::StatusCode;

    use super::*;

    fn backend(base: &str) -> HttpBackend {
        HttpBackend::new(Url::parse(base).unwrap(), "ak", "sk", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn url_appends_segments() {
        expect!["https://pipeline.qiniu.com/v2/repos/monitor/data"].assert_eq(
            backend("https://pipeline.qiniu.com")
                .url(&["v2", "repos", "monitor", "data"])
                .unwrap()
                .as_str(),
        );
    }

    #[test]
    fn url_keeps_base_path_and_encodes() {
        expect!["http://localhost:8080/proxy/v4/repos/my%20repo/series/cpu"].assert_eq(
            backend("http://localhost:8080/proxy/")
                .url(&["v4", "repos", "my repo", "series", "cpu"])
                .unwrap()
                .as_str(),
        );
    }

    #[test]
    fn error_message_json() {
        expect!["E18102: repo does not exist"].assert_eq(&error_message(
            StatusCode::NOT_FOUND,
            r#"{"error":"E18102: repo does not exist"}"#,
        ));
    }

    #[test]
    fn error_message_influx_style() {
        expect!["database not found"].assert_eq(&error_message(
            StatusCode::NOT_FOUND,
            "{\"results\":[{}],\"error\":\"database not found\"}\n",
        ));
    }

    #[test]
    fn error_message_raw_and_empty() {
        expect!["bad gateway"].assert_eq(&error_message(StatusCode::BAD_GATEWAY, "bad gateway\n"));
        expect!["502 Bad Gateway"].assert_eq(&error_message(StatusCode::BAD_GATEWAY, "  "));
    }
}
