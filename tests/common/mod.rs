#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use metrics_pandora_output::client::{ApiError, ExportSpec, PipelineApi, TsdbApi};
use metrics_pandora_output::config::{PipelineConfig, TsdbConfig};
use metrics_pandora_output::schema::SchemaEntry;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Write { repo: String, body: String },
    GetRepo { repo: String },
    CreateRepo { repo: String, region: String, schema: Vec<SchemaEntry> },
    UpdateRepo { repo: String, schema: Vec<SchemaEntry> },
    CreateExport { repo: String, name: String, spec: ExportSpec },
    UpdateExport { repo: String, name: String, spec: ExportSpec },
    TsdbWrite { repo: String, body: String },
    CreateTsdbRepo { repo: String, region: String },
    CreateSeries { repo: String, series: String, retention: Option<String> },
}

impl Call {
    pub const fn op(&self) -> &'static str {
        match self {
            Call::Write { .. } => "write",
            Call::GetRepo { .. } => "get_repo",
            Call::CreateRepo { .. } => "create_repo",
            Call::UpdateRepo { .. } => "update_repo",
            Call::CreateExport { .. } => "create_export",
            Call::UpdateExport { .. } => "update_export",
            Call::TsdbWrite { .. } => "tsdb_write",
            Call::CreateTsdbRepo { .. } => "create_tsdb_repo",
            Call::CreateSeries { .. } => "create_series",
        }
    }
}

/// In-memory stand-in for both backends.
///
/// Objects are tracked well enough to produce the "missing" and "exists"
/// codes; anything else is injected with [`Backend::fail_next`].
#[derive(Debug, Default)]
pub struct State {
    /// `None` while the pipeline repo does not exist.
    pub pipeline_repo: Option<Vec<SchemaEntry>>,
    pub tsdb_repo: bool,
    pub series: BTreeSet<String>,
    pub exports: BTreeMap<String, ExportSpec>,
    pub calls: Vec<Call>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
}

#[derive(Debug, Default, Clone)]
pub struct Backend(Arc<Mutex<State>>);

impl Backend {
    pub fn with_repo(schema: Vec<SchemaEntry>) -> Self {
        let backend = Backend::default();
        backend.state().pipeline_repo = Some(schema);
        backend.state().tsdb_repo = true;

        backend
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    /// Fails the next call of `op` with `message`.
    pub fn fail_next(&self, op: &'static str, message: &str) {
        self.state()
            .failures
            .entry(op)
            .or_default()
            .push_back(ApiError::new(message).with_status(400));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.state().calls.iter().map(Call::op).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn pipeline(&self) -> MockPipeline {
        MockPipeline(self.clone())
    }

    pub fn tsdb(&self) -> MockTsdb {
        MockTsdb(self.clone())
    }

    fn record(&self, call: Call) -> Result<MutexGuard<'_, State>, ApiError> {
        let mut state = self.state();
        let op = call.op();
        state.calls.push(call);

        let failure = state.failures.get_mut(op).and_then(VecDeque::pop_front);
        match failure {
            Some(err) => Err(err),
            None => Ok(state),
        }
    }
}

pub struct MockPipeline(Backend);

#[async_trait]
impl PipelineApi for MockPipeline {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError> {
        let state = self.0.record(Call::Write { repo: repo.to_string(), body })?;

        match state.pipeline_repo {
            Some(_) => Ok(()),
            None => Err(ApiError::new("E18102: repo does not exist").with_status(404)),
        }
    }

    async fn get_repo(&self, repo: &str) -> Result<Vec<SchemaEntry>, ApiError> {
        let state = self.0.record(Call::GetRepo { repo: repo.to_string() })?;

        state
            .pipeline_repo
            .clone()
            .ok_or_else(|| ApiError::new("E18102: repo does not exist").with_status(404))
    }

    async fn create_repo(
        &self,
        repo: &str,
        region: &str,
        schema: &[SchemaEntry],
    ) -> Result<(), ApiError> {
        let mut state = self.0.record(Call::CreateRepo {
            repo: repo.to_string(),
            region: region.to_string(),
            schema: schema.to_vec(),
        })?;
        state.pipeline_repo = Some(schema.to_vec());

        Ok(())
    }

    async fn update_repo(&self, repo: &str, schema: &[SchemaEntry]) -> Result<(), ApiError> {
        let mut state = self
            .0
            .record(Call::UpdateRepo { repo: repo.to_string(), schema: schema.to_vec() })?;
        state.pipeline_repo = Some(schema.to_vec());

        Ok(())
    }

    async fn create_export(
        &self,
        repo: &str,
        name: &str,
        spec: &ExportSpec,
    ) -> Result<(), ApiError> {
        let mut state = self.0.record(Call::CreateExport {
            repo: repo.to_string(),
            name: name.to_string(),
            spec: spec.clone(),
        })?;
        if state.exports.contains_key(name) {
            return Err(ApiError::new("E18301: export already exists").with_status(409));
        }
        state.exports.insert(name.to_string(), spec.clone());

        Ok(())
    }

    async fn update_export(
        &self,
        repo: &str,
        name: &str,
        spec: &ExportSpec,
    ) -> Result<(), ApiError> {
        let mut state = self.0.record(Call::UpdateExport {
            repo: repo.to_string(),
            name: name.to_string(),
            spec: spec.clone(),
        })?;
        state.exports.insert(name.to_string(), spec.clone());

        Ok(())
    }
}

pub struct MockTsdb(Backend);

#[async_trait]
impl TsdbApi for MockTsdb {
    async fn write(&self, repo: &str, body: String) -> Result<(), ApiError> {
        self.0
            .record(Call::TsdbWrite { repo: repo.to_string(), body })
            .map(drop)
    }

    async fn create_repo(&self, repo: &str, region: &str) -> Result<(), ApiError> {
        let mut state = self
            .0
            .record(Call::CreateTsdbRepo { repo: repo.to_string(), region: region.to_string() })?;
        state.tsdb_repo = true;

        Ok(())
    }

    async fn create_series(
        &self,
        repo: &str,
        series: &str,
        retention: Option<&str>,
    ) -> Result<(), ApiError> {
        let mut state = self.0.record(Call::CreateSeries {
            repo: repo.to_string(),
            series: series.to_string(),
            retention: retention.map(str::to_string),
        })?;
        if !state.series.insert(series.to_string()) {
            return Err(ApiError::new("E6302: series already exists").with_status(409));
        }

        Ok(())
    }
}

pub fn pipeline_config(auto_create_repo: bool) -> PipelineConfig {
    PipelineConfig::from_toml(
        toml::from_str(&format!(
            r#"
            url = "http://pipeline.local"
            tsdb_url = "http://tsdb.local"
            repo = "monitor"
            ak = "ak"
            sk = "sk"
            auto_create_repo = {auto_create_repo}
            "#
        ))
        .unwrap(),
    )
    .unwrap()
}

pub fn tsdb_config(url: &str, auto_create_series: bool, retention: &str) -> TsdbConfig {
    TsdbConfig::from_toml(
        toml::from_str(&format!(
            r#"
            url = "{url}"
            repo = "telegraf"
            ak = "ak"
            sk = "sk"
            auto_create_series = {auto_create_series}
            retention_policy = "{retention}"
            "#
        ))
        .unwrap(),
    )
    .unwrap()
}
